use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

/// Totally ordered permission levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum AccessLevel {
    None = 0,
    Public = 1,
    Connected = 2,
    Reserved = 3,
    Read = 4,
    Share = 5,
    Update = 6,
    Delete = 7,
    Script = 8,
    System = 9,
}

impl AccessLevel {
    pub const MIN: AccessLevel = AccessLevel::Public;
    pub const MAX: AccessLevel = AccessLevel::System;

    const ALL: [AccessLevel; 10] = [
        AccessLevel::None,
        AccessLevel::Public,
        AccessLevel::Connected,
        AccessLevel::Reserved,
        AccessLevel::Read,
        AccessLevel::Share,
        AccessLevel::Update,
        AccessLevel::Delete,
        AccessLevel::Script,
        AccessLevel::System,
    ];

    pub fn as_i64(self) -> i64 {
        self as u8 as i64
    }

    /// Clamps any integer into the valid range.
    pub fn clamped(level: i64, lower: AccessLevel) -> AccessLevel {
        let idx = level.clamp(lower.as_i64(), AccessLevel::MAX.as_i64());
        AccessLevel::ALL[idx as usize]
    }

    pub fn name(self) -> &'static str {
        match self {
            AccessLevel::None => "none",
            AccessLevel::Public => "public",
            AccessLevel::Connected => "connected",
            AccessLevel::Reserved => "reserved",
            AccessLevel::Read => "read",
            AccessLevel::Share => "share",
            AccessLevel::Update => "update",
            AccessLevel::Delete => "delete",
            AccessLevel::Script => "script",
            AccessLevel::System => "system",
        }
    }

    pub fn from_name(name: &str) -> Option<AccessLevel> {
        let lower = name.to_ascii_lowercase();
        AccessLevel::ALL.iter().copied().find(|l| l.name() == lower)
    }
}

impl std::fmt::Display for AccessLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl Serialize for AccessLevel {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i64(self.as_i64())
    }
}

impl<'de> Deserialize<'de> for AccessLevel {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = Value::deserialize(deserializer)?;
        Ok(fix_allow_level(&raw, true, AccessLevel::None))
    }
}

/// Normalizes a raw level (integer or level name) into the valid range.
///
/// The lower bound is `None` when `include_none` is set and `Public`
/// otherwise; unparseable input yields `default`, itself clamped.
pub fn fix_allow_level(raw: &Value, include_none: bool, default: AccessLevel) -> AccessLevel {
    let lower = if include_none {
        AccessLevel::None
    } else {
        AccessLevel::MIN
    };
    let default = default.max(lower);
    let numeric = match raw {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => AccessLevel::from_name(s).map(|l| l.as_i64() as f64),
        _ => None,
    };
    match numeric {
        Some(n) if n.is_finite() => AccessLevel::clamped(n.floor() as i64, lower),
        _ => default,
    }
}

/// A declared access requirement: either inherited from the parent node or
/// an explicit level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AccessSpec {
    #[default]
    Inherit,
    Level(AccessLevel),
}

impl AccessSpec {
    pub const INHERIT_MARKER: i64 = -1;

    pub fn from_value(raw: &Value) -> AccessSpec {
        match raw {
            Value::Null => AccessSpec::Inherit,
            Value::Number(n) if n.as_i64() == Some(Self::INHERIT_MARKER) => AccessSpec::Inherit,
            Value::String(s) if s.eq_ignore_ascii_case("inherit") => AccessSpec::Inherit,
            other => AccessSpec::Level(fix_allow_level(other, true, AccessLevel::Read)),
        }
    }

    pub fn level(self) -> Option<AccessLevel> {
        match self {
            AccessSpec::Inherit => None,
            AccessSpec::Level(level) => Some(level),
        }
    }
}

impl From<AccessLevel> for AccessSpec {
    fn from(level: AccessLevel) -> Self {
        AccessSpec::Level(level)
    }
}

impl Serialize for AccessSpec {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            AccessSpec::Inherit => serializer.serialize_i64(Self::INHERIT_MARKER),
            AccessSpec::Level(level) => level.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for AccessSpec {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = Value::deserialize(deserializer)?;
        Ok(AccessSpec::from_value(&raw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn names_and_numbers_normalize() {
        assert_eq!(
            fix_allow_level(&json!("Update"), false, AccessLevel::Read),
            AccessLevel::Update
        );
        assert_eq!(
            fix_allow_level(&json!(0), false, AccessLevel::Read),
            AccessLevel::Public
        );
        assert_eq!(
            fix_allow_level(&json!(0), true, AccessLevel::Read),
            AccessLevel::None
        );
        assert_eq!(
            fix_allow_level(&json!("bogus"), true, AccessLevel::Read),
            AccessLevel::Read
        );
        assert_eq!(
            fix_allow_level(&json!(99), true, AccessLevel::Read),
            AccessLevel::System
        );
    }

    #[test]
    fn inherit_marker_round_trips() {
        let spec: AccessSpec = serde_json::from_value(json!(-1)).unwrap();
        assert_eq!(spec, AccessSpec::Inherit);
        assert_eq!(serde_json::to_value(spec).unwrap(), json!(-1));
        let spec: AccessSpec = serde_json::from_value(json!(6)).unwrap();
        assert_eq!(spec, AccessSpec::Level(AccessLevel::Update));
    }

    proptest! {
        #[test]
        fn clamping_stays_in_range(raw in -1000i64..1000, include_none in any::<bool>()) {
            let level = fix_allow_level(&json!(raw), include_none, AccessLevel::Read);
            let lower = if include_none { AccessLevel::None } else { AccessLevel::MIN };
            prop_assert!(level >= lower);
            prop_assert!(level <= AccessLevel::MAX);
        }
    }
}
