use crate::access::level::{AccessLevel, fix_allow_level};
use crate::access::principal::{
    ANONYMOUS_IDENTIFIER, OrgRole, PUBLIC_IDENTIFIER, Principal, expand_roles,
};
use crate::value::{equal_ids, is_id};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

/// Who an entry applies to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum AclTarget {
    Account { target: String },
    Role { target: String },
    /// The principal is the subject account itself.
    #[serde(rename = "self")]
    SelfAccount,
    Owner,
    Creator,
    /// Stored for compatibility; never matches on its own.
    Access,
    Expression { expression: String },
}

impl AclTarget {
    fn merge_key(&self) -> String {
        match self {
            AclTarget::Account { target } => format!("account:{target}"),
            AclTarget::Role { target } => format!("role:{target}"),
            AclTarget::SelfAccount => "self".into(),
            AclTarget::Owner => "owner".into(),
            AclTarget::Creator => "creator".into(),
            AclTarget::Access => "access".into(),
            AclTarget::Expression { expression } => format!("expression:{expression}"),
        }
    }
}

/// What a matching entry grants: a level, or an instance role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AclAllow {
    Level(AccessLevel),
    Role(String),
}

impl Serialize for AclAllow {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            AclAllow::Level(level) => level.serialize(serializer),
            AclAllow::Role(role) => serializer.serialize_str(role),
        }
    }
}

impl<'de> Deserialize<'de> for AclAllow {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = Value::deserialize(deserializer)?;
        match &raw {
            Value::String(s) if is_id(s) => Ok(AclAllow::Role(s.clone())),
            other => Ok(AclAllow::Level(fix_allow_level(
                other,
                true,
                AccessLevel::None,
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AclEntry {
    #[serde(flatten)]
    pub target: AclTarget,
    pub allow: AclAllow,
}

impl AclEntry {
    pub fn account(target: impl Into<String>, level: AccessLevel) -> Self {
        Self {
            target: AclTarget::Account {
                target: target.into(),
            },
            allow: AclAllow::Level(level),
        }
    }

    pub fn role(target: impl Into<String>, level: AccessLevel) -> Self {
        Self {
            target: AclTarget::Role {
                target: target.into(),
            },
            allow: AclAllow::Level(level),
        }
    }

    pub fn public(level: AccessLevel) -> Self {
        Self::account(PUBLIC_IDENTIFIER, level)
    }

    pub fn anonymous(level: AccessLevel) -> Self {
        Self::account(ANONYMOUS_IDENTIFIER, level)
    }

    pub fn owner(level: AccessLevel) -> Self {
        Self {
            target: AclTarget::Owner,
            allow: AclAllow::Level(level),
        }
    }

    pub fn creator(level: AccessLevel) -> Self {
        Self {
            target: AclTarget::Creator,
            allow: AclAllow::Level(level),
        }
    }

    pub fn expression(expression: impl Into<String>, level: AccessLevel) -> Self {
        Self {
            target: AclTarget::Expression {
                expression: expression.into(),
            },
            allow: AclAllow::Level(level),
        }
    }
}

/// A property-level entry: applies only to nodes whose full path matches
/// one of `paths`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaclEntry {
    #[serde(flatten)]
    pub target: AclTarget,
    pub allow: AccessLevel,
    #[serde(default)]
    pub paths: Vec<String>,
}

impl PaclEntry {
    /// A path applies when it names the node, one of its ancestors, or when
    /// its first segment names the node.
    pub fn applies_to(&self, fullpath: &str) -> bool {
        self.paths.iter().any(|path| {
            fullpath == path
                || fullpath
                    .strip_prefix(path.as_str())
                    .is_some_and(|rest| rest.starts_with('.'))
                || path.split('.').next() == Some(fullpath)
        })
    }

    pub fn as_entry(&self) -> AclEntry {
        AclEntry {
            target: self.target.clone(),
            allow: AclAllow::Level(self.allow),
        }
    }
}

/// Result of resolving an entry list: the merged level plus any instance
/// roles picked up along the way.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AclAccess {
    pub allow: AccessLevel,
    pub roles: Vec<String>,
}

impl Default for AclAccess {
    fn default() -> Self {
        Self {
            allow: AccessLevel::None,
            roles: Vec::new(),
        }
    }
}

impl AclAccess {
    pub fn merge(&mut self, level: AccessLevel) {
        self.allow = self.allow.max(level);
    }

    pub fn has_access(&self, required: AccessLevel) -> bool {
        self.allow >= required
    }
}

/// Evaluates expression-typed entries against the resolution input.
pub trait ExpressionEvaluator: Send + Sync {
    fn evaluate(&self, expression: &str, input: &ResolveInput<'_>) -> bool;
}

/// Everything entry matching needs to know about the caller and the subject.
pub struct ResolveInput<'a> {
    pub principal: &'a Principal,
    pub object_name: &'a str,
    pub subject_id: Option<&'a str>,
    pub owner_id: Option<&'a str>,
    pub creator_id: Option<&'a str>,
    pub org_roles: &'a [OrgRole],
    /// Roles already granted to the caller for this instance.
    pub instance_roles: &'a [String],
    pub evaluator: Option<&'a dyn ExpressionEvaluator>,
}

impl ResolveInput<'_> {
    fn matches(&self, target: &AclTarget, roles: &[String]) -> bool {
        let principal = self.principal;
        match target {
            AclTarget::Account { target } => {
                equal_ids(&principal.id, target)
                    || (equal_ids(PUBLIC_IDENTIFIER, target) && !principal.is_anonymous())
                    || equal_ids(ANONYMOUS_IDENTIFIER, target)
            }
            AclTarget::Role { target } => {
                principal.has_role(target) || roles.iter().any(|r| equal_ids(r, target))
            }
            AclTarget::SelfAccount => {
                self.object_name == "account"
                    && self
                        .subject_id
                        .is_some_and(|subject| equal_ids(&principal.id, subject))
            }
            AclTarget::Owner => self.owner_id.is_some_and(|id| equal_ids(&principal.id, id)),
            AclTarget::Creator => self
                .creator_id
                .is_some_and(|id| equal_ids(&principal.id, id)),
            AclTarget::Access => false,
            AclTarget::Expression { expression } => self
                .evaluator
                .is_some_and(|evaluator| evaluator.evaluate(expression, self)),
        }
    }
}

/// Takes the maximum allow over every matching entry.
///
/// Role-granting entries are collected first and expanded through the org
/// role hierarchy so that role-targeted level entries see them.
pub fn resolve_access(entries: &[AclEntry], input: &ResolveInput<'_>) -> AclAccess {
    let mut access = AclAccess::default();

    let granted: Vec<String> = entries
        .iter()
        .filter_map(|entry| match &entry.allow {
            AclAllow::Role(role) if input.matches(&entry.target, input.instance_roles) => {
                Some(role.clone())
            }
            _ => None,
        })
        .collect();
    let mut roles: Vec<String> = input.instance_roles.to_vec();
    for role in expand_roles(input.org_roles, &granted) {
        if !roles.iter().any(|r| equal_ids(r, &role)) {
            roles.push(role);
        }
    }

    for entry in entries {
        if let AclAllow::Level(level) = entry.allow {
            if input.matches(&entry.target, &roles) {
                access.merge(level);
            }
        }
    }
    access.roles = roles;
    access
}

/// Merges entries sharing a type and target by taking the maximum level and
/// drops entries that grant nothing.
pub fn merge_and_sanitize_entries(entries: &[AclEntry]) -> Vec<AclEntry> {
    let mut merged: Vec<AclEntry> = Vec::new();
    for entry in entries {
        let key = entry.target.merge_key();
        let existing = merged.iter_mut().find(|e| {
            e.target.merge_key() == key
                && matches!(
                    (&e.allow, &entry.allow),
                    (AclAllow::Level(_), AclAllow::Level(_))
                )
        });
        match (existing, &entry.allow) {
            (Some(existing), AclAllow::Level(level)) => {
                if let AclAllow::Level(current) = existing.allow {
                    existing.allow = AclAllow::Level(current.max(*level));
                }
            }
            _ => {
                if !merged.contains(entry) {
                    merged.push(entry.clone());
                }
            }
        }
    }
    merged.retain(|e| e.allow != AclAllow::Level(AccessLevel::None));
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn input<'a>(principal: &'a Principal, org_roles: &'a [OrgRole]) -> ResolveInput<'a> {
        ResolveInput {
            principal,
            object_name: "c_widget",
            subject_id: Some("s1"),
            owner_id: Some("owner"),
            creator_id: Some("creator"),
            org_roles,
            instance_roles: &[],
            evaluator: None,
        }
    }

    #[test]
    fn maximum_of_matching_entries_wins() {
        let principal = Principal::new("owner", "org");
        let entries = vec![
            AclEntry::public(AccessLevel::Read),
            AclEntry::owner(AccessLevel::Delete),
            AclEntry::account("someone-else", AccessLevel::System),
        ];
        let access = resolve_access(&entries, &input(&principal, &[]));
        assert_eq!(access.allow, AccessLevel::Delete);
    }

    #[test]
    fn public_identifier_skips_anonymous() {
        let principal = Principal::anonymous("org");
        let entries = vec![AclEntry::public(AccessLevel::Read)];
        let access = resolve_access(&entries, &input(&principal, &[]));
        assert_eq!(access.allow, AccessLevel::None);

        let entries = vec![AclEntry::anonymous(AccessLevel::Public)];
        let access = resolve_access(&entries, &input(&principal, &[]));
        assert_eq!(access.allow, AccessLevel::Public);
    }

    #[test]
    fn role_grants_feed_role_entries() {
        let principal = Principal::new("u1", "org");
        let editor = "7d0c6a1e-7a57-4b2a-9f33-1f5e2b0c9a11".to_string();
        let org_roles = vec![OrgRole {
            id: editor.clone(),
            name: "editor".into(),
            include: vec![],
        }];
        let entries = vec![
            AclEntry {
                target: AclTarget::Account {
                    target: "u1".into(),
                },
                allow: AclAllow::Role(editor.clone()),
            },
            AclEntry::role(editor.clone(), AccessLevel::Update),
        ];
        let access = resolve_access(&entries, &input(&principal, &org_roles));
        assert_eq!(access.allow, AccessLevel::Update);
        assert_eq!(access.roles, vec![editor]);
    }

    #[test]
    fn entries_deserialize_from_stored_shape() {
        let entry: AclEntry =
            serde_json::from_value(json!({"type": "role", "target": "r1", "allow": 6})).unwrap();
        assert_eq!(entry, AclEntry::role("r1", AccessLevel::Update));
        let entry: AclEntry =
            serde_json::from_value(json!({"type": "owner", "allow": "delete"})).unwrap();
        assert_eq!(entry, AclEntry::owner(AccessLevel::Delete));
    }

    #[test]
    fn pacl_paths_match_ancestors_and_first_segments() {
        let entry = PaclEntry {
            target: AclTarget::Owner,
            allow: AccessLevel::Read,
            paths: vec!["c_doc".into(), "c_list.c_name".into()],
        };
        assert!(entry.applies_to("c_doc"));
        assert!(entry.applies_to("c_doc.c_inner"));
        assert!(entry.applies_to("c_list"));
        assert!(!entry.applies_to("c_docs"));
        assert!(!entry.applies_to("c_other"));
    }

    #[test]
    fn sanitizing_merges_and_drops_none() {
        let entries = vec![
            AclEntry::account("a", AccessLevel::Read),
            AclEntry::account("a", AccessLevel::Update),
            AclEntry::account("b", AccessLevel::None),
        ];
        let merged = merge_and_sanitize_entries(&entries);
        assert_eq!(merged, vec![AclEntry::account("a", AccessLevel::Update)]);
    }
}
