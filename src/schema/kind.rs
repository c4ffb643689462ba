use crate::error::SchemaError;
use crate::index::slots::SlotPool;
use crate::schema::definition::{FileDef, ReferenceDef};
use crate::value::{is_id, raw_id_of};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PrimitiveType {
    String,
    Number,
    Boolean,
    Date,
    ObjectId,
    Any,
}

impl PrimitiveType {
    pub fn name(self) -> &'static str {
        match self {
            PrimitiveType::String => "String",
            PrimitiveType::Number => "Number",
            PrimitiveType::Boolean => "Boolean",
            PrimitiveType::Date => "Date",
            PrimitiveType::ObjectId => "ObjectId",
            PrimitiveType::Any => "Any",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum GeoType {
    #[default]
    Point,
    MultiPoint,
}

impl GeoType {
    pub fn name(self) -> &'static str {
        match self {
            GeoType::Point => "Point",
            GeoType::MultiPoint => "MultiPoint",
        }
    }
}

/// Compiled per-kind settings. Document-like kinds keep their children in
/// the owning node's child list.
#[derive(Debug, Clone)]
pub enum PropertyKind {
    Primitive(PrimitiveType),
    Document,
    Set(SetSpec),
    Reference(Box<ReferenceDef>),
    Geometry(GeoType),
    File(FileDef),
}

#[derive(Debug, Clone)]
pub struct SetSpec {
    pub discriminator_key: String,
    pub unique_prop: Option<String>,
    /// Per-shape `(minRequired, maxAllowed)` element counts.
    pub limits: BTreeMap<String, (Option<usize>, Option<usize>)>,
}

impl PropertyKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            PropertyKind::Primitive(p) => p.name(),
            PropertyKind::Document => "Document",
            PropertyKind::Set(_) => "Set",
            PropertyKind::Reference(_) => "Reference",
            PropertyKind::Geometry(_) => "Geometry",
            PropertyKind::File(_) => "File",
        }
    }

    /// Kinds whose values are plain objects with child properties.
    pub fn is_document(&self) -> bool {
        !matches!(self, PropertyKind::Primitive(_))
    }

    /// Kinds for which an all-undefined projection means "not found".
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            PropertyKind::Document | PropertyKind::Set(_) | PropertyKind::Reference(_)
        )
    }

    pub fn is_set(&self) -> bool {
        matches!(self, PropertyKind::Set(_))
    }
}

/// Conversion of incoming payload values into the stored representation.
pub trait Castable {
    fn cast(&self, path: &str, value: Value) -> Result<Value, SchemaError>;
}

impl Castable for PrimitiveType {
    fn cast(&self, path: &str, value: Value) -> Result<Value, SchemaError> {
        let failed = |value: &Value| {
            SchemaError::invalid(
                path,
                format!("Cast to {} failed for value {value}", self.name()),
            )
        };
        match self {
            PrimitiveType::Any => Ok(value),
            _ if value.is_null() => Ok(Value::Null),
            PrimitiveType::String => match value {
                Value::String(_) => Ok(value),
                Value::Number(n) => Ok(Value::String(n.to_string())),
                Value::Bool(b) => Ok(Value::String(b.to_string())),
                other => Err(failed(&other)),
            },
            PrimitiveType::Number => match &value {
                Value::Number(_) => Ok(value),
                Value::String(s) => s
                    .trim()
                    .parse::<f64>()
                    .ok()
                    .and_then(serde_json::Number::from_f64)
                    .map(|n| match n.as_f64() {
                        Some(f) if f.fract() == 0.0 && f.abs() < 9.0e15 => json!(f as i64),
                        _ => Value::Number(n),
                    })
                    .ok_or_else(|| failed(&value)),
                other => Err(failed(other)),
            },
            PrimitiveType::Boolean => match &value {
                Value::Bool(_) => Ok(value),
                Value::String(s) if s == "true" || s == "1" => Ok(Value::Bool(true)),
                Value::String(s) if s == "false" || s == "0" => Ok(Value::Bool(false)),
                Value::Number(n) if n.as_i64() == Some(1) => Ok(Value::Bool(true)),
                Value::Number(n) if n.as_i64() == Some(0) => Ok(Value::Bool(false)),
                other => Err(failed(other)),
            },
            PrimitiveType::Date => match &value {
                Value::String(s) if !s.trim().is_empty() => Ok(value),
                Value::Number(n) if n.is_i64() || n.is_u64() => Ok(value),
                other => Err(failed(other)),
            },
            PrimitiveType::ObjectId => match &value {
                Value::String(s) if is_id(s) => Ok(value),
                Value::Object(_) => match raw_id_of(&value) {
                    Some(Value::String(s)) if is_id(s) => Ok(Value::String(s.clone())),
                    _ => Err(failed(&value)),
                },
                other => Err(failed(other)),
            },
        }
    }
}

/// What a kind contributes to an index slot.
pub trait Indexable {
    fn is_indexable(&self) -> bool {
        true
    }

    fn slot_pool(&self) -> SlotPool {
        SlotPool::Index
    }

    /// The value stored for one concrete property value, or `None` when the
    /// value does not index.
    fn indexable_value(&self, value: &Value) -> Option<Value>;

    /// Whether repeated values are collapsed before storing.
    fn deduplicates(&self) -> bool {
        true
    }
}

impl Indexable for PrimitiveType {
    fn indexable_value(&self, value: &Value) -> Option<Value> {
        match value {
            Value::Null | Value::Object(_) | Value::Array(_) => None,
            other => Some(other.clone()),
        }
    }
}

impl Indexable for GeoType {
    fn slot_pool(&self) -> SlotPool {
        SlotPool::Geometry
    }

    fn indexable_value(&self, value: &Value) -> Option<Value> {
        let has_shape = value.get("type").is_some_and(Value::is_string)
            && value.get("coordinates").is_some_and(Value::is_array);
        has_shape.then(|| json!({"k": Value::Null, "v": value}))
    }

    fn deduplicates(&self) -> bool {
        false
    }
}

impl Indexable for ReferenceDef {
    fn indexable_value(&self, value: &Value) -> Option<Value> {
        match value {
            Value::String(s) if is_id(s) => Some(value.clone()),
            Value::Object(_) => raw_id_of(value).filter(|v| v.is_string()).cloned(),
            _ => None,
        }
    }
}

impl Indexable for FileDef {
    fn is_indexable(&self) -> bool {
        false
    }

    fn indexable_value(&self, _value: &Value) -> Option<Value> {
        None
    }
}

impl Indexable for PropertyKind {
    fn is_indexable(&self) -> bool {
        match self {
            PropertyKind::Primitive(p) => p.is_indexable(),
            PropertyKind::Reference(r) => r.is_indexable(),
            PropertyKind::Geometry(g) => g.is_indexable(),
            PropertyKind::File(f) => f.is_indexable(),
            PropertyKind::Document | PropertyKind::Set(_) => false,
        }
    }

    fn slot_pool(&self) -> SlotPool {
        match self {
            PropertyKind::Geometry(g) => g.slot_pool(),
            _ => SlotPool::Index,
        }
    }

    fn indexable_value(&self, value: &Value) -> Option<Value> {
        match self {
            PropertyKind::Primitive(p) => p.indexable_value(value),
            PropertyKind::Reference(r) => r.indexable_value(value),
            PropertyKind::Geometry(g) => g.indexable_value(value),
            PropertyKind::File(f) => f.indexable_value(value),
            PropertyKind::Document | PropertyKind::Set(_) => None,
        }
    }

    fn deduplicates(&self) -> bool {
        match self {
            PropertyKind::Geometry(g) => g.deduplicates(),
            _ => true,
        }
    }
}
