use crate::access::acl::{AclEntry, PaclEntry};
use crate::access::level::{AccessLevel, AccessSpec};
use crate::error::SchemaError;
use crate::schema::hooks::NodeHooks;
use crate::schema::kind::{GeoType, PrimitiveType};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;

fn yes() -> bool {
    true
}

fn share() -> AccessLevel {
    AccessLevel::Share
}

fn none_level() -> AccessLevel {
    AccessLevel::None
}

/// A named validation rule as stored in a property definition.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ValidatorDef {
    pub name: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub definition: Value,
}

impl ValidatorDef {
    pub fn new(name: impl Into<String>, definition: Value) -> Self {
        Self {
            name: name.into(),
            definition,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct DocumentDef {
    #[serde(default)]
    pub properties: Vec<PropertyDef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unique_key: Option<String>,
    #[serde(default)]
    pub merge_overwrite: bool,
    #[serde(default)]
    pub force_id: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct SetShapeDef {
    #[serde(rename = "_id", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub properties: Vec<PropertyDef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_required: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_allowed: Option<usize>,
}

impl SetShapeDef {
    pub fn new(name: impl Into<String>, properties: Vec<PropertyDef>) -> Self {
        let name = name.into();
        Self {
            id: None,
            label: name.clone(),
            name,
            properties,
            min_required: None,
            max_allowed: None,
        }
    }

    pub fn limits(mut self, min_required: Option<usize>, max_allowed: Option<usize>) -> Self {
        self.min_required = min_required;
        self.max_allowed = max_allowed;
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct SetDef {
    #[serde(default)]
    pub documents: Vec<SetShapeDef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discriminator_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unique_prop: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unique_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferenceDef {
    #[serde(default)]
    pub source_object: String,
    #[serde(default)]
    pub expandable: bool,
    #[serde(default = "yes")]
    pub validate_reference: bool,
    #[serde(default = "share")]
    pub reference_access: AccessLevel,
    #[serde(default = "none_level")]
    pub grant: AccessLevel,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default)]
    pub cascade_delete: bool,
    #[serde(default)]
    pub auto_create: bool,
    #[serde(default)]
    pub pacl: Vec<PaclEntry>,
    #[serde(default)]
    pub default_acl: Vec<AclEntry>,
    #[serde(default)]
    pub inherit_property_access: bool,
}

impl ReferenceDef {
    pub fn new(source_object: impl Into<String>) -> Self {
        Self {
            source_object: source_object.into(),
            expandable: false,
            validate_reference: true,
            reference_access: AccessLevel::Share,
            grant: AccessLevel::None,
            roles: Vec::new(),
            cascade_delete: false,
            auto_create: false,
            pacl: Vec::new(),
            default_acl: Vec::new(),
            inherit_property_access: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct GeometryDef {
    #[serde(default)]
    pub geo_type: GeoType,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FacetDef {
    pub name: String,
    #[serde(default)]
    pub private: bool,
    #[serde(default)]
    pub mimes: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct FileDef {
    /// Facets beyond the required `content` facet.
    #[serde(default)]
    pub facets: Vec<FacetDef>,
    #[serde(default)]
    pub processors: Vec<String>,
}

/// The declared type of a property along with its kind-specific settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum TypeDef {
    String,
    Number,
    Boolean,
    Date,
    ObjectId,
    Any,
    Document(DocumentDef),
    Set(SetDef),
    Reference(ReferenceDef),
    Geometry(GeometryDef),
    File(FileDef),
}

impl TypeDef {
    pub fn name(&self) -> &'static str {
        match self {
            TypeDef::String => "String",
            TypeDef::Number => "Number",
            TypeDef::Boolean => "Boolean",
            TypeDef::Date => "Date",
            TypeDef::ObjectId => "ObjectId",
            TypeDef::Any => "Any",
            TypeDef::Document(_) => "Document",
            TypeDef::Set(_) => "Set",
            TypeDef::Reference(_) => "Reference",
            TypeDef::Geometry(_) => "Geometry",
            TypeDef::File(_) => "File",
        }
    }

    pub fn primitive(&self) -> Option<PrimitiveType> {
        match self {
            TypeDef::String => Some(PrimitiveType::String),
            TypeDef::Number => Some(PrimitiveType::Number),
            TypeDef::Boolean => Some(PrimitiveType::Boolean),
            TypeDef::Date => Some(PrimitiveType::Date),
            TypeDef::ObjectId => Some(PrimitiveType::ObjectId),
            TypeDef::Any => Some(PrimitiveType::Any),
            _ => None,
        }
    }
}

/// A declarative property, as stored inside an object definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertyDef {
    #[serde(rename = "_id", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub label: String,
    #[serde(flatten)]
    pub kind: TypeDef,
    #[serde(default)]
    pub array: bool,
    #[serde(default = "yes")]
    pub readable: bool,
    #[serde(default = "yes")]
    pub writable: bool,
    #[serde(default)]
    pub creatable: bool,
    #[serde(default)]
    pub removable: bool,
    #[serde(default)]
    pub optional: bool,
    #[serde(default = "yes")]
    pub public: bool,
    #[serde(default, rename = "virtual")]
    pub is_virtual: bool,
    #[serde(default)]
    pub auto: bool,
    #[serde(default)]
    pub read_access: AccessSpec,
    #[serde(default)]
    pub write_access: AccessSpec,
    #[serde(default)]
    pub update_access: AccessSpec,
    /// `None` inherits the parent's acl.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acl: Option<Vec<AclEntry>>,
    #[serde(default)]
    pub acl_override: bool,
    #[serde(default)]
    pub indexed: bool,
    #[serde(default)]
    pub unique: bool,
    #[serde(default)]
    pub history: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auditable: Option<bool>,
    #[serde(default)]
    pub validators: Vec<ValidatorDef>,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub include: Vec<String>,
    #[serde(default, rename = "default", skip_serializing_if = "Option::is_none")]
    pub default_value: Option<Value>,
    #[serde(default)]
    pub write_priority: i32,
    #[serde(default)]
    pub defer_writes: bool,
    #[serde(default)]
    pub unique_values: bool,
    #[serde(default)]
    pub min_items: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_items: Option<i64>,
    #[serde(default)]
    pub max_shift: bool,
    #[serde(default = "yes")]
    pub can_push: bool,
    #[serde(default = "yes")]
    pub can_pull: bool,
    #[serde(default = "yes")]
    pub write_on_create: bool,
    /// A slot name bound to this property at compile time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index_slot: Option<String>,
    #[serde(skip)]
    pub hooks: NodeHooks,
}

impl PropertyDef {
    pub fn new(name: impl Into<String>, kind: TypeDef) -> Self {
        let name = name.into();
        Self {
            id: None,
            label: name.clone(),
            name,
            kind,
            array: false,
            readable: true,
            writable: true,
            creatable: false,
            removable: false,
            optional: false,
            public: true,
            is_virtual: false,
            auto: false,
            read_access: AccessSpec::Inherit,
            write_access: AccessSpec::Inherit,
            update_access: AccessSpec::Inherit,
            acl: None,
            acl_override: false,
            indexed: false,
            unique: false,
            history: false,
            auditable: None,
            validators: Vec::new(),
            dependencies: Vec::new(),
            include: Vec::new(),
            default_value: None,
            write_priority: 0,
            defer_writes: false,
            unique_values: false,
            min_items: 0,
            max_items: None,
            max_shift: false,
            can_push: true,
            can_pull: true,
            write_on_create: true,
            index_slot: None,
            hooks: NodeHooks::default(),
        }
    }

    pub fn string(name: impl Into<String>) -> Self {
        Self::new(name, TypeDef::String)
    }

    pub fn number(name: impl Into<String>) -> Self {
        Self::new(name, TypeDef::Number)
    }

    pub fn boolean(name: impl Into<String>) -> Self {
        Self::new(name, TypeDef::Boolean)
    }

    pub fn date(name: impl Into<String>) -> Self {
        Self::new(name, TypeDef::Date)
    }

    pub fn object_id(name: impl Into<String>) -> Self {
        Self::new(name, TypeDef::ObjectId)
    }

    pub fn any(name: impl Into<String>) -> Self {
        Self::new(name, TypeDef::Any)
    }

    pub fn document(name: impl Into<String>, properties: Vec<PropertyDef>) -> Self {
        Self::new(
            name,
            TypeDef::Document(DocumentDef {
                properties,
                ..DocumentDef::default()
            }),
        )
    }

    pub fn set(name: impl Into<String>, documents: Vec<SetShapeDef>) -> Self {
        let mut def = Self::new(
            name,
            TypeDef::Set(SetDef {
                documents,
                ..SetDef::default()
            }),
        );
        def.array = true;
        def
    }

    pub fn reference(name: impl Into<String>, source_object: impl Into<String>) -> Self {
        Self::new(name, TypeDef::Reference(ReferenceDef::new(source_object)))
    }

    pub fn geometry(name: impl Into<String>, geo_type: GeoType) -> Self {
        Self::new(name, TypeDef::Geometry(GeometryDef { geo_type }))
    }

    pub fn file(name: impl Into<String>) -> Self {
        Self::new(name, TypeDef::File(FileDef::default()))
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn array(mut self) -> Self {
        self.array = true;
        self
    }

    pub fn indexed(mut self) -> Self {
        self.indexed = true;
        self
    }

    pub fn unique(mut self) -> Self {
        self.indexed = true;
        self.unique = true;
        self
    }

    pub fn readable(mut self, readable: bool) -> Self {
        self.readable = readable;
        self
    }

    pub fn writable(mut self, writable: bool) -> Self {
        self.writable = writable;
        self
    }

    pub fn creatable(mut self) -> Self {
        self.creatable = true;
        self.writable = false;
        self
    }

    pub fn removable(mut self) -> Self {
        self.removable = true;
        self
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    pub fn virtual_node(mut self) -> Self {
        self.is_virtual = true;
        self
    }

    pub fn read_access(mut self, level: AccessLevel) -> Self {
        self.read_access = AccessSpec::Level(level);
        self
    }

    pub fn write_access(mut self, level: AccessLevel) -> Self {
        self.write_access = AccessSpec::Level(level);
        self
    }

    pub fn update_access(mut self, level: AccessLevel) -> Self {
        self.update_access = AccessSpec::Level(level);
        self
    }

    pub fn acl(mut self, entries: Vec<AclEntry>) -> Self {
        self.acl = Some(entries);
        self
    }

    pub fn acl_override(mut self) -> Self {
        self.acl_override = true;
        self
    }

    pub fn history(mut self) -> Self {
        self.history = true;
        self
    }

    pub fn auditable(mut self, auditable: bool) -> Self {
        self.auditable = Some(auditable);
        self
    }

    pub fn validator(mut self, name: impl Into<String>, definition: Value) -> Self {
        self.validators.push(ValidatorDef::new(name, definition));
        self
    }

    pub fn depends_on(mut self, path: impl Into<String>) -> Self {
        self.dependencies.push(path.into());
        self
    }

    pub fn include(mut self, path: impl Into<String>) -> Self {
        self.include.push(path.into());
        self
    }

    pub fn default_value(mut self, value: Value) -> Self {
        self.default_value = Some(value);
        self
    }

    pub fn write_priority(mut self, priority: i32) -> Self {
        self.write_priority = priority;
        self
    }

    pub fn defer_writes(mut self) -> Self {
        self.defer_writes = true;
        self
    }

    pub fn unique_values(mut self) -> Self {
        self.unique_values = true;
        self
    }

    pub fn items(mut self, min_items: i64, max_items: Option<i64>) -> Self {
        self.min_items = min_items;
        self.max_items = max_items;
        self
    }

    pub fn max_shift(mut self) -> Self {
        self.max_shift = true;
        self
    }

    pub fn can_push(mut self, can_push: bool) -> Self {
        self.can_push = can_push;
        self
    }

    pub fn can_pull(mut self, can_pull: bool) -> Self {
        self.can_pull = can_pull;
        self
    }

    pub fn write_on_create(mut self, write_on_create: bool) -> Self {
        self.write_on_create = write_on_create;
        self
    }

    pub fn index_slot(mut self, slot: impl Into<String>) -> Self {
        self.index_slot = Some(slot.into());
        self
    }

    pub fn unique_key(mut self, key: impl Into<String>) -> Self {
        match &mut self.kind {
            TypeDef::Document(doc) => doc.unique_key = Some(key.into()),
            TypeDef::Set(set) => set.unique_key = Some(key.into()),
            _ => {}
        }
        self
    }

    pub fn merge_overwrite(mut self) -> Self {
        if let TypeDef::Document(doc) = &mut self.kind {
            doc.merge_overwrite = true;
        }
        self
    }

    pub fn hooks(mut self, hooks: NodeHooks) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn map_hooks(mut self, f: impl FnOnce(NodeHooks) -> NodeHooks) -> Self {
        self.hooks = f(std::mem::take(&mut self.hooks));
        self
    }

    /// Checks the definition and, recursively, its children.
    pub fn validate(&self) -> Result<(), SchemaError> {
        let invalid = |message: String| SchemaError::Validation {
            path: self.name.clone(),
            rule: "definition".into(),
            message,
        };
        if self.name.trim().is_empty() {
            return Err(invalid("property name is required".into()));
        }
        if self.name.contains('.') || self.name.contains('#') || self.name.contains('[') {
            return Err(invalid(format!(
                "property name '{}' contains reserved characters",
                self.name
            )));
        }
        if self.unique && !self.indexed {
            return Err(invalid("Unique properties must also be indexed.".into()));
        }
        if self.min_items < 0 {
            return Err(invalid("minItems cannot be negative".into()));
        }
        if let Some(max) = self.max_items {
            if max >= 0 && self.min_items > max {
                return Err(invalid("minItems cannot exceed maxItems".into()));
            }
        }
        match &self.kind {
            TypeDef::Document(doc) => {
                if self.indexed {
                    return Err(invalid("documents cannot be indexed".into()));
                }
                validate_children(&self.name, &doc.properties)?;
                if let Some(key) = &doc.unique_key {
                    if !doc.properties.iter().any(|p| &p.name == key) {
                        return Err(invalid(format!("uniqueKey '{key}' is not a property")));
                    }
                }
            }
            TypeDef::Set(set) => {
                if self.indexed {
                    return Err(invalid("sets cannot be indexed".into()));
                }
                if !self.array {
                    return Err(invalid("sets must be arrays".into()));
                }
                let mut names = BTreeSet::new();
                for shape in &set.documents {
                    if !names.insert(shape.name.as_str()) {
                        return Err(invalid(format!("duplicate set document '{}'", shape.name)));
                    }
                    validate_children(&shape.name, &shape.properties)?;
                }
            }
            TypeDef::Geometry(_) => {
                if self.unique {
                    return Err(invalid("geometry properties cannot be unique".into()));
                }
            }
            TypeDef::File(_) => {
                if self.indexed {
                    return Err(invalid("files cannot be indexed".into()));
                }
            }
            TypeDef::Reference(_) => {
                if self.array {
                    return Err(invalid("references cannot be arrays".into()));
                }
            }
            _ => {}
        }
        Ok(())
    }
}

fn validate_children(parent: &str, properties: &[PropertyDef]) -> Result<(), SchemaError> {
    let mut names = BTreeSet::new();
    for property in properties {
        if !names.insert(property.name.as_str()) {
            return Err(SchemaError::Validation {
                path: parent.to_string(),
                rule: "definition".into(),
                message: format!("duplicate property '{}'", property.name),
            });
        }
        property.validate()?;
    }
    Ok(())
}

/// A named sub-type of an object with its own additional properties.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectTypeDef {
    #[serde(rename = "_id", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub properties: Vec<PropertyDef>,
}

/// Validates a full set of top-level properties.
pub fn validate_properties(properties: &[PropertyDef]) -> Result<(), SchemaError> {
    validate_children("", properties)
}
