//! The definition schema.
//!
//! Object definitions are documents like any other: they are written
//! through a compiled tree whose `properties` node is a set with one shape
//! per property type. Toggling `indexed`/`unique`, or removing an indexed
//! property, registers the owning definition for a slot rebuild at commit.

use crate::access::{AccessContext, AclEntry};
use crate::config::SchemaConfig;
use crate::error::SchemaError;
use crate::index::registry::{property_documents, register_index_update};
use crate::index::slots::IndexSlot;
use crate::schema::definition::{ObjectTypeDef, PropertyDef, SetDef, TypeDef};
use crate::schema::hooks::HookCtx;
use crate::schema::tree::{CompileOptions, SchemaTree};
use crate::schema::SetShapeDef;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::collections::BTreeMap;

pub const DEFINITION_OBJECT: &str = "object";

pub const UNIQUE_REQUIRES_INDEXED: &str = "Unique properties must also be indexed.";
pub const UNIQUE_ON_CREATE_ONLY: &str = "Properties can only be made unique on creation.";

const PRIMITIVE_TYPES: [&str; 6] = ["String", "Number", "Boolean", "Date", "ObjectId", "Any"];

fn flag(doc: &Map<String, Value>, key: &str) -> bool {
    doc.get(key).and_then(Value::as_bool).unwrap_or(false)
}

fn register(ctx: &HookCtx<'_>, ac: &mut AccessContext, property_id: Option<&str>) {
    if let (Some(container), Some(property)) = (ctx.cursor.root_id.as_deref(), property_id) {
        register_index_update(ac, container, property);
    }
}

fn indexed_writer(
    ctx: &HookCtx<'_>,
    ac: &mut AccessContext,
    doc: &Map<String, Value>,
    value: Value,
) -> Result<Option<Value>, SchemaError> {
    if value.as_bool().unwrap_or(false) != flag(doc, &ctx.node.name) {
        register(ctx, ac, ctx.cursor.doc_id.as_deref());
    }
    Ok(Some(value))
}

fn unique_writer(
    ctx: &HookCtx<'_>,
    ac: &mut AccessContext,
    doc: &Map<String, Value>,
    value: Value,
) -> Result<Option<Value>, SchemaError> {
    let now = value.as_bool().unwrap_or(false);
    if now && !flag(doc, "unique") && !ctx.cursor.is_new {
        return Err(SchemaError::Validation {
            path: ctx.cursor.child_path(&ctx.node.name),
            rule: "unique".into(),
            message: UNIQUE_ON_CREATE_ONLY.into(),
        });
    }
    indexed_writer(ctx, ac, doc, value)
}

fn flag_removed(ctx: &HookCtx<'_>, ac: &mut AccessContext, old: &Value) -> Result<(), SchemaError> {
    if old.as_bool() == Some(true) {
        register(ctx, ac, ctx.cursor.doc_id.as_deref());
    }
    Ok(())
}

/// A removed property document, or a removed object type, may take
/// indexed properties with it.
fn properties_removed(ctx: &HookCtx<'_>, ac: &mut AccessContext, old: &Value) -> Result<(), SchemaError> {
    let wrapped = json!({"properties": [old]});
    let scan = if old.get("properties").is_some() && old.get("type").is_none() {
        old
    } else {
        &wrapped
    };
    let indexed: Vec<String> = property_documents(scan)
        .into_iter()
        .filter(|(_, prop)| flag(prop, "indexed"))
        .map(|(id, _)| id.to_string())
        .collect();
    for id in indexed {
        register(ctx, ac, Some(&id));
    }
    Ok(())
}

fn unique_needs_index(
    _ctx: &HookCtx<'_>,
    _ac: &AccessContext,
    doc: &Map<String, Value>,
    _value: Option<&Value>,
) -> Result<(), String> {
    if flag(doc, "unique") && !flag(doc, "indexed") {
        Err(UNIQUE_REQUIRES_INDEXED.into())
    } else {
        Ok(())
    }
}

fn access_spec(name: &str) -> PropertyDef {
    PropertyDef::any(name)
}

fn boolean(name: &str) -> PropertyDef {
    PropertyDef::boolean(name)
}

fn strings(name: &str) -> PropertyDef {
    PropertyDef::string(name).array()
}

fn acl_list(name: &str) -> PropertyDef {
    PropertyDef::any(name).array().map_hooks(|hooks| {
        hooks.writer(|ctx, _ac, _doc, value| {
            serde_json::from_value::<AclEntry>(value.clone()).map_err(|e| SchemaError::Validation {
                path: ctx.cursor.child_path(&ctx.node.name),
                rule: "acl".into(),
                message: e.to_string(),
            })?;
            Ok(Some(value))
        })
    })
}

/// Settings every property type carries.
fn common_properties(top_level: bool) -> Vec<PropertyDef> {
    let mut name = PropertyDef::string("name").validator("required", Value::Null).validator(
        "string",
        json!({"min": 1, "max": 40, "allowEmpty": false}),
    );
    if top_level {
        name = name.validator("customName", Value::Null);
    }
    vec![
        name,
        PropertyDef::string("label"),
        boolean("array").creatable(),
        boolean("readable"),
        boolean("writable"),
        boolean("creatable"),
        boolean("removable"),
        boolean("optional"),
        boolean("public"),
        access_spec("readAccess"),
        access_spec("writeAccess"),
        access_spec("updateAccess"),
        acl_list("acl"),
        boolean("aclOverride"),
        boolean("history"),
        boolean("auditable"),
        PropertyDef::document(
            "validators",
            vec![
                PropertyDef::string("name").validator("required", Value::Null),
                PropertyDef::any("definition"),
            ],
        )
        .array(),
        strings("dependencies"),
        strings("include"),
        PropertyDef::number("writePriority"),
        boolean("deferWrites"),
        boolean("uniqueValues"),
        PropertyDef::number("minItems").validator("number", json!({"min": 0, "allowDecimal": false})),
        PropertyDef::number("maxItems").validator("number", json!({"min": -1, "allowDecimal": false})),
        boolean("maxShift"),
        boolean("canPush"),
        boolean("canPull"),
        boolean("writeOnCreate"),
    ]
}

fn index_flags(allow_unique: bool) -> Vec<PropertyDef> {
    let indexed = boolean("indexed").map_hooks(|hooks| {
        hooks
            .writer(indexed_writer)
            .on_removing_value(flag_removed)
            .validator("indexed", unique_needs_index)
    });
    let mut flags = vec![indexed];
    if allow_unique {
        flags.push(boolean("unique").map_hooks(|hooks| {
            hooks
                .writer(unique_writer)
                .on_removing_value(flag_removed)
                .validator("unique", unique_needs_index)
        }));
    }
    flags
}

fn shape(type_name: &str, top_level: bool, extra: Vec<PropertyDef>) -> SetShapeDef {
    let mut properties = common_properties(top_level);
    properties.extend(extra);
    SetShapeDef::new(type_name, properties)
}

/// The property set at one nesting level. Containers only appear while
/// there is depth left for their children.
fn property_set(name: &str, depth: usize, config: &SchemaConfig, max_items: i64) -> PropertyDef {
    let top_level = depth == 1;
    let mut shapes: Vec<SetShapeDef> = PRIMITIVE_TYPES
        .iter()
        .map(|type_name| {
            let mut extra = index_flags(true);
            extra.push(PropertyDef::any("default"));
            shape(type_name, top_level, extra)
        })
        .collect();

    let mut reference = index_flags(true);
    reference.extend([
        PropertyDef::string("sourceObject").validator("required", Value::Null),
        boolean("expandable"),
        boolean("validateReference"),
        access_spec("referenceAccess"),
        access_spec("grant"),
        strings("roles"),
        boolean("cascadeDelete"),
        boolean("autoCreate"),
        boolean("inheritPropertyAccess"),
        PropertyDef::any("pacl").array(),
        acl_list("defaultAcl"),
    ]);
    shapes.push(shape("Reference", top_level, reference));

    let mut geometry = index_flags(false);
    geometry.push(
        PropertyDef::string("geoType").validator("stringEnum", json!({"values": ["Point", "MultiPoint"]})),
    );
    shapes.push(shape("Geometry", top_level, geometry));

    shapes.push(shape(
        "File",
        top_level,
        vec![
            PropertyDef::document(
                "facets",
                vec![
                    PropertyDef::string("name").validator("required", Value::Null),
                    boolean("private"),
                    strings("mimes"),
                ],
            )
            .array()
            .unique_key("name"),
            strings("processors"),
        ],
    ));

    if depth < config.max_definition_depth {
        let nested_max = config.default_max_items;
        shapes.push(shape(
            "Document",
            top_level,
            vec![
                property_set("properties", depth + 1, config, nested_max),
                PropertyDef::string("uniqueKey"),
                boolean("mergeOverwrite"),
                boolean("forceId"),
            ],
        ));
        shapes.push(shape(
            "Set",
            top_level,
            vec![
                PropertyDef::document(
                    "documents",
                    vec![
                        PropertyDef::string("name").validator("required", Value::Null),
                        PropertyDef::string("label"),
                        property_set("properties", depth + 1, config, nested_max),
                        PropertyDef::number("minRequired"),
                        PropertyDef::number("maxAllowed"),
                    ],
                )
                .array()
                .unique_key("name")
                .map_hooks(|hooks| hooks.on_removing_value(properties_removed)),
                PropertyDef::string("discriminatorKey"),
                PropertyDef::string("uniqueProp"),
                PropertyDef::string("uniqueKey"),
            ],
        ));
    }

    let mut set = PropertyDef::new(
        name,
        TypeDef::Set(SetDef {
            documents: shapes,
            discriminator_key: Some("type".into()),
            unique_prop: Some("name".into()),
            unique_key: Some("name".into()),
        }),
    )
    .items(0, Some(max_items))
    .map_hooks(|hooks| hooks.on_removing_value(properties_removed));
    set.array = true;
    set
}

/// Compiles the tree object definitions are written through.
pub fn definition_tree(config: &SchemaConfig) -> Result<SchemaTree, SchemaError> {
    let max_properties = config.max_properties as i64;
    let properties = vec![
        PropertyDef::string("name")
            .creatable()
            .validator("required", Value::Null)
            .validator("customName", Value::Null),
        PropertyDef::string("label"),
        PropertyDef::string("description").removable(),
        acl_list("defaultAcl"),
        property_set("properties", 1, config, max_properties),
        PropertyDef::document(
            "objectTypes",
            vec![
                PropertyDef::string("name")
                    .creatable()
                    .validator("required", Value::Null),
                PropertyDef::string("label"),
                property_set("properties", 1, config, config.max_type_properties as i64),
            ],
        )
        .array()
        .unique_key("name")
        .map_hooks(|hooks| hooks.on_removing_value(properties_removed)),
        PropertyDef::document(
            "slots",
            vec![PropertyDef::boolean("unique"), PropertyDef::string("name")],
        )
        .array()
        .writable(false)
        .items(0, Some(-1)),
    ];
    SchemaTree::compile(DEFINITION_OBJECT, properties, CompileOptions::internal())
}

/// The typed view of a stored definition document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectDefinition {
    #[serde(rename = "_id", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub default_acl: Vec<AclEntry>,
    #[serde(default)]
    pub properties: Vec<PropertyDef>,
    #[serde(default)]
    pub object_types: Vec<ObjectTypeDef>,
    #[serde(default)]
    pub slots: Vec<IndexSlot>,
}

impl ObjectDefinition {
    pub fn from_document(document: &Value) -> Result<Self, SchemaError> {
        serde_json::from_value(document.clone()).map_err(|e| SchemaError::Decode(e.to_string()))
    }
}

/// A definition together with its compiled trees: the object itself and
/// one per object type.
#[derive(Debug)]
pub struct CompiledObject {
    pub definition: ObjectDefinition,
    pub document: Value,
    tree: SchemaTree,
    typed: BTreeMap<String, SchemaTree>,
}

impl CompiledObject {
    pub fn compile(document: Value, config: &SchemaConfig) -> Result<Self, SchemaError> {
        let definition = ObjectDefinition::from_document(&document)?;
        let mut base = definition.properties.clone();
        if !definition.object_types.is_empty() && !base.iter().any(|p| p.name == "type") {
            let names: Vec<&str> = definition.object_types.iter().map(|t| t.name.as_str()).collect();
            base.push(
                PropertyDef::string("type")
                    .creatable()
                    .validator("stringEnum", json!({"values": names})),
            );
        }
        let options = CompileOptions::from_config(config).with_slots(definition.slots.clone());
        let tree = SchemaTree::compile(definition.name.clone(), base.clone(), options.clone())?;
        let mut typed = BTreeMap::new();
        for object_type in &definition.object_types {
            let typed_tree = SchemaTree::compile_typed(
                definition.name.clone(),
                base.clone(),
                object_type,
                options.clone(),
                config.max_type_properties,
            )?;
            typed.insert(object_type.name.clone(), typed_tree);
        }
        Ok(Self {
            definition,
            document,
            tree,
            typed,
        })
    }

    pub fn name(&self) -> &str {
        &self.definition.name
    }

    pub fn tree(&self) -> &SchemaTree {
        &self.tree
    }

    /// The tree an instance is written and read through, picked by its
    /// `type`.
    pub fn tree_for(&self, instance: &Value) -> Result<&SchemaTree, SchemaError> {
        self.tree_for_type(instance.get("type").and_then(Value::as_str))
    }

    pub fn tree_for_type(&self, type_name: Option<&str>) -> Result<&SchemaTree, SchemaError> {
        match type_name {
            None => Ok(&self.tree),
            Some(name) => self.typed.get(name).ok_or_else(|| {
                SchemaError::invalid("type", format!("'{name}' is not a type of {}", self.name()))
            }),
        }
    }

    pub fn trees(&self) -> impl Iterator<Item = &SchemaTree> {
        std::iter::once(&self.tree).chain(self.typed.values())
    }
}
