//! Access-checked writes of payload values into stored documents.
//!
//! Leaves are cast, normalized for their kind and passed through the
//! node's writer before being stored. Documents are written child by child
//! in their sorted order. Arrays either replace their content or patch it,
//! depending on the method and the write options.

use crate::access::{AccessContext, Method};
use crate::effects::{Effect, Phase};
use crate::error::{DenyReason, ResourceType, SchemaError};
use crate::schema::access::{has_update_access, has_write_access};
use crate::schema::hooks::HookCtx;
use crate::schema::kind::{Castable, PropertyKind};
use crate::schema::lifecycle::{on_removing_value, on_value_added};
use crate::schema::node::{DocCursor, Node, NodeId};
use crate::schema::ordered::ordered_write;
use crate::schema::tree::SchemaTree;
use crate::schema::types::file::{normalize_file, processor_job};
use crate::schema::types::geometry::normalize_geometry;
use crate::schema::types::reference::{normalize_reference, validate_reference};
use crate::value::{find_id_in_array, id_of, is_id, new_id};
use serde_json::{Map, Value};
use std::collections::HashSet;

/// How a payload is merged into what is already stored.
#[derive(Debug, Clone, Default)]
pub struct WriteOptions {
    /// Patch documents and arrays instead of replacing them.
    pub merge_documents: bool,
    /// Elements matched by unique key have their content replaced.
    pub overwrite: bool,
    /// Only existing elements are targeted; arrays are never reset.
    pub updating: bool,
    pub is_import: bool,
    /// Imports skip access checks entirely.
    pub import_access: bool,
    pub passive: bool,
}

impl WriteOptions {
    pub fn merge() -> Self {
        Self {
            merge_documents: true,
            ..Self::default()
        }
    }

    /// Imports replace arrays so that element ids carried by the payload
    /// are kept.
    pub fn import(import_access: bool) -> Self {
        Self {
            is_import: true,
            import_access,
            ..Self::default()
        }
    }

    pub fn with_overwrite(mut self) -> Self {
        self.overwrite = true;
        self
    }

    pub fn with_updating(mut self) -> Self {
        self.updating = true;
        self
    }

    pub fn with_passive(mut self) -> Self {
        self.passive = true;
        self
    }
}

/// Writes a payload into a whole instance, creating the root object when
/// the instance is empty.
pub fn write_instance(
    tree: &SchemaTree,
    ac: &mut AccessContext,
    instance: &mut Value,
    payload: Value,
    options: &WriteOptions,
    is_new: bool,
) -> Result<(), SchemaError> {
    let Value::Object(input) = payload else {
        return Err(SchemaError::invalid(tree.object_name(), "payload must be an object"));
    };
    if !instance.is_object() {
        *instance = Value::Object(Map::new());
    }
    let cursor = DocCursor::root(id_of(instance).map(str::to_string), is_new);
    let Value::Object(doc) = instance else {
        return Err(SchemaError::invalid(tree.object_name(), "instance is not an object"));
    };
    ordered_write(tree, ac, tree.root(), doc, input, options, &cursor)
}

/// Writes one property of `parent`. In passive mode missing and denied
/// properties are skipped.
pub fn acl_write(
    tree: &SchemaTree,
    ac: &mut AccessContext,
    id: NodeId,
    parent: &mut Map<String, Value>,
    value: Value,
    options: &WriteOptions,
    cursor: &DocCursor,
) -> Result<(), SchemaError> {
    let passive = ac.passive || options.passive;
    match write_node(tree, ac, id, parent, value, options, cursor) {
        Err(err) if passive && err.is_passive_tolerable() => Ok(()),
        other => other,
    }
}

fn write_node(
    tree: &SchemaTree,
    ac: &mut AccessContext,
    id: NodeId,
    parent: &mut Map<String, Value>,
    value: Value,
    options: &WriteOptions,
    cursor: &DocCursor,
) -> Result<(), SchemaError> {
    let node = tree.node(id);
    let path = cursor.child_path(&node.name);
    if !node.readable {
        return Err(SchemaError::not_found(ResourceType::Property, path, "not readable"));
    }
    if (node.is_virtual && node.hooks.writer.is_none())
        || !node.is_writable(cursor.is_new)
        || (cursor.is_new && !node.write_on_create)
    {
        return Err(SchemaError::denied(path, DenyReason::NotWritable));
    }
    if !has_write_access(tree, ac, id, options) {
        return Err(SchemaError::denied(path, DenyReason::PropertyUpdate));
    }

    if value.is_null() {
        return unset_value(tree, ac, id, parent, cursor);
    }
    if node.array {
        return write_array(tree, ac, id, parent, value, options, cursor);
    }
    match node.kind {
        PropertyKind::Document | PropertyKind::Set(_) => {
            write_document(tree, ac, id, parent, value, options, cursor)
        }
        _ => {
            let Some(value) = prepare_value(tree, ac, id, parent, value, cursor, false)? else {
                return Ok(());
            };
            set_value(tree, ac, id, parent, value, cursor)
        }
    }
}

/// Casts and normalizes one value for the node's kind, then hands it to
/// the node's pusher (for array elements) or writer. `None` stores nothing.
fn prepare_value(
    tree: &SchemaTree,
    ac: &mut AccessContext,
    id: NodeId,
    parent: &Map<String, Value>,
    value: Value,
    cursor: &DocCursor,
    element: bool,
) -> Result<Option<Value>, SchemaError> {
    let node = tree.node(id);
    let path = cursor.child_path(&node.name);
    let value = match &node.kind {
        PropertyKind::Primitive(primitive) => primitive.cast(&path, value)?,
        PropertyKind::Reference(def) => {
            let value = normalize_reference(def, value, &path)?;
            if let Some(ref_id) = id_of(&value) {
                validate_reference(ac, def, ref_id, &path)?;
            }
            value
        }
        PropertyKind::Geometry(geo) => normalize_geometry(*geo, value, &path)?,
        PropertyKind::File(def) => {
            let value = normalize_file(def, value, &path)?;
            let job = processor_job(def, tree.object_name(), cursor.root_id.as_deref(), &path, &value);
            ac.effects.schedule(Phase::After, None, Effect::DispatchJob(job));
            value
        }
        PropertyKind::Document | PropertyKind::Set(_) => {
            return Err(SchemaError::invalid(path, "documents are written property by property"));
        }
    };
    if value.is_null() {
        return Ok(None);
    }
    let hook = if element {
        node.hooks.pusher.as_ref().or(node.hooks.writer.as_ref())
    } else {
        node.hooks.writer.as_ref()
    };
    match hook {
        Some(hook) => hook(&HookCtx { tree, node, cursor }, ac, parent, value),
        None => Ok(Some(value)),
    }
}

/// Stores a value without any access checks, firing the lifecycle for the
/// replaced and the new value. Storing an equal value is a no-op.
pub(crate) fn set_value(
    tree: &SchemaTree,
    ac: &mut AccessContext,
    id: NodeId,
    parent: &mut Map<String, Value>,
    value: Value,
    cursor: &DocCursor,
) -> Result<(), SchemaError> {
    let node = tree.node(id);
    if parent.get(&node.name) == Some(&value) {
        return Ok(());
    }
    if let Some(old) = parent.insert(node.name.clone(), value.clone()) {
        if !old.is_null() {
            on_removing_value(tree, ac, id, &old, cursor)?;
        }
    }
    on_value_added(tree, ac, id, &value, cursor)
}

fn unset_value(
    tree: &SchemaTree,
    ac: &mut AccessContext,
    id: NodeId,
    parent: &mut Map<String, Value>,
    cursor: &DocCursor,
) -> Result<(), SchemaError> {
    let node = tree.node(id);
    if parent.get(&node.name).is_none_or(Value::is_null) {
        parent.remove(&node.name);
        return Ok(());
    }
    if !cursor.is_new && !node.removable && !node.optional {
        return Err(SchemaError::denied(
            cursor.child_path(&node.name),
            DenyReason::NotDeletable,
        ));
    }
    match parent.remove(&node.name) {
        Some(Value::Array(items)) => {
            for item in &items {
                on_removing_value(tree, ac, id, item, cursor)?;
            }
        }
        Some(old) => on_removing_value(tree, ac, id, &old, cursor)?,
        None => {}
    }
    Ok(())
}

fn write_document(
    tree: &SchemaTree,
    ac: &mut AccessContext,
    id: NodeId,
    parent: &mut Map<String, Value>,
    value: Value,
    options: &WriteOptions,
    cursor: &DocCursor,
) -> Result<(), SchemaError> {
    let node = tree.node(id);
    let Value::Object(input) = value else {
        return Err(SchemaError::invalid(
            cursor.child_path(&node.name),
            "expected an object",
        ));
    };
    let exists = parent.get(&node.name).is_some_and(Value::is_object);
    let replace =
        exists && !options.merge_documents && !node.merge_overwrite && ac.method == Method::Put;

    let mut doc = match parent.remove(&node.name) {
        Some(Value::Object(map)) if !replace => map,
        Some(old) if !old.is_null() => {
            on_removing_value(tree, ac, id, &old, cursor)?;
            Map::new()
        }
        _ => Map::new(),
    };
    let sub = cursor.enter(&node.name, !exists || replace);
    let result = ordered_write(tree, ac, id, &mut doc, input, options, &sub);
    parent.insert(node.name.clone(), Value::Object(doc));
    if result.is_ok() && !exists {
        ac.mark_modified(cursor.child_path(&node.name));
    }
    result
}

fn write_array(
    tree: &SchemaTree,
    ac: &mut AccessContext,
    id: NodeId,
    parent: &mut Map<String, Value>,
    value: Value,
    options: &WriteOptions,
    cursor: &DocCursor,
) -> Result<(), SchemaError> {
    let node = tree.node(id);
    let payload = match value {
        Value::Array(items) => items,
        other => vec![other],
    };
    let write = ArrayWrite {
        tree,
        id,
        node,
        path: cursor.child_path(&node.name),
        cursor,
        options,
        reset: !options.updating && (ac.method == Method::Put || !options.merge_documents),
    };
    let mut items = match parent.remove(&node.name) {
        Some(Value::Array(items)) => items,
        Some(Value::Null) | None => Vec::new(),
        Some(other) => vec![other],
    };
    let result = if node.is_document() {
        write.documents(ac, &mut items, payload)
    } else {
        write.primitives(ac, parent, &mut items, payload)
    };
    parent.insert(node.name.clone(), Value::Array(items));
    result
}

struct ArrayWrite<'a> {
    tree: &'a SchemaTree,
    id: NodeId,
    node: &'a Node,
    path: String,
    cursor: &'a DocCursor,
    options: &'a WriteOptions,
    /// Replace the current content rather than patching it.
    reset: bool,
}

impl ArrayWrite<'_> {
    fn clear(&self, ac: &mut AccessContext, items: &mut Vec<Value>) -> Result<(), SchemaError> {
        if items.is_empty() {
            return Ok(());
        }
        if !self.node.can_pull && !self.cursor.is_new {
            return Err(SchemaError::denied(self.path.clone(), DenyReason::NotPullable));
        }
        for old in std::mem::take(items) {
            on_removing_value(self.tree, ac, self.id, &old, self.cursor)?;
        }
        Ok(())
    }

    fn check_push(&self) -> Result<(), SchemaError> {
        if !self.node.can_push && !self.cursor.is_new {
            return Err(SchemaError::denied(self.path.clone(), DenyReason::NotWritable));
        }
        Ok(())
    }

    /// Shifts the oldest elements out while the array is over its bound.
    fn shift(&self, ac: &mut AccessContext, items: &mut Vec<Value>) -> Result<(), SchemaError> {
        let max = self.node.max_items;
        if max < 0 || !self.node.max_shift {
            return Ok(());
        }
        while items.len() as i64 > max {
            let old = items.remove(0);
            on_removing_value(self.tree, ac, self.id, &old, self.cursor)?;
        }
        Ok(())
    }

    fn primitives(
        &self,
        ac: &mut AccessContext,
        parent: &Map<String, Value>,
        items: &mut Vec<Value>,
        payload: Vec<Value>,
    ) -> Result<(), SchemaError> {
        let mut values = Vec::with_capacity(payload.len());
        for value in payload {
            if let Some(value) = prepare_value(self.tree, ac, self.id, parent, value, self.cursor, true)? {
                values.push(value);
            }
        }
        if self.reset {
            self.clear(ac, items)?;
        } else if !values.is_empty() {
            self.check_push()?;
        }
        for value in values {
            if self.node.unique_values && items.contains(&value) {
                continue;
            }
            on_value_added(self.tree, ac, self.id, &value, self.cursor)?;
            items.push(value);
        }
        self.shift(ac, items)
    }

    fn documents(
        &self,
        ac: &mut AccessContext,
        items: &mut Vec<Value>,
        payload: Vec<Value>,
    ) -> Result<(), SchemaError> {
        let unique_key = self.node.unique_key.as_deref();
        let mut updates: Vec<(usize, Map<String, Value>)> = Vec::new();
        let mut adds: Vec<Map<String, Value>> = Vec::new();

        for entry in payload {
            let Value::Object(entry) = entry else {
                return Err(SchemaError::invalid(self.path.clone(), "array elements must be objects"));
            };
            if let Some(raw) = entry.get("_id") {
                let Some(element_id) = raw.as_str().filter(|s| is_id(s)) else {
                    return Err(SchemaError::invalid(self.path.clone(), format!("invalid _id {raw}")));
                };
                if let Some((idx, _)) = find_id_in_array(items, element_id) {
                    updates.push((idx, entry));
                    continue;
                }
                if self.options.merge_documents || self.options.updating {
                    return Err(SchemaError::not_found(
                        ResourceType::ArrayValue,
                        format!("{}.{element_id}", self.path),
                        "no element with this _id",
                    ));
                }
                adds.push(entry);
                continue;
            }
            let key_value = unique_key.and_then(|key| entry.get(key).filter(|v| !v.is_null()).cloned());
            if let (Some(key), Some(key_value)) = (unique_key, key_value) {
                if !self.reset {
                    if let Some(idx) = items.iter().position(|e| e.get(key) == Some(&key_value)) {
                        updates.push((idx, entry));
                        continue;
                    }
                }
                if let Some(pending) = adds.iter_mut().find(|a| a.get(key) == Some(&key_value)) {
                    pending.extend(entry);
                    continue;
                }
            }
            adds.push(entry);
        }

        if !self.options.merge_documents && !updates.is_empty() && !adds.is_empty() {
            return Err(SchemaError::invalid(
                self.path.clone(),
                "cannot add and update elements in the same write",
            ));
        }
        if !updates.is_empty() && !self.cursor.is_new && !has_update_access(self.tree, ac, self.id) {
            return Err(SchemaError::denied(self.path.clone(), DenyReason::PropertyUpdate));
        }
        if self.reset && updates.is_empty() {
            self.clear(ac, items)?;
        } else if !adds.is_empty() {
            self.check_push()?;
        }

        for (idx, entry) in updates {
            let mut element = match std::mem::take(&mut items[idx]) {
                Value::Object(map) => map,
                _ => Map::new(),
            };
            let result = self.update_element(ac, &mut element, entry);
            items[idx] = Value::Object(element);
            result?;
        }
        for entry in adds {
            let element = self.add_element(ac, entry)?;
            on_value_added(self.tree, ac, self.id, &element, self.cursor)?;
            items.push(element);
        }

        self.check_unique(items)?;
        self.shift(ac, items)
    }

    fn discriminator(&self) -> Option<&str> {
        match &self.node.kind {
            PropertyKind::Set(spec) => Some(spec.discriminator_key.as_str()),
            _ => None,
        }
    }

    /// The document node describing elements with this discriminator value.
    fn element_node(&self, shape: Option<&Value>) -> Result<NodeId, SchemaError> {
        let Some(key) = self.discriminator() else {
            return Ok(self.id);
        };
        let name = shape.and_then(Value::as_str).ok_or_else(|| {
            SchemaError::invalid(self.path.clone(), format!("set elements require '{key}'"))
        })?;
        self.tree.shape_named(self.id, name).ok_or_else(|| {
            SchemaError::not_found(
                ResourceType::Shape,
                self.path.clone(),
                format!("'{name}' is not a document type of this set"),
            )
        })
    }

    fn update_element(
        &self,
        ac: &mut AccessContext,
        element: &mut Map<String, Value>,
        mut entry: Map<String, Value>,
    ) -> Result<(), SchemaError> {
        entry.remove("_id");
        let element_id = element
            .get("_id")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        if let Some(key) = self.discriminator() {
            if let Some(requested) = entry.remove(key) {
                if element.get(key) != Some(&requested) {
                    return Err(SchemaError::invalid(
                        format!("{}.{element_id}", self.path),
                        "the document type of a set element cannot change",
                    ));
                }
            }
        }
        let doc_node = self.element_node(self.discriminator().and_then(|key| element.get(key)))?;
        let cursor = self.cursor.element(&self.node.name, &element_id, false);

        if self.options.overwrite {
            let keep = |name: &str| {
                name == "_id" || Some(name) == self.discriminator() || entry.contains_key(name)
            };
            for &child in &self.tree.node(doc_node).children {
                let name = &self.tree.node(child).name;
                if keep(name) {
                    continue;
                }
                if let Some(old) = element.remove(name) {
                    on_removing_value(self.tree, ac, child, &old, &cursor)?;
                }
            }
        }
        ordered_write(self.tree, ac, doc_node, element, entry, self.options, &cursor)
    }

    fn add_element(
        &self,
        ac: &mut AccessContext,
        mut entry: Map<String, Value>,
    ) -> Result<Value, SchemaError> {
        let element_id = match entry.remove("_id") {
            Some(Value::String(s)) => s,
            _ => new_id(),
        };
        let doc_node = self.element_node(self.discriminator().and_then(|key| entry.get(key)))?;
        let mut element = Map::new();
        element.insert("_id".into(), Value::String(element_id.clone()));
        let cursor = self.cursor.element(&self.node.name, &element_id, true);
        ordered_write(self.tree, ac, doc_node, &mut element, entry, self.options, &cursor)?;
        Ok(Value::Object(element))
    }

    /// Elements may not share a value of the set's unique property or the
    /// array's unique key.
    fn check_unique(&self, items: &[Value]) -> Result<(), SchemaError> {
        let prop = match &self.node.kind {
            PropertyKind::Set(spec) => spec.unique_prop.as_deref().or(self.node.unique_key.as_deref()),
            _ => self.node.unique_key.as_deref(),
        };
        let Some(prop) = prop else {
            return Ok(());
        };
        let mut seen = HashSet::new();
        for item in items {
            if let Some(value) = item.get(prop).filter(|v| !v.is_null()) {
                if !seen.insert(value.to_string()) {
                    return Err(SchemaError::conflict(
                        self.path.clone(),
                        format!("duplicate {prop} {value}"),
                    ));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::{AccessLevel, Principal};
    use crate::schema::definition::{PropertyDef, SetShapeDef};
    use crate::schema::tree::CompileOptions;
    use serde_json::json;

    fn tree() -> SchemaTree {
        SchemaTree::compile(
            "c_doc",
            vec![
                PropertyDef::string("c_name"),
                PropertyDef::number("c_count").default_value(json!(1)),
                PropertyDef::string("c_fixed").creatable(),
                PropertyDef::string("c_tags").array().unique_values(),
                PropertyDef::document(
                    "c_items",
                    vec![PropertyDef::string("name"), PropertyDef::string("value")],
                )
                .array()
                .unique_key("name"),
                PropertyDef::string("c_recent").array().items(0, Some(2)).max_shift(),
                PropertyDef::set(
                    "c_shapes",
                    vec![
                        SetShapeDef::new("c_circle", vec![PropertyDef::number("r")]),
                        SetShapeDef::new("c_square", vec![PropertyDef::number("s")]),
                    ],
                ),
            ],
            CompileOptions::internal(),
        )
        .unwrap()
    }

    fn writer(level: AccessLevel) -> AccessContext {
        AccessContext::new(Principal::new("u1", "org"), "c_doc").with_resolved(level)
    }

    fn create(tree: &SchemaTree, payload: Value) -> (AccessContext, Value) {
        let mut ac = writer(AccessLevel::Delete).with_method(Method::Post);
        let mut instance = json!({"_id": new_id()});
        write_instance(tree, &mut ac, &mut instance, payload, &WriteOptions::default(), true).unwrap();
        (ac, instance)
    }

    #[test]
    fn creation_applies_defaults_and_casts() {
        let tree = tree();
        let (ac, instance) = create(&tree, json!({"c_name": 5, "c_fixed": "f"}));
        assert_eq!(instance["c_name"], json!("5"));
        assert_eq!(instance["c_count"], json!(1));
        assert_eq!(instance["c_fixed"], json!("f"));
        assert!(ac.is_modified());
    }

    #[test]
    fn creatable_properties_are_fixed_after_creation() {
        let tree = tree();
        let (_, mut instance) = create(&tree, json!({"c_fixed": "f"}));
        let mut ac = writer(AccessLevel::Delete);
        let err = write_instance(
            &tree,
            &mut ac,
            &mut instance,
            json!({"c_fixed": "g"}),
            &WriteOptions::merge(),
            false,
        )
        .unwrap_err();
        assert_eq!(err.code_str(), "access_denied");
    }

    #[test]
    fn insufficient_access_is_denied_unless_passive() {
        let tree = tree();
        let (_, mut instance) = create(&tree, json!({"c_name": "a"}));
        let mut ac = writer(AccessLevel::Read);
        let err = write_instance(
            &tree,
            &mut ac,
            &mut instance,
            json!({"c_name": "b"}),
            &WriteOptions::merge(),
            false,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            SchemaError::AccessDenied { reason: DenyReason::PropertyUpdate, .. }
        ));
        write_instance(
            &tree,
            &mut ac,
            &mut instance,
            json!({"c_name": "b"}),
            &WriteOptions::merge().with_passive(),
            false,
        )
        .unwrap();
        assert_eq!(instance["c_name"], json!("a"));
    }

    #[test]
    fn unknown_properties_raise() {
        let tree = tree();
        let mut ac = writer(AccessLevel::Delete);
        let mut instance = json!({});
        let err = write_instance(
            &tree,
            &mut ac,
            &mut instance,
            json!({"c_nope": 1}),
            &WriteOptions::default(),
            true,
        )
        .unwrap_err();
        assert_eq!(err.code_str(), "property_not_found");
    }

    #[test]
    fn primitive_arrays_reset_or_push() {
        let tree = tree();
        let (_, mut instance) = create(&tree, json!({"c_tags": ["a", "b"]}));
        let mut ac = writer(AccessLevel::Delete);
        write_instance(&tree, &mut ac, &mut instance, json!({"c_tags": ["b", "c"]}), &WriteOptions::merge(), false)
            .unwrap();
        assert_eq!(instance["c_tags"], json!(["a", "b", "c"]));
        let mut ac = writer(AccessLevel::Delete).with_method(Method::Put);
        write_instance(&tree, &mut ac, &mut instance, json!({"c_tags": ["z"]}), &WriteOptions::default(), false)
            .unwrap();
        assert_eq!(instance["c_tags"], json!(["z"]));
    }

    #[test]
    fn bounded_arrays_shift_out_the_oldest() {
        let tree = tree();
        let (_, mut instance) = create(&tree, json!({"c_recent": ["a", "b"]}));
        let mut ac = writer(AccessLevel::Delete);
        write_instance(&tree, &mut ac, &mut instance, json!({"c_recent": "c"}), &WriteOptions::merge(), false)
            .unwrap();
        assert_eq!(instance["c_recent"], json!(["b", "c"]));
    }

    #[test]
    fn unique_key_matches_update_in_place() {
        let tree = tree();
        let (_, mut instance) = create(&tree, json!({"c_items": [{"name": "a", "value": "1"}]}));
        let first_id = instance["c_items"][0]["_id"].clone();
        let mut ac = writer(AccessLevel::Delete);
        write_instance(
            &tree,
            &mut ac,
            &mut instance,
            json!({"c_items": [{"name": "a", "value": "2"}, {"name": "a", "value": "3"}]}),
            &WriteOptions::merge().with_overwrite(),
            false,
        )
        .unwrap();
        let items = instance["c_items"].as_array().unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0]["_id"], first_id);
        assert_eq!(items[0]["value"], json!("3"));
    }

    #[test]
    fn mixing_adds_and_updates_without_merge_is_rejected() {
        let tree = tree();
        let (_, mut instance) = create(&tree, json!({"c_items": [{"name": "a"}]}));
        let id = instance["c_items"][0]["_id"].clone();
        let mut ac = writer(AccessLevel::Delete);
        let err = write_instance(
            &tree,
            &mut ac,
            &mut instance,
            json!({"c_items": [{"_id": id, "value": "x"}, {"name": "b"}]}),
            &WriteOptions::default(),
            false,
        )
        .unwrap_err();
        assert_eq!(err.code_str(), "invalid_argument");
    }

    #[test]
    fn missing_element_ids_are_not_found_when_merging() {
        let tree = tree();
        let (_, mut instance) = create(&tree, json!({"c_items": [{"name": "a"}]}));
        let mut ac = writer(AccessLevel::Delete);
        let err = write_instance(
            &tree,
            &mut ac,
            &mut instance,
            json!({"c_items": [{"_id": new_id(), "value": "x"}]}),
            &WriteOptions::merge(),
            false,
        )
        .unwrap_err();
        assert_eq!(err.code_str(), "array_value_not_found");
    }

    #[test]
    fn set_elements_pick_their_shape() {
        let tree = tree();
        let (_, mut instance) = create(
            &tree,
            json!({"c_shapes": [{"name": "c_circle", "r": 2}, {"name": "c_square", "s": 3}]}),
        );
        assert_eq!(instance["c_shapes"][1]["s"], json!(3));
        let circle = instance["c_shapes"][0]["_id"].clone();

        let mut ac = writer(AccessLevel::Delete);
        let err = write_instance(
            &tree,
            &mut ac,
            &mut instance,
            json!({"c_shapes": [{"_id": circle, "name": "c_square"}]}),
            &WriteOptions::merge(),
            false,
        )
        .unwrap_err();
        assert_eq!(err.code_str(), "invalid_argument");

        let err = write_instance(
            &tree,
            &mut ac,
            &mut instance,
            json!({"c_shapes": [{"name": "c_hexagon"}]}),
            &WriteOptions::merge(),
            false,
        )
        .unwrap_err();
        assert_eq!(err.code_str(), "shape_not_found");
    }

    #[test]
    fn null_unsets_removable_properties_only() {
        let tree = SchemaTree::compile(
            "c_doc",
            vec![PropertyDef::string("c_keep"), PropertyDef::string("c_drop").removable()],
            CompileOptions::internal(),
        )
        .unwrap();
        let mut instance = json!({"c_keep": "k", "c_drop": "d"});
        let mut ac = writer(AccessLevel::Delete);
        write_instance(&tree, &mut ac, &mut instance, json!({"c_drop": null}), &WriteOptions::merge(), false)
            .unwrap();
        assert!(instance.get("c_drop").is_none());
        let err = write_instance(&tree, &mut ac, &mut instance, json!({"c_keep": null}), &WriteOptions::merge(), false)
            .unwrap_err();
        assert_eq!(err.code_str(), "access_denied");
    }
}
