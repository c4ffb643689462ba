use crate::access::AccessContext;
use crate::error::{DenyReason, ResourceType, SchemaError};
use crate::schema::access::{has_read_access, has_update_access, has_write_access};
use crate::schema::kind::{Castable, PropertyKind};
use crate::schema::lifecycle::on_removing_value;
use crate::schema::node::{DocCursor, NodeId};
use crate::schema::selection::{PathStep, path_steps};
use crate::schema::tree::SchemaTree;
use crate::schema::validate::validate_nodes;
use crate::schema::write::WriteOptions;
use crate::value::{as_integer, find_id_in_array, id_of, is_id, resolve_index};
use serde_json::{Map, Value};

fn element_index(items: &[Value], key: &str) -> Option<usize> {
    if is_id(key) {
        return find_id_in_array(items, key).map(|(idx, _)| idx);
    }
    as_integer(key).and_then(|index| resolve_index(index, items.len()))
}

fn missing_element(path: &str, key: &str) -> SchemaError {
    SchemaError::not_found(
        ResourceType::ArrayValue,
        format!("{path}.{key}"),
        "no such element",
    )
}

struct Located<'a> {
    doc: &'a mut Map<String, Value>,
    doc_node: NodeId,
    cursor: DocCursor,
}

/// Walks down to the document holding the last step of a path.
fn descend<'a>(
    tree: &SchemaTree,
    ac: &AccessContext,
    instance: &'a mut Value,
    steps: &[PathStep],
) -> Result<Located<'a>, SchemaError> {
    let cursor = DocCursor::root(id_of(instance).map(str::to_string), false);
    let doc = instance
        .as_object_mut()
        .ok_or_else(|| SchemaError::invalid(tree.object_name(), "instance is not an object"))?;
    let mut located = Located {
        doc,
        doc_node: tree.root(),
        cursor,
    };
    for step in steps {
        let id = tree.child_named(located.doc_node, &step.name).unwrap_or(step.node);
        let node = tree.node(id);
        let path = located.cursor.child_path(&step.name);
        if !node.readable || !has_read_access(tree, ac, id) {
            return Err(SchemaError::denied(path, DenyReason::PropertyRead));
        }
        let value = located
            .doc
            .get_mut(&step.name)
            .ok_or_else(|| SchemaError::not_found(ResourceType::Document, path.clone(), "not set"))?;
        match &step.key {
            Some(key) => {
                let items = value
                    .as_array_mut()
                    .ok_or_else(|| missing_element(&path, key))?;
                let idx = element_index(items, key).ok_or_else(|| missing_element(&path, key))?;
                let element = &mut items[idx];
                let element_id = id_of(element).unwrap_or(key).to_string();
                located.doc_node = if node.is_set() {
                    tree.shape_for(id, element).ok_or_else(|| {
                        SchemaError::not_found(ResourceType::Shape, path.clone(), "unknown document type")
                    })?
                } else {
                    id
                };
                located.cursor = located.cursor.element(&step.name, &element_id, false);
                located.doc = element
                    .as_object_mut()
                    .ok_or_else(|| missing_element(&path, key))?;
            }
            None if node.array => {
                return Err(SchemaError::invalid(path, "an element id is required"));
            }
            None => {
                located.doc_node = id;
                located.cursor = located.cursor.enter(&step.name, false);
                located.doc = value
                    .as_object_mut()
                    .ok_or_else(|| SchemaError::not_found(ResourceType::Document, path, "not a document"))?;
            }
        }
    }
    Ok(located)
}

/// Removes the property or array element at `path`. Returns false when
/// there was nothing to remove. In passive mode missing and denied paths
/// are skipped.
pub fn acl_remove(
    tree: &SchemaTree,
    ac: &mut AccessContext,
    instance: &mut Value,
    path: &str,
) -> Result<bool, SchemaError> {
    match remove_path(tree, ac, instance, path) {
        Err(err) if ac.passive && err.is_passive_tolerable() => Ok(false),
        other => other,
    }
}

fn remove_path(
    tree: &SchemaTree,
    ac: &mut AccessContext,
    instance: &mut Value,
    path: &str,
) -> Result<bool, SchemaError> {
    let steps = path_steps(tree, path)?;
    let Some((last, parents)) = steps.split_last() else {
        return Err(SchemaError::invalid(path, "nothing to remove"));
    };
    let Located { doc, doc_node, cursor } = descend(tree, ac, instance, parents)?;
    let id = tree.child_named(doc_node, &last.name).unwrap_or(last.node);
    let node = tree.node(id);
    let target = cursor.child_path(&last.name);
    if !node.readable {
        return Err(SchemaError::not_found(ResourceType::Property, target, "not readable"));
    }
    if !has_write_access(tree, ac, id, &WriteOptions::default()) {
        return Err(SchemaError::denied(target, DenyReason::PropertyDelete));
    }

    match &last.key {
        Some(key) => {
            if !node.can_pull {
                return Err(SchemaError::denied(target, DenyReason::NotPullable));
            }
            if node.is_document() && !has_update_access(tree, ac, id) {
                return Err(SchemaError::denied(target, DenyReason::DocumentRemoval));
            }
            let items = doc
                .get_mut(&last.name)
                .and_then(Value::as_array_mut)
                .ok_or_else(|| missing_element(&target, key))?;
            let idx = element_index(items, key).ok_or_else(|| missing_element(&target, key))?;
            let old = items.remove(idx);
            on_removing_value(tree, ac, id, &old, &cursor)?;
        }
        None => {
            if !node.removable {
                return Err(SchemaError::denied(target, DenyReason::NotDeletable));
            }
            match doc.remove(&last.name) {
                None | Some(Value::Null) => return Ok(false),
                Some(Value::Array(items)) if node.array => {
                    for item in &items {
                        on_removing_value(tree, ac, id, item, &cursor)?;
                    }
                }
                Some(old) => on_removing_value(tree, ac, id, &old, &cursor)?,
            }
        }
    }
    validate_nodes(tree, ac, &[id], doc, &cursor)?;
    Ok(true)
}

/// Pulls every element equal to `value` out of the primitive array at
/// `path`. Returns how many were removed.
pub fn acl_pull(
    tree: &SchemaTree,
    ac: &mut AccessContext,
    instance: &mut Value,
    path: &str,
    value: Value,
) -> Result<usize, SchemaError> {
    let steps = path_steps(tree, path)?;
    let Some((last, parents)) = steps.split_last() else {
        return Err(SchemaError::invalid(path, "nothing to pull from"));
    };
    let Located { doc, doc_node, cursor } = descend(tree, ac, instance, parents)?;
    let id = tree.child_named(doc_node, &last.name).unwrap_or(last.node);
    let node = tree.node(id);
    let target = cursor.child_path(&last.name);
    let PropertyKind::Primitive(primitive) = &node.kind else {
        return Err(SchemaError::invalid(target, "only primitive arrays pull by value"));
    };
    if !node.array {
        return Err(SchemaError::invalid(target, "not an array"));
    }
    if !node.can_pull {
        return Err(SchemaError::denied(target, DenyReason::NotPullable));
    }
    if !has_write_access(tree, ac, id, &WriteOptions::default()) {
        return Err(SchemaError::denied(target, DenyReason::PropertyDelete));
    }
    let value = primitive.cast(&target, value)?;
    let Some(items) = doc.get_mut(&last.name).and_then(Value::as_array_mut) else {
        return Ok(0);
    };
    let (pulled, kept): (Vec<Value>, Vec<Value>) =
        std::mem::take(items).into_iter().partition(|item| item == &value);
    *items = kept;
    for old in &pulled {
        on_removing_value(tree, ac, id, old, &cursor)?;
    }
    if !pulled.is_empty() {
        validate_nodes(tree, ac, &[id], doc, &cursor)?;
    }
    Ok(pulled.len())
}
