//! Write ordering for the children of a document.
//!
//! Children are written in four groups: keys first, then native properties
//! by descending priority, then custom properties with their sibling
//! dependencies ahead of them, then deferred properties by descending
//! priority.

use crate::access::AccessContext;
use crate::error::{ResourceType, SchemaError};
use crate::schema::hooks::HookCtx;
use crate::schema::kind::{Castable, PropertyKind};
use crate::schema::node::{DocCursor, NodeId};
use crate::schema::tree::SchemaTree;
use crate::schema::validate::validate_nodes;
use crate::schema::write::{WriteOptions, acl_write, set_value};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use tracing::warn;

/// Sorts the children of a document into write order. Fails on a cycle
/// between sibling custom properties.
pub fn sort_children(tree: &SchemaTree, id: NodeId) -> Result<Vec<NodeId>, SchemaError> {
    let parent = tree.node(id);
    let mut keys = Vec::new();
    let mut native = Vec::new();
    let mut custom = Vec::new();
    let mut deferred = Vec::new();

    for &child_id in &parent.children {
        let child = tree.node(child_id);
        let is_key = child.name == "_id"
            || (parent.unique_key.as_deref() == Some(child.name.as_str())
                && sibling_dependencies(tree, child_id).is_empty());
        if child.defer_writes {
            deferred.push(child_id);
        } else if is_key {
            keys.push(child_id);
        } else if child.is_custom() {
            custom.push(child_id);
        } else {
            native.push(child_id);
        }
    }
    native.sort_by_key(|&c| std::cmp::Reverse(tree.node(c).write_priority));
    deferred.sort_by_key(|&c| std::cmp::Reverse(tree.node(c).write_priority));

    let mut out = keys;
    out.extend(native);
    out.extend(sort_custom(tree, id, &custom)?);
    out.extend(deferred);
    Ok(out)
}

/// Names of siblings this node depends on.
fn sibling_dependencies(tree: &SchemaTree, id: NodeId) -> BTreeSet<String> {
    let node = tree.node(id);
    let prefix_len = node.fullpath.len().saturating_sub(node.path.len());
    let prefix = &node.fullpath[..prefix_len];
    node.dependencies
        .keys()
        .filter_map(|dep| dep.strip_prefix(prefix))
        .filter_map(|local| local.split('.').next())
        .filter(|name| !name.is_empty() && *name != node.name)
        .map(str::to_string)
        .collect()
}

fn sort_custom(tree: &SchemaTree, parent: NodeId, custom: &[NodeId]) -> Result<Vec<NodeId>, SchemaError> {
    let by_name: BTreeMap<&str, NodeId> = custom
        .iter()
        .map(|&c| (tree.node(c).name.as_str(), c))
        .collect();
    let mut edges: BTreeMap<NodeId, Vec<NodeId>> = BTreeMap::new();
    let mut in_graph = BTreeSet::new();
    for &child in custom {
        for dep in sibling_dependencies(tree, child) {
            if let Some(&target) = by_name.get(dep.as_str()) {
                edges.entry(child).or_default().push(target);
                in_graph.insert(child);
                in_graph.insert(target);
            }
        }
    }

    let mut out = Vec::with_capacity(custom.len());
    let mut emitted = BTreeSet::new();
    let mut remaining: Vec<NodeId> = custom.iter().copied().filter(|c| in_graph.contains(c)).collect();
    while !remaining.is_empty() {
        let ready = remaining.iter().position(|c| {
            edges
                .get(c)
                .is_none_or(|deps| deps.iter().all(|d| emitted.contains(d)))
        });
        let Some(pos) = ready else {
            let names: Vec<&str> = remaining.iter().map(|&c| tree.node(c).name.as_str()).collect();
            warn!(document = %tree.node(parent).fullpath, cycle = ?names, "circular property dependency");
            return Err(SchemaError::invalid(
                tree.node(parent).fullpath.clone(),
                format!("circular dependency between {}", names.join(", ")),
            ));
        };
        let next = remaining.remove(pos);
        emitted.insert(next);
        out.push(next);
    }
    out.extend(custom.iter().copied().filter(|c| !in_graph.contains(c)));
    Ok(out)
}

/// Writes a payload into one document: unknown keys are rejected, defaults
/// fill in what a new document lacks, children are written in sorted order
/// and the touched children are validated at the end.
pub fn ordered_write(
    tree: &SchemaTree,
    ac: &mut AccessContext,
    doc_node: NodeId,
    doc: &mut Map<String, Value>,
    mut input: Map<String, Value>,
    options: &WriteOptions,
    cursor: &DocCursor,
) -> Result<(), SchemaError> {
    let node = tree.node(doc_node);
    let passive = ac.passive || options.passive;

    let mut unknown = Vec::new();
    input.retain(|key, _| match tree.child_named(doc_node, key) {
        Some(child) => !tree.node(child).auto,
        None => {
            unknown.push(key.clone());
            false
        }
    });
    if let Some(key) = unknown.first() {
        if !passive {
            return Err(SchemaError::not_found(
                ResourceType::Property,
                cursor.child_path(key),
                format!("'{key}' is not a property"),
            ));
        }
    }

    let defaults_key = cursor.defaults_key();
    let run_defaults = cursor.is_new && ac.defaults_pending(&defaults_key);
    if run_defaults {
        ac.mark_defaults_written(defaults_key);
    }

    let mut written = Vec::new();
    for &child_id in &node.sorted_children {
        let name = &tree.node(child_id).name;
        if let Some(value) = input.remove(name) {
            acl_write(tree, ac, child_id, doc, value, options, cursor)?;
            written.push(child_id);
        } else if run_defaults && !doc.contains_key(name) && apply_default(tree, ac, child_id, doc, cursor)? {
            written.push(child_id);
        }
    }

    let validate: Vec<NodeId> = if cursor.is_new {
        node.children.to_vec()
    } else {
        written
    };
    validate_nodes(tree, ac, &validate, doc, cursor)
}

fn has_defaults(tree: &SchemaTree, id: NodeId) -> bool {
    let node = tree.node(id);
    if node.default_value.is_some() || node.hooks.default.is_some() {
        return true;
    }
    matches!(node.kind, PropertyKind::Document)
        && !node.array
        && node.children.iter().any(|&c| has_defaults(tree, c))
}

/// Stores a node's default, bypassing access checks. Non-array documents
/// holding defaults below them are created so those defaults land too.
fn apply_default(
    tree: &SchemaTree,
    ac: &mut AccessContext,
    id: NodeId,
    doc: &mut Map<String, Value>,
    cursor: &DocCursor,
) -> Result<bool, SchemaError> {
    let node = tree.node(id);
    if node.is_virtual || !has_defaults(tree, id) {
        return Ok(false);
    }
    let value = match &node.hooks.default {
        Some(default) => default(&HookCtx { tree, node, cursor }, ac, doc)?,
        None => node.default_value.clone(),
    };
    let path = cursor.child_path(&node.name);
    match (value, &node.kind) {
        (Some(value), PropertyKind::Primitive(primitive)) if !value.is_null() => {
            let value = match value {
                Value::Array(items) if node.array => Value::Array(
                    items
                        .into_iter()
                        .map(|item| primitive.cast(&path, item))
                        .collect::<Result<_, _>>()?,
                ),
                value if node.array => Value::Array(vec![primitive.cast(&path, value)?]),
                value => primitive.cast(&path, value)?,
            };
            set_value(tree, ac, id, doc, value, cursor)?;
            Ok(true)
        }
        (Some(value), _) if !value.is_null() => {
            set_value(tree, ac, id, doc, value, cursor)?;
            Ok(true)
        }
        (_, PropertyKind::Document) if !node.array => {
            let sub_cursor = cursor.enter(&node.name, true);
            ac.mark_defaults_written(sub_cursor.defaults_key());
            let mut sub = Map::new();
            for &child in &node.sorted_children {
                apply_default(tree, ac, child, &mut sub, &sub_cursor)?;
            }
            if sub.is_empty() {
                return Ok(false);
            }
            doc.insert(node.name.clone(), Value::Object(sub));
            ac.mark_modified(path);
            Ok(true)
        }
        _ => Ok(false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::{AccessLevel, Principal};
    use crate::schema::definition::PropertyDef;
    use crate::schema::tree::CompileOptions;
    use crate::schema::write::write_instance;
    use serde_json::json;

    fn names(tree: &SchemaTree, ids: &[NodeId]) -> Vec<String> {
        ids.iter().map(|&id| tree.node(id).name.clone()).collect()
    }

    #[test]
    fn groups_keys_native_custom_then_deferred() {
        let tree = SchemaTree::compile(
            "c_doc",
            vec![
                PropertyDef::string("c_late").defer_writes(),
                PropertyDef::string("c_b").depends_on("c_c"),
                PropertyDef::string("c_c"),
                PropertyDef::string("c_free"),
                PropertyDef::string("name").write_priority(1),
                PropertyDef::string("label").write_priority(5),
            ],
            CompileOptions::internal(),
        )
        .unwrap();
        let root = tree.node(tree.root());
        assert_eq!(
            names(&tree, &root.sorted_children),
            vec!["_id", "label", "name", "c_c", "c_b", "c_free", "c_late"]
        );
    }

    #[test]
    fn sibling_cycles_fail_compilation() {
        let err = SchemaTree::compile(
            "c_doc",
            vec![
                PropertyDef::string("c_a").depends_on("c_b"),
                PropertyDef::string("c_b").depends_on("c_a"),
            ],
            CompileOptions::internal(),
        )
        .unwrap_err();
        assert_eq!(err.code_str(), "invalid_argument");
    }

    #[test]
    fn nested_defaults_create_their_document() {
        let tree = SchemaTree::compile(
            "c_doc",
            vec![
                PropertyDef::document(
                    "c_settings",
                    vec![PropertyDef::boolean("enabled").default_value(json!(true))],
                ),
                PropertyDef::string("c_tags").array().default_value(json!(["x"])),
            ],
            CompileOptions::internal(),
        )
        .unwrap();
        let mut ac = AccessContext::new(Principal::new("u1", "org"), "c_doc")
            .with_resolved(AccessLevel::Read);
        let mut instance = json!({});
        write_instance(&tree, &mut ac, &mut instance, json!({}), &WriteOptions::default(), true).unwrap();
        assert_eq!(instance, json!({"c_settings": {"enabled": true}, "c_tags": ["x"]}));
    }

    #[test]
    fn defaults_run_once_per_document() {
        let tree = SchemaTree::compile(
            "c_doc",
            vec![PropertyDef::number("c_n").default_value(json!(3)).removable()],
            CompileOptions::internal(),
        )
        .unwrap();
        let mut ac = AccessContext::new(Principal::new("u1", "org"), "c_doc")
            .with_resolved(AccessLevel::Delete);
        let mut instance = json!({});
        write_instance(&tree, &mut ac, &mut instance, json!({}), &WriteOptions::default(), true).unwrap();
        write_instance(&tree, &mut ac, &mut instance, json!({"c_n": null}), &WriteOptions::merge(), true).unwrap();
        assert!(instance.get("c_n").is_none());
    }
}
