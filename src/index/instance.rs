//! Per-instance index values, stored under `idx` as
//! `{v: version, d: {<slot>: value | [values] | {k: owner, v: value}}}`.

use crate::error::SchemaError;
use crate::index::slots::IndexSlot;
use crate::schema::kind::Indexable;
use crate::schema::node::NodeId;
use crate::schema::tree::SchemaTree;
use crate::value::compare_values;
use serde_json::{Map, Value, json};
use std::collections::BTreeSet;

pub const INDEX_KEY: &str = "idx";
pub const INDEX_VERSION: i64 = 0;

/// Makes `idx` well formed and drops entries for slots the tree no longer
/// has.
pub fn prep_index<'a>(tree: &SchemaTree, instance: &'a mut Value) -> Option<&'a mut Map<String, Value>> {
    let root = instance.as_object_mut()?;
    let idx = root
        .entry(INDEX_KEY)
        .or_insert_with(|| json!({"v": INDEX_VERSION, "d": {}}));
    if !idx.is_object() {
        *idx = json!({"v": INDEX_VERSION, "d": {}});
    }
    let idx = idx.as_object_mut()?;
    if !idx.get("v").is_some_and(|v| v.is_i64()) {
        idx.insert("v".into(), json!(INDEX_VERSION));
    }
    if !idx.get("d").is_some_and(Value::is_object) {
        idx.insert("d".into(), json!({}));
    }
    let data = idx.get_mut("d")?.as_object_mut()?;
    data.retain(|name, _| tree.slots().iter().any(|slot| slot.name == name.as_str()));
    Some(data)
}

/// The chain of nodes from below the root down to `target`.
fn node_chain(tree: &SchemaTree, target: NodeId) -> Vec<NodeId> {
    let mut chain = vec![target];
    let mut current = tree.node(target).parent;
    while let Some(id) = current {
        if id == tree.root() {
            break;
        }
        chain.push(id);
        current = tree.node(id).parent;
    }
    chain.reverse();
    chain
}

/// Every concrete value of `target` in the instance, flattening arrays
/// along the way and keeping only set elements of the node's own shape.
/// Returns `None` when the property holds no value anywhere; an empty array
/// still counts as present.
fn collect_values<'a>(tree: &SchemaTree, instance: &'a Value, target: NodeId) -> Option<Vec<&'a Value>> {
    let mut current = vec![instance];
    let mut exists = false;
    for id in node_chain(tree, target) {
        let node = tree.node(id);
        if node.is_set_document {
            let set = node.parent?;
            current.retain(|element| tree.shape_for(set, element) == Some(id));
            continue;
        }
        let mut next = Vec::new();
        exists = false;
        for value in current {
            match value.get(&node.name) {
                Some(Value::Null) | None => {}
                Some(Value::Array(items)) if node.array => {
                    exists = true;
                    next.extend(items.iter());
                }
                Some(other) => {
                    exists = true;
                    next.push(other);
                }
            }
        }
        current = next;
    }
    exists.then_some(current)
}

/// Recomputes the slot value of one property. A unique property whose
/// values repeat inside the instance is a conflict.
pub fn rebuild_property_index(
    tree: &SchemaTree,
    instance: &mut Value,
    slot: &IndexSlot,
) -> Result<(), SchemaError> {
    let Some(target) = tree.slot_node(slot) else {
        return Err(SchemaError::not_found(
            crate::error::ResourceType::Slot,
            slot.name.to_string(),
            format!("no property bound to '{}'", slot.id),
        ));
    };
    let node = tree.node(target);
    let found = collect_values(tree, instance, target);
    let present = found.is_some();
    let mut values: Vec<Value> = found
        .unwrap_or_default()
        .into_iter()
        .filter_map(|v| node.kind.indexable_value(v))
        .collect();
    let collected = values.len();
    let exists = present && (collected > 0 || node.array);
    if node.kind.deduplicates() {
        values.sort_by(compare_values);
        values.dedup();
        if slot.unique && values.len() != collected {
            return Err(SchemaError::conflict(
                node.fullpath.clone(),
                "Duplicate values for a unique property.",
            ));
        }
    }

    let Some(data) = prep_index(tree, instance) else {
        return Ok(());
    };
    // A unique slot cannot hold an empty array.
    if !exists || (collected == 0 && slot.unique) {
        data.remove(slot.name.as_str());
        return Ok(());
    }
    let stored = if collected == 1 {
        values.remove(0)
    } else {
        Value::Array(values)
    };
    let stored = if slot.unique {
        json!({"k": slot.id, "v": stored})
    } else {
        stored
    };
    data.insert(slot.name.to_string(), stored);
    Ok(())
}

/// Rebuilds the slots bound to `only`, or every slot of the tree.
pub fn rebuild_indexes(
    tree: &SchemaTree,
    instance: &mut Value,
    only: Option<&BTreeSet<NodeId>>,
) -> Result<usize, SchemaError> {
    prep_index(tree, instance);
    let mut rebuilt = 0;
    for slot in tree.slots() {
        let wanted = match only {
            None => true,
            Some(nodes) => tree.slot_node(slot).is_some_and(|id| nodes.contains(&id)),
        };
        if wanted {
            rebuild_property_index(tree, instance, slot)?;
            rebuilt += 1;
        }
    }
    Ok(rebuilt)
}
