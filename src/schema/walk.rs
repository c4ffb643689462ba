use crate::schema::node::{Node, NodeId};
use crate::schema::tree::SchemaTree;
use crate::value::id_of;
use serde_json::Value;

/// Early-exit codes for tree and instance traversal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalkControl {
    Continue,
    SkipChildren,
    SkipSiblings,
    Abort,
}

/// One visited value of an instance.
pub struct WalkEntry<'a> {
    pub node: &'a Node,
    pub value: &'a Value,
    /// Runtime path of the value, with element ids for document arrays and
    /// indexes for primitive arrays.
    pub path: String,
}

/// Walks an instance alongside its schema, depth-first in declaration order.
/// `filter` limits which child names are descended into; `None` visits all.
/// Array nodes are visited once per element. Returns false if the walk was
/// aborted.
pub fn walk_document<'a, F>(
    tree: &'a SchemaTree,
    instance: &'a Value,
    filter: Option<&dyn Fn(&Node) -> bool>,
    f: &mut F,
) -> bool
where
    F: FnMut(WalkEntry<'a>) -> WalkControl,
{
    walk_children(tree, tree.root(), instance, "", filter, f) != WalkControl::Abort
}

fn walk_children<'a, F>(
    tree: &'a SchemaTree,
    parent: NodeId,
    doc: &'a Value,
    prefix: &str,
    filter: Option<&dyn Fn(&Node) -> bool>,
    f: &mut F,
) -> WalkControl
where
    F: FnMut(WalkEntry<'a>) -> WalkControl,
{
    let Some(map) = doc.as_object() else {
        return WalkControl::Continue;
    };
    for &child in tree.children_for(parent, doc) {
        let node = tree.node(child);
        if filter.is_some_and(|keep| !keep(node)) {
            continue;
        }
        let Some(value) = map.get(&node.name) else {
            continue;
        };
        let path = join(prefix, &node.name);
        let control = if node.array {
            walk_array(tree, node, value, &path, filter, f)
        } else {
            walk_value(tree, node, value, path, filter, f)
        };
        match control {
            WalkControl::Abort => return WalkControl::Abort,
            WalkControl::SkipSiblings => break,
            _ => {}
        }
    }
    WalkControl::Continue
}

fn walk_array<'a, F>(
    tree: &'a SchemaTree,
    node: &'a Node,
    value: &'a Value,
    path: &str,
    filter: Option<&dyn Fn(&Node) -> bool>,
    f: &mut F,
) -> WalkControl
where
    F: FnMut(WalkEntry<'a>) -> WalkControl,
{
    let Some(items) = value.as_array() else {
        return WalkControl::Continue;
    };
    for (index, item) in items.iter().enumerate() {
        let key = match id_of(item) {
            Some(id) if node.is_document() => id.to_string(),
            _ => index.to_string(),
        };
        match walk_value(tree, node, item, join(path, &key), filter, f) {
            WalkControl::Abort => return WalkControl::Abort,
            WalkControl::SkipSiblings => return WalkControl::SkipSiblings,
            _ => {}
        }
    }
    WalkControl::Continue
}

fn walk_value<'a, F>(
    tree: &'a SchemaTree,
    node: &'a Node,
    value: &'a Value,
    path: String,
    filter: Option<&dyn Fn(&Node) -> bool>,
    f: &mut F,
) -> WalkControl
where
    F: FnMut(WalkEntry<'a>) -> WalkControl,
{
    let descend = node.is_document() && value.is_object();
    let child_prefix = path.clone();
    match f(WalkEntry { node, value, path }) {
        WalkControl::Abort => WalkControl::Abort,
        WalkControl::SkipSiblings => WalkControl::SkipSiblings,
        WalkControl::SkipChildren => WalkControl::Continue,
        WalkControl::Continue if descend => {
            walk_children(tree, node.id, value, &child_prefix, filter, f)
        }
        WalkControl::Continue => WalkControl::Continue,
    }
}

fn join(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{prefix}.{key}")
    }
}
