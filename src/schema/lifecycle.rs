//! Fan-out run whenever a stored value appears or goes away.

use crate::access::AccessContext;
use crate::effects::{AuditEvent, Effect, HistoryEntry, HistoryOp, Phase};
use crate::error::SchemaError;
use crate::schema::hooks::HookCtx;
use crate::schema::kind::PropertyKind;
use crate::schema::node::{DocCursor, NodeId};
use crate::schema::tree::SchemaTree;
use crate::schema::types::file::stored_facets;
use serde_json::Value;
use tracing::trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Change {
    Added,
    Removing,
}

pub fn on_value_added(
    tree: &SchemaTree,
    ac: &mut AccessContext,
    id: NodeId,
    value: &Value,
    cursor: &DocCursor,
) -> Result<(), SchemaError> {
    fan_out(tree, ac, id, value, cursor, Change::Added)
}

pub fn on_removing_value(
    tree: &SchemaTree,
    ac: &mut AccessContext,
    id: NodeId,
    value: &Value,
    cursor: &DocCursor,
) -> Result<(), SchemaError> {
    fan_out(tree, ac, id, value, cursor, Change::Removing)
}

fn fan_out(
    tree: &SchemaTree,
    ac: &mut AccessContext,
    id: NodeId,
    value: &Value,
    cursor: &DocCursor,
    change: Change,
) -> Result<(), SchemaError> {
    let node = tree.node(id);
    let path = cursor.child_path(&node.name);
    let ctx = HookCtx { tree, node, cursor };
    let hook = match change {
        Change::Added => &node.hooks.on_value_added,
        Change::Removing => &node.hooks.on_removing_value,
    };
    if let Some(hook) = hook {
        hook(&ctx, ac, value)?;
    }

    ac.mark_modified(path.clone());

    let op = match (change, node.array) {
        (Change::Added, false) => HistoryOp::Set,
        (Change::Added, true) => HistoryOp::Push,
        (Change::Removing, false) => HistoryOp::Remove,
        (Change::Removing, true) => HistoryOp::Pull,
    };
    if node.history {
        ac.history.push(HistoryEntry {
            property_id: node.property_id.clone(),
            path: path.clone(),
            op,
            value: value.clone(),
        });
    }
    if node.auditable {
        let event = AuditEvent {
            object: tree.object_name().to_string(),
            subject: cursor.root_id.clone(),
            principal: ac.principal.id.clone(),
            path: path.clone(),
            op,
        };
        ac.effects.schedule(Phase::After, None, Effect::Audit(event));
    }

    queue_index_rebuilds(tree, ac, id);

    if change == Change::Removing && matches!(node.kind, PropertyKind::File(_)) {
        let facets = stored_facets(value);
        if !facets.is_empty() {
            ac.effects
                .schedule(Phase::After, None, Effect::CleanupFile { path: path.clone(), facets });
        }
    }
    trace!(path = %path, ?op, "value lifecycle");
    Ok(())
}

/// Marks the indexes fed by this node, or by any indexed node below it,
/// for rebuilding at the end of the write pass.
fn queue_index_rebuilds(tree: &SchemaTree, ac: &mut AccessContext, id: NodeId) {
    let mut stack = vec![id];
    while let Some(current) = stack.pop() {
        let node = tree.node(current);
        if node.indexed || node.unique {
            ac.index_rebuilds.insert(tree.index_target(current));
        }
        if node.is_document() {
            stack.extend(node.children.iter().copied());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::{AccessLevel, Principal};
    use crate::schema::definition::PropertyDef;
    use crate::schema::tree::CompileOptions;
    use serde_json::json;

    #[test]
    fn history_audit_and_index_fan_out() {
        let tree = SchemaTree::compile(
            "c_doc",
            vec![
                PropertyDef::string("c_name").indexed().history().auditable(true),
                PropertyDef::document("c_rows", vec![PropertyDef::string("k").indexed()]).array(),
            ],
            CompileOptions::internal(),
        )
        .unwrap();
        let mut ac = AccessContext::new(Principal::new("u1", "org"), "c_doc")
            .with_resolved(AccessLevel::Update);
        let cursor = DocCursor::root(Some("s1".into()), false);
        let name = tree.find_node("c_name").unwrap();
        on_value_added(&tree, &mut ac, name, &json!("a"), &cursor).unwrap();
        assert_eq!(ac.history().len(), 1);
        assert_eq!(ac.history()[0].op, HistoryOp::Set);
        assert_eq!(ac.effects.len(), 1);
        assert!(ac.index_rebuilds.contains(&name));

        let rows = tree.find_node("c_rows").unwrap();
        let k = tree.find_node("c_rows.k").unwrap();
        on_removing_value(&tree, &mut ac, rows, &json!({"k": "x"}), &cursor).unwrap();
        assert!(ac.index_rebuilds.contains(&k));
        assert!(ac.modified_paths().any(|p| p == "c_rows"));
    }
}
