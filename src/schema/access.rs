//! Node-level access resolution.
//!
//! Declared `readAccess`/`writeAccess` values inherit up the tree until an
//! explicit level is found; node acls and reference pacls then raise the
//! caller's resolved level for that node, or replace it when the node acl
//! is an override.

use crate::access::scope::node_scope;
use crate::access::{AccessContext, AccessLevel, AclEntry};
use crate::error::SchemaError;
use crate::schema::node::NodeId;
use crate::schema::tree::SchemaTree;
use crate::schema::write::WriteOptions;
use serde::Serialize;

/// The read level a node requires. The root defaults to Read.
pub fn read_access(tree: &SchemaTree, id: NodeId) -> AccessLevel {
    let mut current = Some(id);
    while let Some(cur) = current {
        let node = tree.node(cur);
        if let Some(level) = node.read_access.level() {
            return level.max(AccessLevel::MIN);
        }
        current = node.parent;
    }
    AccessLevel::Read
}

/// The write level a node requires. The root defaults to Update.
pub fn write_access(tree: &SchemaTree, id: NodeId) -> AccessLevel {
    let mut current = Some(id);
    while let Some(cur) = current {
        let node = tree.node(cur);
        if let Some(level) = node.write_access.level() {
            return level.max(AccessLevel::MIN);
        }
        current = node.parent;
    }
    AccessLevel::Update
}

/// The level needed to update existing elements of a document array:
/// the node's own `updateAccess`, else the nearest ancestor's update or
/// write access, else Update.
pub fn update_access(tree: &SchemaTree, id: NodeId) -> AccessLevel {
    let node = tree.node(id);
    if let Some(level) = node.update_access.level() {
        return level.max(AccessLevel::MIN);
    }
    let mut current = node.parent;
    while let Some(cur) = current {
        let ancestor = tree.node(cur);
        if let Some(level) = ancestor.update_access.level().or(ancestor.write_access.level()) {
            return level.max(AccessLevel::MIN);
        }
        current = ancestor.parent;
    }
    AccessLevel::Update
}

/// The nearest explicit acl at or above the node, with its override flag.
pub fn node_acl(tree: &SchemaTree, id: NodeId) -> Option<(&[AclEntry], bool)> {
    let mut current = Some(id);
    while let Some(cur) = current {
        let node = tree.node(cur);
        if let Some(entries) = &node.acl {
            return Some((entries.as_slice(), node.acl_override));
        }
        current = node.parent;
    }
    None
}

/// The caller's level for this particular node.
pub fn resolved_access(tree: &SchemaTree, ac: &AccessContext, id: NodeId) -> AccessLevel {
    let node = tree.node(id);
    let mut level = ac.resolved;
    if let Some((entries, is_override)) = node_acl(tree, id) {
        let allow = ac.resolve_access(entries, true).allow;
        level = if is_override { allow } else { level.max(allow) };
    }
    let pacl: Vec<AclEntry> = ac
        .pacl
        .iter()
        .filter(|entry| entry.applies_to(&node.fullpath))
        .map(|entry| entry.as_entry())
        .collect();
    if !pacl.is_empty() {
        level = level.max(ac.resolve_access(&pacl, false).allow);
    }
    level
}

/// Scope check for the node. Documents accept prefix matches so a caller
/// scoped to one child can still reach the document holding it.
pub fn in_runtime_scope(tree: &SchemaTree, ac: &AccessContext, id: NodeId, action: &str) -> bool {
    let node = tree.node(id);
    let scope = node_scope(action, &node.fqpparts, ac.subject_id.as_deref());
    ac.in_auth_scope(&scope, node.is_document())
}

pub fn has_read_access(tree: &SchemaTree, ac: &AccessContext, id: NodeId) -> bool {
    resolved_access(tree, ac, id) >= read_access(tree, id) && in_runtime_scope(tree, ac, id, "read")
}

pub fn has_write_access(
    tree: &SchemaTree,
    ac: &AccessContext,
    id: NodeId,
    options: &WriteOptions,
) -> bool {
    if options.is_import && options.import_access {
        return true;
    }
    resolved_access(tree, ac, id) >= write_access(tree, id)
        && in_runtime_scope(tree, ac, id, "update")
}

pub fn has_update_access(tree: &SchemaTree, ac: &AccessContext, id: NodeId) -> bool {
    resolved_access(tree, ac, id) >= update_access(tree, id)
        && in_runtime_scope(tree, ac, id, "update")
}

/// Outcome of a permission probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeAccess {
    pub fullpath: String,
    pub fqpp: String,
    pub resolved: AccessLevel,
    pub read_required: AccessLevel,
    pub write_required: AccessLevel,
    pub read: bool,
    pub write: bool,
    pub update: bool,
}

/// Probes access to the node at `path` without touching any data.
pub fn acl_access(
    tree: &SchemaTree,
    ac: &AccessContext,
    path: &str,
) -> Result<NodeAccess, SchemaError> {
    let id = tree.require_node(path)?;
    let node = tree.node(id);
    let options = WriteOptions::default();
    Ok(NodeAccess {
        fullpath: node.fullpath.clone(),
        fqpp: node.fqpp.clone(),
        resolved: resolved_access(tree, ac, id),
        read_required: read_access(tree, id),
        write_required: write_access(tree, id),
        read: node.readable && has_read_access(tree, ac, id),
        write: node.writable && node.readable && has_write_access(tree, ac, id, &options),
        update: node.writable && has_update_access(tree, ac, id),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::{AclEntry, Principal};
    use crate::schema::definition::PropertyDef;
    use crate::schema::tree::CompileOptions;

    fn tree() -> SchemaTree {
        SchemaTree::compile(
            "c_doc",
            vec![
                PropertyDef::string("c_open"),
                PropertyDef::string("c_secret")
                    .read_access(AccessLevel::Read)
                    .write_access(AccessLevel::Delete),
                PropertyDef::document("c_group", vec![PropertyDef::string("inner")])
                    .read_access(AccessLevel::Share)
                    .acl(vec![AclEntry::account("u2", AccessLevel::Share)]),
                PropertyDef::document("c_rows", vec![PropertyDef::string("v")])
                    .array()
                    .update_access(AccessLevel::Delete),
            ],
            CompileOptions::internal(),
        )
        .unwrap()
    }

    #[test]
    fn inherited_levels_fall_back_to_root_defaults() {
        let tree = tree();
        let open = tree.find_node("c_open").unwrap();
        assert_eq!(read_access(&tree, open), AccessLevel::Read);
        assert_eq!(write_access(&tree, open), AccessLevel::Update);
        let inner = tree.find_node("c_group.inner").unwrap();
        assert_eq!(read_access(&tree, inner), AccessLevel::Share);
    }

    #[test]
    fn acl_raises_but_never_lowers() {
        let tree = tree();
        let inner = tree.find_node("c_group.inner").unwrap();
        let reader = AccessContext::new(Principal::new("u1", "org"), "c_doc")
            .with_resolved(AccessLevel::Read);
        assert!(!has_read_access(&tree, &reader, inner));
        let granted = AccessContext::new(Principal::new("u2", "org"), "c_doc")
            .with_resolved(AccessLevel::Read);
        assert!(has_read_access(&tree, &granted, inner));
        let owner = AccessContext::new(Principal::new("u3", "org"), "c_doc")
            .with_resolved(AccessLevel::Delete);
        assert_eq!(resolved_access(&tree, &owner, inner), AccessLevel::Delete);
    }

    #[test]
    fn update_access_prefers_the_node_then_ancestors() {
        let tree = tree();
        let rows = tree.find_node("c_rows").unwrap();
        assert_eq!(update_access(&tree, rows), AccessLevel::Delete);
        let v = tree.find_node("c_rows.v").unwrap();
        assert_eq!(update_access(&tree, v), AccessLevel::Delete);
        let open = tree.find_node("c_open").unwrap();
        assert_eq!(update_access(&tree, open), AccessLevel::Update);
    }

    #[test]
    fn probe_reports_read_without_write() {
        let tree = tree();
        let ac = AccessContext::new(Principal::new("u1", "org"), "c_doc")
            .with_resolved(AccessLevel::Update);
        let probe = acl_access(&tree, &ac, "c_secret").unwrap();
        assert!(probe.read);
        assert!(!probe.write);
        assert_eq!(probe.write_required, AccessLevel::Delete);
        assert!(acl_access(&tree, &ac, "c_missing").is_err());
    }

    #[test]
    fn scoped_principals_are_limited_to_their_scope() {
        let tree = tree();
        let open = tree.find_node("c_open").unwrap();
        let secret = tree.find_node("c_secret").unwrap();
        let principal = Principal::new("u1", "org").with_scopes(&["object.read.c_doc.*.c_open"]);
        let ac = AccessContext::new(principal, "c_doc").with_resolved(AccessLevel::Delete);
        assert!(has_read_access(&tree, &ac, open));
        assert!(!has_read_access(&tree, &ac, secret));
    }
}
