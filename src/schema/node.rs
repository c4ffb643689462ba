use crate::access::{AclEntry, AccessSpec};
use crate::schema::definition::ValidatorDef;
use crate::schema::hooks::NodeHooks;
use crate::schema::kind::PropertyKind;
use crate::value::is_custom_name;
use serde_json::Value;
use smallvec::SmallVec;
use std::collections::BTreeMap;

/// Index of a node inside its tree's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u32);

impl NodeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// A compiled property. Declared settings are copied from the definition;
/// the structural fields below them are filled in once by tree
/// initialization and never change afterwards.
#[derive(Debug, Clone)]
pub struct Node {
    pub id: NodeId,
    pub property_id: Option<String>,
    pub name: String,
    pub label: String,
    pub kind: PropertyKind,
    pub array: bool,
    pub readable: bool,
    pub writable: bool,
    pub creatable: bool,
    pub removable: bool,
    pub optional: bool,
    pub public: bool,
    pub is_virtual: bool,
    pub auto: bool,
    pub force_id: bool,
    pub read_access: AccessSpec,
    pub write_access: AccessSpec,
    pub update_access: AccessSpec,
    pub acl: Option<Vec<AclEntry>>,
    pub acl_override: bool,
    pub indexed: bool,
    pub unique: bool,
    pub history: bool,
    pub auditable: bool,
    pub validators: Vec<ValidatorDef>,
    pub include: Vec<String>,
    pub default_value: Option<Value>,
    pub write_priority: i32,
    pub defer_writes: bool,
    pub write_on_create: bool,
    pub can_push: bool,
    pub can_pull: bool,
    pub unique_values: bool,
    pub min_items: i64,
    /// Negative means unbounded.
    pub max_items: i64,
    pub max_shift: bool,
    pub unique_key: Option<String>,
    pub merge_overwrite: bool,
    pub index_slot: Option<String>,
    pub hooks: NodeHooks,
    /// Set on shape documents of a set and on nothing else.
    pub is_set_document: bool,
    /// Declared dependency paths, before resolution.
    pub(crate) declared_dependencies: Vec<String>,

    pub parent: Option<NodeId>,
    pub path_parent: Option<NodeId>,
    pub path: String,
    pub docpath: String,
    pub fullpath: String,
    pub fqpp: String,
    pub fqpparts: [String; 2],
    pub children: SmallVec<[NodeId; 8]>,
    /// Resolved absolute paths this node needs loaded. `true` marks a hard
    /// dependency.
    pub dependencies: BTreeMap<String, bool>,
    /// Children in write order; empty for leaves.
    pub sorted_children: Vec<NodeId>,
    pub(crate) initialized: bool,
}

impl Node {
    pub fn is_custom(&self) -> bool {
        is_custom_name(&self.name)
    }

    pub fn is_document(&self) -> bool {
        self.kind.is_document()
    }

    pub fn is_set(&self) -> bool {
        self.kind.is_set()
    }

    /// Writable now, or creatable while the owning document is new.
    pub fn is_writable(&self, is_new: bool) -> bool {
        self.writable || (self.creatable && is_new)
    }

    /// Adds a dependency unless it names this node. Boolean values merge
    /// with `true` winning.
    pub fn add_dependency(&mut self, path: impl Into<String>, hard: bool) {
        let path = path.into();
        if path == self.fullpath {
            return;
        }
        let entry = self.dependencies.entry(path).or_insert(false);
        *entry = *entry || hard;
    }
}

/// Addresses the document instance a write or read is currently inside.
#[derive(Debug, Clone, Default)]
pub struct DocCursor {
    /// `_id` of the top-level instance.
    pub root_id: Option<String>,
    /// `_id` of the owning array element, if inside one.
    pub doc_id: Option<String>,
    /// Runtime path of the current document: `""` at the root, otherwise
    /// property names joined with element ids, e.g. `c_items.<id>`.
    pub path: String,
    pub is_new: bool,
}

impl DocCursor {
    pub fn root(root_id: Option<String>, is_new: bool) -> Self {
        Self {
            root_id,
            doc_id: None,
            path: String::new(),
            is_new,
        }
    }

    /// The runtime path of a property of this document.
    pub fn child_path(&self, name: &str) -> String {
        if self.path.is_empty() {
            name.to_string()
        } else {
            format!("{}.{}", self.path, name)
        }
    }

    /// A cursor for a non-array sub-document.
    pub fn enter(&self, name: &str, is_new: bool) -> Self {
        Self {
            root_id: self.root_id.clone(),
            doc_id: self.doc_id.clone(),
            path: self.child_path(name),
            is_new: self.is_new || is_new,
        }
    }

    /// A cursor for one element of a document array.
    pub fn element(&self, name: &str, element_id: &str, is_new: bool) -> Self {
        Self {
            root_id: self.root_id.clone(),
            doc_id: Some(element_id.to_string()),
            path: format!("{}.{}", self.child_path(name), element_id),
            is_new: self.is_new || is_new,
        }
    }

    /// Keyed by instance so one context can write defaults for several.
    pub fn defaults_key(&self) -> String {
        let root = self.root_id.as_deref().unwrap_or("$root");
        if self.path.is_empty() {
            root.to_string()
        } else {
            format!("{root}.{}", self.path)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_keys_differ_per_instance() {
        let a = DocCursor::root(Some("r1".into()), true);
        let b = DocCursor::root(Some("r2".into()), true);
        assert_ne!(a.defaults_key(), b.defaults_key());
        assert_ne!(a.enter("c_doc", true).defaults_key(), b.enter("c_doc", true).defaults_key());
    }

    #[test]
    fn cursor_paths_nest_through_elements() {
        let root = DocCursor::root(Some("r1".into()), false);
        assert_eq!(root.child_path("c_a"), "c_a");
        let el = root.element("c_items", "e1", true);
        assert_eq!(el.path, "c_items.e1");
        assert!(el.is_new);
        assert_eq!(el.doc_id.as_deref(), Some("e1"));
        let sub = el.enter("c_doc", false);
        assert_eq!(sub.child_path("x"), "c_items.e1.c_doc.x");
        assert!(sub.is_new);
        assert_eq!(root.defaults_key(), "$root");
    }
}
