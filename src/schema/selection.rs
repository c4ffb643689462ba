use crate::error::{ResourceType, SchemaError};
use crate::schema::node::NodeId;
use crate::schema::tree::SchemaTree;
use crate::value::{as_integer, is_id};
use std::collections::{BTreeMap, BTreeSet};

/// Which parts of a document a read should project.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selection {
    /// Element selectors for array nodes: ids or integer indexes.
    pub keys: Vec<String>,
    /// Named child selections. Empty selects every child.
    pub children: BTreeMap<String, Selection>,
    /// Skip unreadable or missing nodes instead of raising.
    pub passive: bool,
    /// Return a lone selected element instead of a one-item array.
    pub single: bool,
    /// Expand references through the reference resolver.
    pub expand: bool,
}

impl Selection {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn passive() -> Self {
        Self {
            passive: true,
            ..Self::default()
        }
    }

    pub fn expanded(mut self) -> Self {
        self.expand = true;
        self
    }

    pub fn with_child(mut self, name: impl Into<String>, selection: Selection) -> Self {
        self.children.insert(name.into(), selection);
        self
    }

    pub fn with_keys<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.keys = keys.into_iter().map(Into::into).collect();
        self
    }

    pub fn child(&self, name: &str) -> Option<&Selection> {
        self.children.get(name)
    }

    pub fn selects_all(&self) -> bool {
        self.children.is_empty()
    }

    /// The selection used for a child nobody named explicitly. Implicit
    /// children are best-effort.
    pub fn implicit_child(&self) -> Selection {
        Selection {
            passive: true,
            expand: self.expand,
            ..Selection::default()
        }
    }

    /// Builds the selection for a runtime path such as `c_items.<id>.name`.
    pub fn from_path(tree: &SchemaTree, path: &str) -> Result<Selection, SchemaError> {
        let steps = path_steps(tree, path)?;
        let mut current = Selection::all();
        for step in steps.into_iter().rev() {
            if let Some(key) = step.key {
                current.keys = vec![key];
                current.single = true;
            }
            current = Selection::all().with_child(step.name, current);
        }
        Ok(current)
    }
}

/// One named step of a runtime path, with the element key that followed it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathStep {
    pub node: NodeId,
    pub name: String,
    pub key: Option<String>,
}

/// Splits a runtime path into property steps, attaching element keys to the
/// array node they select from.
pub fn path_steps(tree: &SchemaTree, path: &str) -> Result<Vec<PathStep>, SchemaError> {
    let segments: Vec<&str> = path.split('.').filter(|s| !s.is_empty()).collect();
    let mut steps = Vec::new();
    let mut current = tree.root();
    let mut i = 0;
    while i < segments.len() {
        let name = segments[i];
        let child = child_any(tree, current, name).ok_or_else(|| {
            SchemaError::not_found(ResourceType::Property, path, format!("'{name}' is not a property"))
        })?;
        i += 1;
        let mut key = None;
        if tree.node(child).array {
            if let Some(next) = segments.get(i) {
                if is_id(next) || as_integer(next).is_some() {
                    key = Some((*next).to_string());
                    i += 1;
                }
            }
        }
        steps.push(PathStep {
            node: child,
            name: name.to_string(),
            key,
        });
        current = child;
    }
    Ok(steps)
}

/// A child by name; for sets, the first shape declaring it.
pub fn child_any(tree: &SchemaTree, parent: NodeId, name: &str) -> Option<NodeId> {
    let node = tree.node(parent);
    if node.is_set() {
        node.children
            .iter()
            .find_map(|&shape| tree.child_named(shape, name))
    } else {
        tree.child_named(parent, name)
    }
}

/// Stored paths a read of `path` needs fetched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathSelections {
    pub paths: BTreeSet<String>,
    /// The index sub-document is needed too.
    pub idx: bool,
}

/// Collects the stored paths needed to read (or update) `path`: the node's
/// own full path unless it is virtual, its `include` list and its resolved
/// dependencies. A path naming a missing child falls back to the deepest
/// node that exists. An empty path selects every top-level property.
pub fn collect_runtime_path_selections(
    tree: &SchemaTree,
    path: &str,
    for_update: bool,
) -> PathSelections {
    let mut out = PathSelections::default();
    let nodes: Vec<NodeId> = if path.is_empty() {
        tree.node(tree.root()).children.to_vec()
    } else {
        let mut found = tree.find_nodes(path);
        let mut prefix = path;
        while found.is_empty() {
            match prefix.rsplit_once('.') {
                Some((head, _)) => {
                    prefix = head;
                    found = tree.find_nodes(prefix);
                }
                None => break,
            }
        }
        found
    };
    for id in nodes {
        let node = tree.node(id);
        if !node.is_virtual {
            out.paths.insert(node.fullpath.clone());
        }
        out.paths.extend(node.include.iter().cloned());
        out.paths.extend(node.dependencies.keys().cloned());
        if node.indexed || node.unique {
            out.idx = true;
        }
        if for_update && node.array && node.parent == Some(tree.root()) {
            out.paths.insert(node.docpath.clone());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::definition::PropertyDef;
    use crate::schema::tree::CompileOptions;
    use crate::value::new_id;

    fn tree() -> SchemaTree {
        SchemaTree::compile(
            "c_obj",
            vec![
                PropertyDef::string("c_a").indexed().depends_on("c_b"),
                PropertyDef::string("c_b"),
                PropertyDef::string("c_v").virtual_node().include("c_b"),
                PropertyDef::document("c_items", vec![PropertyDef::string("name")]).array(),
            ],
            CompileOptions::internal(),
        )
        .unwrap()
    }

    #[test]
    fn path_selection_nests_keys_on_the_array() {
        let tree = tree();
        let id = new_id();
        let sel = Selection::from_path(&tree, &format!("c_items.{id}.name")).unwrap();
        let items = sel.child("c_items").unwrap();
        assert_eq!(items.keys, vec![id]);
        assert!(items.single);
        assert!(items.child("name").unwrap().selects_all());
        assert!(Selection::from_path(&tree, "c_nope").is_err());
    }

    #[test]
    fn runtime_selections_follow_dependencies() {
        let tree = tree();
        let sel = collect_runtime_path_selections(&tree, "c_a", false);
        assert!(sel.paths.contains("c_a"));
        assert!(sel.paths.contains("c_b"));
        assert!(sel.idx);

        let sel = collect_runtime_path_selections(&tree, "c_v", false);
        assert!(!sel.paths.contains("c_v"));
        assert!(sel.paths.contains("c_b"));
        assert!(!sel.idx);
    }

    #[test]
    fn missing_children_fall_back_to_the_parent() {
        let tree = tree();
        let sel = collect_runtime_path_selections(&tree, "c_items.nope", true);
        assert!(sel.paths.contains("c_items"));
    }
}
