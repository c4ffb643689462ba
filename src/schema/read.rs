use crate::access::AccessContext;
use crate::error::{DenyReason, ResourceType, SchemaError};
use crate::schema::access::has_read_access;
use crate::schema::hooks::HookCtx;
use crate::schema::kind::PropertyKind;
use crate::schema::node::{DocCursor, NodeId};
use crate::schema::selection::{Selection, path_steps};
use crate::schema::tree::SchemaTree;
use crate::schema::types::reference::expand_reference;
use crate::value::{as_integer, equal_ids, id_of, resolve_index};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

fn tolerate(passive: bool, err: SchemaError) -> Result<Option<Value>, SchemaError> {
    if passive && err.is_passive_tolerable() {
        Ok(None)
    } else {
        Err(err)
    }
}

/// Projects a whole instance for the caller.
pub fn read_instance(
    tree: &SchemaTree,
    ac: &AccessContext,
    instance: &Value,
    selection: &Selection,
) -> Result<Value, SchemaError> {
    let doc = instance
        .as_object()
        .ok_or_else(|| SchemaError::invalid(tree.object_name(), "instance is not an object"))?;
    let cursor = DocCursor::root(id_of(instance).map(str::to_string), false);
    let out = read_children(tree, ac, tree.root(), doc, selection, &cursor)?;
    Ok(Value::Object(out))
}

/// Reads the value at a runtime path such as `c_items.<id>.name`. A path
/// naming one array element returns that element alone.
pub fn read_path(
    tree: &SchemaTree,
    ac: &AccessContext,
    instance: &Value,
    path: &str,
) -> Result<Option<Value>, SchemaError> {
    let steps = path_steps(tree, path)?;
    let selection = Selection::from_path(tree, path)?;
    let projected = read_instance(tree, ac, instance, &selection)?;
    let mut current = Some(&projected);
    for step in &steps {
        current = current.and_then(|value| value.get(&step.name));
    }
    Ok(current.cloned())
}

pub(crate) fn read_children(
    tree: &SchemaTree,
    ac: &AccessContext,
    doc_node: NodeId,
    doc: &Map<String, Value>,
    selection: &Selection,
    cursor: &DocCursor,
) -> Result<Map<String, Value>, SchemaError> {
    let passive = ac.passive || selection.passive;
    let children = &tree.node(doc_node).children;
    for name in selection.children.keys() {
        if !children.iter().any(|&c| &tree.node(c).name == name) && !passive {
            return Err(SchemaError::not_found(
                ResourceType::Property,
                cursor.child_path(name),
                "no such property",
            ));
        }
    }
    let mut out = Map::new();
    for &child in children {
        let node = tree.node(child);
        let implicit;
        let child_selection = match selection.child(&node.name) {
            Some(explicit) => explicit,
            None if selection.selects_all() => {
                implicit = selection.implicit_child();
                &implicit
            }
            None => continue,
        };
        if let Some(value) = acl_read(tree, ac, child, doc, child_selection, cursor)? {
            out.insert(node.name.clone(), value);
        }
    }
    Ok(out)
}

/// Reads one node out of its parent document.
pub fn acl_read(
    tree: &SchemaTree,
    ac: &AccessContext,
    id: NodeId,
    parent: &Map<String, Value>,
    selection: &Selection,
    cursor: &DocCursor,
) -> Result<Option<Value>, SchemaError> {
    let node = tree.node(id);
    let passive = ac.passive || selection.passive;
    let path = cursor.child_path(&node.name);

    if !node.readable {
        return tolerate(
            passive,
            SchemaError::not_found(ResourceType::Property, path, "property is not readable"),
        );
    }
    if !has_read_access(tree, ac, id) {
        return tolerate(passive, SchemaError::denied(path, DenyReason::PropertyRead));
    }

    let ctx = HookCtx { tree, node, cursor };
    let mut raw = match &node.hooks.reader {
        Some(reader) => reader(&ctx, ac, parent)?,
        None => parent.get(&node.name).cloned(),
    }
    .filter(|v| !v.is_null());
    if let Some(mut value) = raw.take() {
        for getter in &node.hooks.getters {
            value = getter(&ctx, ac, value)?;
        }
        raw = Some(value);
    }
    if raw.is_none() {
        raw = node
            .hooks
            .stub
            .as_ref()
            .and_then(|stub| stub(&ctx, ac))
            .or_else(|| node.default_value.clone());
    }
    let Some(raw) = raw else {
        return Ok(None);
    };

    if node.array {
        let items = match raw {
            Value::Array(items) => items,
            other => vec![other],
        };
        return read_array(tree, ac, id, &items, selection, cursor, &path);
    }

    if let PropertyKind::Reference(_) = &node.kind {
        if selection.expand {
            if let Some(expanded) = expand_reference(tree, ac, id, &raw, selection)? {
                return Ok(Some(expanded));
            }
        }
    }

    match raw {
        Value::Object(map) if node.is_document() => {
            let sub_cursor = cursor.enter(&node.name, false);
            let out = read_children(tree, ac, id, &map, selection, &sub_cursor)?;
            finish_document(node.kind.is_structural(), passive, out, &path)
        }
        other => Ok(Some(other)),
    }
}

fn finish_document(
    structural: bool,
    passive: bool,
    out: Map<String, Value>,
    path: &str,
) -> Result<Option<Value>, SchemaError> {
    if out.is_empty() && structural {
        return tolerate(
            passive,
            SchemaError::not_found(ResourceType::Document, path, "nothing readable"),
        );
    }
    Ok(Some(Value::Object(out)))
}

fn read_array(
    tree: &SchemaTree,
    ac: &AccessContext,
    id: NodeId,
    items: &[Value],
    selection: &Selection,
    cursor: &DocCursor,
    path: &str,
) -> Result<Option<Value>, SchemaError> {
    let node = tree.node(id);
    let passive = ac.passive || selection.passive;
    let indexes = select_elements(items, &selection.keys, passive, path)?;

    let mut out = Vec::with_capacity(indexes.len());
    for index in indexes {
        let item = &items[index];
        let projected = match item {
            Value::Object(map) if node.is_document() => {
                let doc_node = if node.is_set() {
                    match tree.shape_for(id, item) {
                        Some(shape) => shape,
                        None if passive => continue,
                        None => {
                            return Err(SchemaError::not_found(
                                ResourceType::Shape,
                                path,
                                "element has no known shape",
                            ));
                        }
                    }
                } else {
                    id
                };
                let key = id_of(item)
                    .map(str::to_string)
                    .unwrap_or_else(|| index.to_string());
                let element_cursor = cursor.element(&node.name, &key, false);
                let projected = read_children(tree, ac, doc_node, map, selection, &element_cursor)?;
                finish_document(true, passive, projected, &element_cursor.path)?
            }
            other => Some(other.clone()),
        };
        if let Some(value) = projected {
            out.push(value);
        }
    }

    if selection.single && selection.keys.len() == 1 {
        return Ok(out.into_iter().next());
    }
    Ok(Some(Value::Array(out)))
}

/// Resolves element selectors to indexes in original array order. Ids and
/// indexes may not both name the same element.
pub fn select_elements(
    items: &[Value],
    keys: &[String],
    passive: bool,
    path: &str,
) -> Result<Vec<usize>, SchemaError> {
    if keys.is_empty() {
        return Ok((0..items.len()).collect());
    }
    #[derive(PartialEq)]
    enum By {
        Id,
        Index,
    }
    let mut seen: BTreeMap<usize, By> = BTreeMap::new();
    for key in keys {
        let found = match as_integer(key) {
            Some(index) => resolve_index(index, items.len()).map(|i| (i, By::Index)),
            None => items
                .iter()
                .position(|item| id_of(item).is_some_and(|id| equal_ids(id, key)))
                .map(|i| (i, By::Id)),
        };
        match found {
            Some((index, by)) => {
                if let Some(previous) = seen.get(&index) {
                    if *previous != by {
                        return Err(SchemaError::invalid(
                            path,
                            format!("element {index} was selected by both id and index"),
                        ));
                    }
                }
                seen.insert(index, by);
            }
            None if passive => {}
            None => {
                return Err(SchemaError::not_found(
                    ResourceType::ArrayValue,
                    format!("{path}.{key}"),
                    "no such element",
                ));
            }
        }
    }
    Ok(seen.into_keys().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::{AccessLevel, Principal};
    use crate::schema::definition::PropertyDef;
    use crate::schema::tree::CompileOptions;
    use serde_json::json;

    const A: &str = "00000000-0000-4000-8000-00000000000a";
    const B: &str = "00000000-0000-4000-8000-00000000000b";
    const C: &str = "00000000-0000-4000-8000-00000000000c";

    fn tree() -> SchemaTree {
        SchemaTree::compile(
            "c_obj",
            vec![
                PropertyDef::string("c_name"),
                PropertyDef::string("c_hidden").readable(false),
                PropertyDef::string("c_admin").read_access(AccessLevel::Delete),
                PropertyDef::string("c_fallback").default_value(json!("dflt")),
                PropertyDef::document("c_items", vec![PropertyDef::string("name")]).array(),
                PropertyDef::string("c_tags").array(),
            ],
            CompileOptions::internal(),
        )
        .unwrap()
    }

    fn instance() -> Value {
        json!({
            "_id": "00000000-0000-4000-8000-0000000000f0",
            "c_name": "n",
            "c_hidden": "h",
            "c_admin": "a",
            "c_items": [
                {"_id": A, "name": "a"},
                {"_id": B, "name": "b"},
                {"_id": C, "name": "c"}
            ],
            "c_tags": ["x", "y"]
        })
    }

    fn reader() -> AccessContext {
        AccessContext::new(Principal::new("u1", "org"), "c_obj").with_resolved(AccessLevel::Read)
    }

    #[test]
    fn whole_reads_skip_what_the_caller_cannot_see() {
        let tree = tree();
        let out = read_instance(&tree, &reader(), &instance(), &Selection::all()).unwrap();
        assert_eq!(out["c_name"], json!("n"));
        assert!(out.get("c_hidden").is_none());
        assert!(out.get("c_admin").is_none());
        assert_eq!(out["c_fallback"], json!("dflt"));
        assert_eq!(out["c_items"].as_array().unwrap().len(), 3);
    }

    #[test]
    fn explicit_reads_raise() {
        let tree = tree();
        let sel = Selection::all().with_child("c_admin", Selection::all());
        let err = read_instance(&tree, &reader(), &instance(), &sel).unwrap_err();
        assert_eq!(err.code_str(), "access_denied");
        let sel = Selection::all().with_child("c_hidden", Selection::all());
        let err = read_instance(&tree, &reader(), &instance(), &sel).unwrap_err();
        assert_eq!(err.code_str(), "property_not_found");
    }

    #[test]
    fn id_selection_keeps_original_order() {
        let tree = tree();
        let sel = Selection::all().with_child("c_items", Selection::all().with_keys([C, A]));
        let out = read_instance(&tree, &reader(), &instance(), &sel).unwrap();
        let names: Vec<&str> = out["c_items"]
            .as_array()
            .unwrap()
            .iter()
            .map(|e| e["name"].as_str().unwrap())
            .collect();
        assert_eq!(names, vec!["a", "c"]);
    }

    #[test]
    fn mixing_id_and_index_on_one_element_is_ambiguous() {
        let items = instance()["c_items"].as_array().unwrap().clone();
        let keys = vec![A.to_string(), "0".to_string()];
        let err = select_elements(&items, &keys, false, "c_items").unwrap_err();
        assert_eq!(err.code_str(), "invalid_argument");
        let keys = vec!["-1".to_string()];
        assert_eq!(select_elements(&items, &keys, false, "c_items").unwrap(), vec![2]);
        let keys = vec!["7".to_string()];
        assert_eq!(
            select_elements(&items, &keys, false, "c_items").unwrap_err().code_str(),
            "array_value_not_found"
        );
    }

    #[test]
    fn path_reads_return_single_elements() {
        let tree = tree();
        let out = read_path(&tree, &reader(), &instance(), &format!("c_items.{B}")).unwrap();
        assert_eq!(out, Some(json!({"_id": B, "name": "b"})));
        let out = read_path(&tree, &reader(), &instance(), &format!("c_items.{B}.name")).unwrap();
        assert_eq!(out, Some(json!("b")));
        let out = read_path(&tree, &reader(), &instance(), "c_tags.1").unwrap();
        assert_eq!(out, Some(json!("y")));
    }
}
