//! Portable copies of instances.
//!
//! An export is a passive read with virtual properties dropped, references
//! reduced to `{_id, object}` and file facets carrying fetchable urls
//! instead of storage locations. Importing writes such a copy back with
//! element ids preserved.

use crate::access::AccessContext;
use crate::error::SchemaError;
use crate::schema::kind::PropertyKind;
use crate::schema::node::NodeId;
use crate::schema::read::read_instance;
use crate::schema::selection::Selection;
use crate::schema::tree::SchemaTree;
use crate::schema::types::file::FilePointer;
use crate::schema::write::{WriteOptions, write_instance};
use crate::value::id_of;
use serde_json::{Map, Value};

pub fn export_instance(
    tree: &SchemaTree,
    ac: &AccessContext,
    instance: &Value,
    pointer: Option<&dyn FilePointer>,
) -> Result<Value, SchemaError> {
    let mut out = read_instance(tree, ac, instance, &Selection::passive())?;
    let subject = id_of(instance).unwrap_or_default().to_string();
    if let Value::Object(map) = &mut out {
        export_document(tree, tree.root(), map, pointer, &subject, "");
    }
    Ok(out)
}

fn join(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{prefix}.{name}")
    }
}

fn export_document(
    tree: &SchemaTree,
    doc_node: NodeId,
    doc: &mut Map<String, Value>,
    pointer: Option<&dyn FilePointer>,
    subject: &str,
    prefix: &str,
) {
    let keys: Vec<String> = doc.keys().cloned().collect();
    for key in keys {
        let Some(id) = tree.child_named(doc_node, &key) else {
            doc.remove(&key);
            continue;
        };
        let node = tree.node(id);
        if node.is_virtual {
            doc.remove(&key);
            continue;
        }
        let path = join(prefix, &key);
        let Some(value) = doc.get_mut(&key) else {
            continue;
        };
        match &node.kind {
            PropertyKind::Reference(_) => {
                if let Value::Object(reference) = value {
                    reference.retain(|k, _| k == "_id" || k == "object");
                }
            }
            PropertyKind::File(_) => {
                if let Value::Object(facets) = value {
                    for (facet, content) in facets.iter_mut() {
                        let Value::Object(content) = content else {
                            continue;
                        };
                        let location = content.remove("location");
                        let url = location.as_ref().and_then(|location| {
                            pointer.and_then(|p| p.url(tree.object_name(), &path, facet, location))
                        });
                        if let Some(url) = url {
                            content.insert("url".into(), Value::String(url));
                        }
                    }
                }
            }
            PropertyKind::Document | PropertyKind::Set(_) if node.array => {
                if let Value::Array(items) = value {
                    for item in items.iter_mut() {
                        let element_node = if node.is_set() {
                            tree.shape_for(id, item)
                        } else {
                            Some(id)
                        };
                        let element_path = join(&path, id_of(item).unwrap_or_default());
                        if let (Some(element_node), Value::Object(element)) = (element_node, item) {
                            export_document(tree, element_node, element, pointer, subject, &element_path);
                        }
                    }
                }
            }
            PropertyKind::Document | PropertyKind::Set(_) => {
                if let Value::Object(sub) = value {
                    export_document(tree, id, sub, pointer, subject, &path);
                }
            }
            _ => {}
        }
    }
}

/// Writes an exported copy into `instance`. With `import_access` every
/// access check is skipped; writability still applies.
pub fn import_instance(
    tree: &SchemaTree,
    ac: &mut AccessContext,
    instance: &mut Value,
    data: Value,
    import_access: bool,
) -> Result<(), SchemaError> {
    let is_new = instance.as_object().is_none_or(|m| m.len() <= 1);
    if let (Some(id), Value::Object(target)) = (id_of(&data).map(str::to_string), &mut *instance) {
        target.entry("_id").or_insert(Value::String(id));
    }
    if instance.is_null() {
        if let Some(id) = id_of(&data) {
            *instance = serde_json::json!({"_id": id});
        }
    }
    write_instance(tree, ac, instance, data, &WriteOptions::import(import_access), is_new)
}
