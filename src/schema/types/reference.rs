use crate::access::{AccessContext, AccessLevel};
use crate::error::{DenyReason, SchemaError};
use crate::schema::access::resolved_access;
use crate::schema::definition::ReferenceDef;
use crate::schema::kind::PropertyKind;
use crate::schema::node::NodeId;
use crate::schema::selection::Selection;
use crate::schema::tree::SchemaTree;
use crate::value::{id_of, is_id, raw_id_of};
use serde_json::{Map, Value, json};

/// Looks up referenced instances on behalf of a reference node.
pub trait ReferenceResolver: Send + Sync {
    /// The caller's resolved level on the referenced instance, or `None`
    /// when it does not exist.
    fn access(
        &self,
        ac: &AccessContext,
        object: &str,
        id: &str,
    ) -> Result<Option<AccessLevel>, SchemaError>;

    /// Reads the referenced instance with an already derived context.
    fn read(
        &self,
        ac: &AccessContext,
        object: &str,
        id: &str,
        selection: &Selection,
    ) -> Result<Option<Value>, SchemaError>;
}

/// Turns a bare id or `{_id}` into the stored `{_id, object}` shape.
pub fn normalize_reference(
    def: &ReferenceDef,
    value: Value,
    path: &str,
) -> Result<Value, SchemaError> {
    let id = match &value {
        Value::String(s) if is_id(s) => s.clone(),
        Value::Object(_) => match raw_id_of(&value) {
            Some(Value::String(s)) if is_id(s) => s.clone(),
            _ => return Err(SchemaError::invalid(path, "reference requires a valid _id")),
        },
        other => {
            return Err(SchemaError::invalid(
                path,
                format!("Cast to Reference failed for value {other}"),
            ));
        }
    };
    Ok(json!({"_id": id, "object": def.source_object}))
}

/// Rejects a reference the caller cannot reach at the required level.
pub fn validate_reference(
    ac: &AccessContext,
    def: &ReferenceDef,
    id: &str,
    path: &str,
) -> Result<(), SchemaError> {
    if !def.validate_reference {
        return Ok(());
    }
    let Some(resolver) = &ac.references else {
        return Ok(());
    };
    match resolver.access(ac, &def.source_object, id)? {
        Some(level) if level >= def.reference_access => Ok(()),
        _ => Err(SchemaError::denied(path, DenyReason::ReferencedContext)),
    }
}

/// Replaces a stored reference with the referenced instance as the caller
/// may see it. Returns `None` when the node is not expandable or no
/// resolver is available, in which case the plain value is read instead.
pub fn expand_reference(
    tree: &SchemaTree,
    ac: &AccessContext,
    id: NodeId,
    raw: &Value,
    selection: &Selection,
) -> Result<Option<Value>, SchemaError> {
    let node = tree.node(id);
    let PropertyKind::Reference(def) = &node.kind else {
        return Ok(None);
    };
    if !def.expandable {
        return Ok(None);
    }
    let (Some(resolver), Some(ref_id)) = (ac.references.clone(), id_of(raw)) else {
        return Ok(None);
    };
    let Some(level) = resolver.access(ac, &def.source_object, ref_id)? else {
        return Ok(None);
    };

    let mut resolved = level.max(def.grant);
    if def.inherit_property_access {
        resolved = resolved.max(resolved_access(tree, ac, id));
    }
    let mut derived = ac
        .derive(def.source_object.clone(), ref_id)
        .with_resolved(resolved)
        .with_grant(def.grant);
    derived.pacl = def.pacl.clone();
    derived.instance_roles = def.roles.clone();
    if selection.passive {
        derived.passive = true;
    }

    let mut inner = Selection {
        passive: selection.passive,
        ..Selection::default()
    };
    for (name, child) in &selection.children {
        if !matches!(name.as_str(), "_id" | "object" | "path") {
            inner.children.insert(name.clone(), child.clone());
        }
    }
    let Some(expanded) = resolver.read(&derived, &def.source_object, ref_id, &inner)? else {
        return Ok(None);
    };

    let mut out = match expanded {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    out.insert("_id".into(), Value::String(ref_id.to_string()));
    out.insert("object".into(), Value::String(def.source_object.clone()));
    out.insert(
        "path".into(),
        Value::String(format!("/{}/{}", def.source_object, ref_id)),
    );
    Ok(Some(Value::Object(out)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::Principal;
    use crate::schema::definition::PropertyDef;
    use crate::schema::read::read_instance;
    use crate::schema::tree::CompileOptions;
    use std::sync::Arc;

    const REF: &str = "00000000-0000-4000-8000-0000000000aa";

    struct Fixed(AccessLevel);

    impl ReferenceResolver for Fixed {
        fn access(&self, _: &AccessContext, _: &str, id: &str) -> Result<Option<AccessLevel>, SchemaError> {
            Ok((id == REF).then_some(self.0))
        }

        fn read(
            &self,
            ac: &AccessContext,
            object: &str,
            id: &str,
            _: &Selection,
        ) -> Result<Option<Value>, SchemaError> {
            Ok(Some(json!({"c_title": format!("{object}:{id}"), "level": ac.resolved.as_i64()})))
        }
    }

    fn caller(level: AccessLevel) -> AccessContext {
        AccessContext::new(Principal::new("u1", "org"), "c_post")
            .with_resolved(AccessLevel::Delete)
            .with_references(Arc::new(Fixed(level)))
    }

    #[test]
    fn bare_ids_are_normalized() {
        let def = ReferenceDef::new("c_author");
        let out = normalize_reference(&def, json!(REF), "c_ref").unwrap();
        assert_eq!(out, json!({"_id": REF, "object": "c_author"}));
        assert!(normalize_reference(&def, json!(5), "c_ref").is_err());
        assert!(normalize_reference(&def, json!({"_id": "nope"}), "c_ref").is_err());
    }

    #[test]
    fn validation_requires_reference_access() {
        let def = ReferenceDef::new("c_author");
        assert!(validate_reference(&caller(AccessLevel::Share), &def, REF, "c_ref").is_ok());
        let err = validate_reference(&caller(AccessLevel::Read), &def, REF, "c_ref").unwrap_err();
        assert_eq!(err.code_str(), "access_denied");
        let missing = "00000000-0000-4000-8000-0000000000ab";
        assert!(validate_reference(&caller(AccessLevel::System), &def, missing, "c_ref").is_err());
    }

    #[test]
    fn expandable_references_read_through() {
        let mut def = PropertyDef::reference("c_author", "c_person");
        if let crate::schema::definition::TypeDef::Reference(r) = &mut def.kind {
            r.expandable = true;
            r.grant = AccessLevel::Read;
        }
        let tree = SchemaTree::compile("c_post", vec![def], CompileOptions::internal()).unwrap();
        let instance = json!({"c_author": {"_id": REF, "object": "c_person"}});

        let plain = read_instance(&tree, &caller(AccessLevel::Connected), &instance, &Selection::all())
            .unwrap();
        assert_eq!(plain["c_author"]["path"], json!(format!("/c_person/{REF}")));
        assert!(plain["c_author"].get("c_title").is_none());

        let expanded = read_instance(
            &tree,
            &caller(AccessLevel::Connected),
            &instance,
            &Selection::all().expanded(),
        )
        .unwrap();
        assert_eq!(expanded["c_author"]["c_title"], json!(format!("c_person:{REF}")));
        assert_eq!(expanded["c_author"]["level"], json!(AccessLevel::Read.as_i64()));
    }
}
