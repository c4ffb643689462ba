use crate::error::SchemaError;
use crate::jobs::Job;
use crate::schema::definition::FileDef;
use crate::schema::tree::CONTENT_FACET;
use serde_json::{Map, Value, json};

pub const MEDIA_QUEUE: &str = "media";
pub const MEDIA_PROCESSOR_JOB: &str = "media-processor";
pub const MEDIA_CLEANUP_JOB: &str = "media-cleanup";

/// Upload state of a facet.
pub const FACET_PENDING: i64 = 0;
pub const FACET_READY: i64 = 2;

/// Resolves a stored facet location to something a client can fetch.
pub trait FilePointer: Send + Sync {
    fn url(&self, object: &str, path: &str, facet: &str, location: &Value) -> Option<String>;
}

fn facet_settings<'a>(def: &'a FileDef, name: &str) -> Option<(bool, &'a [String])> {
    if name == CONTENT_FACET {
        let declared = def.facets.iter().find(|f| f.name == CONTENT_FACET);
        return Some(declared.map_or((false, &[][..]), |f| (f.private, f.mimes.as_slice())));
    }
    def.facets
        .iter()
        .find(|f| f.name == name)
        .map(|f| (f.private, f.mimes.as_slice()))
}

/// Checks an incoming file value. Every facet must be declared, `content`
/// is required, and facets with a mime list only accept those types. New
/// facets start out pending.
pub fn normalize_file(def: &FileDef, value: Value, path: &str) -> Result<Value, SchemaError> {
    let Value::Object(input) = value else {
        return Err(SchemaError::invalid(path, "a file value must be an object of facets"));
    };
    if !input.contains_key(CONTENT_FACET) {
        return Err(SchemaError::invalid(path, "a file requires a content facet"));
    }
    let mut out = Map::new();
    for (name, facet) in input {
        let (private, mimes) = facet_settings(def, &name).ok_or_else(|| {
            SchemaError::invalid(path, format!("'{name}' is not a facet of this file"))
        })?;
        let Value::Object(mut facet) = facet else {
            return Err(SchemaError::invalid(path, format!("facet '{name}' must be an object")));
        };
        let mime = facet
            .get("mime")
            .and_then(Value::as_str)
            .unwrap_or("application/octet-stream")
            .to_string();
        if !mimes.is_empty() && !mimes.iter().any(|m| m == &mime) {
            return Err(SchemaError::invalid(
                path,
                format!("facet '{name}' does not accept {mime}"),
            ));
        }
        facet.insert("mime".into(), Value::String(mime));
        facet.insert("private".into(), Value::Bool(private));
        facet.entry("state").or_insert(json!(FACET_PENDING));
        if !facet.get("name").is_some_and(Value::is_string) {
            facet.insert("name".into(), Value::String(name.clone()));
        }
        out.insert(name, Value::Object(facet));
    }
    Ok(Value::Object(out))
}

/// Facets of a stored file value that still point at stored content.
pub fn stored_facets(value: &Value) -> Vec<Value> {
    value
        .as_object()
        .map(|facets| {
            facets
                .values()
                .filter(|f| f.get("location").is_some_and(|l| !l.is_null()))
                .cloned()
                .collect()
        })
        .unwrap_or_default()
}

/// The media-processor job for freshly uploaded facets.
pub fn processor_job(def: &FileDef, object: &str, subject: Option<&str>, path: &str, value: &Value) -> Job {
    let pending: Vec<&String> = value
        .as_object()
        .map(|facets| {
            facets
                .iter()
                .filter(|(_, f)| f.get("state").and_then(Value::as_i64) == Some(FACET_PENDING))
                .map(|(name, _)| name)
                .collect()
        })
        .unwrap_or_default();
    Job::new(
        MEDIA_QUEUE,
        MEDIA_PROCESSOR_JOB,
        json!({
            "object": object,
            "subject": subject,
            "path": path,
            "facets": pending,
            "processors": def.processors,
        }),
    )
}

/// Releases the stored locations of a removed file value.
pub fn cleanup_job(object: &str, subject: Option<&str>, path: &str, facets: &[Value]) -> Job {
    Job::new(
        MEDIA_QUEUE,
        MEDIA_CLEANUP_JOB,
        json!({"object": object, "subject": subject, "path": path, "facets": facets}),
    )
}
