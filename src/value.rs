//! Helpers over `serde_json::Value` instance documents.
//!
//! Paths are dot separated. A numeric segment indexes into an array when the
//! current value is an array and is treated as an object key otherwise.

use serde_json::{Map, Value};
use uuid::Uuid;

pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}

pub fn is_id(s: &str) -> bool {
    Uuid::parse_str(s).is_ok()
}

/// Returns the value's `_id` when it is a well-formed id string.
pub fn id_of(value: &Value) -> Option<&str> {
    value
        .get("_id")
        .and_then(Value::as_str)
        .filter(|id| is_id(id))
}

/// Returns the `_id` a document is stored under, in whatever format it has.
pub fn stored_id(value: &Value) -> Option<&str> {
    value.get("_id").and_then(Value::as_str).filter(|id| !id.is_empty())
}

/// Returns the raw `_id` of a payload whether or not it is well formed.
pub fn raw_id_of(value: &Value) -> Option<&Value> {
    value.get("_id").filter(|v| !v.is_null())
}

pub fn equal_ids(a: &str, b: &str) -> bool {
    match (Uuid::parse_str(a), Uuid::parse_str(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}

pub fn find_id_in_array<'a>(array: &'a [Value], id: &str) -> Option<(usize, &'a Value)> {
    array
        .iter()
        .enumerate()
        .find(|(_, v)| id_of(v).is_some_and(|v| equal_ids(v, id)))
}

pub fn is_plain_object(value: &Value) -> bool {
    value.is_object()
}

/// True for any value other than null and the empty string, array or object.
pub fn is_present(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
        Value::Bool(_) | Value::Number(_) => true,
    }
}

pub fn is_custom_name(name: &str) -> bool {
    name.starts_with("c_") || name.contains("__")
}

/// Parses a selection key as an integer, accepting numeric strings.
pub fn as_integer(key: &str) -> Option<i64> {
    key.parse::<i64>().ok()
}

/// Resolves a possibly negative index against a length.
pub fn resolve_index(index: i64, len: usize) -> Option<usize> {
    let len = len as i64;
    let idx = if index < 0 { len + index } else { index };
    if idx >= 0 && idx < len {
        Some(idx as usize)
    } else {
        None
    }
}

pub fn path_get<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return Some(root);
    }
    let mut cur = root;
    for seg in path.split('.') {
        cur = match cur {
            Value::Object(map) => map.get(seg)?,
            Value::Array(items) => items.get(seg.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(cur)
}

pub fn path_get_mut<'a>(root: &'a mut Value, path: &str) -> Option<&'a mut Value> {
    if path.is_empty() {
        return Some(root);
    }
    let mut cur = root;
    for seg in path.split('.') {
        cur = match cur {
            Value::Object(map) => map.get_mut(seg)?,
            Value::Array(items) => items.get_mut(seg.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(cur)
}

/// Sets a value, creating intermediate objects and replacing non-object
/// intermediates.
pub fn path_set(root: &mut Value, path: &str, value: Value) {
    if path.is_empty() {
        *root = value;
        return;
    }
    let mut cur = root;
    let mut segments = path.split('.').peekable();
    while let Some(seg) = segments.next() {
        let last = segments.peek().is_none();
        let array_index = match &*cur {
            Value::Array(items) => seg.parse::<usize>().ok().filter(|i| *i < items.len()),
            _ => None,
        };
        if let Some(i) = array_index {
            let Value::Array(items) = cur else { return };
            if last {
                items[i] = value;
                return;
            }
            cur = &mut items[i];
            continue;
        }
        if !cur.is_object() {
            *cur = Value::Object(Map::new());
        }
        let Value::Object(map) = cur else { return };
        if last {
            map.insert(seg.to_string(), value);
            return;
        }
        cur = map
            .entry(seg.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
    }
}

pub fn path_unset(root: &mut Value, path: &str) -> Option<Value> {
    let (parent, leaf) = match path.rsplit_once('.') {
        Some((parent, leaf)) => (path_get_mut(root, parent)?, leaf),
        None => (root, path),
    };
    match parent {
        Value::Object(map) => map.remove(leaf),
        _ => None,
    }
}

/// Returns the array at `path`, replacing any non-array value with `[]`.
pub fn ensure_array<'a>(root: &'a mut Value, path: &str) -> Option<&'a mut Vec<Value>> {
    if !path_get(root, path).is_some_and(Value::is_array) {
        path_set(root, path, Value::Array(Vec::new()));
    }
    path_get_mut(root, path).and_then(Value::as_array_mut)
}

/// True when every value in an object is absent or null, recursively for
/// nested objects.
pub fn is_all_undefined(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Object(map) => map.values().all(is_all_undefined),
        _ => false,
    }
}

/// Canonical ordering used for stored index arrays.
pub fn compare_values(a: &Value, b: &Value) -> std::cmp::Ordering {
    use std::cmp::Ordering;
    fn rank(v: &Value) -> u8 {
        match v {
            Value::Null => 0,
            Value::Number(_) => 1,
            Value::String(_) => 2,
            Value::Object(_) => 3,
            Value::Array(_) => 4,
            Value::Bool(_) => 5,
        }
    }
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        _ => match rank(a).cmp(&rank(b)) {
            Ordering::Equal => a.to_string().cmp(&b.to_string()),
            other => other,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn path_set_creates_intermediate_objects() {
        let mut doc = json!({});
        path_set(&mut doc, "a.b.c", json!(1));
        assert_eq!(doc, json!({"a": {"b": {"c": 1}}}));
        assert_eq!(path_get(&doc, "a.b.c"), Some(&json!(1)));
        assert_eq!(path_unset(&mut doc, "a.b.c"), Some(json!(1)));
        assert_eq!(doc, json!({"a": {"b": {}}}));
    }

    #[test]
    fn numeric_segments_index_arrays() {
        let doc = json!({"items": [{"n": 1}, {"n": 2}]});
        assert_eq!(path_get(&doc, "items.1.n"), Some(&json!(2)));
        assert_eq!(path_get(&doc, "items.5.n"), None);
    }

    #[test]
    fn ensure_array_replaces_scalars() {
        let mut doc = json!({"tags": "x"});
        ensure_array(&mut doc, "tags").unwrap().push(json!("y"));
        assert_eq!(doc, json!({"tags": ["y"]}));
    }

    #[test]
    fn negative_indexes_count_from_the_end() {
        assert_eq!(resolve_index(-1, 3), Some(2));
        assert_eq!(resolve_index(3, 3), None);
        assert_eq!(resolve_index(-4, 3), None);
    }

    #[test]
    fn scalars_count_as_present() {
        for value in [json!("x"), json!(0), json!(false), json!([1]), json!({"a": 1})] {
            assert!(is_present(&value), "{value} should be present");
        }
        for value in [json!(null), json!(""), json!([]), json!({})] {
            assert!(!is_present(&value), "{value} should be absent");
        }
    }

    #[test]
    fn stored_ids_need_not_be_uuids() {
        assert_eq!(stored_id(&json!({"_id": "a"})), Some("a"));
        assert_eq!(id_of(&json!({"_id": "a"})), None);
        assert_eq!(stored_id(&json!({"_id": 1})), None);
    }

    #[test]
    fn custom_names() {
        assert!(is_custom_name("c_name"));
        assert!(is_custom_name("acme__score"));
        assert!(!is_custom_name("name"));
    }
}
