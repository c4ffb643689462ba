//! The document store instances and definitions are persisted in.
//!
//! [`MemoryStore`] keeps persistent `im` collections behind a lock, so a
//! commit builds the next state off to the side and swaps it in only when
//! every check passed. Unique index slots are enforced here, across
//! instances, on `(slot, owner, value)`.

use crate::effects::HistoryEntry;
use crate::error::{ResourceType, SchemaError};
use crate::index::instance::INDEX_KEY;
use crate::value::stored_id;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fs;
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;
use tracing::info;

pub trait DocumentStore: Send + Sync {
    /// Stores a new instance. Fails when the id exists or a unique slot
    /// value is taken.
    fn insert(&self, object: &str, doc: Value) -> Result<(), SchemaError>;

    /// Replaces a stored instance as a whole.
    fn replace(&self, object: &str, doc: Value) -> Result<(), SchemaError>;

    fn find_one(&self, object: &str, id: &str) -> Result<Option<Value>, SchemaError>;

    /// Instances ordered by `_id`, starting after `after_id`.
    fn find_page(&self, object: &str, after_id: Option<&str>, limit: usize) -> Result<Vec<Value>, SchemaError>;

    /// Replaces only the `idx` field of a stored instance.
    fn update_idx(&self, object: &str, id: &str, idx: Value) -> Result<(), SchemaError>;

    fn get_definition(&self, name: &str) -> Result<Option<Value>, SchemaError>;

    fn put_definition(&self, definition: Value) -> Result<(), SchemaError>;

    /// Appends history entries for one instance, keeping the newest `max`.
    fn append_history(
        &self,
        object: &str,
        id: &str,
        entries: Vec<HistoryEntry>,
        max: usize,
    ) -> Result<(), SchemaError>;

    fn history(&self, object: &str, id: &str) -> Result<Vec<HistoryEntry>, SchemaError>;
}

/// Unique constraint keys of an instance: one per element of every unique
/// slot value.
fn unique_keys(doc: &Value) -> Vec<String> {
    let Some(Value::Object(slots)) = doc.get(INDEX_KEY).and_then(|idx| idx.get("d")) else {
        return Vec::new();
    };
    let mut keys = Vec::new();
    for (slot, stored) in slots {
        let (Some(owner), Some(value)) = (stored.get("k").and_then(Value::as_str), stored.get("v")) else {
            continue;
        };
        let values = match value {
            Value::Array(items) => items.iter().collect(),
            other => vec![other],
        };
        for v in values {
            keys.push(format!("{slot}\u{1f}{owner}\u{1f}{v}"));
        }
    }
    keys
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Collection {
    docs: im::OrdMap<String, Value>,
    /// Unique constraint key to owning instance id.
    unique: im::HashMap<String, String>,
}

impl Collection {
    fn check_unique(&self, id: &str, doc: &Value) -> Result<Vec<String>, SchemaError> {
        let keys = unique_keys(doc);
        for key in &keys {
            if let Some(owner) = self.unique.get(key) {
                if owner != id {
                    let mut parts = key.split('\u{1f}');
                    let slot = parts.next().unwrap_or_default().to_string();
                    let _ = parts.next();
                    return Err(SchemaError::DuplicateKey {
                        slot,
                        key: parts.next().unwrap_or_default().to_string(),
                    });
                }
            }
        }
        Ok(keys)
    }

    fn put(&mut self, id: String, doc: Value) -> Result<(), SchemaError> {
        let keys = self.check_unique(&id, &doc)?;
        if let Some(old) = self.docs.get(&id) {
            for key in unique_keys(old) {
                self.unique.remove(&key);
            }
        }
        for key in keys {
            self.unique.insert(key, id.clone());
        }
        self.docs.insert(id, doc);
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct StoreState {
    collections: im::HashMap<String, Collection>,
    definitions: im::HashMap<String, Value>,
    history: im::HashMap<String, im::Vector<HistoryEntry>>,
}

/// Metadata of a written snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotMeta {
    pub bytes: usize,
    pub sha256_hex: String,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<StoreState>,
}

fn instance_id(object: &str, doc: &Value) -> Result<String, SchemaError> {
    stored_id(doc)
        .map(str::to_string)
        .ok_or_else(|| SchemaError::invalid(object, "instance has no _id"))
}

fn history_key(object: &str, id: &str) -> String {
    format!("{object}/{id}")
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self, object: &str) -> usize {
        self.state
            .read()
            .collections
            .get(object)
            .map_or(0, |c| c.docs.len())
    }

    /// Writes every collection to `path` atomically: msgpack, zstd
    /// compressed, followed by the sha256 of the compressed bytes.
    pub fn write_snapshot(&self, path: &Path) -> Result<SnapshotMeta, SchemaError> {
        let state = self.state.read().clone();
        let encoded = rmp_serde::to_vec(&state).map_err(|e| SchemaError::Encode(e.to_string()))?;
        let mut payload = zstd::stream::encode_all(encoded.as_slice(), 3)
            .map_err(|e| SchemaError::Io(std::io::Error::other(e.to_string())))?;
        let hash = Sha256::digest(&payload);
        payload.extend_from_slice(&hash);

        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(dir)?;
        let mut tmp = NamedTempFile::new_in(dir)?;
        tmp.write_all(&payload)?;
        tmp.flush()?;
        tmp.as_file().sync_all()?;
        tmp.persist(path).map_err(|e| SchemaError::Io(e.error))?;

        let meta = SnapshotMeta {
            bytes: payload.len(),
            sha256_hex: hex::encode(Sha256::digest(&payload)),
        };
        info!(path = %path.display(), bytes = meta.bytes, "snapshot written");
        Ok(meta)
    }

    pub fn load_snapshot(path: &Path) -> Result<Self, SchemaError> {
        let bytes = fs::read(path)?;
        if bytes.len() < 32 {
            return Err(SchemaError::Decode("snapshot too small".into()));
        }
        let (compressed, trailer) = bytes.split_at(bytes.len() - 32);
        if Sha256::digest(compressed).as_slice() != trailer {
            return Err(SchemaError::Decode("snapshot hash mismatch".into()));
        }
        let decompressed = zstd::stream::decode_all(compressed)
            .map_err(|e| SchemaError::Io(std::io::Error::other(e.to_string())))?;
        let state: StoreState =
            rmp_serde::from_slice(&decompressed).map_err(|e| SchemaError::Decode(e.to_string()))?;
        info!(path = %path.display(), collections = state.collections.len(), "snapshot loaded");
        Ok(Self {
            state: RwLock::new(state),
        })
    }
}

impl DocumentStore for MemoryStore {
    fn insert(&self, object: &str, doc: Value) -> Result<(), SchemaError> {
        let id = instance_id(object, &doc)?;
        let mut state = self.state.write();
        let mut collection = state.collections.get(object).cloned().unwrap_or_default();
        if collection.docs.contains_key(&id) {
            return Err(SchemaError::DuplicateKey {
                slot: "_id".into(),
                key: id,
            });
        }
        collection.put(id, doc)?;
        state.collections.insert(object.to_string(), collection);
        Ok(())
    }

    fn replace(&self, object: &str, doc: Value) -> Result<(), SchemaError> {
        let id = instance_id(object, &doc)?;
        let mut state = self.state.write();
        let mut collection = state.collections.get(object).cloned().unwrap_or_default();
        if !collection.docs.contains_key(&id) {
            return Err(SchemaError::not_found(ResourceType::Instance, id, "no such instance"));
        }
        collection.put(id, doc)?;
        state.collections.insert(object.to_string(), collection);
        Ok(())
    }

    fn find_one(&self, object: &str, id: &str) -> Result<Option<Value>, SchemaError> {
        Ok(self
            .state
            .read()
            .collections
            .get(object)
            .and_then(|c| c.docs.get(id).cloned()))
    }

    fn find_page(&self, object: &str, after_id: Option<&str>, limit: usize) -> Result<Vec<Value>, SchemaError> {
        let state = self.state.read();
        let Some(collection) = state.collections.get(object) else {
            return Ok(Vec::new());
        };
        let page = match after_id {
            Some(after) => collection
                .docs
                .range::<_, str>((std::ops::Bound::Excluded(after), std::ops::Bound::Unbounded))
                .take(limit)
                .map(|(_, doc)| doc.clone())
                .collect(),
            None => collection.docs.values().take(limit).cloned().collect(),
        };
        Ok(page)
    }

    fn update_idx(&self, object: &str, id: &str, idx: Value) -> Result<(), SchemaError> {
        let mut state = self.state.write();
        let mut collection = state.collections.get(object).cloned().unwrap_or_default();
        let Some(mut doc) = collection.docs.get(id).cloned() else {
            return Err(SchemaError::not_found(ResourceType::Instance, id, "no such instance"));
        };
        if let Value::Object(map) = &mut doc {
            map.insert(INDEX_KEY.into(), idx);
        }
        collection.put(id.to_string(), doc)?;
        state.collections.insert(object.to_string(), collection);
        Ok(())
    }

    fn get_definition(&self, name: &str) -> Result<Option<Value>, SchemaError> {
        Ok(self.state.read().definitions.get(name).cloned())
    }

    fn put_definition(&self, definition: Value) -> Result<(), SchemaError> {
        let name = definition
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| SchemaError::invalid("name", "definition has no name"))?
            .to_string();
        self.state.write().definitions.insert(name, definition);
        Ok(())
    }

    fn append_history(
        &self,
        object: &str,
        id: &str,
        entries: Vec<HistoryEntry>,
        max: usize,
    ) -> Result<(), SchemaError> {
        if entries.is_empty() {
            return Ok(());
        }
        let mut state = self.state.write();
        let key = history_key(object, id);
        let mut log = state.history.get(&key).cloned().unwrap_or_default();
        log.extend(entries);
        while log.len() > max {
            log.pop_front();
        }
        state.history.insert(key, log);
        Ok(())
    }

    fn history(&self, object: &str, id: &str) -> Result<Vec<HistoryEntry>, SchemaError> {
        Ok(self
            .state
            .read()
            .history
            .get(&history_key(object, id))
            .map(|log| log.iter().cloned().collect())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effects::HistoryOp;
    use serde_json::json;

    fn doc(id: &str, name: &str) -> Value {
        json!({"_id": id, "c_name": name, "idx": {"v": 0, "d": {"u1": {"k": "p1", "v": name}, "i1": "t"}}})
    }

    #[test]
    fn unique_slots_are_enforced_across_instances() {
        let store = MemoryStore::new();
        store.insert("c_car", doc("a", "x")).unwrap();
        let err = store.insert("c_car", doc("b", "x")).unwrap_err();
        assert_eq!(err.code_str(), "duplicate_key");
        assert!(err.is_conflict());
        store.insert("c_car", doc("b", "y")).unwrap();
        assert_eq!(store.count("c_car"), 2);

        // freeing a value makes it available again
        store.replace("c_car", doc("a", "z")).unwrap();
        store.replace("c_car", doc("b", "x")).unwrap();
        // other objects are separate
        store.insert("c_boat", doc("a", "x")).unwrap();
    }

    #[test]
    fn pages_follow_id_order() {
        let store = MemoryStore::new();
        for id in ["c", "a", "d", "b"] {
            store.insert("c_car", json!({"_id": id})).unwrap();
        }
        let first = store.find_page("c_car", None, 3).unwrap();
        let ids: Vec<&str> = first.iter().filter_map(stored_id).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        let rest = store.find_page("c_car", Some("c"), 3).unwrap();
        assert_eq!(rest, vec![json!({"_id": "d"})]);
    }

    #[test]
    fn history_is_bounded() {
        let store = MemoryStore::new();
        let entry = |n: i64| HistoryEntry {
            property_id: None,
            path: "c_n".into(),
            op: HistoryOp::Set,
            value: json!(n),
        };
        store.append_history("c_car", "a", (0..5).map(entry).collect(), 3).unwrap();
        let log = store.history("c_car", "a").unwrap();
        assert_eq!(log.len(), 3);
        assert_eq!(log[0].value, json!(2));
    }

    #[test]
    fn snapshots_round_trip_and_detect_corruption() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.snap");
        let store = MemoryStore::new();
        store.insert("c_car", doc("a", "x")).unwrap();
        store.put_definition(json!({"name": "c_car", "properties": []})).unwrap();
        let meta = store.write_snapshot(&path).unwrap();
        assert_eq!(meta.sha256_hex.len(), 64);

        let loaded = MemoryStore::load_snapshot(&path).unwrap();
        assert_eq!(loaded.find_one("c_car", "a").unwrap(), Some(doc("a", "x")));
        assert!(loaded.get_definition("c_car").unwrap().is_some());
        assert!(loaded.insert("c_car", doc("b", "x")).is_err());

        let mut bytes = fs::read(&path).unwrap();
        bytes[0] ^= 0xff;
        fs::write(&path, bytes).unwrap();
        assert_eq!(MemoryStore::load_snapshot(&path).unwrap_err().code_str(), "decode");
    }
}
