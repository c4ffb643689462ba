//! Compiled object schemas, owned by one engine and invalidated whenever a
//! definition is written.

use crate::error::SchemaError;
use crate::meta::CompiledObject;
use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::sync::Arc;

pub struct SchemaCache {
    entries: Mutex<LruCache<String, Arc<CompiledObject>>>,
}

impl std::fmt::Debug for SchemaCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchemaCache")
            .field("len", &self.len())
            .finish_non_exhaustive()
    }
}

impl SchemaCache {
    pub fn new(capacity: usize) -> Self {
        let cap = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(cap)),
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<CompiledObject>> {
        self.entries.lock().get(name).cloned()
    }

    /// Returns the cached schema, compiling and caching it on a miss. The
    /// lock is not held while compiling.
    pub fn get_or_compile(
        &self,
        name: &str,
        compile: impl FnOnce() -> Result<CompiledObject, SchemaError>,
    ) -> Result<Arc<CompiledObject>, SchemaError> {
        if let Some(hit) = self.get(name) {
            return Ok(hit);
        }
        let compiled = Arc::new(compile()?);
        self.entries
            .lock()
            .put(name.to_string(), Arc::clone(&compiled));
        Ok(compiled)
    }

    pub fn invalidate(&self, name: &str) -> bool {
        self.entries.lock().pop(name).is_some()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
