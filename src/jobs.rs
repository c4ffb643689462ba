//! Background work: job messages, their dispatch, and the reindex job.

use crate::error::SchemaError;
use crate::index::instance::{INDEX_KEY, rebuild_indexes};
use crate::meta::CompiledObject;
use crate::store::DocumentStore;
use crate::value::stored_id;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub queue: String,
    pub name: String,
    pub payload: Value,
    #[serde(default)]
    pub meta: Value,
}

impl Job {
    pub fn new(queue: impl Into<String>, name: impl Into<String>, payload: Value) -> Self {
        Self {
            queue: queue.into(),
            name: name.into(),
            payload,
            meta: Value::Null,
        }
    }

    pub fn with_meta(mut self, meta: Value) -> Self {
        self.meta = meta;
        self
    }
}

/// Fire-and-forget delivery of jobs to whatever runs them.
pub trait JobDispatcher: Send + Sync {
    fn send(&self, job: Job) -> Result<(), SchemaError>;
}

/// Delivers jobs into a tokio channel.
#[derive(Debug, Clone)]
pub struct ChannelDispatcher {
    tx: mpsc::UnboundedSender<Job>,
}

impl ChannelDispatcher {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Job>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl JobDispatcher for ChannelDispatcher {
    fn send(&self, job: Job) -> Result<(), SchemaError> {
        self.tx
            .send(job)
            .map_err(|e| SchemaError::JobDispatch(format!("queue closed, dropped '{}'", e.0.name)))
    }
}

/// The reindex job payload.
pub fn reindex_job(queue: &str, name: &str, org: &str, object: &str, req_id: &str) -> Job {
    Job::new(
        queue,
        name,
        json!({"org": org, "object": object, "setPath": Value::Null, "setId": Value::Null}),
    )
    .with_meta(json!({"reqId": req_id}))
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IndexerReport {
    pub processed: usize,
    pub failed: usize,
}

/// Rewrites the index values of every stored instance of an object.
pub struct Indexer {
    store: Arc<dyn DocumentStore>,
    batch_size: usize,
}

impl Indexer {
    pub fn new(store: Arc<dyn DocumentStore>, batch_size: usize) -> Self {
        Self {
            store,
            batch_size: batch_size.max(1),
        }
    }

    /// Pages through instances by `_id`. Instances that fail to rebuild are
    /// logged and skipped; only `idx` is written back.
    pub async fn run(&self, compiled: &CompiledObject) -> Result<IndexerReport, SchemaError> {
        let object = compiled.name();
        let mut report = IndexerReport::default();
        let mut after: Option<String> = None;
        loop {
            let page = self
                .store
                .find_page(object, after.as_deref(), self.batch_size)?;
            let Some(last) = page.last().and_then(stored_id).map(str::to_string) else {
                break;
            };
            let full = page.len() == self.batch_size;
            for mut instance in page {
                let Some(id) = stored_id(&instance).map(str::to_string) else {
                    continue;
                };
                let rebuilt = compiled
                    .tree_for(&instance)
                    .and_then(|tree| rebuild_indexes(tree, &mut instance, None));
                let written = rebuilt.and_then(|_| {
                    let idx = instance.get(INDEX_KEY).cloned().unwrap_or(Value::Null);
                    self.store.update_idx(object, &id, idx)
                });
                match written {
                    Ok(()) => report.processed += 1,
                    Err(err) => {
                        warn!(object, instance = %id, error = %err, "reindex skipped instance");
                        report.failed += 1;
                    }
                }
            }
            if !full {
                break;
            }
            after = Some(last);
            tokio::task::yield_now().await;
        }
        info!(object, processed = report.processed, failed = report.failed, "reindex finished");
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SchemaConfig;
    use crate::store::MemoryStore;

    fn compiled() -> CompiledObject {
        CompiledObject::compile(
            json!({
                "name": "c_car",
                "properties": [
                    {"_id": "p1", "type": "String", "name": "c_vin", "indexed": true, "unique": true},
                    {"_id": "p2", "type": "String", "name": "c_tag", "indexed": true},
                ],
                "slots": [{"_id": "p1", "unique": true, "name": "u1"}, {"_id": "p2", "unique": false, "name": "i1"}],
            }),
            &SchemaConfig::default(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn channel_dispatch_delivers_in_order() {
        let (dispatcher, mut rx) = ChannelDispatcher::channel();
        dispatcher.send(Job::new("work", "a", Value::Null)).unwrap();
        dispatcher.send(Job::new("work", "b", Value::Null)).unwrap();
        assert_eq!(rx.recv().await.unwrap().name, "a");
        assert_eq!(rx.recv().await.unwrap().name, "b");
        drop(rx);
        assert_eq!(
            dispatcher.send(Job::new("work", "c", Value::Null)).unwrap_err().code_str(),
            "job_dispatch"
        );
    }

    #[tokio::test]
    async fn indexer_rebuilds_every_page_and_skips_failures() {
        let store = Arc::new(MemoryStore::new());
        for i in 0..5 {
            store
                .insert("c_car", json!({"_id": format!("id{i}"), "c_vin": format!("v{i}"), "c_tag": "t"}))
                .unwrap();
        }
        store
            .insert("c_car", json!({"_id": "id9", "c_vin": "v9", "type": "ghost"}))
            .unwrap();
        let indexer = Indexer::new(store.clone(), 2);
        let report = indexer.run(&compiled()).await.unwrap();
        assert_eq!(report, IndexerReport { processed: 5, failed: 1 });

        let doc = store.find_one("c_car", "id3").unwrap().unwrap();
        assert_eq!(doc["idx"]["d"]["u1"], json!({"k": "p1", "v": "v3"}));
        assert_eq!(doc["idx"]["d"]["i1"], json!("t"));
        assert_eq!(doc["c_vin"], json!("v3"));
    }
}
