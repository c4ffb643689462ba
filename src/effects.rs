//! Side effects deferred to the commit boundary.
//!
//! Effects are recorded during a write pass and run by the engine in
//! registration order: every `Before` effect ahead of persistence, every
//! `After` effect once the store accepted the write. An effect scheduled with
//! a task key runs at most once per commit no matter how often it is
//! registered.

use crate::jobs::Job;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Before,
    After,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskKey(pub String);

impl TaskKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }
}

impl std::fmt::Display for TaskKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum HistoryOp {
    Set,
    Push,
    Remove,
    Pull,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub property_id: Option<String>,
    pub path: String,
    pub op: HistoryOp,
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub object: String,
    pub subject: Option<String>,
    pub principal: String,
    pub path: String,
    pub op: HistoryOp,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Re-run slot assignment for one indexable scope.
    UpdateIndexes { update_key: String },
    DispatchJob(Job),
    Audit(AuditEvent),
    /// Release stored facets of a removed file value.
    CleanupFile { path: String, facets: Vec<Value> },
}

#[derive(Debug, Default)]
pub struct DeferredEffects {
    before: Vec<Effect>,
    after: Vec<Effect>,
    keys: HashSet<TaskKey>,
}

impl DeferredEffects {
    /// Queues an effect. Returns false when a keyed effect was already
    /// queued in this commit.
    pub fn schedule(&mut self, phase: Phase, key: Option<TaskKey>, effect: Effect) -> bool {
        if let Some(key) = key {
            if !self.keys.insert(key) {
                return false;
            }
        }
        match phase {
            Phase::Before => self.before.push(effect),
            Phase::After => self.after.push(effect),
        }
        true
    }

    pub fn is_scheduled(&self, key: &TaskKey) -> bool {
        self.keys.contains(key)
    }

    /// Removes and returns the queued effects of one phase in order.
    pub fn drain(&mut self, phase: Phase) -> Vec<Effect> {
        match phase {
            Phase::Before => std::mem::take(&mut self.before),
            Phase::After => std::mem::take(&mut self.after),
        }
    }

    pub fn len(&self) -> usize {
        self.before.len() + self.after.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&mut self) {
        self.before.clear();
        self.after.clear();
        self.keys.clear();
    }
}
