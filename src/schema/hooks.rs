//! Per-node behaviour that cannot be expressed declaratively.
//!
//! Hooks are plain synchronous closures returning `Result`. Anything slow or
//! external is scheduled as a deferred effect on the access context and runs
//! at the commit boundary instead.

use crate::access::AccessContext;
use crate::error::SchemaError;
use crate::schema::node::{DocCursor, Node};
use crate::schema::tree::SchemaTree;
use serde_json::{Map, Value};
use std::sync::Arc;

/// What every hook gets to look at.
pub struct HookCtx<'a> {
    pub tree: &'a SchemaTree,
    pub node: &'a Node,
    pub cursor: &'a DocCursor,
}

pub type ReaderFn = Arc<
    dyn Fn(&HookCtx<'_>, &AccessContext, &Map<String, Value>) -> Result<Option<Value>, SchemaError>
        + Send
        + Sync,
>;

/// Receives the cast incoming value and returns what gets stored; `None`
/// stores nothing.
pub type WriterFn = Arc<
    dyn Fn(
            &HookCtx<'_>,
            &mut AccessContext,
            &Map<String, Value>,
            Value,
        ) -> Result<Option<Value>, SchemaError>
        + Send
        + Sync,
>;

pub type GetterFn =
    Arc<dyn Fn(&HookCtx<'_>, &AccessContext, Value) -> Result<Value, SchemaError> + Send + Sync>;

pub type DefaultFn = Arc<
    dyn Fn(&HookCtx<'_>, &AccessContext, &Map<String, Value>) -> Result<Option<Value>, SchemaError>
        + Send
        + Sync,
>;

pub type StubFn = Arc<dyn Fn(&HookCtx<'_>, &AccessContext) -> Option<Value> + Send + Sync>;

pub type InitFn = Arc<dyn Fn(&mut Node) + Send + Sync>;

pub type LifecycleFn =
    Arc<dyn Fn(&HookCtx<'_>, &mut AccessContext, &Value) -> Result<(), SchemaError> + Send + Sync>;

/// Returns a failure message when the value is rejected.
pub type AdhocValidatorFn = Arc<
    dyn Fn(&HookCtx<'_>, &AccessContext, &Map<String, Value>, Option<&Value>) -> Result<(), String>
        + Send
        + Sync,
>;

#[derive(Clone, Default)]
pub struct NodeHooks {
    pub reader: Option<ReaderFn>,
    pub writer: Option<WriterFn>,
    pub pusher: Option<WriterFn>,
    pub getters: Vec<GetterFn>,
    pub default: Option<DefaultFn>,
    pub stub: Option<StubFn>,
    pub on_init: Option<InitFn>,
    pub on_value_added: Option<LifecycleFn>,
    pub on_removing_value: Option<LifecycleFn>,
    pub validators: Vec<(String, AdhocValidatorFn)>,
}

impl std::fmt::Debug for NodeHooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeHooks")
            .field("reader", &self.reader.is_some())
            .field("writer", &self.writer.is_some())
            .field("pusher", &self.pusher.is_some())
            .field("getters", &self.getters.len())
            .field("default", &self.default.is_some())
            .field("stub", &self.stub.is_some())
            .field("on_init", &self.on_init.is_some())
            .field("validators", &self.validators.len())
            .finish_non_exhaustive()
    }
}

impl NodeHooks {
    pub fn reader(
        mut self,
        f: impl Fn(&HookCtx<'_>, &AccessContext, &Map<String, Value>) -> Result<Option<Value>, SchemaError>
        + Send
        + Sync
        + 'static,
    ) -> Self {
        self.reader = Some(Arc::new(f));
        self
    }

    pub fn writer(
        mut self,
        f: impl Fn(
            &HookCtx<'_>,
            &mut AccessContext,
            &Map<String, Value>,
            Value,
        ) -> Result<Option<Value>, SchemaError>
        + Send
        + Sync
        + 'static,
    ) -> Self {
        self.writer = Some(Arc::new(f));
        self
    }

    pub fn pusher(
        mut self,
        f: impl Fn(
            &HookCtx<'_>,
            &mut AccessContext,
            &Map<String, Value>,
            Value,
        ) -> Result<Option<Value>, SchemaError>
        + Send
        + Sync
        + 'static,
    ) -> Self {
        self.pusher = Some(Arc::new(f));
        self
    }

    pub fn getter(
        mut self,
        f: impl Fn(&HookCtx<'_>, &AccessContext, Value) -> Result<Value, SchemaError>
        + Send
        + Sync
        + 'static,
    ) -> Self {
        self.getters.push(Arc::new(f));
        self
    }

    pub fn default_fn(
        mut self,
        f: impl Fn(&HookCtx<'_>, &AccessContext, &Map<String, Value>) -> Result<Option<Value>, SchemaError>
        + Send
        + Sync
        + 'static,
    ) -> Self {
        self.default = Some(Arc::new(f));
        self
    }

    pub fn stub(
        mut self,
        f: impl Fn(&HookCtx<'_>, &AccessContext) -> Option<Value> + Send + Sync + 'static,
    ) -> Self {
        self.stub = Some(Arc::new(f));
        self
    }

    pub fn on_init(mut self, f: impl Fn(&mut Node) + Send + Sync + 'static) -> Self {
        self.on_init = Some(Arc::new(f));
        self
    }

    pub fn on_value_added(
        mut self,
        f: impl Fn(&HookCtx<'_>, &mut AccessContext, &Value) -> Result<(), SchemaError>
        + Send
        + Sync
        + 'static,
    ) -> Self {
        self.on_value_added = Some(Arc::new(f));
        self
    }

    pub fn on_removing_value(
        mut self,
        f: impl Fn(&HookCtx<'_>, &mut AccessContext, &Value) -> Result<(), SchemaError>
        + Send
        + Sync
        + 'static,
    ) -> Self {
        self.on_removing_value = Some(Arc::new(f));
        self
    }

    pub fn validator(
        mut self,
        name: impl Into<String>,
        f: impl Fn(&HookCtx<'_>, &AccessContext, &Map<String, Value>, Option<&Value>) -> Result<(), String>
        + Send
        + Sync
        + 'static,
    ) -> Self {
        self.validators.push((name.into(), Arc::new(f)));
        self
    }
}
