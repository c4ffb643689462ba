//! Schema-driven document storage.
//!
//! Object definitions are compiled into property trees; instances are
//! written, read and removed through those trees with per-node access
//! checks, validation and index slot maintenance. [`SchemaEngine`] ties the
//! pieces to a [`DocumentStore`] and runs the effects a write deferred to its
//! commit.

pub mod access;
pub mod cache;
pub mod config;
pub mod effects;
pub mod error;
pub mod index;
pub mod jobs;
pub mod meta;
pub mod schema;
pub mod store;
pub mod value;

#[cfg(test)]
mod lib_tests;

pub use access::{AccessContext, AccessLevel, AclEntry, Method, Principal};
pub use config::SchemaConfig;
pub use effects::{HistoryEntry, HistoryOp};
pub use error::{ResourceType, SchemaError};
pub use jobs::{ChannelDispatcher, IndexerReport, Job, JobDispatcher};
pub use meta::{CompiledObject, ObjectDefinition};
pub use schema::{PropertyDef, SchemaTree, Selection, WriteOptions};
pub use store::{DocumentStore, MemoryStore};

use crate::cache::SchemaCache;
use crate::effects::{Effect, Phase, TaskKey};
use crate::index::instance::rebuild_indexes;
use crate::index::registry::update_indexes;
use crate::index::slots::SlotPools;
use crate::jobs::{Indexer, reindex_job};
use crate::meta::{DEFINITION_OBJECT, definition_tree};
use crate::schema::access::{NodeAccess, acl_access};
use crate::schema::export::{export_instance, import_instance};
use crate::schema::read::{read_instance, read_path};
use crate::schema::remove::{acl_pull, acl_remove};
use crate::schema::types::file::{FilePointer, cleanup_job};
use crate::schema::types::reference::ReferenceResolver;
use crate::schema::validate::RuleRegistry;
use crate::schema::write::write_instance;
use crate::value::{id_of, new_id};
use parking_lot::Mutex;
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Definitions, instances and their indexes over one document store.
///
/// Writes are serialized by a commit lock; reads go straight to the store
/// through the cached compiled schema.
pub struct SchemaEngine {
    config: SchemaConfig,
    store: Arc<dyn DocumentStore>,
    cache: SchemaCache,
    meta: Arc<SchemaTree>,
    pools: SlotPools,
    dispatcher: Option<Arc<dyn JobDispatcher>>,
    rules: Option<Arc<dyn RuleRegistry>>,
    references: Option<Arc<dyn ReferenceResolver>>,
    file_pointer: Option<Arc<dyn FilePointer>>,
    rng: Mutex<StdRng>,
    commit_lock: tokio::sync::Mutex<()>,
}

impl std::fmt::Debug for SchemaEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchemaEngine")
            .field("config", &self.config)
            .field("cache", &self.cache)
            .field("dispatcher", &self.dispatcher.is_some())
            .finish_non_exhaustive()
    }
}

impl SchemaEngine {
    pub fn new(config: SchemaConfig, store: Arc<dyn DocumentStore>) -> Result<Self, SchemaError> {
        config.validate()?;
        let meta = Arc::new(definition_tree(&config)?);
        Ok(Self {
            cache: SchemaCache::new(config.schema_cache_capacity),
            pools: SlotPools::from_config(&config),
            config,
            store,
            meta,
            dispatcher: None,
            rules: None,
            references: None,
            file_pointer: None,
            rng: Mutex::new(StdRng::from_entropy()),
            commit_lock: tokio::sync::Mutex::new(()),
        })
    }

    pub fn with_dispatcher(mut self, dispatcher: Arc<dyn JobDispatcher>) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    pub fn with_rules(mut self, rules: Arc<dyn RuleRegistry>) -> Self {
        self.rules = Some(rules);
        self
    }

    pub fn with_references(mut self, references: Arc<dyn ReferenceResolver>) -> Self {
        self.references = Some(references);
        self
    }

    pub fn with_file_pointer(mut self, pointer: Arc<dyn FilePointer>) -> Self {
        self.file_pointer = Some(pointer);
        self
    }

    /// Makes random slot picks reproducible.
    pub fn with_rng_seed(self, seed: u64) -> Self {
        *self.rng.lock() = StdRng::seed_from_u64(seed);
        self
    }

    pub fn config(&self) -> &SchemaConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    /// The tree definition documents are written through.
    pub fn definition_tree(&self) -> &SchemaTree {
        &self.meta
    }

    /// The compiled schema of an object, compiled from the store on a
    /// cache miss.
    pub fn compiled(&self, name: &str) -> Result<Arc<CompiledObject>, SchemaError> {
        self.cache.get_or_compile(name, || {
            let document = self.store.get_definition(name)?.ok_or_else(|| {
                SchemaError::not_found(ResourceType::Object, name, "no such object")
            })?;
            CompiledObject::compile(document, &self.config)
        })
    }

    pub fn definition(&self, name: &str) -> Result<ObjectDefinition, SchemaError> {
        Ok(self.compiled(name)?.definition.clone())
    }

    fn inject(&self, ac: &mut AccessContext) {
        if let Some(rules) = &self.rules {
            ac.rules = Arc::clone(rules);
        }
        if ac.references.is_none() {
            ac.references = self.references.clone();
        }
    }

    /// Points the context at an instance and resolves the caller's level
    /// from the object's default acl unless one was already supplied.
    fn bind(&self, ac: &mut AccessContext, compiled: &CompiledObject, subject: Option<&str>) {
        ac.object_name = compiled.name().to_string();
        if let Some(id) = subject {
            ac.subject_id = Some(id.to_string());
        }
        if ac.resolved == AccessLevel::None {
            let access = ac.resolve_access(&compiled.definition.default_acl, true);
            ac.resolved = access.allow;
            ac.instance_roles.extend(access.roles);
        }
        self.inject(ac);
    }

    fn load_instance(&self, object: &str, id: &str) -> Result<Value, SchemaError> {
        self.store
            .find_one(object, id)?
            .ok_or_else(|| SchemaError::not_found(ResourceType::Instance, id, format!("no {object} instance")))
    }

    // definitions

    /// Creates an object definition. Slots for its indexed properties are
    /// claimed before the definition is stored.
    pub async fn define_object(&self, ac: &mut AccessContext, payload: Value) -> Result<Value, SchemaError> {
        let _guard = self.commit_lock.lock().await;
        if let Some(name) = payload.get("name").and_then(Value::as_str) {
            if self.store.get_definition(name)?.is_some() {
                return Err(SchemaError::conflict("name", format!("object '{name}' already exists")));
            }
        }
        let id = new_id();
        let mut document = json!({"_id": &id});
        ac.object_name = DEFINITION_OBJECT.to_string();
        ac.subject_id = Some(id);
        self.inject(ac);
        let written = write_instance(&self.meta, ac, &mut document, payload, &WriteOptions::default(), true);
        settle(ac, written)?;
        self.commit_definition(ac, document, None)
    }

    pub async fn update_object(
        &self,
        ac: &mut AccessContext,
        name: &str,
        payload: Value,
        options: &WriteOptions,
    ) -> Result<Value, SchemaError> {
        let _guard = self.commit_lock.lock().await;
        let previous = self
            .store
            .get_definition(name)?
            .ok_or_else(|| SchemaError::not_found(ResourceType::Object, name, "no such object"))?;
        let mut document = previous.clone();
        ac.object_name = DEFINITION_OBJECT.to_string();
        ac.subject_id = id_of(&previous).map(str::to_string);
        self.inject(ac);
        let written = write_instance(&self.meta, ac, &mut document, payload, options, false);
        settle(ac, written)?;
        self.commit_definition(ac, document, Some(&previous))
    }

    fn commit_definition(
        &self,
        ac: &mut AccessContext,
        mut document: Value,
        previous: Option<&Value>,
    ) -> Result<Value, SchemaError> {
        let persisted = self.persist_definition(ac, &mut document, previous);
        settle(ac, persisted)?;
        let mut reader = AccessContext::system(DEFINITION_OBJECT, ac.principal.org.clone());
        reader.subject_id = ac.subject_id.clone();
        read_instance(&self.meta, &reader, &document, &Selection::passive())
    }

    fn persist_definition(
        &self,
        ac: &mut AccessContext,
        document: &mut Value,
        previous: Option<&Value>,
    ) -> Result<(), SchemaError> {
        let mut reindex = false;
        for effect in ac.effects.drain(Phase::Before) {
            match effect {
                Effect::UpdateIndexes { update_key } => {
                    let changed = ac.index_updates(&update_key);
                    let changes = {
                        let mut rng = self.rng.lock();
                        update_indexes(document, previous, &changed, &self.pools, &mut *rng)?
                    };
                    reindex |= changes.reindex;
                }
                other => self.run_effect(ac, other),
            }
        }
        ac.index_updates.clear();

        let compiled = CompiledObject::compile(document.clone(), &self.config)?;
        let name = compiled.name().to_string();
        if reindex {
            let job = reindex_job(
                &self.config.reindex_queue,
                &self.config.reindex_job,
                &self.config.org_id,
                &name,
                &ac.req_id,
            );
            ac.effects.schedule(
                Phase::After,
                Some(TaskKey::new(format!("after.reindex.{name}"))),
                Effect::DispatchJob(job),
            );
        }
        self.store.put_definition(document.clone())?;
        self.cache.invalidate(&name);
        let history = ac.take_history();
        if let (false, Some(id)) = (history.is_empty(), id_of(document)) {
            self.store
                .append_history(DEFINITION_OBJECT, id, history, self.config.max_history_entries)?;
        }
        info!(object = %name, reindex, "definition stored");
        for effect in ac.effects.drain(Phase::After) {
            self.run_effect(ac, effect);
        }
        Ok(())
    }

    // instances

    pub async fn create(&self, ac: &mut AccessContext, object: &str, payload: Value) -> Result<Value, SchemaError> {
        let _guard = self.commit_lock.lock().await;
        let compiled = self.compiled(object)?;
        let id = new_id();
        let mut instance = json!({"_id": &id});
        self.bind(ac, &compiled, Some(&id));
        let tree = compiled.tree_for_type(payload.get("type").and_then(Value::as_str))?;
        let written = write_instance(tree, ac, &mut instance, payload, &WriteOptions::default(), true);
        settle(ac, written)?;
        self.commit_instance(ac, &compiled, &mut instance, true)?;
        read_instance(tree, ac, &instance, &Selection::passive())
    }

    pub async fn update(
        &self,
        ac: &mut AccessContext,
        object: &str,
        id: &str,
        payload: Value,
        options: &WriteOptions,
    ) -> Result<Value, SchemaError> {
        let _guard = self.commit_lock.lock().await;
        let compiled = self.compiled(object)?;
        let mut instance = self.load_instance(object, id)?;
        self.bind(ac, &compiled, Some(id));
        let tree = compiled.tree_for(&instance)?;
        let written = write_instance(tree, ac, &mut instance, payload, options, false);
        settle(ac, written)?;
        self.commit_instance(ac, &compiled, &mut instance, false)?;
        read_instance(tree, ac, &instance, &Selection::passive())
    }

    pub fn read(
        &self,
        ac: &mut AccessContext,
        object: &str,
        id: &str,
        selection: &Selection,
    ) -> Result<Value, SchemaError> {
        let compiled = self.compiled(object)?;
        let instance = self.load_instance(object, id)?;
        self.bind(ac, &compiled, Some(id));
        read_instance(compiled.tree_for(&instance)?, ac, &instance, selection)
    }

    pub fn read_path(
        &self,
        ac: &mut AccessContext,
        object: &str,
        id: &str,
        path: &str,
    ) -> Result<Option<Value>, SchemaError> {
        let compiled = self.compiled(object)?;
        let instance = self.load_instance(object, id)?;
        self.bind(ac, &compiled, Some(id));
        read_path(compiled.tree_for(&instance)?, ac, &instance, path)
    }

    /// Removes a property or array element. Returns false when nothing was
    /// there to remove.
    pub async fn remove_path(
        &self,
        ac: &mut AccessContext,
        object: &str,
        id: &str,
        path: &str,
    ) -> Result<bool, SchemaError> {
        let _guard = self.commit_lock.lock().await;
        let compiled = self.compiled(object)?;
        let mut instance = self.load_instance(object, id)?;
        self.bind(ac, &compiled, Some(id));
        let tree = compiled.tree_for(&instance)?;
        let removed = acl_remove(tree, ac, &mut instance, path);
        let removed = settle(ac, removed)?;
        if removed {
            self.commit_instance(ac, &compiled, &mut instance, false)?;
        }
        Ok(removed)
    }

    /// Pulls matching values out of a primitive array.
    pub async fn pull(
        &self,
        ac: &mut AccessContext,
        object: &str,
        id: &str,
        path: &str,
        value: Value,
    ) -> Result<usize, SchemaError> {
        let _guard = self.commit_lock.lock().await;
        let compiled = self.compiled(object)?;
        let mut instance = self.load_instance(object, id)?;
        self.bind(ac, &compiled, Some(id));
        let tree = compiled.tree_for(&instance)?;
        let pulled = acl_pull(tree, ac, &mut instance, path, value);
        let pulled = settle(ac, pulled)?;
        if pulled > 0 {
            self.commit_instance(ac, &compiled, &mut instance, false)?;
        }
        Ok(pulled)
    }

    /// Probes the caller's access to a property, on an instance when `id`
    /// is given.
    pub fn access(
        &self,
        ac: &mut AccessContext,
        object: &str,
        id: Option<&str>,
        path: &str,
    ) -> Result<NodeAccess, SchemaError> {
        let compiled = self.compiled(object)?;
        self.bind(ac, &compiled, id);
        let tree = match id {
            Some(id) => compiled.tree_for(&self.load_instance(object, id)?)?,
            None => compiled.tree(),
        };
        acl_access(tree, ac, path)
    }

    pub fn export(&self, ac: &mut AccessContext, object: &str, id: &str) -> Result<Value, SchemaError> {
        let compiled = self.compiled(object)?;
        let instance = self.load_instance(object, id)?;
        self.bind(ac, &compiled, Some(id));
        export_instance(
            compiled.tree_for(&instance)?,
            ac,
            &instance,
            self.file_pointer.as_deref(),
        )
    }

    /// Writes an exported copy back, creating the instance under its
    /// exported `_id` when it does not exist yet.
    pub async fn import(
        &self,
        ac: &mut AccessContext,
        object: &str,
        data: Value,
        import_access: bool,
    ) -> Result<Value, SchemaError> {
        let _guard = self.commit_lock.lock().await;
        let compiled = self.compiled(object)?;
        let id = id_of(&data).map(str::to_string).unwrap_or_else(new_id);
        let existing = self.store.find_one(object, &id)?;
        let is_new = existing.is_none();
        let mut instance = existing.unwrap_or_else(|| json!({"_id": &id}));
        self.bind(ac, &compiled, Some(&id));
        let tree = compiled.tree_for(&data)?;
        let imported = import_instance(tree, ac, &mut instance, data, import_access);
        settle(ac, imported)?;
        self.commit_instance(ac, &compiled, &mut instance, is_new)?;
        read_instance(tree, ac, &instance, &Selection::passive())
    }

    pub fn history(&self, object: &str, id: &str) -> Result<Vec<HistoryEntry>, SchemaError> {
        self.store.history(object, id)
    }

    fn commit_instance(
        &self,
        ac: &mut AccessContext,
        compiled: &CompiledObject,
        instance: &mut Value,
        is_new: bool,
    ) -> Result<(), SchemaError> {
        let committed = self.persist_instance(ac, compiled, instance, is_new);
        settle(ac, committed)
    }

    fn persist_instance(
        &self,
        ac: &mut AccessContext,
        compiled: &CompiledObject,
        instance: &mut Value,
        is_new: bool,
    ) -> Result<(), SchemaError> {
        for effect in ac.effects.drain(Phase::Before) {
            self.run_effect(ac, effect);
        }
        let tree = compiled.tree_for(instance)?;
        let rebuilds = ac.take_index_rebuilds();
        if is_new {
            rebuild_indexes(tree, instance, None)?;
        } else if !rebuilds.is_empty() {
            rebuild_indexes(tree, instance, Some(&rebuilds))?;
        }

        let object = compiled.name();
        if is_new {
            self.store.insert(object, instance.clone())?;
        } else {
            self.store.replace(object, instance.clone())?;
        }
        let history = ac.take_history();
        if let (false, Some(id)) = (history.is_empty(), id_of(instance)) {
            self.store
                .append_history(object, id, history, self.config.max_history_entries)?;
        }
        debug!(object, subject = ?ac.subject_id, is_new, "instance stored");
        for effect in ac.effects.drain(Phase::After) {
            self.run_effect(ac, effect);
        }
        Ok(())
    }

    fn run_effect(&self, ac: &AccessContext, effect: Effect) {
        match effect {
            Effect::DispatchJob(job) => self.dispatch(job),
            Effect::Audit(event) => info!(
                target: "schemata::audit",
                object = %event.object,
                subject = ?event.subject,
                principal = %event.principal,
                path = %event.path,
                op = ?event.op,
                "property changed"
            ),
            Effect::CleanupFile { path, facets } => self.dispatch(cleanup_job(
                &ac.object_name,
                ac.subject_id.as_deref(),
                &path,
                &facets,
            )),
            Effect::UpdateIndexes { update_key } => {
                debug!(%update_key, "slot update outside a definition commit ignored")
            }
        }
    }

    fn dispatch(&self, job: Job) {
        let Some(dispatcher) = &self.dispatcher else {
            debug!(queue = %job.queue, job = %job.name, "no dispatcher, job dropped");
            return;
        };
        let (queue, name) = (job.queue.clone(), job.name.clone());
        if let Err(err) = dispatcher.send(job) {
            warn!(%queue, job = %name, error = %err, "job dispatch failed");
        }
    }

    // jobs

    /// Rewrites the stored index values of every instance of an object.
    pub async fn reindex(&self, object: &str) -> Result<IndexerReport, SchemaError> {
        let compiled = self.compiled(object)?;
        Indexer::new(Arc::clone(&self.store), self.config.reindex_batch_size)
            .run(&compiled)
            .await
    }

    /// Runs a job this engine knows how to handle.
    pub async fn run_job(&self, job: &Job) -> Result<IndexerReport, SchemaError> {
        if job.name != self.config.reindex_job {
            return Err(SchemaError::unsupported(job.name.clone(), "not a job this engine runs"));
        }
        let object = job
            .payload
            .get("object")
            .and_then(Value::as_str)
            .ok_or_else(|| SchemaError::invalid("object", "reindex job without an object"))?;
        self.reindex(object).await
    }
}

/// Passes a result through, clearing the context's pending commit state
/// when it is an error.
fn settle<T>(ac: &mut AccessContext, result: Result<T, SchemaError>) -> Result<T, SchemaError> {
    if result.is_err() {
        ac.reset_commit_state();
    }
    result
}
