use crate::error::SchemaError;

/// Runtime configuration for a schema engine.
#[derive(Debug, Clone)]
pub struct SchemaConfig {
    pub index_slots: usize,
    pub unique_slots: usize,
    pub geometry_slots: usize,
    pub max_properties: usize,
    pub max_type_properties: usize,
    pub default_max_items: i64,
    pub max_definition_depth: usize,
    pub reindex_queue: String,
    pub reindex_job: String,
    pub reindex_batch_size: usize,
    pub schema_cache_capacity: usize,
    pub max_history_entries: usize,
    pub randomize_slots: bool,
    pub org_id: String,
}

impl Default for SchemaConfig {
    fn default() -> Self {
        Self {
            index_slots: 20,
            unique_slots: 5,
            geometry_slots: 3,
            max_properties: 100,
            max_type_properties: 20,
            default_max_items: 100,
            max_definition_depth: 3,
            reindex_queue: "work".to_string(),
            reindex_job: "indexer".to_string(),
            reindex_batch_size: 1000,
            schema_cache_capacity: 256,
            max_history_entries: 1000,
            randomize_slots: true,
            org_id: "default".to_string(),
        }
    }
}

impl SchemaConfig {
    pub fn production(org_id: impl Into<String>) -> Self {
        Self {
            org_id: org_id.into(),
            randomize_slots: true,
            ..Self::default()
        }
    }

    /// Smaller caches and reindex batches; slot choice stays random so that
    /// nothing comes to depend on a particular slot name.
    pub fn development() -> Self {
        Self {
            schema_cache_capacity: 16,
            reindex_batch_size: 100,
            max_history_entries: 100,
            ..Self::default()
        }
    }

    pub fn with_slot_pools(mut self, index: usize, unique: usize, geometry: usize) -> Self {
        self.index_slots = index;
        self.unique_slots = unique;
        self.geometry_slots = geometry;
        self
    }

    pub fn with_max_properties(mut self, max_properties: usize) -> Self {
        self.max_properties = max_properties;
        self
    }

    pub fn with_reindex_batch_size(mut self, batch: usize) -> Self {
        self.reindex_batch_size = batch;
        self
    }

    pub fn with_schema_cache_capacity(mut self, capacity: usize) -> Self {
        self.schema_cache_capacity = capacity;
        self
    }

    pub fn with_randomized_slots(mut self, randomize: bool) -> Self {
        self.randomize_slots = randomize;
        self
    }

    pub fn validate(&self) -> Result<(), SchemaError> {
        if self.index_slots == 0 || self.unique_slots == 0 || self.geometry_slots == 0 {
            return Err(SchemaError::InvalidConfig {
                message: "slot pools must each hold at least one slot".into(),
            });
        }
        if self.max_properties == 0 {
            return Err(SchemaError::InvalidConfig {
                message: "max_properties must be greater than zero".into(),
            });
        }
        if self.max_definition_depth == 0 {
            return Err(SchemaError::InvalidConfig {
                message: "max_definition_depth must be greater than zero".into(),
            });
        }
        if self.reindex_batch_size == 0 {
            return Err(SchemaError::InvalidConfig {
                message: "reindex_batch_size must be greater than zero".into(),
            });
        }
        if self.schema_cache_capacity == 0 {
            return Err(SchemaError::InvalidConfig {
                message: "schema_cache_capacity must be greater than zero".into(),
            });
        }
        if self.reindex_queue.is_empty() || self.reindex_job.is_empty() {
            return Err(SchemaError::InvalidConfig {
                message: "reindex queue and job names are required".into(),
            });
        }
        Ok(())
    }
}
