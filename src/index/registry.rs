//! Slot assignment for the properties of one object definition.
//!
//! Writers of a property's `indexed`/`unique` flags register the property
//! here. The registration schedules one `Before` effect per container; when
//! it runs, [`update_indexes`] frees slots whose property no longer
//! qualifies and claims slots for changed properties that need one.

use crate::access::AccessContext;
use crate::effects::{Effect, Phase, TaskKey};
use crate::error::SchemaError;
use crate::index::slots::{IndexSlot, SlotPool, SlotPools};
use compact_str::CompactString;
use rand::Rng;
use serde_json::{Map, Value};
use std::collections::{BTreeSet, HashMap};
use tracing::debug;

pub const UPDATE_KEY_PREFIX: &str = "$idxUpdates.properties";

/// Definition keys that can hold property documents.
const PROPERTY_CONTAINERS: [&str; 3] = ["properties", "documents", "objectTypes"];

pub fn update_key(container_id: &str) -> String {
    format!("{UPDATE_KEY_PREFIX}.{container_id}")
}

/// Records that a property's indexing changed and schedules the slot
/// rebuild for its container, once per commit.
pub fn register_index_update(ac: &mut AccessContext, container_id: &str, property_id: &str) {
    let key = update_key(container_id);
    ac.index_updates
        .entry(key.clone())
        .or_default()
        .insert(property_id.to_string());
    ac.effects.schedule(
        Phase::Before,
        Some(TaskKey::new(format!("before.{key}"))),
        Effect::UpdateIndexes { update_key: key },
    );
}

/// Every property document of a definition, keyed by `_id`. Only the keys
/// that can hold property documents are walked.
pub fn property_documents(definition: &Value) -> HashMap<&str, &Map<String, Value>> {
    fn visit<'a>(value: &'a Value, out: &mut HashMap<&'a str, &'a Map<String, Value>>) {
        let Value::Object(map) = value else {
            return;
        };
        for key in PROPERTY_CONTAINERS {
            let Some(Value::Array(items)) = map.get(key) else {
                continue;
            };
            for item in items {
                if key == "properties" {
                    if let (Some(id), Value::Object(prop)) = (item.get("_id").and_then(Value::as_str), item) {
                        out.insert(id, prop);
                    }
                }
                visit(item, out);
            }
        }
    }
    let mut out = HashMap::new();
    visit(definition, &mut out);
    out
}

fn flag(prop: &Map<String, Value>, key: &str) -> bool {
    prop.get(key).and_then(Value::as_bool).unwrap_or(false)
}

/// The pool a property needs a slot from, or `None` when it needs none.
fn wanted_pool(prop: &Map<String, Value>) -> Option<SlotPool> {
    if !flag(prop, "indexed") {
        return None;
    }
    match prop.get("type").and_then(Value::as_str) {
        Some("Geometry") => Some(SlotPool::Geometry),
        Some("Document" | "Set" | "File") => None,
        _ if flag(prop, "unique") => Some(SlotPool::Unique),
        _ => Some(SlotPool::Index),
    }
}

fn fits(slot: &IndexSlot, pool: Option<SlotPool>) -> bool {
    pool.is_some_and(|pool| slot.pool() == Some(pool) && slot.unique == (pool == SlotPool::Unique))
}

pub fn read_slots(definition: &Value) -> Result<Vec<IndexSlot>, SchemaError> {
    match definition.get("slots") {
        Some(slots @ Value::Array(_)) => {
            serde_json::from_value(slots.clone()).map_err(|e| SchemaError::Decode(e.to_string()))
        }
        _ => Ok(Vec::new()),
    }
}

/// What a slot rebuild changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SlotChanges {
    pub freed: Vec<IndexSlot>,
    pub claimed: Vec<IndexSlot>,
    /// Stored instances hold stale index values and need a reindex.
    pub reindex: bool,
}

impl SlotChanges {
    pub fn is_empty(&self) -> bool {
        self.freed.is_empty() && self.claimed.is_empty()
    }
}

/// Rebuilds the `slots` array of a definition document.
///
/// `previous` is the definition as last persisted; properties absent from
/// it are new, and their claims do not call for a reindex.
pub fn update_indexes<R: Rng + ?Sized>(
    definition: &mut Value,
    previous: Option<&Value>,
    changed: &[String],
    pools: &SlotPools,
    rng: &mut R,
) -> Result<SlotChanges, SchemaError> {
    let slots = read_slots(definition)?;
    let wanted: HashMap<String, Option<SlotPool>> = property_documents(definition)
        .into_iter()
        .map(|(id, prop)| (id.to_string(), wanted_pool(prop)))
        .collect();
    let persisted: BTreeSet<String> = previous
        .map(|prev| property_documents(prev).into_keys().map(str::to_string).collect())
        .unwrap_or_default();

    let mut changes = SlotChanges::default();
    let mut freed_names: BTreeSet<CompactString> = BTreeSet::new();
    let mut live = Vec::with_capacity(slots.len());
    for slot in slots {
        if fits(&slot, wanted.get(&slot.id).copied().flatten()) {
            live.push(slot);
        } else {
            debug!(slot = %slot.name, property = %slot.id, "index slot freed");
            freed_names.insert(slot.name.clone());
            changes.freed.push(slot);
        }
    }

    let mut seen = BTreeSet::new();
    for property_id in changed {
        if !seen.insert(property_id.as_str()) {
            continue;
        }
        let Some(pool) = wanted.get(property_id).copied().flatten() else {
            continue;
        };
        if let Some(pos) = live.iter().position(|s| &s.id == property_id) {
            if fits(&live[pos], Some(pool)) {
                continue;
            }
            let slot = live.remove(pos);
            freed_names.insert(slot.name.clone());
            changes.freed.push(slot);
        }
        let used: BTreeSet<CompactString> = live.iter().map(|s| s.name.clone()).collect();
        let name = pools.find_slot(&used, &freed_names, pool, rng)?;
        debug!(slot = %name, property = %property_id, "index slot claimed");
        let slot = IndexSlot::new(property_id.clone(), pool == SlotPool::Unique, name);
        if persisted.contains(property_id) {
            changes.reindex = true;
        }
        live.push(slot.clone());
        changes.claimed.push(slot);
    }
    if !changes.freed.is_empty() {
        changes.reindex = true;
    }

    if !changes.is_empty() {
        let encoded = serde_json::to_value(&live).map_err(|e| SchemaError::Encode(e.to_string()))?;
        if let Value::Object(map) = definition {
            map.insert("slots".into(), encoded);
        }
    }
    Ok(changes)
}
