use crate::config::SchemaConfig;
use crate::error::SchemaError;
use compact_str::{CompactString, format_compact};
use rand::Rng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::collections::BTreeSet;

pub const INDEX_CAPACITY_MESSAGE: &str = "No more indexes are available.";
pub const UNIQUE_CAPACITY_MESSAGE: &str = "No more unique indexes are available.";
pub const GEOMETRY_CAPACITY_MESSAGE: &str = "No more geospatial indexes are available";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SlotPool {
    Index,
    Unique,
    Geometry,
}

impl SlotPool {
    pub fn prefix(self) -> char {
        match self {
            SlotPool::Index => 'i',
            SlotPool::Unique => 'u',
            SlotPool::Geometry => 'g',
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SlotPool::Index => "index",
            SlotPool::Unique => "unique",
            SlotPool::Geometry => "geometry",
        }
    }

    fn capacity_message(self) -> &'static str {
        match self {
            SlotPool::Index => INDEX_CAPACITY_MESSAGE,
            SlotPool::Unique => UNIQUE_CAPACITY_MESSAGE,
            SlotPool::Geometry => GEOMETRY_CAPACITY_MESSAGE,
        }
    }

    pub fn of_name(name: &str) -> Option<SlotPool> {
        match name.chars().next()? {
            'i' => Some(SlotPool::Index),
            'u' => Some(SlotPool::Unique),
            'g' => Some(SlotPool::Geometry),
            _ => None,
        }
    }
}

/// A binding of one physical slot to the logical property sharing its `_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexSlot {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(default)]
    pub unique: bool,
    pub name: CompactString,
}

impl IndexSlot {
    pub fn new(id: impl Into<String>, unique: bool, name: impl Into<CompactString>) -> Self {
        Self {
            id: id.into(),
            unique,
            name: name.into(),
        }
    }

    pub fn pool(&self) -> Option<SlotPool> {
        SlotPool::of_name(&self.name)
    }
}

/// The three fixed, disjoint slot name pools of an indexable scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotPools {
    index: SmallVec<[CompactString; 24]>,
    unique: SmallVec<[CompactString; 8]>,
    geometry: SmallVec<[CompactString; 4]>,
    randomize: bool,
}

impl SlotPools {
    pub fn new(index: usize, unique: usize, geometry: usize) -> Self {
        let names = |pool: SlotPool, n: usize| {
            (1..=n).map(move |i| format_compact!("{}{}", pool.prefix(), i))
        };
        Self {
            index: names(SlotPool::Index, index).collect(),
            unique: names(SlotPool::Unique, unique).collect(),
            geometry: names(SlotPool::Geometry, geometry).collect(),
            randomize: true,
        }
    }

    pub fn from_config(config: &SchemaConfig) -> Self {
        let mut pools = Self::new(config.index_slots, config.unique_slots, config.geometry_slots);
        pools.randomize = config.randomize_slots;
        pools
    }

    pub fn names(&self, pool: SlotPool) -> &[CompactString] {
        match pool {
            SlotPool::Index => &self.index,
            SlotPool::Unique => &self.unique,
            SlotPool::Geometry => &self.geometry,
        }
    }

    pub fn all_names(&self) -> impl Iterator<Item = &CompactString> {
        self.index.iter().chain(&self.unique).chain(&self.geometry)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.all_names().any(|n| n == name)
    }

    /// Picks a free slot from `pool`. Slots nobody vacated during the
    /// current pass are preferred; ties are broken at random unless the
    /// pools were configured deterministic, in which case the lowest
    /// numbered candidate wins.
    pub fn find_slot<R: Rng + ?Sized>(
        &self,
        used: &BTreeSet<CompactString>,
        freed: &BTreeSet<CompactString>,
        pool: SlotPool,
        rng: &mut R,
    ) -> Result<CompactString, SchemaError> {
        let free: SmallVec<[&CompactString; 24]> = self
            .names(pool)
            .iter()
            .filter(|name| !used.contains(*name))
            .collect();
        if free.is_empty() {
            return Err(SchemaError::CapacityExceeded {
                pool: pool.as_str().to_string(),
                message: pool.capacity_message().to_string(),
            });
        }
        let fresh: SmallVec<[&CompactString; 24]> = free
            .iter()
            .copied()
            .filter(|name| !freed.contains(*name))
            .collect();
        let candidates = if fresh.is_empty() { &free } else { &fresh };
        let chosen = if self.randomize {
            candidates.choose(rng)
        } else {
            candidates.first()
        };
        chosen
            .map(|name| (*name).clone())
            .ok_or_else(|| SchemaError::CapacityExceeded {
                pool: pool.as_str().to_string(),
                message: pool.capacity_message().to_string(),
            })
    }
}

impl Default for SlotPools {
    fn default() -> Self {
        Self::from_config(&SchemaConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn names(items: &[&str]) -> BTreeSet<CompactString> {
        items.iter().map(|s| CompactString::from(*s)).collect()
    }

    #[test]
    fn pools_are_named_by_prefix() {
        let pools = SlotPools::new(2, 1, 1);
        let all: Vec<&str> = pools.all_names().map(|n| n.as_str()).collect();
        assert_eq!(all, vec!["i1", "i2", "u1", "g1"]);
        assert_eq!(SlotPool::of_name("u3"), Some(SlotPool::Unique));
    }

    #[test]
    fn exhausted_pool_reports_its_own_message() {
        let pools = SlotPools::new(1, 1, 1);
        let mut rng = StdRng::seed_from_u64(7);
        let err = pools
            .find_slot(&names(&["u1"]), &BTreeSet::new(), SlotPool::Unique, &mut rng)
            .unwrap_err();
        assert_eq!(err.code_str(), "capacity_exceeded");
        assert_eq!(err.to_string(), UNIQUE_CAPACITY_MESSAGE);
        let err = pools
            .find_slot(&names(&["g1"]), &BTreeSet::new(), SlotPool::Geometry, &mut rng)
            .unwrap_err();
        assert_eq!(err.to_string(), GEOMETRY_CAPACITY_MESSAGE);
    }

    #[test]
    fn just_freed_slots_are_used_last() {
        let pools = SlotPools::new(3, 0, 0);
        let mut rng = StdRng::seed_from_u64(1);
        for _ in 0..32 {
            let slot = pools
                .find_slot(&names(&["i1"]), &names(&["i2"]), SlotPool::Index, &mut rng)
                .unwrap();
            assert_eq!(slot, "i3");
        }
        let slot = pools
            .find_slot(&names(&["i1", "i3"]), &names(&["i2"]), SlotPool::Index, &mut rng)
            .unwrap();
        assert_eq!(slot, "i2");
    }

    proptest! {
        #[test]
        fn chosen_slot_is_always_free(used_mask in 0u32..(1 << 20), seed in any::<u64>()) {
            let pools = SlotPools::new(20, 5, 3);
            let used: BTreeSet<CompactString> = (1..=20)
                .filter(|i| used_mask & (1 << (i - 1)) != 0)
                .map(|i| format_compact!("i{i}"))
                .collect();
            let mut rng = StdRng::seed_from_u64(seed);
            match pools.find_slot(&used, &BTreeSet::new(), SlotPool::Index, &mut rng) {
                Ok(slot) => {
                    prop_assert!(!used.contains(&slot));
                    prop_assert!(pools.names(SlotPool::Index).contains(&slot));
                }
                Err(err) => {
                    prop_assert_eq!(used.len(), 20);
                    prop_assert_eq!(err.to_string(), INDEX_CAPACITY_MESSAGE);
                }
            }
        }
    }
}
