// 🔍 Entity Name Cache - one county/state row per distinct name
//
// Lives for exactly one reconciliation pass. Every name resolved during the
// pass is remembered together with the row id it resolved to, so two
// postcodes mapping to the same county name always end up on the identical
// row, even when that row was created earlier in the same transaction.

use crate::entities::HierarchyLevel;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Resolution {
    /// Name seen before in this pass
    Cached,
    /// Location already referenced a row with this name
    Current,
    /// Row with this name found in the store
    Existing,
    /// Unnamed placeholder of the location got the name
    Claimed,
    /// New row inserted
    Created,
}

#[derive(Debug, Default)]
pub struct EntityNameCache {
    ids: HashMap<(HierarchyLevel, String), i64>,
    /// Placeholders named during this pass
    claimed: HashSet<(HierarchyLevel, i64)>,
}

impl EntityNameCache {
    pub fn new() -> Self {
        EntityNameCache::default()
    }

    pub fn get(&self, level: HierarchyLevel, name: &str) -> Option<i64> {
        self.ids.get(&(level, name.to_string())).copied()
    }

    /// Remember `id` for `name`. The first id stored for a name wins.
    pub fn remember(&mut self, level: HierarchyLevel, name: &str, id: i64) -> i64 {
        *self.ids.entry((level, name.to_string())).or_insert(id)
    }

    /// Mark a placeholder row as named in this pass.
    /// False if it was already claimed (shared placeholder).
    pub fn claim(&mut self, level: HierarchyLevel, id: i64) -> bool {
        self.claimed.insert((level, id))
    }
}
