//! At-most-once admission of sightings by id.
//!
//! The index maps every admitted sighting id to the group that owns it, so
//! both the admission check and vote routing are O(1). A given id is never
//! owned by more than one group.

use merchant_watch_protocol::SightingId;
use std::collections::HashMap;

/// Position of a group inside the store's arena.
pub type GroupKey = usize;

#[derive(Debug, Clone, Default)]
pub struct SeenIdIndex {
    entries: HashMap<SightingId, GroupKey>,
}

impl SeenIdIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true when `id` had not been admitted before. The caller must
    /// then append the sighting to `owner`; on false it must skip mutation.
    pub fn admit(&mut self, id: SightingId, owner: GroupKey) -> bool {
        match self.entries.entry(id) {
            std::collections::hash_map::Entry::Occupied(_) => false,
            std::collections::hash_map::Entry::Vacant(slot) => {
                slot.insert(owner);
                true
            }
        }
    }

    pub fn owner(&self, id: &SightingId) -> Option<GroupKey> {
        self.entries.get(id).copied()
    }

    pub fn contains(&self, id: &SightingId) -> bool {
        self.entries.contains_key(id)
    }

    pub fn forget(&mut self, id: &SightingId) {
        self.entries.remove(id);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
