//! In-memory hash index mapping each key to the disk location of its most
//! recent record.
//!
//! The index is the only shared mutable structure in the store. Readers take
//! the read lock for lookups; the writer thread takes the write lock for
//! single-key inserts, and merge installs a whole replacement mapping under
//! the same lock. The index is never persisted — recovery rebuilds it from
//! the segment files on every open.

use std::collections::HashMap;
use std::sync::RwLock;

use crate::error::StoreError;

/// Location of a record on disk: which segment, and the byte offset at which
/// the record begins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotRef {
    pub segment_id: u64,
    pub offset: u64,
}

/// RwLock-guarded key → [`SlotRef`] mapping.
#[derive(Debug, Default)]
pub struct HashIndex {
    map: RwLock<HashMap<String, SlotRef>>,
}

impl HashIndex {
    pub fn new(initial: HashMap<String, SlotRef>) -> Self {
        Self {
            map: RwLock::new(initial),
        }
    }

    /// Returns the current location of `key`, if any.
    pub fn lookup(&self, key: &str) -> Result<Option<SlotRef>, StoreError> {
        let guard = self.map.read()?;
        Ok(guard.get(key).copied())
    }

    /// Points `key` at a new record location. Later writes overwrite earlier
    /// entries; superseded records stay on disk until merge reclaims them.
    pub fn insert(&self, key: &str, slot: SlotRef) -> Result<(), StoreError> {
        let mut guard = self.map.write()?;
        guard.insert(key.to_string(), slot);
        Ok(())
    }

    /// Atomically replaces the entire mapping (merge install step).
    pub fn replace_all(&self, new_map: HashMap<String, SlotRef>) -> Result<(), StoreError> {
        let mut guard = self.map.write()?;
        *guard = new_map;
        Ok(())
    }

    /// Snapshot of all entries, for merge to walk the live key set.
    pub fn snapshot(&self) -> Result<Vec<(String, SlotRef)>, StoreError> {
        let guard = self.map.read()?;
        Ok(guard.iter().map(|(k, v)| (k.clone(), *v)).collect())
    }

    /// Number of live keys.
    pub fn len(&self) -> usize {
        self.map.read().map(|g| g.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_overwrites_previous_entry() {
        let index = HashIndex::default();
        index
            .insert("a", SlotRef { segment_id: 0, offset: 0 })
            .unwrap();
        index
            .insert("a", SlotRef { segment_id: 2, offset: 64 })
            .unwrap();
        assert_eq!(
            index.lookup("a").unwrap(),
            Some(SlotRef { segment_id: 2, offset: 64 })
        );
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn lookup_missing_key_is_none() {
        let index = HashIndex::default();
        assert_eq!(index.lookup("missing").unwrap(), None);
    }

    #[test]
    fn replace_all_swaps_the_whole_mapping() {
        let index = HashIndex::default();
        index
            .insert("old", SlotRef { segment_id: 4, offset: 128 })
            .unwrap();

        let mut fresh = HashMap::new();
        fresh.insert("new".to_string(), SlotRef { segment_id: 0, offset: 0 });
        index.replace_all(fresh).unwrap();

        assert_eq!(index.lookup("old").unwrap(), None);
        assert_eq!(
            index.lookup("new").unwrap(),
            Some(SlotRef { segment_id: 0, offset: 0 })
        );
    }
}
