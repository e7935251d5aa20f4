//! In-memory record and blind index store.
//!
//! Rows and index entries share one `parking_lot::Mutex`, so a commit is a
//! single critical section.

use std::collections::{BTreeMap, BTreeSet};

use parking_lot::Mutex;

use super::{from_millis, now_millis, BlindIndexStore, RecordStore};
use crate::blind_index::BlindToken;
use crate::error::StoreError;
use crate::record::{BlindIndexEntry, SealedRecord, StoredRecord};

/// (entity type, entity id)
type RecordKey = (String, String);
/// (entity type, entity id, index name)
type IndexKey = (String, String, String);

#[derive(Debug)]
struct IndexRow {
    id: i64,
    value: BlindToken,
    created_at: i64,
    updated_at: i64,
}

#[derive(Debug, Default)]
struct State {
    records: BTreeMap<RecordKey, StoredRecord>,
    indexes: BTreeMap<IndexKey, IndexRow>,
    next_id: i64,
}

impl State {
    fn upsert(&mut self, entity_type: &str, entity_id: &str, name: &str, token: &BlindToken) {
        let now = now_millis();
        let key = (entity_type.to_string(), entity_id.to_string(), name.to_string());
        if let Some(row) = self.indexes.get_mut(&key) {
            row.value = token.clone();
            row.updated_at = now;
            return;
        }
        self.next_id += 1;
        self.indexes.insert(
            key,
            IndexRow { id: self.next_id, value: token.clone(), created_at: now, updated_at: now },
        );
    }

    fn delete_for_entity(&mut self, entity_type: &str, entity_id: &str) -> usize {
        let before = self.indexes.len();
        self.indexes.retain(|(t, id, _), _| !(t == entity_type && id == entity_id));
        before - self.indexes.len()
    }

    fn entries<F>(&self, mut keep: F) -> Result<Vec<BlindIndexEntry>, StoreError>
    where
        F: FnMut(&IndexKey) -> bool,
    {
        self.indexes
            .iter()
            .filter(|(key, _)| keep(*key))
            .map(|((entity_type, entity_id, name), row)| {
                Ok(BlindIndexEntry {
                    id: row.id,
                    entity_type: entity_type.clone(),
                    entity_id: entity_id.clone(),
                    name: name.clone(),
                    value: row.value.clone(),
                    created_at: from_millis(row.created_at)?,
                    updated_at: from_millis(row.updated_at)?,
                })
            })
            .collect()
    }
}

/// Store holding everything in process memory. Suited to tests and
/// short-lived tools.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl BlindIndexStore for MemoryStore {
    fn upsert(
        &self,
        entity_type: &str,
        entity_id: &str,
        index_name: &str,
        token: &BlindToken,
    ) -> Result<(), StoreError> {
        self.state.lock().upsert(entity_type, entity_id, index_name, token);
        Ok(())
    }

    fn find_entity_ids(
        &self,
        entity_type: &str,
        index_name: &str,
        token: &BlindToken,
    ) -> Result<BTreeSet<String>, StoreError> {
        let state = self.state.lock();
        Ok(state
            .indexes
            .iter()
            .filter(|((t, _, name), row)| {
                t == entity_type && name == index_name && &row.value == token
            })
            .map(|((_, id, _), _)| id.clone())
            .collect())
    }

    fn delete_for_entity(&self, entity_type: &str, entity_id: &str) -> Result<usize, StoreError> {
        Ok(self.state.lock().delete_for_entity(entity_type, entity_id))
    }

    fn delete_entry(
        &self,
        entity_type: &str,
        entity_id: &str,
        index_name: &str,
    ) -> Result<bool, StoreError> {
        let key = (entity_type.to_string(), entity_id.to_string(), index_name.to_string());
        Ok(self.state.lock().indexes.remove(&key).is_some())
    }

    fn entries_for_entity(
        &self,
        entity_type: &str,
        entity_id: &str,
    ) -> Result<Vec<BlindIndexEntry>, StoreError> {
        self.state.lock().entries(|(t, id, _)| t == entity_type && id == entity_id)
    }

    fn entries_for_type(&self, entity_type: &str) -> Result<Vec<BlindIndexEntry>, StoreError> {
        self.state.lock().entries(|(t, _, _)| t == entity_type)
    }
}

impl RecordStore for MemoryStore {
    fn commit(&self, sealed: &SealedRecord) -> Result<(), StoreError> {
        let stored = &sealed.stored;
        let mut state = self.state.lock();

        state.records.insert(
            (stored.entity_type.clone(), stored.entity_id.clone()),
            stored.clone(),
        );
        for (name, token) in &sealed.index_entries {
            state.upsert(&stored.entity_type, &stored.entity_id, name, token);
        }
        for name in &sealed.cleared_indexes {
            state.indexes.remove(&(
                stored.entity_type.clone(),
                stored.entity_id.clone(),
                name.clone(),
            ));
        }
        Ok(())
    }

    fn fetch(
        &self,
        entity_type: &str,
        entity_id: &str,
    ) -> Result<Option<StoredRecord>, StoreError> {
        let key = (entity_type.to_string(), entity_id.to_string());
        Ok(self.state.lock().records.get(&key).cloned())
    }

    fn fetch_all(&self, entity_type: &str) -> Result<Vec<StoredRecord>, StoreError> {
        let state = self.state.lock();
        Ok(state
            .records
            .iter()
            .filter(|((t, _), _)| t == entity_type)
            .map(|(_, record)| record.clone())
            .collect())
    }

    fn remove(&self, entity_type: &str, entity_id: &str) -> Result<bool, StoreError> {
        let mut state = self.state.lock();
        let existed =
            state.records.remove(&(entity_type.to_string(), entity_id.to_string())).is_some();
        state.delete_for_entity(entity_type, entity_id);
        Ok(existed)
    }

    fn refresh_indexes(&self, sealed: &SealedRecord) -> Result<bool, StoreError> {
        let stored = &sealed.stored;
        let mut state = self.state.lock();

        let key = (stored.entity_type.clone(), stored.entity_id.clone());
        if state.records.get(&key).map(|current| &current.fields) != Some(&stored.fields) {
            return Ok(false);
        }
        for (name, token) in &sealed.index_entries {
            state.upsert(&stored.entity_type, &stored.entity_id, name, token);
        }
        for name in &sealed.cleared_indexes {
            state.indexes.remove(&(
                stored.entity_type.clone(),
                stored.entity_id.clone(),
                name.clone(),
            ));
        }
        Ok(true)
    }

    fn prune_orphans(&self, entity_type: &str, declared: &[&str]) -> Result<usize, StoreError> {
        let mut guard = self.state.lock();
        let state = &mut *guard;

        let before = state.indexes.len();
        let records = &state.records;
        state.indexes.retain(|(t, id, name), _| {
            t != entity_type
                || (declared.contains(&name.as_str())
                    && records.contains_key(&(t.clone(), id.clone())))
        });
        Ok(before - state.indexes.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::conformance;

    #[test]
    fn test_upsert_replaces() {
        conformance::upsert_replaces(&MemoryStore::new());
    }

    #[test]
    fn test_find_returns_all_matches() {
        conformance::find_returns_all_matches(&MemoryStore::new());
    }

    #[test]
    fn test_delete_for_entity_cascades() {
        conformance::delete_for_entity_cascades(&MemoryStore::new());
    }

    #[test]
    fn test_commit_writes_row_and_index() {
        conformance::commit_writes_row_and_index(&MemoryStore::new());
    }

    #[test]
    fn test_remove_cascades() {
        conformance::remove_cascades(&MemoryStore::new());
    }

    #[test]
    fn test_refresh_applies_to_unchanged_row() {
        conformance::refresh_applies_to_unchanged_row(&MemoryStore::new());
    }

    #[test]
    fn test_refresh_skips_changed_row() {
        conformance::refresh_skips_changed_row(&MemoryStore::new());
    }

    #[test]
    fn test_prune_removes_orphans_only() {
        conformance::prune_removes_orphans_only(&MemoryStore::new());
    }

    #[test]
    fn test_delete_entry_single() {
        conformance::delete_entry_single(&MemoryStore::new());
    }

    #[test]
    fn test_upsert_keeps_row_id() {
        let store = MemoryStore::new();
        store.upsert("Patient", "1", "first_name_index", &BlindToken::from_stored("aa")).unwrap();
        let first = store.entries_for_entity("Patient", "1").unwrap()[0].id;
        store.upsert("Patient", "1", "first_name_index", &BlindToken::from_stored("bb")).unwrap();
        assert_eq!(store.entries_for_entity("Patient", "1").unwrap()[0].id, first);
    }
}
