//! Persistence of sealed records and their blind index entries.
//!
//! The blind index table is derived state: each row is `(entity_type,
//! entity_id, name, value)` with at most one row per `(entity_type,
//! entity_id, name)`. [`RecordStore::commit`] writes a record row and its
//! index changes as one atomic unit so concurrent saves of the same record
//! can never leave a token that matches neither final value.

mod memory;
#[cfg(feature = "sqlite")]
mod sqlite;

pub use memory::MemoryStore;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;

use crate::blind_index::BlindToken;
use crate::error::StoreError;
use crate::record::{BlindIndexEntry, SealedRecord, StoredRecord};
use chrono::{DateTime, TimeZone, Utc};
use std::collections::BTreeSet;

/// Storage for blind index entries.
pub trait BlindIndexStore: Send + Sync {
    /// Inserts or replaces the entry for `(entity_type, entity_id, index_name)`.
    ///
    /// # Errors
    ///
    /// Returns a `StoreError` if the backend fails.
    fn upsert(
        &self,
        entity_type: &str,
        entity_id: &str,
        index_name: &str,
        token: &BlindToken,
    ) -> Result<(), StoreError>;

    /// Returns every entity id whose entry for `index_name` equals `token`.
    ///
    /// Several ids may match; tokens are a candidate filter, not proof of equality.
    ///
    /// # Errors
    ///
    /// Returns a `StoreError` if the backend fails.
    fn find_entity_ids(
        &self,
        entity_type: &str,
        index_name: &str,
        token: &BlindToken,
    ) -> Result<BTreeSet<String>, StoreError>;

    /// Removes all entries of one entity and returns how many were removed.
    ///
    /// # Errors
    ///
    /// Returns a `StoreError` if the backend fails.
    fn delete_for_entity(&self, entity_type: &str, entity_id: &str) -> Result<usize, StoreError>;

    /// Removes a single entry. Returns `false` if it did not exist.
    ///
    /// # Errors
    ///
    /// Returns a `StoreError` if the backend fails.
    fn delete_entry(
        &self,
        entity_type: &str,
        entity_id: &str,
        index_name: &str,
    ) -> Result<bool, StoreError>;

    /// Lists the entries of one entity ordered by index name.
    ///
    /// # Errors
    ///
    /// Returns a `StoreError` if the backend fails.
    fn entries_for_entity(
        &self,
        entity_type: &str,
        entity_id: &str,
    ) -> Result<Vec<BlindIndexEntry>, StoreError>;

    /// Lists all entries of an entity type ordered by entity id, then index name.
    ///
    /// # Errors
    ///
    /// Returns a `StoreError` if the backend fails.
    fn entries_for_type(&self, entity_type: &str) -> Result<Vec<BlindIndexEntry>, StoreError>;
}

/// Storage for sealed record rows together with their blind indexes.
pub trait RecordStore: BlindIndexStore {
    /// Writes the row, upserts its index entries and removes cleared ones in
    /// a single transaction.
    ///
    /// # Errors
    ///
    /// Returns a `StoreError` if the backend fails; nothing is written then.
    fn commit(&self, sealed: &SealedRecord) -> Result<(), StoreError>;

    /// Loads one row.
    ///
    /// # Errors
    ///
    /// Returns a `StoreError` if the backend fails.
    fn fetch(&self, entity_type: &str, entity_id: &str)
        -> Result<Option<StoredRecord>, StoreError>;

    /// Loads every row of an entity type ordered by entity id.
    ///
    /// # Errors
    ///
    /// Returns a `StoreError` if the backend fails.
    fn fetch_all(&self, entity_type: &str) -> Result<Vec<StoredRecord>, StoreError>;

    /// Deletes a row and all of its index entries in one transaction.
    /// Returns `false` if the row did not exist.
    ///
    /// # Errors
    ///
    /// Returns a `StoreError` if the backend fails.
    fn remove(&self, entity_type: &str, entity_id: &str) -> Result<bool, StoreError>;

    /// Applies `sealed`'s index changes without touching the row, provided
    /// the row still holds exactly `sealed.stored.fields`. The check and the
    /// writes happen in one transaction. Returns `false`, writing nothing,
    /// when the row was changed or removed since it was read.
    ///
    /// # Errors
    ///
    /// Returns a `StoreError` if the backend fails.
    fn refresh_indexes(&self, sealed: &SealedRecord) -> Result<bool, StoreError>;

    /// Deletes, in one transaction, every entry of `entity_type` whose row no
    /// longer exists or whose index name is not in `declared`. Returns how
    /// many entries were removed.
    ///
    /// # Errors
    ///
    /// Returns a `StoreError` if the backend fails.
    fn prune_orphans(&self, entity_type: &str, declared: &[&str]) -> Result<usize, StoreError>;
}

pub(crate) fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

pub(crate) fn from_millis(ms: i64) -> Result<DateTime<Utc>, StoreError> {
    Utc.timestamp_millis_opt(ms).single().ok_or(StoreError::InvalidTimestamp(ms))
}

#[cfg(test)]
pub(crate) mod conformance {
    //! Behaviour every store backend must share.

    use super::*;
    use crate::record::FieldMap;

    fn token(s: &str) -> BlindToken {
        BlindToken::from_stored(s)
    }

    fn sealed(id: &str, first: Option<&str>) -> SealedRecord {
        let mut fields = FieldMap::new();
        fields.insert("first_name".to_string(), first.map(|_| "ciphertext".to_string()));
        let (index_entries, cleared_indexes) = match first {
            Some(t) => (vec![("first_name_index".to_string(), token(t))], vec![]),
            None => (vec![], vec!["first_name_index".to_string()]),
        };
        SealedRecord {
            stored: StoredRecord {
                entity_type: "Patient".to_string(),
                entity_id: id.to_string(),
                fields,
            },
            index_entries,
            cleared_indexes,
        }
    }

    pub fn upsert_replaces(store: &dyn RecordStore) {
        store.upsert("Patient", "1", "first_name_index", &token("aa")).unwrap();
        store.upsert("Patient", "1", "first_name_index", &token("bb")).unwrap();

        let entries = store.entries_for_entity("Patient", "1").unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].value, token("bb"));
        assert!(entries[0].updated_at >= entries[0].created_at);
        assert!(store.find_entity_ids("Patient", "first_name_index", &token("aa")).unwrap().is_empty());
    }

    pub fn find_returns_all_matches(store: &dyn RecordStore) {
        store.upsert("Patient", "1", "first_name_index", &token("aa")).unwrap();
        store.upsert("Patient", "2", "first_name_index", &token("aa")).unwrap();
        store.upsert("Patient", "3", "first_name_index", &token("cc")).unwrap();
        store.upsert("Staff", "4", "first_name_index", &token("aa")).unwrap();
        store.upsert("Patient", "5", "last_name_index", &token("aa")).unwrap();

        let ids = store.find_entity_ids("Patient", "first_name_index", &token("aa")).unwrap();
        assert_eq!(ids.into_iter().collect::<Vec<_>>(), vec!["1", "2"]);
    }

    pub fn delete_for_entity_cascades(store: &dyn RecordStore) {
        store.upsert("Patient", "1", "first_name_index", &token("aa")).unwrap();
        store.upsert("Patient", "1", "last_name_index", &token("bb")).unwrap();
        store.upsert("Patient", "2", "first_name_index", &token("aa")).unwrap();

        assert_eq!(store.delete_for_entity("Patient", "1").unwrap(), 2);
        assert!(store.entries_for_entity("Patient", "1").unwrap().is_empty());
        assert_eq!(store.entries_for_type("Patient").unwrap().len(), 1);
    }

    pub fn commit_writes_row_and_index(store: &dyn RecordStore) {
        store.commit(&sealed("1", Some("aa"))).unwrap();
        store.commit(&sealed("1", Some("aa"))).unwrap();

        assert!(store.fetch("Patient", "1").unwrap().is_some());
        assert_eq!(store.entries_for_entity("Patient", "1").unwrap().len(), 1);

        store.commit(&sealed("1", None)).unwrap();
        assert!(store.entries_for_entity("Patient", "1").unwrap().is_empty());
        assert_eq!(store.fetch("Patient", "1").unwrap().unwrap().fields["first_name"], None);
    }

    pub fn remove_cascades(store: &dyn RecordStore) {
        store.commit(&sealed("1", Some("aa"))).unwrap();
        store.commit(&sealed("2", Some("aa"))).unwrap();

        assert!(store.remove("Patient", "1").unwrap());
        assert!(!store.remove("Patient", "1").unwrap());
        assert!(store.fetch("Patient", "1").unwrap().is_none());
        assert!(store.entries_for_entity("Patient", "1").unwrap().is_empty());

        let all = store.fetch_all("Patient").unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].entity_id, "2");
    }

    pub fn refresh_applies_to_unchanged_row(store: &dyn RecordStore) {
        store.commit(&sealed("1", Some("aa"))).unwrap();
        store.delete_entry("Patient", "1", "first_name_index").unwrap();

        assert!(store.refresh_indexes(&sealed("1", Some("aa"))).unwrap());
        let entries = store.entries_for_entity("Patient", "1").unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].value, token("aa"));
    }

    pub fn refresh_skips_changed_row(store: &dyn RecordStore) {
        let read = sealed("1", Some("aa"));
        store.commit(&read).unwrap();

        let mut newer = sealed("1", Some("bb"));
        newer.stored.fields.insert("first_name".to_string(), Some("other ciphertext".to_string()));
        store.commit(&newer).unwrap();

        assert!(!store.refresh_indexes(&read).unwrap());
        assert_eq!(store.fetch("Patient", "1").unwrap(), Some(newer.stored));
        let entries = store.entries_for_entity("Patient", "1").unwrap();
        assert_eq!(entries[0].value, token("bb"));

        store.remove("Patient", "1").unwrap();
        assert!(!store.refresh_indexes(&read).unwrap());
        assert!(store.entries_for_entity("Patient", "1").unwrap().is_empty());
    }

    pub fn prune_removes_orphans_only(store: &dyn RecordStore) {
        store.commit(&sealed("1", Some("aa"))).unwrap();
        store.upsert("Patient", "1", "legacy_index", &token("cc")).unwrap();
        store.upsert("Patient", "9", "first_name_index", &token("dd")).unwrap();
        store.upsert("Staff", "9", "badge_idx", &token("ee")).unwrap();

        assert_eq!(store.prune_orphans("Patient", &["first_name_index"]).unwrap(), 2);
        let left = store.entries_for_type("Patient").unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!((left[0].entity_id.as_str(), left[0].name.as_str()), ("1", "first_name_index"));
        assert_eq!(store.entries_for_type("Staff").unwrap().len(), 1);

        assert_eq!(store.prune_orphans("Patient", &[]).unwrap(), 1);
        assert!(store.entries_for_type("Patient").unwrap().is_empty());
    }

    pub fn delete_entry_single(store: &dyn RecordStore) {
        store.upsert("Patient", "1", "first_name_index", &token("aa")).unwrap();
        assert!(store.delete_entry("Patient", "1", "first_name_index").unwrap());
        assert!(!store.delete_entry("Patient", "1", "first_name_index").unwrap());
    }
}
