//! SQLite record and blind index store.
//!
//! Tables:
//!
//! ```sql
//! wardseal_records (entity_type, entity_id, fields, created_at, updated_at)
//!     PRIMARY KEY (entity_type, entity_id)
//! blind_indexes (id, entity_type, entity_id, name, value, created_at, updated_at)
//!     UNIQUE (entity_type, entity_id, name)
//!     INDEX blind_indexes_lookup (entity_type, name, value)
//! ```
//!
//! Timestamps are Unix milliseconds. `fields` is the JSON-encoded field map.

use std::collections::BTreeSet;
use std::path::Path;

use parking_lot::Mutex;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};

use super::{from_millis, now_millis, BlindIndexStore, RecordStore};
use crate::blind_index::BlindToken;
use crate::error::StoreError;
use crate::record::{BlindIndexEntry, FieldMap, SealedRecord, StoredRecord};

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS wardseal_records (
        entity_type TEXT NOT NULL,
        entity_id   TEXT NOT NULL,
        fields      TEXT NOT NULL,
        created_at  INTEGER NOT NULL,
        updated_at  INTEGER NOT NULL,
        PRIMARY KEY (entity_type, entity_id)
    );
    CREATE TABLE IF NOT EXISTS blind_indexes (
        id          INTEGER PRIMARY KEY AUTOINCREMENT,
        entity_type TEXT NOT NULL,
        entity_id   TEXT NOT NULL,
        name        TEXT NOT NULL,
        value       TEXT NOT NULL,
        created_at  INTEGER NOT NULL,
        updated_at  INTEGER NOT NULL,
        UNIQUE (entity_type, entity_id, name)
    );
    CREATE INDEX IF NOT EXISTS blind_indexes_lookup
        ON blind_indexes (entity_type, name, value);
";

const UPSERT_INDEX: &str = "
    INSERT INTO blind_indexes (entity_type, entity_id, name, value, created_at, updated_at)
    VALUES (?1, ?2, ?3, ?4, ?5, ?5)
    ON CONFLICT (entity_type, entity_id, name)
    DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
";

const UPSERT_RECORD: &str = "
    INSERT INTO wardseal_records (entity_type, entity_id, fields, created_at, updated_at)
    VALUES (?1, ?2, ?3, ?4, ?4)
    ON CONFLICT (entity_type, entity_id)
    DO UPDATE SET fields = excluded.fields, updated_at = excluded.updated_at
";

const DELETE_ENTRY: &str =
    "DELETE FROM blind_indexes WHERE entity_type = ?1 AND entity_id = ?2 AND name = ?3";

const DELETE_FOR_ENTITY: &str =
    "DELETE FROM blind_indexes WHERE entity_type = ?1 AND entity_id = ?2";

const SELECT_FIELDS: &str =
    "SELECT fields FROM wardseal_records WHERE entity_type = ?1 AND entity_id = ?2";

const SELECT_ENTRIES: &str =
    "SELECT id, entity_type, entity_id, name, value, created_at, updated_at FROM blind_indexes";

type RawEntry = (i64, String, String, String, String, i64, i64);

fn to_entry(raw: RawEntry) -> Result<BlindIndexEntry, StoreError> {
    let (id, entity_type, entity_id, name, value, created_at, updated_at) = raw;
    Ok(BlindIndexEntry {
        id,
        entity_type,
        entity_id,
        name,
        value: BlindToken::from_stored(value),
        created_at: from_millis(created_at)?,
        updated_at: from_millis(updated_at)?,
    })
}

/// Store backed by a single SQLite connection.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Opens (or creates) a database file and ensures the tables exist.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Sqlite` if the file cannot be opened or migrated.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        Self::from_connection(Connection::open(path)?)
    }

    /// Opens a private in-memory database.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Sqlite` if SQLite fails to initialize.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    /// Wraps an existing connection and ensures the tables exist.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Sqlite` if the schema cannot be created.
    pub fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    fn select_entries(
        &self,
        clause: &str,
        params: &[&dyn rusqlite::ToSql],
    ) -> Result<Vec<BlindIndexEntry>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(&format!("{SELECT_ENTRIES} {clause}"))?;
        let raw = stmt
            .query_map(params, |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                    row.get(5)?,
                    row.get(6)?,
                ))
            })?
            .collect::<Result<Vec<RawEntry>, _>>()?;
        raw.into_iter().map(to_entry).collect()
    }
}

impl BlindIndexStore for SqliteStore {
    fn upsert(
        &self,
        entity_type: &str,
        entity_id: &str,
        index_name: &str,
        token: &BlindToken,
    ) -> Result<(), StoreError> {
        self.conn.lock().execute(
            UPSERT_INDEX,
            params![entity_type, entity_id, index_name, token.as_str(), now_millis()],
        )?;
        Ok(())
    }

    fn find_entity_ids(
        &self,
        entity_type: &str,
        index_name: &str,
        token: &BlindToken,
    ) -> Result<BTreeSet<String>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT entity_id FROM blind_indexes WHERE entity_type = ?1 AND name = ?2 AND value = ?3",
        )?;
        let ids = stmt
            .query_map(params![entity_type, index_name, token.as_str()], |row| row.get(0))?
            .collect::<Result<BTreeSet<String>, _>>()?;
        Ok(ids)
    }

    fn delete_for_entity(&self, entity_type: &str, entity_id: &str) -> Result<usize, StoreError> {
        Ok(self.conn.lock().execute(DELETE_FOR_ENTITY, params![entity_type, entity_id])?)
    }

    fn delete_entry(
        &self,
        entity_type: &str,
        entity_id: &str,
        index_name: &str,
    ) -> Result<bool, StoreError> {
        let removed =
            self.conn.lock().execute(DELETE_ENTRY, params![entity_type, entity_id, index_name])?;
        Ok(removed > 0)
    }

    fn entries_for_entity(
        &self,
        entity_type: &str,
        entity_id: &str,
    ) -> Result<Vec<BlindIndexEntry>, StoreError> {
        self.select_entries(
            "WHERE entity_type = ?1 AND entity_id = ?2 ORDER BY name",
            params![entity_type, entity_id],
        )
    }

    fn entries_for_type(&self, entity_type: &str) -> Result<Vec<BlindIndexEntry>, StoreError> {
        self.select_entries("WHERE entity_type = ?1 ORDER BY entity_id, name", params![entity_type])
    }
}

impl RecordStore for SqliteStore {
    fn commit(&self, sealed: &SealedRecord) -> Result<(), StoreError> {
        let stored = &sealed.stored;
        let fields = serde_json::to_string(&stored.fields)?;
        let now = now_millis();

        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        tx.execute(UPSERT_RECORD, params![stored.entity_type, stored.entity_id, fields, now])?;
        for (name, token) in &sealed.index_entries {
            tx.execute(
                UPSERT_INDEX,
                params![stored.entity_type, stored.entity_id, name, token.as_str(), now],
            )?;
        }
        for name in &sealed.cleared_indexes {
            tx.execute(DELETE_ENTRY, params![stored.entity_type, stored.entity_id, name])?;
        }
        tx.commit()?;
        Ok(())
    }

    fn fetch(
        &self,
        entity_type: &str,
        entity_id: &str,
    ) -> Result<Option<StoredRecord>, StoreError> {
        let fields: Option<String> = self
            .conn
            .lock()
            .query_row(SELECT_FIELDS, params![entity_type, entity_id], |row| row.get(0))
            .optional()?;

        fields
            .map(|json| -> Result<StoredRecord, StoreError> {
                Ok(StoredRecord {
                    entity_type: entity_type.to_string(),
                    entity_id: entity_id.to_string(),
                    fields: serde_json::from_str::<FieldMap>(&json)?,
                })
            })
            .transpose()
    }

    fn fetch_all(&self, entity_type: &str) -> Result<Vec<StoredRecord>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT entity_id, fields FROM wardseal_records WHERE entity_type = ?1 ORDER BY entity_id",
        )?;
        let rows = stmt
            .query_map(params![entity_type], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(entity_id, json)| -> Result<StoredRecord, StoreError> {
                Ok(StoredRecord {
                    entity_type: entity_type.to_string(),
                    entity_id,
                    fields: serde_json::from_str(&json)?,
                })
            })
            .collect()
    }

    fn remove(&self, entity_type: &str, entity_id: &str) -> Result<bool, StoreError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let removed = tx.execute(
            "DELETE FROM wardseal_records WHERE entity_type = ?1 AND entity_id = ?2",
            params![entity_type, entity_id],
        )?;
        tx.execute(DELETE_FOR_ENTITY, params![entity_type, entity_id])?;
        tx.commit()?;
        Ok(removed > 0)
    }

    fn refresh_indexes(&self, sealed: &SealedRecord) -> Result<bool, StoreError> {
        let stored = &sealed.stored;
        let now = now_millis();

        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let current: Option<String> = tx
            .query_row(SELECT_FIELDS, params![stored.entity_type, stored.entity_id], |row| {
                row.get(0)
            })
            .optional()?;
        let unchanged = match current {
            Some(json) => serde_json::from_str::<FieldMap>(&json)? == stored.fields,
            None => false,
        };
        if !unchanged {
            return Ok(false);
        }

        for (name, token) in &sealed.index_entries {
            tx.execute(
                UPSERT_INDEX,
                params![stored.entity_type, stored.entity_id, name, token.as_str(), now],
            )?;
        }
        for name in &sealed.cleared_indexes {
            tx.execute(DELETE_ENTRY, params![stored.entity_type, stored.entity_id, name])?;
        }
        tx.commit()?;
        Ok(true)
    }

    fn prune_orphans(&self, entity_type: &str, declared: &[&str]) -> Result<usize, StoreError> {
        // SQLite accepts an empty `NOT IN ()` list, which matches every name.
        let placeholders =
            (0..declared.len()).map(|i| format!("?{}", i + 2)).collect::<Vec<_>>().join(", ");
        let sql = format!(
            "DELETE FROM blind_indexes WHERE entity_type = ?1 AND (name NOT IN ({placeholders}) \
             OR NOT EXISTS (SELECT 1 FROM wardseal_records r \
             WHERE r.entity_type = blind_indexes.entity_type \
             AND r.entity_id = blind_indexes.entity_id))"
        );

        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let removed = tx.execute(
            &sql,
            params_from_iter(std::iter::once(entity_type).chain(declared.iter().copied())),
        )?;
        tx.commit()?;
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::conformance;
    use tempfile::TempDir;

    fn store() -> SqliteStore {
        SqliteStore::open_in_memory().unwrap()
    }

    #[test]
    fn test_upsert_replaces() {
        conformance::upsert_replaces(&store());
    }

    #[test]
    fn test_find_returns_all_matches() {
        conformance::find_returns_all_matches(&store());
    }

    #[test]
    fn test_delete_for_entity_cascades() {
        conformance::delete_for_entity_cascades(&store());
    }

    #[test]
    fn test_commit_writes_row_and_index() {
        conformance::commit_writes_row_and_index(&store());
    }

    #[test]
    fn test_remove_cascades() {
        conformance::remove_cascades(&store());
    }

    #[test]
    fn test_refresh_applies_to_unchanged_row() {
        conformance::refresh_applies_to_unchanged_row(&store());
    }

    #[test]
    fn test_refresh_skips_changed_row() {
        conformance::refresh_skips_changed_row(&store());
    }

    #[test]
    fn test_prune_removes_orphans_only() {
        conformance::prune_removes_orphans_only(&store());
    }

    #[test]
    fn test_delete_entry_single() {
        conformance::delete_entry_single(&store());
    }

    #[test]
    fn test_unique_constraint_enforced_by_table() {
        let store = store();
        let conn = store.conn.lock();
        let insert = "INSERT INTO blind_indexes (entity_type, entity_id, name, value, created_at, updated_at) \
                      VALUES ('Patient', '1', 'first_name_index', ?1, 0, 0)";
        conn.execute(insert, params!["aa"]).unwrap();
        assert!(conn.execute(insert, params!["bb"]).is_err());
    }

    #[test]
    fn test_reopen_file_keeps_rows() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("wardseal.db");

        {
            let store = SqliteStore::open(&path).unwrap();
            store.upsert("Patient", "1", "first_name_index", &BlindToken::from_stored("aa")).unwrap();
        }

        let store = SqliteStore::open(&path).unwrap();
        let ids = store
            .find_entity_ids("Patient", "first_name_index", &BlindToken::from_stored("aa"))
            .unwrap();
        assert!(ids.contains("1"));
    }
}
