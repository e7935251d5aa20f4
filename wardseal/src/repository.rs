//! Encrypted repository: the consumer-facing entry point.
//!
//! Glues a [`RecordMapper`] to a [`RecordStore`]. Every save goes through
//! [`RecordMapper::seal`] and a single [`RecordStore::commit`], so a record row
//! and its blind index entries always change together.

use std::collections::{BTreeMap, BTreeSet};

use crate::blind_index::BlindToken;
use crate::error::Error;
use crate::mapper::RecordMapper;
use crate::record::{PlainRecord, SealedRecord};
use crate::store::RecordStore;

/// One row of a bulk listing.
#[derive(Debug)]
pub enum RecordRow {
    /// The record decrypted cleanly.
    Readable(PlainRecord),
    /// At least one field failed to decrypt. Other rows are unaffected.
    Unreadable {
        /// Id of the failing record
        entity_id: String,
        /// Why it failed
        error: Error,
    },
}

impl RecordRow {
    /// Returns the decrypted record, if any.
    #[must_use]
    pub const fn readable(&self) -> Option<&PlainRecord> {
        match self {
            Self::Readable(record) => Some(record),
            Self::Unreadable { .. } => None,
        }
    }

    /// Returns the entity id of the row.
    #[must_use]
    pub fn entity_id(&self) -> &str {
        match self {
            Self::Readable(record) => record.entity_id(),
            Self::Unreadable { entity_id, .. } => entity_id,
        }
    }
}

/// A single index entry found by [`EncryptedRepository::verify_index`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexProblem {
    /// Entity the entry belongs (or should belong) to
    pub entity_id: String,
    /// Index name
    pub index_name: String,
}

/// Result of comparing the blind index table with the stored records.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexReport {
    /// Entity type that was checked
    pub entity_type: String,
    /// Number of records examined
    pub records_checked: usize,
    /// Entries with no record row, or under an index name the schema does not declare
    pub orphaned: Vec<IndexProblem>,
    /// Entries whose token no longer matches the record's current value
    pub stale: Vec<IndexProblem>,
    /// Non-null indexed fields with no entry
    pub missing: Vec<IndexProblem>,
}

impl IndexReport {
    /// Returns `true` when no problem was found.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        self.orphaned.is_empty() && self.stale.is_empty() && self.missing.is_empty()
    }

    /// Converts the first problem, if any, into an error.
    ///
    /// # Errors
    ///
    /// Returns `Error::IndexConsistency` describing the first orphaned, stale
    /// or missing entry.
    pub fn into_result(self) -> Result<Self, Error> {
        let first = [
            (self.orphaned.first(), "orphaned entry"),
            (self.stale.first(), "stale token"),
            (self.missing.first(), "missing entry"),
        ]
        .into_iter()
        .find_map(|(problem, reason)| problem.map(|p| (p.clone(), reason)));

        match first {
            None => Ok(self),
            Some((problem, reason)) => Err(Error::IndexConsistency {
                entity_type: self.entity_type,
                entity_id: problem.entity_id,
                index_name: problem.index_name,
                reason: reason.to_string(),
            }),
        }
    }
}

/// Repository of encrypted records over any [`RecordStore`].
#[derive(Debug)]
pub struct EncryptedRepository<S> {
    mapper: RecordMapper,
    store: S,
}

impl<S: RecordStore> EncryptedRepository<S> {
    /// Creates a repository.
    #[must_use]
    pub const fn new(mapper: RecordMapper, store: S) -> Self {
        Self { mapper, store }
    }

    /// Returns the mapper.
    #[must_use]
    pub const fn mapper(&self) -> &RecordMapper {
        &self.mapper
    }

    /// Returns the underlying store.
    #[must_use]
    pub const fn store(&self) -> &S {
        &self.store
    }

    /// Encrypts and persists a record, replacing its blind index entries.
    ///
    /// Saving the same record twice leaves exactly one entry per index.
    ///
    /// # Errors
    ///
    /// Returns schema, crypto or storage errors. On error nothing is written.
    pub fn save(&self, record: &PlainRecord) -> Result<(), Error> {
        let sealed = self.mapper.seal(record)?;
        self.store.commit(&sealed)?;
        tracing::debug!(
            entity_type = record.entity_type(),
            entity_id = record.entity_id(),
            indexes = sealed.index_entries.len(),
            cleared = sealed.cleared_indexes.len(),
            "record saved"
        );
        Ok(())
    }

    /// Loads and decrypts one record.
    ///
    /// # Errors
    ///
    /// Returns `Error::FieldDecryption` if a field cannot be decrypted; a
    /// failure is never reported as a missing record.
    pub fn load(&self, entity_type: &str, entity_id: &str) -> Result<Option<PlainRecord>, Error> {
        self.store
            .fetch(entity_type, entity_id)?
            .map(|stored| self.mapper.open(&stored))
            .transpose()
    }

    /// Loads every record of an entity type ordered by id.
    ///
    /// A record that fails to decrypt is returned as [`RecordRow::Unreadable`]
    /// and does not abort the listing.
    ///
    /// # Errors
    ///
    /// Returns storage errors only.
    pub fn list(&self, entity_type: &str) -> Result<Vec<RecordRow>, Error> {
        let rows = self
            .store
            .fetch_all(entity_type)?
            .into_iter()
            .map(|stored| match self.mapper.open(&stored) {
                Ok(record) => RecordRow::Readable(record),
                Err(error) => {
                    tracing::warn!(
                        entity_type,
                        entity_id = %stored.entity_id,
                        %error,
                        "record could not be decrypted"
                    );
                    RecordRow::Unreadable { entity_id: stored.entity_id, error }
                }
            })
            .collect();
        Ok(rows)
    }

    /// Deletes a record and all of its blind index entries.
    /// Returns `false` if the record did not exist.
    ///
    /// # Errors
    ///
    /// Returns storage errors.
    pub fn delete(&self, entity_type: &str, entity_id: &str) -> Result<bool, Error> {
        let existed = self.store.remove(entity_type, entity_id)?;
        tracing::debug!(entity_type, entity_id, existed, "record deleted");
        Ok(existed)
    }

    /// Returns the ids of records whose blind index for `field` matches
    /// `candidate`.
    ///
    /// This is a candidate set: with narrow index widths unrelated values may
    /// share a token. Use [`find_by_field`](Self::find_by_field) for confirmed
    /// matches.
    ///
    /// # Errors
    ///
    /// Returns `Error::Schema` if the field is not indexed, or storage errors.
    pub fn search_by_field(
        &self,
        entity_type: &str,
        field: &str,
        candidate: &str,
    ) -> Result<BTreeSet<String>, Error> {
        let index_name = self.index_name(entity_type, field)?;
        let token = self.mapper.index_token(entity_type, field, candidate)?;
        let ids = self.store.find_entity_ids(entity_type, &index_name, &token)?;
        tracing::debug!(entity_type, field, candidates = ids.len(), "blind index search");
        Ok(ids)
    }

    /// Returns the decrypted records whose `field` equals `candidate` under
    /// the field's normalization.
    ///
    /// Candidates whose row is gone or cannot be decrypted are skipped with a
    /// warning.
    ///
    /// # Errors
    ///
    /// Returns `Error::Schema` if the field is not indexed, or storage errors.
    pub fn find_by_field(
        &self,
        entity_type: &str,
        field: &str,
        candidate: &str,
    ) -> Result<Vec<PlainRecord>, Error> {
        let normalization =
            self.mapper.schema().entity(entity_type)?.indexed_field(field)?.normalization();

        let mut found = Vec::new();
        for entity_id in self.search_by_field(entity_type, field, candidate)? {
            match self.load(entity_type, &entity_id) {
                Ok(Some(record)) => {
                    if record.get(field).is_some_and(|v| normalization.matches(v, candidate)) {
                        found.push(record);
                    }
                }
                Ok(None) => {
                    tracing::warn!(entity_type, %entity_id, field, "blind index entry has no record");
                }
                Err(error) if error.is_decryption() => {
                    tracing::warn!(entity_type, %entity_id, %error, "skipping unreadable candidate");
                }
                Err(error) => return Err(error),
            }
        }
        Ok(found)
    }

    /// Compares the blind index table against the stored records of one
    /// entity type.
    ///
    /// # Errors
    ///
    /// Returns `Error::FieldDecryption` if a record cannot be decrypted, since
    /// its expected tokens cannot be computed, or storage errors.
    pub fn verify_index(&self, entity_type: &str) -> Result<IndexReport, Error> {
        let schema = self.mapper.schema().entity(entity_type)?;
        let declared: BTreeSet<&str> =
            schema.indexed_fields().filter_map(|spec| spec.index_name()).collect();

        let mut expected: BTreeMap<String, BTreeMap<String, BlindToken>> = BTreeMap::new();
        for stored in self.store.fetch_all(entity_type)? {
            let record = self.mapper.open(&stored)?;
            let entries = self.mapper.index_entries(&record)?.into_iter().collect();
            expected.insert(stored.entity_id, entries);
        }

        let mut report = IndexReport {
            entity_type: entity_type.to_string(),
            records_checked: expected.len(),
            ..IndexReport::default()
        };
        let mut seen = BTreeSet::new();

        for entry in self.store.entries_for_type(entity_type)? {
            let problem =
                IndexProblem { entity_id: entry.entity_id.clone(), index_name: entry.name.clone() };
            let Some(tokens) = expected.get(&entry.entity_id) else {
                report.orphaned.push(problem);
                continue;
            };
            if !declared.contains(entry.name.as_str()) {
                report.orphaned.push(problem);
                continue;
            }
            if tokens.get(&entry.name) != Some(&entry.value) {
                report.stale.push(problem);
            }
            seen.insert((entry.entity_id, entry.name));
        }

        for (entity_id, tokens) in &expected {
            for index_name in tokens.keys() {
                if !seen.contains(&(entity_id.clone(), index_name.clone())) {
                    report.missing.push(IndexProblem {
                        entity_id: entity_id.clone(),
                        index_name: index_name.clone(),
                    });
                }
            }
        }

        if !report.is_consistent() {
            tracing::warn!(
                entity_type,
                orphaned = report.orphaned.len(),
                stale = report.stale.len(),
                missing = report.missing.len(),
                "blind index inconsistent"
            );
        }
        Ok(report)
    }

    /// Recomputes the blind index entries of every record of an entity type
    /// from its decrypted values. Only index entries are written. A record
    /// saved again after it was read here is skipped, since that save already
    /// committed its own entries. Returns the number of records reindexed.
    ///
    /// # Errors
    ///
    /// Stops at the first record that cannot be decrypted; records before it
    /// have already been reindexed.
    pub fn reindex(&self, entity_type: &str) -> Result<usize, Error> {
        let mut count = 0;
        for stored in self.store.fetch_all(entity_type)? {
            let record = self.mapper.open(&stored)?;
            let sealed = SealedRecord { stored, ..self.mapper.seal(&record)? };
            if self.store.refresh_indexes(&sealed)? {
                count += 1;
            } else {
                tracing::debug!(
                    entity_type,
                    entity_id = %sealed.stored.entity_id,
                    "record changed during reindex, skipped"
                );
            }
        }
        tracing::debug!(entity_type, records = count, "blind index rebuilt");
        Ok(count)
    }

    /// Deletes index entries whose record row no longer exists, or whose
    /// index name the schema does not declare, as one store operation.
    /// Returns how many were removed.
    ///
    /// # Errors
    ///
    /// Returns schema or storage errors.
    pub fn prune_orphans(&self, entity_type: &str) -> Result<usize, Error> {
        let schema = self.mapper.schema().entity(entity_type)?;
        let declared: Vec<&str> =
            schema.indexed_fields().filter_map(|spec| spec.index_name()).collect();

        let pruned = self.store.prune_orphans(entity_type, &declared)?;
        if pruned > 0 {
            tracing::warn!(entity_type, pruned, "pruned orphaned blind index entries");
        }
        Ok(pruned)
    }

    fn index_name(&self, entity_type: &str, field: &str) -> Result<String, Error> {
        let spec = self.mapper.schema().entity(entity_type)?.indexed_field(field)?;
        Ok(spec.index_name().unwrap_or_default().to_string())
    }
}
