use redb::ReadableTable;
use regex::Regex;

use super::db::{Database, DatabaseError};
use super::models::{Record, RecordKind, RecordUpdate};
use super::tables::*;

/// One raw table entry as seen by a full scan. Decoding happens per entry
/// so a single corrupt value does not fail the whole scan.
#[derive(Debug)]
pub struct ScannedEntry {
    pub id: String,
    pub kind: RecordKind,
    pub record: Result<Record, DatabaseError>,
}

fn decode(kind: RecordKind, data: &[u8]) -> Result<Record, DatabaseError> {
    let record: Record = serde_json::from_slice(data)?;
    if record.kind() != kind {
        return Err(DatabaseError::Serialization(serde::de::Error::custom(format!(
            "{} record stored in {} table",
            record.kind(),
            kind
        ))));
    }
    Ok(record)
}

impl Database {
    // ========================================================================
    // Caller-facing operations (authorized by context)
    // ========================================================================

    /// Create or overwrite a record in its kind's table.
    pub fn insert(&self, record: &Record) -> Result<(), DatabaseError> {
        debug_assert!(!record.id().is_empty(), "record id must not be empty");

        if let Err(e) = self.put_record(record) {
            tracing::error!(
                record_id = %record.id(),
                kind = %record.kind(),
                error = %e,
                "Failed to insert record"
            );
            return Err(e);
        }
        Ok(())
    }

    fn put_record(&self, record: &Record) -> Result<(), DatabaseError> {
        let write_txn = self.begin_write()?;
        {
            let mut table = write_txn.open_table(table_for(record.kind()))?;
            let data = serde_json::to_vec(record)?;
            table.insert(record.id(), data.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Fetch a record the caller is allowed to see.
    ///
    /// Returns `None` both when the id is unknown and when the caller's
    /// context does not own it.
    pub fn get(
        &self,
        context: &str,
        id: &str,
        kind: RecordKind,
    ) -> Result<Option<Record>, DatabaseError> {
        let read_txn = self.begin_read()?;
        let table = read_txn.open_table(table_for(kind))?;

        let record = match table.get(id)? {
            Some(data) => decode(kind, data.value())?,
            None => return Ok(None),
        };

        if record.visible_to(context, self.super_context()) {
            Ok(Some(record))
        } else {
            Ok(None)
        }
    }

    /// List records of one kind visible to `context`.
    ///
    /// A non-empty `filter` keeps only records owned by exactly that
    /// context. `query` must match at least one searchable field.
    pub fn list(
        &self,
        context: &str,
        filter: &str,
        query: Option<&Regex>,
        kind: RecordKind,
    ) -> Result<Vec<Record>, DatabaseError> {
        let read_txn = self.begin_read()?;
        let table = read_txn.open_table(table_for(kind))?;

        let mut records = Vec::new();
        for result in table.iter()? {
            let (_, value) = result?;
            let record = decode(kind, value.value())?;

            if !record.visible_to(context, self.super_context()) {
                continue;
            }
            if !filter.is_empty() && record.context() != filter {
                continue;
            }
            if let Some(re) = query {
                if !record.matches(re) {
                    continue;
                }
            }
            records.push(record);
        }

        Ok(records)
    }

    /// Delete a record by id, whatever its kind.
    ///
    /// Public callers (empty context) get a no-op success for unknown ids;
    /// authenticated callers get `NotFound` for unknown or foreign ids.
    /// Returns the kind of the removed record, if any.
    pub fn delete(&self, context: &str, id: &str) -> Result<Option<RecordKind>, DatabaseError> {
        let write_txn = self.begin_write()?;

        let mut found = None;
        for kind in RecordKind::ALL {
            let table = write_txn.open_table(table_for(kind))?;
            let existing = match table.get(id)? {
                Some(data) => Some(decode(kind, data.value())?),
                None => None,
            };
            if let Some(record) = existing {
                found = Some(record);
                break;
            }
        }

        let removed = match found {
            Some(record) if record.visible_to(context, self.super_context()) => {
                let mut table = write_txn.open_table(table_for(record.kind()))?;
                table.remove(id)?;
                Some(record.kind())
            }
            _ => None,
        };

        write_txn.commit()?;

        if removed.is_none() && !context.is_empty() {
            return Err(DatabaseError::NotFound(id.to_string()));
        }
        Ok(removed)
    }

    /// Update a record in place and return the new version.
    pub fn modify(
        &self,
        context: &str,
        id: &str,
        kind: RecordKind,
        update: &RecordUpdate,
    ) -> Result<Record, DatabaseError> {
        let write_txn = self.begin_write()?;

        let updated = {
            let mut table = write_txn.open_table(table_for(kind))?;
            let existing = match table.get(id)? {
                Some(data) => Some(decode(kind, data.value())?),
                None => None,
            };

            match existing {
                Some(mut record) if record.visible_to(context, self.super_context()) => {
                    update.apply(&mut record);
                    let data = serde_json::to_vec(&record)?;
                    table.insert(id, data.as_slice())?;
                    Some(record)
                }
                _ => None,
            }
        };

        match updated {
            Some(record) => {
                write_txn.commit()?;
                Ok(record)
            }
            None => {
                write_txn.abort()?;
                Err(DatabaseError::NotFound(id.to_string()))
            }
        }
    }

    // ========================================================================
    // Lifecycle operations (no authorization)
    // ========================================================================

    /// Whether an entry exists under `id`, readable or not.
    pub fn contains(&self, kind: RecordKind, id: &str) -> Result<bool, DatabaseError> {
        let read_txn = self.begin_read()?;
        let table = read_txn.open_table(table_for(kind))?;
        let found = table.get(id)?.is_some();
        Ok(found)
    }

    /// Remove an entry regardless of owner. `false` when it was already gone.
    pub fn remove(&self, kind: RecordKind, id: &str) -> Result<bool, DatabaseError> {
        let write_txn = self.begin_write()?;
        let removed = {
            let mut table = write_txn.open_table(table_for(kind))?;
            let removed = table.remove(id)?.is_some();
            removed
        };
        write_txn.commit()?;
        Ok(removed)
    }

    /// Read every entry of one table, decoding each one independently.
    pub fn scan(&self, kind: RecordKind) -> Result<Vec<ScannedEntry>, DatabaseError> {
        let read_txn = self.begin_read()?;
        let table = read_txn.open_table(table_for(kind))?;

        let mut entries = Vec::new();
        for result in table.iter()? {
            let (key, value) = result?;
            entries.push(ScannedEntry {
                id: key.value().to_string(),
                kind,
                record: decode(kind, value.value()),
            });
        }

        Ok(entries)
    }
}
