//! Processed LDX file records and the injection log.

use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{params, OptionalExtension};
use serde::Serialize;

use super::{Store, StoreError};

/// Identity of a processed LDX file as first observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LdxFileMeta {
    pub file_name: String,
    pub size: u64,
    pub modified_at_ms: i64,
    /// Hex SHA-256 of the file content at observation time.
    pub content_hash: String,
    pub first_seen_at_ms: i64,
}

/// One injected entry, as recorded in the log.
#[derive(Debug, Clone, Serialize)]
pub struct InjectionRow {
    pub field_id: String,
    pub value: String,
    pub was_update: bool,
    pub injected_at: DateTime<Utc>,
}

/// Per-file injection counts.
#[derive(Debug, Clone, Serialize)]
pub struct InjectionStats {
    pub file_name: String,
    pub total: u64,
    pub updates: u64,
    #[serde(rename = "static")]
    pub statics: u64,
}

impl Store {
    /// Whether a file name has already been processed.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Storage`] on query failure.
    pub fn ldx_file_seen(&self, file_name: &str) -> Result<bool, StoreError> {
        let conn = self.lock();
        let seen: bool = conn
            .query_row(
                "SELECT 1 FROM ldx_files WHERE file_name = ?1",
                [file_name],
                |_| Ok(true),
            )
            .optional()?
            .unwrap_or(false);
        Ok(seen)
    }

    /// Records a file as processed. Returns `false` (and writes nothing)
    /// when the name was already recorded.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Storage`] on write failure.
    pub fn record_ldx_file(&self, meta: &LdxFileMeta) -> Result<bool, StoreError> {
        let conn = self.lock();
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO ldx_files
                 (file_name, size, modified_at, content_hash, first_seen_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                meta.file_name,
                meta.size,
                meta.modified_at_ms,
                meta.content_hash,
                meta.first_seen_at_ms
            ],
        )?;
        Ok(inserted == 1)
    }

    /// Records a processed file and its injection rows in one transaction.
    /// Returns `false` (writing nothing) when the name was already
    /// recorded.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Storage`] on write failure.
    pub fn record_processed_file(
        &self,
        meta: &LdxFileMeta,
        rows: &[(String, String, bool)],
    ) -> Result<bool, StoreError> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        let inserted = tx.execute(
            "INSERT OR IGNORE INTO ldx_files
                 (file_name, size, modified_at, content_hash, first_seen_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                meta.file_name,
                meta.size,
                meta.modified_at_ms,
                meta.content_hash,
                meta.first_seen_at_ms
            ],
        )?;
        if inserted == 0 {
            return Ok(false);
        }
        for (field_id, value, was_update) in rows {
            tx.execute(
                "INSERT INTO injection_log
                     (file_name, field_id, value, was_update, injected_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![meta.file_name, field_id, value, was_update, meta.first_seen_at_ms],
            )?;
        }
        tx.commit()?;
        Ok(true)
    }

    /// Appends injection rows for an already-recorded file in one
    /// transaction.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Integrity`] when no file row exists for
    /// `file_name`, otherwise [`StoreError::Storage`] on write failure.
    pub fn append_injection(
        &self,
        file_name: &str,
        rows: &[(String, String, bool)],
        injected_at_ms: i64,
    ) -> Result<(), StoreError> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        for (field_id, value, was_update) in rows {
            tx.execute(
                "INSERT INTO injection_log
                     (file_name, field_id, value, was_update, injected_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![file_name, field_id, value, was_update, injected_at_ms],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    /// `first_seen_at` of the most recently processed file, if any.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Storage`] on query failure.
    pub fn latest_ldx_first_seen_ms(&self) -> Result<Option<i64>, StoreError> {
        let conn = self.lock();
        let ts = conn
            .query_row("SELECT MAX(first_seen_at) FROM ldx_files", [], |row| {
                row.get::<_, Option<i64>>(0)
            })?;
        Ok(ts)
    }

    /// Injection log rows for one file, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Storage`] on query failure.
    pub fn list_injections(&self, file_name: &str) -> Result<Vec<InjectionRow>, StoreError> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT field_id, value, was_update, injected_at
             FROM injection_log WHERE file_name = ?1
             ORDER BY injected_at DESC, id DESC",
        )?;
        let rows = stmt
            .query_map([file_name], |row| {
                let injected_at_ms: i64 = row.get(3)?;
                Ok(InjectionRow {
                    field_id: row.get(0)?,
                    value: row.get(1)?,
                    was_update: row.get(2)?,
                    injected_at: Utc
                        .timestamp_millis_opt(injected_at_ms)
                        .single()
                        .unwrap_or_default(),
                })
            })?
            .collect::<Result<_, _>>()?;
        Ok(rows)
    }

    /// Per-file injection counts across the whole log.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Storage`] on query failure.
    pub fn injection_stats(&self) -> Result<Vec<InjectionStats>, StoreError> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT file_name,
                    COUNT(*),
                    COALESCE(SUM(was_update), 0)
             FROM injection_log
             GROUP BY file_name
             ORDER BY file_name",
        )?;
        let rows = stmt
            .query_map([], |row| {
                let total: u64 = row.get(1)?;
                let updates: u64 = row.get(2)?;
                Ok(InjectionStats {
                    file_name: row.get(0)?,
                    total,
                    updates,
                    statics: total - updates,
                })
            })?
            .collect::<Result<_, _>>()?;
        Ok(rows)
    }
}
