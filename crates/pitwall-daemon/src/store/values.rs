//! Form value persistence and the field-level audit trail.

use std::collections::BTreeMap;

use chrono::{DateTime, TimeZone, Utc};
use pitwall_core::Role;
use rusqlite::{params, OptionalExtension, Transaction};
use serde::Serialize;

use super::{Store, StoreError};

/// Stored state of one (role, field) pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueRecord {
    pub value: Option<String>,
    pub previous_value: Option<String>,
    pub updated_at_ms: i64,
    pub updated_by: Option<i64>,
}

/// Result of a single value upsert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpsertOutcome {
    pub old_value: Option<String>,
    pub previous_value: Option<String>,
    pub changed: bool,
}

/// One audit row, as listed to admins.
#[derive(Debug, Clone, Serialize)]
pub struct AuditRecord {
    pub id: i64,
    pub form_name: String,
    pub field_name: String,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
    pub changed_at: DateTime<Utc>,
    pub changed_by: Option<i64>,
    pub changed_by_name: Option<String>,
}

/// A page of audit rows plus the total count.
#[derive(Debug, Clone, Serialize)]
pub struct AuditPage {
    pub items: Vec<AuditRecord>,
    pub total: u64,
}

impl Store {
    /// Current values for a role's form, keyed by field name.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Storage`] on query failure.
    pub fn list_values(&self, role: Role) -> Result<BTreeMap<String, ValueRecord>, StoreError> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT field_name, value, previous_value, updated_at, updated_by
             FROM form_values WHERE role = ?1",
        )?;
        let rows = stmt.query_map([role.as_str()], |row| {
            Ok((
                row.get::<_, String>(0)?,
                ValueRecord {
                    value: row.get(1)?,
                    previous_value: row.get(2)?,
                    updated_at_ms: row.get(3)?,
                    updated_by: row.get(4)?,
                },
            ))
        })?;
        let mut out = BTreeMap::new();
        for row in rows {
            let (field, record) = row?;
            out.insert(field, record);
        }
        Ok(out)
    }

    /// All current values across every role, keyed by (role, field). Used
    /// by the LDX injector snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Storage`] on query failure.
    pub fn list_all_values(
        &self,
    ) -> Result<BTreeMap<(Role, String), ValueRecord>, StoreError> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT role, field_name, value, previous_value, updated_at, updated_by
             FROM form_values",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                ValueRecord {
                    value: row.get(2)?,
                    previous_value: row.get(3)?,
                    updated_at_ms: row.get(4)?,
                    updated_by: row.get(5)?,
                },
            ))
        })?;
        let mut out = BTreeMap::new();
        for row in rows {
            let (role, field, record) = row?;
            let Ok(role) = role.parse::<Role>() else {
                continue;
            };
            out.insert((role, field), record);
        }
        Ok(out)
    }

    /// Upserts one field value, appending an audit row if it changed.
    ///
    /// `previous_value` rotates to the pre-upsert value only on an actual
    /// change, so lookback always shows the immediately-preceding distinct
    /// submission.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Storage`] on write failure.
    pub fn upsert_form_value(
        &self,
        form_name: &str,
        role: Role,
        field_name: &str,
        value: Option<&str>,
        user_id: Option<i64>,
        now_ms: i64,
    ) -> Result<UpsertOutcome, StoreError> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        let outcome = upsert_in_tx(&tx, form_name, role, field_name, value, user_id, now_ms)?;
        tx.commit()?;
        Ok(outcome)
    }

    /// Applies a whole submission in one transaction: one upsert plus one
    /// audit row per field whose value actually changed.
    ///
    /// Returns the number of changed fields.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Storage`] on write failure; nothing is
    /// applied in that case.
    pub fn submit_values(
        &self,
        form_name: &str,
        role: Role,
        values: &[(String, Option<String>)],
        user_id: Option<i64>,
        now_ms: i64,
    ) -> Result<usize, StoreError> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        let mut changed = 0;
        for (field_name, value) in values {
            let outcome = upsert_in_tx(
                &tx,
                form_name,
                role,
                field_name,
                value.as_deref(),
                user_id,
                now_ms,
            )?;
            if outcome.changed {
                changed += 1;
            }
        }
        tx.commit()?;
        Ok(changed)
    }

    /// A page of the audit trail, newest first, with the total row count.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Storage`] on query failure.
    pub fn list_audit(&self, offset: u64, limit: u64) -> Result<AuditPage, StoreError> {
        let conn = self.lock();
        let total: u64 = conn.query_row("SELECT COUNT(*) FROM audit_log", [], |row| row.get(0))?;
        let mut stmt = conn.prepare(
            "SELECT a.id, a.form_name, a.field_name, a.old_value, a.new_value,
                    a.changed_at, a.changed_by, u.username
             FROM audit_log a LEFT JOIN users u ON u.id = a.changed_by
             ORDER BY a.changed_at DESC, a.id DESC
             LIMIT ?1 OFFSET ?2",
        )?;
        let items = stmt
            .query_map(params![limit, offset], |row| {
                let changed_at_ms: i64 = row.get(5)?;
                Ok(AuditRecord {
                    id: row.get(0)?,
                    form_name: row.get(1)?,
                    field_name: row.get(2)?,
                    old_value: row.get(3)?,
                    new_value: row.get(4)?,
                    changed_at: Utc
                        .timestamp_millis_opt(changed_at_ms)
                        .single()
                        .unwrap_or_default(),
                    changed_by: row.get(6)?,
                    changed_by_name: row.get(7)?,
                })
            })?
            .collect::<Result<_, _>>()?;
        Ok(AuditPage { items, total })
    }
}

fn upsert_in_tx(
    tx: &Transaction<'_>,
    form_name: &str,
    role: Role,
    field_name: &str,
    value: Option<&str>,
    user_id: Option<i64>,
    now_ms: i64,
) -> Result<UpsertOutcome, StoreError> {
    let current: Option<(Option<String>, Option<String>)> = tx
        .query_row(
            "SELECT value, previous_value FROM form_values
             WHERE role = ?1 AND field_name = ?2",
            params![role.as_str(), field_name],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;

    let (old_value, old_previous) = match &current {
        Some((v, p)) => (v.clone(), p.clone()),
        None => (None, None),
    };
    let changed = old_value.as_deref() != value;

    if !changed {
        return Ok(UpsertOutcome {
            old_value,
            previous_value: old_previous,
            changed: false,
        });
    }

    if current.is_some() {
        tx.execute(
            "UPDATE form_values
             SET value = ?3, previous_value = ?4, updated_at = ?5, updated_by = ?6
             WHERE role = ?1 AND field_name = ?2",
            params![role.as_str(), field_name, value, old_value, now_ms, user_id],
        )?;
    } else {
        tx.execute(
            "INSERT INTO form_values (role, field_name, value, previous_value, updated_at, updated_by)
             VALUES (?1, ?2, ?3, NULL, ?4, ?5)",
            params![role.as_str(), field_name, value, now_ms, user_id],
        )?;
    }

    tx.execute(
        "INSERT INTO audit_log (form_name, field_name, old_value, new_value, changed_at, changed_by)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![form_name, field_name, old_value, value, now_ms, user_id],
    )?;

    Ok(UpsertOutcome {
        old_value: old_value.clone(),
        previous_value: old_value,
        changed: true,
    })
}
