//! Form value service: prefill and submission.
//!
//! Submissions for a given role are serialized by a per-role mutex so the
//! audit trail for that role is totally ordered; the store applies each
//! submission's writes in a single transaction.

use std::collections::BTreeMap;

use pitwall_core::schema::{normalize_value, FormSchema, MAX_FORM_VALUES_PER_SUBMIT};
use pitwall_core::Role;
use serde::Serialize;
use tokio::sync::Mutex;

use crate::store::{now_ms, Store, StoreError};

/// Submission failure.
#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    /// Bad request shape (too many fields).
    #[error("{0}")]
    Validation(String),
    /// One or more values failed field validation.
    #[error("{0}")]
    Unprocessable(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Prefill payload for a role's form.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Prefill {
    pub values: BTreeMap<String, Option<String>>,
    /// Per-field `updated_at`, UNIX seconds.
    pub timestamps: BTreeMap<String, f64>,
    /// Only fields with `lookback` enabled appear here.
    pub previous_values: BTreeMap<String, Option<String>>,
}

/// Prefill, diff, audit-writing submission.
pub struct ValueService {
    store: Store,
    locks: Vec<Mutex<()>>,
}

impl ValueService {
    #[must_use]
    pub fn new(store: Store) -> Self {
        let locks = (0..Role::COUNT).map(|_| Mutex::new(())).collect();
        Self { store, locks }
    }

    /// Current values, timestamps, and lookback values for a form.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on store failure.
    pub fn prefill(&self, schema: &FormSchema) -> Result<Prefill, StoreError> {
        let stored = self.store.list_values(schema.role)?;
        let mut prefill = Prefill::default();
        for (field, record) in &stored {
            prefill
                .values
                .insert(field.clone(), record.value.clone());
            prefill
                .timestamps
                .insert(field.clone(), record.updated_at_ms as f64 / 1000.0);
        }
        for field in &schema.fields {
            if field.lookback {
                let previous = stored
                    .get(&field.name)
                    .and_then(|r| r.previous_value.clone());
                prefill.previous_values.insert(field.name.clone(), previous);
            }
        }
        Ok(prefill)
    }

    /// Validates, coerces, and applies a submission.
    ///
    /// Keys not present in the schema are ignored. Every submitted value
    /// is coerced to its field type first; any failure rejects the whole
    /// submission. Fields whose normalized value equals the stored value
    /// are untouched and produce no audit row. Returns the number of
    /// fields that actually changed.
    ///
    /// # Errors
    ///
    /// Returns [`SubmitError::Unprocessable`] naming the offending fields,
    /// or a store error (in which case nothing was written).
    pub async fn submit(
        &self,
        schema: &FormSchema,
        user_id: Option<i64>,
        values: &BTreeMap<String, Option<String>>,
    ) -> Result<usize, SubmitError> {
        if values.len() > MAX_FORM_VALUES_PER_SUBMIT {
            return Err(SubmitError::Validation(format!(
                "Too many fields submitted (max {MAX_FORM_VALUES_PER_SUBMIT})"
            )));
        }

        let mut normalized: Vec<(String, Option<String>)> = Vec::new();
        let mut errors: Vec<String> = Vec::new();
        for (name, raw) in values {
            let Some(field) = schema.field(name) else {
                continue;
            };
            match normalize_value(field, raw.as_deref()) {
                Ok(value) => normalized.push((name.clone(), value)),
                Err(e) => errors.push(e.to_string()),
            }
        }
        if !errors.is_empty() {
            return Err(SubmitError::Unprocessable(errors.join("; ")));
        }

        let _guard = self.locks[schema.role.index()].lock().await;
        let changed = self.store.submit_values(
            &schema.form_name,
            schema.role,
            &normalized,
            user_id,
            now_ms(),
        )?;
        Ok(changed)
    }
}
