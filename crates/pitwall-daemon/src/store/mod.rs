//! Persistent store backed by `SQLite`.
//!
//! One database file holds users and roles, form values with their audit
//! trail, processed LDX files and their injection log, the sensor catalog,
//! singleton settings, and per-user dashboard preferences. The connection
//! lives behind a mutex; every multi-statement logical operation runs in an
//! explicit transaction so callers never observe half-applied writes.
//!
//! Timestamps are stored as UNIX milliseconds so ordering comparisons
//! (staleness windows, touched-since-last-file) never collide on whole
//! seconds.

mod ldx;
mod sensors;
mod users;
mod values;

pub use ldx::{InjectionRow, InjectionStats, LdxFileMeta};
pub use sensors::{NewSensor, SensorRecord, SensorUpdate};
pub use users::UserRecord;
pub use values::{AuditPage, AuditRecord, UpsertOutcome, ValueRecord};

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use rusqlite::Connection;

/// Store failure kinds, mapped by the HTTP layer onto response statuses.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("not found")]
    NotFound,
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    Validation(String),
    #[error("integrity violation: {0}")]
    Integrity(String),
    #[error("storage error: {0}")]
    Storage(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::QueryReturnedNoRows => Self::NotFound,
            rusqlite::Error::SqliteFailure(e, msg)
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                let detail = msg.clone().unwrap_or_else(|| e.to_string());
                // 787 = SQLITE_CONSTRAINT_FOREIGNKEY
                if e.extended_code == 787 {
                    Self::Integrity(detail)
                } else {
                    Self::Conflict(detail)
                }
            }
            _ => Self::Storage(err.to_string()),
        }
    }
}

/// Handle to the database. Cheap to clone; all clones share one
/// connection.
#[derive(Debug, Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
    path: Option<PathBuf>,
}

impl Store {
    /// Opens (or creates) the database file and applies migrations.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Storage`] when the file cannot be opened or
    /// the schema cannot be created.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::Storage(format!("create data dir: {e}")))?;
        }
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
            path: Some(path.to_path_buf()),
        };
        store.init()?;
        Ok(store)
    }

    /// In-memory store for tests.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Storage`] if the schema cannot be created.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let store = Self {
            conn: Arc::new(Mutex::new(Connection::open_in_memory()?)),
            path: None,
        };
        store.init()?;
        Ok(store)
    }

    fn init(&self) -> Result<(), StoreError> {
        let conn = self.lock();
        // journal_mode returns the resulting mode as a row.
        conn.query_row("PRAGMA journal_mode = WAL", [], |_row| Ok(()))?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Self::migrate(&conn)?;
        Ok(())
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Creates every table and index. Idempotent; runs at each boot.
    fn migrate(conn: &Connection) -> rusqlite::Result<()> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS users (
                id            INTEGER PRIMARY KEY AUTOINCREMENT,
                username      TEXT NOT NULL UNIQUE,
                password_hash TEXT NOT NULL,
                is_admin      INTEGER NOT NULL DEFAULT 0
            );
            CREATE TABLE IF NOT EXISTS user_roles (
                user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                role    TEXT NOT NULL,
                PRIMARY KEY (user_id, role)
            );
            CREATE TABLE IF NOT EXISTS form_values (
                role           TEXT NOT NULL,
                field_name     TEXT NOT NULL,
                value          TEXT,
                previous_value TEXT,
                updated_at     INTEGER NOT NULL,
                updated_by     INTEGER REFERENCES users(id) ON DELETE SET NULL,
                PRIMARY KEY (role, field_name)
            );
            CREATE TABLE IF NOT EXISTS audit_log (
                id         INTEGER PRIMARY KEY AUTOINCREMENT,
                form_name  TEXT NOT NULL,
                field_name TEXT NOT NULL,
                old_value  TEXT,
                new_value  TEXT,
                changed_at INTEGER NOT NULL,
                changed_by INTEGER REFERENCES users(id) ON DELETE SET NULL
            );
            CREATE INDEX IF NOT EXISTS idx_audit_log_changed_at
                ON audit_log(changed_at DESC);
            CREATE TABLE IF NOT EXISTS ldx_files (
                file_name     TEXT PRIMARY KEY,
                size          INTEGER NOT NULL,
                modified_at   INTEGER NOT NULL,
                content_hash  TEXT NOT NULL,
                first_seen_at INTEGER NOT NULL
            );
            CREATE TABLE IF NOT EXISTS injection_log (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                file_name   TEXT NOT NULL REFERENCES ldx_files(file_name) ON DELETE CASCADE,
                field_id    TEXT NOT NULL,
                value       TEXT NOT NULL,
                was_update  INTEGER NOT NULL,
                injected_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_injection_log_file
                ON injection_log(file_name);
            CREATE TABLE IF NOT EXISTS sensors (
                id         INTEGER PRIMARY KEY AUTOINCREMENT,
                sensor_id  TEXT NOT NULL UNIQUE,
                name       TEXT NOT NULL,
                unit       TEXT NOT NULL,
                min_value  REAL NOT NULL,
                max_value  REAL NOT NULL,
                grouping   TEXT NOT NULL DEFAULT 'Other',
                sort_order INTEGER NOT NULL DEFAULT 0,
                enabled    INTEGER NOT NULL DEFAULT 1
            );
            CREATE TABLE IF NOT EXISTS settings (
                key   TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS user_prefs (
                user_id    INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                key        TEXT NOT NULL,
                value      TEXT NOT NULL,
                updated_at INTEGER NOT NULL,
                PRIMARY KEY (user_id, key)
            );",
        )
    }

    // --- settings -----------------------------------------------------

    /// Reads a singleton setting.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Storage`] on query failure.
    pub fn get_setting(&self, key: &str) -> Result<Option<String>, StoreError> {
        use rusqlite::OptionalExtension;
        let conn = self.lock();
        let value = conn
            .query_row(
                "SELECT value FROM settings WHERE key = ?1",
                [key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    /// Writes a singleton setting.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Storage`] on write failure.
    pub fn put_setting(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let conn = self.lock();
        conn.execute(
            "INSERT INTO settings (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            [key, value],
        )?;
        Ok(())
    }

    // --- user preferences --------------------------------------------

    /// Reads one user's preference blob.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Storage`] on query failure.
    pub fn get_pref(&self, user_id: i64, key: &str) -> Result<Option<String>, StoreError> {
        use rusqlite::OptionalExtension;
        let conn = self.lock();
        let value = conn
            .query_row(
                "SELECT value FROM user_prefs WHERE user_id = ?1 AND key = ?2",
                rusqlite::params![user_id, key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    /// Upserts one user's preference blob.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Integrity`] for an unknown user, otherwise
    /// [`StoreError::Storage`] on write failure.
    pub fn put_pref(
        &self,
        user_id: i64,
        key: &str,
        value: &str,
        now_ms: i64,
    ) -> Result<(), StoreError> {
        let conn = self.lock();
        conn.execute(
            "INSERT INTO user_prefs (user_id, key, value, updated_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(user_id, key)
             DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            rusqlite::params![user_id, key, value, now_ms],
        )?;
        Ok(())
    }

    // --- maintenance --------------------------------------------------

    /// Produces a consistent copy of the database at `dest`.
    ///
    /// `VACUUM INTO` takes a shared lock for the duration of the copy, so
    /// concurrent writers briefly queue but are never torn.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Storage`] when the copy fails (e.g. the
    /// destination is not writable).
    pub fn export_snapshot(&self, dest: &Path) -> Result<(), StoreError> {
        let conn = self.lock();
        let dest = dest
            .to_str()
            .ok_or_else(|| StoreError::Validation("export path is not valid UTF-8".into()))?;
        conn.execute("VACUUM INTO ?1", [dest])?;
        Ok(())
    }

    /// Deletes runtime data (form values, audit, LDX rows, injection log)
    /// while preserving users, sensors, settings, and preferences.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Storage`] on write failure.
    pub fn clear_runtime_data(&self) -> Result<(), StoreError> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM injection_log", [])?;
        tx.execute("DELETE FROM ldx_files", [])?;
        tx.execute("DELETE FROM audit_log", [])?;
        tx.execute("DELETE FROM form_values", [])?;
        tx.commit()?;
        Ok(())
    }

    /// The backing file path, if not in-memory.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

/// Current wall clock as UNIX milliseconds.
#[must_use]
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
