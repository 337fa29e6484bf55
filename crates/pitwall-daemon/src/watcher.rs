//! LDX directory watcher.
//!
//! A single background task polls the configured watch directory, picks up
//! freshly written `.ldx` files, injects the current form value snapshot
//! into their `<detail>` block, and records the injection log. Idempotency
//! is keyed on file name: the injector rewrites the watched file, so the
//! observed content hash is a record of what was seen, not the skip key.
//! Errors on one file never stop the loop; the file is retried on the next
//! tick because nothing was recorded for it.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use pitwall_core::schema::FormRegistry;
use pitwall_core::Role;
use sha2::{Digest, Sha256};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::ldx::{inject_entries, InjectionEntry, LdxError};
use crate::store::{now_ms, LdxFileMeta, Store, StoreError, ValueRecord};

/// Settings key holding the watch directory path.
pub const WATCH_DIRECTORY_KEY: &str = "watch_directory";

/// Default scan interval.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Files modified more recently than this are assumed still being written.
pub const DEBOUNCE: Duration = Duration::from_millis(500);

/// Budget for rewriting one file.
const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Per-file processing failure.
#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Ldx(#[from] LdxError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("write timed out")]
    WriteTimeout,
}

/// The watcher task.
pub struct LdxWatcher {
    store: Store,
    registry: Arc<RwLock<FormRegistry>>,
    poll_interval: Duration,
}

impl LdxWatcher {
    #[must_use]
    pub fn new(store: Store, registry: Arc<RwLock<FormRegistry>>) -> Self {
        Self {
            store,
            registry,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Overrides the scan interval (tests).
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Runs until the shutdown signal flips. The in-flight file is always
    /// finished before exiting.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(interval_ms = self.poll_interval.as_millis() as u64, "LDX watcher started");
        loop {
            if *shutdown.borrow() {
                break;
            }
            self.scan_once().await;
            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {}
                _ = shutdown.changed() => break,
            }
        }
        info!("LDX watcher stopped");
    }

    /// One scan pass; returns the number of files processed.
    pub async fn scan_once(&self) -> usize {
        let dir = match self.store.get_setting(WATCH_DIRECTORY_KEY) {
            Ok(Some(path)) if !path.is_empty() => PathBuf::from(path),
            Ok(_) => return 0,
            Err(e) => {
                warn!(error = %e, "failed to read watch directory setting");
                return 0;
            }
        };
        if !dir.is_dir() {
            return 0;
        }

        let mut processed = 0;
        for path in ldx_files_in(&dir) {
            match self.process_file(&path).await {
                Ok(true) => processed += 1,
                Ok(false) => {}
                Err(e) => {
                    error!(file = %path.display(), error = %e, "failed to process LDX file");
                }
            }
        }
        processed
    }

    /// Processes one candidate. Returns `Ok(false)` when the file is
    /// skipped (already seen, or debounced).
    async fn process_file(&self, path: &Path) -> Result<bool, WatchError> {
        let meta = std::fs::metadata(path)?;
        let modified_at_ms = system_time_ms(meta.modified()?);
        let now = now_ms();

        if now.saturating_sub(modified_at_ms) < DEBOUNCE.as_millis() as i64 {
            debug!(file = %path.display(), "debounced, still being written");
            return Ok(false);
        }

        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        if self.store.ldx_file_seen(&file_name)? {
            return Ok(false);
        }

        let content = std::fs::read(path)?;
        let content_hash = hex::encode(Sha256::digest(&content));

        let prev_file_ms = self.store.latest_ldx_first_seen_ms()?;
        let values = self.store.list_all_values()?;
        let plan = {
            let registry = self
                .registry
                .read()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            plan_entries(&registry, &values, now, prev_file_ms)
        };

        let entries: Vec<InjectionEntry> = plan
            .iter()
            .map(|(field_id, (value, _))| InjectionEntry {
                field_id: field_id.clone(),
                value: value.clone(),
            })
            .collect();
        let output = inject_entries(&content, &entries)?;

        write_atomically(path, output).await?;

        let rows: Vec<(String, String, bool)> = plan
            .into_iter()
            .map(|(field_id, (value, was_update))| (field_id, value, was_update))
            .collect();
        let recorded = self.store.record_processed_file(
            &LdxFileMeta {
                file_name: file_name.clone(),
                size: meta.len(),
                modified_at_ms,
                content_hash,
                first_seen_at_ms: now,
            },
            &rows,
        )?;
        if recorded {
            info!(file = %file_name, entries = rows.len(), "injected LDX file");
        }
        Ok(recorded)
    }
}

/// Decides what to inject and how each entry is classified.
///
/// A field is injected when it has a non-null stored value; `was_update`
/// is true when the value is inside its validity window, or (for fields
/// without one) when the value changed since the previous file was
/// processed (the first file counts every stored value as an update).
#[must_use]
pub fn plan_entries(
    registry: &FormRegistry,
    values: &BTreeMap<(Role, String), ValueRecord>,
    now_ms: i64,
    prev_file_ms: Option<i64>,
) -> BTreeMap<String, (String, bool)> {
    let mut out = BTreeMap::new();
    for schema in registry.all() {
        for field in &schema.fields {
            let Some(record) = values.get(&(schema.role, field.name.clone())) else {
                continue;
            };
            let Some(value) = record.value.clone() else {
                continue;
            };
            let was_update = match field.validity_window {
                Some(window_secs) => {
                    now_ms.saturating_sub(record.updated_at_ms) <= (window_secs as i64) * 1000
                }
                None => prev_file_ms.is_none_or(|prev| record.updated_at_ms > prev),
            };
            out.insert(field.inject_id().to_string(), (value, was_update));
        }
    }
    out
}

/// Enumerates regular `*.ldx` files (case-insensitive) in `dir`, sorted by
/// name for deterministic processing order.
fn ldx_files_in(dir: &Path) -> Vec<PathBuf> {
    let Ok(read) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut paths: Vec<PathBuf> = read
        .filter_map(Result::ok)
        .map(|e| e.path())
        .filter(|p| p.is_file())
        .filter(|p| {
            p.extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| e.eq_ignore_ascii_case("ldx"))
        })
        .collect();
    paths.sort();
    paths
}

/// Writes `content` to a sibling temp file, fsyncs, then renames over the
/// original so readers never observe a half-written file.
async fn write_atomically(path: &Path, content: Vec<u8>) -> Result<(), WatchError> {
    let path = path.to_path_buf();
    let result = tokio::time::timeout(
        WRITE_TIMEOUT,
        tokio::task::spawn_blocking(move || -> Result<(), std::io::Error> {
            let tmp = path.with_extension("ldx.tmp");
            {
                use std::io::Write;
                let mut file = std::fs::File::create(&tmp)?;
                file.write_all(&content)?;
                file.sync_all()?;
            }
            std::fs::rename(&tmp, &path)?;
            Ok(())
        }),
    )
    .await;
    match result {
        Ok(Ok(io_result)) => io_result.map_err(WatchError::Io),
        Ok(Err(join_err)) => Err(WatchError::Io(std::io::Error::other(join_err))),
        Err(_) => Err(WatchError::WriteTimeout),
    }
}

fn system_time_ms(t: std::time::SystemTime) -> i64 {
    t.duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
