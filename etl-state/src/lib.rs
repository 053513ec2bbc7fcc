//! Durable per-file processing state (C4).
//!
//! The store is a single JSON document at `<root>/.processing-state.json`,
//! an array of [`FileState`] rows keyed by `(path, content_hash)`. Writes
//! are atomic (temp file + fsync + rename); a per-path in-process lock
//! serializes `claim`/`update`/`finish` so two workers can never race on
//! the same file.

mod document;
mod hash;

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, FixedOffset, Local};
use dashmap::DashMap;
use etl_core::types::{FileState, FileStatus, LogFile};
use etl_core::{Error, PROCESSOR_VERSION, Result};

pub use hash::content_digest;

/// Outcome of a `claim` call, telling the caller whether to actually
/// process the file.
#[derive(Debug, Clone)]
pub enum ClaimResult {
    /// Proceed with processing; the store now holds an `in_progress` row
    /// for `(path, content_hash)`.
    Proceed { content_hash: String },
    /// A `completed` row already matches this file's content; skip it.
    SkipCompleted,
    /// Another worker (or a not-yet-stale previous run) holds this file.
    SkipInProgress,
}

/// Accumulated counts applied to an in-flight row after each batch flush.
#[derive(Debug, Clone, Copy, Default)]
pub struct StateDelta {
    pub records_ingested: u64,
    pub parse_failures: u64,
    pub bytes_consumed: u64,
}

/// Terminal disposition passed to `finish`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Completed,
    Failed,
}

fn now() -> DateTime<FixedOffset> {
    Local::now().fixed_offset()
}

pub struct StateStore {
    doc_path: PathBuf,
    document: Mutex<document::StateDocument>,
    stale_after: Duration,
    locks: DashMap<PathBuf, Arc<Mutex<()>>>,
}

impl StateStore {
    /// Opens (or initializes) the state document under `log_root`.
    pub fn open(log_root: &Path, stale_after: Duration) -> Result<Self> {
        let doc_path = log_root.join(".processing-state.json");
        let document = document::load(&doc_path)?;
        Ok(Self {
            doc_path,
            document: Mutex::new(document),
            stale_after,
            locks: DashMap::new(),
        })
    }

    fn path_lock(&self, path: &Path) -> Arc<Mutex<()>> {
        self.locks
            .entry(path.to_path_buf())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn persist(&self, document: &document::StateDocument) -> Result<()> {
        document::save(&self.doc_path, document)
    }

    /// Atomically decides whether `file` should be processed. Computes the
    /// strong content digest only when the cheap `(size, mtime, path)` hash
    /// no longer matches the stored completed row, per the two-tier hash
    /// strategy in the design.
    pub fn claim(&self, file: &LogFile, force: bool) -> Result<ClaimResult> {
        let lock = self.path_lock(&file.path);
        let _guard = lock.lock().map_err(|_| Error::StateStore("state lock poisoned".into()))?;

        let cheap_hash = file.cheap_hash();
        let mut document = self
            .document
            .lock()
            .map_err(|_| Error::StateStore("state document lock poisoned".into()))?;

        if !force {
            if let Some(row) = latest_for_path(&document, &file.path) {
                if row.status == FileStatus::Completed && row.cheap_hash == cheap_hash {
                    return Ok(ClaimResult::SkipCompleted);
                }
                if row.status == FileStatus::InProgress {
                    if is_stale(row, self.stale_after) {
                        tracing::warn!(path = %file.path.display(), "reclaiming stale in-progress file");
                    } else {
                        return Ok(ClaimResult::SkipInProgress);
                    }
                }
            }
        }

        let content_hash = hash::content_digest(&file.path).map_err(Error::Io)?;

        if !force {
            if let Some(existing) = find_mut(&mut document, &file.path, &content_hash) {
                if existing.status == FileStatus::Completed {
                    return Ok(ClaimResult::SkipCompleted);
                }
                if existing.status == FileStatus::InProgress && !is_stale(existing, self.stale_after) {
                    return Ok(ClaimResult::SkipInProgress);
                }
                existing.status = FileStatus::InProgress;
                existing.cheap_hash = cheap_hash;
                existing.records_ingested = 0;
                existing.parse_failures = 0;
                existing.bytes_consumed = 0;
                existing.start_time = Some(now());
                existing.end_time = None;
                existing.error_message = None;
                existing.processor_version = PROCESSOR_VERSION.to_string();
                self.persist(&document)?;
                return Ok(ClaimResult::Proceed { content_hash });
            }
        }

        document.rows.push(FileState {
            path: file.path.clone(),
            content_hash: content_hash.clone(),
            cheap_hash,
            status: FileStatus::InProgress,
            records_ingested: 0,
            parse_failures: 0,
            bytes_consumed: 0,
            start_time: Some(now()),
            end_time: None,
            error_message: None,
            processor_version: PROCESSOR_VERSION.to_string(),
        });
        self.persist(&document)?;
        Ok(ClaimResult::Proceed { content_hash })
    }

    /// Accumulates a batch-flush delta onto an in-progress row.
    pub fn update(&self, path: &Path, content_hash: &str, delta: StateDelta) -> Result<()> {
        let lock = self.path_lock(path);
        let _guard = lock.lock().map_err(|_| Error::StateStore("state lock poisoned".into()))?;

        let mut document = self
            .document
            .lock()
            .map_err(|_| Error::StateStore("state document lock poisoned".into()))?;
        let row = find_mut(&mut document, path, content_hash)
            .ok_or_else(|| Error::StateStore(format!("no claimed row for {}", path.display())))?;
        row.records_ingested += delta.records_ingested;
        row.parse_failures += delta.parse_failures;
        row.bytes_consumed += delta.bytes_consumed;
        self.persist(&document)
    }

    /// Transitions a row to its terminal status.
    pub fn finish(&self, path: &Path, content_hash: &str, outcome: Outcome, error_message: Option<String>) -> Result<()> {
        let lock = self.path_lock(path);
        let _guard = lock.lock().map_err(|_| Error::StateStore("state lock poisoned".into()))?;

        let mut document = self
            .document
            .lock()
            .map_err(|_| Error::StateStore("state document lock poisoned".into()))?;
        let row = find_mut(&mut document, path, content_hash)
            .ok_or_else(|| Error::StateStore(format!("no claimed row for {}", path.display())))?;
        row.status = match outcome {
            Outcome::Completed => FileStatus::Completed,
            Outcome::Failed => FileStatus::Failed,
        };
        row.end_time = Some(now());
        row.error_message = error_message;
        self.persist(&document)
    }

    /// Rows that are not `completed` — candidates for processing or retry.
    pub fn list_unfinished(&self) -> Result<Vec<FileState>> {
        let document = self
            .document
            .lock()
            .map_err(|_| Error::StateStore("state document lock poisoned".into()))?;
        Ok(document
            .rows
            .iter()
            .filter(|r| r.status != FileStatus::Completed)
            .cloned()
            .collect())
    }

    /// All rows, for `--status` reporting.
    pub fn list_all(&self) -> Result<Vec<FileState>> {
        let document = self
            .document
            .lock()
            .map_err(|_| Error::StateStore("state document lock poisoned".into()))?;
        Ok(document.rows.clone())
    }

    /// Transitions `failed` rows back to `pending`, optionally scoped to a
    /// single date partition (matched against the row's path). Returns the
    /// number of rows reset. Never touches `completed` rows, per the state
    /// monotonicity invariant.
    pub fn reset_failed(&self, date_partition: Option<&str>) -> Result<usize> {
        let mut document = self
            .document
            .lock()
            .map_err(|_| Error::StateStore("state document lock poisoned".into()))?;
        let mut count = 0;
        for row in document.rows.iter_mut() {
            if row.status != FileStatus::Failed {
                continue;
            }
            if let Some(partition) = date_partition {
                let path_str = row.path.to_string_lossy();
                if !path_str.contains(partition) {
                    continue;
                }
            }
            row.status = FileStatus::Pending;
            row.error_message = None;
            count += 1;
        }
        if count > 0 {
            self.persist(&document)?;
        }
        Ok(count)
    }
}

fn latest_for_path<'a>(document: &'a document::StateDocument, path: &Path) -> Option<&'a FileState> {
    document
        .rows
        .iter()
        .filter(|r| r.path == path)
        .max_by_key(|r| r.start_time)
}

fn find_mut<'a>(document: &'a mut document::StateDocument, path: &Path, content_hash: &str) -> Option<&'a mut FileState> {
    document
        .rows
        .iter_mut()
        .find(|r| r.path == path && r.content_hash == content_hash)
}

fn is_stale(row: &FileState, stale_after: Duration) -> bool {
    match row.start_time {
        Some(start) => {
            let elapsed = now().signed_duration_since(start);
            elapsed.to_std().map(|d| d > stale_after).unwrap_or(false)
        }
        None => true,
    }
}
