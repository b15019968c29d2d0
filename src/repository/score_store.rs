//! Durable, quality-sorted snapshot of proxy evaluation results
//!
//! Every write goes to `<file>.tmp` first and is then renamed over the final
//! path, so readers only ever see a complete snapshot.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::error::{RankError, Result};
use crate::models::{sort_by_quality, ProxyRecord};

/// Why a persisted store could not be used as a pool source
#[derive(Error, Debug)]
pub enum StoreReadError {
    #[error("{} does not exist", .0.display())]
    Missing(PathBuf),

    #[error("{} contains no records", .0.display())]
    Empty(PathBuf),

    #[error("{} is malformed: {reason}", path.display())]
    Malformed { path: PathBuf, reason: String },
}

/// In-memory results plus their on-disk materialization.
///
/// The lock covers both the result list and the file write, so the list a
/// caller can observe is always the list that was last persisted.
pub struct ScoreStore {
    path: PathBuf,
    records: Mutex<Vec<ProxyRecord>>,
}

impl ScoreStore {
    /// Create an empty store that will write to `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            records: Mutex::new(Vec::new()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Add a completed evaluation and persist the re-sorted snapshot.
    ///
    /// Records with `success_rate == 0` are dropped. An earlier record for the
    /// same host:port is replaced. Returns whether the record was stored.
    /// On a persistence failure the in-memory list is left unchanged.
    #[instrument(skip(self, record), fields(proxy = %record.address(), score = record.quality_score))]
    pub fn insert(&self, record: ProxyRecord) -> Result<bool> {
        if record.success_rate <= 0.0 {
            debug!("Dropping proxy with no successful attempts");
            return Ok(false);
        }

        let mut guard = self.records.lock();

        let mut next: Vec<ProxyRecord> = guard
            .iter()
            .filter(|r| !(r.host == record.host && r.port == record.port))
            .cloned()
            .collect();
        next.push(record);
        sort_by_quality(&mut next);

        write_atomic(&self.path, &next)?;
        *guard = next;

        debug!("Score store now holds {} proxies", guard.len());
        Ok(true)
    }

    /// Start a fresh evaluation: persist an empty snapshot and clear memory.
    ///
    /// Results from an earlier run never outlive the run that replaces them.
    pub fn reset(&self) -> Result<()> {
        let mut guard = self.records.lock();
        write_atomic(&self.path, &[])?;
        guard.clear();
        Ok(())
    }

    /// Copy of the current sorted results
    pub fn snapshot(&self) -> Vec<ProxyRecord> {
        self.records.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

/// Write `records`, sorted by descending quality, via temp file and rename
pub fn write_atomic(path: &Path, records: &[ProxyRecord]) -> Result<()> {
    let mut sorted = records.to_vec();
    sort_by_quality(&mut sorted);
    let body = serde_json::to_vec_pretty(&sorted)?;

    let tmp_path = temp_path(path);
    let persisted = (|| -> std::io::Result<()> {
        let mut file = fs::File::create(&tmp_path)?;
        file.write_all(&body)?;
        file.sync_all()?;
        fs::rename(&tmp_path, path)
    })();

    if let Err(source) = persisted {
        if let Err(e) = fs::remove_file(&tmp_path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Failed to clean up {}: {}", tmp_path.display(), e);
            }
        }
        return Err(RankError::Persistence {
            path: path.to_path_buf(),
            source,
        });
    }

    Ok(())
}

/// Parse a persisted store, keeping the order found on disk.
///
/// Missing, empty and malformed files are distinguished so the caller can
/// choose a fallback source.
pub fn read(path: &Path) -> std::result::Result<Vec<ProxyRecord>, StoreReadError> {
    let body = match fs::read(path) {
        Ok(body) => body,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(StoreReadError::Missing(path.to_path_buf()))
        }
        Err(e) => {
            return Err(StoreReadError::Malformed {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })
        }
    };

    if body.iter().all(u8::is_ascii_whitespace) {
        return Err(StoreReadError::Empty(path.to_path_buf()));
    }

    let records: Vec<ProxyRecord> =
        serde_json::from_slice(&body).map_err(|e| StoreReadError::Malformed {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

    if records.is_empty() {
        return Err(StoreReadError::Empty(path.to_path_buf()));
    }

    if let Some(bad) = records
        .iter()
        .find(|r| !(0.0..=1.0).contains(&r.success_rate) || r.quality_score.is_nan() || r.quality_score < 0.0)
    {
        return Err(StoreReadError::Malformed {
            path: path.to_path_buf(),
            reason: format!("record {} has out-of-range values", bad.address()),
        });
    }

    Ok(records)
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".tmp");
    PathBuf::from(name)
}
