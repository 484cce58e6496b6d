//! Result store: the durable, deduplicated list of confirmed handles.
//!
//! Plain text, one handle per line. Every write goes to a temporary
//! sibling first and is then renamed over the real file, so a crash
//! mid-write leaves either the old or the new list, never a torn one.
//!
//! `merge` and `dedupe_and_shuffle` are read-modify-write operations and
//! run under the same lock; neither can lose an entry the other just added.

use std::ffi::OsString;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;
use tracing::{debug, info};

use crate::candidate::{Candidate, ResultSet};
use crate::random::{RandomSource, SourceRng};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("cannot read result file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot write result file {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MergeSummary {
    pub added: usize,
    pub total: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShuffleSummary {
    pub duplicates_removed: usize,
    pub total: usize,
}

pub struct ResultStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl ResultStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current contents. A missing file is an empty set.
    pub fn load(&self) -> Result<ResultSet, StoreError> {
        let _guard = self.guard();
        Ok(self.read_lines()?.into_iter().collect())
    }

    /// Replace the file with `set`.
    pub fn flush(&self, set: &ResultSet) -> Result<(), StoreError> {
        let _guard = self.guard();
        self.write_all(set.as_slice())
    }

    /// Union `candidates` into the stored set. Idempotent.
    pub fn merge(&self, candidates: &ResultSet) -> Result<MergeSummary, StoreError> {
        let _guard = self.guard();
        let mut stored: ResultSet = self.read_lines()?.into_iter().collect();
        let added = stored.extend_from(candidates);
        self.write_all(stored.as_slice())?;
        debug!(added, total = stored.len(), file = %self.path.display(), "Result set merged");
        Ok(MergeSummary {
            added,
            total: stored.len(),
        })
    }

    /// Offline maintenance: drop duplicate lines and randomize order for
    /// handing the list out for review.
    pub fn dedupe_and_shuffle(&self, rng: &dyn RandomSource) -> Result<ShuffleSummary, StoreError> {
        let _guard = self.guard();
        let lines = self.read_lines()?;
        let raw_len = lines.len();
        let mut set: ResultSet = lines.into_iter().collect();
        set.shuffle(&mut SourceRng::new(rng));
        self.write_all(set.as_slice())?;

        let summary = ShuffleSummary {
            duplicates_removed: raw_len - set.len(),
            total: set.len(),
        };
        info!(
            removed = summary.duplicates_removed,
            total = summary.total,
            file = %self.path.display(),
            "🔀 Result file deduplicated and shuffled"
        );
        Ok(summary)
    }

    fn guard(&self) -> MutexGuard<'_, ()> {
        self.lock.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn read_lines(&self) -> Result<Vec<Candidate>, StoreError> {
        let text = match fs::read_to_string(&self.path) {
            Ok(t) => t,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(StoreError::Read {
                    path: self.path.clone(),
                    source,
                })
            }
        };
        Ok(text
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(Candidate::from)
            .collect())
    }

    /// Write to `<file>.tmp`, fsync, then rename over the real file.
    fn write_all(&self, candidates: &[Candidate]) -> Result<(), StoreError> {
        let write_err = |source| StoreError::Write {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(write_err)?;
        }

        let tmp_path = tmp_sibling(&self.path);
        {
            let mut file = fs::File::create(&tmp_path).map_err(write_err)?;
            for c in candidates {
                writeln!(file, "{}", c).map_err(write_err)?;
            }
            file.sync_all().map_err(write_err)?;
        }
        fs::rename(&tmp_path, &self.path).map_err(write_err)
    }
}

fn tmp_sibling(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| OsString::from("results"));
    name.push(".tmp");
    path.with_file_name(name)
}
