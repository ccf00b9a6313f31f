//! On-disk snapshot persistence.
//!
//! A stream named `events` lives in two files under the cache directory:
//! `events_snapshot.json` (the payload, tagged with its generation and
//! `data_as_of`) and `events_state.json` (the [`CacheState`]). Both are
//! written to synced temp files and renamed, snapshot first. A crash
//! between the two renames leaves a snapshot the state doesn't describe;
//! [`crate::resolve`] then refetches with the surviving state as the
//! floor.

use std::fs::File;
use std::io::Write as _;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::{CacheError, CacheState, Resolved, SCHEMA_VERSION};

#[derive(Serialize, Deserialize)]
struct Envelope<P> {
    generation: u64,
    data_as_of: NaiveDate,
    payload: P,
}

/// Persisted snapshot and state for one stream.
#[derive(Debug, Clone)]
pub struct SnapshotStore<T> {
    state_path: PathBuf,
    snapshot_path: PathBuf,
    _payload: PhantomData<T>,
}

impl<T> SnapshotStore<T>
where
    T: Serialize + DeserializeOwned,
{
    /// A store for `stream` under `dir`.
    #[must_use]
    pub fn new(dir: &Path, stream: &str) -> Self {
        Self {
            state_path: dir.join(format!("{stream}_state.json")),
            snapshot_path: dir.join(format!("{stream}_snapshot.json")),
            _payload: PhantomData,
        }
    }

    /// Path of the state file.
    #[must_use]
    pub fn state_path(&self) -> &Path {
        &self.state_path
    }

    /// Reads the persisted state only.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but can't be read or parsed.
    pub fn load_state(&self) -> Result<Option<CacheState>, CacheError> {
        if !self.state_path.exists() {
            return Ok(None);
        }
        let state: CacheState = serde_json::from_slice(&std::fs::read(&self.state_path)?)?;
        if state.schema_version != SCHEMA_VERSION {
            log::warn!(
                "Ignoring {} (schema version {} != {SCHEMA_VERSION})",
                self.state_path.display(),
                state.schema_version
            );
            return Ok(None);
        }
        Ok(Some(state))
    }

    /// Reads the persisted state and snapshot.
    ///
    /// Returns `None` (a cold start) when either file is absent, the
    /// schema version differs, or the two files disagree.
    ///
    /// # Errors
    ///
    /// Returns an error if a file exists but can't be read or parsed.
    pub fn load(&self) -> Result<Option<(CacheState, T)>, CacheError> {
        let Some(state) = self.load_state()? else {
            return Ok(None);
        };
        if !self.snapshot_path.exists() {
            log::warn!(
                "{} has no snapshot at {}; treating as cold",
                self.state_path.display(),
                self.snapshot_path.display()
            );
            return Ok(None);
        }

        let envelope: Envelope<T> = serde_json::from_slice(&std::fs::read(&self.snapshot_path)?)?;
        if envelope.generation != state.generation || envelope.data_as_of != state.data_as_of {
            log::warn!(
                "{} (generation {}) does not match state generation {}; treating as cold",
                self.snapshot_path.display(),
                envelope.generation,
                state.generation
            );
            return Ok(None);
        }

        Ok(Some((state, envelope.payload)))
    }

    /// Writes `payload` and then `state`.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or any file operation fails.
    pub fn save(&self, state: &CacheState, payload: &T) -> Result<(), CacheError> {
        for file in self.stage_files(state, payload)? {
            file.publish()?;
        }
        log::debug!(
            "Persisted {} (generation {}, data_as_of {})",
            self.state_path.display(),
            state.generation,
            state.data_as_of
        );
        Ok(())
    }

    /// Writes a resolved refresh to temp files beside the cache files
    /// without replacing them. Publishing the returned files in order
    /// (snapshot, then state) completes the commit; dropping them leaves
    /// the cache as it was.
    ///
    /// Reused caches stage nothing.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or writing a temp file fails.
    pub fn stage(&self, resolved: &Resolved<T>) -> Result<Vec<StagedWrite>, CacheError> {
        if !resolved.is_pending() {
            return Ok(Vec::new());
        }
        self.stage_files(&resolved.state, &resolved.payload)
    }

    /// Persists a resolved refresh. Reused caches are left untouched.
    ///
    /// Returns whether anything was written.
    ///
    /// # Errors
    ///
    /// Returns an error if writing fails.
    pub fn commit(&self, resolved: &Resolved<T>) -> Result<bool, CacheError> {
        let staged = self.stage(resolved)?;
        let written = !staged.is_empty();
        for file in staged {
            file.publish()?;
        }
        Ok(written)
    }

    fn stage_files(&self, state: &CacheState, payload: &T) -> Result<Vec<StagedWrite>, CacheError> {
        let envelope = Envelope {
            generation: state.generation,
            data_as_of: state.data_as_of,
            payload,
        };
        let snapshot = StagedWrite::new(&self.snapshot_path, &serde_json::to_vec(&envelope)?)?;
        let state = StagedWrite::new(&self.state_path, &serde_json::to_vec_pretty(state)?)?;
        Ok(vec![snapshot, state])
    }
}

/// A file fully written and synced beside its destination, waiting to be
/// renamed into place.
///
/// Dropping it unpublished removes the temp file.
#[derive(Debug)]
#[must_use = "a staged write does nothing until published"]
pub struct StagedWrite {
    tmp: PathBuf,
    path: PathBuf,
    published: bool,
}

impl StagedWrite {
    /// Writes `bytes` to `<path>.tmp` and syncs it. Creates the parent
    /// directory if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if any file operation fails.
    pub fn new(path: &Path, bytes: &[u8]) -> std::io::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut tmp = path.as_os_str().to_owned();
        tmp.push(".tmp");
        let staged = Self {
            tmp: PathBuf::from(tmp),
            path: path.to_path_buf(),
            published: false,
        };

        let mut file = File::create(&staged.tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        Ok(staged)
    }

    /// Final destination.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Renames the temp file over the destination.
    ///
    /// # Errors
    ///
    /// Returns an error if the rename fails.
    pub fn publish(mut self) -> std::io::Result<()> {
        std::fs::rename(&self.tmp, &self.path)?;
        self.published = true;
        Ok(())
    }
}

impl Drop for StagedWrite {
    fn drop(&mut self) {
        if !self.published {
            std::fs::remove_file(&self.tmp).ok();
        }
    }
}
