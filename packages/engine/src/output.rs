//! Published table writers.
//!
//! Every output is serialized in memory first, then written beside its
//! destination as a [`StagedWrite`]. Nothing replaces a published file
//! until [`Publication::publish`] renames the whole set, so a run that
//! fails while staging leaves the previous outputs and caches in place.

use std::path::Path;

use adm2_risk_cache::StagedWrite;
use adm2_risk_scoring::normalize::NormalizationBounds;
use serde::Serialize;

use crate::EngineError;

/// Serializes `rows` as a CSV table with a header row.
///
/// # Errors
///
/// Returns [`EngineError`] if serialization fails.
pub fn render_table<T: Serialize>(rows: &[T]) -> Result<Vec<u8>, EngineError> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    for row in rows {
        writer.serialize(row)?;
    }
    writer
        .into_inner()
        .map_err(|e| EngineError::Io(e.into_error()))
}

/// Serializes the normalization bounds report.
///
/// # Errors
///
/// Returns [`EngineError`] if serialization fails.
pub fn render_bounds(bounds: &[NormalizationBounds]) -> Result<Vec<u8>, EngineError> {
    Ok(serde_json::to_vec_pretty(bounds)?)
}

/// Files of one run, fully written to temp paths and renamed into place
/// together.
#[derive(Debug, Default)]
#[must_use = "staged files are discarded unless published"]
pub struct Publication {
    staged: Vec<StagedWrite>,
}

impl Publication {
    /// An empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stages `bytes` for `path`.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Io`] if the temp file can't be written.
    pub fn stage(&mut self, path: &Path, bytes: &[u8]) -> Result<(), EngineError> {
        self.staged.push(StagedWrite::new(path, bytes)?);
        Ok(())
    }

    /// Adds files staged elsewhere (cache snapshots). They are published
    /// after everything added before them.
    pub fn extend(&mut self, staged: impl IntoIterator<Item = StagedWrite>) {
        self.staged.extend(staged);
    }

    /// Number of staged files.
    #[must_use]
    pub fn len(&self) -> usize {
        self.staged.len()
    }

    /// Whether nothing is staged.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.staged.is_empty()
    }

    /// Renames every staged file into place, in staging order.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Io`] if a rename fails. Files not yet
    /// renamed are discarded.
    pub fn publish(self) -> Result<(), EngineError> {
        for file in self.staged {
            let path = file.path().to_path_buf();
            file.publish()?;
            log::debug!("Published {}", path.display());
        }
        Ok(())
    }
}
