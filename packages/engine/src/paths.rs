#![allow(clippy::module_name_repetitions)]
//! Canonical file names and locations of run artifacts.

use std::path::{Path, PathBuf};

use crate::RunConfig;

/// Published risk table.
pub const RISK_TABLE: &str = "adm2_risk_daily.csv";

/// Published centroid table.
pub const GEOMETRY_TABLE: &str = "adm2_geometry.csv";

/// Normalization bounds used in the run.
pub const BOUNDS_FILE: &str = "normalization_bounds.json";

/// Cached neighbor graph.
pub const GRAPH_FILE: &str = "neighbor_graph.json";

/// Cache stream name for conflict events.
pub const EVENTS_STREAM: &str = "events";

/// Cache stream name for state forecasts.
pub const FORECAST_STREAM: &str = "forecast";

/// Where one run reads and writes its artifacts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunPaths {
    /// Directory for published tables.
    pub output_dir: PathBuf,
    /// Directory for cache snapshots and the neighbor graph.
    pub cache_dir: PathBuf,
}

impl RunPaths {
    /// Paths configured in `config`.
    #[must_use]
    pub fn from_config(config: &RunConfig) -> Self {
        Self {
            output_dir: config.output_dir.clone(),
            cache_dir: config.cache_dir.clone(),
        }
    }

    /// Both directories under one root (`out/` and `cache/`).
    #[must_use]
    pub fn under(root: &Path) -> Self {
        Self {
            output_dir: root.join("out"),
            cache_dir: root.join("cache"),
        }
    }

    /// Path of the published risk table.
    #[must_use]
    pub fn risk_table(&self) -> PathBuf {
        self.output_dir.join(RISK_TABLE)
    }

    /// Path of the published centroid table.
    #[must_use]
    pub fn geometry_table(&self) -> PathBuf {
        self.output_dir.join(GEOMETRY_TABLE)
    }

    /// Path of the normalization bounds report.
    #[must_use]
    pub fn bounds(&self) -> PathBuf {
        self.output_dir.join(BOUNDS_FILE)
    }

    /// Path of the cached neighbor graph.
    #[must_use]
    pub fn graph_cache(&self) -> PathBuf {
        self.cache_dir.join(GRAPH_FILE)
    }
}
