#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Phase-ordered ADM2 risk scoring runs.
//!
//! A run goes through these phases in order:
//!
//! 1. load boundaries and the neighbor graph (cached by boundary
//!    fingerprint)
//! 2. load the static registries
//! 3. resolve the event and forecast streams through the recency cache
//! 4. derive rates, normalize, compute spillover, normalize spillover,
//!    score ([`assemble`])
//! 5. stage the published tables and refreshed cache snapshots in temp
//!    files ([`output`])
//! 6. rename everything into place, cache state last
//!
//! Nothing is renamed until every file has been written, so a failed run
//! leaves the previous outputs and cache state in place.

pub mod assemble;
pub mod config;
pub mod output;
pub mod paths;
pub mod pipeline;
pub mod units;

pub use config::RunConfig;
pub use pipeline::{
    GraphSummary, RunOptions, RunPlan, RunSummary, Sources, cache_status, execute, graph, run,
};

/// Errors that abort a run.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// An upstream collaborator failed outside the cache's fallback path.
    #[error(transparent)]
    Source(#[from] adm2_risk_source::SourceError),

    /// Boundary or graph file handling failed.
    #[error(transparent)]
    Spatial(#[from] adm2_risk_spatial::SpatialError),

    /// An indicator could not be normalized.
    #[error(transparent)]
    Scoring(#[from] adm2_risk_scoring::ScoringError),

    /// The recency cache could not be read or written, or a cold start
    /// had nothing to serve.
    #[error(transparent)]
    Cache(#[from] adm2_risk_cache::CacheError),

    /// Writing an output file failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// CSV serialization failed.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// JSON serialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The run configuration is malformed.
    #[error("Config error: {0}")]
    Config(#[from] toml::de::Error),

    /// The run has nothing to score.
    #[error("Empty run: {message}")]
    Empty {
        /// Description of what was empty.
        message: String,
    },
}
