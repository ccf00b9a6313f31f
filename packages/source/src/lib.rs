#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Upstream collaborators of the risk engine.
//!
//! Each kind of input has a trait describing the contract the engine
//! relies on, and one or more concrete implementations:
//!
//! * [`BoundarySource`]: unit identity and polygons ([`boundary`])
//! * [`EventSource`]: violent event counts per unit ([`acled`])
//! * [`ForecastSource`]: state-level violence forecasts ([`cast`])
//! * [`PopulationRegistry`], [`FacilityRegistry`], [`PovertyRegistry`]:
//!   static per-unit tables ([`population`], [`facilities`], [`poverty`])
//!
//! Country-specific settings (boundary field names, state aliases,
//! facility filters) come from embedded TOML profiles ([`registry`]).

pub mod acled;
pub mod admin;
pub mod boundary;
pub mod cast;
pub mod facilities;
pub mod parsing;
pub mod population;
pub mod poverty;
pub mod profile;
pub mod progress;
pub mod registry;
pub mod retry;

use std::collections::BTreeMap;
use std::sync::Arc;

use adm2_risk_source_models::{EventSnapshot, ForecastSnapshot};
use adm2_risk_spatial::BoundaryFeature;
use async_trait::async_trait;
use chrono::NaiveDate;

use crate::progress::ProgressCallback;

/// Errors that can occur while reading upstream data.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    /// HTTP request failed.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON parsing failed.
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    /// CSV parsing failed.
    #[error("CSV parse error: {0}")]
    Csv(#[from] csv::Error),

    /// I/O error (file read/write).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Boundary file could not be parsed.
    #[error("Boundary error: {0}")]
    Spatial(#[from] adm2_risk_spatial::SpatialError),

    /// A required environment variable is not set.
    #[error("Missing environment variable: {name}")]
    MissingEnv {
        /// Variable name.
        name: String,
    },

    /// The upstream rejected our credentials.
    #[error("Authentication failed: {message}")]
    Auth {
        /// Description of what went wrong.
        message: String,
    },

    /// Upstream answered with a non-success status.
    #[error("Upstream error: {message}")]
    Upstream {
        /// Status and endpoint.
        message: String,
    },

    /// An input file is missing a required column or has no rows.
    #[error("Format error: {message}")]
    Format {
        /// Description of what went wrong.
        message: String,
    },

    /// No embedded country profile has this id.
    #[error("Unknown country profile '{id}' (available: {available})")]
    UnknownProfile {
        /// Requested id.
        id: String,
        /// Comma-separated ids of the embedded profiles.
        available: String,
    },
}

/// Per-unit values keyed by `adm2_code`.
pub type UnitValues<T> = BTreeMap<String, T>;

/// Boundaries plus a fingerprint identifying their version.
#[derive(Debug, Clone)]
pub struct BoundarySet {
    /// One feature per unit.
    pub features: Vec<BoundaryFeature>,
    /// SHA-256 of the raw boundary input.
    pub fingerprint: String,
}

/// Provides the unit universe and its polygons.
pub trait BoundarySource: Send + Sync {
    /// Short identifier for logs.
    fn id(&self) -> &str;

    /// Loads every unit.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError`] if the boundaries can't be read. Individual
    /// bad polygons are not errors; they come back with `geometry: None`.
    fn load(&self) -> Result<BoundarySet, SourceError>;
}

/// Provides violent event counts.
#[async_trait]
pub trait EventSource: Send + Sync {
    /// Short identifier for logs and cache file names.
    fn id(&self) -> &str;

    /// The most recent date upstream will serve.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError`] if upstream is unreachable or rejects us.
    async fn recency_cap(&self) -> Result<NaiveDate, SourceError>;

    /// Counts events per unit for the windows ending at `cap`.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError`] if fetching or attribution fails.
    async fn fetch_window_counts(
        &self,
        cap: NaiveDate,
        progress: Arc<dyn ProgressCallback>,
    ) -> Result<EventSnapshot, SourceError>;
}

/// Provides state-level forecasts.
#[async_trait]
pub trait ForecastSource: Send + Sync {
    /// Short identifier for logs and cache file names.
    fn id(&self) -> &str;

    /// Forecast totals for months starting at `month` (first of month),
    /// falling back to the latest month available.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError`] if fetching fails.
    async fn fetch_forecast(&self, month: NaiveDate) -> Result<ForecastSnapshot, SourceError>;
}

/// Total population per unit. Units absent from the table have unknown
/// population.
pub trait PopulationRegistry: Send + Sync {
    /// Loads the table.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError`] if the table can't be read.
    fn population(&self) -> Result<UnitValues<u64>, SourceError>;
}

/// Health facility counts per unit. The register is exhaustive, so units
/// absent from the table have zero facilities.
pub trait FacilityRegistry: Send + Sync {
    /// Loads the table.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError`] if the table can't be read.
    fn facility_counts(&self) -> Result<UnitValues<u64>, SourceError>;
}

/// Poverty rate (percent) per unit. Units absent from the table, or
/// reported as not available, have unknown poverty.
pub trait PovertyRegistry: Send + Sync {
    /// Loads the table.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError`] if the table can't be read.
    fn poverty_rates(&self) -> Result<UnitValues<f64>, SourceError>;
}

/// Reads a required environment variable.
///
/// # Errors
///
/// Returns [`SourceError::MissingEnv`] if the variable is unset.
pub fn require_env(name: &str) -> Result<String, SourceError> {
    std::env::var(name).map_err(|_| SourceError::MissingEnv {
        name: name.to_string(),
    })
}
