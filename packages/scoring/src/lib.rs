#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! The risk scoring kernel.
//!
//! Turns raw per-unit indicator values into the published composite
//! scores, in strict phase order:
//!
//! 1. [`rates`] derives per-100k rates from counts and population.
//! 2. [`normalize`] winsorizes each indicator across the whole run and
//!    rescales it to `[0, 1]` (a whole-collection operation).
//! 3. [`spillover`] averages neighbors' normalized `V30`.
//! 4. [`composite`] combines the normalized indicators into `DCR100`,
//!    `PRS100`, and `priority100`.
//!
//! [`exposure`] computes the population exposure weight published next
//! to the scores.

pub mod composite;
pub mod exposure;
pub mod normalize;
pub mod rates;
pub mod spillover;

use adm2_risk_models::IndicatorKind;

/// Errors that abort a scoring run.
///
/// Per-unit problems (missing indicators) never produce an error; they
/// are recorded on the unit's [`adm2_risk_models::ScoreStatus`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScoringError {
    /// No unit had a value for the indicator, so percentile bounds can't
    /// be computed.
    #[error("Indicator {kind} has no values in this run")]
    EmptyIndicator {
        /// The empty indicator.
        kind: IndicatorKind,
    },
}
