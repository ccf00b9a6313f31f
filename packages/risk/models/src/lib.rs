#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Administrative unit, indicator, and risk record types.
//!
//! This crate defines the canonical shapes shared by every stage of the
//! risk pipeline: the ADM2 units being ranked, the indicator taxonomy
//! (with each indicator's risk polarity), and the [`RiskRecord`] row that
//! is the pipeline's published artifact.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

/// Share of the total population counted as women of reproductive age.
pub const WRA_PROPORTION: f64 = 0.25;

/// Rates are expressed per this many people in the at-risk population.
pub const RATE_PER: f64 = 100_000.0;

/// Whether a higher raw value means more or less risk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Polarity {
    /// Larger raw values denote higher risk (violence rates, poverty).
    HigherIsWorse,
    /// Larger raw values are protective (facility density).
    LowerIsWorse,
}

/// The indicators that feed the composite scores.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
pub enum IndicatorKind {
    /// Violent events in the last 30 days per 100k WRA.
    #[serde(rename = "V30")]
    #[strum(serialize = "V30")]
    V30,
    /// Violent events in the last 90 days per 100k WRA.
    #[serde(rename = "V3m")]
    #[strum(serialize = "V3m")]
    V3m,
    /// Violent events in the 30 days before the current window.
    #[serde(rename = "V30prev")]
    #[strum(serialize = "V30prev")]
    V30Prior,
    /// Raw `V30 - V30prev`.
    #[serde(rename = "dV30")]
    #[strum(serialize = "dV30")]
    DeltaV30,
    /// Health facilities per 100k WRA (the access term `A` once inverted).
    #[serde(rename = "A")]
    #[strum(serialize = "A")]
    FacilityDensity,
    /// Municipal poverty rate (the vulnerability term `MVI`).
    #[serde(rename = "MVI")]
    #[strum(serialize = "MVI")]
    Poverty,
    /// State-level violence forecast (`CAST`).
    #[serde(rename = "CAST")]
    #[strum(serialize = "CAST")]
    Forecast,
    /// Neighbor mean of normalized `V30` (`S`).
    #[serde(rename = "S")]
    #[strum(serialize = "S")]
    Spillover,
}

impl IndicatorKind {
    /// Returns the risk polarity of the raw indicator.
    #[must_use]
    pub const fn polarity(self) -> Polarity {
        match self {
            Self::FacilityDensity => Polarity::LowerIsWorse,
            Self::V30
            | Self::V3m
            | Self::V30Prior
            | Self::DeltaV30
            | Self::Poverty
            | Self::Forecast
            | Self::Spillover => Polarity::HigherIsWorse,
        }
    }

    /// Returns all variants of this enum.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[
            Self::V30,
            Self::V3m,
            Self::V30Prior,
            Self::DeltaV30,
            Self::FacilityDensity,
            Self::Poverty,
            Self::Forecast,
            Self::Spillover,
        ]
    }
}

/// A longitude/latitude pair (WGS84).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LonLat {
    /// Longitude in degrees.
    pub lon: f64,
    /// Latitude in degrees.
    pub lat: f64,
}

/// An ADM2 unit (municipality) with its population figures.
///
/// Immutable for the duration of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdministrativeUnit {
    /// First-level division (state) name.
    pub adm1_name: String,
    /// Municipality name.
    pub adm2_name: String,
    /// Unique municipality code (e.g. `MX02001`).
    pub adm2_code: String,
    /// Representative point, if the unit has usable geometry.
    pub centroid: Option<LonLat>,
    /// Total population. `None` when the registry has no row for the unit.
    pub pop_total: Option<u64>,
}

impl AdministrativeUnit {
    /// Women-of-reproductive-age estimate derived from the total.
    #[must_use]
    pub fn pop_wra(&self) -> Option<u64> {
        self.pop_total.map(wra_from_total)
    }
}

/// Derives the WRA population from a total population count.
#[must_use]
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
pub fn wra_from_total(total: u64) -> u64 {
    (total as f64 * WRA_PROPORTION).round() as u64
}

/// Raw (pre-normalization) indicator values for one unit.
///
/// `None` always means "missing", never zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RawIndicators {
    /// 30-day violence rate.
    pub v30: Option<f64>,
    /// 90-day violence rate.
    pub v3m: Option<f64>,
    /// Prior 30-day violence rate.
    pub v30_prior: Option<f64>,
    /// Facilities per 100k WRA.
    pub fac_per_100k: Option<f64>,
    /// Poverty rate (percent).
    pub poverty_rate: Option<f64>,
    /// State forecast value, absent when the state has no forecast.
    pub cast_raw: Option<f64>,
}

impl RawIndicators {
    /// `V30 - V30prev`, computed on raw rates.
    #[must_use]
    pub fn delta_v30(&self) -> Option<f64> {
        match (self.v30, self.v30_prior) {
            (Some(current), Some(prior)) => Some(current - prior),
            _ => None,
        }
    }
}

/// Normalized indicators for one unit, all in `[0, 1]`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct NormalizedIndicators {
    /// Normalized 30-day violence.
    pub v30: Option<f64>,
    /// Normalized 90-day violence.
    pub v3m: Option<f64>,
    /// Normalized violence delta.
    pub delta_v30: Option<f64>,
    /// Normalized spillover.
    pub spillover: Option<f64>,
    /// Normalized (inverted) access.
    pub access: Option<f64>,
    /// Normalized poverty.
    pub mvi: Option<f64>,
    /// Normalized state forecast.
    pub cast: Option<f64>,
}

/// How a unit's spillover value was obtained.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SpilloverKind {
    /// The unit has no neighbors; spillover is a valid 0.
    Isolated,
    /// Mean over neighbors that had a normalized `V30`.
    Neighbors,
    /// Neighbors exist but none had a normalized `V30`.
    NoData,
}

/// Which `PRS` weight set scored the unit.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PrsVariant {
    /// The unit's state had a forecast value.
    WithForecast,
    /// The unit's state had no forecast value.
    WithoutForecast,
}

/// The three composite scores, each in `[0, 100]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CompositeScores {
    /// Descriptive/structural risk.
    pub dcr100: f64,
    /// Predictive risk.
    pub prs100: f64,
    /// `0.6 * PRS + 0.4 * DCR`.
    pub priority100: f64,
    /// Weight set used for `prs100`.
    pub prs_variant: PrsVariant,
}

/// Outcome of scoring one unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ScoreStatus {
    /// All required indicators were present.
    Scored(CompositeScores),
    /// Scores were withheld because required indicators were missing.
    Withheld {
        /// The missing indicators, in taxonomy order.
        missing: Vec<IndicatorKind>,
    },
}

impl ScoreStatus {
    /// Returns the scores if the unit was scored.
    #[must_use]
    pub const fn scores(&self) -> Option<&CompositeScores> {
        match self {
            Self::Scored(scores) => Some(scores),
            Self::Withheld { .. } => None,
        }
    }
}

/// One published row: a unit's scores for a run.
///
/// Flat so it serializes directly to a CSV row. Created fresh each run and
/// never mutated after assembly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskRecord {
    /// Date the run executed.
    pub run_date: NaiveDate,
    /// Most recent upstream event date incorporated into the scores.
    pub data_as_of: NaiveDate,
    /// State name.
    pub adm1_name: String,
    /// Municipality name.
    pub adm2_name: String,
    /// Municipality code.
    pub adm2_code: String,
    /// Total population.
    pub pop_total: Option<u64>,
    /// WRA population.
    pub pop_wra: Option<u64>,
    /// Population exposure weight in `[0.5, 2.0]`.
    pub w_exposure: f64,
    /// Raw 30-day rate.
    pub v30: Option<f64>,
    /// Raw 90-day rate.
    pub v3m: Option<f64>,
    /// Raw prior 30-day rate.
    pub v30_prior: Option<f64>,
    /// Raw delta.
    pub dlt_v30_raw: Option<f64>,
    /// Raw facility density.
    pub fac_per_100k: Option<f64>,
    /// Raw poverty rate.
    pub poverty_rate: Option<f64>,
    /// Raw state forecast.
    pub cast_raw: Option<f64>,
    /// Raw spillover (neighbor mean of normalized `V30`).
    pub spillover_raw: Option<f64>,
    /// How the spillover was obtained.
    pub spillover_kind: SpilloverKind,
    /// Normalized `V30`.
    pub norm_v30: Option<f64>,
    /// Normalized `V3m`.
    pub norm_v3m: Option<f64>,
    /// Normalized delta.
    pub norm_dv30: Option<f64>,
    /// Normalized spillover `S`.
    pub norm_s: Option<f64>,
    /// Access term `A`.
    pub access_a: Option<f64>,
    /// Vulnerability term `MVI`.
    pub mvi: Option<f64>,
    /// Normalized forecast `CAST`.
    pub cast_state: Option<f64>,
    /// `PRS` weight set used, when scored.
    pub prs_variant: Option<PrsVariant>,
    /// Descriptive risk score.
    #[serde(rename = "DCR100")]
    pub dcr100: Option<f64>,
    /// Predictive risk score.
    #[serde(rename = "PRS100")]
    pub prs100: Option<f64>,
    /// Final priority score.
    pub priority100: Option<f64>,
    /// Semicolon-separated list of missing indicators (empty when scored).
    pub missing_indicators: String,
}

impl RiskRecord {
    /// Whether the unit received composite scores.
    #[must_use]
    pub const fn is_scored(&self) -> bool {
        self.priority100.is_some()
    }
}

/// Joins indicator kinds into the `missing_indicators` column format.
#[must_use]
pub fn format_missing(missing: &[IndicatorKind]) -> String {
    missing
        .iter()
        .map(AsRef::as_ref)
        .collect::<Vec<&str>>()
        .join(";")
}

/// Centroid lookup row published next to the risk table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeometryRecord {
    /// State name.
    pub adm1_name: String,
    /// Municipality name.
    pub adm2_name: String,
    /// Municipality code.
    pub adm2_code: String,
    /// Centroid longitude.
    pub lon: Option<f64>,
    /// Centroid latitude.
    pub lat: Option<f64>,
}

impl From<&AdministrativeUnit> for GeometryRecord {
    fn from(unit: &AdministrativeUnit) -> Self {
        Self {
            adm1_name: unit.adm1_name.clone(),
            adm2_name: unit.adm2_name.clone(),
            adm2_code: unit.adm2_code.clone(),
            lon: unit.centroid.map(|c| c.lon),
            lat: unit.centroid.map(|c| c.lat),
        }
    }
}
