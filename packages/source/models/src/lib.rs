#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Upstream snapshot types and upstream endpoint configuration.
//!
//! Every conflict-event provider reduces its raw records to an
//! [`EventSnapshot`] (per-unit counts for the three event windows), and
//! every forecast provider to a [`ForecastSnapshot`]. These are the
//! payloads the recency cache persists between runs.

use std::collections::BTreeMap;

use chrono::{Datelike as _, Days, NaiveDate};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

/// Length of the short violence window, in days.
pub const WINDOW_30_DAYS: u64 = 30;

/// Length of the long violence window, in days.
pub const WINDOW_90_DAYS: u64 = 90;

/// Start of the prior window, in days before the cap.
pub const PRIOR_WINDOW_START_DAYS: u64 = 60;

/// ACLED event types.
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
pub enum EventType {
    /// Armed clashes.
    #[serde(rename = "Battles")]
    #[strum(serialize = "Battles")]
    Battles,
    /// Bombings, shelling, remote attacks.
    #[serde(rename = "Explosions/Remote violence")]
    #[strum(serialize = "Explosions/Remote violence")]
    ExplosionsRemoteViolence,
    /// Attacks on unarmed civilians.
    #[serde(rename = "Violence against civilians")]
    #[strum(serialize = "Violence against civilians")]
    ViolenceAgainstCivilians,
    /// Demonstrations.
    #[serde(rename = "Protests")]
    #[strum(serialize = "Protests")]
    Protests,
    /// Violent demonstrations.
    #[serde(rename = "Riots")]
    #[strum(serialize = "Riots")]
    Riots,
    /// Non-violent but significant developments.
    #[serde(rename = "Strategic developments")]
    #[strum(serialize = "Strategic developments")]
    StrategicDevelopments,
}

impl EventType {
    /// Whether events of this type count toward the violence indicators.
    #[must_use]
    pub const fn is_violent(self) -> bool {
        matches!(
            self,
            Self::Battles | Self::ExplosionsRemoteViolence | Self::ViolenceAgainstCivilians
        )
    }
}

/// The three event windows, anchored at the upstream recency cap.
///
/// * 90-day: `[cap - 90, cap]`
/// * 30-day: `(cap - 30, cap]`, derived from the 90-day set
/// * prior: `[cap - 60, cap - 30]`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventWindows {
    /// The recency cap.
    pub cap: NaiveDate,
    /// First day of the 90-day window.
    pub from_90: NaiveDate,
    /// Events strictly after this date are in the 30-day window.
    pub after_30: NaiveDate,
    /// First day of the prior window.
    pub prior_from: NaiveDate,
    /// Last day of the prior window.
    pub prior_to: NaiveDate,
}

impl EventWindows {
    /// Windows ending at `cap`.
    #[must_use]
    pub fn ending(cap: NaiveDate) -> Self {
        let back = |days| cap.checked_sub_days(Days::new(days)).unwrap_or(NaiveDate::MIN);
        Self {
            cap,
            from_90: back(WINDOW_90_DAYS),
            after_30: back(WINDOW_30_DAYS),
            prior_from: back(PRIOR_WINDOW_START_DAYS),
            prior_to: back(WINDOW_30_DAYS),
        }
    }

    /// Whether `date` falls in the 90-day window.
    #[must_use]
    pub fn in_90(&self, date: NaiveDate) -> bool {
        date >= self.from_90 && date <= self.cap
    }

    /// Whether `date` falls in the 30-day window.
    #[must_use]
    pub fn in_30(&self, date: NaiveDate) -> bool {
        date > self.after_30 && date <= self.cap
    }

    /// Whether `date` falls in the prior window.
    #[must_use]
    pub fn in_prior(&self, date: NaiveDate) -> bool {
        date >= self.prior_from && date <= self.prior_to
    }
}

/// Violent event counts for one unit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowCounts {
    /// Events in the 30-day window.
    pub last_30: u64,
    /// Events in the 90-day window.
    pub last_90: u64,
    /// Events in the prior window.
    pub prior_30: u64,
}

impl WindowCounts {
    /// Tallies one event dated `date`.
    pub fn record(&mut self, windows: &EventWindows, date: NaiveDate) {
        if windows.in_90(date) {
            self.last_90 += 1;
        }
        if windows.in_30(date) {
            self.last_30 += 1;
        }
        if windows.in_prior(date) {
            self.prior_30 += 1;
        }
    }

    /// Whether no event was counted in any window.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.last_30 == 0 && self.last_90 == 0 && self.prior_30 == 0
    }
}

/// Per-unit violent event counts as of one recency cap.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventSnapshot {
    /// Windows the counts were tallied over.
    pub windows: EventWindows,
    /// Counts by `adm2_code`. Units without events are absent.
    pub counts: BTreeMap<String, WindowCounts>,
    /// Distinct violent events fetched.
    pub total_events: u64,
    /// Events that fell outside every unit polygon.
    pub unattributed: u64,
}

impl EventSnapshot {
    /// The upstream date these counts are current to.
    #[must_use]
    pub const fn data_as_of(&self) -> NaiveDate {
        self.windows.cap
    }

    /// Counts for a unit. A country-wide query that found nothing in the
    /// unit is a true zero.
    #[must_use]
    pub fn counts_for(&self, adm2_code: &str) -> WindowCounts {
        self.counts.get(adm2_code).copied().unwrap_or_default()
    }
}

/// State-level forecast totals for one forecast month.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastSnapshot {
    /// First day of the earliest month the totals cover.
    pub month: NaiveDate,
    /// Forecast totals by canonical state name.
    pub states: BTreeMap<String, f64>,
}

impl ForecastSnapshot {
    /// An empty snapshot for `month` (no state has a forecast).
    #[must_use]
    pub const fn empty(month: NaiveDate) -> Self {
        Self {
            month,
            states: BTreeMap::new(),
        }
    }

    /// Forecast for a canonical state name. `None` means the state had
    /// no forecast, which is different from a forecast of zero.
    #[must_use]
    pub fn value(&self, adm1_join: &str) -> Option<f64> {
        self.states.get(adm1_join).copied()
    }
}

/// First day of the month containing `date`.
#[must_use]
pub fn month_anchor(date: NaiveDate) -> NaiveDate {
    date.with_day(1).unwrap_or(date)
}

/// One ACLED event as returned by the read endpoint.
///
/// ACLED serializes every field as a string; parsing happens downstream.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct AcledEvent {
    /// Event identifier, unique per country.
    #[serde(default)]
    pub event_id_cnty: Option<String>,
    /// `YYYY-MM-DD`.
    #[serde(default)]
    pub event_date: Option<String>,
    /// Event type name.
    #[serde(default)]
    pub event_type: Option<String>,
    /// Country name.
    #[serde(default)]
    pub country: Option<String>,
    /// Latitude in degrees.
    #[serde(default, deserialize_with = "string_or_number")]
    pub latitude: Option<String>,
    /// Longitude in degrees.
    #[serde(default, deserialize_with = "string_or_number")]
    pub longitude: Option<String>,
}

/// One row of the CAST forecast CSV.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CastRow {
    /// Country name.
    #[serde(default)]
    pub country: Option<String>,
    /// State name.
    pub admin1: String,
    /// English month name.
    pub month: String,
    /// Forecast year.
    pub year: i32,
    /// Total forecast events.
    #[serde(default)]
    pub total_forecast: Option<f64>,
}

fn string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Number(f64),
    }

    Ok(match Option::<Raw>::deserialize(deserializer)? {
        Some(Raw::Text(s)) => Some(s),
        Some(Raw::Number(n)) => Some(n.to_string()),
        None => None,
    })
}

// ── Upstream configuration ───────────────────────────────────────────────

/// ACLED endpoints and paging.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AcledConfig {
    /// OAuth password-grant token endpoint.
    pub token_url: String,
    /// Event read endpoint.
    pub read_url: String,
    /// CAST forecast read endpoint.
    pub cast_url: String,
    /// OAuth client id.
    pub client_id: String,
    /// Pipe-separated field list requested from the read endpoint.
    pub fields: String,
    /// Rows per event page.
    pub page_limit: u32,
    /// Upper bound on event pages per window.
    pub max_pages: u32,
    /// Rows per CAST page.
    pub cast_page_limit: u32,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for AcledConfig {
    fn default() -> Self {
        Self {
            token_url: "https://acleddata.com/oauth/token".to_string(),
            read_url: "https://acleddata.com/api/acled/read".to_string(),
            cast_url: "https://acleddata.com/api/cast/read".to_string(),
            client_id: "acled".to_string(),
            fields: "event_id_cnty|event_date|year|disorder_type|event_type|sub_event_type|\
                     country|region|iso|admin1|admin2|location|latitude|longitude|source|\
                     fatalities|notes"
                .to_string(),
            page_limit: 5000,
            max_pages: 200,
            cast_page_limit: 5000,
            timeout_secs: 120,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr as _;

    use super::*;

    fn d(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    #[test]
    fn windows_from_cap() {
        let w = EventWindows::ending(d("2025-06-30"));
        assert_eq!(w.from_90, d("2025-04-01"));
        assert_eq!(w.after_30, d("2025-05-31"));
        assert_eq!(w.prior_from, d("2025-05-01"));
        assert_eq!(w.prior_to, d("2025-05-31"));
    }

    #[test]
    fn window_boundaries() {
        let w = EventWindows::ending(d("2025-06-30"));
        // The 30-day window excludes its start date; the prior window
        // includes its end date.
        assert!(!w.in_30(d("2025-05-31")));
        assert!(w.in_prior(d("2025-05-31")));
        assert!(w.in_30(d("2025-06-01")));
        assert!(w.in_30(d("2025-06-30")));
        assert!(!w.in_30(d("2025-07-01")));
        assert!(w.in_90(d("2025-04-01")));
        assert!(!w.in_90(d("2025-03-31")));
    }

    #[test]
    fn record_counts_overlapping_windows() {
        let w = EventWindows::ending(d("2025-06-30"));
        let mut counts = WindowCounts::default();
        counts.record(&w, d("2025-06-15"));
        counts.record(&w, d("2025-05-10"));
        counts.record(&w, d("2025-04-02"));
        counts.record(&w, d("2024-01-01"));
        assert_eq!(
            counts,
            WindowCounts {
                last_30: 1,
                last_90: 3,
                prior_30: 1,
            }
        );
    }

    #[test]
    fn only_three_types_are_violent() {
        let violent: Vec<EventType> = [
            "Battles",
            "Explosions/Remote violence",
            "Violence against civilians",
            "Protests",
            "Riots",
            "Strategic developments",
        ]
        .iter()
        .map(|s| EventType::from_str(s).unwrap())
        .filter(|t| t.is_violent())
        .collect();
        assert_eq!(violent.len(), 3);
        assert!(EventType::from_str("Picnics").is_err());
    }

    #[test]
    fn absent_unit_has_zero_counts() {
        let snapshot = EventSnapshot {
            windows: EventWindows::ending(d("2025-06-30")),
            counts: BTreeMap::new(),
            total_events: 0,
            unattributed: 0,
        };
        assert!(snapshot.counts_for("MX01001").is_empty());
        assert_eq!(snapshot.data_as_of(), d("2025-06-30"));
    }

    #[test]
    fn forecast_absence_is_not_zero() {
        let mut snapshot = ForecastSnapshot::empty(d("2025-06-01"));
        snapshot.states.insert("Sinaloa".to_string(), 0.0);
        assert_eq!(snapshot.value("Sinaloa"), Some(0.0));
        assert_eq!(snapshot.value("Sonora"), None);
    }

    #[test]
    fn acled_event_accepts_numeric_coordinates() {
        let event: AcledEvent = serde_json::from_str(
            r#"{"event_id_cnty":"MEX1","event_date":"2025-06-01","latitude":19.4,"longitude":"-99.1"}"#,
        )
        .unwrap();
        assert_eq!(event.latitude.as_deref(), Some("19.4"));
        assert_eq!(event.longitude.as_deref(), Some("-99.1"));
        assert_eq!(event.country, None);
    }

    #[test]
    fn acled_config_fills_defaults() {
        let config: AcledConfig = toml::from_str("page_limit = 100").unwrap();
        assert_eq!(config.page_limit, 100);
        assert_eq!(config.max_pages, 200);
        assert!(config.fields.starts_with("event_id_cnty|"));
        assert!(!config.fields.contains(' '));
    }

    #[test]
    fn month_anchor_is_first_day() {
        assert_eq!(month_anchor(d("2025-06-17")), d("2025-06-01"));
    }
}
