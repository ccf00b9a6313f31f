//! ACLED CAST forecast collector.
//!
//! CAST publishes monthly forecasts of conflict events per state. The
//! endpoint serves CSV in pages; a page shorter than the page size is the
//! last one.

use std::collections::BTreeMap;
use std::str::FromStr as _;
use std::sync::Arc;

use adm2_risk_source_models::{CastRow, ForecastSnapshot};
use async_trait::async_trait;
use chrono::{Month, NaiveDate};

use crate::acled::AcledSession;
use crate::admin::Adm1Canonicalizer;
use crate::profile::CountryProfile;
use crate::{ForecastSource, SourceError, retry};

/// State-level violence forecasts from the CAST endpoint.
pub struct CastForecast {
    session: Arc<AcledSession>,
    country: String,
    canonicalizer: Adm1Canonicalizer,
}

impl CastForecast {
    /// Creates a collector for the profile's country.
    #[must_use]
    pub fn new(session: Arc<AcledSession>, profile: &CountryProfile) -> Self {
        Self {
            session,
            country: profile.country.clone(),
            canonicalizer: profile.canonicalizer(),
        }
    }

    async fn fetch_rows(&self) -> Result<Vec<CastRow>, SourceError> {
        let token = self.session.token().await?;
        let config = self.session.config();
        let limit = config.cast_page_limit;
        let mut rows = Vec::new();
        let mut page: u32 = 1;

        loop {
            let query = [
                ("_format", "csv".to_string()),
                ("country", self.country.clone()),
                ("limit", limit.to_string()),
                ("page", page.to_string()),
            ];
            let body = retry::send_text(|| {
                self.session
                    .http()
                    .get(&config.cast_url)
                    .bearer_auth(token)
                    .query(&query)
            })
            .await?;

            let chunk = parse_cast_csv(&body)?;
            log::debug!("CAST page {page}: {} rows", chunk.len());
            let short = chunk.len() < limit as usize;
            if chunk.is_empty() {
                break;
            }
            rows.extend(chunk);
            if short {
                break;
            }
            page += 1;
        }
        Ok(rows)
    }
}

#[async_trait]
impl ForecastSource for CastForecast {
    fn id(&self) -> &str {
        "cast"
    }

    async fn fetch_forecast(&self, month: NaiveDate) -> Result<ForecastSnapshot, SourceError> {
        log::info!("Fetching CAST forecasts for {}", self.country);
        let rows = self.fetch_rows().await?;
        let snapshot = select_forecast(&rows, &self.country, month, &self.canonicalizer);
        log::info!(
            "CAST: {} rows, {} states, forecast month {}",
            rows.len(),
            snapshot.states.len(),
            snapshot.month
        );
        Ok(snapshot)
    }
}

/// Parses one CAST CSV page. An empty body is an empty page.
///
/// # Errors
///
/// Returns [`SourceError::Csv`] if a row lacks a required column.
pub fn parse_cast_csv(body: &str) -> Result<Vec<CastRow>, SourceError> {
    if body.trim().is_empty() {
        return Ok(Vec::new());
    }
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(body.as_bytes());
    reader
        .deserialize()
        .collect::<Result<Vec<CastRow>, _>>()
        .map_err(SourceError::from)
}

/// First day of the row's forecast month, if the month name parses.
fn forecast_month(row: &CastRow) -> Option<NaiveDate> {
    let month = Month::from_str(row.month.trim()).ok()?;
    NaiveDate::from_ymd_opt(row.year, month.number_from_month(), 1)
}

/// Sums forecasts per canonical state over the months at or after
/// `month`. When no such month exists the latest month present is used
/// instead. Missing totals count as zero for a state that has a row.
#[must_use]
pub fn select_forecast(
    rows: &[CastRow],
    country: &str,
    month: NaiveDate,
    canonicalizer: &Adm1Canonicalizer,
) -> ForecastSnapshot {
    let dated: Vec<(NaiveDate, &CastRow)> = rows
        .iter()
        .filter(|r| {
            r.country
                .as_deref()
                .is_none_or(|c| c.trim().eq_ignore_ascii_case(country))
        })
        .filter_map(|r| forecast_month(r).map(|m| (m, r)))
        .collect();

    let future: Vec<_> = dated.iter().filter(|(m, _)| *m >= month).collect();
    let selected: Vec<_> = if future.is_empty() {
        let Some(latest) = dated.iter().map(|(m, _)| *m).max() else {
            log::warn!("CAST returned no usable rows for {country}");
            return ForecastSnapshot::empty(month);
        };
        log::warn!("CAST has no forecast for {month} or later; using latest month {latest}");
        dated.iter().filter(|(m, _)| *m == latest).collect()
    } else {
        future
    };

    let first = selected.iter().map(|(m, _)| *m).min().unwrap_or(month);
    let mut states: BTreeMap<String, f64> = BTreeMap::new();
    for (_, row) in selected {
        *states
            .entry(canonicalizer.canonical(&row.admin1))
            .or_default() += row.total_forecast.filter(|v| v.is_finite()).unwrap_or(0.0);
    }

    ForecastSnapshot {
        month: first,
        states,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = "\
country,admin1,month,year,total_forecast
Mexico,Sinaloa,May,2025,10
Mexico,Sinaloa,June,2025,12.5
Mexico,Sinaloa,July,2025,7.5
Mexico,Estado de México,June,2025,4
Mexico,Mexico,July,2025,
Mexico,Chihuahua,Smarch,2025,99
";

    fn d(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    fn canonicalizer() -> Adm1Canonicalizer {
        let aliases = [("Estado de Mexico".to_string(), "Mexico".to_string())]
            .into_iter()
            .collect();
        Adm1Canonicalizer::new(&aliases)
    }

    #[test]
    fn parses_csv_page() {
        let rows = parse_cast_csv(PAGE).unwrap();
        assert_eq!(rows.len(), 6);
        assert_eq!(rows[4].total_forecast, None);
        assert!(parse_cast_csv("  ").unwrap().is_empty());
    }

    #[test]
    fn sums_future_months_per_state() {
        let rows = parse_cast_csv(PAGE).unwrap();
        let snapshot = select_forecast(&rows, "Mexico", d("2025-06-01"), &canonicalizer());
        assert_eq!(snapshot.month, d("2025-06-01"));
        assert_eq!(snapshot.value("Sinaloa"), Some(20.0));
        // Aliased spellings merge; a blank total is zero, not absent.
        assert_eq!(snapshot.value("Mexico"), Some(4.0));
        // Unparseable month names are dropped.
        assert_eq!(snapshot.value("Chihuahua"), None);
    }

    #[test]
    fn falls_back_to_latest_month() {
        let rows = parse_cast_csv(PAGE).unwrap();
        let snapshot = select_forecast(&rows, "Mexico", d("2026-01-01"), &canonicalizer());
        assert_eq!(snapshot.month, d("2025-07-01"));
        assert_eq!(snapshot.value("Sinaloa"), Some(7.5));
        assert_eq!(snapshot.value("Mexico"), Some(0.0));
    }

    #[test]
    fn no_rows_is_empty_snapshot() {
        let snapshot = select_forecast(&[], "Mexico", d("2025-06-01"), &canonicalizer());
        assert!(snapshot.states.is_empty());
        assert_eq!(snapshot.month, d("2025-06-01"));
    }

    #[test]
    fn other_countries_are_ignored() {
        let rows = parse_cast_csv(
            "country,admin1,month,year,total_forecast\nGuatemala,Peten,June,2025,3\n",
        )
        .unwrap();
        let snapshot = select_forecast(&rows, "Mexico", d("2025-06-01"), &canonicalizer());
        assert!(snapshot.states.is_empty());
    }
}
