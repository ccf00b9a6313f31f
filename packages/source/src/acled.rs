//! ACLED conflict event collector.
//!
//! Authenticates with the OAuth password grant, probes the account's
//! recency cap, and pages through the read endpoint for the 90-day window
//! ending at that cap. The prior window lies inside the 90-day window, so
//! one fetch is enough to tally all three windows.
//!
//! Events are filtered to the profile's country and to violent types,
//! de-duplicated by `event_id_cnty`, and attributed to units by point in
//! polygon.

use std::collections::{BTreeMap, HashSet};
use std::str::FromStr as _;
use std::sync::Arc;
use std::time::Duration;

use adm2_risk_source_models::{
    AcledConfig, AcledEvent, EventSnapshot, EventType, EventWindows, WindowCounts,
};
use adm2_risk_spatial::index::UnitIndex;
use async_trait::async_trait;
use chrono::NaiveDate;
use serde_json::Value;
use tokio::sync::OnceCell;

use crate::parsing::{parse_event_date, parse_lat_lng_str};
use crate::profile::CountryProfile;
use crate::progress::ProgressCallback;
use crate::{EventSource, SourceError, require_env, retry};

/// Environment variable holding the ACLED account e-mail.
pub const USER_ENV: &str = "ACLED_USER";

/// Environment variable holding the ACLED account password.
pub const PASS_ENV: &str = "ACLED_PASS";

/// An authenticated ACLED HTTP session, shared by the event and forecast
/// collectors.
///
/// Credentials are read from the environment on first use, so building a
/// session never fails for lack of them; a run that only uses cached data
/// never needs them.
pub struct AcledSession {
    http: reqwest::Client,
    config: AcledConfig,
    token: OnceCell<String>,
}

impl AcledSession {
    /// Creates a session.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::Http`] if the HTTP client can't be built.
    pub fn new(config: AcledConfig, ssl_verify: bool) -> Result<Self, SourceError> {
        if !ssl_verify {
            log::warn!("TLS certificate verification is disabled for ACLED requests");
        }
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .danger_accept_invalid_certs(!ssl_verify)
            .build()?;
        Ok(Self {
            http,
            config,
            token: OnceCell::new(),
        })
    }

    /// Endpoint configuration.
    #[must_use]
    pub const fn config(&self) -> &AcledConfig {
        &self.config
    }

    /// The underlying HTTP client.
    #[must_use]
    pub const fn http(&self) -> &reqwest::Client {
        &self.http
    }

    /// A bearer token, requested once per session.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::MissingEnv`] if credentials are unset, or
    /// [`SourceError::Auth`] if ACLED rejects them.
    pub async fn token(&self) -> Result<&str, SourceError> {
        self.token
            .get_or_try_init(|| self.request_token())
            .await
            .map(String::as_str)
    }

    async fn request_token(&self) -> Result<String, SourceError> {
        let username = require_env(USER_ENV)?;
        let password = require_env(PASS_ENV)?;
        log::info!("Requesting ACLED access token");

        let form = [
            ("username", username.as_str()),
            ("password", password.as_str()),
            ("grant_type", "password"),
            ("client_id", self.config.client_id.as_str()),
        ];
        let body = retry::send_json(|| {
            self.http
                .post(&self.config.token_url)
                .header(reqwest::header::ACCEPT, "application/json")
                .form(&form)
        })
        .await?;

        body.get("access_token")
            .and_then(Value::as_str)
            .map(ToString::to_string)
            .ok_or_else(|| SourceError::Auth {
                message: "token response has no access_token".to_string(),
            })
    }

    /// Issues one read request with the standard paging parameters.
    async fn read(
        &self,
        params: &[(&str, String)],
        page: u32,
        limit: u32,
    ) -> Result<Value, SourceError> {
        let token = self.token().await?;
        let mut query: Vec<(&str, String)> = vec![
            ("_format", "json".to_string()),
            ("page", page.to_string()),
            ("limit", limit.to_string()),
        ];
        query.extend(params.iter().cloned());

        retry::send_json(|| {
            self.http
                .get(&self.config.read_url)
                .bearer_auth(token)
                .header(reqwest::header::ACCEPT, "application/json")
                .query(&query)
        })
        .await
    }
}

/// Violent event counts per unit from the ACLED read endpoint.
pub struct AcledEvents {
    session: Arc<AcledSession>,
    country: String,
    iso: u16,
    index: Arc<UnitIndex>,
}

impl AcledEvents {
    /// Creates a collector for the profile's country, attributing events
    /// with `index`.
    #[must_use]
    pub fn new(session: Arc<AcledSession>, profile: &CountryProfile, index: Arc<UnitIndex>) -> Self {
        Self {
            session,
            country: profile.country.clone(),
            iso: profile.iso,
            index,
        }
    }

    /// Picks the country filter that actually returns rows: the ISO code
    /// first, then the country name, defaulting to the ISO code when both
    /// come back empty.
    async fn live_filter(
        &self,
        window: &[(&'static str, String)],
    ) -> Result<(&'static str, String), SourceError> {
        let candidates = [
            ("iso", self.iso.to_string()),
            ("country", self.country.clone()),
        ];
        for (key, value) in candidates {
            let mut params = window.to_vec();
            params.push((key, value.clone()));
            let probe = self.session.read(&params, 1, 1).await?;
            let count = total_count(&probe);
            log::debug!("ACLED probe {key}={value}: {count} rows");
            if count > 0 {
                return Ok((key, value));
            }
        }
        log::warn!("ACLED returned no rows for either filter; using iso={}", self.iso);
        Ok(("iso", self.iso.to_string()))
    }
}

#[async_trait]
impl EventSource for AcledEvents {
    fn id(&self) -> &str {
        "acled"
    }

    async fn recency_cap(&self) -> Result<NaiveDate, SourceError> {
        let probe = self.session.read(&[], 1, 1).await?;
        Ok(recency_cap_from(&probe).unwrap_or_else(|| {
            let today = chrono::Utc::now().date_naive();
            log::warn!("ACLED did not report a recency cap; using today ({today})");
            today
        }))
    }

    async fn fetch_window_counts(
        &self,
        cap: NaiveDate,
        progress: Arc<dyn ProgressCallback>,
    ) -> Result<EventSnapshot, SourceError> {
        let windows = EventWindows::ending(cap);
        let config = self.session.config();
        let mut params = window_params(&windows, &config.fields);
        let (key, value) = self.live_filter(&params).await?;
        params.push((key, value));

        log::info!(
            "Fetching ACLED events {}..{} ({key})",
            windows.from_90,
            windows.cap
        );
        progress.set_total(u64::from(config.max_pages));
        progress.set_message("ACLED events".to_string());

        let mut events = Vec::new();
        for page in 1..=config.max_pages {
            let body = self.session.read(&params, page, config.page_limit).await?;
            let rows = page_events(body)?;
            progress.set_position(u64::from(page));
            if rows.is_empty() {
                break;
            }
            log::debug!("ACLED page {page}: {} rows", rows.len());
            events.extend(rows);
            if page == config.max_pages {
                log::warn!("ACLED fetch stopped at max_pages={}", config.max_pages);
            }
        }
        progress.finish_and_clear();

        let snapshot = tally_events(&events, &self.country, &windows, &self.index);
        log::info!(
            "ACLED: {} rows, {} violent events, {} units with events, {} unattributed",
            events.len(),
            snapshot.total_events,
            snapshot.counts.len(),
            snapshot.unattributed
        );
        Ok(snapshot)
    }
}

/// Date-range query parameters for the 90-day window.
fn window_params(windows: &EventWindows, fields: &str) -> Vec<(&'static str, String)> {
    vec![
        (
            "event_date",
            format!("{}|{}", windows.from_90, windows.cap),
        ),
        ("event_date_where", "BETWEEN".to_string()),
        ("fields", fields.to_string()),
    ]
}

/// The account's most recent allowed date, if the response reports one.
#[must_use]
pub fn recency_cap_from(body: &Value) -> Option<NaiveDate> {
    body.pointer("/data_query_restrictions/date_recency/date")
        .and_then(Value::as_str)
        .and_then(parse_event_date)
}

/// `total_count` of a read response; missing or malformed counts are zero.
#[must_use]
pub fn total_count(body: &Value) -> u64 {
    match body.get("total_count") {
        Some(Value::Number(n)) => n.as_u64().unwrap_or(0),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(0),
        _ => 0,
    }
}

/// The event rows of a read response.
///
/// # Errors
///
/// Returns [`SourceError::Json`] if `data` is not a list of events.
pub fn page_events(mut body: Value) -> Result<Vec<AcledEvent>, SourceError> {
    match body.get_mut("data").map(Value::take) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(data) => Ok(serde_json::from_value(data)?),
    }
}

/// Reduces raw rows to per-unit window counts.
///
/// Rows from another country, non-violent rows, rows outside the 90-day
/// window, and repeated `event_id_cnty` values are skipped. Rows whose
/// coordinates fall in no unit are counted as unattributed.
#[must_use]
pub fn tally_events(
    events: &[AcledEvent],
    country: &str,
    windows: &EventWindows,
    index: &UnitIndex,
) -> EventSnapshot {
    let mut seen = HashSet::new();
    let mut counts: BTreeMap<String, WindowCounts> = BTreeMap::new();
    let mut total_events = 0;
    let mut unattributed = 0;

    for event in events {
        let same_country = event
            .country
            .as_deref()
            .is_some_and(|c| c.trim().eq_ignore_ascii_case(country));
        if !same_country {
            continue;
        }
        let violent = event
            .event_type
            .as_deref()
            .and_then(|t| EventType::from_str(t.trim()).ok())
            .is_some_and(EventType::is_violent);
        if !violent {
            continue;
        }
        let Some(date) = event.event_date.as_deref().and_then(parse_event_date) else {
            continue;
        };
        if !windows.in_90(date) {
            continue;
        }
        if let Some(id) = event.event_id_cnty.as_deref()
            && !seen.insert(id)
        {
            continue;
        }

        total_events += 1;
        let unit = parse_lat_lng_str(event.latitude.as_deref(), event.longitude.as_deref())
            .and_then(|(lat, lon)| index.lookup(lon, lat));
        match unit {
            Some(code) => counts
                .entry(code.to_string())
                .or_default()
                .record(windows, date),
            None => unattributed += 1,
        }
    }

    EventSnapshot {
        windows: *windows,
        counts,
        total_events,
        unattributed,
    }
}
