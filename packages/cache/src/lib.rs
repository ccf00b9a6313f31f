#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Recency-gated caching of upstream snapshots.
//!
//! Each upstream stream (conflict events, state forecasts) is cached as a
//! snapshot plus a [`CacheState`]. Before a run, the [`RecencyController`]
//! compares the upstream recency cap with the persisted `data_as_of` and
//! decides whether to refresh or reuse the cache. [`resolve`] drives the
//! whole probe/decide/fetch/fallback sequence; the caller persists the
//! outcome with [`SnapshotStore::commit`] once the run has succeeded.

pub mod controller;
pub mod store;

use std::future::Future;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

pub use controller::{Decision, RecencyController, RefreshPolicy, RefreshReason};
pub use store::{SnapshotStore, StagedWrite};

/// Version of the on-disk cache layout. Files with another version are
/// ignored (treated as a cold start).
pub const SCHEMA_VERSION: u32 = 1;

/// Persisted state of one cached stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheState {
    /// On-disk layout version.
    pub schema_version: u32,
    /// Incremented on every accepted refresh.
    pub generation: u64,
    /// Most recent upstream date the cached snapshot covers. Never
    /// decreases.
    pub data_as_of: NaiveDate,
    /// Date the snapshot was last fetched.
    pub last_fetch_date: NaiveDate,
}

/// A cache was reused because upstream had nothing newer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{stream}: upstream cap {upstream_cap} does not advance cached data_as_of {data_as_of}; reusing cache")]
pub struct StaleDataWarning {
    /// Stream name.
    pub stream: String,
    /// Date of the cached data.
    pub data_as_of: NaiveDate,
    /// Most recent date upstream offered.
    pub upstream_cap: NaiveDate,
}

/// An upstream fetch failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{stream}: upstream fetch failed: {message}")]
pub struct FetchError {
    /// Stream name.
    pub stream: String,
    /// Underlying error text.
    pub message: String,
}

/// Errors that abort a run.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// Reading or writing cache files failed.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// A cache file could not be (de)serialized.
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// Nothing is cached and the upstream fetch failed.
    #[error("No cached data to fall back on: {0}")]
    ColdStart(FetchError),

    /// The snapshot is lost and upstream only offers data older than the
    /// persisted state.
    #[error("No cached snapshot and upstream would regress: {0}")]
    Regressed(StaleDataWarning),
}

/// A fetched snapshot and the upstream date it covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fetched<T> {
    /// The snapshot.
    pub payload: T,
    /// Most recent upstream date included in the snapshot.
    pub data_as_of: NaiveDate,
}

/// How a stream's data was obtained for this run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Fresh data was fetched and is pending commit.
    Refreshed(RefreshReason),
    /// The cache was reused without contacting upstream.
    Cached,
    /// The cache was reused because upstream had nothing newer.
    Stale(StaleDataWarning),
    /// Upstream failed; the cache was reused.
    Fallback(FetchError),
}

/// The data a run will use for one stream.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolved<T> {
    /// The snapshot to use.
    pub payload: T,
    /// The state describing `payload`. For a refresh this is the pending
    /// state that [`SnapshotStore::commit`] will persist.
    pub state: CacheState,
    /// How the data was obtained.
    pub outcome: Outcome,
}

impl<T> Resolved<T> {
    /// The upstream date of the data actually in use.
    #[must_use]
    pub const fn data_as_of(&self) -> NaiveDate {
        self.state.data_as_of
    }

    /// Whether this run has a new snapshot to persist.
    #[must_use]
    pub const fn is_pending(&self) -> bool {
        matches!(self.outcome, Outcome::Refreshed(_))
    }
}

/// Probes upstream, decides, fetches, and falls back as needed.
///
/// `probe` returns the most recent date upstream will serve; it is only
/// called when the policy allows a refresh or nothing is cached. `fetch`
/// receives that cap and returns the new snapshot.
///
/// Fetch/probe failures and regressions fall back to the cache with a
/// logged warning. A state file whose snapshot is missing or unusable
/// still sets the floor for `data_as_of` and the generation. Nothing is
/// written to disk here.
///
/// # Errors
///
/// * [`CacheError::ColdStart`] if nothing is cached and upstream fails
/// * [`CacheError::Regressed`] if the snapshot is lost and upstream is
///   behind the persisted state
/// * [`CacheError::Io`] / [`CacheError::Json`] if the cache can't be read
#[allow(clippy::future_not_send)]
pub async fn resolve<T, P, PFut, F, FFut, E>(
    controller: &RecencyController,
    store: &SnapshotStore<T>,
    today: NaiveDate,
    probe: P,
    fetch: F,
) -> Result<Resolved<T>, CacheError>
where
    T: Serialize + serde::de::DeserializeOwned,
    P: FnOnce() -> PFut,
    PFut: Future<Output = Result<NaiveDate, E>>,
    F: FnOnce(NaiveDate) -> FFut,
    FFut: Future<Output = Result<Fetched<T>, E>>,
    E: std::fmt::Display,
{
    let stream = controller.stream();
    let cached = store.load()?;
    let state = cached.as_ref().map(|(state, _)| *state);
    let floor = if cached.is_none() { store.load_state()? } else { None };

    let cap = if controller.needs_probe(state.as_ref()) {
        match probe().await {
            Ok(cap) => Some(cap),
            Err(e) => {
                let error = FetchError {
                    stream: stream.to_string(),
                    message: e.to_string(),
                };
                return fall_back(cached, error);
            }
        }
    } else {
        None
    };

    let decision = match (floor.as_ref(), cap) {
        (Some(floor), Some(cap)) => controller.decide_recovery(floor, cap),
        _ => controller.decide(state.as_ref(), cap),
    };
    let reason = match decision {
        Decision::UseCached => {
            return cached.map_or_else(
                || unreachable_cold(stream),
                |(state, payload)| {
                    log::info!("{stream}: using cached snapshot (data_as_of {})", state.data_as_of);
                    Ok(Resolved {
                        payload,
                        state,
                        outcome: Outcome::Cached,
                    })
                },
            );
        }
        Decision::Stale(warning) => {
            log::warn!("{warning}");
            return reuse_or_regress(cached, warning);
        }
        Decision::Refresh(reason) => reason,
    };

    let Some(cap) = cap else {
        return unreachable_cold(stream);
    };

    log::info!("{stream}: refreshing ({reason}) up to {cap}");
    let fetched = match fetch(cap).await {
        Ok(fetched) => fetched,
        Err(e) => {
            let error = FetchError {
                stream: stream.to_string(),
                message: e.to_string(),
            };
            return fall_back(cached, error);
        }
    };

    let next = match floor.as_ref() {
        Some(floor) => controller.recover(floor, fetched.data_as_of, today),
        None => controller.commit(state.as_ref(), fetched.data_as_of, today),
    };
    match next {
        Ok(next) => Ok(Resolved {
            payload: fetched.payload,
            state: next,
            outcome: Outcome::Refreshed(reason),
        }),
        Err(warning) => {
            log::warn!("{warning}");
            reuse_or_regress(cached, warning)
        }
    }
}

fn reuse_or_regress<T>(
    cached: Option<(CacheState, T)>,
    warning: StaleDataWarning,
) -> Result<Resolved<T>, CacheError> {
    match cached {
        Some((state, payload)) => Ok(Resolved {
            payload,
            state,
            outcome: Outcome::Stale(warning),
        }),
        None => Err(CacheError::Regressed(warning)),
    }
}

fn fall_back<T>(
    cached: Option<(CacheState, T)>,
    error: FetchError,
) -> Result<Resolved<T>, CacheError> {
    match cached {
        Some((state, payload)) => {
            log::warn!("{error}; falling back to cached data_as_of {}", state.data_as_of);
            Ok(Resolved {
                payload,
                state,
                outcome: Outcome::Fallback(error),
            })
        }
        None => {
            log::error!("{error}; no cached data to fall back on");
            Err(CacheError::ColdStart(error))
        }
    }
}

fn unreachable_cold<T>(stream: &str) -> Result<Resolved<T>, CacheError> {
    Err(CacheError::ColdStart(FetchError {
        stream: stream.to_string(),
        message: "controller chose the cache but none is stored".to_string(),
    }))
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;

    fn d(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    fn store(dir: &tempfile::TempDir) -> SnapshotStore<Vec<u32>> {
        SnapshotStore::new(dir.path(), "events")
    }

    async fn ok_cap(cap: NaiveDate) -> Result<NaiveDate, String> {
        Ok(cap)
    }

    #[tokio::test]
    async fn cold_start_fetches_and_commits() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);
        let controller = RecencyController::new("events", RefreshPolicy::IfNewer);

        let resolved = resolve(
            &controller,
            &store,
            d("2025-03-10"),
            || ok_cap(d("2025-03-01")),
            |cap| async move {
                Ok::<_, String>(Fetched {
                    payload: vec![1, 2, 3],
                    data_as_of: cap,
                })
            },
        )
        .await
        .unwrap();

        assert_eq!(resolved.outcome, Outcome::Refreshed(RefreshReason::ColdStart));
        assert_eq!(resolved.data_as_of(), d("2025-03-01"));
        assert_eq!(resolved.state.generation, 1);
        assert!(store.load().unwrap().is_none(), "nothing written before commit");

        store.commit(&resolved).unwrap();
        let (state, payload) = store.load().unwrap().unwrap();
        assert_eq!(state, resolved.state);
        assert_eq!(payload, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn cold_start_failure_aborts() {
        let dir = tempfile::tempdir().unwrap();
        let controller = RecencyController::new("events", RefreshPolicy::IfNewer);

        let err = resolve(
            &controller,
            &store(&dir),
            d("2025-03-10"),
            || async { Err::<NaiveDate, _>("401 Unauthorized".to_string()) },
            |_| async { Ok(Fetched { payload: vec![], data_as_of: d("2025-03-01") }) },
        )
        .await
        .unwrap_err();

        assert!(matches!(err, CacheError::ColdStart(FetchError { ref message, .. }) if message.contains("401")));
    }

    #[tokio::test]
    async fn same_cap_reuses_cache_without_fetching() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);
        let controller = RecencyController::new("events", RefreshPolicy::IfNewer);
        store
            .save(
                &CacheState {
                    schema_version: SCHEMA_VERSION,
                    generation: 4,
                    data_as_of: d("2025-03-01"),
                    last_fetch_date: d("2025-03-02"),
                },
                &vec![9],
            )
            .unwrap();

        let fetched = Cell::new(false);
        let resolved = resolve(
            &controller,
            &store,
            d("2025-03-10"),
            || ok_cap(d("2025-03-01")),
            |_| {
                fetched.set(true);
                async { Ok(Fetched { payload: vec![], data_as_of: d("2025-03-01") }) }
            },
        )
        .await
        .unwrap();

        assert!(!fetched.get());
        assert!(matches!(resolved.outcome, Outcome::Stale(_)));
        assert_eq!(resolved.payload, vec![9]);
        assert_eq!(resolved.state.generation, 4);
        assert!(!resolved.is_pending());
    }

    #[tokio::test]
    async fn fetch_failure_falls_back_to_cache() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);
        let controller = RecencyController::new("events", RefreshPolicy::IfNewer);
        let cached = CacheState {
            schema_version: SCHEMA_VERSION,
            generation: 2,
            data_as_of: d("2025-02-01"),
            last_fetch_date: d("2025-02-02"),
        };
        store.save(&cached, &vec![7]).unwrap();

        let resolved = resolve(
            &controller,
            &store,
            d("2025-03-10"),
            || ok_cap(d("2025-03-01")),
            |_| async { Err::<Fetched<Vec<u32>>, _>("connection reset".to_string()) },
        )
        .await
        .unwrap();

        assert!(matches!(resolved.outcome, Outcome::Fallback(_)));
        assert_eq!(resolved.state, cached);
        assert_eq!(resolved.payload, vec![7]);
    }

    #[tokio::test]
    async fn cache_only_policy_skips_probe() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);
        let controller = RecencyController::new("events", RefreshPolicy::CacheOnly);
        store
            .save(
                &CacheState {
                    schema_version: SCHEMA_VERSION,
                    generation: 1,
                    data_as_of: d("2025-01-01"),
                    last_fetch_date: d("2025-01-01"),
                },
                &vec![1],
            )
            .unwrap();

        let resolved = resolve(
            &controller,
            &store,
            d("2025-03-10"),
            || async { Err::<NaiveDate, _>("probe must not run".to_string()) },
            |_| async { Err::<Fetched<Vec<u32>>, _>("fetch must not run".to_string()) },
        )
        .await
        .unwrap();

        assert_eq!(resolved.outcome, Outcome::Cached);
    }

    fn orphaned_state(store: &SnapshotStore<Vec<u32>>, dir: &tempfile::TempDir) {
        store
            .save(
                &CacheState {
                    schema_version: SCHEMA_VERSION,
                    generation: 7,
                    data_as_of: d("2025-03-01"),
                    last_fetch_date: d("2025-03-02"),
                },
                &vec![4],
            )
            .unwrap();
        std::fs::remove_file(dir.path().join("events_snapshot.json")).unwrap();
    }

    #[tokio::test]
    async fn lost_snapshot_still_bounds_data_as_of() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);
        orphaned_state(&store, &dir);
        let controller = RecencyController::new("events", RefreshPolicy::IfNewer);

        let fetched = Cell::new(false);
        let err = resolve(
            &controller,
            &store,
            d("2025-03-10"),
            || ok_cap(d("2025-02-01")),
            |cap| {
                fetched.set(true);
                async move { Ok::<_, String>(Fetched { payload: vec![0], data_as_of: cap }) }
            },
        )
        .await
        .unwrap_err();

        assert!(!fetched.get());
        assert!(
            matches!(err, CacheError::Regressed(ref w) if w.data_as_of == d("2025-03-01") && w.upstream_cap == d("2025-02-01"))
        );
        assert_eq!(store.load_state().unwrap().unwrap().generation, 7);
    }

    #[tokio::test]
    async fn lost_snapshot_rejects_older_fetch() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);
        orphaned_state(&store, &dir);
        let controller = RecencyController::new("events", RefreshPolicy::IfNewer);

        // The cap passes but the snapshot covers less than the floor.
        let err = resolve(
            &controller,
            &store,
            d("2025-03-10"),
            || ok_cap(d("2025-03-05")),
            |_| async {
                Ok::<_, String>(Fetched {
                    payload: vec![0],
                    data_as_of: d("2025-02-01"),
                })
            },
        )
        .await
        .unwrap_err();

        assert!(matches!(err, CacheError::Regressed(_)));
    }

    #[tokio::test]
    async fn lost_snapshot_is_rebuilt_from_the_floor() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);
        orphaned_state(&store, &dir);
        let controller = RecencyController::new("events", RefreshPolicy::IfNewer);

        let resolved = resolve(
            &controller,
            &store,
            d("2025-03-10"),
            || ok_cap(d("2025-03-01")),
            |cap| async move { Ok::<_, String>(Fetched { payload: vec![8], data_as_of: cap }) },
        )
        .await
        .unwrap();

        assert_eq!(resolved.outcome, Outcome::Refreshed(RefreshReason::Recovery));
        assert_eq!(resolved.state.generation, 8);
        assert_eq!(resolved.data_as_of(), d("2025-03-01"));

        store.commit(&resolved).unwrap();
        let (state, payload) = store.load().unwrap().unwrap();
        assert_eq!(state.generation, 8);
        assert_eq!(payload, vec![8]);
    }

    #[tokio::test]
    async fn fetched_regression_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);
        let controller = RecencyController::new("events", RefreshPolicy::IfNewer);
        let cached = CacheState {
            schema_version: SCHEMA_VERSION,
            generation: 3,
            data_as_of: d("2025-03-01"),
            last_fetch_date: d("2025-03-01"),
        };
        store.save(&cached, &vec![5]).unwrap();

        // The probe says newer data exists but the snapshot covers less.
        let resolved = resolve(
            &controller,
            &store,
            d("2025-03-10"),
            || ok_cap(d("2025-03-08")),
            |_| async {
                Ok::<_, String>(Fetched {
                    payload: vec![0],
                    data_as_of: d("2025-02-20"),
                })
            },
        )
        .await
        .unwrap();

        assert!(matches!(resolved.outcome, Outcome::Stale(_)));
        assert_eq!(resolved.state, cached);
        assert_eq!(resolved.payload, vec![5]);
    }
}
