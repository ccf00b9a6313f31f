//! The refresh state machine.
//!
//! A stream is either `Cached` (serving the persisted snapshot) or
//! `Refreshing` (fetching a new one). [`RecencyController::decide`] is the
//! `Cached -> Refreshing` transition; [`RecencyController::commit`] is the
//! `Refreshing -> Cached` one and is the only place a new [`CacheState`]
//! is minted. Both are pure.

use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

use crate::{CacheState, SCHEMA_VERSION, StaleDataWarning};

/// When a stream may be refreshed.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Default,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum RefreshPolicy {
    /// Serve the cache whenever one exists; only a cold start fetches.
    CacheOnly,
    /// Refresh when upstream offers data newer than the cache.
    #[default]
    IfNewer,
    /// Refresh even when upstream has nothing newer, as long as it does
    /// not go backwards.
    Force,
}

/// Why a refresh was started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshReason {
    /// Nothing was cached.
    ColdStart,
    /// Upstream advanced past the cached date.
    Advanced {
        /// Cached date.
        from: NaiveDate,
        /// Upstream cap.
        to: NaiveDate,
    },
    /// Forced by policy.
    Forced,
    /// The state file survived but its snapshot did not.
    Recovery,
}

impl fmt::Display for RefreshReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ColdStart => f.write_str("cold start"),
            Self::Advanced { from, to } => write!(f, "advanced {from} -> {to}"),
            Self::Forced => f.write_str("forced"),
            Self::Recovery => f.write_str("snapshot lost"),
        }
    }
}

/// Outcome of [`RecencyController::decide`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Stay `Cached` without consulting upstream.
    UseCached,
    /// Stay `Cached`; upstream has nothing newer (or went backwards).
    Stale(StaleDataWarning),
    /// Move to `Refreshing`.
    Refresh(RefreshReason),
}

/// Decides and commits refreshes for one named stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecencyController {
    stream: String,
    policy: RefreshPolicy,
}

impl RecencyController {
    /// Creates a controller for `stream`.
    #[must_use]
    pub fn new(stream: impl Into<String>, policy: RefreshPolicy) -> Self {
        Self {
            stream: stream.into(),
            policy,
        }
    }

    /// Stream name, used in logs and errors.
    #[must_use]
    pub fn stream(&self) -> &str {
        &self.stream
    }

    /// The policy in effect.
    #[must_use]
    pub const fn policy(&self) -> RefreshPolicy {
        self.policy
    }

    /// Whether upstream's recency cap is needed to decide.
    #[must_use]
    pub const fn needs_probe(&self, state: Option<&CacheState>) -> bool {
        state.is_none() || !matches!(self.policy, RefreshPolicy::CacheOnly)
    }

    /// The `Cached -> Refreshing` transition.
    ///
    /// `cap` is upstream's most recent available date; `None` means it
    /// wasn't probed (only valid when [`Self::needs_probe`] is false).
    #[must_use]
    pub fn decide(&self, state: Option<&CacheState>, cap: Option<NaiveDate>) -> Decision {
        let Some(state) = state else {
            return Decision::Refresh(RefreshReason::ColdStart);
        };
        let Some(cap) = cap else {
            return Decision::UseCached;
        };

        match self.policy {
            RefreshPolicy::CacheOnly => Decision::UseCached,
            RefreshPolicy::IfNewer if cap > state.data_as_of => {
                Decision::Refresh(RefreshReason::Advanced {
                    from: state.data_as_of,
                    to: cap,
                })
            }
            RefreshPolicy::Force if cap >= state.data_as_of => {
                Decision::Refresh(RefreshReason::Forced)
            }
            RefreshPolicy::IfNewer | RefreshPolicy::Force => Decision::Stale(self.stale(state, cap)),
        }
    }

    /// The `Refreshing -> Cached` transition.
    ///
    /// Mints the next state for a fetched snapshot covering
    /// `fetched_as_of`, fetched on `fetch_date`.
    ///
    /// # Errors
    ///
    /// Returns [`StaleDataWarning`] if accepting the snapshot would move
    /// `data_as_of` backwards, or (unless forced) would not advance it.
    pub fn commit(
        &self,
        state: Option<&CacheState>,
        fetched_as_of: NaiveDate,
        fetch_date: NaiveDate,
    ) -> Result<CacheState, StaleDataWarning> {
        let generation = match state {
            None => 1,
            Some(state) => {
                let accepted = match self.policy {
                    RefreshPolicy::Force => fetched_as_of >= state.data_as_of,
                    RefreshPolicy::IfNewer | RefreshPolicy::CacheOnly => {
                        fetched_as_of > state.data_as_of
                    }
                };
                if !accepted {
                    return Err(self.stale(state, fetched_as_of));
                }
                state.generation + 1
            }
        };

        Ok(CacheState {
            schema_version: SCHEMA_VERSION,
            generation,
            data_as_of: fetched_as_of,
            last_fetch_date: fetch_date,
        })
    }

    /// The transition for a stream whose state file is intact but whose
    /// snapshot is missing or unusable. `floor` still bounds `data_as_of`
    /// from below; any policy refreshes as long as `cap` does not go
    /// behind it.
    #[must_use]
    pub fn decide_recovery(&self, floor: &CacheState, cap: NaiveDate) -> Decision {
        if cap >= floor.data_as_of {
            Decision::Refresh(RefreshReason::Recovery)
        } else {
            Decision::Stale(self.stale(floor, cap))
        }
    }

    /// Mints the state replacing a lost snapshot. The generation continues
    /// from `floor`.
    ///
    /// # Errors
    ///
    /// Returns [`StaleDataWarning`] if `fetched_as_of` is older than
    /// `floor`.
    pub fn recover(
        &self,
        floor: &CacheState,
        fetched_as_of: NaiveDate,
        fetch_date: NaiveDate,
    ) -> Result<CacheState, StaleDataWarning> {
        if fetched_as_of < floor.data_as_of {
            return Err(self.stale(floor, fetched_as_of));
        }
        Ok(CacheState {
            schema_version: SCHEMA_VERSION,
            generation: floor.generation + 1,
            data_as_of: fetched_as_of,
            last_fetch_date: fetch_date,
        })
    }

    fn stale(&self, state: &CacheState, upstream_cap: NaiveDate) -> StaleDataWarning {
        StaleDataWarning {
            stream: self.stream.clone(),
            data_as_of: state.data_as_of,
            upstream_cap,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    fn cached(as_of: &str) -> CacheState {
        CacheState {
            schema_version: SCHEMA_VERSION,
            generation: 5,
            data_as_of: d(as_of),
            last_fetch_date: d(as_of),
        }
    }

    #[test]
    fn cold_start_always_refreshes() {
        for policy in [RefreshPolicy::CacheOnly, RefreshPolicy::IfNewer, RefreshPolicy::Force] {
            let c = RecencyController::new("events", policy);
            assert!(c.needs_probe(None));
            assert_eq!(
                c.decide(None, Some(d("2025-01-01"))),
                Decision::Refresh(RefreshReason::ColdStart)
            );
        }
    }

    #[test]
    fn if_newer_refreshes_only_on_advance() {
        let c = RecencyController::new("events", RefreshPolicy::IfNewer);
        let state = cached("2025-03-01");
        assert_eq!(
            c.decide(Some(&state), Some(d("2025-03-05"))),
            Decision::Refresh(RefreshReason::Advanced {
                from: d("2025-03-01"),
                to: d("2025-03-05")
            })
        );
        assert!(matches!(
            c.decide(Some(&state), Some(d("2025-03-01"))),
            Decision::Stale(_)
        ));
        assert!(matches!(
            c.decide(Some(&state), Some(d("2025-02-01"))),
            Decision::Stale(_)
        ));
    }

    #[test]
    fn force_refetches_same_date_but_never_regresses() {
        let c = RecencyController::new("events", RefreshPolicy::Force);
        let state = cached("2025-03-01");
        assert_eq!(
            c.decide(Some(&state), Some(d("2025-03-01"))),
            Decision::Refresh(RefreshReason::Forced)
        );
        assert!(matches!(
            c.decide(Some(&state), Some(d("2025-02-28"))),
            Decision::Stale(_)
        ));

        let next = c.commit(Some(&state), d("2025-03-01"), d("2025-03-09")).unwrap();
        assert_eq!(next.generation, 6);
        assert_eq!(next.data_as_of, d("2025-03-01"));
        assert_eq!(next.last_fetch_date, d("2025-03-09"));
        assert!(c.commit(Some(&state), d("2025-02-28"), d("2025-03-09")).is_err());
    }

    #[test]
    fn cache_only_skips_probe_when_cached() {
        let c = RecencyController::new("events", RefreshPolicy::CacheOnly);
        let state = cached("2025-03-01");
        assert!(!c.needs_probe(Some(&state)));
        assert_eq!(c.decide(Some(&state), None), Decision::UseCached);
    }

    #[test]
    fn commit_is_monotonic() {
        let c = RecencyController::new("events", RefreshPolicy::IfNewer);
        let mut state = c.commit(None, d("2025-01-10"), d("2025-01-11")).unwrap();
        assert_eq!(state.generation, 1);

        for (as_of, accepted) in [
            ("2025-01-20", true),
            ("2025-01-20", false),
            ("2025-01-15", false),
            ("2025-02-01", true),
        ] {
            match c.commit(Some(&state), d(as_of), d("2025-02-02")) {
                Ok(next) => {
                    assert!(accepted, "{as_of} should have been rejected");
                    assert!(next.data_as_of > state.data_as_of);
                    assert_eq!(next.generation, state.generation + 1);
                    state = next;
                }
                Err(warning) => {
                    assert!(!accepted, "{as_of} should have been accepted");
                    assert_eq!(warning.data_as_of, state.data_as_of);
                }
            }
        }
        assert_eq!(state.data_as_of, d("2025-02-01"));
        assert_eq!(state.generation, 3);
    }

    #[test]
    fn recovery_keeps_the_floor() {
        let floor = cached("2025-03-01");
        for policy in [RefreshPolicy::CacheOnly, RefreshPolicy::IfNewer, RefreshPolicy::Force] {
            let c = RecencyController::new("events", policy);
            assert_eq!(
                c.decide_recovery(&floor, d("2025-03-01")),
                Decision::Refresh(RefreshReason::Recovery)
            );
            assert!(matches!(
                c.decide_recovery(&floor, d("2025-02-01")),
                Decision::Stale(_)
            ));

            let next = c.recover(&floor, d("2025-03-01"), d("2025-03-09")).unwrap();
            assert_eq!(next.generation, 6);
            assert_eq!(next.data_as_of, d("2025-03-01"));
            let warning = c.recover(&floor, d("2025-02-01"), d("2025-03-09")).unwrap_err();
            assert_eq!(warning.data_as_of, d("2025-03-01"));
        }
    }

    #[test]
    fn policy_parses_from_kebab_case() {
        assert_eq!("if-newer".parse::<RefreshPolicy>().unwrap(), RefreshPolicy::IfNewer);
        assert_eq!("cache-only".parse::<RefreshPolicy>().unwrap(), RefreshPolicy::CacheOnly);
        assert_eq!(RefreshPolicy::Force.to_string(), "force");
    }
}
