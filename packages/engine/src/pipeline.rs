//! Run orchestration.
//!
//! [`run`] wires the configured collaborators together and hands them to
//! [`execute`], which drives the phases. Tests call [`execute`] directly
//! with in-memory sources.

use std::sync::Arc;

use adm2_risk_cache::{
    CacheError, CacheState, Fetched, Outcome, RecencyController, RefreshPolicy, Resolved,
    SnapshotStore, resolve,
};
use adm2_risk_models::GeometryRecord;
use adm2_risk_source::acled::{AcledEvents, AcledSession};
use adm2_risk_source::admin::Adm1Canonicalizer;
use adm2_risk_source::boundary::GeoJsonBoundaries;
use adm2_risk_source::cast::CastForecast;
use adm2_risk_source::facilities::{FacilityCountsCsv, FacilityRegisterCsv};
use adm2_risk_source::population::PopulationCsv;
use adm2_risk_source::poverty::PovertyCsv;
use adm2_risk_source::profile::CountryProfile;
use adm2_risk_source::progress::ProgressCallback;
use adm2_risk_source::{
    BoundarySet, BoundarySource as _, EventSource, FacilityRegistry, ForecastSource,
    PopulationRegistry, PovertyRegistry, SourceError, registry,
};
use adm2_risk_source_models::{EventSnapshot, ForecastSnapshot, month_anchor};
use adm2_risk_spatial::{NeighborGraph, UnitIndex};
use chrono::NaiveDate;

use crate::assemble::{ScoringInputs, assemble};
use crate::output::{Publication, render_bounds, render_table};
use crate::paths::{EVENTS_STREAM, FORECAST_STREAM, RunPaths};
use crate::units::build_units;
use crate::{EngineError, RunConfig};

/// The collaborators a run reads from.
pub struct Sources {
    /// Conflict events.
    pub events: Box<dyn EventSource>,
    /// State forecasts.
    pub forecast: Box<dyn ForecastSource>,
    /// Population per unit.
    pub population: Box<dyn PopulationRegistry>,
    /// Health facilities per unit.
    pub facilities: Box<dyn FacilityRegistry>,
    /// Poverty per unit.
    pub poverty: Box<dyn PovertyRegistry>,
}

/// Per-invocation options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOptions {
    /// Date the run is for.
    pub today: NaiveDate,
    /// Refresh both streams even if upstream hasn't advanced.
    pub force: bool,
}

impl RunOptions {
    /// Options for a run dated today (UTC).
    #[must_use]
    pub fn today(force: bool) -> Self {
        Self {
            today: chrono::Utc::now().date_naive(),
            force,
        }
    }
}

/// Everything [`execute`] needs besides the collaborators.
#[derive(Debug, Clone)]
pub struct RunPlan {
    /// Output and cache locations.
    pub paths: RunPaths,
    /// State name joins.
    pub canonicalizer: Adm1Canonicalizer,
    /// Event stream policy.
    pub events_policy: RefreshPolicy,
    /// Forecast stream policy.
    pub forecast_policy: RefreshPolicy,
}

impl RunPlan {
    /// The plan for `config` under `profile`.
    #[must_use]
    pub fn new(config: &RunConfig, profile: &CountryProfile, force: bool) -> Self {
        Self {
            paths: RunPaths::from_config(config),
            canonicalizer: profile.canonicalizer(),
            events_policy: config.events_policy(force),
            forecast_policy: config.forecast_policy(force),
        }
    }
}

/// What a finished run did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    /// Date of the run.
    pub run_date: NaiveDate,
    /// Upstream date of the event data in the table.
    pub data_as_of: NaiveDate,
    /// Month of the forecast in use, if any.
    pub forecast_month: Option<NaiveDate>,
    /// Units in the table.
    pub units: usize,
    /// Units with scores.
    pub scored: usize,
    /// Units with withheld scores.
    pub withheld: usize,
    /// Units without neighbors.
    pub isolated: usize,
    /// Units whose geometry was unusable.
    pub geometry_errors: usize,
    /// Units with events against a zero population.
    pub zero_population_anomalies: usize,
    /// How event data was obtained.
    pub events: Outcome,
    /// How forecast data was obtained; `None` when none was available.
    pub forecast: Option<Outcome>,
}

/// The neighbor graph for a boundary set.
#[derive(Debug, Clone)]
pub struct GraphLoad {
    /// The graph.
    pub graph: NeighborGraph,
    /// Units whose geometry was unusable.
    pub geometry_errors: usize,
    /// Whether the graph came from the cache file.
    pub from_cache: bool,
}

/// Loads the cached graph for these boundaries, or builds and caches it.
///
/// # Errors
///
/// Returns [`EngineError::Spatial`] if the cache file can't be read or
/// written.
pub fn load_graph(paths: &RunPaths, boundaries: &BoundarySet) -> Result<GraphLoad, EngineError> {
    let cache = paths.graph_cache();
    if let Some(graph) = NeighborGraph::load_cached(&cache, &boundaries.fingerprint)? {
        log::info!(
            "Using cached neighbor graph ({} units, {} edges)",
            graph.len(),
            graph.edge_count()
        );
        let geometry_errors = boundaries
            .features
            .iter()
            .filter(|f| f.validated().is_err())
            .count();
        return Ok(GraphLoad {
            graph,
            geometry_errors,
            from_cache: true,
        });
    }

    let build = NeighborGraph::build(&boundaries.features, &boundaries.fingerprint);
    build.graph.save(&cache)?;
    Ok(GraphLoad {
        graph: build.graph,
        geometry_errors: build.errors.len(),
        from_cache: false,
    })
}

/// Runs the full pipeline with the configured collaborators.
///
/// # Errors
///
/// Returns [`EngineError`] if any phase fails.
pub async fn run(
    config: &RunConfig,
    options: RunOptions,
    progress: Arc<dyn ProgressCallback>,
) -> Result<RunSummary, EngineError> {
    let profile = registry::profile(&config.profile)?;
    let boundaries = load_boundaries(config, &profile)?;
    let index = Arc::new(UnitIndex::build(&boundaries.features));
    let session = Arc::new(AcledSession::new(config.acled.clone(), config.ssl_verify)?);

    let facilities: Box<dyn FacilityRegistry> = match &config.inputs.facility_register {
        Some(register) => Box::new(FacilityRegisterCsv::new(
            config.resolve(register),
            profile.facilities.clone(),
            Arc::clone(&index),
        )),
        None => Box::new(FacilityCountsCsv::new(
            config.resolve(&config.inputs.facilities),
        )),
    };
    let sources = Sources {
        events: Box::new(AcledEvents::new(Arc::clone(&session), &profile, index)),
        forecast: Box::new(CastForecast::new(session, &profile)),
        population: Box::new(PopulationCsv::new(
            config.resolve(&config.inputs.population),
        )),
        facilities,
        poverty: Box::new(PovertyCsv::new(
            config.resolve(&config.inputs.poverty),
            profile.code_prefix.clone(),
        )),
    };

    let plan = RunPlan::new(config, &profile, options.force);
    execute(&plan, &boundaries, &sources, options.today, progress).await
}

fn load_boundaries(
    config: &RunConfig,
    profile: &CountryProfile,
) -> Result<BoundarySet, EngineError> {
    let source = GeoJsonBoundaries::new(
        config.resolve(&config.inputs.boundaries),
        profile.boundary_fields.clone(),
    );
    log::info!("Loading boundaries ({})", source.id());
    Ok(source.load()?)
}

/// Runs every phase against the given collaborators.
///
/// Every output and refreshed cache file is fully written to a temp path
/// before any of them is renamed into place, so a run that fails leaves
/// the previous outputs and cache state untouched. Cache files are
/// renamed last.
///
/// # Errors
///
/// Returns [`EngineError`] if a registry can't be read, an indicator has
/// no values, the event stream has neither cache nor upstream, or an
/// output can't be written.
pub async fn execute(
    plan: &RunPlan,
    boundaries: &BoundarySet,
    sources: &Sources,
    today: NaiveDate,
    progress: Arc<dyn ProgressCallback>,
) -> Result<RunSummary, EngineError> {
    if boundaries.features.is_empty() {
        return Err(EngineError::Empty {
            message: "boundary set has no units".to_string(),
        });
    }

    // Spatial structure.
    let graph = load_graph(&plan.paths, boundaries)?;

    // Static registries.
    let population = sources.population.population()?;
    let facilities = sources.facilities.facility_counts()?;
    let poverty = sources.poverty.poverty_rates()?;
    log::info!(
        "Registries: {} population rows, {} units with facilities, {} poverty rows",
        population.len(),
        facilities.len(),
        poverty.len()
    );
    let units = build_units(&boundaries.features, &population);

    // Upstream streams.
    let events = resolve_events(plan, sources.events.as_ref(), today, progress).await?;
    let forecast = resolve_forecast(plan, sources.forecast.as_ref(), today).await?;
    let forecast_payload = forecast.as_ref().map_or_else(
        || ForecastSnapshot::empty(month_anchor(today)),
        |f| f.payload.clone(),
    );

    // Scoring.
    let assembled = assemble(&ScoringInputs {
        units: &units,
        graph: &graph.graph,
        events: &events.payload,
        forecast: &forecast_payload,
        facilities: &facilities,
        poverty: &poverty,
        canonicalizer: &plan.canonicalizer,
        run_date: today,
        data_as_of: events.data_as_of(),
    })?;

    // Stage outputs and refreshed caches, then publish them together.
    let geometry: Vec<GeometryRecord> = units.iter().map(GeometryRecord::from).collect();
    let mut publication = Publication::new();
    publication.stage(&plan.paths.risk_table(), &render_table(&assembled.records)?)?;
    publication.stage(&plan.paths.geometry_table(), &render_table(&geometry)?)?;
    publication.stage(&plan.paths.bounds(), &render_bounds(&assembled.bounds)?)?;
    publication.extend(events_store(plan).stage(&events)?);
    if let Some(forecast) = &forecast {
        publication.extend(forecast_store(plan).stage(forecast)?);
    }
    publication.publish()?;
    log::info!(
        "Published {} rows to {}",
        assembled.records.len(),
        plan.paths.risk_table().display()
    );

    let summary = RunSummary {
        run_date: today,
        data_as_of: events.data_as_of(),
        forecast_month: forecast.as_ref().map(|f| f.payload.month),
        units: assembled.records.len(),
        scored: assembled.scored(),
        withheld: assembled.withheld(),
        isolated: graph.graph.isolated().count(),
        geometry_errors: graph.geometry_errors,
        zero_population_anomalies: assembled.zero_population_anomalies.len(),
        events: events.outcome,
        forecast: forecast.map(|f| f.outcome),
    };
    log::info!(
        "Run {} complete: {} units, {} scored, {} withheld, data_as_of {}",
        summary.run_date,
        summary.units,
        summary.scored,
        summary.withheld,
        summary.data_as_of
    );
    Ok(summary)
}

fn events_store(plan: &RunPlan) -> SnapshotStore<EventSnapshot> {
    SnapshotStore::new(&plan.paths.cache_dir, EVENTS_STREAM)
}

fn forecast_store(plan: &RunPlan) -> SnapshotStore<ForecastSnapshot> {
    SnapshotStore::new(&plan.paths.cache_dir, FORECAST_STREAM)
}

async fn resolve_events(
    plan: &RunPlan,
    source: &dyn EventSource,
    today: NaiveDate,
    progress: Arc<dyn ProgressCallback>,
) -> Result<Resolved<EventSnapshot>, EngineError> {
    let controller = RecencyController::new(EVENTS_STREAM, plan.events_policy);
    let resolved = resolve(
        &controller,
        &events_store(plan),
        today,
        || source.recency_cap(),
        |cap| async move {
            let snapshot = source.fetch_window_counts(cap, progress).await?;
            Ok::<_, SourceError>(Fetched {
                data_as_of: snapshot.data_as_of(),
                payload: snapshot,
            })
        },
    )
    .await?;
    Ok(resolved)
}

/// Resolves the forecast stream, keyed by the month containing `today`.
///
/// A cold start whose fetch fails, or a lost snapshot that upstream can't
/// rebuild without going backwards, degrades to no forecast at all (every
/// unit then uses the forecast-free weights); nothing is committed.
async fn resolve_forecast(
    plan: &RunPlan,
    source: &dyn ForecastSource,
    today: NaiveDate,
) -> Result<Option<Resolved<ForecastSnapshot>>, EngineError> {
    let anchor = month_anchor(today);
    let controller = RecencyController::new(FORECAST_STREAM, plan.forecast_policy);
    let resolved = resolve(
        &controller,
        &forecast_store(plan),
        today,
        || async move { Ok::<_, SourceError>(anchor) },
        |month| async move {
            let snapshot = source.fetch_forecast(month).await?;
            Ok::<_, SourceError>(Fetched {
                payload: snapshot,
                data_as_of: month,
            })
        },
    )
    .await;

    match resolved {
        Ok(resolved) => Ok(Some(resolved)),
        Err(CacheError::ColdStart(error)) => {
            log::warn!("{error}; scoring without forecasts");
            Ok(None)
        }
        Err(CacheError::Regressed(warning)) => {
            log::warn!("{warning}; scoring without forecasts");
            Ok(None)
        }
        Err(e) => Err(e.into()),
    }
}

/// Summary of the neighbor graph for the configured boundaries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphSummary {
    /// Units in the graph.
    pub units: usize,
    /// Undirected edges.
    pub edges: usize,
    /// Units without neighbors, in code order.
    pub isolated: Vec<String>,
    /// Units whose geometry was unusable.
    pub geometry_errors: usize,
    /// Whether the graph came from the cache file.
    pub from_cache: bool,
}

/// Loads or builds the neighbor graph for the configured boundaries.
///
/// # Errors
///
/// Returns [`EngineError`] if the boundaries or graph cache can't be read.
pub fn graph(config: &RunConfig) -> Result<GraphSummary, EngineError> {
    let profile = registry::profile(&config.profile)?;
    let boundaries = load_boundaries(config, &profile)?;
    let load = load_graph(&RunPaths::from_config(config), &boundaries)?;
    Ok(GraphSummary {
        units: load.graph.len(),
        edges: load.graph.edge_count(),
        isolated: load.graph.isolated().map(ToString::to_string).collect(),
        geometry_errors: load.geometry_errors,
        from_cache: load.from_cache,
    })
}

/// Persisted state of both cache streams (`None` for a stream never
/// fetched).
///
/// # Errors
///
/// Returns [`EngineError::Cache`] if a state file exists but is
/// unreadable.
pub fn cache_status(
    config: &RunConfig,
) -> Result<Vec<(&'static str, Option<CacheState>)>, EngineError> {
    let dir = &config.cache_dir;
    Ok(vec![
        (
            EVENTS_STREAM,
            SnapshotStore::<EventSnapshot>::new(dir, EVENTS_STREAM).load_state()?,
        ),
        (
            FORECAST_STREAM,
            SnapshotStore::<ForecastSnapshot>::new(dir, FORECAST_STREAM).load_state()?,
        ),
    ])
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use adm2_risk_cache::RefreshReason;
    use adm2_risk_source::UnitValues;
    use adm2_risk_source::progress::null_progress;
    use adm2_risk_source_models::{EventWindows, WindowCounts};
    use adm2_risk_spatial::test_support::square;
    use async_trait::async_trait;

    use super::*;

    fn d(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    struct FakeEvents {
        cap: NaiveDate,
        fail: bool,
        fetches: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl EventSource for FakeEvents {
        fn id(&self) -> &str {
            "fake"
        }

        async fn recency_cap(&self) -> Result<NaiveDate, SourceError> {
            if self.fail {
                return Err(SourceError::Auth {
                    message: "denied".to_string(),
                });
            }
            Ok(self.cap)
        }

        async fn fetch_window_counts(
            &self,
            cap: NaiveDate,
            _progress: Arc<dyn ProgressCallback>,
        ) -> Result<EventSnapshot, SourceError> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            let counts = [
                ("MX01001", 3, 5, 1),
                ("MX01002", 9, 12, 2),
                ("MX01003", 0, 4, 0),
            ]
            .into_iter()
            .map(|(code, last_30, last_90, prior_30)| {
                (
                    code.to_string(),
                    WindowCounts {
                        last_30,
                        last_90,
                        prior_30,
                    },
                )
            })
            .collect();
            Ok(EventSnapshot {
                windows: EventWindows::ending(cap),
                counts,
                total_events: 21,
                unattributed: 0,
            })
        }
    }

    struct FakeForecast {
        fail: bool,
        fetches: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl ForecastSource for FakeForecast {
        fn id(&self) -> &str {
            "fake"
        }

        async fn fetch_forecast(&self, month: NaiveDate) -> Result<ForecastSnapshot, SourceError> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(SourceError::Auth {
                    message: "denied".to_string(),
                });
            }
            let mut snapshot = ForecastSnapshot::empty(month);
            snapshot.states.insert("Estado".to_string(), 12.0);
            snapshot.states.insert("Otro".to_string(), 4.0);
            Ok(snapshot)
        }
    }

    struct Tables;

    impl PopulationRegistry for Tables {
        fn population(&self) -> Result<UnitValues<u64>, SourceError> {
            Ok([
                ("MX01001", 400_000),
                ("MX01002", 120_000),
                ("MX01003", 80_000),
                ("MX01004", 20_000),
            ]
            .into_iter()
            .map(|(c, p)| (c.to_string(), p))
            .collect())
        }
    }

    impl FacilityRegistry for Tables {
        fn facility_counts(&self) -> Result<UnitValues<u64>, SourceError> {
            Ok([("MX01001", 40), ("MX01002", 6), ("MX01004", 1)]
                .into_iter()
                .map(|(c, n)| (c.to_string(), n))
                .collect())
        }
    }

    impl PovertyRegistry for Tables {
        fn poverty_rates(&self) -> Result<UnitValues<f64>, SourceError> {
            Ok([
                ("MX01001", 25.0),
                ("MX01002", 48.5),
                ("MX01003", 61.0),
                ("MX01004", 70.2),
            ]
            .into_iter()
            .map(|(c, p)| (c.to_string(), p))
            .collect())
        }
    }

    struct Harness {
        dir: tempfile::TempDir,
        event_fetches: Arc<AtomicUsize>,
        forecast_fetches: Arc<AtomicUsize>,
        boundaries: BoundarySet,
    }

    impl Harness {
        /// Three adjacent squares in a row plus one island.
        fn new() -> Self {
            Self {
                dir: tempfile::tempdir().unwrap(),
                event_fetches: Arc::new(AtomicUsize::new(0)),
                forecast_fetches: Arc::new(AtomicUsize::new(0)),
                boundaries: BoundarySet {
                    features: vec![
                        square("MX01001", 0.0, 0.0, 1.0),
                        square("MX01002", 1.0, 0.0, 1.0),
                        square("MX01003", 2.0, 0.0, 1.0),
                        square("MX01004", 10.0, 10.0, 1.0),
                    ],
                    fingerprint: "fixture".to_string(),
                },
            }
        }

        fn plan(&self, events_policy: RefreshPolicy, forecast_policy: RefreshPolicy) -> RunPlan {
            RunPlan {
                paths: RunPaths::under(self.dir.path()),
                canonicalizer: Adm1Canonicalizer::default(),
                events_policy,
                forecast_policy,
            }
        }

        fn sources(&self, cap: NaiveDate, events_fail: bool, forecast_fail: bool) -> Sources {
            Sources {
                events: Box::new(FakeEvents {
                    cap,
                    fail: events_fail,
                    fetches: Arc::clone(&self.event_fetches),
                }),
                forecast: Box::new(FakeForecast {
                    fail: forecast_fail,
                    fetches: Arc::clone(&self.forecast_fetches),
                }),
                population: Box::new(Tables),
                facilities: Box::new(Tables),
                poverty: Box::new(Tables),
            }
        }

        async fn run(&self, plan: &RunPlan, sources: &Sources, today: &str) -> RunSummary {
            execute(plan, &self.boundaries, sources, d(today), null_progress())
                .await
                .unwrap()
        }

        fn read(&self, name: &str) -> Vec<u8> {
            std::fs::read(self.dir.path().join(name)).unwrap()
        }
    }

    #[tokio::test]
    async fn cold_start_scores_every_unit_and_commits() {
        let h = Harness::new();
        let plan = h.plan(RefreshPolicy::IfNewer, RefreshPolicy::IfNewer);
        let sources = h.sources(d("2025-06-30"), false, false);

        let summary = h.run(&plan, &sources, "2025-07-02").await;
        assert_eq!(summary.units, 4);
        assert_eq!(summary.scored, 4);
        assert_eq!(summary.isolated, 1);
        assert_eq!(summary.data_as_of, d("2025-06-30"));
        assert_eq!(summary.forecast_month, Some(d("2025-07-01")));
        assert_eq!(summary.events, Outcome::Refreshed(RefreshReason::ColdStart));

        let table = String::from_utf8(h.read("out/adm2_risk_daily.csv")).unwrap();
        let mut lines = table.lines();
        let header = lines.next().unwrap();
        assert!(header.starts_with("run_date,data_as_of,adm1_name,adm2_name,adm2_code"));
        assert!(header.contains("DCR100,PRS100,priority100,missing_indicators"));
        assert_eq!(lines.count(), 4);
        assert!(table.contains("2025-07-02,2025-06-30,Estado,Municipio MX01001,MX01001"));

        let state = cache_status(&RunConfig {
            cache_dir: h.dir.path().join("cache"),
            ..RunConfig::default()
        })
        .unwrap();
        let events_state = state[0].1.unwrap();
        assert_eq!(events_state.generation, 1);
        assert_eq!(events_state.data_as_of, d("2025-06-30"));
        assert_eq!(state[1].1.unwrap().data_as_of, d("2025-07-01"));
        assert!(h.dir.path().join("cache/neighbor_graph.json").exists());
        assert!(h.dir.path().join("out/adm2_geometry.csv").exists());
        assert!(h.dir.path().join("out/normalization_bounds.json").exists());
    }

    #[tokio::test]
    async fn rerun_without_new_data_is_idempotent() {
        let h = Harness::new();
        let plan = h.plan(RefreshPolicy::IfNewer, RefreshPolicy::IfNewer);
        let sources = h.sources(d("2025-06-30"), false, false);

        h.run(&plan, &sources, "2025-07-02").await;
        let table = h.read("out/adm2_risk_daily.csv");
        let events_state = h.read("cache/events_state.json");
        let forecast_state = h.read("cache/forecast_state.json");

        let summary = h.run(&plan, &sources, "2025-07-02").await;
        assert!(matches!(summary.events, Outcome::Stale(_)));
        assert!(matches!(summary.forecast, Some(Outcome::Stale(_))));
        assert_eq!(h.event_fetches.load(Ordering::SeqCst), 1);
        assert_eq!(h.forecast_fetches.load(Ordering::SeqCst), 1);
        assert_eq!(h.read("out/adm2_risk_daily.csv"), table);
        assert_eq!(h.read("cache/events_state.json"), events_state);
        assert_eq!(h.read("cache/forecast_state.json"), forecast_state);
    }

    #[tokio::test]
    async fn advanced_cap_refreshes_events() {
        let h = Harness::new();
        let plan = h.plan(RefreshPolicy::IfNewer, RefreshPolicy::IfNewer);
        h.run(&plan, &h.sources(d("2025-06-30"), false, false), "2025-07-02")
            .await;

        let summary = h
            .run(&plan, &h.sources(d("2025-07-05"), false, false), "2025-07-06")
            .await;
        assert_eq!(summary.data_as_of, d("2025-07-05"));
        assert_eq!(h.event_fetches.load(Ordering::SeqCst), 2);
        let state = cache_status(&RunConfig {
            cache_dir: h.dir.path().join("cache"),
            ..RunConfig::default()
        })
        .unwrap();
        assert_eq!(state[0].1.unwrap().generation, 2);
    }

    #[tokio::test]
    async fn upstream_failure_falls_back_to_cache() {
        let h = Harness::new();
        let plan = h.plan(RefreshPolicy::IfNewer, RefreshPolicy::Force);
        h.run(&plan, &h.sources(d("2025-06-30"), false, false), "2025-07-02")
            .await;

        let summary = h
            .run(&plan, &h.sources(d("2025-07-05"), true, true), "2025-07-06")
            .await;
        assert!(matches!(summary.events, Outcome::Fallback(_)));
        assert!(matches!(summary.forecast, Some(Outcome::Fallback(_))));
        assert_eq!(summary.data_as_of, d("2025-06-30"));
    }

    #[tokio::test]
    async fn events_cold_start_failure_aborts_without_outputs() {
        let h = Harness::new();
        let plan = h.plan(RefreshPolicy::IfNewer, RefreshPolicy::IfNewer);
        let sources = h.sources(d("2025-06-30"), true, false);

        let err = execute(&plan, &h.boundaries, &sources, d("2025-07-02"), null_progress())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Cache(CacheError::ColdStart(_))));
        assert!(!h.dir.path().join("out/adm2_risk_daily.csv").exists());
        assert!(!h.dir.path().join("cache/events_state.json").exists());
    }

    #[tokio::test]
    async fn forecast_cold_start_failure_scores_without_forecast() {
        let h = Harness::new();
        let plan = h.plan(RefreshPolicy::IfNewer, RefreshPolicy::IfNewer);
        let sources = h.sources(d("2025-06-30"), false, true);

        let summary = h.run(&plan, &sources, "2025-07-02").await;
        assert_eq!(summary.forecast, None);
        assert_eq!(summary.scored, 4);
        let table = String::from_utf8(h.read("out/adm2_risk_daily.csv")).unwrap();
        assert!(table.contains("without_forecast"));
        assert!(!table.contains(",with_forecast,"));
        assert!(!h.dir.path().join("cache/forecast_state.json").exists());
    }

    #[tokio::test]
    async fn failed_staging_keeps_previous_outputs_and_cache() {
        let h = Harness::new();
        let plan = h.plan(RefreshPolicy::IfNewer, RefreshPolicy::IfNewer);
        h.run(&plan, &h.sources(d("2025-06-30"), false, false), "2025-07-02")
            .await;
        let table = h.read("out/adm2_risk_daily.csv");
        let geometry = h.read("out/adm2_geometry.csv");
        let events_state = h.read("cache/events_state.json");

        std::fs::create_dir(h.dir.path().join("out/normalization_bounds.json.tmp")).unwrap();
        let err = execute(
            &plan,
            &h.boundaries,
            &h.sources(d("2025-07-05"), false, false),
            d("2025-07-06"),
            null_progress(),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, EngineError::Io(_)));
        assert_eq!(h.event_fetches.load(Ordering::SeqCst), 2);
        assert_eq!(h.read("out/adm2_risk_daily.csv"), table);
        assert_eq!(h.read("out/adm2_geometry.csv"), geometry);
        assert_eq!(h.read("cache/events_state.json"), events_state);
        assert!(!h.dir.path().join("out/adm2_risk_daily.csv.tmp").exists());
        assert!(!h.dir.path().join("cache/events_snapshot.json.tmp").exists());
    }

    #[tokio::test]
    async fn lost_forecast_snapshot_behind_floor_scores_without_forecast() {
        let h = Harness::new();
        let plan = h.plan(RefreshPolicy::IfNewer, RefreshPolicy::IfNewer);
        h.run(&plan, &h.sources(d("2025-06-30"), false, false), "2025-08-02")
            .await;
        std::fs::remove_file(h.dir.path().join("cache/forecast_snapshot.json")).unwrap();
        let forecast_state = h.read("cache/forecast_state.json");

        // A run dated in an earlier month than the persisted forecast.
        let summary = h
            .run(&plan, &h.sources(d("2025-06-30"), false, false), "2025-07-02")
            .await;
        assert_eq!(summary.forecast, None);
        assert_eq!(h.forecast_fetches.load(Ordering::SeqCst), 1);
        assert_eq!(h.read("cache/forecast_state.json"), forecast_state);
    }

    #[tokio::test]
    async fn empty_boundaries_abort() {
        let h = Harness::new();
        let plan = h.plan(RefreshPolicy::IfNewer, RefreshPolicy::IfNewer);
        let sources = h.sources(d("2025-06-30"), false, false);
        let empty = BoundarySet {
            features: Vec::new(),
            fingerprint: "empty".to_string(),
        };
        let err = execute(&plan, &empty, &sources, d("2025-07-02"), null_progress())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Empty { .. }));
    }

    #[test]
    fn graph_is_cached_by_fingerprint() {
        let h = Harness::new();
        let paths = RunPaths::under(h.dir.path());
        let first = load_graph(&paths, &h.boundaries).unwrap();
        assert!(!first.from_cache);
        assert_eq!(first.graph.edge_count(), 2);

        let second = load_graph(&paths, &h.boundaries).unwrap();
        assert!(second.from_cache);
        assert_eq!(second.graph, first.graph);

        let changed = BoundarySet {
            fingerprint: "other".to_string(),
            ..h.boundaries.clone()
        };
        assert!(!load_graph(&paths, &changed).unwrap().from_cache);
    }
}
