//! Turns collected inputs into published [`RiskRecord`] rows.
//!
//! Phases run in strict order over the whole unit set: rates, indicator
//! normalization, spillover of normalized `V30`, normalization of
//! spillover, forecast normalization across states, and composite scores.
//! Units are handled in `adm2_code` order so the same inputs always give
//! the same table.

use std::collections::BTreeMap;

use adm2_risk_models::{
    AdministrativeUnit, IndicatorKind, NormalizedIndicators, RATE_PER, RawIndicators, RiskRecord,
    ScoreStatus, format_missing,
};
use adm2_risk_scoring::normalize::{NormalizationBounds, Normalizer, normalize_all};
use adm2_risk_scoring::rates::{Rate, per_100k};
use adm2_risk_scoring::spillover::{self, SpilloverValue};
use adm2_risk_scoring::{ScoringError, composite, exposure};
use adm2_risk_source::UnitValues;
use adm2_risk_source::admin::Adm1Canonicalizer;
use adm2_risk_source_models::{EventSnapshot, ForecastSnapshot};
use adm2_risk_spatial::NeighborGraph;
use chrono::NaiveDate;

/// Everything the scoring phases read.
pub struct ScoringInputs<'a> {
    /// Units in `adm2_code` order.
    pub units: &'a [AdministrativeUnit],
    /// Queen contiguity over the units.
    pub graph: &'a NeighborGraph,
    /// Event counts per unit.
    pub events: &'a EventSnapshot,
    /// State forecasts.
    pub forecast: &'a ForecastSnapshot,
    /// Facility counts; absent units have none.
    pub facilities: &'a UnitValues<u64>,
    /// Poverty percentages; absent units are unknown.
    pub poverty: &'a UnitValues<f64>,
    /// Joins unit state names to forecast state names.
    pub canonicalizer: &'a Adm1Canonicalizer,
    /// Date of the run.
    pub run_date: NaiveDate,
    /// Upstream date of the event data in use.
    pub data_as_of: NaiveDate,
}

/// The assembled table plus what the run learned along the way.
#[derive(Debug, Clone)]
pub struct Assembled {
    /// One record per unit, in `adm2_code` order.
    pub records: Vec<RiskRecord>,
    /// Bounds of every normalized indicator.
    pub bounds: Vec<NormalizationBounds>,
    /// Units with events recorded against a zero population.
    pub zero_population_anomalies: Vec<String>,
}

impl Assembled {
    /// Units that received scores.
    #[must_use]
    pub fn scored(&self) -> usize {
        self.records.iter().filter(|r| r.is_scored()).count()
    }

    /// Units whose scores were withheld.
    #[must_use]
    pub fn withheld(&self) -> usize {
        self.records.len() - self.scored()
    }
}

/// Raw rates for one unit.
struct UnitRaw {
    raw: RawIndicators,
    zero_population_with_events: bool,
}

fn raw_indicators(unit: &AdministrativeUnit, inputs: &ScoringInputs<'_>) -> UnitRaw {
    let code = unit.adm2_code.as_str();
    let pop_wra = unit.pop_wra();
    let counts = inputs.events.counts_for(code);

    let rates = [
        per_100k(counts.last_30, pop_wra),
        per_100k(counts.last_90, pop_wra),
        per_100k(counts.prior_30, pop_wra),
    ];
    let zero_population_with_events = rates.contains(&Rate::ZeroPopulationWithEvents);

    let facilities = inputs.facilities.get(code).copied().unwrap_or(0);
    #[allow(clippy::cast_precision_loss)]
    let fac_per_100k = pop_wra.map(|pop| RATE_PER * facilities as f64 / pop.max(1) as f64);

    let cast_raw = inputs
        .forecast
        .value(&inputs.canonicalizer.canonical(&unit.adm1_name));

    UnitRaw {
        raw: RawIndicators {
            v30: rates[0].value(),
            v3m: rates[1].value(),
            v30_prior: rates[2].value(),
            fac_per_100k,
            poverty_rate: inputs.poverty.get(code).copied(),
            cast_raw,
        },
        zero_population_with_events,
    }
}

/// Forecast values normalized across states, keyed by canonical state.
fn normalized_forecast(
    forecast: &ForecastSnapshot,
) -> Result<(BTreeMap<String, f64>, Option<NormalizationBounds>), ScoringError> {
    if forecast.states.is_empty() {
        log::warn!("No state has a forecast; every unit uses the forecast-free weights");
        return Ok((BTreeMap::new(), None));
    }
    let normalizer = Normalizer::fit(
        IndicatorKind::Forecast,
        forecast.states.values().copied().map(Some),
    )?;
    let states = forecast
        .states
        .iter()
        .filter_map(|(state, raw)| normalizer.apply(Some(*raw)).map(|v| (state.clone(), v)))
        .collect();
    Ok((states, Some(normalizer.bounds())))
}

/// Runs every scoring phase.
///
/// # Errors
///
/// Returns [`ScoringError::EmptyIndicator`] if a required indicator has
/// no value for any unit.
pub fn assemble(inputs: &ScoringInputs<'_>) -> Result<Assembled, ScoringError> {
    let units = inputs.units;

    // Phase 1: rates.
    let raws: Vec<UnitRaw> = units.iter().map(|u| raw_indicators(u, inputs)).collect();
    let zero_population_anomalies: Vec<String> = units
        .iter()
        .zip(&raws)
        .filter(|(_, r)| r.zero_population_with_events)
        .map(|(u, _)| u.adm2_code.clone())
        .collect();
    for (unit, raw) in units.iter().zip(&raws) {
        if raw.zero_population_with_events {
            let c = inputs.events.counts_for(&unit.adm2_code);
            log::warn!(
                "{} ({}, {}): events recorded against zero WRA population \
                 (30d {}, 90d {}, prior {}); rates left missing",
                unit.adm2_code,
                unit.adm2_name,
                unit.adm1_name,
                c.last_30,
                c.last_90,
                c.prior_30
            );
        }
    }

    // Phase 2: per-indicator normalization.
    let column = |f: fn(&RawIndicators) -> Option<f64>| -> Vec<Option<f64>> {
        raws.iter().map(|r| f(&r.raw)).collect()
    };
    let mut bounds = Vec::new();
    let mut normalize =
        |kind: IndicatorKind, values: Vec<Option<f64>>| -> Result<Vec<Option<f64>>, ScoringError> {
            let (normalized, b) = normalize_all(kind, &values)?;
            bounds.push(b);
            Ok(normalized)
        };
    let norm_v30 = normalize(IndicatorKind::V30, column(|r| r.v30))?;
    let norm_v3m = normalize(IndicatorKind::V3m, column(|r| r.v3m))?;
    let norm_dv30 = normalize(IndicatorKind::DeltaV30, column(RawIndicators::delta_v30))?;
    let access = normalize(IndicatorKind::FacilityDensity, column(|r| r.fac_per_100k))?;
    let mvi = normalize(IndicatorKind::Poverty, column(|r| r.poverty_rate))?;

    // Phase 3: spillover over normalized V30, then normalize it.
    let v30_by_unit: BTreeMap<String, Option<f64>> = units
        .iter()
        .zip(&norm_v30)
        .map(|(u, v)| (u.adm2_code.clone(), *v))
        .collect();
    let spill = spillover::compute(inputs.graph, &v30_by_unit);
    let spill_values: Vec<SpilloverValue> = units
        .iter()
        .map(|u| {
            spill
                .get(&u.adm2_code)
                .copied()
                .unwrap_or(SpilloverValue::Isolated)
        })
        .collect();
    let norm_s = normalize(
        IndicatorKind::Spillover,
        spill_values.iter().map(SpilloverValue::value).collect(),
    )?;

    // Phase 4: forecast, normalized across states.
    let (forecast_states, forecast_bounds) = normalized_forecast(inputs.forecast)?;
    bounds.extend(forecast_bounds);

    // Phase 5: composite scores.
    let median = exposure::median_wra(units.iter().map(AdministrativeUnit::pop_wra));
    let records = units
        .iter()
        .enumerate()
        .map(|(i, unit)| {
            let raw = &raws[i].raw;
            let cast = forecast_states
                .get(&inputs.canonicalizer.canonical(&unit.adm1_name))
                .copied();
            let normalized = NormalizedIndicators {
                v30: norm_v30[i],
                v3m: norm_v3m[i],
                delta_v30: norm_dv30[i],
                spillover: norm_s[i],
                access: access[i],
                mvi: mvi[i],
                cast,
            };
            let status = composite::score(&normalized);
            let scores = status.scores();
            let missing = match &status {
                ScoreStatus::Withheld { missing } => format_missing(missing),
                ScoreStatus::Scored(_) => String::new(),
            };
            if !missing.is_empty() {
                log::debug!("{}: scores withheld (missing {missing})", unit.adm2_code);
            }

            RiskRecord {
                run_date: inputs.run_date,
                data_as_of: inputs.data_as_of,
                adm1_name: unit.adm1_name.clone(),
                adm2_name: unit.adm2_name.clone(),
                adm2_code: unit.adm2_code.clone(),
                pop_total: unit.pop_total,
                pop_wra: unit.pop_wra(),
                w_exposure: exposure::weight(unit.pop_wra(), median),
                v30: raw.v30,
                v3m: raw.v3m,
                v30_prior: raw.v30_prior,
                dlt_v30_raw: raw.delta_v30(),
                fac_per_100k: raw.fac_per_100k,
                poverty_rate: raw.poverty_rate,
                cast_raw: raw.cast_raw,
                spillover_raw: spill_values[i].value(),
                spillover_kind: spill_values[i].kind(),
                norm_v30: normalized.v30,
                norm_v3m: normalized.v3m,
                norm_dv30: normalized.delta_v30,
                norm_s: normalized.spillover,
                access_a: normalized.access,
                mvi: normalized.mvi,
                cast_state: normalized.cast,
                prs_variant: scores.map(|s| s.prs_variant),
                dcr100: scores.map(|s| s.dcr100),
                prs100: scores.map(|s| s.prs100),
                priority100: scores.map(|s| s.priority100),
                missing_indicators: missing,
            }
        })
        .collect();

    Ok(Assembled {
        records,
        bounds,
        zero_population_anomalies,
    })
}
