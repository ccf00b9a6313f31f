//! Population exposure weight.
//!
//! `w_exposure = sqrt(pop_wra / median(pop_wra))`, clipped to
//! `[0.5, 2.0]`. A zero population counts as 1 in the ratio. Published for
//! downstream weighting; it does not enter the composite scores.

use crate::normalize::quantile;

/// Lower clip of the exposure weight.
pub const MIN_EXPOSURE: f64 = 0.5;

/// Upper clip of the exposure weight.
pub const MAX_EXPOSURE: f64 = 2.0;

/// Median of the positive WRA populations in the run.
///
/// Returns `None` when no unit has a positive population.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn median_wra<I>(populations: I) -> Option<f64>
where
    I: IntoIterator<Item = Option<u64>>,
{
    let mut values: Vec<f64> = populations
        .into_iter()
        .flatten()
        .filter(|p| *p > 0)
        .map(|p| p as f64)
        .collect();
    if values.is_empty() {
        return None;
    }
    values.sort_by(f64::total_cmp);
    Some(quantile(&values, 0.5))
}

/// Neutral weight for units whose population is unknown.
pub const NEUTRAL_EXPOSURE: f64 = 1.0;

/// Exposure weight of one unit.
///
/// Runs without a usable median divide by 1.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn weight(pop_wra: Option<u64>, median: Option<f64>) -> f64 {
    let Some(pop) = pop_wra else {
        return NEUTRAL_EXPOSURE;
    };
    let median = median.filter(|m| m.is_finite() && *m > 0.0).unwrap_or(1.0);
    (pop.max(1) as f64 / median)
        .sqrt()
        .clamp(MIN_EXPOSURE, MAX_EXPOSURE)
}
