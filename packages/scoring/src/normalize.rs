//! Winsorize-and-rescale normalization.
//!
//! Normalization is two-phase: [`Normalizer::fit`] consumes every raw
//! value of one indicator in the run and fixes the 5th/95th percentile
//! bounds, then [`Normalizer::apply`] maps single values into `[0, 1]`.
//! Bounds are recomputed every run, so scores are relative to the run
//! they were computed in. [`NormalizationBounds`] reports them for audit.

use adm2_risk_models::{IndicatorKind, Polarity};
use serde::{Deserialize, Serialize};

use crate::ScoringError;

/// Lower winsorization quantile.
pub const LOWER_QUANTILE: f64 = 0.05;

/// Upper winsorization quantile.
pub const UPPER_QUANTILE: f64 = 0.95;

/// Fitted normalization for one indicator.
#[derive(Debug, Clone, PartialEq)]
pub struct Normalizer {
    kind: IndicatorKind,
    polarity: Polarity,
    lower: f64,
    upper: f64,
    present: usize,
    missing: usize,
}

/// Bounds used for one indicator in a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizationBounds {
    /// Indicator these bounds apply to.
    pub kind: IndicatorKind,
    /// Polarity applied before winsorizing.
    pub polarity: Polarity,
    /// 5th percentile of the oriented values.
    pub lower: f64,
    /// 95th percentile of the oriented values.
    pub upper: f64,
    /// Units with a value.
    pub present: usize,
    /// Units without a value.
    pub missing: usize,
    /// `true` when the bounds coincide and every value maps to 0.
    pub degenerate: bool,
}

impl Normalizer {
    /// Fits bounds over every value of `kind` in the run.
    ///
    /// Missing and non-finite values don't contribute to the bounds.
    ///
    /// # Errors
    ///
    /// Returns [`ScoringError::EmptyIndicator`] if no value is present.
    pub fn fit<I>(kind: IndicatorKind, values: I) -> Result<Self, ScoringError>
    where
        I: IntoIterator<Item = Option<f64>>,
    {
        let polarity = kind.polarity();
        let mut missing = 0;
        let mut oriented: Vec<f64> = Vec::new();
        for value in values {
            match value.filter(|v| v.is_finite()) {
                Some(v) => oriented.push(orient(polarity, v)),
                None => missing += 1,
            }
        }

        if oriented.is_empty() {
            return Err(ScoringError::EmptyIndicator { kind });
        }

        oriented.sort_by(f64::total_cmp);
        let lower = quantile(&oriented, LOWER_QUANTILE);
        let upper = quantile(&oriented, UPPER_QUANTILE);

        let normalizer = Self {
            kind,
            polarity,
            lower,
            upper,
            present: oriented.len(),
            missing,
        };
        if normalizer.is_degenerate() {
            log::warn!("Indicator {kind} has zero spread (p5 = p95 = {lower}); all values map to 0");
        }
        Ok(normalizer)
    }

    /// Maps one raw value into `[0, 1]`, 1 being worst.
    ///
    /// Missing stays missing.
    #[must_use]
    pub fn apply(&self, raw: Option<f64>) -> Option<f64> {
        let value = raw.filter(|v| v.is_finite())?;
        if self.is_degenerate() {
            return Some(0.0);
        }
        let clipped = orient(self.polarity, value).clamp(self.lower, self.upper);
        Some(((clipped - self.lower) / (self.upper - self.lower)).clamp(0.0, 1.0))
    }

    /// Whether the bounds collapse to a point (no signal).
    #[must_use]
    pub fn is_degenerate(&self) -> bool {
        !(self.upper > self.lower) || !self.lower.is_finite() || !self.upper.is_finite()
    }

    /// The indicator this normalizer was fitted for.
    #[must_use]
    pub const fn kind(&self) -> IndicatorKind {
        self.kind
    }

    /// Reports the fitted bounds.
    #[must_use]
    pub fn bounds(&self) -> NormalizationBounds {
        NormalizationBounds {
            kind: self.kind,
            polarity: self.polarity,
            lower: self.lower,
            upper: self.upper,
            present: self.present,
            missing: self.missing,
            degenerate: self.is_degenerate(),
        }
    }
}

/// Fits and applies in one go, preserving input order.
///
/// # Errors
///
/// Returns [`ScoringError::EmptyIndicator`] if no value is present.
pub fn normalize_all(
    kind: IndicatorKind,
    values: &[Option<f64>],
) -> Result<(Vec<Option<f64>>, NormalizationBounds), ScoringError> {
    let normalizer = Normalizer::fit(kind, values.iter().copied())?;
    let normalized = values.iter().map(|v| normalizer.apply(*v)).collect();
    Ok((normalized, normalizer.bounds()))
}

/// Protective indicators are negated so larger always means worse.
fn orient(polarity: Polarity, value: f64) -> f64 {
    match polarity {
        Polarity::HigherIsWorse => value,
        Polarity::LowerIsWorse => -value,
    }
}

/// Quantile of sorted data with linear interpolation between the two
/// closest ranks.
///
/// `sorted` must be non-empty and ascending.
#[must_use]
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
pub fn quantile(sorted: &[f64], q: f64) -> f64 {
    let n = sorted.len();
    if n == 1 {
        return sorted[0];
    }
    let position = q.clamp(0.0, 1.0) * (n - 1) as f64;
    let below = position.floor() as usize;
    let above = (below + 1).min(n - 1);
    let fraction = position - below as f64;
    sorted[below] + (sorted[above] - sorted[below]) * fraction
}

#[cfg(test)]
mod tests {
    use super::*;

    fn some(values: &[f64]) -> Vec<Option<f64>> {
        values.iter().copied().map(Some).collect()
    }

    #[test]
    fn quantile_interpolates_linearly() {
        let data = [1.0, 2.0, 3.0, 4.0, 5.0];
        assert!((quantile(&data, 0.5) - 3.0).abs() < 1e-12);
        assert!((quantile(&data, 0.05) - 1.2).abs() < 1e-12);
        assert!((quantile(&data, 0.95) - 4.8).abs() < 1e-12);
        assert!((quantile(&[7.0], 0.95) - 7.0).abs() < 1e-12);
    }

    #[test]
    fn output_is_bounded_and_extremes_hit_the_ends() {
        let raw = some(&[0.0, 1.0, 2.0, 5.0, 9.0, 40.0, 3.0, 0.5, 12.0, 100.0]);
        let (normalized, _) = normalize_all(IndicatorKind::V30, &raw).unwrap();
        for v in normalized.iter().flatten() {
            assert!((0.0..=1.0).contains(v), "{v} out of range");
        }
        assert_eq!(normalized[0], Some(0.0), "minimum maps to 0");
        assert_eq!(normalized[9], Some(1.0), "maximum maps to 1");
    }

    #[test]
    fn outliers_are_clipped_to_the_ceiling() {
        let mut values: Vec<f64> = (0..100).map(f64::from).collect();
        values.push(10_000.0);
        let (normalized, bounds) = normalize_all(IndicatorKind::V3m, &some(&values)).unwrap();
        assert!(bounds.upper < 10_000.0);
        // Everything at or above p95 saturates at 1.
        assert_eq!(normalized.last().copied().flatten(), Some(1.0));
        assert_eq!(normalized[99], Some(1.0));
    }

    #[test]
    fn zero_variance_maps_everything_to_zero() {
        let (normalized, bounds) =
            normalize_all(IndicatorKind::Poverty, &some(&[4.0, 4.0, 4.0])).unwrap();
        assert!(bounds.degenerate);
        assert!(normalized.iter().all(|v| *v == Some(0.0)));
    }

    #[test]
    fn missing_values_stay_missing_and_do_not_shift_bounds() {
        let with_gaps = vec![Some(1.0), None, Some(3.0), None, Some(2.0)];
        let (normalized, bounds) = normalize_all(IndicatorKind::V30, &with_gaps).unwrap();
        assert_eq!(normalized[1], None);
        assert_eq!(normalized[3], None);
        assert_eq!(bounds.present, 3);
        assert_eq!(bounds.missing, 2);

        let (dense, dense_bounds) =
            normalize_all(IndicatorKind::V30, &some(&[1.0, 3.0, 2.0])).unwrap();
        assert_eq!(bounds.lower, dense_bounds.lower);
        assert_eq!(bounds.upper, dense_bounds.upper);
        assert_eq!(normalized[0], dense[0]);
    }

    #[test]
    fn all_missing_is_an_error() {
        let err = normalize_all(IndicatorKind::Forecast, &[None, None]).unwrap_err();
        assert_eq!(
            err,
            ScoringError::EmptyIndicator {
                kind: IndicatorKind::Forecast
            }
        );
        assert!(normalize_all(IndicatorKind::Forecast, &[]).is_err());
    }

    #[test]
    fn facility_density_is_inverted() {
        // More facilities = better access = lower risk.
        let raw = some(&[0.0, 10.0, 20.0, 30.0, 40.0]);
        let (normalized, bounds) = normalize_all(IndicatorKind::FacilityDensity, &raw).unwrap();
        assert_eq!(bounds.polarity, Polarity::LowerIsWorse);
        assert_eq!(normalized[0], Some(1.0));
        assert_eq!(normalized[4], Some(0.0));
        for pair in normalized.windows(2) {
            assert!(pair[0] >= pair[1]);
        }
    }

    #[test]
    fn inversion_matches_normalizing_the_negation() {
        let raw = [3.5, 0.0, 17.0, 8.25, 2.0, 40.0, 11.0];
        let (inverted, _) = normalize_all(IndicatorKind::FacilityDensity, &some(&raw)).unwrap();

        let negated: Vec<f64> = raw.iter().map(|v| -v).collect();
        let (direct, _) = normalize_all(IndicatorKind::Poverty, &some(&negated)).unwrap();

        assert_eq!(inverted, direct);
    }

    #[test]
    fn normalization_is_monotonic() {
        let raw = some(&[5.0, 1.0, 9.0, 3.0, 7.0, 2.0, 8.0]);
        let (normalized, _) = normalize_all(IndicatorKind::V30, &raw).unwrap();
        for i in 0..raw.len() {
            for j in 0..raw.len() {
                if raw[i] < raw[j] {
                    assert!(normalized[i] <= normalized[j]);
                }
            }
        }
    }

    #[test]
    fn non_finite_values_count_as_missing() {
        let raw = vec![Some(1.0), Some(f64::NAN), Some(2.0), Some(f64::INFINITY)];
        let (normalized, bounds) = normalize_all(IndicatorKind::V30, &raw).unwrap();
        assert_eq!(bounds.present, 2);
        assert_eq!(normalized[1], None);
        assert_eq!(normalized[3], None);
    }
}
