//! Weighted composites.
//!
//! Every weight set sums to 1, so with inputs in `[0, 1]` the scaled
//! scores land in `[0, 100]`. Scores are clamped anyway to absorb float
//! drift.

use adm2_risk_models::{
    CompositeScores, IndicatorKind, NormalizedIndicators, PrsVariant, ScoreStatus,
};

/// Weights of the descriptive/structural score.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DcrWeights {
    /// 90-day violence.
    pub v3m: f64,
    /// Spillover.
    pub spillover: f64,
    /// Access deficit.
    pub access: f64,
    /// Poverty.
    pub mvi: f64,
}

/// `DCR = .35 V3m + .15 S + .30 A + .20 MVI`.
pub const DCR_WEIGHTS: DcrWeights = DcrWeights {
    v3m: 0.35,
    spillover: 0.15,
    access: 0.30,
    mvi: 0.20,
};

/// Weights of the predictive score, per variant.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PrsWeights {
    /// Used when the unit's state has a forecast value.
    WithForecast {
        /// 30-day violence.
        v30: f64,
        /// Violence delta.
        delta_v30: f64,
        /// Spillover.
        spillover: f64,
        /// State forecast.
        cast: f64,
        /// Access deficit.
        access: f64,
        /// Poverty.
        mvi: f64,
    },
    /// Used when the unit's state has no forecast value.
    WithoutForecast {
        /// 30-day violence.
        v30: f64,
        /// Violence delta.
        delta_v30: f64,
        /// Spillover.
        spillover: f64,
        /// Access deficit.
        access: f64,
        /// Poverty.
        mvi: f64,
    },
}

/// `PRS = .30 V30 + .25 dV30 + .10 S + .18 CAST + .12 A + .05 MVI`.
pub const PRS_WITH_FORECAST: PrsWeights = PrsWeights::WithForecast {
    v30: 0.30,
    delta_v30: 0.25,
    spillover: 0.10,
    cast: 0.18,
    access: 0.12,
    mvi: 0.05,
};

/// `PRS = .40 V30 + .30 dV30 + .10 S + .12 A + .08 MVI`.
pub const PRS_WITHOUT_FORECAST: PrsWeights = PrsWeights::WithoutForecast {
    v30: 0.40,
    delta_v30: 0.30,
    spillover: 0.10,
    access: 0.12,
    mvi: 0.08,
};

/// Share of `PRS` in the priority score.
pub const PRIORITY_PRS_SHARE: f64 = 0.6;

/// Share of `DCR` in the priority score.
pub const PRIORITY_DCR_SHARE: f64 = 0.4;

const WEIGHT_TOLERANCE: f64 = 1e-9;

impl DcrWeights {
    /// Sum of all weights.
    #[must_use]
    pub const fn total(&self) -> f64 {
        self.v3m + self.spillover + self.access + self.mvi
    }
}

impl PrsWeights {
    /// Picks the weight set by forecast availability.
    #[must_use]
    pub const fn select(has_forecast: bool) -> Self {
        if has_forecast {
            PRS_WITH_FORECAST
        } else {
            PRS_WITHOUT_FORECAST
        }
    }

    /// Sum of all weights.
    #[must_use]
    pub const fn total(&self) -> f64 {
        match *self {
            Self::WithForecast {
                v30,
                delta_v30,
                spillover,
                cast,
                access,
                mvi,
            } => v30 + delta_v30 + spillover + cast + access + mvi,
            Self::WithoutForecast {
                v30,
                delta_v30,
                spillover,
                access,
                mvi,
            } => v30 + delta_v30 + spillover + access + mvi,
        }
    }

    /// The record tag for this weight set.
    #[must_use]
    pub const fn variant(&self) -> PrsVariant {
        match self {
            Self::WithForecast { .. } => PrsVariant::WithForecast,
            Self::WithoutForecast { .. } => PrsVariant::WithoutForecast,
        }
    }
}

const fn sums_to_one(total: f64) -> bool {
    let diff = total - 1.0;
    diff < WEIGHT_TOLERANCE && diff > -WEIGHT_TOLERANCE
}

const _: () = assert!(sums_to_one(DCR_WEIGHTS.total()), "DCR weights must sum to 1");
const _: () = assert!(
    sums_to_one(PRS_WITH_FORECAST.total()),
    "PRS weights must sum to 1"
);
const _: () = assert!(
    sums_to_one(PRS_WITHOUT_FORECAST.total()),
    "PRS weights must sum to 1"
);
const _: () = assert!(
    sums_to_one(PRIORITY_PRS_SHARE + PRIORITY_DCR_SHARE),
    "priority shares must sum to 1"
);

/// Scores one unit from its normalized indicators.
///
/// Any missing input withholds all three scores and lists what was
/// missing. A missing forecast is never a gap: it selects the
/// forecast-free `PRS` weights instead.
#[must_use]
#[allow(clippy::suboptimal_flops)]
pub fn score(ind: &NormalizedIndicators) -> ScoreStatus {
    let mut missing = Vec::new();
    let mut need = |kind: IndicatorKind, value: Option<f64>| {
        if value.is_none() {
            missing.push(kind);
        }
        value.unwrap_or_default()
    };

    let v30 = need(IndicatorKind::V30, ind.v30);
    let v3m = need(IndicatorKind::V3m, ind.v3m);
    let delta_v30 = need(IndicatorKind::DeltaV30, ind.delta_v30);
    let access = need(IndicatorKind::FacilityDensity, ind.access);
    let mvi = need(IndicatorKind::Poverty, ind.mvi);
    let spillover = need(IndicatorKind::Spillover, ind.spillover);

    if !missing.is_empty() {
        missing.sort();
        return ScoreStatus::Withheld { missing };
    }

    let dcr = DCR_WEIGHTS.v3m * v3m
        + DCR_WEIGHTS.spillover * spillover
        + DCR_WEIGHTS.access * access
        + DCR_WEIGHTS.mvi * mvi;

    let weights = PrsWeights::select(ind.cast.is_some());
    let prs = match weights {
        PrsWeights::WithForecast {
            v30: w_v30,
            delta_v30: w_dv30,
            spillover: w_s,
            cast: w_cast,
            access: w_a,
            mvi: w_mvi,
        } => {
            w_v30 * v30
                + w_dv30 * delta_v30
                + w_s * spillover
                + w_cast * ind.cast.unwrap_or_default()
                + w_a * access
                + w_mvi * mvi
        }
        PrsWeights::WithoutForecast {
            v30: w_v30,
            delta_v30: w_dv30,
            spillover: w_s,
            access: w_a,
            mvi: w_mvi,
        } => w_v30 * v30 + w_dv30 * delta_v30 + w_s * spillover + w_a * access + w_mvi * mvi,
    };

    let dcr100 = to_percent(dcr);
    let prs100 = to_percent(prs);
    let priority100 = to_percent(PRIORITY_PRS_SHARE * prs + PRIORITY_DCR_SHARE * dcr);

    ScoreStatus::Scored(CompositeScores {
        dcr100,
        prs100,
        priority100,
        prs_variant: weights.variant(),
    })
}

fn to_percent(score: f64) -> f64 {
    (100.0 * score).clamp(0.0, 100.0)
}
