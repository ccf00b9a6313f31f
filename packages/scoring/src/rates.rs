//! Per-100k rates over the women-of-reproductive-age population.
//!
//! A unit's rate is only known when its population is. A zero population
//! with zero events has rate 0; a zero population *with* events has no
//! meaningful rate, so it is reported missing and flagged.

use adm2_risk_models::RATE_PER;

/// Outcome of a rate computation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Rate {
    /// A finite rate.
    Value(f64),
    /// Population unknown.
    UnknownPopulation,
    /// Events were recorded against a zero population.
    ZeroPopulationWithEvents,
}

impl Rate {
    /// The rate, if it is defined.
    #[must_use]
    pub const fn value(self) -> Option<f64> {
        match self {
            Self::Value(v) => Some(v),
            Self::UnknownPopulation | Self::ZeroPopulationWithEvents => None,
        }
    }
}

/// Events (or facilities) per 100k of `pop_wra`.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn per_100k(count: u64, pop_wra: Option<u64>) -> Rate {
    match pop_wra {
        None => Rate::UnknownPopulation,
        Some(0) if count == 0 => Rate::Value(0.0),
        Some(0) => Rate::ZeroPopulationWithEvents,
        Some(pop) => Rate::Value(RATE_PER * count as f64 / pop as f64),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simple_rate() {
        assert_eq!(per_100k(5, Some(50_000)), Rate::Value(10.0));
        assert_eq!(per_100k(0, Some(50_000)), Rate::Value(0.0));
    }

    #[test]
    fn unknown_population_is_missing() {
        assert_eq!(per_100k(3, None), Rate::UnknownPopulation);
        assert_eq!(per_100k(0, None).value(), None);
    }

    #[test]
    fn zero_population() {
        assert_eq!(per_100k(0, Some(0)), Rate::Value(0.0));
        assert_eq!(per_100k(2, Some(0)), Rate::ZeroPopulationWithEvents);
        assert_eq!(per_100k(2, Some(0)).value(), None);
    }
}
