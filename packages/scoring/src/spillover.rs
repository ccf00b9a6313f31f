//! Spatial spillover: the mean normalized 30-day violence of a unit's
//! queen neighbors.
//!
//! Must run on *normalized* `V30` so the term lives on the same `[0, 1]`
//! scale as everything else. The raw spillover values produced here are
//! normalized again (as indicator `S`) before composite scoring.

use std::collections::BTreeMap;

use adm2_risk_models::SpilloverKind;
use adm2_risk_spatial::NeighborGraph;

/// Spillover for one unit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SpilloverValue {
    /// No neighbors. Resolves to 0 and is a valid low-risk signal.
    Isolated,
    /// Mean over the neighbors that had a normalized `V30`.
    Mean {
        /// The mean.
        value: f64,
        /// How many neighbors contributed.
        neighbors: usize,
    },
    /// Every neighbor lacked a normalized `V30`.
    NoData,
}

impl SpilloverValue {
    /// The raw spillover value; `None` only for [`Self::NoData`].
    #[must_use]
    pub const fn value(&self) -> Option<f64> {
        match self {
            Self::Isolated => Some(0.0),
            Self::Mean { value, .. } => Some(*value),
            Self::NoData => None,
        }
    }

    /// The record-level tag for this value.
    #[must_use]
    pub const fn kind(&self) -> SpilloverKind {
        match self {
            Self::Isolated => SpilloverKind::Isolated,
            Self::Mean { .. } => SpilloverKind::Neighbors,
            Self::NoData => SpilloverKind::NoData,
        }
    }
}

/// Computes spillover for every unit in `normalized_v30`.
///
/// Units absent from the graph (no usable geometry) are isolated.
/// Neighbors outside the run, or without a normalized `V30`, are skipped.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn compute(
    graph: &NeighborGraph,
    normalized_v30: &BTreeMap<String, Option<f64>>,
) -> BTreeMap<String, SpilloverValue> {
    normalized_v30
        .keys()
        .map(|code| {
            if graph.is_isolated(code) {
                return (code.clone(), SpilloverValue::Isolated);
            }

            let values: Vec<f64> = graph
                .neighbors(code)
                .filter_map(|n| normalized_v30.get(n).copied().flatten())
                .collect();

            let spill = if values.is_empty() {
                SpilloverValue::NoData
            } else {
                SpilloverValue::Mean {
                    value: values.iter().sum::<f64>() / values.len() as f64,
                    neighbors: values.len(),
                }
            };
            (code.clone(), spill)
        })
        .collect()
}
