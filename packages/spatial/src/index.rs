//! R-tree point attribution.
//!
//! Assigns points (conflict events, health facilities) to the ADM2 unit
//! whose polygon contains them.

use geo::{Intersects, MultiPolygon, Point};
use rstar::{AABB, RTree, RTreeObject};

use crate::{BoundaryFeature, compute_envelope};

/// A unit polygon stored in the R-tree with its code.
struct UnitEntry {
    adm2_code: String,
    envelope: AABB<[f64; 2]>,
    polygon: MultiPolygon<f64>,
}

impl RTreeObject for UnitEntry {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        self.envelope
    }
}

/// Pre-built spatial index over unit polygons.
///
/// Units with unusable geometry are left out; points inside them are
/// reported as unattributed.
pub struct UnitIndex {
    units: RTree<UnitEntry>,
}

impl UnitIndex {
    /// Builds the index from boundary features.
    #[must_use]
    pub fn build(features: &[BoundaryFeature]) -> Self {
        let entries: Vec<UnitEntry> = features
            .iter()
            .filter_map(|f| {
                let polygon = f.validated().ok()?;
                Some(UnitEntry {
                    adm2_code: f.adm2_code.clone(),
                    envelope: compute_envelope(polygon),
                    polygon: polygon.clone(),
                })
            })
            .collect();
        log::info!("Loaded {} unit polygons into point index", entries.len());

        Self {
            units: RTree::bulk_load(entries),
        }
    }

    /// Looks up the unit containing a point.
    ///
    /// Points on a shared border belong to more than one polygon; the
    /// lowest unit code wins so attribution is deterministic.
    #[must_use]
    pub fn lookup(&self, lon: f64, lat: f64) -> Option<&str> {
        if !lon.is_finite() || !lat.is_finite() {
            return None;
        }
        let point = Point::new(lon, lat);
        let query_env = AABB::from_point([lon, lat]);

        self.units
            .locate_in_envelope_intersecting(&query_env)
            .filter(|entry| entry.polygon.intersects(&point))
            .map(|entry| entry.adm2_code.as_str())
            .min()
    }

    /// Number of indexed units.
    #[must_use]
    pub fn len(&self) -> usize {
        self.units.size()
    }

    /// Whether no units were indexed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.units.size() == 0
    }
}
