#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Boundary geometry handling for ADM2 units.
//!
//! Parses unit polygons, validates them, builds the queen contiguity
//! [`NeighborGraph`] used for the spillover term, and provides an R-tree
//! [`UnitIndex`] for attributing points (events, facilities) to units.

pub mod graph;
pub mod index;

use adm2_risk_models::LonLat;
use geo::{BoundingRect, Centroid, MultiPolygon, Validation};
use geojson::GeoJson;
use rstar::AABB;
use sha2::{Digest, Sha256};

pub use graph::{GraphBuild, NeighborGraph};
pub use index::UnitIndex;

/// Errors for a single unit's geometry.
///
/// None of these abort a run: the unit is excluded from adjacency tests
/// and surfaces as an isolated node.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GeometryError {
    /// The boundary source had no polygon for the unit.
    #[error("unit {adm2_code} has no polygon")]
    Missing {
        /// Unit code.
        adm2_code: String,
    },

    /// The polygon has no rings or a degenerate exterior ring.
    #[error("unit {adm2_code} has an empty polygon")]
    Empty {
        /// Unit code.
        adm2_code: String,
    },

    /// The polygon is not valid (self-intersecting rings, etc.).
    #[error("unit {adm2_code} has an invalid polygon: {reason}")]
    Invalid {
        /// Unit code.
        adm2_code: String,
        /// Validation failure description.
        reason: String,
    },
}

impl GeometryError {
    /// The code of the unit whose geometry failed.
    #[must_use]
    pub fn adm2_code(&self) -> &str {
        match self {
            Self::Missing { adm2_code }
            | Self::Empty { adm2_code }
            | Self::Invalid { adm2_code, .. } => adm2_code,
        }
    }
}

/// Errors reading boundary collections.
#[derive(Debug, thiserror::Error)]
pub enum SpatialError {
    /// I/O error reading a boundary or graph file.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// `GeoJSON` structure error.
    #[error("GeoJSON error: {0}")]
    GeoJson(#[from] geojson::Error),

    /// A feature lacked a required identity property.
    #[error("Feature {index} is missing property '{property}'")]
    MissingProperty {
        /// Feature position in the collection.
        index: usize,
        /// Property name that was expected.
        property: String,
    },
}

/// A unit's identity plus its (possibly missing) polygon, as yielded by a
/// boundary source.
#[derive(Debug, Clone)]
pub struct BoundaryFeature {
    /// State name.
    pub adm1_name: String,
    /// Municipality name.
    pub adm2_name: String,
    /// Unique municipality code.
    pub adm2_code: String,
    /// Unit polygon. `None` when the source had no usable geometry.
    pub geometry: Option<MultiPolygon<f64>>,
}

impl BoundaryFeature {
    /// Returns the validated polygon, or the reason it can't be used.
    ///
    /// # Errors
    ///
    /// Returns [`GeometryError`] if the polygon is missing, empty, or
    /// invalid.
    pub fn validated(&self) -> Result<&MultiPolygon<f64>, GeometryError> {
        let Some(polygon) = &self.geometry else {
            return Err(GeometryError::Missing {
                adm2_code: self.adm2_code.clone(),
            });
        };

        let degenerate =
            polygon.0.is_empty() || polygon.0.iter().any(|p| p.exterior().0.len() < 4);
        if degenerate {
            return Err(GeometryError::Empty {
                adm2_code: self.adm2_code.clone(),
            });
        }

        polygon
            .check_validation()
            .map_err(|e| GeometryError::Invalid {
                adm2_code: self.adm2_code.clone(),
                reason: e.to_string(),
            })?;

        Ok(polygon)
    }

    /// Centroid of the unit polygon, if it has one.
    #[must_use]
    pub fn centroid(&self) -> Option<LonLat> {
        self.geometry
            .as_ref()
            .and_then(Centroid::centroid)
            .map(|p| LonLat {
                lon: p.x(),
                lat: p.y(),
            })
    }
}

/// Property names used to read unit identity from a `GeoJSON` collection.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct BoundaryFields {
    /// Property holding the state name.
    pub adm1_name: String,
    /// Property holding the municipality name.
    pub adm2_name: String,
    /// Property holding the municipality code.
    pub adm2_code: String,
}

impl Default for BoundaryFields {
    fn default() -> Self {
        Self {
            adm1_name: "ADM1_ES".to_string(),
            adm2_name: "ADM2_ES".to_string(),
            adm2_code: "ADM2_PCODE".to_string(),
        }
    }
}

/// Parses a `GeoJSON` `FeatureCollection` into boundary features.
///
/// Features whose geometry is absent or not a (multi)polygon are kept
/// with `geometry: None` so they surface as geometry errors downstream
/// instead of silently disappearing.
///
/// # Errors
///
/// Returns [`SpatialError`] if the document isn't a feature collection
/// or a feature lacks an identity property.
pub fn parse_feature_collection(
    geojson_str: &str,
    fields: &BoundaryFields,
) -> Result<Vec<BoundaryFeature>, SpatialError> {
    let geojson: GeoJson = geojson_str.parse()?;
    let collection = geojson::FeatureCollection::try_from(geojson)?;

    let mut features = Vec::with_capacity(collection.features.len());
    for (index, feature) in collection.features.into_iter().enumerate() {
        let property = |name: &str| -> Result<String, SpatialError> {
            feature
                .property(name)
                .and_then(|v| match v {
                    serde_json::Value::String(s) => Some(s.trim().to_string()),
                    serde_json::Value::Number(n) => Some(n.to_string()),
                    _ => None,
                })
                .filter(|s| !s.is_empty())
                .ok_or_else(|| SpatialError::MissingProperty {
                    index,
                    property: name.to_string(),
                })
        };

        let adm1_name = property(&fields.adm1_name)?;
        let adm2_name = property(&fields.adm2_name)?;
        let adm2_code = property(&fields.adm2_code)?;

        let geometry = feature.geometry.as_ref().and_then(|geom| {
            let parsed = geometry_to_multipolygon(geom);
            if parsed.is_none() {
                log::warn!("Unusable geometry for boundary {adm2_code}");
            }
            parsed
        });

        features.push(BoundaryFeature {
            adm1_name,
            adm2_name,
            adm2_code,
            geometry,
        });
    }

    Ok(features)
}

/// Converts a `GeoJSON` geometry into a [`MultiPolygon`].
/// Handles both `Polygon` and `MultiPolygon` geometry types.
fn geometry_to_multipolygon(geom: &geojson::Geometry) -> Option<MultiPolygon<f64>> {
    let geo_geom: geo::Geometry<f64> = geom.clone().try_into().ok()?;
    match geo_geom {
        geo::Geometry::MultiPolygon(mp) => Some(mp),
        geo::Geometry::Polygon(p) => Some(MultiPolygon(vec![p])),
        _ => None,
    }
}

/// Compute the bounding box envelope for a [`MultiPolygon`].
pub(crate) fn compute_envelope(mp: &MultiPolygon<f64>) -> AABB<[f64; 2]> {
    mp.bounding_rect().map_or_else(
        || AABB::from_point([0.0, 0.0]),
        |rect| AABB::from_corners([rect.min().x, rect.min().y], [rect.max().x, rect.max().y]),
    )
}

/// SHA-256 hex digest identifying a boundary-source version.
#[must_use]
pub fn fingerprint(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Fixture geometry for tests in this and dependent crates.
#[cfg(any(test, feature = "test-support"))]
pub mod test_support {
    use geo::{MultiPolygon, polygon};

    use crate::BoundaryFeature;

    /// Axis-aligned square feature spanning `[x0, x0+size] x [y0, y0+size]`.
    #[must_use]
    pub fn square(code: &str, x0: f64, y0: f64, size: f64) -> BoundaryFeature {
        let poly = polygon![
            (x: x0, y: y0),
            (x: x0 + size, y: y0),
            (x: x0 + size, y: y0 + size),
            (x: x0, y: y0 + size),
            (x: x0, y: y0),
        ];
        BoundaryFeature {
            adm1_name: "Estado".to_string(),
            adm2_name: format!("Municipio {code}"),
            adm2_code: code.to_string(),
            geometry: Some(MultiPolygon(vec![poly])),
        }
    }
}

#[cfg(test)]
mod tests {
    use geo::{MultiPolygon, polygon};

    use super::*;
    use crate::test_support::square;

    #[test]
    fn valid_square_passes_validation() {
        assert!(square("MX01001", 0.0, 0.0, 1.0).validated().is_ok());
    }

    #[test]
    fn missing_geometry_is_reported() {
        let mut feature = square("MX01001", 0.0, 0.0, 1.0);
        feature.geometry = None;
        assert_eq!(
            feature.validated().unwrap_err(),
            GeometryError::Missing {
                adm2_code: "MX01001".to_string()
            }
        );
    }

    #[test]
    fn bowtie_is_invalid() {
        let bowtie = polygon![
            (x: 0.0, y: 0.0),
            (x: 1.0, y: 1.0),
            (x: 1.0, y: 0.0),
            (x: 0.0, y: 1.0),
            (x: 0.0, y: 0.0),
        ];
        let feature = BoundaryFeature {
            adm1_name: "Estado".to_string(),
            adm2_name: "Bowtie".to_string(),
            adm2_code: "MX01002".to_string(),
            geometry: Some(MultiPolygon(vec![bowtie])),
        };
        let err = feature.validated().unwrap_err();
        assert!(matches!(err, GeometryError::Invalid { .. }), "{err:?}");
        assert_eq!(err.adm2_code(), "MX01002");
    }

    #[test]
    fn empty_multipolygon_is_reported() {
        let feature = BoundaryFeature {
            adm1_name: "Estado".to_string(),
            adm2_name: "Vacio".to_string(),
            adm2_code: "MX01003".to_string(),
            geometry: Some(MultiPolygon(vec![])),
        };
        assert!(matches!(
            feature.validated().unwrap_err(),
            GeometryError::Empty { .. }
        ));
    }

    #[test]
    fn centroid_of_square() {
        let c = square("MX01001", 0.0, 0.0, 2.0).centroid().unwrap();
        assert!((c.lon - 1.0).abs() < 1e-12);
        assert!((c.lat - 1.0).abs() < 1e-12);
    }

    #[test]
    fn parses_feature_collection() {
        let doc = r#"{
            "type": "FeatureCollection",
            "features": [
                {
                    "type": "Feature",
                    "properties": {"ADM1_ES": "Aguascalientes", "ADM2_ES": "Asientos", "ADM2_PCODE": "MX01002"},
                    "geometry": {"type": "Polygon", "coordinates": [[[0,0],[1,0],[1,1],[0,1],[0,0]]]}
                },
                {
                    "type": "Feature",
                    "properties": {"ADM1_ES": "Aguascalientes", "ADM2_ES": "Calvillo", "ADM2_PCODE": "MX01003"},
                    "geometry": null
                }
            ]
        }"#;
        let features = parse_feature_collection(doc, &BoundaryFields::default()).unwrap();
        assert_eq!(features.len(), 2);
        assert_eq!(features[0].adm2_code, "MX01002");
        assert!(features[0].geometry.is_some());
        assert!(features[1].geometry.is_none());
    }

    #[test]
    fn missing_identity_property_is_an_error() {
        let doc = r#"{
            "type": "FeatureCollection",
            "features": [
                {
                    "type": "Feature",
                    "properties": {"ADM1_ES": "Aguascalientes", "ADM2_ES": "Asientos"},
                    "geometry": null
                }
            ]
        }"#;
        let err = parse_feature_collection(doc, &BoundaryFields::default()).unwrap_err();
        assert!(matches!(err, SpatialError::MissingProperty { .. }));
    }

    #[test]
    fn fingerprint_is_stable_hex() {
        let a = fingerprint(b"boundaries-v1");
        assert_eq!(a.len(), 64);
        assert_eq!(a, fingerprint(b"boundaries-v1"));
        assert_ne!(a, fingerprint(b"boundaries-v2"));
    }
}
