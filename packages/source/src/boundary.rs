//! `GeoJSON` boundary file source.

use std::path::PathBuf;

use adm2_risk_spatial::{BoundaryFields, fingerprint, parse_feature_collection};

use crate::{BoundarySet, BoundarySource, SourceError};

/// Reads unit boundaries from a `GeoJSON` `FeatureCollection` file.
#[derive(Debug, Clone)]
pub struct GeoJsonBoundaries {
    path: PathBuf,
    fields: BoundaryFields,
}

impl GeoJsonBoundaries {
    /// A source reading `path` with the given identity properties.
    #[must_use]
    pub const fn new(path: PathBuf, fields: BoundaryFields) -> Self {
        Self { path, fields }
    }
}

impl BoundarySource for GeoJsonBoundaries {
    fn id(&self) -> &str {
        "geojson"
    }

    fn load(&self) -> Result<BoundarySet, SourceError> {
        let raw = std::fs::read(&self.path)?;
        let text = String::from_utf8_lossy(&raw);
        let mut features = parse_feature_collection(&text, &self.fields)?;

        // A dissolved source can still list a unit more than once; keep the
        // first so unit codes stay unique.
        let before = features.len();
        let mut seen = std::collections::BTreeSet::new();
        features.retain(|f| seen.insert(f.adm2_code.clone()));
        if features.len() < before {
            log::warn!(
                "{}: dropped {} duplicate unit codes",
                self.path.display(),
                before - features.len()
            );
        }

        if features.is_empty() {
            return Err(SourceError::Format {
                message: format!("{} contains no boundary features", self.path.display()),
            });
        }

        log::info!("Loaded {} boundaries from {}", features.len(), self.path.display());
        Ok(BoundarySet {
            features,
            fingerprint: fingerprint(&raw),
        })
    }
}
