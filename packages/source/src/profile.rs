//! Config-driven country profile.
//!
//! [`CountryProfile`] captures everything country-specific the collectors
//! need: how to query the event API, which boundary properties carry unit
//! identity, how state names are aliased, and which facilities count.

use std::collections::BTreeMap;

use adm2_risk_spatial::BoundaryFields;
use serde::Deserialize;

use crate::admin::Adm1Canonicalizer;

/// A complete country profile, loaded from embedded TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct CountryProfile {
    /// Unique identifier (e.g., `"mexico"`).
    pub id: String,
    /// Country name as the event API spells it.
    pub country: String,
    /// ISO 3166-1 numeric code.
    pub iso: u16,
    /// Prefix of unit codes (e.g., `"MX"` in `MX01001`).
    pub code_prefix: String,
    /// Boundary property names.
    #[serde(default)]
    pub boundary_fields: BoundaryFields,
    /// State name aliases, applied after accent folding and title casing.
    #[serde(default)]
    pub adm1_aliases: BTreeMap<String, String>,
    /// Facility register filter.
    pub facilities: FacilityFilter,
}

impl CountryProfile {
    /// State-name canonicalizer for this country.
    #[must_use]
    pub fn canonicalizer(&self) -> Adm1Canonicalizer {
        Adm1Canonicalizer::new(&self.adm1_aliases)
    }
}

/// Which facility-register rows count toward access.
#[derive(Debug, Clone, Deserialize)]
pub struct FacilityFilter {
    /// Column with the institution code.
    pub institution_column: String,
    /// Column with the operating status code.
    pub status_column: String,
    /// Column with the level-of-care code.
    pub level_column: String,
    /// Latitude column.
    pub latitude_column: String,
    /// Longitude column.
    pub longitude_column: String,
    /// Institutions counted (public networks).
    pub institutions: Vec<String>,
    /// Status code meaning "operating".
    pub active_status: String,
    /// Level codes excluded (mobile units).
    #[serde(default)]
    pub excluded_levels: Vec<String>,
}

impl FacilityFilter {
    /// Whether a row with these codes counts. Comparison is
    /// case-insensitive and ignores surrounding whitespace.
    #[must_use]
    pub fn accepts(&self, institution: &str, status: &str, level: &str) -> bool {
        let institution = institution.trim();
        let level = level.trim();
        self.institutions
            .iter()
            .any(|i| i.eq_ignore_ascii_case(institution))
            && status.trim().eq_ignore_ascii_case(&self.active_status)
            && !self
                .excluded_levels
                .iter()
                .any(|l| l.eq_ignore_ascii_case(level))
    }
}

/// Parses a profile from TOML.
///
/// # Errors
///
/// Returns a [`toml::de::Error`] if the TOML is malformed.
pub fn parse_profile_toml(toml_str: &str) -> Result<CountryProfile, toml::de::Error> {
    toml::from_str(toml_str)
}
