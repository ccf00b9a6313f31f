//! Country profile registry, loaded from embedded TOML configs.
//!
//! Each `.toml` file in `packages/source/profiles/` is baked into the
//! binary at compile time via [`include_str!`]. Supporting a new country
//! means adding a TOML file and listing it below.

use crate::SourceError;
use crate::profile::{CountryProfile, parse_profile_toml};

/// TOML configs embedded at compile time.
const PROFILE_TOMLS: &[(&str, &str)] = &[("mexico", include_str!("../profiles/mexico.toml"))];

/// Returns all configured profiles, parsed from embedded TOML.
///
/// # Panics
///
/// Panics if any TOML config is malformed (the configs are embedded, so
/// this is caught by the registry tests).
#[must_use]
pub fn all_profiles() -> Vec<CountryProfile> {
    PROFILE_TOMLS
        .iter()
        .map(|(name, toml)| {
            parse_profile_toml(toml).unwrap_or_else(|e| panic!("Failed to parse {name}.toml: {e}"))
        })
        .collect()
}

/// Looks up a profile by id.
///
/// # Errors
///
/// Returns [`SourceError::UnknownProfile`] if no profile has that id.
pub fn profile(id: &str) -> Result<CountryProfile, SourceError> {
    all_profiles()
        .into_iter()
        .find(|p| p.id == id)
        .ok_or_else(|| SourceError::UnknownProfile {
            id: id.to_string(),
            available: profile_ids().join(", "),
        })
}

/// Ids of all embedded profiles.
#[must_use]
pub fn profile_ids() -> Vec<&'static str> {
    PROFILE_TOMLS.iter().map(|(id, _)| *id).collect()
}
