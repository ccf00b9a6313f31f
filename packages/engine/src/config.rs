//! Run configuration.
//!
//! A run is configured by an optional TOML file (every field has a
//! default) followed by environment overrides:
//!
//! | Variable        | Field           | Default |
//! |-----------------|-----------------|---------|
//! | `RISK_DATA_DIR` | `data_dir`      | `data`  |
//! | `ACLED_REFRESH` | `acled_refresh` | `true`  |
//! | `CAST_REFRESH`  | `cast_refresh`  | `true`  |
//! | `SSL_VERIFY`    | `ssl_verify`    | `true`  |
//!
//! Boolean variables are true only when set to `true` (any case).

use std::path::{Path, PathBuf};

use adm2_risk_cache::RefreshPolicy;
use adm2_risk_source_models::AcledConfig;
use serde::{Deserialize, Serialize};

use crate::EngineError;

/// Everything a scoring run needs to locate its inputs and talk to
/// upstream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Country profile id.
    pub profile: String,
    /// Directory relative input paths are resolved against.
    pub data_dir: PathBuf,
    /// Directory for published tables.
    pub output_dir: PathBuf,
    /// Directory for cached upstream snapshots and the neighbor graph.
    pub cache_dir: PathBuf,
    /// Static input files.
    pub inputs: InputPaths,
    /// ACLED endpoints and paging.
    pub acled: AcledConfig,
    /// Fetch new events when upstream has advanced. When false, cached
    /// events are used whenever they exist.
    pub acled_refresh: bool,
    /// Always re-fetch forecasts. When false, cached forecasts are reused
    /// until the month changes.
    pub cast_refresh: bool,
    /// Verify TLS certificates of upstream endpoints.
    pub ssl_verify: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            profile: "mexico".to_string(),
            data_dir: PathBuf::from("data"),
            output_dir: PathBuf::from("out"),
            cache_dir: PathBuf::from("cache"),
            inputs: InputPaths::default(),
            acled: AcledConfig::default(),
            acled_refresh: true,
            cast_refresh: true,
            ssl_verify: true,
        }
    }
}

/// Static input files. Relative paths are resolved against
/// [`RunConfig::data_dir`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InputPaths {
    /// `GeoJSON` ADM2 boundaries.
    pub boundaries: PathBuf,
    /// Population table (`adm2_code`, `pop_total`).
    pub population: PathBuf,
    /// Facility counts (`adm2_code`, `facilities`).
    pub facilities: PathBuf,
    /// Raw facility register. When set, counts are built from it instead
    /// of read from [`Self::facilities`].
    pub facility_register: Option<PathBuf>,
    /// Poverty table.
    pub poverty: PathBuf,
}

impl Default for InputPaths {
    fn default() -> Self {
        Self {
            boundaries: PathBuf::from("mex_adm2.geojson"),
            population: PathBuf::from("pop_adm2.csv"),
            facilities: PathBuf::from("clues_facility_counts_adm2.csv"),
            facility_register: None,
            poverty: PathBuf::from("coneval_muni.csv"),
        }
    }
}

impl RunConfig {
    /// Loads the configuration from `path` (or defaults when `None`) and
    /// applies environment overrides.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] if the file can't be read or parsed.
    pub fn load(path: Option<&Path>) -> Result<Self, EngineError> {
        let mut config = match path {
            Some(path) => {
                log::info!("Loading run configuration from {}", path.display());
                toml::from_str(&std::fs::read_to_string(path)?)?
            }
            None => Self::default(),
        };
        config.apply_env(|name| std::env::var(name).ok());
        Ok(config)
    }

    /// Applies overrides from an environment lookup.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dir) = lookup("RISK_DATA_DIR").filter(|d| !d.trim().is_empty()) {
            self.data_dir = PathBuf::from(dir.trim());
        }
        let flag = |name: &str, current: bool| {
            lookup(name).map_or(current, |v| v.trim().eq_ignore_ascii_case("true"))
        };
        self.acled_refresh = flag("ACLED_REFRESH", self.acled_refresh);
        self.cast_refresh = flag("CAST_REFRESH", self.cast_refresh);
        self.ssl_verify = flag("SSL_VERIFY", self.ssl_verify);
    }

    /// Resolves an input path against the data directory.
    #[must_use]
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.data_dir.join(path)
        }
    }

    /// Refresh policy for the event stream.
    #[must_use]
    pub const fn events_policy(&self, force: bool) -> RefreshPolicy {
        if force {
            RefreshPolicy::Force
        } else if self.acled_refresh {
            RefreshPolicy::IfNewer
        } else {
            RefreshPolicy::CacheOnly
        }
    }

    /// Refresh policy for the forecast stream.
    #[must_use]
    pub const fn forecast_policy(&self, force: bool) -> RefreshPolicy {
        if force || self.cast_refresh {
            RefreshPolicy::Force
        } else {
            RefreshPolicy::IfNewer
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn empty_toml_is_default() {
        let config: RunConfig = toml::from_str("").unwrap();
        assert_eq!(config, RunConfig::default());
        assert!(config.acled_refresh && config.cast_refresh && config.ssl_verify);
    }

    #[test]
    fn partial_toml_keeps_other_defaults() {
        let config: RunConfig = toml::from_str(
            r#"
            data_dir = "/srv/risk"
            acled_refresh = false

            [inputs]
            facility_register = "clues.csv"

            [acled]
            page_limit = 1000
            "#,
        )
        .unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/srv/risk"));
        assert!(!config.acled_refresh);
        assert_eq!(config.inputs.poverty, PathBuf::from("coneval_muni.csv"));
        assert_eq!(config.acled.page_limit, 1000);
        assert_eq!(config.acled.max_pages, 200);
        assert_eq!(
            config.resolve(config.inputs.facility_register.as_deref().unwrap()),
            PathBuf::from("/srv/risk/clues.csv")
        );
    }

    #[test]
    fn env_overrides() {
        let mut config = RunConfig::default();
        config.apply_env(env(&[
            ("RISK_DATA_DIR", "/tmp/data"),
            ("ACLED_REFRESH", "FALSE"),
            ("CAST_REFRESH", "no"),
            ("SSL_VERIFY", "True"),
        ]));
        assert_eq!(config.data_dir, PathBuf::from("/tmp/data"));
        assert!(!config.acled_refresh);
        assert!(!config.cast_refresh, "anything but 'true' is false");
        assert!(config.ssl_verify);
    }

    #[test]
    fn unset_env_keeps_config() {
        let mut config = RunConfig {
            acled_refresh: false,
            ..RunConfig::default()
        };
        config.apply_env(env(&[]));
        assert!(!config.acled_refresh);
        assert_eq!(config.data_dir, PathBuf::from("data"));
    }

    #[test]
    fn policies() {
        let mut config = RunConfig::default();
        assert_eq!(config.events_policy(false), RefreshPolicy::IfNewer);
        assert_eq!(config.forecast_policy(false), RefreshPolicy::Force);

        config.acled_refresh = false;
        config.cast_refresh = false;
        assert_eq!(config.events_policy(false), RefreshPolicy::CacheOnly);
        assert_eq!(config.forecast_policy(false), RefreshPolicy::IfNewer);
        assert_eq!(config.events_policy(true), RefreshPolicy::Force);
        assert_eq!(config.forecast_policy(true), RefreshPolicy::Force);
    }
}
