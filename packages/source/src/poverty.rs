//! Municipal poverty table.
//!
//! Accepts either a table already keyed by `adm2_code` or the national
//! statistics export keyed by a five-digit municipality code (two digits
//! of state, three of municipality), from which the unit code is built as
//! `{prefix}{state}{municipality}`.

use std::path::PathBuf;

use crate::parsing::{Table, parse_percent};
use crate::{PovertyRegistry, SourceError, UnitValues};

/// Columns that may carry the poverty percentage, in preference order.
const RATE_COLUMNS: &[&str] = &["poverty_rate", "pobreza_pct_2020", "pobreza_pct"];

/// Reads poverty percentages from CSV.
#[derive(Debug, Clone)]
pub struct PovertyCsv {
    path: PathBuf,
    code_prefix: String,
}

impl PovertyCsv {
    /// A registry backed by `path`; `code_prefix` is prepended when unit
    /// codes are built from municipality keys.
    #[must_use]
    pub fn new(path: PathBuf, code_prefix: impl Into<String>) -> Self {
        Self {
            path,
            code_prefix: code_prefix.into(),
        }
    }
}

/// Builds a unit code from a municipality key, zero-padding it to five
/// digits. Returns `None` unless the key is all digits and at most five
/// long.
#[must_use]
pub fn unit_code_from_municipality(prefix: &str, key: &str) -> Option<String> {
    let key = key.trim();
    // Spreadsheet exports sometimes render integer keys as "1001.0".
    let key = key.strip_suffix(".0").unwrap_or(key);
    if key.is_empty() || key.len() > 5 || !key.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    Some(format!("{prefix}{key:0>5}"))
}

impl PovertyRegistry for PovertyCsv {
    fn poverty_rates(&self) -> Result<UnitValues<f64>, SourceError> {
        let mut table = Table::open(&self.path)?;
        let code_col = table.find(&["adm2_code"]);
        let mun_col = table.find(&["clave_mun_5d", "clave_mun"]);
        let rate_col = table.require(RATE_COLUMNS)?;
        let label = table.label().to_string();

        let key_col = match (code_col, mun_col) {
            (Some(col), _) | (None, Some(col)) => col,
            (None, None) => {
                return Err(SourceError::Format {
                    message: format!("{label} has no adm2_code or clave_mun_5d column"),
                });
            }
        };
        let from_municipality = code_col.is_none();

        let mut values = UnitValues::new();
        let mut not_available = 0usize;
        let mut bad_keys = 0usize;
        for row in table.rows() {
            let row = row?;
            let raw_key = row.get(key_col).unwrap_or("");
            let code = if from_municipality {
                unit_code_from_municipality(&self.code_prefix, raw_key)
            } else {
                Some(raw_key.to_string()).filter(|c| !c.is_empty())
            };
            let Some(code) = code else {
                bad_keys += 1;
                continue;
            };
            match row.get(rate_col).and_then(parse_percent) {
                Some(rate) => {
                    values.insert(code, rate);
                }
                None => not_available += 1,
            }
        }

        if bad_keys > 0 {
            log::debug!("{label}: skipped {bad_keys} rows without a municipality key");
        }
        if not_available > 0 {
            log::warn!("{label}: {not_available} units report poverty as not available");
        }
        log::info!("Loaded poverty rates for {} units", values.len());
        Ok(values)
    }
}
