//! Per-unit population table.

use std::path::PathBuf;

use crate::parsing::{Table, parse_count};
use crate::{PopulationRegistry, SourceError, UnitValues};

/// Reads total population from a CSV with `adm2_code` and `pop_total`
/// columns, as produced by zonal statistics over a population raster.
#[derive(Debug, Clone)]
pub struct PopulationCsv {
    path: PathBuf,
}

impl PopulationCsv {
    /// A registry backed by `path`.
    #[must_use]
    pub const fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

impl PopulationRegistry for PopulationCsv {
    fn population(&self) -> Result<UnitValues<u64>, SourceError> {
        let mut table = Table::open(&self.path)?;
        let code_col = table.require(&["adm2_code"])?;
        let pop_col = table.require(&["pop_total", "population"])?;
        let label = table.label().to_string();

        let mut values = UnitValues::new();
        let mut unreadable = 0usize;
        for row in table.rows() {
            let row = row?;
            let Some(code) = row.get(code_col).filter(|c| !c.is_empty()) else {
                continue;
            };
            let Some(pop) = row.get(pop_col).and_then(parse_count) else {
                unreadable += 1;
                continue;
            };
            if values.insert(code.to_string(), pop).is_some() {
                log::warn!("{label}: duplicate population row for {code}; keeping the last");
            }
        }

        if unreadable > 0 {
            log::warn!("{label}: {unreadable} rows with unreadable population treated as missing");
        }
        log::info!("Loaded population for {} units", values.len());
        Ok(values)
    }
}
