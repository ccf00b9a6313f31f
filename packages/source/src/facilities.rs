//! Health facility counts per unit.
//!
//! Two forms are supported: a pre-aggregated table of counts per unit,
//! and the raw facility register, which is filtered with the profile's
//! [`FacilityFilter`] and attributed to units by point in polygon.

use std::path::PathBuf;
use std::sync::Arc;

use adm2_risk_spatial::index::UnitIndex;

use crate::parsing::{Table, parse_count, parse_lat_lng_str};
use crate::profile::FacilityFilter;
use crate::{FacilityRegistry, SourceError, UnitValues};

/// Pre-aggregated counts: a CSV with `adm2_code` and `facilities`.
#[derive(Debug, Clone)]
pub struct FacilityCountsCsv {
    path: PathBuf,
}

impl FacilityCountsCsv {
    /// A registry backed by `path`.
    #[must_use]
    pub const fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

impl FacilityRegistry for FacilityCountsCsv {
    fn facility_counts(&self) -> Result<UnitValues<u64>, SourceError> {
        let mut table = Table::open(&self.path)?;
        let code_col = table.require(&["adm2_code"])?;
        let count_col = table.require(&["facilities", "facility_count"])?;

        let mut values = UnitValues::new();
        for row in table.rows() {
            let row = row?;
            let Some(code) = row.get(code_col).filter(|c| !c.is_empty()) else {
                continue;
            };
            // Points outside every polygon aggregate under a blank or
            // "nan" code upstream.
            if code.eq_ignore_ascii_case("nan") {
                continue;
            }
            let count = row.get(count_col).and_then(parse_count).unwrap_or(0);
            *values.entry(code.to_string()).or_default() += count;
        }
        log::info!("Loaded facility counts for {} units", values.len());
        Ok(values)
    }
}

/// The raw facility register, one row per establishment.
pub struct FacilityRegisterCsv {
    path: PathBuf,
    filter: FacilityFilter,
    index: Arc<UnitIndex>,
}

impl FacilityRegisterCsv {
    /// A registry reading the register at `path`, counting rows accepted
    /// by `filter` and attributing them with `index`.
    #[must_use]
    pub const fn new(path: PathBuf, filter: FacilityFilter, index: Arc<UnitIndex>) -> Self {
        Self {
            path,
            filter,
            index,
        }
    }
}

impl FacilityRegistry for FacilityRegisterCsv {
    fn facility_counts(&self) -> Result<UnitValues<u64>, SourceError> {
        let mut table = Table::open(&self.path)?;
        let inst_col = table.require(&[self.filter.institution_column.as_str()])?;
        let status_col = table.require(&[self.filter.status_column.as_str()])?;
        let level_col = table.require(&[self.filter.level_column.as_str()])?;
        let lat_col = table.require(&[self.filter.latitude_column.as_str()])?;
        let lon_col = table.require(&[self.filter.longitude_column.as_str()])?;
        let label = table.label().to_string();

        let mut values = UnitValues::new();
        let mut accepted = 0u64;
        let mut unattributed = 0u64;
        let mut no_coordinates = 0u64;
        for row in table.rows() {
            let row = row?;
            let field = |i: usize| row.get(i).unwrap_or("");
            if !self
                .filter
                .accepts(field(inst_col), field(status_col), field(level_col))
            {
                continue;
            }
            let Some((lat, lon)) = parse_lat_lng_str(row.get(lat_col), row.get(lon_col)) else {
                no_coordinates += 1;
                continue;
            };
            accepted += 1;
            match self.index.lookup(lon, lat) {
                Some(code) => *values.entry(code.to_string()).or_default() += 1,
                None => unattributed += 1,
            }
        }

        log::info!(
            "{label}: {accepted} facilities counted in {} units \
             ({unattributed} outside every unit, {no_coordinates} without coordinates)",
            values.len()
        );
        Ok(values)
    }
}
