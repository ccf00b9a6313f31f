//! The run's unit universe.

use adm2_risk_models::AdministrativeUnit;
use adm2_risk_source::UnitValues;
use adm2_risk_spatial::BoundaryFeature;

/// Builds one unit per boundary feature, ordered by `adm2_code`.
///
/// Population rows for codes outside the boundaries are ignored (and
/// counted in the log); units without a population row keep `None`.
#[must_use]
pub fn build_units(
    features: &[BoundaryFeature],
    population: &UnitValues<u64>,
) -> Vec<AdministrativeUnit> {
    let mut units: Vec<AdministrativeUnit> = features
        .iter()
        .map(|f| AdministrativeUnit {
            adm1_name: f.adm1_name.clone(),
            adm2_name: f.adm2_name.clone(),
            adm2_code: f.adm2_code.clone(),
            centroid: f.centroid(),
            pop_total: population.get(&f.adm2_code).copied(),
        })
        .collect();
    units.sort_by(|a, b| a.adm2_code.cmp(&b.adm2_code));

    let without_pop = units.iter().filter(|u| u.pop_total.is_none()).count();
    if without_pop > 0 {
        log::warn!("{without_pop} units have no population row");
    }
    let orphans = population
        .keys()
        .filter(|code| {
            units
                .binary_search_by(|u| u.adm2_code.as_str().cmp(code.as_str()))
                .is_err()
        })
        .count();
    if orphans > 0 {
        log::warn!("{orphans} population rows match no boundary unit");
    }
    units
}
