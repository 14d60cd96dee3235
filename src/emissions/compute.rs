use std::collections::HashMap;
use tracing::debug;

use crate::emissions::{EmissionFunctionTable, EmissionRecord, FuelType, Pollutant};
use crate::network::MatchedPoint;

/// Evaluates the four pollutants at every matched fix.
///
/// Fixes of vehicles missing from `fuel_types` produce no record.
#[tracing::instrument(skip_all, fields(rows = points.len()))]
pub fn compute_emissions(
    points: &[MatchedPoint],
    table: &EmissionFunctionTable,
    fuel_types: &HashMap<String, FuelType>,
) -> Vec<EmissionRecord> {
    let records: Vec<EmissionRecord> = points
        .iter()
        .filter_map(|m| {
            let fuel = *fuel_types.get(&m.point.uid)?;
            let (v, a) = (m.point.speed, m.point.acceleration);
            Some(EmissionRecord {
                week: m.point.week,
                week_start: m.point.week_start.clone(),
                uid: m.point.uid.clone(),
                road_link: m.road_link.to_string(),
                co2: table.evaluate(fuel, Pollutant::Co2, v, a),
                nox: table.evaluate(fuel, Pollutant::Nox, v, a),
                pm: table.evaluate(fuel, Pollutant::Pm, v, a),
                voc: table.evaluate(fuel, Pollutant::Voc, v, a),
            })
        })
        .collect();

    debug!(
        records = records.len(),
        skipped = points.len() - records.len(),
        "Per-point emissions computed"
    );
    records
}
