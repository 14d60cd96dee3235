use std::collections::BTreeMap;

use crate::emissions::EmissionRecord;

/// Sums pollutants per `(week, week_start, uid, road_link)`.
///
/// Keys in the result are unique and sorted. Aggregating an already
/// aggregated table returns it unchanged.
pub fn aggregate_emissions(
    records: impl IntoIterator<Item = EmissionRecord>,
) -> Vec<EmissionRecord> {
    let mut totals: BTreeMap<_, EmissionRecord> = BTreeMap::new();

    for record in records {
        totals
            .entry(record.key())
            .and_modify(|total: &mut EmissionRecord| total.add(&record))
            .or_insert(record);
    }

    totals.into_values().collect()
}
