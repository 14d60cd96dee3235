//! Records produced by the emission stage.

use serde::{Deserialize, Serialize};

/// Pollutant quantities attributed to a vehicle on a road link in a week.
///
/// Used both for per-fix estimates and for the aggregated weekly totals
/// written to disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmissionRecord {
    pub week: u32,
    pub week_start: String,
    pub uid: String,
    pub road_link: String,
    #[serde(rename = "CO_2")]
    pub co2: f64,
    #[serde(rename = "NO_x")]
    pub nox: f64,
    #[serde(rename = "PM")]
    pub pm: f64,
    #[serde(rename = "VOC")]
    pub voc: f64,
}

/// Grouping key of the weekly totals.
pub type EmissionKey = (u32, String, String, String);

impl EmissionRecord {
    pub fn key(&self) -> EmissionKey {
        (
            self.week,
            self.week_start.clone(),
            self.uid.clone(),
            self.road_link.clone(),
        )
    }

    pub(crate) fn add(&mut self, other: &EmissionRecord) {
        self.co2 += other.co2;
        self.nox += other.nox;
        self.pm += other.pm;
        self.voc += other.voc;
    }
}
