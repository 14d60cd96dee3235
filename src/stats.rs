use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashSet;

use crate::emissions::EmissionRecord;
use crate::trajectory::TrajectoryPoint;

/// Counters for one `(week, city)` iteration, appended to the run summary.
#[derive(Debug, Default, Serialize)]
pub struct RunStats {
    pub timestamp: DateTime<Utc>,
    pub week: u32,
    pub city: String,

    // loading
    pub rows_loaded: usize,
    pub uids_loaded: usize,

    // spatial filter
    pub tessellation_cells: usize,
    pub rows_in_tessellation: usize,

    // temporal/kinematic filter
    pub trajectories: usize,
    pub rows_after_filter: usize,
    pub uids_after_filter: usize,
    pub mean_speed: f64,
    pub speed_stddev: f64,

    // matching and emissions
    pub matched_rows: usize,
    pub vehicles_with_fuel_type: usize,
    pub emission_rows: usize,

    // output
    pub output_rows: usize,
    pub output_uids: usize,
    pub unique_road_links: usize,

    // error tracking
    pub error_type: Option<String>,
    pub error_message: Option<String>,
}

impl RunStats {
    pub fn new(week: u32, city: &str) -> Self {
        RunStats {
            timestamp: Utc::now(),
            week,
            city: city.to_string(),
            ..Default::default()
        }
    }

    /// Create an error record with timestamp and error information
    pub fn from_error(error_type: &str, error_message: &str) -> Self {
        RunStats {
            timestamp: Utc::now(),
            error_type: Some(error_type.to_string()),
            error_message: Some(error_message.to_string()),
            ..Default::default()
        }
    }

    /// Set iteration metadata (week and city)
    pub fn with_run_info(mut self, week: u32, city: &str) -> Self {
        self.week = week;
        self.city = city.to_string();
        self
    }

    pub fn record_filtered(&mut self, points: &[TrajectoryPoint]) {
        let (mean_speed, speed_stddev) = mean_and_stddev(points.iter().map(|p| p.speed));

        self.rows_after_filter = points.len();
        self.uids_after_filter = unique_uids(points.iter().map(|p| p.uid.as_str()));
        self.trajectories = points
            .iter()
            .map(|p| (p.uid.as_str(), p.tid))
            .collect::<HashSet<_>>()
            .len();
        self.mean_speed = mean_speed;
        self.speed_stddev = speed_stddev;
    }

    pub fn record_output(&mut self, totals: &[EmissionRecord]) {
        self.output_rows = totals.len();
        self.output_uids = unique_uids(totals.iter().map(|t| t.uid.as_str()));
        self.unique_road_links = totals
            .iter()
            .map(|t| t.road_link.as_str())
            .collect::<HashSet<_>>()
            .len();
    }
}

/// Single-pass (Welford) mean and population standard deviation; zeros for
/// empty input.
fn mean_and_stddev(values: impl Iterator<Item = f64>) -> (f64, f64) {
    let (mut n, mut mean, mut m2) = (0usize, 0.0, 0.0);
    for x in values {
        n += 1;
        let delta = x - mean;
        mean += delta / n as f64;
        m2 += delta * (x - mean);
    }
    if n == 0 {
        (0.0, 0.0)
    } else {
        (mean, (m2 / n as f64).sqrt())
    }
}

pub fn unique_uids<'a>(uids: impl IntoIterator<Item = &'a str>) -> usize {
    uids.into_iter().collect::<HashSet<_>>().len()
}
