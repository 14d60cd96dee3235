use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Datelike, Duration, NaiveDateTime};
use serde::Deserialize;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use tracing::debug;

/// A single GPS fix, enriched as it moves through the pipeline.
///
/// `tid`, `speed`, `acceleration` are filled in by the filtering stage and
/// `tile_id` by the spatial filter.
#[derive(Debug, Clone, PartialEq)]
pub struct TrajectoryPoint {
    pub uid: String,
    pub tid: u32,
    pub datetime: NaiveDateTime,
    pub lat: f64,
    pub lng: f64,
    pub week: u32,
    pub week_start: String,
    /// m/s
    pub speed: f64,
    /// m/s²
    pub acceleration: f64,
    pub tile_id: Option<String>,
}

impl TrajectoryPoint {
    pub fn new(uid: &str, datetime: NaiveDateTime, lat: f64, lng: f64) -> Self {
        let (week, week_start) = iso_week_of(&datetime);
        Self {
            uid: uid.to_string(),
            tid: 0,
            datetime,
            lat,
            lng,
            week,
            week_start,
            speed: 0.0,
            acceleration: 0.0,
            tile_id: None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct TrajectoryRow {
    uid: String,
    #[serde(alias = "timestamp", alias = "time")]
    datetime: String,
    #[serde(alias = "latitude")]
    lat: f64,
    #[serde(alias = "lon", alias = "longitude")]
    lng: f64,
    #[serde(default)]
    week: Option<u32>,
    #[serde(default)]
    week_start: Option<String>,
}

/// Reads a weekly trajectory CSV from disk.
pub fn load_trajectories(path: impl AsRef<Path>) -> Result<Vec<TrajectoryPoint>> {
    let path = path.as_ref();
    let file = File::open(path)
        .with_context(|| format!("failed to open trajectories {}", path.display()))?;
    let points =
        parse_trajectories(file).with_context(|| format!("in {}", path.display()))?;
    debug!(path = %path.display(), rows = points.len(), "Trajectories loaded");
    Ok(points)
}

/// Parses trajectory rows from any CSV reader.
///
/// `week` and `week_start` default to the ISO week of the fix when the
/// columns are absent or empty.
pub fn parse_trajectories<R: Read>(reader: R) -> Result<Vec<TrajectoryPoint>> {
    let mut rdr = csv::Reader::from_reader(reader);
    let mut points = Vec::new();

    for (line, result) in rdr.deserialize().enumerate() {
        let row: TrajectoryRow = result?;
        let datetime = parse_datetime(&row.datetime)
            .with_context(|| format!("row {}: bad timestamp {:?}", line + 1, row.datetime))?;

        let mut point = TrajectoryPoint::new(&row.uid, datetime, row.lat, row.lng);
        if let Some(week) = row.week {
            point.week = week;
        }
        if let Some(week_start) = row.week_start.filter(|s| !s.is_empty()) {
            point.week_start = week_start;
        }
        points.push(point);
    }

    Ok(points)
}

fn parse_datetime(raw: &str) -> Result<NaiveDateTime> {
    let raw = raw.trim();

    for format in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(raw, format) {
            return Ok(dt);
        }
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.naive_utc());
    }

    if let Ok(secs) = raw.parse::<i64>() {
        return DateTime::from_timestamp(secs, 0)
            .map(|dt| dt.naive_utc())
            .ok_or_else(|| anyhow!("unix timestamp out of range"));
    }

    Err(anyhow!("unrecognized timestamp format"))
}

/// ISO week number and the date of that week's Monday.
fn iso_week_of(datetime: &NaiveDateTime) -> (u32, String) {
    let date = datetime.date();
    let monday = date - Duration::days(i64::from(date.weekday().num_days_from_monday()));
    (date.iso_week().week(), monday.format("%Y-%m-%d").to_string())
}
