//! Trajectory segmentation and kinematic filtering.

use chrono::Duration;
use tracing::debug;

use crate::geometry::haversine_m;
use crate::trajectory::TrajectoryPoint;

/// Points at or above this speed (m/s) are GPS noise.
pub const MAX_SPEED: f64 = 300.0;

/// Points whose acceleration magnitude (m/s²) reaches this bound are dropped.
pub const MAX_ABS_ACCELERATION: f64 = 10.0;

/// Sorts points by user and time and assigns a per-user trajectory id.
///
/// A new `tid` starts whenever the gap to the previous fix of the same user
/// exceeds `max_interval_secs`. Fixes less than a microsecond after the
/// previous one are dropped.
pub fn split_on_time_gap(
    mut points: Vec<TrajectoryPoint>,
    max_interval_secs: i64,
) -> Vec<TrajectoryPoint> {
    points.sort_by(|a, b| a.uid.cmp(&b.uid).then(a.datetime.cmp(&b.datetime)));

    let mut out: Vec<TrajectoryPoint> = Vec::with_capacity(points.len());
    let mut duplicates = 0usize;

    let max_gap = Duration::seconds(max_interval_secs);

    for mut point in points {
        match out.last() {
            Some(prev) if prev.uid == point.uid => {
                let gap = point.datetime - prev.datetime;
                if seconds(gap) <= 0.0 {
                    duplicates += 1;
                    continue;
                }
                point.tid = if gap > max_gap {
                    prev.tid + 1
                } else {
                    prev.tid
                };
            }
            _ => point.tid = 1,
        }
        out.push(point);
    }

    if duplicates > 0 {
        debug!(duplicates, "Dropped fixes with repeated timestamps");
    }

    out
}

/// Fills `speed` and `acceleration` inside each `(uid, tid)` segment.
///
/// Expects the ordering produced by [`split_on_time_gap`]. The first fix of a
/// segment takes the speed of the first interval and zero acceleration; a
/// single-fix segment stands still.
pub fn compute_speed_and_acceleration(mut points: Vec<TrajectoryPoint>) -> Vec<TrajectoryPoint> {
    let mut start = 0;
    while start < points.len() {
        let mut end = start + 1;
        while end < points.len()
            && points[end].uid == points[start].uid
            && points[end].tid == points[start].tid
        {
            end += 1;
        }
        fill_segment(&mut points[start..end]);
        start = end;
    }
    points
}

fn fill_segment(segment: &mut [TrajectoryPoint]) {
    for i in 1..segment.len() {
        let (prev, cur) = (&segment[i - 1], &segment[i]);
        let dt = seconds(cur.datetime - prev.datetime);
        let distance = haversine_m(prev.lng, prev.lat, cur.lng, cur.lat);
        segment[i].speed = distance / dt;
    }

    match segment.len() {
        0 => return,
        1 => segment[0].speed = 0.0,
        _ => segment[0].speed = segment[1].speed,
    }
    segment[0].acceleration = 0.0;

    for i in 1..segment.len() {
        let dt = seconds(segment[i].datetime - segment[i - 1].datetime);
        segment[i].acceleration = (segment[i].speed - segment[i - 1].speed) / dt;
    }
}

/// Elapsed time at microsecond resolution.
fn seconds(delta: Duration) -> f64 {
    delta
        .num_microseconds()
        .map_or(delta.num_seconds() as f64, |us| us as f64 / 1e6)
}

/// Drops fixes with `speed >= MAX_SPEED` or `|acceleration| >= MAX_ABS_ACCELERATION`.
pub fn filter_kinematics(points: Vec<TrajectoryPoint>) -> Vec<TrajectoryPoint> {
    points
        .into_iter()
        .filter(|p| {
            p.speed.is_finite()
                && p.acceleration.is_finite()
                && p.speed < MAX_SPEED
                && p.acceleration.abs() < MAX_ABS_ACCELERATION
        })
        .collect()
}

/// Splits on time gaps, derives kinematics, and removes implausible fixes.
#[tracing::instrument(skip(points), fields(rows = points.len()))]
pub fn filter_trajectories(
    points: Vec<TrajectoryPoint>,
    max_interval_secs: i64,
) -> Vec<TrajectoryPoint> {
    let split = split_on_time_gap(points, max_interval_secs);
    let with_kinematics = compute_speed_and_acceleration(split);
    let before = with_kinematics.len();
    let filtered = filter_kinematics(with_kinematics);

    debug!(
        removed = before - filtered.len(),
        kept = filtered.len(),
        "Kinematic filter applied"
    );
    filtered
}
