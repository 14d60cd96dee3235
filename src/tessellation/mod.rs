//! Square tessellation of a city and the spatial filter built on it.

pub mod boundary;
pub mod grid;

pub use boundary::{BoundaryApi, NominatimClient, load_or_fetch_boundary, parse_boundary};
pub use grid::{SquareTessellation, TessellationCell};

use crate::trajectory::TrajectoryPoint;

/// Keeps the points that fall inside a tessellation cell, tagging each with
/// its `tile_id`.
pub fn select_within(
    points: Vec<TrajectoryPoint>,
    tessellation: &SquareTessellation,
) -> Vec<TrajectoryPoint> {
    points
        .into_iter()
        .filter_map(|mut point| {
            let tile_id = tessellation.locate(point.lng, point.lat)?;
            point.tile_id = Some(tile_id.to_string());
            Some(point)
        })
        .collect()
}
