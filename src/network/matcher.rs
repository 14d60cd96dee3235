//! Nearest-edge map matching.

use rstar::RTree;
use rstar::primitives::{GeomWithData, Line};
use std::fmt;
use tracing::{debug, warn};

use crate::geometry::to_mercator;
use crate::network::RoadNetwork;
use crate::trajectory::TrajectoryPoint;

/// Identifies an undirected road link by its end nodes and parallel-edge key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RoadLinkId {
    pub u: String,
    pub v: String,
    pub key: u32,
}

impl fmt::Display for RoadLinkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}_{}", self.u, self.v, self.key)
    }
}

/// A trajectory point snapped to its nearest road link.
#[derive(Debug, Clone)]
pub struct MatchedPoint {
    pub point: TrajectoryPoint,
    pub road_link: RoadLinkId,
}

type SegmentEntry = GeomWithData<Line<[f64; 2]>, usize>;

/// R-tree over every edge segment, in Web Mercator meters.
pub struct RoadMatcher {
    tree: RTree<SegmentEntry>,
    links: Vec<RoadLinkId>,
}

impl RoadMatcher {
    pub fn new(network: &RoadNetwork) -> Self {
        let mut links = Vec::with_capacity(network.edges.len());
        let mut segments = Vec::new();

        for edge in &network.edges {
            let link = links.len();
            links.push(RoadLinkId {
                u: edge.u.clone(),
                v: edge.v.clone(),
                key: edge.key,
            });

            let projected: Vec<[f64; 2]> = edge
                .geometry
                .0
                .iter()
                .map(|c| to_mercator(c.x, c.y))
                .collect();

            let before = segments.len();
            for pair in projected.windows(2) {
                if pair[0] != pair[1] {
                    segments.push(GeomWithData::new(Line::new(pair[0], pair[1]), link));
                }
            }
            // zero-length edge: keep it matchable as a point-like segment
            if segments.len() == before {
                if let Some(&first) = projected.first() {
                    segments.push(GeomWithData::new(Line::new(first, first), link));
                }
            }
        }

        debug!(links = links.len(), segments = segments.len(), "Road index built");
        Self {
            tree: RTree::bulk_load(segments),
            links,
        }
    }

    /// Nearest road link to a lon/lat position; `None` only for an empty network.
    pub fn nearest(&self, lng: f64, lat: f64) -> Option<&RoadLinkId> {
        let query = to_mercator(lng, lat);
        self.tree
            .nearest_neighbor(&query)
            .map(|segment| &self.links[segment.data])
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }
}

/// Attaches the nearest road link to every point.
///
/// There is no distance cutoff: points far from the network still receive
/// the closest link.
#[tracing::instrument(skip_all, fields(rows = points.len()))]
pub fn match_points(matcher: &RoadMatcher, points: Vec<TrajectoryPoint>) -> Vec<MatchedPoint> {
    if matcher.is_empty() {
        warn!("Road network has no edges, nothing can be matched");
        return Vec::new();
    }

    points
        .into_iter()
        .filter_map(|point| {
            let road_link = matcher.nearest(point.lng, point.lat)?.clone();
            Some(MatchedPoint { point, road_link })
        })
        .collect()
}
