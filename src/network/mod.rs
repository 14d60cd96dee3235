//! Road network loading and map matching.

pub mod graphml;
pub mod matcher;

pub use graphml::{RoadEdge, RoadNetwork, RoadNode, load_graphml, parse_graphml};
pub use matcher::{MatchedPoint, RoadLinkId, RoadMatcher, match_points};
