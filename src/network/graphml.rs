//! GraphML road networks as exported by OSMnx.

use anyhow::{Context, Result, anyhow, bail};
use geo::{Coord, LineString};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use tracing::debug;
use wkt::Wkt;

#[derive(Debug, Clone, PartialEq)]
pub struct RoadNode {
    pub id: String,
    /// Longitude.
    pub x: f64,
    /// Latitude.
    pub y: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RoadEdge {
    pub u: String,
    pub v: String,
    /// Distinguishes parallel edges between the same nodes.
    pub key: u32,
    pub osmid: Option<String>,
    pub name: Option<String>,
    /// Meters, as reported by the exporter.
    pub length: Option<f64>,
    /// Lon/lat polyline from `u` to `v`.
    pub geometry: LineString<f64>,
}

#[derive(Debug, Clone, Default)]
pub struct RoadNetwork {
    pub directed: bool,
    pub nodes: HashMap<String, RoadNode>,
    pub edges: Vec<RoadEdge>,
}

impl RoadNetwork {
    /// Collapses each edge and its reverse twin into one undirected edge.
    ///
    /// Endpoints are ordered so that `u <= v`, and keys are renumbered per
    /// node pair. Two edges are twins when they join the same nodes along
    /// the same polyline in either direction.
    pub fn to_undirected(&self) -> RoadNetwork {
        let mut groups: BTreeMap<(String, String), Vec<RoadEdge>> = BTreeMap::new();

        for edge in &self.edges {
            let mut edge = edge.clone();
            if edge.u > edge.v {
                std::mem::swap(&mut edge.u, &mut edge.v);
                edge.geometry.0.reverse();
            }

            let group = groups.entry((edge.u.clone(), edge.v.clone())).or_default();
            if group
                .iter()
                .any(|e| same_polyline(&e.geometry, &edge.geometry))
            {
                continue;
            }
            edge.key = group.len() as u32;
            group.push(edge);
        }

        RoadNetwork {
            directed: false,
            nodes: self.nodes.clone(),
            edges: groups.into_values().flatten().collect(),
        }
    }
}

fn same_polyline(a: &LineString<f64>, b: &LineString<f64>) -> bool {
    const EPS: f64 = 1e-9;
    let close = |p: &Coord<f64>, q: &Coord<f64>| (p.x - q.x).abs() < EPS && (p.y - q.y).abs() < EPS;

    a.0.len() == b.0.len()
        && (a.0.iter().zip(&b.0).all(|(p, q)| close(p, q))
            || a.0.iter().zip(b.0.iter().rev()).all(|(p, q)| close(p, q)))
}

/// Reads a GraphML file from disk.
pub fn load_graphml(path: impl AsRef<Path>) -> Result<RoadNetwork> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read road network {}", path.display()))?;
    let network = parse_graphml(&text).with_context(|| format!("in {}", path.display()))?;
    debug!(
        path = %path.display(),
        nodes = network.nodes.len(),
        edges = network.edges.len(),
        "Road network loaded"
    );
    Ok(network)
}

/// Parses GraphML text into a [`RoadNetwork`].
///
/// `<key>` declarations map data ids to attribute names; nodes need `x` and
/// `y`, edges may carry `osmid`, `name`, `length`, `key` and a WKT
/// `geometry`.
pub fn parse_graphml(text: &str) -> Result<RoadNetwork> {
    let doc = roxmltree::Document::parse(text)?;

    // (domain, key id) -> attribute name
    let mut keys: HashMap<(String, String), String> = HashMap::new();
    for key in doc.descendants().filter(|n| n.has_tag_name_local("key")) {
        let (Some(id), Some(name)) = (key.attribute("id"), key.attribute("attr.name")) else {
            continue;
        };
        let domain = key.attribute("for").unwrap_or("all");
        keys.insert((domain.to_string(), id.to_string()), name.to_string());
    }

    let graph = doc
        .descendants()
        .find(|n| n.has_tag_name_local("graph"))
        .ok_or_else(|| anyhow!("GraphML has no <graph> element"))?;

    let mut network = RoadNetwork {
        directed: graph.attribute("edgedefault") != Some("undirected"),
        ..Default::default()
    };

    for node in graph.children().filter(|n| n.has_tag_name_local("node")) {
        let id = node
            .attribute("id")
            .ok_or_else(|| anyhow!("node without id"))?
            .to_string();
        let data = read_data(node, "node", &keys);

        let coord = |name: &str| -> Result<f64> {
            let raw = data
                .get(name)
                .ok_or_else(|| anyhow!("node {id} has no {name}"))?;
            raw.trim()
                .parse::<f64>()
                .with_context(|| format!("node {id}: bad {name} {raw:?}"))
        };
        let (x, y) = (coord("x")?, coord("y")?);

        network.nodes.insert(id.clone(), RoadNode { id, x, y });
    }

    for edge in graph.children().filter(|n| n.has_tag_name_local("edge")) {
        let (Some(u), Some(v)) = (edge.attribute("source"), edge.attribute("target")) else {
            bail!("edge without source or target");
        };
        let (Some(from), Some(to)) = (network.nodes.get(u), network.nodes.get(v)) else {
            bail!("edge {u} -> {v} references an unknown node");
        };
        let data = read_data(edge, "edge", &keys);

        let key = data
            .get("key")
            .map(String::as_str)
            .or(edge.attribute("id"))
            .and_then(|k| k.trim().parse::<u32>().ok())
            .unwrap_or(0);

        let geometry = match data.get("geometry") {
            Some(wkt) => parse_wkt_linestring(wkt)
                .with_context(|| format!("edge {u} -> {v}: bad geometry"))?,
            None => LineString::new(Vec::new()),
        };
        // missing or EMPTY geometry: straight segment between the end nodes
        let geometry = if geometry.0.len() < 2 {
            LineString::from(vec![(from.x, from.y), (to.x, to.y)])
        } else {
            geometry
        };

        network.edges.push(RoadEdge {
            u: u.to_string(),
            v: v.to_string(),
            key,
            osmid: data.get("osmid").cloned(),
            name: data.get("name").cloned(),
            length: data.get("length").and_then(|l| l.trim().parse().ok()),
            geometry,
        });
    }

    Ok(network)
}

fn read_data(
    element: roxmltree::Node,
    domain: &str,
    keys: &HashMap<(String, String), String>,
) -> HashMap<String, String> {
    let mut data = HashMap::new();
    for child in element.children().filter(|n| n.has_tag_name_local("data")) {
        let Some(key) = child.attribute("key") else {
            continue;
        };
        let name = keys
            .get(&(domain.to_string(), key.to_string()))
            .or_else(|| keys.get(&("all".to_string(), key.to_string())))
            .cloned()
            .unwrap_or_else(|| key.to_string());
        data.insert(name, child.text().unwrap_or("").to_string());
    }
    data
}

trait LocalName {
    fn has_tag_name_local(&self, name: &str) -> bool;
}

impl LocalName for roxmltree::Node<'_, '_> {
    fn has_tag_name_local(&self, name: &str) -> bool {
        self.is_element() && self.tag_name().name() == name
    }
}

/// Parses a WKT `LINESTRING`. Z and M ordinates are dropped.
fn parse_wkt_linestring(text: &str) -> Result<LineString<f64>> {
    let wkt: Wkt<f64> = text
        .trim()
        .parse()
        .map_err(|e| anyhow!("invalid WKT {text:?}: {e}"))?;
    LineString::try_from(wkt).map_err(|e| anyhow!("not a LINESTRING {text:?}: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"<?xml version='1.0' encoding='utf-8'?>
<graphml xmlns="http://graphml.graphdrawing.org/xmlns">
  <key id="d0" for="node" attr.name="y" attr.type="string"/>
  <key id="d1" for="node" attr.name="x" attr.type="string"/>
  <key id="d2" for="edge" attr.name="osmid" attr.type="string"/>
  <key id="d3" for="edge" attr.name="length" attr.type="string"/>
  <key id="d4" for="edge" attr.name="geometry" attr.type="string"/>
  <key id="d5" for="edge" attr.name="name" attr.type="string"/>
  <graph edgedefault="directed">
    <node id="1"><data key="d0">43.7160</data><data key="d1">10.3990</data></node>
    <node id="2"><data key="d0">43.7160</data><data key="d1">10.4030</data></node>
    <node id="3"><data key="d0">43.7200</data><data key="d1">10.4090</data></node>
    <edge source="1" target="2" id="0">
      <data key="d2">100</data><data key="d3">321.9</data><data key="d5">Via Roma</data>
      <data key="d4">LINESTRING (10.3990 43.7160, 10.4010 43.7160, 10.4030 43.7160)</data>
    </edge>
    <edge source="2" target="1" id="0">
      <data key="d2">100</data><data key="d3">321.9</data>
      <data key="d4">LINESTRING (10.4030 43.7160, 10.4010 43.7160, 10.3990 43.7160)</data>
    </edge>
    <edge source="2" target="3" id="0"><data key="d2">200</data></edge>
  </graph>
</graphml>"#;

    #[test]
    fn test_parse_sample() {
        let net = parse_graphml(SAMPLE).unwrap();

        assert!(net.directed);
        assert_eq!(net.nodes.len(), 3);
        assert_eq!(net.nodes["2"].x, 10.4030);
        assert_eq!(net.edges.len(), 3);
        assert_eq!(net.edges[0].name.as_deref(), Some("Via Roma"));
        assert_eq!(net.edges[0].length, Some(321.9));
        assert_eq!(net.edges[0].geometry.0.len(), 3);
        // no geometry: straight segment between the end nodes
        assert_eq!(net.edges[2].geometry.0.len(), 2);
        assert_eq!(net.edges[2].osmid.as_deref(), Some("200"));
    }

    #[test]
    fn test_to_undirected_merges_reverse_twin() {
        let net = parse_graphml(SAMPLE).unwrap().to_undirected();

        assert!(!net.directed);
        assert_eq!(net.edges.len(), 2);
        assert!(net.edges.iter().all(|e| e.u <= e.v));
        assert!(net.edges.iter().all(|e| e.key == 0));
    }

    #[test]
    fn test_to_undirected_keeps_distinct_parallel_edges() {
        let mut net = parse_graphml(SAMPLE).unwrap();
        let mut detour = net.edges[0].clone();
        detour.geometry =
            LineString::from(vec![(10.3990, 43.7160), (10.4010, 43.7170), (10.4030, 43.7160)]);
        detour.key = 1;
        net.edges.push(detour);

        let undirected = net.to_undirected();
        let keys: Vec<u32> = undirected
            .edges
            .iter()
            .filter(|e| e.u == "1" && e.v == "2")
            .map(|e| e.key)
            .collect();
        assert_eq!(keys, vec![0, 1]);
    }

    #[test]
    fn test_unknown_node_is_error() {
        let text = r#"<graphml><graph edgedefault="directed">
            <edge source="1" target="2"/></graph></graphml>"#;
        assert!(parse_graphml(text).is_err());
    }

    #[test]
    fn test_node_without_coordinates_is_error() {
        let text = r#"<graphml><graph><node id="1"/></graph></graphml>"#;
        assert!(parse_graphml(text).is_err());
    }

    #[test]
    fn test_parse_wkt() {
        let ls = parse_wkt_linestring("LINESTRING (1 2, 3.5 4)").unwrap();
        assert_eq!(ls.0, vec![Coord { x: 1.0, y: 2.0 }, Coord { x: 3.5, y: 4.0 }]);

        let ls = parse_wkt_linestring("LINESTRING Z (1 2 7, 3 4 8)").unwrap();
        assert_eq!(ls.0, vec![Coord { x: 1.0, y: 2.0 }, Coord { x: 3.0, y: 4.0 }]);

        assert!(parse_wkt_linestring("LINESTRING EMPTY").unwrap().0.is_empty());
        assert!(parse_wkt_linestring("POINT (1 2)").is_err());
        assert!(parse_wkt_linestring("LINESTRING (1 2,").is_err());
    }

    #[test]
    fn test_empty_geometry_falls_back_to_end_nodes() {
        let text = r#"<graphml>
  <key id="g" for="edge" attr.name="geometry"/>
  <key id="x" for="node" attr.name="x"/>
  <key id="y" for="node" attr.name="y"/>
  <graph edgedefault="directed">
    <node id="1"><data key="x">10.0</data><data key="y">43.0</data></node>
    <node id="2"><data key="x">10.1</data><data key="y">43.0</data></node>
    <edge source="1" target="2"><data key="g">LINESTRING EMPTY</data></edge>
  </graph>
</graphml>"#;
        let net = parse_graphml(text).unwrap();
        assert_eq!(
            net.edges[0].geometry.0,
            vec![Coord { x: 10.0, y: 43.0 }, Coord { x: 10.1, y: 43.0 }]
        );
    }
}
