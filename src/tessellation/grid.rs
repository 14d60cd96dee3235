use anyhow::{Result, bail};
use geo::{BoundingRect, Coord, Intersects, MultiPolygon, Point, Polygon, Rect};
use rstar::{AABB, RTree, RTreeObject};

use crate::geometry::{from_mercator, to_mercator};

/// One square of the grid, stored in WGS84.
#[derive(Debug, Clone)]
pub struct TessellationCell {
    pub tile_id: String,
    pub polygon: Polygon<f64>,
}

struct CellEntry {
    index: usize,
    envelope: AABB<[f64; 2]>,
}

impl RTreeObject for CellEntry {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        self.envelope
    }
}

/// Square grid covering a region, with an R-tree for point lookups.
pub struct SquareTessellation {
    cells: Vec<TessellationCell>,
    index: RTree<CellEntry>,
}

impl SquareTessellation {
    /// Lays `cell_size`-meter squares (Web Mercator) over the bounding box
    /// of `boundary` and keeps the ones touching it.
    pub fn build(boundary: &MultiPolygon<f64>, cell_size: f64) -> Result<Self> {
        if !(cell_size > 0.0) {
            bail!("cell size must be positive, got {cell_size}");
        }
        let Some(bbox) = boundary.bounding_rect() else {
            bail!("boundary is empty");
        };

        let [min_x, min_y] = to_mercator(bbox.min().x, bbox.min().y);
        let [max_x, max_y] = to_mercator(bbox.max().x, bbox.max().y);
        let cols = ((max_x - min_x) / cell_size).ceil().max(1.0) as usize;
        let rows = ((max_y - min_y) / cell_size).ceil().max(1.0) as usize;

        let mut cells = Vec::new();
        for row in 0..rows {
            for col in 0..cols {
                let x0 = min_x + col as f64 * cell_size;
                let y0 = min_y + row as f64 * cell_size;
                let (lng0, lat0) = from_mercator(x0, y0);
                let (lng1, lat1) = from_mercator(x0 + cell_size, y0 + cell_size);

                let polygon = Rect::new(Coord { x: lng0, y: lat0 }, Coord { x: lng1, y: lat1 })
                    .to_polygon();
                if polygon.intersects(boundary) {
                    cells.push(TessellationCell {
                        tile_id: cells.len().to_string(),
                        polygon,
                    });
                }
            }
        }

        if cells.is_empty() {
            bail!("no tessellation cell intersects the boundary");
        }

        Ok(Self::from_cells(cells))
    }

    fn from_cells(cells: Vec<TessellationCell>) -> Self {
        let entries = cells
            .iter()
            .enumerate()
            .filter_map(|(index, cell)| {
                let rect = cell.polygon.bounding_rect()?;
                Some(CellEntry {
                    index,
                    envelope: AABB::from_corners(
                        [rect.min().x, rect.min().y],
                        [rect.max().x, rect.max().y],
                    ),
                })
            })
            .collect();

        Self {
            cells,
            index: RTree::bulk_load(entries),
        }
    }

    pub fn cells(&self) -> &[TessellationCell] {
        &self.cells
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Tile containing the point. Points on a shared edge go to the first
    /// cell found.
    pub fn locate(&self, lng: f64, lat: f64) -> Option<&str> {
        let point = Point::new(lng, lat);
        let query = AABB::from_point([lng, lat]);

        self.index
            .locate_in_envelope_intersecting(&query)
            .map(|entry| &self.cells[entry.index])
            .find(|cell| cell.polygon.intersects(&point))
            .map(|cell| cell.tile_id.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::polygon;

    fn square_boundary() -> MultiPolygon<f64> {
        MultiPolygon(vec![polygon![
            (x: 10.38, y: 43.70),
            (x: 10.42, y: 43.70),
            (x: 10.42, y: 43.73),
            (x: 10.38, y: 43.73),
            (x: 10.38, y: 43.70),
        ]])
    }

    #[test]
    fn test_grid_covers_boundary() {
        let tess = SquareTessellation::build(&square_boundary(), 1500.0).unwrap();

        // 0.04 deg lng ~ 4450 m mercator, 0.03 deg lat ~ 4600 m mercator
        assert_eq!(tess.len(), 3 * 4);
        assert!(tess.locate(10.40, 43.715).is_some());
        assert!(tess.locate(10.381, 43.701).is_some());
        assert!(tess.locate(11.0, 43.715).is_none());
    }

    #[test]
    fn test_tile_ids_unique_and_sequential() {
        let tess = SquareTessellation::build(&square_boundary(), 1000.0).unwrap();
        for (i, cell) in tess.cells().iter().enumerate() {
            assert_eq!(cell.tile_id, i.to_string());
        }
    }

    #[test]
    fn test_triangle_drops_far_corner() {
        let triangle = MultiPolygon(vec![polygon![
            (x: 10.38, y: 43.70),
            (x: 10.42, y: 43.70),
            (x: 10.38, y: 43.73),
            (x: 10.38, y: 43.70),
        ]]);
        let full = SquareTessellation::build(&square_boundary(), 1000.0).unwrap();
        let partial = SquareTessellation::build(&triangle, 1000.0).unwrap();

        assert!(partial.len() < full.len());
        assert!(partial.locate(10.419, 43.729).is_none());
    }

    #[test]
    fn test_rejects_non_positive_cell_size() {
        assert!(SquareTessellation::build(&square_boundary(), 0.0).is_err());
        assert!(SquareTessellation::build(&square_boundary(), -5.0).is_err());
    }
}
