//! Unit-degree grid over area polygons.
//!
//! The globe is divided into 180 × 360 one-degree cells. Each cell either
//! belongs to no area, to exactly one area, or is flagged as shared; shared
//! cells keep the per-area intersection geometries for pointwise tests.

use btreemultimap::BTreeMultiMap;
use geo::{coord, BooleanOps, BoundingRect, Contains, HasDimensions, Intersects};
use geo_types::{MultiPolygon, Rect};
use rayon::prelude::*;
use std::collections::BTreeMap;

pub type AreaId = u16;

/// marks a cell shared by more than one area.
pub const AREA_ID_MULTIPLE: AreaId = u16::MAX;

pub const GRID_COLS: usize = 360;
pub const GRID_ROWS: usize = 180;
pub const GRID_SIZE: usize = GRID_COLS * GRID_ROWS;

/// the part of an area's geometry falling into one shared cell.
pub struct AreaIntersect {
    pub id: AreaId,
    pub geometry: MultiPolygon<f64>,
}

/// grid index of area polygons.
pub struct AreaMapping {
    grid: Vec<Rect<f64>>,
    pub cell_index: Vec<AreaId>,
    pub cell_overlaps: BTreeMultiMap<u32, AreaIntersect>,
    pub area_names: BTreeMap<AreaId, String>,
}

impl Default for AreaMapping {
    fn default() -> Self {
        Self::new()
    }
}

impl AreaMapping {
    pub fn new() -> Self {
        let mut grid = Vec::with_capacity(GRID_SIZE);
        for row in 0..GRID_ROWS {
            for col in 0..GRID_COLS {
                let lon = col as f64 - 180.0;
                let lat = row as f64 - 90.0;
                grid.push(Rect::new(
                    coord! { x: lon, y: lat },
                    coord! { x: lon + 1.0, y: lat + 1.0 },
                ));
            }
        }
        Self {
            grid,
            cell_index: vec![0; GRID_SIZE],
            cell_overlaps: BTreeMultiMap::new(),
            area_names: BTreeMap::new(),
        }
    }

    /// classifies every grid cell against the area geometry: cells fully
    /// contained get the single id, partially covered cells are flagged
    /// shared and keep the clipped geometry. a cell that already carried a
    /// single area is demoted to shared, preserving the previous occupant.
    pub fn add_area(&mut self, id: AreaId, name: &str, geometry: &MultiPolygon<f64>) {
        self.area_names.insert(id, name.to_string());
        let Some(area_bbox) = geometry.bounding_rect() else {
            return;
        };

        let candidates: Vec<(usize, bool)> = (0..GRID_SIZE)
            .into_par_iter()
            .filter(|cell| {
                let bbox = &self.grid[*cell];
                bbox.intersects(&area_bbox) && bbox.intersects(geometry)
            })
            .map(|cell| (cell, geometry.contains(&self.grid[cell])))
            .collect();

        for (cell, contained) in candidates {
            if contained && self.cell_index[cell] == 0 {
                self.cell_index[cell] = id;
                continue;
            }
            let cell_polygon: MultiPolygon<f64> = self.grid[cell].to_polygon().into();
            let intersection = geometry.intersection(&cell_polygon);
            if intersection.is_empty() {
                continue;
            }
            let previous = self.cell_index[cell];
            if previous != 0 && previous != AREA_ID_MULTIPLE {
                self.cell_overlaps.insert(
                    cell as u32,
                    AreaIntersect {
                        id: previous,
                        geometry: cell_polygon,
                    },
                );
            }
            self.cell_index[cell] = AREA_ID_MULTIPLE;
            self.cell_overlaps.insert(
                cell as u32,
                AreaIntersect {
                    id,
                    geometry: intersection,
                },
            );
        }
    }

    /// grid occupancy: (empty, single, shared) cell counts.
    pub fn occupancy(&self) -> (usize, usize, usize) {
        let mut empty = 0;
        let mut single = 0;
        let mut shared = 0;
        for id in &self.cell_index {
            match *id {
                0 => empty += 1,
                AREA_ID_MULTIPLE => shared += 1,
                _ => single += 1,
            }
        }
        (empty, single, shared)
    }
}

/// cell id for a WGS84 coordinate, None outside the grid. coordinates on
/// the antimeridian and the north edge clamp onto the last cell.
pub fn cell_id(lon: f64, lat: f64) -> Option<u32> {
    if !(-90.0..90.0).contains(&lat) || !(-180.0..=180.0).contains(&lon) {
        return None;
    }
    let row = ((lat + 90.0).floor() as usize).min(GRID_ROWS - 1);
    let col = ((lon + 180.0).floor() as usize).min(GRID_COLS - 1);
    Some((row * GRID_COLS + col) as u32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;
    use wkt::Wkt;

    fn multipolygon(wkt: &str) -> MultiPolygon<f64> {
        let parsed: Wkt<f64> = Wkt::from_str(wkt).unwrap();
        match parsed.item {
            wkt::Geometry::MultiPolygon(mp) => mp.into(),
            wkt::Geometry::Polygon(p) => {
                let polygon: geo_types::Polygon<f64> = p.into();
                polygon.into()
            }
            _ => panic!("expected a polygonal geometry"),
        }
    }

    #[test]
    fn cell_ids_follow_the_degree_grid() {
        assert_eq!(cell_id(-180.0, -90.0), Some(0));
        assert_eq!(cell_id(-179.5, -89.5), Some(0));
        assert_eq!(cell_id(0.0, 0.0), Some(90 * 360 + 180));
        assert_eq!(cell_id(6.09, 50.72), Some((50 + 90) * 360 + (6 + 180)));
        assert_eq!(cell_id(0.0, 90.0), None);
        assert_eq!(cell_id(0.0, -90.5), None);
        assert_eq!(cell_id(181.0, 0.0), None);
        // the antimeridian clamps onto the easternmost cell
        assert_eq!(cell_id(180.0, 0.0), Some(90 * 360 + 359));
    }

    #[test]
    fn contained_cells_get_a_single_id() {
        let mut mapping = AreaMapping::new();
        mapping.add_area(1, "SQA", &multipolygon("POLYGON((1 1, 1 4, 4 4, 4 1, 1 1))"));

        let inner = cell_id(2.5, 2.5).unwrap() as usize;
        assert_eq!(mapping.cell_index[inner], 1);
        let border = cell_id(0.5, 2.5).unwrap() as usize;
        assert_eq!(mapping.cell_index[border], 0);
    }

    #[test]
    fn partially_covered_cells_become_shared() {
        let mut mapping = AreaMapping::new();
        mapping.add_area(
            1,
            "TRI",
            &multipolygon("MULTIPOLYGON(((5.5 1.5, 7.5 1.5, 6.5 2.5, 5.5 1.5)))"),
        );

        let cell = cell_id(6.0, 1.7).unwrap();
        assert_eq!(mapping.cell_index[cell as usize], AREA_ID_MULTIPLE);
        let overlaps = mapping.cell_overlaps.get_vec(&cell).unwrap();
        assert_eq!(overlaps.len(), 1);
        assert_eq!(overlaps[0].id, 1);
    }

    #[test]
    fn single_occupant_is_preserved_when_a_cell_becomes_shared() {
        let mut mapping = AreaMapping::new();
        // first area swallows the cell around (2.5, 2.5) completely
        mapping.add_area(1, "SQA", &multipolygon("POLYGON((1 1, 1 4, 4 4, 4 1, 1 1))"));
        // second area cuts into the same cell
        mapping.add_area(
            2,
            "REC",
            &multipolygon("POLYGON((2.5 2.25, 2.5 2.75, 5.5 2.75, 5.5 2.25, 2.5 2.25))"),
        );

        let cell = cell_id(2.5, 2.5).unwrap();
        assert_eq!(mapping.cell_index[cell as usize], AREA_ID_MULTIPLE);
        let overlaps = mapping.cell_overlaps.get_vec(&cell).unwrap();
        let mut ids: Vec<AreaId> = overlaps.iter().map(|o| o.id).collect();
        ids.sort();
        assert_eq!(ids, vec![1, 2]);
    }

    #[test]
    fn occupancy_counts_cells_by_kind() {
        let mut mapping = AreaMapping::new();
        mapping.add_area(
            1,
            "SQA",
            &multipolygon("POLYGON((0.5 0.5, 0.5 3.5, 3.5 3.5, 3.5 0.5, 0.5 0.5))"),
        );
        let (empty, single, shared) = mapping.occupancy();
        assert_eq!(empty + single + shared, GRID_SIZE);
        // a 3°×3° square offset by half a degree fully contains a 2×2 block
        // of cells and cuts through the 12 cells of the surrounding ring
        assert_eq!(single, 4);
        assert_eq!(shared, 12);
    }
}
