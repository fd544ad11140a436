// binning.rs - Assign solids to grid tiles
//
// Box solids are referenced whole; mesh solids are split per polygon so a
// tile only ray-casts the triangles that can reach it. Ranges are rounded to
// the nearest tile edge and then widened, so partially covered tiles are
// never missed (extra candidates only cost a failed ray test).

use std::collections::BTreeMap;

use super::fitting::{Layer, LayerStats};
use super::sampler::HeightFragment;
use super::structural::Bond;
use super::{Solid, SolidIndex};
use crate::map::MapGrid;
use crate::math::Aabb;

/// Per-tile working state shared by every build phase.
#[derive(Debug, Default)]
pub(crate) struct BuildTile {
    pub x: u32,
    pub z: u32,
    /// Mesh polygons reaching this tile, per solid.
    pub polygons: BTreeMap<SolidIndex, Vec<u32>>,
    pub boxes: Vec<SolidIndex>,
    /// Destructible solids and their world bounds.
    pub destructibles: Vec<(SolidIndex, Aabb)>,

    /// Parity-filtered fragments per ray (`j * 16 + i`).
    pub samples: Vec<Vec<HeightFragment>>,
    pub layer_count: usize,
    pub stats: Vec<LayerStats>,
    pub layers: Vec<Layer>,
    pub bonds: Vec<Bond>,
}

impl BuildTile {
    fn new(x: u32, z: u32) -> Self {
        Self {
            x,
            z,
            ..Default::default()
        }
    }

    /// Every solid referenced by the tile, ascending.
    pub fn solids(&self) -> Vec<SolidIndex> {
        let mut solids: Vec<SolidIndex> = self.polygons.keys().copied().chain(self.boxes.iter().copied()).collect();
        solids.sort_unstable();
        solids.dedup();
        solids
    }

    pub fn clear_samples(&mut self) {
        self.samples.clear();
        self.layer_count = 0;
    }
}

/// Inclusive tile range covering `bounds` on one axis.
fn axis_range(min: f32, max: f32, origin: f32, tile_size: f32, tiles: u32) -> Option<(u32, u32)> {
    let mut lo = ((min - origin) / tile_size + 0.5).floor() as i64;
    let mut hi = ((max - origin) / tile_size + 0.5).floor() as i64;
    if lo == hi {
        hi += 1;
    }
    lo -= 1;

    let last = tiles as i64 - 1;
    if hi < 0 || lo > last {
        return None;
    }
    Some((lo.max(0) as u32, hi.min(last) as u32))
}

/// Tiles overlapped by `bounds`, as inclusive (x0, x1, z0, z1).
pub(crate) fn tile_range(grid: &MapGrid, bounds: &Aabb) -> Option<(u32, u32, u32, u32)> {
    let (x0, x1) = axis_range(bounds.min.x, bounds.max.x, grid.origin.x, grid.tile_size, grid.width)?;
    let (z0, z1) = axis_range(bounds.min.z, bounds.max.z, grid.origin.z, grid.tile_size, grid.height)?;
    Some((x0, x1, z0, z1))
}

fn for_tiles_in(grid: &MapGrid, bounds: &Aabb, mut visit: impl FnMut(usize)) {
    if let Some((x0, x1, z0, z1)) = tile_range(grid, bounds) {
        for z in z0..=z1 {
            for x in x0..=x1 {
                visit(grid.tile_index(x, z));
            }
        }
    }
}

/// Build the row-major tile array with every solid binned into it.
pub(crate) fn bin_solids(solids: &[Solid], grid: &MapGrid) -> Vec<BuildTile> {
    let mut tiles: Vec<BuildTile> = (0..grid.height)
        .flat_map(|z| (0..grid.width).map(move |x| BuildTile::new(x, z)))
        .collect();

    for (idx, solid) in solids.iter().enumerate() {
        let solid_index = SolidIndex(idx as u32);

        match &solid.mesh {
            Some(mesh) => {
                for polygon in 0..mesh.polygon_count() {
                    for_tiles_in(grid, &mesh.polygon_bounds(polygon), |tile| {
                        tiles[tile]
                            .polygons
                            .entry(solid_index)
                            .or_default()
                            .push(polygon as u32);
                    });
                }
            }
            None => for_tiles_in(grid, &solid.bounds, |tile| tiles[tile].boxes.push(solid_index)),
        }

        if solid.is_destructible() {
            for_tiles_in(grid, &solid.bounds, |tile| {
                tiles[tile].destructibles.push((solid_index, solid.bounds));
            });
        }
    }

    tiles
}

#[cfg(test)]
mod tests {
    use glam::Vec3;

    use super::*;
    use crate::metadata::{LEVEL_FLAG_DESTRUCTIBLE, LevelData, LevelDataHeader};
    use crate::mesh::TriMesh;

    fn grid(width: u32, height: u32) -> MapGrid {
        MapGrid {
            width,
            height,
            tile_size: 1.0,
            origin: Vec3::ZERO,
            min_height: 0.0,
            max_height: 10.0,
        }
    }

    fn box_solid(min: Vec3, max: Vec3, flags: u32) -> Solid {
        Solid {
            mesh: None,
            bounds: Aabb::new(min, max),
            metadata: LevelData::new(
                LevelDataHeader {
                    flags,
                    ..Default::default()
                },
                Vec::new(),
            ),
        }
    }

    #[test]
    fn test_range_covers_partial_tiles() {
        // [1.2, 2.3] touches tiles 1 and 2.
        let (lo, hi) = axis_range(1.2, 2.3, 0.0, 1.0, 10).unwrap();
        assert!(lo <= 1 && hi >= 2);
        // Thin footprint inside one tile.
        let (lo, hi) = axis_range(4.4, 4.45, 0.0, 1.0, 10).unwrap();
        assert!(lo <= 4 && hi >= 4);
        // Clamped at the grid edges.
        assert_eq!(axis_range(-5.0, 0.2, 0.0, 1.0, 3), Some((0, 0)));
        assert_eq!(axis_range(20.0, 21.0, 0.0, 1.0, 3), None);
    }

    #[test]
    fn test_boxes_and_destructibles_binned() {
        let grid = grid(4, 4);
        let solids = vec![
            box_solid(Vec3::ZERO, Vec3::splat(4.0), 0),
            box_solid(Vec3::new(2.0, 0.0, 2.0), Vec3::new(3.0, 1.0, 3.0), LEVEL_FLAG_DESTRUCTIBLE),
        ];
        let tiles = bin_solids(&solids, &grid);
        assert_eq!(tiles.len(), 16);
        assert!(tiles.iter().all(|t| t.boxes.contains(&SolidIndex(0))));

        let inner = &tiles[grid.tile_index(2, 2)];
        assert_eq!(inner.solids(), vec![SolidIndex(0), SolidIndex(1)]);
        assert_eq!(inner.destructibles.len(), 1);
        assert!(tiles[grid.tile_index(0, 0)].destructibles.is_empty());
        assert_eq!((inner.x, inner.z), (2, 2));
    }

    #[test]
    fn test_mesh_polygons_binned_per_tile() {
        let grid = grid(4, 1);
        let mesh = TriMesh::new(
            vec![
                Vec3::new(0.0, 0.0, 0.0),
                Vec3::new(1.0, 0.0, 0.0),
                Vec3::new(0.0, 0.0, 1.0),
                Vec3::new(3.0, 0.0, 0.0),
                Vec3::new(4.0, 0.0, 0.0),
                Vec3::new(4.0, 0.0, 1.0),
            ],
            vec![[0, 2, 1], [3, 5, 4]],
        );
        let solids = vec![Solid {
            bounds: mesh.bounds(),
            mesh: Some(mesh),
            metadata: LevelData::default(),
        }];
        let tiles = bin_solids(&solids, &grid);

        assert_eq!(tiles[0].polygons[&SolidIndex(0)], vec![0]);
        assert_eq!(tiles[3].polygons[&SolidIndex(0)], vec![1]);
        assert!(tiles[0].boxes.is_empty());
    }
}
