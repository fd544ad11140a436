// sampler.rs - Height-field sampling of one tile
//
// Every tile is sampled by a 16x16 grid of upward rays. Each ray collects
// the heights where it crosses a solid surface, sorted bottom to top, and a
// parity filter keeps an alternating floor / ceiling sequence:
//
//   - a downward-facing surface (the ray enters a solid) opens a level
//   - an upward-facing surface (the ray leaves a solid) closes it
//   - out-of-turn fragments (overlapping solids) are dropped
//
// Level `l` of a ray is then fragments `2l` (floor) and `2l + 1` (ceiling).

use glam::Vec3;

use super::binning::BuildTile;
use super::{Solid, SolidIndex};
use crate::map::MapGrid;
use crate::math::{vertical_ray_aabb, vertical_ray_triangle};

pub const SUBSAMPLES_PER_AXIS: usize = 16;
pub const RAYS_PER_TILE: usize = SUBSAMPLES_PER_AXIS * SUBSAMPLES_PER_AXIS;

/// Levels per tile beyond this mark the tile as malformed.
pub const MAX_LEVELS_PER_TILE: usize = 64;

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum TileError {
    #[error("non-finite surface hit by ray {ray}")]
    NonFiniteFragment { ray: usize },
    #[error("{count} levels exceed the limit of {max}")]
    TooManyLevels { count: usize, max: usize },
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) struct HeightFragment {
    pub normal: Vec3,
    pub height: f32,
    pub solid: SolidIndex,
}

impl HeightFragment {
    /// Faces down, so the ray is entering a solid.
    pub fn is_entry(&self) -> bool {
        self.normal.y < 0.0
    }
}

/// Offset of sample `i` along one tile axis, as a fraction of the tile size.
pub(crate) fn sample_offset(i: usize) -> f32 {
    (i as f32 + 0.5) / SUBSAMPLES_PER_AXIS as f32
}

/// Keep an alternating entry / exit sequence from height-sorted fragments.
pub(crate) fn parity_filter(fragments: Vec<HeightFragment>) -> Vec<HeightFragment> {
    let mut inside = false;
    fragments
        .into_iter()
        .filter(|fragment| {
            if fragment.is_entry() != inside {
                inside = !inside;
                true
            } else {
                false
            }
        })
        .collect()
}

fn cast_ray(tile: &BuildTile, solids: &[Solid], x: f32, z: f32, min_ray_height: f32) -> Vec<HeightFragment> {
    let mut fragments = Vec::new();

    for &solid in &tile.boxes {
        let bounds = &solids[solid.index()].bounds;
        // Zero-thickness boxes hold no volume.
        if bounds.max.y <= bounds.min.y {
            continue;
        }
        if let Some((entry, exit)) = vertical_ray_aabb(x, z, min_ray_height, bounds) {
            fragments.push(HeightFragment {
                normal: Vec3::NEG_Y,
                height: entry,
                solid,
            });
            fragments.push(HeightFragment {
                normal: Vec3::Y,
                height: exit,
                solid,
            });
        }
    }

    for (&solid, polygons) in &tile.polygons {
        let Some(mesh) = solids[solid.index()].mesh.as_ref() else {
            continue;
        };
        for &polygon in polygons {
            let polygon = polygon as usize;
            if let Some(height) = vertical_ray_triangle(x, z, min_ray_height, mesh.polygon_vertices(polygon)) {
                fragments.push(HeightFragment {
                    normal: mesh.polygon_plane(polygon).normal,
                    height,
                    solid,
                });
            }
        }
    }

    // Exits sort before entries at equal height, so solids stacked on each
    // other stay separate levels.
    fragments.sort_by(|a, b| a.height.total_cmp(&b.height).then(a.is_entry().cmp(&b.is_entry())));
    fragments
}

/// Sample one tile and record its ray fragments and level count.
pub(crate) fn sample_tile(
    tile: &mut BuildTile,
    solids: &[Solid],
    grid: &MapGrid,
    min_ray_height: f32,
) -> Result<(), TileError> {
    let tile_min_x = grid.origin.x + tile.x as f32 * grid.tile_size;
    let tile_min_z = grid.origin.z + tile.z as f32 * grid.tile_size;

    let mut samples = Vec::with_capacity(RAYS_PER_TILE);
    for j in 0..SUBSAMPLES_PER_AXIS {
        for i in 0..SUBSAMPLES_PER_AXIS {
            let x = tile_min_x + sample_offset(i) * grid.tile_size;
            let z = tile_min_z + sample_offset(j) * grid.tile_size;
            let fragments = cast_ray(tile, solids, x, z, min_ray_height);
            if fragments
                .iter()
                .any(|f| !f.height.is_finite() || !f.normal.is_finite())
            {
                return Err(TileError::NonFiniteFragment { ray: samples.len() });
            }
            samples.push(parity_filter(fragments));
        }
    }

    let layer_count = samples.iter().map(|s| s.len().div_ceil(2)).max().unwrap_or(0);
    if layer_count > MAX_LEVELS_PER_TILE {
        return Err(TileError::TooManyLevels {
            count: layer_count,
            max: MAX_LEVELS_PER_TILE,
        });
    }

    tile.samples = samples;
    tile.layer_count = layer_count;
    Ok(())
}
