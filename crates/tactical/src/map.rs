// map.rs - Runtime tactical map
//
// A flat, index-addressed representation:
//   tiles[z * width + x]  -> (level_count, level_start) into `levels`
//   levels[i]             -> planes + heights + `data_index` into `level_data`
//   level_data[j]         -> header + opaque payload
//
// Planes are stored relative to the centre of their tile in XZ, so a tile's
// levels can be copied into another grid position unchanged.
//
// Only the per-level header (flags and structural integrity) changes after
// construction, through `damage_structure`.

use std::collections::{HashMap, HashSet};

use glam::{Vec2, Vec3};
use tracing::debug;

use crate::math::{Aabb, Plane};
use crate::metadata::{LEVEL_FLAG_DESTROYED, LEVEL_FLAG_DESTRUCTIBLE, LEVEL_FLAG_STRUCTURAL, LevelData};

/// A level whose integrity drops below this collapses and spreads damage.
pub const COLLAPSE_THRESHOLD: i32 = 2;

/// Largest grid dimension; tile coordinates are packed into 16 bits.
pub const MAX_GRID_DIMENSION: u32 = u16::MAX as u32;

/// Mask accepting every layer bit.
pub const ALL_LAYERS: u32 = u32::MAX;

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum MapError {
    #[error("tile {tile} level range {start}+{count} exceeds {levels} levels")]
    LevelRangeOutOfBounds {
        tile: usize,
        start: u32,
        count: u32,
        levels: usize,
    },
    #[error("level {level} references missing level data {data_index}")]
    DataIndexOutOfBounds { level: usize, data_index: u32 },
    #[error("tile {tile} level at position {position} stores level index {stored}")]
    LevelIndexMismatch {
        tile: usize,
        position: usize,
        stored: u16,
    },
    #[error("tile array holds {actual} tiles, grid needs {expected}")]
    TileCountMismatch { expected: usize, actual: usize },
}

// ============================================================================
// Records
// ============================================================================

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Tile {
    pub level_count: u32,
    pub level_start: u32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TileLevel {
    pub floor: Plane,
    /// `Plane::INVALID` when the level has no roof.
    pub ceiling: Plane,
    pub base_height: f32,
    /// Infinite when the level has no roof.
    pub roof_delta: f32,
    pub data_index: u32,
    pub reserved: u32,
}

pub const TILE_RECORD_SIZE: usize = std::mem::size_of::<Tile>();
pub const LEVEL_RECORD_SIZE: usize = std::mem::size_of::<TileLevel>();

const _: () = assert!(TILE_RECORD_SIZE == 8);
const _: () = assert!(LEVEL_RECORD_SIZE == 48);

impl TileLevel {
    pub fn has_roof(&self) -> bool {
        self.ceiling.is_valid() && self.roof_delta.is_finite()
    }

    /// Top of the level's vertical span (`base_height` + roof, or infinity).
    pub fn top_height(&self) -> f32 {
        if self.roof_delta.is_finite() {
            self.base_height + self.roof_delta
        } else {
            f32::INFINITY
        }
    }

    pub fn overlaps_span(&self, min_y: f32, max_y: f32) -> bool {
        self.base_height <= max_y && self.top_height() >= min_y
    }
}

// ============================================================================
// Grid geometry
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MapGrid {
    pub width: u32,
    pub height: u32,
    pub tile_size: f32,
    /// World position of the grid's minimum corner.
    pub origin: Vec3,
    pub min_height: f32,
    pub max_height: f32,
}

impl MapGrid {
    /// Number of tiles needed along X and Z to cover `bounds`.
    pub fn dimensions_for(bounds: &Aabb, tile_size: f32) -> (u64, u64) {
        let extent = bounds.extent();
        let width = (extent.x / tile_size).ceil().max(1.0) as u64;
        let height = (extent.z / tile_size).ceil().max(1.0) as u64;
        (width, height)
    }

    pub fn tile_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    pub fn tile_index(&self, x: u32, z: u32) -> usize {
        z as usize * self.width as usize + x as usize
    }

    pub fn in_bounds(&self, x: i64, z: i64) -> bool {
        x >= 0 && z >= 0 && x < self.width as i64 && z < self.height as i64
    }

    /// World XZ to tile coordinates; points outside the grid are clamped.
    pub fn world_to_tile(&self, x: f32, z: f32) -> (u32, u32) {
        let fx = ((x - self.origin.x) / self.tile_size).floor();
        let fz = ((z - self.origin.z) / self.tile_size).floor();
        let tx = (fx as i64).clamp(0, self.width.saturating_sub(1) as i64) as u32;
        let tz = (fz as i64).clamp(0, self.height.saturating_sub(1) as i64) as u32;
        (tx, tz)
    }

    pub fn tile_center(&self, x: u32, z: u32) -> Vec2 {
        Vec2::new(
            self.origin.x + (x as f32 + 0.5) * self.tile_size,
            self.origin.z + (z as f32 + 0.5) * self.tile_size,
        )
    }

    pub fn tile_bounds(&self, x: u32, z: u32) -> Aabb {
        let min_x = self.origin.x + x as f32 * self.tile_size;
        let min_z = self.origin.z + z as f32 * self.tile_size;
        Aabb::new(
            Vec3::new(min_x, self.min_height, min_z),
            Vec3::new(min_x + self.tile_size, self.max_height, min_z + self.tile_size),
        )
    }

    pub fn bounds(&self) -> Aabb {
        Aabb::new(
            Vec3::new(self.origin.x, self.min_height, self.origin.z),
            Vec3::new(
                self.origin.x + self.width as f32 * self.tile_size,
                self.max_height,
                self.origin.z + self.height as f32 * self.tile_size,
            ),
        )
    }
}

// ============================================================================
// Query / damage results
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LevelHit {
    pub tile_x: u32,
    pub tile_z: u32,
    /// Position of the level inside its tile.
    pub level: u32,
    /// Index into the map's level array.
    pub level_index: usize,
    pub floor_height: f32,
    /// False when no level matched and the topmost level was returned.
    pub matched: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DamagedLevel {
    pub tile_x: u32,
    pub tile_z: u32,
    pub level: u32,
    pub integrity: i32,
    pub destroyed: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DamageReport {
    pub tiles_visited: usize,
    pub levels: Vec<DamagedLevel>,
}

impl DamageReport {
    pub fn destroyed_count(&self) -> usize {
        self.levels.iter().filter(|l| l.destroyed).count()
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MapStats {
    pub tiles: usize,
    pub occupied_tiles: usize,
    pub levels: usize,
    pub max_levels_per_tile: u32,
    pub destructible_levels: usize,
    pub structural_levels: usize,
    pub destroyed_levels: usize,
}

struct DamageWork {
    x: u32,
    z: u32,
    /// Vertical ranges to damage; a level is hit if it overlaps any of them.
    spans: Vec<(f32, f32)>,
}

impl DamageWork {
    fn hits(&self, level: &TileLevel) -> bool {
        self.spans.iter().any(|&(min_y, max_y)| level.overlaps_span(min_y, max_y))
    }
}

fn pack_tile_key(x: u32, z: u32) -> u32 {
    (x << 16) | (z & 0xFFFF)
}

// ============================================================================
// TacticalMap
// ============================================================================

#[derive(Clone, Debug)]
pub struct TacticalMap {
    grid: MapGrid,
    metadata_size: u32,
    tiles: Vec<Tile>,
    levels: Vec<TileLevel>,
    level_data: Vec<LevelData>,
}

impl TacticalMap {
    /// Assemble a map from its arrays and check the cross references.
    pub fn from_parts(
        grid: MapGrid,
        metadata_size: u32,
        tiles: Vec<Tile>,
        levels: Vec<TileLevel>,
        level_data: Vec<LevelData>,
    ) -> Result<Self, MapError> {
        let map = Self {
            grid,
            metadata_size,
            tiles,
            levels,
            level_data,
        };
        map.verify_level_indices()?;
        Ok(map)
    }

    pub fn grid(&self) -> &MapGrid {
        &self.grid
    }

    pub fn width(&self) -> u32 {
        self.grid.width
    }

    pub fn height(&self) -> u32 {
        self.grid.height
    }

    pub fn metadata_size(&self) -> u32 {
        self.metadata_size
    }

    pub fn tiles(&self) -> &[Tile] {
        &self.tiles
    }

    pub fn levels(&self) -> &[TileLevel] {
        &self.levels
    }

    pub fn level_data(&self) -> &[LevelData] {
        &self.level_data
    }

    pub fn tile(&self, x: u32, z: u32) -> Option<&Tile> {
        if !self.grid.in_bounds(x as i64, z as i64) {
            return None;
        }
        self.tiles.get(self.grid.tile_index(x, z))
    }

    /// Levels of a tile, bottom to top.
    pub fn tile_levels(&self, x: u32, z: u32) -> &[TileLevel] {
        match self.tile(x, z) {
            Some(tile) => {
                let start = tile.level_start as usize;
                &self.levels[start..start + tile.level_count as usize]
            }
            None => &[],
        }
    }

    pub fn level_header(&self, level_index: usize) -> Option<&LevelData> {
        self.levels
            .get(level_index)
            .and_then(|level| self.level_data.get(level.data_index as usize))
    }

    /// Floor height of a level of tile `(x, z)` at world position `(wx, wz)`.
    pub fn floor_height_at(&self, x: u32, z: u32, level: &TileLevel, wx: f32, wz: f32) -> f32 {
        let center = self.grid.tile_center(x, z);
        level.floor.height_at(wx - center.x, wz - center.y)
    }

    /// Find the level a point stands on.
    ///
    /// Levels are scanned bottom to top, skipping destroyed ones and those
    /// whose layer bit is not in `level_mask`; the first whose floor lies in
    /// `[point.y - range, point.y + range]` wins. Without a match the topmost
    /// level of the tile is returned, so a tile with levels always answers.
    pub fn lookup_at_world(&self, point: Vec3, range: f32, level_mask: u32) -> Option<LevelHit> {
        let (tile_x, tile_z) = self.grid.world_to_tile(point.x, point.z);
        let tile = *self.tile(tile_x, tile_z)?;
        if tile.level_count == 0 {
            return None;
        }

        let start = tile.level_start as usize;
        for level_num in 0..tile.level_count {
            let level_index = start + level_num as usize;
            let level = &self.levels[level_index];
            let Some(data) = self.level_data.get(level.data_index as usize) else {
                continue;
            };
            if data.header.is_destroyed() || (data.header.layer_mask() & level_mask) == 0 {
                continue;
            }
            let floor_height = self.floor_height_at(tile_x, tile_z, level, point.x, point.z);
            if floor_height >= point.y - range && floor_height <= point.y + range {
                return Some(LevelHit {
                    tile_x,
                    tile_z,
                    level: level_num,
                    level_index,
                    floor_height,
                    matched: true,
                });
            }
        }

        let level_num = tile.level_count - 1;
        let level_index = start + level_num as usize;
        let level = &self.levels[level_index];
        Some(LevelHit {
            tile_x,
            tile_z,
            level: level_num,
            level_index,
            floor_height: self.floor_height_at(tile_x, tile_z, level, point.x, point.z),
            matched: false,
        })
    }

    /// Apply a damage event covering `damage`.
    ///
    /// Every Floor/Wall level intersected loses one integrity point. A level
    /// falling below `COLLAPSE_THRESHOLD` is destroyed and pushes its four
    /// cardinal neighbour tiles, which are damaged on the levels overlapping
    /// the collapsed level's vertical span. Each tile is visited at most once
    /// per event; a tile still waiting on the stack collects the spans of
    /// every collapse that reaches it.
    pub fn damage_structure(&mut self, damage: &Aabb) -> DamageReport {
        let mut report = DamageReport::default();
        if self.tiles.is_empty() {
            return report;
        }

        let bounds = self.grid.bounds();
        if damage.max.x < bounds.min.x
            || damage.min.x > bounds.max.x
            || damage.max.z < bounds.min.z
            || damage.min.z > bounds.max.z
        {
            debug!("Damage event outside the map, ignored");
            return report;
        }
        let (x0, z0) = self.grid.world_to_tile(damage.min.x, damage.min.z);
        let (x1, z1) = self.grid.world_to_tile(damage.max.x, damage.max.z);

        let mut visited: HashSet<u32> = HashSet::new();
        // Packed tile key -> position on the stack, for tiles not yet popped.
        let mut pending: HashMap<u32, usize> = HashMap::new();
        let mut stack: Vec<DamageWork> = Vec::new();
        for z in z0..=z1 {
            for x in x0..=x1 {
                let key = pack_tile_key(x, z);
                visited.insert(key);
                pending.insert(key, stack.len());
                stack.push(DamageWork {
                    x,
                    z,
                    spans: vec![(damage.min.y, damage.max.y)],
                });
            }
        }

        while let Some(work) = stack.pop() {
            pending.remove(&pack_tile_key(work.x, work.z));
            report.tiles_visited += 1;
            let tile = self.tiles[self.grid.tile_index(work.x, work.z)];
            let mut collapsed_spans = Vec::new();

            for level_num in 0..tile.level_count {
                let level = self.levels[(tile.level_start + level_num) as usize];
                if !work.hits(&level) {
                    continue;
                }
                let Some(data) = self.level_data.get_mut(level.data_index as usize) else {
                    continue;
                };
                let header = &mut data.header;
                if header.is_destroyed() || !header.structural_type.is_damageable() {
                    continue;
                }

                header.structural_integrity = (header.structural_integrity - 1).max(0);
                let collapsed = header.structural_integrity < COLLAPSE_THRESHOLD;
                if collapsed {
                    header.set_flag(LEVEL_FLAG_DESTROYED, true);
                    collapsed_spans.push((level.base_height, level.top_height().min(self.grid.max_height)));
                }
                report.levels.push(DamagedLevel {
                    tile_x: work.x,
                    tile_z: work.z,
                    level: level_num,
                    integrity: header.structural_integrity,
                    destroyed: collapsed,
                });
            }

            if collapsed_spans.is_empty() {
                continue;
            }
            for (dx, dz) in [(-1i64, 0i64), (1, 0), (0, -1), (0, 1)] {
                let nx = work.x as i64 + dx;
                let nz = work.z as i64 + dz;
                if !self.grid.in_bounds(nx, nz) {
                    continue;
                }
                let (nx, nz) = (nx as u32, nz as u32);
                let key = pack_tile_key(nx, nz);
                if let Some(&slot) = pending.get(&key) {
                    stack[slot].spans.extend_from_slice(&collapsed_spans);
                } else if visited.insert(key) {
                    pending.insert(key, stack.len());
                    stack.push(DamageWork {
                        x: nx,
                        z: nz,
                        spans: collapsed_spans.clone(),
                    });
                }
            }
        }

        debug!(
            "Damage event: {} tiles visited, {} levels damaged, {} destroyed",
            report.tiles_visited,
            report.levels.len(),
            report.destroyed_count()
        );
        report
    }

    /// Check that every tile's level range is in bounds and that each level's
    /// stored index equals its position inside its tile.
    pub fn verify_level_indices(&self) -> Result<(), MapError> {
        if self.tiles.len() != self.grid.tile_count() {
            return Err(MapError::TileCountMismatch {
                expected: self.grid.tile_count(),
                actual: self.tiles.len(),
            });
        }
        for (tile_idx, tile) in self.tiles.iter().enumerate() {
            let start = tile.level_start as usize;
            let end = start + tile.level_count as usize;
            if end > self.levels.len() {
                return Err(MapError::LevelRangeOutOfBounds {
                    tile: tile_idx,
                    start: tile.level_start,
                    count: tile.level_count,
                    levels: self.levels.len(),
                });
            }
            for (position, level_index) in (start..end).enumerate() {
                let level = &self.levels[level_index];
                let data = self.level_data.get(level.data_index as usize).ok_or(
                    MapError::DataIndexOutOfBounds {
                        level: level_index,
                        data_index: level.data_index,
                    },
                )?;
                if data.header.level_num as usize != position {
                    return Err(MapError::LevelIndexMismatch {
                        tile: tile_idx,
                        position,
                        stored: data.header.level_num,
                    });
                }
            }
        }
        Ok(())
    }

    pub fn stats(&self) -> MapStats {
        let mut stats = MapStats {
            tiles: self.tiles.len(),
            levels: self.levels.len(),
            ..Default::default()
        };
        for tile in &self.tiles {
            if tile.level_count > 0 {
                stats.occupied_tiles += 1;
            }
            stats.max_levels_per_tile = stats.max_levels_per_tile.max(tile.level_count);
        }
        for level in &self.levels {
            let Some(data) = self.level_data.get(level.data_index as usize) else {
                continue;
            };
            if data.header.has_flag(LEVEL_FLAG_DESTRUCTIBLE) {
                stats.destructible_levels += 1;
            }
            if data.header.has_flag(LEVEL_FLAG_STRUCTURAL) {
                stats.structural_levels += 1;
            }
            if data.header.is_destroyed() {
                stats.destroyed_levels += 1;
            }
        }
        stats
    }
}
