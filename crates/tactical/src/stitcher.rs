// stitcher.rs - Compose pre-built maps into one
//
// Each instance places a finished map (a parcel) in the destination grid
// with a quarter-turn rotation about Y. The parcel's rotated footprint puts
// its minimum corner at the instance position's XZ (snapped to the tile
// grid); the Y component raises every height of the parcel.
//
// Level records and level data are copied as-is (planes are tile-local, so
// only a rotation of the normals and a vertical shift are needed); the tile
// grid is remapped cell by cell and every level start / data index is
// rebased past the levels already copied.

use glam::Vec3;
use tracing::{debug, info};

use crate::map::{MAX_GRID_DIMENSION, MapError, MapGrid, TacticalMap, Tile, TileLevel};
use crate::math::Aabb;
use crate::metadata::LevelData;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Rotation {
    #[default]
    R0,
    R90,
    R180,
    R270,
}

impl Rotation {
    pub fn from_degrees(degrees: i32) -> Option<Self> {
        match degrees.rem_euclid(360) {
            0 => Some(Self::R0),
            90 => Some(Self::R90),
            180 => Some(Self::R180),
            270 => Some(Self::R270),
            _ => None,
        }
    }

    pub fn quarter_turns(self) -> u32 {
        match self {
            Self::R0 => 0,
            Self::R90 => 1,
            Self::R180 => 2,
            Self::R270 => 3,
        }
    }

    /// Footprint of a `width` x `height` grid after rotation.
    pub fn rotated_size(self, width: u32, height: u32) -> (u32, u32) {
        match self {
            Self::R0 | Self::R180 => (width, height),
            Self::R90 | Self::R270 => (height, width),
        }
    }

    /// Where cell `(x, z)` of a `width` x `height` grid lands after rotation
    /// (+X turns towards +Z).
    pub fn rotate_cell(self, x: u32, z: u32, width: u32, height: u32) -> (u32, u32) {
        match self {
            Self::R0 => (x, z),
            Self::R90 => (height - 1 - z, x),
            Self::R180 => (width - 1 - x, height - 1 - z),
            Self::R270 => (z, width - 1 - x),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StitchError {
    #[error("no instances to stitch")]
    NoInstances,
    #[error("parcel {parcel} has tile size {found}, expected {expected}")]
    TileSizeMismatch { parcel: u32, expected: f32, found: f32 },
    #[error("stitched grid of {width}x{height} tiles exceeds the {max} tile coordinate limit")]
    GridTooLarge { width: u64, height: u64, max: u32 },
    #[error("parcel {parcel} overlaps occupied tile {x},{z}")]
    Overlap { parcel: u32, x: u32, z: u32 },
    #[error("parcel {parcel}: {source}")]
    Invalid {
        parcel: u32,
        #[source]
        source: MapError,
    },
    #[error(transparent)]
    Map(#[from] MapError),
}

struct Instance<'a> {
    map: &'a TacticalMap,
    position: Vec3,
    rotation: Rotation,
    parcel_id: u32,
}

impl Instance<'_> {
    fn footprint(&self) -> Aabb {
        let grid = self.map.grid();
        let (width, height) = self.rotation.rotated_size(grid.width, grid.height);
        Aabb::new(
            Vec3::new(self.position.x, grid.min_height + self.position.y, self.position.z),
            Vec3::new(
                self.position.x + width as f32 * grid.tile_size,
                grid.max_height + self.position.y,
                self.position.z + height as f32 * grid.tile_size,
            ),
        )
    }
}

#[derive(Default)]
pub struct Stitcher<'a> {
    instances: Vec<Instance<'a>>,
}

impl<'a> Stitcher<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn instance_count(&self) -> usize {
        self.instances.len()
    }

    /// Queue `map` for placement; inputs are never modified.
    pub fn add_instance(&mut self, map: &'a TacticalMap, position: Vec3, rotation: Rotation, parcel_id: u32) {
        self.instances.push(Instance {
            map,
            position,
            rotation,
            parcel_id,
        });
    }

    fn destination_grid(&self) -> Result<MapGrid, StitchError> {
        let first = self.instances.first().ok_or(StitchError::NoInstances)?;
        let tile_size = first.map.grid().tile_size;

        let mut bounds = Aabb::EMPTY;
        for instance in &self.instances {
            let found = instance.map.grid().tile_size;
            if found != tile_size {
                return Err(StitchError::TileSizeMismatch {
                    parcel: instance.parcel_id,
                    expected: tile_size,
                    found,
                });
            }
            bounds.merge(&instance.footprint());
        }

        let (width, height) = MapGrid::dimensions_for(&bounds, tile_size);
        if width > MAX_GRID_DIMENSION as u64 || height > MAX_GRID_DIMENSION as u64 {
            return Err(StitchError::GridTooLarge {
                width,
                height,
                max: MAX_GRID_DIMENSION,
            });
        }

        Ok(MapGrid {
            width: width as u32,
            height: height as u32,
            tile_size,
            origin: bounds.min,
            min_height: bounds.min.y,
            max_height: bounds.max.y,
        })
    }

    /// Combine every queued instance into a new map.
    pub fn build(&self) -> Result<TacticalMap, StitchError> {
        let grid = self.destination_grid()?;
        let level_total: usize = self.instances.iter().map(|i| i.map.levels().len()).sum();
        let data_total: usize = self.instances.iter().map(|i| i.map.level_data().len()).sum();
        let metadata_size = self.instances.iter().map(|i| i.map.metadata_size()).max().unwrap_or(0);

        info!(
            "Stitching {} parcels into {}x{} tiles ({} levels)",
            self.instances.len(),
            grid.width,
            grid.height,
            level_total
        );

        let mut tiles = vec![Tile::default(); grid.tile_count()];
        let mut levels: Vec<TileLevel> = Vec::with_capacity(level_total);
        let mut level_data: Vec<LevelData> = Vec::with_capacity(data_total);

        for instance in &self.instances {
            let parcel = instance.parcel_id;
            instance
                .map
                .verify_level_indices()
                .map_err(|source| StitchError::Invalid { parcel, source })?;

            let level_offset = levels.len() as u32;
            let data_offset = level_data.len() as u32;
            let turns = instance.rotation.quarter_turns();
            let dy = instance.position.y;

            levels.extend(instance.map.levels().iter().map(|level| TileLevel {
                floor: level.floor.rotated_quarter_turns(turns).raised(dy),
                ceiling: level.ceiling.rotated_quarter_turns(turns).raised(dy),
                base_height: level.base_height + dy,
                roof_delta: level.roof_delta,
                data_index: level.data_index + data_offset,
                reserved: level.reserved,
            }));
            level_data.extend(instance.map.level_data().iter().map(|data| {
                let mut data = data.resized(metadata_size as usize);
                data.header.instance_id = parcel;
                data
            }));

            let source = instance.map.grid();
            let offset_x = ((instance.position.x - grid.origin.x) / grid.tile_size).round() as i64;
            let offset_z = ((instance.position.z - grid.origin.z) / grid.tile_size).round() as i64;
            for z in 0..source.height {
                for x in 0..source.width {
                    let Some(tile) = instance.map.tile(x, z) else {
                        continue;
                    };
                    let (rx, rz) = instance.rotation.rotate_cell(x, z, source.width, source.height);
                    let (dx, dz) = (offset_x + rx as i64, offset_z + rz as i64);
                    if !grid.in_bounds(dx, dz) {
                        continue;
                    }
                    let (dx, dz) = (dx as u32, dz as u32);

                    let index = grid.tile_index(dx, dz);
                    let slot = &mut tiles[index];
                    if tile.level_count == 0 {
                        continue;
                    }
                    if slot.level_count > 0 {
                        return Err(StitchError::Overlap { parcel, x: dx, z: dz });
                    }
                    *slot = Tile {
                        level_count: tile.level_count,
                        level_start: tile.level_start + level_offset,
                    };
                    verify_tile(index, slot, &levels, &level_data)
                        .map_err(|source| StitchError::Invalid { parcel, source })?;
                }
            }
            debug!(
                "Parcel {} copied: {} levels at tile offset {},{} rotated {:?}",
                parcel,
                instance.map.levels().len(),
                offset_x,
                offset_z,
                instance.rotation
            );
        }

        Ok(TacticalMap::from_parts(grid, metadata_size, tiles, levels, level_data)?)
    }
}

/// Level-number check for one copied tile.
fn verify_tile(index: usize, tile: &Tile, levels: &[TileLevel], level_data: &[LevelData]) -> Result<(), MapError> {
    let start = tile.level_start as usize;
    for position in 0..tile.level_count as usize {
        let level = levels.get(start + position).ok_or(MapError::LevelRangeOutOfBounds {
            tile: index,
            start: tile.level_start,
            count: tile.level_count,
            levels: levels.len(),
        })?;
        let data = level_data
            .get(level.data_index as usize)
            .ok_or(MapError::DataIndexOutOfBounds {
                level: start + position,
                data_index: level.data_index,
            })?;
        if data.header.level_num as usize != position {
            return Err(MapError::LevelIndexMismatch {
                tile: index,
                position,
                stored: data.header.level_num,
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::map::ALL_LAYERS;
    use crate::map::tests::{flat_level, uniform_map};
    use crate::math::Plane;
    use crate::metadata::{LevelDataHeader, StructuralType};

    fn header(level_num: u16) -> LevelData {
        LevelData::new(
            LevelDataHeader {
                level_num,
                instance_id: 1,
                ..Default::default()
            },
            Vec::new(),
        )
    }

    /// 2x1 map: tile (0,0) has one sloped level, tile (1,0) two flat ones.
    fn strip_map() -> TacticalMap {
        let grid = MapGrid {
            width: 2,
            height: 1,
            tile_size: 1.0,
            origin: Vec3::ZERO,
            min_height: 0.0,
            max_height: 6.0,
        };
        let mut sloped = flat_level(0.0, 3.0, 0);
        sloped.floor = Plane::new(Vec3::new(0.6, 0.8, 0.0), -0.8);
        TacticalMap::from_parts(
            grid,
            0,
            vec![
                Tile {
                    level_count: 1,
                    level_start: 0,
                },
                Tile {
                    level_count: 2,
                    level_start: 1,
                },
            ],
            vec![sloped, flat_level(0.0, 3.0, 1), flat_level(3.0, 3.0, 2)],
            vec![header(0), header(0), header(1)],
        )
        .unwrap()
    }

    #[test]
    fn test_rotation_cells() {
        assert_eq!(Rotation::from_degrees(-90), Some(Rotation::R270));
        assert_eq!(Rotation::from_degrees(45), None);
        // 3x2 grid.
        assert_eq!(Rotation::R90.rotate_cell(0, 0, 3, 2), (1, 0));
        assert_eq!(Rotation::R90.rotate_cell(2, 1, 3, 2), (0, 2));
        assert_eq!(Rotation::R180.rotate_cell(0, 0, 3, 2), (2, 1));
        assert_eq!(Rotation::R270.rotate_cell(0, 0, 3, 2), (0, 2));
        assert_eq!(Rotation::R90.rotated_size(3, 2), (2, 3));
    }

    #[test]
    fn test_two_parcels_level_count_and_ids() {
        let parcel = uniform_map(1, 1, &[(0.0, 3.0), (3.0, 3.0)], StructuralType::Wall, 4);
        let mut stitcher = Stitcher::new();
        stitcher.add_instance(&parcel, Vec3::ZERO, Rotation::R0, 7);
        stitcher.add_instance(&parcel, Vec3::new(5.0, 0.0, 0.0), Rotation::R180, 8);
        let map = stitcher.build().unwrap();

        assert_eq!((map.width(), map.height()), (6, 1));
        assert_eq!(map.levels().len(), 2 * parcel.levels().len());
        map.verify_level_indices().unwrap();

        for (x, parcel_id) in [(0, 7), (5, 8)] {
            let tile = *map.tile(x, 0).unwrap();
            assert_eq!(tile.level_count, 2);
            for index in tile.level_start..tile.level_start + tile.level_count {
                assert_eq!(map.level_header(index as usize).unwrap().header.instance_id, parcel_id);
            }
        }
        assert_eq!(map.tile(2, 0).unwrap().level_count, 0);
        // Inputs are untouched.
        assert_eq!(parcel.level_data()[0].header.instance_id, 0);
    }

    #[test]
    fn test_rotation_moves_cells_and_planes() {
        let parcel = strip_map();
        let mut stitcher = Stitcher::new();
        stitcher.add_instance(&parcel, Vec3::new(10.0, 2.0, 20.0), Rotation::R90, 3);
        let map = stitcher.build().unwrap();

        assert_eq!((map.width(), map.height()), (1, 2));
        assert_eq!(map.grid().origin, Vec3::new(10.0, 2.0, 20.0));
        assert_eq!(map.tile(0, 0).unwrap().level_count, 1);
        assert_eq!(map.tile(0, 1).unwrap().level_count, 2);

        let sloped = &map.tile_levels(0, 0)[0];
        assert!(sloped.floor.normal.x.abs() < 1e-6);
        assert!((sloped.floor.normal.z - 0.6).abs() < 1e-6);
        assert!((sloped.floor.height_at(0.0, 0.0) - 3.0).abs() < 1e-5);
        assert!((sloped.base_height - 2.0).abs() < 1e-6);

        let hit = map.lookup_at_world(Vec3::new(10.5, 5.0, 21.5), 0.1, ALL_LAYERS).unwrap();
        assert!(hit.matched);
        assert_eq!(hit.level, 1);
    }

    #[test]
    fn test_stitch_errors() {
        assert!(matches!(Stitcher::new().build(), Err(StitchError::NoInstances)));

        let parcel = uniform_map(2, 2, &[(0.0, 3.0)], StructuralType::Floor, 2);
        let mut overlapping = Stitcher::new();
        overlapping.add_instance(&parcel, Vec3::ZERO, Rotation::R0, 1);
        overlapping.add_instance(&parcel, Vec3::new(1.0, 0.0, 0.0), Rotation::R0, 2);
        assert!(matches!(
            overlapping.build(),
            Err(StitchError::Overlap { parcel: 2, x: 1, z: 0 })
        ));

        let fine = uniform_map(1, 1, &[(0.0, 3.0)], StructuralType::Floor, 2);
        let coarse = TacticalMap::from_parts(
            MapGrid {
                tile_size: 2.0,
                ..*fine.grid()
            },
            0,
            fine.tiles().to_vec(),
            fine.levels().to_vec(),
            fine.level_data().to_vec(),
        )
        .unwrap();
        let mut mixed = Stitcher::new();
        mixed.add_instance(&parcel, Vec3::ZERO, Rotation::R0, 1);
        mixed.add_instance(&coarse, Vec3::new(10.0, 0.0, 0.0), Rotation::R0, 2);
        assert!(matches!(mixed.build(), Err(StitchError::TileSizeMismatch { parcel: 2, .. })));
    }
}
