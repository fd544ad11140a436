// builder - Offline tactical map builder
//
// Pipeline (one fork-join phase per step, barrier in between):
//   1. binning     - solids (and mesh polygons) are assigned to grid tiles
//   2. sampler     - 16x16 vertical rays per tile, parity-filtered fragments
//   3. fitting     - outlier rejection, map-wide smoothing, plane fitting
//   4. structural  - solid bonds, integrity scores, destructible baking
//   5. assembly    - single-threaded packing into an immutable TacticalMap

mod binning;
mod fitting;
mod sampler;
mod structural;

use std::time::Instant;

use glam::{Affine3A, Vec3};
use tracing::{debug, info, warn};

use crate::executor::Executor;
use crate::map::{MAX_GRID_DIMENSION, MapError, MapGrid, TacticalMap, Tile, TileLevel};
use crate::math::Aabb;
use crate::mesh::{MeshSource, TriMesh};
use crate::metadata::{
    LEVEL_FLAG_DESTROYED, LEVEL_FLAG_DESTRUCTIBLE, LEVEL_FLAG_ROOF_VALID, LEVEL_FLAG_STRUCTURAL, LevelData,
    MAX_METADATA_SIZE, StructuralType,
};

pub use sampler::{MAX_LEVELS_PER_TILE, RAYS_PER_TILE, SUBSAMPLES_PER_AXIS, TileError};
pub use structural::CardinalDirection;

use binning::BuildTile;

// ============================================================================
// Configuration
// ============================================================================

#[derive(Clone, Debug, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BuilderConfig {
    /// World units per tile along X and Z.
    #[serde(default = "default_tile_size")]
    pub tile_size: f32,
    /// Height every sampling ray starts from.
    #[serde(default = "default_min_ray_height")]
    pub min_ray_height: f32,
    /// Surfaces steeper than this (degrees from horizontal) are ignored when
    /// computing layer statistics.
    #[serde(default = "default_max_floor_inclination")]
    pub max_floor_inclination_deg: f32,
    /// Opaque payload bytes carried after each level header.
    #[serde(default)]
    pub metadata_size: u32,
    /// Explicit grid bounds; defaults to the union of all solids.
    #[serde(skip)]
    pub bounds: Option<Aabb>,
}

fn default_tile_size() -> f32 { 1.0 }
fn default_min_ray_height() -> f32 { -1000.0 }
fn default_max_floor_inclination() -> f32 { 60.0 }

impl Default for BuilderConfig {
    fn default() -> Self {
        Self {
            tile_size: default_tile_size(),
            min_ray_height: default_min_ray_height(),
            max_floor_inclination_deg: default_max_floor_inclination(),
            metadata_size: 0,
            bounds: None,
        }
    }
}

impl BuilderConfig {
    /// Minimum |normal.y| of a surface counted as floor or ceiling.
    pub(crate) fn min_normal_y(&self) -> f32 {
        self.max_floor_inclination_deg.clamp(0.0, 90.0).to_radians().cos()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("scene contains no solids")]
    EmptyScene,
    #[error("invalid tile size {0}")]
    InvalidTileSize(f32),
    #[error("scene bounds are not finite")]
    NonFiniteBounds,
    #[error("metadata size {size} exceeds the {max} byte limit")]
    MetadataTooLarge { size: u32, max: u32 },
    #[error("grid of {width}x{height} tiles exceeds the {max} tile coordinate limit")]
    GridTooLarge { width: u64, height: u64, max: u32 },
    #[error(transparent)]
    Map(#[from] MapError),
}

// ============================================================================
// Solids
// ============================================================================

/// Stable handle of a solid inside one builder.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SolidIndex(pub u32);

impl SolidIndex {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Clone, Debug)]
pub(crate) struct Solid {
    /// `None` for boxes.
    pub mesh: Option<TriMesh>,
    pub bounds: Aabb,
    pub metadata: LevelData,
}

impl Solid {
    pub fn is_destructible(&self) -> bool {
        self.metadata.header.has_flag(LEVEL_FLAG_DESTRUCTIBLE)
    }
}

// ============================================================================
// Builder
// ============================================================================

#[derive(Default)]
pub struct TacticalMapBuilder {
    config: BuilderConfig,
    solids: Vec<Solid>,
}

impl TacticalMapBuilder {
    pub fn new(config: BuilderConfig) -> Self {
        Self {
            config,
            solids: Vec::new(),
        }
    }

    pub fn config(&self) -> &BuilderConfig {
        &self.config
    }

    pub fn solid_count(&self) -> usize {
        self.solids.len()
    }

    pub fn set_min_ray_height(&mut self, height: f32) {
        self.config.min_ray_height = height;
    }

    pub fn set_max_floor_inclination(&mut self, degrees: f32) {
        self.config.max_floor_inclination_deg = degrees;
    }

    pub fn set_metadata_size(&mut self, size: u32) {
        self.config.metadata_size = size;
    }

    pub fn set_tile_size(&mut self, tile_size: f32) {
        self.config.tile_size = tile_size;
    }

    pub fn set_bounds(&mut self, bounds: Option<Aabb>) {
        self.config.bounds = bounds;
    }

    /// Register a mesh solid placed with `transform`.
    pub fn add_mesh_at<M: MeshSource>(&mut self, mesh: &M, transform: &Affine3A, metadata: &LevelData) -> SolidIndex {
        let mesh = mesh.transformed(transform);
        let bounds = mesh.bounds();
        self.push_solid(Solid {
            mesh: Some(mesh),
            bounds,
            metadata: metadata.clone(),
        })
    }

    /// Register a box solid; the world AABB of the transformed box is used.
    pub fn add_box_at(&mut self, local_bounds: &Aabb, transform: &Affine3A, metadata: &LevelData) -> SolidIndex {
        let (lo, hi) = (local_bounds.min, local_bounds.max);
        let corners = (0..8).map(|i| {
            Vec3::new(
                if i & 1 == 0 { lo.x } else { hi.x },
                if i & 2 == 0 { lo.y } else { hi.y },
                if i & 4 == 0 { lo.z } else { hi.z },
            )
        });
        let bounds = Aabb::from_points(corners.map(|c| transform.transform_point3(c)));
        self.push_solid(Solid {
            mesh: None,
            bounds,
            metadata: metadata.clone(),
        })
    }

    fn push_solid(&mut self, solid: Solid) -> SolidIndex {
        let index = SolidIndex(self.solids.len() as u32);
        self.solids.push(solid);
        index
    }

    /// Grid covering the configured (or computed) bounds.
    fn grid(&self) -> Result<MapGrid, BuildError> {
        let tile_size = self.config.tile_size;
        if !(tile_size.is_finite() && tile_size > 0.0) {
            return Err(BuildError::InvalidTileSize(tile_size));
        }

        let bounds = match self.config.bounds {
            Some(bounds) => bounds,
            None => {
                let mut bounds = Aabb::EMPTY;
                for solid in &self.solids {
                    bounds.merge(&solid.bounds);
                }
                bounds
            }
        };
        if bounds.is_empty() || !bounds.min.is_finite() || !bounds.max.is_finite() {
            return Err(BuildError::NonFiniteBounds);
        }

        let (width, height) = MapGrid::dimensions_for(&bounds, tile_size);
        if width > MAX_GRID_DIMENSION as u64 || height > MAX_GRID_DIMENSION as u64 {
            return Err(BuildError::GridTooLarge {
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

    /// Run the whole pipeline.
    pub fn build(&self, executor: &Executor) -> Result<TacticalMap, BuildError> {
        if self.solids.is_empty() {
            return Err(BuildError::EmptyScene);
        }
        if self.config.metadata_size > MAX_METADATA_SIZE {
            return Err(BuildError::MetadataTooLarge {
                size: self.config.metadata_size,
                max: MAX_METADATA_SIZE,
            });
        }
        let grid = self.grid()?;
        info!(
            "Building tactical map: {} solids, {}x{} tiles of {} units, {} thread(s)",
            self.solids.len(),
            grid.width,
            grid.height,
            grid.tile_size,
            executor.threads()
        );

        let started = Instant::now();
        let mut tiles = binning::bin_solids(&self.solids, &grid);
        debug!("Binning done in {:?}", started.elapsed());

        let phase = Instant::now();
        self.sample(executor, &grid, &mut tiles);
        debug!("Height sampling done in {:?}", phase.elapsed());

        let phase = Instant::now();
        fitting::fit_layers(executor, &grid, &mut tiles, &self.config);
        debug!("Smoothing and plane fitting done in {:?}", phase.elapsed());

        let phase = Instant::now();
        structural::analyze(executor, &grid, &mut tiles, &self.solids);
        debug!("Structural analysis done in {:?}", phase.elapsed());

        let map = self.assemble(grid, &tiles)?;
        let stats = map.stats();
        info!(
            "Tactical map built in {:?}: {} levels over {}/{} tiles (max {} per tile)",
            started.elapsed(),
            stats.levels,
            stats.occupied_tiles,
            stats.tiles,
            stats.max_levels_per_tile
        );
        Ok(map)
    }

    fn sample(&self, executor: &Executor, grid: &MapGrid, tiles: &mut [BuildTile]) {
        let min_ray_height = self.config.min_ray_height;
        executor.for_each_mut(tiles, |_, tile| {
            if let Err(err) = sampler::sample_tile(tile, &self.solids, grid, min_ray_height) {
                warn!("Tile {},{} dropped: {}", tile.x, tile.z, err);
                tile.clear_samples();
            }
        });
    }

    /// Pack the tiles into the runtime arrays. Tiles are already in
    /// row-major (z * width + x) order.
    fn assemble(&self, grid: MapGrid, tiles: &[BuildTile]) -> Result<TacticalMap, BuildError> {
        let metadata_size = self.config.metadata_size as usize;
        let level_total: usize = tiles.iter().map(|t| t.layers.len()).sum();

        let mut runtime_tiles = Vec::with_capacity(tiles.len());
        let mut levels = Vec::with_capacity(level_total);
        let mut level_data = Vec::with_capacity(level_total);

        for tile in tiles {
            runtime_tiles.push(Tile {
                level_count: tile.layers.len() as u32,
                level_start: levels.len() as u32,
            });

            for (level_num, layer) in tile.layers.iter().enumerate() {
                // Headers come from the floor's solid; an unsampled floor falls
                // back to the roof's.
                let mut data = match layer.floor_solid.or(layer.ceiling_solid) {
                    Some(solid) => self.solids[solid.index()].metadata.resized(metadata_size),
                    None => LevelData::new(Default::default(), vec![0; metadata_size]),
                };

                let header = &mut data.header;
                header.level_num = level_num as u16;
                header.set_flag(LEVEL_FLAG_DESTROYED, false);
                header.set_flag(LEVEL_FLAG_ROOF_VALID, layer.ceiling.is_valid());
                header.set_flag(LEVEL_FLAG_DESTRUCTIBLE, !layer.destructibles.is_empty());
                let (structural_type, integrity) = layer.structure.unwrap_or((StructuralType::NotStructural, 0));
                header.structural_type = structural_type;
                header.structural_integrity = integrity;
                header.set_flag(LEVEL_FLAG_STRUCTURAL, structural_type != StructuralType::NotStructural);

                levels.push(TileLevel {
                    floor: layer.floor,
                    ceiling: layer.ceiling,
                    base_height: layer.base_height,
                    roof_delta: layer.roof_delta,
                    data_index: level_data.len() as u32,
                    reserved: 0,
                });
                level_data.push(data);
            }
        }

        Ok(TacticalMap::from_parts(
            grid,
            self.config.metadata_size,
            runtime_tiles,
            levels,
            level_data,
        )?)
    }
}
