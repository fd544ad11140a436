// fitting.rs - Layer statistics, smoothing and plane fitting
//
// Runs after every tile has been sampled:
//   1. per tile and layer: mean / standard deviation of floor and ceiling
//      heights over near-horizontal fragments, plus the dominant solid
//   2. per layer index: a map-wide field of accepted samples, smoothed by
//      a 3x3 average over valid neighbours (so tile seams blend)
//   3. per tile and layer: least-squares planes through the smoothed field
//
// Planes are expressed in tile-local XZ (origin at the tile centre).

use std::collections::BTreeMap;

use glam::{DMat3, DVec3, Vec3};
use tracing::debug;

use super::binning::BuildTile;
use super::sampler::{HeightFragment, SUBSAMPLES_PER_AXIS, sample_offset};
use super::{BuilderConfig, SolidIndex};
use crate::executor::Executor;
use crate::map::MapGrid;
use crate::math::Plane;
use crate::metadata::StructuralType;

/// Slack added to the standard deviation when accepting a sample.
const VALID_TOLERANCE: f32 = 1e-5;

/// Layers thinner than this are flattened into a slab.
const DEGENERATE_EPSILON: f32 = 1e-3;
const DEGENERATE_SLAB: f32 = 0.1;

const SINGULAR_EPSILON: f64 = 1e-9;

// ============================================================================
// Statistics
// ============================================================================

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub(crate) struct SideStats {
    pub mean: f32,
    pub std_dev: f32,
    pub count: u32,
    /// Most frequent solid; ties go to the lowest index.
    pub dominant: Option<SolidIndex>,
}

impl SideStats {
    fn from_fragments<'a>(fragments: impl Iterator<Item = &'a HeightFragment>, min_normal_y: f32) -> Self {
        let mut sum = 0.0f64;
        let mut sum_sq = 0.0f64;
        let mut count = 0u32;
        let mut solids: BTreeMap<SolidIndex, u32> = BTreeMap::new();

        for fragment in fragments.filter(|f| f.normal.y.abs() > min_normal_y) {
            let height = fragment.height as f64;
            sum += height;
            sum_sq += height * height;
            count += 1;
            *solids.entry(fragment.solid).or_default() += 1;
        }

        if count == 0 {
            return Self::default();
        }

        let mut dominant = None;
        let mut best = 0;
        for (&solid, &hits) in &solids {
            if hits > best {
                best = hits;
                dominant = Some(solid);
            }
        }

        let mean = sum / count as f64;
        let variance = (sum_sq / count as f64 - mean * mean).max(0.0);
        Self {
            mean: mean as f32,
            std_dev: variance.sqrt() as f32,
            count,
            dominant,
        }
    }

    pub fn accepts(&self, height: f32) -> bool {
        self.count > 0 && (height - self.mean).abs() <= self.std_dev + VALID_TOLERANCE
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) struct LayerStats {
    pub floor: SideStats,
    pub ceiling: SideStats,
    /// Lowest floor fragment of the layer, any inclination.
    pub floor_min: f32,
    /// Highest ceiling fragment; `-inf` when no ray has one.
    pub ceiling_max: f32,
}

fn layer_fragments(tile: &BuildTile, slot: usize) -> impl Iterator<Item = &HeightFragment> {
    tile.samples.iter().filter_map(move |ray| ray.get(slot))
}

fn compute_stats(tile: &BuildTile, min_normal_y: f32) -> Vec<LayerStats> {
    (0..tile.layer_count)
        .map(|layer| LayerStats {
            floor: SideStats::from_fragments(layer_fragments(tile, 2 * layer), min_normal_y),
            ceiling: SideStats::from_fragments(layer_fragments(tile, 2 * layer + 1), min_normal_y),
            floor_min: layer_fragments(tile, 2 * layer)
                .map(|f| f.height)
                .fold(f32::INFINITY, f32::min),
            ceiling_max: layer_fragments(tile, 2 * layer + 1)
                .map(|f| f.height)
                .fold(f32::NEG_INFINITY, f32::max),
        })
        .collect()
}

// ============================================================================
// Smoothing
// ============================================================================

#[derive(Clone, Copy, Debug, Default)]
struct FieldSample {
    height: f32,
    valid: bool,
    /// Dominant solid of the sample's tile and side; smoothing leaves it alone.
    solid: Option<SolidIndex>,
}

/// Accepted samples of one layer index over the whole map, row-major with
/// `width * 16` columns.
#[derive(Debug, Default)]
struct LayerField {
    columns: usize,
    floor: Vec<FieldSample>,
    ceiling: Vec<FieldSample>,
}

impl LayerField {
    fn build(layer: usize, tiles: &[BuildTile], grid: &MapGrid, min_normal_y: f32) -> Self {
        let columns = grid.width as usize * SUBSAMPLES_PER_AXIS;
        let rows = grid.height as usize * SUBSAMPLES_PER_AXIS;
        let mut floor = vec![FieldSample::default(); columns * rows];
        let mut ceiling = vec![FieldSample::default(); columns * rows];

        for tile in tiles.iter().filter(|t| layer < t.layer_count) {
            let stats = &tile.stats[layer];
            for (ray, fragments) in tile.samples.iter().enumerate() {
                let column = tile.x as usize * SUBSAMPLES_PER_AXIS + ray % SUBSAMPLES_PER_AXIS;
                let row = tile.z as usize * SUBSAMPLES_PER_AXIS + ray / SUBSAMPLES_PER_AXIS;
                let cell = row * columns + column;

                let accept = |fragment: Option<&HeightFragment>, side: &SideStats| match fragment {
                    Some(f) if f.normal.y.abs() > min_normal_y && side.accepts(f.height) => FieldSample {
                        height: f.height,
                        valid: true,
                        solid: side.dominant,
                    },
                    _ => FieldSample::default(),
                };
                floor[cell] = accept(fragments.get(2 * layer), &stats.floor);
                ceiling[cell] = accept(fragments.get(2 * layer + 1), &stats.ceiling);
            }
        }

        Self {
            floor: smooth(&floor, columns, rows),
            ceiling: smooth(&ceiling, columns, rows),
            columns,
        }
    }
}

/// Edge-clamped 3x3 average over valid neighbours; invalid cells stay
/// invalid.
fn smooth(values: &[FieldSample], columns: usize, rows: usize) -> Vec<FieldSample> {
    let mut out = values.to_vec();
    for row in 0..rows {
        for column in 0..columns {
            let cell = row * columns + column;
            if !values[cell].valid {
                continue;
            }

            let mut sum = 0.0f32;
            let mut count = 0u32;
            for dz in -1i64..=1 {
                for dx in -1i64..=1 {
                    let r = (row as i64 + dz).clamp(0, rows as i64 - 1) as usize;
                    let c = (column as i64 + dx).clamp(0, columns as i64 - 1) as usize;
                    let sample = values[r * columns + c];
                    if sample.valid {
                        sum += sample.height;
                        count += 1;
                    }
                }
            }
            out[cell].height = sum / count as f32;
        }
    }
    out
}

// ============================================================================
// Plane fitting
// ============================================================================

/// One level of a tile under construction.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct Layer {
    pub floor: Plane,
    pub ceiling: Plane,
    pub base_height: f32,
    pub roof_delta: f32,
    pub floor_solid: Option<SolidIndex>,
    pub ceiling_solid: Option<SolidIndex>,
    /// Destructible solids baked into this level.
    pub destructibles: Vec<SolidIndex>,
    pub structure: Option<(StructuralType, i32)>,
}

/// Least-squares fit of `y = a*x + b*z + c` through `points` (tile-local),
/// with heights taken relative to `shift`. `None` for fewer than three
/// points or a singular system.
pub(crate) fn fit_plane(points: &[Vec3], shift: f32) -> Option<Plane> {
    if points.len() < 3 {
        return None;
    }

    let (mut sxx, mut sxz, mut szz, mut sx, mut sz) = (0.0f64, 0.0f64, 0.0f64, 0.0f64, 0.0f64);
    let (mut sxy, mut szy, mut sy) = (0.0f64, 0.0f64, 0.0f64);
    for p in points {
        let (x, y, z) = (p.x as f64, (p.y - shift) as f64, p.z as f64);
        sxx += x * x;
        sxz += x * z;
        szz += z * z;
        sx += x;
        sz += z;
        sxy += x * y;
        szy += z * y;
        sy += y;
    }
    let n = points.len() as f64;

    let normal_matrix = DMat3::from_cols(
        DVec3::new(sxx, sxz, sx),
        DVec3::new(sxz, szz, sz),
        DVec3::new(sx, sz, n),
    );
    if normal_matrix.determinant().abs() < SINGULAR_EPSILON {
        return None;
    }
    let solution = normal_matrix.inverse() * DVec3::new(sxy, szy, sy);
    let (a, b, c) = (solution.x, solution.y, solution.z);

    let normal = DVec3::new(-a, 1.0, -b);
    let length = normal.length();
    Some(Plane::new(
        (normal / length).as_vec3(),
        (-(c + shift as f64) / length) as f32,
    ))
}

/// Valid samples of `tile` as tile-local points, with the dominant solid
/// they carry.
fn tile_points(
    samples: &[FieldSample],
    field: &LayerField,
    tile: &BuildTile,
    tile_size: f32,
) -> (Vec<Vec3>, Option<SolidIndex>) {
    let mut points = Vec::with_capacity(SUBSAMPLES_PER_AXIS * SUBSAMPLES_PER_AXIS);
    let mut solid = None;
    for j in 0..SUBSAMPLES_PER_AXIS {
        let row = tile.z as usize * SUBSAMPLES_PER_AXIS + j;
        for i in 0..SUBSAMPLES_PER_AXIS {
            let column = tile.x as usize * SUBSAMPLES_PER_AXIS + i;
            let sample = samples[row * field.columns + column];
            if sample.valid {
                solid = solid.or(sample.solid);
                points.push(Vec3::new(
                    (sample_offset(i) - 0.5) * tile_size,
                    sample.height,
                    (sample_offset(j) - 0.5) * tile_size,
                ));
            }
        }
    }
    (points, solid)
}

fn fit_tile(tile: &BuildTile, fields: &[LayerField], tile_size: f32) -> Vec<Layer> {
    let mut layers = Vec::with_capacity(tile.layer_count);

    for (index, stats) in tile.stats.iter().enumerate() {
        let field = &fields[index];
        let (floor_points, floor_solid) = tile_points(&field.floor, field, tile, tile_size);
        let (ceiling_points, ceiling_solid) = tile_points(&field.ceiling, field, tile, tile_size);
        let floor_solid = floor_solid.or(stats.floor.dominant);
        let ceiling_solid = ceiling_solid.or(stats.ceiling.dominant);

        let mut layer_min = floor_points.iter().map(|p| p.y).fold(f32::INFINITY, f32::min);
        if !layer_min.is_finite() {
            layer_min = stats.floor_min;
        }
        let mut layer_max = ceiling_points.iter().map(|p| p.y).fold(f32::NEG_INFINITY, f32::max);
        if !layer_max.is_finite() {
            layer_max = stats.ceiling_max;
        }
        if !layer_min.is_finite() {
            break;
        }

        if layer_max.is_finite() && (layer_max - layer_min).abs() < DEGENERATE_EPSILON {
            debug!(
                "Tile {},{} layer {} is degenerate at {}, dropping {} layer(s) above",
                tile.x,
                tile.z,
                index,
                layer_min,
                tile.layer_count - index - 1
            );
            layers.push(Layer {
                floor: Plane::horizontal_up(layer_min),
                ceiling: Plane::horizontal_down(layer_min + DEGENERATE_SLAB),
                base_height: layer_min,
                roof_delta: DEGENERATE_SLAB,
                floor_solid,
                ceiling_solid,
                destructibles: Vec::new(),
                structure: None,
            });
            break;
        }

        let floor = fit_plane(&floor_points, layer_min).unwrap_or_else(|| Plane::horizontal_up(layer_min));
        let ceiling = if ceiling_points.len() < 3 {
            Plane::INVALID
        } else {
            fit_plane(&ceiling_points, layer_min)
                .map(|plane| plane.flipped())
                .unwrap_or_else(|| Plane::horizontal_down(layer_max))
        };
        let roof_delta = if ceiling.is_valid() {
            layer_max - layer_min
        } else {
            f32::INFINITY
        };

        layers.push(Layer {
            floor,
            ceiling,
            base_height: layer_min,
            roof_delta,
            floor_solid,
            ceiling_solid,
            destructibles: Vec::new(),
            structure: None,
        });
    }

    layers
}

/// Statistics, smoothing and plane fitting for every tile.
pub(crate) fn fit_layers(executor: &Executor, grid: &MapGrid, tiles: &mut [BuildTile], config: &BuilderConfig) {
    let min_normal_y = config.min_normal_y();
    executor.for_each_mut(tiles, |_, tile| tile.stats = compute_stats(tile, min_normal_y));

    let layer_count = tiles.iter().map(|t| t.layer_count).max().unwrap_or(0);
    let mut fields: Vec<LayerField> = (0..layer_count).map(|_| LayerField::default()).collect();
    {
        let tiles: &[BuildTile] = tiles;
        executor.for_each_mut(&mut fields, |layer, field| {
            *field = LayerField::build(layer, tiles, grid, min_normal_y);
        });
    }
    debug!(
        "Smoothed {} layer field(s) of {}x{} samples",
        fields.len(),
        grid.width as usize * SUBSAMPLES_PER_AXIS,
        grid.height as usize * SUBSAMPLES_PER_AXIS
    );

    let tile_size = grid.tile_size;
    executor.for_each_mut(tiles, |_, tile| tile.layers = fit_tile(tile, &fields, tile_size));
}
