// structural.rs - Solid connectivity and destructible baking
//
// Two solids touching inside a tile form a bond, labelled with the
// direction from one centre to the other. Integrity of a solid is the
// number of bonds supporting it from above or the sides; a solid with
// nothing below it is part of the world and cannot be destroyed.
//
// Each level then takes the minimum integrity and the strongest structural
// type of the destructible solids overlapping it.

use std::collections::BTreeSet;

use glam::Vec3;
use tracing::debug;

use super::binning::BuildTile;
use super::{Solid, SolidIndex};
use crate::executor::Executor;
use crate::map::MapGrid;
use crate::math::Aabb;
use crate::metadata::StructuralType;

/// Solid bounds grow by this fraction before the contact test.
const BOND_INFLATION: f32 = 0.01;

/// Level spans shrink by this much before overlap tests, so a solid merely
/// touching a level's floor or roof does not count.
const SPAN_EPSILON: f32 = 1e-3;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CardinalDirection {
    Above,
    Below,
    Left,
    Right,
    Front,
    Back,
}

impl CardinalDirection {
    /// Dominant axis of the vector from `from` to `to`.
    pub fn between(from: Vec3, to: Vec3) -> Self {
        let delta = to - from;
        let abs = delta.abs();
        if abs.y >= abs.x && abs.y >= abs.z {
            if delta.y >= 0.0 { Self::Above } else { Self::Below }
        } else if abs.x >= abs.z {
            if delta.x >= 0.0 { Self::Right } else { Self::Left }
        } else if delta.z >= 0.0 {
            Self::Front
        } else {
            Self::Back
        }
    }

    /// Whether a neighbour in this direction holds the solid up.
    pub fn supports(self) -> bool {
        matches!(self, Self::Above | Self::Left | Self::Right)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub(crate) struct Bond {
    pub owner: SolidIndex,
    pub neighbour: SolidIndex,
    pub direction: CardinalDirection,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) struct SolidStructure {
    pub integrity: i32,
    pub structural_type: StructuralType,
}

/// Bonds between every pair of touching solids of one tile, both ways.
fn tile_bonds(tile: &BuildTile, solids: &[Solid]) -> Vec<Bond> {
    let indices = tile.solids();
    let mut bonds = Vec::new();
    for (n, &a) in indices.iter().enumerate() {
        let bounds_a = solids[a.index()].bounds.inflated(BOND_INFLATION);
        for &b in &indices[n + 1..] {
            let bounds_b = solids[b.index()].bounds.inflated(BOND_INFLATION);
            if !bounds_a.intersects(&bounds_b) {
                continue;
            }
            let (center_a, center_b) = (solids[a.index()].bounds.center(), solids[b.index()].bounds.center());
            bonds.push(Bond {
                owner: a,
                neighbour: b,
                direction: CardinalDirection::between(center_a, center_b),
            });
            bonds.push(Bond {
                owner: b,
                neighbour: a,
                direction: CardinalDirection::between(center_b, center_a),
            });
        }
    }
    bonds
}

fn shape_type(bounds: &Aabb) -> StructuralType {
    let e = bounds.extent();
    let (top, front, side) = (e.x * e.z, e.x * e.y, e.y * e.z);
    if top >= front && top >= side {
        StructuralType::Floor
    } else {
        StructuralType::Wall
    }
}

/// Integrity and type of every solid from the deduplicated bond set.
pub(crate) fn solid_structure(solids: &[Solid], bonds: &BTreeSet<Bond>) -> Vec<SolidStructure> {
    let mut structure: Vec<SolidStructure> = solids
        .iter()
        .map(|solid| SolidStructure {
            integrity: 0,
            structural_type: shape_type(&solid.bounds),
        })
        .collect();
    let mut grounded = vec![false; solids.len()];

    for bond in bonds {
        let owner = bond.owner.index();
        if bond.direction.supports() {
            structure[owner].integrity += 1;
        }
        if bond.direction == CardinalDirection::Below {
            grounded[owner] = true;
        }
    }

    for (entry, grounded) in structure.iter_mut().zip(grounded) {
        if !grounded {
            entry.structural_type = StructuralType::World;
        }
    }
    structure
}

fn bake_tile(tile: &mut BuildTile, structure: &[SolidStructure], grid: &MapGrid) {
    let footprint = grid.tile_bounds(tile.x, tile.z);
    for layer in tile.layers.iter_mut() {
        let top = (layer.base_height + layer.roof_delta).min(grid.max_height).max(layer.base_height);
        let span = Aabb::new(
            Vec3::new(footprint.min.x, layer.base_height + SPAN_EPSILON, footprint.min.z),
            Vec3::new(footprint.max.x, top - SPAN_EPSILON, footprint.max.z),
        );

        for &(solid, bounds) in &tile.destructibles {
            if !bounds.intersects(&span) {
                continue;
            }
            let entry = structure[solid.index()];
            layer.destructibles.push(solid);
            layer.structure = Some(match layer.structure {
                Some((structural_type, integrity)) => (
                    structural_type.combine(entry.structural_type),
                    integrity.min(entry.integrity),
                ),
                None => (entry.structural_type, entry.integrity),
            });
        }
    }
}

/// Compute bonds, per-solid structure and bake destructibles into levels.
pub(crate) fn analyze(executor: &Executor, grid: &MapGrid, tiles: &mut [BuildTile], solids: &[Solid]) {
    executor.for_each_mut(tiles, |_, tile| tile.bonds = tile_bonds(tile, solids));

    let bonds: BTreeSet<Bond> = tiles.iter().flat_map(|t| t.bonds.iter().copied()).collect();
    let structure = solid_structure(solids, &bonds);
    debug!("{} unique bonds between {} solids", bonds.len(), solids.len());

    executor.for_each_mut(tiles, |_, tile| bake_tile(tile, &structure, grid));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::TacticalMapBuilder;
    use crate::builder::tests::{add_box, box_metadata};
    use crate::metadata::{LEVEL_FLAG_DESTRUCTIBLE, LEVEL_FLAG_STRUCTURAL, LevelData};

    fn box_solid(min: Vec3, max: Vec3) -> Solid {
        Solid {
            mesh: None,
            bounds: Aabb::new(min, max),
            metadata: LevelData::default(),
        }
    }

    #[test]
    fn test_direction_dominant_axis() {
        use CardinalDirection::*;
        assert_eq!(CardinalDirection::between(Vec3::ZERO, Vec3::new(0.5, 2.0, 0.0)), Above);
        assert_eq!(CardinalDirection::between(Vec3::ZERO, Vec3::new(0.5, -2.0, 0.0)), Below);
        assert_eq!(CardinalDirection::between(Vec3::ZERO, Vec3::new(-3.0, 1.0, 0.0)), Left);
        assert_eq!(CardinalDirection::between(Vec3::ZERO, Vec3::new(3.0, 1.0, 0.0)), Right);
        assert_eq!(CardinalDirection::between(Vec3::ZERO, Vec3::new(0.0, 1.0, 3.0)), Front);
        assert_eq!(CardinalDirection::between(Vec3::ZERO, Vec3::new(0.0, 1.0, -3.0)), Back);
    }

    #[test]
    fn test_integrity_and_world_detection() {
        let solids = vec![
            // Ground slab.
            box_solid(Vec3::new(0.0, -1.0, 0.0), Vec3::new(4.0, 0.0, 4.0)),
            // Two walls side by side on the ground.
            box_solid(Vec3::new(1.0, 0.0, 0.0), Vec3::new(2.0, 3.0, 4.0)),
            box_solid(Vec3::new(2.0, 0.0, 0.0), Vec3::new(3.0, 3.0, 4.0)),
        ];
        let mut bonds = BTreeSet::new();
        let tile = BuildTile {
            boxes: vec![SolidIndex(0), SolidIndex(1), SolidIndex(2)],
            ..Default::default()
        };
        bonds.extend(tile_bonds(&tile, &solids));
        // Same pairs seen from another tile collapse into the set.
        bonds.extend(tile_bonds(&tile, &solids));
        assert_eq!(bonds.len(), 6);

        let structure = solid_structure(&solids, &bonds);
        assert_eq!(structure[0].structural_type, StructuralType::World);
        assert_eq!(structure[0].integrity, 2);
        assert_eq!(structure[1].structural_type, StructuralType::Wall);
        assert_eq!(structure[1].integrity, 1);
        assert_eq!(structure[2].integrity, 1);
    }

    #[test]
    fn test_floating_floor_is_world() {
        let solids = vec![box_solid(Vec3::ZERO, Vec3::new(4.0, 0.5, 4.0))];
        let structure = solid_structure(&solids, &BTreeSet::new());
        assert_eq!(structure[0].structural_type, StructuralType::World);
        assert_eq!(shape_type(&solids[0].bounds), StructuralType::Floor);
    }

    #[test]
    fn test_destructible_walls_baked_into_levels() {
        let mut builder = TacticalMapBuilder::default();
        add_box(&mut builder, Vec3::new(0.0, -1.0, 0.0), Vec3::new(4.0, 0.0, 4.0), &box_metadata(1, 0));
        let wall = box_metadata(2, LEVEL_FLAG_DESTRUCTIBLE);
        add_box(&mut builder, Vec3::new(1.0, 0.0, 0.0), Vec3::new(2.0, 3.0, 4.0), &wall);
        add_box(&mut builder, Vec3::new(2.0, 0.0, 0.0), Vec3::new(3.0, 3.0, 4.0), &wall);
        let map = builder.build(&Executor::new(2)).unwrap();

        // Ground only.
        let outside = map.tile_levels(0, 1);
        assert_eq!(outside.len(), 1);
        let header = &map.level_header(map.tile(0, 1).unwrap().level_start as usize).unwrap().header;
        assert_eq!(header.structural_type, StructuralType::NotStructural);
        assert!(!header.has_flag(LEVEL_FLAG_DESTRUCTIBLE));

        // Ground plus the wall standing on it.
        let tile = *map.tile(1, 1).unwrap();
        assert_eq!(tile.level_count, 2);
        let ground = &map.level_header(tile.level_start as usize).unwrap().header;
        assert_eq!(ground.structural_type, StructuralType::NotStructural);
        let wall = &map.level_header(tile.level_start as usize + 1).unwrap().header;
        assert_eq!(wall.instance_id, 2);
        assert_eq!(wall.structural_type, StructuralType::Wall);
        assert_eq!(wall.structural_integrity, 1);
        assert!(wall.has_flag(LEVEL_FLAG_DESTRUCTIBLE));
        assert!(wall.has_flag(LEVEL_FLAG_STRUCTURAL));

        // Wall integrity 1 is already below the collapse threshold.
        let mut map = map;
        let report = map.damage_structure(&Aabb::new(Vec3::new(1.2, 1.0, 1.2), Vec3::new(1.8, 2.0, 1.8)));
        assert!(report.destroyed_count() >= 1);
        let wall = &map.level_header(tile.level_start as usize + 1).unwrap().header;
        assert!(wall.is_destroyed());
    }
}
