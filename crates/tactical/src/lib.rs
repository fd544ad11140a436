// tactical-map - Layered walkability maps for tactical AI
//
// Offline: `TacticalMapBuilder` turns a scene of boxes and meshes into a
// `TacticalMap` (a grid of tiles, each holding a stack of floor / ceiling
// levels). `Stitcher` merges pre-built maps into one; `format` saves and
// loads them. At runtime the map answers level lookups and applies damage.

pub mod builder;
pub mod executor;
pub mod format;
pub mod map;
pub mod math;
pub mod mesh;
pub mod metadata;
pub mod stitcher;

pub use builder::{BuildError, BuilderConfig, SolidIndex, TacticalMapBuilder};
pub use executor::Executor;
pub use format::FormatError;
pub use map::{DamageReport, LevelHit, MapError, MapGrid, MapStats, TacticalMap, Tile, TileLevel};
pub use math::{Aabb, Plane};
pub use mesh::{MeshSource, TriMesh};
pub use metadata::{LevelData, LevelDataHeader, StructuralType};
pub use stitcher::{Rotation, StitchError, Stitcher};
