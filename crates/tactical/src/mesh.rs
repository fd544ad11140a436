// mesh.rs - Triangle mesh input
//
// The builder only needs four things from a mesh: vertex positions, the
// vertex indices of each polygon, each polygon's plane, and a way to produce
// a transformed copy. `MeshSource` is that seam; `TriMesh` is the owned
// triangulated form the builder keeps for every registered mesh solid.

use glam::{Affine3A, Vec3};

use crate::math::{Aabb, Plane};

/// Anything that can hand the builder a triangulated mesh.
pub trait MeshSource {
    fn positions(&self) -> &[Vec3];

    /// Vertex indices of every polygon (already triangulated).
    fn polygons(&self) -> &[[u32; 3]];

    /// Clone the mesh with `transform` applied to every vertex.
    fn transformed(&self, transform: &Affine3A) -> TriMesh {
        TriMesh::new(
            self.positions()
                .iter()
                .map(|p| transform.transform_point3(*p))
                .collect(),
            self.polygons().to_vec(),
        )
    }
}

#[derive(Clone, Debug, Default)]
pub struct TriMesh {
    positions: Vec<Vec3>,
    triangles: Vec<[u32; 3]>,
    planes: Vec<Plane>,
}

impl TriMesh {
    /// Build a mesh; triangles referencing missing vertices are dropped.
    pub fn new(positions: Vec<Vec3>, triangles: Vec<[u32; 3]>) -> Self {
        let vertex_count = positions.len() as u32;
        let triangles: Vec<[u32; 3]> = triangles
            .into_iter()
            .filter(|tri| tri.iter().all(|&idx| idx < vertex_count))
            .collect();
        let planes = triangles
            .iter()
            .map(|tri| {
                Plane::from_points(
                    positions[tri[0] as usize],
                    positions[tri[1] as usize],
                    positions[tri[2] as usize],
                )
            })
            .collect();
        Self {
            positions,
            triangles,
            planes,
        }
    }

    pub fn polygon_count(&self) -> usize {
        self.triangles.len()
    }

    pub fn polygon_vertices(&self, polygon: usize) -> [Vec3; 3] {
        let tri = self.triangles[polygon];
        [
            self.positions[tri[0] as usize],
            self.positions[tri[1] as usize],
            self.positions[tri[2] as usize],
        ]
    }

    pub fn polygon_plane(&self, polygon: usize) -> Plane {
        self.planes[polygon]
    }

    pub fn polygon_bounds(&self, polygon: usize) -> Aabb {
        Aabb::from_points(self.polygon_vertices(polygon))
    }

    pub fn bounds(&self) -> Aabb {
        Aabb::from_points(self.positions.iter().copied())
    }
}

impl MeshSource for TriMesh {
    fn positions(&self) -> &[Vec3] {
        &self.positions
    }

    fn polygons(&self) -> &[[u32; 3]] {
        &self.triangles
    }
}
