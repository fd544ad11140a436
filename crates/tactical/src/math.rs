// math.rs - Geometry primitives shared by the builder, runtime map and stitcher
//
// Axis convention: Y is up, the tile grid spans X (columns) and Z (rows).

use glam::{Vec2, Vec3};

/// Tolerance used for inclusive edge tests during ray casting.
const EDGE_EPSILON: f32 = 1e-6;

// ============================================================================
// Axis-aligned bounding box
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    /// An inverted box; merging any point into it yields that point.
    pub const EMPTY: Self = Self {
        min: Vec3::splat(f32::INFINITY),
        max: Vec3::splat(f32::NEG_INFINITY),
    };

    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self {
            min: min.min(max),
            max: min.max(max),
        }
    }

    pub fn from_point(p: Vec3) -> Self {
        Self { min: p, max: p }
    }

    pub fn from_points<I: IntoIterator<Item = Vec3>>(points: I) -> Self {
        let mut bounds = Self::EMPTY;
        for p in points {
            bounds.merge_point(p);
        }
        bounds
    }

    pub fn is_empty(&self) -> bool {
        self.min.x > self.max.x || self.min.y > self.max.y || self.min.z > self.max.z
    }

    pub fn merge_point(&mut self, p: Vec3) {
        self.min = self.min.min(p);
        self.max = self.max.max(p);
    }

    pub fn merge(&mut self, other: &Aabb) {
        if other.is_empty() {
            return;
        }
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);
    }

    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    pub fn extent(&self) -> Vec3 {
        self.max - self.min
    }

    pub fn translated(&self, offset: Vec3) -> Self {
        Self {
            min: self.min + offset,
            max: self.max + offset,
        }
    }

    /// Grow every axis by `fraction` of its own size, keeping the centre.
    pub fn inflated(&self, fraction: f32) -> Self {
        let half = self.extent() * (0.5 * (1.0 + fraction));
        let center = self.center();
        Self {
            min: center - half,
            max: center + half,
        }
    }

    pub fn intersects(&self, other: &Aabb) -> bool {
        self.min.x <= other.max.x
            && self.max.x >= other.min.x
            && self.min.y <= other.max.y
            && self.max.y >= other.min.y
            && self.min.z <= other.max.z
            && self.max.z >= other.min.z
    }

    pub fn contains_xz(&self, x: f32, z: f32) -> bool {
        x >= self.min.x && x <= self.max.x && z >= self.min.z && z <= self.max.z
    }
}

// ============================================================================
// Plane
// ============================================================================

/// Plane `normal · p + d = 0`. A NaN normal marks the invalid sentinel
/// used for layers without a ceiling.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Plane {
    pub normal: Vec3,
    pub d: f32,
}

impl Plane {
    pub const INVALID: Self = Self {
        normal: Vec3::NAN,
        d: f32::NAN,
    };

    pub fn new(normal: Vec3, d: f32) -> Self {
        Self { normal, d }
    }

    /// Horizontal plane at `height` facing up.
    pub fn horizontal_up(height: f32) -> Self {
        Self::new(Vec3::Y, -height)
    }

    /// Horizontal plane at `height` facing down.
    pub fn horizontal_down(height: f32) -> Self {
        Self::new(Vec3::NEG_Y, height)
    }

    pub fn from_points(a: Vec3, b: Vec3, c: Vec3) -> Self {
        let normal = (b - a).cross(c - a).normalize_or_zero();
        Self::new(normal, -normal.dot(a))
    }

    pub fn is_valid(&self) -> bool {
        self.normal.is_finite() && self.d.is_finite() && self.normal.y.abs() > EDGE_EPSILON
    }

    /// Height of the plane above the point `(x, z)`; NaN when the plane is
    /// invalid or vertical.
    pub fn height_at(&self, x: f32, z: f32) -> f32 {
        if !self.is_valid() {
            return f32::NAN;
        }
        -(self.normal.x * x + self.normal.z * z + self.d) / self.normal.y
    }

    pub fn flipped(&self) -> Self {
        Self::new(-self.normal, -self.d)
    }

    /// Same surface moved up by `dy`.
    pub fn raised(&self, dy: f32) -> Self {
        Self::new(self.normal, self.d - self.normal.y * dy)
    }

    /// Rotate the XZ part of the normal by `quarter_turns` * 90 degrees
    /// (counter-clockwise in grid coordinates: +X towards +Z).
    pub fn rotated_quarter_turns(&self, quarter_turns: u32) -> Self {
        let mut n = Vec2::new(self.normal.x, self.normal.z);
        for _ in 0..quarter_turns % 4 {
            n = Vec2::new(-n.y, n.x);
        }
        Self::new(Vec3::new(n.x, self.normal.y, n.y), self.d)
    }

    pub fn to_array(&self) -> [f32; 4] {
        [self.normal.x, self.normal.y, self.normal.z, self.d]
    }

    pub fn from_array(values: [f32; 4]) -> Self {
        Self::new(Vec3::new(values[0], values[1], values[2]), values[3])
    }
}

// ============================================================================
// Vertical ray casts
// ============================================================================

/// Intersect the upward ray starting at `(x, origin_y, z)` with an AABB.
/// Returns the (entry, exit) heights, the entry clamped to the ray origin.
pub fn vertical_ray_aabb(x: f32, z: f32, origin_y: f32, bounds: &Aabb) -> Option<(f32, f32)> {
    if !bounds.contains_xz(x, z) || bounds.max.y < origin_y {
        return None;
    }
    Some((bounds.min.y.max(origin_y), bounds.max.y))
}

/// Intersect the upward ray starting at `(x, origin_y, z)` with a triangle.
/// Works on the XZ projection so either winding is accepted; edges are
/// inclusive. Returns the hit height.
pub fn vertical_ray_triangle(x: f32, z: f32, origin_y: f32, tri: [Vec3; 3]) -> Option<f32> {
    let [a, b, c] = tri;
    let area = edge_function(a, b, c.x, c.z);
    if area.abs() <= EDGE_EPSILON {
        // Vertical or degenerate triangle: a vertical ray only grazes it.
        return None;
    }

    let w0 = edge_function(b, c, x, z) / area;
    let w1 = edge_function(c, a, x, z) / area;
    let w2 = edge_function(a, b, x, z) / area;
    if w0 < -EDGE_EPSILON || w1 < -EDGE_EPSILON || w2 < -EDGE_EPSILON {
        return None;
    }

    let height = w0 * a.y + w1 * b.y + w2 * c.y;
    (height >= origin_y).then_some(height)
}

fn edge_function(a: Vec3, b: Vec3, x: f32, z: f32) -> f32 {
    (b.x - a.x) * (z - a.z) - (b.z - a.z) * (x - a.x)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aabb_merge_and_inflate() {
        let mut bounds = Aabb::EMPTY;
        assert!(bounds.is_empty());
        bounds.merge_point(Vec3::new(1.0, 2.0, 3.0));
        bounds.merge_point(Vec3::new(-1.0, 0.0, 5.0));
        assert_eq!(bounds.min, Vec3::new(-1.0, 0.0, 3.0));
        assert_eq!(bounds.max, Vec3::new(1.0, 2.0, 5.0));

        let inflated = bounds.inflated(0.5);
        assert!((inflated.min.x + 1.5).abs() < 1e-6);
        assert!((inflated.max.y - 2.5).abs() < 1e-6);
        assert_eq!(inflated.center(), bounds.center());
    }

    #[test]
    fn test_aabb_touching_faces_intersect() {
        let a = Aabb::new(Vec3::ZERO, Vec3::ONE);
        let b = Aabb::new(Vec3::new(1.0, 0.0, 0.0), Vec3::new(2.0, 1.0, 1.0));
        let c = Aabb::new(Vec3::new(1.1, 0.0, 0.0), Vec3::new(2.0, 1.0, 1.0));
        assert!(a.intersects(&b));
        assert!(!a.intersects(&c));
    }

    #[test]
    fn test_plane_height_and_flip() {
        let plane = Plane::from_points(
            Vec3::new(0.0, 1.0, 0.0),
            Vec3::new(0.0, 1.0, 1.0),
            Vec3::new(1.0, 2.0, 0.0),
        );
        assert!((plane.height_at(0.5, 7.0) - 1.5).abs() < 1e-5);
        assert!((plane.flipped().height_at(0.5, 7.0) - 1.5).abs() < 1e-5);
        assert!((plane.raised(2.0).height_at(0.0, 0.0) - 3.0).abs() < 1e-5);
        assert!(Plane::INVALID.height_at(0.0, 0.0).is_nan());
        assert!(!Plane::INVALID.is_valid());
    }

    #[test]
    fn test_plane_rotation_keeps_slope() {
        // Rises along +X.
        let plane = Plane::from_points(
            Vec3::new(0.0, 0.0, 0.0),
            Vec3::new(0.0, 0.0, 1.0),
            Vec3::new(1.0, 1.0, 0.0),
        );
        let turned = plane.rotated_quarter_turns(1);
        // +X maps to +Z after one quarter turn.
        assert!((turned.height_at(0.0, 1.0) - 1.0).abs() < 1e-5);
        assert!(turned.height_at(1.0, 0.0).abs() < 1e-5);
        let back = plane.rotated_quarter_turns(4);
        assert!((back.height_at(1.0, 0.0) - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_vertical_ray_triangle() {
        let tri = [
            Vec3::new(0.0, 2.0, 0.0),
            Vec3::new(1.0, 2.0, 0.0),
            Vec3::new(0.0, 2.0, 1.0),
        ];
        assert_eq!(vertical_ray_triangle(0.25, 0.25, -10.0, tri), Some(2.0));
        assert_eq!(vertical_ray_triangle(0.9, 0.9, -10.0, tri), None);
        assert_eq!(vertical_ray_triangle(0.25, 0.25, 5.0, tri), None);

        let reversed = [tri[0], tri[2], tri[1]];
        assert_eq!(vertical_ray_triangle(0.25, 0.25, -10.0, reversed), Some(2.0));
    }

    #[test]
    fn test_vertical_ray_aabb() {
        let bounds = Aabb::new(Vec3::new(0.0, 1.0, 0.0), Vec3::new(2.0, 4.0, 2.0));
        assert_eq!(vertical_ray_aabb(1.0, 1.0, -5.0, &bounds), Some((1.0, 4.0)));
        assert_eq!(vertical_ray_aabb(1.0, 1.0, 2.0, &bounds), Some((2.0, 4.0)));
        assert_eq!(vertical_ray_aabb(3.0, 1.0, -5.0, &bounds), None);
        assert_eq!(vertical_ray_aabb(1.0, 1.0, 5.0, &bounds), None);
    }
}
