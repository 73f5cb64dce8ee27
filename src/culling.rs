//! Distance and frustum culling of block instances.
//!
//! Planes are extracted from the view-projection matrix (Gribb/Hartmann).
//! Each plane is `(nx, ny, nz, d)` where `nx*x + ny*y + nz*z + d >= 0` is inside.

use cgmath::{InnerSpace, Matrix4, Vector3};

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Frustum {
    planes: [[f32; 4]; 6],
}

impl Frustum {
    pub fn from_view_proj(view_proj: &Matrix4<f32>) -> Self {
        let m: [[f32; 4]; 4] = (*view_proj).into();
        let combine = |row: usize, sign: f32| {
            let mut plane = [0.0; 4];
            for (col, value) in plane.iter_mut().enumerate() {
                *value = m[col][3] + sign * m[col][row];
            }
            normalize(plane)
        };
        Self {
            planes: [
                // left, right
                combine(0, 1.0),
                combine(0, -1.0),
                // bottom, top
                combine(1, 1.0),
                combine(1, -1.0),
                // near, far
                combine(2, 1.0),
                combine(2, -1.0),
            ],
        }
    }

    pub fn contains_sphere(&self, center: Vector3<f32>, radius: f32) -> bool {
        self.planes
            .iter()
            .all(|p| p[0] * center.x + p[1] * center.y + p[2] * center.z + p[3] >= -radius)
    }

    pub fn intersects_aabb(&self, min: Vector3<f32>, max: Vector3<f32>) -> bool {
        self.planes.iter().all(|p| {
            let x = if p[0] >= 0.0 { max.x } else { min.x };
            let y = if p[1] >= 0.0 { max.y } else { min.y };
            let z = if p[2] >= 0.0 { max.z } else { min.z };
            p[0] * x + p[1] * y + p[2] * z + p[3] >= 0.0
        })
    }
}

fn normalize(plane: [f32; 4]) -> [f32; 4] {
    let len = Vector3::new(plane[0], plane[1], plane[2]).magnitude();
    if len > f32::EPSILON {
        plane.map(|v| v / len)
    } else {
        plane
    }
}

/// Camera data needed to cull one frame.
#[derive(Clone, Copy, Debug)]
pub struct CullView {
    pub eye: Vector3<f32>,
    pub frustum: Option<Frustum>,
    pub draw_distance: f32,
}

impl CullView {
    /// Whether a bounding sphere should be skipped this frame.
    pub fn is_culled(&self, center: Vector3<f32>, radius: f32) -> bool {
        if (center - self.eye).magnitude() - radius > self.draw_distance {
            return true;
        }
        self.frustum
            .is_some_and(|frustum| !frustum.contains_sphere(center, radius))
    }
}

#[cfg(test)]
mod tests {
    use cgmath::{Deg, Point3, perspective};

    use super::*;

    fn looking_down_neg_z() -> Frustum {
        let proj = perspective(Deg(60.0), 1.0, 0.1, 100.0);
        let view = Matrix4::look_at_rh(
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(0.0, 0.0, -1.0),
            Vector3::unit_y(),
        );
        Frustum::from_view_proj(&(proj * view))
    }

    #[test]
    fn sphere_in_front_is_visible_and_behind_is_not() {
        let frustum = looking_down_neg_z();
        assert!(frustum.contains_sphere(Vector3::new(0.0, 0.0, -10.0), 0.5));
        assert!(!frustum.contains_sphere(Vector3::new(0.0, 0.0, 10.0), 0.5));
        assert!(!frustum.contains_sphere(Vector3::new(0.0, 0.0, -200.0), 0.5));
    }

    #[test]
    fn aabb_straddling_a_plane_intersects() {
        let frustum = looking_down_neg_z();
        assert!(frustum.intersects_aabb(Vector3::new(-1.0, -1.0, -6.0), Vector3::new(1.0, 1.0, 1.0)));
        assert!(!frustum.intersects_aabb(Vector3::new(-1.0, -1.0, 2.0), Vector3::new(1.0, 1.0, 4.0)));
    }

    #[test]
    fn distance_culling_accounts_for_radius() {
        let view = CullView {
            eye: Vector3::new(0.0, 0.0, 0.0),
            frustum: None,
            draw_distance: 10.0,
        };
        assert!(!view.is_culled(Vector3::new(10.5, 0.0, 0.0), 1.0));
        assert!(view.is_culled(Vector3::new(12.0, 0.0, 0.0), 1.0));
    }
}
