//! Ray picking against the terrain and block volumes.
//!
//! Picking runs on the CPU: the cursor ray from the camera is intersected with
//! the terrain heightfield and with the oriented collision box of every block,
//! and the closest hit wins. A miss is `None`; callers simply skip the preview
//! for that frame.

use cgmath::{InnerSpace, Quaternion, Rotation, Vector3};

use crate::data_structures::{
    block::{BlockId, BlockSpec},
    instance::euler_to_quaternion,
    terrain::Terrain,
};

/// Longest distance considered by a pick.
pub const MAX_PICK_DISTANCE: f32 = 1000.0;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Ray {
    pub origin: Vector3<f32>,
    /// Unit length.
    pub direction: Vector3<f32>,
}

impl Ray {
    pub fn new(origin: Vector3<f32>, direction: Vector3<f32>) -> Self {
        Self {
            origin,
            direction: direction.normalize(),
        }
    }

    pub fn at(&self, distance: f32) -> Vector3<f32> {
        self.origin + self.direction * distance
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PickTarget {
    Terrain,
    Block(BlockId),
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PickHit {
    pub point: Vector3<f32>,
    /// Outward surface normal at `point`.
    pub normal: Vector3<f32>,
    pub distance: f32,
    pub target: PickTarget,
}

/// Intersect a ray with a box of `half_extents` centered at `center` and rotated by `rotation`.
///
/// Returns the entry distance and the world-space normal of the entered face.
/// Rays starting inside the box do not hit it.
pub fn ray_box(
    ray: &Ray,
    center: Vector3<f32>,
    half_extents: Vector3<f32>,
    rotation: Quaternion<f32>,
) -> Option<(f32, Vector3<f32>)> {
    let inverse = rotation.conjugate();
    let origin = inverse.rotate_vector(ray.origin - center);
    let direction = inverse.rotate_vector(ray.direction);

    let mut t_near = f32::NEG_INFINITY;
    let mut t_far = f32::INFINITY;
    let mut near_axis = 0;
    let mut near_sign = 0.0;

    for axis in 0..3 {
        let (o, d, h) = (origin[axis], direction[axis], half_extents[axis]);
        if d.abs() < 1e-8 {
            if o.abs() > h {
                return None;
            }
            continue;
        }
        let mut t0 = (-h - o) / d;
        let mut t1 = (h - o) / d;
        // the face entered first is on the side the ray comes from
        let mut sign = -1.0;
        if t0 > t1 {
            std::mem::swap(&mut t0, &mut t1);
            sign = 1.0;
        }
        if t0 > t_near {
            t_near = t0;
            near_axis = axis;
            near_sign = sign;
        }
        t_far = t_far.min(t1);
        if t_near > t_far {
            return None;
        }
    }
    if t_near < 0.0 {
        return None;
    }

    let mut local_normal = Vector3::new(0.0, 0.0, 0.0);
    local_normal[near_axis] = near_sign;
    Some((t_near, rotation.rotate_vector(local_normal)))
}

/// Oriented collision box of a block: center, scaled half-extents and rotation.
pub fn block_box(spec: &BlockSpec) -> (Vector3<f32>, Vector3<f32>, Quaternion<f32>) {
    (
        spec.position,
        spec.block_type.dimensions().half_extents * spec.scale,
        euler_to_quaternion(spec.rotation),
    )
}

/// Closest hit among the terrain and the given blocks.
pub fn pick<'a, I>(ray: &Ray, terrain: Option<&Terrain>, blocks: I) -> Option<PickHit>
where
    I: IntoIterator<Item = (BlockId, &'a BlockSpec)>,
{
    let mut best: Option<PickHit> = terrain
        .and_then(|t| t.raycast(ray.origin, ray.direction, MAX_PICK_DISTANCE))
        .map(|hit| PickHit {
            point: hit.point,
            normal: hit.normal,
            distance: hit.distance,
            target: PickTarget::Terrain,
        });

    for (id, spec) in blocks {
        let (center, half_extents, rotation) = block_box(spec);
        let Some((distance, normal)) = ray_box(ray, center, half_extents, rotation) else {
            continue;
        };
        if distance > MAX_PICK_DISTANCE || best.is_some_and(|b| b.distance <= distance) {
            continue;
        }
        best = Some(PickHit {
            point: ray.at(distance),
            normal,
            distance,
            target: PickTarget::Block(id),
        });
    }
    best
}

#[cfg(test)]
mod tests {
    use cgmath::One;

    use super::*;
    use crate::data_structures::block::BlockType;

    fn down_at(x: f32, z: f32) -> Ray {
        Ray::new(Vector3::new(x, 20.0, z), Vector3::new(0.0, -1.0, 0.0))
    }

    #[test]
    fn box_hit_reports_entered_face() {
        let ray = Ray::new(Vector3::new(-5.0, 0.0, 0.0), Vector3::new(1.0, 0.0, 0.0));
        let (t, n) = ray_box(&ray, Vector3::new(0.0, 0.0, 0.0), Vector3::new(0.5, 0.5, 0.5), Quaternion::one()).unwrap();
        assert!((t - 4.5).abs() < 1e-5);
        assert_eq!(n, Vector3::new(-1.0, 0.0, 0.0));
    }

    #[test]
    fn box_miss_and_inside_are_none() {
        let ray = Ray::new(Vector3::new(-5.0, 2.0, 0.0), Vector3::new(1.0, 0.0, 0.0));
        assert!(ray_box(&ray, Vector3::new(0.0, 0.0, 0.0), Vector3::new(0.5, 0.5, 0.5), Quaternion::one()).is_none());
        let inside = Ray::new(Vector3::new(0.0, 0.0, 0.0), Vector3::new(1.0, 0.0, 0.0));
        assert!(ray_box(&inside, Vector3::new(0.0, 0.0, 0.0), Vector3::new(0.5, 0.5, 0.5), Quaternion::one()).is_none());
    }

    #[test]
    fn block_in_front_of_terrain_wins() {
        let terrain = Terrain::flat(16.0, 16);
        let cube = BlockSpec::new(BlockType::Cube, Vector3::new(0.0, 0.5, 0.0));
        let hit = pick(&down_at(0.0, 0.0), Some(&terrain), [(7, &cube)]).unwrap();
        assert_eq!(hit.target, PickTarget::Block(7));
        assert!((hit.point.y - 1.0).abs() < 1e-5);
        assert!((hit.normal - Vector3::new(0.0, 1.0, 0.0)).magnitude() < 1e-5);

        let hit = pick(&down_at(3.0, 3.0), Some(&terrain), [(7, &cube)]).unwrap();
        assert_eq!(hit.target, PickTarget::Terrain);
        assert!(hit.point.y.abs() < 1e-3);
    }

    #[test]
    fn miss_everything_is_none() {
        let ray = Ray::new(Vector3::new(0.0, 5.0, 0.0), Vector3::new(0.0, 1.0, 0.0));
        assert!(pick(&ray, Some(&Terrain::flat(8.0, 8)), std::iter::empty()).is_none());
    }
}
