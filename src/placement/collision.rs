//! Broad-phase overlap test used to reject double placements.
//!
//! Each block is treated as a box rotated around Y only and widened to a
//! world-aligned interval per axis (`|cos|·hx + |sin|·hz` on X, symmetric on Z).
//! Two blocks collide only if all three intervals overlap by more than
//! [`COLLISION_EPSILON`]. This is conservative: rotated neighbours can be
//! rejected even when their exact shapes would not touch. Genuine
//! interpenetration is still resolved by the physics engine.

use cgmath::Vector3;

use crate::data_structures::block::{BlockSpec, BlockType};

/// Overlap tolerance, so blocks sharing a face do not count as colliding.
pub const COLLISION_EPSILON: f32 = 1e-3;

/// World-aligned bounds of a Y-rotated block.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Footprint {
    pub min: Vector3<f32>,
    pub max: Vector3<f32>,
}

impl Footprint {
    pub fn new(position: Vector3<f32>, block_type: BlockType, rotation_y: f32, scale: f32) -> Self {
        let he = block_type.dimensions().half_extents * scale;
        let (sin, cos) = rotation_y.sin_cos();
        let (sin, cos) = (sin.abs(), cos.abs());
        let half = Vector3::new(cos * he.x + sin * he.z, he.y, sin * he.x + cos * he.z);
        Self {
            min: position - half,
            max: position + half,
        }
    }

    pub fn of(spec: &BlockSpec) -> Self {
        Self::new(spec.position, spec.block_type, spec.rotation.y, spec.scale)
    }

    pub fn overlaps(&self, other: &Footprint) -> bool {
        (0..3).all(|axis| {
            let lo = self.min[axis].max(other.min[axis]);
            let hi = self.max[axis].min(other.max[axis]);
            hi - lo > COLLISION_EPSILON
        })
    }
}

/// Whether a block at `position` would overlap any of `existing`.
pub fn check_collision<'a, I>(
    position: Vector3<f32>,
    block_type: BlockType,
    rotation_y: f32,
    scale: f32,
    existing: I,
) -> bool
where
    I: IntoIterator<Item = &'a BlockSpec>,
{
    let candidate = Footprint::new(position, block_type, rotation_y, scale);
    existing
        .into_iter()
        .any(|spec| candidate.overlaps(&Footprint::of(spec)))
}

#[cfg(test)]
mod tests {
    use std::f32::consts::FRAC_PI_4;

    use proptest::prelude::*;

    use super::*;

    fn spec(ty: BlockType, x: f32, y: f32, z: f32, rot_y: f32, scale: f32) -> BlockSpec {
        let mut spec = BlockSpec::new(ty, Vector3::new(x, y, z));
        spec.rotation.y = rot_y;
        spec.scale = scale;
        spec
    }

    #[test]
    fn face_neighbours_do_not_collide() {
        let a = spec(BlockType::Cube, 0.0, 0.5, 0.0, 0.0, 1.0);
        assert!(!check_collision(Vector3::new(1.0, 0.5, 0.0), BlockType::Cube, 0.0, 1.0, [&a]));
        assert!(!check_collision(Vector3::new(0.0, 1.5, 0.0), BlockType::Cube, 0.0, 1.0, [&a]));
        assert!(check_collision(Vector3::new(0.5, 0.5, 0.0), BlockType::Cube, 0.0, 1.0, [&a]));
    }

    #[test]
    fn rotation_widens_the_footprint() {
        let plank = Footprint::new(Vector3::new(0.0, 0.0, 0.0), BlockType::Plank, 0.0, 1.0);
        let turned = Footprint::new(Vector3::new(0.0, 0.0, 0.0), BlockType::Plank, FRAC_PI_4, 1.0);
        assert!(turned.max.z > plank.max.z);
        let quarter = Footprint::new(Vector3::new(0.0, 0.0, 0.0), BlockType::Plank, std::f32::consts::FRAC_PI_2, 1.0);
        assert!((quarter.max.x - 0.25).abs() < 1e-5);
        assert!((quarter.max.z - 1.0).abs() < 1e-5);
    }

    fn block_type() -> impl Strategy<Value = BlockType> {
        proptest::sample::select(BlockType::ALL.to_vec())
    }

    proptest! {
        #[test]
        fn collision_is_symmetric(
            ta in block_type(), tb in block_type(),
            ax in -4.0f32..4.0, ay in 0.0f32..3.0, az in -4.0f32..4.0,
            bx in -4.0f32..4.0, by in 0.0f32..3.0, bz in -4.0f32..4.0,
            ra in -3.2f32..3.2, rb in -3.2f32..3.2,
            sa in 0.25f32..3.0, sb in 0.25f32..3.0,
        ) {
            let a = spec(ta, ax, ay, az, ra, sa);
            let b = spec(tb, bx, by, bz, rb, sb);
            prop_assert_eq!(
                check_collision(a.position, ta, ra, sa, [&b]),
                check_collision(b.position, tb, rb, sb, [&a]),
            );
        }
    }
}
