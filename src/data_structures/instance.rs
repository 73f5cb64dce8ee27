//! Instance transformation data for GPU rendering.
//!
//! Per-instance data like position, rotation, scale and color is packed into
//! flat GPU buffers and passed to the block shaders, so all blocks of one type
//! are drawn with a single instanced draw call.

use cgmath::{Deg, InnerSpace, Matrix3, Matrix4, One, Quaternion, Rotation3, Vector3};

use crate::data_structures::model;

/// Per-instance transformation: position, rotation (as quaternion), and scale.
///
/// Used for GPU instancing: multiple copies of the same template mesh are
/// rendered with different transforms in a single draw call.
#[derive(Clone, Debug, PartialEq)]
pub struct Instance {
    pub position: Vector3<f32>,
    pub rotation: Quaternion<f32>,
    pub scale: Vector3<f32>,
}

impl Instance {
    /// Create a new instance with identity transformation (no move, rotate, or scale).
    pub fn new() -> Self {
        Self {
            position: Vector3::new(0.0, 0.0, 0.0),
            // `Quaternion::one()` is the identity quaternion (no rotation)
            rotation: Quaternion::one(),
            scale: Vector3::new(1.0, 1.0, 1.0),
        }
    }

    /// Build the transform of a block from its editor representation.
    pub fn from_block(position: Vector3<f32>, rotation: Vector3<f32>, scale: f32) -> Self {
        Self {
            position,
            rotation: euler_to_quaternion(rotation),
            scale: Vector3::new(scale, scale, scale),
        }
    }

    pub fn to_matrix(&self) -> Matrix4<f32> {
        Matrix4::from_translation(self.position)
            * Matrix4::from(self.rotation)
            * Matrix4::from_nonuniform_scale(self.scale.x, self.scale.y, self.scale.z)
    }

    pub fn to_raw(&self, color: [f32; 4]) -> InstanceRaw {
        InstanceRaw {
            model: self.to_matrix().into(),
            normal: Matrix3::from(self.rotation).into(),
            color,
        }
    }
}

impl From<Vector3<f32>> for Instance {
    fn from(position: Vector3<f32>) -> Self {
        Instance {
            position,
            ..Default::default()
        }
    }
}

impl Default for Instance {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-axis Euler angles (radians) to a rotation applying X, then Y, then Z.
///
/// Physics and rendering both go through this function so the collider and
/// the visual never disagree about orientation.
pub fn euler_to_quaternion(rotation: Vector3<f32>) -> Quaternion<f32> {
    let to_deg = |rad: f32| Deg(rad.to_degrees());
    Quaternion::from_angle_z(to_deg(rotation.z))
        * Quaternion::from_angle_y(to_deg(rotation.y))
        * Quaternion::from_angle_x(to_deg(rotation.x))
}

/// Inverse of [`euler_to_quaternion`]. Y is kept within `[-pi/2, pi/2]`.
pub fn quaternion_to_euler(rotation: Quaternion<f32>) -> Vector3<f32> {
    let q = rotation.normalize();
    let (w, x, y, z) = (q.s, q.v.x, q.v.y, q.v.z);
    let roll = (2.0 * (w * x + y * z)).atan2(1.0 - 2.0 * (x * x + y * y));
    let pitch = (2.0 * (w * y - z * x)).clamp(-1.0, 1.0).asin();
    let yaw = (2.0 * (w * z + x * y)).atan2(1.0 - 2.0 * (y * y + z * z));
    Vector3::new(roll, pitch, yaw)
}

/**
 * The raw instance is the actual data stored on the GPU
 */
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct InstanceRaw {
    pub model: [[f32; 4]; 4],
    pub normal: [[f32; 3]; 3],
    pub color: [f32; 4],
}

impl InstanceRaw {
    pub fn translation(&self) -> [f32; 3] {
        [self.model[3][0], self.model[3][1], self.model[3][2]]
    }
}

/**
 * As we store vertex data directly in the GPU memory we need to tell what the bytes refer to:
 *
 * offset: zero as we want to use the full space.
 * stride: length of an instance
 *
 * Stride layout here: model matrix as four vec4, normal matrix as three vec3, then RGBA.
 */
impl model::Vertex for InstanceRaw {
    fn desc() -> wgpu::VertexBufferLayout<'static> {
        use std::mem;
        wgpu::VertexBufferLayout {
            array_stride: mem::size_of::<InstanceRaw>() as wgpu::BufferAddress,
            // Shaders only advance to the next instance once a new instance starts
            step_mode: wgpu::VertexStepMode::Instance,
            attributes: &[
                wgpu::VertexAttribute {
                    offset: 0,
                    shader_location: 5,
                    format: wgpu::VertexFormat::Float32x4,
                },
                // A mat4 takes up 4 vertex slots as it is technically 4 vec4s.
                wgpu::VertexAttribute {
                    offset: mem::size_of::<[f32; 4]>() as wgpu::BufferAddress,
                    shader_location: 6,
                    format: wgpu::VertexFormat::Float32x4,
                },
                wgpu::VertexAttribute {
                    offset: mem::size_of::<[f32; 8]>() as wgpu::BufferAddress,
                    shader_location: 7,
                    format: wgpu::VertexFormat::Float32x4,
                },
                wgpu::VertexAttribute {
                    offset: mem::size_of::<[f32; 12]>() as wgpu::BufferAddress,
                    shader_location: 8,
                    format: wgpu::VertexFormat::Float32x4,
                },
                wgpu::VertexAttribute {
                    offset: mem::size_of::<[f32; 16]>() as wgpu::BufferAddress,
                    shader_location: 9,
                    format: wgpu::VertexFormat::Float32x3,
                },
                wgpu::VertexAttribute {
                    offset: mem::size_of::<[f32; 19]>() as wgpu::BufferAddress,
                    shader_location: 10,
                    format: wgpu::VertexFormat::Float32x3,
                },
                wgpu::VertexAttribute {
                    offset: mem::size_of::<[f32; 22]>() as wgpu::BufferAddress,
                    shader_location: 11,
                    format: wgpu::VertexFormat::Float32x3,
                },
                wgpu::VertexAttribute {
                    offset: mem::size_of::<[f32; 25]>() as wgpu::BufferAddress,
                    shader_location: 12,
                    format: wgpu::VertexFormat::Float32x4,
                },
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use cgmath::{InnerSpace, Rotation};

    use super::*;

    #[test]
    fn raw_carries_translation_and_color() {
        let instance = Instance::from_block(Vector3::new(1.0, 2.0, 3.0), Vector3::new(0.0, 0.0, 0.0), 2.0);
        let raw = instance.to_raw([0.5, 0.25, 1.0, 1.0]);
        assert_eq!(raw.translation(), [1.0, 2.0, 3.0]);
        assert_eq!(raw.model[0][0], 2.0);
        assert_eq!(raw.color, [0.5, 0.25, 1.0, 1.0]);
    }

    #[test]
    fn yaw_rotates_around_up() {
        let q = euler_to_quaternion(Vector3::new(0.0, std::f32::consts::FRAC_PI_2, 0.0));
        let v = q.rotate_vector(Vector3::unit_x());
        assert!((v - Vector3::new(0.0, 0.0, -1.0)).magnitude() < 1e-5);
    }

    #[test]
    fn euler_angles_survive_a_quaternion_round_trip() {
        for angles in [
            Vector3::new(0.0, 0.0, 0.0),
            Vector3::new(0.3, -1.2, 2.5),
            Vector3::new(-2.8, 0.7, -0.4),
            Vector3::new(0.0, std::f32::consts::FRAC_PI_4, 0.0),
        ] {
            let back = quaternion_to_euler(euler_to_quaternion(angles));
            assert!((back - angles).magnitude() < 1e-4, "{:?} came back as {:?}", angles, back);
        }
    }

    #[test]
    fn raw_layout_is_tightly_packed() {
        assert_eq!(std::mem::size_of::<InstanceRaw>(), 29 * 4);
    }
}
