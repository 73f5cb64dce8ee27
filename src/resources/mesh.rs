//! Procedural template meshes, one per block type.
//!
//! Templates are built at the block type's scale-1 size, so an instance
//! transform only needs the block's own scale. The shapes match the physics
//! colliders: boxes, a wedge rising towards -Z, a Y-up cylinder and a UV sphere.

use cgmath::{InnerSpace, Vector3};

use crate::data_structures::{
    block::{BlockType, Shape},
    model::{MeshData, ModelVertex},
};

const WHITE: [f32; 3] = [1.0, 1.0, 1.0];
const ROUND_SEGMENTS: u32 = 24;
const SPHERE_RINGS: u32 = 12;

pub fn template_mesh(block_type: BlockType) -> MeshData {
    let he = block_type.dimensions().half_extents;
    match block_type.shape() {
        Shape::Cuboid => cuboid(he),
        Shape::Ramp => ramp(he),
        Shape::Cylinder => cylinder(he.x, he.y, ROUND_SEGMENTS),
        Shape::Ball => sphere(he.x, ROUND_SEGMENTS, SPHERE_RINGS),
    }
}

/// Append a flat quad. Corners go counter-clockwise seen from outside.
fn quad(mesh: &mut MeshData, corners: [Vector3<f32>; 4]) {
    let normal = (corners[1] - corners[0]).cross(corners[2] - corners[0]).normalize();
    let base = mesh.vertices.len() as u32;
    for corner in corners {
        mesh.vertices.push(ModelVertex {
            position: corner.into(),
            normal: normal.into(),
            color: WHITE,
        });
    }
    mesh.indices.extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
}

fn triangle(mesh: &mut MeshData, corners: [Vector3<f32>; 3]) {
    let normal = (corners[1] - corners[0]).cross(corners[2] - corners[0]).normalize();
    let base = mesh.vertices.len() as u32;
    for corner in corners {
        mesh.vertices.push(ModelVertex {
            position: corner.into(),
            normal: normal.into(),
            color: WHITE,
        });
    }
    mesh.indices.extend_from_slice(&[base, base + 1, base + 2]);
}

fn cuboid(he: Vector3<f32>) -> MeshData {
    let v = |x: f32, y: f32, z: f32| Vector3::new(x * he.x, y * he.y, z * he.z);
    let mut mesh = MeshData::default();
    // +X, -X
    quad(&mut mesh, [v(1., -1., 1.), v(1., -1., -1.), v(1., 1., -1.), v(1., 1., 1.)]);
    quad(&mut mesh, [v(-1., -1., -1.), v(-1., -1., 1.), v(-1., 1., 1.), v(-1., 1., -1.)]);
    // +Y, -Y
    quad(&mut mesh, [v(-1., 1., 1.), v(1., 1., 1.), v(1., 1., -1.), v(-1., 1., -1.)]);
    quad(&mut mesh, [v(-1., -1., -1.), v(1., -1., -1.), v(1., -1., 1.), v(-1., -1., 1.)]);
    // +Z, -Z
    quad(&mut mesh, [v(-1., -1., 1.), v(1., -1., 1.), v(1., 1., 1.), v(-1., 1., 1.)]);
    quad(&mut mesh, [v(1., -1., -1.), v(-1., -1., -1.), v(-1., 1., -1.), v(1., 1., -1.)]);
    mesh
}

fn ramp(he: Vector3<f32>) -> MeshData {
    let v = |x: f32, y: f32, z: f32| Vector3::new(x * he.x, y * he.y, z * he.z);
    let mut mesh = MeshData::default();
    // bottom
    quad(&mut mesh, [v(-1., -1., -1.), v(1., -1., -1.), v(1., -1., 1.), v(-1., -1., 1.)]);
    // back wall
    quad(&mut mesh, [v(1., -1., -1.), v(-1., -1., -1.), v(-1., 1., -1.), v(1., 1., -1.)]);
    // slope
    quad(&mut mesh, [v(-1., -1., 1.), v(1., -1., 1.), v(1., 1., -1.), v(-1., 1., -1.)]);
    // sides
    triangle(&mut mesh, [v(1., -1., 1.), v(1., -1., -1.), v(1., 1., -1.)]);
    triangle(&mut mesh, [v(-1., -1., -1.), v(-1., -1., 1.), v(-1., 1., -1.)]);
    mesh
}

fn cylinder(radius: f32, half_height: f32, segments: u32) -> MeshData {
    let mut mesh = MeshData::default();
    let point = |i: u32, y: f32| {
        let angle = i as f32 / segments as f32 * std::f32::consts::TAU;
        Vector3::new(radius * angle.cos(), y, -radius * angle.sin())
    };
    for i in 0..segments {
        let (a, b) = (i, i + 1);
        // Side quads use smooth radial normals.
        let base = mesh.vertices.len() as u32;
        for (index, y) in [(a, -half_height), (b, -half_height), (b, half_height), (a, half_height)] {
            let p = point(index, y);
            mesh.vertices.push(ModelVertex {
                position: p.into(),
                normal: Vector3::new(p.x, 0.0, p.z).normalize().into(),
                color: WHITE,
            });
        }
        mesh.indices.extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);

        let top = Vector3::new(0.0, half_height, 0.0);
        let bottom = Vector3::new(0.0, -half_height, 0.0);
        triangle(&mut mesh, [top, point(a, half_height), point(b, half_height)]);
        triangle(&mut mesh, [bottom, point(b, -half_height), point(a, -half_height)]);
    }
    mesh
}

fn sphere(radius: f32, segments: u32, rings: u32) -> MeshData {
    let mut mesh = MeshData::default();
    for ring in 0..=rings {
        let phi = ring as f32 / rings as f32 * std::f32::consts::PI;
        for segment in 0..=segments {
            let theta = segment as f32 / segments as f32 * std::f32::consts::TAU;
            let normal = Vector3::new(phi.sin() * theta.cos(), phi.cos(), -phi.sin() * theta.sin());
            mesh.vertices.push(ModelVertex {
                position: (normal * radius).into(),
                normal: normal.into(),
                color: WHITE,
            });
        }
    }
    let stride = segments + 1;
    for ring in 0..rings {
        for segment in 0..segments {
            let i0 = ring * stride + segment;
            let i1 = i0 + 1;
            let i2 = i0 + stride;
            let i3 = i2 + 1;
            mesh.indices.extend_from_slice(&[i0, i2, i1, i1, i2, i3]);
        }
    }
    mesh
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bounds(mesh: &MeshData) -> (Vector3<f32>, Vector3<f32>) {
        let mut min = Vector3::new(f32::MAX, f32::MAX, f32::MAX);
        let mut max = Vector3::new(f32::MIN, f32::MIN, f32::MIN);
        for v in &mesh.vertices {
            for axis in 0..3 {
                min[axis] = min[axis].min(v.position[axis]);
                max[axis] = max[axis].max(v.position[axis]);
            }
        }
        (min, max)
    }

    #[test]
    fn templates_fit_their_dimensions() {
        for block_type in BlockType::ALL {
            let mesh = template_mesh(block_type);
            let he = block_type.dimensions().half_extents;
            let (min, max) = bounds(&mesh);
            for axis in 0..3 {
                assert!((max[axis] - he[axis]).abs() < 1e-4, "{block_type:?} axis {axis}");
                assert!((min[axis] + he[axis]).abs() < 1e-4, "{block_type:?} axis {axis}");
            }
            assert_eq!(mesh.indices.len() % 3, 0);
            assert!(mesh.indices.iter().all(|i| (*i as usize) < mesh.vertices.len()));
        }
    }

    #[test]
    fn cube_faces_point_outwards() {
        let mesh = template_mesh(BlockType::Cube);
        assert_eq!(mesh.triangle_count(), 12);
        for v in &mesh.vertices {
            let position = Vector3::from(v.position);
            let normal = Vector3::from(v.normal);
            assert!(position.dot(normal) > 0.0);
        }
    }

    #[test]
    fn ramp_slope_faces_up_and_forward() {
        let mesh = template_mesh(BlockType::Ramp);
        assert_eq!(mesh.triangle_count(), 8);
        let slope = Vector3::from(mesh.vertices[8].normal);
        assert!(slope.y > 0.0 && slope.z > 0.0);
    }
}
