//! Heightfield terrain.
//!
//! The terrain is a square grid centered on the origin with `resolution`
//! segments per edge. Heights and normals are stored per vertex in row-major
//! order (rows along Z, columns along X), which is also the layout the physics
//! heightfield expects. Vertex colors are only allocated once something is
//! painted.

use cgmath::{InnerSpace, Vector3};
use serde::{Deserialize, Serialize};

use crate::data_structures::{
    block::unpack_rgb,
    model::{MeshData, ModelVertex},
};

/// Base grass tint used for unpainted vertices.
pub const DEFAULT_TERRAIN_COLOR: u32 = 0x5d8a4a;

/// Largest accepted grid resolution. Mesh indices are `u32`.
pub const MAX_TERRAIN_RESOLUTION: usize = 2048;

#[derive(Clone, Debug, PartialEq)]
pub struct Terrain {
    size: f32,
    resolution: usize,
    heights: Vec<f32>,
    normals: Vec<[f32; 3]>,
    colors: Option<Vec<[f32; 3]>>,
    mesh_dirty: bool,
}

/// Result of intersecting a ray with the terrain surface.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TerrainHit {
    pub distance: f32,
    pub point: Vector3<f32>,
    pub normal: Vector3<f32>,
}

impl Terrain {
    pub fn flat(size: f32, resolution: usize) -> Self {
        let resolution = resolution.max(1);
        let count = (resolution + 1) * (resolution + 1);
        Self {
            size,
            resolution,
            heights: vec![0.0; count],
            normals: vec![[0.0, 1.0, 0.0]; count],
            colors: None,
            mesh_dirty: true,
        }
    }

    pub fn size(&self) -> f32 {
        self.size
    }

    pub fn resolution(&self) -> usize {
        self.resolution
    }

    pub fn vertices_per_edge(&self) -> usize {
        self.resolution + 1
    }

    /// World distance between two neighbouring vertices.
    pub fn spacing(&self) -> f32 {
        self.size / self.resolution as f32
    }

    pub fn half_size(&self) -> f32 {
        self.size * 0.5
    }

    pub fn heights(&self) -> &[f32] {
        &self.heights
    }

    pub fn colors(&self) -> Option<&[[f32; 3]]> {
        self.colors.as_deref()
    }

    pub fn index(&self, ix: usize, iz: usize) -> usize {
        iz * self.vertices_per_edge() + ix
    }

    pub fn height(&self, ix: usize, iz: usize) -> f32 {
        self.heights[self.index(ix, iz)]
    }

    pub fn set_height(&mut self, ix: usize, iz: usize, height: f32) {
        let i = self.index(ix, iz);
        self.heights[i] = height;
        self.mesh_dirty = true;
    }

    pub fn normal(&self, ix: usize, iz: usize) -> Vector3<f32> {
        self.normals[self.index(ix, iz)].into()
    }

    /// World-space XZ of a grid vertex.
    pub fn vertex_xz(&self, ix: usize, iz: usize) -> (f32, f32) {
        let spacing = self.spacing();
        (
            ix as f32 * spacing - self.half_size(),
            iz as f32 * spacing - self.half_size(),
        )
    }

    pub fn vertex_position(&self, ix: usize, iz: usize) -> Vector3<f32> {
        let (x, z) = self.vertex_xz(ix, iz);
        Vector3::new(x, self.height(ix, iz), z)
    }

    /// Fractional grid coordinates of a world XZ position, or `None` off the grid.
    pub fn to_grid(&self, x: f32, z: f32) -> Option<(f32, f32)> {
        let gx = (x + self.half_size()) / self.spacing();
        let gz = (z + self.half_size()) / self.spacing();
        let max = self.resolution as f32;
        if !(0.0..=max).contains(&gx) || !(0.0..=max).contains(&gz) {
            return None;
        }
        Some((gx, gz))
    }

    pub fn contains(&self, x: f32, z: f32) -> bool {
        self.to_grid(x, z).is_some()
    }

    /// Bilinearly interpolated surface height at a world XZ position.
    pub fn height_at(&self, x: f32, z: f32) -> Option<f32> {
        let (gx, gz) = self.to_grid(x, z)?;
        let last = self.resolution - 1;
        let x0 = (gx.floor() as usize).min(last);
        let z0 = (gz.floor() as usize).min(last);
        let tx = gx - x0 as f32;
        let tz = gz - z0 as f32;
        let h00 = self.height(x0, z0);
        let h10 = self.height(x0 + 1, z0);
        let h01 = self.height(x0, z0 + 1);
        let h11 = self.height(x0 + 1, z0 + 1);
        let near = h00 + (h10 - h00) * tx;
        let far = h01 + (h11 - h01) * tx;
        Some(near + (far - near) * tz)
    }

    pub fn normal_at(&self, x: f32, z: f32) -> Option<Vector3<f32>> {
        let (gx, gz) = self.to_grid(x, z)?;
        let ix = gx.round() as usize;
        let iz = gz.round() as usize;
        Some(self.normal(ix, iz))
    }

    /// Recompute all vertex normals from central height differences.
    pub fn recompute_normals(&mut self) {
        let n = self.vertices_per_edge();
        let spacing = self.spacing();
        for iz in 0..n {
            for ix in 0..n {
                let left = self.height(ix.saturating_sub(1), iz);
                let right = self.height((ix + 1).min(n - 1), iz);
                let down = self.height(ix, iz.saturating_sub(1));
                let up = self.height(ix, (iz + 1).min(n - 1));
                let dx = (right - left) / (spacing * ((ix + 1).min(n - 1) - ix.saturating_sub(1)) as f32);
                let dz = (up - down) / (spacing * ((iz + 1).min(n - 1) - iz.saturating_sub(1)) as f32);
                let normal = Vector3::new(-dx, 1.0, -dz).normalize();
                let i = self.index(ix, iz);
                self.normals[i] = normal.into();
            }
        }
        self.mesh_dirty = true;
    }

    /// Vertex color, falling back to the base tint while nothing was painted.
    pub fn color(&self, ix: usize, iz: usize) -> [f32; 3] {
        match &self.colors {
            Some(colors) => colors[self.index(ix, iz)],
            None => unpack_rgb(DEFAULT_TERRAIN_COLOR),
        }
    }

    /// Mutable access to the color buffer, allocating it on first use.
    pub fn colors_mut(&mut self) -> &mut [[f32; 3]] {
        let count = self.heights.len();
        self.mesh_dirty = true;
        self.colors
            .get_or_insert_with(|| vec![unpack_rgb(DEFAULT_TERRAIN_COLOR); count])
    }

    pub fn is_mesh_dirty(&self) -> bool {
        self.mesh_dirty
    }

    /// Clear the upload flag, returning whether it was set.
    pub fn take_mesh_dirty(&mut self) -> bool {
        std::mem::replace(&mut self.mesh_dirty, false)
    }

    /// March the ray across the heightfield and refine the first crossing by bisection.
    pub fn raycast(
        &self,
        origin: Vector3<f32>,
        direction: Vector3<f32>,
        max_distance: f32,
    ) -> Option<TerrainHit> {
        let direction = direction.normalize();
        let step = self.spacing() * 0.5;
        let above = |t: f32| -> Option<bool> {
            let p = origin + direction * t;
            self.height_at(p.x, p.z).map(|h| p.y >= h)
        };

        let mut prev_t = 0.0;
        let mut prev_above = above(0.0);
        let mut t = step;
        while t <= max_distance {
            let now = above(t);
            if let (Some(true), Some(false)) = (prev_above, now) {
                let (mut lo, mut hi) = (prev_t, t);
                for _ in 0..16 {
                    let mid = (lo + hi) * 0.5;
                    match above(mid) {
                        Some(true) => lo = mid,
                        _ => hi = mid,
                    }
                }
                let point = origin + direction * hi;
                let height = self.height_at(point.x, point.z)?;
                let normal = self.normal_at(point.x, point.z)?;
                return Some(TerrainHit {
                    distance: hi,
                    point: Vector3::new(point.x, height, point.z),
                    normal,
                });
            }
            prev_t = t;
            prev_above = now;
            t += step;
        }
        None
    }

    /// Triangulated surface; two counter-clockwise triangles per cell seen from above.
    pub fn to_mesh_data(&self) -> MeshData {
        let n = self.vertices_per_edge();
        let mut vertices = Vec::with_capacity(n * n);
        for iz in 0..n {
            for ix in 0..n {
                vertices.push(ModelVertex {
                    position: self.vertex_position(ix, iz).into(),
                    normal: self.normals[self.index(ix, iz)],
                    color: self.color(ix, iz),
                });
            }
        }
        let mut indices = Vec::with_capacity(self.resolution * self.resolution * 6);
        for iz in 0..self.resolution {
            for ix in 0..self.resolution {
                let i0 = self.index(ix, iz) as u32;
                let i1 = self.index(ix + 1, iz) as u32;
                let i2 = self.index(ix, iz + 1) as u32;
                let i3 = self.index(ix + 1, iz + 1) as u32;
                indices.extend_from_slice(&[i0, i2, i1, i1, i2, i3]);
            }
        }
        MeshData { vertices, indices }
    }

    pub fn to_record(&self) -> TerrainRecord {
        TerrainRecord {
            size: self.size,
            resolution: self.resolution,
            heights: self.heights.clone(),
            colors: self.colors.clone(),
        }
    }

    pub fn from_record(record: TerrainRecord) -> anyhow::Result<Self> {
        if record.resolution == 0
            || record.resolution > MAX_TERRAIN_RESOLUTION
            || !(record.size > 0.0)
            || !record.size.is_finite()
        {
            anyhow::bail!(
                "terrain record has invalid layout (size {}, resolution {})",
                record.size,
                record.resolution
            );
        }
        let count = (record.resolution + 1) * (record.resolution + 1);
        if record.heights.len() != count {
            anyhow::bail!(
                "terrain record holds {} heights, expected {}",
                record.heights.len(),
                count
            );
        }
        if let Some(bad) = record.heights.iter().position(|h| !h.is_finite()) {
            anyhow::bail!("terrain height {} is not finite", bad);
        }
        if let Some(colors) = &record.colors {
            if colors.len() != count {
                anyhow::bail!("terrain record holds {} colors, expected {}", colors.len(), count);
            }
            if colors.iter().flatten().any(|c| !c.is_finite()) {
                anyhow::bail!("terrain record holds non-finite colors");
            }
        }
        let mut terrain = Self {
            size: record.size,
            resolution: record.resolution,
            heights: record.heights,
            normals: vec![[0.0, 1.0, 0.0]; count],
            colors: record.colors,
            mesh_dirty: true,
        };
        terrain.recompute_normals();
        Ok(terrain)
    }
}

/// Serialisable terrain heights and optional paint.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TerrainRecord {
    pub size: f32,
    pub resolution: usize,
    pub heights: Vec<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub colors: Option<Vec<[f32; 3]>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(size: f32, resolution: usize, heights: Vec<f32>) -> TerrainRecord {
        TerrainRecord {
            size,
            resolution,
            heights,
            colors: None,
        }
    }

    #[test]
    fn hostile_records_are_rejected() {
        assert!(Terrain::from_record(record(16.0, usize::MAX, vec![0.0; 4])).is_err());
        assert!(Terrain::from_record(record(16.0, MAX_TERRAIN_RESOLUTION + 1, Vec::new())).is_err());
        assert!(Terrain::from_record(record(f32::INFINITY, 1, vec![0.0; 4])).is_err());
        assert!(Terrain::from_record(record(f32::NAN, 1, vec![0.0; 4])).is_err());
        assert!(Terrain::from_record(record(16.0, 1, vec![0.0, f32::NAN, 0.0, 0.0])).is_err());
        assert!(Terrain::from_record(record(16.0, 1, vec![0.0, 0.0, f32::INFINITY, 0.0])).is_err());

        let mut painted = record(16.0, 1, vec![0.0; 4]);
        painted.colors = Some(vec![[0.0, f32::NAN, 0.0]; 4]);
        assert!(Terrain::from_record(painted).is_err());

        assert!(Terrain::from_record(record(16.0, 1, vec![0.0, 1.0, 2.0, 3.0])).is_ok());
    }

    #[test]
    fn flat_terrain_has_no_colors_until_painted() {
        let mut terrain = Terrain::flat(16.0, 8);
        assert!(terrain.colors().is_none());
        terrain.colors_mut()[0] = [1.0, 0.0, 0.0];
        assert_eq!(terrain.color(0, 0), [1.0, 0.0, 0.0]);
        assert_eq!(terrain.colors().map(|c| c.len()), Some(81));
    }

    #[test]
    fn height_is_interpolated_between_vertices() {
        let mut terrain = Terrain::flat(4.0, 4);
        // vertex (2, 2) sits at the origin
        terrain.set_height(2, 2, 2.0);
        assert_eq!(terrain.height_at(0.0, 0.0), Some(2.0));
        assert_eq!(terrain.height_at(0.5, 0.0), Some(1.0));
        assert_eq!(terrain.height_at(10.0, 0.0), None);
    }

    #[test]
    fn normals_tilt_away_from_slope() {
        let mut terrain = Terrain::flat(4.0, 4);
        for iz in 0..5 {
            for ix in 0..5 {
                terrain.set_height(ix, iz, ix as f32);
            }
        }
        terrain.recompute_normals();
        let n = terrain.normal(2, 2);
        assert!(n.x < 0.0 && n.y > 0.0);
        assert!(n.z.abs() < 1e-6);
    }

    #[test]
    fn ray_from_above_hits_surface() {
        let mut terrain = Terrain::flat(8.0, 8);
        for iz in 0..9 {
            for ix in 0..9 {
                terrain.set_height(ix, iz, 1.0);
            }
        }
        let hit = terrain
            .raycast(Vector3::new(0.3, 10.0, -0.2), Vector3::new(0.0, -1.0, 0.0), 100.0)
            .unwrap();
        assert!((hit.point.y - 1.0).abs() < 1e-3);
        assert!((hit.distance - 9.0).abs() < 1e-2);
    }

    #[test]
    fn mesh_faces_up() {
        let mesh = Terrain::flat(2.0, 2).to_mesh_data();
        assert_eq!(mesh.vertices.len(), 9);
        assert_eq!(mesh.triangle_count(), 8);
        let [a, b, c] = [0, 1, 2].map(|k| Vector3::from(mesh.vertices[mesh.indices[k] as usize].position));
        assert!((b - a).cross(c - a).y > 0.0);
    }

    #[test]
    fn record_with_wrong_length_is_rejected() {
        let mut record = Terrain::flat(4.0, 2).to_record();
        record.heights.pop();
        assert!(Terrain::from_record(record).is_err());
    }
}
