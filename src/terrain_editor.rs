//! Brush-based terrain editing.
//!
//! A brush touches every vertex within `radius` of the brush center on the XZ
//! plane, weighted by `falloff = 1 - distance / radius`. Height edits recompute
//! the vertex normals and rebuild the physics heightfield; painting only
//! touches the vertex color buffer.

use cgmath::Vector3;
use instant::{Duration, Instant};

use crate::{
    data_structures::{block::unpack_rgb, terrain::Terrain},
    scene::Scene,
};

/// Fraction of the way toward the center height a smooth brush moves a vertex at full falloff.
const SMOOTH_FACTOR: f32 = 0.3;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TerrainMode {
    Raise,
    Lower,
    Smooth,
    Paint,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TerrainBrush {
    pub mode: TerrainMode,
    pub radius: f32,
    pub strength: f32,
    /// Required by [`TerrainMode::Paint`], ignored otherwise.
    pub color: Option<u32>,
}

impl TerrainBrush {
    pub fn new(mode: TerrainMode, radius: f32, strength: f32) -> Self {
        Self {
            mode,
            radius,
            strength,
            color: None,
        }
    }

    pub fn paint(radius: f32, color: u32) -> Self {
        Self {
            mode: TerrainMode::Paint,
            radius,
            strength: 1.0,
            color: Some(color),
        }
    }

    fn validate(&self, point: Vector3<f32>) -> anyhow::Result<()> {
        if !(self.radius > 0.0) || !self.radius.is_finite() {
            anyhow::bail!("brush radius must be positive, got {}", self.radius);
        }
        if !self.strength.is_finite() || self.strength < 0.0 {
            anyhow::bail!("brush strength must be a non-negative number, got {}", self.strength);
        }
        if !(point.x.is_finite() && point.z.is_finite()) {
            anyhow::bail!("brush center {:?} is not finite", point);
        }
        if self.mode == TerrainMode::Paint && self.color.is_none() {
            anyhow::bail!("paint brush without a color");
        }
        Ok(())
    }
}

/// Grid vertices within `radius` of `(x, z)` and their falloff weights.
fn affected_vertices(terrain: &Terrain, x: f32, z: f32, radius: f32) -> Vec<(usize, usize, f32)> {
    let spacing = terrain.spacing();
    let half = terrain.half_size();
    let max = terrain.resolution() as f32;
    let range = |center: f32| {
        let g = (center + half) / spacing;
        let lo = ((g - radius / spacing).floor()).clamp(0.0, max) as usize;
        let hi = ((g + radius / spacing).ceil()).clamp(0.0, max) as usize;
        lo..=hi
    };
    let mut vertices = Vec::new();
    for iz in range(z) {
        for ix in range(x) {
            let (vx, vz) = terrain.vertex_xz(ix, iz);
            let distance = ((vx - x).powi(2) + (vz - z).powi(2)).sqrt();
            if distance < radius {
                vertices.push((ix, iz, 1.0 - distance / radius));
            }
        }
    }
    vertices
}

/// Applies terrain brushes, throttled to roughly one per display frame.
#[derive(Debug)]
pub struct TerrainEditor {
    interval: Duration,
    last_applied: Option<Instant>,
    applied: usize,
}

impl TerrainEditor {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_applied: None,
            applied: 0,
        }
    }

    pub fn applied(&self) -> usize {
        self.applied
    }

    /// Apply one brush at `point`. Returns the number of vertices touched.
    ///
    /// Invalid input is an error and leaves the terrain untouched.
    pub fn apply_brush(&mut self, scene: &mut Scene, point: Vector3<f32>, brush: &TerrainBrush) -> anyhow::Result<usize> {
        brush.validate(point)?;
        let terrain = scene.terrain_mut();
        let vertices = affected_vertices(terrain, point.x, point.z, brush.radius);
        if vertices.is_empty() {
            return Ok(0);
        }

        match brush.mode {
            TerrainMode::Raise | TerrainMode::Lower => {
                let sign = if brush.mode == TerrainMode::Raise { 1.0 } else { -1.0 };
                for &(ix, iz, falloff) in &vertices {
                    let height = terrain.height(ix, iz) + sign * brush.strength * falloff;
                    terrain.set_height(ix, iz, height);
                }
            }
            TerrainMode::Smooth => {
                let Some(center) = terrain.height_at(point.x, point.z) else {
                    anyhow::bail!("smooth brush center {:?} is off the terrain", point);
                };
                for &(ix, iz, falloff) in &vertices {
                    let height = terrain.height(ix, iz);
                    terrain.set_height(ix, iz, height + (center - height) * SMOOTH_FACTOR * falloff);
                }
            }
            TerrainMode::Paint => {
                let target = unpack_rgb(brush.color.unwrap_or_default());
                let indices: Vec<(usize, f32)> = vertices
                    .iter()
                    .map(|&(ix, iz, falloff)| (terrain.index(ix, iz), falloff))
                    .collect();
                let colors = terrain.colors_mut();
                for (i, falloff) in indices {
                    for channel in 0..3 {
                        let current = colors[i][channel];
                        colors[i][channel] = current * (1.0 - falloff) + target[channel] * falloff;
                    }
                }
                self.applied += 1;
                return Ok(vertices.len());
            }
        }

        terrain.recompute_normals();
        scene.rebuild_terrain_collider();
        self.applied += 1;
        Ok(vertices.len())
    }

    /// Like [`apply_brush`](Self::apply_brush), but skipped (`Ok(None)`) when the
    /// previous application is younger than the throttle interval.
    pub fn try_apply_throttled(
        &mut self,
        now: Instant,
        scene: &mut Scene,
        point: Vector3<f32>,
        brush: &TerrainBrush,
    ) -> anyhow::Result<Option<usize>> {
        if let Some(last) = self.last_applied {
            if now.duration_since(last) < self.interval {
                return Ok(None);
            }
        }
        let touched = self.apply_brush(scene, point, brush)?;
        self.last_applied = Some(now);
        Ok(Some(touched))
    }
}

impl Default for TerrainEditor {
    fn default() -> Self {
        Self::new(Duration::from_millis(16))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::PhysicsConfig, physics::PhysicsWorld};

    fn scene() -> Scene {
        Scene::new(PhysicsWorld::new(PhysicsConfig::default().gravity), Terrain::flat(16.0, 16))
    }

    #[test]
    fn raise_hits_center_exactly_and_stops_at_radius() {
        let mut scene = scene();
        let mut editor = TerrainEditor::default();
        let touched = editor
            .apply_brush(&mut scene, Vector3::new(0.0, 0.0, 0.0), &TerrainBrush::new(TerrainMode::Raise, 2.0, 0.75))
            .unwrap();
        assert!(touched > 0);

        let terrain = scene.terrain();
        assert_eq!(terrain.height(8, 8), 0.75);
        assert!(terrain.height(9, 8) > 0.0 && terrain.height(9, 8) < 0.75);
        // Distance exactly 2 and beyond.
        assert_eq!(terrain.height(10, 8), 0.0);
        assert_eq!(terrain.height(11, 8), 0.0);
        assert_eq!(terrain.height_at(3.0, 0.0), Some(0.0));
        assert!(terrain.normal(9, 8).x > 0.0);
    }

    #[test]
    fn smooth_pulls_toward_the_center_height() {
        let mut scene = scene();
        scene.terrain_mut().set_height(9, 8, 1.0);
        let mut editor = TerrainEditor::default();
        editor
            .apply_brush(&mut scene, Vector3::new(0.0, 0.0, 0.0), &TerrainBrush::new(TerrainMode::Smooth, 2.0, 1.0))
            .unwrap();
        let smoothed = scene.terrain().height(9, 8);
        assert!(smoothed < 1.0 && smoothed > 0.8, "{smoothed}");
    }

    #[test]
    fn paint_allocates_colors_lazily() {
        let mut scene = scene();
        assert!(scene.terrain().colors().is_none());
        let mut editor = TerrainEditor::default();
        editor
            .apply_brush(&mut scene, Vector3::new(0.0, 0.0, 0.0), &TerrainBrush::paint(1.5, 0xff0000))
            .unwrap();
        let terrain = scene.terrain();
        assert_eq!(terrain.color(8, 8), [1.0, 0.0, 0.0]);
        assert!(terrain.colors().is_some());
        assert!(terrain.heights().iter().all(|h| *h == 0.0));
    }

    #[test]
    fn invalid_brush_leaves_terrain_untouched() {
        let mut scene = scene();
        let before = scene.terrain().clone();
        let mut editor = TerrainEditor::default();
        let center = Vector3::new(0.0, 0.0, 0.0);
        assert!(editor.apply_brush(&mut scene, center, &TerrainBrush::new(TerrainMode::Raise, 0.0, 1.0)).is_err());
        assert!(editor.apply_brush(&mut scene, center, &TerrainBrush::new(TerrainMode::Raise, 1.0, f32::NAN)).is_err());
        assert!(editor.apply_brush(&mut scene, center, &TerrainBrush::new(TerrainMode::Paint, 1.0, 1.0)).is_err());
        assert_eq!(scene.terrain(), &before);
        assert_eq!(editor.applied(), 0);
    }

    #[test]
    fn throttle_collapses_bursts() {
        let mut scene = scene();
        let mut editor = TerrainEditor::default();
        let brush = TerrainBrush::new(TerrainMode::Raise, 1.0, 0.1);
        let start = Instant::now();
        let point = Vector3::new(0.0, 0.0, 0.0);
        assert!(editor.try_apply_throttled(start, &mut scene, point, &brush).unwrap().is_some());
        assert!(editor
            .try_apply_throttled(start + Duration::from_millis(5), &mut scene, point, &brush)
            .unwrap()
            .is_none());
        assert!(editor
            .try_apply_throttled(start + Duration::from_millis(20), &mut scene, point, &brush)
            .unwrap()
            .is_some());
        assert_eq!(editor.applied(), 2);
    }
}
