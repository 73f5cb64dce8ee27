//! Render surfaces.
//!
//! A [`RenderSurface`] is whatever the frame loop draws into. The GPU
//! implementation lives in [`crate::context::Context`]; [`HeadlessSurface`]
//! keeps the last uploads in memory so sessions can run without a window, e.g.
//! in tests or on a server validating scenes.
//!
//! # Draw order
//!
//! 1. terrain mesh
//! 2. opaque block batches, one instanced draw per [`BlockType`]
//! 3. the ghost preview, alpha blended
//! 4. the light gizmo

use std::collections::BTreeMap;

use crate::{
    camera::CameraUniform,
    config::QualitySettings,
    data_structures::{block::BlockType, instance::InstanceRaw, terrain::Terrain},
    instancing::InstanceSink,
};

/// Ghost preview to draw this frame.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GhostDraw {
    pub block_type: BlockType,
    pub instance: InstanceRaw,
}

pub trait RenderSurface: InstanceSink {
    /// Whether frames would be seen; hidden surfaces pause the simulation.
    fn is_visible(&self) -> bool;

    /// Replace the terrain mesh.
    fn upload_terrain(&mut self, terrain: &Terrain);

    fn upload_ghost(&mut self, ghost: Option<GhostDraw>);

    fn upload_camera(&mut self, camera: &CameraUniform);

    fn render(&mut self) -> anyhow::Result<()>;

    fn resize(&mut self, _width: u32, _height: u32) {}

    /// Apply a quality tier's MSAA and render scale.
    fn apply_quality(&mut self, _settings: &QualitySettings) {}

    /// Read back the last rendered frame.
    fn capture_thumbnail(&mut self) -> anyhow::Result<image::RgbaImage> {
        anyhow::bail!("this surface cannot capture frames")
    }

    /// Free GPU resources. Called once during teardown.
    fn release(&mut self) -> anyhow::Result<()> {
        Ok(())
    }
}

impl InstanceSink for Box<dyn RenderSurface> {
    fn upload_instances(&mut self, block_type: BlockType, instances: &[InstanceRaw]) {
        (**self).upload_instances(block_type, instances);
    }
}

/// In-memory surface.
#[derive(Debug)]
pub struct HeadlessSurface {
    pub visible: bool,
    /// Fail every render call, for exercising error paths.
    pub fail_renders: bool,
    batches: BTreeMap<BlockType, Vec<InstanceRaw>>,
    ghost: Option<GhostDraw>,
    camera: Option<CameraUniform>,
    terrain_vertices: usize,
    instance_uploads: usize,
    terrain_uploads: usize,
    renders: usize,
    size: (u32, u32),
    msaa_samples: u32,
    released: bool,
}

impl Default for HeadlessSurface {
    fn default() -> Self {
        Self {
            visible: true,
            fail_renders: false,
            batches: BTreeMap::new(),
            ghost: None,
            camera: None,
            terrain_vertices: 0,
            instance_uploads: 0,
            terrain_uploads: 0,
            renders: 0,
            size: (1280, 720),
            msaa_samples: 1,
            released: false,
        }
    }
}

impl HeadlessSurface {
    pub fn instances(&self, block_type: BlockType) -> &[InstanceRaw] {
        self.batches
            .get(&block_type)
            .map(|b| b.as_slice())
            .unwrap_or(&[])
    }

    pub fn ghost(&self) -> Option<&GhostDraw> {
        self.ghost.as_ref()
    }

    pub fn has_camera(&self) -> bool {
        self.camera.is_some()
    }

    pub fn terrain_vertices(&self) -> usize {
        self.terrain_vertices
    }

    pub fn instance_uploads(&self) -> usize {
        self.instance_uploads
    }

    pub fn terrain_uploads(&self) -> usize {
        self.terrain_uploads
    }

    pub fn renders(&self) -> usize {
        self.renders
    }

    pub fn size(&self) -> (u32, u32) {
        self.size
    }

    pub fn msaa_samples(&self) -> u32 {
        self.msaa_samples
    }

    pub fn is_released(&self) -> bool {
        self.released
    }
}

impl InstanceSink for HeadlessSurface {
    fn upload_instances(&mut self, block_type: BlockType, instances: &[InstanceRaw]) {
        let batch = self.batches.entry(block_type).or_default();
        batch.clear();
        batch.extend_from_slice(instances);
        self.instance_uploads += 1;
    }
}

impl RenderSurface for HeadlessSurface {
    fn is_visible(&self) -> bool {
        self.visible && !self.released
    }

    fn upload_terrain(&mut self, terrain: &Terrain) {
        self.terrain_vertices = terrain.vertices_per_edge() * terrain.vertices_per_edge();
        self.terrain_uploads += 1;
    }

    fn upload_ghost(&mut self, ghost: Option<GhostDraw>) {
        self.ghost = ghost;
    }

    fn upload_camera(&mut self, camera: &CameraUniform) {
        self.camera = Some(*camera);
    }

    fn render(&mut self) -> anyhow::Result<()> {
        if self.released {
            anyhow::bail!("surface already released");
        }
        if self.fail_renders {
            anyhow::bail!("render failure requested");
        }
        self.renders += 1;
        Ok(())
    }

    fn resize(&mut self, width: u32, height: u32) {
        self.size = (width.max(1), height.max(1));
    }

    fn apply_quality(&mut self, settings: &QualitySettings) {
        self.msaa_samples = settings.msaa_samples;
    }

    /// A flat image the size of the surface, tinted by how many blocks were drawn.
    fn capture_thumbnail(&mut self) -> anyhow::Result<image::RgbaImage> {
        if self.renders == 0 {
            anyhow::bail!("nothing rendered yet");
        }
        let drawn: usize = self.batches.values().map(Vec::len).sum();
        let shade = drawn.min(255) as u8;
        Ok(image::RgbaImage::from_pixel(self.size.0, self.size.1, image::Rgba([shade, shade, shade, 255])))
    }

    fn release(&mut self) -> anyhow::Result<()> {
        if self.released {
            anyhow::bail!("surface released twice");
        }
        self.batches.clear();
        self.ghost = None;
        self.released = true;
        Ok(())
    }
}
