//! The GPU render surface.
//!
//! [`Context`] owns the wgpu device, the window surface and every GPU
//! resource the scene needs: one template mesh and one growable instance
//! buffer per block type, the terrain mesh, the ghost instance, and the camera
//! and light uniforms. It implements [`RenderSurface`], so the frame loop only
//! sees uploads and a `render` call.

use std::{collections::HashMap, iter, sync::Arc};

use anyhow::Context as _;
use instant::Duration;
use wgpu::util::DeviceExt;
use winit::window::Window;

use crate::{
    camera::{CameraResources, CameraUniform},
    config::QualitySettings,
    data_structures::{
        block::BlockType,
        instance::{Instance, InstanceRaw},
        model::{DrawMesh, Mesh},
        terrain::Terrain,
        texture::Texture,
    },
    instancing::InstanceSink,
    pipelines::{
        Pipelines,
        light::{LightResources, LightUniform},
    },
    render::{GhostDraw, RenderSurface},
    resources::{self, InstanceBuffer},
};

const INITIAL_BATCH_CAPACITY: usize = 64;

pub struct Context {
    pub(crate) window: Arc<Window>,
    surface: wgpu::Surface<'static>,
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
    pub config: wgpu::SurfaceConfiguration,
    is_surface_configured: bool,
    depth_texture: Texture,
    msaa_target: Option<Texture>,
    camera: CameraResources,
    light: LightResources,
    pipelines: Pipelines,
    templates: HashMap<BlockType, Mesh>,
    batches: HashMap<BlockType, InstanceBuffer>,
    terrain: Option<Mesh>,
    terrain_instance: wgpu::Buffer,
    ghost: Option<(BlockType, InstanceBuffer)>,
    pub clear_colour: wgpu::Color,
    released: bool,
}

impl Context {
    pub async fn new(window: Arc<Window>) -> anyhow::Result<Self> {
        let size = window.inner_size();

        // The instance is a handle to our GPU
        // BackendBit::PRIMARY => Vulkan + Metal + DX12 + Browser WebGPU
        log::info!("WGPU setup");
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            #[cfg(not(target_arch = "wasm32"))]
            backends: wgpu::Backends::PRIMARY,
            #[cfg(target_arch = "wasm32")]
            backends: wgpu::Backends::GL,
            ..Default::default()
        });

        let surface = instance.create_surface(window.clone())?;

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::default(),
                compatible_surface: Some(&surface),
                force_fallback_adapter: false,
            })
            .await?;
        log::info!("Device and queue");
        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: None,
                required_features: wgpu::Features::empty(),
                // WebGL doesn't support all of wgpu's features, so if
                // we're building for the web we'll have to disable some.
                required_limits: if cfg!(target_arch = "wasm32") {
                    wgpu::Limits::downlevel_webgl2_defaults()
                } else {
                    wgpu::Limits::default()
                },
                memory_hints: Default::default(),
                trace: wgpu::Trace::Off,
                experimental_features: wgpu::ExperimentalFeatures::disabled(),
            })
            .await?;

        let surface_caps = surface.get_capabilities(&adapter);
        // Shaders assume an sRGB surface; anything else comes out too dark.
        let surface_format = surface_caps
            .formats
            .iter()
            .copied()
            .find(|f| f.is_srgb())
            .or_else(|| surface_caps.formats.first().copied())
            .context("surface reports no texture formats")?;
        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format: surface_format,
            width: size.width.max(1),
            height: size.height.max(1),
            present_mode: surface_caps
                .present_modes
                .first()
                .copied()
                .unwrap_or(wgpu::PresentMode::Fifo),
            alpha_mode: surface_caps
                .alpha_modes
                .first()
                .copied()
                .unwrap_or(wgpu::CompositeAlphaMode::Auto),
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };

        let camera = CameraResources::new(&device);
        let light = LightResources::new(LightUniform::new([20.0, 60.0, 30.0], [1.0, 1.0, 1.0]), &device);
        let pipelines = Pipelines::new(&device, config.format, 1, &camera.bind_group_layout, &light.bind_group_layout);
        let depth_texture = Texture::create_depth_texture(&device, [config.width, config.height], 1, "depth_texture");

        let templates = resources::load_templates(&device);
        let batches = BlockType::ALL
            .into_iter()
            .map(|block_type| {
                let label = format!("{:?} Instances", block_type);
                (block_type, InstanceBuffer::new(&device, &label, INITIAL_BATCH_CAPACITY))
            })
            .collect();
        let terrain_instance = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Terrain Instance"),
            contents: bytemuck::cast_slice(&[Instance::new().to_raw([1.0, 1.0, 1.0, 1.0])]),
            usage: wgpu::BufferUsages::VERTEX,
        });

        Ok(Self {
            window,
            surface,
            device,
            queue,
            config,
            is_surface_configured: false,
            depth_texture,
            msaa_target: None,
            camera,
            light,
            pipelines,
            templates,
            batches,
            terrain: None,
            terrain_instance,
            ghost: None,
            clear_colour: wgpu::Color {
                r: 0.53,
                g: 0.71,
                b: 0.92,
                a: 1.0,
            },
            released: false,
        })
    }

    pub fn window(&self) -> &Arc<Window> {
        &self.window
    }

    pub fn sample_count(&self) -> u32 {
        self.pipelines.sample_count
    }

    pub fn set_light(&mut self, position: [f32; 3], color: [f32; 3]) {
        self.light.update(&self.queue, LightUniform::new(position, color));
    }

    /// Rebuild size-dependent attachments after a resize or sample count change.
    fn rebuild_attachments(&mut self) {
        let size = [self.config.width, self.config.height];
        let samples = self.pipelines.sample_count;
        self.depth_texture = Texture::create_depth_texture(&self.device, size, samples, "depth_texture");
        self.msaa_target = (samples > 1).then(|| {
            Texture::create_color_target(&self.device, size, self.config.format, samples, "msaa_target")
        });
    }

    fn set_sample_count(&mut self, samples: u32) {
        let samples = if samples > 1 { 4 } else { 1 };
        if samples == self.pipelines.sample_count {
            return;
        }
        log::info!("Switching to {}x MSAA", samples);
        self.pipelines = Pipelines::new(
            &self.device,
            self.config.format,
            samples,
            &self.camera.bind_group_layout,
            &self.light.bind_group_layout,
        );
        self.rebuild_attachments();
    }

    /// Record the whole scene into one render pass.
    fn encode_scene(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        view: &wgpu::TextureView,
        resolve_target: Option<&wgpu::TextureView>,
        depth_view: &wgpu::TextureView,
    ) {
        let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("Render Pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view,
                resolve_target,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(self.clear_colour),
                    store: wgpu::StoreOp::Store,
                },
                depth_slice: None,
            })],
            depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                view: depth_view,
                depth_ops: Some(wgpu::Operations {
                    load: wgpu::LoadOp::Clear(1.0),
                    store: wgpu::StoreOp::Store,
                }),
                stencil_ops: None,
            }),
            occlusion_query_set: None,
            timestamp_writes: None,
        });

        render_pass.set_bind_group(0, &self.camera.bind_group, &[]);
        render_pass.set_bind_group(1, &self.light.bind_group, &[]);

        render_pass.set_pipeline(&self.pipelines.basic);
        if let Some(terrain) = &self.terrain {
            render_pass.set_vertex_buffer(1, self.terrain_instance.slice(..));
            render_pass.draw_mesh_instanced(terrain, 0..1);
        }
        for block_type in BlockType::ALL {
            let (Some(mesh), Some(batch)) = (self.templates.get(&block_type), self.batches.get(&block_type)) else {
                continue;
            };
            if batch.count == 0 {
                continue;
            }
            render_pass.set_vertex_buffer(1, batch.buffer.slice(..));
            render_pass.draw_mesh_instanced(mesh, 0..batch.count);
        }

        if let Some((block_type, ghost)) = &self.ghost {
            if let Some(mesh) = self.templates.get(block_type) {
                render_pass.set_pipeline(&self.pipelines.transparent);
                render_pass.set_vertex_buffer(1, ghost.buffer.slice(..));
                render_pass.draw_mesh_instanced(mesh, 0..1);
            }
        }

        render_pass.set_pipeline(&self.pipelines.light);
        render_pass.set_vertex_buffer(0, self.light.mesh.vertex_buffer.slice(..));
        render_pass.set_index_buffer(self.light.mesh.index_buffer.slice(..), wgpu::IndexFormat::Uint32);
        render_pass.draw_indexed(0..self.light.mesh.num_elements, 0, 0..1);
    }

    /// Render the scene offscreen and read it back.
    ///
    /// Rows are copied with a 256 byte aligned stride and cropped afterwards.
    pub async fn read_frame(&self) -> anyhow::Result<image::RgbaImage> {
        let (width, height) = (self.config.width, self.config.height);
        let samples = self.pipelines.sample_count;
        let target = Texture::create_color_target(&self.device, [width, height], self.config.format, 1, "thumbnail");
        let msaa = (samples > 1).then(|| {
            Texture::create_color_target(&self.device, [width, height], self.config.format, samples, "thumbnail_msaa")
        });
        let depth = Texture::create_depth_texture(&self.device, [width, height], samples, "thumbnail_depth");

        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Thumbnail Encoder"),
        });
        match &msaa {
            Some(msaa) => self.encode_scene(&mut encoder, &msaa.view, Some(&target.view), &depth.view),
            None => self.encode_scene(&mut encoder, &target.view, None, &depth.view),
        }

        let unpadded_bytes_per_row = width * 4;
        let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
        let padded_bytes_per_row = unpadded_bytes_per_row.div_ceil(align) * align;
        let output_buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Thumbnail Readback"),
            size: (padded_bytes_per_row * height) as wgpu::BufferAddress,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                aspect: wgpu::TextureAspect::All,
                texture: &target.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &output_buffer,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(padded_bytes_per_row),
                    rows_per_image: Some(height),
                },
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
        self.queue.submit(iter::once(encoder.finish()));

        let (tx, rx) = futures_intrusive::channel::shared::oneshot_channel();
        let buffer_slice = output_buffer.slice(..);
        buffer_slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        self.device.poll(wgpu::PollType::Wait {
            submission_index: None,
            timeout: Some(Duration::from_secs(3)),
        })?;
        rx.receive().await.context("readback callback dropped")??;

        let bgra = matches!(
            self.config.format,
            wgpu::TextureFormat::Bgra8Unorm | wgpu::TextureFormat::Bgra8UnormSrgb
        );
        let data = buffer_slice.get_mapped_range();
        let mut pixels = Vec::with_capacity((unpadded_bytes_per_row * height) as usize);
        for row in data.chunks(padded_bytes_per_row as usize) {
            let row = &row[..unpadded_bytes_per_row as usize];
            if bgra {
                for px in row.chunks_exact(4) {
                    pixels.extend_from_slice(&[px[2], px[1], px[0], px[3]]);
                }
            } else {
                pixels.extend_from_slice(row);
            }
        }
        drop(data);
        output_buffer.unmap();
        image::RgbaImage::from_raw(width, height, pixels).context("readback size mismatch")
    }
}

impl InstanceSink for Context {
    fn upload_instances(&mut self, block_type: BlockType, instances: &[InstanceRaw]) {
        let label = format!("{:?} Instances", block_type);
        let batch = self
            .batches
            .entry(block_type)
            .or_insert_with(|| InstanceBuffer::new(&self.device, &label, INITIAL_BATCH_CAPACITY));
        batch.write(&self.device, &self.queue, &label, instances);
    }
}

impl RenderSurface for Context {
    fn is_visible(&self) -> bool {
        !self.released && self.is_surface_configured && self.window.is_visible().unwrap_or(true)
    }

    fn upload_terrain(&mut self, terrain: &Terrain) {
        self.terrain = Some(terrain.to_mesh_data().upload(&self.device, "Terrain"));
    }

    fn upload_ghost(&mut self, ghost: Option<GhostDraw>) {
        match ghost {
            Some(draw) => {
                let mut buffer = match self.ghost.take() {
                    Some((_, buffer)) => buffer,
                    None => InstanceBuffer::new(&self.device, "Ghost Instance", 1),
                };
                buffer.write(&self.device, &self.queue, "Ghost Instance", &[draw.instance]);
                self.ghost = Some((draw.block_type, buffer));
            }
            None => self.ghost = None,
        }
    }

    fn upload_camera(&mut self, camera: &CameraUniform) {
        self.camera.update(&self.queue, camera);
    }

    fn render(&mut self) -> anyhow::Result<()> {
        if self.released {
            anyhow::bail!("render after release");
        }
        // Rendering requires the surface to be configured
        if !self.is_surface_configured {
            return Ok(());
        }
        let output = match self.surface.get_current_texture() {
            Ok(output) => output,
            // Reconfigure the surface if it's lost or outdated
            Err(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) => {
                let size = self.window.inner_size();
                self.resize(size.width, size.height);
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };
        let view = output.texture.create_view(&wgpu::TextureViewDescriptor::default());

        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Render Encoder"),
        });
        match &self.msaa_target {
            Some(msaa) => self.encode_scene(&mut encoder, &msaa.view, Some(&view), &self.depth_texture.view),
            None => self.encode_scene(&mut encoder, &view, None, &self.depth_texture.view),
        }
        self.queue.submit(iter::once(encoder.finish()));
        output.present();
        self.window.request_redraw();
        Ok(())
    }

    fn resize(&mut self, width: u32, height: u32) {
        if width > 0 && height > 0 {
            self.config.width = width;
            self.config.height = height;
            self.surface.configure(&self.device, &self.config);
            self.is_surface_configured = true;
            self.rebuild_attachments();
        }
    }

    fn apply_quality(&mut self, settings: &QualitySettings) {
        self.set_sample_count(settings.msaa_samples);
    }

    #[cfg(not(target_arch = "wasm32"))]
    fn capture_thumbnail(&mut self) -> anyhow::Result<image::RgbaImage> {
        futures::executor::block_on(self.read_frame())
    }

    fn release(&mut self) -> anyhow::Result<()> {
        if self.released {
            anyhow::bail!("context released twice");
        }
        self.released = true;
        self.ghost = None;
        self.terrain = None;
        for batch in self.batches.values() {
            batch.buffer.destroy();
        }
        self.batches.clear();
        for mesh in self.templates.values() {
            mesh.vertex_buffer.destroy();
            mesh.index_buffer.destroy();
        }
        self.templates.clear();
        log::debug!("GPU resources released");
        Ok(())
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("config", &self.config)
            .field("sample_count", &self.pipelines.sample_count)
            .field("terrain", &self.terrain.is_some())
            .field("released", &self.released)
            .finish()
    }
}
