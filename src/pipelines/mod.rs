//! Render pipelines.
//!
//! All pipelines share the same bind group order: the camera at group 0 and
//! the light at group 1. They are rebuilt when the MSAA sample count changes.

pub mod basic;
pub mod light;
pub mod transparent;

#[derive(Debug)]
pub struct Pipelines {
    pub basic: wgpu::RenderPipeline,
    pub transparent: wgpu::RenderPipeline,
    pub light: wgpu::RenderPipeline,
    pub sample_count: u32,
}

impl Pipelines {
    pub fn new(
        device: &wgpu::Device,
        color_format: wgpu::TextureFormat,
        sample_count: u32,
        camera_bind_group_layout: &wgpu::BindGroupLayout,
        light_bind_group_layout: &wgpu::BindGroupLayout,
    ) -> Self {
        Self {
            basic: basic::mk_basic_pipeline(
                device,
                color_format,
                sample_count,
                camera_bind_group_layout,
                light_bind_group_layout,
            ),
            transparent: transparent::mk_transparent_pipeline(
                device,
                color_format,
                sample_count,
                camera_bind_group_layout,
                light_bind_group_layout,
            ),
            light: light::mk_render_pipeline(
                device,
                color_format,
                sample_count,
                camera_bind_group_layout,
                light_bind_group_layout,
            ),
            sample_count,
        }
    }
}
