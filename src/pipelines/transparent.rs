use crate::{
    data_structures::{
        instance::InstanceRaw,
        model::{ModelVertex, Vertex},
        texture::Texture,
    },
    pipelines::basic::mk_render_pipeline,
};

/**
 * Alpha-blended variant of the block pipeline, used for the placement ghost.
 *
 * The ghost is depth tested against the scene but does not write depth, so
 * blocks behind it stay visible through it.
 */
pub fn mk_transparent_pipeline(
    device: &wgpu::Device,
    color_format: wgpu::TextureFormat,
    sample_count: u32,
    camera_bind_group_layout: &wgpu::BindGroupLayout,
    light_bind_group_layout: &wgpu::BindGroupLayout,
) -> wgpu::RenderPipeline {
    let render_pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some("Ghost Pipeline Layout"),
        bind_group_layouts: &[camera_bind_group_layout, light_bind_group_layout],
        push_constant_ranges: &[],
    });
    let shader = wgpu::ShaderModuleDescriptor {
        label: Some("Ghost Shader"),
        source: wgpu::ShaderSource::Wgsl(include_str!("block_shader.wgsl").into()),
    };
    mk_render_pipeline(
        device,
        &render_pipeline_layout,
        color_format,
        Some(wgpu::BlendState::ALPHA_BLENDING),
        Some(Texture::DEPTH_FORMAT),
        false,
        sample_count,
        &[ModelVertex::desc(), InstanceRaw::desc()],
        shader,
    )
}
