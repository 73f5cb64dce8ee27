/**
 * This module contains all logic for building and uploading the engine's GPU resources:
 * the per-type template meshes and the instance buffers they are drawn with.
 */
pub mod mesh;

use std::collections::HashMap;

use crate::data_structures::{block::BlockType, instance::InstanceRaw, model::Mesh};

/// Upload one template mesh per block type.
pub fn load_templates(device: &wgpu::Device) -> HashMap<BlockType, Mesh> {
    BlockType::ALL
        .into_iter()
        .map(|block_type| {
            let mesh = mesh::template_mesh(block_type).upload(device, &format!("{:?}", block_type));
            (block_type, mesh)
        })
        .collect()
}

/// A growable instance buffer; reallocated only when an upload outgrows it.
#[derive(Debug)]
pub struct InstanceBuffer {
    pub buffer: wgpu::Buffer,
    capacity: usize,
    pub count: u32,
}

impl InstanceBuffer {
    pub fn new(device: &wgpu::Device, label: &str, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            buffer: create_instance_buffer(device, label, capacity),
            capacity,
            count: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn write(&mut self, device: &wgpu::Device, queue: &wgpu::Queue, label: &str, instances: &[InstanceRaw]) {
        if instances.len() > self.capacity {
            self.capacity = instances.len().next_power_of_two();
            self.buffer = create_instance_buffer(device, label, self.capacity);
            log::debug!("Grew {} to {} instances", label, self.capacity);
        }
        if !instances.is_empty() {
            queue.write_buffer(&self.buffer, 0, bytemuck::cast_slice(instances));
        }
        self.count = instances.len() as u32;
    }
}

fn create_instance_buffer(device: &wgpu::Device, label: &str, capacity: usize) -> wgpu::Buffer {
    device.create_buffer(&wgpu::BufferDescriptor {
        label: Some(label),
        size: (capacity * std::mem::size_of::<InstanceRaw>()) as wgpu::BufferAddress,
        usage: wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    })
}
