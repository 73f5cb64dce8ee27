//! blockyard
//!
//! A real-time block scene editor built on rapier and wgpu. Scenes are made
//! of primitive blocks (cubes, ramps, cylinders, spheres, crates and gameplay
//! markers) standing on an editable heightfield. The same scene can be edited
//! and then played with a physics-driven player.
//!
//! High-level modules
//! - `config`: engine, physics, terrain and quality settings
//! - `physics`: rapier world wrapper and the world pool reused across sessions
//! - `pool`: pooled rigid body and collider pairs per block type
//! - `scene`: the live block set, snapshots and dirty tracking
//! - `instancing`: per-type instance batches feeding the renderer
//! - `culling`: frustum and distance culling
//! - `pick`: ray construction and ray/block/terrain picking
//! - `placement`: ghost preview, grid snapping, collision checks and brushes
//! - `terrain_editor`: raise/lower/smooth/paint brushes on the heightfield
//! - `camera`: orbit/free/ortho camera, controller and projection
//! - `gameplay`: player controllers, checkpoints and contact listeners
//! - `frame`: fixed-step frame loop and its stages
//! - `render`: the render surface seam and a headless implementation
//! - `context`: the wgpu render surface owning device, queue and pipelines
//! - `pipelines`: block, ghost and light pipelines
//! - `resources`: block template meshes and instance buffers
//! - `engine`: sessions, mounting and input routing
//! - `flow`: the winit application loop
//!

pub mod camera;
pub mod config;
pub mod context;
pub mod culling;
pub mod data_structures;
pub mod engine;
pub mod flow;
pub mod frame;
pub mod gameplay;
pub mod instancing;
pub mod physics;
pub mod pick;
pub mod pipelines;
pub mod placement;
pub mod pool;
pub mod render;
pub mod resources;
pub mod scene;
pub mod terrain_editor;

// Re-exports commonly used types for convenience in downstream code.
pub use cgmath;
pub use engine::{Engine, Mode};
pub use winit::event::DeviceEvent;
pub use winit::event::WindowEvent;
