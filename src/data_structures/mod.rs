//! Engine data structures: blocks, instances, meshes, textures and terrain.
//!
//! This module contains the core data types for scene representation:
//!
//! - `block` holds block kinds, their dimension table and persisted records
//! - `instance` holds per-instance transformation and the raw GPU layout
//! - `model` contains vertex layouts and CPU/GPU meshes
//! - `texture` contains depth and color render targets
//! - `terrain` is the editable heightfield

pub mod block;
pub mod instance;
pub mod model;
pub mod terrain;
pub mod texture;
