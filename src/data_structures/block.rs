//! Blocks: the placeable entities of a scene.
//!
//! A [`BlockType`] is a closed set of kinds, each with static [`Dimensions`]
//! shared by physics collider construction, placement math, picking and
//! culling. A [`Block`] is one active entity in the scene; it exclusively owns
//! the pooled visual/body pair backing it.

use cgmath::{Vector3, Zero};
use serde::{Deserialize, Serialize};

use crate::pool::PooledPair;

/// Stable identifier of a block within one scene.
pub type BlockId = u32;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockType {
    Cube,
    Slab,
    Ramp,
    Sphere,
    Cylinder,
    Pillar,
    Plank,
    /// Loose crate simulated as a dynamic body.
    Crate,
    Start,
    Checkpoint,
    Finish,
    Hazard,
}

/// Geometric family used to build the template mesh and the collider.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Shape {
    Cuboid,
    Ramp,
    Ball,
    Cylinder,
}

/// Static collision half-extents and vertical height of a block type at scale 1.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Dimensions {
    pub half_extents: Vector3<f32>,
    pub height: f32,
}

impl Dimensions {
    fn new(hx: f32, hy: f32, hz: f32) -> Self {
        Self {
            half_extents: Vector3::new(hx, hy, hz),
            height: hy * 2.0,
        }
    }
}

impl BlockType {
    pub const ALL: [BlockType; 12] = [
        BlockType::Cube,
        BlockType::Slab,
        BlockType::Ramp,
        BlockType::Sphere,
        BlockType::Cylinder,
        BlockType::Pillar,
        BlockType::Plank,
        BlockType::Crate,
        BlockType::Start,
        BlockType::Checkpoint,
        BlockType::Finish,
        BlockType::Hazard,
    ];

    pub fn dimensions(self) -> Dimensions {
        match self {
            BlockType::Cube | BlockType::Ramp | BlockType::Sphere | BlockType::Cylinder => {
                Dimensions::new(0.5, 0.5, 0.5)
            }
            BlockType::Slab => Dimensions::new(0.5, 0.125, 0.5),
            BlockType::Pillar => Dimensions::new(0.25, 1.0, 0.25),
            BlockType::Plank => Dimensions::new(1.0, 0.1, 0.25),
            BlockType::Crate => Dimensions::new(0.4, 0.4, 0.4),
            BlockType::Start | BlockType::Checkpoint | BlockType::Finish => {
                Dimensions::new(0.5, 0.05, 0.5)
            }
            BlockType::Hazard => Dimensions::new(0.5, 0.1, 0.5),
        }
    }

    pub fn shape(self) -> Shape {
        match self {
            BlockType::Ramp => Shape::Ramp,
            BlockType::Sphere => Shape::Ball,
            BlockType::Cylinder | BlockType::Pillar => Shape::Cylinder,
            _ => Shape::Cuboid,
        }
    }

    /// Whether the body is integrated by the solver instead of staying put.
    pub fn is_dynamic(self) -> bool {
        matches!(self, BlockType::Crate)
    }

    /// The mechanic a block of this type carries when no explicit tag is set.
    pub fn default_mechanic(self) -> Option<Mechanic> {
        match self {
            BlockType::Start => Some(Mechanic::Start),
            BlockType::Checkpoint => Some(Mechanic::Checkpoint),
            BlockType::Finish => Some(Mechanic::Finish),
            BlockType::Hazard => Some(Mechanic::Hazard),
            _ => None,
        }
    }

    /// Color used when a block is placed without an explicit color.
    pub fn default_color(self) -> u32 {
        match self {
            BlockType::Start => 0x22c55e,
            BlockType::Checkpoint => 0x3b82f6,
            BlockType::Finish => 0xfacc15,
            BlockType::Hazard => 0xff4500,
            BlockType::Crate => 0x8b5a2b,
            BlockType::Plank => 0xa0703c,
            _ => 0x9ca3af,
        }
    }
}

/// Gameplay semantics attached to a block.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mechanic {
    Start,
    Checkpoint,
    Finish,
    Hazard,
    Bounce,
    Boost,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct GameplayTag {
    pub mechanic: Mechanic,
    pub power: f32,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct EditorMeta {
    pub name: Option<String>,
    pub group: Option<String>,
}

/// Transform and appearance of a block, independent of its GPU/physics backing.
#[derive(Clone, Debug, PartialEq)]
pub struct BlockSpec {
    pub block_type: BlockType,
    pub position: Vector3<f32>,
    /// Euler angles in radians, applied X then Y then Z.
    pub rotation: Vector3<f32>,
    pub scale: f32,
    pub color: u32,
    pub tag: Option<GameplayTag>,
    pub meta: EditorMeta,
}

impl BlockSpec {
    pub fn new(block_type: BlockType, position: Vector3<f32>) -> Self {
        Self {
            block_type,
            position,
            rotation: Vector3::zero(),
            scale: 1.0,
            color: block_type.default_color(),
            tag: None,
            meta: EditorMeta::default(),
        }
    }

    /// Vertical extent of this block including its scale.
    pub fn height(&self) -> f32 {
        self.block_type.dimensions().height * self.scale
    }

    pub fn mechanic(&self) -> Option<GameplayTag> {
        self.tag.or_else(|| {
            self.block_type
                .default_mechanic()
                .map(|mechanic| GameplayTag { mechanic, power: 1.0 })
        })
    }
}

/// An active block in the scene.
pub struct Block {
    pub id: BlockId,
    pub spec: BlockSpec,
    pub(crate) pair: PooledPair,
}

impl Block {
    pub fn block_type(&self) -> BlockType {
        self.spec.block_type
    }

    pub fn position(&self) -> Vector3<f32> {
        self.spec.position
    }

    pub fn pair(&self) -> &PooledPair {
        &self.pair
    }
}

impl std::fmt::Debug for Block {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Block")
            .field("id", &self.id)
            .field("spec", &self.spec)
            .field("pair", &self.pair.id())
            .finish()
    }
}

/// Serialisable form of a block used by persistence.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BlockRecord {
    pub id: BlockId,
    #[serde(rename = "type")]
    pub block_type: BlockType,
    pub position: [f32; 3],
    pub rotation: [f32; 3],
    pub scale: f32,
    pub color: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mechanic: Option<GameplayTag>,
}

impl BlockRecord {
    pub fn from_block(block: &Block) -> Self {
        let spec = &block.spec;
        Self {
            id: block.id,
            block_type: spec.block_type,
            position: spec.position.into(),
            rotation: spec.rotation.into(),
            scale: spec.scale,
            color: spec.color,
            group: spec.meta.group.clone(),
            name: spec.meta.name.clone(),
            mechanic: spec.tag,
        }
    }

    pub fn to_spec(&self) -> BlockSpec {
        BlockSpec {
            block_type: self.block_type,
            position: self.position.into(),
            rotation: self.rotation.into(),
            scale: self.scale,
            color: self.color,
            tag: self.mechanic,
            meta: EditorMeta {
                name: self.name.clone(),
                group: self.group.clone(),
            },
        }
    }
}

/// Unpack `0xRRGGBB` into linear-ish `[r, g, b]` floats in `0.0..=1.0`.
pub fn unpack_rgb(color: u32) -> [f32; 3] {
    [
        ((color >> 16) & 0xff) as f32 / 255.0,
        ((color >> 8) & 0xff) as f32 / 255.0,
        (color & 0xff) as f32 / 255.0,
    ]
}

pub fn pack_rgb(rgb: [f32; 3]) -> u32 {
    let to_u8 = |v: f32| (v.clamp(0.0, 1.0) * 255.0).round() as u32;
    (to_u8(rgb[0]) << 16) | (to_u8(rgb[1]) << 8) | to_u8(rgb[2])
}
