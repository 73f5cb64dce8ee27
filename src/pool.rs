//! Object pooling for block visuals and bodies.
//!
//! Every active block owns one [`PooledPair`]: its visual state plus its rigid
//! body and collider. Removing a block detaches the body from the physics
//! world and parks both halves on a per-type free list so the next placement of
//! the same type skips construction.
//!
//! A `PooledPair` is an owned handle. Dropping it after it was detached puts it
//! back on its pool's free list; dropping it while still attached leaves the
//! body with the world, which strips it on release.

use std::{
    cell::RefCell,
    collections::HashMap,
    rc::{Rc, Weak},
};

use rapier3d::prelude::{Collider, ColliderHandle, RigidBody, RigidBodyHandle, RigidBodyType, nalgebra};

use crate::{
    data_structures::{
        block::{BlockType, unpack_rgb},
        instance::Instance,
    },
    physics::{PhysicsWorld, shape_for},
};

/// Pool-unique identity of a pair, stable across reuse.
pub type PairId = u64;

/// Render-side state of a pooled pair.
#[derive(Clone, Debug, PartialEq)]
pub struct Visual {
    pub instance: Instance,
    pub color: [f32; 4],
    pub visible: bool,
    /// Per-instance tint replacing `color`, e.g. the selection highlight.
    pub color_override: Option<[f32; 4]>,
}

impl Visual {
    pub fn new(block_type: BlockType) -> Self {
        let [r, g, b] = unpack_rgb(block_type.default_color());
        Self {
            instance: Instance::new(),
            color: [r, g, b, 1.0],
            visible: true,
            color_override: None,
        }
    }

    pub fn effective_color(&self) -> [f32; 4] {
        self.color_override.unwrap_or(self.color)
    }
}

enum BodySlot {
    Attached {
        body: RigidBodyHandle,
        collider: ColliderHandle,
    },
    Detached(Box<(RigidBody, Collider)>),
    Gone,
}

struct FreePair {
    id: PairId,
    visual: Visual,
    parts: Box<(RigidBody, Collider)>,
}

/// Construction and reuse counters of a [`BlockPool`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub constructed: usize,
    pub reused: usize,
    pub disposed: usize,
}

struct PoolShared {
    free: HashMap<BlockType, Vec<FreePair>>,
    capacity: usize,
    next_id: PairId,
    stats: PoolStats,
}

impl PoolShared {
    fn give_back(&mut self, block_type: BlockType, pair: FreePair) {
        let list = self.free.entry(block_type).or_default();
        if list.len() < self.capacity {
            list.push(pair);
        } else {
            self.stats.disposed += 1;
            log::debug!("Block pool for {:?} full, disposing pair {}", block_type, pair.id);
        }
    }
}

pub struct PooledPair {
    id: PairId,
    block_type: BlockType,
    visual: Visual,
    slot: BodySlot,
    home: Weak<RefCell<PoolShared>>,
}

impl PooledPair {
    pub fn id(&self) -> PairId {
        self.id
    }

    pub fn block_type(&self) -> BlockType {
        self.block_type
    }

    pub fn visual(&self) -> &Visual {
        &self.visual
    }

    pub fn visual_mut(&mut self) -> &mut Visual {
        &mut self.visual
    }

    pub fn is_attached(&self) -> bool {
        matches!(self.slot, BodySlot::Attached { .. })
    }

    pub fn body(&self) -> Option<RigidBodyHandle> {
        match self.slot {
            BodySlot::Attached { body, .. } => Some(body),
            _ => None,
        }
    }

    pub fn collider(&self) -> Option<ColliderHandle> {
        match self.slot {
            BodySlot::Attached { collider, .. } => Some(collider),
            _ => None,
        }
    }

    /// Take the body out of `world`. Returns `false` if it was not attached there.
    pub fn detach(&mut self, world: &mut PhysicsWorld) -> bool {
        let BodySlot::Attached { body, collider } = self.slot else {
            return false;
        };
        match world.detach(body, collider) {
            Some((mut body, mut collider)) => {
                reset_parts(self.block_type, &mut body, &mut collider);
                self.slot = BodySlot::Detached(Box::new((body, collider)));
                true
            }
            None => {
                log::warn!(
                    "Pair {} was not found in the physics world, it will not be pooled",
                    self.id
                );
                self.slot = BodySlot::Gone;
                false
            }
        }
    }
}

impl Drop for PooledPair {
    fn drop(&mut self) {
        match std::mem::replace(&mut self.slot, BodySlot::Gone) {
            BodySlot::Detached(parts) => {
                let Some(shared) = self.home.upgrade() else {
                    return;
                };
                let Ok(mut shared) = shared.try_borrow_mut() else {
                    log::error!("Block pool busy, pair {} is lost", self.id);
                    return;
                };
                let pair = FreePair {
                    id: self.id,
                    visual: self.visual.clone(),
                    parts,
                };
                shared.give_back(self.block_type, pair);
            }
            BodySlot::Attached { .. } => {
                log::debug!("Pair {} dropped while attached, its body stays with the world", self.id)
            }
            BodySlot::Gone => {}
        }
    }
}

impl std::fmt::Debug for PooledPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledPair")
            .field("id", &self.id)
            .field("block_type", &self.block_type)
            .field("attached", &self.is_attached())
            .field("visual", &self.visual)
            .finish()
    }
}

/// Undo per-instance changes so a reused body matches a fresh one.
fn reset_parts(block_type: BlockType, body: &mut RigidBody, collider: &mut Collider) {
    let body_type = if block_type.is_dynamic() {
        RigidBodyType::Dynamic
    } else {
        RigidBodyType::Fixed
    };
    body.set_body_type(body_type, false);
    body.set_linvel(rapier3d::prelude::vector![0.0, 0.0, 0.0], false);
    body.set_angvel(rapier3d::prelude::vector![0.0, 0.0, 0.0], false);
    collider.set_shape(shape_for(block_type, 1.0));
    collider.user_data = 0;
}

/// Per-type bounded free lists of detached pairs.
pub struct BlockPool {
    shared: Rc<RefCell<PoolShared>>,
}

impl BlockPool {
    pub fn new(capacity: usize) -> Self {
        Self {
            shared: Rc::new(RefCell::new(PoolShared {
                free: HashMap::new(),
                capacity,
                next_id: 1,
                stats: PoolStats::default(),
            })),
        }
    }

    /// Pop a free pair of `block_type` or build one with `factory`, then attach it to `world`.
    pub fn acquire<F>(&self, block_type: BlockType, world: &mut PhysicsWorld, factory: F) -> PooledPair
    where
        F: FnOnce(BlockType) -> (RigidBody, Collider),
    {
        let mut shared = self.shared.borrow_mut();
        let reused = shared.free.get_mut(&block_type).and_then(Vec::pop);
        let (id, parts) = match reused {
            Some(free) => {
                shared.stats.reused += 1;
                (free.id, free.parts)
            }
            None => {
                shared.stats.constructed += 1;
                let id = shared.next_id;
                shared.next_id += 1;
                (id, Box::new(factory(block_type)))
            }
        };
        drop(shared);

        let (body, collider) = *parts;
        let (body, collider) = world.attach(body, collider);
        PooledPair {
            id,
            block_type,
            visual: Visual::new(block_type),
            slot: BodySlot::Attached { body, collider },
            home: Rc::downgrade(&self.shared),
        }
    }

    /// Detach, hide and clear the pair, then return it to its free list (or dispose it when full).
    pub fn release(&self, mut pair: PooledPair, world: &mut PhysicsWorld) {
        if !pair.detach(world) && !matches!(pair.slot, BodySlot::Detached(_)) {
            self.shared.borrow_mut().stats.disposed += 1;
        }
        pair.visual.visible = false;
        pair.visual.color_override = None;
        drop(pair);
    }

    pub fn available(&self, block_type: BlockType) -> usize {
        self.shared
            .borrow()
            .free
            .get(&block_type)
            .map_or(0, Vec::len)
    }

    pub fn stats(&self) -> PoolStats {
        self.shared.borrow().stats
    }

    /// Dispose every pooled pair.
    pub fn clear(&self) {
        let mut shared = self.shared.borrow_mut();
        let count: usize = shared.free.values().map(Vec::len).sum();
        shared.free.clear();
        shared.stats.disposed += count;
    }
}

impl std::fmt::Debug for BlockPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let shared = self.shared.borrow();
        f.debug_struct("BlockPool")
            .field("capacity", &shared.capacity)
            .field("stats", &shared.stats)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::PhysicsConfig, physics::build_body};

    fn world() -> PhysicsWorld {
        PhysicsWorld::new(PhysicsConfig::default().gravity)
    }

    #[test]
    fn release_then_acquire_reuses_the_same_pair() {
        let mut world = world();
        let pool = BlockPool::new(4);
        let pair = pool.acquire(BlockType::Ramp, &mut world, build_body);
        let id = pair.id();
        assert!(pair.is_attached());

        pool.release(pair, &mut world);
        assert_eq!(world.body_count(), 0);
        assert_eq!(pool.available(BlockType::Ramp), 1);

        let again = pool.acquire(BlockType::Ramp, &mut world, build_body);
        assert_eq!(again.id(), id);
        assert!(again.visual().visible);
        assert_eq!(
            pool.stats(),
            PoolStats {
                constructed: 1,
                reused: 1,
                disposed: 0
            }
        );
    }

    #[test]
    fn free_lists_are_per_type() {
        let mut world = world();
        let pool = BlockPool::new(4);
        let cube = pool.acquire(BlockType::Cube, &mut world, build_body);
        pool.release(cube, &mut world);
        let slab = pool.acquire(BlockType::Slab, &mut world, build_body);
        assert_eq!(pool.stats().constructed, 2);
        assert_eq!(pool.available(BlockType::Cube), 1);
        drop(slab);
    }

    #[test]
    fn full_pool_disposes_released_pairs() {
        let mut world = world();
        let pool = BlockPool::new(1);
        let a = pool.acquire(BlockType::Cube, &mut world, build_body);
        let b = pool.acquire(BlockType::Cube, &mut world, build_body);
        pool.release(a, &mut world);
        pool.release(b, &mut world);
        assert_eq!(pool.available(BlockType::Cube), 1);
        assert_eq!(pool.stats().disposed, 1);
    }

    #[test]
    fn dropping_a_detached_pair_returns_it() {
        let mut world = world();
        let pool = BlockPool::new(2);
        let mut pair = pool.acquire(BlockType::Hazard, &mut world, build_body);
        assert!(pair.detach(&mut world));
        drop(pair);
        assert_eq!(pool.available(BlockType::Hazard), 1);
    }

    #[test]
    fn factory_is_only_called_on_miss() {
        let mut world = world();
        let pool = BlockPool::new(2);
        let pair = pool.acquire(BlockType::Cube, &mut world, build_body);
        pool.release(pair, &mut world);
        let pair = pool.acquire(BlockType::Cube, &mut world, |_| panic!("factory called on reuse"));
        assert!(pair.is_attached());
    }
}
