//! The active block list and everything it keeps in sync.
//!
//! A [`Scene`] owns the blocks of one session, the terrain, the physics world
//! they live in and the instanced renderer that mirrors them. Every mutation
//! goes through the scene so the three views of a block (spec, body, instance
//! record) never drift apart:
//!
//! - spawning acquires a pooled pair, poses its body and adds an instance record
//! - property setters update the `BlockSpec`, then re-pose the body and re-dirty the batch
//! - despawning removes the record and hands the pair back to its pool
//!
//! Blocks simulated by physics (see [`BlockType::is_dynamic`]) flow the other
//! way: [`Scene::sync_from_physics`] copies their poses onto the visuals,
//! except for the block currently being dragged, whose visual leads.

use cgmath::{InnerSpace, Vector3};
use rapier3d::prelude::RigidBodyType;
use serde::{Deserialize, Serialize};

use crate::{
    config::TerrainConfig,
    culling::CullView,
    data_structures::{
        block::{Block, BlockId, BlockRecord, BlockSpec, BlockType, EditorMeta, GameplayTag, unpack_rgb},
        instance::{Instance, euler_to_quaternion, quaternion_to_euler},
        terrain::{Terrain, TerrainRecord},
    },
    instancing::{InstanceRecord, InstanceSink, InstancedRenderer},
    physics::{PhysicsWorld, build_body, shape_for},
    pool::BlockPool,
};

/// Amount the selection highlight brightens a block's color.
const SELECTION_LIGHTEN: f32 = 0.35;

/// Everything needed to restore a scene.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SceneSnapshot {
    #[serde(default = "SceneSnapshot::current_version")]
    pub version: u32,
    pub blocks: Vec<BlockRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub terrain: Option<TerrainRecord>,
}

impl SceneSnapshot {
    fn current_version() -> u32 {
        1
    }

    pub fn from_json(text: &str) -> anyhow::Result<Self> {
        let snapshot: SceneSnapshot = serde_json::from_str(text)?;
        if snapshot.version > Self::current_version() {
            anyhow::bail!("unsupported scene version {}", snapshot.version);
        }
        Ok(snapshot)
    }

    pub fn to_json(&self) -> anyhow::Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

pub struct Scene {
    blocks: Vec<Block>,
    next_id: BlockId,
    terrain: Terrain,
    world: PhysicsWorld,
    renderer: InstancedRenderer,
    selected: Option<BlockId>,
    dragged: Option<BlockId>,
}

impl Scene {
    pub fn new(mut world: PhysicsWorld, terrain: Terrain) -> Self {
        world.set_terrain(&terrain);
        Self {
            blocks: Vec::new(),
            next_id: 1,
            terrain,
            world,
            renderer: InstancedRenderer::new(),
            selected: None,
            dragged: None,
        }
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn block(&self, id: BlockId) -> Option<&Block> {
        self.blocks.iter().find(|b| b.id == id)
    }

    fn index_of(&self, id: BlockId) -> Option<usize> {
        self.blocks.iter().position(|b| b.id == id)
    }

    /// `(id, spec)` pairs of every active block.
    pub fn specs(&self) -> impl Iterator<Item = (BlockId, &BlockSpec)> + '_ {
        self.blocks.iter().map(|b| (b.id, &b.spec))
    }

    pub fn count_of(&self, block_type: BlockType) -> usize {
        self.blocks.iter().filter(|b| b.block_type() == block_type).count()
    }

    pub fn terrain(&self) -> &Terrain {
        &self.terrain
    }

    pub fn terrain_mut(&mut self) -> &mut Terrain {
        &mut self.terrain
    }

    /// Rebuild the physics heightfield from the current terrain heights.
    pub fn rebuild_terrain_collider(&mut self) {
        self.world.set_terrain(&self.terrain);
    }

    pub fn world(&self) -> &PhysicsWorld {
        &self.world
    }

    pub fn world_mut(&mut self) -> &mut PhysicsWorld {
        &mut self.world
    }

    pub fn renderer(&self) -> &InstancedRenderer {
        &self.renderer
    }

    pub fn renderer_mut(&mut self) -> &mut InstancedRenderer {
        &mut self.renderer
    }

    /// Add a block built from `spec`. The type's batch becomes dirty.
    pub fn spawn(&mut self, spec: BlockSpec, pool: &BlockPool) -> BlockId {
        let id = self.next_id;
        self.spawn_with_id(id, spec, pool);
        id
    }

    fn spawn_with_id(&mut self, id: BlockId, spec: BlockSpec, pool: &BlockPool) {
        self.next_id = self.next_id.max(id.saturating_add(1));
        let pair = pool.acquire(spec.block_type, &mut self.world, build_body);
        if let Some(collider) = pair.collider() {
            self.world.tag_block(collider, id);
        }
        let mut block = Block { id, spec, pair };
        apply_spec(&mut self.world, &mut block, true);
        self.renderer
            .add_instance(block.block_type(), id, instance_record(&block));
        self.blocks.push(block);
    }

    /// Remove a block and return its pair to `pool`.
    pub fn despawn(&mut self, id: BlockId, pool: &BlockPool) -> Option<BlockSpec> {
        let index = self.index_of(id)?;
        let block = self.blocks.remove(index);
        self.renderer.remove_instance(block.block_type(), id);
        if self.selected == Some(id) {
            self.selected = None;
        }
        if self.dragged == Some(id) {
            self.dragged = None;
        }
        let Block { spec, pair, .. } = block;
        pool.release(pair, &mut self.world);
        Some(spec)
    }

    /// Despawn every block.
    pub fn clear(&mut self, pool: &BlockPool) {
        let ids: Vec<BlockId> = self.blocks.iter().map(|b| b.id).collect();
        for id in ids {
            self.despawn(id, pool);
        }
    }

    fn update<F>(&mut self, id: BlockId, reshape: bool, f: F) -> bool
    where
        F: FnOnce(&mut BlockSpec),
    {
        let Some(index) = self.index_of(id) else {
            return false;
        };
        let selected = self.selected == Some(id);
        let block = &mut self.blocks[index];
        f(&mut block.spec);
        apply_spec(&mut self.world, block, reshape);
        highlight(block, selected);
        self.renderer
            .update_instance(block.block_type(), id, instance_record(block));
        true
    }

    pub fn set_position(&mut self, id: BlockId, position: Vector3<f32>) -> bool {
        self.update(id, false, |spec| spec.position = position)
    }

    pub fn set_rotation(&mut self, id: BlockId, rotation: Vector3<f32>) -> bool {
        self.update(id, false, |spec| spec.rotation = rotation)
    }

    /// Non-positive or non-finite scales are rejected.
    pub fn set_scale(&mut self, id: BlockId, scale: f32) -> bool {
        if !(scale > 0.0) || !scale.is_finite() {
            return false;
        }
        self.update(id, true, |spec| spec.scale = scale)
    }

    pub fn set_color(&mut self, id: BlockId, color: u32) -> bool {
        self.update(id, false, |spec| spec.color = color & 0xffffff)
    }

    pub fn set_tag(&mut self, id: BlockId, tag: Option<GameplayTag>) -> bool {
        self.update(id, false, |spec| spec.tag = tag)
    }

    pub fn set_meta(&mut self, id: BlockId, meta: EditorMeta) -> bool {
        self.update(id, false, |spec| spec.meta = meta)
    }

    pub fn selected(&self) -> Option<BlockId> {
        self.selected
    }

    /// Select a block (or nothing), moving the highlight.
    pub fn select(&mut self, id: Option<BlockId>) -> bool {
        if id.is_some_and(|id| self.index_of(id).is_none()) {
            return false;
        }
        let previous = std::mem::replace(&mut self.selected, id);
        for changed in [previous, id].into_iter().flatten() {
            self.update(changed, false, |_| {});
        }
        true
    }

    pub fn dragged(&self) -> Option<BlockId> {
        self.dragged
    }

    /// Mark a block as dragged by the user. Its body turns kinematic and follows the visual.
    pub fn set_dragged(&mut self, id: Option<BlockId>) {
        if let Some(body) = self.dragged.take().and_then(|previous| self.dynamic_body(previous)) {
            self.world.set_body_type(body, RigidBodyType::Dynamic);
        }
        let Some(id) = id.filter(|id| self.index_of(*id).is_some()) else {
            return;
        };
        if let Some(body) = self.dynamic_body(id) {
            self.world
                .set_body_type(body, RigidBodyType::KinematicPositionBased);
        }
        self.dragged = Some(id);
    }

    fn dynamic_body(&self, id: BlockId) -> Option<rapier3d::prelude::RigidBodyHandle> {
        self.block(id)
            .filter(|block| block.block_type().is_dynamic())
            .and_then(|block| block.pair().body())
    }

    /// Copy simulated poses onto visuals. Returns how many blocks moved.
    pub fn sync_from_physics(&mut self) -> usize {
        let mut moved = 0;
        for block in self.blocks.iter_mut() {
            if Some(block.id) == self.dragged {
                continue;
            }
            let Some(body) = block.pair.body() else {
                continue;
            };
            if !self.world.is_moving(body) {
                continue;
            }
            let Some((position, rotation)) = self.world.pose(body) else {
                continue;
            };
            block.spec.position = position;
            block.spec.rotation = quaternion_to_euler(rotation);
            let visual = block.pair.visual_mut();
            visual.instance.position = position;
            visual.instance.rotation = rotation;
            if self
                .renderer
                .update_instance(block.spec.block_type, block.id, instance_record(block))
            {
                moved += 1;
            }
        }
        moved
    }

    /// Flag blocks outside the view as culled. Returns the number of culled blocks.
    pub fn cull(&mut self, view: &CullView) -> usize {
        let mut culled = 0;
        for block in &self.blocks {
            let radius = block.block_type().dimensions().half_extents.magnitude() * block.spec.scale;
            let is_culled = view.is_culled(block.spec.position, radius);
            self.renderer
                .set_culled(block.block_type(), block.id, is_culled);
            culled += is_culled as usize;
        }
        culled
    }

    /// Upload every dirty instance batch.
    pub fn flush(&mut self, sink: &mut dyn InstanceSink) -> usize {
        self.renderer.rebuild_dirty(sink)
    }

    pub fn snapshot(&self) -> SceneSnapshot {
        SceneSnapshot {
            version: SceneSnapshot::current_version(),
            blocks: self.blocks.iter().map(BlockRecord::from_block).collect(),
            terrain: Some(self.terrain.to_record()),
        }
    }

    /// Replace the scene contents with a snapshot.
    ///
    /// The terrain record is validated before anything is touched; a snapshot
    /// without terrain gets a flat one. Block records with an invalid scale are
    /// skipped.
    pub fn load(&mut self, snapshot: SceneSnapshot, pool: &BlockPool, fallback: &TerrainConfig) -> anyhow::Result<usize> {
        let terrain = match snapshot.terrain {
            Some(record) => Terrain::from_record(record)?,
            None => Terrain::flat(fallback.size, fallback.resolution),
        };
        self.clear(pool);
        self.terrain = terrain;
        self.rebuild_terrain_collider();
        self.next_id = 1;

        let mut loaded = 0;
        for record in snapshot.blocks {
            if !(record.scale > 0.0) || !record.scale.is_finite() {
                log::warn!("Skipping block {} with invalid scale {}", record.id, record.scale);
                continue;
            }
            if record.id == BlockId::MAX {
                log::warn!("Skipping block with reserved id {}", record.id);
                continue;
            }
            if self.index_of(record.id).is_some() {
                log::warn!("Skipping duplicate block id {}", record.id);
                continue;
            }
            self.spawn_with_id(record.id, record.to_spec(), pool);
            loaded += 1;
        }
        Ok(loaded)
    }

    /// Hand the physics world back, e.g. to return it to its pool.
    pub fn into_world(self) -> PhysicsWorld {
        self.world
    }
}

impl std::fmt::Debug for Scene {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scene")
            .field("blocks", &self.blocks.len())
            .field("selected", &self.selected)
            .field("dragged", &self.dragged)
            .field("world", &self.world)
            .finish()
    }
}

/// Push the block spec onto the body and the visual.
fn apply_spec(world: &mut PhysicsWorld, block: &mut Block, reshape: bool) {
    let rotation = euler_to_quaternion(block.spec.rotation);
    if let Some(body) = block.pair.body() {
        world.set_pose(body, block.spec.position, rotation);
    }
    if reshape {
        if let Some(collider) = block.pair.collider() {
            world.set_collider_shape(collider, shape_for(block.spec.block_type, block.spec.scale));
        }
    }
    let [r, g, b] = unpack_rgb(block.spec.color);
    let visual = block.pair.visual_mut();
    visual.instance = Instance::from_block(block.spec.position, block.spec.rotation, block.spec.scale);
    visual.color = [r, g, b, 1.0];
    visual.visible = true;
}

fn highlight(block: &mut Block, selected: bool) {
    let visual = block.pair.visual_mut();
    visual.color_override = selected.then(|| {
        let [r, g, b, a] = visual.color;
        let lighten = |c: f32| c + (1.0 - c) * SELECTION_LIGHTEN;
        [lighten(r), lighten(g), lighten(b), a]
    });
}

fn instance_record(block: &Block) -> InstanceRecord {
    let visual = block.pair.visual();
    InstanceRecord {
        instance: visual.instance.clone(),
        color: visual.effective_color(),
        visible: visual.visible,
        culled: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EngineConfig, PhysicsConfig};

    fn scene() -> (Scene, BlockPool) {
        let world = PhysicsWorld::new(PhysicsConfig::default().gravity);
        (Scene::new(world, Terrain::flat(32.0, 32)), BlockPool::new(8))
    }

    #[test]
    fn spawn_and_despawn_keep_world_and_renderer_in_step() {
        let (mut scene, pool) = scene();
        let id = scene.spawn(BlockSpec::new(BlockType::Cube, Vector3::new(0.0, 0.5, 0.0)), &pool);
        assert_eq!(scene.len(), 1);
        assert_eq!(scene.world().body_count(), 1);
        assert_eq!(scene.renderer().live_count(BlockType::Cube), 1);

        let spec = scene.despawn(id, &pool).unwrap();
        assert_eq!(spec.block_type, BlockType::Cube);
        assert_eq!(scene.world().body_count(), 0);
        assert_eq!(scene.renderer().live_count(BlockType::Cube), 0);
        assert_eq!(pool.available(BlockType::Cube), 1);
        assert!(scene.despawn(id, &pool).is_none());
    }

    #[test]
    fn setters_move_the_body_and_dirty_the_batch() {
        let (mut scene, pool) = scene();
        let id = scene.spawn(BlockSpec::new(BlockType::Cube, Vector3::new(0.0, 0.5, 0.0)), &pool);
        scene.flush(&mut crate::render::HeadlessSurface::default());
        assert!(!scene.renderer().is_dirty(BlockType::Cube));

        assert!(scene.set_position(id, Vector3::new(2.0, 0.5, 0.0)));
        assert!(scene.renderer().is_dirty(BlockType::Cube));
        let body = scene.block(id).unwrap().pair().body().unwrap();
        let (pos, _) = scene.world().pose(body).unwrap();
        assert_eq!(pos, Vector3::new(2.0, 0.5, 0.0));

        assert!(!scene.set_scale(id, 0.0));
        assert!(scene.set_color(id, 0xff0000));
        assert_eq!(scene.block(id).unwrap().spec.color, 0xff0000);
    }

    #[test]
    fn selection_highlights_and_moves() {
        let (mut scene, pool) = scene();
        let a = scene.spawn(BlockSpec::new(BlockType::Cube, Vector3::new(0.0, 0.5, 0.0)), &pool);
        let b = scene.spawn(BlockSpec::new(BlockType::Cube, Vector3::new(2.0, 0.5, 0.0)), &pool);
        assert!(scene.select(Some(a)));
        assert!(scene.block(a).unwrap().pair().visual().color_override.is_some());
        assert!(scene.select(Some(b)));
        assert!(scene.block(a).unwrap().pair().visual().color_override.is_none());
        assert!(!scene.select(Some(999)));
        assert_eq!(scene.selected(), Some(b));
    }

    #[test]
    fn crate_follows_physics_unless_dragged() {
        let (mut scene, pool) = scene();
        let id = scene.spawn(BlockSpec::new(BlockType::Crate, Vector3::new(0.0, 5.0, 0.0)), &pool);
        for _ in 0..10 {
            scene.world_mut().step(1.0 / 60.0, 1.0 / 60.0, 3).unwrap();
        }
        assert!(scene.sync_from_physics() > 0);
        assert!(scene.block(id).unwrap().spec.position.y < 5.0);

        scene.set_dragged(Some(id));
        let held = scene.block(id).unwrap().spec.position;
        for _ in 0..10 {
            scene.world_mut().step(1.0 / 60.0, 1.0 / 60.0, 3).unwrap();
        }
        scene.sync_from_physics();
        assert_eq!(scene.block(id).unwrap().spec.position, held);
    }

    #[test]
    fn snapshot_round_trip_keeps_ids_and_terrain() {
        let (mut scene, pool) = scene();
        scene.terrain_mut().set_height(3, 3, 2.0);
        let a = scene.spawn(BlockSpec::new(BlockType::Ramp, Vector3::new(1.0, 0.5, 1.0)), &pool);
        scene.spawn(BlockSpec::new(BlockType::Finish, Vector3::new(3.0, 0.05, 1.0)), &pool);
        let json = scene.snapshot().to_json().unwrap();

        let (mut other, other_pool) = scene_pair();
        let loaded = other
            .load(SceneSnapshot::from_json(&json).unwrap(), &other_pool, &EngineConfig::default().terrain)
            .unwrap();
        assert_eq!(loaded, 2);
        assert_eq!(other.block(a).unwrap().block_type(), BlockType::Ramp);
        assert_eq!(other.terrain().height(3, 3), 2.0);
        assert!(other.spawn(BlockSpec::new(BlockType::Cube, Vector3::new(5.0, 0.5, 5.0)), &other_pool) > 2);
    }

    #[test]
    fn missing_terrain_falls_back_to_flat() {
        let (mut scene, pool) = scene();
        let snapshot = SceneSnapshot::from_json(r#"{ "blocks": [] }"#).unwrap();
        let fallback = TerrainConfig {
            size: 16.0,
            resolution: 4,
            ..Default::default()
        };
        scene.load(snapshot, &pool, &fallback).unwrap();
        assert_eq!(scene.terrain().size(), 16.0);
        assert!(scene.world().has_terrain());
    }

    #[test]
    fn corrupt_terrain_leaves_scene_untouched() {
        let (mut scene, pool) = scene();
        scene.spawn(BlockSpec::new(BlockType::Cube, Vector3::new(0.0, 0.5, 0.0)), &pool);
        let mut snapshot = scene.snapshot();
        if let Some(terrain) = snapshot.terrain.as_mut() {
            terrain.heights.truncate(3);
        }
        assert!(scene.load(snapshot, &pool, &TerrainConfig::default()).is_err());
        assert_eq!(scene.len(), 1);
    }

    #[test]
    fn reserved_block_id_is_skipped_on_load() {
        let (mut scene, pool) = scene();
        scene.spawn(BlockSpec::new(BlockType::Cube, Vector3::new(0.0, 0.5, 0.0)), &pool);
        let mut snapshot = scene.snapshot();
        let mut last = snapshot.blocks[0].clone();
        last.id = BlockId::MAX;
        last.position = [4.0, 0.5, 0.0];
        snapshot.blocks.push(last);

        let (mut other, other_pool) = scene_pair();
        assert_eq!(other.load(snapshot, &other_pool, &TerrainConfig::default()).unwrap(), 1);
        assert!(other.block(BlockId::MAX).is_none());
        let next = other.spawn(BlockSpec::new(BlockType::Cube, Vector3::new(8.0, 0.5, 0.0)), &other_pool);
        assert_eq!(next, 2);
    }

    #[test]
    fn tipped_crate_saves_its_simulated_rotation() {
        let (mut scene, pool) = scene();
        scene.spawn(BlockSpec::new(BlockType::Cube, Vector3::new(0.0, 0.5, 0.0)), &pool);
        let id = scene.spawn(BlockSpec::new(BlockType::Crate, Vector3::new(0.65, 1.5, 0.0)), &pool);
        for _ in 0..180 {
            scene.world_mut().step(1.0 / 60.0, 1.0 / 60.0, 3).unwrap();
            scene.sync_from_physics();
        }

        let block = scene.block(id).unwrap();
        let (_, body_rotation) = scene.world().pose(block.pair().body().unwrap()).unwrap();
        assert!(block.spec.rotation.magnitude() > 0.1);
        let saved = euler_to_quaternion(block.spec.rotation);
        assert!(saved.dot(body_rotation).abs() > 0.999);

        let record = scene
            .snapshot()
            .blocks
            .into_iter()
            .find(|record| record.id == id)
            .unwrap();
        assert_eq!(Vector3::from(record.rotation), block.spec.rotation);
    }

    fn scene_pair() -> (Scene, BlockPool) {
        scene()
    }
}
