//! Physics world management.
//!
//! A [`PhysicsWorld`] bundles every rapier set and solver structure a scene
//! needs, plus the fixed-timestep accumulator and a queue of collision-begin
//! events. Worlds are expensive to set up, so sessions take them from a
//! [`WorldPool`] and give them back on teardown.
//!
//! # Key types
//!
//! - [`PhysicsWorld`] steps the simulation and owns bodies and colliders
//! - [`WorldPool`] is a bounded free list of stripped worlds
//! - [`CollisionBegin`] is one drained contact start, tagged by what touched

use std::{
    panic::{self, AssertUnwindSafe},
    sync::Mutex,
};

use cgmath::{Quaternion, Vector3};
use rapier3d::{
    na::{self, DMatrix, UnitQuaternion},
    prelude::*,
};

use crate::{
    config::PhysicsConfig,
    data_structures::{
        block::{BlockId, BlockType, Shape},
        terrain::Terrain,
    },
};

/// `user_data` value marking the play-mode avatar collider.
pub const PLAYER_USER_DATA: u128 = u128::MAX;

/// What a collider represents, decoded from its `user_data`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ColliderTag {
    Block(BlockId),
    Player,
    Terrain,
    Untagged,
}

/// Two colliders started touching during a step.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CollisionBegin {
    pub first: ColliderTag,
    pub second: ColliderTag,
}

impl CollisionBegin {
    /// The block on the other side of a contact involving `tag`, if any.
    pub fn block_touching(&self, tag: ColliderTag) -> Option<BlockId> {
        match (self.first, self.second) {
            (a, ColliderTag::Block(id)) if a == tag => Some(id),
            (ColliderTag::Block(id), b) if b == tag => Some(id),
            _ => None,
        }
    }
}

/// Collects contact starts during a step.
///
/// rapier calls event handlers through `&self` and requires `Sync`, hence the mutex.
#[derive(Default)]
struct ContactCollector {
    started: Mutex<Vec<(ColliderHandle, ColliderHandle)>>,
}

impl EventHandler for ContactCollector {
    fn handle_collision_event(
        &self,
        _bodies: &RigidBodySet,
        _colliders: &ColliderSet,
        event: CollisionEvent,
        _contact_pair: Option<&ContactPair>,
    ) {
        if let CollisionEvent::Started(a, b, _) = event {
            match self.started.lock() {
                Ok(mut started) => started.push((a, b)),
                Err(e) => log::warn!("Dropping collision event, collector poisoned: {}", e),
            }
        }
    }

    fn handle_contact_force_event(
        &self,
        _dt: Real,
        _bodies: &RigidBodySet,
        _colliders: &ColliderSet,
        _contact_pair: &ContactPair,
        _total_force_magnitude: Real,
    ) {
    }
}

pub struct PhysicsWorld {
    gravity: Vector<Real>,
    params: IntegrationParameters,
    pipeline: PhysicsPipeline,
    islands: IslandManager,
    broad_phase: DefaultBroadPhase,
    narrow_phase: NarrowPhase,
    bodies: RigidBodySet,
    colliders: ColliderSet,
    impulse_joints: ImpulseJointSet,
    multibody_joints: MultibodyJointSet,
    ccd: CCDSolver,
    query_pipeline: QueryPipeline,
    events: ContactCollector,
    accumulator: f32,
    terrain: Option<ColliderHandle>,
}

impl std::fmt::Debug for PhysicsWorld {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PhysicsWorld")
            .field("gravity", &self.gravity)
            .field("bodies", &self.bodies.len())
            .field("colliders", &self.colliders.len())
            .field("accumulator", &self.accumulator)
            .finish()
    }
}

impl PhysicsWorld {
    pub fn new(gravity: [f32; 3]) -> Self {
        Self {
            gravity: vector![gravity[0], gravity[1], gravity[2]],
            params: IntegrationParameters::default(),
            pipeline: PhysicsPipeline::new(),
            islands: IslandManager::new(),
            broad_phase: DefaultBroadPhase::new(),
            narrow_phase: NarrowPhase::new(),
            bodies: RigidBodySet::new(),
            colliders: ColliderSet::new(),
            impulse_joints: ImpulseJointSet::new(),
            multibody_joints: MultibodyJointSet::new(),
            ccd: CCDSolver::new(),
            query_pipeline: QueryPipeline::new(),
            events: ContactCollector::default(),
            accumulator: 0.0,
            terrain: None,
        }
    }

    pub fn gravity(&self) -> [f32; 3] {
        [self.gravity.x, self.gravity.y, self.gravity.z]
    }

    pub fn set_gravity(&mut self, gravity: [f32; 3]) {
        self.gravity = vector![gravity[0], gravity[1], gravity[2]];
    }

    pub fn accumulator(&self) -> f32 {
        self.accumulator
    }

    /// Forget pending simulation time, e.g. after the surface was hidden.
    pub fn reset_accumulator(&mut self) {
        self.accumulator = 0.0;
    }

    pub fn body_count(&self) -> usize {
        self.bodies.len()
    }

    pub fn collider_count(&self) -> usize {
        self.colliders.len()
    }

    /// Restore gravity and solver parameters to their defaults.
    pub(crate) fn reset(&mut self, gravity: [f32; 3]) {
        self.set_gravity(gravity);
        self.params = IntegrationParameters::default();
        self.accumulator = 0.0;
    }

    /// Strip all bodies, colliders, joints and queued events.
    pub fn clear(&mut self) {
        let handles: Vec<RigidBodyHandle> = self.bodies.iter().map(|(h, _)| h).collect();
        for handle in handles {
            self.bodies.remove(
                handle,
                &mut self.islands,
                &mut self.colliders,
                &mut self.impulse_joints,
                &mut self.multibody_joints,
                true,
            );
        }
        let loose: Vec<ColliderHandle> = self.colliders.iter().map(|(h, _)| h).collect();
        for handle in loose {
            self.colliders
                .remove(handle, &mut self.islands, &mut self.bodies, false);
        }
        self.impulse_joints = ImpulseJointSet::new();
        self.multibody_joints = MultibodyJointSet::new();
        self.islands = IslandManager::new();
        self.broad_phase = DefaultBroadPhase::new();
        self.narrow_phase = NarrowPhase::new();
        self.ccd = CCDSolver::new();
        self.query_pipeline = QueryPipeline::new();
        self.terrain = None;
        self.accumulator = 0.0;
        self.drain_collision_begins();
    }

    /// Advance the simulation by `elapsed` seconds in `fixed_dt` sub-steps.
    ///
    /// At most `max_sub_steps` are taken; leftover time beyond that is dropped
    /// rather than carried into the next frame. A zero `elapsed` still performs
    /// one step. Returns the number of sub-steps taken.
    pub fn step(&mut self, fixed_dt: f32, elapsed: f32, max_sub_steps: u32) -> anyhow::Result<u32> {
        if !(fixed_dt > 0.0) || !fixed_dt.is_finite() {
            anyhow::bail!("fixed timestep must be positive and finite, got {}", fixed_dt);
        }
        if elapsed.is_nan() {
            anyhow::bail!("elapsed time is NaN");
        }
        self.params.dt = fixed_dt;

        let steps = if elapsed <= 0.0 {
            1
        } else {
            self.accumulator += elapsed;
            let mut steps = 0;
            while self.accumulator >= fixed_dt && steps < max_sub_steps {
                self.accumulator -= fixed_dt;
                steps += 1;
            }
            if self.accumulator >= fixed_dt {
                self.accumulator = 0.0;
            }
            steps
        };

        for _ in 0..steps {
            self.step_once()?;
        }
        Ok(steps)
    }

    fn step_once(&mut self) -> anyhow::Result<()> {
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            self.pipeline.step(
                &self.gravity,
                &self.params,
                &mut self.islands,
                &mut self.broad_phase,
                &mut self.narrow_phase,
                &mut self.bodies,
                &mut self.colliders,
                &mut self.impulse_joints,
                &mut self.multibody_joints,
                &mut self.ccd,
                Some(&mut self.query_pipeline),
                &(),
                &self.events,
            );
        }));
        result.map_err(|payload| {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            anyhow::anyhow!("physics step panicked: {}", message)
        })
    }

    /// Insert a detached body together with its collider.
    pub fn attach(&mut self, body: RigidBody, collider: Collider) -> (RigidBodyHandle, ColliderHandle) {
        let body_handle = self.bodies.insert(body);
        let collider_handle = self
            .colliders
            .insert_with_parent(collider, body_handle, &mut self.bodies);
        (body_handle, collider_handle)
    }

    /// Remove a body and its collider, handing both back for reuse.
    pub fn detach(
        &mut self,
        body: RigidBodyHandle,
        collider: ColliderHandle,
    ) -> Option<(RigidBody, Collider)> {
        let collider = self
            .colliders
            .remove(collider, &mut self.islands, &mut self.bodies, false)?;
        let body = self.bodies.remove(
            body,
            &mut self.islands,
            &mut self.colliders,
            &mut self.impulse_joints,
            &mut self.multibody_joints,
            true,
        )?;
        Some((body, collider))
    }

    pub fn contains_body(&self, body: RigidBodyHandle) -> bool {
        self.bodies.contains(body)
    }

    /// Teleport a body. Velocities are cleared so dynamic bodies do not keep momentum.
    pub fn set_pose(&mut self, body: RigidBodyHandle, position: Vector3<f32>, rotation: Quaternion<f32>) {
        let Some(rb) = self.bodies.get_mut(body) else {
            log::warn!("set_pose on unknown body {:?}", body);
            return;
        };
        let iso = to_isometry(position, rotation);
        if rb.is_kinematic() {
            rb.set_next_kinematic_position(iso);
        }
        rb.set_position(iso, true);
        if rb.is_dynamic() {
            rb.set_linvel(vector![0.0, 0.0, 0.0], true);
            rb.set_angvel(vector![0.0, 0.0, 0.0], true);
        }
    }

    pub fn pose(&self, body: RigidBodyHandle) -> Option<(Vector3<f32>, Quaternion<f32>)> {
        self.bodies.get(body).map(|rb| from_isometry(rb.position()))
    }

    /// Whether the body is simulated and currently awake.
    pub fn is_moving(&self, body: RigidBodyHandle) -> bool {
        self.bodies
            .get(body)
            .is_some_and(|rb| rb.is_dynamic() && !rb.is_sleeping())
    }

    pub fn set_body_type(&mut self, body: RigidBodyHandle, body_type: RigidBodyType) {
        if let Some(rb) = self.bodies.get_mut(body) {
            rb.set_body_type(body_type, true);
        }
    }

    pub fn apply_impulse(&mut self, body: RigidBodyHandle, impulse: Vector3<f32>) {
        if let Some(rb) = self.bodies.get_mut(body) {
            rb.apply_impulse(vector![impulse.x, impulse.y, impulse.z], true);
        }
    }

    pub fn linear_velocity(&self, body: RigidBodyHandle) -> Option<Vector3<f32>> {
        self.bodies.get(body).map(|rb| {
            let v = rb.linvel();
            Vector3::new(v.x, v.y, v.z)
        })
    }

    pub fn set_linear_velocity(&mut self, body: RigidBodyHandle, velocity: Vector3<f32>) {
        if let Some(rb) = self.bodies.get_mut(body) {
            rb.set_linvel(vector![velocity.x, velocity.y, velocity.z], true);
        }
    }

    pub fn set_collider_shape(&mut self, collider: ColliderHandle, shape: SharedShape) {
        if let Some(c) = self.colliders.get_mut(collider) {
            c.set_shape(shape);
        }
    }

    pub fn set_user_data(&mut self, collider: ColliderHandle, user_data: u128) {
        if let Some(c) = self.colliders.get_mut(collider) {
            c.user_data = user_data;
        }
    }

    /// Record which block a collider belongs to.
    pub fn tag_block(&mut self, collider: ColliderHandle, id: BlockId) {
        self.set_user_data(collider, encode_block(id));
    }

    pub fn collider_tag(&self, collider: ColliderHandle) -> ColliderTag {
        if Some(collider) == self.terrain {
            return ColliderTag::Terrain;
        }
        match self.colliders.get(collider).map(|c| c.user_data) {
            Some(PLAYER_USER_DATA) => ColliderTag::Player,
            Some(data) => decode_block(data).map_or(ColliderTag::Untagged, ColliderTag::Block),
            None => ColliderTag::Untagged,
        }
    }

    /// Take every collision start queued since the last drain.
    pub fn drain_collision_begins(&mut self) -> Vec<CollisionBegin> {
        let started = match self.events.started.get_mut() {
            Ok(started) => std::mem::take(started),
            Err(poisoned) => std::mem::take(poisoned.into_inner()),
        };
        started
            .into_iter()
            .map(|(a, b)| CollisionBegin {
                first: self.collider_tag(a),
                second: self.collider_tag(b),
            })
            .collect()
    }

    /// Replace the terrain collider with a heightfield built from `terrain`.
    pub fn set_terrain(&mut self, terrain: &Terrain) {
        if let Some(old) = self.terrain.take() {
            self.colliders
                .remove(old, &mut self.islands, &mut self.bodies, true);
        }
        let n = terrain.vertices_per_edge();
        let heights = DMatrix::from_fn(n, n, |row, col| terrain.height(col, row));
        let collider = ColliderBuilder::heightfield(
            heights,
            vector![terrain.size(), 1.0, terrain.size()],
        )
        .friction(0.8)
        .build();
        self.terrain = Some(self.colliders.insert(collider));
    }

    pub fn has_terrain(&self) -> bool {
        self.terrain.is_some()
    }

    /// Closest collider hit along a ray, for play-mode queries such as ground checks.
    pub fn cast_ray(
        &self,
        origin: Vector3<f32>,
        direction: Vector3<f32>,
        max_distance: f32,
        exclude: Option<ColliderHandle>,
    ) -> Option<(ColliderTag, f32)> {
        let ray = Ray::new(
            point![origin.x, origin.y, origin.z],
            vector![direction.x, direction.y, direction.z],
        );
        let mut filter = QueryFilter::default();
        if let Some(exclude) = exclude {
            filter = filter.exclude_collider(exclude);
        }
        self.query_pipeline
            .cast_ray(&self.bodies, &self.colliders, &ray, max_distance, true, filter)
            .map(|(handle, toi)| (self.collider_tag(handle), toi))
    }
}

fn encode_block(id: BlockId) -> u128 {
    id as u128 + 1
}

fn decode_block(data: u128) -> Option<BlockId> {
    data.checked_sub(1).and_then(|id| BlockId::try_from(id).ok())
}

pub fn to_isometry(position: Vector3<f32>, rotation: Quaternion<f32>) -> Isometry<Real> {
    let rotation = UnitQuaternion::from_quaternion(na::Quaternion::new(
        rotation.s,
        rotation.v.x,
        rotation.v.y,
        rotation.v.z,
    ));
    Isometry::from_parts(na::Translation3::new(position.x, position.y, position.z), rotation)
}

pub fn from_isometry(iso: &Isometry<Real>) -> (Vector3<f32>, Quaternion<f32>) {
    let t = iso.translation.vector;
    let q = iso.rotation.quaternion();
    (
        Vector3::new(t.x, t.y, t.z),
        Quaternion::new(q.w, q.i, q.j, q.k),
    )
}

/// Collision shape of a block type at the given uniform scale.
pub fn shape_for(block_type: BlockType, scale: f32) -> SharedShape {
    let he = block_type.dimensions().half_extents * scale;
    match block_type.shape() {
        Shape::Cuboid => SharedShape::cuboid(he.x, he.y, he.z),
        Shape::Ball => SharedShape::ball(he.x),
        Shape::Cylinder => SharedShape::cylinder(he.y, he.x),
        Shape::Ramp => {
            // Wedge rising towards -Z.
            let points = [
                point![-he.x, -he.y, -he.z],
                point![he.x, -he.y, -he.z],
                point![-he.x, -he.y, he.z],
                point![he.x, -he.y, he.z],
                point![-he.x, he.y, -he.z],
                point![he.x, he.y, -he.z],
            ];
            SharedShape::convex_hull(&points).unwrap_or_else(|| SharedShape::cuboid(he.x, he.y, he.z))
        }
    }
}

/// Build a detached body and collider for a block type at scale 1.
pub fn build_body(block_type: BlockType) -> (RigidBody, Collider) {
    let body = if block_type.is_dynamic() {
        RigidBodyBuilder::dynamic().linear_damping(0.2).build()
    } else {
        RigidBodyBuilder::fixed().build()
    };
    let collider = ColliderBuilder::new(shape_for(block_type, 1.0))
        .friction(0.7)
        .density(if block_type.is_dynamic() { 0.5 } else { 1.0 })
        .active_events(ActiveEvents::COLLISION_EVENTS)
        .build();
    (body, collider)
}

/// Bounded free list of physics worlds.
#[derive(Debug)]
pub struct WorldPool {
    free: Vec<PhysicsWorld>,
    capacity: usize,
    defaults: PhysicsConfig,
    created: usize,
    reused: usize,
}

impl WorldPool {
    pub fn new(capacity: usize, defaults: PhysicsConfig) -> Self {
        Self {
            free: Vec::with_capacity(capacity),
            capacity,
            defaults,
            created: 0,
            reused: 0,
        }
    }

    /// Pop a pooled world reset to default gravity and solver settings, or build one.
    pub fn acquire(&mut self) -> PhysicsWorld {
        match self.free.pop() {
            Some(mut world) => {
                world.reset(self.defaults.gravity);
                self.reused += 1;
                world
            }
            None => {
                self.created += 1;
                PhysicsWorld::new(self.defaults.gravity)
            }
        }
    }

    /// Strip the world and keep it for reuse, unless the pool is full.
    pub fn release(&mut self, mut world: PhysicsWorld) {
        world.clear();
        if self.free.len() < self.capacity {
            self.free.push(world);
        } else {
            log::debug!("World pool full ({}), dropping released world", self.capacity);
        }
    }

    pub fn available(&self) -> usize {
        self.free.len()
    }

    pub fn created(&self) -> usize {
        self.created
    }

    pub fn reused(&self) -> usize {
        self.reused
    }

    /// Drop every pooled world.
    pub fn clear(&mut self) {
        self.free.clear();
    }
}

#[cfg(test)]
mod tests {
    use cgmath::One;

    use super::*;

    fn world() -> PhysicsWorld {
        PhysicsWorld::new(PhysicsConfig::default().gravity)
    }

    #[test]
    fn zero_elapsed_still_steps_once() {
        let mut world = world();
        assert_eq!(world.step(1.0 / 60.0, 0.0, 3).unwrap(), 1);
    }

    #[test]
    fn sub_steps_are_capped_and_excess_dropped() {
        let mut world = world();
        let dt = 1.0 / 60.0;
        assert_eq!(world.step(dt, 1.0, 3).unwrap(), 3);
        assert_eq!(world.accumulator(), 0.0);
        assert_eq!(world.step(dt, dt * 0.5, 3).unwrap(), 0);
        assert!(world.accumulator() > 0.0);
    }

    #[test]
    fn invalid_timestep_is_an_error() {
        let mut world = world();
        assert!(world.step(0.0, 0.1, 3).is_err());
        assert!(world.step(1.0 / 60.0, f32::NAN, 3).is_err());
        assert!(world.step(1.0 / 60.0, 0.0, 3).is_ok());
    }

    #[test]
    fn dynamic_body_falls() {
        let mut world = world();
        let (body, collider) = build_body(BlockType::Crate);
        let (bh, _) = world.attach(body, collider);
        world.set_pose(bh, Vector3::new(0.0, 10.0, 0.0), Quaternion::one());
        for _ in 0..30 {
            world.step(1.0 / 60.0, 1.0 / 60.0, 3).unwrap();
        }
        let (pos, _) = world.pose(bh).unwrap();
        assert!(pos.y < 10.0);
    }

    #[test]
    fn detach_returns_parts_for_reattachment() {
        let mut world = world();
        let (body, collider) = build_body(BlockType::Cube);
        let (bh, ch) = world.attach(body, collider);
        world.tag_block(ch, 42);
        assert_eq!(world.collider_tag(ch), ColliderTag::Block(42));

        let (body, collider) = world.detach(bh, ch).unwrap();
        assert_eq!(world.body_count(), 0);
        assert_eq!(world.collider_count(), 0);

        let (bh, _) = world.attach(body, collider);
        assert!(world.contains_body(bh));
        assert_eq!(world.body_count(), 1);
    }

    #[test]
    fn falling_crate_reports_contact_with_block() {
        let mut world = world();
        let (floor, floor_collider) = build_body(BlockType::Cube);
        let (_, fc) = world.attach(floor, floor_collider);
        world.tag_block(fc, 1);
        let (body, collider) = build_body(BlockType::Crate);
        let (bh, cc) = world.attach(body, collider);
        world.tag_block(cc, 2);
        world.set_pose(bh, Vector3::new(0.0, 1.5, 0.0), Quaternion::one());

        let mut begins = Vec::new();
        for _ in 0..120 {
            world.step(1.0 / 60.0, 1.0 / 60.0, 3).unwrap();
            begins.extend(world.drain_collision_begins());
        }
        assert!(begins
            .iter()
            .any(|b| b.block_touching(ColliderTag::Block(2)) == Some(1)));
    }

    #[test]
    fn terrain_collider_is_replaced_not_duplicated() {
        let mut world = world();
        let terrain = Terrain::flat(8.0, 4);
        world.set_terrain(&terrain);
        world.set_terrain(&terrain);
        assert_eq!(world.collider_count(), 1);
        assert!(world.has_terrain());
    }

    #[test]
    fn pool_resets_reused_worlds() {
        let mut pool = WorldPool::new(1, PhysicsConfig::default());
        let mut world = pool.acquire();
        world.set_gravity([0.0, 0.0, 0.0]);
        let (body, collider) = build_body(BlockType::Cube);
        world.attach(body, collider);
        pool.release(world);
        assert_eq!(pool.available(), 1);

        let world = pool.acquire();
        assert_eq!(world.body_count(), 0);
        assert_eq!(world.gravity(), PhysicsConfig::default().gravity);
        assert_eq!((pool.created(), pool.reused()), (1, 1));
    }

    #[test]
    fn pool_drops_worlds_beyond_capacity() {
        let mut pool = WorldPool::new(1, PhysicsConfig::default());
        let a = pool.acquire();
        let b = pool.acquire();
        pool.release(a);
        pool.release(b);
        assert_eq!(pool.available(), 1);
    }
}
