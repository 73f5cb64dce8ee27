//! Play-mode contacts and the player avatar.
//!
//! The frame loop drains collision starts from the physics world and turns the
//! ones between the player and a block carrying a mechanic into
//! [`ContactEvent`]s. Those go to the [`PlayerController`] first (bounces,
//! boosts, hazard respawns) and then to every [`GameplayListener`].

use std::collections::BTreeSet;

use cgmath::{InnerSpace, Vector3, Zero};
use rapier3d::prelude::{ActiveEvents, ColliderBuilder, ColliderHandle, RigidBodyBuilder, RigidBodyHandle, nalgebra, vector};
use winit::{event::ElementState, keyboard::KeyCode};

use crate::{
    data_structures::block::{BlockId, Mechanic},
    physics::{ColliderTag, CollisionBegin, PLAYER_USER_DATA, PhysicsWorld},
    scene::Scene,
};

/// The player touched a block with a mechanic.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ContactEvent {
    pub block: BlockId,
    pub mechanic: Mechanic,
    pub power: f32,
    pub position: Vector3<f32>,
}

/// Player contacts among `begins`, resolved against the scene's blocks.
pub fn contact_events(begins: &[CollisionBegin], scene: &Scene) -> Vec<ContactEvent> {
    begins
        .iter()
        .filter_map(|begin| begin.block_touching(ColliderTag::Player))
        .filter_map(|id| {
            let block = scene.block(id)?;
            let tag = block.spec.mechanic()?;
            Some(ContactEvent {
                block: id,
                mechanic: tag.mechanic,
                power: tag.power,
                position: block.spec.position,
            })
        })
        .collect()
}

pub trait GameplayListener {
    fn on_contact(&mut self, event: &ContactEvent);

    /// Called when play mode starts, before any contact.
    fn on_reset(&mut self) {}
}

/// Tracks race progress: start, visited checkpoints, finish and hazard hits.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CheckpointTracker {
    started: bool,
    finished: bool,
    visited: BTreeSet<BlockId>,
    respawn_point: Option<Vector3<f32>>,
    hazard_hits: usize,
}

impl CheckpointTracker {
    pub fn started(&self) -> bool {
        self.started
    }

    pub fn finished(&self) -> bool {
        self.finished
    }

    pub fn checkpoints(&self) -> usize {
        self.visited.len()
    }

    pub fn hazard_hits(&self) -> usize {
        self.hazard_hits
    }

    pub fn respawn_point(&self) -> Option<Vector3<f32>> {
        self.respawn_point
    }
}

impl GameplayListener for CheckpointTracker {
    fn on_contact(&mut self, event: &ContactEvent) {
        match event.mechanic {
            Mechanic::Start => {
                self.started = true;
                self.respawn_point = Some(event.position);
            }
            Mechanic::Checkpoint => {
                if self.visited.insert(event.block) {
                    log::info!("Checkpoint {} reached", event.block);
                }
                self.respawn_point = Some(event.position);
            }
            Mechanic::Finish if !self.finished => {
                self.finished = true;
                log::info!("Finished with {} checkpoints", self.visited.len());
            }
            Mechanic::Hazard => self.hazard_hits += 1,
            _ => {}
        }
    }

    fn on_reset(&mut self) {
        *self = Self::default();
    }
}

/// The play-mode avatar.
pub trait PlayerController {
    /// Create the avatar's body at `position`.
    fn spawn(&mut self, world: &mut PhysicsWorld, position: Vector3<f32>);

    fn despawn(&mut self, world: &mut PhysicsWorld);

    /// Per-frame control, after the physics step.
    fn update(&mut self, world: &mut PhysicsWorld, dt: f32);

    fn on_contact(&mut self, world: &mut PhysicsWorld, event: &ContactEvent);

    fn position(&self, world: &PhysicsWorld) -> Option<Vector3<f32>>;

    /// Returns whether the key was consumed.
    fn process_keyboard(&mut self, _key: KeyCode, _state: ElementState) -> bool {
        false
    }
}

const BOUNCE_SPEED: f32 = 8.0;
const BOOST_IMPULSE: f32 = 4.0;
/// Below this height the player is put back on the last respawn point.
const KILL_HEIGHT: f32 = -30.0;

/// A ball rolled around with WASD and Space to jump.
#[derive(Debug)]
pub struct RollingPlayer {
    handles: Option<(RigidBodyHandle, ColliderHandle)>,
    radius: f32,
    move_impulse: f32,
    jump_impulse: f32,
    input: Vector3<f32>,
    jump: bool,
    respawn: Vector3<f32>,
}

impl RollingPlayer {
    pub fn new(radius: f32) -> Self {
        Self {
            handles: None,
            radius,
            move_impulse: 6.0,
            jump_impulse: 4.0,
            input: Vector3::zero(),
            jump: false,
            respawn: Vector3::zero(),
        }
    }

    pub fn body(&self) -> Option<RigidBodyHandle> {
        self.handles.map(|(body, _)| body)
    }

    /// Desired horizontal direction in world space; normalised on use.
    pub fn set_input(&mut self, direction: Vector3<f32>, jump: bool) {
        self.input = Vector3::new(direction.x, 0.0, direction.z);
        self.jump = jump;
    }

    fn grounded(&self, world: &PhysicsWorld) -> bool {
        let Some((body, collider)) = self.handles else {
            return false;
        };
        let Some((position, _)) = world.pose(body) else {
            return false;
        };
        world
            .cast_ray(position, -Vector3::unit_y(), self.radius + 0.05, Some(collider))
            .is_some()
    }

    fn respawn(&self, world: &mut PhysicsWorld) {
        if let Some(body) = self.body() {
            world.set_pose(body, self.respawn + Vector3::unit_y() * self.radius * 2.0, cgmath::Quaternion::new(1.0, 0.0, 0.0, 0.0));
        }
    }
}

impl PlayerController for RollingPlayer {
    fn spawn(&mut self, world: &mut PhysicsWorld, position: Vector3<f32>) {
        self.despawn(world);
        let body = RigidBodyBuilder::dynamic()
            .translation(vector![position.x, position.y, position.z])
            .linear_damping(0.3)
            .angular_damping(0.5)
            .ccd_enabled(true)
            .build();
        let collider = ColliderBuilder::ball(self.radius)
            .friction(0.9)
            .restitution(0.2)
            .active_events(ActiveEvents::COLLISION_EVENTS)
            .build();
        let (body, collider) = world.attach(body, collider);
        world.set_user_data(collider, PLAYER_USER_DATA);
        self.handles = Some((body, collider));
        self.respawn = position;
    }

    fn despawn(&mut self, world: &mut PhysicsWorld) {
        if let Some((body, collider)) = self.handles.take() {
            world.detach(body, collider);
        }
        self.input = Vector3::zero();
        self.jump = false;
    }

    fn update(&mut self, world: &mut PhysicsWorld, dt: f32) {
        let Some(body) = self.body() else {
            return;
        };
        if world.pose(body).is_some_and(|(p, _)| p.y < KILL_HEIGHT) {
            self.respawn(world);
            return;
        }
        if self.input.magnitude2() > 0.0 {
            world.apply_impulse(body, self.input.normalize() * self.move_impulse * dt);
        }
        if self.jump && self.grounded(world) {
            world.apply_impulse(body, Vector3::unit_y() * self.jump_impulse);
            self.jump = false;
        }
    }

    fn on_contact(&mut self, world: &mut PhysicsWorld, event: &ContactEvent) {
        let Some(body) = self.body() else {
            return;
        };
        match event.mechanic {
            Mechanic::Start | Mechanic::Checkpoint => self.respawn = event.position,
            Mechanic::Hazard => self.respawn(world),
            Mechanic::Bounce => {
                let mut velocity = world.linear_velocity(body).unwrap_or_else(Vector3::zero);
                velocity.y = BOUNCE_SPEED * event.power;
                world.set_linear_velocity(body, velocity);
            }
            Mechanic::Boost => {
                let velocity = world.linear_velocity(body).unwrap_or_else(Vector3::zero);
                let planar = Vector3::new(velocity.x, 0.0, velocity.z);
                if planar.magnitude2() > 1e-6 {
                    world.apply_impulse(body, planar.normalize() * BOOST_IMPULSE * event.power);
                }
            }
            Mechanic::Finish => {}
        }
    }

    fn position(&self, world: &PhysicsWorld) -> Option<Vector3<f32>> {
        self.body().and_then(|body| world.pose(body)).map(|(p, _)| p)
    }

    fn process_keyboard(&mut self, key: KeyCode, state: ElementState) -> bool {
        let amount = if state == ElementState::Pressed { 1.0 } else { 0.0 };
        match key {
            KeyCode::KeyW | KeyCode::ArrowUp => self.input.z = -amount,
            KeyCode::KeyS | KeyCode::ArrowDown => self.input.z = amount,
            KeyCode::KeyA | KeyCode::ArrowLeft => self.input.x = -amount,
            KeyCode::KeyD | KeyCode::ArrowRight => self.input.x = amount,
            KeyCode::Space => self.jump = state == ElementState::Pressed,
            _ => return false,
        }
        true
    }
}
