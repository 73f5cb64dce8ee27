//! The editing/play session and its owner.
//!
//! [`Engine`] owns the pools and the frame loop. Mounting a render surface
//! creates a [`Session`]: a scene on a pooled physics world, the placement and
//! terrain tools, the camera and the play-mode player. The session is what the
//! [`FrameLoop`] drives each tick.
//!
//! Unmounting tears down in a fixed order: scene contents first, then the
//! render surface, then the world goes back to its pool. A failing step is
//! logged and the remaining steps still run.

use cgmath::{Deg, Point3, Vector3};
use instant::{Duration, Instant};
use winit::{
    event::{ElementState, KeyEvent, MouseButton, WindowEvent},
    keyboard::{KeyCode, PhysicalKey},
};

use crate::{
    camera::{Camera, CameraController, CameraMode, CameraModeKind, CameraUniform, Projection},
    config::{EngineConfig, QualityTier},
    culling::CullView,
    data_structures::{
        block::{BlockId, BlockType, Mechanic},
        terrain::{MAX_TERRAIN_RESOLUTION, Terrain},
    },
    frame::{FrameLoop, FrameStages, FrameStats, TickReport},
    gameplay::{CheckpointTracker, GameplayListener, PlayerController, RollingPlayer, contact_events},
    physics::WorldPool,
    pick::PickTarget,
    placement::{CancelReason, PlaceOptions, PlacementController},
    pool::BlockPool,
    render::{GhostDraw, RenderSurface},
    scene::{Scene, SceneSnapshot},
    terrain_editor::{TerrainBrush, TerrainEditor},
};

const PLAYER_RADIUS: f32 = 0.35;
/// Height above the start block (or the origin) the player drops from.
const SPAWN_CLEARANCE: f32 = 1.5;
const PLAY_CAMERA_RADIUS: f32 = 12.0;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Mode {
    #[default]
    Edit,
    Play,
}

/// Everything that exists while a render surface is mounted.
pub struct Session {
    scene: Scene,
    placement: PlacementController,
    terrain_editor: TerrainEditor,
    camera: Camera,
    edit_camera: Option<Camera>,
    controller: CameraController,
    projection: Projection,
    player: Box<dyn PlayerController>,
    tracker: CheckpointTracker,
    listeners: Vec<Box<dyn GameplayListener>>,
    surface: Box<dyn RenderSurface>,
    mode: Mode,
    draw_distance: f32,
    cursor: Option<(f64, f64)>,
}

impl Session {
    pub fn scene(&self) -> &Scene {
        &self.scene
    }

    pub fn scene_mut(&mut self) -> &mut Scene {
        &mut self.scene
    }

    pub fn placement(&self) -> &PlacementController {
        &self.placement
    }

    pub fn placement_mut(&mut self) -> &mut PlacementController {
        &mut self.placement
    }

    pub fn camera(&self) -> &Camera {
        &self.camera
    }

    pub fn camera_mut(&mut self) -> &mut Camera {
        &mut self.camera
    }

    pub fn controller(&self) -> &CameraController {
        &self.controller
    }

    pub fn controller_mut(&mut self) -> &mut CameraController {
        &mut self.controller
    }

    pub fn projection(&self) -> &Projection {
        &self.projection
    }

    pub fn tracker(&self) -> &CheckpointTracker {
        &self.tracker
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn surface(&self) -> &dyn RenderSurface {
        self.surface.as_ref()
    }

    pub fn player_position(&self) -> Option<Vector3<f32>> {
        self.player.position(self.scene.world())
    }

    pub fn terrain_editor(&self) -> &TerrainEditor {
        &self.terrain_editor
    }

    fn update_camera(&mut self, dt: f32) {
        if dt.is_finite() && dt > 0.0 {
            self.controller.update(&mut self.camera, Duration::from_secs_f32(dt));
        }
    }

    /// Camera input is off while something is dragged and during play.
    fn refresh_camera_input(&mut self) {
        let enabled = self.mode == Mode::Edit && !self.placement.is_dragging();
        if enabled != self.controller.input_enabled() {
            self.controller.set_input_enabled(enabled);
        }
    }

    fn spawn_point(&self) -> Vector3<f32> {
        let start = self
            .scene
            .blocks()
            .iter()
            .find(|b| b.spec.mechanic().is_some_and(|tag| tag.mechanic == Mechanic::Start))
            .map(|b| b.spec.position);
        match start {
            Some(position) => position + Vector3::unit_y() * SPAWN_CLEARANCE,
            None => {
                let ground = self.scene.terrain().height_at(0.0, 0.0).unwrap_or(0.0);
                Vector3::new(0.0, ground + SPAWN_CLEARANCE, 0.0)
            }
        }
    }

    fn enter_play(&mut self) {
        if self.mode == Mode::Play {
            return;
        }
        self.placement.cancel(CancelReason::ModeSwitch, &mut self.scene);
        self.scene.select(None);
        let spawn = self.spawn_point();
        self.player.spawn(self.scene.world_mut(), spawn);
        self.tracker.on_reset();
        for listener in self.listeners.iter_mut() {
            listener.on_reset();
        }
        self.edit_camera = Some(self.camera);
        self.camera = Camera::orbit(Point3::new(spawn.x, spawn.y, spawn.z), PLAY_CAMERA_RADIUS, Deg(-90.0), Deg(-25.0));
        self.mode = Mode::Play;
        self.refresh_camera_input();
        log::info!("Entered play mode at {:?}", spawn);
    }

    fn enter_edit(&mut self) {
        if self.mode == Mode::Edit {
            return;
        }
        self.player.despawn(self.scene.world_mut());
        if let Some(camera) = self.edit_camera.take() {
            self.camera = camera;
        }
        self.mode = Mode::Edit;
        self.refresh_camera_input();
        log::info!("Back to edit mode");
    }

    fn pointer_ray(&self) -> Option<crate::pick::Ray> {
        let (x, y) = self.cursor?;
        self.projection.screen_ray(&self.camera, x, y)
    }

    fn cancel(&mut self, reason: CancelReason) {
        self.placement.cancel(reason, &mut self.scene);
        self.refresh_camera_input();
    }
}

impl FrameStages for Session {
    fn is_visible(&self) -> bool {
        self.surface.is_visible()
    }

    fn is_playing(&self) -> bool {
        self.mode == Mode::Play
    }

    fn step_physics(&mut self, fixed_dt: f32, elapsed: f32, max_sub_steps: u32) -> anyhow::Result<u32> {
        self.scene.world_mut().step(fixed_dt, elapsed, max_sub_steps)
    }

    fn reset_accumulator(&mut self) {
        self.scene.world_mut().reset_accumulator();
    }

    fn dispatch_contacts(&mut self, dispatch: bool) -> usize {
        let begins = self.scene.world_mut().drain_collision_begins();
        if !dispatch || begins.is_empty() {
            return 0;
        }
        let events = contact_events(&begins, &self.scene);
        for event in &events {
            self.player.on_contact(self.scene.world_mut(), event);
            self.tracker.on_contact(event);
            for listener in self.listeners.iter_mut() {
                listener.on_contact(event);
            }
        }
        events.len()
    }

    fn update_player(&mut self, dt: f32) {
        self.player.update(self.scene.world_mut(), dt);
        if let (Some(position), CameraMode::Orbit { target, .. }) =
            (self.player.position(self.scene.world()), &mut self.camera.mode)
        {
            *target = Point3::new(position.x, position.y, position.z);
        }
    }

    fn sync_and_cull(&mut self) -> (usize, usize) {
        let moved = self.scene.sync_from_physics();
        let eye = self.camera.eye();
        let view = CullView {
            eye: Vector3::new(eye.x, eye.y, eye.z),
            frustum: Some(self.projection.frustum(&self.camera)),
            draw_distance: self.draw_distance,
        };
        let culled = self.scene.cull(&view);
        (moved, culled)
    }

    fn flush(&mut self) -> usize {
        let mut uploads = self.scene.flush(&mut self.surface);
        if self.scene.terrain_mut().take_mesh_dirty() {
            self.surface.upload_terrain(self.scene.terrain());
            uploads += 1;
        }
        let ghost = self.placement.interaction().ghost().and_then(|ghost| {
            ghost.to_raw().map(|instance| GhostDraw {
                block_type: ghost.block_type,
                instance,
            })
        });
        self.surface.upload_ghost(ghost);
        let mut uniform = CameraUniform::new();
        uniform.update_view_proj(&self.camera, &self.projection);
        self.surface.upload_camera(&uniform);
        uploads
    }

    fn render(&mut self) -> anyhow::Result<()> {
        self.surface.render()
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("scene", &self.scene)
            .field("mode", &self.mode)
            .field("camera", &self.camera)
            .field("draw_distance", &self.draw_distance)
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

/// Owns the pools and at most one mounted session.
#[derive(Debug)]
pub struct Engine {
    config: EngineConfig,
    world_pool: WorldPool,
    block_pool: BlockPool,
    frame_loop: FrameLoop,
    session: Option<Session>,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        let world_pool = WorldPool::new(config.pools.world_capacity, config.physics.clone());
        let block_pool = BlockPool::new(config.pools.block_capacity);
        let frame_loop = FrameLoop::new(config.physics.clone(), &config.frame);
        Self {
            config,
            world_pool,
            block_pool,
            frame_loop,
            session: None,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn world_pool(&self) -> &WorldPool {
        &self.world_pool
    }

    pub fn block_pool(&self) -> &BlockPool {
        &self.block_pool
    }

    pub fn frame_stats(&self) -> FrameStats {
        self.frame_loop.stats()
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn session_mut(&mut self) -> Option<&mut Session> {
        self.session.as_mut()
    }

    pub fn is_mounted(&self) -> bool {
        self.session.is_some()
    }

    /// Start a session drawing into `surface`, with a flat terrain.
    pub fn mount(&mut self, mut surface: Box<dyn RenderSurface>, width: u32, height: u32) -> anyhow::Result<()> {
        if self.session.is_some() {
            anyhow::bail!("a session is already mounted");
        }
        let terrain_config = &self.config.terrain;
        if !(terrain_config.size > 0.0)
            || !terrain_config.size.is_finite()
            || terrain_config.resolution == 0
            || terrain_config.resolution > MAX_TERRAIN_RESOLUTION
        {
            anyhow::bail!(
                "invalid terrain config: size {} resolution {}",
                terrain_config.size,
                terrain_config.resolution
            );
        }
        let terrain = Terrain::flat(terrain_config.size, terrain_config.resolution);
        let scene = Scene::new(self.world_pool.acquire(), terrain);

        let quality = self.config.quality.settings();
        surface.resize(width, height);
        surface.apply_quality(&quality);
        let draw_distance = self.config.frame.cull_distance.unwrap_or(quality.draw_distance);
        let camera = Camera::orbit((0.0, 0.0, 0.0), 24.0, Deg(-90.0), Deg(-35.0));
        let projection = Projection::new(width.max(1), height.max(1), Deg(45.0), 0.1, draw_distance.max(100.0) * 2.0);

        self.session = Some(Session {
            scene,
            placement: PlacementController::new(self.config.grid.clone()),
            terrain_editor: TerrainEditor::new(Duration::from_millis(self.config.terrain.brush_interval_millis)),
            camera,
            edit_camera: None,
            controller: CameraController::new(12.0, 0.4),
            projection,
            player: Box::new(RollingPlayer::new(PLAYER_RADIUS)),
            tracker: CheckpointTracker::default(),
            listeners: Vec::new(),
            surface,
            mode: Mode::Edit,
            draw_distance,
            cursor: None,
        });
        log::info!("Session mounted ({}x{})", width, height);
        Ok(())
    }

    /// Tear the session down: scene contents, then the surface, then the pooled world.
    ///
    /// Every step runs even if an earlier one failed; the first error is returned.
    pub fn unmount(&mut self) -> anyhow::Result<()> {
        let Some(session) = self.session.take() else {
            return Ok(());
        };
        let Session {
            mut scene,
            mut placement,
            mut player,
            mut surface,
            ..
        } = session;

        placement.cancel(CancelReason::ModeSwitch, &mut scene);
        player.despawn(scene.world_mut());
        let blocks = scene.len();
        scene.clear(&self.block_pool);
        log::debug!("Released {} blocks", blocks);

        let released = surface.release();
        if let Err(e) = &released {
            log::error!("Failed to release render surface: {:#}", e);
        }
        drop(surface);

        self.world_pool.release(scene.into_world());
        log::info!("Session unmounted");
        released
    }

    /// Unmount and drop everything pooled.
    pub fn shutdown(&mut self) -> anyhow::Result<()> {
        let result = self.unmount();
        self.block_pool.clear();
        self.world_pool.clear();
        result
    }

    /// Run one frame. `None` when nothing is mounted.
    pub fn tick(&mut self, dt: f32) -> Option<TickReport> {
        let session = self.session.as_mut()?;
        session.update_camera(dt);
        Some(self.frame_loop.tick(dt, session))
    }

    pub fn resize(&mut self, width: u32, height: u32) {
        if let Some(session) = self.session.as_mut() {
            session.projection.resize(width, height);
            session.surface.resize(width, height);
        }
    }

    pub fn set_quality(&mut self, tier: QualityTier) {
        self.config.quality = tier;
        let settings = tier.settings();
        if let Some(session) = self.session.as_mut() {
            session.surface.apply_quality(&settings);
            session.draw_distance = self.config.frame.cull_distance.unwrap_or(settings.draw_distance);
        }
    }

    pub fn set_target_fps(&mut self, fps: f32) {
        self.config.frame.target_fps = fps;
        self.frame_loop.set_target_fps(fps);
    }

    pub fn set_time_scale(&mut self, time_scale: f32) {
        self.config.physics.time_scale = time_scale;
        self.frame_loop.set_time_scale(time_scale);
    }

    pub fn set_camera_mode(&mut self, kind: CameraModeKind) {
        if let Some(session) = self.session.as_mut() {
            session.camera.switch_to(kind);
        }
    }

    pub fn set_player(&mut self, player: Box<dyn PlayerController>) {
        if let Some(session) = self.session.as_mut() {
            session.player.despawn(session.scene.world_mut());
            session.player = player;
            if session.mode == Mode::Play {
                let spawn = session.spawn_point();
                session.player.spawn(session.scene.world_mut(), spawn);
            }
        }
    }

    pub fn add_listener(&mut self, listener: Box<dyn GameplayListener>) {
        if let Some(session) = self.session.as_mut() {
            session.listeners.push(listener);
        }
    }

    pub fn enter_play(&mut self) {
        if let Some(session) = self.session.as_mut() {
            session.enter_play();
        }
    }

    pub fn enter_edit(&mut self) {
        if let Some(session) = self.session.as_mut() {
            session.enter_edit();
        }
    }

    pub fn mode(&self) -> Mode {
        self.session.as_ref().map(|s| s.mode).unwrap_or_default()
    }

    fn edit_session(&mut self) -> Option<(&mut Session, &BlockPool)> {
        match self.session.as_mut() {
            Some(session) if session.mode == Mode::Edit => Some((session, &self.block_pool)),
            _ => None,
        }
    }

    /// Place one block at an exact position. Fails silently (`None`) on collision.
    pub fn place(&mut self, block_type: BlockType, position: Vector3<f32>, options: PlaceOptions) -> Option<BlockId> {
        let (session, pool) = self.edit_session()?;
        session.placement.place(&mut session.scene, pool, block_type, position, options)
    }

    pub fn remove(&mut self, id: BlockId) -> bool {
        let Some((session, pool)) = self.edit_session() else {
            return false;
        };
        session.placement.remove(&mut session.scene, pool, id)
    }

    pub fn begin_preview(&mut self, block_type: BlockType) -> anyhow::Result<()> {
        let Some((session, _)) = self.edit_session() else {
            anyhow::bail!("block previews are only available in edit mode");
        };
        session.placement.begin_preview(block_type)?;
        if let Some(ray) = session.pointer_ray() {
            session.placement.update_preview(&ray, &mut session.scene);
        }
        Ok(())
    }

    pub fn begin_move(&mut self, id: BlockId) -> anyhow::Result<()> {
        let Some((session, _)) = self.edit_session() else {
            anyhow::bail!("blocks can only be moved in edit mode");
        };
        session.placement.begin_move(&mut session.scene, id)?;
        session.refresh_camera_input();
        Ok(())
    }

    pub fn cancel(&mut self, reason: CancelReason) {
        if let Some(session) = self.session.as_mut() {
            session.cancel(reason);
        }
    }

    /// Cursor moved to `(x, y)` in physical pixels.
    pub fn pointer_moved(&mut self, x: f64, y: f64) -> Option<Vector3<f32>> {
        let session = self.session.as_mut()?;
        session.cursor = Some((x, y));
        if session.mode != Mode::Edit {
            return None;
        }
        let ray = session.pointer_ray()?;
        session.placement.update_preview(&ray, &mut session.scene)
    }

    pub fn pointer_down(&mut self) -> Vec<BlockId> {
        let Some((session, pool)) = self.edit_session() else {
            return Vec::new();
        };
        let placed = session.placement.pointer_down(&mut session.scene, pool);
        session.refresh_camera_input();
        placed
    }

    pub fn pointer_up(&mut self) -> Vec<BlockId> {
        let Some((session, pool)) = self.edit_session() else {
            return Vec::new();
        };
        let placed = session.placement.pointer_up(&mut session.scene, pool);
        session.refresh_camera_input();
        placed
    }

    /// Select the block under `(x, y)`, or clear the selection.
    pub fn select_at(&mut self, x: f64, y: f64) -> Option<BlockId> {
        let (session, _) = self.edit_session()?;
        let ray = session.projection.screen_ray(&session.camera, x, y)?;
        let id = match session.placement.pick(&ray, &session.scene) {
            Some(hit) => match hit.target {
                PickTarget::Block(id) => Some(id),
                PickTarget::Terrain => None,
            },
            None => None,
        };
        session.scene.select(id);
        id
    }

    /// Apply a terrain brush at a world point.
    pub fn apply_terrain_brush(&mut self, point: Vector3<f32>, brush: &TerrainBrush) -> anyhow::Result<usize> {
        let Some((session, _)) = self.edit_session() else {
            anyhow::bail!("terrain can only be edited in edit mode");
        };
        session.terrain_editor.apply_brush(&mut session.scene, point, brush)
    }

    /// Apply a terrain brush where the cursor ray meets the terrain, at most once per throttle interval.
    pub fn sculpt_at_cursor(&mut self, now: Instant, brush: &TerrainBrush) -> anyhow::Result<Option<usize>> {
        let Some((session, _)) = self.edit_session() else {
            anyhow::bail!("terrain can only be edited in edit mode");
        };
        let Some(ray) = session.pointer_ray() else {
            return Ok(None);
        };
        let Some(hit) = session.scene.terrain().raycast(ray.origin, ray.direction, crate::pick::MAX_PICK_DISTANCE) else {
            return Ok(None);
        };
        session
            .terrain_editor
            .try_apply_throttled(now, &mut session.scene, hit.point, brush)
    }

    pub fn snapshot(&self) -> Option<SceneSnapshot> {
        self.session.as_ref().map(|s| s.scene.snapshot())
    }

    /// Replace the scene with a snapshot. Returns the number of blocks loaded.
    pub fn load(&mut self, snapshot: SceneSnapshot) -> anyhow::Result<usize> {
        let Some(session) = self.session.as_mut() else {
            anyhow::bail!("no session mounted");
        };
        session.enter_edit();
        session.cancel(CancelReason::ModeSwitch);
        session.scene.load(snapshot, &self.block_pool, &self.config.terrain)
    }

    pub fn capture_thumbnail(&mut self) -> anyhow::Result<image::RgbaImage> {
        let Some(session) = self.session.as_mut() else {
            anyhow::bail!("no session mounted");
        };
        session.surface.capture_thumbnail()
    }

    /// Route a window event to the active tool. Returns whether it was consumed.
    pub fn handle_window_event(&mut self, event: &WindowEvent) -> bool {
        let Some(session) = self.session.as_mut() else {
            return false;
        };
        match event {
            WindowEvent::KeyboardInput {
                event:
                    KeyEvent {
                        physical_key: PhysicalKey::Code(KeyCode::Escape),
                        state: ElementState::Pressed,
                        ..
                    },
                ..
            } => {
                match session.mode {
                    Mode::Play => session.enter_edit(),
                    Mode::Edit => session.cancel(CancelReason::Escape),
                }
                return true;
            }
            WindowEvent::CursorMoved { position, .. } => {
                self.pointer_moved(position.x, position.y);
                return false;
            }
            WindowEvent::CursorLeft { .. } if session.placement.is_dragging() => {
                session.cancel(CancelReason::PointerCaptureLost);
                return true;
            }
            WindowEvent::Focused(false) => {
                if session.placement.is_dragging() {
                    session.cancel(CancelReason::PointerCaptureLost);
                }
                session.controller.handle_window_events(event);
                return true;
            }
            WindowEvent::MouseInput {
                button: MouseButton::Right,
                state: ElementState::Pressed,
                ..
            } if session.placement.is_dragging() => {
                session.cancel(CancelReason::RightClick);
                return true;
            }
            WindowEvent::MouseInput {
                button: MouseButton::Left,
                state,
                ..
            } if session.mode == Mode::Edit => {
                if *state == ElementState::Pressed {
                    if session.placement.interaction().is_idle() {
                        if let Some((x, y)) = session.cursor {
                            self.select_at(x, y);
                        }
                    } else {
                        self.pointer_down();
                    }
                } else {
                    self.pointer_up();
                }
                return true;
            }
            _ => {}
        }

        match (session.mode, event) {
            (
                Mode::Play,
                WindowEvent::KeyboardInput {
                    event:
                        KeyEvent {
                            physical_key: PhysicalKey::Code(key),
                            state,
                            ..
                        },
                    ..
                },
            ) => session.player.process_keyboard(*key, *state),
            _ => session.controller.handle_window_events(event),
        }
    }

    /// Raw mouse motion, used for camera rotation.
    pub fn handle_mouse_motion(&mut self, dx: f64, dy: f64) {
        if let Some(session) = self.session.as_mut() {
            session.controller.handle_mouse(dx, dy);
        }
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            log::error!("Engine shutdown: {:#}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        render::HeadlessSurface,
        terrain_editor::TerrainMode,
    };

    fn mounted() -> Engine {
        let mut engine = Engine::new(EngineConfig::default());
        engine.set_target_fps(0.0);
        engine.mount(Box::new(HeadlessSurface::default()), 800, 600).unwrap();
        engine
    }

    #[test]
    fn mount_twice_is_an_error() {
        let mut engine = mounted();
        assert!(engine.mount(Box::new(HeadlessSurface::default()), 800, 600).is_err());
    }

    #[test]
    fn tick_uploads_terrain_once_and_renders() {
        let mut engine = mounted();
        let first = engine.tick(1.0 / 60.0).unwrap();
        assert!(first.rendered);
        assert_eq!(first.uploads, 1);
        let second = engine.tick(1.0 / 60.0).unwrap();
        assert_eq!(second.uploads, 0);
        assert_eq!(engine.frame_stats().renders, 2);
    }

    #[test]
    fn placing_marks_one_batch_and_flushes_it() {
        let mut engine = mounted();
        engine.tick(1.0 / 60.0);
        let a = engine.place(BlockType::Cube, Vector3::new(0.0, 0.5, 0.0), PlaceOptions::default());
        let b = engine.place(BlockType::Cube, Vector3::new(2.0, 0.5, 0.0), PlaceOptions::default());
        assert!(a.is_some() && b.is_some());
        assert!(engine.place(BlockType::Cube, Vector3::new(2.2, 0.5, 0.0), PlaceOptions::default()).is_none());
        let report = engine.tick(1.0 / 60.0).unwrap();
        assert_eq!(report.uploads, 1);
    }

    #[test]
    fn play_mode_spawns_player_above_start_block() {
        let mut engine = mounted();
        let start = engine
            .place(BlockType::Start, Vector3::new(4.0, 0.1, 4.0), PlaceOptions::default())
            .unwrap();
        engine.enter_play();
        let session = engine.session().unwrap();
        assert_eq!(session.mode(), Mode::Play);
        assert!(!session.controller().input_enabled());
        let player = session.player_position().unwrap();
        assert!((player.x - 4.0).abs() < 1e-4 && player.y > 0.1);
        assert!(engine.place(BlockType::Cube, Vector3::new(-4.0, 0.5, 0.0), PlaceOptions::default()).is_none());

        engine.enter_edit();
        let session = engine.session().unwrap();
        assert!(session.player_position().is_none());
        assert!(session.controller().input_enabled());
        assert!(session.scene().block(start).is_some());
    }

    #[test]
    fn contacts_reach_the_tracker_only_in_play_mode() {
        let mut engine = mounted();
        engine
            .place(BlockType::Checkpoint, Vector3::new(0.0, 0.1, 0.0), PlaceOptions::default())
            .unwrap();
        for _ in 0..120 {
            engine.tick(1.0 / 60.0);
        }
        assert_eq!(engine.session().unwrap().tracker().checkpoints(), 0);

        engine.enter_play();
        for _ in 0..120 {
            engine.tick(1.0 / 60.0);
        }
        assert_eq!(engine.session().unwrap().tracker().checkpoints(), 1);
    }

    #[test]
    fn terrain_edits_are_uploaded_next_frame() {
        let mut engine = mounted();
        engine.tick(1.0 / 60.0);
        let touched = engine
            .apply_terrain_brush(Vector3::new(0.0, 0.0, 0.0), &TerrainBrush::new(TerrainMode::Raise, 3.0, 1.0))
            .unwrap();
        assert!(touched > 0);
        assert_eq!(engine.tick(1.0 / 60.0).unwrap().uploads, 1);
    }

    #[test]
    fn unmount_returns_world_to_pool() {
        let mut engine = mounted();
        engine.place(BlockType::Crate, Vector3::new(0.0, 3.0, 0.0), PlaceOptions::default());
        engine.tick(1.0 / 60.0);
        engine.unmount().unwrap();
        assert!(!engine.is_mounted());
        assert_eq!(engine.world_pool().available(), 1);
        assert_eq!(engine.block_pool().available(BlockType::Crate), 1);

        engine.mount(Box::new(HeadlessSurface::default()), 800, 600).unwrap();
        assert_eq!(engine.world_pool().reused(), 1);
        let world = engine.session().unwrap().scene().world();
        assert_eq!(world.body_count(), 0);
    }

    #[test]
    fn failing_release_still_pools_the_world() {
        struct Stubborn(HeadlessSurface);
        impl crate::instancing::InstanceSink for Stubborn {
            fn upload_instances(&mut self, block_type: BlockType, instances: &[crate::data_structures::instance::InstanceRaw]) {
                self.0.upload_instances(block_type, instances);
            }
        }
        impl RenderSurface for Stubborn {
            fn is_visible(&self) -> bool {
                true
            }
            fn upload_terrain(&mut self, terrain: &Terrain) {
                self.0.upload_terrain(terrain);
            }
            fn upload_ghost(&mut self, ghost: Option<GhostDraw>) {
                self.0.upload_ghost(ghost);
            }
            fn upload_camera(&mut self, camera: &CameraUniform) {
                self.0.upload_camera(camera);
            }
            fn render(&mut self) -> anyhow::Result<()> {
                self.0.render()
            }
            fn release(&mut self) -> anyhow::Result<()> {
                anyhow::bail!("device lost")
            }
        }

        let mut engine = Engine::new(EngineConfig::default());
        engine.mount(Box::new(Stubborn(HeadlessSurface::default())), 320, 240).unwrap();
        engine.place(BlockType::Cube, Vector3::new(0.0, 0.5, 0.0), PlaceOptions::default());
        assert!(engine.unmount().is_err());
        assert_eq!(engine.world_pool().available(), 1);
        assert_eq!(engine.block_pool().available(BlockType::Cube), 1);
    }
}
