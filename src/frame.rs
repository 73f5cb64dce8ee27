//! The per-frame driver.
//!
//! [`FrameLoop::tick`] runs the stages of one frame in a fixed order against a
//! [`FrameStages`] implementation:
//!
//! 1. step physics by `fixed_dt * time_scale`; a failed step is logged and skipped
//! 2. drain collision starts, dispatching them only in play mode
//! 3. update the player (play mode)
//! 4. throttle to the target frame rate
//! 5. copy simulated poses onto visuals, then cull
//! 6. flush dirty instance batches and terrain
//! 7. render
//!
//! While the surface is hidden only the simulation is paused: the accumulator
//! is reset so the world does not fast-forward when it becomes visible again.

use crate::config::{FrameConfig, PhysicsConfig};

/// What the frame loop drives. Implemented by the engine session.
pub trait FrameStages {
    fn is_visible(&self) -> bool;

    fn is_playing(&self) -> bool;

    fn step_physics(&mut self, fixed_dt: f32, elapsed: f32, max_sub_steps: u32) -> anyhow::Result<u32>;

    fn reset_accumulator(&mut self);

    /// Drain collision starts; deliver them to gameplay only if `dispatch`.
    /// Returns the number of contact events delivered.
    fn dispatch_contacts(&mut self, dispatch: bool) -> usize;

    fn update_player(&mut self, dt: f32);

    /// Returns `(moved, culled)` block counts.
    fn sync_and_cull(&mut self) -> (usize, usize);

    /// Upload dirty data. Returns the number of batches uploaded.
    fn flush(&mut self) -> usize;

    fn render(&mut self) -> anyhow::Result<()>;
}

/// Outcome of one tick.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TickReport {
    pub sub_steps: u32,
    pub physics_error: bool,
    pub contacts: usize,
    pub hidden: bool,
    /// Rendering was skipped by the frame rate cap.
    pub throttled: bool,
    pub moved: usize,
    pub culled: usize,
    pub uploads: usize,
    pub rendered: bool,
}

/// Counters over the lifetime of a frame loop.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FrameStats {
    pub ticks: u64,
    pub renders: u64,
    pub physics_errors: u64,
    pub render_errors: u64,
    pub hidden_ticks: u64,
}

#[derive(Debug)]
pub struct FrameLoop {
    physics: PhysicsConfig,
    min_frame_time: f32,
    since_render: f32,
    stats: FrameStats,
}

impl FrameLoop {
    pub fn new(physics: PhysicsConfig, frame: &FrameConfig) -> Self {
        let mut frame_loop = Self {
            physics,
            min_frame_time: 0.0,
            since_render: 0.0,
            stats: FrameStats::default(),
        };
        frame_loop.set_target_fps(frame.target_fps);
        frame_loop
    }

    /// Cap rendering at `fps` frames per second. Zero or less renders every tick.
    pub fn set_target_fps(&mut self, fps: f32) {
        self.min_frame_time = if fps > 0.0 && fps.is_finite() { 1.0 / fps } else { 0.0 };
    }

    pub fn set_time_scale(&mut self, time_scale: f32) {
        self.physics.time_scale = time_scale.max(0.0);
    }

    pub fn stats(&self) -> FrameStats {
        self.stats
    }

    /// Run one frame. `dt` is the wall-clock time since the previous tick in seconds.
    pub fn tick(&mut self, dt: f32, stages: &mut dyn FrameStages) -> TickReport {
        let mut report = TickReport::default();
        self.stats.ticks += 1;
        let dt = if dt.is_finite() { dt.max(0.0) } else { 0.0 };

        if !stages.is_visible() {
            stages.reset_accumulator();
            stages.dispatch_contacts(false);
            self.since_render = 0.0;
            self.stats.hidden_ticks += 1;
            report.hidden = true;
            return report;
        }

        let scale = self.physics.time_scale;
        if scale > 0.0 {
            match stages.step_physics(self.physics.fixed_dt * scale, dt * scale, self.physics.max_sub_steps) {
                Ok(steps) => report.sub_steps = steps,
                Err(e) => {
                    log::warn!("Physics step failed, skipping: {:#}", e);
                    self.stats.physics_errors += 1;
                    report.physics_error = true;
                }
            }
        }

        let playing = stages.is_playing();
        report.contacts = stages.dispatch_contacts(playing);
        if playing {
            stages.update_player(dt);
        }

        self.since_render += dt;
        if self.since_render + 1e-4 < self.min_frame_time {
            report.throttled = true;
            return report;
        }
        self.since_render = 0.0;

        let (moved, culled) = stages.sync_and_cull();
        report.moved = moved;
        report.culled = culled;
        report.uploads = stages.flush();
        match stages.render() {
            Ok(()) => {
                self.stats.renders += 1;
                report.rendered = true;
            }
            Err(e) => {
                log::error!("Render failed: {:#}", e);
                self.stats.render_errors += 1;
            }
        }
        report
    }
}
