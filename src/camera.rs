//! Editor camera: orbit, free-fly and orthographic modes.
//!
//! The [`Camera`] only holds the pose (a [`CameraMode`]); the
//! [`CameraController`] accumulates input between frames and applies it in
//! [`CameraController::update`]. [`Projection`] turns the pose into clip
//! space and back, which is also how picking rays are built.

use std::f32::consts::FRAC_PI_2;

use cgmath::{InnerSpace, Matrix4, Point3, Rad, SquareMatrix, Vector3, Vector4, ortho, perspective};
use instant::Duration;
use wgpu::util::DeviceExt;
use winit::{
    event::{ElementState, KeyEvent, MouseButton, MouseScrollDelta, WindowEvent},
    keyboard::{KeyCode, PhysicalKey},
};

use crate::{culling::Frustum, pick::Ray};

#[rustfmt::skip]
pub const OPENGL_TO_WGPU_MATRIX: Matrix4<f32> = Matrix4::new(
    1.0, 0.0, 0.0, 0.0,
    0.0, 1.0, 0.0, 0.0,
    0.0, 0.0, 0.5, 0.0,
    0.0, 0.0, 0.5, 1.0,
);

const SAFE_FRAC_PI_2: f32 = FRAC_PI_2 - 0.01;
/// Orbit pitch stays above the ground plane.
const MIN_ORBIT_PITCH: f32 = 0.05;
pub const MIN_RADIUS: f32 = 2.0;
pub const MAX_RADIUS: f32 = 200.0;
pub const MIN_HALF_EXTENT: f32 = 2.0;
pub const MAX_HALF_EXTENT: f32 = 200.0;

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum CameraMode {
    /// Rotates around `target` at `radius`.
    Orbit {
        target: Point3<f32>,
        radius: f32,
        yaw: Rad<f32>,
        pitch: Rad<f32>,
    },
    /// First-person fly camera.
    Free {
        position: Point3<f32>,
        yaw: Rad<f32>,
        pitch: Rad<f32>,
    },
    /// Parallel projection looking at `target`; `half_extent` is half the visible height.
    Ortho {
        target: Point3<f32>,
        half_extent: f32,
        yaw: Rad<f32>,
        pitch: Rad<f32>,
    },
}

/// Distance of the ortho eye from its target. Only matters for depth range.
const ORTHO_DISTANCE: f32 = 250.0;

fn direction(yaw: Rad<f32>, pitch: Rad<f32>) -> Vector3<f32> {
    let (sin_pitch, cos_pitch) = pitch.0.sin_cos();
    let (sin_yaw, cos_yaw) = yaw.0.sin_cos();
    Vector3::new(cos_pitch * cos_yaw, sin_pitch, cos_pitch * sin_yaw).normalize()
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Camera {
    pub mode: CameraMode,
}

impl Camera {
    pub fn orbit<P: Into<Point3<f32>>, Y: Into<Rad<f32>>, Q: Into<Rad<f32>>>(target: P, radius: f32, yaw: Y, pitch: Q) -> Self {
        Self {
            mode: CameraMode::Orbit {
                target: target.into(),
                radius: radius.clamp(MIN_RADIUS, MAX_RADIUS),
                yaw: yaw.into(),
                pitch: pitch.into(),
            },
        }
    }

    pub fn free<P: Into<Point3<f32>>, Y: Into<Rad<f32>>, Q: Into<Rad<f32>>>(position: P, yaw: Y, pitch: Q) -> Self {
        Self {
            mode: CameraMode::Free {
                position: position.into(),
                yaw: yaw.into(),
                pitch: pitch.into(),
            },
        }
    }

    /// Eye position in world space.
    pub fn eye(&self) -> Point3<f32> {
        match self.mode {
            CameraMode::Orbit { target, radius, yaw, pitch } => target - direction(yaw, pitch) * radius,
            CameraMode::Free { position, .. } => position,
            CameraMode::Ortho { target, yaw, pitch, .. } => target - direction(yaw, pitch) * ORTHO_DISTANCE,
        }
    }

    /// Unit view direction.
    pub fn forward(&self) -> Vector3<f32> {
        match self.mode {
            CameraMode::Orbit { yaw, pitch, .. }
            | CameraMode::Free { yaw, pitch, .. }
            | CameraMode::Ortho { yaw, pitch, .. } => direction(yaw, pitch),
        }
    }

    pub fn calc_matrix(&self) -> Matrix4<f32> {
        Matrix4::look_to_rh(self.eye(), self.forward(), Vector3::unit_y())
    }

    /// Switch mode, keeping the point of interest where possible.
    pub fn switch_to(&mut self, mode: CameraModeKind) {
        let eye = self.eye();
        let forward = self.forward();
        let (yaw, pitch) = match self.mode {
            CameraMode::Orbit { yaw, pitch, .. }
            | CameraMode::Free { yaw, pitch, .. }
            | CameraMode::Ortho { yaw, pitch, .. } => (yaw, pitch),
        };
        let focus = match self.mode {
            CameraMode::Orbit { target, .. } | CameraMode::Ortho { target, .. } => target,
            CameraMode::Free { position, .. } => position + forward * 10.0,
        };
        self.mode = match mode {
            CameraModeKind::Orbit => CameraMode::Orbit {
                target: focus,
                radius: (focus - eye).magnitude().clamp(MIN_RADIUS, MAX_RADIUS),
                yaw,
                pitch: Rad(pitch.0.clamp(-SAFE_FRAC_PI_2, -MIN_ORBIT_PITCH)),
            },
            CameraModeKind::Free => CameraMode::Free { position: eye, yaw, pitch },
            CameraModeKind::Ortho => CameraMode::Ortho {
                target: focus,
                half_extent: 20.0,
                yaw,
                pitch,
            },
        };
    }
}

/// Mode selector without state, for UI toggles.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CameraModeKind {
    Orbit,
    Free,
    Ortho,
}

#[derive(Clone, Debug)]
pub struct Projection {
    width: u32,
    height: u32,
    fovy: Rad<f32>,
    znear: f32,
    zfar: f32,
}

impl Projection {
    pub fn new<F: Into<Rad<f32>>>(width: u32, height: u32, fovy: F, znear: f32, zfar: f32) -> Self {
        Self {
            width: width.max(1),
            height: height.max(1),
            fovy: fovy.into(),
            znear,
            zfar,
        }
    }

    pub fn resize(&mut self, width: u32, height: u32) {
        self.width = width.max(1);
        self.height = height.max(1);
    }

    pub fn aspect(&self) -> f32 {
        self.width as f32 / self.height as f32
    }

    pub fn zfar(&self) -> f32 {
        self.zfar
    }

    pub fn calc_matrix(&self, camera: &Camera) -> Matrix4<f32> {
        let aspect = self.aspect();
        let proj = match camera.mode {
            CameraMode::Ortho { half_extent, .. } => ortho(
                -half_extent * aspect,
                half_extent * aspect,
                -half_extent,
                half_extent,
                self.znear,
                ORTHO_DISTANCE * 2.0,
            ),
            _ => perspective(self.fovy, aspect, self.znear, self.zfar),
        };
        OPENGL_TO_WGPU_MATRIX * proj
    }

    pub fn view_proj(&self, camera: &Camera) -> Matrix4<f32> {
        self.calc_matrix(camera) * camera.calc_matrix()
    }

    pub fn frustum(&self, camera: &Camera) -> Frustum {
        Frustum::from_view_proj(&self.view_proj(camera))
    }

    /// Picking ray through a pixel (origin at the top-left corner).
    pub fn screen_ray(&self, camera: &Camera, x: f64, y: f64) -> Option<Ray> {
        let ndc_x = (2.0 * x / self.width as f64 - 1.0) as f32;
        let ndc_y = (1.0 - 2.0 * y / self.height as f64) as f32;
        let inverse = self.view_proj(camera).invert()?;
        let unproject = |z: f32| {
            let p = inverse * Vector4::new(ndc_x, ndc_y, z, 1.0);
            p.truncate() / p.w
        };
        // wgpu clip space depth runs from 0 (near) to 1 (far).
        let near = unproject(0.0);
        let far = unproject(1.0);
        let dir = far - near;
        if dir.magnitude2() <= f32::EPSILON {
            return None;
        }
        Some(Ray::new(near, dir))
    }
}

/// Movement keys currently held.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
struct HeldKeys {
    forward: bool,
    backward: bool,
    left: bool,
    right: bool,
    up: bool,
    down: bool,
}

impl HeldKeys {
    fn any(&self) -> bool {
        self.forward || self.backward || self.left || self.right || self.up || self.down
    }

    fn axis(positive: bool, negative: bool) -> f32 {
        positive as i32 as f32 - negative as i32 as f32
    }
}

#[derive(Debug)]
pub struct CameraController {
    keys: HeldKeys,
    rotate_horizontal: f32,
    rotate_vertical: f32,
    scroll: f32,
    /// Right mouse button held: mouse motion rotates (or pans in ortho mode).
    rotating: bool,
    input_enabled: bool,
    speed: f32,
    sensitivity: f32,
}

impl CameraController {
    pub fn new(speed: f32, sensitivity: f32) -> Self {
        Self {
            keys: HeldKeys::default(),
            rotate_horizontal: 0.0,
            rotate_vertical: 0.0,
            scroll: 0.0,
            rotating: false,
            input_enabled: true,
            speed,
            sensitivity,
        }
    }

    /// Disable input, e.g. while a block is dragged or the play camera is active.
    pub fn set_input_enabled(&mut self, enabled: bool) {
        if !enabled {
            self.cancel_movement();
        }
        self.input_enabled = enabled;
    }

    pub fn input_enabled(&self) -> bool {
        self.input_enabled
    }

    /// Whether a held key needs a redraw every frame.
    pub fn is_moving(&self) -> bool {
        self.keys.any()
    }

    /// Forget held keys and pending deltas, e.g. on focus loss.
    pub fn cancel_movement(&mut self) {
        self.keys = HeldKeys::default();
        self.rotate_horizontal = 0.0;
        self.rotate_vertical = 0.0;
        self.scroll = 0.0;
        self.rotating = false;
    }

    /// Returns whether the key was a camera key.
    pub fn process_keyboard(&mut self, key: KeyCode, state: ElementState) -> bool {
        if !self.input_enabled {
            return false;
        }
        let pressed = state == ElementState::Pressed;
        let slot = match key {
            KeyCode::KeyW | KeyCode::ArrowUp => &mut self.keys.forward,
            KeyCode::KeyS | KeyCode::ArrowDown => &mut self.keys.backward,
            KeyCode::KeyA | KeyCode::ArrowLeft => &mut self.keys.left,
            KeyCode::KeyD | KeyCode::ArrowRight => &mut self.keys.right,
            KeyCode::Space => &mut self.keys.up,
            KeyCode::ShiftLeft | KeyCode::ShiftRight => &mut self.keys.down,
            _ => return false,
        };
        *slot = pressed;
        true
    }

    pub fn handle_mouse(&mut self, dx: f64, dy: f64) {
        if self.input_enabled && self.rotating {
            self.rotate_horizontal += dx as f32;
            self.rotate_vertical += dy as f32;
        }
    }

    pub fn handle_scroll(&mut self, delta: f32) {
        if self.input_enabled {
            self.scroll += delta;
        }
    }

    pub fn handle_window_events(&mut self, event: &WindowEvent) -> bool {
        match event {
            WindowEvent::KeyboardInput {
                event:
                    KeyEvent {
                        physical_key: PhysicalKey::Code(key),
                        state,
                        ..
                    },
                ..
            } => self.process_keyboard(*key, *state),
            WindowEvent::MouseWheel { delta, .. } => {
                let amount = match delta {
                    MouseScrollDelta::LineDelta(_, y) => *y,
                    MouseScrollDelta::PixelDelta(pos) => pos.y as f32 / 20.0,
                };
                self.handle_scroll(amount);
                true
            }
            WindowEvent::MouseInput {
                button: MouseButton::Right,
                state,
                ..
            } => {
                self.rotating = *state == ElementState::Pressed && self.input_enabled;
                true
            }
            WindowEvent::Focused(false) => {
                self.cancel_movement();
                true
            }
            _ => false,
        }
    }

    /// Apply accumulated input to the camera.
    pub fn update(&mut self, camera: &mut Camera, dt: Duration) {
        let dt = dt.as_secs_f32();
        let rotate_h = std::mem::take(&mut self.rotate_horizontal) * self.sensitivity * dt;
        let rotate_v = std::mem::take(&mut self.rotate_vertical) * self.sensitivity * dt;
        let scroll = std::mem::take(&mut self.scroll);
        let forward_amount = HeldKeys::axis(self.keys.forward, self.keys.backward);
        let right_amount = HeldKeys::axis(self.keys.right, self.keys.left);
        let up_amount = HeldKeys::axis(self.keys.up, self.keys.down);

        match &mut camera.mode {
            CameraMode::Orbit { target, radius, yaw, pitch } => {
                *yaw += Rad(rotate_h);
                *pitch = Rad((pitch.0 - rotate_v).clamp(-SAFE_FRAC_PI_2, -MIN_ORBIT_PITCH));
                *radius = (*radius * (1.0 - scroll * 0.1)).clamp(MIN_RADIUS, MAX_RADIUS);
                let (planar_forward, planar_right) = planar_axes(*yaw);
                *target += (planar_forward * forward_amount + planar_right * right_amount) * self.speed * dt;
            }
            CameraMode::Free { position, yaw, pitch } => {
                *yaw += Rad(rotate_h);
                *pitch = Rad((pitch.0 - rotate_v).clamp(-SAFE_FRAC_PI_2, SAFE_FRAC_PI_2));
                let (planar_forward, planar_right) = planar_axes(*yaw);
                *position += (planar_forward * forward_amount + planar_right * right_amount) * self.speed * dt;
                position.y += up_amount * self.speed * dt;
                *position += direction(*yaw, *pitch) * scroll * self.speed * 0.1;
            }
            CameraMode::Ortho { target, half_extent, yaw, .. } => {
                let (planar_forward, planar_right) = planar_axes(*yaw);
                let pan = *half_extent * 0.05;
                *target += planar_right * (-rotate_h * pan) + planar_forward * (rotate_v * pan);
                *target += (planar_forward * forward_amount + planar_right * right_amount) * self.speed * dt;
                *half_extent = (*half_extent * (1.0 - scroll * 0.1)).clamp(MIN_HALF_EXTENT, MAX_HALF_EXTENT);
            }
        }
    }
}

fn planar_axes(yaw: Rad<f32>) -> (Vector3<f32>, Vector3<f32>) {
    let (sin, cos) = yaw.0.sin_cos();
    (Vector3::new(cos, 0.0, sin), Vector3::new(-sin, 0.0, cos))
}

#[repr(C)]
#[derive(Debug, Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
pub struct CameraUniform {
    view_position: [f32; 4],
    view_proj: [[f32; 4]; 4],
}

impl CameraUniform {
    pub fn new() -> Self {
        Self {
            view_position: [0.0; 4],
            view_proj: Matrix4::identity().into(),
        }
    }

    pub fn update_view_proj(&mut self, camera: &Camera, projection: &Projection) {
        self.view_position = camera.eye().to_homogeneous().into();
        self.view_proj = projection.view_proj(camera).into();
    }
}

impl Default for CameraUniform {
    fn default() -> Self {
        Self::new()
    }
}

/// GPU side of the camera: the uniform buffer and its bind group.
#[derive(Debug)]
pub struct CameraResources {
    pub uniform: CameraUniform,
    pub buffer: wgpu::Buffer,
    pub bind_group: wgpu::BindGroup,
    pub bind_group_layout: wgpu::BindGroupLayout,
}

impl CameraResources {
    pub fn new(device: &wgpu::Device) -> Self {
        let uniform = CameraUniform::new();
        let buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Camera Buffer"),
            contents: bytemuck::cast_slice(&[uniform]),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });
        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            }],
            label: Some("camera_bind_group_layout"),
        });
        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            layout: &bind_group_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: buffer.as_entire_binding(),
            }],
            label: Some("camera_bind_group"),
        });
        Self {
            uniform,
            buffer,
            bind_group,
            bind_group_layout,
        }
    }

    pub fn update(&mut self, queue: &wgpu::Queue, uniform: &CameraUniform) {
        self.uniform = *uniform;
        queue.write_buffer(&self.buffer, 0, bytemuck::cast_slice(&[self.uniform]));
    }
}
