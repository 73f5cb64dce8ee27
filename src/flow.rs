//! Application event loop.
//!
//! [`run`] opens a window, creates the GPU [`Context`] and mounts it on an
//! [`Engine`]. From then on winit drives everything:
//!
//! 1. window and device events are routed to the engine (tools, camera, player)
//! 2. every `RedrawRequested` runs one [`Engine::tick`] with the wall-clock delta
//! 3. closing the window tears the session down before the loop exits
//!
//! Host-level shortcuts: `Tab` toggles play/edit mode and `C` cycles the
//! camera between orbit, free and orthographic.

use std::{fmt::Debug, sync::Arc};

use instant::Instant;
use winit::{
    application::ApplicationHandler,
    event::{DeviceEvent, DeviceId, ElementState, KeyEvent, WindowEvent},
    event_loop::{ActiveEventLoop, EventLoop},
    keyboard::{KeyCode, PhysicalKey},
    window::Window,
};

use crate::{
    camera::{CameraMode, CameraModeKind},
    config::EngineConfig,
    context::Context,
    engine::{Engine, Mode},
};

/// Called once the session is mounted, e.g. to load a scene or register listeners.
pub type Setup = Box<dyn FnOnce(&mut Engine)>;

pub(crate) enum FlowEvent {
    #[allow(dead_code)]
    Initialized(Context),
    #[allow(dead_code)]
    Failed(String),
}

impl Debug for FlowEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Initialized(_) => f.write_str("Initialized"),
            Self::Failed(e) => f.debug_tuple("Failed").field(e).finish(),
        }
    }
}

pub(crate) struct App {
    #[cfg(not(target_arch = "wasm32"))]
    async_runtime: tokio::runtime::Runtime,
    #[allow(dead_code)]
    proxy: winit::event_loop::EventLoopProxy<FlowEvent>,
    engine: Engine,
    window: Option<Arc<Window>>,
    setup: Option<Setup>,
    last_time: Instant,
}

impl App {
    fn new(event_loop: &EventLoop<FlowEvent>, config: EngineConfig, setup: Setup) -> anyhow::Result<Self> {
        let proxy = event_loop.create_proxy();
        #[cfg(not(target_arch = "wasm32"))]
        let async_runtime = tokio::runtime::Runtime::new()?;
        Ok(Self {
            #[cfg(not(target_arch = "wasm32"))]
            async_runtime,
            proxy,
            engine: Engine::new(config),
            window: None,
            setup: Some(setup),
            last_time: Instant::now(),
        })
    }

    fn mount(&mut self, event_loop: &ActiveEventLoop, ctx: Context) {
        let window = ctx.window().clone();
        let size = window.inner_size();
        if let Err(e) = self.engine.mount(Box::new(ctx), size.width, size.height) {
            log::error!("Cannot mount the session: {:#}", e);
            event_loop.exit();
            return;
        }
        if let Some(setup) = self.setup.take() {
            setup(&mut self.engine);
        }
        self.last_time = Instant::now();
        window.request_redraw();
        self.window = Some(window);
    }

    fn handle_shortcut(&mut self, key: KeyCode) -> bool {
        match key {
            KeyCode::Tab => {
                match self.engine.mode() {
                    Mode::Edit => self.engine.enter_play(),
                    Mode::Play => self.engine.enter_edit(),
                }
                true
            }
            KeyCode::KeyC if self.engine.mode() == Mode::Edit => {
                let next = match self.engine.session().map(|s| s.camera().mode) {
                    Some(CameraMode::Orbit { .. }) => CameraModeKind::Free,
                    Some(CameraMode::Free { .. }) => CameraModeKind::Ortho,
                    _ => CameraModeKind::Orbit,
                };
                self.engine.set_camera_mode(next);
                true
            }
            _ => false,
        }
    }

    fn shutdown(&mut self) {
        if let Err(e) = self.engine.shutdown() {
            log::error!("Shutdown: {:#}", e);
        }
    }
}

impl ApplicationHandler<FlowEvent> for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() || self.engine.is_mounted() {
            return;
        }

        #[allow(unused_mut)]
        let mut window_attributes = Window::default_attributes().with_title("blockyard");

        #[cfg(target_arch = "wasm32")]
        {
            use wasm_bindgen::JsCast;
            use winit::platform::web::WindowAttributesExtWebSys;

            const CANVAS_ID: &str = "canvas";

            let canvas = wgpu::web_sys::window()
                .and_then(|window| window.document())
                .and_then(|document| document.get_element_by_id(CANVAS_ID));
            match canvas {
                Some(canvas) => window_attributes = window_attributes.with_canvas(Some(canvas.unchecked_into())),
                None => log::warn!("No element with id '{}', letting winit create a canvas", CANVAS_ID),
            }
        }

        let window = match event_loop.create_window(window_attributes) {
            Ok(window) => Arc::new(window),
            Err(e) => {
                log::error!("Cannot create a window: {}", e);
                event_loop.exit();
                return;
            }
        };

        #[cfg(not(target_arch = "wasm32"))]
        {
            match self.async_runtime.block_on(Context::new(window)) {
                Ok(ctx) => self.mount(event_loop, ctx),
                Err(e) => {
                    log::error!("App initialization failed. Cannot create the GPU context: {:#}", e);
                    event_loop.exit();
                }
            }
        }

        #[cfg(target_arch = "wasm32")]
        {
            let proxy = self.proxy.clone();
            wasm_bindgen_futures::spawn_local(async move {
                let event = match Context::new(window).await {
                    Ok(ctx) => FlowEvent::Initialized(ctx),
                    Err(e) => FlowEvent::Failed(format!("{:#}", e)),
                };
                if proxy.send_event(event).is_err() {
                    log::error!("Event loop closed before the GPU context was ready");
                }
            });
        }
    }

    fn user_event(&mut self, event_loop: &ActiveEventLoop, event: FlowEvent) {
        match event {
            // This is the message from our wasm `spawn_local`
            FlowEvent::Initialized(ctx) => self.mount(event_loop, ctx),
            FlowEvent::Failed(e) => {
                log::error!("App initialization failed. Cannot create the GPU context: {}", e);
                event_loop.exit();
            }
        }
    }

    fn device_event(&mut self, _event_loop: &ActiveEventLoop, _device_id: DeviceId, event: DeviceEvent) {
        if let DeviceEvent::MouseMotion { delta: (dx, dy) } = event {
            let speed_factor = 5.0;
            self.engine.handle_mouse_motion(dx * speed_factor, dy * speed_factor);
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _window_id: winit::window::WindowId, event: WindowEvent) {
        if !self.engine.is_mounted() {
            if let WindowEvent::CloseRequested = event {
                event_loop.exit();
            }
            return;
        }

        if let WindowEvent::KeyboardInput {
            event:
                KeyEvent {
                    physical_key: PhysicalKey::Code(key),
                    state: ElementState::Pressed,
                    repeat: false,
                    ..
                },
            ..
        } = event
        {
            if self.handle_shortcut(key) {
                return;
            }
        }

        self.engine.handle_window_event(&event);

        match event {
            WindowEvent::CloseRequested => {
                self.shutdown();
                event_loop.exit();
            }
            WindowEvent::Resized(size) => self.engine.resize(size.width, size.height),
            WindowEvent::RedrawRequested => {
                let dt = self.last_time.elapsed();
                self.last_time = Instant::now();
                self.engine.tick(dt.as_secs_f32());
                if let Some(window) = &self.window {
                    window.request_redraw();
                }
            }
            _ => {}
        }
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        self.shutdown();
    }
}

/// Open a window and run the editor until it is closed.
pub fn run(config: EngineConfig, setup: Setup) -> anyhow::Result<()> {
    #[cfg(not(target_arch = "wasm32"))]
    {
        if let Err(e) = env_logger::try_init() {
            println!("Warning: Could not initialize logger: {}", e);
        };
    }

    #[cfg(target_arch = "wasm32")]
    {
        use wasm_bindgen::UnwrapThrowExt;
        console_log::init_with_level(log::Level::Info).unwrap_throw();
    }

    let event_loop: EventLoop<FlowEvent> = EventLoop::with_user_event().build()?;
    let mut app = App::new(&event_loop, config, setup)?;
    event_loop.run_app(&mut app)?;
    Ok(())
}
