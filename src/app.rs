// ============================================================================
// app.rs — Linestream
// Application state and winit event-loop handler: surface setup, keyboard
// commands, and the per-frame driver / HUD / screenshot sequence.
// ============================================================================

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use winit::{
    application::ApplicationHandler,
    event::{MouseScrollDelta, WindowEvent},
    keyboard::ModifiersState,
    window::{Window, WindowAttributes},
};

use crate::camera::OrbitCamera;
use crate::capture::{save_png, screenshot_path, PendingCapture};
use crate::config::{RunMode, RunParams, StreamConfig};
use crate::driver::FrameDriver;
use crate::error::StreamError;
use crate::gpu::WgpuDevice;
use crate::headless::request_device;
use crate::input::{command_for, Command, KeysHeld};
use crate::kernel::FrameClock;
use crate::renderer::{HudRenderer, HudStats};

// ======================== Application ========================

pub struct App {
    state: Option<AppState>,
    stream: StreamConfig,
    screenshot_dir: PathBuf,
    error: Option<StreamError>,
}

struct AppState {
    // GPU
    gpu: WgpuDevice,
    surface: wgpu::Surface<'static>,
    surface_config: wgpu::SurfaceConfiguration,

    // Stream
    driver: FrameDriver<WgpuDevice>,
    params: RunParams,

    // Window
    window: Arc<Window>,

    // Camera & Input
    camera: OrbitCamera,
    keys: KeysHeld,
    modifiers: ModifiersState,

    hud: HudRenderer,
    screenshot_requested: bool,

    // Timing
    started: Instant,
    last_redraw: Instant,
    fps: f32,
}

impl App {
    pub fn new(stream: StreamConfig, screenshot_dir: PathBuf) -> Self {
        Self {
            state: None,
            stream,
            screenshot_dir,
            error: None,
        }
    }

    /// Fatal setup error, if the window could not be brought up.
    pub fn take_error(&mut self) -> Option<StreamError> {
        self.error.take()
    }

    fn init(&self, event_loop: &winit::event_loop::ActiveEventLoop) -> Result<AppState, StreamError> {
        let window_attrs = WindowAttributes::default()
            .with_title("Linestream")
            .with_inner_size(winit::dpi::LogicalSize::new(1280u32, 800u32));
        let window = Arc::new(event_loop.create_window(window_attrs)?);

        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });
        let surface = instance.create_surface(window.clone())?;

        let (adapter, device, queue) =
            pollster::block_on(request_device("linestream_device", Some(&surface), &instance))?;
        let surface_config = surface_config(&surface, &adapter, &window);
        surface.configure(&device, &surface_config);

        let hud = HudRenderer::new(&device, &queue, surface_config.format);
        let gpu = WgpuDevice::new(device, queue, surface_config.format);
        let driver = FrameDriver::new(self.stream.clone());

        log::info!(
            "Linestream initialized: {} particles in {}x{} cells, {} tiles of {} rows",
            driver.config().particle_limit(),
            driver.layout().buffer_width,
            driver.layout().buffer_height,
            driver.layout().num_tiles,
            driver.layout().rows_per_tile
        );

        Ok(AppState {
            gpu,
            surface,
            surface_config,
            camera: OrbitCamera::looking_at(self.stream.emitter_position),
            driver,
            params: RunParams::default(),
            window,
            keys: KeysHeld::default(),
            modifiers: ModifiersState::empty(),
            hud,
            screenshot_requested: false,
            started: Instant::now(),
            last_redraw: Instant::now(),
            fps: 0.0,
        })
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &winit::event_loop::ActiveEventLoop) {
        if self.state.is_some() {
            return;
        }
        match self.init(event_loop) {
            Ok(state) => {
                // Initial redraw: macOS with winit 0.30 waits for one
                state.window.request_redraw();
                self.state = Some(state);
            }
            Err(err) => {
                log::error!("Startup failed: {}", err);
                self.error = Some(err);
                event_loop.exit();
            }
        }
    }

    fn about_to_wait(&mut self, _event_loop: &winit::event_loop::ActiveEventLoop) {
        if let Some(state) = &self.state {
            state.window.request_redraw();
        }
    }

    fn window_event(
        &mut self,
        event_loop: &winit::event_loop::ActiveEventLoop,
        _window_id: winit::window::WindowId,
        event: WindowEvent,
    ) {
        let Some(state) = &mut self.state else {
            return;
        };

        match event {
            WindowEvent::CloseRequested => event_loop.exit(),

            WindowEvent::ModifiersChanged(modifiers) => {
                state.modifiers = modifiers.state();
            }

            WindowEvent::KeyboardInput { event, .. } => {
                let pressed = event.state.is_pressed();
                if state.keys.track(&event.logical_key, pressed) || !pressed || event.repeat {
                    return;
                }
                if let Some(command) = command_for(&event.logical_key, state.modifiers.shift_key()) {
                    apply_command(state, event_loop, command);
                }
            }

            WindowEvent::MouseWheel { delta, .. } => {
                let scroll = match &delta {
                    MouseScrollDelta::LineDelta(_, y) => *y,
                    MouseScrollDelta::PixelDelta(pos) => pos.y as f32 * 0.01,
                };
                state.camera.apply_scroll(scroll);
            }

            WindowEvent::Resized(new_size) => {
                if new_size.width > 0 && new_size.height > 0 {
                    state.surface_config.width = new_size.width;
                    state.surface_config.height = new_size.height;
                    state.surface.configure(state.gpu.device(), &state.surface_config);
                }
            }

            WindowEvent::RedrawRequested => {
                redraw(state, &self.screenshot_dir);
            }

            _ => {}
        }
    }

    fn exiting(&mut self, _event_loop: &winit::event_loop::ActiveEventLoop) {
        if let Some(state) = &mut self.state {
            state.driver.release(&mut state.gpu);
            state.gpu.device().poll(wgpu::Maintain::Wait);
            log::info!("Stream released after {} frames", state.driver.frames());
        }
    }
}

// ======================== Surface ========================

fn surface_config(
    surface: &wgpu::Surface<'_>,
    adapter: &wgpu::Adapter,
    window: &Window,
) -> wgpu::SurfaceConfiguration {
    let size = window.inner_size();
    let surface_caps = surface.get_capabilities(adapter);
    let surface_format = surface_caps
        .formats
        .iter()
        .find(|f| f.is_srgb())
        .or(surface_caps.formats.first())
        .copied()
        .unwrap_or(wgpu::TextureFormat::Bgra8UnormSrgb);

    // Use Mailbox (uncapped FPS, no tearing) if available, else Fifo.
    let present_mode = if surface_caps.present_modes.contains(&wgpu::PresentMode::Mailbox) {
        log::info!("Present mode: Mailbox (uncapped FPS)");
        wgpu::PresentMode::Mailbox
    } else {
        log::info!("Present mode: Fifo (VSync ON)");
        wgpu::PresentMode::Fifo
    };

    wgpu::SurfaceConfiguration {
        usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
        format: surface_format,
        width: size.width.max(1),
        height: size.height.max(1),
        present_mode,
        alpha_mode: surface_caps
            .alpha_modes
            .first()
            .copied()
            .unwrap_or(wgpu::CompositeAlphaMode::Auto),
        view_formats: vec![],
        desired_maximum_frame_latency: 2,
    }
}

// ======================== Keyboard Commands ========================

fn apply_command(
    state: &mut AppState,
    event_loop: &winit::event_loop::ActiveEventLoop,
    command: Command,
) {
    match command {
        Command::Quit => event_loop.exit(),
        Command::TogglePlay => {
            state.params.mode = match state.params.mode {
                RunMode::Playing => RunMode::Preview,
                RunMode::Preview => RunMode::Playing,
            };
            log::info!("Run mode: {}", state.params.mode.name());
        }
        Command::Reset => {
            state.driver.request_reset();
            log::info!("Reset requested");
        }
        Command::Reseed => {
            let mut config = state.driver.config().clone();
            config.random_seed = rand::random();
            log::info!("Reseeded with {}", config.random_seed);
            state.driver.apply_config(config);
            state.driver.request_reset();
        }
        Command::ToggleDebug => {
            let debug = !state.driver.config().debug;
            state.driver.set_debug(debug);
            log::info!("Debug overlay: {}", if debug { "ON" } else { "OFF" });
        }
        Command::ToggleHud => state.params.show_hud = !state.params.show_hud,
        Command::Screenshot => state.screenshot_requested = true,
    }
}

// ======================== Frame Rendering ========================

fn redraw(state: &mut AppState, screenshot_dir: &std::path::Path) {
    // FPS (exponential moving average)
    let now = Instant::now();
    let dt = now.duration_since(state.last_redraw).as_secs_f32();
    state.last_redraw = now;
    if dt > 0.0 {
        state.fps = state.fps * 0.95 + (1.0 / dt) * 0.05;
    }

    // Camera movement from held keys
    state
        .camera
        .apply_orbit(state.keys.w, state.keys.s, state.keys.a, state.keys.d, dt.min(0.1));
    state.camera.apply_zoom_keys(state.keys.e, state.keys.q);

    let output = match state.surface.get_current_texture() {
        Ok(t) => t,
        Err(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) => {
            state.surface.configure(state.gpu.device(), &state.surface_config);
            return;
        }
        Err(e) => {
            log::error!("Surface error: {:?}", e);
            return;
        }
    };

    let win_w = state.surface_config.width;
    let win_h = state.surface_config.height;
    let elapsed = state.started.elapsed().as_secs_f32();
    let clock = match state.params.mode {
        RunMode::Playing => FrameClock::playing(dt, elapsed),
        RunMode::Preview => FrameClock::preview(elapsed),
    };

    // ---- Stream frame ----
    state
        .gpu
        .set_view_proj(state.camera.view_proj(win_w as f32 / win_h as f32));
    state.gpu.begin_frame(
        output.texture.create_view(&wgpu::TextureViewDescriptor::default()),
        win_w,
        win_h,
    );
    if let Err(err) = state.driver.frame(&mut state.gpu, &clock) {
        log::error!("Frame skipped: {}", err);
    }
    let mut commands: Vec<wgpu::CommandBuffer> = state.gpu.end_frame().into_iter().collect();

    // ---- HUD overlay + screenshot copy (separate encoder) ----
    let mut encoder = state
        .gpu
        .device()
        .create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("overlay_encoder"),
        });

    if state.params.show_hud {
        let stats = HudStats {
            frame: state.driver.frames(),
            fps: state.fps,
            particle_limit: state.driver.config().particle_limit(),
            layout: state.driver.layout(),
            mode: state.params.mode,
            state: state.driver.state(),
            debug: state.driver.config().debug,
            seed: state.driver.config().random_seed,
        };
        let view = output
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());
        let drawn = state
            .hud
            .prepare(state.gpu.device(), state.gpu.queue(), &stats, win_w, win_h)
            .map_err(|e| e.to_string())
            .and_then(|()| state.hud.render(&mut encoder, &view).map_err(|e| e.to_string()));
        if let Err(e) = drawn {
            log::warn!("HUD skipped: {}", e);
        }
    }

    let capture = if state.screenshot_requested {
        state.screenshot_requested = false;
        Some(PendingCapture::record(
            state.gpu.device(),
            &mut encoder,
            &output.texture,
            win_w,
            win_h,
        ))
    } else {
        None
    };

    commands.push(encoder.finish());
    state.gpu.queue().submit(commands);

    // ---- Read back screenshot ----
    if let Some(capture) = capture {
        let path = screenshot_path(screenshot_dir, state.driver.frames());
        let saved = capture
            .read(state.gpu.device())
            .and_then(|image| save_png(&image, &path));
        if let Err(e) = saved {
            log::error!("Screenshot failed: {}", e);
        }
    }

    output.present();
    state.hud.trim();
    state.window.request_redraw();
}
