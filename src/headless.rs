// ============================================================================
// headless.rs — Linestream
// Headless runner: drives the frame driver against an offscreen target for a
// fixed number of frames and optionally saves the last frame as PNG.
// ============================================================================

use std::path::PathBuf;
use std::time::Instant;

use crate::camera::OrbitCamera;
use crate::capture::{save_png, PendingCapture};
use crate::config::{RunMode, StreamConfig};
use crate::driver::FrameDriver;
use crate::error::StreamError;
use crate::gpu::WgpuDevice;
use crate::kernel::FrameClock;

const OFFSCREEN_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8UnormSrgb;

#[derive(Clone, Debug)]
pub struct HeadlessConfig {
    pub frames: u32,
    pub width: u32,
    pub height: u32,
    /// Simulated seconds per frame.
    pub frame_delta: f32,
    pub mode: RunMode,
    pub output_path: Option<PathBuf>,
    pub progress_interval: u32,
}

impl Default for HeadlessConfig {
    fn default() -> Self {
        Self {
            frames: 600,
            width: 1280,
            height: 720,
            frame_delta: 1.0 / 60.0,
            mode: RunMode::Playing,
            output_path: None,
            progress_interval: 100,
        }
    }
}

pub async fn request_device(
    label: &'static str,
    compatible_surface: Option<&wgpu::Surface<'_>>,
    instance: &wgpu::Instance,
) -> Result<(wgpu::Adapter, wgpu::Device, wgpu::Queue), StreamError> {
    let adapter = instance
        .request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface,
            force_fallback_adapter: false,
        })
        .await
        .ok_or(StreamError::NoAdapter)?;

    log::info!("GPU: {} ({:?})", adapter.get_info().name, adapter.get_info().backend);

    let (device, queue) = adapter
        .request_device(
            &wgpu::DeviceDescriptor {
                label: Some(label),
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::default().using_resolution(adapter.limits()),
                memory_hints: Default::default(),
            },
            None,
        )
        .await?;

    Ok((adapter, device, queue))
}

pub fn run_headless(stream: StreamConfig, config: &HeadlessConfig) -> Result<(), StreamError> {
    let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
        backends: wgpu::Backends::all(),
        ..Default::default()
    });
    let (_adapter, device, queue) =
        pollster::block_on(request_device("linestream_headless_device", None, &instance))?;

    let target = device.create_texture(&wgpu::TextureDescriptor {
        label: Some("headless_target"),
        size: wgpu::Extent3d {
            width: config.width,
            height: config.height,
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: OFFSCREEN_FORMAT,
        usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
        view_formats: &[],
    });

    let camera = OrbitCamera::looking_at(stream.emitter_position);
    let mut gpu = WgpuDevice::new(device, queue, OFFSCREEN_FORMAT);
    gpu.set_view_proj(camera.view_proj(config.width as f32 / config.height as f32));
    let mut driver = FrameDriver::new(stream);

    log::info!(
        "Headless run started: {} frames, {} particles in {}x{} cells, {} tiles",
        config.frames,
        driver.config().particle_limit(),
        driver.layout().buffer_width,
        driver.layout().buffer_height,
        driver.layout().num_tiles
    );

    let started = Instant::now();
    let mut last_report = Instant::now();
    let mut last_report_frame = 0u32;
    let mut result = Ok(());

    for step in 0..config.frames {
        let elapsed = step as f32 * config.frame_delta;
        let clock = match config.mode {
            RunMode::Playing => FrameClock::playing(config.frame_delta, elapsed),
            RunMode::Preview => FrameClock::preview(elapsed),
        };

        gpu.begin_frame(
            target.create_view(&wgpu::TextureViewDescriptor::default()),
            config.width,
            config.height,
        );
        let frame = driver.frame(&mut gpu, &clock);
        let mut commands: Vec<wgpu::CommandBuffer> = gpu.end_frame().into_iter().collect();

        let last = step + 1 == config.frames;
        let pending = if last && config.output_path.is_some() && !commands.is_empty() {
            let mut encoder = gpu
                .device()
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("headless_capture_encoder"),
                });
            let pending = PendingCapture::record(
                gpu.device(),
                &mut encoder,
                &target,
                config.width,
                config.height,
            );
            commands.push(encoder.finish());
            Some(pending)
        } else {
            None
        };
        gpu.queue().submit(commands);

        if let Err(err) = frame {
            result = Err(err);
            break;
        }

        if let (Some(pending), Some(path)) = (pending, &config.output_path) {
            if let Err(err) = pending
                .read(gpu.device())
                .and_then(|image| save_png(&image, path))
            {
                result = Err(err);
                break;
            }
        }

        if config.progress_interval > 0 && (step + 1) % config.progress_interval == 0 {
            let done = step + 1;
            let total_elapsed = started.elapsed().as_secs_f64().max(1e-6);
            let total_fps = done as f64 / total_elapsed;

            let window_elapsed = last_report.elapsed().as_secs_f64().max(1e-6);
            let window_fps = (done - last_report_frame) as f64 / window_elapsed;

            let remaining = config.frames.saturating_sub(done);
            let eta_secs = if total_fps > 1e-6 {
                remaining as f64 / total_fps
            } else {
                0.0
            };

            log::info!(
                "Headless progress: {}/{} | fps={:.0} (window {:.0}) | ETA={:.1} s",
                done,
                config.frames,
                total_fps,
                window_fps,
                eta_secs,
            );

            last_report = Instant::now();
            last_report_frame = done;
        }
    }

    driver.release(&mut gpu);
    target.destroy();
    gpu.device().poll(wgpu::Maintain::Wait);
    log::info!(
        "Headless run finished: {} frames in {:.2} s",
        driver.frames(),
        started.elapsed().as_secs_f64()
    );
    result
}
