// ============================================================================
// driver.rs — Linestream
// FrameDriver: owns the buffer set, lookup textures and tiled mesh; each frame
// it resets on demand, runs init or step, then issues the tiled draws.
// ============================================================================

use crate::buffers::BufferSet;
use crate::config::{RunMode, StreamConfig};
use crate::device::{Channel, DrawBindings, GpuDevice, KernelVariant, OverlayRect};
use crate::error::StreamError;
use crate::kernel::{FrameClock, KernelStepper};
use crate::lookup::LookupTextures;
use crate::tiler::{TileDraw, TileLayout, TiledMesh};

/// Lifecycle of the GPU resources.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DriverState {
    /// Nothing allocated yet, or torn down.
    Uninitialized,
    /// Resources allocated and seeded.
    Running,
    /// The last reset failed; nothing is allocated and frames are skipped
    /// until the configuration changes or a reset is requested.
    Faulted,
}

/// What one call to [`FrameDriver::frame`] did.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct FrameReport {
    pub kernel: Option<KernelVariant>,
    pub reset: bool,
    pub tiles_drawn: u32,
    pub overlay: bool,
    /// Swap generation shared by all four channels after the frame.
    pub generation: u64,
}

impl FrameReport {
    pub fn skipped() -> Self {
        Self::default()
    }
}

struct MeshSlot<M> {
    layout: TileLayout,
    mesh: M,
}

pub struct FrameDriver<D: GpuDevice> {
    config: StreamConfig,
    state: DriverState,
    needs_reset: bool,
    buffers: BufferSet<D::Texture>,
    lookups: Option<LookupTextures<D::Texture>>,
    mesh: Option<MeshSlot<D::Mesh>>,
    layout: TileLayout,
    draws: Vec<TileDraw>,
    stepper: KernelStepper,
    overlay_rect: OverlayRect,
    frames: u64,
}

impl<D: GpuDevice> FrameDriver<D> {
    pub fn new(config: StreamConfig) -> Self {
        config.log_clamps();
        let layout = Self::solve_layout(&config);
        Self {
            config,
            state: DriverState::Uninitialized,
            needs_reset: true,
            buffers: BufferSet::new(),
            lookups: None,
            mesh: None,
            layout,
            draws: Vec::new(),
            stepper: KernelStepper::new(),
            overlay_rect: OverlayRect::default(),
            frames: 0,
        }
    }

    fn solve_layout(config: &StreamConfig) -> TileLayout {
        TileLayout::solve(
            config.buffer_width(),
            config.buffer_height(),
            config.max_vertices_per_draw,
        )
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    pub fn state(&self) -> DriverState {
        self.state
    }

    pub fn layout(&self) -> TileLayout {
        self.layout
    }

    pub fn needs_reset(&self) -> bool {
        self.needs_reset
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn set_overlay_rect(&mut self, rect: OverlayRect) {
        self.overlay_rect = rect;
    }

    /// Schedule a full reset; it happens atomically at the start of the next
    /// frame.
    pub fn request_reset(&mut self) {
        self.needs_reset = true;
    }

    /// Replace the configuration. Changes that invalidate GPU resources
    /// schedule a reset; scalar-only changes take effect on the next tick.
    pub fn apply_config(&mut self, config: StreamConfig) {
        let realloc = self.config.needs_reallocation(&config);
        config.log_clamps();
        self.config = config;
        if realloc {
            self.layout = Self::solve_layout(&self.config);
            self.needs_reset = true;
            log::info!("Configuration changed; reset scheduled");
        }
    }

    pub fn set_debug(&mut self, debug: bool) {
        self.config.debug = debug;
    }

    /// Run one frame: reset if requested, one kernel update, then the draws.
    ///
    /// A failed reset is returned once and leaves the driver `Faulted` with
    /// nothing allocated; later frames are skipped until the next reset
    /// request.
    pub fn frame(&mut self, device: &mut D, clock: &FrameClock) -> Result<FrameReport, StreamError> {
        let mut report = FrameReport::skipped();

        let variant = if self.needs_reset {
            self.needs_reset = false;
            if let Err(err) = self.reset_resources(device) {
                self.release(device);
                self.state = DriverState::Faulted;
                self.needs_reset = false;
                log::error!("Stream reset failed: {}", err);
                return Err(err);
            }
            self.state = DriverState::Running;
            report.reset = true;
            KernelVariant::Init
        } else {
            match (self.state, clock.mode) {
                (DriverState::Running, RunMode::Playing) => KernelVariant::Step,
                (DriverState::Running, RunMode::Preview) => KernelVariant::Init,
                _ => return Ok(report),
            }
        };

        let Some(lookups) = self.lookups.as_ref() else {
            return Err(StreamError::Unallocated("lookup_textures"));
        };
        self.stepper
            .run(device, &mut self.buffers, lookups, &self.config, clock, variant)?;
        report.kernel = Some(variant);

        report.tiles_drawn = self.draw(device)?;
        if self.config.debug {
            let position = self.buffers.write(Channel::Position)?;
            device.draw_debug_overlay(position, self.overlay_rect);
            report.overlay = true;
        }

        report.generation = self.buffers.generation().unwrap_or_default();
        self.frames += 1;
        Ok(report)
    }

    fn draw(&self, device: &mut D) -> Result<u32, StreamError> {
        let Some(slot) = self.mesh.as_ref() else {
            return Err(StreamError::Unallocated("tiled_mesh"));
        };
        let bindings = DrawBindings {
            state: self.buffers.write_textures()?,
            particle_limit: self.config.particle_limit(),
            buffer_width: self.layout.buffer_width,
            buffer_height: self.layout.buffer_height,
            line_width: self.config.line_width,
            cast_shadows: self.config.cast_shadows,
            receive_shadows: self.config.receive_shadows,
        };
        device.draw_tiles(&slot.mesh, &bindings, &self.draws);
        Ok(self.draws.len() as u32)
    }

    /// (Re)build everything the current configuration needs. The mesh is
    /// kept when width and tile height are unchanged.
    fn reset_resources(&mut self, device: &mut D) -> Result<(), StreamError> {
        let layout = Self::solve_layout(&self.config);

        let reuse_mesh = matches!(&self.mesh, Some(slot) if slot.layout.same_mesh(&layout));
        if !reuse_mesh {
            if let Some(old) = self.mesh.take() {
                device.destroy_mesh(old.mesh);
            }
            let geometry = TiledMesh::build(&layout);
            let mesh = device.create_mesh(&geometry)?;
            self.mesh = Some(MeshSlot { layout, mesh });
        }

        if let Some(old) = self.lookups.take() {
            old.release(device);
        }
        self.lookups = Some(LookupTextures::build(device, &self.config)?);

        self.buffers
            .allocate(device, layout.buffer_width, layout.buffer_height)?;

        self.layout = layout;
        self.draws = layout.draws();
        log::info!(
            "Stream reset: {} particles in {}x{} cells, {} tiles of {} rows{}",
            self.config.particle_limit(),
            layout.buffer_width,
            layout.buffer_height,
            layout.num_tiles,
            layout.rows_per_tile,
            if reuse_mesh { " (mesh reused)" } else { "" }
        );
        Ok(())
    }

    /// Destroy every GPU resource. Safe to call repeatedly; the next frame
    /// reallocates.
    pub fn release(&mut self, device: &mut D) {
        self.buffers.release(device);
        if let Some(lookups) = self.lookups.take() {
            lookups.release(device);
        }
        if let Some(slot) = self.mesh.take() {
            device.destroy_mesh(slot.mesh);
        }
        self.draws.clear();
        if self.state == DriverState::Running {
            self.state = DriverState::Uninitialized;
            self.needs_reset = true;
        }
    }

    pub fn holds_resources(&self) -> bool {
        self.buffers.is_allocated() || self.lookups.is_some() || self.mesh.is_some()
    }
}

impl<D: GpuDevice> Drop for FrameDriver<D> {
    fn drop(&mut self) {
        if self.holds_resources() {
            log::warn!("FrameDriver dropped without release(); GPU resources were not torn down explicitly");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingDevice;

    fn small_config() -> StreamConfig {
        StreamConfig {
            max_particles: 100,
            buffer_width: 8,
            max_vertices_per_draw: 8 * 4 * 4,
            ..Default::default()
        }
    }

    fn playing() -> FrameClock {
        FrameClock::playing(0.016, 1.0)
    }

    #[test]
    fn first_frame_resets_and_runs_init() {
        let mut device = RecordingDevice::default();
        let mut driver = FrameDriver::<RecordingDevice>::new(small_config());
        assert_eq!(driver.state(), DriverState::Uninitialized);

        let report = driver.frame(&mut device, &playing()).unwrap();
        assert!(report.reset);
        assert_eq!(report.kernel, Some(KernelVariant::Init));
        assert_eq!(driver.state(), DriverState::Running);

        let passes: Vec<usize> = device.kernels.iter().map(|k| k.pass.index()).collect();
        assert_eq!(passes, vec![0, 1, 2, 3]);

        // 100 particles / 8 wide = 13 rows; 4 rows per tile.
        assert_eq!(report.tiles_drawn, 4);
        driver.release(&mut device);
    }

    #[test]
    fn running_frames_step_while_playing_and_init_in_preview() {
        let mut device = RecordingDevice::default();
        let mut driver = FrameDriver::<RecordingDevice>::new(small_config());
        driver.frame(&mut device, &playing()).unwrap();

        let step = driver.frame(&mut device, &playing()).unwrap();
        assert_eq!(step.kernel, Some(KernelVariant::Step));
        assert!(!step.reset);

        let preview = driver.frame(&mut device, &FrameClock::preview(1.0)).unwrap();
        assert_eq!(preview.kernel, Some(KernelVariant::Init));
        driver.release(&mut device);
    }

    #[test]
    fn reset_request_forces_init_on_next_frame() {
        let mut device = RecordingDevice::default();
        let mut driver = FrameDriver::<RecordingDevice>::new(small_config());
        for _ in 0..3 {
            driver.frame(&mut device, &playing()).unwrap();
        }
        driver.request_reset();
        device.clear_log();

        let report = driver.frame(&mut device, &playing()).unwrap();
        assert!(report.reset);
        assert_eq!(report.kernel, Some(KernelVariant::Init));
        assert!(device.kernels.iter().all(|k| k.pass.index() < 4));
        driver.release(&mut device);
    }

    #[test]
    fn channels_share_generation_after_every_frame() {
        let mut device = RecordingDevice::default();
        let mut driver = FrameDriver::<RecordingDevice>::new(small_config());
        for expected in 1..=5 {
            let report = driver.frame(&mut device, &playing()).unwrap();
            assert_eq!(driver.buffers.generation(), Some(expected));
            assert_eq!(report.generation, expected);
        }
        driver.release(&mut device);
    }

    #[test]
    fn draws_sample_post_step_write_textures_with_tile_offsets() {
        let mut device = RecordingDevice::default();
        let mut driver = FrameDriver::<RecordingDevice>::new(small_config());
        driver.frame(&mut device, &playing()).unwrap();
        driver.frame(&mut device, &playing()).unwrap();

        let draw = device.draws.last().unwrap();
        let targets: Vec<_> = device.kernels[device.kernels.len() - 4..]
            .iter()
            .map(|k| k.target)
            .collect();
        assert_eq!(draw.sources.to_vec(), targets);
        assert_eq!(draw.particle_limit, 100);
        assert!(draw.cast_shadows);

        let offsets: Vec<f32> = draw.tiles.iter().map(|t| t.row_offset).collect();
        assert_eq!(offsets, vec![0.0, 4.0 / 13.0, 8.0 / 13.0, 12.0 / 13.0]);
        driver.release(&mut device);
    }

    #[test]
    fn mesh_rebuilt_only_when_width_or_tile_rows_change() {
        let mut device = RecordingDevice::default();
        let mut driver = FrameDriver::<RecordingDevice>::new(small_config());
        driver.frame(&mut device, &playing()).unwrap();
        assert_eq!(device.meshes_created, 1);

        // More rows, same width and tile height: mesh reused.
        driver.apply_config(StreamConfig {
            max_particles: 200,
            ..small_config()
        });
        driver.frame(&mut device, &playing()).unwrap();
        assert_eq!(device.meshes_created, 1);
        assert_eq!(driver.layout().num_tiles, 7);

        // Narrower buffer: rebuilt, old mesh destroyed first.
        driver.apply_config(StreamConfig {
            buffer_width: 4,
            ..small_config()
        });
        driver.frame(&mut device, &playing()).unwrap();
        assert_eq!(device.meshes_created, 2);
        assert_eq!(device.live_meshes.len(), 1);
        // 8 wide x 4 rows, then 4 wide x 8 rows.
        assert_eq!(device.mesh_vertex_counts, vec![128, 128]);
        driver.release(&mut device);
    }

    #[test]
    fn scalar_config_changes_do_not_reset() {
        let mut device = RecordingDevice::default();
        let mut driver = FrameDriver::<RecordingDevice>::new(small_config());
        driver.frame(&mut device, &playing()).unwrap();

        driver.apply_config(StreamConfig {
            noise_amplitude: 0.5,
            ..small_config()
        });
        assert!(!driver.needs_reset());
        let report = driver.frame(&mut device, &playing()).unwrap();
        assert_eq!(report.kernel, Some(KernelVariant::Step));
        assert_eq!(device.kernels.last().unwrap().params.noise_amplitude, 0.5);
        driver.release(&mut device);
    }

    #[test]
    fn zero_particles_allocate_one_by_one() {
        let mut device = RecordingDevice::default();
        let mut driver = FrameDriver::<RecordingDevice>::new(StreamConfig {
            max_particles: 0,
            buffer_width: 1,
            ..Default::default()
        });
        driver.frame(&mut device, &playing()).unwrap();
        assert_eq!(driver.buffers.dimensions(), (1, 1));
        assert_eq!(driver.layout().num_tiles, 1);
        driver.release(&mut device);
    }

    #[test]
    fn allocation_failure_is_surfaced_and_leaves_nothing_allocated() {
        let mut device = RecordingDevice::failing_texture_at(3);
        let mut driver = FrameDriver::<RecordingDevice>::new(small_config());
        let err = driver.frame(&mut device, &playing());
        assert!(matches!(err, Err(StreamError::ResourceAllocation { .. })));
        assert_eq!(driver.state(), DriverState::Faulted);
        assert!(device.live_textures.is_empty());
        assert!(device.live_meshes.is_empty());
        assert!(device.draws.is_empty());

        // No retry until asked.
        let skipped = driver.frame(&mut device, &playing()).unwrap();
        assert_eq!(skipped, FrameReport::skipped());

        driver.request_reset();
        let report = driver.frame(&mut device, &playing()).unwrap();
        assert!(report.reset);
        assert_eq!(driver.state(), DriverState::Running);
        driver.release(&mut device);
    }

    fn assert_faulted_and_empty(driver: &FrameDriver<RecordingDevice>, device: &RecordingDevice) {
        assert_eq!(driver.state(), DriverState::Faulted);
        assert!(!driver.holds_resources());
        assert!(device.live_textures.is_empty());
        assert!(device.live_meshes.is_empty());
        assert!(device.kernels.is_empty());
        assert!(device.draws.is_empty());
    }

    #[test]
    fn failed_mesh_allocation_faults_with_nothing_held() {
        let mut device = RecordingDevice::failing_mesh();
        let mut driver = FrameDriver::<RecordingDevice>::new(small_config());
        let err = driver.frame(&mut device, &playing());
        assert!(matches!(err, Err(StreamError::ResourceAllocation { label: "tiled_mesh", .. })));
        assert_faulted_and_empty(&driver, &device);

        device.fail_mesh = false;
        driver.request_reset();
        assert!(driver.frame(&mut device, &playing()).unwrap().reset);
        driver.release(&mut device);
    }

    #[test]
    fn failed_color_lookup_releases_mesh() {
        let mut device = RecordingDevice::failing_lookup_at(0);
        let mut driver = FrameDriver::<RecordingDevice>::new(small_config());
        assert!(driver.frame(&mut device, &playing()).is_err());
        assert_eq!(device.meshes_created, 1);
        assert_faulted_and_empty(&driver, &device);
    }

    #[test]
    fn failed_size_lookup_releases_color_lookup_and_mesh() {
        let mut device = RecordingDevice::failing_lookup_at(1);
        let mut driver = FrameDriver::<RecordingDevice>::new(small_config());
        assert!(driver.frame(&mut device, &playing()).is_err());
        assert_eq!(device.lookups.len(), 1);
        assert_eq!(device.textures_created, 0);
        assert_faulted_and_empty(&driver, &device);
    }

    #[test]
    fn failed_reallocation_after_running_releases_old_resources() {
        let mut device = RecordingDevice::default();
        let mut driver = FrameDriver::<RecordingDevice>::new(small_config());
        driver.frame(&mut device, &playing()).unwrap();
        device.clear_log();

        // Next state allocation is the first texture of the new set.
        device.fail_texture_at = Some(device.textures_created);
        driver.apply_config(StreamConfig {
            max_particles: 200,
            ..small_config()
        });
        assert!(driver.frame(&mut device, &playing()).is_err());
        assert_faulted_and_empty(&driver, &device);
    }

    #[test]
    fn oversized_buffer_is_rejected_before_any_draw() {
        let mut device = RecordingDevice::default();
        device.limits.max_texture_dimension = 4;
        let mut driver = FrameDriver::<RecordingDevice>::new(small_config());
        assert!(driver.frame(&mut device, &playing()).is_err());
        assert!(device.draws.is_empty());
        assert!(device.kernels.is_empty());
    }

    #[test]
    fn debug_flag_blits_position_write_texture() {
        let mut device = RecordingDevice::default();
        let mut driver = FrameDriver::<RecordingDevice>::new(StreamConfig {
            debug: true,
            ..small_config()
        });
        let report = driver.frame(&mut device, &playing()).unwrap();
        assert!(report.overlay);
        assert_eq!(device.overlays, vec![device.kernels[0].target]);

        driver.set_debug(false);
        let report = driver.frame(&mut device, &playing()).unwrap();
        assert!(!report.overlay);
        driver.release(&mut device);
    }

    #[test]
    fn release_tears_down_everything_and_rearms_reset() {
        let mut device = RecordingDevice::default();
        let mut driver = FrameDriver::<RecordingDevice>::new(small_config());
        driver.frame(&mut device, &playing()).unwrap();
        assert!(driver.holds_resources());

        driver.release(&mut device);
        driver.release(&mut device);
        assert!(!driver.holds_resources());
        assert!(device.live_textures.is_empty());
        assert!(device.live_meshes.is_empty());
        assert_eq!(driver.state(), DriverState::Uninitialized);
        assert!(driver.needs_reset());
    }
}
