// ============================================================================
// kernel.rs — Linestream
// Per-frame simulation update: swap the buffer set, bind READ state, then run
// one full-screen kernel pass per channel into WRITE.
// ============================================================================

use crate::buffers::BufferSet;
use crate::config::{RunMode, StreamConfig};
use crate::device::{Channel, GpuDevice, KernelBindings, KernelParams, KernelPass, KernelVariant};
use crate::error::StreamError;
use crate::lookup::LookupTextures;

/// Delta substituted when real frame time must not be used.
pub const NOMINAL_DELTA: f32 = 0.1;

/// Longest real frame time handed to the kernel; stalls are clipped to this.
pub const MAX_DELTA: f32 = 1.0 / 3.0;

/// Frame timing handed in by whoever drives the render loop.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FrameClock {
    /// Real seconds since the previous frame.
    pub delta: f32,
    /// Seconds since the driver started.
    pub elapsed: f32,
    pub mode: RunMode,
}

impl FrameClock {
    pub fn playing(delta: f32, elapsed: f32) -> Self {
        Self {
            delta,
            elapsed,
            mode: RunMode::Playing,
        }
    }

    pub fn preview(elapsed: f32) -> Self {
        Self {
            delta: 0.0,
            elapsed,
            mode: RunMode::Preview,
        }
    }
}

/// Delta fed to the kernel: real time only while playing past the first
/// simulated tick, and only if it is finite and positive. Capped at
/// [`MAX_DELTA`].
pub fn kernel_delta(mode: RunMode, ticks_since_init: u32, real_delta: f32) -> f32 {
    let usable = real_delta.is_finite() && real_delta > 0.0;
    if mode == RunMode::Playing && ticks_since_init > 0 && usable {
        real_delta.min(MAX_DELTA)
    } else {
        NOMINAL_DELTA
    }
}

/// Drives the kernel program. Holds no GPU state of its own; the step is a
/// pure function of the bound textures and parameters.
#[derive(Debug, Default)]
pub struct KernelStepper {
    ticks_since_init: u32,
}

impl KernelStepper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ticks_since_init(&self) -> u32 {
        self.ticks_since_init
    }

    /// Advance every channel by one tick using `variant`.
    pub fn run<D: GpuDevice>(
        &mut self,
        device: &mut D,
        buffers: &mut BufferSet<D::Texture>,
        lookups: &LookupTextures<D::Texture>,
        config: &StreamConfig,
        clock: &FrameClock,
        variant: KernelVariant,
    ) -> Result<KernelParams, StreamError> {
        buffers.swap()?;

        if variant == KernelVariant::Init {
            self.ticks_since_init = 0;
        }
        let params = KernelParams {
            emitter_position: config.emitter_position,
            emitter_size: config.emitter_size,
            noise_frequency: config.noise_frequency,
            noise_amplitude: config.noise_amplitude,
            noise_speed: config.noise_speed,
            life: config.life(),
            random_seed: config.random_seed,
            delta: kernel_delta(clock.mode, self.ticks_since_init, clock.delta),
            elapsed: clock.elapsed,
            tick: self.ticks_since_init,
        };

        device.bind_kernel(&KernelBindings {
            state: buffers.read_textures()?,
            color_table: &lookups.color,
            size_table: &lookups.size,
            params,
        });

        for channel in Channel::ALL {
            let target = buffers.write(channel)?;
            device.kernel_pass(KernelPass::new(variant, channel), target);
        }

        if variant == KernelVariant::Step {
            self.ticks_since_init = self.ticks_since_init.saturating_add(1);
        }
        log::debug!(
            "Kernel {:?}: dt={:.4} tick={} generation={:?}",
            variant,
            params.delta,
            params.tick,
            buffers.generation()
        );
        Ok(params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{RecordingDevice, TexHandle};

    fn setup(
        device: &mut RecordingDevice,
    ) -> (BufferSet<TexHandle>, LookupTextures<TexHandle>, StreamConfig) {
        let config = StreamConfig {
            max_particles: 64,
            buffer_width: 8,
            ..Default::default()
        };
        let mut buffers = BufferSet::new();
        buffers.allocate(device, 8, 8).unwrap();
        let lookups = LookupTextures::build(device, &config).unwrap();
        (buffers, lookups, config)
    }

    #[test]
    fn nominal_delta_replaces_first_and_preview_frames() {
        assert_eq!(kernel_delta(RunMode::Playing, 0, 0.016), NOMINAL_DELTA);
        assert_eq!(kernel_delta(RunMode::Playing, 3, 0.016), 0.016);
        assert_eq!(kernel_delta(RunMode::Preview, 3, 0.016), NOMINAL_DELTA);
        assert_eq!(kernel_delta(RunMode::Playing, 3, 0.0), NOMINAL_DELTA);
        assert_eq!(kernel_delta(RunMode::Playing, 3, f32::INFINITY), NOMINAL_DELTA);
        assert_eq!(kernel_delta(RunMode::Playing, 3, f32::NAN), NOMINAL_DELTA);
    }

    #[test]
    fn stalled_frames_are_capped() {
        assert_eq!(kernel_delta(RunMode::Playing, 5, 12.0), MAX_DELTA);
        assert_eq!(kernel_delta(RunMode::Playing, 5, MAX_DELTA), MAX_DELTA);
        assert_eq!(kernel_delta(RunMode::Playing, 5, 0.25), 0.25);
    }

    #[test]
    fn step_runs_four_passes_into_write_targets() {
        let mut device = RecordingDevice::default();
        let (mut buffers, lookups, config) = setup(&mut device);
        let mut stepper = KernelStepper::new();

        stepper
            .run(&mut device, &mut buffers, &lookups, &config, &FrameClock::playing(0.02, 1.0), KernelVariant::Step)
            .unwrap();

        let indices: Vec<usize> = device.kernels.iter().map(|k| k.pass.index()).collect();
        assert_eq!(indices, vec![4, 5, 6, 7]);

        let reads = buffers.read_textures().unwrap().map(|t| *t);
        let writes = buffers.write_textures().unwrap().map(|t| *t);
        for (i, record) in device.kernels.iter().enumerate() {
            assert_eq!(record.reads, reads);
            assert_eq!(record.target, writes[i]);
        }
    }

    #[test]
    fn each_run_swaps_before_binding() {
        let mut device = RecordingDevice::default();
        let (mut buffers, lookups, config) = setup(&mut device);
        let before_write = *buffers.write(Channel::Position).unwrap();
        let mut stepper = KernelStepper::new();

        stepper
            .run(&mut device, &mut buffers, &lookups, &config, &FrameClock::preview(0.0), KernelVariant::Init)
            .unwrap();

        // Last frame's WRITE is this frame's READ.
        assert_eq!(device.kernels[0].reads[0], before_write);
        assert_eq!(buffers.generation(), Some(1));
    }

    #[test]
    fn first_tick_after_init_uses_nominal_delta() {
        let mut device = RecordingDevice::default();
        let (mut buffers, lookups, config) = setup(&mut device);
        let mut stepper = KernelStepper::new();
        let clock = FrameClock::playing(0.02, 0.0);

        let init = stepper
            .run(&mut device, &mut buffers, &lookups, &config, &clock, KernelVariant::Init)
            .unwrap();
        let first = stepper
            .run(&mut device, &mut buffers, &lookups, &config, &clock, KernelVariant::Step)
            .unwrap();
        let second = stepper
            .run(&mut device, &mut buffers, &lookups, &config, &clock, KernelVariant::Step)
            .unwrap();

        assert_eq!(init.delta, NOMINAL_DELTA);
        assert_eq!(first.delta, NOMINAL_DELTA);
        assert_eq!(second.delta, 0.02);
        assert_eq!((first.tick, second.tick), (0, 1));
    }

    #[test]
    fn unallocated_buffers_fail_before_any_pass() {
        let mut device = RecordingDevice::default();
        let (_, lookups, config) = setup(&mut device);
        let mut empty = BufferSet::new();
        let mut stepper = KernelStepper::new();
        let result = stepper.run(
            &mut device,
            &mut empty,
            &lookups,
            &config,
            &FrameClock::preview(0.0),
            KernelVariant::Step,
        );
        assert!(matches!(result, Err(StreamError::Unallocated(_))));
        assert!(device.kernels.is_empty());
    }
}
