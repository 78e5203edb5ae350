// ============================================================================
// config.rs — Linestream
// Stream configuration (JSON-loadable), derived buffer dimensions, and runtime
// toggles adjustable from the keyboard.
// ============================================================================

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::curves::{ColorGradient, SizeCurve};
use crate::error::StreamError;

// ======================== Constants ========================

pub const DEFAULT_BUFFER_WIDTH: u32 = 8192;
pub const MAX_BUFFER_WIDTH: u32 = 8192;
pub const MAX_BUFFER_HEIGHT: u32 = 8192;
pub const DEFAULT_MAX_VERTICES_PER_DRAW: u32 = 65000;
pub const MIN_LOOKUP_STEPS: u32 = 2;

// ======================== StreamConfig ========================

/// Everything the stream needs from the configuration layer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    pub max_particles: i64,
    pub buffer_width: u32,
    pub emitter_position: [f32; 3],
    pub emitter_size: [f32; 3],
    pub noise_amplitude: f32,
    pub noise_frequency: f32,
    pub noise_speed: f32,
    pub life: f32,
    pub random_seed: u32,
    pub color_over_life: ColorGradient,
    pub color_steps: u32,
    pub size_over_life: SizeCurve,
    pub size_steps: u32,
    pub cast_shadows: bool,
    pub receive_shadows: bool,
    pub debug: bool,
    /// Per-draw vertex ceiling of the target device.
    pub max_vertices_per_draw: u32,
    pub line_width: f32,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            max_particles: 3_276_800,
            buffer_width: DEFAULT_BUFFER_WIDTH,
            emitter_position: [0.0, 0.0, 0.0],
            emitter_size: [0.1, 0.1, 0.1],
            noise_amplitude: 5.0,
            noise_frequency: 0.5,
            noise_speed: 0.1,
            life: 10.0,
            random_seed: 0,
            color_over_life: ColorGradient::default(),
            color_steps: 16,
            size_over_life: SizeCurve::default(),
            size_steps: 16,
            cast_shadows: true,
            receive_shadows: true,
            debug: false,
            max_vertices_per_draw: DEFAULT_MAX_VERTICES_PER_DRAW,
            line_width: 1.0,
        }
    }
}

impl StreamConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, StreamError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| StreamError::ConfigIo {
            path: path.display().to_string(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| StreamError::ConfigParse {
            path: path.display().to_string(),
            source,
        })
    }

    /// State texture width, clamped to `[1, MAX_BUFFER_WIDTH]`.
    pub fn buffer_width(&self) -> u32 {
        self.buffer_width.clamp(1, MAX_BUFFER_WIDTH)
    }

    /// Rows needed to hold `max_particles` cells; never zero.
    pub fn buffer_height(&self) -> u32 {
        if self.max_particles <= 0 {
            return 1;
        }
        let width = self.buffer_width() as i64;
        let rows = (self.max_particles - 1) / width + 1;
        rows.clamp(1, MAX_BUFFER_HEIGHT as i64) as u32
    }

    /// Particle limit forwarded to the render material.
    pub fn particle_limit(&self) -> u32 {
        self.max_particles.clamp(0, u32::MAX as i64) as u32
    }

    pub fn clamped_color_steps(&self) -> u32 {
        self.color_steps.max(MIN_LOOKUP_STEPS)
    }

    pub fn clamped_size_steps(&self) -> u32 {
        self.size_steps.max(MIN_LOOKUP_STEPS)
    }

    /// Positive lifetime; non-positive or NaN values fall back to one time unit.
    pub fn life(&self) -> f32 {
        if self.life > 0.0 {
            self.life
        } else {
            1.0
        }
    }

    /// True if moving from `self` to `other` invalidates GPU resources, as
    /// opposed to changing only per-frame scalars.
    pub fn needs_reallocation(&self, other: &StreamConfig) -> bool {
        self.buffer_width() != other.buffer_width()
            || self.buffer_height() != other.buffer_height()
            || self.max_vertices_per_draw != other.max_vertices_per_draw
            || self.clamped_color_steps() != other.clamped_color_steps()
            || self.clamped_size_steps() != other.clamped_size_steps()
            || self.color_over_life != other.color_over_life
            || self.size_over_life != other.size_over_life
    }

    /// Log every value that will be silently clamped.
    pub fn log_clamps(&self) {
        if self.max_particles <= 0 {
            log::warn!(
                "max_particles = {} is not positive; using a 1x1 state buffer",
                self.max_particles
            );
        }
        if self.buffer_width != self.buffer_width() {
            log::warn!(
                "buffer_width = {} clamped to {}",
                self.buffer_width,
                self.buffer_width()
            );
        }
        if self.color_steps < MIN_LOOKUP_STEPS {
            log::warn!("color_steps = {} clamped to {}", self.color_steps, MIN_LOOKUP_STEPS);
        }
        if self.size_steps < MIN_LOOKUP_STEPS {
            log::warn!("size_steps = {} clamped to {}", self.size_steps, MIN_LOOKUP_STEPS);
        }
        if self.life() != self.life {
            log::warn!("life = {} is not positive; using 1.0", self.life);
        }
    }
}

// ======================== Runtime Params ========================

/// Whether the kernel advances time or re-seeds every frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunMode {
    /// Step the simulation with real frame time.
    Playing,
    /// Re-run the init pass each frame so the view tracks parameter edits.
    Preview,
}

impl RunMode {
    pub fn name(self) -> &'static str {
        match self {
            RunMode::Playing => "Playing",
            RunMode::Preview => "Preview",
        }
    }
}

/// Runtime parameters adjustable via keyboard.
#[derive(Clone, Debug)]
pub struct RunParams {
    pub mode: RunMode,
    pub show_hud: bool,
}

impl Default for RunParams {
    fn default() -> Self {
        Self {
            mode: RunMode::Playing,
            show_hud: true,
        }
    }
}
