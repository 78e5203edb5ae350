// ============================================================================
// device.rs — Linestream
// The GPU seam: every core component talks to the device through `GpuDevice`,
// so the buffer lifecycle and frame protocol run identically on wgpu and on
// the recording test double.
// ============================================================================

use crate::tiler::{TileDraw, TiledMesh};

/// Texel layout of a device texture.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TexelFormat {
    /// Half-float RGBA render target holding one particle channel.
    StateHalf,
    /// Full-float RGBA lookup row.
    LookupRgba,
    /// Full-float single-channel lookup row.
    LookupR,
}

impl TexelFormat {
    pub fn components(self) -> usize {
        match self {
            TexelFormat::StateHalf | TexelFormat::LookupRgba => 4,
            TexelFormat::LookupR => 1,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TextureDesc {
    pub label: &'static str,
    pub width: u32,
    pub height: u32,
    pub format: TexelFormat,
}

/// Device ceilings the core needs to respect.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DeviceLimits {
    pub max_texture_dimension: u32,
}

impl Default for DeviceLimits {
    fn default() -> Self {
        Self {
            max_texture_dimension: 8192,
        }
    }
}

// ======================== Channels & Passes ========================

/// One per-particle attribute texture.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Channel {
    Position,
    Velocity,
    Color,
    Scale,
}

impl Channel {
    pub const ALL: [Channel; 4] = [
        Channel::Position,
        Channel::Velocity,
        Channel::Color,
        Channel::Scale,
    ];

    pub fn index(self) -> usize {
        match self {
            Channel::Position => 0,
            Channel::Velocity => 1,
            Channel::Color => 2,
            Channel::Scale => 3,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Channel::Position => "position",
            Channel::Velocity => "velocity",
            Channel::Color => "color",
            Channel::Scale => "scale",
        }
    }
}

/// Which half of the kernel program runs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KernelVariant {
    /// Ignores READ state and synthesizes a fresh distribution.
    Init,
    /// Integrates READ state by one tick.
    Step,
}

/// One of the eight kernel passes: 0–3 init, 4–7 step, channels in
/// position/velocity/color/scale order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct KernelPass {
    pub variant: KernelVariant,
    pub channel: Channel,
}

impl KernelPass {
    pub const COUNT: usize = 8;

    pub fn new(variant: KernelVariant, channel: Channel) -> Self {
        Self { variant, channel }
    }

    pub fn index(self) -> usize {
        let base = match self.variant {
            KernelVariant::Init => 0,
            KernelVariant::Step => 4,
        };
        base + self.channel.index()
    }
}

// ======================== Bindings ========================

/// Scalars consumed by every kernel pass.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct KernelParams {
    pub emitter_position: [f32; 3],
    pub emitter_size: [f32; 3],
    pub noise_frequency: f32,
    pub noise_amplitude: f32,
    pub noise_speed: f32,
    pub life: f32,
    pub random_seed: u32,
    pub delta: f32,
    pub elapsed: f32,
    /// Simulation ticks since the last init; salts re-emission randomness.
    pub tick: u32,
}

/// Everything a kernel pass samples: the READ side of each channel, both
/// lookup tables, and the scalar parameters.
pub struct KernelBindings<'a, T> {
    pub state: [&'a T; 4],
    pub color_table: &'a T,
    pub size_table: &'a T,
    pub params: KernelParams,
}

/// Inputs to the render material.
pub struct DrawBindings<'a, T> {
    /// Post-step WRITE textures in channel order.
    pub state: [&'a T; 4],
    pub particle_limit: u32,
    pub buffer_width: u32,
    pub buffer_height: u32,
    pub line_width: f32,
    pub cast_shadows: bool,
    pub receive_shadows: bool,
}

/// Screen rectangle for the debug blit, in pixels.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct OverlayRect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Default for OverlayRect {
    fn default() -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            width: 256.0,
            height: 64.0,
        }
    }
}

// ======================== Device Trait ========================

pub trait GpuDevice {
    type Texture;
    type Mesh;

    fn limits(&self) -> DeviceLimits;

    /// Render-target texture for one side of a buffer pair.
    fn create_state_texture(
        &mut self,
        desc: &TextureDesc,
    ) -> Result<Self::Texture, crate::StreamError>;

    /// `desc.width x 1` lookup row initialised from `texels`
    /// (`desc.format.components()` floats per texel).
    fn create_lookup_texture(
        &mut self,
        desc: &TextureDesc,
        texels: &[f32],
    ) -> Result<Self::Texture, crate::StreamError>;

    fn destroy_texture(&mut self, texture: Self::Texture);

    fn create_mesh(&mut self, mesh: &TiledMesh) -> Result<Self::Mesh, crate::StreamError>;

    fn destroy_mesh(&mut self, mesh: Self::Mesh);

    /// Bind inputs for the kernel passes that follow.
    fn bind_kernel(&mut self, bindings: &KernelBindings<'_, Self::Texture>);

    /// Full-screen pass writing one channel into `target`.
    fn kernel_pass(&mut self, pass: KernelPass, target: &Self::Texture);

    /// One draw call per entry of `tiles`, all sharing `mesh`.
    fn draw_tiles(
        &mut self,
        mesh: &Self::Mesh,
        bindings: &DrawBindings<'_, Self::Texture>,
        tiles: &[TileDraw],
    );

    fn draw_debug_overlay(&mut self, position: &Self::Texture, rect: OverlayRect);
}
