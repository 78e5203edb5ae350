// ============================================================================
// error.rs — Linestream
// Error taxonomy for GPU resource management, device setup and file output.
// ============================================================================

use thiserror::Error;

/// Errors surfaced by the stream core and its wgpu backend.
///
/// Invalid configuration values are never reported here: they are clamped to a
/// safe minimum and logged instead.
#[derive(Debug, Error)]
pub enum StreamError {
    /// The device rejected a texture or mesh. Fatal for the current configuration.
    #[error("failed to allocate {label} ({width}x{height}): {reason}")]
    ResourceAllocation {
        label: &'static str,
        width: u32,
        height: u32,
        reason: String,
    },

    /// A buffer pair was swapped or bound after release (or before allocation).
    #[error("buffer pair `{0}` is not allocated")]
    Unallocated(&'static str),

    #[error("no compatible GPU adapter found (Vulkan, Metal, DX12 or GL required)")]
    NoAdapter,

    #[error("failed to create GPU device: {0}")]
    DeviceRequest(#[from] wgpu::RequestDeviceError),

    #[error("failed to create GPU surface: {0}")]
    SurfaceCreation(#[from] wgpu::CreateSurfaceError),

    #[error("failed to create window: {0}")]
    Window(#[from] winit::error::OsError),

    #[error("GPU readback failed: {0}")]
    Readback(String),

    #[error("failed to read config {path}: {source}")]
    ConfigIo {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config {path}: {source}")]
    ConfigParse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to write image: {0}")]
    Image(#[from] image::ImageError),
}

impl StreamError {
    pub(crate) fn allocation(
        label: &'static str,
        width: u32,
        height: u32,
        reason: impl Into<String>,
    ) -> Self {
        StreamError::ResourceAllocation {
            label,
            width,
            height,
            reason: reason.into(),
        }
    }
}
