// ============================================================================
// lib.rs — Linestream
// GPU line-particle stream: texture-resident particle state advanced by
// full-screen kernel passes and drawn through a tiled, shared quad mesh.
// ============================================================================

pub mod app;
pub mod buffers;
pub mod camera;
pub mod capture;
pub mod config;
pub mod curves;
pub mod device;
pub mod driver;
pub mod error;
pub mod gpu;
pub mod headless;
pub mod input;
pub mod kernel;
pub mod lookup;
pub mod pipeline;
pub mod renderer;
pub mod tiler;

#[cfg(test)]
mod testing;

pub use config::StreamConfig;
pub use driver::{DriverState, FrameDriver, FrameReport};
pub use error::StreamError;
