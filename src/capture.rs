// ============================================================================
// capture.rs — Linestream
// Frame readback: copy a render target into a staging buffer, strip row
// padding, normalise BGRA to RGBA and write PNGs.
// ============================================================================

use std::path::{Path, PathBuf};

use crate::error::StreamError;

/// Bytes per row padded to wgpu's copy alignment.
pub fn padded_bytes_per_row(width: u32) -> u32 {
    let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
    (width * 4).div_ceil(align) * align
}

/// Staging buffer plus the copy command that fills it. Submit the encoder,
/// then call [`PendingCapture::read`].
pub struct PendingCapture {
    staging: wgpu::Buffer,
    width: u32,
    height: u32,
    padded_bpr: u32,
    bgra: bool,
}

impl PendingCapture {
    pub fn record(
        device: &wgpu::Device,
        encoder: &mut wgpu::CommandEncoder,
        texture: &wgpu::Texture,
        width: u32,
        height: u32,
    ) -> Self {
        let padded_bpr = padded_bytes_per_row(width);
        let staging = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("capture_staging"),
            size: u64::from(padded_bpr) * u64::from(height),
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &staging,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(padded_bpr),
                    rows_per_image: Some(height),
                },
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );

        let bgra = matches!(
            texture.format(),
            wgpu::TextureFormat::Bgra8Unorm | wgpu::TextureFormat::Bgra8UnormSrgb
        );
        Self {
            staging,
            width,
            height,
            padded_bpr,
            bgra,
        }
    }

    /// Block until the copy lands and return tightly packed RGBA8.
    pub fn read(self, device: &wgpu::Device) -> Result<image::RgbaImage, StreamError> {
        let slice = self.staging.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        device.poll(wgpu::Maintain::Wait);

        match rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(err)) => return Err(StreamError::Readback(err.to_string())),
            Err(err) => return Err(StreamError::Readback(err.to_string())),
        }

        let rgba = {
            let data = slice.get_mapped_range();
            unpad_rows(&data, self.width, self.height, self.padded_bpr, self.bgra)
        };
        self.staging.unmap();
        self.staging.destroy();

        image::RgbaImage::from_raw(self.width, self.height, rgba)
            .ok_or_else(|| StreamError::Readback("readback size mismatch".into()))
    }
}

/// Remove row padding and, for BGRA sources, swap to RGBA.
pub fn unpad_rows(data: &[u8], width: u32, height: u32, padded_bpr: u32, bgra: bool) -> Vec<u8> {
    let row_bytes = (width * 4) as usize;
    let mut rgba = Vec::with_capacity(row_bytes * height as usize);
    for row in 0..height as usize {
        let start = row * padded_bpr as usize;
        let row_data = &data[start..start + row_bytes];
        if bgra {
            for chunk in row_data.chunks_exact(4) {
                rgba.extend_from_slice(&[chunk[2], chunk[1], chunk[0], chunk[3]]);
            }
        } else {
            rgba.extend_from_slice(row_data);
        }
    }
    rgba
}

pub fn save_png(image: &image::RgbaImage, path: &Path) -> Result<(), StreamError> {
    image.save_with_format(path, image::ImageFormat::Png)?;
    log::info!("Saved {}x{} frame to {}", image.width(), image.height(), path.display());
    Ok(())
}

/// `linestream_<timestamp>_f<frame>.png` in `dir`.
pub fn screenshot_path(dir: &Path, frame: u64) -> PathBuf {
    let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
    dir.join(format!("linestream_{stamp}_f{frame:06}.png"))
}
