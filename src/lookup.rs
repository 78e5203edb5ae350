// ============================================================================
// lookup.rs — Linestream
// Resamples the life curves into fixed-resolution 1-D lookup textures.
// ============================================================================

use crate::config::{StreamConfig, MIN_LOOKUP_STEPS};
use crate::device::{GpuDevice, TexelFormat, TextureDesc};
use crate::error::StreamError;

/// A curve sampled at `S` evenly spaced points: sample `i` is `f(i / S)`.
#[derive(Clone, Debug, PartialEq)]
pub struct LookupTable<V> {
    samples: Vec<V>,
}

impl<V> LookupTable<V> {
    /// Full O(S) resample. `steps` below 2 is raised to 2.
    pub fn resample(steps: u32, curve: impl Fn(f32) -> V) -> Self {
        let steps = steps.max(MIN_LOOKUP_STEPS);
        let samples = (0..steps)
            .map(|i| curve(i as f32 / steps as f32))
            .collect();
        Self { samples }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn samples(&self) -> &[V] {
        &self.samples
    }
}

impl LookupTable<[f32; 4]> {
    fn texels(&self) -> Vec<f32> {
        self.samples.iter().flatten().copied().collect()
    }
}

impl LookupTable<f32> {
    fn texels(&self) -> Vec<f32> {
        self.samples.clone()
    }
}

/// The colour and size lookup textures owned by one driver.
pub struct LookupTextures<T> {
    pub color: T,
    pub size: T,
    pub color_steps: u32,
    pub size_steps: u32,
}

impl<T> LookupTextures<T> {
    /// Resample both curves from `config` and upload them.
    pub fn build<D>(device: &mut D, config: &StreamConfig) -> Result<Self, StreamError>
    where
        D: GpuDevice<Texture = T>,
    {
        let max = device.limits().max_texture_dimension;
        let color_steps = config.clamped_color_steps().min(max);
        let size_steps = config.clamped_size_steps().min(max);

        let color_table = LookupTable::resample(color_steps, |t| config.color_over_life.evaluate(t));
        let size_table = LookupTable::resample(size_steps, |t| config.size_over_life.evaluate(t));

        let color = device.create_lookup_texture(
            &TextureDesc {
                label: "color_over_life",
                width: color_steps,
                height: 1,
                format: TexelFormat::LookupRgba,
            },
            &color_table.texels(),
        )?;
        let size = match device.create_lookup_texture(
            &TextureDesc {
                label: "size_over_life",
                width: size_steps,
                height: 1,
                format: TexelFormat::LookupR,
            },
            &size_table.texels(),
        ) {
            Ok(texture) => texture,
            Err(err) => {
                device.destroy_texture(color);
                return Err(err);
            }
        };

        log::debug!("Built lookup textures: color {} steps, size {} steps", color_steps, size_steps);
        Ok(Self {
            color,
            size,
            color_steps,
            size_steps,
        })
    }

    pub fn release<D>(self, device: &mut D)
    where
        D: GpuDevice<Texture = T>,
    {
        device.destroy_texture(self.color);
        device.destroy_texture(self.size);
    }
}
