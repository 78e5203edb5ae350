// ============================================================================
// buffers.rs — Linestream
// Double-buffered particle state: one `BufferPair` per channel (ping-pong
// READ/WRITE textures) and the `BufferSet` that swaps all four together.
// ============================================================================

use crate::device::{Channel, GpuDevice, TexelFormat, TextureDesc};
use crate::error::StreamError;

// ======================== BufferPair ========================

/// Two equally sized render targets whose READ/WRITE roles alternate.
///
/// The two slots never alias: the kernel samples READ while rendering into
/// WRITE.
pub struct BufferPair<T> {
    label: &'static str,
    slots: Option<[T; 2]>,
    // Ping-pong index of the READ slot: 0 or 1
    read: usize,
    swaps: u64,
}

impl<T> BufferPair<T> {
    pub fn new(label: &'static str) -> Self {
        Self {
            label,
            slots: None,
            read: 0,
            swaps: 0,
        }
    }

    pub fn label(&self) -> &'static str {
        self.label
    }

    pub fn is_allocated(&self) -> bool {
        self.slots.is_some()
    }

    /// Create both textures, replacing any previous pair. On failure nothing
    /// is left allocated.
    pub fn allocate<D>(
        &mut self,
        device: &mut D,
        width: u32,
        height: u32,
        format: TexelFormat,
    ) -> Result<(), StreamError>
    where
        D: GpuDevice<Texture = T>,
    {
        self.release(device);

        let desc = TextureDesc {
            label: self.label,
            width,
            height,
            format,
        };
        let first = device.create_state_texture(&desc)?;
        let second = match device.create_state_texture(&desc) {
            Ok(texture) => texture,
            Err(err) => {
                device.destroy_texture(first);
                return Err(err);
            }
        };

        self.slots = Some([first, second]);
        self.read = 0;
        self.swaps = 0;
        Ok(())
    }

    /// Destroy both textures. Safe to call when already released.
    pub fn release<D>(&mut self, device: &mut D)
    where
        D: GpuDevice<Texture = T>,
    {
        if let Some([a, b]) = self.slots.take() {
            device.destroy_texture(a);
            device.destroy_texture(b);
        }
    }

    /// Exchange READ and WRITE. Handle swap only; no texture is touched.
    pub fn swap(&mut self) -> Result<(), StreamError> {
        if self.slots.is_none() {
            return Err(StreamError::Unallocated(self.label));
        }
        self.read = 1 - self.read;
        self.swaps += 1;
        Ok(())
    }

    /// Texture holding the last committed state.
    pub fn read(&self) -> Option<&T> {
        self.slots.as_ref().map(|s| &s[self.read])
    }

    /// Scratch texture the next pass renders into.
    pub fn write(&self) -> Option<&T> {
        self.slots.as_ref().map(|s| &s[1 - self.read])
    }

    /// Swaps since the last allocation.
    pub fn generation(&self) -> u64 {
        self.swaps
    }
}

// ======================== BufferSet ========================

/// The four channel pairs forming one coherent per-particle state vector.
pub struct BufferSet<T> {
    pairs: [BufferPair<T>; 4],
    width: u32,
    height: u32,
}

impl<T> Default for BufferSet<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> BufferSet<T> {
    pub fn new() -> Self {
        Self {
            pairs: [
                BufferPair::new("state_position"),
                BufferPair::new("state_velocity"),
                BufferPair::new("state_color"),
                BufferPair::new("state_scale"),
            ],
            width: 0,
            height: 0,
        }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn is_allocated(&self) -> bool {
        self.pairs.iter().all(BufferPair::is_allocated)
    }

    pub fn pair(&self, channel: Channel) -> &BufferPair<T> {
        &self.pairs[channel.index()]
    }

    /// Allocate all four pairs or none of them.
    pub fn allocate<D>(&mut self, device: &mut D, width: u32, height: u32) -> Result<(), StreamError>
    where
        D: GpuDevice<Texture = T>,
    {
        for i in 0..self.pairs.len() {
            if let Err(err) = self.pairs[i].allocate(device, width, height, TexelFormat::StateHalf) {
                self.release(device);
                return Err(err);
            }
        }
        self.width = width;
        self.height = height;
        log::debug!("Allocated state buffers: 4 x 2 x {}x{}", width, height);
        Ok(())
    }

    pub fn release<D>(&mut self, device: &mut D)
    where
        D: GpuDevice<Texture = T>,
    {
        for pair in &mut self.pairs {
            pair.release(device);
        }
        self.width = 0;
        self.height = 0;
    }

    /// Swap every channel in the same call; fails without swapping anything
    /// if any pair is unallocated.
    pub fn swap(&mut self) -> Result<(), StreamError> {
        if let Some(missing) = self.pairs.iter().find(|p| !p.is_allocated()) {
            return Err(StreamError::Unallocated(missing.label()));
        }
        for pair in &mut self.pairs {
            pair.swap()?;
        }
        Ok(())
    }

    pub fn read_textures(&self) -> Result<[&T; 4], StreamError> {
        self.collect(BufferPair::read)
    }

    pub fn write_textures(&self) -> Result<[&T; 4], StreamError> {
        self.collect(BufferPair::write)
    }

    pub fn write(&self, channel: Channel) -> Result<&T, StreamError> {
        let pair = self.pair(channel);
        pair.write().ok_or(StreamError::Unallocated(pair.label()))
    }

    /// Shared swap count, or `None` if the channels have diverged.
    pub fn generation(&self) -> Option<u64> {
        let first = self.pairs[0].generation();
        self.pairs
            .iter()
            .all(|p| p.generation() == first)
            .then_some(first)
    }

    fn collect<'a>(
        &'a self,
        pick: impl Fn(&'a BufferPair<T>) -> Option<&'a T>,
    ) -> Result<[&'a T; 4], StreamError> {
        let [p, v, c, s] = &self.pairs;
        let get = |pair: &'a BufferPair<T>| pick(pair).ok_or(StreamError::Unallocated(pair.label()));
        Ok([get(p)?, get(v)?, get(c)?, get(s)?])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{RecordingDevice, TexHandle};
    use proptest::prelude::*;

    fn allocated_pair(device: &mut RecordingDevice) -> BufferPair<TexHandle> {
        let mut pair = BufferPair::new("test_pair");
        pair.allocate(device, 4, 2, TexelFormat::StateHalf).unwrap();
        pair
    }

    #[test]
    fn double_swap_restores_roles() {
        let mut device = RecordingDevice::default();
        let mut pair = allocated_pair(&mut device);
        let (read, write) = (*pair.read().unwrap(), *pair.write().unwrap());
        assert_ne!(read, write);

        pair.swap().unwrap();
        assert_eq!(*pair.read().unwrap(), write);
        assert_eq!(*pair.write().unwrap(), read);

        pair.swap().unwrap();
        assert_eq!(*pair.read().unwrap(), read);
        assert_eq!(*pair.write().unwrap(), write);
        assert_eq!(pair.generation(), 2);
    }

    #[test]
    fn swap_does_not_touch_device() {
        let mut device = RecordingDevice::default();
        let mut pair = allocated_pair(&mut device);
        let created = device.textures_created;
        pair.swap().unwrap();
        assert_eq!(device.textures_created, created);
        assert_eq!(device.live_textures.len(), 2);
    }

    #[test]
    fn release_is_idempotent() {
        let mut device = RecordingDevice::default();
        let mut pair = allocated_pair(&mut device);
        pair.release(&mut device);
        pair.release(&mut device);
        assert!(!pair.is_allocated());
        assert!(device.live_textures.is_empty());
        assert!(matches!(pair.swap(), Err(StreamError::Unallocated("test_pair"))));
    }

    #[test]
    fn reallocation_destroys_previous_textures() {
        let mut device = RecordingDevice::default();
        let mut pair = allocated_pair(&mut device);
        pair.allocate(&mut device, 8, 8, TexelFormat::StateHalf).unwrap();
        assert_eq!(device.live_textures.len(), 2);
        assert_eq!(device.textures_created, 4);
    }

    #[test]
    fn failed_second_texture_rolls_back_first() {
        let mut device = RecordingDevice::failing_texture_at(1);
        let mut pair = BufferPair::new("rollback");
        let err = pair.allocate(&mut device, 4, 4, TexelFormat::StateHalf);
        assert!(matches!(err, Err(StreamError::ResourceAllocation { .. })));
        assert!(!pair.is_allocated());
        assert!(device.live_textures.is_empty());
    }

    #[test]
    fn texture_taller_than_device_limit_is_rejected() {
        let mut device = RecordingDevice::default();
        let mut pair = BufferPair::new("tall");
        let err = pair.allocate(&mut device, 4, 9000, TexelFormat::StateHalf);
        assert!(matches!(err, Err(StreamError::ResourceAllocation { height: 9000, .. })));
        assert!(device.live_textures.is_empty());
    }

    #[test]
    fn set_swaps_channels_together() {
        let mut device = RecordingDevice::default();
        let mut set = BufferSet::new();
        set.allocate(&mut device, 4, 4).unwrap();
        assert_eq!(set.generation(), Some(0));
        for _ in 0..3 {
            set.swap().unwrap();
        }
        assert_eq!(set.generation(), Some(3));
        assert_eq!(device.live_textures.len(), 8);
    }

    #[test]
    fn set_allocation_is_all_or_nothing() {
        // Fail on the 6th texture: position, velocity done, color half-made.
        let mut device = RecordingDevice::failing_texture_at(5);
        let mut set: BufferSet<TexHandle> = BufferSet::new();
        assert!(set.allocate(&mut device, 16, 16).is_err());
        assert!(!set.is_allocated());
        assert!(device.live_textures.is_empty());
        assert!(set.swap().is_err());
        assert_eq!(set.dimensions(), (0, 0));
    }

    proptest! {
        #[test]
        fn roles_follow_swap_parity(swaps in 0u32..64, width in 1u32..512, height in 1u32..512) {
            let mut device = RecordingDevice::default();
            let mut pair = BufferPair::new("parity");
            pair.allocate(&mut device, width, height, TexelFormat::StateHalf).unwrap();
            let (read, write) = (*pair.read().unwrap(), *pair.write().unwrap());
            for _ in 0..swaps {
                pair.swap().unwrap();
            }
            let expected = if swaps % 2 == 0 { (read, write) } else { (write, read) };
            prop_assert_eq!((*pair.read().unwrap(), *pair.write().unwrap()), expected);
            prop_assert_eq!(pair.generation(), swaps as u64);
            prop_assert_eq!(device.live_textures.len(), 2);
        }
    }

    #[test]
    fn read_and_write_sets_are_disjoint() {
        let mut device = RecordingDevice::default();
        let mut set = BufferSet::new();
        set.allocate(&mut device, 2, 2).unwrap();
        let read = set.read_textures().unwrap();
        let write = set.write_textures().unwrap();
        for r in read {
            assert!(!write.contains(&r));
        }
    }
}
