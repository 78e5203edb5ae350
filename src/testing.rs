// ============================================================================
// testing.rs — Linestream
// `RecordingDevice`: an in-memory `GpuDevice` with integer handles that logs
// every call, for exercising the frame protocol without a GPU.
// ============================================================================

use std::collections::HashSet;

use crate::device::{
    DeviceLimits, DrawBindings, GpuDevice, KernelBindings, KernelParams, KernelPass, OverlayRect,
    TextureDesc,
};
use crate::error::StreamError;
use crate::tiler::{TileDraw, TiledMesh};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TexHandle(pub u32);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MeshHandle(pub u32);

#[derive(Clone, Debug)]
pub struct KernelRecord {
    pub pass: KernelPass,
    pub target: TexHandle,
    pub reads: [TexHandle; 4],
    pub params: KernelParams,
}

#[derive(Clone, Debug)]
pub struct DrawRecord {
    pub mesh: MeshHandle,
    pub sources: [TexHandle; 4],
    pub particle_limit: u32,
    pub cast_shadows: bool,
    pub tiles: Vec<TileDraw>,
}

#[derive(Default)]
pub struct RecordingDevice {
    pub limits: DeviceLimits,
    next_id: u32,
    pub live_textures: HashSet<TexHandle>,
    pub live_meshes: HashSet<MeshHandle>,
    pub textures_created: usize,
    pub meshes_created: usize,
    /// Zero-based index of the state-texture allocation that should fail.
    pub fail_texture_at: Option<usize>,
    pub lookups_created: usize,
    /// Zero-based index of the lookup-texture allocation that should fail.
    pub fail_lookup_at: Option<usize>,
    pub fail_mesh: bool,
    pub lookups: Vec<(TextureDesc, Vec<f32>)>,
    pub mesh_vertex_counts: Vec<usize>,
    bound: Option<([TexHandle; 4], KernelParams)>,
    pub kernels: Vec<KernelRecord>,
    pub draws: Vec<DrawRecord>,
    pub overlays: Vec<TexHandle>,
}

impl RecordingDevice {
    pub fn failing_texture_at(attempt: usize) -> Self {
        Self {
            fail_texture_at: Some(attempt),
            ..Self::default()
        }
    }

    pub fn failing_lookup_at(attempt: usize) -> Self {
        Self {
            fail_lookup_at: Some(attempt),
            ..Self::default()
        }
    }

    pub fn failing_mesh() -> Self {
        Self {
            fail_mesh: true,
            ..Self::default()
        }
    }

    fn exceeds_limits(&self, desc: &TextureDesc) -> bool {
        let max = self.limits.max_texture_dimension;
        desc.width > max || desc.height > max
    }

    fn next(&mut self) -> u32 {
        self.next_id += 1;
        self.next_id
    }

    pub fn clear_log(&mut self) {
        self.kernels.clear();
        self.draws.clear();
        self.overlays.clear();
    }
}

impl GpuDevice for RecordingDevice {
    type Texture = TexHandle;
    type Mesh = MeshHandle;

    fn limits(&self) -> DeviceLimits {
        self.limits
    }

    fn create_state_texture(&mut self, desc: &TextureDesc) -> Result<TexHandle, StreamError> {
        let attempt = self.textures_created;
        self.textures_created += 1;
        if self.fail_texture_at == Some(attempt) || self.exceeds_limits(desc) {
            return Err(StreamError::allocation(desc.label, desc.width, desc.height, "rejected"));
        }
        let handle = TexHandle(self.next());
        self.live_textures.insert(handle);
        Ok(handle)
    }

    fn create_lookup_texture(
        &mut self,
        desc: &TextureDesc,
        texels: &[f32],
    ) -> Result<TexHandle, StreamError> {
        let attempt = self.lookups_created;
        self.lookups_created += 1;
        if self.fail_lookup_at == Some(attempt) || self.exceeds_limits(desc) {
            return Err(StreamError::allocation(desc.label, desc.width, desc.height, "rejected"));
        }
        let handle = TexHandle(self.next());
        self.live_textures.insert(handle);
        self.lookups.push((*desc, texels.to_vec()));
        Ok(handle)
    }

    fn destroy_texture(&mut self, texture: TexHandle) {
        assert!(self.live_textures.remove(&texture), "double destroy of {texture:?}");
    }

    fn create_mesh(&mut self, mesh: &TiledMesh) -> Result<MeshHandle, StreamError> {
        if self.fail_mesh {
            return Err(StreamError::allocation(
                "tiled_mesh",
                mesh.vertices.len() as u32,
                1,
                "rejected",
            ));
        }
        let handle = MeshHandle(self.next());
        self.meshes_created += 1;
        self.mesh_vertex_counts.push(mesh.vertices.len());
        self.live_meshes.insert(handle);
        Ok(handle)
    }

    fn destroy_mesh(&mut self, mesh: MeshHandle) {
        assert!(self.live_meshes.remove(&mesh), "double destroy of {mesh:?}");
    }

    fn bind_kernel(&mut self, bindings: &KernelBindings<'_, TexHandle>) {
        let reads = bindings.state.map(|t| *t);
        self.bound = Some((reads, bindings.params));
    }

    fn kernel_pass(&mut self, pass: KernelPass, target: &TexHandle) {
        let (reads, params) = self.bound.expect("kernel pass without bound inputs");
        assert!(!reads.contains(target), "kernel pass renders into a sampled texture");
        self.kernels.push(KernelRecord {
            pass,
            target: *target,
            reads,
            params,
        });
    }

    fn draw_tiles(
        &mut self,
        mesh: &MeshHandle,
        bindings: &DrawBindings<'_, TexHandle>,
        tiles: &[TileDraw],
    ) {
        self.draws.push(DrawRecord {
            mesh: *mesh,
            sources: bindings.state.map(|t| *t),
            particle_limit: bindings.particle_limit,
            cast_shadows: bindings.cast_shadows,
            tiles: tiles.to_vec(),
        });
    }

    fn draw_debug_overlay(&mut self, position: &TexHandle, _rect: OverlayRect) {
        self.overlays.push(*position);
    }
}
