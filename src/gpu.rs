// ============================================================================
// gpu.rs — Linestream
// `WgpuDevice`: the wgpu implementation of `GpuDevice`. Kernel passes and draws
// are recorded into one command encoder per frame, bracketed by
// `begin_frame` / `end_frame`.
// ============================================================================

use wgpu::util::DeviceExt;

use crate::device::{
    DeviceLimits, DrawBindings, GpuDevice, KernelBindings, KernelPass, OverlayRect, TexelFormat,
    TextureDesc,
};
use crate::error::StreamError;
use crate::pipeline::{
    bg_buffer, bg_texture, create_debug_pipeline, create_kernel_pipelines,
    create_particle_pipeline, DebugPipeline, KernelPipelines, KernelUniforms, ParticleGlobals,
    ParticlePipeline, TileUniforms, STATE_FORMAT,
};
use crate::tiler::{MeshIndices, TileDraw, TiledMesh};

const CLEAR_COLOR: wgpu::Color = wgpu::Color {
    r: 0.02,
    g: 0.02,
    b: 0.05,
    a: 1.0,
};

// ======================== Handles ========================

pub struct WgpuTexture {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    desc: TextureDesc,
}

pub struct WgpuMesh {
    vertex_buffer: wgpu::Buffer,
    index_buffer: wgpu::Buffer,
    index_format: wgpu::IndexFormat,
    index_count: u32,
}

struct FrameTarget {
    view: wgpu::TextureView,
    width: u32,
    height: u32,
    cleared: bool,
}

// ======================== Device ========================

pub struct WgpuDevice {
    device: wgpu::Device,
    queue: wgpu::Queue,

    kernel: KernelPipelines,
    particle: ParticlePipeline,
    debug: DebugPipeline,

    kernel_bind_group: Option<wgpu::BindGroup>,
    /// Per-instance pool of per-tile uniforms, one aligned slot per tile.
    tile_buffer: wgpu::Buffer,
    tile_capacity: u32,
    tile_stride: u32,

    view_proj: glam::Mat4,
    encoder: Option<wgpu::CommandEncoder>,
    frame: Option<FrameTarget>,
}

impl WgpuDevice {
    pub fn new(device: wgpu::Device, queue: wgpu::Queue, target_format: wgpu::TextureFormat) -> Self {
        let kernel = create_kernel_pipelines(&device);
        let particle = create_particle_pipeline(&device, target_format);
        let debug = create_debug_pipeline(&device, target_format);

        let align = device.limits().min_uniform_buffer_offset_alignment;
        let tile_stride = (std::mem::size_of::<TileUniforms>() as u32).div_ceil(align) * align;
        let tile_capacity = 1;
        let tile_buffer = create_tile_buffer(&device, tile_stride, tile_capacity);

        Self {
            device,
            queue,
            kernel,
            particle,
            debug,
            kernel_bind_group: None,
            tile_buffer,
            tile_capacity,
            tile_stride,
            view_proj: glam::Mat4::IDENTITY,
            encoder: None,
            frame: None,
        }
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    pub fn set_view_proj(&mut self, view_proj: glam::Mat4) {
        self.view_proj = view_proj;
    }

    /// Start recording a frame that renders into `view`.
    pub fn begin_frame(&mut self, view: wgpu::TextureView, width: u32, height: u32) {
        if self.encoder.is_some() {
            log::warn!("begin_frame called twice; discarding the unfinished frame");
        }
        self.encoder = Some(
            self.device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("stream_encoder"),
                }),
        );
        self.frame = Some(FrameTarget {
            view,
            width: width.max(1),
            height: height.max(1),
            cleared: false,
        });
    }

    /// Finish the frame. The target is cleared if nothing was drawn into it.
    pub fn end_frame(&mut self) -> Option<wgpu::CommandBuffer> {
        let mut encoder = self.encoder.take()?;
        if let Some(frame) = self.frame.take() {
            if !frame.cleared {
                let _pass = target_pass(&mut encoder, &frame.view, true, "clear_pass");
            }
        }
        self.kernel_bind_group = None;
        Some(encoder.finish())
    }

    /// Create, then confirm with error scopes that the device accepted it.
    fn checked<R>(
        &self,
        label: &'static str,
        width: u32,
        height: u32,
        create: impl FnOnce(&wgpu::Device) -> R,
    ) -> Result<R, (R, StreamError)> {
        self.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let resource = create(&self.device);
        let validation = pollster::block_on(self.device.pop_error_scope());
        let oom = pollster::block_on(self.device.pop_error_scope());
        match validation.or(oom) {
            None => Ok(resource),
            Some(err) => {
                let err = StreamError::allocation(label, width, height, err.to_string());
                Err((resource, err))
            }
        }
    }

    fn check_dimensions(&self, desc: &TextureDesc) -> Result<(), StreamError> {
        let max = self.device.limits().max_texture_dimension_2d;
        if desc.width == 0 || desc.height == 0 || desc.width > max || desc.height > max {
            return Err(StreamError::allocation(
                desc.label,
                desc.width,
                desc.height,
                format!("outside device texture limit of {max}"),
            ));
        }
        Ok(())
    }

    fn ensure_tile_capacity(&mut self, tiles: u32) {
        if tiles <= self.tile_capacity {
            return;
        }
        self.tile_buffer.destroy();
        self.tile_capacity = tiles.next_power_of_two();
        self.tile_buffer = create_tile_buffer(&self.device, self.tile_stride, self.tile_capacity);
        log::debug!("Tile uniform pool grown to {} slots", self.tile_capacity);
    }
}

impl GpuDevice for WgpuDevice {
    type Texture = WgpuTexture;
    type Mesh = WgpuMesh;

    fn limits(&self) -> DeviceLimits {
        DeviceLimits {
            max_texture_dimension: self.device.limits().max_texture_dimension_2d,
        }
    }

    fn create_state_texture(&mut self, desc: &TextureDesc) -> Result<WgpuTexture, StreamError> {
        self.check_dimensions(desc)?;
        let texture = self
            .checked(desc.label, desc.width, desc.height, |device| {
                device.create_texture(&wgpu::TextureDescriptor {
                    label: Some(desc.label),
                    size: extent(desc),
                    mip_level_count: 1,
                    sample_count: 1,
                    dimension: wgpu::TextureDimension::D2,
                    format: texel_format(desc.format),
                    usage: wgpu::TextureUsages::RENDER_ATTACHMENT
                        | wgpu::TextureUsages::TEXTURE_BINDING
                        | wgpu::TextureUsages::COPY_SRC,
                    view_formats: &[],
                })
            })
            .map_err(|(texture, err)| {
                texture.destroy();
                err
            })?;
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        Ok(WgpuTexture {
            texture,
            view,
            desc: *desc,
        })
    }

    fn create_lookup_texture(
        &mut self,
        desc: &TextureDesc,
        texels: &[f32],
    ) -> Result<WgpuTexture, StreamError> {
        self.check_dimensions(desc)?;
        let expected = (desc.width * desc.height) as usize * desc.format.components();
        if texels.len() != expected {
            return Err(StreamError::allocation(
                desc.label,
                desc.width,
                desc.height,
                format!("expected {expected} floats, got {}", texels.len()),
            ));
        }

        let texture = self
            .checked(desc.label, desc.width, desc.height, |device| {
                device.create_texture(&wgpu::TextureDescriptor {
                    label: Some(desc.label),
                    size: extent(desc),
                    mip_level_count: 1,
                    sample_count: 1,
                    dimension: wgpu::TextureDimension::D2,
                    format: texel_format(desc.format),
                    usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
                    view_formats: &[],
                })
            })
            .map_err(|(texture, err)| {
                texture.destroy();
                err
            })?;

        let bytes_per_texel = desc.format.components() as u32 * 4;
        self.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            bytemuck::cast_slice(texels),
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(desc.width * bytes_per_texel),
                rows_per_image: Some(desc.height),
            },
            extent(desc),
        );

        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        Ok(WgpuTexture {
            texture,
            view,
            desc: *desc,
        })
    }

    fn destroy_texture(&mut self, texture: WgpuTexture) {
        let desc = texture.desc;
        log::trace!("Destroying {} ({}x{})", desc.label, desc.width, desc.height);
        texture.texture.destroy();
    }

    fn create_mesh(&mut self, mesh: &TiledMesh) -> Result<WgpuMesh, StreamError> {
        let width = mesh.layout.buffer_width;
        let rows = mesh.layout.rows_per_tile;

        let vertex_buffer = self
            .checked("tile_mesh_vertices", width, rows, |device| {
                device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                    label: Some("tile_mesh_vertices"),
                    contents: bytemuck::cast_slice(&mesh.vertices),
                    usage: wgpu::BufferUsages::VERTEX,
                })
            })
            .map_err(|(buffer, err)| {
                buffer.destroy();
                err
            })?;

        let (contents, index_format): (&[u8], _) = match &mesh.indices {
            MeshIndices::U16(indices) => (bytemuck::cast_slice(indices), wgpu::IndexFormat::Uint16),
            MeshIndices::U32(indices) => (bytemuck::cast_slice(indices), wgpu::IndexFormat::Uint32),
        };
        // wgpu requires index buffers padded to four bytes.
        let mut padded = contents.to_vec();
        padded.resize(contents.len().next_multiple_of(4), 0);

        let index_buffer = match self.checked("tile_mesh_indices", width, rows, |device| {
            device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("tile_mesh_indices"),
                contents: &padded,
                usage: wgpu::BufferUsages::INDEX,
            })
        }) {
            Ok(buffer) => buffer,
            Err((buffer, err)) => {
                buffer.destroy();
                vertex_buffer.destroy();
                return Err(err);
            }
        };

        log::debug!(
            "Uploaded tile mesh: {} vertices, {} indices ({:?})",
            mesh.vertices.len(),
            mesh.indices.len(),
            index_format
        );
        Ok(WgpuMesh {
            vertex_buffer,
            index_buffer,
            index_format,
            index_count: mesh.indices.len() as u32,
        })
    }

    fn destroy_mesh(&mut self, mesh: WgpuMesh) {
        mesh.vertex_buffer.destroy();
        mesh.index_buffer.destroy();
    }

    fn bind_kernel(&mut self, bindings: &KernelBindings<'_, WgpuTexture>) {
        let p = &bindings.params;
        let uniforms = KernelUniforms {
            emitter_position: [p.emitter_position[0], p.emitter_position[1], p.emitter_position[2], 0.0],
            emitter_size: [p.emitter_size[0], p.emitter_size[1], p.emitter_size[2], 0.0],
            noise: [p.noise_frequency, p.noise_amplitude, p.noise_speed, 0.0],
            sim: [p.life, p.delta, p.elapsed, 0.0],
            seed: [p.random_seed, p.tick, 0, 0],
        };
        self.queue
            .write_buffer(&self.kernel.uniform_buffer, 0, bytemuck::bytes_of(&uniforms));

        let [position, velocity, color, scale] = bindings.state;
        self.kernel_bind_group = Some(self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("kernel_bg"),
            layout: &self.kernel.bgl,
            entries: &[
                bg_buffer(0, &self.kernel.uniform_buffer),
                bg_texture(1, &position.view),
                bg_texture(2, &velocity.view),
                bg_texture(3, &color.view),
                bg_texture(4, &scale.view),
                bg_texture(5, &bindings.color_table.view),
                bg_texture(6, &bindings.size_table.view),
            ],
        }));
    }

    fn kernel_pass(&mut self, pass: KernelPass, target: &WgpuTexture) {
        let (Some(encoder), Some(bind_group)) = (self.encoder.as_mut(), self.kernel_bind_group.as_ref())
        else {
            log::warn!("Kernel pass {} outside a frame; skipped", pass.index());
            return;
        };
        let mut rpass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("kernel_pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: &target.view,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        rpass.set_pipeline(&self.kernel.passes[pass.index()]);
        rpass.set_bind_group(0, bind_group, &[]);
        rpass.draw(0..3, 0..1);
    }

    fn draw_tiles(
        &mut self,
        mesh: &WgpuMesh,
        bindings: &DrawBindings<'_, WgpuTexture>,
        tiles: &[TileDraw],
    ) {
        if tiles.is_empty() {
            return;
        }
        let Some((width, height)) = self.frame.as_ref().map(|f| (f.width, f.height)) else {
            log::warn!("draw_tiles outside a frame; skipped");
            return;
        };

        let globals = ParticleGlobals {
            view_proj: self.view_proj.to_cols_array_2d(),
            buffer_size: [bindings.buffer_width, bindings.buffer_height],
            viewport: [width as f32, height as f32],
            limit: bindings.particle_limit,
            line_width: bindings.line_width,
            _pad: [0.0; 2],
        };
        self.queue
            .write_buffer(&self.particle.globals_buffer, 0, bytemuck::bytes_of(&globals));

        self.ensure_tile_capacity(tiles.len() as u32);
        let stride = self.tile_stride as usize;
        let mut pool = vec![0u8; stride * tiles.len()];
        for (slot, tile) in pool.chunks_exact_mut(stride).zip(tiles) {
            let uniforms = TileUniforms {
                row_offset: tile.row_offset,
                row_scale: tile.row_scale,
                _pad: [0.0; 2],
            };
            slot[..std::mem::size_of::<TileUniforms>()].copy_from_slice(bytemuck::bytes_of(&uniforms));
        }
        self.queue.write_buffer(&self.tile_buffer, 0, &pool);

        let [position, velocity, color, scale] = bindings.state;
        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("particle_bg"),
            layout: &self.particle.bgl,
            entries: &[
                bg_buffer(0, &self.particle.globals_buffer),
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                        buffer: &self.tile_buffer,
                        offset: 0,
                        size: wgpu::BufferSize::new(std::mem::size_of::<TileUniforms>() as u64),
                    }),
                },
                bg_texture(2, &position.view),
                bg_texture(3, &velocity.view),
                bg_texture(4, &color.view),
                bg_texture(5, &scale.view),
                wgpu::BindGroupEntry {
                    binding: 6,
                    resource: wgpu::BindingResource::Sampler(&self.particle.sampler),
                },
            ],
        });

        let (Some(encoder), Some(frame)) = (self.encoder.as_mut(), self.frame.as_mut()) else {
            return;
        };
        let mut rpass = target_pass(encoder, &frame.view, !frame.cleared, "particle_pass");
        frame.cleared = true;
        rpass.set_pipeline(&self.particle.pipeline);
        rpass.set_vertex_buffer(0, mesh.vertex_buffer.slice(..));
        rpass.set_index_buffer(mesh.index_buffer.slice(..), mesh.index_format);
        for tile in tiles {
            rpass.set_bind_group(0, &bind_group, &[tile.index * self.tile_stride]);
            rpass.draw_indexed(0..mesh.index_count, 0, 0..1);
        }
    }

    fn draw_debug_overlay(&mut self, position: &WgpuTexture, rect: OverlayRect) {
        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("debug_bg"),
            layout: &self.debug.bgl,
            entries: &[bg_texture(0, &position.view)],
        });
        let (Some(encoder), Some(frame)) = (self.encoder.as_mut(), self.frame.as_mut()) else {
            log::warn!("Debug overlay outside a frame; skipped");
            return;
        };

        let x = rect.x.clamp(0.0, frame.width as f32 - 1.0);
        let y = rect.y.clamp(0.0, frame.height as f32 - 1.0);
        let w = rect.width.min(frame.width as f32 - x).max(1.0);
        let h = rect.height.min(frame.height as f32 - y).max(1.0);

        let mut rpass = target_pass(encoder, &frame.view, !frame.cleared, "debug_overlay_pass");
        frame.cleared = true;
        rpass.set_viewport(x, y, w, h, 0.0, 1.0);
        rpass.set_pipeline(&self.debug.pipeline);
        rpass.set_bind_group(0, &bind_group, &[]);
        rpass.draw(0..3, 0..1);
    }
}

// ======================== Helpers ========================

fn target_pass<'e>(
    encoder: &'e mut wgpu::CommandEncoder,
    view: &wgpu::TextureView,
    clear: bool,
    label: &'static str,
) -> wgpu::RenderPass<'e> {
    let load = if clear {
        wgpu::LoadOp::Clear(CLEAR_COLOR)
    } else {
        wgpu::LoadOp::Load
    };
    encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
        label: Some(label),
        color_attachments: &[Some(wgpu::RenderPassColorAttachment {
            view,
            resolve_target: None,
            ops: wgpu::Operations {
                load,
                store: wgpu::StoreOp::Store,
            },
        })],
        depth_stencil_attachment: None,
        timestamp_writes: None,
        occlusion_query_set: None,
    })
}

fn create_tile_buffer(device: &wgpu::Device, stride: u32, capacity: u32) -> wgpu::Buffer {
    device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("tile_uniforms"),
        size: u64::from(stride) * u64::from(capacity),
        usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    })
}

fn texel_format(format: TexelFormat) -> wgpu::TextureFormat {
    match format {
        TexelFormat::StateHalf => STATE_FORMAT,
        TexelFormat::LookupRgba => wgpu::TextureFormat::Rgba32Float,
        TexelFormat::LookupR => wgpu::TextureFormat::R32Float,
    }
}

fn extent(desc: &TextureDesc) -> wgpu::Extent3d {
    wgpu::Extent3d {
        width: desc.width,
        height: desc.height,
        depth_or_array_layers: 1,
    }
}
