// ============================================================================
// pipeline.rs — Linestream
// GPU pipeline creation (kernel, particle, debug) and bind-group-layout helpers.
// ============================================================================

use crate::device::{Channel, KernelPass, KernelVariant};
use crate::tiler::MeshVertex;

/// Format of every state texture.
pub const STATE_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba16Float;

// ======================== Uniforms ========================

/// Scalars shared by the eight kernel passes.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, bytemuck::Pod, bytemuck::Zeroable)]
pub struct KernelUniforms {
    pub emitter_position: [f32; 4],
    pub emitter_size: [f32; 4],
    /// frequency, amplitude, speed, unused
    pub noise: [f32; 4],
    /// life, dt, elapsed, unused
    pub sim: [f32; 4],
    /// seed, tick, unused, unused
    pub seed: [u32; 4],
}

/// Per-frame inputs of the particle material.
#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub struct ParticleGlobals {
    pub view_proj: [[f32; 4]; 4],
    pub buffer_size: [u32; 2],
    pub viewport: [f32; 2],
    pub limit: u32,
    pub line_width: f32,
    pub _pad: [f32; 2],
}

/// Per-tile row mapping, read through a dynamic uniform offset.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, bytemuck::Pod, bytemuck::Zeroable)]
pub struct TileUniforms {
    pub row_offset: f32,
    pub row_scale: f32,
    pub _pad: [f32; 2],
}

// ======================== Pipelines ========================

/// One render pipeline per kernel pass, indexed by [`KernelPass::index`].
pub struct KernelPipelines {
    pub bgl: wgpu::BindGroupLayout,
    pub passes: Vec<wgpu::RenderPipeline>,
    pub uniform_buffer: wgpu::Buffer,
}

pub struct ParticlePipeline {
    pub bgl: wgpu::BindGroupLayout,
    pub pipeline: wgpu::RenderPipeline,
    pub globals_buffer: wgpu::Buffer,
    pub sampler: wgpu::Sampler,
}

pub struct DebugPipeline {
    pub bgl: wgpu::BindGroupLayout,
    pub pipeline: wgpu::RenderPipeline,
}

// ======================== Pipeline Creation ========================

pub fn create_kernel_pipelines(device: &wgpu::Device) -> KernelPipelines {
    let shader = load_shader(device, "kernel", include_str!("shaders/kernel.wgsl"));

    let bgl = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some("kernel_bgl"),
        entries: &[
            bgl_uniform(0, wgpu::ShaderStages::FRAGMENT, false),
            bgl_texture(1, wgpu::ShaderStages::FRAGMENT),
            bgl_texture(2, wgpu::ShaderStages::FRAGMENT),
            bgl_texture(3, wgpu::ShaderStages::FRAGMENT),
            bgl_texture(4, wgpu::ShaderStages::FRAGMENT),
            bgl_texture(5, wgpu::ShaderStages::FRAGMENT),
            bgl_texture(6, wgpu::ShaderStages::FRAGMENT),
        ],
    });

    let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some("kernel_pipeline_layout"),
        bind_group_layouts: &[&bgl],
        push_constant_ranges: &[],
    });

    let mut passes = Vec::with_capacity(KernelPass::COUNT);
    for variant in [KernelVariant::Init, KernelVariant::Step] {
        for channel in Channel::ALL {
            let pass = KernelPass::new(variant, channel);
            let entry = kernel_entry_point(pass);
            passes.push(device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some(entry.as_str()),
                layout: Some(&layout),
                vertex: wgpu::VertexState {
                    module: &shader,
                    entry_point: Some("vs_fullscreen"),
                    buffers: &[],
                    compilation_options: Default::default(),
                },
                fragment: Some(wgpu::FragmentState {
                    module: &shader,
                    entry_point: Some(entry.as_str()),
                    targets: &[Some(wgpu::ColorTargetState {
                        format: STATE_FORMAT,
                        blend: None,
                        write_mask: wgpu::ColorWrites::ALL,
                    })],
                    compilation_options: Default::default(),
                }),
                primitive: wgpu::PrimitiveState::default(),
                depth_stencil: None,
                multisample: wgpu::MultisampleState::default(),
                multiview: None,
                cache: None,
            }));
        }
    }

    let uniform_buffer = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("kernel_uniforms"),
        size: std::mem::size_of::<KernelUniforms>() as u64,
        usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    });

    KernelPipelines {
        bgl,
        passes,
        uniform_buffer,
    }
}

/// Fragment entry point of `pass` in `kernel.wgsl`.
pub fn kernel_entry_point(pass: KernelPass) -> String {
    let prefix = match pass.variant {
        KernelVariant::Init => "init",
        KernelVariant::Step => "step",
    };
    format!("{prefix}_{}", pass.channel.label())
}

pub fn create_particle_pipeline(
    device: &wgpu::Device,
    target_format: wgpu::TextureFormat,
) -> ParticlePipeline {
    let shader = load_shader(device, "particle", include_str!("shaders/particle.wgsl"));

    let bgl = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some("particle_bgl"),
        entries: &[
            bgl_uniform(0, wgpu::ShaderStages::VERTEX, false),
            bgl_uniform(1, wgpu::ShaderStages::VERTEX, true),
            bgl_texture(2, wgpu::ShaderStages::VERTEX),
            bgl_texture(3, wgpu::ShaderStages::VERTEX),
            bgl_texture(4, wgpu::ShaderStages::VERTEX),
            bgl_texture(5, wgpu::ShaderStages::VERTEX),
            wgpu::BindGroupLayoutEntry {
                binding: 6,
                visibility: wgpu::ShaderStages::VERTEX,
                ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::NonFiltering),
                count: None,
            },
        ],
    });

    let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some("particle_pipeline_layout"),
        bind_group_layouts: &[&bgl],
        push_constant_ranges: &[],
    });

    let vertex_layout = wgpu::VertexBufferLayout {
        array_stride: std::mem::size_of::<MeshVertex>() as u64,
        step_mode: wgpu::VertexStepMode::Vertex,
        attributes: &wgpu::vertex_attr_array![0 => Float32, 1 => Float32x2],
    };

    let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: Some("particle_pipeline"),
        layout: Some(&layout),
        vertex: wgpu::VertexState {
            module: &shader,
            entry_point: Some("vs_main"),
            buffers: &[vertex_layout],
            compilation_options: Default::default(),
        },
        fragment: Some(wgpu::FragmentState {
            module: &shader,
            entry_point: Some("fs_main"),
            targets: &[Some(wgpu::ColorTargetState {
                format: target_format,
                blend: Some(wgpu::BlendState::ALPHA_BLENDING),
                write_mask: wgpu::ColorWrites::ALL,
            })],
            compilation_options: Default::default(),
        }),
        primitive: wgpu::PrimitiveState {
            topology: wgpu::PrimitiveTopology::TriangleList,
            cull_mode: None,
            ..Default::default()
        },
        depth_stencil: None,
        multisample: wgpu::MultisampleState::default(),
        multiview: None,
        cache: None,
    });

    let globals_buffer = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("particle_globals"),
        size: std::mem::size_of::<ParticleGlobals>() as u64,
        usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    });

    // Point sampling with repeat addressing.
    let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
        label: Some("state_sampler"),
        address_mode_u: wgpu::AddressMode::Repeat,
        address_mode_v: wgpu::AddressMode::Repeat,
        address_mode_w: wgpu::AddressMode::Repeat,
        mag_filter: wgpu::FilterMode::Nearest,
        min_filter: wgpu::FilterMode::Nearest,
        mipmap_filter: wgpu::FilterMode::Nearest,
        ..Default::default()
    });

    ParticlePipeline {
        bgl,
        pipeline,
        globals_buffer,
        sampler,
    }
}

pub fn create_debug_pipeline(
    device: &wgpu::Device,
    target_format: wgpu::TextureFormat,
) -> DebugPipeline {
    let shader = load_shader(device, "debug", include_str!("shaders/debug.wgsl"));

    let bgl = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some("debug_bgl"),
        entries: &[bgl_texture(0, wgpu::ShaderStages::FRAGMENT)],
    });

    let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some("debug_pipeline_layout"),
        bind_group_layouts: &[&bgl],
        push_constant_ranges: &[],
    });

    let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: Some("debug_pipeline"),
        layout: Some(&layout),
        vertex: wgpu::VertexState {
            module: &shader,
            entry_point: Some("vs_main"),
            buffers: &[],
            compilation_options: Default::default(),
        },
        fragment: Some(wgpu::FragmentState {
            module: &shader,
            entry_point: Some("fs_main"),
            targets: &[Some(wgpu::ColorTargetState {
                format: target_format,
                blend: Some(wgpu::BlendState::REPLACE),
                write_mask: wgpu::ColorWrites::ALL,
            })],
            compilation_options: Default::default(),
        }),
        primitive: wgpu::PrimitiveState::default(),
        depth_stencil: None,
        multisample: wgpu::MultisampleState::default(),
        multiview: None,
        cache: None,
    });

    DebugPipeline { bgl, pipeline }
}

// ======================== Helpers ========================

fn load_shader(device: &wgpu::Device, label: &str, source: &str) -> wgpu::ShaderModule {
    device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some(label),
        source: wgpu::ShaderSource::Wgsl(source.into()),
    })
}

fn bgl_uniform(
    binding: u32,
    visibility: wgpu::ShaderStages,
    has_dynamic_offset: bool,
) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset,
            min_binding_size: None,
        },
        count: None,
    }
}

/// Unfilterable float texture; state and lookup textures are read with
/// `textureLoad` or a point sampler only.
fn bgl_texture(binding: u32, visibility: wgpu::ShaderStages) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility,
        ty: wgpu::BindingType::Texture {
            sample_type: wgpu::TextureSampleType::Float { filterable: false },
            view_dimension: wgpu::TextureViewDimension::D2,
            multisampled: false,
        },
        count: None,
    }
}

pub fn bg_buffer(binding: u32, buffer: &wgpu::Buffer) -> wgpu::BindGroupEntry<'_> {
    wgpu::BindGroupEntry {
        binding,
        resource: buffer.as_entire_binding(),
    }
}

pub fn bg_texture(binding: u32, view: &wgpu::TextureView) -> wgpu::BindGroupEntry<'_> {
    wgpu::BindGroupEntry {
        binding,
        resource: wgpu::BindingResource::TextureView(view),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uniform_layouts_match_wgsl_sizes() {
        assert_eq!(std::mem::size_of::<KernelUniforms>(), 80);
        assert_eq!(std::mem::size_of::<ParticleGlobals>(), 96);
        assert_eq!(std::mem::size_of::<TileUniforms>(), 16);
    }

    #[test]
    fn entry_points_follow_pass_order() {
        let names: Vec<String> = [KernelVariant::Init, KernelVariant::Step]
            .iter()
            .flat_map(|&v| Channel::ALL.map(|c| kernel_entry_point(KernelPass::new(v, c))))
            .collect();
        assert_eq!(names[0], "init_position");
        assert_eq!(names[3], "init_scale");
        assert_eq!(names[4], "step_position");
        assert_eq!(names[7], "step_scale");
    }
}
