//! Render passes for an offloaded FFT chain tail.
//!
//! Every buffer lives in an `N x 1` single-channel float target. One update
//! runs up to four passes:
//!
//! ```text
//!   input ──dft──▶ accumulation (max blend) ──decay (add blend)──▶ history row
//!                                                                     │
//!   output texture ◀── copy ◀── result ◀──average over history rows ──┘
//! ```
//!
//! Max and add blending on `R32Float` needs `FLOAT32_BLENDABLE`; without it
//! the backend reports no offload support.
use transform::{OffloadTail, TransformParams};

use crate::backend::{BackendError, BackendResult};

const FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::R32Float;

const SHADER: &str = r#"
struct Params {
    len: u32,
    frames: u32,
    next: u32,
    windowed: u32,
    fft_scale: f32,
    fft_cutoff: f32,
    decay: f32,
    pad: f32,
}

@group(0) @binding(0) var<uniform> params: Params;
@group(0) @binding(1) var source: texture_2d<f32>;

const TAU: f32 = 6.283185307179586;

@vertex
fn vs_main(@builtin(vertex_index) index: u32) -> @builtin(position) vec4<f32> {
    let uv = vec2<f32>(f32((index << 1u) & 2u), f32(index & 2u));
    return vec4<f32>(uv * 2.0 - 1.0, 0.0, 1.0);
}

@fragment
fn dft(@builtin(position) position: vec4<f32>) -> @location(0) vec4<f32> {
    let texel = u32(position.x);
    let pairs = params.len / 2u;
    let bin = texel / 2u;
    var re = 0.0;
    var im = 0.0;
    for (var j = 0u; j < pairs; j++) {
        let angle = -TAU * f32((bin * j) % pairs) / f32(pairs);
        let xr = textureLoad(source, vec2<u32>(2u * j, 0u), 0).r;
        let xi = textureLoad(source, vec2<u32>(2u * j + 1u, 0u), 0).r;
        re += xr * cos(angle) - xi * sin(angle);
        im += xr * sin(angle) + xi * cos(angle);
    }
    var value = re;
    if (texel % 2u == 1u) {
        value = im;
    }
    let compressed = log(abs(value) + 1.0) / 3.0;
    let boost = max(f32(texel) / f32(params.len) * params.fft_scale + (1.0 - params.fft_cutoff), 1.0);
    return vec4<f32>(compressed * boost, 0.0, 0.0, 1.0);
}

@fragment
fn decay() -> @location(0) vec4<f32> {
    return vec4<f32>(-params.decay, 0.0, 0.0, 0.0);
}

fn weight(age: u32) -> f32 {
    if (params.windowed == 0u || params.frames < 2u) {
        return 1.0;
    }
    return 0.5 - 0.5 * cos(TAU * f32(age + 1u) / f32(params.frames + 1u));
}

@fragment
fn average(@builtin(position) position: vec4<f32>) -> @location(0) vec4<f32> {
    let texel = u32(position.x);
    var sum = 0.0;
    var total = 0.0;
    for (var age = 0u; age < params.frames; age++) {
        let row = (params.next + age) % params.frames;
        let w = weight(age);
        sum += w * textureLoad(source, vec2<u32>(texel, row), 0).r;
        total += w;
    }
    return vec4<f32>(sum / total, 0.0, 0.0, 1.0);
}
"#;

#[repr(C)]
#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
struct Params {
    len: u32,
    frames: u32,
    next: u32,
    windowed: u32,
    fft_scale: f32,
    fft_cutoff: f32,
    decay: f32,
    pad: f32,
}

/// Pipelines shared by every offloaded binding.
pub(crate) struct OffloadPipelines {
    layout: wgpu::BindGroupLayout,
    dft_replace: wgpu::RenderPipeline,
    dft_max: wgpu::RenderPipeline,
    decay: wgpu::RenderPipeline,
    average: wgpu::RenderPipeline,
}

fn blend(operation: wgpu::BlendOperation) -> wgpu::BlendState {
    let component = wgpu::BlendComponent {
        src_factor: wgpu::BlendFactor::One,
        dst_factor: wgpu::BlendFactor::One,
        operation,
    };
    wgpu::BlendState {
        color: component,
        alpha: component,
    }
}

impl OffloadPipelines {
    pub fn new(device: &wgpu::Device) -> BackendResult<Self> {
        device.push_error_scope(wgpu::ErrorFilter::Validation);
        let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("offload passes"),
            source: wgpu::ShaderSource::Wgsl(SHADER.into()),
        });
        let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("offload layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: false },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
            ],
        });
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("offload pipeline layout"),
            bind_group_layouts: &[&layout],
            push_constant_ranges: &[],
        });
        let pipeline = |label: &str, entry: &str, blend: wgpu::BlendState| {
            device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some(label),
                layout: Some(&pipeline_layout),
                vertex: wgpu::VertexState {
                    module: &module,
                    entry_point: Some("vs_main"),
                    buffers: &[],
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                },
                primitive: wgpu::PrimitiveState::default(),
                depth_stencil: None,
                multisample: wgpu::MultisampleState::default(),
                fragment: Some(wgpu::FragmentState {
                    module: &module,
                    entry_point: Some(entry),
                    targets: &[Some(wgpu::ColorTargetState {
                        format: FORMAT,
                        blend: Some(blend),
                        write_mask: wgpu::ColorWrites::RED,
                    })],
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                }),
                multiview: None,
                cache: None,
            })
        };
        let pipelines = Self {
            dft_replace: pipeline("offload dft", "dft", wgpu::BlendState::REPLACE),
            dft_max: pipeline("offload dft max", "dft", blend(wgpu::BlendOperation::Max)),
            decay: pipeline("offload decay", "decay", blend(wgpu::BlendOperation::Add)),
            average: pipeline("offload average", "average", wgpu::BlendState::REPLACE),
            layout,
        };
        if let Some(error) = pollster::block_on(device.pop_error_scope()) {
            return Err(BackendError::Device(error.to_string()));
        }
        Ok(pipelines)
    }
}

/// GPU resources and ring position of one offloaded binding.
pub(crate) struct GpuOffload {
    tail: OffloadTail,
    params: Params,
    slot: u32,
    uniforms: wgpu::Buffer,
    input: wgpu::Texture,
    accumulation: wgpu::Texture,
    accumulation_view: wgpu::TextureView,
    history: Option<wgpu::Texture>,
    result: wgpu::Texture,
    result_view: wgpu::TextureView,
    bridge: wgpu::Buffer,
    row_bytes: u32,
    dft_group: wgpu::BindGroup,
    average_group: Option<wgpu::BindGroup>,
}

fn float_texture(
    device: &wgpu::Device,
    label: &str,
    width: u32,
    height: u32,
    usage: wgpu::TextureUsages,
) -> wgpu::Texture {
    device.create_texture(&wgpu::TextureDescriptor {
        label: Some(label),
        size: wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: FORMAT,
        usage,
        view_formats: &[],
    })
}

fn bind_group(
    device: &wgpu::Device,
    pipelines: &OffloadPipelines,
    uniforms: &wgpu::Buffer,
    view: &wgpu::TextureView,
) -> wgpu::BindGroup {
    device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some("offload group"),
        layout: &pipelines.layout,
        entries: &[
            wgpu::BindGroupEntry {
                binding: 0,
                resource: uniforms.as_entire_binding(),
            },
            wgpu::BindGroupEntry {
                binding: 1,
                resource: wgpu::BindingResource::TextureView(view),
            },
        ],
    })
}

fn texel_copy<'a>(texture: &'a wgpu::Texture, row: u32) -> wgpu::TexelCopyTextureInfo<'a> {
    wgpu::TexelCopyTextureInfo {
        texture,
        mip_level: 0,
        origin: wgpu::Origin3d { x: 0, y: row, z: 0 },
        aspect: wgpu::TextureAspect::All,
    }
}

fn draw(
    encoder: &mut wgpu::CommandEncoder,
    label: &str,
    view: &wgpu::TextureView,
    load: wgpu::LoadOp<wgpu::Color>,
    pipeline: &wgpu::RenderPipeline,
    group: &wgpu::BindGroup,
) {
    let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
        label: Some(label),
        color_attachments: &[Some(wgpu::RenderPassColorAttachment {
            view,
            depth_slice: None,
            resolve_target: None,
            ops: wgpu::Operations {
                load,
                store: wgpu::StoreOp::Store,
            },
        })],
        depth_stencil_attachment: None,
        occlusion_query_set: None,
        timestamp_writes: None,
    });
    pass.set_pipeline(pipeline);
    pass.set_bind_group(0, group, &[]);
    pass.draw(0..3, 0..1);
}

impl GpuOffload {
    pub fn new(
        device: &wgpu::Device,
        pipelines: &OffloadPipelines,
        tail: OffloadTail,
        params: &TransformParams,
    ) -> BackendResult<Self> {
        let len = params.buffer_len;
        if len < 2 || !len.is_power_of_two() {
            return Err(transform::TransformError::NotPowerOfTwo(len).into());
        }
        let max = device.limits().max_texture_dimension_2d;
        let width = u32::try_from(len)
            .ok()
            .filter(|width| *width <= max)
            .ok_or_else(|| {
                BackendError::Device(format!("offload of {len} texels exceeds limit {max}"))
            })?;
        let frames = if tail.has_average() {
            params.avg_frames.max(1) as u32
        } else {
            1
        };

        let uniforms = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("offload params"),
            size: std::mem::size_of::<Params>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let input = float_texture(
            device,
            "offload input",
            width,
            1,
            wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
        );
        let target_usage = wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC;
        let accumulation = float_texture(device, "offload accumulation", width, 1, target_usage);
        let result = float_texture(device, "offload result", width, 1, target_usage);
        let history = tail.has_average().then(|| {
            float_texture(
                device,
                "offload history",
                width,
                frames,
                wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            )
        });

        let input_view = input.create_view(&wgpu::TextureViewDescriptor::default());
        let dft_group = bind_group(device, pipelines, &uniforms, &input_view);
        let average_group = history.as_ref().map(|history| {
            let view = history.create_view(&wgpu::TextureViewDescriptor::default());
            bind_group(device, pipelines, &uniforms, &view)
        });

        let row_bytes = (width * 4).next_multiple_of(wgpu::COPY_BYTES_PER_ROW_ALIGNMENT);
        let bridge = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("offload bridge"),
            size: u64::from(row_bytes),
            usage: wgpu::BufferUsages::COPY_SRC | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        Ok(Self {
            tail,
            params: Params {
                len: width,
                frames,
                next: 0,
                windowed: u32::from(params.avg_window),
                fft_scale: params.fft_scale,
                fft_cutoff: params.fft_cutoff,
                decay: params.gravity_decay(),
                pad: 0.0,
            },
            slot: 0,
            uniforms,
            accumulation_view: accumulation.create_view(&wgpu::TextureViewDescriptor::default()),
            result_view: result.create_view(&wgpu::TextureViewDescriptor::default()),
            input,
            accumulation,
            history,
            result,
            bridge,
            row_bytes,
            dft_group,
            average_group,
        })
    }

    pub fn len(&self) -> usize {
        self.params.len as usize
    }

    /// Encodes and submits every pass for one update, leaving the result in
    /// `output`, a one-dimensional float texture of the same length.
    pub fn run(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        pipelines: &OffloadPipelines,
        input: &[f32],
        output: &wgpu::Texture,
    ) -> BackendResult<()> {
        let width = self.params.len;
        if input.len() != self.len() {
            return Err(BackendError::UploadSize {
                expected: self.len(),
                found: input.len(),
            });
        }
        let extent = wgpu::Extent3d {
            width,
            height: 1,
            depth_or_array_layers: 1,
        };
        queue.write_texture(
            texel_copy(&self.input, 0),
            bytemuck::cast_slice(input),
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(width * 4),
                rows_per_image: None,
            },
            extent,
        );
        let slot = self.slot;
        if self.history.is_some() {
            self.slot = (slot + 1) % self.params.frames;
            self.params.next = self.slot;
        }
        queue.write_buffer(&self.uniforms, 0, bytemuck::bytes_of(&self.params));

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("offload encoder"),
        });
        if self.tail.has_gravity() {
            draw(
                &mut encoder,
                "offload dft",
                &self.accumulation_view,
                wgpu::LoadOp::Load,
                &pipelines.dft_max,
                &self.dft_group,
            );
            draw(
                &mut encoder,
                "offload decay",
                &self.accumulation_view,
                wgpu::LoadOp::Load,
                &pipelines.decay,
                &self.dft_group,
            );
        } else {
            draw(
                &mut encoder,
                "offload dft",
                &self.accumulation_view,
                wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
                &pipelines.dft_replace,
                &self.dft_group,
            );
        }

        let mut last = &self.accumulation;
        if let (Some(history), Some(group)) = (&self.history, &self.average_group) {
            encoder.copy_texture_to_texture(
                texel_copy(&self.accumulation, 0),
                texel_copy(history, slot),
                extent,
            );
            draw(
                &mut encoder,
                "offload average",
                &self.result_view,
                wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
                &pipelines.average,
                group,
            );
            last = &self.result;
        }

        let layout = wgpu::TexelCopyBufferLayout {
            offset: 0,
            bytes_per_row: Some(self.row_bytes),
            rows_per_image: Some(1),
        };
        encoder.copy_texture_to_buffer(
            texel_copy(last, 0),
            wgpu::TexelCopyBufferInfo {
                buffer: &self.bridge,
                layout,
            },
            extent,
        );
        encoder.copy_buffer_to_texture(
            wgpu::TexelCopyBufferInfo {
                buffer: &self.bridge,
                layout,
            },
            texel_copy(output, 0),
            extent,
        );
        queue.submit(Some(encoder.finish()));
        Ok(())
    }
}
