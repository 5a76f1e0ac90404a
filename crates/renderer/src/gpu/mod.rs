//! Offscreen `wgpu` backend.
//!
//! Stage sources are translated from plain GLSL uniforms to Vulkan-style
//! resource bindings (see [`compile::translate_fragment`]) and compiled
//! through naga. The default target is an offscreen texture the size of the
//! screen. FFT chain tails are offloaded to the passes in [`offload`] when
//! the device can blend float targets.
mod compile;
mod context;
mod offload;

use std::collections::HashMap;

use anyhow::Result;
use tracing::{debug, warn};
use transform::{OffloadTail, TransformParams};

use crate::backend::{
    BackendError, BackendResult, GraphicsBackend, OffloadId, ProgramId, TargetId, TextureId,
    UniformLocation,
};
use crate::types::{UniformValue, ValueType};
use compile::{compile_vertex_shader, fragment_module, translate_fragment, SlotKind, UniformSlot};
use context::GpuContext;
use offload::{GpuOffload, OffloadPipelines};

const TARGET_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;
const AUDIO_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::R32Float;

struct GpuTexture {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    width: u32,
    one_dimensional: bool,
}

struct GpuProgram {
    pipeline: wgpu::RenderPipeline,
    texture_layout: wgpu::BindGroupLayout,
    uniform_buffer: wgpu::Buffer,
    uniform_group: wgpu::BindGroup,
    slots: Vec<UniformSlot>,
    block: Vec<u8>,
    bound: Vec<Option<TextureId>>,
}

pub struct GpuBackend {
    context: GpuContext,
    vertex: wgpu::ShaderModule,
    sampler: wgpu::Sampler,
    screen: (u32, u32),
    screen_texture: GpuTexture,
    empty_1d: GpuTexture,
    empty_2d: GpuTexture,
    next_handle: u32,
    programs: HashMap<ProgramId, GpuProgram>,
    textures: HashMap<TextureId, GpuTexture>,
    targets: HashMap<TargetId, TextureId>,
    offload_pipelines: Option<OffloadPipelines>,
    offloads: HashMap<OffloadId, GpuOffload>,
    bound_target: Option<TargetId>,
    current: Option<ProgramId>,
}

fn create_texture(
    device: &wgpu::Device,
    label: &str,
    width: u32,
    height: u32,
    one_dimensional: bool,
) -> GpuTexture {
    let (dimension, format, usage) = if one_dimensional {
        (
            wgpu::TextureDimension::D1,
            AUDIO_FORMAT,
            wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_DST
                | wgpu::TextureUsages::COPY_SRC,
        )
    } else {
        (
            wgpu::TextureDimension::D2,
            TARGET_FORMAT,
            wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::RENDER_ATTACHMENT
                | wgpu::TextureUsages::COPY_SRC
                | wgpu::TextureUsages::COPY_DST,
        )
    };
    let texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some(label),
        size: wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension,
        format,
        usage,
        view_formats: &[],
    });
    let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
    GpuTexture {
        texture,
        view,
        width,
        one_dimensional,
    }
}

fn texture_layout_entries(slots: &[UniformSlot]) -> Vec<wgpu::BindGroupLayoutEntry> {
    let mut entries = Vec::new();
    for slot in slots {
        let SlotKind::Texture { index } = slot.kind else {
            continue;
        };
        let view_dimension = match slot.ty {
            ValueType::Sampler1D => wgpu::TextureViewDimension::D1,
            _ => wgpu::TextureViewDimension::D2,
        };
        entries.push(wgpu::BindGroupLayoutEntry {
            binding: index * 2,
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Texture {
                sample_type: wgpu::TextureSampleType::Float { filterable: false },
                view_dimension,
                multisampled: false,
            },
            count: None,
        });
        entries.push(wgpu::BindGroupLayoutEntry {
            binding: index * 2 + 1,
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::NonFiltering),
            count: None,
        });
    }
    entries
}

fn value_bytes(value: UniformValue) -> Vec<u8> {
    match value {
        UniformValue::Float(v) => bytemuck::bytes_of(&v).to_vec(),
        UniformValue::Int(v) => bytemuck::bytes_of(&v).to_vec(),
        UniformValue::Bool(v) => bytemuck::bytes_of(&i32::from(v)).to_vec(),
        UniformValue::Vec2(v) => bytemuck::cast_slice(&v).to_vec(),
        UniformValue::Vec3(v) => bytemuck::cast_slice(&v).to_vec(),
        UniformValue::Vec4(v) => bytemuck::cast_slice(&v).to_vec(),
        UniformValue::IVec2(v) => bytemuck::cast_slice(&v).to_vec(),
        UniformValue::Texture(_) => Vec::new(),
    }
}

impl GpuBackend {
    pub fn new(width: u32, height: u32) -> Result<Self> {
        let context = GpuContext::new()?;
        let device = &context.device;
        let vertex = compile_vertex_shader(device);
        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("stage sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Nearest,
            min_filter: wgpu::FilterMode::Nearest,
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });
        let screen_texture = create_texture(device, "screen", width, height, false);
        let empty_1d = create_texture(device, "empty 1d", 1, 1, true);
        let empty_2d = create_texture(device, "empty 2d", 1, 1, false);
        let offload_pipelines = if device.features().contains(wgpu::Features::FLOAT32_BLENDABLE) {
            match OffloadPipelines::new(device) {
                Ok(pipelines) => Some(pipelines),
                Err(err) => {
                    warn!(error = %err, "offload passes unavailable");
                    None
                }
            }
        } else {
            None
        };
        Ok(Self {
            vertex,
            sampler,
            screen: (width, height),
            screen_texture,
            empty_1d,
            empty_2d,
            next_handle: 1,
            programs: HashMap::new(),
            textures: HashMap::new(),
            targets: HashMap::new(),
            offload_pipelines,
            offloads: HashMap::new(),
            bound_target: None,
            current: None,
            context,
        })
    }

    fn allocate(&mut self) -> u32 {
        let handle = self.next_handle;
        self.next_handle += 1;
        handle
    }

    /// Reads a one-dimensional float texture back from the device.
    pub fn read_texture_1d(&self, texture: TextureId) -> BackendResult<Vec<f32>> {
        let entry = self.textures.get(&texture).ok_or(BackendError::UnknownHandle {
            kind: "texture",
            id: texture.0,
        })?;
        if !entry.one_dimensional {
            return Err(BackendError::Unsupported("2-D texture readback"));
        }
        let device = &self.context.device;
        let row_bytes = (entry.width * 4).next_multiple_of(wgpu::COPY_BYTES_PER_ROW_ALIGNMENT);
        let readback = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("texture readback"),
            size: u64::from(row_bytes),
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });
        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("readback encoder"),
        });
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture: &entry.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &readback,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(row_bytes),
                    rows_per_image: Some(1),
                },
            },
            wgpu::Extent3d {
                width: entry.width,
                height: 1,
                depth_or_array_layers: 1,
            },
        );
        self.context.queue.submit(Some(encoder.finish()));

        let slice = readback.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |res| {
            let _ = tx.send(res);
        });
        device
            .poll(wgpu::PollType::Wait)
            .map_err(|err| BackendError::Device(format!("poll failed: {err:?}")))?;
        rx.recv()
            .map_err(|_| BackendError::Device("readback channel closed".into()))?
            .map_err(|err| BackendError::Device(format!("readback map failed: {err:?}")))?;

        let mapped = slice.get_mapped_range();
        let values = mapped[..entry.width as usize * 4]
            .chunks_exact(4)
            .map(|bytes| f32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
            .collect();
        drop(mapped);
        readback.unmap();
        Ok(values)
    }

    fn attachment(&self) -> BackendResult<&wgpu::TextureView> {
        let Some(target) = self.bound_target else {
            return Ok(&self.screen_texture.view);
        };
        let texture = self.target_texture(target)?;
        self.textures
            .get(&texture)
            .map(|texture| &texture.view)
            .ok_or(BackendError::UnknownHandle {
                kind: "texture",
                id: texture.0,
            })
    }

    fn build_program(
        &self,
        label: &str,
        fragment: &str,
    ) -> (GpuProgram, Option<wgpu::Error>) {
        let device = &self.context.device;
        let translated = translate_fragment(fragment);
        device.push_error_scope(wgpu::ErrorFilter::Validation);

        let module = fragment_module(device, label, &translated);
        let uniform_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("stage uniform layout"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            }],
        });
        let texture_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("stage texture layout"),
            entries: &texture_layout_entries(&translated.slots),
        });
        let uniform_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("stage uniforms"),
            size: translated.block_size,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let uniform_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("stage uniform group"),
            layout: &uniform_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: uniform_buffer.as_entire_binding(),
            }],
        });
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("stage pipeline layout"),
            bind_group_layouts: &[&uniform_layout, &texture_layout],
            push_constant_ranges: &[],
        });
        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some(label),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: &self.vertex,
                entry_point: Some("main"),
                buffers: &[],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            },
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                strip_index_format: None,
                front_face: wgpu::FrontFace::Ccw,
                cull_mode: None,
                polygon_mode: wgpu::PolygonMode::Fill,
                unclipped_depth: false,
                conservative: false,
            },
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            fragment: Some(wgpu::FragmentState {
                module: &module,
                entry_point: Some("main"),
                targets: &[Some(wgpu::ColorTargetState {
                    format: TARGET_FORMAT,
                    blend: Some(wgpu::BlendState::REPLACE),
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            }),
            multiview: None,
            cache: None,
        });
        let error = pollster::block_on(device.pop_error_scope());

        let textures = translated.texture_slots().count();
        let program = GpuProgram {
            pipeline,
            texture_layout,
            uniform_buffer,
            uniform_group,
            block: vec![0; translated.block_size as usize],
            bound: vec![None; textures],
            slots: translated.slots,
        };
        (program, error)
    }
}

impl GraphicsBackend for GpuBackend {
    fn compile_program(&mut self, label: &str, fragment: &str) -> BackendResult<ProgramId> {
        let (program, error) = self.build_program(label, fragment);
        if let Some(error) = error {
            return Err(BackendError::Compile {
                log: error.to_string(),
            });
        }
        let id = ProgramId(self.allocate());
        debug!(program = id.0, label, slots = program.slots.len(), "compiled GPU program");
        self.programs.insert(id, program);
        Ok(id)
    }

    fn uniform_location(&self, program: ProgramId, name: &str) -> Option<UniformLocation> {
        self.programs
            .get(&program)?
            .slots
            .iter()
            .position(|slot| slot.name == name)
            .map(|index| UniformLocation(index as u32))
    }

    fn create_target(&mut self, width: u32, height: u32) -> BackendResult<TargetId> {
        let texture = self.create_texture_2d(width, height)?;
        let id = TargetId(self.allocate());
        self.targets.insert(id, texture);
        Ok(id)
    }

    fn target_texture(&self, target: TargetId) -> BackendResult<TextureId> {
        self.targets
            .get(&target)
            .copied()
            .ok_or(BackendError::UnknownHandle {
                kind: "target",
                id: target.0,
            })
    }

    fn create_texture_1d(&mut self, len: usize) -> BackendResult<TextureId> {
        let max = self.context.device.limits().max_texture_dimension_1d;
        let width = u32::try_from(len)
            .ok()
            .filter(|width| *width <= max)
            .ok_or_else(|| {
                BackendError::Device(format!("1-D texture of {len} texels exceeds limit {max}"))
            })?;
        let texture = create_texture(&self.context.device, "audio", width, 1, true);
        let id = TextureId(self.allocate());
        self.textures.insert(id, texture);
        Ok(id)
    }

    fn create_texture_2d(&mut self, width: u32, height: u32) -> BackendResult<TextureId> {
        let texture = create_texture(&self.context.device, "stage target", width, height, false);
        let id = TextureId(self.allocate());
        self.textures.insert(id, texture);
        Ok(id)
    }

    fn upload_texture_1d(&mut self, texture: TextureId, data: &[f32]) -> BackendResult<()> {
        let entry = self.textures.get(&texture).ok_or(BackendError::UnknownHandle {
            kind: "texture",
            id: texture.0,
        })?;
        if !entry.one_dimensional || entry.width as usize != data.len() {
            return Err(BackendError::UploadSize {
                expected: entry.width as usize,
                found: data.len(),
            });
        }
        self.context.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &entry.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            bytemuck::cast_slice(data),
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(entry.width * 4),
                rows_per_image: None,
            },
            wgpu::Extent3d {
                width: entry.width,
                height: 1,
                depth_or_array_layers: 1,
            },
        );
        Ok(())
    }

    fn bind_target(&mut self, target: Option<TargetId>) -> BackendResult<()> {
        if let Some(target) = target {
            self.target_texture(target)?;
        }
        self.bound_target = target;
        Ok(())
    }

    fn clear(&mut self, rgba: [f32; 4]) -> BackendResult<()> {
        let view = self.attachment()?;
        let [r, g, b, a] = rgba.map(f64::from);
        let mut encoder = self
            .context
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("clear encoder"),
            });
        {
            let _pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("clear pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view,
                    depth_slice: None,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color { r, g, b, a }),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                occlusion_query_set: None,
                timestamp_writes: None,
            });
        }
        self.context.queue.submit(Some(encoder.finish()));
        Ok(())
    }

    fn use_program(&mut self, program: ProgramId) -> BackendResult<()> {
        if !self.programs.contains_key(&program) {
            return Err(BackendError::UnknownHandle {
                kind: "program",
                id: program.0,
            });
        }
        self.current = Some(program);
        Ok(())
    }

    fn set_uniform(&mut self, location: UniformLocation, value: UniformValue) -> BackendResult<()> {
        let id = self.current.ok_or(BackendError::NoProgram)?;
        let program = self
            .programs
            .get_mut(&id)
            .ok_or(BackendError::UnknownHandle {
                kind: "program",
                id: id.0,
            })?;
        let slot = program
            .slots
            .get(location.0 as usize)
            .ok_or(BackendError::UnknownHandle {
                kind: "uniform",
                id: location.0,
            })?;
        if !value.fits(slot.ty) {
            return Err(BackendError::UniformType {
                location: location.0,
                value,
            });
        }
        match (slot.kind, value) {
            (SlotKind::Texture { index }, UniformValue::Texture(texture)) => {
                if let Some(bound) = program.bound.get_mut(index as usize) {
                    *bound = Some(texture);
                }
            }
            (SlotKind::Block { offset }, value) => {
                let bytes = value_bytes(value);
                let start = offset as usize;
                if let Some(dst) = program.block.get_mut(start..start + bytes.len()) {
                    dst.copy_from_slice(&bytes);
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn draw_fullscreen(&mut self) -> BackendResult<()> {
        let id = self.current.ok_or(BackendError::NoProgram)?;
        let program = self.programs.get(&id).ok_or(BackendError::UnknownHandle {
            kind: "program",
            id: id.0,
        })?;
        let device = &self.context.device;
        self.context
            .queue
            .write_buffer(&program.uniform_buffer, 0, &program.block);

        let mut entries = Vec::new();
        for slot in &program.slots {
            let SlotKind::Texture { index } = slot.kind else {
                continue;
            };
            let fallback = match slot.ty {
                ValueType::Sampler1D => &self.empty_1d.view,
                _ => &self.empty_2d.view,
            };
            let view = program
                .bound
                .get(index as usize)
                .copied()
                .flatten()
                .and_then(|texture| self.textures.get(&texture))
                .map_or(fallback, |texture| &texture.view);
            entries.push(wgpu::BindGroupEntry {
                binding: index * 2,
                resource: wgpu::BindingResource::TextureView(view),
            });
            entries.push(wgpu::BindGroupEntry {
                binding: index * 2 + 1,
                resource: wgpu::BindingResource::Sampler(&self.sampler),
            });
        }
        let texture_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("stage texture group"),
            layout: &program.texture_layout,
            entries: &entries,
        });

        let view = self.attachment()?;
        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("stage encoder"),
        });
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("stage pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view,
                    depth_slice: None,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Load,
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                occlusion_query_set: None,
                timestamp_writes: None,
            });
            pass.set_pipeline(&program.pipeline);
            pass.set_bind_group(0, &program.uniform_group, &[]);
            pass.set_bind_group(1, &texture_group, &[]);
            pass.draw(0..3, 0..1);
        }
        self.context.queue.submit(Some(encoder.finish()));
        Ok(())
    }

    fn screen_size(&self) -> (u32, u32) {
        self.screen
    }

    fn supports_offload(&self) -> bool {
        self.offload_pipelines.is_some()
    }

    fn create_offload(
        &mut self,
        tail: OffloadTail,
        params: &TransformParams,
    ) -> BackendResult<OffloadId> {
        let pipelines = self
            .offload_pipelines
            .as_ref()
            .ok_or(BackendError::Unsupported("chain offload"))?;
        let offload = GpuOffload::new(&self.context.device, pipelines, tail, params)?;
        let id = OffloadId(self.allocate());
        debug!(offload = id.0, ?tail, len = offload.len(), "created GPU offload");
        self.offloads.insert(id, offload);
        Ok(id)
    }

    fn run_offload(
        &mut self,
        offload: OffloadId,
        input: &[f32],
        output: TextureId,
    ) -> BackendResult<()> {
        let pipelines = self
            .offload_pipelines
            .as_ref()
            .ok_or(BackendError::Unsupported("chain offload"))?;
        let passes = self
            .offloads
            .get_mut(&offload)
            .ok_or(BackendError::UnknownHandle {
                kind: "offload",
                id: offload.0,
            })?;
        let target = self.textures.get(&output).ok_or(BackendError::UnknownHandle {
            kind: "texture",
            id: output.0,
        })?;
        if !target.one_dimensional || target.width as usize != passes.len() {
            return Err(BackendError::UploadSize {
                expected: target.width as usize,
                found: passes.len(),
            });
        }
        passes.run(
            &self.context.device,
            &self.context.queue,
            pipelines,
            input,
            &target.texture,
        )
    }

    fn delete_offload(&mut self, offload: OffloadId) {
        self.offloads.remove(&offload);
    }

    fn delete_program(&mut self, program: ProgramId) {
        if self.current == Some(program) {
            self.current = None;
        }
        self.programs.remove(&program);
    }

    fn delete_target(&mut self, target: TargetId) {
        if self.bound_target == Some(target) {
            self.bound_target = None;
        }
        if let Some(texture) = self.targets.remove(&target) {
            self.textures.remove(&texture);
        }
    }

    fn delete_texture(&mut self, texture: TextureId) {
        self.textures.remove(&texture);
    }
}
