// SPDX-License-Identifier: MIT OR Apache-2.0
//! wgpu implementation of the resource provider.
//!
//! Shader sources are parsed and validated through naga (GLSL pass bodies
//! and WGSL alike), then lowered to WGSL before module creation, so a bad
//! shader surfaces as a [`ProviderError::ShaderCompile`] with naga's
//! message instead of an uncaptured device error mid-frame.
//!
//! Recorded [`Command`] lists are replayed into a single command encoder on
//! submit. Memory barriers are dropped during replay; wgpu derives the
//! equivalent dependencies from its own usage tracking.

use lumo_render::provider::{
    BindingKind, BufferDesc, BufferId, BufferInfo, BufferUsage, Command, CommandList,
    DescriptorSetId, DescriptorWrite, ImageDesc, ImageFormat, ImageId, ImageInfo, PipelineDesc,
    PipelineId, PipelineKind, ProviderError, ResourceProvider, ShaderLanguage, ShaderModuleId,
    ShaderSource, ShaderStage,
};
use std::borrow::Cow;
use std::collections::HashMap;
use tracing::{debug, info, warn};

struct ImageEntry {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
}

enum PipelineObject {
    Compute(wgpu::ComputePipeline),
    Render(wgpu::RenderPipeline),
}

struct PipelineEntry {
    object: PipelineObject,
    layout: wgpu::BindGroupLayout,
    visibility: wgpu::ShaderStages,
}

struct SetEntry {
    pipeline: PipelineId,
    bind_group: Option<wgpu::BindGroup>,
}

/// Resource provider backed by a wgpu device.
pub struct WgpuProvider {
    device: wgpu::Device,
    queue: wgpu::Queue,
    next_id: u64,
    images: HashMap<ImageId, ImageEntry>,
    buffers: HashMap<BufferId, wgpu::Buffer>,
    shaders: HashMap<ShaderModuleId, wgpu::ShaderModule>,
    pipelines: HashMap<PipelineId, PipelineEntry>,
    sets: HashMap<DescriptorSetId, SetEntry>,
    /// 1x1 texture bound wherever a consumer holds the empty placeholder
    placeholder_view: wgpu::TextureView,
    /// Small buffer bound wherever a consumer holds an empty region
    placeholder_buffer: wgpu::Buffer,
    push_constants_supported: bool,
}

impl WgpuProvider {
    /// Create a provider on the first suitable adapter, headless.
    pub fn new() -> Result<Self, ProviderError> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::PRIMARY,
            ..Default::default()
        });

        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: None,
            force_fallback_adapter: false,
        }))
        .map_err(|err| ProviderError::Unsupported(format!("no suitable GPU adapter: {err}")))?;
        info!("using GPU: {}", adapter.get_info().name);

        let push_constants_supported =
            adapter.features().contains(wgpu::Features::PUSH_CONSTANTS);
        let mut required_features = wgpu::Features::empty();
        let mut required_limits = wgpu::Limits::default();
        if push_constants_supported {
            required_features |= wgpu::Features::PUSH_CONSTANTS;
            required_limits.max_push_constant_size = 128;
        }

        let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label: Some("Lumo Device"),
            required_features,
            required_limits,
            ..Default::default()
        }))
        .map_err(|err| ProviderError::Unsupported(format!("device creation failed: {err}")))?;

        let placeholder_texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("lumo placeholder"),
            size: wgpu::Extent3d {
                width: 1,
                height: 1,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba8Unorm,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        let placeholder_view =
            placeholder_texture.create_view(&wgpu::TextureViewDescriptor::default());
        let placeholder_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("lumo placeholder"),
            size: 16,
            usage: wgpu::BufferUsages::UNIFORM
                | wgpu::BufferUsages::STORAGE
                | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        Ok(Self {
            device,
            queue,
            next_id: 0,
            images: HashMap::new(),
            buffers: HashMap::new(),
            shaders: HashMap::new(),
            pipelines: HashMap::new(),
            sets: HashMap::new(),
            placeholder_view,
            placeholder_buffer,
            push_constants_supported,
        })
    }

    fn next(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn image_view(&self, image: ImageId) -> &wgpu::TextureView {
        self.images
            .get(&image)
            .map_or(&self.placeholder_view, |entry| &entry.view)
    }
}

fn texture_format(format: ImageFormat) -> wgpu::TextureFormat {
    match format {
        ImageFormat::Rgba8Unorm => wgpu::TextureFormat::Rgba8Unorm,
        ImageFormat::Rgba16Float => wgpu::TextureFormat::Rgba16Float,
        ImageFormat::Rgba32Float => wgpu::TextureFormat::Rgba32Float,
    }
}

/// Parse, validate and lower a shader source to WGSL.
pub fn translate_to_wgsl(source: &ShaderSource) -> Result<String, ProviderError> {
    let module = match source.language {
        ShaderLanguage::Wgsl => naga::front::wgsl::parse_str(&source.text)
            .map_err(|err| shader_error(&source.name, &err.emit_to_string(&source.text)))?,
        ShaderLanguage::Glsl => {
            let stage = match source.stage {
                ShaderStage::Vertex => naga::ShaderStage::Vertex,
                ShaderStage::Fragment => naga::ShaderStage::Fragment,
                ShaderStage::Compute => naga::ShaderStage::Compute,
                ShaderStage::RayGen | ShaderStage::Miss | ShaderStage::ClosestHit => {
                    return Err(ProviderError::Unsupported(
                        "ray tracing shader stages are not available on this backend".into(),
                    ));
                }
            };
            let mut frontend = naga::front::glsl::Frontend::default();
            frontend
                .parse(&naga::front::glsl::Options::from(stage), &source.text)
                .map_err(|err| shader_error(&source.name, &err.emit_to_string(&source.text)))?
        }
    };

    let info = naga::valid::Validator::new(
        naga::valid::ValidationFlags::all(),
        naga::valid::Capabilities::default(),
    )
    .validate(&module)
    .map_err(|err| shader_error(&source.name, &format!("{err:?}")))?;

    naga::back::wgsl::write_string(&module, &info, naga::back::wgsl::WriterFlags::empty())
        .map_err(|err| shader_error(&source.name, &err.to_string()))
}

fn shader_error(name: &str, message: &str) -> ProviderError {
    ProviderError::ShaderCompile(format!("{name}: {message}"))
}

impl ResourceProvider for WgpuProvider {
    fn create_image(&mut self, desc: &ImageDesc) -> Result<ImageInfo, ProviderError> {
        let mut usage = wgpu::TextureUsages::COPY_SRC;
        if desc.usage.sampled {
            usage |= wgpu::TextureUsages::TEXTURE_BINDING;
        }
        if desc.usage.storage {
            usage |= wgpu::TextureUsages::STORAGE_BINDING;
        }
        if desc.usage.render_target {
            usage |= wgpu::TextureUsages::RENDER_ATTACHMENT;
        }

        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some(&desc.label),
            size: wgpu::Extent3d {
                width: desc.size[0],
                height: desc.size[1],
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: texture_format(desc.format),
            usage,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());

        let id = ImageId(self.next());
        self.images.insert(id, ImageEntry { texture, view });
        Ok(ImageInfo {
            image: id,
            size: desc.size,
            format: desc.format,
        })
    }

    fn destroy_image(&mut self, image: ImageId) {
        if let Some(entry) = self.images.remove(&image) {
            entry.texture.destroy();
        }
    }

    fn create_buffer(&mut self, desc: &BufferDesc) -> Result<BufferInfo, ProviderError> {
        let usage = match desc.usage {
            BufferUsage::Uniform => wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            BufferUsage::Storage => wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
        };
        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(&desc.label),
            size: desc.size,
            usage,
            mapped_at_creation: false,
        });
        let id = BufferId(self.next());
        self.buffers.insert(id, buffer);
        Ok(BufferInfo {
            buffer: id,
            offset: 0,
            size: desc.size,
        })
    }

    fn destroy_buffer(&mut self, buffer: BufferId) {
        if let Some(buffer) = self.buffers.remove(&buffer) {
            buffer.destroy();
        }
    }

    fn write_buffer(&mut self, buffer: BufferId, offset: u64, data: &[u8]) {
        if let Some(buffer) = self.buffers.get(&buffer) {
            self.queue.write_buffer(buffer, offset, data);
        }
    }

    fn compile_shader(&mut self, source: &ShaderSource) -> Result<ShaderModuleId, ProviderError> {
        let wgsl = translate_to_wgsl(source)?;
        let module = self
            .device
            .create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(&source.name),
                source: wgpu::ShaderSource::Wgsl(Cow::Owned(wgsl)),
            });
        let id = ShaderModuleId(self.next());
        self.shaders.insert(id, module);
        debug!(shader = %source.name, "shader compiled");
        Ok(id)
    }

    fn destroy_shader(&mut self, shader: ShaderModuleId) {
        self.shaders.remove(&shader);
    }

    fn create_pipeline(&mut self, desc: &PipelineDesc) -> Result<PipelineId, ProviderError> {
        let visibility = match desc.kind {
            PipelineKind::Compute => wgpu::ShaderStages::COMPUTE,
            PipelineKind::Raster => wgpu::ShaderStages::VERTEX_FRAGMENT,
            PipelineKind::RayTracing => {
                return Err(ProviderError::Unsupported(
                    "ray tracing pipelines are not available on this backend".into(),
                ));
            }
        };
        if desc.push_constant_size > 0 && !self.push_constants_supported {
            return Err(ProviderError::Unsupported(
                "push constants are not available on this adapter".into(),
            ));
        }

        let mut entries = Vec::with_capacity(desc.bindings.len());
        for binding in &desc.bindings {
            let ty = match binding.kind {
                BindingKind::UniformBuffer => wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                BindingKind::StorageBuffer => wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Storage { read_only: true },
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                BindingKind::SampledImage => wgpu::BindingType::Texture {
                    sample_type: wgpu::TextureSampleType::Float { filterable: false },
                    view_dimension: wgpu::TextureViewDimension::D2,
                    multisampled: false,
                },
                BindingKind::StorageImage => wgpu::BindingType::StorageTexture {
                    access: wgpu::StorageTextureAccess::WriteOnly,
                    format: texture_format(desc.output_format),
                    view_dimension: wgpu::TextureViewDimension::D2,
                },
                BindingKind::AccelStructure => {
                    return Err(ProviderError::Unsupported(
                        "acceleration structure bindings are not available on this backend"
                            .into(),
                    ));
                }
            };
            entries.push(wgpu::BindGroupLayoutEntry {
                binding: binding.binding,
                visibility,
                ty,
                count: None,
            });
        }

        let layout = self
            .device
            .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some(&desc.label),
                entries: &entries,
            });

        let push_constant_ranges = if desc.push_constant_size > 0 {
            vec![wgpu::PushConstantRange {
                stages: visibility,
                range: 0..desc.push_constant_size,
            }]
        } else {
            Vec::new()
        };
        let pipeline_layout = self
            .device
            .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some(&desc.label),
                bind_group_layouts: &[&layout],
                push_constant_ranges: &push_constant_ranges,
            });

        let missing =
            || ProviderError::ShaderCompile(format!("{}: missing shader module", desc.label));
        let object = match desc.kind {
            PipelineKind::Compute => {
                let module = desc
                    .shaders
                    .first()
                    .and_then(|id| self.shaders.get(id))
                    .ok_or_else(missing)?;
                PipelineObject::Compute(self.device.create_compute_pipeline(
                    &wgpu::ComputePipelineDescriptor {
                        label: Some(&desc.label),
                        layout: Some(&pipeline_layout),
                        module,
                        entry_point: None,
                        compilation_options: Default::default(),
                        cache: None,
                    },
                ))
            }
            PipelineKind::Raster => {
                let vertex = desc
                    .shaders
                    .first()
                    .and_then(|id| self.shaders.get(id))
                    .ok_or_else(missing)?;
                let fragment = desc
                    .shaders
                    .get(1)
                    .and_then(|id| self.shaders.get(id))
                    .ok_or_else(missing)?;
                PipelineObject::Render(self.device.create_render_pipeline(
                    &wgpu::RenderPipelineDescriptor {
                        label: Some(&desc.label),
                        layout: Some(&pipeline_layout),
                        vertex: wgpu::VertexState {
                            module: vertex,
                            entry_point: None,
                            compilation_options: Default::default(),
                            buffers: &[],
                        },
                        primitive: wgpu::PrimitiveState::default(),
                        depth_stencil: None,
                        multisample: wgpu::MultisampleState::default(),
                        fragment: Some(wgpu::FragmentState {
                            module: fragment,
                            entry_point: None,
                            compilation_options: Default::default(),
                            targets: &[Some(wgpu::ColorTargetState {
                                format: texture_format(desc.output_format),
                                blend: None,
                                write_mask: wgpu::ColorWrites::ALL,
                            })],
                        }),
                        multiview: None,
                        cache: None,
                    },
                ))
            }
            PipelineKind::RayTracing => unreachable!("rejected above"),
        };

        let id = PipelineId(self.next());
        self.pipelines.insert(
            id,
            PipelineEntry {
                object,
                layout,
                visibility,
            },
        );
        debug!(pipeline = %desc.label, "pipeline created");
        Ok(id)
    }

    fn destroy_pipeline(&mut self, pipeline: PipelineId) {
        self.pipelines.remove(&pipeline);
    }

    fn allocate_descriptor_set(
        &mut self,
        pipeline: PipelineId,
    ) -> Result<DescriptorSetId, ProviderError> {
        if !self.pipelines.contains_key(&pipeline) {
            return Err(ProviderError::AllocationFailed(
                "descriptor set requested for unknown pipeline".into(),
            ));
        }
        let id = DescriptorSetId(self.next());
        self.sets.insert(
            id,
            SetEntry {
                pipeline,
                bind_group: None,
            },
        );
        Ok(id)
    }

    fn update_descriptor_set(&mut self, set: DescriptorSetId, writes: &[DescriptorWrite]) {
        let Some(pipeline) = self
            .sets
            .get(&set)
            .and_then(|entry| self.pipelines.get(&entry.pipeline))
        else {
            return;
        };

        let mut entries = Vec::with_capacity(writes.len());
        for write in writes {
            match write {
                DescriptorWrite::UniformBuffer { binding, info }
                | DescriptorWrite::StorageBuffer { binding, info } => {
                    let resource = match self.buffers.get(&info.buffer) {
                        Some(buffer) => wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                            buffer,
                            offset: info.offset,
                            size: std::num::NonZeroU64::new(info.size),
                        }),
                        None => self.placeholder_buffer.as_entire_binding(),
                    };
                    entries.push(wgpu::BindGroupEntry {
                        binding: *binding,
                        resource,
                    });
                }
                DescriptorWrite::SampledImage { binding, info }
                | DescriptorWrite::StorageImage { binding, info } => {
                    entries.push(wgpu::BindGroupEntry {
                        binding: *binding,
                        resource: wgpu::BindingResource::TextureView(self.image_view(info.image)),
                    });
                }
                DescriptorWrite::AccelStructure { .. } => {
                    warn!("acceleration structure write ignored on the wgpu backend");
                }
            }
        }

        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: None,
            layout: &pipeline.layout,
            entries: &entries,
        });
        if let Some(entry) = self.sets.get_mut(&set) {
            entry.bind_group = Some(bind_group);
        }
    }

    fn free_descriptor_set(&mut self, set: DescriptorSetId) {
        self.sets.remove(&set);
    }

    fn submit(&mut self, commands: &CommandList) -> Result<(), ProviderError> {
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("lumo frame"),
            });

        let mut current_pipeline = None;
        let mut current_set = None;
        let mut push_data: Option<&[u8]> = None;
        let mut raster_target: Option<ImageId> = None;
        let mut raster_cleared = false;

        for command in commands.commands() {
            match command {
                Command::BindPipeline(pipeline) => current_pipeline = Some(*pipeline),
                Command::BindDescriptorSet(set) => current_set = Some(*set),
                Command::PushConstants(data) => push_data = Some(data),
                Command::MemoryBarrier(_) => {}
                Command::BeginRaster { target } => {
                    raster_target = Some(target.image);
                    raster_cleared = false;
                }
                Command::EndRaster => raster_target = None,
                Command::Dispatch { groups } => {
                    let Some(entry) =
                        current_pipeline.and_then(|id| self.pipelines.get(&id))
                    else {
                        continue;
                    };
                    let PipelineObject::Compute(compute) = &entry.object else {
                        continue;
                    };
                    let mut pass =
                        encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                            label: None,
                            timestamp_writes: None,
                        });
                    pass.set_pipeline(compute);
                    if let Some(bind_group) = current_set
                        .and_then(|id| self.sets.get(&id))
                        .and_then(|entry| entry.bind_group.as_ref())
                    {
                        pass.set_bind_group(0, bind_group, &[]);
                    }
                    if let Some(data) = push_data {
                        pass.set_push_constants(0, data);
                    }
                    pass.dispatch_workgroups(groups[0], groups[1], groups[2]);
                }
                Command::Draw {
                    vertices,
                    instances,
                } => {
                    let Some(target) = raster_target else {
                        continue;
                    };
                    let Some(entry) =
                        current_pipeline.and_then(|id| self.pipelines.get(&id))
                    else {
                        continue;
                    };
                    let PipelineObject::Render(render) = &entry.object else {
                        continue;
                    };
                    let load = if raster_cleared {
                        wgpu::LoadOp::Load
                    } else {
                        wgpu::LoadOp::Clear(wgpu::Color::BLACK)
                    };
                    raster_cleared = true;
                    let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                        label: None,
                        color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                            view: self.image_view(target),
                            resolve_target: None,
                            ops: wgpu::Operations {
                                load,
                                store: wgpu::StoreOp::Store,
                            },
                        })],
                        depth_stencil_attachment: None,
                        timestamp_writes: None,
                        occlusion_query_set: None,
                    });
                    pass.set_pipeline(render);
                    if let Some(bind_group) = current_set
                        .and_then(|id| self.sets.get(&id))
                        .and_then(|entry| entry.bind_group.as_ref())
                    {
                        pass.set_bind_group(0, bind_group, &[]);
                    }
                    if let Some(data) = push_data {
                        pass.set_push_constants(entry.visibility, 0, data);
                    }
                    pass.draw(0..*vertices, 0..*instances);
                }
            }
        }

        self.queue.submit(Some(encoder.finish()));
        Ok(())
    }

    fn wait_idle(&mut self) {
        if let Err(err) = self.device.poll(wgpu::PollType::Wait) {
            warn!(error = %err, "device poll failed while waiting for idle");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_glsl_compute_translates() {
        let source = ShaderSource::compute_glsl(
            "fill",
            r"#version 450
layout(local_size_x = 8, local_size_y = 8) in;
layout(set = 0, binding = 1, rgba8) uniform writeonly image2D outImage;
void main() {
    imageStore(outImage, ivec2(gl_GlobalInvocationID.xy), vec4(1.0));
}
",
        );
        let wgsl = translate_to_wgsl(&source).unwrap();
        assert!(wgsl.contains("@compute"));
    }

    #[test]
    fn test_bad_glsl_reports_compile_error() {
        let source = ShaderSource::compute_glsl("broken", "void main() { this is not glsl }");
        let err = translate_to_wgsl(&source).unwrap_err();
        assert!(matches!(err, ProviderError::ShaderCompile(_)));
    }

    #[test]
    fn test_wgsl_passthrough_validates() {
        let source = ShaderSource::wgsl(
            "fill",
            ShaderStage::Compute,
            r"@group(0) @binding(1) var out_image: texture_storage_2d<rgba8unorm, write>;
@compute @workgroup_size(8, 8)
fn main(@builtin(global_invocation_id) id: vec3<u32>) {
    textureStore(out_image, vec2<i32>(id.xy), vec4<f32>(1.0));
}
",
        );
        assert!(translate_to_wgsl(&source).is_ok());
    }

    #[test]
    fn test_ray_stage_rejected() {
        let mut source = ShaderSource::compute_glsl("rgen", "void main() {}");
        source.stage = ShaderStage::RayGen;
        assert!(matches!(
            translate_to_wgsl(&source),
            Err(ProviderError::Unsupported(_))
        ));
    }
}
