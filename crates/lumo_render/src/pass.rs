// SPDX-License-Identifier: MIT OR Apache-2.0
//! Pass lifecycle state machine.
//!
//! A [`Pass`] is the atomic unit of GPU work: one or more sub-stages sharing
//! an output image set, a pipeline and descriptor set per sub-stage, and an
//! optional uniform-buffer-backed configuration block. The lifecycle is
//! `Uninitialized → Initialized → {Ready, Invalid}` with resize/recompile
//! transitions back to `Initialized` and a terminal `Destroyed` reachable
//! only through [`Pass::unit`], which waits for the device before freeing
//! anything possibly in flight.
//!
//! All per-frame work is coalesced behind dirty flags: N resize requests
//! collapse into one reallocation, M upload requests into one host-to-device
//! copy, descriptor rewrites into one update.

use crate::interface::{
    AccelStructureInfo, AccelStructureInput, LightGroup, LightGroupInput, ModelInfo, ModelInput,
    ShaderPassRef, ShaderPassWork, TexelBufferInfo, TexelBufferInput, TextureInput, TextureOutput,
};
use crate::provider::{
    clamp_extent, BindingDesc, BindingKind, BufferDesc, BufferInfo, BufferUsage, Command,
    CommandList, DescriptorSetId, DescriptorWrite, ImageDesc, ImageFormat, ImageInfo, ImageUsage,
    MemoryBarrier, PipelineDesc, PipelineId, PipelineKind, ProviderError, ResourceProvider,
    ShaderModuleId, ShaderSource,
};
use indexmap::IndexMap;
use std::collections::HashSet;
use std::path::PathBuf;
use tracing::{debug, error, warn};

/// Lifecycle state of a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassState {
    /// No GPU objects exist yet
    Uninitialized,
    /// GPU objects built, not yet recorded this session
    Initialized,
    /// Steady state, recording each frame
    Ready,
    /// A (re)build failed; the pass records nothing until fixed
    Invalid,
    /// Deterministically torn down; terminal
    Destroyed,
}

/// Work issued by one sub-stage.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PassWork {
    /// Compute dispatch sized from the pass output extent
    Dispatch2D {
        /// Local work group size per axis
        local: [u32; 2],
    },
    /// Compute dispatch with fixed group counts
    DispatchFixed {
        /// Work group counts
        groups: [u32; 3],
    },
    /// Fullscreen triangle draw
    FullscreenQuad,
}

/// Description of one sub-stage of a pass.
#[derive(Debug, Clone)]
pub struct SubStageDesc {
    /// Name for labels and logs
    pub name: String,
    /// Shader sources, in stage order (one for compute, vertex+fragment for raster)
    pub shaders: Vec<ShaderSource>,
    /// Descriptor layout of the sub-stage
    pub bindings: Vec<BindingDesc>,
    /// Work to issue
    pub work: PassWork,
}

/// Built state of one sub-stage.
#[derive(Debug)]
struct SubStage {
    desc: SubStageDesc,
    modules: Vec<ShaderModuleId>,
    pipeline: PipelineId,
    descriptor_set: DescriptorSetId,
}

impl SubStage {
    fn new(desc: SubStageDesc) -> Self {
        Self {
            desc,
            modules: Vec::new(),
            pipeline: PipelineId::NULL,
            descriptor_set: DescriptorSetId::NULL,
        }
    }
}

/// Uniform-buffer-backed configuration block of a pass.
#[derive(Debug)]
struct UboBlock {
    info: BufferInfo,
    data: Vec<u8>,
    dirty: bool,
}

/// The atomic unit of GPU work. See the module docs for the lifecycle.
#[derive(Debug)]
pub struct Pass {
    name: String,
    kind: PipelineKind,
    state: PassState,
    enabled: bool,

    output_size: [u32; 2],
    format: ImageFormat,
    ping_pong: bool,
    images: Vec<ImageInfo>,
    front_index: usize,

    ubo_size: u64,
    ubo: Option<UboBlock>,
    push_constants: Option<Vec<u8>>,

    stages: Vec<SubStage>,

    needs_resize: Option<[u32; 2]>,
    needs_descriptor_update: bool,

    bound_textures: IndexMap<u32, ImageInfo>,
    bound_texel_buffers: IndexMap<u32, TexelBufferInfo>,
    light_group: LightGroup,
    model: ModelInfo,
    accel: AccelStructureInfo,

    last_error: Option<String>,
    output_generation: u64,
    output_changed: bool,
}

impl Pass {
    /// Create a single-stage compute pass.
    pub fn compute(
        name: impl Into<String>,
        shader: ShaderSource,
        bindings: Vec<BindingDesc>,
        local: [u32; 2],
    ) -> Self {
        let name = name.into();
        Self::multi_stage(
            name.clone(),
            PipelineKind::Compute,
            vec![SubStageDesc {
                name,
                shaders: vec![shader],
                bindings,
                work: PassWork::Dispatch2D { local },
            }],
        )
    }

    /// Create a fullscreen quad raster pass.
    pub fn fullscreen(
        name: impl Into<String>,
        vertex: ShaderSource,
        fragment: ShaderSource,
        bindings: Vec<BindingDesc>,
    ) -> Self {
        let name = name.into();
        Self::multi_stage(
            name.clone(),
            PipelineKind::Raster,
            vec![SubStageDesc {
                name,
                shaders: vec![vertex, fragment],
                bindings,
                work: PassWork::FullscreenQuad,
            }],
        )
    }

    /// Create a pass with explicit sub-stages (e.g. the 4-stage SDF
    /// generation pass). Sub-stages share the pass output image set and are
    /// recorded in order with a write→read barrier between each pair.
    pub fn multi_stage(
        name: impl Into<String>,
        kind: PipelineKind,
        stages: Vec<SubStageDesc>,
    ) -> Self {
        Self {
            name: name.into(),
            kind,
            state: PassState::Uninitialized,
            enabled: true,
            output_size: [0, 0],
            format: ImageFormat::Rgba8Unorm,
            ping_pong: false,
            images: Vec::new(),
            front_index: 0,
            ubo_size: 0,
            ubo: None,
            push_constants: None,
            stages: stages.into_iter().map(SubStage::new).collect(),
            needs_resize: None,
            needs_descriptor_update: false,
            bound_textures: IndexMap::new(),
            bound_texel_buffers: IndexMap::new(),
            light_group: LightGroup::empty(),
            model: ModelInfo::empty(),
            accel: AccelStructureInfo::empty(),
            last_error: None,
            output_generation: 0,
            output_changed: false,
        }
    }

    /// Set the output image format.
    pub fn with_format(mut self, format: ImageFormat) -> Self {
        self.format = format;
        self
    }

    /// Keep two output image sets and swap them fence-gated per frame, so a
    /// consumer always reads a completed image while the next is written.
    pub fn with_ping_pong(mut self) -> Self {
        self.ping_pong = true;
        self
    }

    /// Declare a uniform-buffer-backed configuration block of the given size.
    pub fn with_ubo(mut self, size: u64) -> Self {
        self.ubo_size = size;
        self
    }

    /// Pass name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current lifecycle state.
    pub fn state(&self) -> PassState {
        self.state
    }

    /// Whether the pass takes part in its module's chain this frame.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Enable or disable the pass within its module chain.
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    /// Current output extent in texels.
    pub fn output_size(&self) -> [u32; 2] {
        self.output_size
    }

    /// Last shader compile or allocation error, for UI display.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Monotonic counter bumped every time the output images are recreated.
    pub fn output_generation(&self) -> u64 {
        self.output_generation
    }

    /// Take the "output regenerated, consumers must re-bind" flag. Returns
    /// true at most once per regeneration.
    pub fn take_output_changed(&mut self) -> bool {
        std::mem::take(&mut self.output_changed)
    }

    /// The front (last completed) image, or `None` before the first
    /// successful init. Never returns the image being written this frame.
    pub fn front_image(&self) -> Option<ImageInfo> {
        self.images.get(self.front_index).copied()
    }

    /// The back image, the one written this frame.
    pub fn back_image(&self) -> Option<ImageInfo> {
        if self.ping_pong {
            self.images.get(self.front_index ^ 1).copied()
        } else {
            self.images.first().copied()
        }
    }

    /// Reference to this pass for merger nodes, once built.
    pub fn shader_pass_ref(&self) -> Option<ShaderPassRef> {
        let stage = self.stages.first()?;
        if stage.pipeline.is_null() {
            return None;
        }
        let work = match stage.desc.work {
            PassWork::Dispatch2D { local } => ShaderPassWork::Dispatch {
                groups: self.dispatch_groups(local),
            },
            PassWork::DispatchFixed { groups } => ShaderPassWork::Dispatch { groups },
            PassWork::FullscreenQuad => ShaderPassWork::Draw {
                vertices: 3,
                instances: 1,
            },
        };
        Some(ShaderPassRef {
            pipeline: stage.pipeline,
            descriptor_set: stage.descriptor_set,
            work,
        })
    }

    /// Allocate every GPU object the pass needs, sized to `size`.
    ///
    /// All-or-nothing: on any allocation or compile failure everything
    /// created so far is rolled back, the pass lands in `Invalid`, and the
    /// error is returned.
    pub fn init(
        &mut self,
        provider: &mut dyn ResourceProvider,
        size: [u32; 2],
    ) -> Result<(), ProviderError> {
        let size = clamp_extent(size);
        self.output_size = size;

        if let Err(err) = self.build_resources(provider) {
            error!(pass = %self.name, error = %err, "pass init failed");
            self.last_error = Some(err.to_string());
            self.release_resources(provider);
            self.state = PassState::Invalid;
            return Err(err);
        }

        self.write_descriptors(provider);
        self.state = PassState::Initialized;
        self.output_generation += 1;
        self.output_changed = true;
        debug!(pass = %self.name, ?size, "pass initialized");
        Ok(())
    }

    fn build_resources(&mut self, provider: &mut dyn ResourceProvider) -> Result<(), ProviderError> {
        let image_count = if self.ping_pong { 2 } else { 1 };
        let usage = match self.kind {
            PipelineKind::Raster => ImageUsage::raster_output(),
            _ => ImageUsage::compute_output(),
        };
        for index in 0..image_count {
            let info = provider.create_image(&ImageDesc {
                label: format!("{}[{index}]", self.name),
                size: self.output_size,
                format: self.format,
                usage,
            })?;
            self.images.push(info);
        }

        if self.ubo_size > 0 && self.ubo.is_none() {
            let info = provider.create_buffer(&BufferDesc {
                label: format!("{} ubo", self.name),
                size: self.ubo_size,
                usage: BufferUsage::Uniform,
            })?;
            self.ubo = Some(UboBlock {
                info,
                data: vec![0; self.ubo_size as usize],
                dirty: true,
            });
        }

        for stage in &mut self.stages {
            for index in 0..stage.desc.shaders.len() {
                let module = provider.compile_shader(&stage.desc.shaders[index])?;
                stage.modules.push(module);
            }
            stage.pipeline = provider.create_pipeline(&PipelineDesc {
                label: stage.desc.name.clone(),
                kind: self.kind,
                shaders: stage.modules.clone(),
                bindings: stage.desc.bindings.clone(),
                push_constant_size: self.push_constants.as_ref().map_or(0, |p| p.len() as u32),
                output_format: self.format,
            })?;
            stage.descriptor_set = provider.allocate_descriptor_set(stage.pipeline)?;
        }
        Ok(())
    }

    /// Destroy every GPU object owned by the pass. Safe to call on a
    /// partially built pass (rollback path).
    fn release_resources(&mut self, provider: &mut dyn ResourceProvider) {
        for stage in &mut self.stages {
            if !stage.descriptor_set.is_null() {
                provider.free_descriptor_set(stage.descriptor_set);
                stage.descriptor_set = DescriptorSetId::NULL;
            }
            if !stage.pipeline.is_null() {
                provider.destroy_pipeline(stage.pipeline);
                stage.pipeline = PipelineId::NULL;
            }
            for module in stage.modules.drain(..) {
                provider.destroy_shader(module);
            }
        }
        if let Some(ubo) = self.ubo.take() {
            provider.destroy_buffer(ubo.info.buffer);
        }
        for image in self.images.drain(..) {
            provider.destroy_image(image.image);
        }
        self.front_index = 0;
    }

    /// Request a resize. Marks a dirty flag only; multiple requests before
    /// the next [`Pass::resize_if_needed`] coalesce into one reallocation.
    pub fn need_resize(&mut self, new_size: [u32; 2]) {
        let new_size = clamp_extent(new_size);
        if new_size == self.output_size {
            self.needs_resize = None;
        } else {
            self.needs_resize = Some(new_size);
        }
    }

    /// Apply a pending resize, if any. Called once per frame before
    /// recording. Waits for the device before destroying the old images,
    /// rebuilds them at the new size, and rewrites descriptors. Returns
    /// whether a reallocation happened.
    pub fn resize_if_needed(
        &mut self,
        provider: &mut dyn ResourceProvider,
    ) -> Result<bool, ProviderError> {
        let Some(new_size) = self.needs_resize.take() else {
            return Ok(false);
        };
        if new_size == self.output_size {
            return Ok(false);
        }
        if self.images.is_empty() {
            // Not initialized yet; just adopt the size for the later init.
            self.output_size = new_size;
            return Ok(false);
        }

        provider.wait_idle();
        for image in self.images.drain(..) {
            provider.destroy_image(image.image);
        }
        self.front_index = 0;
        self.output_size = new_size;

        let image_count = if self.ping_pong { 2 } else { 1 };
        let usage = match self.kind {
            PipelineKind::Raster => ImageUsage::raster_output(),
            _ => ImageUsage::compute_output(),
        };
        for index in 0..image_count {
            match provider.create_image(&ImageDesc {
                label: format!("{}[{index}]", self.name),
                size: new_size,
                format: self.format,
                usage,
            }) {
                Ok(info) => self.images.push(info),
                Err(err) => {
                    error!(pass = %self.name, error = %err, "resize reallocation failed");
                    self.last_error = Some(err.to_string());
                    self.release_resources(provider);
                    self.state = PassState::Invalid;
                    return Err(err);
                }
            }
        }

        self.write_descriptors(provider);
        self.state = PassState::Initialized;
        self.output_generation += 1;
        self.output_changed = true;
        debug!(pass = %self.name, size = ?new_size, "pass resized");
        Ok(true)
    }

    /// Mark the configuration block dirty without uploading.
    pub fn need_ubo_upload(&mut self) {
        if let Some(ubo) = &mut self.ubo {
            ubo.dirty = true;
        }
    }

    /// Replace the configuration block bytes and mark them dirty.
    pub fn set_ubo_bytes(&mut self, bytes: &[u8]) {
        if let Some(ubo) = &mut self.ubo {
            let len = ubo.data.len().min(bytes.len());
            ubo.data[..len].copy_from_slice(&bytes[..len]);
            ubo.dirty = true;
        }
    }

    /// Upload the configuration block if dirty. This is the only path that
    /// mutates GPU-visible uniform state; M dirty marks between two calls
    /// cost exactly one copy. Returns whether a copy happened.
    pub fn upload_ubo_if_dirty(&mut self, provider: &mut dyn ResourceProvider) -> bool {
        if let Some(ubo) = &mut self.ubo {
            if ubo.dirty {
                provider.write_buffer(ubo.info.buffer, ubo.info.offset, &ubo.data);
                ubo.dirty = false;
                return true;
            }
        }
        false
    }

    /// Set push constant bytes for recording.
    pub fn set_push_constants(&mut self, bytes: Vec<u8>) {
        self.push_constants = Some(bytes);
    }

    /// Rewrite descriptor sets if any binding changed since the last write.
    pub fn update_descriptors_if_needed(&mut self, provider: &mut dyn ResourceProvider) {
        if self.needs_descriptor_update {
            self.write_descriptors(provider);
        }
    }

    fn write_descriptors(&mut self, provider: &mut dyn ResourceProvider) {
        let back = self.back_image().unwrap_or_else(ImageInfo::empty);
        for stage in &self.stages {
            if stage.descriptor_set.is_null() {
                continue;
            }
            let mut writes = Vec::with_capacity(stage.desc.bindings.len());
            for binding in &stage.desc.bindings {
                let write = match binding.kind {
                    BindingKind::UniformBuffer => DescriptorWrite::UniformBuffer {
                        binding: binding.binding,
                        info: self.ubo.as_ref().map_or_else(BufferInfo::empty, |u| u.info),
                    },
                    BindingKind::StorageBuffer => DescriptorWrite::StorageBuffer {
                        binding: binding.binding,
                        info: self
                            .bound_texel_buffers
                            .get(&binding.binding)
                            .map(|t| t.buffer)
                            .unwrap_or(self.model.vertex_buffer),
                    },
                    BindingKind::SampledImage => DescriptorWrite::SampledImage {
                        binding: binding.binding,
                        info: self
                            .bound_textures
                            .get(&binding.binding)
                            .copied()
                            .unwrap_or_else(ImageInfo::empty),
                    },
                    BindingKind::StorageImage => DescriptorWrite::StorageImage {
                        binding: binding.binding,
                        info: back,
                    },
                    BindingKind::AccelStructure => DescriptorWrite::AccelStructure {
                        binding: binding.binding,
                        accel: self.accel.accel,
                    },
                };
                writes.push(write);
            }
            provider.update_descriptor_set(stage.descriptor_set, &writes);
        }
        self.needs_descriptor_update = false;
    }

    fn dispatch_groups(&self, local: [u32; 2]) -> [u32; 3] {
        [
            self.output_size[0].div_ceil(local[0].max(1)),
            self.output_size[1].div_ceil(local[1].max(1)),
            1,
        ]
    }

    /// Record the pass into the frame's command list: bind pipeline and
    /// descriptor set per sub-stage, push constants, work, with the minimal
    /// compute write→read barrier between each pair of consecutive compute
    /// sub-stages. Returns false when the pass cannot record (invalid or
    /// never initialized), in which case the frame skips it.
    pub fn record(&mut self, commands: &mut CommandList) -> bool {
        if !self.enabled {
            return true;
        }
        if !matches!(self.state, PassState::Initialized | PassState::Ready) {
            return false;
        }

        if self.kind == PipelineKind::Raster {
            let Some(target) = self.back_image() else {
                return false;
            };
            commands.push(Command::BeginRaster { target });
        }

        for (index, stage) in self.stages.iter().enumerate() {
            if index > 0 && self.kind == PipelineKind::Compute {
                commands.push(Command::MemoryBarrier(MemoryBarrier::compute_write_to_read()));
            }
            commands.push(Command::BindPipeline(stage.pipeline));
            commands.push(Command::BindDescriptorSet(stage.descriptor_set));
            if let Some(push) = &self.push_constants {
                commands.push(Command::PushConstants(push.clone()));
            }
            match stage.desc.work {
                PassWork::Dispatch2D { local } => commands.push(Command::Dispatch {
                    groups: self.dispatch_groups(local),
                }),
                PassWork::DispatchFixed { groups } => commands.push(Command::Dispatch { groups }),
                PassWork::FullscreenQuad => commands.push(Command::Draw {
                    vertices: 3,
                    instances: 1,
                }),
            }
        }

        if self.kind == PipelineKind::Raster {
            commands.push(Command::EndRaster);
        }

        self.state = PassState::Ready;
        true
    }

    /// Recompile any sub-stage whose shader source file is among the
    /// changed set. On compile failure the previous working pipeline stays
    /// in place and the error is retained for display. Returns whether
    /// anything was rebuilt.
    pub fn recompile_shaders(
        &mut self,
        provider: &mut dyn ResourceProvider,
        changed: &HashSet<PathBuf>,
    ) -> Result<bool, ProviderError> {
        let affected: Vec<usize> = self
            .stages
            .iter()
            .enumerate()
            .filter(|(_, s)| s.desc.shaders.iter().any(|sh| sh.matches_any(changed)))
            .map(|(i, _)| i)
            .collect();
        if affected.is_empty() {
            return Ok(false);
        }

        provider.wait_idle();
        for index in affected {
            let stage = &mut self.stages[index];

            let mut new_modules = Vec::with_capacity(stage.desc.shaders.len());
            for shader in &stage.desc.shaders {
                match provider.compile_shader(shader) {
                    Ok(module) => new_modules.push(module),
                    Err(err) => {
                        // Keep the last good pipeline running.
                        warn!(pass = %self.name, stage = %stage.desc.name, error = %err,
                            "shader recompile failed, keeping previous pipeline");
                        for module in new_modules {
                            provider.destroy_shader(module);
                        }
                        self.last_error = Some(err.to_string());
                        return Err(err);
                    }
                }
            }

            let new_pipeline = match provider.create_pipeline(&PipelineDesc {
                label: stage.desc.name.clone(),
                kind: self.kind,
                shaders: new_modules.clone(),
                bindings: stage.desc.bindings.clone(),
                push_constant_size: self.push_constants.as_ref().map_or(0, |p| p.len() as u32),
                output_format: self.format,
            }) {
                Ok(pipeline) => pipeline,
                Err(err) => {
                    warn!(pass = %self.name, stage = %stage.desc.name, error = %err,
                        "pipeline rebuild failed, keeping previous pipeline");
                    for module in new_modules {
                        provider.destroy_shader(module);
                    }
                    self.last_error = Some(err.to_string());
                    return Err(err);
                }
            };

            let new_set = match provider.allocate_descriptor_set(new_pipeline) {
                Ok(set) => set,
                Err(err) => {
                    warn!(pass = %self.name, stage = %stage.desc.name, error = %err,
                        "descriptor allocation failed, keeping previous pipeline");
                    provider.destroy_pipeline(new_pipeline);
                    for module in new_modules {
                        provider.destroy_shader(module);
                    }
                    self.last_error = Some(err.to_string());
                    return Err(err);
                }
            };

            // The full replacement set exists; retire the old objects.
            if !stage.pipeline.is_null() {
                provider.destroy_pipeline(stage.pipeline);
            }
            for module in stage.modules.drain(..) {
                provider.destroy_shader(module);
            }
            if !stage.descriptor_set.is_null() {
                provider.free_descriptor_set(stage.descriptor_set);
            }
            stage.modules = new_modules;
            stage.pipeline = new_pipeline;
            stage.descriptor_set = new_set;
            debug!(pass = %self.name, stage = %stage.desc.name, "shaders recompiled");
        }

        self.write_descriptors(provider);
        self.last_error = None;
        self.state = PassState::Initialized;
        Ok(true)
    }

    /// Flip front/back image sets. Must only be called after the GPU work
    /// for the back image is known complete (fence-gated by the frame
    /// driver). No-op for single-buffered passes.
    pub fn swap(&mut self) {
        if self.ping_pong && self.images.len() == 2 {
            self.front_index ^= 1;
            // The new back image must be rebound as the write target, and
            // consumers must re-fetch the new front.
            self.needs_descriptor_update = true;
            self.output_changed = true;
        }
    }

    /// Deterministic teardown: waits for device idle, then frees every
    /// owned GPU object. The pass is unusable afterwards.
    pub fn unit(&mut self, provider: &mut dyn ResourceProvider) {
        if self.state == PassState::Destroyed {
            return;
        }
        provider.wait_idle();
        self.release_resources(provider);
        self.state = PassState::Destroyed;
        debug!(pass = %self.name, "pass destroyed");
    }
}

impl TextureInput for Pass {
    fn set_texture(&mut self, binding: u32, info: Option<&ImageInfo>) {
        let new = info.copied().unwrap_or_else(ImageInfo::empty);
        if self.bound_textures.get(&binding) != Some(&new) {
            self.bound_textures.insert(binding, new);
            self.needs_descriptor_update = true;
        }
    }
}

impl TextureOutput for Pass {
    fn get_image_info(&self, _binding: u32) -> Option<ImageInfo> {
        self.front_image()
    }
}

impl LightGroupInput for Pass {
    fn set_light_group(&mut self, group: Option<&LightGroup>) {
        self.light_group = group.cloned().unwrap_or_else(LightGroup::empty);
        self.need_ubo_upload();
    }
}

impl ModelInput for Pass {
    fn set_model(&mut self, model: Option<&ModelInfo>) {
        self.model = model.copied().unwrap_or_else(ModelInfo::empty);
        self.needs_descriptor_update = true;
    }
}

impl TexelBufferInput for Pass {
    fn set_texel_buffer(&mut self, binding: u32, info: Option<&TexelBufferInfo>) {
        let new = info.copied().unwrap_or_else(TexelBufferInfo::empty);
        self.bound_texel_buffers.insert(binding, new);
        self.needs_descriptor_update = true;
    }
}

impl AccelStructureInput for Pass {
    fn set_accel_structure(&mut self, info: Option<&AccelStructureInfo>) {
        self.accel = info.copied().unwrap_or_else(AccelStructureInfo::empty);
        self.needs_descriptor_update = true;
    }
}

impl Pass {
    /// The light group currently bound to this pass.
    pub fn light_group(&self) -> &LightGroup {
        &self.light_group
    }

    /// The model currently bound to this pass.
    pub fn model(&self) -> &ModelInfo {
        &self.model
    }

    /// The texture currently bound at the given binding index.
    pub fn bound_texture(&self, binding: u32) -> Option<&ImageInfo> {
        self.bound_textures.get(&binding)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headless::HeadlessProvider;

    fn compute_pass() -> Pass {
        Pass::compute(
            "test",
            ShaderSource::compute_glsl("test", "void main() {}"),
            vec![
                BindingDesc {
                    binding: 0,
                    kind: BindingKind::StorageImage,
                },
                BindingDesc {
                    binding: 1,
                    kind: BindingKind::UniformBuffer,
                },
            ],
            [8, 8],
        )
        .with_ubo(64)
    }

    #[test]
    fn test_init_builds_everything() {
        let mut provider = HeadlessProvider::new();
        let mut pass = compute_pass();
        pass.init(&mut provider, [256, 256]).unwrap();

        assert_eq!(pass.state(), PassState::Initialized);
        assert_eq!(pass.output_size(), [256, 256]);
        assert_eq!(provider.stats.images_created, 1);
        assert_eq!(provider.stats.buffers_created, 1);
        assert_eq!(provider.stats.pipelines_created, 1);
        assert!(pass.front_image().is_some());
    }

    #[test]
    fn test_init_clamps_size() {
        let mut provider = HeadlessProvider::new();
        let mut pass = compute_pass();
        pass.init(&mut provider, [0, 100_000]).unwrap();
        assert_eq!(pass.output_size(), [1, 8192]);
    }

    #[test]
    fn test_init_failure_rolls_back() {
        let mut provider = HeadlessProvider::new();
        provider.fail_next_image_alloc = Some("out of memory".into());
        let mut pass = compute_pass();
        assert!(pass.init(&mut provider, [256, 256]).is_err());

        assert_eq!(pass.state(), PassState::Invalid);
        assert_eq!(provider.live_image_count(), 0);
        assert_eq!(provider.live_buffer_count(), 0);
        assert_eq!(provider.live_pipeline_count(), 0);
        assert!(pass.last_error().is_some());
    }

    #[test]
    fn test_resize_coalescing() {
        let mut provider = HeadlessProvider::new();
        let mut pass = compute_pass();
        pass.init(&mut provider, [256, 256]).unwrap();
        let created_after_init = provider.stats.images_created;

        // N requests with the same target size: one reallocation.
        pass.need_resize([512, 512]);
        pass.need_resize([512, 512]);
        pass.need_resize([512, 512]);
        assert!(pass.resize_if_needed(&mut provider).unwrap());
        assert_eq!(provider.stats.images_created, created_after_init + 1);
        assert_eq!(pass.output_size(), [512, 512]);

        // Nothing pending: no work.
        assert!(!pass.resize_if_needed(&mut provider).unwrap());
    }

    #[test]
    fn test_resize_to_same_size_is_noop() {
        let mut provider = HeadlessProvider::new();
        let mut pass = compute_pass();
        pass.init(&mut provider, [256, 256]).unwrap();
        let created = provider.stats.images_created;

        pass.need_resize([256, 256]);
        assert!(!pass.resize_if_needed(&mut provider).unwrap());
        assert_eq!(provider.stats.images_created, created);
    }

    #[test]
    fn test_resize_notifies_once_per_regeneration() {
        let mut provider = HeadlessProvider::new();
        let mut pass = compute_pass();
        pass.init(&mut provider, [256, 256]).unwrap();
        assert!(pass.take_output_changed());
        assert!(!pass.take_output_changed());

        pass.need_resize([512, 512]);
        pass.need_resize([512, 512]);
        pass.resize_if_needed(&mut provider).unwrap();
        assert!(pass.take_output_changed());
        assert!(!pass.take_output_changed());
    }

    #[test]
    fn test_ubo_upload_coalescing() {
        let mut provider = HeadlessProvider::new();
        let mut pass = compute_pass();
        pass.init(&mut provider, [64, 64]).unwrap();
        pass.upload_ubo_if_dirty(&mut provider);
        let writes = provider.stats.buffer_writes;

        // M dirty marks between two upload calls: one copy.
        pass.need_ubo_upload();
        pass.need_ubo_upload();
        pass.need_ubo_upload();
        assert!(pass.upload_ubo_if_dirty(&mut provider));
        assert_eq!(provider.stats.buffer_writes, writes + 1);
        assert!(!pass.upload_ubo_if_dirty(&mut provider));
    }

    #[test]
    fn test_multi_stage_barriers() {
        // Four dependent compute sub-stages: exactly three barriers.
        let stage = |name: &str| SubStageDesc {
            name: name.into(),
            shaders: vec![ShaderSource::compute_glsl(name, "void main() {}")],
            bindings: vec![BindingDesc {
                binding: 0,
                kind: BindingKind::StorageImage,
            }],
            work: PassWork::Dispatch2D { local: [8, 8] },
        };
        let mut provider = HeadlessProvider::new();
        let mut pass = Pass::multi_stage(
            "sdf",
            PipelineKind::Compute,
            vec![
                stage("init"),
                stage("distance_h"),
                stage("distance_v"),
                stage("display"),
            ],
        );
        pass.init(&mut provider, [128, 128]).unwrap();

        let mut commands = CommandList::new();
        assert!(pass.record(&mut commands));
        assert_eq!(
            commands.count_barriers(MemoryBarrier::compute_write_to_read()),
            3
        );
    }

    #[test]
    fn test_ping_pong_front_is_stable() {
        let mut provider = HeadlessProvider::new();
        let mut pass = compute_pass().with_ping_pong();
        pass.init(&mut provider, [64, 64]).unwrap();

        let front = pass.front_image().unwrap();
        let back = pass.back_image().unwrap();
        assert_ne!(front.image, back.image);

        // While the back image is being written, the front getter keeps
        // returning the completed image.
        let mut commands = CommandList::new();
        pass.record(&mut commands);
        assert_eq!(pass.front_image().unwrap().image, front.image);
        assert_eq!(pass.get_image_info(0).unwrap().image, front.image);

        // After the fence-gated swap, front and back flip.
        pass.swap();
        assert_eq!(pass.front_image().unwrap().image, back.image);
        assert_eq!(pass.back_image().unwrap().image, front.image);
    }

    #[test]
    fn test_recompile_failure_keeps_pipeline() {
        let mut provider = HeadlessProvider::new();
        let mut pass = Pass::compute(
            "hot",
            ShaderSource::compute_glsl("hot", "void main() {}").with_path("/shaders/hot.comp"),
            vec![BindingDesc {
                binding: 0,
                kind: BindingKind::StorageImage,
            }],
            [8, 8],
        );
        pass.init(&mut provider, [64, 64]).unwrap();
        let live_before = provider.live_pipeline_count();

        let mut changed = HashSet::new();
        changed.insert(PathBuf::from("/shaders/hot.comp"));

        provider.fail_next_shader_compile = Some("syntax error".into());
        assert!(pass.recompile_shaders(&mut provider, &changed).is_err());

        // Previous pipeline still live, pass still records.
        assert_eq!(provider.live_pipeline_count(), live_before);
        assert!(pass.last_error().is_some());
        let mut commands = CommandList::new();
        assert!(pass.record(&mut commands));
    }

    #[test]
    fn test_recompile_descriptor_failure_keeps_old_objects() {
        let mut provider = HeadlessProvider::new();
        let mut pass = Pass::compute(
            "hot",
            ShaderSource::compute_glsl("hot", "void main() {}").with_path("/shaders/hot.comp"),
            vec![BindingDesc {
                binding: 0,
                kind: BindingKind::StorageImage,
            }],
            [8, 8],
        );
        pass.init(&mut provider, [64, 64]).unwrap();
        let live_before = provider.live_pipeline_count();

        let mut changed = HashSet::new();
        changed.insert(PathBuf::from("/shaders/hot.comp"));

        provider.fail_next_descriptor_alloc = Some("pool exhausted".into());
        assert!(pass.recompile_shaders(&mut provider, &changed).is_err());

        // The replacement pipeline was rolled back; the stage still holds
        // the old pipeline with its matching descriptor set and records.
        assert_eq!(provider.live_pipeline_count(), live_before);
        assert!(pass.last_error().is_some());
        let mut commands = CommandList::new();
        assert!(pass.record(&mut commands));
    }

    #[test]
    fn test_recompile_success_swaps_pipeline() {
        let mut provider = HeadlessProvider::new();
        let mut pass = Pass::compute(
            "hot",
            ShaderSource::compute_glsl("hot", "void main() {}").with_path("/shaders/hot.comp"),
            vec![BindingDesc {
                binding: 0,
                kind: BindingKind::StorageImage,
            }],
            [8, 8],
        );
        pass.init(&mut provider, [64, 64]).unwrap();

        let mut changed = HashSet::new();
        changed.insert(PathBuf::from("/shaders/other.comp"));
        assert!(!pass.recompile_shaders(&mut provider, &changed).unwrap());

        changed.insert(PathBuf::from("/shaders/hot.comp"));
        assert!(pass.recompile_shaders(&mut provider, &changed).unwrap());
        assert_eq!(provider.live_pipeline_count(), 1);
        assert!(pass.last_error().is_none());
    }

    #[test]
    fn test_unit_waits_and_frees() {
        let mut provider = HeadlessProvider::new();
        let mut pass = compute_pass();
        pass.init(&mut provider, [64, 64]).unwrap();
        let waits = provider.stats.wait_idle_calls;

        pass.unit(&mut provider);
        assert_eq!(pass.state(), PassState::Destroyed);
        assert!(provider.stats.wait_idle_calls > waits);
        assert_eq!(provider.live_image_count(), 0);
        assert_eq!(provider.live_buffer_count(), 0);
        assert_eq!(provider.live_pipeline_count(), 0);

        // Idempotent.
        pass.unit(&mut provider);
    }

    #[test]
    fn test_withdrawn_texture_falls_back_to_empty() {
        let mut pass = compute_pass();
        let bound = ImageInfo {
            image: crate::provider::ImageId(42),
            size: [256, 256],
            format: ImageFormat::Rgba8Unorm,
        };
        pass.set_texture(2, Some(&bound));
        assert_eq!(pass.bound_texture(2), Some(&bound));

        pass.set_texture(2, None);
        let after = pass.bound_texture(2).unwrap();
        assert!(after.is_empty());
        assert_eq!(after.size, [1, 1]);
    }

    #[test]
    fn test_record_requires_init() {
        let mut pass = compute_pass();
        let mut commands = CommandList::new();
        assert!(!pass.record(&mut commands));
        assert!(commands.is_empty());
    }
}
