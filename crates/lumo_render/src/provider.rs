// SPDX-License-Identifier: MIT OR Apache-2.0
//! Resource provider boundary.
//!
//! Everything a pass needs from the graphics API goes through the
//! [`ResourceProvider`] trait: allocation, shader compilation, pipeline and
//! descriptor-set management, and command submission. Passes never hold live
//! GPU objects, only opaque ids and copied descriptor structs, so a backend
//! can destroy and recreate its objects without invalidating anything a
//! consumer already bound.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Minimum extent of a pass output image, per axis.
pub const MIN_IMAGE_EXTENT: u32 = 1;
/// Maximum extent of a pass output image, per axis.
pub const MAX_IMAGE_EXTENT: u32 = 8192;

/// Clamp a requested output size to the allowed extent range.
pub fn clamp_extent(size: [u32; 2]) -> [u32; 2] {
    [
        size[0].clamp(MIN_IMAGE_EXTENT, MAX_IMAGE_EXTENT),
        size[1].clamp(MIN_IMAGE_EXTENT, MAX_IMAGE_EXTENT),
    ]
}

macro_rules! handle_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(pub u64);

        impl $name {
            /// The null handle, used by empty/default resource values.
            pub const NULL: Self = Self(0);

            /// Whether this handle refers to a live backend object.
            pub fn is_null(self) -> bool {
                self.0 == 0
            }
        }
    };
}

handle_id!(
    /// Opaque handle to a backend image.
    ImageId
);
handle_id!(
    /// Opaque handle to a backend buffer.
    BufferId
);
handle_id!(
    /// Opaque handle to a backend pipeline.
    PipelineId
);
handle_id!(
    /// Opaque handle to a backend descriptor set.
    DescriptorSetId
);
handle_id!(
    /// Opaque handle to a compiled shader module.
    ShaderModuleId
);
handle_id!(
    /// Opaque handle to an acceleration structure.
    AccelStructureId
);

/// Pixel format of a pass output image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImageFormat {
    /// 8-bit normalized RGBA
    Rgba8Unorm,
    /// 16-bit float RGBA
    Rgba16Float,
    /// 32-bit float RGBA
    Rgba32Float,
}

/// How an image will be used by the passes that own or sample it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageUsage {
    /// Bound as a sampled texture by consumers
    pub sampled: bool,
    /// Written as a storage image by compute stages
    pub storage: bool,
    /// Used as a raster color attachment
    pub render_target: bool,
}

impl ImageUsage {
    /// Usage for a compute pass output: storage write, sampled read.
    pub const fn compute_output() -> Self {
        Self {
            sampled: true,
            storage: true,
            render_target: false,
        }
    }

    /// Usage for a raster pass output: color attachment, sampled read.
    pub const fn raster_output() -> Self {
        Self {
            sampled: true,
            storage: false,
            render_target: true,
        }
    }
}

/// Request for a new image.
#[derive(Debug, Clone)]
pub struct ImageDesc {
    /// Debug label, shows up in backend captures
    pub label: String,
    /// Extent in texels, already clamped by the caller
    pub size: [u32; 2],
    /// Pixel format
    pub format: ImageFormat,
    /// Usage flags
    pub usage: ImageUsage,
}

/// The descriptor struct handed from a producer pass to its consumers.
///
/// Consumers store a copy, never a reference: a producer resizing (and so
/// destroying) its image cannot invalidate what a consumer has already
/// bound until the consumer re-fetches through the next notification.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ImageInfo {
    /// Backend image handle
    pub image: ImageId,
    /// Extent in texels
    pub size: [u32; 2],
    /// Pixel format
    pub format: ImageFormat,
}

impl ImageInfo {
    /// The designated empty texture: a 1x1 placeholder every consumer falls
    /// back to when its producer is disconnected or not yet ready.
    pub const fn empty() -> Self {
        Self {
            image: ImageId::NULL,
            size: [1, 1],
            format: ImageFormat::Rgba8Unorm,
        }
    }

    /// Whether this is the empty placeholder.
    pub fn is_empty(&self) -> bool {
        self.image.is_null()
    }
}

impl Default for ImageInfo {
    fn default() -> Self {
        Self::empty()
    }
}

/// What a buffer is used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferUsage {
    /// Uniform buffer (pass configuration block)
    Uniform,
    /// Storage buffer
    Storage,
}

/// Request for a new buffer.
#[derive(Debug, Clone)]
pub struct BufferDesc {
    /// Debug label
    pub label: String,
    /// Size in bytes
    pub size: u64,
    /// Usage
    pub usage: BufferUsage,
}

/// Buffer region descriptor exchanged between passes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BufferInfo {
    /// Backend buffer handle
    pub buffer: BufferId,
    /// Byte offset of the region
    pub offset: u64,
    /// Byte size of the region
    pub size: u64,
}

impl BufferInfo {
    /// The empty buffer descriptor consumers fall back to when withdrawn.
    pub const fn empty() -> Self {
        Self {
            buffer: BufferId::NULL,
            offset: 0,
            size: 0,
        }
    }

    /// Whether this is the empty placeholder.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_null()
    }
}

impl Default for BufferInfo {
    fn default() -> Self {
        Self::empty()
    }
}

/// Shader stage of a single source unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShaderStage {
    /// Vertex stage
    Vertex,
    /// Fragment stage
    Fragment,
    /// Compute stage
    Compute,
    /// Ray generation stage
    RayGen,
    /// Ray miss stage
    Miss,
    /// Ray closest-hit stage
    ClosestHit,
}

/// Source language of a shader text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShaderLanguage {
    /// GLSL source (the language pass bodies are authored in)
    Glsl,
    /// WGSL source
    Wgsl,
}

/// One shader source unit owned by a pass sub-stage.
#[derive(Debug, Clone)]
pub struct ShaderSource {
    /// Name for logs and pipeline labels
    pub name: String,
    /// Stage this source compiles for
    pub stage: ShaderStage,
    /// Source language
    pub language: ShaderLanguage,
    /// Source text
    pub text: String,
    /// On-disk path, if the source mirrors a file (hot-reload key)
    pub path: Option<PathBuf>,
}

impl ShaderSource {
    /// A GLSL compute shader source.
    pub fn compute_glsl(name: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            stage: ShaderStage::Compute,
            language: ShaderLanguage::Glsl,
            text: text.into(),
            path: None,
        }
    }

    /// A WGSL source for the given stage.
    pub fn wgsl(name: impl Into<String>, stage: ShaderStage, text: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            stage,
            language: ShaderLanguage::Wgsl,
            text: text.into(),
            path: None,
        }
    }

    /// Attach the on-disk path this source was loaded from.
    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Whether any of the given changed files is this source's file.
    pub fn matches_any(&self, changed: &std::collections::HashSet<PathBuf>) -> bool {
        self.path.as_ref().is_some_and(|p| changed.contains(p))
    }
}

/// Kind of pipeline a pass sub-stage builds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineKind {
    /// Compute dispatch
    Compute,
    /// Raster draw (fullscreen quad or mesh)
    Raster,
    /// Ray-tracing dispatch
    RayTracing,
}

/// Kind of a single descriptor binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingKind {
    /// Uniform buffer
    UniformBuffer,
    /// Storage buffer
    StorageBuffer,
    /// Sampled image
    SampledImage,
    /// Storage image
    StorageImage,
    /// Acceleration structure
    AccelStructure,
}

/// One binding in a pipeline's descriptor layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BindingDesc {
    /// Binding index
    pub binding: u32,
    /// Binding kind
    pub kind: BindingKind,
}

/// Request for a new pipeline.
#[derive(Debug, Clone)]
pub struct PipelineDesc {
    /// Debug label
    pub label: String,
    /// Pipeline kind
    pub kind: PipelineKind,
    /// Compiled shader modules, in stage order
    pub shaders: Vec<ShaderModuleId>,
    /// Descriptor layout
    pub bindings: Vec<BindingDesc>,
    /// Push constant byte size (0 for none)
    pub push_constant_size: u32,
    /// Format of the pass output image this pipeline writes (storage image
    /// for compute, color target for raster)
    pub output_format: ImageFormat,
}

/// One write into a descriptor set.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DescriptorWrite {
    /// Bind a uniform buffer region
    UniformBuffer {
        /// Binding index
        binding: u32,
        /// Buffer region
        info: BufferInfo,
    },
    /// Bind a storage buffer region
    StorageBuffer {
        /// Binding index
        binding: u32,
        /// Buffer region
        info: BufferInfo,
    },
    /// Bind a sampled image
    SampledImage {
        /// Binding index
        binding: u32,
        /// Image descriptor
        info: ImageInfo,
    },
    /// Bind a storage image
    StorageImage {
        /// Binding index
        binding: u32,
        /// Image descriptor
        info: ImageInfo,
    },
    /// Bind an acceleration structure
    AccelStructure {
        /// Binding index
        binding: u32,
        /// Acceleration structure handle
        accel: AccelStructureId,
    },
}

/// Pipeline stage scope of a memory barrier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    /// Compute shader execution
    ComputeShader,
    /// Fragment shader execution
    FragmentShader,
    /// Ray-tracing shader execution
    RayTracingShader,
}

/// Access scope of a memory barrier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessKind {
    /// Shader reads
    ShaderRead,
    /// Shader writes
    ShaderWrite,
}

/// An execution + memory dependency between two command ranges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryBarrier {
    /// Producing stage
    pub src_stage: PipelineStage,
    /// Consuming stage
    pub dst_stage: PipelineStage,
    /// Producing access
    pub src_access: AccessKind,
    /// Consuming access
    pub dst_access: AccessKind,
}

impl MemoryBarrier {
    /// The minimal barrier between two dependent compute sub-stages
    /// (write-then-read of the same image).
    pub const fn compute_write_to_read() -> Self {
        Self {
            src_stage: PipelineStage::ComputeShader,
            dst_stage: PipelineStage::ComputeShader,
            src_access: AccessKind::ShaderWrite,
            dst_access: AccessKind::ShaderRead,
        }
    }
}

/// One recorded command.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Bind a pipeline
    BindPipeline(PipelineId),
    /// Bind a descriptor set
    BindDescriptorSet(DescriptorSetId),
    /// Update push constants
    PushConstants(Vec<u8>),
    /// Dispatch compute work groups
    Dispatch {
        /// Work group counts per axis
        groups: [u32; 3],
    },
    /// Issue a non-indexed draw
    Draw {
        /// Vertex count
        vertices: u32,
        /// Instance count
        instances: u32,
    },
    /// Insert an execution + memory dependency
    MemoryBarrier(MemoryBarrier),
    /// Begin rasterizing into the given image
    BeginRaster {
        /// Color target
        target: ImageInfo,
    },
    /// End the current raster target
    EndRaster,
}

/// An ordered list of commands recorded by passes during one frame and
/// replayed by the provider on submit.
#[derive(Debug, Default)]
pub struct CommandList {
    commands: Vec<Command>,
}

impl CommandList {
    /// Create an empty command list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one command.
    pub fn push(&mut self, command: Command) {
        self.commands.push(command);
    }

    /// Recorded commands, in order.
    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    /// Number of recorded commands.
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    /// Whether nothing was recorded.
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Drop all recorded commands, keeping the allocation.
    pub fn clear(&mut self) {
        self.commands.clear();
    }

    /// Count recorded barriers matching the given scope.
    pub fn count_barriers(&self, barrier: MemoryBarrier) -> usize {
        self.commands
            .iter()
            .filter(|c| matches!(c, Command::MemoryBarrier(b) if *b == barrier))
            .count()
    }
}

/// Error from the resource provider.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// GPU memory or object creation failed
    #[error("resource allocation failed: {0}")]
    AllocationFailed(String),

    /// Shader compilation or validation failed
    #[error("shader compilation failed: {0}")]
    ShaderCompile(String),

    /// The requested feature is not available on this backend
    #[error("unsupported by this backend: {0}")]
    Unsupported(String),

    /// The device reported it cannot continue; not locally recoverable
    #[error("device lost: {0}")]
    DeviceLost(String),
}

impl ProviderError {
    /// Whether this error is fatal to the process (device lost).
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::DeviceLost(_))
    }
}

/// The graphics backend as seen by passes and the graph engine.
///
/// A single provider instance is constructed at startup and passed by
/// mutable reference into every operation that needs it; there is no global
/// state. All calls happen on the main thread.
pub trait ResourceProvider {
    /// Allocate an image and return its descriptor.
    fn create_image(&mut self, desc: &ImageDesc) -> Result<ImageInfo, ProviderError>;

    /// Destroy an image. Null and unknown ids are ignored.
    fn destroy_image(&mut self, image: ImageId);

    /// Allocate a buffer and return its region descriptor.
    fn create_buffer(&mut self, desc: &BufferDesc) -> Result<BufferInfo, ProviderError>;

    /// Destroy a buffer. Null and unknown ids are ignored.
    fn destroy_buffer(&mut self, buffer: BufferId);

    /// Copy host bytes into a buffer.
    fn write_buffer(&mut self, buffer: BufferId, offset: u64, data: &[u8]);

    /// Compile and validate one shader source unit.
    fn compile_shader(&mut self, source: &ShaderSource) -> Result<ShaderModuleId, ProviderError>;

    /// Destroy a shader module.
    fn destroy_shader(&mut self, shader: ShaderModuleId);

    /// Build a pipeline from compiled modules.
    fn create_pipeline(&mut self, desc: &PipelineDesc) -> Result<PipelineId, ProviderError>;

    /// Destroy a pipeline. Null and unknown ids are ignored.
    fn destroy_pipeline(&mut self, pipeline: PipelineId);

    /// Allocate a descriptor set for a pipeline's layout.
    fn allocate_descriptor_set(
        &mut self,
        pipeline: PipelineId,
    ) -> Result<DescriptorSetId, ProviderError>;

    /// Point a descriptor set's bindings at new resources.
    fn update_descriptor_set(&mut self, set: DescriptorSetId, writes: &[DescriptorWrite]);

    /// Free a descriptor set. Null and unknown ids are ignored.
    fn free_descriptor_set(&mut self, set: DescriptorSetId);

    /// Submit a recorded command list to the device queue.
    fn submit(&mut self, commands: &CommandList) -> Result<(), ProviderError>;

    /// Block until all submitted work is complete. Bounded by the backend's
    /// own timeout; a failure here is device-lost.
    fn wait_idle(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamp_extent() {
        assert_eq!(clamp_extent([0, 0]), [1, 1]);
        assert_eq!(clamp_extent([256, 9000]), [256, 8192]);
        assert_eq!(clamp_extent([512, 512]), [512, 512]);
    }

    #[test]
    fn test_default_handle_is_null() {
        assert!(ImageId::default().is_null());
        assert!(AccelStructureId::default().is_null());
        assert_eq!(PipelineId::default(), PipelineId::NULL);
    }

    #[test]
    fn test_empty_image_info() {
        let empty = ImageInfo::empty();
        assert!(empty.is_empty());
        assert_eq!(empty.size, [1, 1]);
    }

    #[test]
    fn test_barrier_counting() {
        let mut list = CommandList::new();
        list.push(Command::Dispatch { groups: [1, 1, 1] });
        list.push(Command::MemoryBarrier(MemoryBarrier::compute_write_to_read()));
        list.push(Command::Dispatch { groups: [1, 1, 1] });
        assert_eq!(list.count_barriers(MemoryBarrier::compute_write_to_read()), 1);
    }
}
