// SPDX-License-Identifier: MIT OR Apache-2.0
//! Headless resource provider.
//!
//! Allocates opaque ids and keeps statistics without touching a GPU. Used by
//! the engine tests and by dry runs of a graph (validating structure and
//! recorded work before a real backend is attached).

use crate::provider::{
    BufferDesc, BufferId, BufferInfo, CommandList, DescriptorSetId, DescriptorWrite, ImageDesc,
    ImageId, ImageInfo, PipelineDesc, PipelineId, ProviderError, ResourceProvider, ShaderModuleId,
    ShaderSource,
};
use std::collections::{HashMap, HashSet};

/// Counters for every provider operation, for assertions and diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProviderStats {
    /// Images allocated
    pub images_created: usize,
    /// Images destroyed
    pub images_destroyed: usize,
    /// Buffers allocated
    pub buffers_created: usize,
    /// Buffers destroyed
    pub buffers_destroyed: usize,
    /// Host-to-device buffer copies
    pub buffer_writes: usize,
    /// Shader units compiled
    pub shaders_compiled: usize,
    /// Pipelines built
    pub pipelines_created: usize,
    /// Pipelines destroyed
    pub pipelines_destroyed: usize,
    /// Descriptor sets allocated
    pub descriptor_sets_allocated: usize,
    /// Descriptor set updates
    pub descriptor_updates: usize,
    /// Command list submissions
    pub submits: usize,
    /// Device idle waits
    pub wait_idle_calls: usize,
}

/// A provider that only allocates ids.
#[derive(Debug, Default)]
pub struct HeadlessProvider {
    next_id: u64,
    live_images: HashSet<ImageId>,
    live_buffers: HashSet<BufferId>,
    live_pipelines: HashSet<PipelineId>,
    live_sets: HashMap<DescriptorSetId, Vec<DescriptorWrite>>,
    /// Operation counters
    pub stats: ProviderStats,
    /// When set, the next shader compile fails with this message
    pub fail_next_shader_compile: Option<String>,
    /// When set, the next image allocation fails with this message
    pub fail_next_image_alloc: Option<String>,
    /// When set, the next descriptor set allocation fails with this message
    pub fail_next_descriptor_alloc: Option<String>,
}

impl HeadlessProvider {
    /// Create a fresh headless provider.
    pub fn new() -> Self {
        Self::default()
    }

    fn next(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    /// Number of currently live images.
    pub fn live_image_count(&self) -> usize {
        self.live_images.len()
    }

    /// Number of currently live buffers.
    pub fn live_buffer_count(&self) -> usize {
        self.live_buffers.len()
    }

    /// Number of currently live pipelines.
    pub fn live_pipeline_count(&self) -> usize {
        self.live_pipelines.len()
    }

    /// Last writes applied to a descriptor set, if it is live.
    pub fn descriptor_writes(&self, set: DescriptorSetId) -> Option<&[DescriptorWrite]> {
        self.live_sets.get(&set).map(Vec::as_slice)
    }
}

impl ResourceProvider for HeadlessProvider {
    fn create_image(&mut self, desc: &ImageDesc) -> Result<ImageInfo, ProviderError> {
        if let Some(msg) = self.fail_next_image_alloc.take() {
            return Err(ProviderError::AllocationFailed(msg));
        }
        let id = ImageId(self.next());
        self.live_images.insert(id);
        self.stats.images_created += 1;
        Ok(ImageInfo {
            image: id,
            size: desc.size,
            format: desc.format,
        })
    }

    fn destroy_image(&mut self, image: ImageId) {
        if self.live_images.remove(&image) {
            self.stats.images_destroyed += 1;
        }
    }

    fn create_buffer(&mut self, desc: &BufferDesc) -> Result<BufferInfo, ProviderError> {
        let id = BufferId(self.next());
        self.live_buffers.insert(id);
        self.stats.buffers_created += 1;
        Ok(BufferInfo {
            buffer: id,
            offset: 0,
            size: desc.size,
        })
    }

    fn destroy_buffer(&mut self, buffer: BufferId) {
        if self.live_buffers.remove(&buffer) {
            self.stats.buffers_destroyed += 1;
        }
    }

    fn write_buffer(&mut self, _buffer: BufferId, _offset: u64, _data: &[u8]) {
        self.stats.buffer_writes += 1;
    }

    fn compile_shader(&mut self, _source: &ShaderSource) -> Result<ShaderModuleId, ProviderError> {
        if let Some(msg) = self.fail_next_shader_compile.take() {
            return Err(ProviderError::ShaderCompile(msg));
        }
        self.stats.shaders_compiled += 1;
        Ok(ShaderModuleId(self.next()))
    }

    fn destroy_shader(&mut self, _shader: ShaderModuleId) {}

    fn create_pipeline(&mut self, _desc: &PipelineDesc) -> Result<PipelineId, ProviderError> {
        let id = PipelineId(self.next());
        self.live_pipelines.insert(id);
        self.stats.pipelines_created += 1;
        Ok(id)
    }

    fn destroy_pipeline(&mut self, pipeline: PipelineId) {
        if self.live_pipelines.remove(&pipeline) {
            self.stats.pipelines_destroyed += 1;
        }
    }

    fn allocate_descriptor_set(
        &mut self,
        _pipeline: PipelineId,
    ) -> Result<DescriptorSetId, ProviderError> {
        if let Some(msg) = self.fail_next_descriptor_alloc.take() {
            return Err(ProviderError::AllocationFailed(msg));
        }
        let id = DescriptorSetId(self.next());
        self.live_sets.insert(id, Vec::new());
        self.stats.descriptor_sets_allocated += 1;
        Ok(id)
    }

    fn update_descriptor_set(&mut self, set: DescriptorSetId, writes: &[DescriptorWrite]) {
        if let Some(stored) = self.live_sets.get_mut(&set) {
            *stored = writes.to_vec();
        }
        self.stats.descriptor_updates += 1;
    }

    fn free_descriptor_set(&mut self, set: DescriptorSetId) {
        self.live_sets.remove(&set);
    }

    fn submit(&mut self, _commands: &CommandList) -> Result<(), ProviderError> {
        self.stats.submits += 1;
        Ok(())
    }

    fn wait_idle(&mut self) {
        self.stats.wait_idle_calls += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{ImageFormat, ImageUsage};

    #[test]
    fn test_image_lifecycle() {
        let mut provider = HeadlessProvider::new();
        let info = provider
            .create_image(&ImageDesc {
                label: "test".into(),
                size: [64, 64],
                format: ImageFormat::Rgba8Unorm,
                usage: ImageUsage::compute_output(),
            })
            .unwrap();
        assert!(!info.is_empty());
        assert_eq!(provider.live_image_count(), 1);

        provider.destroy_image(info.image);
        assert_eq!(provider.live_image_count(), 0);
        assert_eq!(provider.stats.images_destroyed, 1);

        // Double destroy is a no-op
        provider.destroy_image(info.image);
        assert_eq!(provider.stats.images_destroyed, 1);
    }

    #[test]
    fn test_forced_compile_failure() {
        let mut provider = HeadlessProvider::new();
        provider.fail_next_shader_compile = Some("bad token".into());
        let err = provider
            .compile_shader(&ShaderSource::compute_glsl("t", "void main(){}"))
            .unwrap_err();
        assert!(matches!(err, ProviderError::ShaderCompile(_)));
        // The failure is one-shot
        assert!(provider
            .compile_shader(&ShaderSource::compute_glsl("t", "void main(){}"))
            .is_ok());
    }
}
