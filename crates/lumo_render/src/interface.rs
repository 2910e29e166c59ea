// SPDX-License-Identifier: MIT OR Apache-2.0
//! Capability interfaces between producer and consumer entities.
//!
//! Cross-node resource hand-off is polymorphic over a small closed set of
//! resource kinds. Instead of downcasting, the graph engine asks an entity
//! for the capability it needs (`texture_output()`, `light_group_input()`,
//! ...) and gets `None` when unsupported.
//!
//! Contract shared by all capabilities: getters return `Option` (a producer
//! that has not produced yet returns `None`, never an uninitialized handle)
//! and setters take `Option<&T>` where `None` means "withdrawn" — the
//! consumer must substitute the kind's designated empty value rather than
//! retain a stale handle.

use crate::provider::{
    AccelStructureId, BufferInfo, DescriptorSetId, ImageFormat, ImageInfo, PipelineId,
};
use serde::{Deserialize, Serialize};

/// Kind of a light.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LightKind {
    /// Point light
    Point,
    /// Directional light
    Directional,
    /// Spot light
    Spot,
}

/// One light in a light group.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Light {
    /// Kind
    pub kind: LightKind,
    /// World position (ignored for directional)
    pub position: [f32; 3],
    /// Direction (ignored for point)
    pub direction: [f32; 3],
    /// RGBA color
    pub color: [f32; 4],
    /// Intensity multiplier
    pub intensity: f32,
}

impl Default for Light {
    fn default() -> Self {
        Self {
            kind: LightKind::Point,
            position: [0.0, 1.0, 0.0],
            direction: [0.0, -1.0, 0.0],
            color: [1.0, 1.0, 1.0, 1.0],
            intensity: 1.0,
        }
    }
}

/// A group of lights handed from a lighting node to shading passes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LightGroup {
    /// Lights in the group
    pub lights: Vec<Light>,
}

impl LightGroup {
    /// The empty group consumers fall back to when withdrawn.
    pub fn empty() -> Self {
        Self::default()
    }
}

/// Mesh data handed from a model producer to mesh passes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ModelInfo {
    /// Vertex buffer region
    pub vertex_buffer: BufferInfo,
    /// Index buffer region (empty when non-indexed)
    pub index_buffer: BufferInfo,
    /// Vertex count
    pub vertex_count: u32,
    /// Index count (0 when non-indexed)
    pub index_count: u32,
}

impl ModelInfo {
    /// The empty model consumers fall back to when withdrawn.
    pub const fn empty() -> Self {
        Self {
            vertex_buffer: BufferInfo::empty(),
            index_buffer: BufferInfo::empty(),
            vertex_count: 0,
            index_count: 0,
        }
    }

    /// Whether this is the empty placeholder.
    pub fn is_empty(&self) -> bool {
        self.vertex_buffer.is_empty()
    }
}

/// Texel buffer descriptor exchanged between passes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TexelBufferInfo {
    /// Backing buffer region
    pub buffer: BufferInfo,
    /// Texel format
    pub format: ImageFormat,
    /// Texel count
    pub count: u32,
}

impl TexelBufferInfo {
    /// The empty texel buffer consumers fall back to when withdrawn.
    pub const fn empty() -> Self {
        Self {
            buffer: BufferInfo::empty(),
            format: ImageFormat::Rgba32Float,
            count: 0,
        }
    }
}

impl Default for TexelBufferInfo {
    fn default() -> Self {
        Self::empty()
    }
}

/// Acceleration structure handle exchanged between passes. Building the
/// structure itself is an external capability; only the handle flows here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AccelStructureInfo {
    /// Backend handle
    pub accel: AccelStructureId,
}

impl AccelStructureInfo {
    /// The empty handle consumers fall back to when withdrawn.
    pub const fn empty() -> Self {
        Self {
            accel: AccelStructureId::NULL,
        }
    }

    /// Whether this is the empty placeholder.
    pub fn is_empty(&self) -> bool {
        self.accel.is_null()
    }
}

/// A plain value flowing over a Variable slot.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum VariableValue {
    /// Boolean
    Bool(bool),
    /// Signed integer
    Int(i32),
    /// Unsigned integer
    UInt(u32),
    /// Float
    Float(f32),
}

/// Enough of a pass to let a merger node record it into its own frame:
/// the built pipeline, its descriptor set, and the work to issue.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShaderPassRef {
    /// Built pipeline
    pub pipeline: PipelineId,
    /// Descriptor set bound for the work
    pub descriptor_set: DescriptorSetId,
    /// Work to issue
    pub work: ShaderPassWork,
}

/// Work issued when recording a referenced shader pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ShaderPassWork {
    /// Compute dispatch with fixed group counts
    Dispatch {
        /// Work group counts
        groups: [u32; 3],
    },
    /// Non-indexed draw
    Draw {
        /// Vertex count
        vertices: u32,
        /// Instance count
        instances: u32,
    },
}

/// Consumer of a 2D texture.
pub trait TextureInput {
    /// Bind (or withdraw, on `None`) the texture at the given descriptor
    /// binding index. Must never retain a previous handle after `None`.
    fn set_texture(&mut self, binding: u32, info: Option<&ImageInfo>);
}

/// Producer of a 2D texture.
pub trait TextureOutput {
    /// Current front (last completed) image for the given output binding,
    /// or `None` if nothing has been produced yet.
    fn get_image_info(&self, binding: u32) -> Option<ImageInfo>;
}

/// Consumer of a light group.
pub trait LightGroupInput {
    /// Replace (or withdraw) the bound light group.
    fn set_light_group(&mut self, group: Option<&LightGroup>);
}

/// Producer of a light group.
pub trait LightGroupOutput {
    /// Current light group, or `None` if not yet produced.
    fn get_light_group(&self) -> Option<LightGroup>;
}

/// Consumer of a model.
pub trait ModelInput {
    /// Replace (or withdraw) the bound model.
    fn set_model(&mut self, model: Option<&ModelInfo>);
}

/// Producer of a model.
pub trait ModelOutput {
    /// Current model, or `None` if not yet produced.
    fn get_model(&self) -> Option<ModelInfo>;
}

/// Consumer of a texel buffer.
pub trait TexelBufferInput {
    /// Bind (or withdraw) the texel buffer at the given binding index.
    fn set_texel_buffer(&mut self, binding: u32, info: Option<&TexelBufferInfo>);
}

/// Producer of a texel buffer.
pub trait TexelBufferOutput {
    /// Current texel buffer for the given output binding.
    fn get_texel_buffer(&self, binding: u32) -> Option<TexelBufferInfo>;
}

/// Consumer of an acceleration structure.
pub trait AccelStructureInput {
    /// Bind (or withdraw) the acceleration structure.
    fn set_accel_structure(&mut self, info: Option<&AccelStructureInfo>);
}

/// Producer of an acceleration structure.
pub trait AccelStructureOutput {
    /// Current acceleration structure, or `None` if not yet built.
    fn get_accel_structure(&self) -> Option<AccelStructureInfo>;
}

/// Consumer of a variable value.
pub trait VariableInput {
    /// Replace (or withdraw) the variable at the given index.
    fn set_variable(&mut self, index: u32, value: Option<&VariableValue>);
}

/// Producer of a variable value.
pub trait VariableOutput {
    /// Current value of the variable at the given index.
    fn get_variable(&self, index: u32) -> Option<VariableValue>;
}

/// Consumer of a set of shader passes (merger-style modules).
pub trait ShaderPassInput {
    /// Replace (or withdraw) the referenced passes.
    fn set_shader_passes(&mut self, passes: Option<&[ShaderPassRef]>);
}

/// Producer of a set of shader passes.
pub trait ShaderPassOutput {
    /// Current referenced passes, or `None` if not yet built.
    fn get_shader_passes(&self) -> Option<Vec<ShaderPassRef>>;
}
