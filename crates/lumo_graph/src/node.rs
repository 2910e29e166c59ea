// SPDX-License-Identifier: MIT OR Apache-2.0
//! Node definitions: the graph-visible unit wrapping one module.
//!
//! A node never reaches into another node's internals. Everything it
//! offers to the engine goes through [`NodeBehavior`], whose capability
//! lookup methods (`texture_input()`, `light_group_output()`, ...) replace
//! runtime downcasts: the engine asks for a capability and gets `None`
//! when the node does not support it.

use crate::slot::{Slot, SlotId};
use indexmap::IndexMap;
use lumo_render::interface::{
    AccelStructureInput, AccelStructureOutput, LightGroupInput, LightGroupOutput, ModelInput,
    ModelOutput, ShaderPassInput, ShaderPassOutput, TexelBufferInput, TexelBufferOutput,
    TextureInput, TextureOutput, VariableInput, VariableOutput,
};
use lumo_render::provider::{CommandList, ResourceProvider};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;
use uuid::Uuid;

/// Unique identifier for a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeId(pub Uuid);

impl NodeId {
    /// Create a new random node ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

/// When a node executes within the per-frame traversal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionPolicy {
    /// Execute every frame
    Always,
    /// Execute only when marked needed (input changed, parameter edited)
    WhenNeeded,
}

/// Per-frame execution context handed to node behaviors. Explicit context
/// object, constructed by the frame driver; no global state.
pub struct ExecuteContext<'a> {
    /// Monotonic frame counter
    pub frame: u64,
    /// The graphics backend
    pub provider: &'a mut dyn ResourceProvider,
    /// The frame's command list
    pub commands: &'a mut CommandList,
}

/// Behavior of a node: execution plus capability lookup.
///
/// The default for every capability method is `None`; implementors opt in
/// to exactly the resource kinds they produce or consume.
pub trait NodeBehavior {
    /// Execute the node's module for this frame. Returning false means the
    /// node could not render (failed pipeline build); the graph skips its
    /// output this frame and downstream consumers degrade gracefully.
    fn execute(&mut self, ctx: &mut ExecuteContext<'_>) -> bool;

    /// Whether the output was regenerated since the last take. The graph
    /// sends exactly one notification per take that returns true.
    fn take_output_changed(&mut self) -> bool {
        false
    }

    /// Forward a shader-change set; returns whether anything recompiled.
    fn update_shaders(
        &mut self,
        _provider: &mut dyn ResourceProvider,
        _changed: &HashSet<PathBuf>,
    ) -> bool {
        false
    }

    /// GUI hook: draw the node's parameter widgets. Returns whether the
    /// user changed a parameter. The engine only uses the boolean to set
    /// its own dirty flags; widget internals live in the GUI layer.
    fn draw_widgets(&mut self, _frame: u64) -> bool {
        false
    }

    /// Fence-gated end of frame (ping-pong swaps).
    fn end_frame(&mut self) {}

    /// Deterministic teardown of owned GPU objects.
    fn unit(&mut self, _provider: &mut dyn ResourceProvider) {}

    /// Texture consumer capability, if supported.
    fn texture_input(&mut self) -> Option<&mut dyn TextureInput> {
        None
    }

    /// Texture producer capability, if supported.
    fn texture_output(&self) -> Option<&dyn TextureOutput> {
        None
    }

    /// Light group consumer capability, if supported.
    fn light_group_input(&mut self) -> Option<&mut dyn LightGroupInput> {
        None
    }

    /// Light group producer capability, if supported.
    fn light_group_output(&self) -> Option<&dyn LightGroupOutput> {
        None
    }

    /// Model consumer capability, if supported.
    fn model_input(&mut self) -> Option<&mut dyn ModelInput> {
        None
    }

    /// Model producer capability, if supported.
    fn model_output(&self) -> Option<&dyn ModelOutput> {
        None
    }

    /// Texel buffer consumer capability, if supported.
    fn texel_buffer_input(&mut self) -> Option<&mut dyn TexelBufferInput> {
        None
    }

    /// Texel buffer producer capability, if supported.
    fn texel_buffer_output(&self) -> Option<&dyn TexelBufferOutput> {
        None
    }

    /// Acceleration structure consumer capability, if supported.
    fn accel_structure_input(&mut self) -> Option<&mut dyn AccelStructureInput> {
        None
    }

    /// Acceleration structure producer capability, if supported.
    fn accel_structure_output(&self) -> Option<&dyn AccelStructureOutput> {
        None
    }

    /// Variable consumer capability, if supported.
    fn variable_input(&mut self) -> Option<&mut dyn VariableInput> {
        None
    }

    /// Variable producer capability, if supported.
    fn variable_output(&self) -> Option<&dyn VariableOutput> {
        None
    }

    /// Shader pass consumer capability (mergers), if supported.
    fn shader_pass_input(&mut self) -> Option<&mut dyn ShaderPassInput> {
        None
    }

    /// Shader pass producer capability, if supported.
    fn shader_pass_output(&self) -> Option<&dyn ShaderPassOutput> {
        None
    }
}

/// A node instance in a graph.
pub struct Node {
    /// Unique instance ID
    pub id: NodeId,
    /// Node type tag (registry key)
    pub type_tag: String,
    /// Display name (user-editable)
    pub name: String,
    /// Position on the editor canvas
    pub position: [f32; 2],
    /// Execution policy
    pub policy: ExecutionPolicy,
    /// Whether a `WhenNeeded` node must execute this frame
    pub needs_execution: bool,
    /// Set when the node failed to render last frame, to withdraw its
    /// outputs once rather than every frame
    pub(crate) failed: bool,
    inputs: Vec<Slot>,
    outputs: Vec<Slot>,
    pub(crate) behavior: Box<dyn NodeBehavior>,
    /// Optional nested graph executed before the node's own module
    pub child_graph: Option<crate::graph::Graph>,
}

impl Node {
    /// Create a node from its type tag and behavior.
    pub fn new(
        type_tag: impl Into<String>,
        name: impl Into<String>,
        behavior: Box<dyn NodeBehavior>,
    ) -> Self {
        Self {
            id: NodeId::new(),
            type_tag: type_tag.into(),
            name: name.into(),
            position: [0.0, 0.0],
            policy: ExecutionPolicy::Always,
            needs_execution: true,
            failed: false,
            inputs: Vec::new(),
            outputs: Vec::new(),
            behavior,
            child_graph: None,
        }
    }

    /// Set the canvas position.
    pub fn with_position(mut self, x: f32, y: f32) -> Self {
        self.position = [x, y];
        self
    }

    /// Add an input slot.
    pub fn with_input(mut self, slot: Slot) -> Self {
        self.inputs.push(slot);
        self
    }

    /// Add an output slot.
    pub fn with_output(mut self, slot: Slot) -> Self {
        self.outputs.push(slot);
        self
    }

    /// Set the execution policy.
    pub fn with_policy(mut self, policy: ExecutionPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Input slots, in declaration order.
    pub fn inputs(&self) -> &[Slot] {
        &self.inputs
    }

    /// Output slots, in declaration order.
    pub fn outputs(&self) -> &[Slot] {
        &self.outputs
    }

    /// Find a slot (input or output) by ID.
    pub fn slot(&self, slot_id: SlotId) -> Option<&Slot> {
        self.inputs
            .iter()
            .find(|s| s.id == slot_id)
            .or_else(|| self.outputs.iter().find(|s| s.id == slot_id))
    }

    /// Find a slot (input or output) by ID, mutably.
    pub(crate) fn slot_mut(&mut self, slot_id: SlotId) -> Option<&mut Slot> {
        self.inputs
            .iter_mut()
            .find(|s| s.id == slot_id)
            .or_else(|| self.outputs.iter_mut().find(|s| s.id == slot_id))
    }

    /// Find a slot by name, searching inputs then outputs.
    pub fn slot_by_name(&self, name: &str) -> Option<&Slot> {
        self.inputs
            .iter()
            .find(|s| s.name == name)
            .or_else(|| self.outputs.iter().find(|s| s.name == name))
    }

    /// The node's behavior, for capability queries.
    pub fn behavior(&self) -> &dyn NodeBehavior {
        self.behavior.as_ref()
    }

    /// The node's behavior, mutably.
    pub fn behavior_mut(&mut self) -> &mut dyn NodeBehavior {
        self.behavior.as_mut()
    }

    /// Mark the node as needing execution on the next frame.
    pub fn mark_needed(&mut self) {
        self.needs_execution = true;
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.id)
            .field("type_tag", &self.type_tag)
            .field("name", &self.name)
            .field("inputs", &self.inputs.len())
            .field("outputs", &self.outputs.len())
            .finish_non_exhaustive()
    }
}

/// Factory producing a fresh node of one type.
pub type NodeFactory = Box<dyn Fn() -> Node + Send + Sync>;

/// Registry of node templates, used by the editor's "add node" menu and by
/// project load to rebuild behaviors from blueprints.
#[derive(Default)]
pub struct NodeRegistry {
    factories: IndexMap<String, NodeFactory>,
}

impl NodeRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a node template under its type tag.
    pub fn register(&mut self, type_tag: impl Into<String>, factory: NodeFactory) {
        self.factories.insert(type_tag.into(), factory);
    }

    /// Registered type tags, in registration order.
    pub fn type_tags(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }

    /// Create a fresh node of the given type, if registered.
    pub fn create(&self, type_tag: &str) -> Option<Node> {
        self.factories.get(type_tag).map(|f| f())
    }
}

impl std::fmt::Debug for NodeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeRegistry")
            .field("types", &self.factories.keys().collect::<Vec<_>>())
            .finish()
    }
}
