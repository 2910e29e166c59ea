// SPDX-License-Identifier: MIT OR Apache-2.0
//! Built-in node behaviors.
//!
//! [`ModuleNode`] adapts a rendering [`Module`] to the graph; the producer
//! nodes ([`LightGroupNode`], [`VariableNode`]) own plain data edited
//! through the GUI and hand it downstream through their capability.

use crate::node::{ExecuteContext, Node, NodeBehavior};
use crate::slot::{Slot, SlotKind};
use lumo_render::interface::{
    AccelStructureInput, Light, LightGroup, LightGroupInput, LightGroupOutput, ModelInput,
    ShaderPassInput, ShaderPassOutput, TexelBufferInput, TextureInput, TextureOutput,
    VariableInput, VariableOutput, VariableValue,
};
use lumo_render::provider::ResourceProvider;
use lumo_render::Module;
use indexmap::IndexMap;
use std::collections::HashSet;
use std::path::PathBuf;

/// Graph-side adapter around a rendering module. Forwards execution,
/// shader updates and every capability the module supports.
pub struct ModuleNode {
    module: Module,
}

impl ModuleNode {
    /// Wrap a module.
    pub fn new(module: Module) -> Self {
        Self { module }
    }

    /// The wrapped module.
    pub fn module(&self) -> &Module {
        &self.module
    }

    /// The wrapped module, mutably.
    pub fn module_mut(&mut self) -> &mut Module {
        &mut self.module
    }

    /// Build a standard single-texture effect node: one texture input at
    /// binding 0, one texture output.
    pub fn effect_node(type_tag: impl Into<String>, module: Module) -> Node {
        let name = module.name().to_owned();
        Node::new(type_tag, name, Box::new(Self::new(module)))
            .with_input(Slot::input("in", SlotKind::Texture2D, 0))
            .with_output(Slot::output("out", SlotKind::Texture2D, 0))
    }
}

impl NodeBehavior for ModuleNode {
    fn execute(&mut self, ctx: &mut ExecuteContext<'_>) -> bool {
        self.module.execute(ctx.frame, ctx.provider, ctx.commands)
    }

    fn take_output_changed(&mut self) -> bool {
        self.module.take_output_changed()
    }

    fn update_shaders(
        &mut self,
        provider: &mut dyn ResourceProvider,
        changed: &HashSet<PathBuf>,
    ) -> bool {
        self.module.update_shaders(provider, changed)
    }

    fn end_frame(&mut self) {
        self.module.end_frame();
    }

    fn unit(&mut self, provider: &mut dyn ResourceProvider) {
        self.module.unit(provider);
    }

    fn texture_input(&mut self) -> Option<&mut dyn TextureInput> {
        Some(&mut self.module)
    }

    fn texture_output(&self) -> Option<&dyn TextureOutput> {
        Some(&self.module)
    }

    fn light_group_input(&mut self) -> Option<&mut dyn LightGroupInput> {
        Some(&mut self.module)
    }

    fn model_input(&mut self) -> Option<&mut dyn ModelInput> {
        Some(&mut self.module)
    }

    fn texel_buffer_input(&mut self) -> Option<&mut dyn TexelBufferInput> {
        Some(&mut self.module)
    }

    fn accel_structure_input(&mut self) -> Option<&mut dyn AccelStructureInput> {
        Some(&mut self.module)
    }

    fn variable_input(&mut self) -> Option<&mut dyn VariableInput> {
        Some(&mut self.module)
    }

    fn shader_pass_input(&mut self) -> Option<&mut dyn ShaderPassInput> {
        Some(&mut self.module)
    }

    fn shader_pass_output(&self) -> Option<&dyn ShaderPassOutput> {
        Some(&self.module)
    }
}

/// Produces a light group edited through the node's widgets.
#[derive(Default)]
pub struct LightGroupNode {
    group: LightGroup,
    changed: bool,
}

impl LightGroupNode {
    /// Create a node with a single default light.
    pub fn new() -> Self {
        Self {
            group: LightGroup {
                lights: vec![Light::default()],
            },
            changed: true,
        }
    }

    /// Replace the whole group.
    pub fn set_lights(&mut self, lights: Vec<Light>) {
        self.group.lights = lights;
        self.changed = true;
    }

    /// Append a light.
    pub fn add_light(&mut self, light: Light) {
        self.group.lights.push(light);
        self.changed = true;
    }

    /// Build the graph node: one light group output.
    pub fn node() -> Node {
        Node::new("light_group", "Lights", Box::new(Self::new()))
            .with_output(Slot::output("lights", SlotKind::LightGroup, 0))
    }
}

impl NodeBehavior for LightGroupNode {
    fn execute(&mut self, _ctx: &mut ExecuteContext<'_>) -> bool {
        true
    }

    fn take_output_changed(&mut self) -> bool {
        std::mem::take(&mut self.changed)
    }

    fn light_group_output(&self) -> Option<&dyn LightGroupOutput> {
        Some(self)
    }
}

impl LightGroupOutput for LightGroupNode {
    fn get_light_group(&self) -> Option<LightGroup> {
        Some(self.group.clone())
    }
}

/// Produces plain values routed into module configuration blocks.
#[derive(Default)]
pub struct VariableNode {
    values: IndexMap<u32, VariableValue>,
    changed: bool,
}

impl VariableNode {
    /// Create an empty variable node.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the value at an output index.
    pub fn set_value(&mut self, index: u32, value: VariableValue) {
        self.values.insert(index, value);
        self.changed = true;
    }

    /// Build the graph node with one variable output per declared index.
    pub fn node(outputs: &[(u32, &str)]) -> Node {
        let mut node = Node::new("variable", "Variables", Box::new(Self::new()));
        for (index, name) in outputs {
            node = node.with_output(Slot::output(*name, SlotKind::Variable, *index));
        }
        node
    }
}

impl NodeBehavior for VariableNode {
    fn execute(&mut self, _ctx: &mut ExecuteContext<'_>) -> bool {
        true
    }

    fn take_output_changed(&mut self) -> bool {
        std::mem::take(&mut self.changed)
    }

    fn variable_output(&self) -> Option<&dyn VariableOutput> {
        Some(self)
    }
}

impl VariableOutput for VariableNode {
    fn get_variable(&self, index: u32) -> Option<VariableValue> {
        self.values.get(&index).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Graph;
    use crate::slot::SlotRef;
    use lumo_render::headless::HeadlessProvider;
    use lumo_render::pass::Pass;
    use lumo_render::provider::{BindingDesc, BindingKind, ShaderSource};

    fn blur_module(provider: &mut HeadlessProvider) -> Module {
        let pass = Pass::compute(
            "blur",
            ShaderSource::compute_glsl("blur", "void main() {}"),
            vec![
                BindingDesc {
                    binding: 0,
                    kind: BindingKind::SampledImage,
                },
                BindingDesc {
                    binding: 1,
                    kind: BindingKind::StorageImage,
                },
            ],
            [8, 8],
        );
        let mut module = Module::new("blur", vec![pass]);
        module.init(provider, [64, 64]).unwrap();
        module
    }

    #[test]
    fn test_module_node_executes_and_tears_down() {
        let mut provider = HeadlessProvider::new();
        let module = blur_module(&mut provider);
        let mut graph = Graph::new("root");
        let id = graph.add_node(ModuleNode::effect_node("blur", module));

        let mut commands = lumo_render::CommandList::new();
        graph.execute(1, &mut provider, &mut commands);
        assert!(!commands.is_empty());

        graph.unit(&mut provider);
        assert_eq!(provider.live_image_count(), 0);
        assert_eq!(provider.live_pipeline_count(), 0);
        assert!(graph.node(id).is_none());
    }

    #[test]
    fn test_light_group_flows_into_module() {
        let mut provider = HeadlessProvider::new();
        let module = blur_module(&mut provider);
        let mut graph = Graph::new("root");

        let lights = graph.add_node(LightGroupNode::node());
        let effect = graph.add_node(
            ModuleNode::effect_node("blur", module)
                .with_input(Slot::input("lights", SlotKind::LightGroup, 0)),
        );

        let from = SlotRef::new(
            lights,
            graph.node(lights).unwrap().slot_by_name("lights").unwrap().id,
        );
        let to = SlotRef::new(
            effect,
            graph.node(effect).unwrap().slot_by_name("lights").unwrap().id,
        );
        // Notify-on-connect: the default light lands without a frame.
        graph.connect(from, to).unwrap();

        let mut commands = lumo_render::CommandList::new();
        graph.execute(1, &mut provider, &mut commands);
        assert!(!commands.is_empty());
    }

    #[test]
    fn test_variable_node_produces_values() {
        let mut node = VariableNode::new();
        node.set_value(0, VariableValue::Float(0.5));
        assert_eq!(node.get_variable(0), Some(VariableValue::Float(0.5)));
        assert_eq!(node.get_variable(1), None);
        assert!(node.take_output_changed());
        assert!(!node.take_output_changed());
    }
}
