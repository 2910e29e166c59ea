// SPDX-License-Identifier: MIT OR Apache-2.0
//! Module layer: one rendering effect composed of one or more passes.
//!
//! A module owns an ordered pass list, an effect-enabled flag, and the
//! per-frame chain relinking that wires each enabled pass's input to the
//! previous enabled pass's output (or to the module's external input when
//! none precedes it). Disabling an effect therefore takes effect on the
//! very next frame with zero dangling bindings, and a module with every
//! pass disabled behaves as an identity transform over its external input.

use crate::interface::{
    AccelStructureInfo, AccelStructureInput, LightGroup, LightGroupInput, ModelInfo, ModelInput,
    ShaderPassInput, ShaderPassOutput, ShaderPassRef, ShaderPassWork, TexelBufferInfo,
    TexelBufferInput, TextureInput, TextureOutput, VariableInput, VariableValue,
};
use crate::provider::{Command, CommandList, ImageInfo, ProviderError, ResourceProvider};
use indexmap::IndexMap;
use std::collections::HashSet;
use std::path::PathBuf;
use tracing::{debug, warn};

/// A named effect built from an ordered pass chain.
#[derive(Debug)]
pub struct Module {
    name: String,
    enabled: bool,
    passes: Vec<super::Pass>,
    last_executed_frame: Option<u64>,
    external_input: ImageInfo,
    external_input_set: bool,
    variables: IndexMap<u32, VariableValue>,
    merged_passes: Vec<ShaderPassRef>,
    output_changed: bool,
}

impl Module {
    /// Create a module from its passes, in chain order.
    pub fn new(name: impl Into<String>, passes: Vec<super::Pass>) -> Self {
        Self {
            name: name.into(),
            enabled: true,
            passes,
            last_executed_frame: None,
            external_input: ImageInfo::empty(),
            external_input_set: false,
            variables: IndexMap::new(),
            merged_passes: Vec::new(),
            output_changed: false,
        }
    }

    /// Module name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the effect is enabled.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Enable or disable the whole effect. A disabled effect is a no-op,
    /// not a "render black": consumers fall through to the external input.
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    /// Constituent passes.
    pub fn passes(&self) -> &[super::Pass] {
        &self.passes
    }

    /// Mutable access to the constituent passes.
    pub fn passes_mut(&mut self) -> &mut [super::Pass] {
        &mut self.passes
    }

    /// Initialize every pass at the given output size.
    pub fn init(
        &mut self,
        provider: &mut dyn ResourceProvider,
        size: [u32; 2],
    ) -> Result<(), ProviderError> {
        for pass in &mut self.passes {
            pass.init(provider, size)?;
        }
        self.output_changed = true;
        Ok(())
    }

    /// Forward a resize request to every pass (coalesced per pass).
    pub fn need_resize(&mut self, size: [u32; 2]) {
        for pass in &mut self.passes {
            pass.need_resize(size);
        }
    }

    /// Frame the module last executed, used to avoid duplicate work when a
    /// graph revisits shared upstream nodes within one frame.
    pub fn last_executed_frame(&self) -> Option<u64> {
        self.last_executed_frame
    }

    /// Re-derive the active sub-chain: each enabled pass reads the previous
    /// enabled pass's output, the first one reads the external input.
    /// O(passCount), run once per executed frame.
    fn relink_chain(&mut self) {
        let mut upstream = self.external_input;
        for pass in &mut self.passes {
            if !pass.is_enabled() {
                continue;
            }
            pass.set_texture(0, Some(&upstream));
            if let Some(output) = pass.front_image() {
                upstream = output;
            }
        }
    }

    /// Execute the effect for this frame: relink the chain, then per
    /// enabled pass apply pending resize, upload the configuration block if
    /// dirty, rewrite descriptors if needed, and record commands.
    ///
    /// Returns false when a pass could not record (failed build); the
    /// caller skips this node's output for the frame. A disabled effect
    /// returns true without recording anything.
    pub fn execute(
        &mut self,
        frame: u64,
        provider: &mut dyn ResourceProvider,
        commands: &mut CommandList,
    ) -> bool {
        if !self.enabled {
            return true;
        }
        if self.last_executed_frame == Some(frame) {
            return true;
        }
        self.last_executed_frame = Some(frame);

        self.relink_chain();

        // Merger-style modules record externally supplied passes first.
        for merged in &self.merged_passes {
            commands.push(Command::BindPipeline(merged.pipeline));
            commands.push(Command::BindDescriptorSet(merged.descriptor_set));
            match merged.work {
                ShaderPassWork::Dispatch { groups } => {
                    commands.push(Command::Dispatch { groups });
                }
                ShaderPassWork::Draw {
                    vertices,
                    instances,
                } => commands.push(Command::Draw {
                    vertices,
                    instances,
                }),
            }
        }

        for pass in &mut self.passes {
            if !pass.is_enabled() {
                continue;
            }
            match pass.resize_if_needed(provider) {
                Ok(resized) => {
                    if resized {
                        self.output_changed = true;
                    }
                }
                Err(err) => {
                    warn!(module = %self.name, pass = %pass.name(), error = %err,
                        "pass resize failed, skipping module this frame");
                    return false;
                }
            }
            pass.upload_ubo_if_dirty(provider);
            pass.update_descriptors_if_needed(provider);
            if !pass.record(commands) {
                warn!(module = %self.name, pass = %pass.name(), "pass cannot record, skipping module this frame");
                return false;
            }
        }
        true
    }

    /// Take the "output regenerated" flag, at most once per regeneration.
    /// The owning node sends one `TextureUpdated` notification per take.
    pub fn take_output_changed(&mut self) -> bool {
        let pass_changed = self
            .passes
            .iter_mut()
            .fold(false, |acc, p| p.take_output_changed() || acc);
        std::mem::take(&mut self.output_changed) || pass_changed
    }

    /// Forward a shader-change set to every pass. Returns whether any pass
    /// rebuilt its pipeline. Compile failures are retained per pass and do
    /// not abort the remaining passes.
    pub fn update_shaders(
        &mut self,
        provider: &mut dyn ResourceProvider,
        changed: &HashSet<PathBuf>,
    ) -> bool {
        let mut any = false;
        for pass in &mut self.passes {
            match pass.recompile_shaders(provider, changed) {
                Ok(recompiled) => any |= recompiled,
                Err(err) => {
                    warn!(module = %self.name, pass = %pass.name(), error = %err, "shader recompile failed");
                }
            }
        }
        if any {
            self.output_changed = true;
        }
        any
    }

    /// Fence-gated end of frame: flip ping-pong image sets.
    pub fn end_frame(&mut self) {
        for pass in &mut self.passes {
            pass.swap();
        }
    }

    /// Deterministic teardown of every pass.
    pub fn unit(&mut self, provider: &mut dyn ResourceProvider) {
        for pass in &mut self.passes {
            pass.unit(provider);
        }
        debug!(module = %self.name, "module destroyed");
    }

    /// The value of a routed variable, if any.
    pub fn variable(&self, index: u32) -> Option<&VariableValue> {
        self.variables.get(&index)
    }
}

impl TextureInput for Module {
    fn set_texture(&mut self, binding: u32, info: Option<&ImageInfo>) {
        if binding == 0 {
            // External input feeds the chain head and the identity bypass.
            self.external_input = info.copied().unwrap_or_else(ImageInfo::empty);
            self.external_input_set = info.is_some();
        }
        for pass in &mut self.passes {
            pass.set_texture(binding, info);
        }
    }
}

impl TextureOutput for Module {
    fn get_image_info(&self, binding: u32) -> Option<ImageInfo> {
        // Last enabled pass's output, or the pass-through input when every
        // effect is off — an all-disabled chain is an identity transform.
        if self.enabled {
            if let Some(output) = self
                .passes
                .iter()
                .rev()
                .find(|p| p.is_enabled())
                .and_then(|p| p.get_image_info(binding))
            {
                return Some(output);
            }
        }
        if self.external_input_set {
            Some(self.external_input)
        } else {
            None
        }
    }
}

impl LightGroupInput for Module {
    fn set_light_group(&mut self, group: Option<&LightGroup>) {
        for pass in &mut self.passes {
            pass.set_light_group(group);
        }
    }
}

impl ModelInput for Module {
    fn set_model(&mut self, model: Option<&ModelInfo>) {
        for pass in &mut self.passes {
            pass.set_model(model);
        }
    }
}

impl TexelBufferInput for Module {
    fn set_texel_buffer(&mut self, binding: u32, info: Option<&TexelBufferInfo>) {
        for pass in &mut self.passes {
            pass.set_texel_buffer(binding, info);
        }
    }
}

impl AccelStructureInput for Module {
    fn set_accel_structure(&mut self, info: Option<&AccelStructureInfo>) {
        for pass in &mut self.passes {
            pass.set_accel_structure(info);
        }
    }
}

impl VariableInput for Module {
    fn set_variable(&mut self, index: u32, value: Option<&VariableValue>) {
        match value {
            Some(value) => {
                self.variables.insert(index, *value);
            }
            None => {
                self.variables.swap_remove(&index);
            }
        }
        for pass in &mut self.passes {
            pass.need_ubo_upload();
        }
    }
}

impl ShaderPassInput for Module {
    fn set_shader_passes(&mut self, passes: Option<&[ShaderPassRef]>) {
        self.merged_passes = passes.map(<[_]>::to_vec).unwrap_or_default();
    }
}

impl ShaderPassOutput for Module {
    fn get_shader_passes(&self) -> Option<Vec<ShaderPassRef>> {
        let refs: Vec<ShaderPassRef> = self
            .passes
            .iter()
            .filter(|p| p.is_enabled())
            .filter_map(super::Pass::shader_pass_ref)
            .collect();
        if refs.is_empty() {
            None
        } else {
            Some(refs)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headless::HeadlessProvider;
    use crate::pass::Pass;
    use crate::provider::{BindingDesc, BindingKind, ImageId, ShaderSource};

    fn effect_pass(name: &str) -> Pass {
        Pass::compute(
            name,
            ShaderSource::compute_glsl(name, "void main() {}"),
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
        )
    }

    fn external_image(id: u64) -> ImageInfo {
        ImageInfo {
            image: ImageId(id),
            size: [256, 256],
            format: crate::provider::ImageFormat::Rgba8Unorm,
        }
    }

    #[test]
    fn test_all_disabled_is_identity() {
        let mut module = Module::new(
            "post",
            vec![effect_pass("blur"), effect_pass("tonemap")],
        );
        for pass in module.passes_mut() {
            pass.set_enabled(false);
        }

        let input = external_image(7);
        module.set_texture(0, Some(&input));
        // The identical descriptor set through the input comes back out.
        assert_eq!(module.get_image_info(0), Some(input));
    }

    #[test]
    fn test_disabled_module_is_identity() {
        let mut module = Module::new("post", vec![effect_pass("blur")]);
        let mut provider = HeadlessProvider::new();
        module.init(&mut provider, [64, 64]).unwrap();
        module.set_enabled(false);

        let input = external_image(7);
        module.set_texture(0, Some(&input));
        assert_eq!(module.get_image_info(0), Some(input));

        // Disabled: no commands recorded at all.
        let mut commands = CommandList::new();
        assert!(module.execute(1, &mut provider, &mut commands));
        assert!(commands.is_empty());
    }

    #[test]
    fn test_chain_skips_disabled_passes() {
        // Seven passes, only #3 and #5 (1-based) enabled: the active chain
        // is external input -> pass3 -> pass5.
        let mut provider = HeadlessProvider::new();
        let passes: Vec<Pass> = (1..=7).map(|i| effect_pass(&format!("fx{i}"))).collect();
        let mut module = Module::new("post", passes);
        module.init(&mut provider, [128, 128]).unwrap();
        for (index, pass) in module.passes_mut().iter_mut().enumerate() {
            pass.set_enabled(index == 2 || index == 4);
        }

        let input = external_image(99);
        module.set_texture(0, Some(&input));

        let mut commands = CommandList::new();
        assert!(module.execute(1, &mut provider, &mut commands));

        // Exactly two dispatches: pass3 and pass5.
        let dispatches = commands
            .commands()
            .iter()
            .filter(|c| matches!(c, Command::Dispatch { .. }))
            .count();
        assert_eq!(dispatches, 2);

        // pass3 reads the external input, pass5 reads pass3's output.
        let pass3_output = module.passes()[2].front_image().unwrap();
        assert_eq!(module.passes()[2].bound_texture(0), Some(&input));
        assert_eq!(module.passes()[4].bound_texture(0), Some(&pass3_output));

        // Module output is pass5's output.
        let pass5_output = module.passes()[4].front_image().unwrap();
        assert_eq!(module.get_image_info(0), Some(pass5_output));
    }

    #[test]
    fn test_frame_dedupe() {
        let mut provider = HeadlessProvider::new();
        let mut module = Module::new("fx", vec![effect_pass("only")]);
        module.init(&mut provider, [64, 64]).unwrap();

        let mut commands = CommandList::new();
        assert!(module.execute(5, &mut provider, &mut commands));
        let recorded = commands.len();
        // Revisited through a shared upstream node in the same frame:
        // nothing is recorded twice.
        assert!(module.execute(5, &mut provider, &mut commands));
        assert_eq!(commands.len(), recorded);
        assert_eq!(module.last_executed_frame(), Some(5));
    }

    #[test]
    fn test_output_changed_once_per_regeneration() {
        let mut provider = HeadlessProvider::new();
        let mut module = Module::new("fx", vec![effect_pass("only")]);
        module.init(&mut provider, [64, 64]).unwrap();
        assert!(module.take_output_changed());
        assert!(!module.take_output_changed());

        module.need_resize([128, 128]);
        let mut commands = CommandList::new();
        module.execute(1, &mut provider, &mut commands);
        assert!(module.take_output_changed());
        assert!(!module.take_output_changed());
    }

    #[test]
    fn test_merged_passes_recorded() {
        let mut provider = HeadlessProvider::new();
        let mut module = Module::new("merger", vec![effect_pass("own")]);
        module.init(&mut provider, [64, 64]).unwrap();

        let external = ShaderPassRef {
            pipeline: crate::provider::PipelineId(77),
            descriptor_set: crate::provider::DescriptorSetId(78),
            work: ShaderPassWork::Dispatch { groups: [4, 4, 1] },
        };
        module.set_shader_passes(Some(&[external]));

        let mut commands = CommandList::new();
        assert!(module.execute(1, &mut provider, &mut commands));
        assert_eq!(
            commands.commands()[0],
            Command::BindPipeline(crate::provider::PipelineId(77))
        );

        module.set_shader_passes(None);
        let mut commands = CommandList::new();
        assert!(module.execute(2, &mut provider, &mut commands));
        assert!(!commands
            .commands()
            .iter()
            .any(|c| matches!(c, Command::BindPipeline(p) if p.0 == 77)));
    }
}
