// SPDX-License-Identifier: MIT OR Apache-2.0
//! Frame driver over the root graph.
//!
//! The manager owns the root graph and the monotonic frame counter, and
//! sequences one frame as: execute in dependency order, submit, flush
//! deferred removals, then (once the backend fence for the frame has
//! signalled) flip ping-pong buffers via [`NodeManager::end_frame`].

use crate::graph::Graph;
use crate::node::NodeId;
use lumo_render::provider::{CommandList, ProviderError, ResourceProvider};
use std::collections::HashSet;
use std::path::PathBuf;
use tracing::{debug, error, info};

/// Owns the root graph and drives per-frame execution.
#[derive(Debug)]
pub struct NodeManager {
    root: Graph,
    frame: u64,
    commands: CommandList,
}

impl NodeManager {
    /// Create a manager over an empty root graph.
    pub fn new() -> Self {
        Self::with_root(Graph::new("root"))
    }

    /// Create a manager over an existing graph (project load).
    pub fn with_root(root: Graph) -> Self {
        Self {
            root,
            frame: 0,
            commands: CommandList::new(),
        }
    }

    /// The root graph.
    pub fn root(&self) -> &Graph {
        &self.root
    }

    /// The root graph, mutably (editing operations).
    pub fn root_mut(&mut self) -> &mut Graph {
        &mut self.root
    }

    /// Frames executed so far.
    pub fn frame(&self) -> u64 {
        self.frame
    }

    /// Commands recorded by the most recent frame.
    pub fn last_commands(&self) -> &CommandList {
        &self.commands
    }

    /// Execute one frame: run the graph in dependency order, submit the
    /// recorded commands, then destroy any nodes whose removal was deferred
    /// (safe here because their links were already broken before this
    /// frame's recording started).
    pub fn execute_frame(
        &mut self,
        provider: &mut dyn ResourceProvider,
    ) -> Result<(), ProviderError> {
        self.frame += 1;
        self.commands.clear();
        self.root.execute(self.frame, provider, &mut self.commands);
        provider.submit(&self.commands)?;
        debug!(frame = self.frame, commands = self.commands.len(), "frame submitted");
        self.root.flush_removals(provider);
        Ok(())
    }

    /// Flip ping-pong buffers across the graph. Call only after the
    /// backend signals the frame's work is complete; swapping earlier
    /// would let the next frame read an image still being written.
    pub fn end_frame(&mut self) {
        self.root.end_frame();
    }

    /// Route a set of changed shader files through the graph. Any node
    /// that rebuilds a pipeline is marked for re-execution.
    pub fn update_shaders(
        &mut self,
        provider: &mut dyn ResourceProvider,
        changed: &HashSet<PathBuf>,
    ) -> bool {
        let rebuilt = self.root.update_shaders(provider, changed);
        if rebuilt {
            info!(files = changed.len(), "shader hot reload applied");
        }
        rebuilt
    }

    /// Run the GUI widget pass over the whole graph. Nodes whose widgets
    /// changed a parameter re-execute next frame. Returns whether anything
    /// changed.
    pub fn draw_widgets(&mut self) -> bool {
        self.root.draw_widgets(self.frame)
    }

    /// Queue a node for deferred removal.
    pub fn remove_node(&mut self, id: NodeId) {
        self.root.remove_node(id);
    }

    /// Tear everything down. Waits for the device so no destroyed object
    /// is still referenced by in-flight work.
    pub fn unit(&mut self, provider: &mut dyn ResourceProvider) {
        provider.wait_idle();
        self.root.unit(provider);
        info!(frames = self.frame, "node manager destroyed");
    }

    /// Run a frame and report fatal provider errors distinctly so the
    /// caller can shut down instead of retrying.
    pub fn try_frame(&mut self, provider: &mut dyn ResourceProvider) -> bool {
        match self.execute_frame(provider) {
            Ok(()) => true,
            Err(err) if err.is_fatal() => {
                error!(error = %err, "device lost during frame submission");
                false
            }
            Err(err) => {
                error!(error = %err, "frame submission failed");
                true
            }
        }
    }
}

impl Default for NodeManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nodes::ModuleNode;
    use lumo_render::headless::HeadlessProvider;
    use lumo_render::pass::Pass;
    use lumo_render::provider::{BindingDesc, BindingKind, ShaderSource};
    use lumo_render::Module;

    fn effect(provider: &mut HeadlessProvider, name: &str) -> crate::node::Node {
        let pass = Pass::compute(
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
        );
        let mut module = Module::new(name, vec![pass]);
        module.init(provider, [64, 64]).unwrap();
        ModuleNode::effect_node(name, module)
    }

    #[test]
    fn test_frame_counter_and_submission() {
        let mut provider = HeadlessProvider::new();
        let mut manager = NodeManager::new();
        let node = effect(&mut provider, "blur");
        manager.root_mut().add_node(node);

        manager.execute_frame(&mut provider).unwrap();
        manager.end_frame();
        manager.execute_frame(&mut provider).unwrap();
        manager.end_frame();

        assert_eq!(manager.frame(), 2);
        assert_eq!(provider.stats.submits, 2);
        assert!(!manager.last_commands().is_empty());
    }

    #[test]
    fn test_removal_flushed_between_frames() {
        let mut provider = HeadlessProvider::new();
        let mut manager = NodeManager::new();
        let node = effect(&mut provider, "blur");
        let id = manager.root_mut().add_node(node);

        manager.execute_frame(&mut provider).unwrap();
        let live_before = provider.live_image_count();
        assert!(live_before > 0);

        manager.remove_node(id);
        // Still resident until the next frame boundary.
        assert_eq!(manager.root().len(), 1);
        manager.execute_frame(&mut provider).unwrap();
        assert_eq!(manager.root().len(), 0);
        assert_eq!(provider.live_image_count(), 0);
    }

    #[test]
    fn test_unit_releases_everything() {
        let mut provider = HeadlessProvider::new();
        let mut manager = NodeManager::new();
        let node = effect(&mut provider, "blur");
        manager.root_mut().add_node(node);
        manager.execute_frame(&mut provider).unwrap();

        manager.unit(&mut provider);
        assert_eq!(provider.live_image_count(), 0);
        assert_eq!(provider.live_buffer_count(), 0);
        assert_eq!(provider.live_pipeline_count(), 0);
    }
}
