// SPDX-License-Identifier: MIT OR Apache-2.0
//! The node graph: ownership, linking, ordering and per-frame execution.
//!
//! The graph owns its nodes in an [`IndexMap`] keyed by [`NodeId`]; links
//! are stored as slot membership on both endpoints and carry no ownership.
//! Execution walks a cached topological order so every producer runs before
//! its consumers, and resource hand-off between nodes goes exclusively
//! through the capability interfaces, always by value or withdrawal.

use crate::node::{ExecuteContext, ExecutionPolicy, Node, NodeId};
use crate::notification::{GraphEvent, Notification};
use crate::slot::{SlotDirection, SlotKind, SlotRef};
use indexmap::IndexMap;
use lumo_render::provider::{CommandList, ResourceProvider};
use std::collections::HashSet;
use std::path::PathBuf;
use thiserror::Error;
use tracing::{debug, warn};

/// Why a link could not be established.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum LinkError {
    /// A referenced node does not exist in this graph
    #[error("unknown node")]
    UnknownNode,
    /// A referenced slot does not exist on its node
    #[error("unknown slot")]
    UnknownSlot,
    /// The producer side is not an output, or the consumer side not an input
    #[error("slot direction mismatch")]
    DirectionMismatch,
    /// The two slots carry incompatible resource kinds
    #[error("slot kind mismatch: {from:?} -> {to:?}")]
    KindMismatch {
        /// Producer kind
        from: SlotKind,
        /// Consumer kind
        to: SlotKind,
    },
    /// The link would make the graph cyclic
    #[error("link would create a cycle")]
    WouldCreateCycle,
}

/// A graph of nodes executed in dependency order.
#[derive(Debug, Default)]
pub struct Graph {
    name: String,
    nodes: IndexMap<NodeId, Node>,
    /// Cached topological order, invalidated on any structural change
    order: Option<Vec<NodeId>>,
    /// Nodes queued for removal at the next flush point
    pending_removals: Vec<NodeId>,
    events: Vec<GraphEvent>,
}

impl Graph {
    /// Create an empty graph.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Graph name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of live nodes (pending removals still count until flushed).
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the graph has no nodes.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Add a node, returning its ID.
    pub fn add_node(&mut self, node: Node) -> NodeId {
        let id = node.id;
        self.nodes.insert(id, node);
        self.order = None;
        id
    }

    /// Look up a node.
    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    /// Look up a node mutably.
    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(&id)
    }

    /// Iterate over all nodes in insertion order.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    /// Drain the structural events accumulated since the last drain.
    pub fn drain_events(&mut self) -> Vec<GraphEvent> {
        std::mem::take(&mut self.events)
    }

    /// Establish a link from an output slot to an input slot.
    ///
    /// Validation covers existence, direction, kind compatibility and
    /// acyclicity; a rejected link leaves the graph untouched. If the input
    /// already has a link it is broken first (an input holds at most one).
    /// On success the producer's current resource, if any, propagates to
    /// the consumer immediately so a connection never waits a frame.
    pub fn connect(&mut self, from: SlotRef, to: SlotRef) -> Result<(), LinkError> {
        let kind = self.validate_link(from, to)?;
        if from.node == to.node || self.reaches(to.node, from.node) {
            return Err(LinkError::WouldCreateCycle);
        }

        // Single-input rule: replace, never stack.
        let existing = self
            .slot(to)
            .map(|s| s.linked().to_vec())
            .unwrap_or_default();
        for prev in existing {
            self.disconnect(prev, to);
        }

        if let Some(slot) = self.slot_mut(from) {
            slot.add_link(to);
        }
        if let Some(slot) = self.slot_mut(to) {
            slot.add_link(from);
        }
        self.order = None;
        self.events.push(GraphEvent::LinkCreated { from, to });
        debug!(graph = %self.name, ?from, ?to, "link created");

        self.propagate(from, to, kind);
        if let Some(node) = self.nodes.get_mut(&to.node) {
            node.mark_needed();
        }
        Ok(())
    }

    /// Break the link between two slots, if present. The consumer's
    /// resource is withdrawn in the same operation so it can never observe
    /// a half-broken link.
    pub fn disconnect(&mut self, from: SlotRef, to: SlotRef) {
        let was_linked = self
            .slot(to)
            .map(|s| s.linked().contains(&from))
            .unwrap_or(false);
        if !was_linked {
            return;
        }
        let kind = self.slot(to).map(|s| s.kind);

        if let Some(slot) = self.slot_mut(from) {
            slot.remove_link(to);
        }
        if let Some(slot) = self.slot_mut(to) {
            slot.remove_link(from);
        }
        self.order = None;
        self.events.push(GraphEvent::LinkBroken { from, to });
        debug!(graph = %self.name, ?from, ?to, "link broken");

        if let Some(kind) = kind {
            self.withdraw(to, kind);
            if let Some(node) = self.nodes.get_mut(&to.node) {
                node.mark_needed();
            }
        }
    }

    /// Queue a node for removal. The node stays resident and executable
    /// until [`flush_removals`](Self::flush_removals) runs at a point where
    /// the GPU is known idle for its resources; its links are broken and
    /// consumers withdrawn immediately so nothing propagates from it again.
    pub fn remove_node(&mut self, id: NodeId) {
        if !self.nodes.contains_key(&id) || self.pending_removals.contains(&id) {
            return;
        }
        // Break every link touching the node right away.
        let outgoing: Vec<(SlotRef, SlotRef)> = self
            .nodes
            .get(&id)
            .map(|node| {
                node.outputs()
                    .iter()
                    .flat_map(|s| {
                        let from = SlotRef::new(id, s.id);
                        s.linked().iter().map(move |to| (from, *to)).collect::<Vec<_>>()
                    })
                    .collect()
            })
            .unwrap_or_default();
        for (from, to) in outgoing {
            self.disconnect(from, to);
        }
        let incoming: Vec<(SlotRef, SlotRef)> = self
            .nodes
            .get(&id)
            .map(|node| {
                node.inputs()
                    .iter()
                    .flat_map(|s| {
                        let to = SlotRef::new(id, s.id);
                        s.linked().iter().map(move |from| (*from, to)).collect::<Vec<_>>()
                    })
                    .collect()
            })
            .unwrap_or_default();
        for (from, to) in incoming {
            self.disconnect(from, to);
        }
        self.pending_removals.push(id);
        self.order = None;
    }

    /// Destroy queued nodes, here and in every nested graph. Call only when
    /// the provider has no in-flight work referencing them (the frame
    /// driver calls this between frames).
    pub fn flush_removals(&mut self, provider: &mut dyn ResourceProvider) {
        let pending = std::mem::take(&mut self.pending_removals);
        for id in pending {
            if let Some(mut node) = self.nodes.swap_remove(&id) {
                if let Some(child) = node.child_graph.as_mut() {
                    child.unit(provider);
                }
                node.behavior.unit(provider);
                self.events.push(GraphEvent::NodeRemoved { node: id });
                debug!(graph = %self.name, node = %node.name, "node removed");
            }
        }
        for node in self.nodes.values_mut() {
            if let Some(child) = node.child_graph.as_mut() {
                child.flush_removals(provider);
            }
        }
    }

    /// Execute the graph for one frame in topological order.
    ///
    /// Child graphs run before their owning node. A node whose behavior
    /// fails to execute has its outputs withdrawn once, so downstream
    /// consumers degrade to empty defaults instead of sampling stale
    /// handles; a later successful execution re-propagates.
    pub fn execute(
        &mut self,
        frame: u64,
        provider: &mut dyn ResourceProvider,
        commands: &mut CommandList,
    ) {
        let order = self.order(frame);
        for id in order {
            if self.pending_removals.contains(&id) {
                continue;
            }
            let Some(node) = self.nodes.get_mut(&id) else {
                continue;
            };
            if node.policy == ExecutionPolicy::WhenNeeded && !node.needs_execution {
                continue;
            }

            // Nested graph first so the node sees fresh child outputs.
            let mut child = node.child_graph.take();
            if let Some(graph) = child.as_mut() {
                graph.execute(frame, provider, commands);
            }
            let Some(node) = self.nodes.get_mut(&id) else {
                continue;
            };
            node.child_graph = child;

            let mut ctx = ExecuteContext {
                frame,
                provider,
                commands,
            };
            let ok = node.behavior.execute(&mut ctx);
            node.needs_execution = false;

            let changed = ok && node.behavior.take_output_changed();
            let was_failed = node.failed;
            node.failed = !ok;

            let outgoing: Vec<(SlotRef, SlotRef, SlotKind)> = node
                .outputs()
                .iter()
                .flat_map(|s| {
                    let from = SlotRef::new(id, s.id);
                    let kind = s.kind;
                    s.linked()
                        .iter()
                        .map(move |to| (from, *to, kind))
                        .collect::<Vec<_>>()
                })
                .collect();

            if !ok {
                if !was_failed {
                    warn!(graph = %self.name, node = id.0.to_string(), "node failed to execute, withdrawing outputs");
                    for (_, to, kind) in outgoing {
                        self.withdraw(to, kind);
                    }
                }
            } else if changed || was_failed {
                for (from, to, kind) in outgoing {
                    self.propagate(from, to, kind);
                }
            }
        }
    }

    /// Forward a shader-change set to every node (and nested graph).
    /// Returns whether any pipeline rebuilt.
    pub fn update_shaders(
        &mut self,
        provider: &mut dyn ResourceProvider,
        changed: &HashSet<PathBuf>,
    ) -> bool {
        let mut any = false;
        let ids: Vec<NodeId> = self.nodes.keys().copied().collect();
        for id in ids {
            let Some(node) = self.nodes.get_mut(&id) else {
                continue;
            };
            let mut child = node.child_graph.take();
            if let Some(graph) = child.as_mut() {
                any |= graph.update_shaders(provider, changed);
            }
            let Some(node) = self.nodes.get_mut(&id) else {
                continue;
            };
            node.child_graph = child;
            if node.behavior.update_shaders(provider, changed) {
                node.mark_needed();
                any = true;
            }
        }
        any
    }

    /// Run every node's widget hook, nested graphs first. A node whose
    /// widgets changed a parameter is marked for re-execution. Returns
    /// whether anything changed.
    pub fn draw_widgets(&mut self, frame: u64) -> bool {
        let mut any = false;
        for node in self.nodes.values_mut() {
            if let Some(child) = node.child_graph.as_mut() {
                any |= child.draw_widgets(frame);
            }
            if node.behavior.draw_widgets(frame) {
                node.needs_execution = true;
                any = true;
            }
        }
        any
    }

    /// Fence-gated end of frame, forwarded to every node.
    pub fn end_frame(&mut self) {
        for node in self.nodes.values_mut() {
            if let Some(child) = node.child_graph.as_mut() {
                child.end_frame();
            }
            node.behavior.end_frame();
        }
    }

    /// Mark every node as needing execution (viewport resize, project load).
    pub fn mark_all_needed(&mut self) {
        for node in self.nodes.values_mut() {
            node.needs_execution = true;
            if let Some(child) = node.child_graph.as_mut() {
                child.mark_all_needed();
            }
        }
    }

    /// Deterministic teardown of every node, flushing removals first.
    pub fn unit(&mut self, provider: &mut dyn ResourceProvider) {
        self.flush_removals(provider);
        for (_, mut node) in std::mem::take(&mut self.nodes) {
            if let Some(child) = node.child_graph.as_mut() {
                child.unit(provider);
            }
            node.behavior.unit(provider);
        }
        self.order = None;
    }

    fn validate_link(&self, from: SlotRef, to: SlotRef) -> Result<SlotKind, LinkError> {
        let from_node = self.nodes.get(&from.node).ok_or(LinkError::UnknownNode)?;
        let to_node = self.nodes.get(&to.node).ok_or(LinkError::UnknownNode)?;
        let from_slot = from_node.slot(from.slot).ok_or(LinkError::UnknownSlot)?;
        let to_slot = to_node.slot(to.slot).ok_or(LinkError::UnknownSlot)?;
        if from_slot.direction != SlotDirection::Output
            || to_slot.direction != SlotDirection::Input
        {
            return Err(LinkError::DirectionMismatch);
        }
        if !from_slot.kind.can_connect_to(to_slot.kind) {
            return Err(LinkError::KindMismatch {
                from: from_slot.kind,
                to: to_slot.kind,
            });
        }
        Ok(to_slot.kind)
    }

    /// Whether `target` is reachable from `start` following output links.
    fn reaches(&self, start: NodeId, target: NodeId) -> bool {
        let mut stack = vec![start];
        let mut seen = HashSet::new();
        while let Some(id) = stack.pop() {
            if id == target {
                return true;
            }
            if !seen.insert(id) {
                continue;
            }
            if let Some(node) = self.nodes.get(&id) {
                for slot in node.outputs() {
                    for link in slot.linked() {
                        stack.push(link.node);
                    }
                }
            }
        }
        false
    }

    fn slot(&self, slot_ref: SlotRef) -> Option<&crate::slot::Slot> {
        self.nodes.get(&slot_ref.node)?.slot(slot_ref.slot)
    }

    fn slot_mut(&mut self, slot_ref: SlotRef) -> Option<&mut crate::slot::Slot> {
        self.nodes.get_mut(&slot_ref.node)?.slot_mut(slot_ref.slot)
    }

    /// The cached topological order, rebuilt on structural change.
    fn order(&mut self, frame: u64) -> Vec<NodeId> {
        if let Some(order) = &self.order {
            return order.clone();
        }
        let order = self.topological_order(frame);
        self.order = Some(order.clone());
        order
    }

    /// Kahn's algorithm over the link edges, ties broken by node insertion
    /// order so execution stays deterministic. Connect-time rejection keeps
    /// the graph acyclic; should a cycle slip in anyway the members are
    /// appended in insertion order rather than dropped.
    fn topological_order(&self, frame: u64) -> Vec<NodeId> {
        let mut in_degree: IndexMap<NodeId, usize> =
            self.nodes.keys().map(|id| (*id, 0)).collect();
        for node in self.nodes.values() {
            for slot in node.inputs() {
                for link in slot.linked() {
                    if self.nodes.contains_key(&link.node) {
                        if let Some(d) = in_degree.get_mut(&node.id) {
                            *d += 1;
                        }
                    }
                }
            }
        }

        let mut ready: Vec<NodeId> = in_degree
            .iter()
            .filter(|(_, d)| **d == 0)
            .map(|(id, _)| *id)
            .collect();
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut next = 0;
        while next < ready.len() {
            let id = ready[next];
            next += 1;
            order.push(id);
            if let Some(node) = self.nodes.get(&id) {
                for slot in node.outputs() {
                    for link in slot.linked() {
                        if let Some(d) = in_degree.get_mut(&link.node) {
                            *d -= 1;
                            if *d == 0 {
                                ready.push(link.node);
                            }
                        }
                    }
                }
            }
        }

        if order.len() < self.nodes.len() {
            warn!(graph = %self.name, frame, "cycle in graph, appending remaining nodes in insertion order");
            for id in self.nodes.keys() {
                if !order.contains(id) {
                    order.push(*id);
                }
            }
        }
        order
    }

    /// Read the producer's current resource and hand it to the consumer.
    /// The payload is copied out under an immutable borrow before the
    /// consumer is touched, so a node can safely feed itself-adjacent
    /// topologies without aliasing. A producer that has nothing to offer
    /// yet (never executed, or no resource at this binding) delivers
    /// nothing; withdrawal is a distinct operation, never implied here.
    fn propagate(&mut self, from: SlotRef, to: SlotRef, kind: SlotKind) {
        let from_binding = self.slot(from).map(|s| s.binding).unwrap_or(0);
        let to_binding = self.slot(to).map(|s| s.binding).unwrap_or(0);
        match kind {
            SlotKind::Texture2D => {
                let Some(info) = self
                    .nodes
                    .get(&from.node)
                    .and_then(|n| n.behavior().texture_output())
                    .and_then(|o| o.get_image_info(from_binding))
                else {
                    return;
                };
                if let Some(input) = self
                    .nodes
                    .get_mut(&to.node)
                    .and_then(|n| n.behavior.texture_input())
                {
                    input.set_texture(to_binding, Some(&info));
                }
            }
            SlotKind::TexelBuffer => {
                let Some(info) = self
                    .nodes
                    .get(&from.node)
                    .and_then(|n| n.behavior().texel_buffer_output())
                    .and_then(|o| o.get_texel_buffer(from_binding))
                else {
                    return;
                };
                if let Some(input) = self
                    .nodes
                    .get_mut(&to.node)
                    .and_then(|n| n.behavior.texel_buffer_input())
                {
                    input.set_texel_buffer(to_binding, Some(&info));
                }
            }
            SlotKind::LightGroup => {
                let Some(group) = self
                    .nodes
                    .get(&from.node)
                    .and_then(|n| n.behavior().light_group_output())
                    .and_then(|o| o.get_light_group())
                else {
                    return;
                };
                if let Some(input) = self
                    .nodes
                    .get_mut(&to.node)
                    .and_then(|n| n.behavior.light_group_input())
                {
                    input.set_light_group(Some(&group));
                }
            }
            SlotKind::Model => {
                let Some(model) = self
                    .nodes
                    .get(&from.node)
                    .and_then(|n| n.behavior().model_output())
                    .and_then(|o| o.get_model())
                else {
                    return;
                };
                if let Some(input) = self
                    .nodes
                    .get_mut(&to.node)
                    .and_then(|n| n.behavior.model_input())
                {
                    input.set_model(Some(&model));
                }
            }
            SlotKind::ShaderPass => {
                let Some(passes) = self
                    .nodes
                    .get(&from.node)
                    .and_then(|n| n.behavior().shader_pass_output())
                    .and_then(|o| o.get_shader_passes())
                else {
                    return;
                };
                if let Some(input) = self
                    .nodes
                    .get_mut(&to.node)
                    .and_then(|n| n.behavior.shader_pass_input())
                {
                    input.set_shader_passes(Some(passes.as_slice()));
                }
            }
            SlotKind::Variable => {
                let Some(value) = self
                    .nodes
                    .get(&from.node)
                    .and_then(|n| n.behavior().variable_output())
                    .and_then(|o| o.get_variable(from_binding))
                else {
                    return;
                };
                if let Some(input) = self
                    .nodes
                    .get_mut(&to.node)
                    .and_then(|n| n.behavior.variable_input())
                {
                    input.set_variable(to_binding, Some(&value));
                }
            }
            SlotKind::AccelStructure => {
                let Some(info) = self
                    .nodes
                    .get(&from.node)
                    .and_then(|n| n.behavior().accel_structure_output())
                    .and_then(|o| o.get_accel_structure())
                else {
                    return;
                };
                if let Some(input) = self
                    .nodes
                    .get_mut(&to.node)
                    .and_then(|n| n.behavior.accel_structure_input())
                {
                    input.set_accel_structure(Some(&info));
                }
            }
        }
        self.events.push(GraphEvent::Propagated {
            to,
            kind: Notification::for_kind(kind),
        });
    }

    /// Withdraw the resource a consumer received over a now-dead link. The
    /// consumer substitutes its empty default; stale handles never survive.
    fn withdraw(&mut self, to: SlotRef, kind: SlotKind) {
        let to_binding = self.slot(to).map(|s| s.binding).unwrap_or(0);
        let Some(node) = self.nodes.get_mut(&to.node) else {
            return;
        };
        match kind {
            SlotKind::Texture2D => {
                if let Some(input) = node.behavior.texture_input() {
                    input.set_texture(to_binding, None);
                }
            }
            SlotKind::TexelBuffer => {
                if let Some(input) = node.behavior.texel_buffer_input() {
                    input.set_texel_buffer(to_binding, None);
                }
            }
            SlotKind::LightGroup => {
                if let Some(input) = node.behavior.light_group_input() {
                    input.set_light_group(None);
                }
            }
            SlotKind::Model => {
                if let Some(input) = node.behavior.model_input() {
                    input.set_model(None);
                }
            }
            SlotKind::ShaderPass => {
                if let Some(input) = node.behavior.shader_pass_input() {
                    input.set_shader_passes(None);
                }
            }
            SlotKind::Variable => {
                if let Some(input) = node.behavior.variable_input() {
                    input.set_variable(to_binding, None);
                }
            }
            SlotKind::AccelStructure => {
                if let Some(input) = node.behavior.accel_structure_input() {
                    input.set_accel_structure(None);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::NodeBehavior;
    use crate::slot::Slot;
    use lumo_render::headless::HeadlessProvider;
    use lumo_render::interface::{TextureInput, TextureOutput};
    use lumo_render::provider::{Command, ImageFormat, ImageId, ImageInfo, PipelineId};

    use std::cell::{Cell, RefCell};
    use std::rc::Rc;

    /// Produces a fresh image every execution. The `fail` handle lets a
    /// test break and repair the producer from outside the graph.
    struct Producer {
        image: Option<ImageInfo>,
        generation: u64,
        changed: bool,
        fail: Rc<Cell<bool>>,
    }

    impl Producer {
        fn new(fail: Rc<Cell<bool>>) -> Self {
            Self {
                image: None,
                generation: 0,
                changed: false,
                fail,
            }
        }
    }

    impl NodeBehavior for Producer {
        fn execute(&mut self, ctx: &mut ExecuteContext<'_>) -> bool {
            if self.fail.get() {
                return false;
            }
            self.generation += 1;
            self.image = Some(ImageInfo {
                image: ImageId(self.generation),
                size: [64, 64],
                format: ImageFormat::Rgba8Unorm,
            });
            self.changed = true;
            ctx.commands.push(Command::BindPipeline(PipelineId(1)));
            ctx.commands.push(Command::Dispatch { groups: [8, 8, 1] });
            true
        }

        fn take_output_changed(&mut self) -> bool {
            std::mem::take(&mut self.changed)
        }

        fn texture_output(&self) -> Option<&dyn TextureOutput> {
            Some(self)
        }
    }

    impl TextureOutput for Producer {
        fn get_image_info(&self, _binding: u32) -> Option<ImageInfo> {
            self.image
        }
    }

    #[derive(Default)]
    struct ConsumerState {
        bound: Option<ImageInfo>,
        withdrawals: u32,
    }

    /// Records every texture it receives, falling back to the empty
    /// placeholder on withdrawal. State is shared so tests can observe it
    /// while the graph owns the behavior.
    struct Consumer {
        state: Rc<RefCell<ConsumerState>>,
    }

    impl NodeBehavior for Consumer {
        fn execute(&mut self, ctx: &mut ExecuteContext<'_>) -> bool {
            ctx.commands.push(Command::BindPipeline(PipelineId(2)));
            ctx.commands.push(Command::Dispatch { groups: [8, 8, 1] });
            true
        }

        fn texture_input(&mut self) -> Option<&mut dyn TextureInput> {
            Some(self)
        }

        fn texture_output(&self) -> Option<&dyn TextureOutput> {
            Some(self)
        }
    }

    impl TextureInput for Consumer {
        fn set_texture(&mut self, _binding: u32, info: Option<&ImageInfo>) {
            let mut state = self.state.borrow_mut();
            match info {
                Some(info) => state.bound = Some(*info),
                None => {
                    state.bound = None;
                    state.withdrawals += 1;
                }
            }
        }
    }

    impl TextureOutput for Consumer {
        fn get_image_info(&self, _binding: u32) -> Option<ImageInfo> {
            self.state.borrow().bound
        }
    }

    fn producer_node(name: &str) -> (Node, Rc<Cell<bool>>) {
        let fail = Rc::new(Cell::new(false));
        let node = Node::new("producer", name, Box::new(Producer::new(fail.clone())))
            .with_output(Slot::output("out", SlotKind::Texture2D, 0));
        (node, fail)
    }

    fn consumer_node(name: &str) -> (Node, Rc<RefCell<ConsumerState>>) {
        let state = Rc::new(RefCell::new(ConsumerState::default()));
        let node = Node::new(
            "consumer",
            name,
            Box::new(Consumer {
                state: state.clone(),
            }),
        )
        .with_input(Slot::input("in", SlotKind::Texture2D, 0))
        .with_output(Slot::output("out", SlotKind::Texture2D, 0));
        (node, state)
    }

    fn out_ref(graph: &Graph, id: NodeId) -> SlotRef {
        SlotRef::new(id, graph.node(id).unwrap().slot_by_name("out").unwrap().id)
    }

    fn in_ref(graph: &Graph, id: NodeId) -> SlotRef {
        SlotRef::new(id, graph.node(id).unwrap().slot_by_name("in").unwrap().id)
    }

    #[test]
    fn test_producers_execute_before_consumers() {
        let mut graph = Graph::new("root");
        // Insert in reverse dependency order to stress the sort.
        let c = graph.add_node(consumer_node("tonemap").0);
        let b = graph.add_node(consumer_node("blur").0);
        let a = graph.add_node(producer_node("scene").0);
        graph.connect(out_ref(&graph, a), in_ref(&graph, b)).unwrap();
        graph.connect(out_ref(&graph, b), in_ref(&graph, c)).unwrap();

        let mut provider = HeadlessProvider::new();
        let mut commands = CommandList::new();
        graph.execute(1, &mut provider, &mut commands);

        // The producer's pipeline (1) binds before both consumers' (2).
        let pipelines: Vec<u64> = commands
            .commands()
            .iter()
            .filter_map(|c| match c {
                Command::BindPipeline(p) => Some(p.0),
                _ => None,
            })
            .collect();
        assert_eq!(pipelines, vec![1, 2, 2]);
    }

    #[test]
    fn test_connect_propagates_current_value() {
        let mut graph = Graph::new("root");
        let a = graph.add_node(producer_node("scene").0);
        let (consumer, state) = consumer_node("blur");
        let b = graph.add_node(consumer);

        let mut provider = HeadlessProvider::new();
        let mut commands = CommandList::new();
        graph.execute(1, &mut provider, &mut commands);

        // Connect after the producer already ran: the consumer receives the
        // existing output immediately, no frame of latency.
        graph.connect(out_ref(&graph, a), in_ref(&graph, b)).unwrap();
        assert_eq!(state.borrow().bound.unwrap().image.0, 1);
    }

    #[test]
    fn test_connect_before_first_output_delivers_nothing() {
        let mut graph = Graph::new("root");
        let a = graph.add_node(producer_node("scene").0);
        let (consumer, state) = consumer_node("blur");
        let b = graph.add_node(consumer);

        // The producer has not run yet: connecting must neither deliver a
        // value nor masquerade as a withdrawal.
        graph.connect(out_ref(&graph, a), in_ref(&graph, b)).unwrap();
        assert!(state.borrow().bound.is_none());
        assert_eq!(state.borrow().withdrawals, 0);

        let mut provider = HeadlessProvider::new();
        let mut commands = CommandList::new();
        graph.execute(1, &mut provider, &mut commands);
        assert!(state.borrow().bound.is_some());
    }

    #[test]
    fn test_disconnect_withdraws() {
        let mut graph = Graph::new("root");
        let a = graph.add_node(producer_node("scene").0);
        let (consumer, state) = consumer_node("blur");
        let b = graph.add_node(consumer);
        graph.connect(out_ref(&graph, a), in_ref(&graph, b)).unwrap();

        let mut provider = HeadlessProvider::new();
        let mut commands = CommandList::new();
        graph.execute(1, &mut provider, &mut commands);
        assert!(state.borrow().bound.is_some());

        graph.disconnect(out_ref(&graph, a), in_ref(&graph, b));
        // Withdrawn, not stale: the consumer now reports nothing bound.
        assert!(state.borrow().bound.is_none());
        assert_eq!(state.borrow().withdrawals, 1);
        assert!(!graph.node(b).unwrap().slot_by_name("in").unwrap().is_linked());
        assert!(!graph.node(a).unwrap().slot_by_name("out").unwrap().is_linked());
    }

    #[test]
    fn test_input_link_replaced_not_stacked() {
        let mut graph = Graph::new("root");
        let a1 = graph.add_node(producer_node("scene1").0);
        let a2 = graph.add_node(producer_node("scene2").0);
        let b = graph.add_node(consumer_node("blur").0);

        graph.connect(out_ref(&graph, a1), in_ref(&graph, b)).unwrap();
        graph.connect(out_ref(&graph, a2), in_ref(&graph, b)).unwrap();

        let input = graph.node(b).unwrap().slot_by_name("in").unwrap();
        assert_eq!(input.linked().len(), 1);
        assert_eq!(input.linked()[0].node, a2);
        // The replaced producer no longer lists the consumer.
        assert!(!graph.node(a1).unwrap().slot_by_name("out").unwrap().is_linked());
    }

    #[test]
    fn test_cycle_rejected_at_connect() {
        let mut graph = Graph::new("root");
        let a = graph.add_node(consumer_node("a").0);
        let b = graph.add_node(consumer_node("b").0);
        let c = graph.add_node(consumer_node("c").0);
        graph.connect(out_ref(&graph, a), in_ref(&graph, b)).unwrap();
        graph.connect(out_ref(&graph, b), in_ref(&graph, c)).unwrap();

        let err = graph
            .connect(out_ref(&graph, c), in_ref(&graph, a))
            .unwrap_err();
        assert_eq!(err, LinkError::WouldCreateCycle);
        // The rejected link left no membership behind.
        assert!(!graph.node(c).unwrap().slot_by_name("out").unwrap().is_linked());
        assert!(!graph.node(a).unwrap().slot_by_name("in").unwrap().is_linked());

        let self_err = graph
            .connect(out_ref(&graph, a), in_ref(&graph, a))
            .unwrap_err();
        assert_eq!(self_err, LinkError::WouldCreateCycle);
    }

    #[test]
    fn test_kind_and_direction_validation() {
        let mut graph = Graph::new("root");
        let a = graph.add_node(producer_node("scene").0);
        let light = graph.add_node(
            Node::new(
                "lights",
                "lights",
                Box::new(Consumer {
                    state: Rc::default(),
                }),
            )
            .with_input(Slot::input("in", SlotKind::LightGroup, 0)),
        );

        let err = graph
            .connect(out_ref(&graph, a), in_ref(&graph, light))
            .unwrap_err();
        assert!(matches!(err, LinkError::KindMismatch { .. }));

        // Output-to-output is a direction error.
        let err = graph
            .connect(out_ref(&graph, a), out_ref(&graph, a))
            .unwrap_err();
        assert_eq!(err, LinkError::DirectionMismatch);
    }

    #[test]
    fn test_failed_node_withdraws_outputs_once() {
        let mut graph = Graph::new("root");
        let (producer, fail) = producer_node("scene");
        let a = graph.add_node(producer);
        let (consumer, state) = consumer_node("blur");
        let b = graph.add_node(consumer);
        graph.connect(out_ref(&graph, a), in_ref(&graph, b)).unwrap();

        let mut provider = HeadlessProvider::new();
        let mut commands = CommandList::new();
        graph.execute(1, &mut provider, &mut commands);
        assert!(state.borrow().bound.is_some());

        fail.set(true);
        graph.execute(2, &mut provider, &mut commands);
        assert!(state.borrow().bound.is_none());
        assert_eq!(state.borrow().withdrawals, 1);

        // Still failing: no repeated withdrawal spam.
        graph.execute(3, &mut provider, &mut commands);
        assert_eq!(state.borrow().withdrawals, 1);

        // Recovery re-propagates.
        fail.set(false);
        graph.execute(4, &mut provider, &mut commands);
        assert!(state.borrow().bound.is_some());
    }

    #[test]
    fn test_deferred_removal() {
        let mut graph = Graph::new("root");
        let a = graph.add_node(producer_node("scene").0);
        let (consumer, state) = consumer_node("blur");
        let b = graph.add_node(consumer);
        graph.connect(out_ref(&graph, a), in_ref(&graph, b)).unwrap();

        let mut provider = HeadlessProvider::new();
        let mut commands = CommandList::new();
        graph.execute(1, &mut provider, &mut commands);

        graph.remove_node(a);
        // Consumer withdrawn immediately, node resident until flush.
        assert!(state.borrow().bound.is_none());
        assert_eq!(graph.len(), 2);

        graph.flush_removals(&mut provider);
        assert_eq!(graph.len(), 1);
        assert!(graph.node(a).is_none());
    }

    #[test]
    fn test_child_graph_removal_flushed_from_parent() {
        let mut child = Graph::new("child");
        let inner = child.add_node(producer_node("inner").0);

        let mut graph = Graph::new("root");
        let mut host = consumer_node("host").0;
        host.child_graph = Some(child);
        let host = graph.add_node(host);

        graph
            .node_mut(host)
            .unwrap()
            .child_graph
            .as_mut()
            .unwrap()
            .remove_node(inner);

        let mut provider = HeadlessProvider::new();
        graph.flush_removals(&mut provider);

        let child = graph.node(host).unwrap().child_graph.as_ref().unwrap();
        assert!(child.node(inner).is_none());
        assert!(child.is_empty());
    }

    #[test]
    fn test_events_drained() {
        let mut graph = Graph::new("root");
        let a = graph.add_node(producer_node("scene").0);
        let b = graph.add_node(consumer_node("blur").0);
        let from = out_ref(&graph, a);
        let to = in_ref(&graph, b);
        graph.connect(from, to).unwrap();
        graph.disconnect(from, to);

        let events = graph.drain_events();
        assert!(events.contains(&GraphEvent::LinkCreated { from, to }));
        assert!(events.contains(&GraphEvent::LinkBroken { from, to }));
        assert!(graph.drain_events().is_empty());
    }

    #[test]
    fn test_child_graph_executes_before_owner() {
        let mut child = Graph::new("child");
        child.add_node(producer_node("inner").0);

        let mut graph = Graph::new("root");
        let mut host = consumer_node("host").0;
        host.child_graph = Some(child);
        let host = graph.add_node(host);

        let mut provider = HeadlessProvider::new();
        let mut commands = CommandList::new();
        graph.execute(1, &mut provider, &mut commands);

        let pipelines: Vec<u64> = commands
            .commands()
            .iter()
            .filter_map(|c| match c {
                Command::BindPipeline(p) => Some(p.0),
                _ => None,
            })
            .collect();
        // Inner producer (1) records before the hosting node (2).
        assert_eq!(pipelines, vec![1, 2]);
        assert!(graph.node(host).unwrap().child_graph.is_some());
    }

    /// Reports a widget edit exactly once per set of the shared flag.
    struct WidgetBehavior {
        edited: Rc<Cell<bool>>,
    }

    impl NodeBehavior for WidgetBehavior {
        fn execute(&mut self, _ctx: &mut ExecuteContext<'_>) -> bool {
            true
        }

        fn draw_widgets(&mut self, _frame: u64) -> bool {
            self.edited.take()
        }
    }

    #[test]
    fn test_widget_edit_marks_node_needed() {
        let mut graph = Graph::new("root");
        let edited = Rc::new(Cell::new(false));
        let node = Node::new(
            "widget",
            "widget",
            Box::new(WidgetBehavior {
                edited: edited.clone(),
            }),
        )
        .with_policy(ExecutionPolicy::WhenNeeded);
        let id = graph.add_node(node);

        let mut provider = HeadlessProvider::new();
        let mut commands = CommandList::new();
        graph.execute(1, &mut provider, &mut commands);
        assert!(!graph.node(id).unwrap().needs_execution);

        assert!(!graph.draw_widgets(2));
        assert!(!graph.node(id).unwrap().needs_execution);

        edited.set(true);
        assert!(graph.draw_widgets(2));
        assert!(graph.node(id).unwrap().needs_execution);
    }

    #[test]
    fn test_when_needed_policy_skips_clean_nodes() {
        let mut graph = Graph::new("root");
        let a = graph.add_node(producer_node("scene").0.with_policy(ExecutionPolicy::WhenNeeded));

        let mut provider = HeadlessProvider::new();
        let mut commands = CommandList::new();
        graph.execute(1, &mut provider, &mut commands);
        let first = commands.len();
        assert!(first > 0);

        // Clean now: nothing recorded.
        graph.execute(2, &mut provider, &mut commands);
        assert_eq!(commands.len(), first);

        graph.node_mut(a).unwrap().mark_needed();
        graph.execute(3, &mut provider, &mut commands);
        assert!(commands.len() > first);
    }
}
