// SPDX-License-Identifier: MIT OR Apache-2.0
//! Graph events observed by the editor layer.
//!
//! Resource hand-off itself happens through the capability interfaces in
//! `lumo_render::interface`; the events here exist so the GUI can react to
//! structural changes (repaint wires, refresh previews) without polling.

use crate::node::NodeId;
use crate::slot::{SlotKind, SlotRef};

/// Which resource kind a propagation touched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notification {
    /// A texture output was regenerated
    TextureUpdated,
    /// A light group changed
    LightGroupUpdated,
    /// A model changed
    ModelUpdated,
    /// A texel buffer changed
    TexelBufferUpdated,
    /// A variable value changed
    VariableUpdated,
    /// A shader pass set changed
    ShaderPassUpdated,
    /// An acceleration structure changed
    AccelStructureUpdated,
}

impl Notification {
    /// The notification sent when a slot of the given kind propagates.
    pub fn for_kind(kind: SlotKind) -> Self {
        match kind {
            SlotKind::Texture2D => Self::TextureUpdated,
            SlotKind::TexelBuffer => Self::TexelBufferUpdated,
            SlotKind::LightGroup => Self::LightGroupUpdated,
            SlotKind::Model => Self::ModelUpdated,
            SlotKind::ShaderPass => Self::ShaderPassUpdated,
            SlotKind::Variable => Self::VariableUpdated,
            SlotKind::AccelStructure => Self::AccelStructureUpdated,
        }
    }
}

/// Structural change emitted by the graph, drained once per frame by the
/// editor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraphEvent {
    /// A link was established between an output and an input
    LinkCreated {
        /// Producer side
        from: SlotRef,
        /// Consumer side
        to: SlotRef,
    },
    /// A link was broken and the consumer's resource withdrawn
    LinkBroken {
        /// Producer side
        from: SlotRef,
        /// Consumer side
        to: SlotRef,
    },
    /// A node finished its deferred removal
    NodeRemoved {
        /// The removed node
        node: NodeId,
    },
    /// A resource propagated over a live link
    Propagated {
        /// Consumer side
        to: SlotRef,
        /// Resource kind that moved
        kind: Notification,
    },
}
