// SPDX-License-Identifier: MIT OR Apache-2.0
//! Slot definitions: typed connection points on a node.

use crate::node::NodeId;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a slot (unique within its parent node, random in
/// practice).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SlotId(pub Uuid);

impl SlotId {
    /// Create a new random slot ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SlotId {
    fn default() -> Self {
        Self::new()
    }
}

/// Slot direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SlotDirection {
    /// Input slot; accepts at most one incoming link
    Input,
    /// Output slot; may feed any number of inputs
    Output,
}

/// Resource capability carried by a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SlotKind {
    /// 2D texture descriptor
    Texture2D,
    /// Texel buffer descriptor
    TexelBuffer,
    /// Light group
    LightGroup,
    /// Mesh data
    Model,
    /// Shader pass references (merger hand-off)
    ShaderPass,
    /// Plain value
    Variable,
    /// Acceleration structure handle
    AccelStructure,
}

impl SlotKind {
    /// Whether a resource of this kind can flow into a slot of `other`.
    pub fn can_connect_to(self, other: SlotKind) -> bool {
        self == other
    }
}

/// Stable reference to a slot on some node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SlotRef {
    /// Owning node
    pub node: NodeId,
    /// Slot on that node
    pub slot: SlotId,
}

impl SlotRef {
    /// Create a slot reference.
    pub fn new(node: NodeId, slot: SlotId) -> Self {
        Self { node, slot }
    }
}

/// A typed connection point on a node.
///
/// Link membership is bidirectional and non-owning: if A's `linked` set
/// contains B then B's contains A, and breaking a link removes both sides
/// atomically without touching either node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Slot {
    /// Unique slot ID
    pub id: SlotId,
    /// Display name
    pub name: String,
    /// Direction
    pub direction: SlotDirection,
    /// Resource kind
    pub kind: SlotKind,
    /// Descriptor binding index the consumer binds this resource at
    pub binding: u32,
    /// Linked counterpart slots (0..1 for inputs, 0..n for outputs)
    pub(crate) linked: Vec<SlotRef>,
}

impl Slot {
    /// Create an input slot.
    pub fn input(name: impl Into<String>, kind: SlotKind, binding: u32) -> Self {
        Self {
            id: SlotId::new(),
            name: name.into(),
            direction: SlotDirection::Input,
            kind,
            binding,
            linked: Vec::new(),
        }
    }

    /// Create an output slot.
    pub fn output(name: impl Into<String>, kind: SlotKind, binding: u32) -> Self {
        Self {
            id: SlotId::new(),
            name: name.into(),
            direction: SlotDirection::Output,
            kind,
            binding,
            linked: Vec::new(),
        }
    }

    /// Slots currently linked to this one.
    pub fn linked(&self) -> &[SlotRef] {
        &self.linked
    }

    /// Whether any link exists.
    pub fn is_linked(&self) -> bool {
        !self.linked.is_empty()
    }

    pub(crate) fn add_link(&mut self, other: SlotRef) {
        if !self.linked.contains(&other) {
            self.linked.push(other);
        }
    }

    pub(crate) fn remove_link(&mut self, other: SlotRef) {
        self.linked.retain(|l| *l != other);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_compatibility() {
        assert!(SlotKind::Texture2D.can_connect_to(SlotKind::Texture2D));
        assert!(!SlotKind::Texture2D.can_connect_to(SlotKind::LightGroup));
    }

    #[test]
    fn test_link_membership() {
        let mut slot = Slot::output("out", SlotKind::Texture2D, 0);
        let other = SlotRef::new(NodeId::new(), SlotId::new());

        slot.add_link(other);
        slot.add_link(other); // duplicate-safe
        assert_eq!(slot.linked().len(), 1);

        slot.remove_link(other);
        assert!(!slot.is_linked());
    }
}
