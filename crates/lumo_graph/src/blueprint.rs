// SPDX-License-Identifier: MIT OR Apache-2.0
//! Serializable graph blueprints.
//!
//! Behaviors own GPU state and cannot round-trip through serde, so a saved
//! project stores a structural blueprint instead: node type tags plus links
//! addressed by slot name. Loading rebuilds behaviors from the
//! [`NodeRegistry`](crate::node::NodeRegistry) and replays the links, which
//! re-propagates resources through the normal connect path.

use crate::graph::{Graph, LinkError};
use crate::node::{ExecutionPolicy, NodeId, NodeRegistry};
use crate::slot::SlotRef;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

/// One node in a blueprint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeBlueprint {
    /// Registry type tag
    pub type_tag: String,
    /// Display name
    pub name: String,
    /// Canvas position
    pub position: [f32; 2],
    /// Execution policy
    pub policy: ExecutionPolicy,
}

/// One link in a blueprint, addressed by node index and slot name so a
/// blueprint stays valid across ID regeneration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkBlueprint {
    /// Index of the producer node in `nodes`
    pub from_node: usize,
    /// Output slot name on the producer
    pub from_slot: String,
    /// Index of the consumer node in `nodes`
    pub to_node: usize,
    /// Input slot name on the consumer
    pub to_slot: String,
}

/// A complete serializable graph description.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphBlueprint {
    /// Graph name
    pub name: String,
    /// Nodes, in insertion order
    pub nodes: Vec<NodeBlueprint>,
    /// Links between them
    pub links: Vec<LinkBlueprint>,
}

/// Why a blueprint could not be instantiated.
#[derive(Debug, Error)]
pub enum BlueprintError {
    /// A node's type tag is not registered
    #[error("unknown node type: {0}")]
    UnknownType(String),
    /// A link references a slot name the node does not declare
    #[error("unknown slot {slot:?} on node {node}")]
    UnknownSlot {
        /// Node index in the blueprint
        node: usize,
        /// Slot name
        slot: String,
    },
    /// A link was rejected by graph validation
    #[error("invalid link: {0}")]
    InvalidLink(#[from] LinkError),
}

impl GraphBlueprint {
    /// Capture the structure of a live graph. Pending removals are not
    /// captured; flush them first if an exact snapshot matters.
    pub fn capture(graph: &Graph) -> Self {
        let ids: Vec<NodeId> = graph.nodes().map(|n| n.id).collect();
        let nodes = graph
            .nodes()
            .map(|n| NodeBlueprint {
                type_tag: n.type_tag.clone(),
                name: n.name.clone(),
                position: n.position,
                policy: n.policy,
            })
            .collect();

        let mut links = Vec::new();
        for (to_index, node) in graph.nodes().enumerate() {
            for slot in node.inputs() {
                for link in slot.linked() {
                    let Some(from_index) = ids.iter().position(|id| *id == link.node) else {
                        warn!(graph = %graph.name(), "dangling link skipped during capture");
                        continue;
                    };
                    let Some(from_node) = graph.node(link.node) else {
                        continue;
                    };
                    let Some(from_slot) = from_node.slot(link.slot) else {
                        continue;
                    };
                    links.push(LinkBlueprint {
                        from_node: from_index,
                        from_slot: from_slot.name.clone(),
                        to_node: to_index,
                        to_slot: slot.name.clone(),
                    });
                }
            }
        }
        Self {
            name: graph.name().to_owned(),
            nodes,
            links,
        }
    }

    /// Instantiate a fresh graph from the blueprint, building behaviors
    /// through the registry and replaying every link.
    pub fn instantiate(&self, registry: &NodeRegistry) -> Result<Graph, BlueprintError> {
        let mut graph = Graph::new(self.name.clone());
        let mut ids = Vec::with_capacity(self.nodes.len());
        for blueprint in &self.nodes {
            let mut node = registry
                .create(&blueprint.type_tag)
                .ok_or_else(|| BlueprintError::UnknownType(blueprint.type_tag.clone()))?;
            node.name = blueprint.name.clone();
            node.position = blueprint.position;
            node.policy = blueprint.policy;
            ids.push(graph.add_node(node));
        }

        for link in &self.links {
            let from = self
                .slot_ref(&graph, &ids, link.from_node, &link.from_slot)
                .ok_or_else(|| BlueprintError::UnknownSlot {
                    node: link.from_node,
                    slot: link.from_slot.clone(),
                })?;
            let to = self
                .slot_ref(&graph, &ids, link.to_node, &link.to_slot)
                .ok_or_else(|| BlueprintError::UnknownSlot {
                    node: link.to_node,
                    slot: link.to_slot.clone(),
                })?;
            graph.connect(from, to)?;
        }
        Ok(graph)
    }

    fn slot_ref(
        &self,
        graph: &Graph,
        ids: &[NodeId],
        node_index: usize,
        slot_name: &str,
    ) -> Option<SlotRef> {
        let id = *ids.get(node_index)?;
        let slot = graph.node(id)?.slot_by_name(slot_name)?;
        Some(SlotRef::new(id, slot.id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{ExecuteContext, Node, NodeBehavior};
    use crate::slot::{Slot, SlotKind};

    struct Noop;

    impl NodeBehavior for Noop {
        fn execute(&mut self, _ctx: &mut ExecuteContext<'_>) -> bool {
            true
        }
    }

    fn registry() -> NodeRegistry {
        let mut registry = NodeRegistry::new();
        registry.register(
            "filter",
            Box::new(|| {
                Node::new("filter", "filter", Box::new(Noop))
                    .with_input(Slot::input("in", SlotKind::Texture2D, 0))
                    .with_output(Slot::output("out", SlotKind::Texture2D, 0))
            }),
        );
        registry
    }

    #[test]
    fn test_capture_and_instantiate() {
        let registry = registry();
        let mut graph = Graph::new("project");
        let a = graph.add_node(registry.create("filter").unwrap().with_position(10.0, 20.0));
        let b = graph.add_node(registry.create("filter").unwrap());
        let from = SlotRef::new(a, graph.node(a).unwrap().slot_by_name("out").unwrap().id);
        let to = SlotRef::new(b, graph.node(b).unwrap().slot_by_name("in").unwrap().id);
        graph.connect(from, to).unwrap();

        let blueprint = GraphBlueprint::capture(&graph);
        assert_eq!(blueprint.nodes.len(), 2);
        assert_eq!(blueprint.links.len(), 1);
        assert_eq!(blueprint.links[0].from_node, 0);
        assert_eq!(blueprint.links[0].to_node, 1);

        let rebuilt = blueprint.instantiate(&registry).unwrap();
        assert_eq!(rebuilt.len(), 2);
        let input_linked = rebuilt
            .nodes()
            .nth(1)
            .unwrap()
            .slot_by_name("in")
            .unwrap()
            .is_linked();
        assert!(input_linked);
        assert_eq!(rebuilt.nodes().next().unwrap().position, [10.0, 20.0]);
    }

    #[test]
    fn test_ron_round_trip() {
        let registry = registry();
        let mut graph = Graph::new("project");
        graph.add_node(registry.create("filter").unwrap());
        let blueprint = GraphBlueprint::capture(&graph);

        let text = ron::ser::to_string_pretty(&blueprint, ron::ser::PrettyConfig::default())
            .unwrap();
        let parsed: GraphBlueprint = ron::from_str(&text).unwrap();
        assert_eq!(parsed.name, "project");
        assert_eq!(parsed.nodes.len(), 1);
        assert_eq!(parsed.nodes[0].type_tag, "filter");
    }

    #[test]
    fn test_unknown_type_rejected() {
        let blueprint = GraphBlueprint {
            name: "broken".into(),
            nodes: vec![NodeBlueprint {
                type_tag: "missing".into(),
                name: "missing".into(),
                position: [0.0, 0.0],
                policy: ExecutionPolicy::Always,
            }],
            links: Vec::new(),
        };
        assert!(matches!(
            blueprint.instantiate(&registry()),
            Err(BlueprintError::UnknownType(_))
        ));
    }
}
