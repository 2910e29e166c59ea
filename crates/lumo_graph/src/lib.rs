// SPDX-License-Identifier: MIT OR Apache-2.0
//! Node graph engine for the Lumo shader authoring tool.
//!
//! This crate provides:
//! - Typed slots and links ([`slot`]) with kind and direction validation
//! - Nodes and the capability-lookup behavior trait ([`node`])
//! - The graph itself ([`graph`]): link management with immediate
//!   propagation and withdrawal, cached topological execution order,
//!   deferred node removal
//! - Structural events for the editor ([`notification`])
//! - Serializable blueprints ([`blueprint`]) rebuilt through the node
//!   registry
//! - Built-in behaviors ([`nodes`]) adapting rendering modules and data
//!   producers to the graph
//! - The per-frame driver ([`manager`])

pub mod blueprint;
pub mod graph;
pub mod manager;
pub mod node;
pub mod nodes;
pub mod notification;
pub mod slot;

pub use blueprint::GraphBlueprint;
pub use graph::{Graph, LinkError};
pub use manager::NodeManager;
pub use node::{ExecuteContext, ExecutionPolicy, Node, NodeBehavior, NodeId, NodeRegistry};
pub use notification::{GraphEvent, Notification};
pub use slot::{Slot, SlotDirection, SlotId, SlotKind, SlotRef};
