// SPDX-License-Identifier: MIT OR Apache-2.0
//! GPU-agnostic rendering core for the Lumo node-graph authoring tool.
//!
//! This crate provides:
//! - The resource provider boundary ([`provider::ResourceProvider`]) that
//!   abstracts the graphics backend behind opaque handles and copied
//!   descriptor structs
//! - The pass lifecycle state machine ([`pass::Pass`]) with coalesced
//!   resize/upload/descriptor dirty flags and ping-pong double buffering
//! - The module layer ([`module::Module`]) composing passes into effects
//!   with per-frame chain relinking
//! - The capability interfaces ([`interface`]) every producer/consumer
//!   resource hand-off goes through
//! - A headless provider ([`headless::HeadlessProvider`]) for tests and
//!   dry runs

pub mod headless;
pub mod interface;
pub mod module;
pub mod pass;
pub mod provider;

pub use module::Module;
pub use pass::{Pass, PassState, PassWork, SubStageDesc};
pub use provider::{
    BufferInfo, Command, CommandList, ImageFormat, ImageInfo, ProviderError, ResourceProvider,
    ShaderSource,
};
