//! Conversation, flow and call state.
//!
//! - [`controller`]: the per-conversation reducer deciding when to forward and what to persist
//! - [`graph`]: flow graph structure and validation
//! - [`flow_runner`]: routes a question through a flow's nodes
//! - [`call`]: voice call lifecycle and the registry of active calls

pub mod call;
pub mod controller;
pub mod flow_runner;
pub mod graph;
