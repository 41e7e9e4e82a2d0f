//! The session core: orchestrator, per-session linearization, the turn
//! pipeline, and the transport-agnostic RPC layer.
//!
//! A host embeds this crate by building a [`state::CoreState`] (store,
//! providers, hooks, tools, guardrails), wrapping it in an
//! [`runtime::Orchestrator`], and wiring client connections to
//! [`rpc::RpcServer`]. Everything else — transports, concrete tools,
//! provider HTTP bindings — stays outside.

pub mod guardrail;
pub mod rpc;
pub mod runtime;
pub mod state;
pub mod tools;

pub use runtime::orchestrator::Orchestrator;
pub use rpc::RpcServer;
pub use state::CoreState;
