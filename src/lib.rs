// src/lib.rs

// The top-level `gatewayllm` module holds all gateway internals.
pub mod gatewayllm;

// Re-export the submodules at the crate root so external callers (and the
// integration tests) can use `gatewayllm::registry::...` style paths.
pub use gatewayllm::{
    clients, config, coordinator, events, health, json_salvage, llm_adapter, mcp_session, policy,
    provider, registry, router, server,
};
