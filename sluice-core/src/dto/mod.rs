//! Data Transfer Objects for orchestrator communication
//!
//! DTOs are the wire shapes exchanged between the orchestrator's HTTP API
//! and its clients (the CLI, webhooks).

pub mod event;
pub mod invocation;
pub mod log;
