//! Sluice Core
//!
//! Core types and abstractions for the Sluice deployment pipeline.
//!
//! This crate contains:
//! - Domain types: Events, jobs, job runs, backing services, artifacts
//! - Trigger predicates deciding job eligibility for an event
//! - The job graph (dependency validation, ordering, gating)
//! - DTOs: Data transfer objects for orchestrator communication

pub mod domain;
pub mod dto;
pub mod error;
pub mod graph;
pub mod trigger;

pub use error::ConfigurationError;
pub use graph::{JobGraph, Resolution};
pub use trigger::Trigger;
