//! Core domain types
//!
//! This module contains the domain structures shared across Sluice crates.
//! Definitions (jobs, steps, services) are static configuration; runs and
//! results are produced once per pipeline invocation.

pub mod artifact;
pub mod event;
pub mod job;
pub mod log;
pub mod pipeline;
pub mod secrets;
pub mod service;
