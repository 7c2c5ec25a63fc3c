//! Sluice Runner
//!
//! The execution engine behind `sluice run` and the orchestrator.
//!
//! Architecture:
//! - Configuration: settings and secrets loaded once at the binary edge
//! - Readiness: health probes and per-service readiness gates
//! - Executors: where `run` steps execute (host shell or podman container)
//! - Publisher: image build and push through the container engine CLI
//! - Deploy: rollout operations over an SSH session through a tunnel
//! - Stage runner: sequential execution of one job's steps
//! - Scheduler: job graph traversal, fan-out and cancellation

pub mod cancel;
pub mod config;
pub mod deploy;
pub mod executor;
pub mod log_buffer;
pub mod publish;
pub mod readiness;
pub mod runtime;
pub mod scheduler;
pub mod shell;
pub mod stage;

pub use cancel::{CancelHandle, CancelSignal};
pub use config::Config;
pub use log_buffer::{InMemoryLogBuffer, LogBufferService};
pub use runtime::Runtime;
pub use scheduler::{PipelineExecutor, ReportObserver};
