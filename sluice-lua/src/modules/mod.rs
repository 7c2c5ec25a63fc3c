//! Modules available to pipeline scripts
//!
//! - `pipeline`: constructors for jobs, steps and backing services
//! - `when`: trigger predicates
//! - `env`: read-only access to variables supplied by the caller

pub mod env;
pub mod pipeline;
pub mod when;

pub use env::{EnvModule, VarProvider};
pub use pipeline::PipelineModule;
pub use when::WhenModule;
