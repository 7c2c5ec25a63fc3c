//! Service layer
//!
//! Business logic between the HTTP handlers and the pipeline executor.

pub mod invocation;

pub use invocation::{InvocationError, InvocationService};
