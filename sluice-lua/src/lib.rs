//! Sluice Lua Infrastructure
//!
//! Pipelines are declared in Lua. This crate provides:
//! - A module trait for the helpers exposed to pipeline scripts
//! - The `pipeline`, `when` and `env` modules
//! - A restricted sandbox with no I/O or code loading
//! - The parser turning a pipeline script into a `PipelineDefinition`
//! - Stub generation for the Lua Language Server

pub mod module;
pub mod modules;
pub mod parser;
pub mod sandbox;

pub use module::SluiceModule;
pub use modules::{EnvModule, PipelineModule, VarProvider, WhenModule};
pub use parser::parse_pipeline;
pub use sandbox::create_sandbox;

/// LuaLS stub files for every module, as `(module id, content)` pairs
pub fn stubs() -> Vec<(&'static str, String)> {
    let modules: Vec<Box<dyn SluiceModule>> = vec![
        Box::new(PipelineModule),
        Box::new(WhenModule),
        Box::new(EnvModule::new(
            std::collections::HashMap::<String, String>::new(),
        )),
    ];
    modules.iter().map(|m| (m.id(), m.stubs())).collect()
}
