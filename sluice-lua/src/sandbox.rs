//! Lua sandbox creation
//!
//! Pipeline scripts are evaluated in a restricted sandbox: no filesystem,
//! no process execution and no loading of external code. The only globals
//! beyond the basic libraries are the `pipeline`, `when` and `env` modules.

use mlua::{Lua, LuaOptions, Result as LuaResult, StdLib};

use crate::module::SluiceModule;
use crate::modules::{EnvModule, PipelineModule, VarProvider, WhenModule};

/// Create a restricted Lua sandbox exposing `vars` through `env`
///
/// # Example
/// ```no_run
/// use std::collections::HashMap;
/// use sluice_lua::sandbox::create_sandbox;
///
/// let lua = create_sandbox(HashMap::<String, String>::new())?;
/// let name: String = lua
///     .load(r#"return pipeline.define({ name = "app", jobs = {} }).name"#)
///     .eval()?;
/// # Ok::<(), mlua::Error>(())
/// ```
pub fn create_sandbox<V: VarProvider + 'static>(vars: V) -> LuaResult<Lua> {
    // Only TABLE, STRING, MATH and COROUTINE; no IO, OS, PACKAGE or DEBUG
    let lua = unsafe {
        Lua::unsafe_new_with(
            StdLib::TABLE | StdLib::STRING | StdLib::MATH | StdLib::COROUTINE,
            LuaOptions::default(),
        )
    };

    lua.globals().set("require", mlua::Nil)?;
    lua.globals().set("dofile", mlua::Nil)?;
    lua.globals().set("loadfile", mlua::Nil)?;
    lua.globals().set("load", mlua::Nil)?;

    let modules: [&dyn SluiceModule; 3] = [&PipelineModule, &WhenModule, &EnvModule::new(vars)];
    for module in modules {
        module.register(&lua)?;
    }

    Ok(lua)
}
