use mlua::prelude::*;

/// A table of helpers exposed to pipeline scripts as a global
///
/// # Example
///
/// ```rust
/// use sluice_lua::module::SluiceModule;
/// use mlua::prelude::*;
///
/// struct Version;
///
/// impl SluiceModule for Version {
///     fn id(&self) -> &'static str {
///         "version"
///     }
///
///     fn register(&self, lua: &Lua) -> LuaResult<()> {
///         let table = lua.create_table()?;
///         table.set("major", 1)?;
///         lua.globals().set(self.id(), table)
///     }
///
///     fn stubs(&self) -> String {
///         "---@meta\nversion = {}\n".to_string()
///     }
/// }
/// ```
pub trait SluiceModule: Send + Sync {
    /// Global name of the module in Lua. Must be a valid, unique identifier.
    fn id(&self) -> &'static str;

    /// Registers the module's table as a global named after `id()`
    fn register(&self, lua: &Lua) -> LuaResult<()>;

    /// LuaLS annotations for the module, starting with `---@meta`
    fn stubs(&self) -> String;
}
