//! Environment module
//!
//! Gives pipeline scripts read-only access to a set of variables chosen by
//! the caller: the runner hands over its configuration, the CLI the process
//! environment. Scripts cannot modify the set.

use crate::module::SluiceModule;
use mlua::prelude::*;
use std::collections::HashMap;
use std::sync::Arc;

/// Source of variables visible through `env`
pub trait VarProvider: Send + Sync {
    fn get(&self, name: &str) -> Option<String>;

    fn keys(&self) -> Vec<String>;
}

impl VarProvider for HashMap<String, String> {
    fn get(&self, name: &str) -> Option<String> {
        HashMap::get(self, name).cloned()
    }

    fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = HashMap::keys(self).cloned().collect();
        keys.sort();
        keys
    }
}

pub struct EnvModule<V: VarProvider> {
    provider: Arc<V>,
}

impl<V: VarProvider> EnvModule<V> {
    pub fn new(provider: V) -> Self {
        Self {
            provider: Arc::new(provider),
        }
    }
}

impl<V: VarProvider + 'static> SluiceModule for EnvModule<V> {
    fn id(&self) -> &'static str {
        "env"
    }

    fn register(&self, lua: &Lua) -> LuaResult<()> {
        let env_table = lua.create_table()?;

        // env.get(name, default?)
        {
            let provider = self.provider.clone();
            env_table.set(
                "get",
                lua.create_function(move |_, (name, default): (String, Option<String>)| {
                    Ok(provider.get(&name).or(default))
                })?,
            )?;
        }

        // env.require(name)
        {
            let provider = self.provider.clone();
            env_table.set(
                "require",
                lua.create_function(move |_, name: String| {
                    provider.get(&name).ok_or_else(|| {
                        LuaError::RuntimeError(format!(
                            "Required environment variable '{}' is not set",
                            name
                        ))
                    })
                })?,
            )?;
        }

        // env.has(name)
        {
            let provider = self.provider.clone();
            env_table.set(
                "has",
                lua.create_function(move |_, name: String| Ok(provider.get(&name).is_some()))?,
            )?;
        }

        // env.keys()
        {
            let provider = self.provider.clone();
            env_table.set(
                "keys",
                lua.create_function(move |lua, ()| lua.create_sequence_from(provider.keys()))?,
            )?;
        }

        // Writes to the table are rejected
        let metatable = lua.create_table()?;
        metatable.set(
            "__newindex",
            lua.create_function(|_, (_, key): (LuaValue, LuaValue)| -> LuaResult<()> {
                Err(LuaError::RuntimeError(format!(
                    "env is read-only (attempted to set '{}')",
                    key.to_string()?
                )))
            })?,
        )?;
        let proxy = lua.create_table()?;
        metatable.set("__index", env_table)?;
        proxy.set_metatable(Some(metatable))?;

        lua.globals().set(self.id(), proxy)?;
        Ok(())
    }

    fn stubs(&self) -> String {
        r#"---@meta

---Read-only access to variables supplied to the pipeline
---@class env
env = {}

---Get a variable, or `default` when it is not set
---@param name string
---@param default? string
---@return string?
---
---@usage
---local url = env.get("DATABASE_URL", "postgres://localhost/app")
function env.get(name, default) end

---Get a variable, raising an error when it is not set
---@param name string
---@return string
function env.require(name) end

---Check whether a variable is set
---@param name string
---@return boolean
function env.has(name) end

---Names of all visible variables, sorted
---@return string[]
function env.keys() end
"#
        .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lua_with(vars: &[(&str, &str)]) -> Lua {
        let lua = Lua::new();
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        EnvModule::new(vars).register(&lua).unwrap();
        lua
    }

    #[test]
    fn test_env_get_with_default() {
        let lua = lua_with(&[("TRUNK_BRANCH", "main")]);

        let result: String = lua.load(r#"return env.get("TRUNK_BRANCH")"#).eval().unwrap();
        assert_eq!(result, "main");

        let result: String = lua
            .load(r#"return env.get("MISSING", "fallback")"#)
            .eval()
            .unwrap();
        assert_eq!(result, "fallback");

        let result: Option<String> = lua.load(r#"return env.get("MISSING")"#).eval().unwrap();
        assert_eq!(result, None);
    }

    #[test]
    fn test_env_require() {
        let lua = lua_with(&[("IMAGE_NAME", "app")]);

        let result: String = lua.load(r#"return env.require("IMAGE_NAME")"#).eval().unwrap();
        assert_eq!(result, "app");

        let result: LuaResult<String> = lua.load(r#"return env.require("MISSING")"#).eval();
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("Required environment variable")
        );
    }

    #[test]
    fn test_env_has_and_keys() {
        let lua = lua_with(&[("B", "2"), ("A", "1")]);

        let exists: bool = lua.load(r#"return env.has("A")"#).eval().unwrap();
        assert!(exists);

        let first: String = lua.load(r#"return env.keys()[1]"#).eval().unwrap();
        assert_eq!(first, "A");
    }

    #[test]
    fn test_env_is_read_only() {
        let lua = lua_with(&[]);
        let result = lua.load(r#"env.SECRET = "x""#).exec();
        assert!(result.unwrap_err().to_string().contains("read-only"));
    }

    #[test]
    fn test_stubs_generation() {
        let stubs = EnvModule::new(HashMap::<String, String>::new()).stubs();
        assert!(stubs.contains("---@meta"));
        assert!(stubs.contains("function env.get"));
        assert!(stubs.contains("function env.require"));
    }
}
