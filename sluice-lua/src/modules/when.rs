//! Trigger predicate constructors
//!
//! Triggers are plain tables tagged with a `type` field, mirroring the
//! serialized form of `sluice_core::Trigger`. The parser converts them back.

use crate::module::SluiceModule;
use mlua::prelude::*;

pub struct WhenModule;

fn tagged(lua: &Lua, kind: &str, value: Option<LuaValue>) -> LuaResult<LuaTable> {
    let table = lua.create_table()?;
    table.set("type", kind)?;
    if let Some(value) = value {
        table.set("value", value)?;
    }
    Ok(table)
}

fn tagged_str(lua: &Lua, kind: &str, value: &str) -> LuaResult<LuaTable> {
    tagged(lua, kind, Some(LuaValue::String(lua.create_string(value)?)))
}

fn combine(lua: &Lua, kind: &str, parts: LuaMultiValue) -> LuaResult<LuaTable> {
    // Accept both when.all(a, b) and when.all({ a, b })
    let parts: Vec<LuaValue> = match parts.len() {
        1 => match parts.into_iter().next() {
            Some(LuaValue::Table(t)) if t.get::<Option<String>>("type")?.is_none() => {
                t.sequence_values::<LuaValue>().collect::<LuaResult<_>>()?
            }
            Some(v) => vec![v],
            None => Vec::new(),
        },
        _ => parts.into_iter().collect(),
    };
    tagged(lua, kind, Some(LuaValue::Table(lua.create_sequence_from(parts)?)))
}

impl SluiceModule for WhenModule {
    fn id(&self) -> &'static str {
        "when"
    }

    fn register(&self, lua: &Lua) -> LuaResult<()> {
        let when = lua.create_table()?;

        when.set("always", lua.create_function(|lua, ()| tagged(lua, "always", None))?)?;
        when.set("never", lua.create_function(|lua, ()| tagged(lua, "never", None))?)?;
        when.set(
            "push",
            lua.create_function(|lua, ()| tagged_str(lua, "kind", "push"))?,
        )?;
        when.set(
            "proposed_merge",
            lua.create_function(|lua, ()| tagged_str(lua, "kind", "proposed_merge"))?,
        )?;
        when.set(
            "branch",
            lua.create_function(|lua, name: String| tagged_str(lua, "branch", &name))?,
        )?;
        when.set(
            "target",
            lua.create_function(|lua, name: String| tagged_str(lua, "target", &name))?,
        )?;
        when.set(
            "all",
            lua.create_function(|lua, parts: LuaMultiValue| combine(lua, "all", parts))?,
        )?;
        when.set(
            "any",
            lua.create_function(|lua, parts: LuaMultiValue| combine(lua, "any", parts))?,
        )?;
        when.set(
            "not_",
            lua.create_function(|lua, inner: LuaTable| {
                tagged(lua, "not", Some(LuaValue::Table(inner)))
            })?,
        )?;

        // when.trunk_push(trunk) / when.integration(trunk) are built in Lua
        // on top of the primitives above
        lua.globals().set(self.id(), when)?;
        lua.load(
            r#"
            function when.trunk_push(trunk)
                return when.all(when.push(), when.branch(trunk))
            end

            function when.integration(trunk)
                return when.any(
                    when.all(when.push(), when.branch(trunk)),
                    when.all(when.proposed_merge(), when.target(trunk))
                )
            end
            "#,
        )
        .set_name("=when")
        .exec()?;

        Ok(())
    }

    fn stubs(&self) -> String {
        r#"---@meta

---Trigger predicates deciding whether a job runs for an event
---@class when
when = {}

---@class Trigger
---@field type string
---@field value any

---Always eligible (the default)
---@return Trigger
function when.always() end

---Never eligible
---@return Trigger
function when.never() end

---The event is a push
---@return Trigger
function when.push() end

---The event is a proposed merge (pull/merge request)
---@return Trigger
function when.proposed_merge() end

---The event happened on `name`
---@param name string
---@return Trigger
function when.branch(name) end

---The event lands on `name`: the branch of a push, or the target of a proposed merge
---@param name string
---@return Trigger
function when.target(name) end

---Every trigger holds
---@param ... Trigger
---@return Trigger
function when.all(...) end

---At least one trigger holds
---@param ... Trigger
---@return Trigger
function when.any(...) end

---The trigger does not hold
---@param trigger Trigger
---@return Trigger
function when.not_(trigger) end

---Pushes to `trunk`
---@param trunk string
---@return Trigger
function when.trunk_push(trunk) end

---Pushes to `trunk` and proposed merges into `trunk`
---@param trunk string
---@return Trigger
function when.integration(trunk) end
"#
        .to_string()
    }
}
