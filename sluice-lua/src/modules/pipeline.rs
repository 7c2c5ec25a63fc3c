//! Pipeline definition helpers
//!
//! Every helper takes a table and returns it tagged, so scripts can write
//! plain tables or use the helpers interchangeably.

use crate::module::SluiceModule;
use mlua::prelude::*;

pub struct PipelineModule;

/// Returns a constructor that sets `field = value` on its (optional) table
fn tagger(lua: &Lua, field: &'static str, value: &'static str) -> LuaResult<LuaFunction> {
    lua.create_function(move |lua, table: Option<LuaTable>| {
        let table = match table {
            Some(t) => t,
            None => lua.create_table()?,
        };
        table.set(field, value)?;
        Ok(table)
    })
}

impl SluiceModule for PipelineModule {
    fn id(&self) -> &'static str {
        "pipeline"
    }

    fn register(&self, lua: &Lua) -> LuaResult<()> {
        let pipeline = lua.create_table()?;

        // pipeline.define(definition) / pipeline.job(job): passthrough
        pipeline.set("define", lua.create_function(|_, t: LuaTable| Ok(t))?)?;
        pipeline.set("job", lua.create_function(|_, t: LuaTable| Ok(t))?)?;

        // Steps
        pipeline.set("run", tagger(lua, "type", "run")?)?;
        pipeline.set("publish", tagger(lua, "type", "publish")?)?;
        pipeline.set("deploy", tagger(lua, "type", "deploy")?)?;

        // Backing services
        pipeline.set("postgres", tagger(lua, "probe", "postgres")?)?;
        pipeline.set("http", tagger(lua, "probe", "http")?)?;
        pipeline.set("tcp", tagger(lua, "probe", "tcp")?)?;

        lua.globals().set(self.id(), pipeline)?;
        Ok(())
    }

    fn stubs(&self) -> String {
        r#"---@meta

---Helpers for declaring a pipeline
---@class pipeline
pipeline = {}

---@class Step
---@field name string
---@field type? "run"|"publish"|"deploy"
---@field env? table<string, string> Overrides job and pipeline variables
---@field services? string[] Services that must be ready before the step runs
---@field secrets? ("registry"|"deploy_key")[]

---@class RunStep: Step
---@field command string Shell command

---@class PublishStep: Step
---@field context? string Build context, defaults to "."
---@field dockerfile? string
---@field image? string Repository override, e.g. "ghcr.io/acme/app"
---@field alias? string Floating tag, defaults to "latest"
---@field tags? string[] Extra tags

---@class DeployStep: Step
---@field directory? string Checkout directory on the host
---@field repository? string Repository to clone
---@field branch? string
---@field compose_file? string
---@field tag? string Image tag to start

---@class Service
---@field name string
---@field probe? "postgres"|"http"|"tcp"
---@field url? string Connection string (postgres) or URL (http)
---@field address? string host:port (tcp)
---@field interval? number Seconds between probe attempts, defaults to 10
---@field retries? integer Total probe attempts, defaults to 5

---@class Job
---@field name string
---@field needs? string[] Jobs that must succeed first
---@field when? Trigger Defaults to when.always()
---@field services? string[]
---@field container? string Image the job's commands run in
---@field env? table<string, string>
---@field steps Step[]

---@class Pipeline
---@field name string
---@field description? string
---@field env? table<string, string>
---@field services? Service[]
---@field jobs Job[]

---Declare the pipeline
---@param definition Pipeline
---@return Pipeline
function pipeline.define(definition) end

---Declare a job
---@param job Job
---@return Job
function pipeline.job(job) end

---A shell command step
---@param step RunStep
---@return RunStep
function pipeline.run(step) end

---Build the image and push it under every tag
---@param step PublishStep
---@return PublishStep
function pipeline.publish(step) end

---Roll out the published image on the deployment host
---@param step? DeployStep
---@return DeployStep
function pipeline.deploy(step) end

---A Postgres service probed with `SELECT 1`
---@param service Service
---@return Service
function pipeline.postgres(service) end

---An HTTP service probed with a GET expecting 2xx
---@param service Service
---@return Service
function pipeline.http(service) end

---A service probed by opening a TCP connection
---@param service Service
---@return Service
function pipeline.tcp(service) end
"#
        .to_string()
    }
}
