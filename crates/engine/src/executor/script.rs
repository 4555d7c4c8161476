//! # Sandboxed `script` blocks
//!
//! Block content runs as a Lua chunk inside a whitelist-only environment. The
//! chunk sees exactly three bindings besides the safe core functions:
//!
//! - `state`: the session state as a mutable table, written back after success
//! - `variables`: the scratch map, written back after success
//! - `helper`: `getState(path)`, `setState(path, value)`, and `log(...)`
//!
//! `io`, `os`, `require`, `load`, `dofile`, `debug`, and `package` are absent. An
//! instruction hook checks the block's [`ExecutionBudget`] so runaway loops stop at
//! the configured timeout or when the run is cancelled. The Lua heap is capped by
//! `max_memory_bytes`, so a single oversized library call fails instead of running
//! past the budget.
//!
//! A string return value becomes the block output; any other return value is dropped.

use std::sync::{Arc, Mutex};

use anyhow::{Result, anyhow, bail};
use folio_types::{ExecutorResult, RuntimeBlock};
use indexmap::IndexMap;
use mlua::{DeserializeOptions, HookTriggers, Lua, LuaOptions, LuaSerdeExt, MultiValue, StdLib, Table, Value as LuaValue};
use serde_json::{Map as JsonMap, Value};
use tracing::debug;

use super::BlockExecutor;
use crate::{
    config::ScriptConfig,
    context::{ExecutionBudget, ExecutionContext},
    state::{PathSegment, path_segments},
};

const SAFE_GLOBALS: [&str; 18] = [
    "tostring",
    "tonumber",
    "type",
    "pairs",
    "ipairs",
    "next",
    "select",
    "error",
    "pcall",
    "xpcall",
    "assert",
    "rawget",
    "rawset",
    "rawlen",
    "rawequal",
    "setmetatable",
    "getmetatable",
    "unpack",
];

const SAFE_LIBRARIES: [&str; 3] = ["math", "string", "table"];

/// Values a script leaves behind once it finishes.
#[derive(Debug, Clone, PartialEq)]
pub struct ScriptOutcome {
    pub state: JsonMap<String, Value>,
    pub variables: JsonMap<String, Value>,
    pub output: Option<String>,
    pub logs: Vec<String>,
}

/// Bounded buffer shared by `print` and `helper.log`.
#[derive(Debug, Clone)]
struct LogBuffer {
    lines: Arc<Mutex<Vec<String>>>,
    limit: usize,
}

impl LogBuffer {
    fn new(limit: usize) -> Self {
        Self {
            lines: Arc::new(Mutex::new(Vec::new())),
            limit,
        }
    }

    fn push(&self, line: String) {
        let mut lines = self.lines.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if lines.len() < self.limit {
            lines.push(line);
        }
    }

    fn take(&self) -> Vec<String> {
        std::mem::take(&mut *self.lines.lock().unwrap_or_else(|poisoned| poisoned.into_inner()))
    }
}

fn lua_display(value: &LuaValue) -> String {
    match value {
        LuaValue::Nil => "nil".to_string(),
        LuaValue::Boolean(flag) => flag.to_string(),
        LuaValue::Integer(integer) => integer.to_string(),
        LuaValue::Number(number) => number.to_string(),
        LuaValue::String(text) => text.to_string_lossy().to_string(),
        other => other.type_name().to_string(),
    }
}

fn format_lua_error(error: &mlua::Error) -> String {
    match error {
        mlua::Error::RuntimeError(message) => message.clone(),
        mlua::Error::CallbackError { cause, .. } => format_lua_error(cause),
        mlua::Error::SyntaxError { message, .. } => format!("compile error: {message}"),
        mlua::Error::MemoryError(message) => format!("memory limit exceeded: {message}"),
        other => other.to_string(),
    }
}

fn lua_error(error: mlua::Error) -> anyhow::Error {
    anyhow!(format_lua_error(&error))
}

fn segment_key(lua: &Lua, segment: &PathSegment) -> mlua::Result<LuaValue> {
    Ok(match segment {
        PathSegment::Key(key) => LuaValue::String(lua.create_string(key)?),
        PathSegment::Index(index) => LuaValue::Integer(*index as i64 + 1),
    })
}

fn get_in_table(lua: &Lua, root: &Table, path: &str) -> mlua::Result<LuaValue> {
    let mut current = LuaValue::Table(root.clone());
    for segment in path_segments(path) {
        let LuaValue::Table(table) = current else {
            return Ok(LuaValue::Nil);
        };
        current = table.get::<LuaValue>(segment_key(lua, &segment)?)?;
    }
    Ok(current)
}

fn set_in_table(lua: &Lua, root: &Table, path: &str, value: LuaValue) -> mlua::Result<()> {
    let segments = path_segments(path);
    let Some((last, parents)) = segments.split_last() else {
        return Err(mlua::Error::RuntimeError("setState requires a non-empty path".to_string()));
    };
    let mut current = root.clone();
    for segment in parents {
        let key = segment_key(lua, segment)?;
        current = match current.get::<LuaValue>(key.clone())? {
            LuaValue::Table(table) => table,
            _ => {
                let table = lua.create_table()?;
                current.set(key, table.clone())?;
                table
            }
        };
    }
    current.set(segment_key(lua, last)?, value)
}

fn build_environment(lua: &Lua, state: LuaValue, variables: LuaValue, logs: &LogBuffer) -> mlua::Result<Table> {
    let env = lua.create_table()?;
    let globals = lua.globals();
    for name in SAFE_GLOBALS.iter().chain(SAFE_LIBRARIES.iter()) {
        let value = globals.get::<LuaValue>(*name)?;
        if !value.is_nil() {
            env.set(*name, value)?;
        }
    }

    let print_logs = logs.clone();
    let print = lua.create_function(move |_, args: MultiValue| {
        print_logs.push(args.iter().map(lua_display).collect::<Vec<_>>().join("\t"));
        Ok(())
    })?;
    env.set("print", print)?;

    env.set("state", state)?;
    env.set("variables", variables)?;

    let helper = lua.create_table()?;
    let state_env = env.clone();
    helper.set(
        "getState",
        lua.create_function(move |lua, path: String| match state_env.get::<LuaValue>("state")? {
            LuaValue::Table(root) => get_in_table(lua, &root, &path),
            _ => Ok(LuaValue::Nil),
        })?,
    )?;
    let state_env = env.clone();
    helper.set(
        "setState",
        lua.create_function(move |lua, (path, value): (String, LuaValue)| match state_env.get::<LuaValue>("state")? {
            LuaValue::Table(root) => set_in_table(lua, &root, &path, value),
            _ => Err(mlua::Error::RuntimeError("state is no longer a table".to_string())),
        })?,
    )?;
    let helper_logs = logs.clone();
    helper.set(
        "log",
        lua.create_function(move |_, args: MultiValue| {
            helper_logs.push(args.iter().map(lua_display).collect::<Vec<_>>().join(" "));
            Ok(())
        })?,
    )?;
    env.set("helper", helper)?;
    Ok(env)
}

fn table_to_map(lua: &Lua, value: LuaValue, binding: &str) -> Result<JsonMap<String, Value>> {
    if !value.is_table() {
        bail!("`{binding}` must remain a table");
    }
    let options = DeserializeOptions::new().deny_unsupported_types(false);
    match lua.from_value_with::<Value>(value, options).map_err(lua_error)? {
        Value::Object(map) => Ok(map),
        Value::Array(items) if items.is_empty() => Ok(JsonMap::new()),
        _ => bail!("`{binding}` must remain a table with string keys"),
    }
}

/// Runs `code` in a fresh sandbox against copies of `state` and `variables`.
pub fn run_script(
    code: &str,
    state: &JsonMap<String, Value>,
    variables: &JsonMap<String, Value>,
    budget: &ExecutionBudget,
    config: &ScriptConfig,
) -> Result<ScriptOutcome> {
    let lua = Lua::new_with(StdLib::MATH | StdLib::STRING | StdLib::TABLE, LuaOptions::default()).map_err(lua_error)?;
    if config.max_memory_bytes > 0 {
        lua.set_memory_limit(config.max_memory_bytes).map_err(lua_error)?;
    }
    let logs = LogBuffer::new(config.max_log_lines);

    let state_table = lua.to_value(state).map_err(lua_error)?;
    let variables_table = lua.to_value(variables).map_err(lua_error)?;
    let env = build_environment(&lua, state_table, variables_table, &logs).map_err(lua_error)?;

    let hook_budget = budget.clone();
    lua.set_hook(
        HookTriggers::new().every_nth_instruction(config.hook_instruction_interval.max(1)),
        move |_lua, _debug| match hook_budget.exhaustion() {
            Some(reason) => Err(mlua::Error::RuntimeError(reason.to_string())),
            None => Ok(mlua::VmState::Continue),
        },
    );
    let returned = lua.load(code).set_name("=script").set_environment(env.clone()).eval::<LuaValue>();
    lua.remove_hook();

    let logs = logs.take();
    for line in &logs {
        debug!(line = %line, "script log");
    }
    let returned = returned.map_err(lua_error)?;

    let output = match &returned {
        LuaValue::String(text) => Some(text.to_string_lossy().to_string()),
        _ => None,
    };
    Ok(ScriptOutcome {
        state: table_to_map(&lua, env.get::<LuaValue>("state").map_err(lua_error)?, "state")?,
        variables: table_to_map(&lua, env.get::<LuaValue>("variables").map_err(lua_error)?, "variables")?,
        output,
        logs,
    })
}

#[derive(Debug, Default)]
pub struct ScriptExecutor;

impl BlockExecutor for ScriptExecutor {
    fn name(&self) -> &'static str {
        "Script"
    }

    fn run(&self, block: &RuntimeBlock, context: &mut ExecutionContext) -> Result<ExecutorResult> {
        let config = context.config().script.clone();
        let budget = context.budget(config.timeout());
        let variables: JsonMap<String, Value> = context.variables.iter().map(|(key, value)| (key.clone(), value.clone())).collect();
        let outcome = run_script(&block.content, context.state.as_map(), &variables, &budget, &config)?;

        let changes: IndexMap<String, Value> = outcome
            .state
            .iter()
            .filter(|(key, value)| context.state.get(key) != Some(*value))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        context.state.restore(outcome.state);
        context.variables = outcome.variables.into_iter().collect();

        let result = ExecutorResult::completed().with_state_changes(changes).with_logs(outcome.logs);
        Ok(match outcome.output {
            Some(output) => result.with_output(output),
            None => result,
        })
    }
}
