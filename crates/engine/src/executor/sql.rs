//! `sql` blocks run one read-only query and store the rows in state.
//!
//! ```text
//! query = SELECT name, qty FROM items
//!         WHERE qty > ?
//! db = game.db
//! params = [$minimum]
//! as = inventory
//! ```
//!
//! Only statements starting with `SELECT` or `PRAGMA` reach the driver. Connections
//! are opened read-only and released whether or not the query succeeds.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{Context, Result, anyhow, bail};
use folio_types::{BlockPayload, ExecutorResult, RuntimeBlock};
use indexmap::IndexMap;
use serde_json::Value;
use tracing::{debug, warn};

use super::{BlockExecutor, syntax::key_value};
use crate::{
    config::SqlConfig,
    context::ExecutionContext,
    resolve::{interpolate, parse_params, strip_matching_quotes},
    sql_driver::{MEMORY_DATABASE, SqlDriverHandle},
};

/// State path rows are written to when a block names no alias.
pub const DEFAULT_RESULT_ALIAS: &str = "__sqlResult";

const READ_ONLY_PREFIXES: [&str; 2] = ["select", "pragma"];

#[derive(Debug, Default, Clone, PartialEq, Eq)]
struct SqlSpec {
    query: String,
    path: Option<String>,
    params: Option<String>,
    alias: Option<String>,
}

fn canonical_key(key: &str) -> Option<&'static str> {
    match key {
        "query" | "sql" => Some("query"),
        "path" | "db" | "database" => Some("path"),
        "params" => Some("params"),
        "as" => Some("as"),
        _ => None,
    }
}

/// Parses `key = value` lines. Lines without a recognized key continue the
/// previous value; content with no keys at all is taken as the query.
fn parse_spec(content: &str) -> SqlSpec {
    let mut values: IndexMap<&'static str, String> = IndexMap::new();
    let mut current: Option<&'static str> = None;
    for line in content.lines() {
        if let Some((key, value)) = key_value(line, '=')
            && let Some(key) = canonical_key(&key)
        {
            values.insert(key, value.to_string());
            current = Some(key);
        } else if let Some(key) = current
            && let Some(value) = values.get_mut(key)
        {
            if !line.trim().is_empty() {
                value.push('\n');
                value.push_str(line.trim());
            }
        }
    }
    if values.is_empty() {
        return SqlSpec {
            query: content.trim().to_string(),
            ..SqlSpec::default()
        };
    }
    let mut take = |key: &str| values.shift_remove(key).map(|value| value.trim().to_string()).filter(|value| !value.is_empty());
    SqlSpec {
        query: take("query").unwrap_or_default(),
        path: take("path"),
        params: take("params"),
        alias: take("as"),
    }
}

fn ensure_read_only(query: &str) -> Result<()> {
    let normalized = query.trim_start().to_ascii_lowercase();
    if READ_ONLY_PREFIXES.iter().any(|prefix| normalized.starts_with(prefix)) {
        return Ok(());
    }
    warn!(query = %query.trim(), "rejected non read-only query");
    bail!("only read-only SELECT or PRAGMA queries are allowed")
}

fn resolve_database(path: Option<&str>, config: &SqlConfig) -> String {
    let path = path.map(strip_matching_quotes).map(str::trim).filter(|path| !path.is_empty());
    let path = path.unwrap_or(config.default_database.as_str());
    if path == MEMORY_DATABASE || path.starts_with("file:") {
        return path.to_string();
    }
    match &config.database_root {
        Some(root) if Path::new(path).is_relative() => root.join(path).to_string_lossy().into_owned(),
        _ => PathBuf::from(path).to_string_lossy().into_owned(),
    }
}

#[derive(Debug, Default)]
pub struct SqlExecutor {
    drivers: Arc<SqlDriverHandle>,
}

impl SqlExecutor {
    pub fn new(drivers: Arc<SqlDriverHandle>) -> Self {
        Self { drivers }
    }
}

impl BlockExecutor for SqlExecutor {
    fn name(&self) -> &'static str {
        "SQL"
    }

    fn run(&self, block: &RuntimeBlock, context: &mut ExecutionContext) -> Result<ExecutorResult> {
        let spec = parse_spec(&block.content);
        let query = interpolate(&spec.query, &context.state);
        if query.trim().is_empty() {
            bail!("a query is required");
        }
        ensure_read_only(&query)?;

        let config = context.config().sql.clone();
        let database = resolve_database(spec.path.as_deref().map(|path| interpolate(path, &context.state)).as_deref(), &config);
        let params = spec.params.as_deref().map(|params| parse_params(params, &context.state)).unwrap_or_default();
        let alias = spec.alias.unwrap_or_else(|| DEFAULT_RESULT_ALIAS.to_string());

        let driver = self.drivers.driver().ok_or_else(|| anyhow!("no SQL driver is available"))?;
        let budget = context.budget(config.timeout());
        debug!(driver = driver.name(), database = %database, params = params.len(), "running sql block");

        let mut connection = driver.open(&database, true, &budget)?;
        let queried = connection.query(query.trim(), &params);
        let closed = connection.close();
        let rows = match queried {
            Ok(rows) => rows,
            Err(error) => match budget.exhaustion() {
                Some(reason) => bail!("{reason}"),
                None => return Err(error),
            },
        };
        closed.context("failed to close database connection")?;

        let row_count = rows.len();
        context.state.set_path(&alias, Value::Array(rows.clone()));
        let mut changes = IndexMap::new();
        changes.insert(alias.clone(), Value::Array(rows.clone()));

        Ok(ExecutorResult::completed()
            .with_output(format!("{row_count} row(s)"))
            .with_state_changes(changes)
            .with_payload(BlockPayload::Sql { rows, row_count, alias }))
    }
}
