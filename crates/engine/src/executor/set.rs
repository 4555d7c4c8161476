//! `set` blocks: a line-oriented mutation language.
//!
//! ```text
//! set $path [=] value
//! inc $path [amount]
//! dec $path [amount]
//! toggle $path
//! ```

use anyhow::{Result, bail};
use folio_types::{ExecutorResult, RuntimeBlock, RuntimeValue, number_to_json};
use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use super::{BlockExecutor, syntax::is_ignorable};
use crate::{
    context::ExecutionContext,
    resolve::{interpolate, resolve_literal},
    state::RuntimeState,
};

static STATEMENT_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^\s*(set|inc|dec|toggle)\s+\$?([A-Za-z_][A-Za-z0-9_]*(?:\.[A-Za-z0-9_]+|\[\d+\])*)\s*(.*)$")
        .expect("set statement regex should compile")
});

#[derive(Debug, Clone, PartialEq)]
enum Statement {
    Set { path: String, value: String },
    Increment { path: String, amount: Option<String> },
    Decrement { path: String, amount: Option<String> },
    Toggle { path: String },
}

fn parse_statement(line: &str) -> Result<Statement> {
    let Some(captures) = STATEMENT_PATTERN.captures(line) else {
        bail!("unrecognized statement '{}'", line.trim());
    };
    let path = captures[2].to_string();
    let rest = captures[3].trim();
    let amount = (!rest.is_empty()).then(|| rest.to_string());
    Ok(match captures[1].to_ascii_lowercase().as_str() {
        "set" => Statement::Set {
            path,
            value: rest.strip_prefix('=').map(str::trim).unwrap_or(rest).to_string(),
        },
        "inc" => Statement::Increment { path, amount },
        "dec" => Statement::Decrement { path, amount },
        _ if rest.is_empty() => Statement::Toggle { path },
        _ => bail!("toggle takes no value: '{}'", line.trim()),
    })
}

fn resolve_amount(amount: Option<&str>, state: &RuntimeState) -> Result<f64> {
    let Some(amount) = amount else {
        return Ok(1.0);
    };
    let text = interpolate(amount, state);
    match text.trim().parse::<f64>() {
        Ok(value) if value.is_finite() => Ok(value),
        _ => bail!("amount '{}' is not a number", text.trim()),
    }
}

fn current_number(state: &RuntimeState, path: &str) -> f64 {
    state
        .get_path(path)
        .map(RuntimeValue::from_json)
        .and_then(|value| value.as_number())
        .filter(|number| number.is_finite())
        .unwrap_or(0.0)
}

fn apply(statement: Statement, state: &mut RuntimeState) -> Result<(String, Value)> {
    let (path, value) = match statement {
        Statement::Set { path, value } => {
            let resolved = resolve_literal(&value, state);
            (path, resolved)
        }
        Statement::Increment { path, amount } => {
            let amount = resolve_amount(amount.as_deref(), state)?;
            let value = number_to_json(current_number(state, &path) + amount);
            (path, value)
        }
        Statement::Decrement { path, amount } => {
            let amount = resolve_amount(amount.as_deref(), state)?;
            let value = number_to_json(current_number(state, &path) - amount);
            (path, value)
        }
        Statement::Toggle { path } => {
            let current = state.get_path(&path).map(RuntimeValue::from_json).is_some_and(|value| value.is_truthy());
            (path, Value::Bool(!current))
        }
    };
    state.set_path(&path, value.clone());
    Ok((path, value))
}

#[derive(Debug, Default)]
pub struct SetExecutor;

impl BlockExecutor for SetExecutor {
    fn name(&self) -> &'static str {
        "Set"
    }

    fn run(&self, block: &RuntimeBlock, context: &mut ExecutionContext) -> Result<ExecutorResult> {
        let mut changes = IndexMap::new();
        for line in block.content.lines().filter(|line| !is_ignorable(line)) {
            let statement = parse_statement(line)?;
            let (path, value) = apply(statement, &mut context.state)?;
            // Replay order must match write order.
            changes.shift_remove(&path);
            changes.insert(path, value);
        }
        Ok(ExecutorResult::completed().with_state_changes(changes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn run(content: &str, context: &mut ExecutionContext) -> ExecutorResult {
        SetExecutor.execute(&RuntimeBlock::new("set", content), context)
    }

    #[test]
    fn arithmetic_round_trip() {
        let mut context = ExecutionContext::default();
        let result = run("set $g = 5\ninc $g 3\ndec $g 2", &mut context);
        assert!(result.success());
        assert_eq!(context.state.get("g"), Some(&json!(6)));
        assert_eq!(result.state_changes.get("g"), Some(&json!(6)));
    }

    #[test]
    fn increments_default_to_one_and_missing_values_to_zero() {
        let mut context = ExecutionContext::default();
        context.state.set("label", json!("n/a"));
        run("inc $visits\ninc $label\ndec $player.hp 2.5", &mut context);
        assert_eq!(context.state.get("visits"), Some(&json!(1)));
        assert_eq!(context.state.get("label"), Some(&json!(1)));
        assert_eq!(context.state.get_path("player.hp"), Some(&json!(-2.5)));
    }

    #[test]
    fn changes_follow_write_order() {
        let mut context = ExecutionContext::default();
        let result = run("set $a.b = 1\nset $a = 5\nset $a.b = 2", &mut context);
        let order: Vec<&str> = result.state_changes.keys().map(String::as_str).collect();
        assert_eq!(order, vec!["a", "a.b"]);
        assert_eq!(context.state.get("a"), Some(&json!({"b": 2})));
    }

    #[test]
    fn booleans_count_as_zero() {
        let mut context = ExecutionContext::default();
        context.state.set("lit", json!(true));
        run("inc $lit", &mut context);
        assert_eq!(context.state.get("lit"), Some(&json!(1)));
    }

    #[test]
    fn amounts_interpolate_state() {
        let mut context = ExecutionContext::default();
        context.state.set("bonus", json!(4));
        context.state.set("gold", json!("10"));
        run("inc $gold $bonus", &mut context);
        assert_eq!(context.state.get("gold"), Some(&json!(14)));
    }

    #[test]
    fn toggle_is_an_involution() {
        let mut context = ExecutionContext::default();
        context.state.set("flag", json!(false));
        run("toggle $flag", &mut context);
        assert_eq!(context.state.get("flag"), Some(&json!(true)));
        run("toggle $flag", &mut context);
        assert_eq!(context.state.get("flag"), Some(&json!(false)));
    }

    #[test]
    fn set_accepts_optional_equals_and_comments() {
        let mut context = ExecutionContext::default();
        context.state.set("name", json!("Ada"));
        run("# greeting\nset $greeting \"Hi $name\"\n// done\nSET $items = [1, 2]", &mut context);
        assert_eq!(context.state.get("greeting"), Some(&json!("Hi Ada")));
        assert_eq!(context.state.get("items"), Some(&json!([1, 2])));
    }

    #[test]
    fn unknown_statements_fail_the_block() {
        let mut context = ExecutionContext::default();
        let result = run("set $a = 1\nexplode $a", &mut context);
        assert_eq!(result.error(), Some("Set error: unrecognized statement 'explode $a'"));
        assert_eq!(context.state.get("a"), Some(&json!(1)));

        let result = run("inc $a lots", &mut context);
        assert!(result.error().is_some_and(|error| error.contains("not a number")));
    }
}
