//! `state` blocks declare default values: `$path = value`, first write wins.

use anyhow::Result;
use folio_types::{ExecutorResult, RuntimeBlock};
use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use super::BlockExecutor;
use crate::{context::ExecutionContext, resolve::resolve_literal};

static ASSIGNMENT_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*\$([A-Za-z_][A-Za-z0-9_]*(?:\.[A-Za-z0-9_]+|\[\d+\])*)\s*=(.*)$").expect("assignment regex should compile")
});

/// Splits content into `(path, raw value)` pairs. Values continue over following
/// lines until the next assignment.
fn parse_assignments(content: &str) -> Vec<(String, String)> {
    let mut assignments: Vec<(String, String)> = Vec::new();
    for line in content.lines() {
        if let Some(captures) = ASSIGNMENT_PATTERN.captures(line) {
            assignments.push((captures[1].to_string(), captures[2].trim().to_string()));
        } else if let Some((_, value)) = assignments.last_mut() {
            value.push('\n');
            value.push_str(line);
        }
    }
    assignments
}

#[derive(Debug, Default)]
pub struct StateExecutor;

impl BlockExecutor for StateExecutor {
    fn name(&self) -> &'static str {
        "State"
    }

    fn run(&self, block: &RuntimeBlock, context: &mut ExecutionContext) -> Result<ExecutorResult> {
        let mut changes = IndexMap::new();
        for (path, raw) in parse_assignments(&block.content) {
            if context.state.has_path(&path) {
                debug!(path = %path, "state default already present; keeping existing value");
                continue;
            }
            let value = resolve_literal(raw.trim(), &context.state);
            context.state.set_path(&path, value.clone());
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
        StateExecutor.execute(&RuntimeBlock::new("state", content), context)
    }

    #[test]
    fn defaults_are_idempotent() {
        let mut context = ExecutionContext::default();
        let first = run("$hp = 10\n$name = \"Ada\"", &mut context);
        assert_eq!(first.state_changes.len(), 2);
        context.state.set("hp", json!(3));

        let second = run("$hp = 10\n$name = \"Ada\"", &mut context);
        assert!(second.success());
        assert!(second.state_changes.is_empty());
        assert_eq!(context.state.get("hp"), Some(&json!(3)));
    }

    #[test]
    fn values_span_lines_until_next_assignment() {
        let mut context = ExecutionContext::default();
        run("$player = {\n  name: \"Ada\",\n  hp: 10\n}\n$gold = $player.hp", &mut context);
        assert_eq!(context.state.get("player"), Some(&json!({"name": "Ada", "hp": 10})));
        assert_eq!(context.state.get("gold"), Some(&json!(10)));
    }

    #[test]
    fn nested_paths_create_maps() {
        let mut context = ExecutionContext::default();
        let result = run("$player.inventory.gold = 5", &mut context);
        assert_eq!(result.state_changes.get("player.inventory.gold"), Some(&json!(5)));
        assert_eq!(context.state.get_path("player.inventory.gold"), Some(&json!(5)));
    }
}
