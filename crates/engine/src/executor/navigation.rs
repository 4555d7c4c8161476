//! `nav` blocks list the choices a reader can take next.
//!
//! ```text
//! choice: Enter the cave
//!   when: $torch == true
//!   target: cave
//! choice: Go home
//!   target: #home
//! ```

use anyhow::Result;
use folio_types::{BlockPayload, ExecutorResult, NavChoice, RuntimeBlock};

use super::{
    BlockExecutor,
    render::render_box,
    syntax::{is_ignorable, key_value},
};
use crate::{condition::evaluate_condition, context::ExecutionContext, resolve::interpolate, state::RuntimeState};

/// Removes enclosing quotes when the quote character does not also appear inside.
fn unquote(value: &str) -> &str {
    for quote in ['"', '\''] {
        if let Some(inner) = value.strip_prefix(quote).and_then(|rest| rest.strip_suffix(quote))
            && !inner.contains(quote)
        {
            return inner;
        }
    }
    value
}

fn parse_choices(content: &str, state: &RuntimeState) -> Vec<NavChoice> {
    let mut choices: Vec<NavChoice> = Vec::new();
    for line in content.lines().filter(|line| !is_ignorable(line)) {
        let trimmed = line.trim().trim_start_matches("- ");
        let Some((key, value)) = key_value(trimmed, ':') else {
            continue;
        };
        match (key.as_str(), choices.last_mut()) {
            ("choice", _) => choices.push(NavChoice {
                text: interpolate(unquote(value), state),
                target: None,
                condition: None,
                available: true,
                number: None,
            }),
            ("when", Some(choice)) => choice.condition = Some(unquote(value).to_string()),
            ("target", Some(choice)) => {
                let target = unquote(value).trim_start_matches('#').trim();
                choice.target = (!target.is_empty()).then(|| target.to_string());
            }
            _ => {}
        }
    }

    let mut number = 0;
    for choice in &mut choices {
        choice.available = choice
            .condition
            .as_deref()
            .is_none_or(|condition| evaluate_condition(condition, state));
        if choice.available {
            number += 1;
            choice.number = Some(number);
        }
    }
    choices
}

fn render_choices(choices: &[NavChoice]) -> String {
    let lines: Vec<String> = choices
        .iter()
        .map(|choice| match choice.number {
            Some(number) => format!("[{number}] {}", choice.text),
            None => format!("{} (unavailable)", choice.text),
        })
        .collect();
    render_box(None, &lines)
}

#[derive(Debug, Default)]
pub struct NavigationExecutor;

impl BlockExecutor for NavigationExecutor {
    fn name(&self) -> &'static str {
        "Nav"
    }

    fn run(&self, block: &RuntimeBlock, context: &mut ExecutionContext) -> Result<ExecutorResult> {
        let choices = parse_choices(&block.content, &context.state);
        let mut available = choices.iter().filter(|choice| choice.available);
        let next_section = match (available.next(), available.next()) {
            (Some(only), None) => only.target.clone(),
            _ => None,
        };
        Ok(ExecutorResult::completed()
            .with_output(render_choices(&choices))
            .with_next_section(next_section)
            .with_payload(BlockPayload::Navigation { choices }))
    }
}
