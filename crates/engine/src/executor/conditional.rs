//! `if` / `else` chaining through the context's scratch flag.
//!
//! Pairing depends on document order, not nesting: an `else` reads the flag the
//! immediately preceding `if` stored, then clears it.

use anyhow::Result;
use folio_types::{ExecutorResult, RuntimeBlock};
use tracing::debug;

use super::BlockExecutor;
use crate::{condition::evaluate_condition, context::ExecutionContext, resolve::interpolate};

#[derive(Debug, Default)]
pub struct IfExecutor;

impl BlockExecutor for IfExecutor {
    fn name(&self) -> &'static str {
        "If"
    }

    /// The first line is the condition. Any remaining lines form a body that is
    /// interpolated into the output when the condition holds.
    fn run(&self, block: &RuntimeBlock, context: &mut ExecutionContext) -> Result<ExecutorResult> {
        let content = block.content.trim();
        let (condition, body) = match content.split_once('\n') {
            Some((condition, body)) => (condition.trim(), Some(body)),
            None => (content, None),
        };
        let outcome = evaluate_condition(condition, &context.state);
        debug!(condition = %condition, outcome, "if evaluated");
        context.set_condition_flag(outcome);

        if !outcome {
            return Ok(ExecutorResult::skipped());
        }
        let result = ExecutorResult::completed();
        Ok(match body.map(str::trim).filter(|body| !body.is_empty()) {
            Some(body) => result.with_output(interpolate(body, &context.state)),
            None => result,
        })
    }
}

#[derive(Debug, Default)]
pub struct ElseExecutor;

impl BlockExecutor for ElseExecutor {
    fn name(&self) -> &'static str {
        "Else"
    }

    fn run(&self, block: &RuntimeBlock, context: &mut ExecutionContext) -> Result<ExecutorResult> {
        if context.take_condition_flag() == Some(true) {
            return Ok(ExecutorResult::skipped());
        }
        let body = block.content.trim();
        let result = ExecutorResult::completed();
        Ok(if body.is_empty() {
            result
        } else {
            result.with_output(interpolate(body, &context.state))
        })
    }
}
