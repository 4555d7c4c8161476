//! Boolean conditions and numeric expressions evaluated against session state.
//!
//! Both entry points are total: malformed input never panics and never reaches a
//! general-purpose evaluator. Conditions fall back to `false`, numbers to `None`.

use tracing::debug;

use crate::{expression::evaluate_expression, state::RuntimeState};

/// Evaluates `expression` for truthiness. Any lex, parse, or evaluation failure is `false`.
pub fn evaluate_condition(expression: &str, state: &RuntimeState) -> bool {
    let trimmed = expression.trim();
    if trimmed.is_empty() {
        return false;
    }
    match evaluate_expression(trimmed, state) {
        Ok(value) => value.is_truthy(),
        Err(error) => {
            debug!(expression = %trimmed, error = %error, "condition did not evaluate; treating as false");
            false
        }
    }
}

/// Evaluates an arithmetic expression, returning `None` unless the result is a finite number.
pub fn evaluate_number(expression: &str, state: &RuntimeState) -> Option<f64> {
    let value = evaluate_expression(expression.trim(), state).ok()?.to_number();
    value.is_finite().then_some(value)
}
