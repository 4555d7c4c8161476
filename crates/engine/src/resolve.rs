//! # Literal parsing and `$variable` interpolation
//!
//! Every executor resolves user-authored values through this module:
//!
//! - [`parse_literal`] turns authored text into a JSON value (scalars, JSON
//!   structures, or a plain string).
//! - [`interpolate`] replaces `$path` references with values from state, leaving
//!   unresolved references untouched.
//! - [`resolve_literal`] combines the two and is the canonical way to evaluate the
//!   right-hand side of `set` and `state` assignments.
//!
//! ```rust
//! use folio_engine::{RuntimeState, resolve::{interpolate, resolve_literal}};
//! use serde_json::json;
//!
//! let mut state = RuntimeState::new();
//! state.set("hp", json!(6));
//!
//! assert_eq!(interpolate("HP left: $hp", &state), "HP left: 6");
//! assert_eq!(interpolate("Hello $missing", &state), "Hello $missing");
//! assert_eq!(resolve_literal("$hp", &state), json!(6));
//! ```

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde_json::Value;

use crate::state::RuntimeState;
use folio_types::format_number;

/// `$identifier` followed by any number of `.identifier` or `[index]` accessors.
static REFERENCE_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\$([A-Za-z_][A-Za-z0-9_]*(?:\.[A-Za-z_][A-Za-z0-9_]*|\[\d+\])*)").expect("reference regex should compile")
});

static NUMBER_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"^-?\d+(\.\d+)?$").expect("number regex should compile"));

/// Bare object keys (`{hp: 1}`) that need quoting before strict JSON parsing.
static UNQUOTED_KEY_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"([{,]\s*)([A-Za-z_][A-Za-z0-9_]*)\s*:"#).expect("unquoted key regex should compile"));

/// Parses authored text into a JSON value.
///
/// Empty text is the empty string; `true`/`false`/`null` and decimal numbers map to
/// their JSON scalars; text wrapped in `"`, `[`, or `{` is tried as JSON (first
/// strictly, then with bare keys quoted). Anything else is returned as a string with
/// one layer of matching quotes removed.
pub fn parse_literal(text: &str) -> Value {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Value::String(String::new());
    }
    match trimmed {
        "true" => return Value::Bool(true),
        "false" => return Value::Bool(false),
        "null" => return Value::Null,
        _ => {}
    }
    if NUMBER_PATTERN.is_match(trimmed) {
        if let Ok(integer) = trimmed.parse::<i64>() {
            return Value::from(integer);
        }
        if let Some(number) = trimmed.parse::<f64>().ok().and_then(serde_json::Number::from_f64) {
            return Value::Number(number);
        }
    }
    if looks_like_json(trimmed) {
        if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
            return value;
        }
        let normalized = UNQUOTED_KEY_PATTERN.replace_all(trimmed, r#"$1"$2":"#);
        if let Ok(value) = serde_json::from_str::<Value>(&normalized) {
            return value;
        }
    }
    Value::String(strip_matching_quotes(trimmed).to_string())
}

fn looks_like_json(text: &str) -> bool {
    (text.starts_with('"') && text.ends_with('"'))
        || (text.starts_with('[') && text.ends_with(']'))
        || (text.starts_with('{') && text.ends_with('}'))
}

/// Removes a single layer of matching `"` or `'` quotes.
pub fn strip_matching_quotes(text: &str) -> &str {
    let bytes = text.as_bytes();
    if bytes.len() >= 2 {
        let first = bytes[0];
        let last = bytes[bytes.len() - 1];
        if first == last && (first == b'"' || first == b'\'') {
            return &text[1..text.len() - 1];
        }
    }
    text
}

/// Replaces every `$path` reference with its stringified value from state.
///
/// References that do not resolve are left exactly as written.
pub fn interpolate(text: &str, state: &RuntimeState) -> String {
    if !text.contains('$') {
        return text.to_string();
    }
    REFERENCE_PATTERN
        .replace_all(text, |captures: &Captures| match state.get_path(&captures[1]) {
            Some(value) => format_value(value),
            None => captures[0].to_string(),
        })
        .into_owned()
}

/// Canonical "resolve a user-authored value" operation.
pub fn resolve_literal(text: &str, state: &RuntimeState) -> Value {
    parse_literal(&interpolate(text, state))
}

/// Parses a parameter list: a JSON array, or a comma separated list of literals.
pub fn parse_params(text: &str, state: &RuntimeState) -> Vec<Value> {
    let interpolated = interpolate(text, state);
    let trimmed = interpolated.trim();
    if trimmed.is_empty() {
        return Vec::new();
    }
    if let Ok(Value::Array(values)) = serde_json::from_str::<Value>(trimmed) {
        return values;
    }
    let inner = trimmed
        .strip_prefix('[')
        .and_then(|rest| rest.strip_suffix(']'))
        .unwrap_or(trimmed);
    inner
        .split(',')
        .map(str::trim)
        .filter(|segment| !segment.is_empty())
        .map(parse_literal)
        .collect()
}

/// Renders a value the way interpolation writes it into text.
pub fn format_value(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Number(number) => number.as_f64().map(format_number).unwrap_or_else(|| number.to_string()),
        Value::Bool(flag) => flag.to_string(),
        Value::Null => "null".to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn state_with(entries: Value) -> RuntimeState {
        match entries {
            Value::Object(map) => RuntimeState::from_snapshot(map),
            _ => RuntimeState::new(),
        }
    }

    #[test]
    fn parse_literal_scalars() {
        assert_eq!(parse_literal("  "), json!(""));
        assert_eq!(parse_literal("true"), json!(true));
        assert_eq!(parse_literal("false"), json!(false));
        assert_eq!(parse_literal("null"), json!(null));
        assert_eq!(parse_literal("42"), json!(42));
        assert_eq!(parse_literal("-3.5"), json!(-3.5));
        assert_eq!(parse_literal("1e3"), json!("1e3"));
    }

    #[test]
    fn parse_literal_json_and_loose_objects() {
        assert_eq!(parse_literal(r#"["a", 1]"#), json!(["a", 1]));
        assert_eq!(parse_literal(r#"{"hp": 10}"#), json!({"hp": 10}));
        assert_eq!(parse_literal("{hp: 10, name: \"Ada\"}"), json!({"hp": 10, "name": "Ada"}));
        assert_eq!(parse_literal(r#""quoted""#), json!("quoted"));
    }

    #[test]
    fn parse_literal_strips_one_layer_of_quotes() {
        assert_eq!(parse_literal("'single'"), json!("single"));
        assert_eq!(parse_literal("plain text"), json!("plain text"));
        assert_eq!(parse_literal("{not json"), json!("{not json"));
        assert_eq!(parse_literal("'it''s'"), json!("it''s"));
    }

    #[test]
    fn interpolate_preserves_unknown_references() {
        let state = RuntimeState::new();
        assert_eq!(interpolate("Hello $missing", &state), "Hello $missing");
    }

    #[test]
    fn interpolate_nested_paths_and_indices() {
        let state = state_with(json!({
            "player": {"name": "Ada", "inventory": {"gold": 12}},
            "items": ["sword", "shield"],
            "alive": true,
            "nothing": null
        }));
        assert_eq!(
            interpolate("$player.name has $player.inventory.gold gold.", &state),
            "Ada has 12 gold."
        );
        assert_eq!(interpolate("First: $items[1]", &state), "First: shield");
        assert_eq!(interpolate("$alive/$nothing", &state), "true/null");
        assert_eq!(interpolate("$player.inventory", &state), r#"{"gold":12}"#);
    }

    #[test]
    fn resolve_literal_parses_interpolated_text() {
        let state = state_with(json!({"base": 4}));
        assert_eq!(resolve_literal("$base", &state), json!(4));
        assert_eq!(resolve_literal("[$base, 2]", &state), json!([4, 2]));
        assert_eq!(resolve_literal("\"$base\"", &state), json!("4"));
    }

    #[test]
    fn parse_params_json_and_comma_forms() {
        let state = state_with(json!({"id": 7}));
        assert_eq!(parse_params(r#"[1, "two"]"#, &state), vec![json!(1), json!("two")]);
        assert_eq!(parse_params("$id, 'x', true", &state), vec![json!(7), json!("x"), json!(true)]);
        assert_eq!(parse_params("['a', 'b']", &state), vec![json!("a"), json!("b")]);
        assert!(parse_params("   ", &state).is_empty());
    }
}
