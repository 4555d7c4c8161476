//! Scalar runtime values shared by the resolver, executors, and SQL bindings.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Largest integer magnitude that survives an `f64` round-trip without loss.
const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_991.0;

/// Normalized scalar produced by blocks.
///
/// State itself is stored as JSON so nested maps and row sets fit, but every value
/// a block authors or reads as a scalar passes through this type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RuntimeValue {
    Null,
    Bool(bool),
    Number(f64),
    String(String),
}

impl RuntimeValue {
    /// Converts a JSON value into a scalar. Arrays and objects become their compact JSON text.
    pub fn from_json(value: &JsonValue) -> Self {
        match value {
            JsonValue::Null => RuntimeValue::Null,
            JsonValue::Bool(flag) => RuntimeValue::Bool(*flag),
            JsonValue::Number(number) => number.as_f64().map(RuntimeValue::Number).unwrap_or(RuntimeValue::Null),
            JsonValue::String(text) => RuntimeValue::String(text.clone()),
            other => RuntimeValue::String(other.to_string()),
        }
    }

    /// Converts the scalar into JSON, keeping integral numbers integral.
    pub fn to_json(&self) -> JsonValue {
        match self {
            RuntimeValue::Null => JsonValue::Null,
            RuntimeValue::Bool(flag) => JsonValue::Bool(*flag),
            RuntimeValue::Number(number) => number_to_json(*number),
            RuntimeValue::String(text) => JsonValue::String(text.clone()),
        }
    }

    /// Truthiness used by `toggle`, conditions, and the script bridge.
    pub fn is_truthy(&self) -> bool {
        match self {
            RuntimeValue::Null => false,
            RuntimeValue::Bool(flag) => *flag,
            RuntimeValue::Number(number) => *number != 0.0 && !number.is_nan(),
            RuntimeValue::String(text) => !text.is_empty(),
        }
    }

    /// Numeric view of the value when it has one.
    ///
    /// Numeric strings are parsed after trimming; booleans and null have none.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            RuntimeValue::Number(number) => Some(*number),
            RuntimeValue::String(text) => text.trim().parse::<f64>().ok(),
            RuntimeValue::Bool(_) | RuntimeValue::Null => None,
        }
    }
}

impl fmt::Display for RuntimeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuntimeValue::Null => write!(f, "null"),
            RuntimeValue::Bool(flag) => write!(f, "{flag}"),
            RuntimeValue::Number(number) => write!(f, "{}", format_number(*number)),
            RuntimeValue::String(text) => write!(f, "{text}"),
        }
    }
}

/// Builds a JSON number, preferring an integer representation for integral values.
pub fn number_to_json(number: f64) -> JsonValue {
    if number.fract() == 0.0 && number.abs() <= MAX_SAFE_INTEGER {
        JsonValue::from(number as i64)
    } else {
        serde_json::Number::from_f64(number).map(JsonValue::Number).unwrap_or(JsonValue::Null)
    }
}

/// Formats a number the way interpolation renders it (`6`, not `6.0`).
pub fn format_number(number: f64) -> String {
    if number.fract() == 0.0 && number.abs() <= MAX_SAFE_INTEGER {
        format!("{}", number as i64)
    } else {
        format!("{number}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn integral_numbers_stay_integral() {
        assert_eq!(RuntimeValue::Number(6.0).to_json(), json!(6));
        assert_eq!(RuntimeValue::Number(2.5).to_json(), json!(2.5));
        assert_eq!(RuntimeValue::Number(6.0).to_string(), "6");
    }

    #[test]
    fn structures_collapse_to_json_text() {
        let value = RuntimeValue::from_json(&json!({"gold": 3}));
        assert_eq!(value, RuntimeValue::String(r#"{"gold":3}"#.into()));
    }

    #[test]
    fn truthiness_and_numeric_views() {
        assert!(!RuntimeValue::String(String::new()).is_truthy());
        assert!(RuntimeValue::String("no".into()).is_truthy());
        assert!(!RuntimeValue::Number(0.0).is_truthy());
        assert_eq!(RuntimeValue::String(" 4 ".into()).as_number(), Some(4.0));
        assert_eq!(RuntimeValue::Bool(true).as_number(), None);
        assert_eq!(RuntimeValue::Null.as_number(), None);
    }
}
