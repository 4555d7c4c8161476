//! Tokenizer, recursive-descent parser, and evaluator for block expressions.
//!
//! The grammar covers what conditions and map coordinates need and nothing more:
//!
//! ```text
//! or         := and ( "||" and )*
//! and        := equality ( "&&" equality )*
//! equality   := comparison ( ( "==" | "!=" | "===" | "!==" ) comparison )*
//! comparison := additive ( ( "<" | "<=" | ">" | ">=" ) additive )*
//! additive   := term ( ( "+" | "-" ) term )*
//! term       := unary ( ( "*" | "/" | "%" ) unary )*
//! unary      := ( "!" | "-" | "+" ) unary | primary
//! primary    := number | string | true | false | null | undefined | $path | "(" or ")"
//! ```
//!
//! `$path` references resolve against [`RuntimeState`] while tokenizing, so state
//! values are never spliced back into expression text.

use std::fmt;

use serde_json::Value;
use thiserror::Error;

use crate::state::RuntimeState;
use folio_types::format_number;

/// Nesting limit for parenthesised and unary sub-expressions.
const MAX_DEPTH: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExpressionError {
    #[error("unexpected character '{character}' at offset {offset}")]
    UnexpectedCharacter { character: char, offset: usize },
    #[error("unterminated string literal starting at offset {offset}")]
    UnterminatedString { offset: usize },
    #[error("unknown identifier '{0}'")]
    UnknownIdentifier(String),
    #[error("unexpected token {found}")]
    UnexpectedToken { found: String },
    #[error("unexpected end of expression")]
    UnexpectedEnd,
    #[error("expression is empty")]
    Empty,
    #[error("expression nests deeper than {MAX_DEPTH} levels")]
    TooDeep,
}

/// Value produced while evaluating an expression.
#[derive(Debug, Clone, PartialEq)]
pub enum ExprValue {
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(String),
}

impl ExprValue {
    fn from_json(value: Option<&Value>) -> Self {
        match value {
            None => ExprValue::Undefined,
            Some(Value::Null) => ExprValue::Null,
            Some(Value::Bool(flag)) => ExprValue::Bool(*flag),
            Some(Value::Number(number)) => number.as_f64().map(ExprValue::Number).unwrap_or(ExprValue::Undefined),
            Some(Value::String(text)) => ExprValue::String(text.clone()),
            Some(other) => ExprValue::String(other.to_string()),
        }
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            ExprValue::Undefined | ExprValue::Null => false,
            ExprValue::Bool(flag) => *flag,
            ExprValue::Number(number) => *number != 0.0 && !number.is_nan(),
            ExprValue::String(text) => !text.is_empty(),
        }
    }

    pub fn to_number(&self) -> f64 {
        match self {
            ExprValue::Undefined => f64::NAN,
            ExprValue::Null => 0.0,
            ExprValue::Bool(flag) => f64::from(u8::from(*flag)),
            ExprValue::Number(number) => *number,
            ExprValue::String(text) => {
                let trimmed = text.trim();
                if trimmed.is_empty() { 0.0 } else { trimmed.parse().unwrap_or(f64::NAN) }
            }
        }
    }

    fn is_nullish(&self) -> bool {
        matches!(self, ExprValue::Undefined | ExprValue::Null)
    }
}

impl fmt::Display for ExprValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExprValue::Undefined => f.write_str("undefined"),
            ExprValue::Null => f.write_str("null"),
            ExprValue::Bool(flag) => write!(f, "{flag}"),
            ExprValue::Number(number) if number.is_nan() => f.write_str("NaN"),
            ExprValue::Number(number) => f.write_str(&format_number(*number)),
            ExprValue::String(text) => f.write_str(text),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Value(ExprValue),
    Operator(&'static str),
    OpenParen,
    CloseParen,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Value(value) => write!(f, "'{value}'"),
            Token::Operator(operator) => write!(f, "'{operator}'"),
            Token::OpenParen => f.write_str("'('"),
            Token::CloseParen => f.write_str("')'"),
        }
    }
}

/// Longest operators first so `===` wins over `==`.
const OPERATORS: [&str; 17] = [
    "===", "!==", "==", "!=", "<=", ">=", "&&", "||", "<", ">", "!", "+", "-", "*", "/", "%", "=",
];

fn tokenize(source: &str, state: &RuntimeState) -> Result<Vec<Token>, ExpressionError> {
    let mut tokens = Vec::new();
    let characters: Vec<(usize, char)> = source.char_indices().collect();
    let mut position = 0usize;

    while position < characters.len() {
        let (offset, character) = characters[position];
        if character.is_whitespace() {
            position += 1;
            continue;
        }
        match character {
            '(' => {
                tokens.push(Token::OpenParen);
                position += 1;
            }
            ')' => {
                tokens.push(Token::CloseParen);
                position += 1;
            }
            '"' | '\'' => {
                let (text, next) = read_string(&characters, position, character)?;
                tokens.push(Token::Value(ExprValue::String(text)));
                position = next;
            }
            '$' => {
                let start = position + 1;
                let mut end = start;
                while end < characters.len() && is_path_character(characters[end].1) {
                    end += 1;
                }
                let path: String = characters[start..end].iter().map(|(_, c)| *c).collect();
                let path = path.trim_end_matches('.');
                if path.is_empty() {
                    return Err(ExpressionError::UnexpectedCharacter { character, offset });
                }
                tokens.push(Token::Value(ExprValue::from_json(state.get_path(path))));
                position = end;
            }
            c if c.is_ascii_digit() || (c == '.' && characters.get(position + 1).is_some_and(|(_, n)| n.is_ascii_digit())) => {
                let mut end = position;
                while end < characters.len() && (characters[end].1.is_ascii_digit() || characters[end].1 == '.') {
                    end += 1;
                }
                let literal: String = characters[position..end].iter().map(|(_, c)| *c).collect();
                let number = literal
                    .parse::<f64>()
                    .map_err(|_| ExpressionError::UnexpectedCharacter { character: c, offset })?;
                tokens.push(Token::Value(ExprValue::Number(number)));
                position = end;
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let mut end = position;
                while end < characters.len() && (characters[end].1.is_ascii_alphanumeric() || characters[end].1 == '_') {
                    end += 1;
                }
                let word: String = characters[position..end].iter().map(|(_, c)| *c).collect();
                let value = match word.as_str() {
                    "true" => ExprValue::Bool(true),
                    "false" => ExprValue::Bool(false),
                    "null" => ExprValue::Null,
                    "undefined" => ExprValue::Undefined,
                    "NaN" => ExprValue::Number(f64::NAN),
                    _ => return Err(ExpressionError::UnknownIdentifier(word)),
                };
                tokens.push(Token::Value(value));
                position = end;
            }
            _ => {
                let rest = &source[offset..];
                let operator = OPERATORS
                    .iter()
                    .find(|operator| rest.starts_with(**operator))
                    .ok_or(ExpressionError::UnexpectedCharacter { character, offset })?;
                if *operator == "=" {
                    return Err(ExpressionError::UnexpectedCharacter { character, offset });
                }
                tokens.push(Token::Operator(operator));
                position += operator.len();
            }
        }
    }

    Ok(tokens)
}

fn is_path_character(character: char) -> bool {
    character.is_ascii_alphanumeric() || matches!(character, '_' | '.' | '[' | ']')
}

fn read_string(characters: &[(usize, char)], start: usize, quote: char) -> Result<(String, usize), ExpressionError> {
    let mut text = String::new();
    let mut position = start + 1;
    while position < characters.len() {
        let character = characters[position].1;
        if character == '\\' {
            if let Some((_, escaped)) = characters.get(position + 1) {
                text.push(match escaped {
                    'n' => '\n',
                    't' => '\t',
                    other => *other,
                });
                position += 2;
                continue;
            }
        } else if character == quote {
            return Ok((text, position + 1));
        }
        text.push(character);
        position += 1;
    }
    Err(ExpressionError::UnterminatedString {
        offset: characters[start].0,
    })
}

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Literal(ExprValue),
    Unary(&'static str, Box<Expr>),
    Binary(&'static str, Box<Expr>, Box<Expr>),
}

struct Parser {
    tokens: Vec<Token>,
    position: usize,
    depth: usize,
}

impl Parser {
    fn parse(tokens: Vec<Token>) -> Result<Expr, ExpressionError> {
        if tokens.is_empty() {
            return Err(ExpressionError::Empty);
        }
        let mut parser = Parser {
            tokens,
            position: 0,
            depth: 0,
        };
        let expression = parser.or()?;
        match parser.tokens.get(parser.position) {
            None => Ok(expression),
            Some(token) => Err(ExpressionError::UnexpectedToken { found: token.to_string() }),
        }
    }

    fn peek_operator(&self, candidates: &[&str]) -> Option<&'static str> {
        match self.tokens.get(self.position) {
            Some(Token::Operator(operator)) if candidates.contains(operator) => Some(operator),
            _ => None,
        }
    }

    fn binary_level(
        &mut self,
        operators: &[&str],
        next: fn(&mut Parser) -> Result<Expr, ExpressionError>,
    ) -> Result<Expr, ExpressionError> {
        let mut left = next(self)?;
        while let Some(operator) = self.peek_operator(operators) {
            self.position += 1;
            let right = next(self)?;
            left = Expr::Binary(operator, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn or(&mut self) -> Result<Expr, ExpressionError> {
        self.binary_level(&["||"], Parser::and)
    }

    fn and(&mut self) -> Result<Expr, ExpressionError> {
        self.binary_level(&["&&"], Parser::equality)
    }

    fn equality(&mut self) -> Result<Expr, ExpressionError> {
        self.binary_level(&["==", "!=", "===", "!=="], Parser::comparison)
    }

    fn comparison(&mut self) -> Result<Expr, ExpressionError> {
        self.binary_level(&["<", "<=", ">", ">="], Parser::additive)
    }

    fn additive(&mut self) -> Result<Expr, ExpressionError> {
        self.binary_level(&["+", "-"], Parser::term)
    }

    fn term(&mut self) -> Result<Expr, ExpressionError> {
        self.binary_level(&["*", "/", "%"], Parser::unary)
    }

    fn unary(&mut self) -> Result<Expr, ExpressionError> {
        if let Some(operator) = self.peek_operator(&["!", "-", "+"]) {
            self.position += 1;
            let operand = self.nested(Parser::unary)?;
            return Ok(Expr::Unary(operator, Box::new(operand)));
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<Expr, ExpressionError> {
        let token = self.tokens.get(self.position).cloned().ok_or(ExpressionError::UnexpectedEnd)?;
        self.position += 1;
        match token {
            Token::Value(value) => Ok(Expr::Literal(value)),
            Token::OpenParen => {
                let inner = self.nested(Parser::or)?;
                match self.tokens.get(self.position) {
                    Some(Token::CloseParen) => {
                        self.position += 1;
                        Ok(inner)
                    }
                    Some(other) => Err(ExpressionError::UnexpectedToken { found: other.to_string() }),
                    None => Err(ExpressionError::UnexpectedEnd),
                }
            }
            other => Err(ExpressionError::UnexpectedToken { found: other.to_string() }),
        }
    }

    fn nested(&mut self, rule: fn(&mut Parser) -> Result<Expr, ExpressionError>) -> Result<Expr, ExpressionError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(ExpressionError::TooDeep);
        }
        let result = rule(self);
        self.depth -= 1;
        result
    }
}

fn evaluate(expression: &Expr) -> ExprValue {
    match expression {
        Expr::Literal(value) => value.clone(),
        Expr::Unary(operator, operand) => {
            let value = evaluate(operand);
            match *operator {
                "!" => ExprValue::Bool(!value.is_truthy()),
                "-" => ExprValue::Number(-value.to_number()),
                _ => ExprValue::Number(value.to_number()),
            }
        }
        Expr::Binary("||", left, right) => {
            let left = evaluate(left);
            if left.is_truthy() { left } else { evaluate(right) }
        }
        Expr::Binary("&&", left, right) => {
            let left = evaluate(left);
            if left.is_truthy() { evaluate(right) } else { left }
        }
        Expr::Binary(operator, left, right) => apply_binary(operator, evaluate(left), evaluate(right)),
    }
}

fn apply_binary(operator: &str, left: ExprValue, right: ExprValue) -> ExprValue {
    match operator {
        "==" => ExprValue::Bool(loose_equals(&left, &right)),
        "!=" => ExprValue::Bool(!loose_equals(&left, &right)),
        "===" => ExprValue::Bool(strict_equals(&left, &right)),
        "!==" => ExprValue::Bool(!strict_equals(&left, &right)),
        "<" | "<=" | ">" | ">=" => ExprValue::Bool(compare(operator, &left, &right)),
        "+" => match (&left, &right) {
            (ExprValue::String(_), _) | (_, ExprValue::String(_)) => ExprValue::String(format!("{left}{right}")),
            _ => ExprValue::Number(left.to_number() + right.to_number()),
        },
        "-" => ExprValue::Number(left.to_number() - right.to_number()),
        "*" => ExprValue::Number(left.to_number() * right.to_number()),
        "/" => ExprValue::Number(left.to_number() / right.to_number()),
        "%" => ExprValue::Number(left.to_number() % right.to_number()),
        _ => ExprValue::Undefined,
    }
}

fn strict_equals(left: &ExprValue, right: &ExprValue) -> bool {
    match (left, right) {
        (ExprValue::Number(a), ExprValue::Number(b)) => a == b,
        _ => left == right,
    }
}

fn loose_equals(left: &ExprValue, right: &ExprValue) -> bool {
    match (left, right) {
        (a, b) if a.is_nullish() || b.is_nullish() => a.is_nullish() && b.is_nullish(),
        (ExprValue::Bool(_), _) | (_, ExprValue::Bool(_)) => left.to_number() == right.to_number(),
        (ExprValue::Number(_), ExprValue::String(_)) | (ExprValue::String(_), ExprValue::Number(_)) => {
            left.to_number() == right.to_number()
        }
        _ => strict_equals(left, right),
    }
}

fn compare(operator: &str, left: &ExprValue, right: &ExprValue) -> bool {
    if let (ExprValue::String(a), ExprValue::String(b)) = (left, right) {
        return match operator {
            "<" => a < b,
            "<=" => a <= b,
            ">" => a > b,
            _ => a >= b,
        };
    }
    let (a, b) = (left.to_number(), right.to_number());
    match operator {
        "<" => a < b,
        "<=" => a <= b,
        ">" => a > b,
        _ => a >= b,
    }
}

/// Parses and evaluates `source` against `state`.
pub fn evaluate_expression(source: &str, state: &RuntimeState) -> Result<ExprValue, ExpressionError> {
    let tokens = tokenize(source, state)?;
    let expression = Parser::parse(tokens)?;
    Ok(evaluate(&expression))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn eval(source: &str) -> ExprValue {
        let mut state = RuntimeState::new();
        state.set("a", json!(1));
        state.set("name", json!("Ada"));
        state.set("count", json!("3"));
        state.set("player", json!({"hp": 7, "alive": true}));
        evaluate_expression(source, &state).expect("expression should evaluate")
    }

    #[test]
    fn precedence_and_grouping() {
        assert_eq!(eval("1 + 2 * 3"), ExprValue::Number(7.0));
        assert_eq!(eval("(1 + 2) * 3"), ExprValue::Number(9.0));
        assert_eq!(eval("-$a + 10 % 4"), ExprValue::Number(1.0));
        assert_eq!(eval("!true || false && true"), ExprValue::Bool(false));
    }

    #[test]
    fn loose_and_strict_equality() {
        assert_eq!(eval("$a == 1"), ExprValue::Bool(true));
        assert_eq!(eval("$count == 3"), ExprValue::Bool(true));
        assert_eq!(eval("$count === 3"), ExprValue::Bool(false));
        assert_eq!(eval("$missing == null"), ExprValue::Bool(true));
        assert_eq!(eval("$missing === undefined"), ExprValue::Bool(true));
        assert_eq!(eval("$player.alive == 1"), ExprValue::Bool(true));
        assert_eq!(eval("$name != 'Bob'"), ExprValue::Bool(true));
    }

    #[test]
    fn comparisons_and_concatenation() {
        assert_eq!(eval("$player.hp >= 7"), ExprValue::Bool(true));
        assert_eq!(eval("$player.hp < $count"), ExprValue::Bool(false));
        assert_eq!(eval("'abc' < 'abd'"), ExprValue::Bool(true));
        assert_eq!(eval("$missing > 0"), ExprValue::Bool(false));
        assert_eq!(eval("$name + ' ' + $a"), ExprValue::String("Ada 1".into()));
    }

    #[test]
    fn logical_operators_short_circuit_to_operands() {
        assert_eq!(eval("$missing || 'fallback'"), ExprValue::String("fallback".into()));
        assert_eq!(eval("0 && $name"), ExprValue::Number(0.0));
    }

    #[test]
    fn rejects_malformed_input() {
        let state = RuntimeState::new();
        assert!(matches!(evaluate_expression("", &state), Err(ExpressionError::Empty)));
        assert!(matches!(evaluate_expression("1 +", &state), Err(ExpressionError::UnexpectedEnd)));
        assert!(matches!(evaluate_expression("a = 1", &state), Err(ExpressionError::UnknownIdentifier(_))));
        assert!(matches!(evaluate_expression("'open", &state), Err(ExpressionError::UnterminatedString { .. })));
        assert!(matches!(evaluate_expression("1 2", &state), Err(ExpressionError::UnexpectedToken { .. })));
        assert!(matches!(evaluate_expression("$x = 1", &state), Err(ExpressionError::UnexpectedCharacter { .. })));
        let deep = format!("{}1{}", "(".repeat(100), ")".repeat(100));
        assert!(matches!(evaluate_expression(&deep, &state), Err(ExpressionError::TooDeep)));
    }
}
