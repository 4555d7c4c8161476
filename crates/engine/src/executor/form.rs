//! `form` blocks declare the fields a surrounding UI should collect.
//!
//! Three layouts are accepted and told apart by shape:
//!
//! - indented: `name: Label` lines, each followed by indented properties
//! - records: flat `key: value` records separated by blank lines
//! - flat: a single record
//!
//! Records name their state path with `var` (or `name`/`field`).

use anyhow::Result;
use folio_types::{BlockPayload, ExecutorResult, FormField, RuntimeBlock};
use serde_json::Value;
use tracing::debug;

use super::{
    BlockExecutor,
    render::render_box,
    syntax::{indentation, is_ignorable, key_value},
};
use crate::{
    context::ExecutionContext,
    resolve::{interpolate, parse_literal, resolve_literal, strip_matching_quotes},
    state::RuntimeState,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FormLayout {
    Indented,
    Records,
    Flat,
}

fn detect_layout(content: &str) -> FormLayout {
    let body = content.trim_matches('\n');
    if body.lines().any(|line| !line.trim().is_empty() && indentation(line) > 0) {
        FormLayout::Indented
    } else if body.lines().any(|line| line.trim().is_empty()) {
        FormLayout::Records
    } else {
        FormLayout::Flat
    }
}

fn parse_bool(value: &str) -> bool {
    matches!(value.trim().to_ascii_lowercase().as_str(), "true" | "yes" | "1" | "required")
}

fn parse_options(value: &str, state: &RuntimeState) -> Vec<String> {
    let text = interpolate(value, state);
    match parse_literal(&text) {
        Value::Array(items) => items
            .iter()
            .map(|item| match item {
                Value::String(text) => text.clone(),
                other => other.to_string(),
            })
            .collect(),
        _ => text
            .trim()
            .trim_start_matches('[')
            .trim_end_matches(']')
            .split(',')
            .map(|option| strip_matching_quotes(option.trim()).to_string())
            .filter(|option| !option.is_empty())
            .collect(),
    }
}

fn normalize_var(value: &str) -> String {
    strip_matching_quotes(value.trim()).trim_start_matches('$').to_string()
}

/// Applies one property line to a field. Returns `false` for unknown keys.
fn apply_property(field: &mut FormField, key: &str, value: &str, state: &RuntimeState) -> bool {
    match key {
        "label" => field.label = interpolate(strip_matching_quotes(value), state),
        "type" => field.field_type = strip_matching_quotes(value).to_ascii_lowercase(),
        "required" => field.required = parse_bool(value),
        "placeholder" => field.placeholder = Some(interpolate(strip_matching_quotes(value), state)),
        "default" => field.default = Some(resolve_literal(value, state)),
        "pattern" => field.pattern = Some(strip_matching_quotes(value).to_string()),
        "options" => field.options = parse_options(value, state),
        _ => return false,
    }
    true
}

fn parse_indented(content: &str, state: &RuntimeState) -> Vec<FormField> {
    let mut fields: Vec<FormField> = Vec::new();
    for line in content.lines().filter(|line| !is_ignorable(line)) {
        let Some((key, value)) = key_value(line.trim(), ':') else {
            continue;
        };
        if indentation(line) == 0 {
            let mut field = FormField::new(normalize_var(line.trim().split_once(':').map_or("", |(var, _)| var)));
            if !value.is_empty() {
                field.label = interpolate(strip_matching_quotes(value), state);
            }
            fields.push(field);
        } else if let Some(field) = fields.last_mut()
            && !apply_property(field, &key, value, state)
        {
            debug!(key = %key, var = %field.var, "ignoring unknown form property");
        }
    }
    fields
}

fn parse_record(lines: &[&str], state: &RuntimeState) -> Option<FormField> {
    let mut var = None;
    let mut properties = Vec::new();
    for line in lines.iter().filter(|line| !is_ignorable(line)) {
        let Some((key, value)) = key_value(line.trim(), ':') else {
            continue;
        };
        match key.as_str() {
            "var" | "name" | "field" => var = Some(normalize_var(value)),
            _ => properties.push((key, value)),
        }
    }
    let mut field = FormField::new(var.filter(|var| !var.is_empty())?);
    for (key, value) in properties {
        if !apply_property(&mut field, &key, value, state) {
            debug!(key = %key, var = %field.var, "ignoring unknown form property");
        }
    }
    Some(field)
}

fn records(content: &str) -> Vec<Vec<&str>> {
    let mut chunks = vec![Vec::new()];
    for line in content.lines() {
        if line.trim().is_empty() {
            chunks.push(Vec::new());
        } else if let Some(chunk) = chunks.last_mut() {
            chunk.push(line);
        }
    }
    chunks.retain(|chunk| !chunk.is_empty());
    chunks
}

fn parse_fields(content: &str, state: &RuntimeState) -> Vec<FormField> {
    match detect_layout(content) {
        FormLayout::Indented => parse_indented(content, state),
        FormLayout::Records => records(content)
            .iter()
            .filter_map(|lines| parse_record(lines, state))
            .collect(),
        FormLayout::Flat => parse_record(&content.lines().collect::<Vec<_>>(), state).into_iter().collect(),
    }
}

fn render_fields(fields: &[FormField]) -> String {
    let lines: Vec<String> = fields
        .iter()
        .map(|field| {
            let marker = if field.required { " *" } else { "" };
            let mut line = format!("{}{marker}: [{}]", field.label, field.field_type);
            if !field.options.is_empty() {
                line.push_str(&format!(" {}", field.options.join(" | ")));
            }
            line
        })
        .collect();
    render_box(Some("Form"), &lines)
}

#[derive(Debug, Default)]
pub struct FormExecutor;

impl BlockExecutor for FormExecutor {
    fn name(&self) -> &'static str {
        "Form"
    }

    fn run(&self, block: &RuntimeBlock, context: &mut ExecutionContext) -> Result<ExecutorResult> {
        let fields = parse_fields(&block.content, &context.state);
        Ok(ExecutorResult::completed()
            .with_output(render_fields(&fields))
            .with_payload(BlockPayload::Form { fields }))
    }
}
