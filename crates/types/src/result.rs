//! Uniform result contract returned by every block executor.
//!
//! The base (`outcome`, `output`, `state_changes`, `next_section`, `logs`) is shared by
//! all block kinds; kind-specific data lives in the tagged [`BlockPayload`].

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// How a block execution ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BlockOutcome {
    /// The block ran and its effects were applied.
    Completed,
    /// The block chose not to run; it produced no state mutation.
    Skipped,
    /// The block failed; `error` describes why.
    Failed { error: String },
}

/// A navigation choice parsed from a `nav` block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NavChoice {
    /// Text shown to the reader.
    pub text: String,
    /// Section identifier to jump to when chosen.
    #[serde(default)]
    pub target: Option<String>,
    /// Raw `when:` condition, if one was authored.
    #[serde(default)]
    pub condition: Option<String>,
    /// Result of evaluating the condition (true when absent).
    pub available: bool,
    /// Sequential number among available choices (1-based).
    #[serde(default)]
    pub number: Option<usize>,
}

/// A field declared by a `form` block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormField {
    /// State path the captured value is written to.
    pub var: String,
    /// Label shown next to the input.
    pub label: String,
    /// Input type hint (`text`, `number`, `select`, ...).
    #[serde(rename = "type")]
    pub field_type: String,
    /// Whether the surrounding UI must collect a value.
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub placeholder: Option<String>,
    #[serde(default)]
    pub default: Option<JsonValue>,
    /// Validation pattern forwarded to the UI.
    #[serde(default)]
    pub pattern: Option<String>,
    #[serde(default)]
    pub options: Vec<String>,
}

impl FormField {
    /// Creates a text field whose label defaults to the variable name.
    pub fn new(var: impl Into<String>) -> Self {
        let var = var.into();
        Self {
            label: var.clone(),
            var,
            field_type: "text".to_string(),
            required: false,
            placeholder: None,
            default: None,
            pattern: None,
            options: Vec::new(),
        }
    }
}

/// Window of the grid rendered by a `map` block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: usize,
    pub height: usize,
}

/// A glyph placed on the map grid after clamping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MapSprite {
    pub name: String,
    pub glyph: char,
    pub x: usize,
    pub y: usize,
}

/// Parsed `map` block configuration consumed by grid renderers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MapConfig {
    pub width: usize,
    pub height: usize,
    #[serde(default)]
    pub viewport: Option<Viewport>,
    #[serde(default)]
    pub sprites: Vec<MapSprite>,
}

/// Kind-specific extension of an executor result.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BlockPayload {
    #[default]
    None,
    Navigation {
        choices: Vec<NavChoice>,
    },
    Form {
        fields: Vec<FormField>,
    },
    Map {
        config: MapConfig,
    },
    Sql {
        rows: Vec<JsonValue>,
        row_count: usize,
        alias: String,
    },
}

/// Result of executing one block.
///
/// A failed result always carries its error inside [`BlockOutcome::Failed`], so a
/// result can never report failure without a message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutorResult {
    pub outcome: BlockOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    /// Dotted state paths written by the block and the values written.
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub state_changes: IndexMap<String, JsonValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_section: Option<String>,
    /// Log lines captured while running the block.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub logs: Vec<String>,
    #[serde(default)]
    pub payload: BlockPayload,
}

impl ExecutorResult {
    fn with_outcome(outcome: BlockOutcome) -> Self {
        Self {
            outcome,
            output: None,
            state_changes: IndexMap::new(),
            next_section: None,
            logs: Vec::new(),
            payload: BlockPayload::None,
        }
    }

    pub fn completed() -> Self {
        Self::with_outcome(BlockOutcome::Completed)
    }

    pub fn skipped() -> Self {
        Self::with_outcome(BlockOutcome::Skipped)
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self::with_outcome(BlockOutcome::Failed { error: error.into() })
    }

    pub fn with_output(mut self, output: impl Into<String>) -> Self {
        self.output = Some(output.into());
        self
    }

    pub fn with_state_changes(mut self, changes: IndexMap<String, JsonValue>) -> Self {
        self.state_changes = changes;
        self
    }

    pub fn with_next_section(mut self, section_id: Option<String>) -> Self {
        self.next_section = section_id;
        self
    }

    pub fn with_logs(mut self, logs: Vec<String>) -> Self {
        self.logs = logs;
        self
    }

    pub fn with_payload(mut self, payload: BlockPayload) -> Self {
        self.payload = payload;
        self
    }

    pub fn success(&self) -> bool {
        !matches!(self.outcome, BlockOutcome::Failed { .. })
    }

    pub fn skip(&self) -> bool {
        matches!(self.outcome, BlockOutcome::Skipped)
    }

    pub fn error(&self) -> Option<&str> {
        match &self.outcome {
            BlockOutcome::Failed { error } => Some(error),
            _ => None,
        }
    }

    pub fn is_navigation(&self) -> bool {
        matches!(self.payload, BlockPayload::Navigation { .. })
    }

    /// True when the result asks the caller for input (navigation or form).
    pub fn awaits_input(&self) -> bool {
        matches!(self.payload, BlockPayload::Navigation { .. } | BlockPayload::Form { .. })
    }

    pub fn choices(&self) -> &[NavChoice] {
        match &self.payload {
            BlockPayload::Navigation { choices } => choices,
            _ => &[],
        }
    }

    pub fn form_fields(&self) -> &[FormField] {
        match &self.payload {
            BlockPayload::Form { fields } => fields,
            _ => &[],
        }
    }

    pub fn rows(&self) -> Option<&[JsonValue]> {
        match &self.payload {
            BlockPayload::Sql { rows, .. } => Some(rows),
            _ => None,
        }
    }

    pub fn map_config(&self) -> Option<&MapConfig> {
        match &self.payload {
            BlockPayload::Map { config } => Some(config),
            _ => None,
        }
    }
}
