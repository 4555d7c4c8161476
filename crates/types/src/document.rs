//! Parsed document structure: documents, sections, and typed blocks.
//!
//! Blocks and sections are immutable once parsed. Sections preserve authoring order
//! so the runtime can execute them in the sequence they were written.

use std::{fmt, str::FromStr};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Closed set of block kinds the runtime knows how to execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlockKind {
    State,
    Set,
    Form,
    If,
    Else,
    Nav,
    Panel,
    Map,
    Script,
    Sql,
}

impl BlockKind {
    /// Every kind in registration order.
    pub const ALL: [BlockKind; 10] = [
        BlockKind::State,
        BlockKind::Set,
        BlockKind::Form,
        BlockKind::If,
        BlockKind::Else,
        BlockKind::Nav,
        BlockKind::Panel,
        BlockKind::Map,
        BlockKind::Script,
        BlockKind::Sql,
    ];

    /// Canonical lowercase tag used in fences and the `type` field.
    pub fn as_str(self) -> &'static str {
        match self {
            BlockKind::State => "state",
            BlockKind::Set => "set",
            BlockKind::Form => "form",
            BlockKind::If => "if",
            BlockKind::Else => "else",
            BlockKind::Nav => "nav",
            BlockKind::Panel => "panel",
            BlockKind::Map => "map",
            BlockKind::Script => "script",
            BlockKind::Sql => "sql",
        }
    }

    /// Blocks whose results hand control back to the caller for input.
    pub fn awaits_input(self) -> bool {
        matches!(self, BlockKind::Nav | BlockKind::Form)
    }
}

impl fmt::Display for BlockKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a block type tag is not one of the known kinds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownBlockKind(pub String);

impl fmt::Display for UnknownBlockKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Unknown block type: {}", self.0)
    }
}

impl std::error::Error for UnknownBlockKind {}

impl FromStr for BlockKind {
    type Err = UnknownBlockKind;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_lowercase();
        BlockKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == normalized)
            .ok_or_else(|| UnknownBlockKind(value.to_string()))
    }
}

/// A single typed unit of document content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeBlock {
    /// Block type tag as authored (for example `set` or `sql`).
    #[serde(rename = "type")]
    pub block_type: String,
    /// Raw text body of the block.
    pub content: String,
    /// Free-form metadata collected from the fence info string.
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub metadata: IndexMap<String, JsonValue>,
}

impl RuntimeBlock {
    /// Creates a block with no metadata.
    pub fn new(block_type: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            block_type: block_type.into(),
            content: content.into(),
            metadata: IndexMap::new(),
        }
    }

    /// Parsed kind, when the tag is known.
    pub fn kind(&self) -> Option<BlockKind> {
        self.block_type.parse().ok()
    }
}

/// A titled region of a document holding an ordered list of blocks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Section {
    /// Stable identifier used for navigation targets and history.
    pub id: String,
    /// Human readable heading text.
    pub title: String,
    /// Prose content of the section with executable blocks removed.
    #[serde(default)]
    pub content: String,
    /// Executable blocks in authoring order.
    #[serde(default)]
    pub blocks: Vec<RuntimeBlock>,
}

impl Section {
    pub fn new(id: impl Into<String>, title: impl Into<String>, blocks: Vec<RuntimeBlock>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            content: String::new(),
            blocks,
        }
    }
}

/// A parsed document: frontmatter plus ordered sections.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Frontmatter key/value pairs, preserving authoring order.
    #[serde(default)]
    pub frontmatter: IndexMap<String, JsonValue>,
    /// Sections in document order.
    #[serde(default)]
    pub sections: Vec<Section>,
}

impl Document {
    pub fn new(sections: Vec<Section>) -> Self {
        Self {
            frontmatter: IndexMap::new(),
            sections,
        }
    }

    /// Looks up a section by identifier.
    pub fn section(&self, id: &str) -> Option<&Section> {
        self.sections.iter().find(|section| section.id == id)
    }

    /// Title from frontmatter, when declared.
    pub fn title(&self) -> Option<&str> {
        self.frontmatter.get("title").and_then(JsonValue::as_str)
    }

    /// Total number of blocks across all sections.
    pub fn block_count(&self) -> usize {
        self.sections.iter().map(|section| section.blocks.len()).sum()
    }
}
