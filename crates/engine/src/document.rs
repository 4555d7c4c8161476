//! Markdown documents to [`Document`]s.
//!
//! - An optional YAML frontmatter block sits between a leading `---` line and the
//!   next `---` line.
//! - ATX headings (`#` .. `######`) start sections. The id is an explicit `{#id}`
//!   suffix or the kebab-cased title; repeated ids get `-2`, `-3`, ... suffixes.
//! - Text before the first heading becomes an untitled `intro` section.
//! - Fenced code blocks whose info string starts with a block kind become
//!   [`RuntimeBlock`]s. Remaining `key=value` words become metadata. Other fences
//!   stay in the section's prose.

use std::{collections::HashMap, fs, path::Path};

use anyhow::{Context, Result, bail};
use folio_types::{BlockKind, Document, RuntimeBlock, Section};
use heck::ToKebabCase;
use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value as JsonValue;

use crate::resolve::parse_literal;

/// Identifier of the section holding content written before the first heading.
pub const INTRO_SECTION_ID: &str = "intro";

static HEADING_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^ {0,3}(#{1,6})[ \t]+(.*?)(?:[ \t]+#+)?[ \t]*$").expect("heading regex should compile"));

static EXPLICIT_ID_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s*\{#([A-Za-z0-9_\-:.]+)\}\s*$").expect("explicit id regex should compile"));

static FENCE_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"^ {0,3}(`{3,}|~{3,})(.*)$").expect("fence regex should compile"));

/// Reads and parses a document file.
pub fn load_document(path: impl AsRef<Path>) -> Result<Document> {
    let path = path.as_ref();
    let text = fs::read_to_string(path).with_context(|| format!("Failed to read document: {}", path.display()))?;
    parse_document(&text).with_context(|| format!("Failed to parse document: {}", path.display()))
}

/// Parses markdown text into a document.
pub fn parse_document(text: &str) -> Result<Document> {
    let (frontmatter, body) = split_frontmatter(text)?;
    let mut builder = SectionBuilder::default();
    let mut fence: Option<OpenFence> = None;

    for line in body.lines() {
        if let Some(open) = fence.as_mut() {
            if open.closes(line) {
                if let Some(open) = fence.take() {
                    builder.finish_fence(open, Some(line));
                }
            } else {
                open.lines.push(line.to_string());
            }
            continue;
        }
        if let Some(captures) = FENCE_PATTERN.captures(line) {
            let marker = captures[1].to_string();
            let info = captures[2].trim().to_string();
            if !(marker.starts_with('`') && info.contains('`')) {
                fence = Some(OpenFence {
                    opening: line.to_string(),
                    marker,
                    info,
                    lines: Vec::new(),
                });
                continue;
            }
        }
        if let Some(captures) = HEADING_PATTERN.captures(line) {
            builder.start_section(&captures[2]);
            continue;
        }
        builder.push_prose(line);
    }
    if let Some(open) = fence.take() {
        builder.finish_fence(open, None);
    }

    Ok(Document {
        frontmatter,
        sections: builder.finish(),
    })
}

fn split_frontmatter(text: &str) -> Result<(IndexMap<String, JsonValue>, &str)> {
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    let mut lines = text.split_inclusive('\n');
    let Some(first) = lines.next() else {
        return Ok((IndexMap::new(), text));
    };
    if first.trim_end() != "---" {
        return Ok((IndexMap::new(), text));
    }

    let mut offset = first.len();
    for line in lines {
        if matches!(line.trim_end(), "---" | "...") {
            let yaml = &text[first.len()..offset];
            let body = &text[offset + line.len()..];
            if yaml.trim().is_empty() {
                return Ok((IndexMap::new(), body));
            }
            let frontmatter = serde_yaml::from_str::<IndexMap<String, JsonValue>>(yaml).context("Invalid frontmatter")?;
            return Ok((frontmatter, body));
        }
        offset += line.len();
    }
    bail!("Frontmatter opened with '---' is never closed")
}

struct OpenFence {
    opening: String,
    marker: String,
    info: String,
    lines: Vec<String>,
}

impl OpenFence {
    fn closes(&self, line: &str) -> bool {
        let trimmed = line.trim();
        let Some(character) = self.marker.chars().next() else {
            return false;
        };
        trimmed.len() >= self.marker.len() && trimmed.chars().all(|c| c == character)
    }

    /// Block kind and metadata, when the info string names a known kind.
    fn block_header(&self) -> Option<(BlockKind, IndexMap<String, JsonValue>)> {
        let mut words = self.info.split_whitespace();
        let kind = words.next()?.parse::<BlockKind>().ok()?;
        let metadata = words
            .map(|word| match word.split_once('=') {
                Some((key, value)) => (key.to_string(), parse_literal(value)),
                None => (word.to_string(), JsonValue::Bool(true)),
            })
            .collect();
        Some((kind, metadata))
    }
}

#[derive(Default)]
struct SectionBuilder {
    sections: Vec<Section>,
    current: Option<Section>,
    prose: Vec<String>,
    used_ids: HashMap<String, usize>,
}

impl SectionBuilder {
    fn unique_id(&mut self, base: String) -> String {
        let base = if base.is_empty() { "section".to_string() } else { base };
        let count = self.used_ids.entry(base.clone()).or_insert(0);
        *count += 1;
        if *count == 1 { base } else { format!("{base}-{count}") }
    }

    fn current(&mut self) -> &mut Section {
        if self.current.is_none() {
            let id = self.unique_id(INTRO_SECTION_ID.to_string());
            self.current = Some(Section::new(id, "", Vec::new()));
        }
        self.current.get_or_insert_with(|| Section::new(INTRO_SECTION_ID, "", Vec::new()))
    }

    fn start_section(&mut self, heading: &str) {
        self.close_section();
        let (title, id) = match EXPLICIT_ID_PATTERN.captures(heading) {
            Some(captures) => {
                let title = heading[..captures.get(0).map_or(heading.len(), |matched| matched.start())].trim();
                (title.to_string(), captures[1].to_string())
            }
            None => (heading.trim().to_string(), heading.to_kebab_case()),
        };
        let id = self.unique_id(id);
        self.current = Some(Section::new(id, title, Vec::new()));
    }

    fn push_prose(&mut self, line: &str) {
        if self.current.is_none() && line.trim().is_empty() && self.prose.is_empty() {
            return;
        }
        self.current();
        self.prose.push(line.to_string());
    }

    fn finish_fence(&mut self, fence: OpenFence, closing: Option<&str>) {
        match fence.block_header() {
            Some((kind, metadata)) => {
                let block = RuntimeBlock {
                    block_type: kind.as_str().to_string(),
                    content: fence.lines.join("\n"),
                    metadata,
                };
                self.current().blocks.push(block);
            }
            None => {
                self.push_prose(&fence.opening);
                for line in &fence.lines {
                    self.push_prose(line);
                }
                if let Some(closing) = closing {
                    self.push_prose(closing);
                }
            }
        }
    }

    fn close_section(&mut self) {
        let prose = std::mem::take(&mut self.prose);
        if let Some(mut section) = self.current.take() {
            section.content = prose.join("\n").trim_matches('\n').trim_end().to_string();
            let is_empty_intro = section.title.is_empty() && section.content.is_empty() && section.blocks.is_empty();
            if !is_empty_intro {
                self.sections.push(section);
            }
        }
    }

    fn finish(mut self) -> Vec<Section> {
        self.close_section();
        self.sections
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const STORY: &str = r#"---
title: The Cave
version: 2
---
You wake up in the dark.

# Entrance {#start}

A cold wind blows.

```state
$hp = 10
```

```rust
fn not_a_block() {}
```

## The Dark Cave!

```set note=dec hidden
dec $hp 4
```

~~~panel
HP left: $hp
~~~

## The Dark Cave!
"#;

    #[test]
    fn splits_frontmatter_sections_and_blocks() {
        let document = parse_document(STORY).expect("parse story");
        assert_eq!(document.title(), Some("The Cave"));
        assert_eq!(document.frontmatter.get("version"), Some(&json!(2)));

        let ids: Vec<&str> = document.sections.iter().map(|section| section.id.as_str()).collect();
        assert_eq!(ids, vec!["intro", "start", "the-dark-cave", "the-dark-cave-2"]);

        let intro = &document.sections[0];
        assert_eq!(intro.content, "You wake up in the dark.");
        assert!(intro.blocks.is_empty());

        let entrance = &document.sections[1];
        assert_eq!(entrance.title, "Entrance");
        assert_eq!(entrance.blocks, vec![RuntimeBlock::new("state", "$hp = 10")]);
        assert!(entrance.content.contains("```rust"));
        assert!(entrance.content.contains("fn not_a_block() {}"));

        let cave = &document.sections[2];
        assert_eq!(cave.title, "The Dark Cave!");
        assert_eq!(cave.blocks.len(), 2);
        assert_eq!(cave.blocks[0].metadata.get("note"), Some(&json!("dec")));
        assert_eq!(cave.blocks[0].metadata.get("hidden"), Some(&json!(true)));
        assert_eq!(cave.blocks[1].block_type, "panel");
        assert_eq!(cave.blocks[1].content, "HP left: $hp");
        assert_eq!(document.block_count(), 3);
    }

    #[test]
    fn documents_without_frontmatter_or_headings() {
        let document = parse_document("```panel\nHello\n```\n").expect("parse");
        assert!(document.frontmatter.is_empty());
        assert_eq!(document.sections.len(), 1);
        assert_eq!(document.sections[0].id, INTRO_SECTION_ID);
        assert_eq!(document.sections[0].blocks[0].content, "Hello");

        assert!(parse_document("").expect("empty document").sections.is_empty());
    }

    #[test]
    fn unterminated_fences_run_to_the_end() {
        let document = parse_document("# Only\n```set\ninc $x\n").expect("parse");
        assert_eq!(document.sections[0].blocks[0].content, "inc $x");
    }

    #[test]
    fn frontmatter_errors_are_reported() {
        assert!(parse_document("---\ntitle: x\n").is_err());
        assert!(parse_document("---\n: [\n---\n").is_err());
        assert!(parse_document("---\n---\n# A\n").expect("empty frontmatter").frontmatter.is_empty());
    }

    #[test]
    fn load_document_reads_files() {
        let temp_dir = tempfile::tempdir().expect("tempdir");
        let path = temp_dir.path().join("story.md");
        fs::write(&path, STORY).expect("write story");
        let document = load_document(&path).expect("load story");
        assert_eq!(document.sections.len(), 4);
        assert!(load_document(temp_dir.path().join("missing.md")).is_err());
    }
}
