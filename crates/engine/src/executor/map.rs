//! `map` blocks describe a character grid with sprites.
//!
//! ```text
//! width: 12
//! height: 6
//! viewport: 8x4
//! sprite: hero
//!   ch: "@"
//!   x: $hero.x + 1
//!   y: 2
//! ```

use anyhow::Result;
use folio_types::{BlockPayload, ExecutorResult, MapConfig, MapSprite, RuntimeBlock, Viewport};

use super::{
    BlockExecutor,
    render::render_box,
    syntax::{is_ignorable, key_value},
};
use crate::{condition::evaluate_number, context::ExecutionContext, resolve::strip_matching_quotes, state::RuntimeState};

const DEFAULT_WIDTH: usize = 20;
const DEFAULT_HEIGHT: usize = 10;
const MAX_DIMENSION: usize = 512;
const EMPTY_CELL: char = '.';

#[derive(Debug, Default)]
struct SpriteDraft {
    name: String,
    glyph: Option<char>,
    x: Option<String>,
    y: Option<String>,
}

fn dimension(value: &str, state: &RuntimeState, fallback: usize) -> usize {
    match evaluate_number(value, state) {
        Some(number) if number >= 1.0 => (number as usize).min(MAX_DIMENSION),
        _ => fallback,
    }
}

fn parse_viewport(value: &str) -> Option<Viewport> {
    let (width, height) = value.trim().split_once(['x', 'X', '×'])?;
    let width = width.trim().parse::<usize>().ok().filter(|width| *width > 0)?;
    let height = height.trim().parse::<usize>().ok().filter(|height| *height > 0)?;
    Some(Viewport { width, height })
}

/// Evaluates a coordinate expression and clamps it into `0..limit`.
fn coordinate(expression: Option<&str>, state: &RuntimeState, limit: usize) -> usize {
    let value = expression.and_then(|expression| evaluate_number(expression, state)).unwrap_or(0.0);
    if value <= 0.0 { 0 } else { (value.floor() as usize).min(limit.saturating_sub(1)) }
}

fn parse_map(content: &str, state: &RuntimeState) -> MapConfig {
    let mut width = DEFAULT_WIDTH;
    let mut height = DEFAULT_HEIGHT;
    let mut viewport = None;
    let mut drafts: Vec<SpriteDraft> = Vec::new();

    for line in content.lines().filter(|line| !is_ignorable(line)) {
        let Some((key, value)) = key_value(line.trim(), ':') else {
            continue;
        };
        match (key.as_str(), drafts.last_mut()) {
            ("width", _) => width = dimension(value, state, DEFAULT_WIDTH),
            ("height", _) => height = dimension(value, state, DEFAULT_HEIGHT),
            ("viewport", _) => viewport = parse_viewport(value),
            ("sprite", _) => drafts.push(SpriteDraft {
                name: strip_matching_quotes(value).to_string(),
                ..SpriteDraft::default()
            }),
            ("ch" | "glyph", Some(draft)) => draft.glyph = strip_matching_quotes(value).chars().next(),
            ("x", Some(draft)) => draft.x = Some(value.to_string()),
            ("y", Some(draft)) => draft.y = Some(value.to_string()),
            _ => {}
        }
    }

    let sprites = drafts
        .into_iter()
        .map(|draft| MapSprite {
            glyph: draft.glyph.or_else(|| draft.name.chars().next()).unwrap_or('@'),
            x: coordinate(draft.x.as_deref(), state, width),
            y: coordinate(draft.y.as_deref(), state, height),
            name: draft.name,
        })
        .collect();

    MapConfig {
        width,
        height,
        viewport,
        sprites,
    }
}

fn render_map(config: &MapConfig) -> String {
    let mut grid = vec![vec![EMPTY_CELL; config.width]; config.height];
    for sprite in &config.sprites {
        if let Some(cell) = grid.get_mut(sprite.y).and_then(|row| row.get_mut(sprite.x)) {
            *cell = sprite.glyph;
        }
    }
    let (visible_width, visible_height) = match config.viewport {
        Some(viewport) => (viewport.width.min(config.width), viewport.height.min(config.height)),
        None => (config.width, config.height),
    };
    let rows: Vec<String> = grid
        .iter()
        .take(visible_height)
        .map(|row| row.iter().take(visible_width).collect())
        .collect();
    render_box(None, &rows)
}

#[derive(Debug, Default)]
pub struct MapExecutor;

impl BlockExecutor for MapExecutor {
    fn name(&self) -> &'static str {
        "Map"
    }

    fn run(&self, block: &RuntimeBlock, context: &mut ExecutionContext) -> Result<ExecutorResult> {
        let config = parse_map(&block.content, &context.state);
        Ok(ExecutorResult::completed()
            .with_output(render_map(&config))
            .with_payload(BlockPayload::Map { config }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn run(content: &str, context: &mut ExecutionContext) -> ExecutorResult {
        MapExecutor.execute(&RuntimeBlock::new("map", content), context)
    }

    #[test]
    fn defaults_to_twenty_by_ten() {
        let mut context = ExecutionContext::default();
        let result = run("", &mut context);
        let config = result.map_config().expect("map config");
        assert_eq!((config.width, config.height), (20, 10));
        let output = result.output.unwrap_or_default();
        assert_eq!(output.lines().count(), 12);
        assert!(output.contains(&".".repeat(20)));
    }

    #[test]
    fn sprites_are_evaluated_and_clamped() {
        let mut context = ExecutionContext::default();
        context.state.set("hero", json!({"x": 2}));
        let result = run(
            concat!(
                "width: 5\nheight: 3\n",
                "sprite: hero\n  ch: \"@\"\n  x: $hero.x + 1\n  y: 1\n",
                "sprite: wall\n  ch: '#'\n  x: 99\n  y: -4\n",
                "sprite: ghost\n  x: nonsense",
            ),
            &mut context,
        );
        let config = result.map_config().expect("map config");
        assert_eq!(config.sprites[0], MapSprite { name: "hero".into(), glyph: '@', x: 3, y: 1 });
        assert_eq!((config.sprites[1].x, config.sprites[1].y), (4, 0));
        assert_eq!((config.sprites[2].glyph, config.sprites[2].x), ('g', 0));
        let rows: Vec<&str> = result.output.as_deref().unwrap_or_default().lines().collect();
        assert_eq!(rows[1], "│ g...# │");
        assert_eq!(rows[2], "│ ...@. │");
    }

    #[test]
    fn viewport_clips_the_rendered_window() {
        let mut context = ExecutionContext::default();
        let result = run("width: 10\nheight: 10\nviewport: 4x2", &mut context);
        let config = result.map_config().expect("map config");
        assert_eq!(config.viewport, Some(Viewport { width: 4, height: 2 }));
        let output = result.output.unwrap_or_default();
        assert_eq!(output.lines().count(), 4);
        assert!(output.contains("│ .... │"));
    }
}
