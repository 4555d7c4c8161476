//! Plain-text bordered previews for nav, map, and form blocks.

use unicode_width::UnicodeWidthStr;

/// Draws `lines` inside a single-line box, with an optional title in the top border.
///
/// Widths are measured in terminal columns so wide glyphs keep the border aligned.
pub fn render_box(title: Option<&str>, lines: &[String]) -> String {
    let title_width = title.map(|title| UnicodeWidthStr::width(title) + 2).unwrap_or(0);
    let inner_width = lines
        .iter()
        .map(|line| UnicodeWidthStr::width(line.as_str()))
        .max()
        .unwrap_or(0)
        .max(title_width);

    let mut rendered = String::new();
    match title {
        Some(title) => {
            let fill = inner_width - title_width;
            rendered.push_str(&format!("┌─ {title} {}─┐\n", "─".repeat(fill)));
        }
        None => rendered.push_str(&format!("┌{}┐\n", "─".repeat(inner_width + 2))),
    }
    for line in lines {
        let padding = inner_width - UnicodeWidthStr::width(line.as_str());
        rendered.push_str(&format!("│ {line}{} │\n", " ".repeat(padding)));
    }
    rendered.push_str(&format!("└{}┘", "─".repeat(inner_width + 2)));
    rendered
}
