//! Line helpers shared by the indented `key: value` block grammars (nav, map, form).

/// Leading whitespace width, counting a tab as four columns.
pub(crate) fn indentation(line: &str) -> usize {
    line.chars()
        .take_while(|character| character.is_whitespace())
        .map(|character| if character == '\t' { 4 } else { 1 })
        .sum()
}

/// Splits `key: value` (or `key = value` when `separator` is `'='`) into trimmed parts.
///
/// The key is lowercased; the value keeps its case.
pub(crate) fn key_value(line: &str, separator: char) -> Option<(String, &str)> {
    let (key, value) = line.split_once(separator)?;
    let key = key.trim();
    if key.is_empty() || key.contains(char::is_whitespace) {
        return None;
    }
    Some((key.to_ascii_lowercase(), value.trim()))
}

/// True for blank lines and `#` or `//` comments.
pub(crate) fn is_ignorable(line: &str) -> bool {
    let trimmed = line.trim();
    trimmed.is_empty() || trimmed.starts_with('#') || trimmed.starts_with("//")
}
