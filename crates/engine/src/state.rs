//! Mutable, path-addressable session state.
//!
//! [`RuntimeState`] stores JSON values keyed by unique top-level names. Dotted paths
//! (`player.inventory.gold`, `items[0].name`, `items.0.name`) address nested values.
//! Writes create intermediate maps (never arrays) and overwrite non-map intermediates;
//! reads of missing paths return `None`.

use indexmap::IndexMap;
use serde_json::{Map as JsonMap, Value};

/// Immutable flat copy of the top-level state entries.
pub type StateSnapshot = JsonMap<String, Value>;

/// One segment of a dotted state path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSegment {
    Key(String),
    Index(usize),
}

impl PathSegment {
    fn key(&self) -> String {
        match self {
            PathSegment::Key(key) => key.clone(),
            PathSegment::Index(index) => index.to_string(),
        }
    }
}

/// Splits `a.b[0].c` (or `a.b.0.c`) into segments. Empty segments are ignored.
pub fn path_segments(path: &str) -> Vec<PathSegment> {
    let trimmed = path.trim().trim_start_matches('$');
    let mut segments = Vec::new();
    for part in trimmed.split('.') {
        if part.is_empty() {
            continue;
        }
        let (key, indices) = split_indices(part);
        if !key.is_empty() {
            match key.parse::<usize>() {
                Ok(index) => segments.push(PathSegment::Index(index)),
                Err(_) => segments.push(PathSegment::Key(key.to_string())),
            }
        }
        segments.extend(indices.into_iter().map(PathSegment::Index));
    }
    segments
}

fn split_indices(segment: &str) -> (&str, Vec<usize>) {
    let Some(bracket) = segment.find('[') else {
        return (segment, Vec::new());
    };
    let key = &segment[..bracket];
    let mut indices = Vec::new();
    let mut remainder = &segment[bracket..];
    while let Some(stripped) = remainder.strip_prefix('[') {
        let Some(close) = stripped.find(']') else {
            break;
        };
        if let Ok(index) = stripped[..close].trim().parse::<usize>() {
            indices.push(index);
        }
        remainder = &stripped[close + 1..];
    }
    (key, indices)
}

/// Reads the value at `path`, descending through maps and arrays.
pub fn get_nested<'a>(root: &'a JsonMap<String, Value>, path: &str) -> Option<&'a Value> {
    let segments = path_segments(path);
    let (first, rest) = segments.split_first()?;
    let mut current = root.get(&first.key())?;
    for segment in rest {
        current = match (current, segment) {
            (Value::Object(map), segment) => map.get(&segment.key())?,
            (Value::Array(items), PathSegment::Index(index)) => items.get(*index)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Writes `value` at `path`, creating intermediate maps as needed.
///
/// Returns `false` when the path has no segments.
pub fn set_nested(root: &mut JsonMap<String, Value>, path: &str, value: Value) -> bool {
    let segments = path_segments(path);
    let Some((first, rest)) = segments.split_first() else {
        return false;
    };
    let slot = root.entry(first.key()).or_insert(Value::Null);
    assign(slot, rest, value);
    true
}

fn assign(slot: &mut Value, segments: &[PathSegment], value: Value) {
    let Some((first, rest)) = segments.split_first() else {
        *slot = value;
        return;
    };
    if let (Value::Array(items), PathSegment::Index(index)) = (&mut *slot, first)
        && let Some(element) = items.get_mut(*index)
    {
        assign(element, rest, value);
        return;
    }
    if !slot.is_object() {
        *slot = Value::Object(JsonMap::new());
    }
    if let Value::Object(map) = slot {
        let next = map.entry(first.key()).or_insert(Value::Null);
        assign(next, rest, value);
    }
}

/// Removes the value at `path`, returning it when present.
pub fn delete_nested(root: &mut JsonMap<String, Value>, path: &str) -> Option<Value> {
    let segments = path_segments(path);
    let (last, parents) = segments.split_last()?;
    let Some((first, middle)) = parents.split_first() else {
        return root.remove(&last.key());
    };
    let mut current = root.get_mut(&first.key())?;
    for segment in middle {
        current = match (current, segment) {
            (Value::Object(map), segment) => map.get_mut(&segment.key())?,
            (Value::Array(items), PathSegment::Index(index)) => items.get_mut(*index)?,
            _ => return None,
        };
    }
    match current {
        Value::Object(map) => map.remove(&last.key()),
        _ => None,
    }
}

/// Session state mutated by executors.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RuntimeState {
    values: JsonMap<String, Value>,
}

impl RuntimeState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a state pre-populated from a snapshot.
    pub fn from_snapshot(snapshot: StateSnapshot) -> Self {
        Self { values: snapshot }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.values.insert(key.into(), value);
    }

    pub fn has(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn delete(&mut self, key: &str) -> Option<Value> {
        self.values.remove(key)
    }

    pub fn get_path(&self, path: &str) -> Option<&Value> {
        get_nested(&self.values, path)
    }

    pub fn set_path(&mut self, path: &str, value: Value) -> bool {
        set_nested(&mut self.values, path, value)
    }

    pub fn has_path(&self, path: &str) -> bool {
        self.get_path(path).is_some()
    }

    pub fn delete_path(&mut self, path: &str) -> Option<Value> {
        delete_nested(&mut self.values, path)
    }

    /// Applies dotted-path writes reported by an executor.
    pub fn apply_changes(&mut self, changes: &IndexMap<String, Value>) {
        for (path, value) in changes {
            self.set_path(path, value.clone());
        }
    }

    /// Returns an immutable copy of the top-level entries.
    pub fn snapshot(&self) -> StateSnapshot {
        self.values.clone()
    }

    /// Replaces the entire state with a snapshot.
    pub fn restore(&mut self, snapshot: StateSnapshot) {
        self.values = snapshot;
    }

    /// Overlays snapshot entries on top of the current state.
    pub fn merge(&mut self, snapshot: StateSnapshot) {
        for (key, value) in snapshot {
            self.values.insert(key, value);
        }
    }

    pub fn as_map(&self) -> &JsonMap<String, Value> {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn path_segments_accept_brackets_and_numeric_dots() {
        assert_eq!(
            path_segments("$items[0].name"),
            vec![PathSegment::Key("items".into()), PathSegment::Index(0), PathSegment::Key("name".into())]
        );
        assert_eq!(path_segments("items.1"), vec![PathSegment::Key("items".into()), PathSegment::Index(1)]);
        assert!(path_segments("").is_empty());
    }

    #[test]
    fn set_path_creates_intermediate_maps() {
        let mut state = RuntimeState::new();
        assert!(state.set_path("player.inventory.gold", json!(5)));
        assert_eq!(state.get("player"), Some(&json!({"inventory": {"gold": 5}})));
        assert_eq!(state.get_path("player.inventory.gold"), Some(&json!(5)));
        assert!(state.get_path("player.inventory.silver").is_none());
    }

    #[test]
    fn set_path_overwrites_scalar_intermediates() {
        let mut state = RuntimeState::new();
        state.set("player", json!("nobody"));
        state.set_path("player.name", json!("Ada"));
        assert_eq!(state.get("player"), Some(&json!({"name": "Ada"})));
    }

    #[test]
    fn set_path_writes_into_existing_arrays() {
        let mut state = RuntimeState::new();
        state.set("items", json!([{"name": "a"}, {"name": "b"}]));
        state.set_path("items[1].name", json!("c"));
        assert_eq!(state.get_path("items.1.name"), Some(&json!("c")));
        assert_eq!(state.get_path("items[0].name"), Some(&json!("a")));
    }

    #[test]
    fn delete_path_removes_leaves() {
        let mut state = RuntimeState::new();
        state.set_path("a.b.c", json!(1));
        assert_eq!(state.delete_path("a.b.c"), Some(json!(1)));
        assert_eq!(state.get_path("a.b"), Some(&json!({})));
        assert_eq!(state.delete_path("a"), Some(json!({"b": {}})));
        assert!(state.is_empty());
    }

    #[test]
    fn snapshot_and_restore_round_trip() {
        let mut state = RuntimeState::new();
        state.set("hp", json!(10));
        let snapshot = state.snapshot();
        state.set("hp", json!(1));
        state.restore(snapshot);
        assert_eq!(state.get("hp"), Some(&json!(10)));

        let mut overlay = StateSnapshot::new();
        overlay.insert("gold".into(), json!(3));
        state.merge(overlay);
        assert_eq!(state.len(), 2);
    }
}
