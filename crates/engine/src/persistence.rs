//! Snapshot persistence for document state.
//!
//! A [`SnapshotStore`] saves and restores the flat top-level state map between
//! runs. [`FileSnapshotStore`] writes pretty JSON with a save timestamp and also
//! reads plain JSON objects, so hand-written seed files work as snapshots.

use std::{
    fs,
    path::{Path, PathBuf},
    sync::Mutex,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::{config::expand_tilde, state::StateSnapshot};

/// Errors surfaced by snapshot store operations.
#[derive(Debug, Error)]
pub enum PersistenceError {
    /// I/O failure while reading or writing the snapshot file.
    #[error("snapshot I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// Serialization or deserialization failure.
    #[error("snapshot serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    /// The file holds JSON that is neither a saved snapshot nor an object.
    #[error("snapshot at {path} is not a JSON object")]
    NotAnObject { path: PathBuf },
}

/// Storage for state snapshots.
pub trait SnapshotStore: Send + Sync {
    fn save(&self, snapshot: &StateSnapshot) -> Result<(), PersistenceError>;

    /// Returns the stored snapshot, or `None` when nothing was saved yet.
    fn load(&self) -> Result<Option<StateSnapshot>, PersistenceError>;
}

#[derive(Serialize, Deserialize)]
struct SavedSnapshot {
    saved_at: DateTime<Utc>,
    state: StateSnapshot,
}

/// JSON file snapshot store.
#[derive(Debug, Clone)]
pub struct FileSnapshotStore {
    path: PathBuf,
}

impl FileSnapshotStore {
    /// Creates a store at `path`, expanding a leading `~`.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: expand_tilde(&path.as_ref().to_string_lossy()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SnapshotStore for FileSnapshotStore {
    fn save(&self, snapshot: &StateSnapshot) -> Result<(), PersistenceError> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }
        let saved = SavedSnapshot {
            saved_at: Utc::now(),
            state: snapshot.clone(),
        };
        fs::write(&self.path, serde_json::to_string_pretty(&saved)?)?;
        debug!(path = %self.path.display(), keys = snapshot.len(), "saved snapshot");
        Ok(())
    }

    fn load(&self) -> Result<Option<StateSnapshot>, PersistenceError> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(error) => return Err(error.into()),
        };
        if content.trim().is_empty() {
            return Ok(None);
        }
        let value: Value = serde_json::from_str(&content)?;
        if let Ok(saved) = serde_json::from_value::<SavedSnapshot>(value.clone()) {
            return Ok(Some(saved.state));
        }
        match value {
            Value::Object(state) => Ok(Some(state)),
            _ => Err(PersistenceError::NotAnObject { path: self.path.clone() }),
        }
    }
}

/// In-memory snapshot store primarily used for unit testing.
#[derive(Debug, Default)]
pub struct MemorySnapshotStore {
    snapshot: Mutex<Option<StateSnapshot>>,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SnapshotStore for MemorySnapshotStore {
    fn save(&self, snapshot: &StateSnapshot) -> Result<(), PersistenceError> {
        *self.snapshot.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(snapshot.clone());
        Ok(())
    }

    fn load(&self) -> Result<Option<StateSnapshot>, PersistenceError> {
        Ok(self.snapshot.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> StateSnapshot {
        let Value::Object(map) = json!({"hp": 6, "inventory": ["torch"], "visited": {"cave": true}}) else {
            unreachable!("literal is an object");
        };
        map
    }

    #[test]
    fn file_store_round_trips_and_creates_directories() {
        let temp_dir = tempfile::tempdir().expect("tempdir");
        let store = FileSnapshotStore::new(temp_dir.path().join("saves").join("cave.json"));
        assert!(store.load().expect("load missing").is_none());

        store.save(&sample()).expect("save");
        assert_eq!(store.load().expect("load"), Some(sample()));

        let raw: Value = serde_json::from_str(&fs::read_to_string(store.path()).expect("read")).expect("json");
        assert!(raw.get("saved_at").is_some());
        assert_eq!(raw.get("state"), Some(&Value::Object(sample())));
    }

    #[test]
    fn plain_objects_load_as_snapshots() {
        let temp_dir = tempfile::tempdir().expect("tempdir");
        let path = temp_dir.path().join("seed.json");
        fs::write(&path, r#"{"hp": 3}"#).expect("write seed");
        let store = FileSnapshotStore::new(&path);
        assert_eq!(store.load().expect("load").and_then(|state| state.get("hp").cloned()), Some(json!(3)));

        fs::write(&path, "[1, 2]").expect("write array");
        assert!(matches!(store.load(), Err(PersistenceError::NotAnObject { .. })));

        fs::write(&path, "{ nope").expect("write garbage");
        assert!(matches!(store.load(), Err(PersistenceError::Serialization(_))));
    }

    #[test]
    fn memory_store_keeps_the_latest_snapshot() {
        let store = MemorySnapshotStore::new();
        assert!(store.load().expect("load").is_none());
        store.save(&sample()).expect("save");
        store.save(&StateSnapshot::new()).expect("save empty");
        assert_eq!(store.load().expect("load"), Some(StateSnapshot::new()));
    }
}
