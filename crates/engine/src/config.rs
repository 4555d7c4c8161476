//! Runtime configuration for script and SQL budgets and output aggregation.
//!
//! The JSON file lives at `~/.config/folio/runtime.json` on most platforms. The
//! `FOLIO_CONFIG_PATH` environment variable overrides the location. A missing file
//! yields defaults; a malformed file is an error so typos never pass silently.

use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use dirs_next::{config_dir, home_dir};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Environment variable allowing callers to override the configuration file path.
pub const CONFIG_PATH_ENV: &str = "FOLIO_CONFIG_PATH";

/// Default filename for the JSON configuration.
pub const CONFIG_FILE_NAME: &str = "runtime.json";

/// Error surfaced when the configuration file cannot be read or parsed.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read configuration at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed configuration at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScriptConfig {
    /// Wall-clock budget for one `script` block.
    pub timeout_ms: u64,
    /// Number of Lua VM instructions between budget checks.
    pub hook_instruction_interval: u32,
    /// Captured `print`/`helper.log` lines kept per block.
    pub max_log_lines: usize,
    /// Lua heap ceiling for one `script` block; `0` leaves it unbounded.
    pub max_memory_bytes: usize,
}

impl Default for ScriptConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 2_000,
            hook_instruction_interval: 1_000,
            max_log_lines: 256,
            max_memory_bytes: 64 * 1024 * 1024,
        }
    }
}

impl ScriptConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SqlConfig {
    /// Wall-clock budget for one `sql` block.
    pub timeout_ms: u64,
    /// Database used when a block names none.
    pub default_database: String,
    /// Directory that relative database paths are joined to.
    pub database_root: Option<PathBuf>,
}

impl Default for SqlConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 5_000,
            default_database: ":memory:".to_string(),
            database_root: None,
        }
    }
}

impl SqlConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Joins block outputs in the aggregated run output.
    pub separator: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self { separator: "\n".to_string() }
    }
}

/// Complete runtime configuration. Every field has a default.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub script: ScriptConfig,
    pub sql: SqlConfig,
    pub output: OutputConfig,
}

impl RuntimeConfig {
    /// Loads the configuration from [`default_config_path`].
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_path(&default_config_path())
    }

    /// Loads the configuration from `path`, returning defaults when the file is absent.
    pub fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no runtime configuration found; using defaults");
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(ConfigError::Io {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };
        serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Returns the configuration path, honouring [`CONFIG_PATH_ENV`].
pub fn default_config_path() -> PathBuf {
    if let Ok(path) = env::var(CONFIG_PATH_ENV)
        && !path.trim().is_empty()
    {
        return expand_tilde(path.trim());
    }
    config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("folio")
        .join(CONFIG_FILE_NAME)
}

/// Expands a leading `~/` to the home directory.
pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/")
        && let Some(home) = home_dir()
    {
        return home.join(rest);
    }
    PathBuf::from(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let temp_dir = tempfile::tempdir().expect("tempdir");
        let config = RuntimeConfig::load_from_path(&temp_dir.path().join("absent.json")).expect("defaults");
        assert_eq!(config, RuntimeConfig::default());
        assert_eq!(config.script.timeout_ms, 2_000);
        assert_eq!(config.script.max_memory_bytes, 64 * 1024 * 1024);
        assert_eq!(config.sql.default_database, ":memory:");
        assert_eq!(config.output.separator, "\n");
    }

    #[test]
    fn partial_files_keep_remaining_defaults() {
        let temp_dir = tempfile::tempdir().expect("tempdir");
        let path = temp_dir.path().join("runtime.json");
        fs::write(&path, r#"{"sql": {"timeout_ms": 50}, "output": {"separator": "\n\n"}}"#).expect("write config");
        let config = RuntimeConfig::load_from_path(&path).expect("load config");
        assert_eq!(config.sql.timeout_ms, 50);
        assert_eq!(config.sql.default_database, ":memory:");
        assert_eq!(config.script, ScriptConfig::default());
        assert_eq!(config.output.separator, "\n\n");
    }

    #[test]
    fn malformed_files_are_errors() {
        let temp_dir = tempfile::tempdir().expect("tempdir");
        let path = temp_dir.path().join("runtime.json");
        fs::write(&path, "{ not json").expect("write config");
        let error = RuntimeConfig::load_from_path(&path).expect_err("malformed config");
        assert!(matches!(error, ConfigError::Parse { .. }));
    }

    #[test]
    fn default_path_honors_environment_override() {
        temp_env::with_var(CONFIG_PATH_ENV, Some("/tmp/folio/custom.json"), || {
            assert_eq!(default_config_path(), PathBuf::from("/tmp/folio/custom.json"));
        });
        temp_env::with_var(CONFIG_PATH_ENV, Some("   "), || {
            assert!(default_config_path().ends_with("folio/runtime.json"));
        });
    }
}
