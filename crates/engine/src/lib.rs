//! # Folio Engine
//!
//! The Folio Engine parses markdown documents into sections of typed blocks and
//! executes them against a shared, mutable state.
//!
//! ## Key Features
//!
//! - **Document Parsing**: YAML frontmatter, heading-delimited sections, fenced blocks
//! - **State Blocks**: idempotent defaults (`state`) and mutations (`set`, `inc`, `dec`, `toggle`)
//! - **Conditional Execution**: `if` / `else` chains over a small expression language
//! - **Interactive Blocks**: navigation choices, forms, panels, and tile maps
//! - **Sandboxed Code**: budgeted Lua `script` blocks and read-only `sql` queries
//!
//! ## Usage
//!
//! ````rust
//! use folio_engine::{DocumentRuntime, RunOptions, parse_document};
//! use folio_types::RunStatus;
//! use serde_json::json;
//!
//! let document = parse_document(r#"
//! ```state
//! $hp = 10
//! ```
//!
//! ```set
//! dec $hp 4
//! ```
//!
//! ```panel
//! HP left: $hp
//! ```
//! "#)?;
//!
//! let report = DocumentRuntime::default().run(&document, RunOptions::default());
//! assert_eq!(report.status, RunStatus::Completed);
//! assert_eq!(report.final_state.get("hp"), Some(&json!(6)));
//! assert_eq!(report.output, "HP left: 6");
//! # Ok::<(), anyhow::Error>(())
//! ````
//!
//! ## Architecture
//!
//! - **`document`**: markdown to [`folio_types::Document`]
//! - **`state`** / **`resolve`**: path-addressed state and `$variable` interpolation
//! - **`expression`** / **`condition`**: the expression language used by `if`, `when:` and `map`
//! - **`executor`**: one [`BlockExecutor`] per block type, dispatched by [`ExecutorFactory`]
//! - **`runtime`**: the sequential runner and the asynchronous [`drive_document_run`] driver
//! - **`persistence`**: snapshot stores for resuming runs
//! - **`sql_driver`**: the pluggable SQL driver seam

pub mod condition;
pub mod config;
pub mod context;
pub mod document;
pub mod executor;
pub mod expression;
pub mod persistence;
pub mod resolve;
pub mod runtime;
pub mod sql_driver;
pub mod state;

pub use condition::{evaluate_condition, evaluate_number};
pub use config::{ConfigError, OutputConfig, RuntimeConfig, ScriptConfig, SqlConfig};
pub use context::{CancellationFlag, ExecutionBudget, ExecutionContext};
pub use document::{load_document, parse_document};
pub use executor::{BlockExecutor, ExecutorFactory, ExecutorFactoryBuilder};
pub use expression::{ExprValue, ExpressionError, evaluate_expression};
pub use persistence::{FileSnapshotStore, MemorySnapshotStore, PersistenceError, SnapshotStore};
pub use runtime::{DocumentRunRequest, DocumentRuntime, RunOptions, drive_document_run};
pub use sql_driver::{SqlConnection, SqlDriver, SqlDriverHandle};
pub use state::{RuntimeState, StateSnapshot};
