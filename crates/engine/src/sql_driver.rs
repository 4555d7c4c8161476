//! Pluggable SQL drivers and the resolved-once handle executors share.
//!
//! - [`SqlDriver`] opens connections; [`SqlConnection`] runs one query and closes
//! - [`SqlDriverHandle`] resolves its driver lazily, exactly once, behind a lock,
//!   so tests can inject a fake driver in place of the bundled SQLite one
//! - [`SqliteDriver`] is available with the `sqlite` cargo feature (on by default)

use std::sync::{Arc, Mutex};

use anyhow::Result;
use once_cell::sync::OnceCell;
use serde_json::Value;

use crate::context::ExecutionBudget;

/// Database path meaning "a fresh in-memory database".
pub const MEMORY_DATABASE: &str = ":memory:";

/// An open database connection scoped to one `sql` block.
pub trait SqlConnection {
    /// Executes `sql` with positional `params`, returning each row as a JSON object.
    fn query(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Value>>;

    /// Releases the connection.
    fn close(self: Box<Self>) -> Result<()>;
}

/// Opens connections to a database engine.
pub trait SqlDriver: Send + Sync {
    fn name(&self) -> &'static str;

    /// Opens `path`. The connection must stop work once `budget` is exhausted.
    fn open(&self, path: &str, read_only: bool, budget: &ExecutionBudget) -> Result<Box<dyn SqlConnection>>;
}

type DriverResolver = Box<dyn FnOnce() -> Option<Arc<dyn SqlDriver>> + Send>;

/// Lazily resolved, shareable reference to the optional SQL driver.
pub struct SqlDriverHandle {
    resolver: Mutex<Option<DriverResolver>>,
    driver: OnceCell<Option<Arc<dyn SqlDriver>>>,
}

impl std::fmt::Debug for SqlDriverHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqlDriverHandle")
            .field("resolved", &self.driver.get().is_some())
            .field("driver", &self.driver.get().and_then(|driver| driver.as_ref().map(|driver| driver.name())))
            .finish()
    }
}

impl Default for SqlDriverHandle {
    fn default() -> Self {
        Self::new(default_driver)
    }
}

impl SqlDriverHandle {
    /// Creates a handle that runs `resolver` on first use.
    pub fn new(resolver: impl FnOnce() -> Option<Arc<dyn SqlDriver>> + Send + 'static) -> Self {
        Self {
            resolver: Mutex::new(Some(Box::new(resolver))),
            driver: OnceCell::new(),
        }
    }

    /// Creates an already resolved handle.
    pub fn with_driver(driver: Arc<dyn SqlDriver>) -> Self {
        Self {
            resolver: Mutex::new(None),
            driver: OnceCell::with_value(Some(driver)),
        }
    }

    /// A handle that never yields a driver.
    pub fn unavailable() -> Self {
        Self {
            resolver: Mutex::new(None),
            driver: OnceCell::with_value(None),
        }
    }

    /// Returns the driver, resolving it on the first call.
    pub fn driver(&self) -> Option<Arc<dyn SqlDriver>> {
        self.driver
            .get_or_init(|| {
                let resolver = self.resolver.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).take();
                resolver.and_then(|resolve| resolve())
            })
            .clone()
    }

    pub fn is_resolved(&self) -> bool {
        self.driver.get().is_some()
    }
}

/// Driver used when no other is injected.
pub fn default_driver() -> Option<Arc<dyn SqlDriver>> {
    #[cfg(feature = "sqlite")]
    {
        Some(Arc::new(sqlite::SqliteDriver))
    }
    #[cfg(not(feature = "sqlite"))]
    {
        None
    }
}

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteDriver;

#[cfg(feature = "sqlite")]
mod sqlite {
    use anyhow::{Context, Result};
    use rusqlite::{
        Connection, OpenFlags, params_from_iter,
        types::{Value as SqlValue, ValueRef},
    };
    use serde_json::{Map as JsonMap, Value};

    use super::{MEMORY_DATABASE, SqlConnection, SqlDriver};
    use crate::context::ExecutionBudget;

    /// Virtual machine steps between budget checks.
    const PROGRESS_INTERVAL: i32 = 1_000;

    /// Bundled SQLite via rusqlite.
    #[derive(Debug, Default)]
    pub struct SqliteDriver;

    impl SqlDriver for SqliteDriver {
        fn name(&self) -> &'static str {
            "sqlite"
        }

        fn open(&self, path: &str, read_only: bool, budget: &ExecutionBudget) -> Result<Box<dyn SqlConnection>> {
            let connection = if path == MEMORY_DATABASE {
                Connection::open_in_memory().context("failed to open in-memory database")?
            } else {
                let access = if read_only {
                    OpenFlags::SQLITE_OPEN_READ_ONLY
                } else {
                    OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE
                };
                Connection::open_with_flags(path, access | OpenFlags::SQLITE_OPEN_URI | OpenFlags::SQLITE_OPEN_NO_MUTEX)
                    .with_context(|| format!("failed to open database '{path}'"))?
            };
            if read_only {
                connection.pragma_update(None, "query_only", true)?;
            }
            let progress_budget = budget.clone();
            connection.progress_handler(PROGRESS_INTERVAL, Some(move || progress_budget.is_exhausted()));
            Ok(Box::new(SqliteConnection { connection }))
        }
    }

    struct SqliteConnection {
        connection: Connection,
    }

    fn to_sql(value: &Value) -> SqlValue {
        match value {
            Value::Null => SqlValue::Null,
            Value::Bool(flag) => SqlValue::Integer(i64::from(*flag)),
            Value::Number(number) => match number.as_i64() {
                Some(integer) => SqlValue::Integer(integer),
                None => SqlValue::Real(number.as_f64().unwrap_or_default()),
            },
            Value::String(text) => SqlValue::Text(text.clone()),
            other => SqlValue::Text(other.to_string()),
        }
    }

    fn to_json(value: ValueRef<'_>) -> Value {
        match value {
            ValueRef::Null => Value::Null,
            ValueRef::Integer(integer) => Value::from(integer),
            ValueRef::Real(real) => serde_json::Number::from_f64(real).map(Value::Number).unwrap_or(Value::Null),
            ValueRef::Text(text) => Value::String(String::from_utf8_lossy(text).into_owned()),
            ValueRef::Blob(bytes) => Value::Array(bytes.iter().map(|byte| Value::from(*byte)).collect()),
        }
    }

    impl SqlConnection for SqliteConnection {
        fn query(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Value>> {
            let mut statement = self.connection.prepare(sql)?;
            let columns: Vec<String> = statement.column_names().into_iter().map(str::to_string).collect();
            let mut rows = statement.query(params_from_iter(params.iter().map(to_sql)))?;
            let mut records = Vec::new();
            while let Some(row) = rows.next()? {
                let mut record = JsonMap::new();
                for (index, column) in columns.iter().enumerate() {
                    record.insert(column.clone(), to_json(row.get_ref(index)?));
                }
                records.push(Value::Object(record));
            }
            Ok(records)
        }

        fn close(self: Box<Self>) -> Result<()> {
            self.connection.close().map_err(|(_, error)| error)?;
            Ok(())
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use serde_json::json;

        #[test]
        fn selects_from_memory() {
            let mut connection = SqliteDriver
                .open(MEMORY_DATABASE, true, &ExecutionBudget::unbounded())
                .expect("open memory database");
            let rows = connection
                .query("SELECT 1 AS one, ? AS name, ? AS ratio, NULL AS nothing", &[json!("Ada"), json!(0.5)])
                .expect("query");
            assert_eq!(rows, vec![json!({"one": 1, "name": "Ada", "ratio": 0.5, "nothing": null})]);
            connection.close().expect("close");
        }

        #[test]
        fn read_only_connections_refuse_writes() {
            let mut connection = SqliteDriver
                .open(MEMORY_DATABASE, true, &ExecutionBudget::unbounded())
                .expect("open memory database");
            assert!(connection.query("CREATE TABLE t (x)", &[]).is_err());
        }

        #[test]
        fn reads_files_opened_read_only() {
            let temp_dir = tempfile::tempdir().expect("tempdir");
            let path = temp_dir.path().join("game.db");
            {
                let connection = Connection::open(&path).expect("create database");
                connection
                    .execute_batch("CREATE TABLE items (name TEXT, qty INTEGER); INSERT INTO items VALUES ('torch', 2), ('rope', 1);")
                    .expect("seed database");
            }
            let path = path.to_string_lossy().to_string();
            let mut connection = SqliteDriver.open(&path, true, &ExecutionBudget::unbounded()).expect("open file");
            let rows = connection.query("SELECT name FROM items WHERE qty > ?", &[json!(1)]).expect("query");
            assert_eq!(rows, vec![json!({"name": "torch"})]);
            assert!(connection.query("DELETE FROM items", &[]).is_err());
        }
    }
}
