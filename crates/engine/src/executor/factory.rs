//! Maps block type tags to executors.

use std::{collections::HashMap, sync::Arc};

use folio_types::{BlockKind, ExecutorResult, RuntimeBlock};

use super::{
    BlockExecutor, ElseExecutor, FormExecutor, IfExecutor, MapExecutor, NavigationExecutor, PanelExecutor, ScriptExecutor,
    SetExecutor, SqlExecutor, StateExecutor,
};
use crate::{context::ExecutionContext, sql_driver::SqlDriverHandle};

/// Immutable registry of executors keyed by [`BlockKind`].
#[derive(Clone)]
pub struct ExecutorFactory {
    executors: HashMap<BlockKind, Arc<dyn BlockExecutor>>,
}

impl std::fmt::Debug for ExecutorFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut kinds: Vec<&str> = self.executors.keys().map(|kind| kind.as_str()).collect();
        kinds.sort_unstable();
        f.debug_struct("ExecutorFactory").field("kinds", &kinds).finish()
    }
}

impl Default for ExecutorFactory {
    fn default() -> Self {
        Self::with_sql_driver(Arc::new(SqlDriverHandle::default()))
    }
}

impl ExecutorFactory {
    /// Registers every built-in executor, with `sql` blocks using `drivers`.
    pub fn with_sql_driver(drivers: Arc<SqlDriverHandle>) -> Self {
        ExecutorFactoryBuilder::new()
            .register(BlockKind::State, StateExecutor)
            .register(BlockKind::Set, SetExecutor)
            .register(BlockKind::Form, FormExecutor)
            .register(BlockKind::If, IfExecutor)
            .register(BlockKind::Else, ElseExecutor)
            .register(BlockKind::Nav, NavigationExecutor)
            .register(BlockKind::Panel, PanelExecutor)
            .register(BlockKind::Map, MapExecutor)
            .register(BlockKind::Script, ScriptExecutor)
            .register(BlockKind::Sql, SqlExecutor::new(drivers))
            .build()
    }

    pub fn builder() -> ExecutorFactoryBuilder {
        ExecutorFactoryBuilder::new()
    }

    /// Looks up the executor for a block type tag.
    pub fn executor_for(&self, block_type: &str) -> Option<Arc<dyn BlockExecutor>> {
        let kind = block_type.parse::<BlockKind>().ok()?;
        self.executors.get(&kind).cloned()
    }

    /// Dispatches `block`; unknown types fail instead of panicking.
    pub fn execute(&self, block: &RuntimeBlock, context: &mut ExecutionContext) -> ExecutorResult {
        match self.executor_for(&block.block_type) {
            Some(executor) => executor.execute(block, context),
            None => ExecutorResult::failed(format!("Unknown block type: {}", block.block_type)),
        }
    }

    pub fn kinds(&self) -> impl Iterator<Item = BlockKind> + '_ {
        self.executors.keys().copied()
    }
}

/// Collects executors before freezing them into an [`ExecutorFactory`].
#[derive(Default)]
pub struct ExecutorFactoryBuilder {
    executors: HashMap<BlockKind, Arc<dyn BlockExecutor>>,
}

impl ExecutorFactoryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `executor` for `kind`.
    ///
    /// # Panics
    ///
    /// Panics when `kind` already has an executor.
    pub fn register(mut self, kind: BlockKind, executor: impl BlockExecutor + 'static) -> Self {
        let previous = self.executors.insert(kind, Arc::new(executor));
        assert!(previous.is_none(), "executor for '{kind}' registered twice");
        self
    }

    pub fn build(self) -> ExecutorFactory {
        ExecutorFactory { executors: self.executors }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_kind_has_an_executor() {
        let factory = ExecutorFactory::default();
        for kind in BlockKind::ALL {
            assert!(factory.executor_for(kind.as_str()).is_some(), "missing executor for {kind}");
        }
        assert_eq!(factory.kinds().count(), BlockKind::ALL.len());
        assert_eq!(factory.executor_for("SET").map(|executor| executor.name()), Some("Set"));
    }

    #[test]
    fn unknown_types_fail_without_panicking() {
        let factory = ExecutorFactory::default();
        let mut context = ExecutionContext::default();
        assert!(factory.executor_for("chart").is_none());
        let result = factory.execute(&RuntimeBlock::new("chart", ""), &mut context);
        assert_eq!(result.error(), Some("Unknown block type: chart"));
    }

    #[test]
    #[should_panic(expected = "registered twice")]
    fn duplicate_registration_panics() {
        let _ = ExecutorFactory::builder()
            .register(BlockKind::Panel, PanelExecutor)
            .register(BlockKind::Panel, PanelExecutor);
    }

    #[test]
    fn partial_factories_only_know_registered_kinds() {
        let factory = ExecutorFactory::builder().register(BlockKind::Panel, PanelExecutor).build();
        assert!(factory.executor_for("panel").is_some());
        assert!(factory.executor_for("set").is_none());
    }
}
