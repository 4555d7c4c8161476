//! Block executors: one strategy per block kind, all returning [`ExecutorResult`].
//!
//! - [`BlockExecutor`] is the seam every block kind implements
//! - Executors do their work in a fallible `run`; the provided `execute` turns any
//!   error into a failed result so nothing escapes the executor boundary
//! - [`ExecutorFactory`] maps block type tags to executors

use anyhow::Result;
use folio_types::{ExecutorResult, RuntimeBlock};
use tracing::warn;

use crate::context::ExecutionContext;

pub mod conditional;
pub mod factory;
pub mod form;
pub mod map;
pub mod navigation;
pub mod panel;
pub mod render;
pub mod script;
pub mod set;
pub mod sql;
pub mod state;
mod syntax;

pub use conditional::{ElseExecutor, IfExecutor};
pub use factory::{ExecutorFactory, ExecutorFactoryBuilder};
pub use form::FormExecutor;
pub use map::MapExecutor;
pub use navigation::NavigationExecutor;
pub use panel::PanelExecutor;
pub use script::ScriptExecutor;
pub use set::SetExecutor;
pub use sql::SqlExecutor;
pub use state::StateExecutor;

/// Executes one kind of block against the run context.
pub trait BlockExecutor: Send + Sync {
    /// Display name used to prefix error messages (`"Set error: ..."`).
    fn name(&self) -> &'static str;

    /// Performs the block's work. Errors are reported through [`BlockExecutor::execute`].
    fn run(&self, block: &RuntimeBlock, context: &mut ExecutionContext) -> Result<ExecutorResult>;

    /// Runs the block, converting any error into a failed result.
    fn execute(&self, block: &RuntimeBlock, context: &mut ExecutionContext) -> ExecutorResult {
        match self.run(block, context) {
            Ok(result) => result,
            Err(error) => {
                warn!(block_type = %block.block_type, error = %format!("{error:#}"), "block execution failed");
                ExecutorResult::failed(format!("{} error: {error:#}", self.name()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::bail;

    struct Exploding;

    impl BlockExecutor for Exploding {
        fn name(&self) -> &'static str {
            "Exploding"
        }

        fn run(&self, _block: &RuntimeBlock, _context: &mut ExecutionContext) -> Result<ExecutorResult> {
            bail!("boom")
        }
    }

    #[test]
    fn errors_become_failed_results() {
        let mut context = ExecutionContext::default();
        let result = Exploding.execute(&RuntimeBlock::new("exploding", ""), &mut context);
        assert_eq!(result.error(), Some("Exploding error: boom"));
    }
}
