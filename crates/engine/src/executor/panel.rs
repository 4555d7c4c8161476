//! `panel` blocks render interpolated prose.

use anyhow::Result;
use folio_types::{ExecutorResult, RuntimeBlock};

use super::BlockExecutor;
use crate::{context::ExecutionContext, resolve::interpolate};

#[derive(Debug, Default)]
pub struct PanelExecutor;

impl BlockExecutor for PanelExecutor {
    fn name(&self) -> &'static str {
        "Panel"
    }

    fn run(&self, block: &RuntimeBlock, context: &mut ExecutionContext) -> Result<ExecutorResult> {
        Ok(ExecutorResult::completed().with_output(interpolate(&block.content, &context.state)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn panel_interpolates_without_side_effects() {
        let mut context = ExecutionContext::default();
        context.state.set("hp", json!(6));
        let before = context.state.snapshot();
        let result = PanelExecutor.execute(&RuntimeBlock::new("panel", "HP left: $hp ($unknown)"), &mut context);
        assert_eq!(result.output.as_deref(), Some("HP left: 6 ($unknown)"));
        assert!(result.state_changes.is_empty());
        assert_eq!(context.state.snapshot(), before);
    }
}
