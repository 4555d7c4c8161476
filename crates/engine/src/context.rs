//! Per-run execution context shared by every executor.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::{Duration, Instant},
};

use folio_types::Section;
use indexmap::IndexMap;
use serde_json::Value;

use crate::{config::RuntimeConfig, state::RuntimeState};

/// Scratch key written by `if` and consumed by the following `else`.
pub const CONDITION_FLAG: &str = "__lastCondition";

/// Cancellation signal shared between a run and its caller.
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_canceled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Deadline plus cancellation bounding one `script` or `sql` block.
#[derive(Debug, Clone)]
pub struct ExecutionBudget {
    deadline: Option<Instant>,
    cancel: CancellationFlag,
}

impl ExecutionBudget {
    /// Budget expiring `timeout` from now. A zero timeout means no deadline.
    pub fn new(timeout: Duration, cancel: CancellationFlag) -> Self {
        let deadline = (!timeout.is_zero()).then(|| Instant::now() + timeout);
        Self { deadline, cancel }
    }

    pub fn unbounded() -> Self {
        Self {
            deadline: None,
            cancel: CancellationFlag::new(),
        }
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhaustion().is_some()
    }

    /// Why the budget ran out, if it has.
    pub fn exhaustion(&self) -> Option<&'static str> {
        if self.cancel.is_canceled() {
            return Some("execution canceled");
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some("execution timed out"),
            _ => None,
        }
    }
}

/// Mutable environment threaded through one document run.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub state: RuntimeState,
    pub current_section: Option<Section>,
    /// Identifiers of the sections entered so far, in order.
    pub history: Vec<String>,
    /// Non-persisted scratch values.
    pub variables: IndexMap<String, Value>,
    cancel: CancellationFlag,
    config: Arc<RuntimeConfig>,
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self::new(RuntimeState::new())
    }
}

impl ExecutionContext {
    pub fn new(state: RuntimeState) -> Self {
        Self {
            state,
            current_section: None,
            history: Vec::new(),
            variables: IndexMap::new(),
            cancel: CancellationFlag::new(),
            config: Arc::new(RuntimeConfig::default()),
        }
    }

    pub fn with_config(mut self, config: Arc<RuntimeConfig>) -> Self {
        self.config = config;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationFlag) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn is_canceled(&self) -> bool {
        self.cancel.is_canceled()
    }

    /// Makes `section` current and records it in the history.
    pub fn enter_section(&mut self, section: &Section) {
        self.history.push(section.id.clone());
        self.current_section = Some(section.clone());
    }

    pub fn current_section_id(&self) -> Option<&str> {
        self.current_section.as_ref().map(|section| section.id.as_str())
    }

    pub fn set_condition_flag(&mut self, value: bool) {
        self.variables.insert(CONDITION_FLAG.to_string(), Value::Bool(value));
    }

    /// Removes and returns the flag left by the preceding `if`.
    pub fn take_condition_flag(&mut self) -> Option<bool> {
        self.variables.shift_remove(CONDITION_FLAG).map(|value| match value {
            Value::Bool(flag) => flag,
            other => !(other.is_null() || other == Value::from(0) || other == Value::from("")),
        })
    }

    pub fn budget(&self, timeout: Duration) -> ExecutionBudget {
        ExecutionBudget::new(timeout, self.cancel.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn condition_flag_is_consumed() {
        let mut context = ExecutionContext::default();
        assert_eq!(context.take_condition_flag(), None);
        context.set_condition_flag(true);
        assert_eq!(context.take_condition_flag(), Some(true));
        assert_eq!(context.take_condition_flag(), None);
    }

    #[test]
    fn budgets_observe_cancellation_and_deadlines() {
        let cancel = CancellationFlag::new();
        let budget = ExecutionBudget::new(Duration::from_secs(60), cancel.clone());
        assert!(!budget.is_exhausted());
        cancel.cancel();
        assert_eq!(budget.exhaustion(), Some("execution canceled"));

        let expired = ExecutionBudget::new(Duration::from_nanos(1), CancellationFlag::new());
        std::thread::sleep(Duration::from_millis(2));
        assert_eq!(expired.exhaustion(), Some("execution timed out"));
        assert!(!ExecutionBudget::unbounded().is_exhausted());
    }

    #[test]
    fn entering_sections_records_history() {
        let mut context = ExecutionContext::default();
        context.enter_section(&Section::new("intro", "Intro", Vec::new()));
        context.enter_section(&Section::new("cave", "Cave", Vec::new()));
        assert_eq!(context.history, vec!["intro", "cave"]);
        assert_eq!(context.current_section_id(), Some("cave"));
    }
}
