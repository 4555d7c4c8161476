//! Run reports, lifecycle events, and controls for document executions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map as JsonMap, Value as JsonValue};

use crate::{BlockPayload, ExecutorResult};

/// Terminal status of a document run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Every block ran without error.
    Completed,
    /// A block failed and execution halted.
    Errored,
    /// A navigation or form block produced a result that needs caller input.
    AwaitingInput,
    /// The caller cancelled the run between blocks.
    Canceled,
}

/// One successfully executed block recorded in the run history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockRecord {
    pub section_id: String,
    /// Position of the block within its section.
    pub index: usize,
    pub block_type: String,
    pub result: ExecutorResult,
}

/// Summary returned when a run stops.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub status: RunStatus,
    pub success: bool,
    /// Output of the last block that produced any, else the aggregate.
    pub output: String,
    pub aggregated_output: String,
    /// Section identifiers entered, in order.
    pub executed_sections: Vec<String>,
    pub history: Vec<BlockRecord>,
    pub final_state: JsonMap<String, JsonValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Rows of the last `sql` block, when one ran.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rows: Option<Vec<JsonValue>>,
    /// Navigation or form payload the caller must satisfy before resuming.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending: Option<BlockPayload>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_section: Option<String>,
}

/// Lifecycle event emitted by the asynchronous run driver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DocumentRunEvent {
    RunStarted {
        at: DateTime<Utc>,
    },
    RunStatusChanged {
        status: DocumentRunPhase,
        #[serde(default)]
        message: Option<String>,
    },
    BlockStarted {
        section_id: String,
        index: usize,
        block_type: String,
        started_at: DateTime<Utc>,
    },
    BlockFinished {
        section_id: String,
        index: usize,
        block_type: String,
        result: ExecutorResult,
        duration_ms: u64,
    },
    RunCompleted {
        report: Box<RunReport>,
        finished_at: DateTime<Utc>,
    },
}

/// Intermediate phase reported while a run is in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentRunPhase {
    Running,
    Paused,
    CancelRequested,
}

/// Control command accepted by the asynchronous run driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentRunControl {
    Pause,
    Resume,
    Cancel,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_status_uses_snake_case() {
        let json = serde_json::to_value(RunStatus::AwaitingInput).expect("serialize status");
        assert_eq!(json, "awaiting_input");
    }

    #[test]
    fn events_are_tagged() {
        let event = DocumentRunEvent::RunStatusChanged {
            status: DocumentRunPhase::Paused,
            message: None,
        };
        let json = serde_json::to_value(&event).expect("serialize event");
        assert_eq!(json["event"], "run_status_changed");
        assert_eq!(json["status"], "paused");
    }
}
