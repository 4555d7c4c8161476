//! # Document runtime
//!
//! Runs a parsed [`Document`] block by block against one [`ExecutionContext`]:
//!
//! - skipped blocks leave no trace
//! - a failed block halts the run; earlier state mutations are kept
//! - a navigation or form result halts with [`RunStatus::AwaitingInput`] so the
//!   caller can collect input and resume at the chosen section
//!
//! [`DocumentRuntime::run`] is the synchronous entry point. [`drive_document_run`]
//! wraps the same loop in a cooperative task that streams [`DocumentRunEvent`]s and
//! honours pause, resume, and cancel controls between blocks.

use std::{sync::Arc, time::Instant};

use anyhow::{Result, anyhow};
use chrono::Utc;
use folio_types::{
    BlockPayload, BlockRecord, Document, DocumentRunControl, DocumentRunEvent, DocumentRunPhase, ExecutorResult, RunReport, RunStatus,
    RuntimeBlock, Section,
};
use serde_json::Value;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, error::TryRecvError};
use tracing::{debug, info, warn};

use crate::{
    config::RuntimeConfig,
    context::{CancellationFlag, ExecutionContext},
    executor::ExecutorFactory,
    state::{RuntimeState, StateSnapshot},
};

/// Where a run starts and what state it starts from.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Section to start at; the first section when absent.
    pub start_section: Option<String>,
    /// State restored before the first block runs.
    pub snapshot: Option<StateSnapshot>,
    /// Shared with the caller to stop the run between blocks or inside budgets.
    pub cancel: CancellationFlag,
}

impl RunOptions {
    pub fn starting_at(mut self, section_id: impl Into<String>) -> Self {
        self.start_section = Some(section_id.into());
        self
    }

    pub fn with_snapshot(mut self, snapshot: StateSnapshot) -> Self {
        self.snapshot = Some(snapshot);
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationFlag) -> Self {
        self.cancel = cancel;
        self
    }
}

/// Executes documents with a fixed executor set and configuration.
#[derive(Debug, Clone, Default)]
pub struct DocumentRuntime {
    factory: Arc<ExecutorFactory>,
    config: Arc<RuntimeConfig>,
}

impl DocumentRuntime {
    pub fn new(factory: Arc<ExecutorFactory>, config: Arc<RuntimeConfig>) -> Self {
        Self { factory, config }
    }

    pub fn with_config(config: RuntimeConfig) -> Self {
        Self::new(Arc::new(ExecutorFactory::default()), Arc::new(config))
    }

    /// Runs `document` to completion, failure, cancellation, or a pending input.
    pub fn run(&self, document: &Document, options: RunOptions) -> RunReport {
        let mut run = match DocumentRun::start(self, document, options) {
            Ok(run) => run,
            Err(report) => return *report,
        };
        while let Some((section, index, block)) = run.next_block() {
            if run.context.is_canceled() {
                return run.finish(RunStatus::Canceled);
            }
            let result = self.factory.execute(block, &mut run.context);
            if let Some(status) = run.record(section, index, block, result) {
                return run.finish(status);
            }
        }
        run.finish(RunStatus::Completed)
    }
}

/// In-flight bookkeeping shared by the synchronous and asynchronous drivers.
struct DocumentRun<'a> {
    separator: String,
    sections: &'a [Section],
    section_index: usize,
    block_index: usize,
    entered: bool,
    context: ExecutionContext,
    executed_sections: Vec<String>,
    outputs: Vec<String>,
    last_output: Option<String>,
    history: Vec<BlockRecord>,
    rows: Option<Vec<Value>>,
    pending: Option<BlockPayload>,
    next_section: Option<String>,
    error: Option<String>,
}

impl<'a> DocumentRun<'a> {
    fn start(runtime: &DocumentRuntime, document: &'a Document, options: RunOptions) -> Result<Self, Box<RunReport>> {
        let state = options.snapshot.map(RuntimeState::from_snapshot).unwrap_or_default();
        let context = ExecutionContext::new(state)
            .with_config(Arc::clone(&runtime.config))
            .with_cancellation(options.cancel);

        let start = match options.start_section.as_deref() {
            None => 0,
            Some(id) => match document.sections.iter().position(|section| section.id == id) {
                Some(position) => position,
                None => {
                    warn!(section_id = %id, "start section not found");
                    return Err(Box::new(RunReport {
                        status: RunStatus::Errored,
                        success: false,
                        output: String::new(),
                        aggregated_output: String::new(),
                        executed_sections: Vec::new(),
                        history: Vec::new(),
                        final_state: context.state.snapshot(),
                        error: Some(format!("Unknown section: {id}")),
                        rows: None,
                        pending: None,
                        next_section: None,
                    }));
                }
            },
        };

        info!(
            title = document.title().unwrap_or("untitled"),
            sections = document.sections.len() - start,
            blocks = document.block_count(),
            "document run started"
        );
        Ok(Self {
            separator: runtime.config.output.separator.clone(),
            sections: &document.sections[start..],
            section_index: 0,
            block_index: 0,
            entered: false,
            context,
            executed_sections: Vec::new(),
            outputs: Vec::new(),
            last_output: None,
            history: Vec::new(),
            rows: None,
            pending: None,
            next_section: None,
            error: None,
        })
    }

    /// Advances to the next block, entering sections along the way.
    fn next_block(&mut self) -> Option<(&'a Section, usize, &'a RuntimeBlock)> {
        loop {
            let section = self.sections.get(self.section_index)?;
            if !self.entered {
                self.entered = true;
                self.context.enter_section(section);
                self.executed_sections.push(section.id.clone());
                debug!(section_id = %section.id, blocks = section.blocks.len(), "entered section");
            }
            if let Some(block) = section.blocks.get(self.block_index) {
                let index = self.block_index;
                self.block_index += 1;
                return Some((section, index, block));
            }
            self.section_index += 1;
            self.block_index = 0;
            self.entered = false;
        }
    }

    /// Applies one result. Returns the terminal status when the run must stop.
    fn record(&mut self, section: &Section, index: usize, block: &RuntimeBlock, result: ExecutorResult) -> Option<RunStatus> {
        if result.skip() {
            debug!(section_id = %section.id, index, block_type = %block.block_type, "block skipped");
            return None;
        }
        if let Some(error) = result.error() {
            warn!(section_id = %section.id, index, block_type = %block.block_type, error = %error, "block failed; halting run");
            self.error = Some(error.to_string());
            return Some(RunStatus::Errored);
        }

        debug!(
            section_id = %section.id,
            index,
            block_type = %block.block_type,
            changes = result.state_changes.len(),
            "block completed"
        );
        self.context.state.apply_changes(&result.state_changes);
        if let Some(output) = result.output.as_ref().filter(|output| !output.is_empty()) {
            self.outputs.push(output.clone());
            self.last_output = Some(output.clone());
        }
        if let Some(rows) = result.rows() {
            self.rows = Some(rows.to_vec());
        }
        if result.next_section.is_some() {
            self.next_section = result.next_section.clone();
        }
        let awaits_input = result.awaits_input();
        if awaits_input {
            self.pending = Some(result.payload.clone());
        }
        self.history.push(BlockRecord {
            section_id: section.id.clone(),
            index,
            block_type: block.block_type.clone(),
            result,
        });
        awaits_input.then_some(RunStatus::AwaitingInput)
    }

    fn finish(self, status: RunStatus) -> RunReport {
        let aggregated_output = self.outputs.join(&self.separator);
        let error = match status {
            RunStatus::Canceled => self.error.or_else(|| Some("run canceled".to_string())),
            _ => self.error,
        };
        info!(status = ?status, blocks = self.history.len(), sections = self.executed_sections.len(), "document run finished");
        RunReport {
            status,
            success: matches!(status, RunStatus::Completed | RunStatus::AwaitingInput),
            output: self.last_output.unwrap_or_else(|| aggregated_output.clone()),
            aggregated_output,
            executed_sections: self.executed_sections,
            history: self.history,
            final_state: self.context.state.snapshot(),
            error,
            rows: self.rows,
            pending: self.pending,
            next_section: self.next_section,
        }
    }
}

/// A document plus the options for one asynchronous run.
#[derive(Debug, Clone)]
pub struct DocumentRunRequest {
    pub document: Document,
    pub options: RunOptions,
}

/// Drives a document run to completion while emitting lifecycle events.
///
/// Controls are read between blocks. `Cancel` also trips the run's
/// [`CancellationFlag`], so a script or query already in flight stops at its next
/// budget check.
pub async fn drive_document_run(
    request: DocumentRunRequest,
    runtime: Arc<DocumentRuntime>,
    mut control_rx: UnboundedReceiver<DocumentRunControl>,
    event_tx: UnboundedSender<DocumentRunEvent>,
) -> Result<RunReport> {
    let DocumentRunRequest { document, options } = request;
    let cancel = options.cancel.clone();
    let _ = event_tx.send(DocumentRunEvent::RunStarted { at: Utc::now() });

    let mut run = match DocumentRun::start(&runtime, &document, options) {
        Ok(run) => run,
        Err(report) => {
            let _ = event_tx.send(DocumentRunEvent::RunCompleted {
                report: report.clone(),
                finished_at: Utc::now(),
            });
            return Ok(*report);
        }
    };

    let mut control_state = ControlState::new(cancel);
    control_state.emit_status(&event_tx, DocumentRunPhase::Running, None)?;

    let mut status = RunStatus::Completed;
    while let Some((section, index, block)) = run.next_block() {
        drain_pending_commands(&mut control_state, &mut control_rx, &event_tx)?;
        if control_state.paused {
            wait_for_resume(&mut control_state, &mut control_rx, &event_tx).await?;
        }
        if control_state.cancel_requested || run.context.is_canceled() {
            status = RunStatus::Canceled;
            break;
        }

        let _ = event_tx.send(DocumentRunEvent::BlockStarted {
            section_id: section.id.clone(),
            index,
            block_type: block.block_type.clone(),
            started_at: Utc::now(),
        });
        let started_at = Instant::now();
        let result = runtime.factory.execute(block, &mut run.context);
        let duration_ms = started_at.elapsed().as_millis().try_into().unwrap_or(u64::MAX);
        event_tx
            .send(DocumentRunEvent::BlockFinished {
                section_id: section.id.clone(),
                index,
                block_type: block.block_type.clone(),
                result: result.clone(),
                duration_ms,
            })
            .map_err(|error| anyhow!("failed to emit block finished event: {error}"))?;

        if let Some(terminal) = run.record(section, index, block, result) {
            status = terminal;
            break;
        }
        tokio::task::yield_now().await;
    }

    let report = run.finish(status);
    let _ = event_tx.send(DocumentRunEvent::RunCompleted {
        report: Box::new(report.clone()),
        finished_at: Utc::now(),
    });
    Ok(report)
}

fn drain_pending_commands(
    control_state: &mut ControlState,
    control_rx: &mut UnboundedReceiver<DocumentRunControl>,
    event_tx: &UnboundedSender<DocumentRunEvent>,
) -> Result<()> {
    loop {
        match control_rx.try_recv() {
            Ok(command) => control_state.process_command(command, event_tx)?,
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => break,
        }
    }
    Ok(())
}

async fn wait_for_resume(
    control_state: &mut ControlState,
    control_rx: &mut UnboundedReceiver<DocumentRunControl>,
    event_tx: &UnboundedSender<DocumentRunEvent>,
) -> Result<()> {
    while control_state.paused && !control_state.cancel_requested {
        match control_rx.recv().await {
            Some(command) => control_state.process_command(command, event_tx)?,
            None => break,
        }
    }
    Ok(())
}

struct ControlState {
    paused: bool,
    cancel_requested: bool,
    cancel: CancellationFlag,
}

impl ControlState {
    fn new(cancel: CancellationFlag) -> Self {
        Self {
            paused: false,
            cancel_requested: false,
            cancel,
        }
    }

    fn process_command(&mut self, command: DocumentRunControl, event_tx: &UnboundedSender<DocumentRunEvent>) -> Result<()> {
        match command {
            DocumentRunControl::Pause => {
                if !self.paused && !self.cancel_requested {
                    self.paused = true;
                    self.emit_status(event_tx, DocumentRunPhase::Paused, None)?;
                }
            }
            DocumentRunControl::Resume => {
                if self.paused {
                    self.paused = false;
                    self.emit_status(event_tx, DocumentRunPhase::Running, None)?;
                }
            }
            DocumentRunControl::Cancel => {
                if !self.cancel_requested {
                    self.cancel_requested = true;
                    self.paused = false;
                    self.cancel.cancel();
                    self.emit_status(event_tx, DocumentRunPhase::CancelRequested, Some("stopping after the current block".to_string()))?;
                }
            }
        }
        Ok(())
    }

    fn emit_status(&self, event_tx: &UnboundedSender<DocumentRunEvent>, status: DocumentRunPhase, message: Option<String>) -> Result<()> {
        event_tx
            .send(DocumentRunEvent::RunStatusChanged { status, message })
            .map_err(|error| anyhow!("failed to emit run status change: {error}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::sync::mpsc::unbounded_channel;

    fn block(kind: &str, content: &str) -> RuntimeBlock {
        RuntimeBlock::new(kind, content)
    }

    fn hp_document() -> Document {
        Document::new(vec![
            Section::new("start", "Start", vec![block("state", "$hp = 10")]),
            Section::new("fight", "Fight", vec![block("set", "dec $hp 4")]),
            Section::new("after", "After", vec![block("panel", "HP left: $hp")]),
        ])
    }

    #[test]
    fn runs_sections_in_order() {
        let report = DocumentRuntime::default().run(&hp_document(), RunOptions::default());
        assert_eq!(report.status, RunStatus::Completed);
        assert!(report.success);
        assert_eq!(report.final_state.get("hp"), Some(&json!(6)));
        assert_eq!(report.output, "HP left: 6");
        assert_eq!(report.executed_sections, vec!["start", "fight", "after"]);
        assert_eq!(report.history.len(), 3);
        assert_eq!(report.history[1].block_type, "set");
    }

    #[test]
    fn skipped_blocks_are_not_recorded() {
        let document = Document::new(vec![Section::new(
            "only",
            "Only",
            vec![block("if", "false"), block("panel", "a"), block("else", "b")],
        )]);
        let report = DocumentRuntime::default().run(&document, RunOptions::default());
        assert_eq!(report.history.len(), 2);
        assert_eq!(report.aggregated_output, "a\nb");
        assert_eq!(report.output, "b");
    }

    #[test]
    fn failures_halt_and_keep_prior_state() {
        let document = Document::new(vec![Section::new(
            "only",
            "Only",
            vec![block("set", "set $gold = 3"), block("chart", "x"), block("set", "set $gold = 9")],
        )]);
        let report = DocumentRuntime::default().run(&document, RunOptions::default());
        assert_eq!(report.status, RunStatus::Errored);
        assert!(!report.success);
        assert_eq!(report.error.as_deref(), Some("Unknown block type: chart"));
        assert_eq!(report.final_state.get("gold"), Some(&json!(3)));
        assert_eq!(report.history.len(), 1);
    }

    #[test]
    fn rewritten_paths_keep_their_last_value() {
        let document = Document::new(vec![Section::new(
            "only",
            "Only",
            vec![block("set", "set $a.b = 1\nset $a = 5\nset $a.b = 2")],
        )]);
        let report = DocumentRuntime::default().run(&document, RunOptions::default());
        assert_eq!(report.status, RunStatus::Completed);
        assert_eq!(report.final_state.get("a"), Some(&json!({"b": 2})));
    }

    #[test]
    fn navigation_awaits_input() {
        let document = Document::new(vec![
            Section::new("hall", "Hall", vec![block("nav", "choice: Open the door\n  target: vault"), block("panel", "never")]),
            Section::new("vault", "Vault", vec![block("panel", "Gold!")]),
        ]);
        let runtime = DocumentRuntime::default();
        let report = runtime.run(&document, RunOptions::default());
        assert_eq!(report.status, RunStatus::AwaitingInput);
        assert!(report.success);
        assert_eq!(report.next_section.as_deref(), Some("vault"));
        assert!(matches!(report.pending, Some(BlockPayload::Navigation { .. })));

        let resumed = runtime.run(
            &document,
            RunOptions::default().starting_at("vault").with_snapshot(report.final_state.clone()),
        );
        assert_eq!(resumed.output, "Gold!");
        assert_eq!(resumed.executed_sections, vec!["vault"]);
    }

    #[test]
    fn snapshots_seed_state_and_unknown_sections_error() {
        let mut snapshot = StateSnapshot::new();
        snapshot.insert("hp".into(), json!(2));
        let report = DocumentRuntime::default().run(&hp_document(), RunOptions::default().with_snapshot(snapshot));
        assert_eq!(report.final_state.get("hp"), Some(&json!(-2)));

        let report = DocumentRuntime::default().run(&hp_document(), RunOptions::default().starting_at("nowhere"));
        assert_eq!(report.status, RunStatus::Errored);
        assert_eq!(report.error.as_deref(), Some("Unknown section: nowhere"));
    }

    #[test]
    fn canceled_runs_stop_before_the_next_block() {
        let cancel = CancellationFlag::new();
        cancel.cancel();
        let report = DocumentRuntime::default().run(&hp_document(), RunOptions::default().with_cancellation(cancel));
        assert_eq!(report.status, RunStatus::Canceled);
        assert!(report.history.is_empty());
    }

    #[test]
    fn sql_rows_surface_in_the_report() {
        let document = Document::new(vec![Section::new("q", "Q", vec![block("sql", "query = SELECT 1 AS one")])]);
        let report = DocumentRuntime::default().run(&document, RunOptions::default());
        if cfg!(feature = "sqlite") {
            assert_eq!(report.rows, Some(vec![json!({"one": 1})]));
            assert_eq!(report.output, "1 row(s)");
        } else {
            assert_eq!(report.status, RunStatus::Errored);
        }
    }

    #[tokio::test]
    async fn driver_emits_lifecycle_events() {
        let (control_tx, control_rx) = unbounded_channel();
        let (event_tx, mut event_rx) = unbounded_channel();
        let request = DocumentRunRequest {
            document: hp_document(),
            options: RunOptions::default(),
        };
        let report = drive_document_run(request, Arc::new(DocumentRuntime::default()), control_rx, event_tx)
            .await
            .expect("drive document run");
        drop(control_tx);
        assert_eq!(report.output, "HP left: 6");

        let mut started = 0;
        let mut finished = 0;
        let mut completed = false;
        while let Ok(event) = event_rx.try_recv() {
            match event {
                DocumentRunEvent::BlockStarted { .. } => started += 1,
                DocumentRunEvent::BlockFinished { .. } => finished += 1,
                DocumentRunEvent::RunCompleted { report, .. } => completed = report.status == RunStatus::Completed,
                _ => {}
            }
        }
        assert_eq!((started, finished), (3, 3));
        assert!(completed);
    }

    #[tokio::test]
    async fn driver_honours_cancel() {
        let (control_tx, control_rx) = unbounded_channel();
        let (event_tx, mut event_rx) = unbounded_channel();
        control_tx.send(DocumentRunControl::Pause).expect("send pause");
        control_tx.send(DocumentRunControl::Cancel).expect("send cancel");
        let cancel = CancellationFlag::new();
        let request = DocumentRunRequest {
            document: hp_document(),
            options: RunOptions::default().with_cancellation(cancel.clone()),
        };
        let report = drive_document_run(request, Arc::new(DocumentRuntime::default()), control_rx, event_tx)
            .await
            .expect("drive document run");
        assert_eq!(report.status, RunStatus::Canceled);
        assert!(report.history.is_empty());
        assert!(cancel.is_canceled());

        let mut phases = Vec::new();
        while let Ok(event) = event_rx.try_recv() {
            if let DocumentRunEvent::RunStatusChanged { status, .. } = event {
                phases.push(status);
            }
        }
        assert_eq!(
            phases,
            vec![DocumentRunPhase::Running, DocumentRunPhase::Paused, DocumentRunPhase::CancelRequested]
        );
    }
}
