use std::{path::Path, process::ExitCode, sync::Arc};

use anyhow::{Context, Result};
use clap::Parser;
use folio_engine::{
    CancellationFlag, DocumentRunRequest, DocumentRuntime, FileSnapshotStore, RunOptions, RuntimeConfig, SnapshotStore, drive_document_run,
    load_document,
};
use folio_types::{DocumentRunControl, DocumentRunEvent, RunReport, RunStatus};
use tokio::sync::mpsc::{UnboundedReceiver, unbounded_channel};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

mod cli;

use cli::{Cli, Command};

#[tokio::main]
async fn main() -> Result<ExitCode> {
    init_tracing();
    match Cli::parse().command {
        Command::Blocks { file } => {
            list_blocks(&file)?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Run {
            file,
            state,
            save,
            section,
            json,
            config,
        } => {
            let config = match config {
                Some(path) => RuntimeConfig::load_from_path(&path)?,
                None => RuntimeConfig::load()?,
            };
            let document = load_document(&file)?;

            let cancel = CancellationFlag::new();
            let mut options = RunOptions::default().with_cancellation(cancel.clone());
            if let Some(section) = section {
                options = options.starting_at(section);
            }
            if let Some(path) = state.as_ref()
                && let Some(snapshot) = FileSnapshotStore::new(path).load()?
            {
                info!(path = %path.display(), keys = snapshot.len(), "restored snapshot");
                options = options.with_snapshot(snapshot);
            }

            let report = run_document(document, options, config, cancel).await?;
            if save {
                let store = FileSnapshotStore::new(Command::save_path(&file, state.as_ref()));
                store
                    .save(&report.final_state)
                    .with_context(|| format!("failed to save snapshot to {}", store.path().display()))?;
                info!(path = %store.path().display(), "saved snapshot");
            }
            print_report(&report, json)?;
            Ok(exit_code(report.status))
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).try_init();
}

async fn run_document(
    document: folio_types::Document,
    options: RunOptions,
    config: RuntimeConfig,
    cancel: CancellationFlag,
) -> Result<RunReport> {
    let (control_tx, control_rx) = unbounded_channel();
    let (event_tx, event_rx) = unbounded_channel();

    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted; canceling run");
            cancel.cancel();
            let _ = control_tx.send(DocumentRunControl::Cancel);
        }
    });
    let events = tokio::spawn(log_events(event_rx));

    let request = DocumentRunRequest { document, options };
    let runtime = Arc::new(DocumentRuntime::with_config(config));
    let report = tokio::spawn(drive_document_run(request, runtime, control_rx, event_tx))
        .await
        .context("document run task failed")??;

    interrupt.abort();
    let _ = events.await;
    Ok(report)
}

async fn log_events(mut event_rx: UnboundedReceiver<DocumentRunEvent>) {
    while let Some(event) = event_rx.recv().await {
        match event {
            DocumentRunEvent::RunStatusChanged { status, message } => debug!(?status, message = message.as_deref(), "run status changed"),
            DocumentRunEvent::BlockFinished {
                section_id,
                index,
                block_type,
                result,
                duration_ms,
            } => {
                for line in &result.logs {
                    info!(section_id = %section_id, index, "{line}");
                }
                debug!(section_id = %section_id, index, block_type = %block_type, outcome = ?result.outcome, duration_ms, "block finished");
            }
            _ => {}
        }
    }
}

fn print_report(report: &RunReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }
    if !report.aggregated_output.is_empty() {
        println!("{}", report.aggregated_output);
    }
    match report.status {
        RunStatus::Errored => eprintln!("error: {}", report.error.as_deref().unwrap_or("run failed")),
        RunStatus::Canceled => eprintln!("canceled"),
        RunStatus::AwaitingInput => match report.next_section.as_deref() {
            Some(section) => eprintln!("awaiting input; continue with --section {section}"),
            None => eprintln!("awaiting input"),
        },
        RunStatus::Completed => {}
    }
    Ok(())
}

fn exit_code(status: RunStatus) -> ExitCode {
    match status {
        RunStatus::Completed | RunStatus::AwaitingInput => ExitCode::SUCCESS,
        RunStatus::Errored => ExitCode::FAILURE,
        RunStatus::Canceled => ExitCode::from(130),
    }
}

fn list_blocks(file: &Path) -> Result<()> {
    let document = load_document(file)?;
    if let Some(title) = document.title() {
        println!("{title}");
    }
    for section in &document.sections {
        let title = if section.title.is_empty() { "(untitled)" } else { section.title.as_str() };
        println!("#{} {}", section.id, title);
        for (index, block) in section.blocks.iter().enumerate() {
            let first_line = block.content.lines().next().unwrap_or_default().trim();
            println!("  [{index}] {:<6} {first_line}", block.block_type);
        }
    }
    Ok(())
}
