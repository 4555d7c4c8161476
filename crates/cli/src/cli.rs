use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Run interactive markdown documents.
#[derive(Parser, Debug)]
#[command(name = "folio", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Execute a document and print its output
    Run {
        /// Path to the markdown document
        file: PathBuf,

        /// Snapshot file to restore state from
        #[arg(long)]
        state: Option<PathBuf>,

        /// Persist the final state (to --state, or next to the document)
        #[arg(long)]
        save: bool,

        /// Section id to start at
        #[arg(long)]
        section: Option<String>,

        /// Print the full run report as JSON
        #[arg(long)]
        json: bool,

        /// Runtime configuration file
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// List a document's sections and blocks
    Blocks {
        /// Path to the markdown document
        file: PathBuf,
    },
}

impl Command {
    /// Snapshot path used by `run --save`.
    pub fn save_path(file: &std::path::Path, state: Option<&PathBuf>) -> PathBuf {
        match state {
            Some(path) => path.clone(),
            None => file.with_extension("state.json"),
        }
    }
}
