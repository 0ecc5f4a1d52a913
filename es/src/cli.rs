//! CLI argument parsing for es

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "es")]
#[command(author, version, about = "Inspect draftloop session event logs", long_about = None)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Sessions directory (overrides config)
    #[arg(short, long)]
    pub root: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print a session's envelopes
    Tail {
        /// Session ID
        #[arg(required = true)]
        session_id: String,

        /// Only show the last N envelopes
        #[arg(short = 'n', long)]
        lines: Option<usize>,
    },

    /// Validate every line of a JSONL envelope file
    Validate {
        /// Path to the JSONL file
        #[arg(required = true)]
        file: PathBuf,
    },

    /// List payload kinds and their required fields
    Kinds,

    /// List cached session snapshots
    Snapshots,
}
