//! CLI argument parsing for afs

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "afs")]
#[command(author, version, about = "Browse draftloop session artifacts", long_about = None)]
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
    /// List registered sessions, newest first
    Sessions,

    /// List artifacts of a session (defaults to the latest)
    Ls {
        /// Session ID
        session_id: Option<String>,
    },

    /// Print one artifact of a session
    Cat {
        /// Session ID
        #[arg(required = true)]
        session_id: String,

        /// Artifact file name as shown by `ls`, e.g. <id>.md
        #[arg(required = true)]
        file: String,

        /// Truncate to N characters
        #[arg(short, long)]
        max: Option<usize>,

        /// Truncate to the configured preview length
        #[arg(short, long)]
        preview: bool,
    },
}
