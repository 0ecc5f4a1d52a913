use clap::Parser;
use colored::*;
use eyre::{Context, Result};
use log::info;

use envelopestore::cli::{Cli, Command};
use envelopestore::config::Config;
use envelopestore::schema::{schema_for, validate_value};
use envelopestore::{EventLog, PayloadKind, SnapshotCache};

fn setup_logging() -> Result<()> {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Warn)
        .init();
    Ok(())
}

fn main() -> Result<()> {
    setup_logging().context("Failed to setup logging")?;

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;
    let root = cli.root.clone().unwrap_or(config.sessions_dir.clone());

    info!("es starting (root: {})", root.display());

    match cli.command {
        Command::Tail { session_id, lines } => {
            let log = EventLog::open(&root)?;
            let entries = log.read_all(&session_id)?;
            let skip = lines.map(|n| entries.len().saturating_sub(n)).unwrap_or(0);
            for env in entries.iter().skip(skip) {
                println!(
                    "{} {} {} {} {}",
                    env.timestamp.format("%Y-%m-%d %H:%M:%S").to_string().dimmed(),
                    env.payload_type.to_string().yellow(),
                    format!("{}->{}", env.source, env.target).cyan(),
                    env.subtask_id().unwrap_or("-"),
                    env.payload
                );
            }
        }
        Command::Validate { file } => {
            let content =
                std::fs::read_to_string(&file).context(format!("Failed to read {}", file.display()))?;
            let mut failures = 0usize;
            for (idx, line) in content.lines().enumerate() {
                if line.trim().is_empty() {
                    continue;
                }
                let result = serde_json::from_str::<serde_json::Value>(line)
                    .map_err(|e| e.to_string())
                    .and_then(|v| validate_value(v).map_err(|e| e.to_string()));
                if let Err(e) = result {
                    failures += 1;
                    println!("{} line {}: {}", "✗".red(), idx + 1, e);
                }
            }
            if failures == 0 {
                println!("{} {} is valid", "✓".green(), file.display());
            } else {
                return Err(eyre::eyre!("{} invalid line(s)", failures));
            }
        }
        Command::Kinds => {
            for kind in PayloadKind::ALL {
                let schema = schema_for(kind);
                let required: Vec<_> = schema.fields.iter().filter(|f| f.required).map(|f| f.name).collect();
                println!("{:16} {}", kind.to_string().cyan(), required.join(", "));
            }
        }
        Command::Snapshots => {
            let cache = SnapshotCache::open(&config.snapshot_db)?;
            let rows = cache.list()?;
            if rows.is_empty() {
                println!("No snapshots found");
            }
            for (session_id, updated_at) in rows {
                println!("{} {}", session_id, updated_at.dimmed());
            }
        }
    }

    Ok(())
}
