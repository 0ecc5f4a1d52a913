use clap::Parser;
use colored::*;
use eyre::{Context, Result};
use log::info;

use artifactstore::ArtifactStore;
use artifactstore::cli::{Cli, Command};
use artifactstore::config::Config;

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

    info!("afs starting (root: {})", root.display());
    let store = ArtifactStore::open(&root).context("Failed to open artifact store")?;

    match cli.command {
        Command::Sessions => {
            let latest = store.latest_session()?;
            let sessions = store.list_sessions()?;
            if sessions.is_empty() {
                println!("No sessions found");
            }
            for id in sessions {
                if latest.as_deref() == Some(id.as_str()) {
                    println!("{} {}", id.cyan(), "(latest)".green());
                } else {
                    println!("{}", id);
                }
            }
        }
        Command::Ls { session_id } => {
            let session_id = match session_id {
                Some(id) => id,
                None => store
                    .latest_session()?
                    .ok_or_else(|| eyre::eyre!("No sessions registered"))?,
            };
            let names = store.list_artifacts(&session_id)?;
            println!("{} {} artifact(s)", session_id.cyan(), names.len());
            for name in names {
                println!("  {}/artifacts/{}", session_id, name);
            }
        }
        Command::Cat {
            session_id,
            file,
            max,
            preview,
        } => {
            let path = format!("{}/artifacts/{}", session_id, file);
            let limit = max.or(preview.then_some(config.preview_chars));
            let content = store
                .read_path(&path, limit)
                .context(format!("Failed to read {}", path))?;
            println!("{}", content);
        }
    }

    Ok(())
}
