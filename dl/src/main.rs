//! DraftLoop - plan, draft, review and revise orchestrator
//!
//! CLI entry point.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{CommandFactory, FromArgMatches};
use colored::Colorize;
use eyre::{Context, Result, eyre};
use serde_json::Value;
use tracing::{debug, info};

use draftloop::cli::{Cli, Command, OutputFormat, novel_profile};
use draftloop::config::Config;
use draftloop::llm::{GenerationClient, OfflineClient, create_client};
use draftloop::orchestrator::Orchestrator;
use draftloop::repl::ReplSession;
use draftloop::snapshot::SessionView;

fn setup_logging(cli_log_level: Option<&str>, config_log_level: Option<&str>) -> Result<()> {
    // Note: Can't log params here since logging isn't initialized yet
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("draftloop")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    // Determine log level with priority: CLI --log-level > config file > default (INFO)
    let level_str = cli_log_level.or(config_log_level);
    let level = if let Some(s) = level_str {
        match s.to_uppercase().as_str() {
            "TRACE" => tracing::Level::TRACE,
            "DEBUG" => tracing::Level::DEBUG,
            "INFO" => tracing::Level::INFO,
            "WARN" | "WARNING" => tracing::Level::WARN,
            "ERROR" => tracing::Level::ERROR,
            _ => {
                eprintln!("Warning: Unknown log-level '{}', defaulting to INFO", s);
                tracing::Level::INFO
            }
        }
    } else {
        tracing::Level::INFO
    };

    let log_file = fs::File::create(log_dir.join("draftloop.log")).context("Failed to create log file")?;

    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_ansi(false)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    info!("Logging initialized (level: {:?})", level);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cmd = Cli::command();
    let cli = Cli::from_arg_matches(&cmd.get_matches())?;

    // Load log level from config file early (before full config load)
    let config_log_level = Config::load_log_level(cli.config.as_ref());
    setup_logging(cli.log_level.as_deref(), config_log_level.as_deref()).context("Failed to setup logging")?;

    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;
    info!(
        sessions_dir = %config.storage.sessions_dir.display(),
        model = %config.llm.model,
        "DraftLoop loaded config"
    );

    let Some(command) = cli.command else {
        debug!("main: no command specified, printing help");
        Cli::command().print_help()?;
        return Ok(());
    };

    let client: Arc<dyn GenerationClient> = if command.needs_llm() {
        config.validate()?;
        create_client(&config).context("Failed to create generation client")?
    } else {
        Arc::new(OfflineClient::new(config.llm.api_key_env.clone()))
    };
    let orchestrator = Arc::new(Orchestrator::open(&config, client).await?);

    let result = match command {
        Command::New {
            topic,
            novel,
            genre,
            style,
            era,
            length,
            title_text,
            notes,
            characters,
        } => {
            debug!(%topic, novel, "main: matched New command");
            let profile = novel_profile(novel, genre, style, era, length, title_text, notes, &characters);
            cmd_new(&orchestrator, &topic, profile).await
        }
        Command::Cmd {
            session,
            command,
            payload,
            wait,
        } => {
            debug!(%session, %command, wait, "main: matched Cmd command");
            cmd_exec(&orchestrator, &session, &command, payload.as_deref(), wait).await
        }
        Command::Show { session, format } => {
            debug!(%session, ?format, "main: matched Show command");
            cmd_show(&orchestrator, &session, format).await
        }
        Command::Sessions { format } => {
            debug!(?format, "main: matched Sessions command");
            cmd_sessions(&orchestrator, format).await
        }
        Command::Chat { session } => {
            debug!(?session, "main: matched Chat command");
            cmd_chat(&orchestrator, session).await
        }
        Command::Recover => {
            debug!("main: matched Recover command");
            cmd_recover(&orchestrator).await
        }
    };

    orchestrator.shutdown().await;
    result
}

/// Create and plan a session
async fn cmd_new(
    orchestrator: &Orchestrator,
    topic: &str,
    profile: Option<draftloop::state::NovelProfile>,
) -> Result<()> {
    debug!(%topic, "cmd_new: called");
    let view = orchestrator.create_session(topic, profile).await?;
    println!("{}", view.render_text());
    println!();
    println!(
        "Next: {} to lock the plan, then {} or {}",
        format!("dl cmd {} confirm", view.session_id).yellow(),
        "next".yellow(),
        "all".yellow()
    );
    Ok(())
}

/// Run one command; a started run is always awaited before exit
async fn cmd_exec(
    orchestrator: &Orchestrator,
    session_id: &str,
    text: &str,
    payload: Option<&str>,
    wait: bool,
) -> Result<()> {
    debug!(%session_id, %text, wait, "cmd_exec: called");
    let payload = match payload {
        Some(raw) => {
            let value: Value = serde_json::from_str(raw).context("--payload is not valid JSON")?;
            if !value.is_object() {
                return Err(eyre!("--payload must be a JSON object"));
            }
            Some(value)
        }
        None => None,
    };

    let view = orchestrator.execute_command(session_id, text, payload).await?;
    print_result(&view);

    if let Some(outcome) = orchestrator.wait_for_run(session_id).await {
        debug!(%session_id, steps = outcome.steps.len(), status = %outcome.status, "cmd_exec: run finished");
        match &outcome.error {
            Some(error) => println!("{} Run ended: {} ({})", "!".bright_red(), outcome.status, error),
            None => println!("Run finished: {} step(s), status {}", outcome.steps.len(), outcome.status),
        }
        if wait {
            let view = orchestrator.view(session_id).await?;
            println!();
            println!("{}", view.render_text());
        }
    }
    Ok(())
}

async fn cmd_show(orchestrator: &Orchestrator, session_id: &str, format: OutputFormat) -> Result<()> {
    debug!(%session_id, ?format, "cmd_show: called");
    let view = orchestrator.view(session_id).await?;
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&view)?),
        OutputFormat::Text => println!("{}", view.render_text()),
    }
    Ok(())
}

async fn cmd_sessions(orchestrator: &Orchestrator, format: OutputFormat) -> Result<()> {
    debug!(?format, "cmd_sessions: called");
    let sessions = orchestrator.list_sessions().await?;
    if format == OutputFormat::Json {
        println!("{}", serde_json::to_string_pretty(&sessions)?);
        return Ok(());
    }
    if sessions.is_empty() {
        println!("{}", "No sessions yet. Create one with `dl new <topic>`.".dimmed());
        return Ok(());
    }
    for s in sessions {
        let lock = if s.plan_locked { "locked" } else { "planning" };
        println!(
            "{}  {:10} {:8} {}/{}  {}",
            s.session_id.bright_cyan(),
            s.status.to_string(),
            lock,
            s.done,
            s.subtasks,
            s.topic
        );
    }
    Ok(())
}

async fn cmd_chat(orchestrator: &Arc<Orchestrator>, session_id: Option<String>) -> Result<()> {
    debug!(?session_id, "cmd_chat: called");
    let session_id = match session_id {
        Some(id) => id,
        None => orchestrator
            .list_sessions()
            .await?
            .into_iter()
            .next()
            .map(|s| s.session_id)
            .ok_or_else(|| eyre!("No sessions yet. Create one with `dl new <topic>`"))?,
    };
    let mut repl = ReplSession::new(orchestrator.clone(), session_id);
    repl.run().await
}

async fn cmd_recover(orchestrator: &Orchestrator) -> Result<()> {
    debug!("cmd_recover: called");
    let recovered = orchestrator.recover_interrupted().await?;
    if recovered.is_empty() {
        println!("No interrupted sessions.");
    } else {
        for session_id in recovered {
            println!("Marked {} as interrupted", session_id.bright_cyan());
        }
    }
    Ok(())
}

fn print_result(view: &SessionView) {
    let result = &view.result;
    if result.ok {
        println!("{} {}", format!("[{}]", view.mode()).bright_blue(), result.message);
    } else {
        println!("{} {}", "!".bright_red(), result.message);
    }
}
