//! Interactive session
//!
//! Reads lines with rustyline. A few slash commands are handled locally;
//! everything else, slash-prefixed or not, goes through the orchestrator
//! exactly like `dl cmd`.

use std::sync::Arc;

use colored::Colorize;
use eyre::Result;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use tracing::debug;

use crate::orchestrator::Orchestrator;
use crate::snapshot::SessionView;

/// Interactive REPL bound to one session
pub struct ReplSession {
    orchestrator: Arc<Orchestrator>,
    session_id: String,
}

enum SlashResult {
    Continue,
    Quit,
    /// Not a local command; send it to the orchestrator
    Forward,
}

impl ReplSession {
    pub fn new(orchestrator: Arc<Orchestrator>, session_id: impl Into<String>) -> Self {
        Self {
            orchestrator,
            session_id: session_id.into(),
        }
    }

    /// Run the REPL main loop
    pub async fn run(&mut self) -> Result<()> {
        debug!(session_id = %self.session_id, "ReplSession::run: called");
        self.print_welcome();
        let view = self.orchestrator.view(&self.session_id).await?;
        println!("{}", view.render_text());
        println!();

        let mut rl = DefaultEditor::new().map_err(|e| eyre::eyre!("Failed to initialize readline: {}", e))?;

        loop {
            let readline = rl.readline(&format!("{} ", ">".bright_green()));

            match readline {
                Ok(line) => {
                    let input = line.trim();
                    if input.is_empty() {
                        continue;
                    }
                    let _ = rl.add_history_entry(input);

                    if input.starts_with('/') {
                        match self.handle_slash_command(input).await {
                            SlashResult::Continue => continue,
                            SlashResult::Quit => break,
                            SlashResult::Forward => {}
                        }
                    }
                    if let Err(e) = self.process_user_input(input).await {
                        println!("{} {:#}", "error:".bright_red(), e);
                    }
                }
                Err(ReadlineError::Interrupted) => {
                    println!("^C");
                    continue;
                }
                Err(ReadlineError::Eof) => {
                    println!();
                    break;
                }
                Err(err) => {
                    return Err(eyre::eyre!("Readline error: {}", err));
                }
            }
        }

        if self.orchestrator.has_active_run(&self.session_id) {
            println!("{}", "Waiting for the current run to finish...".dimmed());
            self.orchestrator.wait_for_run(&self.session_id).await;
        }
        println!("Goodbye!");
        Ok(())
    }

    fn print_welcome(&self) {
        println!();
        println!("{}", "DraftLoop Interactive Session".bright_cyan().bold());
        println!("Session: {}", self.session_id);
        println!("Type {} for help, {} to quit", "/help".yellow(), "/quit".yellow());
        println!();
    }

    async fn handle_slash_command(&mut self, input: &str) -> SlashResult {
        let cmd = input.split_whitespace().next().unwrap_or("");

        match cmd {
            "/help" | "/h" => {
                self.print_help();
                SlashResult::Continue
            }
            "/quit" | "/q" | "/exit" => SlashResult::Quit,
            "/show" | "/s" => {
                match self.orchestrator.view(&self.session_id).await {
                    Ok(view) => println!("{}", view.render_text()),
                    Err(e) => println!("{} {:#}", "error:".bright_red(), e),
                }
                SlashResult::Continue
            }
            "/wait" => {
                if self.orchestrator.wait_for_run(&self.session_id).await.is_none() {
                    println!("{}", "No run in progress.".dimmed());
                }
                match self.orchestrator.view(&self.session_id).await {
                    Ok(view) => println!("{}", view.render_text()),
                    Err(e) => println!("{} {:#}", "error:".bright_red(), e),
                }
                SlashResult::Continue
            }
            "/history" => {
                match self.orchestrator.view(&self.session_id).await {
                    Ok(view) => print_history(&view),
                    Err(e) => println!("{} {:#}", "error:".bright_red(), e),
                }
                SlashResult::Continue
            }
            _ => SlashResult::Forward,
        }
    }

    fn print_help(&self) {
        println!();
        println!("{}", "Session Commands:".bright_cyan());
        println!("  {:22} Show this help", "/help".yellow());
        println!("  {:22} Exit (waits for a running pipeline)", "/quit".yellow());
        println!("  {:22} Show the session view", "/show".yellow());
        println!("  {:22} Wait for the current run, then show", "/wait".yellow());
        println!("  {:22} Show the chat history", "/history".yellow());
        println!();
        println!("{}", "Orchestrator Commands:".bright_cyan());
        println!("  {:22} Show the plan", "plan".yellow());
        println!("  {:22} Lock the plan and start execution", "confirm".yellow());
        println!("  {:22} Process the next subtask", "next".yellow());
        println!("  {:22} Process every pending subtask", "all".yellow());
        println!("  {:22} Ask the coordinator", "ask <question>".yellow());
        println!("  {:22} Move the cursor", "set_current <id>".yellow());
        println!("  {:22} Insert a subtask (planning)", "insert <title>".yellow());
        println!("  {:22} Append a subtask (planning)", "append <title>".yellow());
        println!("  {:22} Skip a subtask (planning)", "skip <id>".yellow());
        println!("  {:22} Adopt the reviewer's rewrite", "apply_revision <id>".yellow());
        println!();
        println!("Anything else is sent to the coordinator as free text.");
        println!();
    }

    async fn process_user_input(&mut self, input: &str) -> Result<()> {
        debug!(session_id = %self.session_id, %input, "process_user_input: called");
        let view = self.orchestrator.execute_command(&self.session_id, input, None).await?;
        print_result(&view);
        if self.orchestrator.has_active_run(&self.session_id) {
            println!("{}", "Run started in the background; /show for progress, /wait to block.".dimmed());
        }
        Ok(())
    }
}

fn print_result(view: &SessionView) {
    let result = &view.result;
    if result.message.is_empty() {
        return;
    }
    if result.ok {
        println!("{} {}", format!("[{}]", view.mode()).bright_blue(), result.message);
    } else {
        println!("{} {}", "!".bright_red(), result.message);
    }
}

fn print_history(view: &SessionView) {
    if view.chat_history.is_empty() {
        println!("{}", "No chat history.".dimmed());
        return;
    }
    println!();
    println!("{}", "Chat History:".bright_cyan());
    for entry in &view.chat_history {
        let preview: String = entry.text.chars().take(120).collect();
        println!(
            "  {} {}: {}",
            entry.timestamp.format("%H:%M:%S").to_string().dimmed(),
            entry.role.bright_green(),
            preview
        );
    }
    println!();
}
