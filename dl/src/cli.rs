//! CLI argument parsing

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::debug;

use crate::state::NovelProfile;

#[derive(Parser)]
#[command(
    name = "dl",
    about = "Plan, draft, review and revise long-form documents with LLM roles",
    version = env!("GIT_DESCRIBE")
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Create a session and plan it
    New {
        /// What the document is about
        topic: String,

        /// Enable novel mode (setup subtasks, rolling summaries, chapter expansion)
        #[arg(long)]
        novel: bool,

        /// Novel genre
        #[arg(long)]
        genre: Option<String>,

        /// Novel prose style
        #[arg(long)]
        style: Option<String>,

        /// Novel era or setting period
        #[arg(long)]
        era: Option<String>,

        /// Target length, e.g. "novella" or "80k words"
        #[arg(long)]
        length: Option<String>,

        /// Working title
        #[arg(long)]
        title_text: Option<String>,

        /// Free-form notes for the planner
        #[arg(long)]
        notes: Option<String>,

        /// Character as NAME or NAME:ROLE (repeatable)
        #[arg(long = "character")]
        characters: Vec<String>,
    },

    /// Run one command against a session (next, all, insert, ask, ...)
    Cmd {
        /// Session id
        session: String,

        /// Command text, e.g. "next" or "ask why is t3 slow?"
        command: String,

        /// JSON object with structured arguments
        #[arg(short, long)]
        payload: Option<String>,

        /// Print the view again once a started run finishes
        #[arg(short, long)]
        wait: bool,
    },

    /// Show a session view
    Show {
        /// Session id
        session: String,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// List known sessions, newest first
    Sessions {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// Interactive session (attaches to the newest session when no id is given)
    Chat {
        /// Session id to attach to
        session: Option<String>,
    },

    /// Mark sessions left running by a dead process as failed
    Recover,
}

impl Command {
    /// Whether the command needs a live generation client
    pub fn needs_llm(&self) -> bool {
        matches!(self, Command::New { .. } | Command::Cmd { .. } | Command::Chat { .. })
    }
}

/// Build a novel profile from `dl new` flags, `None` unless `--novel` is set
#[allow(clippy::too_many_arguments)]
pub fn novel_profile(
    novel: bool,
    genre: Option<String>,
    style: Option<String>,
    era: Option<String>,
    length: Option<String>,
    title_text: Option<String>,
    notes: Option<String>,
    characters: &[String],
) -> Option<NovelProfile> {
    debug!(%novel, "novel_profile: called");
    if !novel {
        return None;
    }
    let characters = characters
        .iter()
        .filter(|c| !c.trim().is_empty())
        .map(|c| match c.split_once(':') {
            Some((name, role)) => crate::state::Character {
                name: name.trim().to_string(),
                role: role.trim().to_string(),
            },
            None => crate::state::Character {
                name: c.trim().to_string(),
                role: String::new(),
            },
        })
        .collect();
    Some(NovelProfile {
        genre: genre.unwrap_or_default(),
        style: style.unwrap_or_default(),
        era: era.unwrap_or_default(),
        length: length.unwrap_or_default(),
        title_text: title_text.unwrap_or_default(),
        extra_notes: notes.unwrap_or_default(),
        characters,
    })
}

/// Output format for show/sessions
#[derive(Clone, Debug, Default, PartialEq)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        debug!(%s, "OutputFormat::from_str: called");
        match s.to_lowercase().as_str() {
            "text" | "plain" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            _ => Err(format!("Unknown format: {}. Use text or json", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_cmd_with_payload() {
        let cli = Cli::try_parse_from(["dl", "cmd", "s1", "insert", "--payload", r#"{"title":"X"}"#, "--wait"])
            .expect("parse");
        match cli.command {
            Some(Command::Cmd {
                session,
                command,
                payload,
                wait,
            }) => {
                assert_eq!(session, "s1");
                assert_eq!(command, "insert");
                assert_eq!(payload.as_deref(), Some(r#"{"title":"X"}"#));
                assert!(wait);
            }
            _ => panic!("expected cmd"),
        }
    }

    #[test]
    fn test_output_format_from_str() {
        assert_eq!("JSON".parse::<OutputFormat>(), Ok(OutputFormat::Json));
        assert_eq!("plain".parse::<OutputFormat>(), Ok(OutputFormat::Text));
        assert!("table".parse::<OutputFormat>().is_err());
    }

    #[test]
    fn test_novel_profile_requires_flag() {
        assert!(novel_profile(false, Some("noir".into()), None, None, None, None, None, &[]).is_none());
    }

    #[test]
    fn test_novel_profile_parses_characters() {
        let profile = novel_profile(
            true,
            Some("noir".into()),
            None,
            Some("1940s".into()),
            None,
            None,
            Some("rainy".into()),
            &["Sam:detective".to_string(), "Vera".to_string()],
        )
        .expect("profile");
        assert_eq!(profile.genre, "noir");
        assert_eq!(profile.era, "1940s");
        assert_eq!(profile.extra_notes, "rainy");
        assert_eq!(profile.characters.len(), 2);
        assert_eq!(profile.characters[0].role, "detective");
        assert!(profile.characters[1].role.is_empty());
    }
}
