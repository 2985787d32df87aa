//! BitNote CLI
//!
//! Read-only inspection of the persisted sessions and token estimates.
//! Prints one JSON document to stdout.

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::io::Read;
use std::path::PathBuf;

use bitnote_lib::config::default_data_dir;
use bitnote_lib::{count_tokens, estimate_tokens_quick, exceeds_token_limit, SessionStore, NO_NOTES_PLACEHOLDER};

#[derive(Parser)]
#[command(name = "bitnote")]
#[command(about = "BitNote CLI - inspect saved sessions", long_about = None)]
struct Cli {
    /// Data directory (defaults to the platform data dir)
    #[arg(long, global = true, env = "BITNOTE_DATA_DIR")]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Saved session commands
    Sessions {
        #[command(subcommand)]
        action: SessionsAction,
    },
    /// Token estimation commands
    Tokens {
        #[command(subcommand)]
        action: TokensAction,
    },
}

#[derive(Subcommand)]
enum SessionsAction {
    /// List all saved sessions
    List,
    /// Print a session's notes
    Notes {
        /// Session ID
        session_id: String,
    },
}

#[derive(Subcommand)]
enum TokensAction {
    /// Estimate tokens in text (length / 4, plus the exact cl100k count)
    Estimate {
        /// Text to estimate (or - to read from stdin)
        text: String,
        /// Report whether the estimate exceeds this many tokens
        #[arg(short, long, default_value = "4000")]
        limit: usize,
    },
}

// ============ Output Types ============

#[derive(Serialize)]
struct SessionListItem {
    id: String,
    name: String,
    active: bool,
    created_at: String,
    conversation_count: usize,
    #[serde(rename = "folderId")]
    folder_id: Option<String>,
}

#[derive(Serialize)]
struct NotesOutput {
    id: String,
    name: String,
    notes: String,
}

#[derive(Serialize)]
struct TokenEstimateOutput {
    tokens: usize,
    exact: usize,
    limit: usize,
    exceeds: bool,
}

#[derive(Serialize)]
struct ErrorOutput {
    error: String,
}

// ============ Main ============

fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Sessions { action } => handle_sessions(cli.data_dir, action),
        Commands::Tokens { action } => handle_tokens(action),
    };

    match result {
        Ok(json) => println!("{}", json),
        Err(e) => {
            let error = ErrorOutput { error: e.to_string() };
            println!("{}", serde_json::to_string(&error).unwrap_or_else(|_| e.to_string()));
            std::process::exit(1);
        }
    }
}

// ============ Handlers ============

fn open_store(data_dir: Option<PathBuf>) -> Result<SessionStore> {
    let dir = match data_dir {
        Some(dir) => dir,
        None => default_data_dir()?,
    };
    Ok(SessionStore::new(dir))
}

fn handle_sessions(data_dir: Option<PathBuf>, action: SessionsAction) -> Result<String> {
    let store = open_store(data_dir)?;
    let records = store.load_sessions()?;

    match action {
        SessionsAction::List => {
            let items: Vec<SessionListItem> = records
                .into_iter()
                .map(|r| SessionListItem {
                    conversation_count: r.conversations.len(),
                    created_at: r.created_at.to_rfc3339(),
                    id: r.id,
                    name: r.name,
                    active: r.active,
                    folder_id: r.folder_id,
                })
                .collect();
            Ok(serde_json::to_string(&items)?)
        }

        SessionsAction::Notes { session_id } => {
            let record = records
                .into_iter()
                .find(|r| r.id == session_id)
                .ok_or_else(|| anyhow!("Session {} not found", session_id))?;
            let notes = if record.notes.trim().is_empty() {
                NO_NOTES_PLACEHOLDER.to_string()
            } else {
                record.notes
            };
            Ok(serde_json::to_string(&NotesOutput {
                id: record.id,
                name: record.name,
                notes,
            })?)
        }
    }
}

fn handle_tokens(action: TokensAction) -> Result<String> {
    match action {
        TokensAction::Estimate { text, limit } => {
            let input = if text == "-" {
                let mut buffer = String::new();
                std::io::stdin().read_to_string(&mut buffer)?;
                buffer
            } else {
                text
            };

            let output = TokenEstimateOutput {
                tokens: estimate_tokens_quick(&input),
                exact: count_tokens(&input),
                limit,
                exceeds: exceeds_token_limit(&input, limit),
            };
            Ok(serde_json::to_string(&output)?)
        }
    }
}
