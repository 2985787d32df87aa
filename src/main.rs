//! BitNote backend process
//!
//! Reads JSON commands from stdin, one per line, and writes JSON responses and
//! notes pushes to stdout. Logs go to stderr.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use bitnote_lib::config::default_data_dir;
use bitnote_lib::{AppContext, BackendConfig, Collaborators, Dispatcher};

#[derive(Parser, Debug)]
#[command(name = "bitnote-backend")]
#[command(about = "BitNote notes backend (line-delimited JSON over stdin/stdout)")]
#[command(version)]
struct Args {
    /// Directory holding sessions, folders, the API key and preferences
    #[arg(long, env = "BITNOTE_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Chat / summarizer endpoint
    #[arg(long, env = "BITNOTE_API_URL")]
    api_url: Option<String>,

    /// Log filter (overridden by RUST_LOG)
    #[arg(long, env = "BITNOTE_LOG")]
    log_level: Option<String>,

    /// How long a notes regeneration waits for newer interactions
    #[arg(long, env = "BITNOTE_DEBOUNCE_MS")]
    debounce_ms: Option<u64>,

    /// Never read the clipboard
    #[arg(long)]
    no_clipboard: bool,
}

fn env_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let data_dir = match args.data_dir {
        Some(dir) => dir,
        None => default_data_dir()?,
    };
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("Failed to create data directory {}", data_dir.display()))?;

    // Preferences decide the log level, so they are read under a temporary
    // stderr subscriber.
    let bootstrap = fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(env_filter(args.log_level.as_deref().unwrap_or("info")))
        .finish();
    let mut config = tracing::subscriber::with_default(bootstrap, || BackendConfig::load(&data_dir))
        .context("Failed to load preferences")?;

    if let Some(url) = args.api_url {
        config.api_url = url;
    }
    if let Some(level) = args.log_level {
        config.log_level = level;
    }
    if let Some(ms) = args.debounce_ms {
        config.debounce_ms = ms;
    }
    if args.no_clipboard {
        config.clipboard_enabled = false;
    }

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(env_filter(&config.log_level))
        .init();

    info!(data_dir = %config.data_dir.display(), api_url = %config.api_url, "Starting BitNote backend");

    let collaborators = Collaborators::from_config(&config);
    let (ctx, outbound) = AppContext::new(config, collaborators);
    info!(sessions = ctx.registry.len(), "Ready");

    let dispatcher = Dispatcher::new(Arc::new(ctx));
    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    dispatcher
        .run(stdin, outbound, tokio::io::stdout())
        .await
        .context("Failed to read commands")?;

    info!("Shutting down");
    Ok(())
}
