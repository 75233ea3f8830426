//! # newsdesk CLI
//!
//! ## Usage
//!
//! ```bash
//! newsdesk --config ./config/newsdesk.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `newsdesk serve` | Start ingestion and the HTTP API |
//! | `newsdesk poll` | Poll the feed once and print the normalized articles |
//! | `newsdesk ask "<question>"` | Ingest a few cycles, then answer one question |
//!
//! ## Examples
//!
//! ```bash
//! export NEWS_API_KEY=... OPENAI_API_KEY=...
//!
//! newsdesk serve
//! newsdesk poll
//! newsdesk ask "What happened in AI this week?" --top-k 3 --cycles 2
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

use newsdesk::config::{self, Config};
use newsdesk::server;
use newsdesk::service::NewsDesk;

/// newsdesk: live retrieval-augmented answers over breaking news.
///
/// Settings come from a TOML file (every key optional) and are overridden by
/// environment variables such as `NEWS_API_KEY`, `OPENAI_API_KEY` and
/// `LOG_LEVEL`. See `config/newsdesk.example.toml`.
#[derive(Parser)]
#[command(
    name = "newsdesk",
    about = "newsdesk: live retrieval-augmented answers over breaking news",
    version
)]
struct Cli {
    /// Path to configuration file (TOML). A missing file means defaults.
    #[arg(long, global = true, default_value = "./config/newsdesk.toml")]
    config: PathBuf,

    /// Log filter (e.g. `debug`, `newsdesk=trace`). Overrides `[logging].level`;
    /// `RUST_LOG` takes precedence over both.
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run continuous ingestion and serve the HTTP API until Ctrl-C.
    Serve,

    /// Poll the news feed once and print the new articles as JSON.
    ///
    /// Nothing is embedded or indexed.
    Poll,

    /// Ingest, then answer a single question and print the answer as JSON.
    Ask {
        /// The question to answer.
        question: String,

        /// Number of articles to retrieve.
        #[arg(long)]
        top_k: Option<usize>,

        /// Ingestion cycles to run before answering.
        #[arg(long, default_value_t = 1)]
        cycles: usize,
    },
}

fn init_tracing(config: &Config) -> Result<()> {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level)),
        )
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl-C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received Ctrl-C, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut cfg = config::load_config(&cli.config)?;
    if let Some(level) = cli.log_level {
        cfg.logging.level = level;
    }
    init_tracing(&cfg)?;

    let desk = Arc::new(NewsDesk::from_config(cfg).context("Failed to initialise newsdesk")?);

    match cli.command {
        Commands::Serve => {
            if let Err(e) = desk.start_ingestion().await {
                warn!(error = %e, "ingestion not started; serving queries only");
            }
            let result = server::run_server(Arc::clone(&desk), shutdown_signal()).await;
            desk.stop_ingestion().await;
            result?;
        }
        Commands::Poll => {
            let documents = desk.poll_feed().await.context("Feed poll failed")?;
            println!("{}", serde_json::to_string_pretty(&documents)?);
        }
        Commands::Ask {
            question,
            top_k,
            cycles,
        } => {
            let reports = desk
                .run_cycles(cycles)
                .await
                .context("Cannot ingest before answering")?;
            for report in &reports {
                if let Some(e) = &report.poll_error {
                    warn!(error = %e, "ingestion cycle failed");
                }
            }
            let answer = desk.submit_question(&question, top_k).await;
            println!("{}", serde_json::to_string_pretty(&answer)?);
        }
    }

    Ok(())
}
