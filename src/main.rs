//! # ragline CLI
//!
//! ```bash
//! ragline --config ./config/ragline.toml <command>
//! ```
//!
//! | Command | Description |
//! |---------|-------------|
//! | `ragline init` | Create the SQLite database and run schema migrations |
//! | `ragline ingest <dir> --user <id>` | Ingest `.md`/`.txt` files for a user |
//! | `ragline search "<query>" --user <id>` | Rank the user's documents for a question |
//! | `ragline intent "<query>"` | Show how a query is classified |
//! | `ragline logs --user <id>` | Show recent ranking decisions |
//! | `ragline stats --user <id>` | Document, chunk, vector and index counts |
//!
//! Diagnostics go to stderr; set `RAGLINE_LOG` (e.g. `debug`,
//! `ragline=debug,sqlx=warn`) to change verbosity.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use ragline::config;
use ragline::ingest;
use ragline::migrate;
use ragline::retrieval::RetrievalRequest;
use ragline::search;
use ragline::stats;
use ragline_core::contradiction::QueryComplexity;
use ragline_core::relevance::DEFAULT_RECENT_LIMIT;

/// ragline: hybrid retrieval, relevance logging and contradiction
/// detection for document chat.
#[derive(Parser)]
#[command(name = "ragline", version)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/ragline.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Safe to run repeatedly.
    Init,

    /// Ingest a directory of documents for one user.
    ///
    /// Files in a subdirectory belong to the folder named by its first
    /// path component. Unchanged files are skipped.
    Ingest {
        /// Directory to scan.
        dir: PathBuf,

        /// Owning user.
        #[arg(long)]
        user: String,
    },

    /// Retrieve the best chunks for a question.
    Search {
        query: String,

        #[arg(long)]
        user: String,

        /// simple, medium or complex; gates contradiction detection.
        #[arg(long, default_value = "medium")]
        complexity: QueryComplexity,

        /// Conversation id recorded in the relevance log.
        #[arg(long)]
        conversation: Option<String>,

        #[arg(long)]
        max_chunks: Option<usize>,

        #[arg(long)]
        max_docs: Option<usize>,
    },

    /// Classify a query without searching.
    Intent { query: String },

    /// Show the most recent relevance-log rows for a user.
    Logs {
        #[arg(long)]
        user: String,

        #[arg(long, default_value_t = DEFAULT_RECENT_LIMIT)]
        limit: usize,
    },

    /// Show per-user statistics.
    Stats {
        #[arg(long)]
        user: String,
    },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("RAGLINE_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();

    if let Commands::Intent { query } = &cli.command {
        return search::run_intent(query);
    }

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Ingest { dir, user } => {
            ingest::run_ingest(&cfg, &dir, &user).await?;
        }
        Commands::Search {
            query,
            user,
            complexity,
            conversation,
            max_chunks,
            max_docs,
        } => {
            let request = RetrievalRequest {
                user_id: user,
                query,
                conversation_id: conversation,
                complexity,
                max_chunks,
                max_docs,
            };
            search::run_search(&cfg, &request).await?;
        }
        Commands::Intent { .. } => unreachable!("handled before config load"),
        Commands::Logs { user, limit } => {
            search::run_logs(&cfg, &user, limit).await?;
        }
        Commands::Stats { user } => {
            stats::run_stats(&cfg, &user).await?;
        }
    }

    Ok(())
}
