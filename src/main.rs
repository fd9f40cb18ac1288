// ABOUTME: CLI entry point for agency-sync
// ABOUTME: Parses commands and routes to appropriate handlers

use agency_sync::commands;
use agency_sync::config;
use agency_sync::window::SyncWindow;
use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "agency-sync")]
#[command(about = "Agency management data synchronization CLI", long_about = None)]
#[command(version)]
struct Cli {
    /// Set the log level (error, warn, info, debug, trace)
    #[arg(long, global = true)]
    log: Option<String>,
    /// Path to agency-sync.toml (defaults to the current directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Path to the SQLite store (overrides the config file)
    #[arg(long, env = "AGENCY_SYNC_STORE", global = true)]
    store: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the store file and apply schema migrations
    Init,
    /// Ingest an NDJSON export file into a new batch
    Stage {
        /// Export file, one JSON record per line
        #[arg(long)]
        file: PathBuf,
        /// Start of the sync window (date or timestamp, inclusive)
        #[arg(long)]
        window_start: String,
        /// End of the sync window (date or timestamp, inclusive)
        #[arg(long)]
        window_end: String,
    },
    /// Transform and load an extracted batch
    Run {
        /// Batch to run (defaults to the most recent extracted batch)
        #[arg(long)]
        batch: Option<String>,
        /// Load only these entity kinds (comma-separated)
        #[arg(long, value_delimiter = ',')]
        include_kinds: Option<Vec<String>>,
        /// Skip these entity kinds during load (comma-separated)
        #[arg(long, value_delimiter = ',')]
        exclude_kinds: Option<Vec<String>>,
    },
    /// Show one batch in detail, or list recent batches
    Status {
        /// Batch to inspect
        #[arg(long)]
        batch: Option<String>,
        /// How many recent batches to list
        #[arg(long, default_value_t = 10)]
        limit: u32,
    },
    /// Print the validation errors recorded for a batch
    Errors {
        #[arg(long)]
        batch: String,
    },
    /// Spawn a linked retry batch from a failed one
    Retry {
        #[arg(long)]
        batch: String,
        /// Replacement window start (requires --window-end)
        #[arg(long)]
        window_start: Option<String>,
        /// Replacement window end (requires --window-start)
        #[arg(long)]
        window_end: Option<String>,
    },
    /// Mark a non-terminal batch failed so an in-flight load stops
    Cancel {
        #[arg(long)]
        batch: String,
    },
}

fn main() -> anyhow::Result<()> {
    // We need to parse CLI args early to get the log level
    let cli = Cli::parse();
    let config = config::load(cli.config.as_deref())?;

    // Initialize logging
    // 1. RUST_LOG environment variable has highest precedence
    // 2. --log flag is used if RUST_LOG is not set
    // 3. The config file's log value applies next, then "info"
    let log_level = cli
        .log
        .clone()
        .or_else(|| config.log.clone())
        .unwrap_or_else(|| String::from("info"));
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let store = cli.store.as_deref();

    match cli.command {
        Commands::Init => commands::init(&config, store),
        Commands::Stage {
            file,
            window_start,
            window_end,
        } => {
            let window =
                SyncWindow::parse(&window_start, &window_end).context("Invalid sync window")?;
            commands::stage(&config, store, &file, window)
        }
        Commands::Run {
            batch,
            include_kinds,
            exclude_kinds,
        } => commands::run(
            &config,
            store,
            commands::run::RunOptions {
                batch,
                include_kinds,
                exclude_kinds,
            },
        ),
        Commands::Status { batch, limit } => commands::status(&config, store, batch, limit),
        Commands::Errors { batch } => commands::errors(&config, store, batch),
        Commands::Retry {
            batch,
            window_start,
            window_end,
        } => {
            let window = match (window_start, window_end) {
                (Some(start), Some(end)) => {
                    Some(SyncWindow::parse(&start, &end).context("Invalid sync window")?)
                }
                (None, None) => None,
                _ => anyhow::bail!("--window-start and --window-end must be given together"),
            };
            commands::retry(&config, store, batch, window)
        }
        Commands::Cancel { batch } => commands::cancel(&config, store, batch),
    }
}
