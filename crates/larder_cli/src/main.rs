//! Larder CLI
//!
//! Offline diagnostics for a larder data directory (a `FileStore` root).
//!
//! # Commands
//!
//! - `inspect` - Summarize collections, queued operations and the last sync
//! - `dump-pending` - List queued operations in log order
//! - `verify` - Check blobs and the consistency between items and operations
//! - `repair` - Queue operations for unsynced items that lost theirs

mod commands;

use clap::{Parser, Subcommand};
use commands::Format;
use larder_core::DEFAULT_MAX_RETRIES;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

/// Larder command-line diagnostics.
#[derive(Parser)]
#[command(name = "larder")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the larder data directory
    #[arg(global = true, short, long)]
    path: Option<PathBuf>,

    /// Restrict the command to one entity type
    #[arg(global = true, short = 't', long)]
    entity_type: Option<String>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Summarize collections, queued operations and the last sync
    Inspect {
        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: Format,
    },

    /// List queued operations in log order
    DumpPending {
        /// Maximum number of operations to list
        #[arg(short, long)]
        limit: Option<usize>,

        /// Include create and update payloads
        #[arg(long)]
        payload: bool,

        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: Format,
    },

    /// Check blobs and the consistency between items and operations
    Verify,

    /// Queue operations for unsynced items that lost theirs
    Repair {
        /// Retry budget for the queued operations
        #[arg(long, default_value_t = DEFAULT_MAX_RETRIES)]
        max_retries: u32,

        /// Dry run - show what would be queued
        #[arg(short, long)]
        dry_run: bool,
    },

    /// Show version information
    Version,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match execute(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

async fn execute(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let entity_type = cli.entity_type.as_deref();

    match cli.command {
        Commands::Inspect { format } => {
            let path = cli.path.ok_or("data directory path required for inspect")?;
            commands::inspect::run(&path, entity_type, format)?;
        }
        Commands::DumpPending {
            limit,
            payload,
            format,
        } => {
            let path = cli.path.ok_or("data directory path required for dump-pending")?;
            commands::dump_pending::run(&path, entity_type, limit, payload, format)?;
        }
        Commands::Verify => {
            let path = cli.path.ok_or("data directory path required for verify")?;
            commands::verify::run(&path)?;
        }
        Commands::Repair {
            max_retries,
            dry_run,
        } => {
            let path = cli.path.ok_or("data directory path required for repair")?;
            commands::repair::run(&path, entity_type, max_retries, dry_run).await?;
        }
        Commands::Version => {
            println!("Larder CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("Larder Core v{}", larder_core::VERSION);
        }
    }

    Ok(())
}
