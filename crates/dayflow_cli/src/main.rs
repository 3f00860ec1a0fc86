//! Dayflow CLI
//!
//! Scripted multi-device simulations against the in-process backend.
//!
//! # Commands
//!
//! - `takeover` - Sign several devices into one account and report the winner
//! - `offline` - Write while signed out, then sign in and check convergence
//! - `echo` - Edit one entity quickly and check that echoes never revert it
//! - `inspect` - List the contents of a file-backed local store

mod commands;

use clap::{Parser, Subcommand};
use commands::OutputFormat;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Dayflow sync simulations.
#[derive(Parser)]
#[command(name = "dayflow")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Directory for file-backed local stores (in-memory if absent)
    #[arg(global = true, short, long)]
    path: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    /// Output format
    #[arg(global = true, short, long, value_enum, default_value = "text")]
    format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sign several devices into one account, one after another
    Takeover {
        /// Number of devices
        #[arg(short, long, default_value = "2")]
        devices: usize,

        /// Let superseded devices read the new session record
        #[arg(long)]
        open_reads: bool,

        /// Pause between sign-ins in milliseconds
        #[arg(long, default_value = "50")]
        gap_ms: u64,
    },

    /// Create todos while signed out, then sign in
    Offline {
        /// Number of todos to create
        #[arg(short, long, default_value = "3")]
        todos: usize,
    },

    /// Edit one todo in quick succession while echoes are delayed
    Echo {
        /// Number of edits
        #[arg(short, long, default_value = "5")]
        edits: usize,

        /// Delay before the backend notifies subscribers, in milliseconds
        #[arg(long, default_value = "150")]
        notify_delay_ms: u64,
    },

    /// List what a file-backed device has stored locally
    Inspect,

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    match cli.command {
        Commands::Takeover {
            devices,
            open_reads,
            gap_ms,
        } => {
            let report = runtime.block_on(commands::takeover::run(
                cli.path.as_deref(),
                devices,
                open_reads,
                gap_ms,
            ))?;
            commands::print(&report, cli.format)?;
        }
        Commands::Offline { todos } => {
            let report = runtime.block_on(commands::offline::run(cli.path.as_deref(), todos))?;
            commands::print(&report, cli.format)?;
        }
        Commands::Echo {
            edits,
            notify_delay_ms,
        } => {
            let report = runtime.block_on(commands::echo::run(
                cli.path.as_deref(),
                edits,
                notify_delay_ms,
            ))?;
            commands::print(&report, cli.format)?;
        }
        Commands::Inspect => {
            let path = cli.path.ok_or("Store path required for inspect")?;
            let report = runtime.block_on(commands::inspect::run(&path))?;
            commands::print(&report, cli.format)?;
        }
        Commands::Version => {
            println!("Dayflow CLI v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
