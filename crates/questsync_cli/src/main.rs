//! questsync CLI
//!
//! Command-line tools for inspecting local sync state.
//!
//! # Commands
//!
//! - `markers` - List persisted sync markers
//! - `reset` - Bump a user's local reset epoch
//! - `fingerprint` - Print the snapshot fingerprint of a JSON state file
//! - `encode` - Print the remote document for a JSON state file
//! - `simulate` - Run several devices against one in-memory document store

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// questsync command-line tools.
#[derive(Parser)]
#[command(name = "questsync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the local marker store
    #[arg(global = true, short, long)]
    store: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List persisted sync markers
    Markers {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Bump the local reset epoch for a user
    Reset {
        /// User id
        uid: String,
    },

    /// Print the snapshot fingerprint of a JSON state file
    Fingerprint {
        /// JSON file holding the local state
        file: PathBuf,
    },

    /// Print the remote document for a JSON state file
    Encode {
        /// JSON file holding the local state
        file: PathBuf,

        /// Reset epoch to stamp on the document
        #[arg(short, long, default_value = "0")]
        epoch: i64,
    },

    /// Run several devices for one user against a shared in-memory store
    Simulate {
        /// Number of devices
        #[arg(short, long, default_value = "2")]
        devices: usize,

        /// Number of edits, spread round-robin across devices
        #[arg(short, long, default_value = "6")]
        edits: usize,

        /// Debounce delay in milliseconds
        #[arg(long, default_value = "50")]
        debounce_ms: u64,

        /// Number of writes the store rejects before accepting
        #[arg(long, default_value = "0")]
        fail_writes: usize,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Markers { format } => {
            let store = cli.store.ok_or("Marker store path required for markers")?;
            commands::markers::run(&store, &format)?;
        }
        Commands::Reset { uid } => {
            let store = cli.store.ok_or("Marker store path required for reset")?;
            commands::reset::run(&store, &uid)?;
        }
        Commands::Fingerprint { file } => {
            commands::fingerprint::run(&file)?;
        }
        Commands::Encode { file, epoch } => {
            commands::encode::run(&file, epoch)?;
        }
        Commands::Simulate {
            devices,
            edits,
            debounce_ms,
            fail_writes,
            format,
        } => {
            let options = commands::simulate::SimulateOptions {
                devices,
                edits,
                debounce: std::time::Duration::from_millis(debounce_ms),
                fail_writes,
            };
            commands::simulate::run(&options, &format)?;
        }
        Commands::Version => {
            println!("questsync CLI v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
