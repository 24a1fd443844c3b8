//! Tether CLI
//!
//! Command-line tools for Tether local store maintenance.
//!
//! # Commands
//!
//! - `inspect` - Display the stored reference, generation and pending change
//! - `verify` - Verify store integrity
//! - `init` - Create a store with a fresh commit reference
//! - `dump` - Write the effective snapshot bytes

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Tether command-line store tools.
#[derive(Parser)]
#[command(name = "tether")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the store directory
    #[arg(global = true, short, long)]
    path: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Display the stored state
    Inspect {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Verify store integrity
    Verify,

    /// Create a store with a fresh commit reference
    Init {
        /// Replace an existing store's state
        #[arg(long)]
        force: bool,
    },

    /// Write the effective snapshot bytes
    Dump {
        /// Output file (stdout if omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
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
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Inspect { format } => {
            let path = cli.path.ok_or("Store path required for inspect")?;
            commands::inspect::run(&path, &format)?;
        }
        Commands::Verify => {
            let path = cli.path.ok_or("Store path required for verify")?;
            commands::verify::run(&path)?;
        }
        Commands::Init { force } => {
            let path = cli.path.ok_or("Store path required for init")?;
            commands::init::run(&path, force)?;
        }
        Commands::Dump { output } => {
            let path = cli.path.ok_or("Store path required for dump")?;
            commands::dump::run(&path, output.as_deref())?;
        }
        Commands::Version => {
            println!("Tether CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("Store format v{}", tether_store::FORMAT_VERSION);
            println!("Sync protocol v{}", tether_protocol::PROTOCOL_VERSION);
        }
    }

    Ok(())
}
