//! txnstage CLI
//!
//! Command-line tools for exercising txnstage sessions.
//!
//! # Commands
//!
//! - `replay` - Run a session script against an in-memory store
//! - `version` - Show version information

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// txnstage command-line tools.
#[derive(Parser)]
#[command(name = "txnstage")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a session script against an in-memory store
    Replay {
        /// Path to the script
        script: PathBuf,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,

        /// Fail every start-timestamp request
        #[arg(long)]
        fail_timestamp: bool,

        /// Fail statement flushes after this many entries
        #[arg(long, value_name = "N")]
        fail_flush_after: Option<usize>,

        /// Commit KEY=VALUE before the script runs (repeatable)
        #[arg(short, long = "seed", value_name = "KEY=VALUE")]
        seeds: Vec<String>,
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
        Commands::Replay {
            script,
            format,
            fail_timestamp,
            fail_flush_after,
            seeds,
        } => {
            let options = commands::replay::ReplayOptions {
                format,
                fail_timestamp,
                fail_flush_after,
                seeds,
            };
            commands::replay::run(&script, &options)?;
        }
        Commands::Version => {
            println!("txnstage CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("txnstage Core v{}", txnstage_core::VERSION);
        }
    }

    Ok(())
}
