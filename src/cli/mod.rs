//! CLI command implementations

pub mod collect;
pub mod error;
pub mod status;

pub use collect::CollectArgs;
pub use error::CliError;
pub use status::StatusArgs;

use clap::{Parser, Subcommand};
use std::str::FromStr;

/// Resumable ad-transparency collector
#[derive(Parser, Debug)]
#[command(name = "ad-collector", version, about)]
pub struct Cli {
    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Output format (json or human)
    #[arg(long, global = true, default_value = "human")]
    pub output_format: OutputFormat,
}

/// CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Collect a date range, optionally resuming a previous run
    Collect(CollectArgs),

    /// Show checkpoint and manifest of a run (read-only)
    Status(StatusArgs),
}

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// JSON output
    Json,
    /// Human-readable output
    Human,
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" => Ok(OutputFormat::Json),
            "human" => Ok(OutputFormat::Human),
            _ => Err(format!("Invalid output format: {s}")),
        }
    }
}
