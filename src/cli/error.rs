//! CLI error types and exit codes

use crate::collector::{CollectorError, ConfigError};
use crate::output::OutputError;
use crate::resume::CheckpointError;

/// Exit code of a completed run (skips are reported, not failed)
pub const EXIT_OK: i32 = 0;
/// Exit code of an aborted run or any other error
pub const EXIT_FAILURE: i32 = 1;
/// Exit code when existing state needs an explicit `--resume` or `--clear-checkpoint`
pub const EXIT_CONFLICT: i32 = 2;
/// Exit code of an interrupted run
pub const EXIT_INTERRUPTED: i32 = 130;

/// CLI errors
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    /// Collection error
    #[error(transparent)]
    CollectorError(#[from] CollectorError),

    /// Configuration error
    #[error("configuration error: {0}")]
    ConfigError(#[from] ConfigError),

    /// Checkpoint error
    #[error("checkpoint error: {0}")]
    CheckpointError(#[from] CheckpointError),

    /// Output error
    #[error("output error: {0}")]
    OutputError(#[from] OutputError),

    /// Invalid argument
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl CliError {
    /// Process exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::CollectorError(e) if e.is_interrupted() => EXIT_INTERRUPTED,
            CliError::CollectorError(e) if e.is_conflict() => EXIT_CONFLICT,
            CliError::CheckpointError(CheckpointError::Locked { .. }) => EXIT_CONFLICT,
            _ => EXIT_FAILURE,
        }
    }
}
