//! Error types for process execution

use std::io;
use std::time::Duration;

use thiserror::Error;

/// Process execution errors
#[derive(Debug, Error)]
pub enum ProcessError {
    /// The spawn primitive could not start the process
    #[error("Failed to spawn process '{command}': {source}")]
    SpawnFailed {
        command: String,
        #[source]
        source: io::Error,
    },

    /// Shell mode was requested but the shell program could not be started
    #[error("Failed to start shell '{shell}': {source}")]
    ShellNotFound {
        shell: String,
        #[source]
        source: io::Error,
    },

    /// The process exited with a code rejected by its exit code policy
    #[error("Command '{}' exited with code {code}", .args.join(" "))]
    ExitCode { code: i32, args: Vec<String> },

    /// The deadline elapsed; the process was killed before this was raised
    #[error("Command '{}' timed out after {timeout:?}", .args.join(" "))]
    Timeout { args: Vec<String>, timeout: Duration },

    /// Reading from or writing to a process channel failed
    #[error("I/O error on process channel: {0}")]
    Io(#[from] io::Error),

    /// Invalid configuration or settings
    #[error("Invalid process configuration: {0}")]
    InvalidConfig(String),
}

impl ProcessError {
    /// Exit code carried by an [`ProcessError::ExitCode`] failure
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            Self::ExitCode { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Command line (program followed by arguments) of the failed process
    pub fn args(&self) -> Option<&[String]> {
        match self {
            Self::ExitCode { args, .. } | Self::Timeout { args, .. } => Some(args),
            _ => None,
        }
    }

    /// Check if this is a timeout
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

/// Result type for process operations
pub type Result<T> = std::result::Result<T, ProcessError>;
