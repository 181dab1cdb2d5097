//! # ricecoder-process
//!
//! **Purpose**: Process execution for RiceCoder with shell-like composability
//!
//! Starts external commands, streams their output line by line or as raw
//! bytes without ever blocking on a pipe, chains commands into pipelines and
//! judges each run by a configurable exit code policy and timeout.
//!
//! ## Features
//!
//! - **Polling Output**: Output is read in non-blocking rounds so deadlines are always honored
//! - **Routing**: Redirect stderr onto stdout (or back), or suppress a channel
//! - **Exit Code Policies**: Zero, a single code, a set, any code, or a predicate
//! - **Close After Last**: Exit codes are checked when the last line is read, or on close
//! - **Timeouts**: Expired processes are killed with their whole process group
//! - **Pipelines**: `a | b | c` without helper threads
//! - **Input Feeding**: Lines or async streams written to stdin, optionally kept open
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use futures::TryStreamExt;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Collect all output
//! let version = ricecoder_process::start("git", ["--version"])?.get().await?;
//!
//! // Stream lines of a pipeline
//! let mut handle = ricecoder_process::shell("git log --oneline")
//!     .timeout(Duration::from_secs(10))
//!     .start()?
//!     .pipe("head", ["-n", "5"])?;
//! let lines: Vec<String> = handle.stream().try_collect().await?;
//! # Ok(())
//! # }
//! ```

pub mod child;
pub mod config;
pub mod error;
pub mod exit;
mod handle;
mod input;
pub mod manager;
mod multiplex;
pub mod output;
pub mod reader;
mod result;
pub mod settings;
pub mod shell;
pub mod spawn;
mod stage;

pub use child::ManagedChild;
pub use config::{EnvSnapshot, ProcessConfig, ProcessSpec};
pub use error::{ProcessError, Result};
pub use exit::ExitCodePolicy;
pub use handle::ProcessHandle;
pub use manager::ProcessManager;
pub use output::{Channel, OutputChunk, OutputLine};
pub use result::ProcessOutput;
pub use settings::ProcessSettings;
pub use shell::{Shell, ShellResolver};
pub use spawn::{ProcessSpawner, TokioSpawner};

/// Start `command` with `args` using default configuration
pub fn start<I, S>(command: impl Into<String>, args: I) -> Result<ProcessHandle>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    ProcessManager::default().start(command, args)
}

/// Configuration running `script` through the platform default shell
pub fn shell(script: impl Into<String>) -> ProcessConfig {
    ProcessManager::default().shell(script)
}

/// Configuration for `command`, to be adjusted before starting
pub fn command(command: impl Into<String>) -> ProcessConfig {
    ProcessManager::default().command(command)
}
