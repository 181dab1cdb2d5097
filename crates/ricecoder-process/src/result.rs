//! Result of a non-failing retrieval

use crate::error::{ProcessError, Result};

/// Captured output and/or failure of [`crate::ProcessHandle::try_get`]
#[derive(Debug)]
pub struct ProcessOutput {
    output: Option<String>,
    error: Option<ProcessError>,
}

impl ProcessOutput {
    pub(crate) fn new(output: Option<String>, error: Option<ProcessError>) -> Self {
        Self { output, error }
    }

    /// Joined output lines; absent when the run failed with close-after-last enabled
    pub fn output(&self) -> Option<&str> {
        self.output.as_deref()
    }

    /// Failure, if any
    pub fn error(&self) -> Option<&ProcessError> {
        self.error.as_ref()
    }

    /// Check if no failure was captured
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    /// The failure if any, otherwise the output
    pub fn into_result(self) -> Result<String> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(self.output.unwrap_or_default()),
        }
    }
}
