//! Process defaults loaded from a settings file and the environment

use std::path::{Path, PathBuf};
use std::time::Duration;

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use crate::{
    error::{ProcessError, Result},
    shell::Shell,
};

/// Environment variable prefix (`RICECODER_PROCESS_POLL_INTERVAL_MS=10`)
pub const ENV_PREFIX: &str = "RICECODER_PROCESS";

const DEFAULT_POLL_INTERVAL_MS: u64 = 5;

/// Defaults applied to every command created through a [`crate::ProcessManager`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessSettings {
    /// Sleep between polls when no output is ready
    pub poll_interval_ms: u64,
    /// Shell program overriding the platform default
    pub shell_program: Option<String>,
    /// Flag passed to `shell_program` before the script
    pub shell_flag: Option<String>,
    /// Text prepended to every shell script
    pub shell_prefix: String,
    /// Default timeout (None = no timeout)
    pub timeout_ms: Option<u64>,
}

impl Default for ProcessSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            shell_program: None,
            shell_flag: None,
            shell_prefix: String::new(),
            timeout_ms: None,
        }
    }
}

impl ProcessSettings {
    /// Load from `<config_dir>/ricecoder/process.toml` (optional) and the environment
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::default_path())
    }

    /// Load from an explicit file (optional) and the environment
    pub fn load_from(path: &Path) -> Result<Self> {
        let settings: Self = Config::builder()
            .add_source(File::from(path.to_path_buf()).required(false))
            .add_source(Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()
            .and_then(|config| config.try_deserialize())
            .map_err(|e| ProcessError::InvalidConfig(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("ricecoder")
            .join("process.toml")
    }

    /// Validate settings
    pub fn validate(&self) -> Result<()> {
        if self.poll_interval_ms == 0 {
            return Err(ProcessError::InvalidConfig(
                "poll_interval_ms must be greater than 0".to_string(),
            ));
        }
        if self.shell_program.is_some() && self.shell_flag.as_deref() == Some("") {
            return Err(ProcessError::InvalidConfig(
                "shell_flag must not be empty when shell_program is set".to_string(),
            ));
        }
        Ok(())
    }

    /// Poll interval as a duration
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Default timeout as a duration
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }

    /// Shell configured by settings; the flag defaults to `-c`
    pub fn shell(&self) -> Option<Shell> {
        self.shell_program.as_ref().map(|program| {
            Shell::new(
                program.clone(),
                self.shell_flag.clone().unwrap_or_else(|| "-c".to_string()),
            )
        })
    }
}
