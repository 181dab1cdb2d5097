//! Process manager - binds spawner, shell resolver and settings

use std::fmt;
use std::sync::Arc;

use crate::{
    config::{EnvSnapshot, ProcessConfig},
    error::Result,
    handle::ProcessHandle,
    settings::ProcessSettings,
    shell::{PlatformShellResolver, ShellResolver},
    spawn::{ProcessSpawner, TokioSpawner},
};

/// Creates process configurations sharing one spawner, shell resolver and settings
#[derive(Clone)]
pub struct ProcessManager {
    spawner: Arc<dyn ProcessSpawner>,
    shell_resolver: Arc<dyn ShellResolver>,
    settings: ProcessSettings,
}

impl ProcessManager {
    /// Create a manager with the tokio spawner, platform shell and default settings
    pub fn new() -> Self {
        Self::from_settings(ProcessSettings::default())
    }

    /// Create a manager applying `settings` to every configuration it creates
    ///
    /// # Examples
    /// ```no_run
    /// use ricecoder_process::{ProcessManager, ProcessSettings};
    ///
    /// # #[tokio::main]
    /// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
    /// let manager = ProcessManager::from_settings(ProcessSettings::load()?);
    /// let output = manager.shell("echo $HOME").start()?.get().await?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn from_settings(settings: ProcessSettings) -> Self {
        Self {
            spawner: Arc::new(TokioSpawner),
            shell_resolver: Arc::new(PlatformShellResolver),
            settings,
        }
    }

    /// Use a custom spawner
    pub fn with_spawner(mut self, spawner: Arc<dyn ProcessSpawner>) -> Self {
        self.spawner = spawner;
        self
    }

    /// Use a custom default shell
    pub fn with_shell_resolver(mut self, resolver: Arc<dyn ShellResolver>) -> Self {
        self.shell_resolver = resolver;
        self
    }

    /// Get settings
    pub fn settings(&self) -> &ProcessSettings {
        &self.settings
    }

    /// Get the default shell resolver
    pub fn shell_resolver(&self) -> &dyn ShellResolver {
        self.shell_resolver.as_ref()
    }

    pub(crate) fn spawner(&self) -> &dyn ProcessSpawner {
        self.spawner.as_ref()
    }

    /// Configuration for `command` starting from the current environment
    pub fn command(&self, command: impl Into<String>) -> ProcessConfig {
        self.command_with_env(command, EnvSnapshot::inherit())
    }

    /// Configuration for `command` starting from an explicit environment snapshot
    pub fn command_with_env(&self, command: impl Into<String>, environment: EnvSnapshot) -> ProcessConfig {
        ProcessConfig::with_manager(command, environment, self.clone())
    }

    /// Configuration running `script` through the shell
    pub fn shell(&self, script: impl Into<String>) -> ProcessConfig {
        self.command(script).with_shell()
    }

    /// Start `command` with `args` and default configuration
    ///
    /// # Arguments
    /// * `command` - Executable to run
    /// * `args` - Arguments passed verbatim
    ///
    /// # Examples
    /// ```no_run
    /// use ricecoder_process::ProcessManager;
    ///
    /// # #[tokio::main]
    /// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
    /// let manager = ProcessManager::new();
    /// let status = manager.start("git", ["status", "--short"])?.get().await?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn start<I, S>(&self, command: impl Into<String>, args: I) -> Result<ProcessHandle>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.command(command).args(args).start()
    }
}

impl Default for ProcessManager {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ProcessManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessManager")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}
