//! Process configuration
//!
//! [`ProcessConfig`] is the fluent builder callers mutate before starting a
//! process. [`ProcessConfig::start`] snapshots it into a [`ProcessSpec`], so
//! changing the builder afterwards never affects a running process.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use crate::{
    error::Result,
    exit::ExitCodePolicy,
    handle::ProcessHandle,
    manager::ProcessManager,
    output::{Channel, Routing},
    shell::Shell,
};

/// Delimiter used by [`ProcessConfig::multiline_arg`]
pub const NEWLINE_DELIMITER: &str = "\n";

/// Snapshot of environment variables a command starts from
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvSnapshot(HashMap<String, String>);

impl EnvSnapshot {
    /// Capture the current process environment (non UTF-8 entries are skipped)
    pub fn inherit() -> Self {
        Self(
            std::env::vars_os()
                .filter_map(|(key, value)| Some((key.into_string().ok()?, value.into_string().ok()?)))
                .collect(),
        )
    }

    /// Snapshot with no variables
    pub fn empty() -> Self {
        Self::default()
    }

    /// Snapshot holding exactly `vars`
    pub fn from_vars<I, K, V>(vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self(vars.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }

    /// Value of `key`
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Consume the snapshot into its variable map
    pub fn into_inner(self) -> HashMap<String, String> {
        self.0
    }
}

/// Finalized configuration of one started process
#[derive(Debug, Clone)]
pub struct ProcessSpec {
    /// Program handed to the spawner (the shell program in shell mode)
    pub program: String,
    /// Arguments handed to the spawner
    pub args: Vec<String>,
    /// Shell the command runs through, if any
    pub shell: Option<Shell>,
    pub working_dir: Option<PathBuf>,
    /// Complete environment of the child
    pub environment: HashMap<String, String>,
    pub routing: Routing,
    pub close_after_last: bool,
    pub exit_policy: ExitCodePolicy,
    pub timeout: Option<Duration>,
    pub poll_interval: Duration,
}

impl ProcessSpec {
    /// Program followed by its arguments
    pub fn command_line(&self) -> Vec<String> {
        std::iter::once(self.program.clone())
            .chain(self.args.iter().cloned())
            .collect()
    }
}

/// Configuration for starting a process
#[derive(Clone)]
pub struct ProcessConfig {
    /// Executable, or the script in shell mode
    pub command: String,
    /// Command arguments
    pub args: Vec<String>,
    /// Run `command` through a shell
    pub as_shell: bool,
    /// Explicit shell (None = resolved at start)
    pub shell: Option<Shell>,
    /// Prepended to every shell script
    pub shell_prefix: String,
    /// Working directory (None = current dir)
    pub working_dir: Option<PathBuf>,
    /// Complete child environment (starts as the inherited snapshot)
    pub environment: HashMap<String, String>,
    /// Output channel routing
    pub routing: Routing,
    /// Check the exit code when the last output line has been read
    pub close_after_last: bool,
    /// Rule deciding which exit codes are successful
    pub exit_policy: ExitCodePolicy,
    /// Timeout measured from start (None = no timeout)
    pub timeout: Option<Duration>,
    /// Sleep between polls when no output is ready
    pub poll_interval: Duration,
    manager: ProcessManager,
}

impl ProcessConfig {
    /// Configuration using the default manager and the inherited environment
    pub fn new(command: impl Into<String>) -> Self {
        ProcessManager::default().command(command)
    }

    pub(crate) fn with_manager(
        command: impl Into<String>,
        environment: EnvSnapshot,
        manager: ProcessManager,
    ) -> Self {
        let settings = manager.settings();
        Self {
            command: command.into(),
            args: Vec::new(),
            as_shell: false,
            shell: settings.shell(),
            shell_prefix: settings.shell_prefix.clone(),
            working_dir: None,
            environment: environment.into_inner(),
            routing: Routing::default(),
            close_after_last: true,
            exit_policy: ExitCodePolicy::default(),
            timeout: settings.timeout(),
            poll_interval: settings.poll_interval(),
            manager,
        }
    }

    /// Replace all arguments
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Append one argument
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append one argument made of `lines` joined with `\n` (handy for scripts)
    pub fn multiline_arg<I, S>(mut self, lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let joined = lines
            .into_iter()
            .map(|line| line.as_ref().to_string())
            .collect::<Vec<_>>()
            .join(NEWLINE_DELIMITER);
        self.args.push(joined);
        self
    }

    /// Set the working directory
    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Replace the whole environment
    pub fn environment<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.environment = vars.into_iter().map(|(k, v)| (k.into(), v.into())).collect();
        self
    }

    /// Remove every environment variable, including inherited ones
    pub fn clear_environment(mut self) -> Self {
        self.environment.clear();
        self
    }

    /// Set one environment variable
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.environment.insert(key.into(), value.into());
        self
    }

    /// Set several environment variables, keeping the others
    pub fn envs<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.environment
            .extend(vars.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Report stdout lines as stderr
    pub fn redirect_stdout_to_stderr(mut self) -> Self {
        self.routing.redirect(Channel::Stdout, Channel::Stderr);
        self
    }

    /// Report stderr lines as stdout
    pub fn redirect_stderr_to_stdout(mut self) -> Self {
        self.routing.redirect(Channel::Stderr, Channel::Stdout);
        self
    }

    /// Discard stdout
    pub fn no_stdout(mut self) -> Self {
        self.routing.suppress(Channel::Stdout);
        self
    }

    /// Discard stderr
    pub fn no_stderr(mut self) -> Self {
        self.routing.suppress(Channel::Stderr);
        self
    }

    /// Accept exactly these exit codes (replaces the default of `0`)
    pub fn allowed_exit_codes<I>(mut self, codes: I) -> Self
    where
        I: IntoIterator<Item = i32>,
    {
        self.exit_policy = ExitCodePolicy::one_of(codes);
        self
    }

    /// Accept exactly this exit code (replaces the default of `0`)
    pub fn allowed_exit_code(mut self, code: i32) -> Self {
        self.exit_policy = ExitCodePolicy::Code(code);
        self
    }

    /// Replace the exit code policy
    pub fn exit_code_policy(mut self, policy: ExitCodePolicy) -> Self {
        self.exit_policy = policy;
        self
    }

    /// Accept exit codes for which `predicate` holds
    pub fn exit_code_predicate<F>(mut self, predicate: F) -> Self
    where
        F: Fn(i32) -> bool + Send + Sync + 'static,
    {
        self.exit_policy = ExitCodePolicy::custom(predicate);
        self
    }

    /// Accept every exit code
    pub fn any_exit_code(mut self) -> Self {
        self.exit_policy = ExitCodePolicy::Any;
        self
    }

    /// Raise exit code failures only on explicit close, not after the last line
    pub fn dont_close_after_last(mut self) -> Self {
        self.close_after_last = false;
        self
    }

    /// Run through the configured or platform default shell
    pub fn with_shell(mut self) -> Self {
        self.as_shell = true;
        self
    }

    /// Run through `program flag "<script>"`, e.g. `("cmd.exe", "/C")`
    pub fn with_shell_program(mut self, program: impl Into<String>, flag: impl Into<String>) -> Self {
        self.shell = Some(Shell::new(program, flag));
        self.with_shell()
    }

    /// Text prepended to every shell script
    pub fn shell_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.shell_prefix = prefix.into();
        self
    }

    /// Set the timeout
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set the timeout in seconds
    pub fn timeout_secs(self, secs: u64) -> Self {
        self.timeout(Duration::from_secs(secs))
    }

    /// Sleep between polling rounds when nothing is ready
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Finalize into the spec handed to the spawner
    pub fn snapshot(&self) -> ProcessSpec {
        let (program, args, shell) = if self.as_shell {
            let shell = self
                .shell
                .clone()
                .unwrap_or_else(|| self.manager.shell_resolver().default_shell());
            let args = shell.invocation_args(&self.shell_prefix, &self.command, &self.args);
            (shell.program.clone(), args, Some(shell))
        } else {
            (self.command.clone(), self.args.clone(), None)
        };

        ProcessSpec {
            program,
            args,
            shell,
            working_dir: self.working_dir.clone(),
            environment: self.environment.clone(),
            routing: self.routing,
            close_after_last: self.close_after_last,
            exit_policy: self.exit_policy.clone(),
            timeout: self.timeout,
            poll_interval: self.poll_interval,
        }
    }

    /// Start the process in the background and return a handle to it
    pub fn start(&self) -> Result<ProcessHandle> {
        ProcessHandle::spawn(self.snapshot(), self.manager.clone())
    }
}

impl fmt::Debug for ProcessConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessConfig")
            .field("command", &self.command)
            .field("args", &self.args)
            .field("as_shell", &self.as_shell)
            .field("shell", &self.shell)
            .field("working_dir", &self.working_dir)
            .field("routing", &self.routing)
            .field("close_after_last", &self.close_after_last)
            .field("exit_policy", &self.exit_policy)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}
