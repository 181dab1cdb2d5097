//! Shell selection for shell-mode commands
//!
//! Shell mode hands the whole command string to an external shell program
//! (`sh -c "<script>"`, `cmd.exe /C "<script>"`); no shell grammar is parsed here.

use std::fmt;

use tracing::debug;

/// Shell program and the flag that makes it run a string as a command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Shell {
    pub program: String,
    pub flag: String,
}

impl Shell {
    /// Create a shell from its program and command flag
    pub fn new(program: impl Into<String>, flag: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            flag: flag.into(),
        }
    }

    /// Build the `[flag, script]` argument list for running `command` with `args`.
    ///
    /// The prefix is prepended verbatim; arguments are joined with single spaces
    /// and passed through unescaped.
    pub fn invocation_args(&self, prefix: &str, command: &str, args: &[String]) -> Vec<String> {
        let mut script = String::with_capacity(prefix.len() + command.len());
        script.push_str(prefix);
        script.push_str(command);
        for arg in args {
            script.push(' ');
            script.push_str(arg);
        }
        vec![self.flag.clone(), script]
    }
}

impl fmt::Display for Shell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.program, self.flag)
    }
}

/// Resolves the shell used when shell mode is enabled without an explicit shell
pub trait ShellResolver: Send + Sync {
    fn default_shell(&self) -> Shell;
}

/// Platform default: `sh -c` on Unix, `COMSPEC`/`cmd.exe /C` on Windows
#[derive(Debug, Clone, Copy, Default)]
pub struct PlatformShellResolver;

impl ShellResolver for PlatformShellResolver {
    fn default_shell(&self) -> Shell {
        #[cfg(windows)]
        {
            let program = std::env::var("COMSPEC").unwrap_or_else(|_| "cmd.exe".to_string());
            debug!(shell = %program, "Using Windows command interpreter");
            return Shell::new(program, "/C");
        }

        #[cfg(not(windows))]
        {
            // Keep the bare name so error messages read `sh -c ...`.
            let program = match which::which("sh") {
                Ok(_) => "sh".to_string(),
                Err(_) => "/bin/sh".to_string(),
            };
            debug!(shell = %program, "Using POSIX shell");
            Shell::new(program, "-c")
        }
    }
}

/// Resolver that always returns the same shell
#[derive(Debug, Clone)]
pub struct FixedShellResolver(pub Shell);

impl ShellResolver for FixedShellResolver {
    fn default_shell(&self) -> Shell {
        self.0.clone()
    }
}
