//! Spawn primitive used to start OS processes

use std::io;
use std::process::Stdio;

use tokio::process::{Child, Command};
use tracing::debug;

use crate::config::ProcessSpec;
use crate::output::Channel;

/// Starts an OS process for a finalized [`ProcessSpec`].
///
/// Implementations apply the working directory and the complete environment,
/// pipe stdin, and pipe every output channel that `routing` captures.
/// Suppressed channels go to the null device.
pub trait ProcessSpawner: Send + Sync {
    fn spawn(&self, spec: &ProcessSpec) -> io::Result<Child>;
}

/// Spawner backed by `tokio::process::Command`.
///
/// On Unix every child leads its own process group so a timeout can kill the
/// whole tree (shell plus the commands it started).
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSpawner;

impl ProcessSpawner for TokioSpawner {
    fn spawn(&self, spec: &ProcessSpec) -> io::Result<Child> {
        debug!(
            program = %spec.program,
            args = ?spec.args,
            env_count = spec.environment.len(),
            "Spawning process"
        );

        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args);

        if let Some(ref dir) = spec.working_dir {
            cmd.current_dir(dir);
        }

        cmd.env_clear();
        cmd.envs(&spec.environment);

        cmd.stdin(Stdio::piped());
        cmd.stdout(stdio_for(spec, Channel::Stdout));
        cmd.stderr(stdio_for(spec, Channel::Stderr));

        #[cfg(unix)]
        cmd.process_group(0);

        cmd.spawn()
    }
}

fn stdio_for(spec: &ProcessSpec, channel: Channel) -> Stdio {
    if spec.routing.captures(channel) {
        Stdio::piped()
    } else {
        Stdio::null()
    }
}
