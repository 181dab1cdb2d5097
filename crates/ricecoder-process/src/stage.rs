//! One pipeline stage: a spawned child, its routed output and its input feed

use std::io;
use std::time::Instant;

use tokio::process::ChildStdin;
use tracing::{debug, info, trace, warn};

use crate::{
    child::ManagedChild,
    config::ProcessSpec,
    error::{ProcessError, Result},
    input::InputFeed,
    multiplex::Multiplexer,
    output::{Channel, OutputChunk, OutputLine},
    spawn::ProcessSpawner,
};

/// What a stage hands to the stage after it
#[derive(Debug)]
pub(crate) enum Next {
    Bytes(Vec<u8>),
    /// Nothing ready yet
    Idle,
    /// Output ended and the exit code (if checked) was accepted
    End,
    /// Output ended and the stage failed
    Failed(ProcessError),
}

#[derive(Debug)]
pub(crate) struct Stage {
    pub(crate) spec: ProcessSpec,
    pub(crate) child: ManagedChild,
    output: Multiplexer,
    stdin: Option<ChildStdin>,
    input: Option<InputFeed>,
    upstream_failure: Option<ProcessError>,
    evaluated: bool,
    pub(crate) cut_off: bool,
}

impl Stage {
    pub(crate) fn spawn(spec: ProcessSpec, spawner: &dyn ProcessSpawner) -> Result<Self> {
        let started = Instant::now();
        let child = spawner.spawn(&spec).map_err(|source| spawn_error(&spec, source))?;

        let mut child = ManagedChild::new(child, started, spec.timeout);
        let stdin = child.take_stdin();
        let output = Multiplexer::new(child.take_stdout(), child.take_stderr(), spec.routing);

        info!(pid = %child.pid(), command = %spec.program, "Process spawned");

        Ok(Self {
            spec,
            child,
            output,
            stdin,
            input: None,
            upstream_failure: None,
            evaluated: false,
            cut_off: false,
        })
    }

    pub(crate) fn set_input(&mut self, feed: InputFeed) {
        if self.input.as_ref().is_some_and(|old| !old.is_finished()) {
            warn!(pid = %self.child.pid(), "Replacing unfinished input feed");
        }
        self.input = Some(feed);
    }

    /// One non-blocking step: feed input, look for exit, read ready output
    pub(crate) fn round(&mut self, upstream: &mut [Stage]) -> Result<bool> {
        let mut progress = false;

        if let Some(feed) = self.input.as_mut() {
            progress |= feed.pump(&mut self.stdin, upstream)?;
            if let Some(failure) = feed.take_failure() {
                self.upstream_failure.get_or_insert(failure);
            }
        }

        self.child.try_exit_code()?;
        progress |= self.output.fill_now(self.child.is_settled())?;
        Ok(progress)
    }

    pub(crate) fn next_line(&mut self) -> Option<OutputLine> {
        self.output.next_line()
    }

    pub(crate) fn next_chunk(&mut self) -> Option<OutputChunk> {
        self.output.next_chunk()
    }

    pub(crate) fn discard_output(&mut self) {
        self.output.discard();
    }

    pub(crate) fn output_closed(&self) -> bool {
        self.output.is_closed()
    }

    /// Stdout-routed bytes for the next stage's input
    pub(crate) fn pull_for_downstream(&mut self, upstream: &mut [Stage]) -> Result<Next> {
        self.round(upstream)?;

        while let Some(chunk) = self.output.next_chunk() {
            match chunk.channel {
                Channel::Stdout => return Ok(Next::Bytes(chunk.bytes)),
                Channel::Stderr => {
                    trace!(pid = %self.child.pid(), len = chunk.bytes.len(), "Dropping stderr bytes in pipe")
                }
            }
        }

        if !self.output.is_closed() {
            return Ok(Next::Idle);
        }
        if let Some(failure) = self.upstream_failure.take() {
            return Ok(Next::Failed(failure));
        }
        if !self.spec.close_after_last || self.evaluated {
            return Ok(Next::End);
        }

        match self.child.exit_code() {
            Some(code) => Ok(match self.check_exit(code) {
                Ok(()) => Next::End,
                Err(err) => Next::Failed(err),
            }),
            None => Ok(Next::Idle),
        }
    }

    /// Drop every channel; true if the input was still fed from the previous stage
    pub(crate) fn release(&mut self) -> bool {
        debug!(pid = %self.child.pid(), "Releasing process channels");
        self.output.release();
        self.stdin = None;
        self.input
            .take()
            .is_some_and(|feed| feed.cuts_off_upstream())
    }

    /// Wait for exit and evaluate the exit code unless already settled otherwise
    pub(crate) async fn finish(&mut self) -> Result<()> {
        if self.child.timed_out() {
            return Ok(());
        }

        let Some(code) = self.child.wait_within_deadline().await? else {
            return Err(self.timeout_error());
        };

        if let Some(failure) = self.upstream_failure.take() {
            return Err(failure);
        }
        if self.evaluated || self.cut_off {
            return Ok(());
        }
        self.check_exit(code)
    }

    /// Kill a stage taken down together with a timed-out one
    pub(crate) async fn abort(&mut self) {
        self.cut_off = true;
        self.child.kill().await;
    }

    pub(crate) fn check_exit(&mut self, code: i32) -> Result<()> {
        self.evaluated = true;
        let accepted = self.spec.exit_policy.accepts(code);
        debug!(pid = %self.child.pid(), code, accepted, "Evaluated exit code");

        if accepted {
            Ok(())
        } else {
            Err(ProcessError::ExitCode {
                code,
                args: self.spec.command_line(),
            })
        }
    }

    pub(crate) fn timeout_error(&self) -> ProcessError {
        ProcessError::Timeout {
            args: self.spec.command_line(),
            timeout: self.spec.timeout.unwrap_or_default(),
        }
    }
}

impl Drop for Stage {
    fn drop(&mut self) {
        if self.child.exit_code().is_none() {
            debug!(pid = %self.child.pid(), "Process handle dropped while running, killing it");
            self.child.kill_on_drop();
        }
    }
}

fn spawn_error(spec: &ProcessSpec, source: io::Error) -> ProcessError {
    match &spec.shell {
        Some(shell) if source.kind() == io::ErrorKind::NotFound => ProcessError::ShellNotFound {
            shell: shell.program.clone(),
            source,
        },
        _ => ProcessError::SpawnFailed {
            command: spec.command_line().join(" "),
            source,
        },
    }
}
