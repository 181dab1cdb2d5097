//! Managed child process wrapper

use std::io;
use std::process::ExitStatus;
use std::time::{Duration, Instant};

use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout};
use tracing::{debug, warn};

/// Wrapper around `tokio::process::Child` tracking its start, deadline and exit
#[derive(Debug)]
pub struct ManagedChild {
    child: Child,
    pid: u32,
    started: Instant,
    timeout: Option<Duration>,
    exit_code: Option<i32>,
    /// Exit was observed before the last idle sleep
    settled: bool,
    timed_out: bool,
}

impl ManagedChild {
    pub(crate) fn new(child: Child, started: Instant, timeout: Option<Duration>) -> Self {
        let pid = child.id().unwrap_or(0);
        Self {
            child,
            pid,
            started,
            timeout,
            exit_code: None,
            settled: false,
            timed_out: false,
        }
    }

    /// Get process ID
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Instant the process was spawned
    pub fn started_at(&self) -> Instant {
        self.started
    }

    /// Configured timeout, if any
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Start instant plus timeout
    pub fn deadline(&self) -> Option<Instant> {
        self.timeout.map(|timeout| self.started + timeout)
    }

    pub(crate) fn set_timeout(&mut self, timeout: Option<Duration>) {
        self.timeout = timeout;
    }

    /// Whether `now` is at or after the deadline
    pub fn is_past_deadline(&self, now: Instant) -> bool {
        self.deadline().is_some_and(|deadline| now >= deadline)
    }

    /// Whether the process was killed for exceeding its deadline
    pub fn timed_out(&self) -> bool {
        self.timed_out
    }

    /// Exit code, if the process has been observed to exit
    pub fn exit_code(&self) -> Option<i32> {
        self.exit_code
    }

    /// Whether the process counts as closed for its readers
    pub fn is_settled(&self) -> bool {
        self.settled
    }

    /// Check for exit without waiting
    pub fn try_exit_code(&mut self) -> io::Result<Option<i32>> {
        if self.exit_code.is_none() {
            if let Some(status) = self.child.try_wait()? {
                self.record(status);
            }
        }
        Ok(self.exit_code)
    }

    /// Called after each idle sleep of the polling loop
    pub(crate) fn mark_idle(&mut self) {
        if self.exit_code.is_some() {
            self.settled = true;
        }
    }

    /// Wait for exit, bounded by the deadline.
    ///
    /// Returns `Ok(None)` when the deadline fired first; the process has then
    /// been killed and reaped.
    pub async fn wait_within_deadline(&mut self) -> io::Result<Option<i32>> {
        if let Some(code) = self.exit_code {
            return Ok(Some(code));
        }

        let status = match self.deadline() {
            Some(deadline) => {
                let deadline = tokio::time::Instant::from_std(deadline);
                match tokio::time::timeout_at(deadline, self.child.wait()).await {
                    Ok(status) => status?,
                    Err(_) => {
                        self.terminate().await;
                        return Ok(None);
                    }
                }
            }
            None => self.child.wait().await?,
        };

        self.record(status);
        Ok(self.exit_code)
    }

    /// Mark the process as timed out, then kill and reap it
    pub async fn terminate(&mut self) {
        self.timed_out = true;
        if self.exit_code.is_none() {
            warn!(pid = %self.pid, timeout = ?self.timeout, "Deadline exceeded, killing process");
        }
        self.kill().await;
    }

    /// Forcibly terminate the process and everything in its process group, then reap it
    pub async fn kill(&mut self) {
        if self.exit_code.is_some() {
            return;
        }
        self.kill_tree();

        match self.child.wait().await {
            Ok(status) => self.record(status),
            Err(e) => warn!(pid = %self.pid, error = %e, "Error reaping killed process"),
        }
    }

    /// Kill without reaping; the runtime reaps orphaned children
    pub(crate) fn kill_on_drop(&mut self) {
        if matches!(self.child.try_wait(), Ok(None)) {
            self.kill_tree();
        }
    }

    /// Kill the process group on Unix, the task tree on Windows, falling back to the process
    fn kill_tree(&mut self) {
        #[cfg(unix)]
        {
            use nix::errno::Errno;
            use nix::sys::signal::{killpg, Signal};
            use nix::unistd::Pid;

            if self.pid != 0 {
                match killpg(Pid::from_raw(self.pid as i32), Signal::SIGKILL) {
                    Ok(()) => debug!(pid = %self.pid, "Sent SIGKILL to process group"),
                    Err(Errno::ESRCH) => {}
                    Err(e) => warn!(pid = %self.pid, error = %e, "Failed to signal process group"),
                }
            }
        }

        #[cfg(windows)]
        {
            let killed = std::process::Command::new("taskkill")
                .args(["/pid", &self.pid.to_string(), "/f", "/t"])
                .stdin(std::process::Stdio::null())
                .stdout(std::process::Stdio::null())
                .stderr(std::process::Stdio::null())
                .status();
            if let Err(e) = killed {
                warn!(pid = %self.pid, error = %e, "taskkill failed");
            }
        }

        if let Err(e) = self.child.start_kill() {
            debug!(pid = %self.pid, error = %e, "Process already gone");
        }
    }

    fn record(&mut self, status: ExitStatus) {
        let code = exit_code_of(status);
        debug!(pid = %self.pid, code, elapsed = ?self.started.elapsed(), "Process exited");
        self.exit_code = Some(code);
    }

    pub(crate) fn take_stdin(&mut self) -> Option<ChildStdin> {
        self.child.stdin.take()
    }

    pub(crate) fn take_stdout(&mut self) -> Option<ChildStdout> {
        self.child.stdout.take()
    }

    pub(crate) fn take_stderr(&mut self) -> Option<ChildStderr> {
        self.child.stderr.take()
    }
}

/// Numeric exit code; a signal-terminated process reports `128 + signal`
pub fn exit_code_of(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }

    -1
}
