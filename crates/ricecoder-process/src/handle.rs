//! Process handle
//!
//! A [`ProcessHandle`] owns a started process (or the last stage of a pipeline
//! together with every stage before it) and exposes the consumption surface:
//! lazy line and byte streams, eager retrieval, waiting, input feeding and
//! piping. Consumption never parks on a pipe. Each round reads whatever is
//! ready, feeds pending input, and otherwise sleeps for the poll interval, so
//! deadlines are checked between every pair of reads.

use std::time::{Duration, Instant};

use futures::stream::{self, BoxStream, Stream};
use futures::{StreamExt, TryStreamExt};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{debug, trace};

use crate::{
    config::ProcessSpec,
    error::{ProcessError, Result},
    exit::ExitCodePolicy,
    input::InputFeed,
    manager::ProcessManager,
    output::{Channel, OutputChunk, OutputLine},
    result::ProcessOutput,
    stage::Stage,
};

/// Delimiter placed between lines by [`ProcessHandle::get`]
const LINE_SEPARATOR: &str = "\n";

/// Handle to a running process or pipeline
///
/// Dropping a handle that was never closed kills processes still running.
/// Call [`ProcessHandle::close`] to release channels, wait for exit and have
/// the exit code checked.
#[derive(Debug)]
pub struct ProcessHandle {
    /// Earlier pipeline stages, head first
    upstream: Vec<Stage>,
    /// The stage whose output this handle exposes
    stage: Stage,
    manager: ProcessManager,
    closed: bool,
}

impl ProcessHandle {
    pub(crate) fn spawn(spec: ProcessSpec, manager: ProcessManager) -> Result<Self> {
        let stage = Stage::spawn(spec, manager.spawner())?;
        Ok(Self {
            upstream: Vec::new(),
            stage,
            manager,
            closed: false,
        })
    }

    /// Get process ID of the last stage
    pub fn pid(&self) -> u32 {
        self.stage.child.pid()
    }

    /// Instant the last stage was spawned
    pub fn started_at(&self) -> Instant {
        self.stage.child.started_at()
    }

    /// Program followed by its arguments, as handed to the OS
    pub fn command_line(&self) -> Vec<String> {
        self.stage.spec.command_line()
    }

    /// Timeout of the last stage
    pub fn timeout(&self) -> Option<Duration> {
        self.stage.spec.timeout
    }

    /// Whether the handle has been closed
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Number of processes in this pipeline
    pub fn stage_count(&self) -> usize {
        self.upstream.len() + 1
    }

    /// Kill the process once `timeout` has passed since it started
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.stage.spec.timeout = Some(timeout);
        self.stage.child.set_timeout(Some(timeout));
        self
    }

    /// Accept only `code`
    pub fn with_allowed_exit_code(self, code: i32) -> Self {
        self.with_exit_code_policy(ExitCodePolicy::Code(code))
    }

    /// Accept any of `codes`
    pub fn with_allowed_exit_codes<I>(self, codes: I) -> Self
    where
        I: IntoIterator<Item = i32>,
    {
        self.with_exit_code_policy(ExitCodePolicy::one_of(codes))
    }

    /// Accept every exit code
    pub fn with_any_exit_code(self) -> Self {
        self.with_exit_code_policy(ExitCodePolicy::Any)
    }

    /// Replace the exit code policy
    pub fn with_exit_code_policy(mut self, policy: ExitCodePolicy) -> Self {
        self.stage.spec.exit_policy = policy;
        self
    }

    /// Defer the exit code check from the end of output to [`ProcessHandle::close`]
    pub fn without_close_after_last(mut self) -> Self {
        self.stage.spec.close_after_last = false;
        self
    }

    /// Write `lines` (each followed by `\n`) to stdin, then close it
    pub fn input_lines<I, S>(self, lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.with_input(InputFeed::lines(lines, true))
    }

    /// Write `lines` to stdin and keep it open for interactive use
    pub fn input_lines_without_closing<I, S>(self, lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.with_input(InputFeed::lines(lines, false))
    }

    /// Write every line of `lines` to stdin as it becomes ready, then close it
    pub fn input_stream<S>(self, lines: S) -> Self
    where
        S: Stream<Item = String> + Send + 'static,
    {
        self.with_input(InputFeed::stream(lines.boxed(), true))
    }

    /// Write `lines` to stdin as they become ready and keep it open
    pub fn input_stream_without_closing<S>(self, lines: S) -> Self
    where
        S: Stream<Item = String> + Send + 'static,
    {
        self.with_input(InputFeed::stream(lines.boxed(), false))
    }

    /// Input always goes to the head of the pipeline
    fn with_input(mut self, feed: InputFeed) -> Self {
        let head = match self.upstream.first_mut() {
            Some(head) => head,
            None => &mut self.stage,
        };
        head.set_input(feed);
        self
    }

    /// Start `command` with default settings and feed it this handle's stdout
    pub fn pipe<I, S>(self, command: impl Into<String>, args: I) -> Result<ProcessHandle>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let next = self.manager.command(command).args(args).start()?;
        Ok(self.pipe_into(next))
    }

    /// Like [`ProcessHandle::pipe`], running `script` through the default shell
    pub fn pipe_shell(self, script: impl Into<String>) -> Result<ProcessHandle> {
        let next = self.manager.shell(script).start()?;
        Ok(self.pipe_into(next))
    }

    /// Feed this handle's stdout into an already started handle.
    ///
    /// Returns a handle for the combined pipeline, exposing the output of
    /// `next`. If `next` is a pipeline itself, its head stage is fed.
    pub fn pipe_into(self, next: ProcessHandle) -> ProcessHandle {
        let ProcessHandle {
            mut upstream,
            stage,
            ..
        } = self;
        let ProcessHandle {
            upstream: next_upstream,
            stage: mut next_stage,
            manager,
            closed,
        } = next;

        debug!(
            from = %stage.child.pid(),
            to = %next_stage.child.pid(),
            "Connecting pipeline stages"
        );

        upstream.push(stage);
        let mut next_upstream = next_upstream.into_iter();
        match next_upstream.next() {
            Some(mut head) => {
                head.set_input(InputFeed::upstream());
                upstream.push(head);
                upstream.extend(next_upstream);
            }
            None => next_stage.set_input(InputFeed::upstream()),
        }

        ProcessHandle {
            upstream,
            stage: next_stage,
            manager,
            closed,
        }
    }

    /// Lazy sequence of routed output lines.
    ///
    /// Stopping early checks nothing. Reaching the end closes the handle when
    /// close-after-last is enabled (the default), failing the stream with the
    /// exit code error if the code is rejected.
    pub fn lines(&mut self) -> BoxStream<'_, Result<OutputLine>> {
        stream::try_unfold(self, |handle| async move {
            let line = handle.next_line().await?;
            Ok::<_, ProcessError>(line.map(|line| (line, handle)))
        })
        .boxed()
    }

    /// Lazy sequence of output line texts, without channel tags
    pub fn stream(&mut self) -> BoxStream<'_, Result<String>> {
        self.lines().map_ok(OutputLine::into_line).boxed()
    }

    /// Lazy sequence of raw output chunks, bypassing line framing
    pub fn stream_bytes(&mut self) -> BoxStream<'_, Result<OutputChunk>> {
        stream::try_unfold(self, |handle| async move {
            let chunk = handle.next_chunk().await?;
            Ok::<_, ProcessError>(chunk.map(|chunk| (chunk, handle)))
        })
        .boxed()
    }

    /// All output lines joined with `\n`, after the process exited and was checked
    pub async fn get(&mut self) -> Result<String> {
        match self.collect_lines().await {
            Ok(lines) => {
                self.close().await?;
                Ok(lines.join(LINE_SEPARATOR))
            }
            Err(err) => {
                self.release_after_failure().await;
                Err(err)
            }
        }
    }

    /// Like [`ProcessHandle::get`] but capturing the failure instead of returning it.
    ///
    /// With close-after-last disabled the output is kept next to the failure
    /// raised on close.
    pub async fn try_get(&mut self) -> ProcessOutput {
        let (lines, error) = match self.collect_lines().await {
            Ok(lines) => {
                let error = self.close().await.err();
                (lines, error)
            }
            Err(err) => {
                self.release_after_failure().await;
                (Vec::new(), Some(err))
            }
        };

        let keep_output = error.is_none() || !self.stage.spec.close_after_last;
        ProcessOutput::new(keep_output.then(|| lines.join(LINE_SEPARATOR)), error)
    }

    /// Wait for the process to exit, discarding its output.
    ///
    /// The exit code is not checked.
    pub async fn join(&mut self) -> Result<()> {
        self.wait_for_exit(false).await.map(drop)
    }

    /// Wait for the process to exit and return its code.
    ///
    /// Output produced meanwhile stays buffered for later consumption.
    pub async fn exit_code(&mut self) -> Result<i32> {
        self.wait_for_exit(true).await
    }

    /// Whether the exit code satisfies the exit code policy
    pub async fn is_successful(&mut self) -> Result<bool> {
        let code = self.exit_code().await?;
        Ok(self.stage.spec.exit_policy.accepts(code))
    }

    /// Copy stdout-routed output into `writer`, then close the handle
    pub async fn write_to<W>(&mut self, writer: &mut W) -> Result<()>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        match self.copy_stdout(writer).await {
            Ok(()) => self.close().await,
            Err(err) => {
                self.release_after_failure().await;
                Err(err)
            }
        }
    }

    /// Release every channel, wait for every stage and check exit codes.
    ///
    /// Stages are checked head first and the first failure is returned.
    /// Calling it again does nothing.
    pub async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        debug!(pid = %self.pid(), stages = self.stage_count(), "Closing process");

        for index in 0..self.stage_count() {
            if self.stage_at(index).release() && index > 0 {
                self.stage_at(index - 1).cut_off = true;
            }
        }

        let mut first_error = None;
        for stage in self.stages_mut() {
            if let Err(err) = stage.finish().await {
                first_error.get_or_insert(err);
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn next_line(&mut self) -> Result<Option<OutputLine>> {
        loop {
            if self.closed {
                return Ok(None);
            }
            self.check_deadlines().await?;

            if let Some(line) = self.stage.next_line() {
                return Ok(Some(line));
            }
            if self.stage.output_closed() {
                self.end_of_output().await?;
                return Ok(None);
            }
            self.step().await?;
        }
    }

    async fn next_chunk(&mut self) -> Result<Option<OutputChunk>> {
        loop {
            if self.closed {
                return Ok(None);
            }
            self.check_deadlines().await?;

            if let Some(chunk) = self.stage.next_chunk() {
                return Ok(Some(chunk));
            }
            if self.stage.output_closed() {
                self.end_of_output().await?;
                return Ok(None);
            }
            self.step().await?;
        }
    }

    async fn end_of_output(&mut self) -> Result<()> {
        if self.stage.spec.close_after_last {
            self.close().await
        } else {
            Ok(())
        }
    }

    async fn wait_for_exit(&mut self, keep_output: bool) -> Result<i32> {
        loop {
            self.check_deadlines().await?;
            if let Some(code) = self.stage.child.try_exit_code()? {
                return Ok(code);
            }
            if !keep_output {
                self.stage.discard_output();
            }
            self.step().await?;
        }
    }

    async fn collect_lines(&mut self) -> Result<Vec<String>> {
        let mut lines = Vec::new();
        while let Some(line) = self.next_line().await? {
            lines.push(line.into_line());
        }
        Ok(lines)
    }

    async fn copy_stdout<W>(&mut self, writer: &mut W) -> Result<()>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        while let Some(chunk) = self.next_chunk().await? {
            if chunk.channel == Channel::Stdout {
                writer.write_all(&chunk.bytes).await?;
            }
        }
        writer.flush().await?;
        Ok(())
    }

    async fn release_after_failure(&mut self) {
        if let Err(err) = self.close().await {
            debug!(error = %err, "Ignoring close failure after an earlier error");
        }
    }

    /// Re-raise an earlier timeout, or kill the pipeline if a deadline passed
    async fn check_deadlines(&mut self) -> Result<()> {
        if let Some(stage) = self.stages().find(|stage| stage.child.timed_out()) {
            return Err(stage.timeout_error());
        }
        if self.closed {
            return Ok(());
        }

        // A stage that exited on its own before being killed completed naturally.
        let now = Instant::now();
        let mut expired = None;
        for (index, stage) in self.stages_mut().enumerate() {
            if stage.child.is_past_deadline(now) && stage.child.try_exit_code()?.is_none() {
                expired = Some(index);
                break;
            }
        }
        let Some(expired) = expired else {
            return Ok(());
        };

        for (index, stage) in self.stages_mut().enumerate() {
            if index == expired {
                stage.child.terminate().await;
            } else {
                stage.abort().await;
            }
        }
        Err(self.stage_at(expired).timeout_error())
    }

    /// One round over the pipeline; input pumping pulls from upstream stages
    fn poll_round(&mut self) -> Result<bool> {
        self.stage.round(&mut self.upstream)
    }

    async fn step(&mut self) -> Result<()> {
        if !self.poll_round()? {
            self.idle().await;
        }
        Ok(())
    }

    async fn idle(&mut self) {
        trace!(pid = %self.pid(), "Nothing ready, sleeping");
        tokio::time::sleep(self.stage.spec.poll_interval).await;
        for stage in self.stages_mut() {
            stage.child.mark_idle();
        }
    }

    fn stages(&self) -> impl Iterator<Item = &Stage> {
        self.upstream.iter().chain(std::iter::once(&self.stage))
    }

    fn stages_mut(&mut self) -> impl Iterator<Item = &mut Stage> {
        self.upstream
            .iter_mut()
            .chain(std::iter::once(&mut self.stage))
    }

    fn stage_at(&mut self, index: usize) -> &mut Stage {
        if index < self.upstream.len() {
            &mut self.upstream[index]
        } else {
            &mut self.stage
        }
    }
}
