//! Input feeding
//!
//! An [`InputFeed`] writes into a child's stdin in small non-blocking steps
//! driven by the handle's polling loop. The source is a list of lines, an
//! async line stream, or the stdout of the previous pipeline stage.

use std::collections::VecDeque;
use std::fmt;
use std::io;

use futures::stream::BoxStream;
use futures::{FutureExt, StreamExt};
use tokio::io::AsyncWriteExt;
use tokio::process::ChildStdin;
use tracing::{debug, trace};

use crate::{
    error::{ProcessError, Result},
    stage::{Next, Stage},
};

/// Where fed bytes come from
pub(crate) enum InputSource {
    Lines(VecDeque<String>),
    Stream(BoxStream<'static, String>),
    /// Stdout of the stage right before this one
    Upstream,
}

impl fmt::Debug for InputSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Lines(lines) => f.debug_tuple("Lines").field(&lines.len()).finish(),
            Self::Stream(_) => f.write_str("Stream"),
            Self::Upstream => f.write_str("Upstream"),
        }
    }
}

#[derive(Debug)]
pub(crate) struct InputFeed {
    source: InputSource,
    pending: Vec<u8>,
    offset: usize,
    close_when_done: bool,
    finished: bool,
    /// The child stopped reading before the source was exhausted
    abandoned: bool,
    failure: Option<ProcessError>,
}

impl InputFeed {
    fn new(source: InputSource, close_when_done: bool) -> Self {
        Self {
            source,
            pending: Vec::new(),
            offset: 0,
            close_when_done,
            finished: false,
            abandoned: false,
            failure: None,
        }
    }

    pub(crate) fn lines<I, S>(lines: I, close_when_done: bool) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(
            InputSource::Lines(lines.into_iter().map(Into::into).collect()),
            close_when_done,
        )
    }

    pub(crate) fn stream(stream: BoxStream<'static, String>, close_when_done: bool) -> Self {
        Self::new(InputSource::Stream(stream), close_when_done)
    }

    pub(crate) fn upstream() -> Self {
        Self::new(InputSource::Upstream, true)
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.finished
    }

    /// Fed from an upstream stage that still had output to give
    pub(crate) fn cuts_off_upstream(&self) -> bool {
        matches!(self.source, InputSource::Upstream) && (!self.finished || self.abandoned)
    }

    /// Failure raised by the upstream stage when its output ended
    pub(crate) fn take_failure(&mut self) -> Option<ProcessError> {
        self.failure.take()
    }

    /// Write as much as the pipe accepts right now; true if anything moved.
    ///
    /// `upstream` holds every stage before the one owning `stdin`.
    pub(crate) fn pump(
        &mut self,
        stdin: &mut Option<ChildStdin>,
        upstream: &mut [Stage],
    ) -> Result<bool> {
        let mut progress = false;

        while !self.finished {
            if self.offset < self.pending.len() {
                let Some(pipe) = stdin.as_mut() else {
                    self.abandon();
                    return Ok(true);
                };

                let attempt = tokio::task::unconstrained(pipe.write(&self.pending[self.offset..]))
                    .now_or_never();
                match attempt {
                    Some(Ok(0)) => {
                        self.abandon();
                        return Ok(true);
                    }
                    Some(Ok(written)) => {
                        self.offset += written;
                        progress = true;
                    }
                    Some(Err(e)) if e.kind() == io::ErrorKind::BrokenPipe => {
                        debug!("Process closed its input early");
                        self.abandon();
                        *stdin = None;
                        return Ok(true);
                    }
                    Some(Err(e)) if e.kind() == io::ErrorKind::Interrupted => {}
                    Some(Err(e)) => return Err(e.into()),
                    None => return Ok(progress),
                }
                continue;
            }

            self.pending.clear();
            self.offset = 0;

            match &mut self.source {
                InputSource::Lines(lines) => match lines.pop_front() {
                    Some(line) => self.queue_line(line),
                    None => self.complete(stdin),
                },
                InputSource::Stream(stream) => match stream.next().now_or_never() {
                    Some(Some(line)) => self.queue_line(line),
                    Some(None) => self.complete(stdin),
                    None => return Ok(progress),
                },
                InputSource::Upstream => match upstream.split_last_mut() {
                    Some((previous, rest)) => match previous.pull_for_downstream(rest)? {
                        Next::Bytes(bytes) => {
                            trace!(len = bytes.len(), "Forwarding upstream output");
                            self.pending = bytes;
                        }
                        Next::Idle => return Ok(progress),
                        Next::End => self.complete(stdin),
                        Next::Failed(err) => {
                            self.failure = Some(err);
                            self.complete(stdin);
                        }
                    },
                    None => self.complete(stdin),
                },
            }
            progress = true;
        }

        Ok(progress)
    }

    fn queue_line(&mut self, line: String) {
        self.pending = line.into_bytes();
        self.pending.push(b'\n');
    }

    fn complete(&mut self, stdin: &mut Option<ChildStdin>) {
        self.finished = true;
        if self.close_when_done {
            // Dropping the pipe delivers EOF to the child.
            *stdin = None;
        }
    }

    fn abandon(&mut self) {
        self.finished = true;
        self.abandoned = true;
        self.pending.clear();
        self.offset = 0;
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::process::Stdio;
    use tokio::io::AsyncReadExt;
    use tokio::process::Command;

    fn cat() -> tokio::process::Child {
        Command::new("cat")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .spawn()
            .unwrap()
    }

    async fn pump_to_end(feed: &mut InputFeed, stdin: &mut Option<ChildStdin>) {
        while !feed.is_finished() {
            if !feed.pump(stdin, &mut []).unwrap() {
                tokio::time::sleep(std::time::Duration::from_millis(1)).await;
            }
        }
    }

    #[tokio::test]
    async fn lines_are_newline_terminated_and_input_closed() {
        let mut child = cat();
        let mut stdin = child.stdin.take();
        let mut feed = InputFeed::lines(["x", "y"], true);

        pump_to_end(&mut feed, &mut stdin).await;
        assert!(stdin.is_none());

        let mut out = String::new();
        child.stdout.take().unwrap().read_to_string(&mut out).await.unwrap();
        assert_eq!(out, "x\ny\n");
        assert!(child.wait().await.unwrap().success());
    }

    #[tokio::test]
    async fn without_closing_keeps_pipe_open() {
        let mut child = cat();
        let mut stdin = child.stdin.take();
        let mut feed = InputFeed::lines(["x"], false);

        pump_to_end(&mut feed, &mut stdin).await;
        assert!(stdin.is_some());
        assert!(!feed.cuts_off_upstream());

        drop(stdin);
        child.wait().await.unwrap();
    }

    #[tokio::test]
    async fn stream_source_is_drained() {
        let mut child = cat();
        let mut stdin = child.stdin.take();
        let lines = futures::stream::iter(vec!["a".to_string(), "b".to_string()]).boxed();
        let mut feed = InputFeed::stream(lines, true);

        pump_to_end(&mut feed, &mut stdin).await;

        let mut out = String::new();
        child.stdout.take().unwrap().read_to_string(&mut out).await.unwrap();
        assert_eq!(out, "a\nb\n");
        child.wait().await.unwrap();
    }

    #[tokio::test]
    async fn upstream_without_stages_ends_immediately() {
        let mut child = cat();
        let mut stdin = child.stdin.take();
        let mut feed = InputFeed::upstream();

        assert!(feed.pump(&mut stdin, &mut []).unwrap());
        assert!(feed.is_finished());
        assert!(stdin.is_none());
        child.wait().await.unwrap();
    }
}
