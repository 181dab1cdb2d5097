//! Merges the two output channels of a process into routed lines or chunks

use std::io;

use tokio::io::AsyncRead;
use tokio::process::{ChildStderr, ChildStdout};

use crate::output::{Channel, LineBuffer, OutputChunk, OutputLine, Routing};
use crate::reader::{Fill, PollingReader};

/// One source channel: its reader (while open), its unsplit bytes and its routing target
#[derive(Debug)]
struct Port<R> {
    target: Option<Channel>,
    reader: Option<PollingReader<R>>,
    lines: LineBuffer,
}

impl<R> Port<R>
where
    R: AsyncRead + Unpin,
{
    fn new(source: Option<R>, target: Option<Channel>) -> Self {
        Self {
            target,
            reader: source.map(PollingReader::new),
            lines: LineBuffer::new(),
        }
    }

    fn is_open(&self) -> bool {
        self.reader.is_some()
    }

    fn fill_now(&mut self, owner_closed: bool) -> io::Result<bool> {
        let Some(reader) = self.reader.as_mut() else {
            return Ok(false);
        };
        match reader.fill_now(owner_closed)? {
            Fill::Ready => {
                let bytes = reader.buffered();
                let len = bytes.len();
                self.lines.extend(bytes);
                reader.consume(len);
                Ok(true)
            }
            Fill::Idle => Ok(false),
            Fill::Closed => {
                self.reader = None;
                Ok(true)
            }
        }
    }

    fn next_line(&mut self) -> Option<OutputLine> {
        loop {
            let line = match self.lines.next_line() {
                Some(line) => line,
                None if !self.is_open() => self.lines.finish()?,
                None => return None,
            };
            if let Some(target) = self.target {
                return Some(OutputLine::new(target, line));
            }
        }
    }

    fn next_chunk(&mut self) -> Option<OutputChunk> {
        if self.lines.is_empty() {
            return None;
        }
        let bytes = self.lines.take_bytes();
        self.target.map(|channel| OutputChunk { channel, bytes })
    }

    fn release(&mut self) {
        if let Some(reader) = self.reader.as_mut() {
            reader.release();
        }
        self.reader = None;
        self.lines.clear();
    }
}

/// Reads stdout and stderr side by side and hands out routed output.
///
/// Relative order within a channel is preserved; across channels lines come out
/// in the order their bytes were read, alternating when both have backlog.
#[derive(Debug)]
pub(crate) struct Multiplexer<O = ChildStdout, E = ChildStderr> {
    stdout: Port<O>,
    stderr: Port<E>,
    turn: Channel,
}

impl<O, E> Multiplexer<O, E>
where
    O: AsyncRead + Unpin,
    E: AsyncRead + Unpin,
{
    pub(crate) fn new(stdout: Option<O>, stderr: Option<E>, routing: Routing) -> Self {
        Self {
            stdout: Port::new(stdout, routing.target(Channel::Stdout)),
            stderr: Port::new(stderr, routing.target(Channel::Stderr)),
            turn: Channel::Stdout,
        }
    }

    /// Pull whatever both channels have ready right now; true if anything changed
    pub(crate) fn fill_now(&mut self, owner_closed: bool) -> io::Result<bool> {
        let stdout = self.stdout.fill_now(owner_closed)?;
        let stderr = self.stderr.fill_now(owner_closed)?;
        Ok(stdout || stderr)
    }

    /// Both channels reached end of data
    pub(crate) fn is_closed(&self) -> bool {
        !self.stdout.is_open() && !self.stderr.is_open()
    }

    pub(crate) fn next_line(&mut self) -> Option<OutputLine> {
        let first = self.turn;
        for channel in [first, first.other()] {
            let line = match channel {
                Channel::Stdout => self.stdout.next_line(),
                Channel::Stderr => self.stderr.next_line(),
            };
            if line.is_some() {
                self.turn = channel.other();
                return line;
            }
        }
        None
    }

    pub(crate) fn next_chunk(&mut self) -> Option<OutputChunk> {
        let first = self.turn;
        for channel in [first, first.other()] {
            let chunk = match channel {
                Channel::Stdout => self.stdout.next_chunk(),
                Channel::Stderr => self.stderr.next_chunk(),
            };
            if chunk.is_some() {
                self.turn = channel.other();
                return chunk;
            }
        }
        None
    }

    /// Forget buffered output without closing the channels
    pub(crate) fn discard(&mut self) {
        self.stdout.lines.clear();
        self.stderr.lines.clear();
    }

    /// Close both channels and drop anything buffered
    pub(crate) fn release(&mut self) {
        self.stdout.release();
        self.stderr.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type TestMux = Multiplexer<&'static [u8], &'static [u8]>;

    fn drain_lines(mux: &mut TestMux) -> Vec<OutputLine> {
        let mut lines = Vec::new();
        loop {
            while let Some(line) = mux.next_line() {
                lines.push(line);
            }
            if mux.is_closed() {
                break;
            }
            mux.fill_now(false).unwrap();
        }
        lines
    }

    #[tokio::test]
    async fn identity_routing_tags_each_channel() {
        let mut mux = TestMux::new(Some(b"out1\nout2\n"), Some(b"err1\n"), Routing::default());
        let lines = drain_lines(&mut mux);

        let stdout: Vec<_> = lines.iter().filter(|l| l.is_stdout()).map(|l| l.line()).collect();
        let stderr: Vec<_> = lines.iter().filter(|l| l.is_stderr()).map(|l| l.line()).collect();
        assert_eq!(stdout, vec!["out1", "out2"]);
        assert_eq!(stderr, vec!["err1"]);
    }

    #[tokio::test]
    async fn redirected_channel_is_tagged_as_target() {
        let mut routing = Routing::default();
        routing.redirect(Channel::Stderr, Channel::Stdout);
        let mut mux = TestMux::new(None, Some(b"e1\ne2"), routing);

        let lines = drain_lines(&mut mux);
        assert_eq!(
            lines,
            vec![
                OutputLine::new(Channel::Stdout, "e1"),
                OutputLine::new(Channel::Stdout, "e2"),
            ]
        );
    }

    #[tokio::test]
    async fn suppressed_channel_yields_nothing() {
        let mut routing = Routing::default();
        routing.suppress(Channel::Stdout);
        let mut mux = TestMux::new(Some(b"hidden\n"), Some(b"shown\n"), routing);

        let lines = drain_lines(&mut mux);
        assert_eq!(lines, vec![OutputLine::new(Channel::Stderr, "shown")]);
    }

    #[tokio::test]
    async fn chunks_bypass_line_framing() {
        let mut mux = TestMux::new(Some(b"no newline"), None, Routing::default());
        mux.fill_now(false).unwrap();

        let chunk = mux.next_chunk().unwrap();
        assert_eq!(chunk.channel, Channel::Stdout);
        assert_eq!(chunk.bytes, b"no newline".to_vec());
        assert!(mux.next_chunk().is_none());
    }

    #[tokio::test]
    async fn release_drops_backlog() {
        let mut mux = TestMux::new(Some(b"a\nb\n"), None, Routing::default());
        mux.fill_now(false).unwrap();
        mux.release();

        assert!(mux.is_closed());
        assert!(mux.next_line().is_none());
    }
}
