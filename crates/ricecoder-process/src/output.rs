//! Output channels, tagged lines and channel routing

use std::fmt;

use serde::{Deserialize, Serialize};

/// One of the two process output channels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Stdout,
    Stderr,
}

impl Channel {
    /// Conventional file descriptor number (1 or 2)
    pub const fn fd(self) -> i32 {
        match self {
            Self::Stdout => 1,
            Self::Stderr => 2,
        }
    }

    /// The opposite channel
    pub const fn other(self) -> Self {
        match self {
            Self::Stdout => Self::Stderr,
            Self::Stderr => Self::Stdout,
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stdout => f.write_str("stdout"),
            Self::Stderr => f.write_str("stderr"),
        }
    }
}

/// A line of process output without its terminator, tagged with the channel it was routed to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLine {
    channel: Channel,
    line: String,
}

impl OutputLine {
    /// Create a line tagged with `channel`
    pub fn new(channel: Channel, line: impl Into<String>) -> Self {
        Self {
            channel,
            line: line.into(),
        }
    }

    /// Channel the line was routed to
    pub fn channel(&self) -> Channel {
        self.channel
    }

    /// Line text
    pub fn line(&self) -> &str {
        &self.line
    }

    /// Consume into the line text
    pub fn into_line(self) -> String {
        self.line
    }

    /// Check if routed to stdout
    pub fn is_stdout(&self) -> bool {
        self.channel == Channel::Stdout
    }

    /// Check if routed to stderr
    pub fn is_stderr(&self) -> bool {
        self.channel == Channel::Stderr
    }
}

impl fmt::Display for OutputLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.channel.fd(), self.line)
    }
}

/// Raw bytes read from a channel, tagged with the channel they were routed to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputChunk {
    pub channel: Channel,
    pub bytes: Vec<u8>,
}

/// Maps each source channel onto the channel its output is reported as.
///
/// A channel without a target is suppressed: the process writes it to the null device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Routing {
    stdout: Option<Channel>,
    stderr: Option<Channel>,
}

impl Default for Routing {
    fn default() -> Self {
        Self {
            stdout: Some(Channel::Stdout),
            stderr: Some(Channel::Stderr),
        }
    }
}

impl Routing {
    /// Channel that output read from `source` is tagged with
    pub fn target(&self, source: Channel) -> Option<Channel> {
        match source {
            Channel::Stdout => self.stdout,
            Channel::Stderr => self.stderr,
        }
    }

    /// Whether `source` must be captured at all
    pub fn captures(&self, source: Channel) -> bool {
        self.target(source).is_some()
    }

    /// Report output of `source` as `target`
    pub fn redirect(&mut self, source: Channel, target: Channel) {
        *self.slot(source) = Some(target);
    }

    /// Discard output of `source`
    pub fn suppress(&mut self, source: Channel) {
        *self.slot(source) = None;
    }

    fn slot(&mut self, source: Channel) -> &mut Option<Channel> {
        match source {
            Channel::Stdout => &mut self.stdout,
            Channel::Stderr => &mut self.stderr,
        }
    }
}

/// Accumulates raw bytes of one channel and splits them into lines.
///
/// Lines end at `\n`; a trailing `\r` is dropped. Invalid UTF-8 is replaced lossily.
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
    /// Bytes before this offset were already handed out
    start: usize,
    /// Bytes before this offset hold no terminator
    scanned: usize,
}

impl LineBuffer {
    /// Create an empty buffer
    pub fn new() -> Self {
        Self::default()
    }

    /// Append bytes read from the channel
    pub fn extend(&mut self, bytes: &[u8]) {
        // Consumed bytes are dropped once they make up half the buffer, so
        // the copying stays linear in the total amount of output.
        if self.start > 0 && self.start * 2 >= self.pending.len() {
            self.pending.drain(..self.start);
            self.scanned -= self.start;
            self.start = 0;
        }
        self.pending.extend_from_slice(bytes);
    }

    /// Whether no unconsumed bytes are left
    pub fn is_empty(&self) -> bool {
        self.start == self.pending.len()
    }

    /// Number of unconsumed bytes
    pub fn len(&self) -> usize {
        self.pending.len() - self.start
    }

    /// Next complete line, if a terminator has arrived
    pub fn next_line(&mut self) -> Option<String> {
        let from = self.scanned.max(self.start);
        let newline = self.pending[from..]
            .iter()
            .position(|&b| b == b'\n')
            .map(|offset| from + offset);

        match newline {
            Some(end) => {
                let line = decode(&self.pending[self.start..end]);
                self.start = end + 1;
                self.scanned = self.start;
                if self.is_empty() {
                    self.clear();
                }
                Some(line)
            }
            None => {
                self.scanned = self.pending.len();
                None
            }
        }
    }

    /// Unterminated fragment left at end of stream
    pub fn finish(&mut self) -> Option<String> {
        if self.is_empty() {
            return None;
        }
        let line = decode(&self.pending[self.start..]);
        self.clear();
        Some(line)
    }

    /// Every unconsumed byte, bypassing line framing
    pub fn take_bytes(&mut self) -> Vec<u8> {
        let mut bytes = std::mem::take(&mut self.pending);
        bytes.drain(..self.start);
        self.start = 0;
        self.scanned = 0;
        bytes
    }

    /// Drop everything buffered
    pub fn clear(&mut self) {
        self.pending.clear();
        self.start = 0;
        self.scanned = 0;
    }
}

fn decode(bytes: &[u8]) -> String {
    let bytes = bytes.strip_suffix(b"\r").unwrap_or(bytes);
    String::from_utf8_lossy(bytes).into_owned()
}
