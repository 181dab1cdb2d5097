//! Polling stream reader
//!
//! Wraps a blocking-style process pipe into a buffered byte source that never
//! parks the caller: every fill attempt either returns what is ready right now
//! or reports that nothing is ready, so the owner can check its deadline and
//! sleep briefly before trying again.

use std::io;

use futures::FutureExt;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Size of the internal read buffer
pub const BUFFER_CAPACITY: usize = 8 * 1024;

/// Outcome of a non-blocking fill attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fill {
    /// Buffered bytes are available
    Ready,
    /// Nothing is ready yet; poll again later
    Idle,
    /// The source is closed and the buffer is exhausted
    Closed,
}

/// Buffered, non-blocking view over an async byte source
#[derive(Debug)]
pub struct PollingReader<R> {
    source: Option<R>,
    buffer: Box<[u8]>,
    pos: usize,
    filled: usize,
}

impl<R> PollingReader<R>
where
    R: AsyncRead + Unpin,
{
    /// Wrap `source` with an empty buffer
    pub fn new(source: R) -> Self {
        Self {
            source: Some(source),
            buffer: vec![0; BUFFER_CAPACITY].into_boxed_slice(),
            pos: 0,
            filled: 0,
        }
    }

    /// Bytes read but not yet consumed
    pub fn buffered(&self) -> &[u8] {
        &self.buffer[self.pos..self.filled]
    }

    /// Mark `amount` buffered bytes as read
    pub fn consume(&mut self, amount: usize) {
        self.pos = (self.pos + amount).min(self.filled);
    }

    /// Whether every buffered byte was consumed
    pub fn is_exhausted(&self) -> bool {
        self.pos >= self.filled
    }

    /// Closed once the source is gone and every buffered byte was consumed
    pub fn is_closed(&self) -> bool {
        self.source.is_none() && self.is_exhausted()
    }

    /// Try to make bytes available without waiting.
    ///
    /// `owner_closed` reports whether the owning process has finished. A source
    /// with nothing ready is only treated as closed when the owner is closed too;
    /// otherwise the attempt is reported as [`Fill::Idle`].
    pub fn fill_now(&mut self, owner_closed: bool) -> io::Result<Fill> {
        if !self.is_exhausted() {
            return Ok(Fill::Ready);
        }
        let Some(source) = self.source.as_mut() else {
            return Ok(Fill::Closed);
        };

        // Unconstrained so tokio's cooperative budget never looks like an empty pipe.
        let attempt = tokio::task::unconstrained(source.read(&mut self.buffer)).now_or_never();

        match attempt {
            Some(Ok(0)) => {
                self.source = None;
                Ok(Fill::Closed)
            }
            Some(Ok(read)) => {
                self.pos = 0;
                self.filled = read;
                Ok(Fill::Ready)
            }
            Some(Err(e)) if e.kind() == io::ErrorKind::Interrupted => Ok(Fill::Idle),
            Some(Err(e)) => Err(e),
            None if owner_closed => {
                self.source = None;
                Ok(Fill::Closed)
            }
            None => Ok(Fill::Idle),
        }
    }

    /// Drop the underlying source and any buffered bytes
    pub fn release(&mut self) {
        self.source = None;
        self.pos = 0;
        self.filled = 0;
    }
}
