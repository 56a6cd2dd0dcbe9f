//! A manually controllable prebuffer for Tokio `AsyncRead`.
//!
//! This module provides [`Prebuffered`], a wrapper around an `AsyncRead`
//! that accumulates input into a bounded buffer and hands it out one line
//! at a time.

use bytes::{Bytes, BytesMut};
use tokio::io::{self, AsyncRead, AsyncReadExt};

/// Initial capacity for the internal buffer.
const INITIAL_CAPACITY: usize = 4 * 1024;

/// A prebuffering wrapper around an `AsyncRead`.
///
/// `Prebuffered` buffers at most `max_len` bytes from the underlying reader
/// and extracts newline-terminated lines from the front.
pub struct Prebuffered<R> {
    inner: R,
    buf: BytesMut,
    max_len: usize,
}

impl<R: AsyncRead + Unpin> Prebuffered<R> {
    /// Creates a new `Prebuffered` wrapper.
    pub(crate) fn new(inner: R, max_len: usize) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_CAPACITY),
            max_len,
        }
    }

    /// Returns the unconsumed buffered bytes.
    #[cfg(test)]
    pub(crate) fn buffer(&self) -> &[u8] {
        &self.buf[..]
    }

    fn is_full(&self) -> bool {
        self.buf.len() == self.max_len
    }

    /// Buffers more data from the inner reader.
    async fn buffer_more(&mut self) -> io::Result<usize> {
        let max = self.max_len.saturating_sub(self.buf.len());
        let n = (&mut self.inner)
            .take(max as u64)
            .read_buf(&mut self.buf)
            .await?;
        Ok(n)
    }

    /// Reads one line from the stream, including its `\n` terminator.
    ///
    /// When `max_len` bytes accumulate without a newline, the full buffer is
    /// returned as an unterminated chunk. At EOF, whatever remains buffered
    /// is returned; an empty result means the stream is exhausted.
    pub(crate) async fn read_line(&mut self) -> io::Result<Bytes> {
        loop {
            if let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
                return Ok(self.buf.split_to(pos + 1).freeze());
            }
            if self.is_full() || self.buffer_more().await? == 0 {
                return Ok(self.buf.split().freeze());
            }
        }
    }
}
