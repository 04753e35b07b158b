//! Buffered incremental reader/writer over a socket.
//!
//! [`ByteStream`] owns the raw I/O object plus a receive buffer. It supplies
//! the two read primitives the parsers are built on: read until a delimiter
//! and read an exact byte count, both with explicit timeouts. Bytes read past
//! a delimiter or count stay in the buffer for the next call, so no data is
//! lost across calls, which is what lets the same stream be re-homed into the
//! WebSocket codec after an upgrade.

use std::io;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::protocol::ParseError;
use crate::utils::find_subsequence;

const READ_CHUNK: usize = 8 * 1024;

/// A buffered byte stream over an async socket.
#[derive(Debug)]
pub struct ByteStream<S> {
    io: S,
    buffer: BytesMut,
}

impl<S> ByteStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(io: S) -> Self {
        Self { io, buffer: BytesMut::with_capacity(READ_CHUNK) }
    }

    /// Bytes read from the socket but not yet consumed by a read call.
    pub fn buffered(&self) -> &[u8] {
        &self.buffer
    }

    /// Reads until `delimiter` first occurs, returning everything up to and
    /// including it. `max_len` caps the bytes examined; exceeding it yields
    /// [`ParseError::TooLargeHeader`].
    ///
    /// The timeout applies to each socket read individually: it fires when no
    /// data at all arrives within `timeout`.
    pub async fn read_until(
        &mut self,
        delimiter: &[u8],
        timeout: Duration,
        max_len: usize,
    ) -> Result<Bytes, ParseError> {
        // Resume scanning where the previous pass left off; the delimiter may
        // straddle a read boundary.
        let mut scanned = 0usize;
        loop {
            let start = scanned.saturating_sub(delimiter.len().saturating_sub(1));
            if let Some(pos) = find_subsequence(&self.buffer[start..], delimiter) {
                let end = start + pos + delimiter.len();
                return Ok(self.buffer.split_to(end).freeze());
            }
            scanned = self.buffer.len();
            if scanned > max_len {
                return Err(ParseError::too_large_header(scanned, max_len));
            }
            self.fill(timeout).await?;
        }
    }

    /// Waits until at least one byte is available, without consuming it.
    /// Returns immediately when the buffer already holds data.
    pub async fn await_data(&mut self, timeout: Duration) -> Result<(), ParseError> {
        if self.buffer.is_empty() {
            self.fill(timeout).await?;
        }
        Ok(())
    }

    /// Reads exactly `n` bytes, looping on short reads.
    pub async fn read_exact(&mut self, n: usize, timeout: Duration) -> Result<Bytes, ParseError> {
        while self.buffer.len() < n {
            self.fill(timeout).await?;
        }
        Ok(self.buffer.split_to(n).freeze())
    }

    /// One socket read into the buffer. A zero-length read means the peer
    /// closed before satisfying the request.
    async fn fill(&mut self, timeout: Duration) -> Result<(), ParseError> {
        self.buffer.reserve(READ_CHUNK);
        let n = tokio::time::timeout(timeout, self.io.read_buf(&mut self.buffer))
            .await
            .map_err(|_| ParseError::Timeout)?
            .map_err(map_read_err)?;
        if n == 0 {
            return Err(ParseError::ConnectionAborted);
        }
        Ok(())
    }

    pub async fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        self.io.write_all(data).await
    }

    pub async fn flush(&mut self) -> io::Result<()> {
        self.io.flush().await
    }

    pub async fn shutdown(&mut self) -> io::Result<()> {
        self.io.shutdown().await
    }
}

fn map_read_err(e: io::Error) -> ParseError {
    match e.kind() {
        io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::UnexpectedEof => ParseError::ConnectionAborted,
        _ => ParseError::Io { source: e },
    }
}
