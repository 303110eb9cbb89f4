//! The local client's side of a session
//!
//! Line reads are bounded by the idle timeout and interrupted by
//! shutdown; writes flush immediately so every reply reaches the
//! client before the next command is read.

use crate::error::Result;
use crate::link::trim_line_end;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Result of waiting for the next client line.
#[derive(Debug, PartialEq, Eq)]
pub enum Inbound {
    /// A line with its terminator removed.
    Line(String),
    /// The client closed the connection.
    Closed,
    IdleTimeout,
    /// No LF within [`MAX_COMMAND_LINE`] bytes.
    TooLong,
    /// The gateway is shutting down.
    Shutdown,
}

/// Longest command line accepted from a client, terminator included.
pub const MAX_COMMAND_LINE: usize = 8 * 1024;

/// Buffered connection to a local mail client.
pub struct ClientConn<S> {
    stream: BufReader<S>,
}

impl<S: AsyncRead + AsyncWrite + Unpin> ClientConn<S> {
    pub fn new(stream: S) -> Self {
        Self {
            stream: BufReader::new(stream),
        }
    }

    /// Wait for the next command line.
    ///
    /// # Errors
    ///
    /// Returns an error if reading from the client socket fails.
    pub async fn next_line(&mut self, idle: Duration, cancel: &CancellationToken) -> Result<Inbound> {
        let mut buf = Vec::new();
        let mut capped = (&mut self.stream).take(MAX_COMMAND_LINE as u64);
        tokio::select! {
            biased;
            () = cancel.cancelled() => Ok(Inbound::Shutdown),
            read = timeout(idle, capped.read_until(b'\n', &mut buf)) => match read {
                Err(_) => Ok(Inbound::IdleTimeout),
                Ok(Err(e)) => Err(e.into()),
                Ok(Ok(0)) => Ok(Inbound::Closed),
                Ok(Ok(n)) if n >= MAX_COMMAND_LINE && !buf.ends_with(b"\n") => Ok(Inbound::TooLong),
                Ok(Ok(_)) => Ok(Inbound::Line(
                    String::from_utf8_lossy(trim_line_end(&buf)).into_owned(),
                )),
            },
        }
    }

    /// Write `line` plus CRLF and flush.
    ///
    /// # Errors
    ///
    /// Returns an error if writing to the client socket fails.
    pub async fn send(&mut self, line: &str) -> Result<()> {
        debug!("PROXY -> CLIENT: {}", line);
        let stream = self.stream.get_mut();
        stream.write_all(line.as_bytes()).await?;
        stream.write_all(b"\r\n").await?;
        stream.flush().await?;
        Ok(())
    }

    /// Write already terminated bytes and flush.
    ///
    /// # Errors
    ///
    /// Returns an error if writing to the client socket fails.
    pub async fn send_raw(&mut self, bytes: &[u8]) -> Result<()> {
        debug!("PROXY -> CLIENT: [{} bytes]", bytes.len());
        let stream = self.stream.get_mut();
        stream.write_all(bytes).await?;
        stream.flush().await?;
        Ok(())
    }

    /// The buffered reader, for bulk reads such as a message body.
    pub const fn reader_mut(&mut self) -> &mut BufReader<S> {
        &mut self.stream
    }

    pub async fn shutdown(&mut self) {
        let _ = self.stream.get_mut().shutdown().await;
    }
}
