//! Upstream socket ownership and line I/O
//!
//! An [`UpstreamLink`] owns exactly one TCP connection to a mail
//! server, optionally wrapped in TLS. Reads are buffered and bounded
//! by a per-read timeout; writes go straight to the socket. A plain
//! link can be upgraded in place with [`UpstreamLink::upgrade_to_tls`]
//! once STARTTLS has been accepted.

use crate::error::{Error, Result};
use crate::tls;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader, ReadBuf};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::TlsConnector;
use tokio_rustls::client::TlsStream;
use tracing::debug;

/// Longest upstream line accepted, terminator included.
pub const MAX_LINE: usize = 64 * 1024;

/// How the first byte on a new link is sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Plain,
    /// TLS handshake right after the TCP connect.
    Tls,
}

/// Unified stream: plain TCP or TLS. Implements `AsyncRead` +
/// `AsyncWrite`.
pub enum LinkStream {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

impl AsyncRead for LinkStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match &mut *self {
            Self::Plain(s) => Pin::new(s).poll_read(cx, buf),
            Self::Tls(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for LinkStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match &mut *self {
            Self::Plain(s) => Pin::new(s).poll_write(cx, buf),
            Self::Tls(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match &mut *self {
            Self::Plain(s) => Pin::new(s).poll_flush(cx),
            Self::Tls(s) => Pin::new(s.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match &mut *self {
            Self::Plain(s) => Pin::new(s).poll_shutdown(cx),
            Self::Tls(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
        }
    }
}

/// One owned connection to an upstream mail server.
pub struct UpstreamLink {
    /// `None` once closed (or after a failed TLS upgrade).
    stream: Option<BufReader<LinkStream>>,
    peer: String,
    read_timeout: Duration,
}

impl UpstreamLink {
    /// Connect to `host:port`, performing the TLS handshake first
    /// when `transport` is [`Transport::Tls`].
    ///
    /// # Errors
    ///
    /// Returns an error if the TCP connect or TLS handshake fails or times out.
    pub async fn connect(
        host: &str,
        port: u16,
        transport: Transport,
        connector: &TlsConnector,
        read_timeout: Duration,
    ) -> Result<Self> {
        let addr = format!("{host}:{port}");
        debug!("Connecting to upstream at {} ({:?})", addr, transport);

        let tcp = timeout(read_timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| Error::Timeout("upstream connect"))?
            .map_err(|source| Error::Connect {
                addr: addr.clone(),
                source,
            })?;

        let stream = match transport {
            Transport::Plain => LinkStream::Plain(tcp),
            Transport::Tls => {
                let name = tls::server_name(host)?;
                let tls_stream = timeout(read_timeout, connector.connect(name, tcp))
                    .await
                    .map_err(|_| Error::Timeout("TLS handshake"))?
                    .map_err(|e| Error::Tls(e.to_string()))?;
                LinkStream::Tls(Box::new(tls_stream))
            }
        };

        Ok(Self {
            stream: Some(BufReader::new(stream)),
            peer: addr,
            read_timeout,
        })
    }

    /// `host:port` of the upstream server.
    #[must_use]
    pub fn peer(&self) -> &str {
        &self.peer
    }

    #[must_use]
    pub const fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    #[must_use]
    pub fn is_tls(&self) -> bool {
        matches!(
            self.stream.as_ref().map(BufReader::get_ref),
            Some(LinkStream::Tls(_))
        )
    }

    /// Direct access to the buffered stream, for bulk relays that
    /// write through it.
    ///
    /// # Errors
    ///
    /// Returns an error if the link is closed.
    pub fn stream_mut(&mut self) -> Result<&mut BufReader<LinkStream>> {
        self.stream.as_mut().ok_or(Error::Disconnected)
    }

    /// Read one line including its terminator, as raw bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the link is closed, the read times out, or the line
    /// exceeds [`MAX_LINE`].
    pub async fn read_line_bytes(&mut self) -> Result<Vec<u8>> {
        let limit = self.read_timeout;
        let reader = self.stream_mut()?;
        let mut buf = Vec::new();
        let mut capped = reader.take(MAX_LINE as u64);
        let n = timeout(limit, capped.read_until(b'\n', &mut buf))
            .await
            .map_err(|_| Error::Timeout("upstream response"))??;
        if n == 0 {
            return Err(Error::Disconnected);
        }
        if n >= MAX_LINE && !buf.ends_with(b"\n") {
            return Err(Error::LineTooLong("upstream", MAX_LINE));
        }
        Ok(buf)
    }

    /// Read one line without its terminator, decoded lossily.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails, as for
    /// [`read_line_bytes`](Self::read_line_bytes).
    pub async fn read_line(&mut self) -> Result<String> {
        let raw = self.read_line_bytes().await?;
        Ok(String::from_utf8_lossy(trim_line_end(&raw)).into_owned())
    }

    /// Read exactly `len` bytes (an IMAP literal).
    ///
    /// # Errors
    ///
    /// Returns an error if the link closes or the read times out first.
    pub async fn read_exact(&mut self, len: usize) -> Result<Vec<u8>> {
        let limit = self.read_timeout;
        let reader = self.stream_mut()?;
        let mut buf = vec![0; len];
        match timeout(limit, reader.read_exact(&mut buf)).await {
            Err(_) => Err(Error::Timeout("upstream literal")),
            Ok(Err(e)) if e.kind() == io::ErrorKind::UnexpectedEof => Err(Error::Disconnected),
            Ok(Err(e)) => Err(e.into()),
            Ok(Ok(_)) => Ok(buf),
        }
    }

    /// Write `line` followed by CRLF and flush.
    ///
    /// # Errors
    ///
    /// Returns an error if the link is closed or the write fails.
    pub async fn write_line(&mut self, line: &str) -> Result<()> {
        let stream = self.stream_mut()?.get_mut();
        stream.write_all(line.as_bytes()).await?;
        stream.write_all(b"\r\n").await?;
        stream.flush().await?;
        Ok(())
    }

    /// Write raw bytes without adding a terminator, then flush.
    ///
    /// # Errors
    ///
    /// Returns an error if the link is closed or the write fails.
    pub async fn write_raw(&mut self, bytes: &[u8]) -> Result<()> {
        let stream = self.stream_mut()?.get_mut();
        stream.write_all(bytes).await?;
        stream.flush().await?;
        Ok(())
    }

    /// Wrap the existing plain socket in TLS.
    ///
    /// Nothing may be buffered at this point: STARTTLS forbids
    /// pipelining, so leftover plaintext would mean a confused or
    /// hostile server. On failure the link is left closed.
    ///
    /// # Errors
    ///
    /// Returns an error if plaintext is still buffered, the link is already
    /// encrypted, or the handshake fails.
    pub async fn upgrade_to_tls(&mut self, server_name: &str, connector: &TlsConnector) -> Result<()> {
        let reader = self.stream.take().ok_or(Error::Disconnected)?;
        if !reader.buffer().is_empty() {
            return Err(Error::Protocol(format!(
                "{} bytes of plaintext buffered across STARTTLS",
                reader.buffer().len()
            )));
        }

        let tcp = match reader.into_inner() {
            LinkStream::Plain(tcp) => tcp,
            LinkStream::Tls(_) => return Err(Error::Tls("link is already encrypted".into())),
        };

        let name = tls::server_name(server_name)?;
        let tls_stream = timeout(self.read_timeout, connector.connect(name, tcp))
            .await
            .map_err(|_| Error::Timeout("TLS handshake"))?
            .map_err(|e| Error::Tls(e.to_string()))?;

        debug!("Upgraded link to {} to TLS", self.peer);
        self.stream = Some(BufReader::new(LinkStream::Tls(Box::new(tls_stream))));
        Ok(())
    }

    /// Shut the socket down. Safe to call more than once.
    pub async fn close(&mut self) {
        if let Some(mut reader) = self.stream.take() {
            let _ = reader.get_mut().shutdown().await;
            debug!("Closed link to {}", self.peer);
        }
    }
}

/// Strip a trailing `\r\n` or `\n`.
#[must_use]
pub fn trim_line_end(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}
