//! Byte-exact message body relay
//!
//! Lines are handled as raw bytes. Each line loses only its
//! terminator and is forwarded with a canonical CRLF; a leading `.`
//! gets one more `.` in front of it. A line that is exactly `.` ends
//! the body and is sent on as `.\r\n`. Nothing is decoded or
//! transcoded: the header/body split and the declared charset are
//! detected for the log only.

use crate::error::{Error, Result};
use crate::link::trim_line_end;
use regex::bytes::Regex;
use std::sync::LazyLock;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::{Instant, timeout_at};
use tracing::{debug, warn};

/// Output is written upstream in chunks of about this size.
const CHUNK_SIZE: usize = 32 * 1024;

/// Longest body line accepted, terminator included.
pub const MAX_BODY_LINE: usize = 64 * 1024;

static CHARSET: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r#"(?i)charset\s*=\s*"?([^";,\s]+)"?"#).ok());

/// What happened during one body relay.
#[derive(Debug, Default)]
pub struct RelayOutcome {
    /// Body lines received from the client, terminator excluded.
    pub lines: usize,
    /// Bytes written upstream, terminator included.
    pub bytes: u64,
    /// Lines before the first blank line.
    pub header_lines: usize,
    /// `charset=` parameter seen in the headers.
    pub charset: Option<String>,
    /// First upstream write failure. The client body is still read to
    /// its end so the session can answer it.
    pub upstream_error: Option<Error>,
}

/// Copy a message body from `client` to `upstream` until the lone `.`
/// line, within `limit` overall.
///
/// # Errors
///
/// Returns [`Error::Timeout`] when the deadline passes,
/// [`Error::LineTooLong`] for a line over [`MAX_BODY_LINE`] bytes and
/// [`Error::Disconnected`] if the client goes away first.
pub async fn relay_body<R, W>(client: &mut R, upstream: &mut W, limit: Duration) -> Result<RelayOutcome>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let deadline = Instant::now() + limit;
    let mut outcome = RelayOutcome::default();
    let mut in_headers = true;
    let mut chunk = Vec::with_capacity(CHUNK_SIZE + 1024);
    let mut raw = Vec::new();

    loop {
        raw.clear();
        let mut capped = (&mut *client).take(MAX_BODY_LINE as u64);
        let n = timeout_at(deadline, capped.read_until(b'\n', &mut raw))
            .await
            .map_err(|_| Error::Timeout("message body"))??;
        if n == 0 {
            return Err(Error::Disconnected);
        }
        if n >= MAX_BODY_LINE && !raw.ends_with(b"\n") {
            return Err(Error::LineTooLong("message", MAX_BODY_LINE));
        }

        let line = trim_line_end(&raw);
        if line == b"." {
            chunk.extend_from_slice(b".\r\n");
            break;
        }
        outcome.lines += 1;

        if in_headers {
            if line.is_empty() {
                in_headers = false;
                debug!("Header/body boundary after {} lines", outcome.header_lines);
            } else {
                outcome.header_lines += 1;
                if outcome.charset.is_none() {
                    outcome.charset = detect_charset(line);
                }
            }
        }

        if line.first() == Some(&b'.') {
            chunk.push(b'.');
        }
        chunk.extend_from_slice(line);
        chunk.extend_from_slice(b"\r\n");

        if chunk.len() >= CHUNK_SIZE {
            flush_chunk(upstream, &mut chunk, &mut outcome).await;
        }
    }

    flush_chunk(upstream, &mut chunk, &mut outcome).await;
    if outcome.upstream_error.is_none() {
        if let Err(e) = upstream.flush().await {
            outcome.upstream_error = Some(e.into());
        }
    }

    debug!(
        "Relayed body: {} lines, {} bytes, {} header lines, charset {}",
        outcome.lines,
        outcome.bytes,
        outcome.header_lines,
        outcome.charset.as_deref().unwrap_or("unspecified")
    );
    Ok(outcome)
}

async fn flush_chunk<W: AsyncWrite + Unpin>(upstream: &mut W, chunk: &mut Vec<u8>, outcome: &mut RelayOutcome) {
    if outcome.upstream_error.is_none() {
        match upstream.write_all(chunk).await {
            Ok(()) => outcome.bytes += chunk.len() as u64,
            Err(e) => {
                warn!("Upstream write failed during DATA, draining client: {}", e);
                outcome.upstream_error = Some(e.into());
            }
        }
    }
    chunk.clear();
}

/// The `charset` parameter of a header line, if any.
#[must_use]
pub fn detect_charset(line: &[u8]) -> Option<String> {
    let regex = CHARSET.as_ref()?;
    let caps = regex.captures(line)?;
    let value = caps.get(1)?;
    Some(String::from_utf8_lossy(value.as_bytes()).into_owned())
}
