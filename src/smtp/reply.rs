//! SMTP server replies

use crate::error::{Error, Result};
use crate::link::UpstreamLink;
use tracing::debug;

/// One complete, possibly multi-line, reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub code: u16,
    /// Every line as received, without terminators.
    pub lines: Vec<String>,
}

impl Reply {
    /// Read lines until one whose fourth character is not `-`.
    ///
    /// # Errors
    ///
    /// Returns an error if the link fails or a line is not a valid reply line.
    pub async fn read(link: &mut UpstreamLink) -> Result<Self> {
        let mut lines = Vec::new();
        loop {
            let line = link.read_line().await?;
            debug!("SMTP-SERVER -> PROXY: {}", line);
            let (code, more) = parse_reply_line(&line)?;
            lines.push(line);
            if !more {
                return Ok(Self { code, lines });
            }
        }
    }

    /// 2xx.
    #[must_use]
    pub const fn is_positive(&self) -> bool {
        self.code >= 200 && self.code < 300
    }

    #[must_use]
    pub fn last_line(&self) -> &str {
        self.lines.last().map_or("", String::as_str)
    }

    /// The reply as it goes back on the wire, CRLF terminated.
    #[must_use]
    pub fn to_wire(&self) -> String {
        let mut wire = String::new();
        for line in &self.lines {
            wire.push_str(line);
            wire.push_str("\r\n");
        }
        wire
    }
}

/// Split a reply line into its code and whether more lines follow.
///
/// # Errors
///
/// Returns an error if `line` does not start with a three-digit code.
pub fn parse_reply_line(line: &str) -> Result<(u16, bool)> {
    let code = line
        .get(..3)
        .filter(|c| c.bytes().all(|b| b.is_ascii_digit()))
        .and_then(|c| c.parse().ok())
        .ok_or_else(|| Error::Protocol(format!("malformed SMTP reply: {line}")))?;
    Ok((code, line.as_bytes().get(3) == Some(&b'-')))
}
