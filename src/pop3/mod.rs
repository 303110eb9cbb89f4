//! POP3: the client-facing session and its two backends
//!
//! A POP3 session is served either by translating to IMAP
//! ([`crate::imap::ImapTranslator`]) or, for POP3-only profiles, by
//! relaying to the upstream POP3 server ([`Pop3Relay`]).

mod command;
mod relay;
mod session;

pub use command::{ParseError, Pop3Command};
pub use relay::Pop3Relay;
pub use session::Pop3Session;

use crate::link::trim_line_end;

/// Build a multi-line response: `status`, every line of `body` with
/// CRLF endings and byte-stuffing, then the `.` terminator.
#[must_use]
pub fn multiline(status: &str, body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(status.len() + body.len() + 64);
    out.extend_from_slice(status.as_bytes());
    out.extend_from_slice(b"\r\n");
    for line in body.split_inclusive(|&b| b == b'\n') {
        let line = trim_line_end(line);
        if line.first() == Some(&b'.') {
            out.push(b'.');
        }
        out.extend_from_slice(line);
        out.extend_from_slice(b"\r\n");
    }
    out.extend_from_slice(b".\r\n");
    out
}

/// A multi-line response made of text lines.
#[must_use]
pub fn listing<I, T>(status: &str, lines: I) -> Vec<u8>
where
    I: IntoIterator<Item = T>,
    T: AsRef<str>,
{
    let mut body = String::new();
    for line in lines {
        body.push_str(line.as_ref());
        body.push_str("\r\n");
    }
    multiline(status, body.as_bytes())
}
