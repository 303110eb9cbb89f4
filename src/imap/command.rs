//! IMAP commands issued by the translator
//!
//! A strongly-typed enum instead of ad hoc format strings, so that
//! argument quoting and log redaction live in one place.

use std::borrow::Cow;
use std::fmt;

/// An IMAP system flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flag {
    /// Message is marked for deletion (`\Deleted`).
    Deleted,
}

impl Flag {
    /// The IMAP wire representation, including the backslash.
    #[must_use]
    pub const fn as_imap_str(self) -> &'static str {
        match self {
            Self::Deleted => "\\Deleted",
        }
    }
}

/// Whether `STORE` adds or removes flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlagOp {
    Add,
    Remove,
}

impl FlagOp {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Add => "+FLAGS",
            Self::Remove => "-FLAGS",
        }
    }
}

/// Message sequence numbers addressed by a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceSet {
    Single(u32),
    /// Inclusive range `first:last`.
    Range(u32, u32),
}

impl fmt::Display for SequenceSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Single(n) => write!(f, "{n}"),
            Self::Range(first, last) => write!(f, "{first}:{last}"),
        }
    }
}

/// The commands the gateway sends to an IMAP server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImapCommand<'a> {
    Login { username: &'a str, password: &'a str },
    Select(&'a str),
    /// `FETCH <set> <items>`; `items` is a parenthesised item list.
    Fetch { set: SequenceSet, items: &'static str },
    Store { set: SequenceSet, op: FlagOp, flag: Flag },
    Expunge,
    Logout,
}

impl ImapCommand<'_> {
    /// The command text as sent, without tag or CRLF.
    #[must_use]
    pub fn to_wire(&self) -> String {
        match self {
            Self::Login { username, password } => {
                format!("LOGIN {} {}", astring(username), astring(password))
            }
            Self::Select(mailbox) => format!("SELECT {}", astring(mailbox)),
            Self::Fetch { set, items } => format!("FETCH {set} {items}"),
            Self::Store { set, op, flag } => {
                format!("STORE {set} {} ({})", op.as_str(), flag.as_imap_str())
            }
            Self::Expunge => "EXPUNGE".to_string(),
            Self::Logout => "LOGOUT".to_string(),
        }
    }

    /// Like [`to_wire`](Self::to_wire) but safe to log.
    #[must_use]
    pub fn to_log(&self) -> String {
        match self {
            Self::Login { username, .. } => format!("LOGIN {} [hidden]", astring(username)),
            other => other.to_wire(),
        }
    }
}

/// How one string argument goes on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Argument<'a> {
    /// Atom or quoted string, sent inline.
    Inline(Cow<'a, str>),
    /// Synchronising literal: `{n}` ends the line and the bytes follow
    /// once the server sends a `+` continuation.
    Literal(&'a [u8]),
}

impl<'a> Argument<'a> {
    /// Quoted strings are 7-bit and cannot hold CR, LF or NUL; anything
    /// else fits an atom or a quoted string.
    #[must_use]
    pub fn new(value: &'a str) -> Self {
        let quotable = value
            .bytes()
            .all(|b| b.is_ascii() && !matches!(b, b'\r' | b'\n' | 0));
        if quotable {
            Self::Inline(astring(value))
        } else {
            Self::Literal(value.as_bytes())
        }
    }

    #[must_use]
    pub const fn is_inline(&self) -> bool {
        matches!(self, Self::Inline(_))
    }
}

/// Render `value` as an IMAP astring: a bare atom when every byte is
/// an atom character, otherwise a quoted string.
#[must_use]
pub fn astring(value: &str) -> Cow<'_, str> {
    let is_atom = !value.is_empty()
        && value
            .bytes()
            .all(|b| b.is_ascii_graphic() && !b"(){%*\"\\]".contains(&b));
    if is_atom {
        return Cow::Borrowed(value);
    }

    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('"');
    for ch in value.chars() {
        if ch == '"' || ch == '\\' {
            quoted.push('\\');
        }
        quoted.push(ch);
    }
    quoted.push('"');
    Cow::Owned(quoted)
}
