//! IMAP client plumbing used to serve POP3 clients
//!
//! IMAP correlates every command with a client-chosen **tag** and
//! finishes it with a tagged status line, possibly after any number
//! of untagged (`*`) lines:
//!
//! ```text
//!   Gateway: A1002 SELECT INBOX
//!   Server:  * 3 EXISTS
//!   Server:  * OK [UIDVALIDITY 1]
//!   Server:  A1002 OK [READ-WRITE] SELECT completed
//! ```
//!
//! [`read_tagged`] is the one place that recognises the terminal line
//! of a command; everything before it is handed back as untagged data.

mod command;
mod snapshot;
mod translator;

pub use command::{Argument, Flag, FlagOp, ImapCommand, SequenceSet, astring};
pub use snapshot::{MailboxSnapshot, MessageEntry, PLACEHOLDER_SIZE, parse_exists, parse_literal_len};
pub use translator::{ImapTranslator, top_of_message};

use crate::error::{Error, Result};
use crate::link::UpstreamLink;
use std::fmt;
use tracing::debug;

/// First tag value; the first command sent uses `TAG_OFFSET + 1`.
pub const TAG_OFFSET: u32 = 1000;

/// An IMAP command tag, rendered as `A<n>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Tag(u32);

impl Tag {
    #[must_use]
    pub const fn value(self) -> u32 {
        self.0
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "A{}", self.0)
    }
}

/// Hands out strictly increasing tags for one session.
#[derive(Debug)]
pub struct TagCounter {
    last: u32,
}

impl TagCounter {
    #[must_use]
    pub const fn new() -> Self {
        Self { last: TAG_OFFSET }
    }

    pub const fn next_tag(&mut self) -> Tag {
        self.last += 1;
        Tag(self.last)
    }

    /// The most recently issued tag, if any.
    #[must_use]
    pub const fn last(&self) -> Option<Tag> {
        if self.last > TAG_OFFSET {
            Some(Tag(self.last))
        } else {
            None
        }
    }
}

impl Default for TagCounter {
    fn default() -> Self {
        Self::new()
    }
}

/// Completion status of a tagged command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok,
    No,
    Bad,
}

impl Status {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::No => "NO",
            Self::Bad => "BAD",
        }
    }
}

/// The terminal line of a command plus everything received before it.
#[derive(Debug, Clone)]
pub struct TaggedResponse {
    pub tag: Tag,
    pub status: Status,
    pub text: String,
    pub untagged: Vec<String>,
}

impl TaggedResponse {
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.status == Status::Ok
    }
}

/// Recognise `<tag> OK|NO|BAD [text]`.
///
/// The prefix must be exactly the tag followed by a space, so `A10`
/// never matches a line for `A100`.
#[must_use]
pub fn parse_tagged(line: &str, tag: Tag) -> Option<(Status, &str)> {
    let rest = line.strip_prefix(&tag.to_string())?.strip_prefix(' ')?;
    let (word, text) = rest.split_once(' ').unwrap_or((rest, ""));
    let status = if word.eq_ignore_ascii_case("OK") {
        Status::Ok
    } else if word.eq_ignore_ascii_case("NO") {
        Status::No
    } else if word.eq_ignore_ascii_case("BAD") {
        Status::Bad
    } else {
        return None;
    };
    Some((status, text))
}

/// Send `command` under `tag`.
///
/// # Errors
///
/// Returns an error if the write to the link fails.
pub async fn send_command(link: &mut UpstreamLink, tag: Tag, command: &ImapCommand<'_>) -> Result<()> {
    debug!("PROXY -> IMAP-SERVER: {} {}", tag, command.to_log());
    link.write_line(&format!("{tag} {}", command.to_wire())).await
}

/// Read lines until the tagged status for `tag` arrives.
///
/// # Errors
///
/// Returns an error if the link fails before the tagged line arrives.
pub async fn read_tagged(link: &mut UpstreamLink, tag: Tag) -> Result<TaggedResponse> {
    let mut untagged = Vec::new();
    loop {
        let line = link.read_line().await?;
        debug!("IMAP-SERVER -> PROXY: {}", line);
        if let Some((status, text)) = parse_tagged(&line, tag) {
            return Ok(TaggedResponse {
                tag,
                status,
                text: text.to_string(),
                untagged,
            });
        }
        untagged.push(line);
    }
}

/// Issue one command with a fresh tag and wait for its completion.
///
/// # Errors
///
/// Returns an error if the command cannot be sent or its tagged status never
/// arrives.
pub async fn execute(
    link: &mut UpstreamLink,
    tags: &mut TagCounter,
    command: &ImapCommand<'_>,
) -> Result<TaggedResponse> {
    let tag = tags.next_tag();
    send_command(link, tag, command).await?;
    read_tagged(link, tag).await
}

/// `LOGIN` with arguments that may need synchronising literals.
///
/// When both arguments fit inline this is a plain [`execute`].
/// Otherwise each literal is announced with `{n}` and its bytes are
/// only sent after the server's `+` continuation. A tagged reply in
/// place of the continuation ends the command early.
///
/// # Errors
///
/// Returns an error if the link fails or the server answers something
/// other than a continuation or the command's tagged status.
pub async fn login(
    link: &mut UpstreamLink,
    tags: &mut TagCounter,
    username: &str,
    password: &str,
) -> Result<TaggedResponse> {
    let args = [Argument::new(username), Argument::new(password)];
    if args.iter().all(Argument::is_inline) {
        return execute(link, tags, &ImapCommand::Login { username, password }).await;
    }

    let tag = tags.next_tag();
    debug!("PROXY -> IMAP-SERVER: {} LOGIN [literal arguments hidden]", tag);
    let mut pending = format!("{tag} LOGIN");
    for arg in &args {
        pending.push(' ');
        match arg {
            Argument::Inline(text) => pending.push_str(text),
            Argument::Literal(bytes) => {
                pending.push('{');
                pending.push_str(&bytes.len().to_string());
                pending.push('}');
                link.write_line(&pending).await?;
                if let Some(refused) = await_continuation(link, tag).await? {
                    return Ok(refused);
                }
                link.write_raw(bytes).await?;
                pending.clear();
            }
        }
    }
    link.write_line(&pending).await?;
    read_tagged(link, tag).await
}

/// Wait for `+`; a tagged status for `tag` instead is returned as is.
async fn await_continuation(link: &mut UpstreamLink, tag: Tag) -> Result<Option<TaggedResponse>> {
    let mut untagged = Vec::new();
    loop {
        let line = link.read_line().await?;
        debug!("IMAP-SERVER -> PROXY: {}", line);
        if line.starts_with('+') {
            return Ok(None);
        }
        if let Some((status, text)) = parse_tagged(&line, tag) {
            return Ok(Some(TaggedResponse {
                tag,
                status,
                text: text.to_string(),
                untagged,
            }));
        }
        if !line.starts_with('*') {
            return Err(Error::Protocol(format!("expected continuation, got {line}")));
        }
        untagged.push(line);
    }
}
