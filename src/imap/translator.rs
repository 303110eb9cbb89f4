//! POP3 verbs on top of one IMAP session

use super::{
    Flag, FlagOp, ImapCommand, MailboxSnapshot, SequenceSet, Status, Tag, TagCounter, execute,
    parse_exists, parse_literal_len, parse_tagged, send_command,
};
use crate::auth;
use crate::config::UpstreamCredentials;
use crate::error::{Error, Result};
use crate::link::{UpstreamLink, trim_line_end};
use tracing::{debug, info, warn};

const INBOX: &str = "INBOX";

/// Translates POP3 mailbox operations into IMAP commands.
///
/// Owns the upstream link, the tag counter and the snapshot taken at
/// `SELECT`. Everything except `RETR`/`TOP`/`DELE`/`RSET`/`QUIT` is
/// answered from the snapshot without an upstream round trip.
pub struct ImapTranslator {
    link: UpstreamLink,
    tags: TagCounter,
    snapshot: MailboxSnapshot,
    /// Prefix of synthesized UIDL values.
    uid_prefix: String,
}

impl ImapTranslator {
    /// Read the server greeting and log in with `cred`.
    ///
    /// On failure the link is closed before the error is returned.
    ///
    /// # Errors
    ///
    /// Returns an error if the greeting is missing or refuses service, or
    /// `LOGIN` fails.
    pub async fn login(mut link: UpstreamLink, cred: &UpstreamCredentials) -> Result<Self> {
        let mut tags = TagCounter::new();
        let outcome = async {
            let greeting = link.read_line().await?;
            debug!("IMAP-SERVER -> PROXY: {}", greeting);
            if !greeting.starts_with("* OK") && !greeting.starts_with("* PREAUTH") {
                return Err(Error::Protocol(format!("unexpected IMAP greeting: {greeting}")));
            }
            auth::imap_login(&mut link, &mut tags, cred).await
        }
        .await;

        if let Err(e) = outcome {
            link.close().await;
            return Err(e);
        }

        Ok(Self {
            link,
            tags,
            snapshot: MailboxSnapshot::default(),
            uid_prefix: cred.username.clone(),
        })
    }

    /// `SELECT INBOX` and build the snapshot.
    ///
    /// The message count comes from the `EXISTS` response. For a
    /// non-empty mailbox one `FETCH 1:<n> (UID RFC822.SIZE)` fills in
    /// the real sizes; if that fails the placeholder size stays.
    ///
    /// # Errors
    ///
    /// Returns an error if the link fails or `SELECT INBOX` is refused.
    pub async fn select_inbox(&mut self) -> Result<()> {
        let response = execute(&mut self.link, &mut self.tags, &ImapCommand::Select(INBOX)).await?;
        if !response.is_ok() {
            return Err(Error::Protocol(format!(
                "SELECT {INBOX} failed: {} {}",
                response.status.as_str(),
                response.text
            )));
        }

        let count = response
            .untagged
            .iter()
            .find_map(|line| parse_exists(line))
            .unwrap_or(0);
        self.snapshot = MailboxSnapshot::with_count(count);
        info!("Selected {} with {} messages", INBOX, count);

        if count > 0 {
            let fetch = ImapCommand::Fetch {
                set: SequenceSet::Range(1, count),
                items: "(UID RFC822.SIZE)",
            };
            let response = execute(&mut self.link, &mut self.tags, &fetch).await?;
            if response.is_ok() {
                for line in &response.untagged {
                    self.snapshot.apply_fetch_line(line);
                }
            } else {
                warn!("Size fetch refused, keeping placeholder sizes: {}", response.text);
            }
        }
        Ok(())
    }

    #[must_use]
    pub const fn snapshot(&self) -> &MailboxSnapshot {
        &self.snapshot
    }

    /// The tag of the last IMAP command sent.
    #[must_use]
    pub const fn last_tag(&self) -> Option<Tag> {
        self.tags.last()
    }

    /// `(count, total octets)` of the live messages.
    #[must_use]
    pub fn stat(&self) -> (usize, u64) {
        self.snapshot.stat()
    }

    /// # Errors
    ///
    /// Returns an error if message `n` does not exist or is deleted.
    pub fn list(&self, n: u32) -> Result<u64> {
        Ok(self.snapshot.live(n)?.reported_size())
    }

    #[must_use]
    pub fn list_all(&self) -> Vec<(u32, u64)> {
        self.snapshot
            .live_entries()
            .map(|e| (e.sequence, e.reported_size()))
            .collect()
    }

    /// # Errors
    ///
    /// Returns an error if message `n` does not exist or is deleted.
    pub fn uidl(&self, n: u32) -> Result<String> {
        let entry = self.snapshot.live(n)?;
        Ok(self.synth_uid(entry.sequence))
    }

    #[must_use]
    pub fn uidl_all(&self) -> Vec<(u32, String)> {
        self.snapshot
            .live_entries()
            .map(|e| (e.sequence, self.synth_uid(e.sequence)))
            .collect()
    }

    fn synth_uid(&self, n: u32) -> String {
        format!("{}.{n}", self.uid_prefix)
    }

    /// Fetch the full message `n` as raw bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if message `n` does not exist or is deleted, the link
    /// fails, or the `FETCH` response carries no literal.
    pub async fn retrieve(&mut self, n: u32) -> Result<Vec<u8>> {
        self.snapshot.live(n)?;

        let tag = self.tags.next_tag();
        let fetch = ImapCommand::Fetch {
            set: SequenceSet::Single(n),
            items: "(RFC822)",
        };
        send_command(&mut self.link, tag, &fetch).await?;

        let mut body = None;
        loop {
            let line = self.link.read_line().await?;
            debug!("IMAP-SERVER -> PROXY: {}", line);

            if let Some((status, text)) = parse_tagged(&line, tag) {
                return match (status, body) {
                    (Status::Ok, Some(body)) => Ok(body),
                    (Status::Ok, None) => {
                        Err(Error::Protocol(format!("FETCH {n} returned no message body")))
                    }
                    (status, _) => Err(Error::Protocol(format!(
                        "FETCH {n} failed: {} {text}",
                        status.as_str()
                    ))),
                };
            }

            if body.is_none() && line.starts_with('*') {
                if let Some(len) = parse_literal_len(&line) {
                    let literal = self.link.read_exact(len).await?;
                    debug!("IMAP-SERVER -> PROXY: [{} byte literal]", len);
                    body = Some(literal);
                }
            }
        }
    }

    /// Headers plus at most `lines` body lines of message `n`.
    ///
    /// # Errors
    ///
    /// Returns an error if the message cannot be retrieved, as for
    /// [`retrieve`](Self::retrieve).
    pub async fn top(&mut self, n: u32, lines: u32) -> Result<Vec<u8>> {
        let raw = self.retrieve(n).await?;
        Ok(top_of_message(&raw, lines))
    }

    /// Flag message `n` `\Deleted` upstream and in the snapshot.
    ///
    /// # Errors
    ///
    /// Returns an error if message `n` does not exist or is deleted, or the
    /// `STORE` fails.
    pub async fn delete(&mut self, n: u32) -> Result<()> {
        self.snapshot.live(n)?;

        let store = ImapCommand::Store {
            set: SequenceSet::Single(n),
            op: FlagOp::Add,
            flag: Flag::Deleted,
        };
        let response = execute(&mut self.link, &mut self.tags, &store).await?;
        if !response.is_ok() {
            return Err(Error::Protocol(format!(
                "STORE {n} failed: {} {}",
                response.status.as_str(),
                response.text
            )));
        }
        self.snapshot.mark_deleted(n)
    }

    /// Clear `\Deleted` on every message of the snapshot.
    ///
    /// The server's verdict is logged but not enforced: once the
    /// tagged response arrives the local marks are gone.
    ///
    /// # Errors
    ///
    /// Returns an error if the link fails before the tagged response.
    pub async fn reset(&mut self) -> Result<()> {
        let count = self.snapshot.count();
        if count > 0 {
            let store = ImapCommand::Store {
                set: SequenceSet::Range(1, count),
                op: FlagOp::Remove,
                flag: Flag::Deleted,
            };
            let response = execute(&mut self.link, &mut self.tags, &store).await?;
            if !response.is_ok() {
                warn!("RSET: server answered {} {}", response.status.as_str(), response.text);
            }
        }
        self.snapshot.clear_deleted();
        Ok(())
    }

    /// POP3 UPDATE state: `EXPUNGE`, then `LOGOUT`, then close.
    ///
    /// # Errors
    ///
    /// Returns an error if `EXPUNGE` fails or is refused. `LOGOUT` is
    /// best effort.
    pub async fn quit(mut self) -> Result<()> {
        let expunged = execute(&mut self.link, &mut self.tags, &ImapCommand::Expunge).await;
        let outcome = match expunged {
            Ok(response) if response.is_ok() => Ok(()),
            Ok(response) => Err(Error::Protocol(format!(
                "EXPUNGE failed: {} {}",
                response.status.as_str(),
                response.text
            ))),
            Err(e) => Err(e),
        };

        if !matches!(&outcome, Err(e) if e.is_fatal_for_link()) {
            self.logout().await;
        }
        self.link.close().await;
        outcome
    }

    /// Session ended without `QUIT`: drop pending deletion marks so
    /// nothing is removed, then log out.
    pub async fn abandon(mut self) {
        if self.snapshot.has_deleted() && self.link.is_open() {
            if let Err(e) = self.reset().await {
                debug!("Could not clear deletion marks: {}", e);
            }
        }
        if self.link.is_open() {
            self.logout().await;
        }
        self.link.close().await;
    }

    async fn logout(&mut self) {
        // Servers may hang up right after `* BYE`.
        match execute(&mut self.link, &mut self.tags, &ImapCommand::Logout).await {
            Ok(_) | Err(Error::Disconnected) => {}
            Err(e) => debug!("LOGOUT: {}", e),
        }
    }
}

/// All header lines, the blank separator, then at most `lines` body
/// lines of `raw`. Line terminators are kept as received.
#[must_use]
pub fn top_of_message(raw: &[u8], lines: u32) -> Vec<u8> {
    let mut out = Vec::with_capacity(raw.len().min(8192));
    let mut in_body = false;
    let mut remaining = lines;

    for line in raw.split_inclusive(|&b| b == b'\n') {
        if in_body {
            if remaining == 0 {
                break;
            }
            remaining -= 1;
        } else if trim_line_end(line).is_empty() {
            in_body = true;
        }
        out.extend_from_slice(line);
    }
    out
}
