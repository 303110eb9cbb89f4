//! Cached view of the selected mailbox
//!
//! Taken once after `SELECT INBOX` and never re-synchronised: sequence
//! numbers stay those of the moment of selection for the whole
//! session, even after deletions.

use crate::error::{Error, Result};

/// Size reported for messages the server did not describe.
pub const PLACEHOLDER_SIZE: u64 = 1024;

/// One message of the snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageEntry {
    /// 1-based POP3/IMAP message number.
    pub sequence: u32,
    pub size: Option<u64>,
    pub imap_uid: Option<u32>,
    /// Marked by `DELE` during this session.
    pub deleted: bool,
}

impl MessageEntry {
    /// The size shown to POP3 clients.
    #[must_use]
    pub fn reported_size(&self) -> u64 {
        self.size.unwrap_or(PLACEHOLDER_SIZE)
    }
}

#[derive(Debug, Clone, Default)]
pub struct MailboxSnapshot {
    entries: Vec<MessageEntry>,
}

impl MailboxSnapshot {
    /// A snapshot of `count` messages with unknown sizes and UIDs.
    #[must_use]
    pub fn with_count(count: u32) -> Self {
        Self {
            entries: (1..=count)
                .map(|sequence| MessageEntry {
                    sequence,
                    size: None,
                    imap_uid: None,
                    deleted: false,
                })
                .collect(),
        }
    }

    /// Number of messages at selection time, deleted ones included.
    #[must_use]
    pub fn count(&self) -> u32 {
        u32::try_from(self.entries.len()).unwrap_or(u32::MAX)
    }

    #[must_use]
    pub fn entries(&self) -> &[MessageEntry] {
        &self.entries
    }

    /// The entry for message `n`, deleted or not.
    ///
    /// # Errors
    ///
    /// Returns an error if `n` is outside the mailbox.
    pub fn get(&self, n: u32) -> Result<&MessageEntry> {
        n.checked_sub(1)
            .and_then(|idx| self.entries.get(idx as usize))
            .ok_or(Error::NoSuchMessage(n))
    }

    /// The entry for message `n`, which must not be marked deleted.
    ///
    /// # Errors
    ///
    /// Returns an error if `n` is outside the mailbox or marked deleted.
    pub fn live(&self, n: u32) -> Result<&MessageEntry> {
        let entry = self.get(n)?;
        if entry.deleted {
            return Err(Error::MessageDeleted(n));
        }
        Ok(entry)
    }

    /// Messages not marked deleted, in order.
    pub fn live_entries(&self) -> impl Iterator<Item = &MessageEntry> {
        self.entries.iter().filter(|e| !e.deleted)
    }

    /// `(message count, total octets)` over live messages.
    #[must_use]
    pub fn stat(&self) -> (usize, u64) {
        self.live_entries()
            .fold((0, 0), |(count, total), e| (count + 1, total + e.reported_size()))
    }

    /// Mark message `n` for deletion at `QUIT`.
    ///
    /// # Errors
    ///
    /// Returns an error if `n` is outside the mailbox or already marked.
    pub fn mark_deleted(&mut self, n: u32) -> Result<()> {
        self.live(n)?;
        self.entries[(n - 1) as usize].deleted = true;
        Ok(())
    }

    pub fn clear_deleted(&mut self) {
        for entry in &mut self.entries {
            entry.deleted = false;
        }
    }

    #[must_use]
    pub fn has_deleted(&self) -> bool {
        self.entries.iter().any(|e| e.deleted)
    }

    /// Record `UID` / `RFC822.SIZE` from an untagged FETCH line such as
    /// `* 2 FETCH (UID 12 RFC822.SIZE 700)`. Anything else is ignored.
    pub fn apply_fetch_line(&mut self, line: &str) {
        let mut words = line.split_whitespace();
        if words.next() != Some("*") {
            return;
        }
        let Some(seq) = words.next().and_then(|w| w.parse::<u32>().ok()) else {
            return;
        };
        if !words.next().is_some_and(|w| w.eq_ignore_ascii_case("FETCH")) {
            return;
        }
        let Some(entry) = seq
            .checked_sub(1)
            .and_then(|idx| self.entries.get_mut(idx as usize))
        else {
            return;
        };

        let items: Vec<&str> = words
            .map(|w| w.trim_matches(|c| c == '(' || c == ')'))
            .collect();
        for pair in items.windows(2) {
            if pair[0].eq_ignore_ascii_case("UID") {
                if let Ok(uid) = pair[1].parse() {
                    entry.imap_uid = Some(uid);
                }
            } else if pair[0].eq_ignore_ascii_case("RFC822.SIZE") {
                if let Ok(size) = pair[1].parse() {
                    entry.size = Some(size);
                }
            }
        }
    }
}

/// Message count from a `* <n> EXISTS` line.
#[must_use]
pub fn parse_exists(line: &str) -> Option<u32> {
    let mut words = line.split_whitespace();
    if words.next() != Some("*") {
        return None;
    }
    let count = words.next()?.parse().ok()?;
    words
        .next()
        .filter(|w| w.eq_ignore_ascii_case("EXISTS"))
        .map(|_| count)
}

/// Octet count of a literal announced at the end of a line (`{123}`).
#[must_use]
pub fn parse_literal_len(line: &str) -> Option<usize> {
    let open = line.strip_suffix('}')?.rfind('{')?;
    line[open + 1..line.len() - 1].parse().ok()
}
