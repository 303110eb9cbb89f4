//! STORE command handler. Only `\Deleted` is tracked; other flags are
//! accepted and ignored.

use super::expand_sequence_set;
use crate::fake_imap::io::write_line;
use crate::fake_imap::mailbox::Mailbox;
use imap_codec::imap_types::flag::{Flag, StoreResponse, StoreType};
use imap_codec::imap_types::sequence::SequenceSet;
use std::sync::Mutex;
use tokio::io::{AsyncRead, AsyncWrite, BufReader};

pub struct StoreArgs<'a> {
    pub sequence_set: &'a SequenceSet,
    pub kind: &'a StoreType,
    pub response: &'a StoreResponse,
    pub flags: &'a [Flag<'a>],
}

pub async fn handle_store<S: AsyncRead + AsyncWrite + Unpin>(
    tag: &str,
    args: &StoreArgs<'_>,
    mailbox: &Mutex<Mailbox>,
    selected: bool,
    stream: &mut BufReader<S>,
) {
    if !selected {
        let resp = format!("{tag} BAD No folder selected\r\n");
        let _ = write_line(stream, &resp).await;
        return;
    }

    let wants_deleted = args.flags.iter().any(|f| matches!(f, Flag::Deleted));

    // Mutate under lock, write afterwards.
    let updated = {
        let mut mb = mailbox.lock().unwrap();
        let max = u32::try_from(mb.messages.len()).unwrap();
        let mut updated = Vec::new();
        for seq in expand_sequence_set(args.sequence_set, max) {
            let Some(message) = seq
                .checked_sub(1)
                .and_then(|idx| mb.messages.get_mut(idx as usize))
            else {
                continue;
            };
            match args.kind {
                StoreType::Add => message.deleted |= wants_deleted,
                StoreType::Remove => message.deleted &= !wants_deleted,
                StoreType::Replace => message.deleted = wants_deleted,
            }
            updated.push((seq, message.deleted));
        }
        drop(mb);
        updated
    };

    if !matches!(args.response, StoreResponse::Silent) {
        for (seq, deleted) in &updated {
            let flags = if *deleted { "\\Deleted" } else { "" };
            let line = format!("* {seq} FETCH (FLAGS ({flags}))\r\n");
            if write_line(stream, &line).await.is_err() {
                return;
            }
        }
    }

    let resp = format!("{tag} OK STORE completed\r\n");
    let _ = write_line(stream, &resp).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake_imap::handlers::test_support::{range, single};
    use crate::fake_imap::mailbox::MailboxBuilder;
    use tokio::io::BufReader;

    async fn run(seq: &SequenceSet, kind: &StoreType, mailbox: &Mutex<Mailbox>) -> String {
        let (client, server) = tokio::io::duplex(4096);
        let mut stream = BufReader::new(server);
        let args = StoreArgs {
            sequence_set: seq,
            kind,
            response: &StoreResponse::Answer,
            flags: &[Flag::Deleted],
        };
        handle_store("A1004", &args, mailbox, true, &mut stream).await;
        drop(stream);

        let mut buf = Vec::new();
        tokio::io::AsyncReadExt::read_to_end(&mut BufReader::new(client), &mut buf)
            .await
            .unwrap();
        String::from_utf8(buf).unwrap()
    }

    fn mailbox() -> Mutex<Mailbox> {
        Mutex::new(
            MailboxBuilder::new()
                .message(b"a")
                .message(b"b")
                .message(b"c")
                .build(),
        )
    }

    #[tokio::test]
    async fn add_then_remove_deleted() {
        let mb = mailbox();

        let output = run(&single(2), &StoreType::Add, &mb).await;
        assert!(output.contains("* 2 FETCH (FLAGS (\\Deleted))"));
        assert!(output.ends_with("A1004 OK STORE completed\r\n"));
        assert!(mb.lock().unwrap().messages[1].deleted);

        run(&range(1, 3), &StoreType::Remove, &mb).await;
        assert!(mb.lock().unwrap().messages.iter().all(|m| !m.deleted));
    }

    #[tokio::test]
    async fn out_of_range_numbers_are_skipped() {
        let mb = mailbox();
        let output = run(&single(9), &StoreType::Add, &mb).await;
        assert_eq!(output, "A1004 OK STORE completed\r\n");
    }
}
