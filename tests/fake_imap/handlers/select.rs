//! SELECT command handler.
//!
//! Only INBOX exists. The reply carries the usual untagged data; the
//! gateway relies on `* N EXISTS` for the message count.

use crate::fake_imap::io::write_line;
use crate::fake_imap::mailbox::Mailbox;
use tokio::io::{AsyncRead, AsyncWrite, BufReader};

/// Handle SELECT. Returns `true` if the folder is now selected.
pub async fn handle_select<S: AsyncRead + AsyncWrite + Unpin>(
    tag: &str,
    folder_name: &str,
    mailbox: &Mailbox,
    stream: &mut BufReader<S>,
) -> bool {
    if !folder_name.eq_ignore_ascii_case("INBOX") {
        let resp = format!("{tag} NO Folder not found\r\n");
        let _ = write_line(stream, &resp).await;
        return false;
    }

    let uidnext = mailbox
        .messages
        .iter()
        .map(|m| m.uid)
        .max()
        .map_or(1, |max| max + 1);
    let lines = [
        "* FLAGS (\\Seen \\Answered \\Flagged \\Deleted \\Draft)\r\n".to_string(),
        format!("* {} EXISTS\r\n", mailbox.messages.len()),
        "* 0 RECENT\r\n".to_string(),
        "* OK [UIDVALIDITY 1] UIDs valid\r\n".to_string(),
        format!("* OK [UIDNEXT {uidnext}] Predicted next UID\r\n"),
        "* OK [PERMANENTFLAGS (\\Seen \\Deleted)] Limited\r\n".to_string(),
        format!("{tag} OK [READ-WRITE] SELECT completed\r\n"),
    ];
    for line in &lines {
        if write_line(stream, line).await.is_err() {
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake_imap::mailbox::MailboxBuilder;
    use tokio::io::BufReader;

    async fn run(tag: &str, folder: &str, mailbox: &Mailbox) -> (String, bool) {
        let (client, server) = tokio::io::duplex(4096);
        let mut stream = BufReader::new(server);
        let selected = handle_select(tag, folder, mailbox, &mut stream).await;
        drop(stream);

        let mut buf = Vec::new();
        tokio::io::AsyncReadExt::read_to_end(&mut BufReader::new(client), &mut buf)
            .await
            .unwrap();
        (String::from_utf8(buf).unwrap(), selected)
    }

    #[tokio::test]
    async fn reports_message_count() {
        let mailbox = MailboxBuilder::new()
            .message(b"Subject: a\r\n\r\nx")
            .message(b"Subject: b\r\n\r\ny")
            .build();
        let (output, selected) = run("A1002", "INBOX", &mailbox).await;
        assert!(selected);
        assert!(output.contains("* 2 EXISTS\r\n"));
        assert!(output.contains("[UIDNEXT 103]"));
        assert!(output.ends_with("A1002 OK [READ-WRITE] SELECT completed\r\n"));
    }

    #[tokio::test]
    async fn unknown_folder_is_refused() {
        let mailbox = MailboxBuilder::new().build();
        let (output, selected) = run("A1002", "Archive", &mailbox).await;
        assert!(!selected);
        assert_eq!(output, "A1002 NO Folder not found\r\n");
    }
}
