//! LOGIN command handler. Checks the credentials against the mailbox.
//!
//! The arguments are taken from the raw line: each is an atom or a
//! quoted string with backslash escapes.

use crate::fake_imap::io::write_line;
use crate::fake_imap::mailbox::Mailbox;
use tokio::io::{AsyncRead, AsyncWrite, BufReader};

/// Handle LOGIN. Returns `true` when the credentials matched.
pub async fn handle_login<S: AsyncRead + AsyncWrite + Unpin>(
    tag: &str,
    username: &[u8],
    password: &[u8],
    mailbox: &Mailbox,
    stream: &mut BufReader<S>,
) -> bool {
    let accepted =
        username == mailbox.username.as_bytes() && password == mailbox.password.as_bytes();
    let resp = if accepted {
        format!("{tag} OK LOGIN completed\r\n")
    } else {
        format!("{tag} NO [AUTHENTICATIONFAILED] Invalid credentials\r\n")
    };
    let _ = write_line(stream, &resp).await;
    accepted
}

/// Username and password of a `<tag> LOGIN <user> <pass>` line.
pub fn login_args(line: &str) -> Option<(String, String)> {
    let mut rest = line.trim_end();
    for _ in 0..2 {
        rest = rest.trim_start().split_once(' ')?.1;
    }
    let (username, rest) = astring(rest.trim_start())?;
    let (password, _) = astring(rest.trim_start())?;
    Some((username, password))
}

fn astring(input: &str) -> Option<(String, &str)> {
    let Some(quoted) = input.strip_prefix('"') else {
        let end = input.find(' ').unwrap_or(input.len());
        return (end > 0).then(|| (input[..end].to_string(), &input[end..]));
    };
    let mut value = String::new();
    let mut chars = quoted.char_indices();
    while let Some((i, c)) = chars.next() {
        match c {
            '\\' => value.push(chars.next()?.1),
            '"' => return Some((value, &quoted[i + 1..])),
            c => value.push(c),
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake_imap::mailbox::MailboxBuilder;
    use tokio::io::BufReader;

    async fn run(tag: &str, username: &str, password: &str) -> (String, bool) {
        let mailbox = MailboxBuilder::new().credentials("bob", "pw").build();
        let (client, server) = tokio::io::duplex(1024);
        let mut stream = BufReader::new(server);

        let ok = handle_login(
            tag,
            username.as_bytes(),
            password.as_bytes(),
            &mailbox,
            &mut stream,
        )
        .await;
        drop(stream);

        let mut buf = Vec::new();
        tokio::io::AsyncReadExt::read_to_end(&mut BufReader::new(client), &mut buf)
            .await
            .unwrap();
        (String::from_utf8(buf).unwrap(), ok)
    }

    #[tokio::test]
    async fn accepts_matching_credentials() {
        let (output, ok) = run("A1001", "bob", "pw").await;
        assert!(ok);
        assert_eq!(output, "A1001 OK LOGIN completed\r\n");
    }

    #[test]
    fn parses_atoms_and_quoted_strings() {
        assert_eq!(
            login_args("A1001 LOGIN bob \"p w\\\"x\"\r\n"),
            Some(("bob".to_string(), "p w\"x".to_string()))
        );
        assert_eq!(login_args("A1001 LOGIN bob"), None);
    }

    #[tokio::test]
    async fn rejects_wrong_password() {
        let (output, ok) = run("A1001", "bob", "nope").await;
        assert!(!ok);
        assert!(output.starts_with("A1001 NO "));
    }
}
