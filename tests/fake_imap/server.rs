//! In-process fake IMAP server
//!
//! ```text
//!   Gateway connects (plain TCP, or TLS from the first byte)
//!       |
//!   Server: "* OK IMAP4rev1 Fake server ready"
//!       |
//!   A1001 LOGIN user "pass"          -> OK / NO
//!   A1002 SELECT INBOX               -> * N EXISTS ... OK
//!   A1003 FETCH 1:N (UID RFC822.SIZE)
//!   A1004 FETCH n (RFC822)           -> counted literal
//!   A1005 STORE n +FLAGS (\Deleted)
//!   A1006 EXPUNGE
//!   A1007 LOGOUT                     -> * BYE, OK
//! ```
//!
//! Every received line is appended to `Mailbox::commands` before it
//! is handled, so tests can assert on the exact upstream conversation.

use super::handlers::{
    FetchItems, StoreArgs, handle_expunge, handle_fetch, handle_login, handle_logout,
    handle_select, handle_store, login_args,
};
use super::io::write_line;
use super::mailbox::Mailbox;
use crate::fake_tls;
use imap_codec::CommandCodec;
use imap_codec::decode::Decoder;
use imap_codec::imap_types::command::CommandBody;
use imap_codec::imap_types::mailbox::Mailbox as ImapMailbox;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, BufReader};
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;

/// A fake IMAP server on localhost with an OS-assigned port. It runs
/// until dropped.
pub struct FakeImapServer {
    port: u16,
    mailbox: Arc<Mutex<Mailbox>>,
    _handle: tokio::task::JoinHandle<()>,
}

impl FakeImapServer {
    /// Plain TCP server.
    pub async fn start(mailbox: Mailbox) -> Self {
        Self::spawn(mailbox, None).await
    }

    /// Server that expects TLS from the first byte (port 993 style).
    pub async fn start_tls(mailbox: Mailbox) -> Self {
        Self::spawn(mailbox, Some(fake_tls::acceptor())).await
    }

    async fn spawn(mailbox: Mailbox, acceptor: Option<TlsAcceptor>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind to ephemeral port");
        let port = listener.local_addr().unwrap().port();
        let mailbox = Arc::new(Mutex::new(mailbox));

        let shared = mailbox.clone();
        let handle = tokio::spawn(async move {
            loop {
                let Ok((stream, _addr)) = listener.accept().await else {
                    break;
                };
                let acceptor = acceptor.clone();
                let mailbox = shared.clone();
                tokio::spawn(async move {
                    match acceptor {
                        Some(acceptor) => {
                            if let Ok(tls) = acceptor.accept(stream).await {
                                handle_session(tls, &mailbox).await;
                            }
                        }
                        None => handle_session(stream, &mailbox).await,
                    }
                });
            }
        });

        Self {
            port,
            mailbox,
            _handle: handle,
        }
    }

    pub const fn port(&self) -> u16 {
        self.port
    }

    /// Current mailbox state, including the command log.
    pub fn mailbox(&self) -> Mailbox {
        self.mailbox.lock().unwrap().clone()
    }

    /// Received command lines, tag first.
    pub fn commands(&self) -> Vec<String> {
        self.mailbox.lock().unwrap().commands.clone()
    }
}

fn is_inbox(mb: &ImapMailbox<'_>) -> bool {
    match mb {
        ImapMailbox::Inbox => true,
        ImapMailbox::Other(other) => {
            let bytes: &[u8] = other.as_ref();
            bytes.eq_ignore_ascii_case(b"INBOX")
        }
    }
}

/// Greeting, then the command loop until LOGOUT or disconnect.
///
/// Commands other than LOGIN, LOGOUT and SELECT need a successful
/// LOGIN first.
async fn handle_session<S: AsyncRead + AsyncWrite + Unpin>(stream: S, mailbox: &Mutex<Mailbox>) {
    let mut reader = BufReader::new(stream);
    if write_line(&mut reader, "* OK IMAP4rev1 Fake server ready\r\n")
        .await
        .is_err()
    {
        return;
    }

    let codec = CommandCodec::default();
    let mut authenticated = false;
    let mut selected = false;

    loop {
        let mut line = String::new();
        match reader.read_line(&mut line).await {
            Ok(0) | Err(_) => break,
            Ok(_) => {}
        }
        let trimmed = line.trim_end();
        if trimmed.is_empty() {
            continue;
        }
        mailbox.lock().unwrap().commands.push(trimmed.to_string());

        let Ok((_, command)) = codec.decode(line.as_bytes()) else {
            let tag = trimmed.split_whitespace().next().unwrap_or("*");
            let resp = format!("{tag} BAD Parse error\r\n");
            if write_line(&mut reader, &resp).await.is_err() {
                break;
            }
            continue;
        };
        let tag = command.tag.inner();

        if !authenticated
            && !matches!(command.body, CommandBody::Login { .. } | CommandBody::Logout)
        {
            let resp = format!("{tag} BAD Not authenticated\r\n");
            if write_line(&mut reader, &resp).await.is_err() {
                break;
            }
            continue;
        }

        let snap = mailbox.lock().unwrap().clone();

        match command.body {
            CommandBody::Login { .. } => {
                let (username, password) = login_args(trimmed).unwrap_or_default();
                authenticated = handle_login(
                    tag,
                    username.as_bytes(),
                    password.as_bytes(),
                    &snap,
                    &mut reader,
                )
                .await;
            }
            CommandBody::Select { mailbox: ref mb, .. } => {
                let name = if is_inbox(mb) { "INBOX" } else { "" };
                selected = handle_select(tag, name, &snap, &mut reader).await;
            }
            CommandBody::Fetch {
                ref sequence_set,
                uid: false,
                ..
            } => {
                let items = FetchItems::from_line(trimmed);
                handle_fetch(tag, sequence_set, items, &snap, selected, &mut reader).await;
            }
            CommandBody::Store {
                ref sequence_set,
                ref kind,
                ref response,
                ref flags,
                uid: false,
                ..
            } => {
                let args = StoreArgs {
                    sequence_set,
                    kind,
                    response,
                    flags,
                };
                handle_store(tag, &args, mailbox, selected, &mut reader).await;
            }
            CommandBody::Expunge => {
                handle_expunge(tag, mailbox, selected, &mut reader).await;
            }
            CommandBody::Logout => {
                handle_logout(tag, &mut reader).await;
                break;
            }
            _ => {
                let resp = format!("{tag} BAD Unknown command\r\n");
                if write_line(&mut reader, &resp).await.is_err() {
                    break;
                }
            }
        }
    }
}
