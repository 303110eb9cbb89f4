//! Client-facing POP3 session
//!
//! AUTHORIZATION lasts until a backend is open; TRANSACTION until
//! `QUIT`, which performs the UPDATE step on the backend. The client's
//! password is never checked: `PASS` only triggers the upstream login
//! with the stored credentials of the profile chosen by `USER`.

use super::{Pop3Command, Pop3Relay, listing, multiline};
use crate::client::{ClientConn, Inbound};
use crate::config::{MailboxProfile, UpstreamProtocol};
use crate::context::GatewayContext;
use crate::error::{Error, Result};
use crate::imap::ImapTranslator;
use crate::link::{Transport, UpstreamLink};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const NOT_IN_STATE: &str = "-ERR Command not valid in this state";

/// The mailbox access behind a TRANSACTION-state session.
enum Backend {
    Imap(ImapTranslator),
    Pop3(Pop3Relay),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Close,
}

/// One local POP3 client connection.
pub struct Pop3Session<S> {
    client: ClientConn<S>,
    ctx: Arc<GatewayContext>,
    /// Profile chosen by `USER`, awaiting `PASS`.
    candidate: Option<Arc<MailboxProfile>>,
    /// Set once `PASS` succeeded; never replaced.
    bound: Option<Arc<MailboxProfile>>,
    /// `None` while in AUTHORIZATION.
    backend: Option<Backend>,
}

impl<S: AsyncRead + AsyncWrite + Unpin> Pop3Session<S> {
    pub fn new(stream: S, ctx: Arc<GatewayContext>) -> Self {
        Self {
            client: ClientConn::new(stream),
            ctx,
            candidate: None,
            bound: None,
            backend: None,
        }
    }

    /// Serve the client until `QUIT`, disconnect, idle timeout or
    /// shutdown. Without a `QUIT` no message is removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the client socket fails.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<()> {
        let result = self.serve(&cancel).await;
        if let Some(profile) = &self.bound {
            debug!("POP3 session for profile {} ending", profile.name);
        }
        match self.backend.take() {
            Some(Backend::Imap(translator)) => translator.abandon().await,
            Some(Backend::Pop3(relay)) => relay.close().await,
            None => {}
        }
        self.client.shutdown().await;
        result
    }

    async fn serve(&mut self, cancel: &CancellationToken) -> Result<()> {
        self.client
            .send(&format!("+OK {} POP3 server ready", self.ctx.hostname))
            .await?;

        loop {
            let line = match self.client.next_line(self.ctx.timeouts.client_idle(), cancel).await? {
                Inbound::Line(line) => line,
                Inbound::Closed => {
                    debug!("POP3 client disconnected");
                    return Ok(());
                }
                Inbound::IdleTimeout => {
                    info!("POP3 client idle, closing");
                    let _ = self.client.send("-ERR Idle timeout, closing connection").await;
                    return Ok(());
                }
                Inbound::TooLong => {
                    warn!("POP3 command line too long, closing");
                    let _ = self.client.send("-ERR Line too long").await;
                    return Ok(());
                }
                Inbound::Shutdown => {
                    let _ = self.client.send("-ERR Server shutting down").await;
                    return Ok(());
                }
            };

            let command = match Pop3Command::parse(&line) {
                Ok(command) => command,
                Err(e) => {
                    debug!("CLIENT -> PROXY: {}", line);
                    self.client.send(e.reply()).await?;
                    continue;
                }
            };
            if matches!(command, Pop3Command::Pass(_)) {
                debug!("CLIENT -> PROXY: PASS [hidden]");
            } else {
                debug!("CLIENT -> PROXY: {}", line);
            }

            let flow = if self.backend.is_none() {
                self.authorization(command).await?
            } else {
                self.transaction(command, &line).await?
            };
            if flow == Flow::Close {
                return Ok(());
            }
        }
    }

    async fn authorization(&mut self, command: Pop3Command) -> Result<Flow> {
        match command {
            Pop3Command::User(name) => {
                if let Some(profile) = self.ctx.vault.resolve_mailbox(&name) {
                    debug!("USER {} -> profile {}", name, profile.name);
                    self.candidate = Some(profile);
                    self.client.send("+OK User accepted").await?;
                } else {
                    self.client.send("-ERR Invalid username").await?;
                }
            }
            Pop3Command::Pass(_) => match self.candidate.clone() {
                Some(profile) => return self.open_backend(profile).await,
                None => self.client.send("-ERR USER command first").await?,
            },
            Pop3Command::Quit => {
                self.client.send("+OK Goodbye").await?;
                return Ok(Flow::Close);
            }
            Pop3Command::Capa => self.send_capabilities().await?,
            Pop3Command::Unknown(_) => self.client.send("-ERR Unknown command").await?,
            _ => self.client.send(NOT_IN_STATE).await?,
        }
        Ok(Flow::Continue)
    }

    /// Connect and log in upstream for `profile`.
    ///
    /// An unreachable server leaves the session in AUTHORIZATION; a
    /// refused login or a failed `SELECT` ends it.
    async fn open_backend(&mut self, profile: Arc<MailboxProfile>) -> Result<Flow> {
        let Some((protocol, cred)) = profile.retrieval() else {
            self.client.send("-ERR Cannot connect to mail server").await?;
            return Ok(Flow::Continue);
        };

        let transport = if cred.use_tls {
            Transport::Tls
        } else {
            Transport::Plain
        };
        let link = match UpstreamLink::connect(
            &cred.host,
            cred.port,
            transport,
            self.ctx.tls.connector(cred.accept_invalid_certs),
            self.ctx.timeouts.upstream_read(),
        )
        .await
        {
            Ok(link) => link,
            Err(e) => {
                warn!("Cannot reach {} server {}: {}", protocol, cred.addr(), e);
                self.client.send("-ERR Cannot connect to mail server").await?;
                return Ok(Flow::Continue);
            }
        };

        let backend = if protocol == UpstreamProtocol::Imap {
            let mut translator = match ImapTranslator::login(link, cred).await {
                Ok(translator) => translator,
                Err(e) => return self.login_failed(&e).await,
            };
            if let Err(e) = translator.select_inbox().await {
                warn!("SELECT INBOX failed for profile {}: {}", profile.name, e);
                translator.abandon().await;
                self.client.send("-ERR Cannot select INBOX").await?;
                return Ok(Flow::Close);
            }
            Backend::Imap(translator)
        } else {
            match Pop3Relay::login(link, cred).await {
                Ok(relay) => Backend::Pop3(relay),
                Err(e) => return self.login_failed(&e).await,
            }
        };

        info!("POP3 session bound to profile {} via {}", profile.name, protocol);
        self.backend = Some(backend);
        self.bound = Some(profile);
        self.candidate = None;
        self.client.send("+OK Mailbox locked and ready").await?;
        Ok(Flow::Continue)
    }

    async fn login_failed(&mut self, error: &Error) -> Result<Flow> {
        warn!("Upstream login failed: {}", error);
        let reply = if matches!(error, Error::AuthFailed(_)) {
            "-ERR Authentication failed"
        } else {
            "-ERR Cannot connect to mail server"
        };
        self.client.send(reply).await?;
        Ok(Flow::Close)
    }

    async fn transaction(&mut self, command: Pop3Command, line: &str) -> Result<Flow> {
        match command {
            Pop3Command::User(_) | Pop3Command::Pass(_) => {
                self.client.send(NOT_IN_STATE).await?;
                return Ok(Flow::Continue);
            }
            Pop3Command::Capa => {
                self.send_capabilities().await?;
                return Ok(Flow::Continue);
            }
            Pop3Command::Unknown(_) => {
                self.client.send("-ERR Unknown command").await?;
                return Ok(Flow::Continue);
            }
            Pop3Command::Quit => {
                self.update().await?;
                return Ok(Flow::Close);
            }
            _ => {}
        }

        let response = match &mut self.backend {
            Some(Backend::Imap(translator)) => translate(translator, &command).await,
            Some(Backend::Pop3(relay)) => relay.forward(line, command.is_multiline()).await,
            None => Err(Error::Disconnected),
        };
        match response {
            Ok(bytes) => self.client.send_raw(&bytes).await?,
            Err(e) => {
                let reply = error_reply(&command, &e);
                if e.is_fatal_for_link() {
                    warn!("{} failed: {}", command.name(), e);
                } else {
                    debug!("{} refused: {}", command.name(), e);
                }
                self.client.send(&reply).await?;
            }
        }
        Ok(Flow::Continue)
    }

    /// `QUIT` in TRANSACTION: commit deletions and log out.
    async fn update(&mut self) -> Result<()> {
        match self.backend.take() {
            Some(Backend::Imap(translator)) => match translator.quit().await {
                Ok(()) => self.client.send("+OK Goodbye").await,
                Err(e) => {
                    warn!("UPDATE failed: {}", e);
                    self.client.send("-ERR Some deleted messages not removed").await
                }
            },
            Some(Backend::Pop3(relay)) => match relay.quit().await {
                Ok(bytes) => self.client.send_raw(&bytes).await,
                Err(e) => {
                    warn!("UPDATE failed: {}", e);
                    self.client.send("-ERR Some deleted messages not removed").await
                }
            },
            None => self.client.send("+OK Goodbye").await,
        }
    }

    async fn send_capabilities(&mut self) -> Result<()> {
        let response = listing(
            "+OK Capability list follows",
            ["USER", "TOP", "UIDL", "IMPLEMENTATION mail-gateway"],
        );
        self.client.send_raw(&response).await
    }
}

/// Answer a TRANSACTION command from the IMAP translator.
async fn translate(translator: &mut ImapTranslator, command: &Pop3Command) -> Result<Vec<u8>> {
    let response = match *command {
        Pop3Command::Stat => {
            let (count, total) = translator.stat();
            line(&format!("+OK {count} {total}"))
        }
        Pop3Command::List(Some(n)) => line(&format!("+OK {n} {}", translator.list(n)?)),
        Pop3Command::List(None) => {
            let entries = translator.list_all();
            listing(
                &format!("+OK {} messages", entries.len()),
                entries.iter().map(|(n, size)| format!("{n} {size}")),
            )
        }
        Pop3Command::Uidl(Some(n)) => line(&format!("+OK {n} {}", translator.uidl(n)?)),
        Pop3Command::Uidl(None) => listing(
            "+OK unique-id listing follows",
            translator
                .uidl_all()
                .iter()
                .map(|(n, uid)| format!("{n} {uid}")),
        ),
        Pop3Command::Retr(n) => multiline("+OK Message follows", &translator.retrieve(n).await?),
        Pop3Command::Top { msg, lines } => {
            multiline("+OK Top of message follows", &translator.top(msg, lines).await?)
        }
        Pop3Command::Dele(n) => {
            translator.delete(n).await?;
            line(&format!("+OK Message {n} deleted"))
        }
        Pop3Command::Rset => {
            translator.reset().await?;
            line("+OK")
        }
        Pop3Command::Noop => line("+OK"),
        _ => line(NOT_IN_STATE),
    };
    Ok(response)
}

fn line(text: &str) -> Vec<u8> {
    format!("{text}\r\n").into_bytes()
}

fn error_reply(command: &Pop3Command, error: &Error) -> String {
    match error {
        Error::NoSuchMessage(_) => "-ERR No such message".to_string(),
        Error::MessageDeleted(_) => "-ERR Message already deleted".to_string(),
        e if e.is_fatal_for_link() => "-ERR Upstream connection lost".to_string(),
        _ => format!("-ERR {} failed", command.name()),
    }
}
