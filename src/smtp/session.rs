//! Client-facing SMTP session

use super::{Reply, SmtpCommand, relay_body, upstream};
use crate::client::{ClientConn, Inbound};
use crate::config::MailboxProfile;
use crate::context::GatewayContext;
use crate::error::{Error, Result};
use crate::link::UpstreamLink;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Advertised in the `SIZE` capability.
const MAX_MESSAGE_SIZE: u64 = 35_882_577;

/// Base64 of `Username:` and `Password:`.
const USERNAME_CHALLENGE: &str = "334 VXNlcm5hbWU6";
const PASSWORD_CHALLENGE: &str = "334 UGFzc3dvcmQ6";

const LOCAL_ERROR: &str = "451 Local error in processing";

/// Where an emulated `AUTH LOGIN` exchange stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AuthStep {
    None,
    ExpectingUsername,
    ExpectingPassword,
}

/// Progress of the current mail transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    /// `MAIL FROM` accepted upstream.
    Mail,
    /// At least one `RCPT TO` accepted upstream.
    Rcpt,
}

/// One local SMTP client connection.
///
/// The client authenticates against the stored profiles (or is bound
/// implicitly by its envelope sender); the upstream connection is
/// opened once a profile is bound and kept for the whole session.
pub struct SmtpSession<S> {
    client: ClientConn<S>,
    ctx: Arc<GatewayContext>,
    auth_step: AuthStep,
    /// Username received during `AUTH LOGIN`, awaiting its password.
    pending_username: Option<String>,
    /// Set once the session is authenticated, explicitly or by sender.
    auth_identity: Option<String>,
    /// Set at most once.
    bound: Option<Arc<MailboxProfile>>,
    upstream: Option<UpstreamLink>,
    phase: Phase,
}

impl<S: AsyncRead + AsyncWrite + Unpin> SmtpSession<S> {
    pub fn new(stream: S, ctx: Arc<GatewayContext>) -> Self {
        Self {
            client: ClientConn::new(stream),
            ctx,
            auth_step: AuthStep::None,
            pending_username: None,
            auth_identity: None,
            bound: None,
            upstream: None,
            phase: Phase::Idle,
        }
    }

    /// Serve the client until `QUIT`, disconnect, idle timeout or
    /// shutdown. The upstream link is closed on every exit path.
    ///
    /// # Errors
    ///
    /// Returns an error if the client socket fails or the message body times
    /// out.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<()> {
        let result = self.serve(&cancel).await;
        self.close_upstream().await;
        self.client.shutdown().await;
        result
    }

    async fn serve(&mut self, cancel: &CancellationToken) -> Result<()> {
        self.client
            .send(&format!("220 {} SMTP Ready", self.ctx.hostname))
            .await?;

        loop {
            let line = match self.client.next_line(self.ctx.timeouts.client_idle(), cancel).await? {
                Inbound::Line(line) => line,
                Inbound::Closed => {
                    debug!("SMTP client disconnected");
                    return Ok(());
                }
                Inbound::IdleTimeout => {
                    info!("SMTP client idle, closing");
                    let _ = self.client.send("421 Idle timeout, closing connection").await;
                    return Ok(());
                }
                Inbound::TooLong => {
                    warn!("SMTP command line too long, closing");
                    let _ = self.client.send("500 Line too long").await;
                    return Ok(());
                }
                Inbound::Shutdown => {
                    let _ = self.client.send("421 Service shutting down").await;
                    return Ok(());
                }
            };

            if self.auth_step == AuthStep::None {
                debug!("CLIENT -> PROXY: {}", line);
                if !self.dispatch(&line).await? {
                    return Ok(());
                }
            } else {
                debug!("CLIENT -> PROXY: [auth payload]");
                self.continue_auth(&line).await?;
            }
        }
    }

    /// Handle one command; `false` ends the session.
    async fn dispatch(&mut self, line: &str) -> Result<bool> {
        match SmtpCommand::parse(line) {
            SmtpCommand::Ehlo(_) | SmtpCommand::Helo(_) => {
                self.reset_transaction().await;
                self.send_capabilities().await?;
            }
            SmtpCommand::Auth {
                mechanism,
                initial_response,
            } => self.start_auth(mechanism, initial_response).await?,
            SmtpCommand::MailFrom { address } => self.mail_from(line, address).await?,
            SmtpCommand::RcptTo => self.rcpt_to(line).await?,
            SmtpCommand::Data => self.data().await?,
            SmtpCommand::Rset => {
                self.reset_transaction().await;
                self.client.send("250 OK").await?;
            }
            SmtpCommand::Noop => self.client.send("250 OK").await?,
            SmtpCommand::StartTls => self.client.send("454 TLS not available").await?,
            SmtpCommand::Quit => {
                self.client.send("221 Goodbye").await?;
                return Ok(false);
            }
            SmtpCommand::Unknown("") => self.client.send("501 Syntax error").await?,
            SmtpCommand::Unknown(verb) => {
                debug!("Unsupported SMTP command {}", verb);
                self.client.send("502 Command not implemented").await?;
            }
        }
        Ok(true)
    }

    async fn send_capabilities(&mut self) -> Result<()> {
        let reply = format!(
            "250-{}\r\n250-SIZE {MAX_MESSAGE_SIZE}\r\n250-8BITMIME\r\n250-PIPELINING\r\n250-AUTH LOGIN\r\n250 STARTTLS\r\n",
            self.ctx.hostname
        );
        self.client.send_raw(reply.as_bytes()).await
    }

    async fn start_auth(&mut self, mechanism: &str, initial_response: Option<&str>) -> Result<()> {
        if self.auth_identity.is_some() {
            return self.client.send("503 Already authenticated").await;
        }
        if mechanism.is_empty() {
            return self.client.send("501 Syntax error").await;
        }
        if !mechanism.eq_ignore_ascii_case("LOGIN") {
            return self
                .client
                .send("504 Authentication mechanism not supported")
                .await;
        }

        match initial_response {
            Some(encoded) => self.accept_username(encoded).await,
            None => {
                self.auth_step = AuthStep::ExpectingUsername;
                self.client.send(USERNAME_CHALLENGE).await
            }
        }
    }

    async fn continue_auth(&mut self, line: &str) -> Result<()> {
        if line == "*" {
            self.clear_auth();
            return self.client.send("501 Authentication cancelled").await;
        }
        match self.auth_step {
            AuthStep::ExpectingUsername => self.accept_username(line).await,
            AuthStep::ExpectingPassword => self.check_password(line).await,
            AuthStep::None => Ok(()),
        }
    }

    async fn accept_username(&mut self, encoded: &str) -> Result<()> {
        let Some(username) = decode_base64(encoded) else {
            self.clear_auth();
            return self.client.send("501 Invalid base64 encoding").await;
        };
        debug!("AUTH LOGIN username {}", username);
        self.pending_username = Some(username);
        self.auth_step = AuthStep::ExpectingPassword;
        self.client.send(PASSWORD_CHALLENGE).await
    }

    async fn check_password(&mut self, encoded: &str) -> Result<()> {
        let username = self.pending_username.take().unwrap_or_default();
        self.clear_auth();
        let Some(password) = decode_base64(encoded) else {
            return self.client.send("501 Invalid base64 encoding").await;
        };

        match self.ctx.vault.verify_smtp_login(&username, &password) {
            Some(profile) => {
                info!("SMTP client authenticated as {} (profile {})", username, profile.name);
                self.bind(profile, username);
                self.client.send("235 Authentication successful").await
            }
            None => {
                warn!("SMTP authentication failed for {}", username);
                self.client.send("535 Authentication failed").await
            }
        }
    }

    fn clear_auth(&mut self) {
        self.auth_step = AuthStep::None;
        self.pending_username = None;
    }

    fn bind(&mut self, profile: Arc<MailboxProfile>, identity: String) {
        if self.bound.is_none() {
            self.bound = Some(profile);
        }
        self.auth_identity = Some(identity);
    }

    async fn mail_from(&mut self, line: &str, address: Option<String>) -> Result<()> {
        if self.phase != Phase::Idle {
            return self.client.send("503 Sender already specified").await;
        }
        let Some(address) = address else {
            return self.client.send("501 Invalid MAIL FROM format").await;
        };

        match &self.auth_identity {
            Some(identity) if *identity != address => {
                warn!("Rejected sender {} for session authenticated as {}", address, identity);
                return self
                    .client
                    .send("550 Sender address must match authenticated user")
                    .await;
            }
            Some(_) => {}
            None => {
                let Some(profile) = self.ctx.vault.resolve_sender(&address) else {
                    return self
                        .client
                        .send("550 No upstream SMTP server configured for sending mail")
                        .await;
                };
                info!("Sender {} bound to profile {}", address, profile.name);
                self.bind(profile, address);
            }
        }

        if let Err(e) = self.ensure_upstream().await {
            warn!("Cannot open upstream SMTP session: {}", e);
            return self.client.send(LOCAL_ERROR).await;
        }

        match self.forward(line).await {
            Ok(reply) => {
                if reply.is_positive() {
                    self.phase = Phase::Mail;
                }
                self.client.send_raw(reply.to_wire().as_bytes()).await
            }
            Err(e) => self.upstream_lost(&e).await,
        }
    }

    async fn rcpt_to(&mut self, line: &str) -> Result<()> {
        if self.auth_identity.is_none() {
            return self.client.send("530 Authentication required").await;
        }
        if self.upstream.is_none() {
            return self.client.send(LOCAL_ERROR).await;
        }
        if self.phase == Phase::Idle {
            return self.client.send("503 Need MAIL command").await;
        }

        match self.forward(line).await {
            Ok(reply) => {
                if reply.is_positive() {
                    self.phase = Phase::Rcpt;
                }
                self.client.send_raw(reply.to_wire().as_bytes()).await
            }
            Err(e) => self.upstream_lost(&e).await,
        }
    }

    async fn data(&mut self) -> Result<()> {
        if self.auth_identity.is_none() {
            return self.client.send("530 Authentication required").await;
        }
        if self.upstream.is_none() {
            return self.client.send(LOCAL_ERROR).await;
        }
        if self.phase != Phase::Rcpt {
            return self.client.send("503 Need RCPT command").await;
        }

        let reply = match self.forward("DATA").await {
            Ok(reply) => reply,
            Err(e) => return self.upstream_lost(&e).await,
        };
        self.client.send_raw(reply.to_wire().as_bytes()).await?;
        if reply.code != 354 {
            debug!("Upstream refused DATA: {}", reply.last_line());
            self.reset_transaction().await;
            return Ok(());
        }

        let Some(link) = self.upstream.as_mut() else {
            return self.upstream_lost(&Error::Disconnected).await;
        };
        let relayed = match link.stream_mut() {
            Ok(stream) => {
                relay_body(
                    self.client.reader_mut(),
                    stream.get_mut(),
                    self.ctx.timeouts.data(),
                )
                .await
            }
            Err(e) => Err(e),
        };

        let outcome = match relayed {
            Ok(outcome) => outcome,
            Err(e @ Error::Timeout(_)) => {
                warn!("Message body not received in time, aborting session");
                let _ = self.client.send("451 Timeout waiting for message data").await;
                return Err(e);
            }
            Err(e @ Error::LineTooLong(..)) => {
                warn!("Message line too long, aborting session");
                let _ = self.client.send("500 Line too long").await;
                return Err(e);
            }
            Err(e) => return Err(e),
        };
        if let Some(e) = outcome.upstream_error {
            return self.upstream_lost(&e).await;
        }

        let final_reply = match self.read_upstream_reply().await {
            Ok(reply) => reply,
            Err(e) => return self.upstream_lost(&e).await,
        };
        if final_reply.is_positive() {
            info!(
                "Message from {} delivered ({} bytes, charset {})",
                self.auth_identity.as_deref().unwrap_or(""),
                outcome.bytes,
                outcome.charset.as_deref().unwrap_or("unspecified")
            );
        } else {
            warn!("Upstream rejected message: {}", final_reply.last_line());
        }
        self.phase = Phase::Idle;
        self.client.send_raw(final_reply.to_wire().as_bytes()).await
    }

    async fn ensure_upstream(&mut self) -> Result<()> {
        if self.upstream.is_some() {
            return Ok(());
        }
        let profile = self
            .bound
            .clone()
            .ok_or_else(|| Error::Protocol("no profile bound".into()))?;
        let cred = profile
            .smtp
            .as_ref()
            .ok_or_else(|| Error::Config(format!("profile '{}' has no SMTP credentials", profile.name)))?;

        let link = upstream::connect(
            cred,
            &self.ctx.tls,
            self.ctx.timeouts.upstream_read(),
            &self.ctx.hostname,
        )
        .await?;
        self.upstream = Some(link);
        Ok(())
    }

    /// Send a client line upstream unchanged and read the reply.
    async fn forward(&mut self, line: &str) -> Result<Reply> {
        let link = self.upstream.as_mut().ok_or(Error::Disconnected)?;
        debug!("PROXY -> SMTP-SERVER: {}", line);
        link.write_line(line).await?;
        Reply::read(link).await
    }

    async fn read_upstream_reply(&mut self) -> Result<Reply> {
        let link = self.upstream.as_mut().ok_or(Error::Disconnected)?;
        Reply::read(link).await
    }

    /// Abort the transaction after an upstream failure. The session
    /// survives; the next `MAIL FROM` reconnects.
    async fn upstream_lost(&mut self, error: &Error) -> Result<()> {
        warn!("Upstream SMTP failure: {}", error);
        if let Some(mut link) = self.upstream.take() {
            link.close().await;
        }
        self.phase = Phase::Idle;
        self.client.send(LOCAL_ERROR).await
    }

    /// Abandon any open transaction, upstream included.
    async fn reset_transaction(&mut self) {
        if self.phase != Phase::Idle && self.upstream.is_some() {
            if let Err(e) = self.forward("RSET").await {
                warn!("Upstream RSET failed: {}", e);
                if let Some(mut link) = self.upstream.take() {
                    link.close().await;
                }
            }
        }
        self.phase = Phase::Idle;
    }

    async fn close_upstream(&mut self) {
        if let Some(mut link) = self.upstream.take() {
            debug!("PROXY -> SMTP-SERVER: QUIT");
            let _ = link.write_line("QUIT").await;
            link.close().await;
        }
    }
}

fn decode_base64(encoded: &str) -> Option<String> {
    let bytes = BASE64.decode(encoded.trim()).ok()?;
    String::from_utf8(bytes).ok()
}
