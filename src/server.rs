//! Listening, accepting and draining sessions
//!
//! ```text
//!   start():  bind -> spawn accept loop
//!                       |
//!             accepted socket -> tracked task -> Pop3Session / SmtpSession
//!
//!   stop():   cancel -> accept loop ends, listener closed
//!                    -> sessions finish their current command
//!                    -> wait for them, at most `shutdown_grace`
//!                    -> drop whatever is still running
//! ```

use crate::context::GatewayContext;
use crate::error::{Error, Result};
use crate::pop3::Pop3Session;
use crate::smtp::SmtpSession;
use std::fmt;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{Instrument, debug, info, info_span, warn};

/// A network service with an explicit lifecycle.
pub trait MailService {
    /// Bind and begin accepting. Returns the bound address.
    ///
    /// # Errors
    ///
    /// Returns an error if the service is already running or the
    /// address cannot be bound.
    fn start(&mut self) -> impl Future<Output = Result<SocketAddr>> + Send;

    /// Stop accepting and drain the running sessions. Sessions still
    /// running after the grace period are dropped.
    ///
    /// # Errors
    ///
    /// Returns an error if the service cannot be shut down cleanly.
    fn stop(&mut self) -> impl Future<Output = Result<()>> + Send;
}

/// The client-facing protocol a listener speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalProtocol {
    Pop3,
    Smtp,
}

impl fmt::Display for LocalProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Pop3 => "POP3",
            Self::Smtp => "SMTP",
        })
    }
}

/// One listener plus the sessions it spawned.
pub struct GatewayServer {
    protocol: LocalProtocol,
    bind_addr: String,
    ctx: Arc<GatewayContext>,
    tracker: TaskTracker,
    cancel: CancellationToken,
    /// Fired after the grace period; drops the remaining sessions.
    abort: CancellationToken,
    accept_task: Option<JoinHandle<()>>,
    local_addr: Option<SocketAddr>,
}

impl GatewayServer {
    #[must_use]
    pub fn new(protocol: LocalProtocol, bind_addr: impl Into<String>, ctx: Arc<GatewayContext>) -> Self {
        Self {
            protocol,
            bind_addr: bind_addr.into(),
            ctx,
            tracker: TaskTracker::new(),
            cancel: CancellationToken::new(),
            abort: CancellationToken::new(),
            accept_task: None,
            local_addr: None,
        }
    }

    #[must_use]
    pub const fn protocol(&self) -> LocalProtocol {
        self.protocol
    }

    /// The bound address once started.
    #[must_use]
    pub const fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Number of sessions currently running.
    #[must_use]
    pub fn active_sessions(&self) -> usize {
        self.tracker.len()
    }
}

impl MailService for GatewayServer {
    async fn start(&mut self) -> Result<SocketAddr> {
        if self.accept_task.is_some() {
            return Err(Error::Config(format!("{} listener already running", self.protocol)));
        }

        let listener = TcpListener::bind(&self.bind_addr)
            .await
            .map_err(|source| Error::Connect {
                addr: self.bind_addr.clone(),
                source,
            })?;
        let local_addr = listener.local_addr()?;
        info!("{} listening on {}", self.protocol, local_addr);

        let protocol = self.protocol;
        let ctx = self.ctx.clone();
        let tracker = self.tracker.clone();
        let cancel = self.cancel.clone();
        let abort = self.abort.clone();
        self.accept_task = Some(tokio::spawn(accept_loop(
            listener, protocol, ctx, tracker, cancel, abort,
        )));
        self.local_addr = Some(local_addr);
        Ok(local_addr)
    }

    async fn stop(&mut self) -> Result<()> {
        self.cancel.cancel();
        if let Some(task) = self.accept_task.take() {
            let _ = task.await;
        }

        self.tracker.close();
        let grace = self.ctx.timeouts.shutdown_grace();
        if tokio::time::timeout(grace, self.tracker.wait()).await.is_err() {
            warn!(
                "{} sessions still running after {:?}, closing them",
                self.tracker.len(),
                grace
            );
            self.abort.cancel();
            self.tracker.wait().await;
        }
        info!("{} listener stopped", self.protocol);
        Ok(())
    }
}

async fn accept_loop(
    listener: TcpListener,
    protocol: LocalProtocol,
    ctx: Arc<GatewayContext>,
    tracker: TaskTracker,
    cancel: CancellationToken,
    abort: CancellationToken,
) {
    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    debug!("{} connection from {}", protocol, peer);
                    let span = info_span!("session", protocol = %protocol, peer = %peer);
                    let session = run_session(protocol, stream, ctx.clone(), cancel.clone());
                    let abort = abort.clone();
                    tracker.spawn(
                        async move {
                            tokio::select! {
                                () = session => {}
                                () = abort.cancelled() => warn!("Session cut off at shutdown"),
                            }
                        }
                        .instrument(span),
                    );
                }
                Err(e) => warn!("{} accept failed: {}", protocol, e),
            },
        }
    }
    debug!("{} accept loop finished", protocol);
}

async fn run_session(
    protocol: LocalProtocol,
    stream: TcpStream,
    ctx: Arc<GatewayContext>,
    cancel: CancellationToken,
) {
    let result = match protocol {
        LocalProtocol::Pop3 => Pop3Session::new(stream, ctx).run(cancel).await,
        LocalProtocol::Smtp => SmtpSession::new(stream, ctx).run(cancel).await,
    };
    match result {
        Ok(()) | Err(Error::Disconnected) => debug!("Session closed"),
        Err(e) => warn!("Session ended with error: {}", e),
    }
}
