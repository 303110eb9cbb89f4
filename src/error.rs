//! Error types for mail-gateway

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// The upstream server could not be reached.
    #[error("cannot connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// The peer closed the connection (or the link was already closed).
    #[error("connection closed by peer")]
    Disconnected,

    /// Stored or client-supplied credentials were refused.
    #[error("authentication failed: {0}")]
    AuthFailed(String),

    /// Malformed, out-of-phase or unexpected protocol data.
    #[error("protocol violation: {0}")]
    Protocol(String),

    #[error("no such message: {0}")]
    NoSuchMessage(u32),

    /// The message exists but was marked by `DELE` in this session.
    #[error("message {0} already deleted")]
    MessageDeleted(u32),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("timed out waiting for {0}")]
    Timeout(&'static str),

    /// A line exceeded its length cap before its LF arrived.
    #[error("{0} line longer than {1} bytes")]
    LineTooLong(&'static str, usize),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether the error means the upstream link is no longer usable.
    #[must_use]
    pub const fn is_fatal_for_link(&self) -> bool {
        matches!(
            self,
            Self::Disconnected
                | Self::Io(_)
                | Self::Timeout(_)
                | Self::Tls(_)
                | Self::LineTooLong(..)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
