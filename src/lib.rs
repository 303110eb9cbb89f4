//! Mail protocol gateway
//!
//! Lets legacy mail clients that only speak plaintext POP3 and SMTP
//! use providers that require TLS and real credentials. The gateway
//! keeps the credentials; clients connect to it locally and never see
//! them.
//!
//! - POP3 clients are served from an upstream IMAP mailbox through
//!   [`imap::ImapTranslator`], or relayed to an upstream POP3 server.
//! - SMTP clients authenticate against the stored profiles (or are
//!   bound by their envelope sender) and their mail is submitted
//!   upstream over STARTTLS or implicit TLS.
//!
//! [`GatewayServer`] runs one listener; [`GatewayConfig`] describes
//! the profiles and listeners.

pub mod auth;
mod client;
pub mod config;
mod context;
mod error;
pub mod imap;
pub mod link;
pub mod pop3;
mod server;
pub mod smtp;
pub mod tls;
mod vault;

pub use client::{ClientConn, Inbound};
pub use config::{GatewayConfig, MailboxProfile, UpstreamCredentials, UpstreamProtocol};
pub use context::GatewayContext;
pub use error::{Error, Result};
pub use link::{Transport, UpstreamLink};
pub use server::{GatewayServer, LocalProtocol, MailService};
pub use tls::TlsContext;
pub use vault::CredentialVault;
