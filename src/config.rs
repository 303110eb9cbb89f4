//! Gateway configuration
//!
//! The gateway is configured from a YAML file holding an ordered list
//! of mailbox profiles (each with optional POP3/IMAP/SMTP upstream
//! credentials) and the local listener addresses. Profile order
//! matters: "first available" fallbacks walk the list top to bottom.

use crate::error::{Error, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::env;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable naming the configuration file.
pub const CONFIG_ENV: &str = "MAIL_GATEWAY_CONFIG";

const DEFAULT_CONFIG_PATH: &str = "config.yaml";

/// Upstream protocols a profile can carry credentials for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UpstreamProtocol {
    Pop3,
    Imap,
    Smtp,
}

impl UpstreamProtocol {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pop3 => "POP3",
            Self::Imap => "IMAP",
            Self::Smtp => "SMTP",
        }
    }
}

impl fmt::Display for UpstreamProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How an SMTP upstream connection is secured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SmtpSecurity {
    /// TLS from the first byte (submissions port, 465).
    Implicit,
    /// Plain TCP upgraded with `STARTTLS` before authenticating.
    Starttls,
    /// No TLS at all.
    Plain,
}

/// Credentials and endpoint for one upstream server.
#[derive(Clone, Deserialize)]
pub struct UpstreamCredentials {
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub use_tls: bool,
    pub username: String,
    pub password: String,
    /// Skip certificate verification (self-signed bridges).
    #[serde(default)]
    pub accept_invalid_certs: bool,
    /// SMTP only; derived from `use_tls` and `port` when absent.
    #[serde(default)]
    pub security: Option<SmtpSecurity>,
}

impl UpstreamCredentials {
    /// `host:port` for connecting and logging.
    #[must_use]
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// The effective SMTP transport security.
    ///
    /// Port 465 with `use_tls` means implicit TLS; any other port
    /// with `use_tls` is upgraded with STARTTLS.
    #[must_use]
    pub fn smtp_security(&self) -> SmtpSecurity {
        match self.security {
            Some(security) => security,
            None if !self.use_tls => SmtpSecurity::Plain,
            None if self.port == 465 => SmtpSecurity::Implicit,
            None => SmtpSecurity::Starttls,
        }
    }
}

impl fmt::Debug for UpstreamCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpstreamCredentials")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("use_tls", &self.use_tls)
            .field("username", &self.username)
            .field("password", &"[hidden]")
            .field("accept_invalid_certs", &self.accept_invalid_certs)
            .field("security", &self.security)
            .finish()
    }
}

/// A named bundle of upstream credentials for one mailbox.
#[derive(Debug, Clone, Deserialize)]
pub struct MailboxProfile {
    pub name: String,
    #[serde(default)]
    pub pop3: Option<UpstreamCredentials>,
    #[serde(default)]
    pub imap: Option<UpstreamCredentials>,
    #[serde(default)]
    pub smtp: Option<UpstreamCredentials>,
}

impl MailboxProfile {
    /// Credentials for the given upstream protocol, if configured.
    #[must_use]
    pub const fn credentials(&self, protocol: UpstreamProtocol) -> Option<&UpstreamCredentials> {
        match protocol {
            UpstreamProtocol::Pop3 => self.pop3.as_ref(),
            UpstreamProtocol::Imap => self.imap.as_ref(),
            UpstreamProtocol::Smtp => self.smtp.as_ref(),
        }
    }

    /// The mailbox-access upstream: IMAP when configured, else POP3.
    #[must_use]
    pub fn retrieval(&self) -> Option<(UpstreamProtocol, &UpstreamCredentials)> {
        self.imap
            .as_ref()
            .map(|cred| (UpstreamProtocol::Imap, cred))
            .or_else(|| self.pop3.as_ref().map(|cred| (UpstreamProtocol::Pop3, cred)))
    }
}

/// A local listening address.
#[derive(Debug, Clone, Deserialize)]
pub struct ListenerConfig {
    #[serde(default = "default_listen_host")]
    pub host: String,
    pub port: u16,
}

impl ListenerConfig {
    #[must_use]
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Local (client-facing) side of the gateway.
#[derive(Debug, Clone, Deserialize)]
pub struct LocalConfig {
    /// Name used in greetings, EHLO replies and upstream EHLO.
    #[serde(default = "default_hostname")]
    pub hostname: String,
    #[serde(default)]
    pub pop3: Option<ListenerConfig>,
    #[serde(default)]
    pub smtp: Option<ListenerConfig>,
}

impl Default for LocalConfig {
    fn default() -> Self {
        Self {
            hostname: default_hostname(),
            pop3: None,
            smtp: None,
        }
    }
}

/// Timeouts, in seconds.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct Timeouts {
    /// Waiting for any single upstream response line.
    pub upstream_read_secs: u64,
    /// Receiving a whole message body from the client.
    pub data_secs: u64,
    /// Waiting for the next client command.
    pub client_idle_secs: u64,
    /// Letting sessions drain on shutdown.
    pub shutdown_grace_secs: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            upstream_read_secs: 120,
            data_secs: 300,
            client_idle_secs: 600,
            shutdown_grace_secs: 10,
        }
    }
}

impl Timeouts {
    #[must_use]
    pub const fn upstream_read(&self) -> Duration {
        Duration::from_secs(self.upstream_read_secs)
    }

    #[must_use]
    pub const fn data(&self) -> Duration {
        Duration::from_secs(self.data_secs)
    }

    #[must_use]
    pub const fn client_idle(&self) -> Duration {
        Duration::from_secs(self.client_idle_secs)
    }

    #[must_use]
    pub const fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

/// Complete gateway configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    pub servers: Vec<MailboxProfile>,
    #[serde(default)]
    pub local: LocalConfig,
    #[serde(default)]
    pub timeouts: Timeouts,
    /// `info` or `debug`; `RUST_LOG` takes precedence.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl GatewayConfig {
    /// Load the configuration file.
    ///
    /// Reads from `.env` file if present. The path is taken from
    /// `path`, else from `MAIL_GATEWAY_CONFIG`, else `config.yaml`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, is not valid YAML,
    /// or fails [`validate`](Self::validate).
    pub fn load(path: Option<&Path>) -> Result<Self> {
        dotenvy::dotenv().ok();

        let path = path.map_or_else(
            || {
                env::var(CONFIG_ENV)
                    .map_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH), PathBuf::from)
            },
            Path::to_path_buf,
        );
        Self::from_file(&path)
    }

    /// Read and validate a YAML configuration file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or fails
    /// validation.
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {e}", path.display())))?;
        Self::from_yaml(&text)
    }

    /// Parse and validate YAML text.
    ///
    /// # Errors
    ///
    /// Returns an error if `text` is not a valid configuration or fails
    /// validation.
    pub fn from_yaml(text: &str) -> Result<Self> {
        let config: Self =
            serde_yaml::from_str(text).map_err(|e| Error::Config(format!("invalid YAML: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Check the invariants the sessions rely on.
    ///
    /// # Errors
    ///
    /// Returns an error naming the first profile, credential or listener
    /// that breaks an invariant.
    pub fn validate(&self) -> Result<()> {
        if self.servers.is_empty() {
            return Err(Error::Config("no mailbox profiles configured".into()));
        }

        let mut names = HashSet::new();
        for profile in &self.servers {
            if !names.insert(profile.name.as_str()) {
                return Err(Error::Config(format!(
                    "duplicate profile name '{}'",
                    profile.name
                )));
            }

            let creds = [
                UpstreamProtocol::Pop3,
                UpstreamProtocol::Imap,
                UpstreamProtocol::Smtp,
            ]
            .into_iter()
            .filter_map(|protocol| profile.credentials(protocol).map(|c| (protocol, c)))
            .collect::<Vec<_>>();

            if creds.is_empty() {
                return Err(Error::Config(format!(
                    "profile '{}' has no upstream credentials",
                    profile.name
                )));
            }

            for (protocol, cred) in creds {
                if cred.host.trim().is_empty() || cred.port == 0 {
                    return Err(Error::Config(format!(
                        "profile '{}': {protocol} needs a host and a non-zero port",
                        profile.name
                    )));
                }
            }
        }

        let listeners = [self.local.pop3.as_ref(), self.local.smtp.as_ref()];
        if listeners.iter().all(Option::is_none) {
            return Err(Error::Config(
                "neither local.pop3 nor local.smtp is configured".into(),
            ));
        }
        if listeners.iter().flatten().any(|l| l.port == 0) {
            return Err(Error::Config("local listener port must be non-zero".into()));
        }

        Ok(())
    }
}

fn default_listen_host() -> String {
    "127.0.0.1".to_string()
}

fn default_hostname() -> String {
    "proxy-mail".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}
