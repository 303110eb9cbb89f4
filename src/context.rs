//! Read-only state shared by every session

use crate::config::{GatewayConfig, Timeouts};
use crate::tls::TlsContext;
use crate::vault::CredentialVault;
use std::sync::Arc;

/// Everything a session needs besides its own socket.
///
/// Built once at startup and handed to sessions as `Arc`; nothing in
/// it is mutated afterwards.
#[derive(Debug)]
pub struct GatewayContext {
    pub vault: CredentialVault,
    pub tls: TlsContext,
    pub timeouts: Timeouts,
    /// Name used in greetings, capability replies and upstream `EHLO`.
    pub hostname: String,
}

impl GatewayContext {
    #[must_use]
    pub fn new(vault: CredentialVault, timeouts: Timeouts, hostname: impl Into<String>) -> Self {
        Self {
            vault,
            tls: TlsContext::new(),
            timeouts,
            hostname: hostname.into(),
        }
    }

    #[must_use]
    pub fn from_config(config: &GatewayConfig) -> Arc<Self> {
        Arc::new(Self::new(
            CredentialVault::new(config.servers.clone()),
            config.timeouts,
            config.local.hostname.clone(),
        ))
    }
}
