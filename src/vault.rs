//! Read-only credential lookup over the configured profiles

use crate::config::{MailboxProfile, UpstreamProtocol};
use std::sync::Arc;
use tracing::{debug, info};

/// Immutable view over the configured mailbox profiles.
///
/// Cloning is cheap; every session holds its own handle and the
/// profiles it resolves are shared `Arc`s, never copies.
#[derive(Debug, Clone)]
pub struct CredentialVault {
    profiles: Arc<[Arc<MailboxProfile>]>,
}

impl CredentialVault {
    #[must_use]
    pub fn new(profiles: Vec<MailboxProfile>) -> Self {
        Self {
            profiles: profiles.into_iter().map(Arc::new).collect(),
        }
    }

    #[must_use]
    pub fn profiles(&self) -> &[Arc<MailboxProfile>] {
        &self.profiles
    }

    /// First profile carrying credentials for `protocol`.
    #[must_use]
    pub fn first_with(&self, protocol: UpstreamProtocol) -> Option<Arc<MailboxProfile>> {
        self.profiles
            .iter()
            .find(|p| p.credentials(protocol).is_some())
            .cloned()
    }

    /// Resolve the mailbox a POP3 client asked for with `USER`.
    ///
    /// Matches the POP3 or IMAP username case-insensitively; without a
    /// match, falls back to the first IMAP profile, then the first
    /// POP3 profile.
    #[must_use]
    pub fn resolve_mailbox(&self, username: &str) -> Option<Arc<MailboxProfile>> {
        let exact = self.profiles.iter().find(|p| {
            [p.pop3.as_ref(), p.imap.as_ref()]
                .into_iter()
                .flatten()
                .any(|cred| cred.username.eq_ignore_ascii_case(username))
        });
        if let Some(profile) = exact {
            debug!(profile = %profile.name, "mailbox resolved by username");
            return Some(profile.clone());
        }

        let fallback = self
            .first_with(UpstreamProtocol::Imap)
            .or_else(|| self.first_with(UpstreamProtocol::Pop3));
        if let Some(profile) = &fallback {
            info!(profile = %profile.name, "no profile for '{}', using fallback", username);
        }
        fallback
    }

    /// The profile whose SMTP username is exactly `username`.
    #[must_use]
    pub fn smtp_identity(&self, username: &str) -> Option<Arc<MailboxProfile>> {
        self.profiles
            .iter()
            .find(|p| p.smtp.as_ref().is_some_and(|c| c.username == username))
            .cloned()
    }

    /// Check an emulated `AUTH LOGIN` against the stored SMTP
    /// credentials. No fallback: the identity must exist.
    #[must_use]
    pub fn verify_smtp_login(&self, username: &str, password: &str) -> Option<Arc<MailboxProfile>> {
        self.smtp_identity(username).filter(|profile| {
            profile
                .smtp
                .as_ref()
                .is_some_and(|cred| cred.password == password)
        })
    }

    /// Resolve the profile that sends mail for an envelope sender.
    ///
    /// Exact SMTP username match first, then the first profile that
    /// has SMTP credentials at all.
    #[must_use]
    pub fn resolve_sender(&self, sender: &str) -> Option<Arc<MailboxProfile>> {
        if let Some(profile) = self.smtp_identity(sender) {
            return Some(profile);
        }

        let fallback = self.first_with(UpstreamProtocol::Smtp);
        if let Some(profile) = &fallback {
            info!(profile = %profile.name, "SMTP fallback: no profile for sender {}", sender);
        }
        fallback
    }
}
