//! Shared TLS client configuration
//!
//! Both connectors are built once per process and shared by every
//! session through `Arc`. The verifying connector trusts the Mozilla
//! root set from `webpki-roots`; the accept-all connector exists for
//! self-signed local bridges and is only used when a credential sets
//! `accept_invalid_certs`.

use crate::error::{Error, Result};
use rustls::pki_types::ServerName;
use std::sync::Arc;
use tokio_rustls::TlsConnector;

/// Read-only TLS connectors for upstream links.
#[derive(Clone)]
pub struct TlsContext {
    verified: TlsConnector,
    insecure: TlsConnector,
}

impl TlsContext {
    #[must_use]
    pub fn new() -> Self {
        install_crypto_provider();

        let roots = rustls::RootCertStore::from_iter(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        let verified = rustls::ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth();

        let insecure = rustls::ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(DangerousVerifier))
            .with_no_client_auth();

        Self {
            verified: TlsConnector::from(Arc::new(verified)),
            insecure: TlsConnector::from(Arc::new(insecure)),
        }
    }

    /// The connector to use for a credential.
    #[must_use]
    pub const fn connector(&self, accept_invalid_certs: bool) -> &TlsConnector {
        if accept_invalid_certs {
            &self.insecure
        } else {
            &self.verified
        }
    }
}

impl Default for TlsContext {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for TlsContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsContext").finish_non_exhaustive()
    }
}

/// Install the ring crypto provider process-wide.
///
/// Several call sites may race to install it, so an "already
/// installed" error is ignored.
pub fn install_crypto_provider() {
    let _ = rustls::crypto::ring::default_provider().install_default();
}

/// Parse the SNI / verification name for `host`.
///
/// # Errors
///
/// Returns an error if `host` is not a valid DNS name or IP address.
pub fn server_name(host: &str) -> Result<ServerName<'static>> {
    ServerName::try_from(host.to_string())
        .map_err(|e| Error::Tls(format!("Invalid server name {host}: {e}")))
}

/// Certificate verifier that accepts all certificates
/// (for bridges with self-signed certs).
#[derive(Debug)]
struct DangerousVerifier;

impl rustls::client::danger::ServerCertVerifier for DangerousVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> std::result::Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        rustls::crypto::ring::default_provider()
            .signature_verification_algorithms
            .supported_schemes()
    }
}
