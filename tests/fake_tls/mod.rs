//! Self-signed TLS for the fake upstream servers
//!
//! The certificate is generated with `rcgen` at startup, so no cert
//! files are needed. The gateway side connects with
//! `accept_invalid_certs`, as it would to a local bridge.

use rcgen::generate_simple_self_signed;
use rustls::pki_types::PrivatePkcs8KeyDer;
use std::sync::Arc;
use tokio_rustls::TlsAcceptor;

/// A TLS acceptor with a fresh certificate for 127.0.0.1.
pub fn acceptor() -> TlsAcceptor {
    // Tests race to install the provider; the loser's error is fine.
    let _ = rustls::crypto::ring::default_provider().install_default();

    let cert = generate_simple_self_signed(vec!["127.0.0.1".to_string()])
        .expect("generate self-signed cert");
    let cert_der = cert.cert.der().clone();
    let key_der = PrivatePkcs8KeyDer::from(cert.key_pair.serialize_der());

    let tls_config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(vec![cert_der], key_der.into())
        .expect("build server TLS config");
    TlsAcceptor::from(Arc::new(tls_config))
}
