//! TLS termination.
//!
//! # Responsibilities
//! - Load certificate chain and private key (PEM)
//! - Enforce the configured minimum protocol version (1.2 or 1.3)
//! - Restrict cipher suites when a list is configured
//!
//! # Design Decisions
//! - rustls with the ring provider; no OpenSSL dependency
//! - Handshake timeout at the accept loop prevents slowloris-style
//!   stalls from pinning connections

use std::fs::File;
use std::io::BufReader;
use std::sync::Arc;

use rustls::version::{TLS12, TLS13};
use tokio_rustls::TlsAcceptor;

use crate::config::TlsConfig;

/// Error raised while building the TLS context.
#[derive(Debug, thiserror::Error)]
pub enum TlsError {
    #[error("failed to read {0}: {1}")]
    Io(String, std::io::Error),

    #[error("certificate load failed: {0}")]
    Certificate(String),

    #[error("key load failed: {0}")]
    Key(String),

    #[error("TLS configuration invalid: {0}")]
    Config(String),
}

/// Build a TLS acceptor from listener configuration.
pub fn build_acceptor(config: &TlsConfig) -> Result<TlsAcceptor, TlsError> {
    let certs = load_certs(&config.cert)?;
    let key = load_key(&config.key)?;

    let mut provider = rustls::crypto::ring::default_provider();
    if !config.ciphers.is_empty() {
        provider.cipher_suites.retain(|suite| {
            let name = format!("{:?}", suite.suite());
            config.ciphers.iter().any(|allowed| *allowed == name)
        });
        if provider.cipher_suites.is_empty() {
            return Err(TlsError::Config(
                "cipher list matches no supported suites".to_string(),
            ));
        }
    }

    let versions: &[&rustls::SupportedProtocolVersion] = match config.min_version.as_str() {
        "1.3" => &[&TLS13],
        _ => &[&TLS12, &TLS13],
    };

    let mut server_config = rustls::ServerConfig::builder_with_provider(Arc::new(provider))
        .with_protocol_versions(versions)
        .map_err(|e| TlsError::Config(e.to_string()))?
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| TlsError::Certificate(e.to_string()))?;

    server_config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];

    tracing::info!(
        cert = %config.cert,
        min_version = %config.min_version,
        "TLS termination enabled"
    );

    Ok(TlsAcceptor::from(Arc::new(server_config)))
}

fn load_certs(path: &str) -> Result<Vec<rustls::pki_types::CertificateDer<'static>>, TlsError> {
    let file = File::open(path).map_err(|e| TlsError::Io(path.to_string(), e))?;
    let certs: Vec<_> = rustls_pemfile::certs(&mut BufReader::new(file))
        .collect::<Result<_, _>>()
        .map_err(|e| TlsError::Certificate(e.to_string()))?;
    if certs.is_empty() {
        return Err(TlsError::Certificate(format!(
            "{}: no certificates found",
            path
        )));
    }
    Ok(certs)
}

fn load_key(path: &str) -> Result<rustls::pki_types::PrivateKeyDer<'static>, TlsError> {
    let file = File::open(path).map_err(|e| TlsError::Io(path.to_string(), e))?;
    rustls_pemfile::private_key(&mut BufReader::new(file))
        .map_err(|e| TlsError::Key(e.to_string()))?
        .ok_or_else(|| TlsError::Key(format!("{}: no private key found", path)))
}
