//! SNI-based certificate selection for TLS
//!
//! Plugs a [`CertificateSource`] into the rustls handshake: once the
//! ClientHello has been read, the requested hostname is resolved to a
//! certificate, issuing one on first use.

use std::sync::Arc;

use rustls::ServerConfig;
use rustls::server::{ClientHello, ResolvesServerCert};
use rustls::sign::CertifiedKey;

use crate::generator::CertificateSource;

/// ALPN protocols offered to clients
pub const ALPN_PROTOCOLS: &[&[u8]] = &[b"http/1.1"];

/// Certificate resolver that asks a [`CertificateSource`] for every handshake.
///
/// Returning no certificate aborts the handshake; there is no default
/// certificate, so clients that send no SNI are refused.
pub struct SniResolver {
    source: Arc<dyn CertificateSource>,
}

impl SniResolver {
    pub fn new(source: Arc<dyn CertificateSource>) -> Self {
        Self { source }
    }
}

impl std::fmt::Debug for SniResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SniResolver").finish()
    }
}

impl ResolvesServerCert for SniResolver {
    fn resolve(&self, client_hello: ClientHello<'_>) -> Option<Arc<CertifiedKey>> {
        let Some(hostname) = client_hello.server_name() else {
            tracing::warn!("No SNI hostname in TLS handshake, refusing connection");
            return None;
        };

        tracing::debug!(hostname = %hostname, "SNI certificate lookup");

        match self.source.resolve(hostname) {
            Ok(credential) => Some(credential.certified_key()),
            Err(e) => {
                tracing::error!(
                    hostname = %hostname,
                    "Failed to resolve certificate, aborting handshake: {}", e
                );
                None
            }
        }
    }
}

/// Build a rustls server config whose certificates come from `source`.
pub fn server_config(source: Arc<dyn CertificateSource>) -> Result<ServerConfig, rustls::Error> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let mut config = ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()?
        .with_no_client_auth()
        .with_cert_resolver(Arc::new(SniResolver::new(source)));
    config.alpn_protocols = ALPN_PROTOCOLS.iter().map(|p| p.to_vec()).collect();
    Ok(config)
}
