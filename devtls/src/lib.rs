//! On-demand TLS certificates for local development
//!
//! Handles:
//! - Loading a root CA certificate and key from PEM
//! - Issuing a leaf certificate for each SNI hostname during the handshake
//! - Caching issued certificates for the lifetime of the process
//! - Terminating TLS in front of any connection listener

pub mod ca;
pub mod cache;
pub mod credential;
pub mod generator;
pub mod issuer;
pub mod listener;
pub mod sni;

#[cfg(test)]
pub(crate) mod testing;

pub use ca::{CaError, RootCa, load_cert, load_key};
pub use cache::CertificateCache;
pub use credential::IssuedCredential;
pub use generator::{CertificateGenerator, CertificateSource};
pub use issuer::{CertificateIssuer, IssuanceError, IssueCertificate};
pub use listener::{Listener, TcpAcceptor, TlsListener, TlsListenerConfig};
pub use sni::{SniResolver, server_config};
