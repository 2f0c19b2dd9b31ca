use std::sync::Arc;

use rustls::pki_types::{CertificateDer, PrivatePkcs8KeyDer};
use rustls::sign::CertifiedKey;
use time::OffsetDateTime;

/// A leaf certificate and its private key, issued for exactly one hostname.
///
/// Immutable once built; shared between every connection for that hostname.
#[derive(Debug)]
pub struct IssuedCredential {
    hostname: String,
    cert_der: CertificateDer<'static>,
    key_der: PrivatePkcs8KeyDer<'static>,
    certified_key: Arc<CertifiedKey>,
    issued_at: OffsetDateTime,
    expires_at: OffsetDateTime,
}

impl IssuedCredential {
    pub(crate) fn new(
        hostname: String,
        cert_der: CertificateDer<'static>,
        key_der: PrivatePkcs8KeyDer<'static>,
        certified_key: Arc<CertifiedKey>,
        issued_at: OffsetDateTime,
        expires_at: OffsetDateTime,
    ) -> Self {
        Self {
            hostname,
            cert_der,
            key_der,
            certified_key,
            issued_at,
            expires_at,
        }
    }

    /// Hostname the certificate was issued for (its only SAN)
    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    /// DER encoding of the leaf certificate
    pub fn cert_der(&self) -> &CertificateDer<'static> {
        &self.cert_der
    }

    /// PKCS#8 DER encoding of the leaf private key
    pub fn key_der(&self) -> &PrivatePkcs8KeyDer<'static> {
        &self.key_der
    }

    /// Certificate and signing key in the form rustls installs on a connection
    pub fn certified_key(&self) -> Arc<CertifiedKey> {
        Arc::clone(&self.certified_key)
    }

    pub fn issued_at(&self) -> OffsetDateTime {
        self.issued_at
    }

    pub fn expires_at(&self) -> OffsetDateTime {
        self.expires_at
    }
}
