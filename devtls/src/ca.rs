//! Root CA loading
//!
//! Parses the CA certificate and its PKCS#8 private key from PEM blobs.
//! Reading the blobs from disk is left to the caller.

use rcgen::{Issuer, KeyPair};
use rustls::pki_types::CertificateDer;
use thiserror::Error;
use x509_parser::prelude::{FromDer, X509Certificate};

pub const CERTIFICATE_TAG: &str = "CERTIFICATE";
pub const PRIVATE_KEY_TAG: &str = "PRIVATE KEY";

/// Errors that make the CA unusable. Always fatal at startup.
#[derive(Debug, Error)]
pub enum CaError {
    #[error("Failed to decode PEM: {0}")]
    InvalidPem(String),

    #[error("Unexpected PEM block: expected {expected}, found {found}")]
    WrongBlockType {
        expected: &'static str,
        found: String,
    },

    #[error("Failed to parse {0}")]
    Parse(String),

    #[error("CA private key does not match the CA certificate")]
    KeyMismatch,
}

pub type Result<T> = std::result::Result<T, CaError>;

fn decode_block(pem_bytes: &[u8], expected: &'static str) -> Result<Vec<u8>> {
    let block = pem::parse(pem_bytes).map_err(|e| CaError::InvalidPem(e.to_string()))?;
    if block.tag() != expected {
        return Err(CaError::WrongBlockType {
            expected,
            found: block.tag().to_string(),
        });
    }
    Ok(block.into_contents())
}

/// Decode the first PEM block, which must be a `CERTIFICATE`, and check that
/// it holds a well-formed X.509 certificate.
pub fn load_cert(pem_bytes: &[u8]) -> Result<CertificateDer<'static>> {
    let der = decode_block(pem_bytes, CERTIFICATE_TAG)?;
    X509Certificate::from_der(&der)
        .map_err(|e| CaError::Parse(format!("CA certificate: {}", e)))?;
    Ok(CertificateDer::from(der))
}

/// Decode the first PEM block, which must be a PKCS#8 `PRIVATE KEY`.
pub fn load_key(pem_bytes: &[u8]) -> Result<KeyPair> {
    let der = decode_block(pem_bytes, PRIVATE_KEY_TAG)?;
    KeyPair::try_from(der.as_slice())
        .map_err(|e| CaError::Parse(format!("CA private key: {}", e)))
}

/// A loaded root CA, ready to sign leaf certificates.
pub struct RootCa {
    cert_der: CertificateDer<'static>,
    subject: String,
    issuer: Issuer<'static, KeyPair>,
}

impl RootCa {
    pub fn from_pem(cert_pem: &[u8], key_pem: &[u8]) -> Result<Self> {
        let cert_der = load_cert(cert_pem)?;
        let key = load_key(key_pem)?;

        let subject = {
            let (_, cert) = X509Certificate::from_der(&cert_der)
                .map_err(|e| CaError::Parse(format!("CA certificate: {}", e)))?;
            let cert_public_key = cert
                .tbs_certificate
                .subject_pki
                .subject_public_key
                .data
                .as_ref();
            if cert_public_key != key.public_key_raw() {
                return Err(CaError::KeyMismatch);
            }
            cert.subject().to_string()
        };

        // Signs with the CA's own subject and key identifier so leaves chain to it.
        let issuer = Issuer::from_ca_cert_der(&cert_der, key)
            .map_err(|e| CaError::Parse(format!("CA issuer metadata: {}", e)))?;

        Ok(Self {
            cert_der,
            subject,
            issuer,
        })
    }

    /// DER encoding of the CA certificate
    pub fn cert_der(&self) -> &CertificateDer<'static> {
        &self.cert_der
    }

    /// Subject of the CA certificate, RFC 4514 style
    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub(crate) fn issuer(&self) -> &Issuer<'static, KeyPair> {
        &self.issuer
    }
}

impl std::fmt::Debug for RootCa {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RootCa")
            .field("subject", &self.subject)
            .finish_non_exhaustive()
    }
}
