//! Leaf certificate issuance
//!
//! Every call mints a fresh key pair and serial number, builds a
//! server-auth leaf for a single hostname and signs it with the root CA.

use std::sync::Arc;

use rcgen::string::Ia5String;
use rcgen::{
    CertificateParams, DistinguishedName, DnType, ExtendedKeyUsagePurpose, IsCa, KeyPair,
    KeyUsagePurpose, SanType, SerialNumber,
};
use rustls::pki_types::{PrivateKeyDer, PrivatePkcs8KeyDer};
use rustls::sign::CertifiedKey;
use thiserror::Error;
use time::{Duration, OffsetDateTime};

use crate::ca::RootCa;
use crate::credential::IssuedCredential;

/// Subject organization stamped on every leaf
pub const ORGANIZATION: &str = "mkcert development certificate";
/// Leaf certificate validity period
pub const VALIDITY_YEARS: i32 = 10;

const SERIAL_BYTES: usize = 16;

/// Errors for a single issuance attempt. They never affect other hostnames.
#[derive(Debug, Clone, Error)]
pub enum IssuanceError {
    #[error("No server name requested")]
    MissingServerName,

    #[error("Invalid DNS name '{0}': {1}")]
    InvalidHostname(String, String),

    #[error("Failed to generate certificate key: {0}")]
    KeyGeneration(String),

    #[error("Failed to generate serial number: {0}")]
    SerialGeneration(String),

    #[error("Failed to sign certificate: {0}")]
    Signing(String),

    #[error("Failed to encode certificate key: {0}")]
    Encoding(String),
}

/// Something that can mint a credential for a hostname.
pub trait IssueCertificate: Send + Sync {
    fn issue(&self, hostname: &str) -> Result<IssuedCredential, IssuanceError>;
}

/// Issues leaf certificates signed by a loaded root CA.
#[derive(Debug)]
pub struct CertificateIssuer {
    ca: RootCa,
    organizational_unit: String,
}

impl CertificateIssuer {
    pub fn new(ca: RootCa) -> Self {
        Self {
            ca,
            organizational_unit: user_and_hostname(),
        }
    }

    pub fn ca(&self) -> &RootCa {
        &self.ca
    }

    fn leaf_params(
        &self,
        hostname: &str,
        serial: SerialNumber,
        not_before: OffsetDateTime,
    ) -> Result<CertificateParams, IssuanceError> {
        let dns_name = Ia5String::try_from(hostname).map_err(|e| {
            IssuanceError::InvalidHostname(hostname.to_string(), e.to_string())
        })?;

        let mut params = CertificateParams::default();

        let mut dn = DistinguishedName::new();
        dn.push(DnType::OrganizationName, ORGANIZATION);
        if !self.organizational_unit.is_empty() {
            dn.push(
                DnType::OrganizationalUnitName,
                self.organizational_unit.as_str(),
            );
        }
        params.distinguished_name = dn;
        params.serial_number = Some(serial);

        params.not_before = not_before;
        params.not_after = add_years(not_before, VALIDITY_YEARS);

        params.key_usages = vec![
            KeyUsagePurpose::DigitalSignature,
            KeyUsagePurpose::KeyEncipherment,
        ];
        params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];
        // Emits basicConstraints with cA=false rather than omitting the extension.
        params.is_ca = IsCa::ExplicitNoCa;
        params.use_authority_key_identifier_extension = true;
        params.subject_alt_names = vec![SanType::DnsName(dns_name)];

        Ok(params)
    }
}

impl IssueCertificate for CertificateIssuer {
    fn issue(&self, hostname: &str) -> Result<IssuedCredential, IssuanceError> {
        if hostname.is_empty() {
            return Err(IssuanceError::MissingServerName);
        }

        tracing::info!(hostname = %hostname, "Making certificate");

        let key_pair =
            KeyPair::generate().map_err(|e| IssuanceError::KeyGeneration(e.to_string()))?;
        let serial = random_serial()?;

        let issued_at = OffsetDateTime::now_utc();
        // X.509 times have whole-second precision.
        let not_before = issued_at - Duration::nanoseconds(i64::from(issued_at.nanosecond()));
        let params = self.leaf_params(hostname, serial, not_before)?;
        let expires_at = params.not_after;

        let cert = params
            .signed_by(&key_pair, self.ca.issuer())
            .map_err(|e| IssuanceError::Signing(e.to_string()))?;
        let cert_der = cert.der().clone();

        let key_der = PrivatePkcs8KeyDer::from(key_pair.serialize_der());
        let signing_key =
            rustls::crypto::ring::sign::any_supported_type(&PrivateKeyDer::Pkcs8(key_der.clone_key()))
                .map_err(|e| IssuanceError::Encoding(e.to_string()))?;
        let certified_key = CertifiedKey::new(vec![cert_der.clone()], signing_key);
        certified_key
            .keys_match()
            .map_err(|e| IssuanceError::Encoding(e.to_string()))?;

        tracing::debug!(
            hostname = %hostname,
            expires_at = %expires_at,
            "Issued certificate"
        );

        Ok(IssuedCredential::new(
            hostname.to_string(),
            cert_der,
            key_der,
            Arc::new(certified_key),
            issued_at,
            expires_at,
        ))
    }
}

fn random_serial() -> Result<SerialNumber, IssuanceError> {
    let mut bytes = [0u8; SERIAL_BYTES];
    getrandom::fill(&mut bytes).map_err(|e| IssuanceError::SerialGeneration(e.to_string()))?;
    Ok(SerialNumber::from_slice(&bytes))
}

/// Calendar-year addition. 29 February rolls over to 1 March in non-leap years.
fn add_years(at: OffsetDateTime, years: i32) -> OffsetDateTime {
    let year = at.year() + years;
    match at.replace_year(year) {
        Ok(shifted) => shifted,
        Err(_) => (at - Duration::days(1))
            .replace_year(year)
            .map(|shifted| shifted + Duration::days(1))
            .unwrap_or(at + Duration::days(365 * i64::from(years))),
    }
}

/// `user@host` of the running process, used as the subject OU.
fn user_and_hostname() -> String {
    let host = hostname::get()
        .map(|h| h.to_string_lossy().trim().to_string())
        .unwrap_or_default();
    let user = std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_default();

    if user.is_empty() {
        host
    } else {
        format!("{}@{}", user, host)
    }
}
