//! In-memory certificate cache
//!
//! Maps the exact SNI hostname to the credential issued for it. Entries are
//! never evicted, refreshed or replaced; they live until the process exits.

use std::sync::Arc;

use dashmap::DashMap;

use crate::credential::IssuedCredential;

#[derive(Debug, Default)]
pub struct CertificateCache {
    entries: DashMap<String, Arc<IssuedCredential>>,
}

impl CertificateCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the credential for a hostname. Case-sensitive, no normalization.
    pub fn get(&self, hostname: &str) -> Option<Arc<IssuedCredential>> {
        self.entries
            .get(hostname)
            .map(|entry| Arc::clone(entry.value()))
    }

    /// Publish a credential under its hostname.
    ///
    /// If the hostname already has an entry, that entry is kept and returned
    /// and `credential` is dropped.
    pub fn publish(&self, credential: IssuedCredential) -> Arc<IssuedCredential> {
        let entry = self
            .entries
            .entry(credential.hostname().to_string())
            .or_insert_with(|| Arc::new(credential));
        Arc::clone(entry.value())
    }

    pub fn contains(&self, hostname: &str) -> bool {
        self.entries.contains_key(hostname)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// List all cached hostnames
    pub fn hostnames(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.key().clone()).collect()
    }
}
