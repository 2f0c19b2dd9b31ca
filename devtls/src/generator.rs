//! Certificate generator
//!
//! Ties the cache and the issuer together behind [`CertificateSource`].
//! Issuance for a hostname is serialized by a per-hostname attempt slot so
//! that concurrent first requests produce a single certificate, while
//! unrelated hostnames issue in parallel. Requests that queued behind an
//! attempt receive its outcome, failure included.

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;

use crate::cache::CertificateCache;
use crate::credential::IssuedCredential;
use crate::issuer::{CertificateIssuer, IssuanceError, IssueCertificate};

/// Supplies the credential to present for a requested hostname.
pub trait CertificateSource: Send + Sync {
    fn resolve(&self, hostname: &str) -> Result<Arc<IssuedCredential>, IssuanceError>;
}

type Outcome = Result<Arc<IssuedCredential>, IssuanceError>;

/// One issuance attempt. Empty until the attempt finishes.
type Attempt = Arc<Mutex<Option<Outcome>>>;

pub struct CertificateGenerator<I = CertificateIssuer> {
    issuer: I,
    cache: Arc<CertificateCache>,
    /// Attempts in flight, keyed by hostname
    pending: DashMap<String, Attempt>,
}

impl<I: IssueCertificate> CertificateGenerator<I> {
    pub fn new(issuer: I) -> Self {
        Self::with_cache(issuer, Arc::new(CertificateCache::new()))
    }

    pub fn with_cache(issuer: I, cache: Arc<CertificateCache>) -> Self {
        Self {
            issuer,
            cache,
            pending: DashMap::new(),
        }
    }

    pub fn cache(&self) -> &Arc<CertificateCache> {
        &self.cache
    }

    pub fn issuer(&self) -> &I {
        &self.issuer
    }

    fn attempt(&self, hostname: &str) -> Attempt {
        let entry = self.pending.entry(hostname.to_string()).or_default();
        Arc::clone(entry.value())
    }
}

impl<I: IssueCertificate> CertificateSource for CertificateGenerator<I> {
    fn resolve(&self, hostname: &str) -> Result<Arc<IssuedCredential>, IssuanceError> {
        if hostname.is_empty() {
            return Err(IssuanceError::MissingServerName);
        }

        if let Some(credential) = self.cache.get(hostname) {
            tracing::debug!(hostname = %hostname, "Certificate cache hit");
            return Ok(credential);
        }

        let attempt = self.attempt(hostname);
        let mut outcome = attempt.lock();

        // Queued behind an attempt that has finished: share its result.
        if let Some(finished) = outcome.as_ref() {
            tracing::debug!(
                hostname = %hostname,
                "Certificate attempt finished by concurrent request"
            );
            return finished.clone();
        }

        // The previous attempt may have published and retired its slot before we created ours.
        if let Some(credential) = self.cache.get(hostname) {
            tracing::debug!(hostname = %hostname, "Certificate issued by concurrent request");
            *outcome = Some(Ok(Arc::clone(&credential)));
            self.pending
                .remove_if(hostname, |_, slot| Arc::ptr_eq(slot, &attempt));
            return Ok(credential);
        }

        let result = match self.issuer.issue(hostname) {
            Ok(credential) => Ok(self.cache.publish(credential)),
            Err(e) => {
                tracing::warn!(hostname = %hostname, "Certificate issuance failed: {}", e);
                Err(e)
            }
        };

        *outcome = Some(result.clone());
        // Later requests start a fresh attempt, or hit the cache on success.
        self.pending
            .remove_if(hostname, |_, slot| Arc::ptr_eq(slot, &attempt));

        result
    }
}

impl<I> std::fmt::Debug for CertificateGenerator<I> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CertificateGenerator")
            .field("cached", &self.cache.len())
            .field("pending", &self.pending.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::generate_ca;
    use std::sync::Barrier;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Counts calls and optionally fails or stalls them
    struct CountingIssuer {
        inner: CertificateIssuer,
        calls: AtomicUsize,
        failures_left: AtomicUsize,
        delay: Duration,
    }

    impl CountingIssuer {
        fn new() -> Self {
            Self {
                inner: CertificateIssuer::new(generate_ca().root()),
                calls: AtomicUsize::new(0),
                failures_left: AtomicUsize::new(0),
                delay: Duration::ZERO,
            }
        }

        fn slow(delay: Duration) -> Self {
            Self {
                delay,
                ..Self::new()
            }
        }

        fn failing(times: usize) -> Self {
            let issuer = Self::new();
            issuer.failures_left.store(times, Ordering::SeqCst);
            issuer
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl IssueCertificate for CountingIssuer {
        fn issue(&self, hostname: &str) -> Result<IssuedCredential, IssuanceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(self.delay);
            if self
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(IssuanceError::Signing("injected failure".to_string()));
            }
            self.inner.issue(hostname)
        }
    }

    #[test]
    fn sequential_requests_issue_once() {
        let generator = CertificateGenerator::new(CountingIssuer::new());

        let first = generator.resolve("a.test").unwrap();
        let second = generator.resolve("a.test").unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.cert_der(), second.cert_der());
        assert_eq!(generator.issuer().calls(), 1);
    }

    #[test]
    fn a_a_b_sequence_issues_twice() {
        let generator = CertificateGenerator::new(CountingIssuer::new());

        let a1 = generator.resolve("a.test").unwrap();
        let a2 = generator.resolve("a.test").unwrap();
        let b = generator.resolve("b.test").unwrap();

        assert!(Arc::ptr_eq(&a1, &a2));
        assert_eq!(b.hostname(), "b.test");
        assert_eq!(generator.cache().len(), 2);
        assert_eq!(generator.issuer().calls(), 2);
    }

    #[test]
    fn concurrent_first_requests_issue_once() {
        const CALLERS: usize = 16;
        let generator = CertificateGenerator::new(CountingIssuer::slow(Duration::from_millis(50)));
        let barrier = Barrier::new(CALLERS);

        let results: Vec<Arc<IssuedCredential>> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..CALLERS)
                .map(|_| {
                    s.spawn(|| {
                        barrier.wait();
                        generator.resolve("burst.test").unwrap()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(generator.issuer().calls(), 1);
        assert!(results.iter().all(|c| Arc::ptr_eq(c, &results[0])));
        assert_eq!(generator.cache().len(), 1);
    }

    #[test]
    fn different_hostnames_issue_concurrently() {
        let generator = CertificateGenerator::new(CountingIssuer::slow(Duration::from_millis(200)));
        let barrier = Barrier::new(2);

        let started = std::time::Instant::now();
        let (a, b) = std::thread::scope(|s| {
            let a = s.spawn(|| {
                barrier.wait();
                generator.resolve("a.test").unwrap()
            });
            let b = s.spawn(|| {
                barrier.wait();
                generator.resolve("b.test").unwrap()
            });
            (a.join().unwrap(), b.join().unwrap())
        });
        let elapsed = started.elapsed();

        assert_eq!(a.hostname(), "a.test");
        assert_eq!(b.hostname(), "b.test");
        assert_eq!(generator.issuer().calls(), 2);
        // Serialized issuance would need at least 400ms.
        assert!(elapsed < Duration::from_millis(390), "took {elapsed:?}");
    }

    #[test]
    fn failed_issuance_is_not_cached_and_retries() {
        let generator = CertificateGenerator::new(CountingIssuer::failing(1));

        let err = generator.resolve("flaky.test").unwrap_err();
        assert!(matches!(err, IssuanceError::Signing(_)));
        assert!(generator.cache().is_empty());

        let credential = generator.resolve("flaky.test").unwrap();
        assert_eq!(credential.hostname(), "flaky.test");
        assert_eq!(generator.issuer().calls(), 2);
        assert_eq!(generator.cache().len(), 1);
    }

    #[test]
    fn waiters_share_a_failed_attempt() {
        const CALLERS: usize = 8;
        let issuer = CountingIssuer::slow(Duration::from_millis(200));
        issuer.failures_left.store(1, Ordering::SeqCst);
        let generator = CertificateGenerator::new(issuer);
        let barrier = Barrier::new(CALLERS);

        let results: Vec<_> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..CALLERS)
                .map(|_| {
                    s.spawn(|| {
                        barrier.wait();
                        generator.resolve("flaky.test")
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(generator.issuer().calls(), 1);
        assert!(
            results
                .iter()
                .all(|r| matches!(r, Err(IssuanceError::Signing(_))))
        );
        assert!(generator.cache().is_empty());
        assert!(generator.pending.is_empty());

        // A new request after the failure starts a fresh attempt.
        generator.resolve("flaky.test").unwrap();
        assert_eq!(generator.issuer().calls(), 2);
    }

    #[test]
    fn finished_attempts_leave_no_pending_entry() {
        let generator = CertificateGenerator::new(CountingIssuer::failing(1));

        assert!(generator.resolve("gone.test").is_err());
        assert!(generator.pending.is_empty());

        generator.resolve("gone.test").unwrap();
        assert!(generator.pending.is_empty());
    }

    #[test]
    fn failure_for_one_hostname_does_not_affect_another() {
        let generator = CertificateGenerator::new(CountingIssuer::failing(1));

        assert!(generator.resolve("broken.test").is_err());
        assert!(generator.resolve("fine.test").is_ok());
        assert!(!generator.cache().contains("broken.test"));
    }

    #[test]
    fn empty_hostname_fails_without_issuing() {
        let generator = CertificateGenerator::new(CountingIssuer::new());

        assert!(matches!(
            generator.resolve(""),
            Err(IssuanceError::MissingServerName)
        ));
        assert_eq!(generator.issuer().calls(), 0);
        assert!(generator.cache().is_empty());
    }

    #[test]
    fn injected_cache_is_shared() {
        let cache = Arc::new(CertificateCache::new());
        let generator = CertificateGenerator::with_cache(CountingIssuer::new(), Arc::clone(&cache));

        generator.resolve("shared.test").unwrap();
        assert!(cache.contains("shared.test"));
    }

    #[test]
    fn works_through_dyn_source() {
        let source: Arc<dyn CertificateSource> =
            Arc::new(CertificateGenerator::new(CountingIssuer::new()));
        let credential = source.resolve("dyn.test").unwrap();
        assert_eq!(credential.hostname(), "dyn.test");
    }
}
