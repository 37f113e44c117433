//! Locality router and known-responder tracker (§4.6).
//!
//! Locality is a four-level, dot-separated, most-general-first tuple
//! (`<region>.<sub-region>.<datacenter>.<availability-zone>`). The router
//! tries the most specific subject variant first, falling back one level
//! at a time, and caches the variant that last produced a responder.

mod known_responders;
mod subject_variants;

pub use known_responders::KnownResponderTracker;
pub use subject_variants::{candidate_subjects, normalize_locality};

use async_trait::async_trait;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// Populates locality automatically at startup from a cloud provider's
/// instance-metadata endpoint (§4.6: "Cloud detection (AWS/GCP metadata
/// endpoints) can populate locality automatically at startup"). The actual
/// HTTP probe against `169.254.169.254` is environment-specific and an
/// external collaborator, same as [`crate::transport::Transport`]; this
/// crate owns only the seam a service plugs its provider's probe into.
///
/// Only consulted when [`crate::ConnectorOptions::locality`] and
/// `MICROBUS_LOCALITY` are both unset.
#[async_trait]
pub trait CloudLocalityDetector: Send + Sync {
    /// Returns a raw `region.sub-region.datacenter.az`-shaped string (or as
    /// many of those four levels as the provider exposes), or `None` if no
    /// metadata endpoint answered within the detector's own timeout.
    async fn detect(&self) -> Option<String>;
}

/// Runs `detector` and normalizes whatever it returns, or `None` if
/// detection found nothing. Intended to be called once by the embedding
/// service before building [`crate::ConnectorOptions`], e.g.:
///
/// ```ignore
/// let locality = locality::detect_locality(&my_aws_metadata_probe).await;
/// let options = ConnectorOptions { locality, ..ConnectorOptions::new(host, transport) };
/// ```
pub async fn detect_locality(detector: &dyn CloudLocalityDetector) -> Option<String> {
    detector.detect().await.map(|raw| normalize_locality(&raw))
}

/// Small TTL added on top of the cardinality check per §9's open question:
/// the known-responder cache's invalidation rule is heuristic, so entries
/// also expire after a short wall-clock window even if nothing failed.
pub const LOCALITY_CACHE_TTL: Duration = Duration::from_secs(30);

struct CachedLocality {
    subject: String,
    cached_at: Instant,
}

/// Remembers, per destination URL (`method+host+port+path`), which subject
/// variant last produced at least one ack, so repeated calls to the same
/// destination skip straight to it instead of re-running the full
/// most-specific-to-bare fallback.
#[derive(Default)]
pub struct LocalityRouter {
    cache: Mutex<HashMap<String, CachedLocality>>,
}

impl LocalityRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn cached_subject(&self, destination: &str) -> Option<String> {
        let mut cache = self.cache.lock().await;
        if let Some(entry) = cache.get(destination) {
            if entry.cached_at.elapsed() <= LOCALITY_CACHE_TTL {
                return Some(entry.subject.clone());
            }
            cache.remove(destination);
        }
        None
    }

    pub async fn remember(&self, destination: &str, subject: String) {
        let mut cache = self.cache.lock().await;
        cache.insert(
            destination.to_string(),
            CachedLocality {
                subject,
                cached_at: Instant::now(),
            },
        );
    }

    pub async fn invalidate(&self, destination: &str) {
        self.cache.lock().await.remove(destination);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn remembers_and_invalidates() {
        let router = LocalityRouter::new();
        assert!(router.cached_subject("GET:beta:0/x").await.is_none());
        router.remember("GET:beta:0/x", "subject-a".to_string()).await;
        assert_eq!(
            router.cached_subject("GET:beta:0/x").await,
            Some("subject-a".to_string())
        );
        router.invalidate("GET:beta:0/x").await;
        assert!(router.cached_subject("GET:beta:0/x").await.is_none());
    }

    struct FakeMetadataProbe(Option<&'static str>);

    #[async_trait]
    impl CloudLocalityDetector for FakeMetadataProbe {
        async fn detect(&self) -> Option<String> {
            self.0.map(str::to_string)
        }
    }

    #[tokio::test]
    async fn detect_locality_normalizes_the_probe_result() {
        let probe = FakeMetadataProbe(Some("US.West.DC2.AZ1"));
        assert_eq!(detect_locality(&probe).await, Some("us.west.dc2.az1".to_string()));
    }

    #[tokio::test]
    async fn detect_locality_is_none_when_probe_finds_nothing() {
        let probe = FakeMetadataProbe(None);
        assert_eq!(detect_locality(&probe).await, None);
    }
}
