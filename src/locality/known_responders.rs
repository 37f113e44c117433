//! Known-responder tracker (§4.6): remembers, per destination URL, the set
//! of distinct `From-ID`s that acked the last request, to size the next
//! publish's response channel and shorten its multicast wait.

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

use super::LOCALITY_CACHE_TTL;

struct Entry {
    responders: HashSet<String>,
    recorded_at: Instant,
}

#[derive(Default)]
pub struct KnownResponderTracker {
    entries: Mutex<HashMap<String, Entry>>,
}

impl KnownResponderTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Best current estimate of how many responders to expect for
    /// `destination`, or `None` if nothing has been observed (or the
    /// estimate has gone stale).
    pub async fn expected_count(&self, destination: &str) -> Option<usize> {
        let entries = self.entries.lock().await;
        entries.get(destination).and_then(|e| {
            if e.recorded_at.elapsed() <= LOCALITY_CACHE_TTL {
                Some(e.responders.len())
            } else {
                None
            }
        })
    }

    /// Records the responders observed for the most recent publish to
    /// `destination`. A responder count lower than the prior estimate, or
    /// a newly-seen responder, both imply a changed topology; callers
    /// should treat this as an implicit invalidation by simply recording
    /// the fresh set (§4.6 "Invalidated when ... fewer responses than
    /// expected, or when a new responder first appears").
    pub async fn record(&self, destination: &str, observed: HashSet<String>) {
        let mut entries = self.entries.lock().await;
        entries.insert(
            destination.to_string(),
            Entry {
                responders: observed,
                recorded_at: Instant::now(),
            },
        );
    }

    pub async fn invalidate(&self, destination: &str) {
        self.entries.lock().await.remove(destination);
    }

    /// Sweeps entries idle longer than `ttl`, in addition to the
    /// per-read staleness check in [`Self::expected_count`] (belt and
    /// braces against unbounded growth of the map).
    pub async fn sweep(&self, ttl: Duration) {
        let mut entries = self.entries.lock().await;
        entries.retain(|_, e| e.recorded_at.elapsed() <= ttl);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn records_and_returns_expected_count() {
        let tracker = KnownResponderTracker::new();
        assert_eq!(tracker.expected_count("GET:beta:0/cast").await, None);

        let mut responders = HashSet::new();
        responders.insert("inst-a".to_string());
        responders.insert("inst-b".to_string());
        tracker.record("GET:beta:0/cast", responders).await;

        assert_eq!(tracker.expected_count("GET:beta:0/cast").await, Some(2));
    }

    #[tokio::test]
    async fn invalidate_clears_the_estimate() {
        let tracker = KnownResponderTracker::new();
        tracker.record("k", HashSet::from(["a".to_string()])).await;
        tracker.invalidate("k").await;
        assert_eq!(tracker.expected_count("k").await, None);
    }
}
