//! Reassembles fragments keyed by `fromID|messageID`, in any arrival
//! order, and times out stalled reassemblies (§4.3).

use crate::frame::Frame;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefragmenterError {
    /// The reassembly for this key already timed out; a new one must
    /// start from a fresh fragment 1.
    TimedOut,
}

struct Entry {
    max: u32,
    first: Option<Frame>,
    parts: HashMap<u32, Vec<u8>>,
    last_activity: Instant,
}

impl Entry {
    fn is_complete(&self) -> bool {
        self.first.is_some() && self.parts.len() as u32 == self.max
    }
}

/// Per-connector reassembly map. One instance covers either all inbound
/// requests or all inbound responses (§3 "defragmenter maps for requests
/// and responses").
#[derive(Default)]
pub struct Defragmenter {
    entries: Mutex<HashMap<String, Entry>>,
    /// Keys evicted by [`Self::sweep`], kept around just long enough to
    /// reject a late straggler fragment with [`DefragmenterError::TimedOut`]
    /// instead of silently starting a new, incomplete reassembly under the
    /// same key (§4.3: "subsequent fragments for that key return a timeout
    /// error; the slot is then removed so a new reassembly may begin").
    tombstones: Mutex<HashMap<String, Instant>>,
}

impl Defragmenter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `fragment` under `key`. Returns `Ok(true)` only once all `N`
    /// fragments have arrived and fragment 1 is present.
    pub async fn add(&self, key: &str, fragment: Frame) -> Result<bool, DefragmenterError> {
        {
            let mut tombstones = self.tombstones.lock().await;
            if let Some(evicted_at) = tombstones.get(key) {
                if evicted_at.elapsed() <= TOMBSTONE_GRACE {
                    return Err(DefragmenterError::TimedOut);
                }
                tombstones.remove(key);
            }
        }

        let index = fragment.fragment_index().unwrap_or(1);
        let max = fragment.fragment_max().unwrap_or(1);

        let mut entries = self.entries.lock().await;
        let entry = entries.entry(key.to_string()).or_insert_with(|| Entry {
            max,
            first: None,
            parts: HashMap::new(),
            last_activity: Instant::now(),
        });

        entry.last_activity = Instant::now();
        entry.max = max;
        if index == 1 {
            entry.first = Some(fragment.clone());
        }
        entry.parts.insert(index, fragment.body);

        Ok(entry.is_complete())
    }

    /// Reconstructs the integrated frame for `key`, concatenating fragment
    /// bodies in index order regardless of arrival order, and removes the
    /// entry. Returns `None` if the key is unknown or incomplete.
    pub async fn integrated(&self, key: &str) -> Option<Frame> {
        let mut entries = self.entries.lock().await;
        let entry = entries.get(key)?;
        if !entry.is_complete() {
            return None;
        }
        let entry = entries.remove(key)?;
        let mut first = entry.first?;
        let mut body = Vec::new();
        for i in 1..=entry.max {
            body.extend(entry.parts.get(&i).cloned().unwrap_or_default());
        }
        first.body = body;
        Some(first)
    }

    pub async fn last_activity(&self, key: &str) -> Option<Duration> {
        let entries = self.entries.lock().await;
        entries.get(key).map(|e| e.last_activity.elapsed())
    }

    /// Sweeps for entries idle longer than `timeout`, removing them and
    /// returning their keys so the caller can fail any correlator waiting
    /// on them with [`DefragmenterError::TimedOut`].
    pub async fn sweep(&self, timeout: Duration) -> Vec<String> {
        let mut entries = self.entries.lock().await;
        let stale: Vec<String> = entries
            .iter()
            .filter(|(_, e)| e.last_activity.elapsed() > timeout)
            .map(|(k, _)| k.clone())
            .collect();
        let mut tombstones = self.tombstones.lock().await;
        for key in &stale {
            entries.remove(key);
            tombstones.insert(key.clone(), Instant::now());
        }
        tombstones.retain(|_, evicted_at| evicted_at.elapsed() <= TOMBSTONE_GRACE);
        stale
    }
}

/// How long a swept key keeps rejecting stragglers before the slot is
/// fully forgotten and free to start a fresh reassembly.
const TOMBSTONE_GRACE: Duration = Duration::from_secs(5);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::headers;

    fn fragment(index: u32, max: u32, body: &[u8]) -> Frame {
        let mut f = Frame::new_request("POST", "/big");
        f.set_header(headers::FRAGMENT_INDEX, index.to_string());
        f.set_header(headers::FRAGMENT_MAX, max.to_string());
        f.body = body.to_vec();
        f
    }

    #[tokio::test]
    async fn reassembles_in_order_regardless_of_arrival_order() {
        let defrag = Defragmenter::new();
        assert_eq!(defrag.add("k", fragment(2, 3, b"BB")).await, Ok(false));
        assert_eq!(defrag.add("k", fragment(3, 3, b"CC")).await, Ok(false));
        assert_eq!(defrag.add("k", fragment(1, 3, b"AA")).await, Ok(true));

        let integrated = defrag.integrated("k").await.unwrap();
        assert_eq!(integrated.body, b"AABBCC");
    }

    #[tokio::test]
    async fn integrated_is_emitted_exactly_once() {
        let defrag = Defragmenter::new();
        defrag.add("k", fragment(1, 1, b"A")).await.unwrap();
        assert!(defrag.integrated("k").await.is_some());
        assert!(defrag.integrated("k").await.is_none());
    }

    #[tokio::test]
    async fn sweep_evicts_idle_entries() {
        let defrag = Defragmenter::new();
        defrag.add("k", fragment(1, 2, b"A")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        let timed_out = defrag.sweep(Duration::from_millis(5)).await;
        assert_eq!(timed_out, vec!["k".to_string()]);
        assert!(defrag.last_activity("k").await.is_none());
    }

    #[tokio::test]
    async fn straggler_after_sweep_is_rejected_as_timed_out() {
        let defrag = Defragmenter::new();
        defrag.add("k", fragment(1, 2, b"A")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        defrag.sweep(Duration::from_millis(5)).await;

        assert_eq!(defrag.add("k", fragment(2, 2, b"B")).await, Err(DefragmenterError::TimedOut));
    }

    #[tokio::test]
    async fn first_fragment_arriving_late_is_buffered_not_fatal() {
        let defrag = Defragmenter::new();
        assert_eq!(defrag.add("k", fragment(2, 2, b"B")).await, Ok(false));
        assert!(defrag.integrated("k").await.is_none());
        assert_eq!(defrag.add("k", fragment(1, 2, b"A")).await, Ok(true));
        assert_eq!(defrag.integrated("k").await.unwrap().body, b"AB");
    }

    /// Reassembly must not depend on arrival order at all; shuffle it a
    /// few different ways rather than trusting a single fixed permutation.
    #[tokio::test]
    async fn reassembles_regardless_of_shuffled_arrival_order() {
        use rand::seq::SliceRandom;

        let parts: Vec<(u32, u32, &[u8])> = vec![(1, 5, b"A"), (2, 5, b"B"), (3, 5, b"C"), (4, 5, b"D"), (5, 5, b"E")];

        let mut rng = rand::thread_rng();
        for _ in 0..4 {
            let mut shuffled = parts.clone();
            shuffled.shuffle(&mut rng);

            let defrag = Defragmenter::new();
            for (index, max, body) in &shuffled {
                defrag.add("k", fragment(*index, *max, body)).await.unwrap();
            }
            let integrated = defrag.integrated("k").await.unwrap();
            assert_eq!(integrated.body, b"ABCDE");
        }
    }
}
