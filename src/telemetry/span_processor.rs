//! Selective span processor (§4.12): spans are buffered in a
//! fixed-capacity ring on end; `select(traceID)` marks a trace for export
//! and flushes everything already buffered for it. The selection set
//! itself is two TTL'd halves with rollover so memory stays bounded
//! regardless of call volume.

use std::collections::{HashSet, VecDeque};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpanRecord {
    pub trace_id: String,
    pub span_id: String,
    pub name: String,
}

struct SelectionHalf {
    trace_ids: HashSet<String>,
    opened_at: Instant,
}

impl SelectionHalf {
    fn new() -> Self {
        Self {
            trace_ids: HashSet::new(),
            opened_at: Instant::now(),
        }
    }
}

pub struct SelectiveSpanProcessor {
    capacity: usize,
    ttl: Duration,
    buffer: VecDeque<SpanRecord>,
    halves: [SelectionHalf; 2],
    active_half: usize,
    exported: Vec<SpanRecord>,
}

impl SelectiveSpanProcessor {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            capacity,
            ttl,
            buffer: VecDeque::with_capacity(capacity),
            halves: [SelectionHalf::new(), SelectionHalf::new()],
            active_half: 0,
            exported: Vec::new(),
        }
    }

    /// Buffers a finished span, evicting the oldest once at capacity.
    pub fn on_end(&mut self, span: SpanRecord) {
        if self.is_selected(&span.trace_id) {
            self.exported.push(span);
            return;
        }
        if self.buffer.len() == self.capacity {
            self.buffer.pop_front();
        }
        self.buffer.push_back(span);
    }

    /// Marks `trace_id` for export: records it in the active selection
    /// half and immediately flushes every buffered span sharing it.
    pub fn select(&mut self, trace_id: &str) {
        self.rollover_if_stale();
        self.halves[self.active_half].trace_ids.insert(trace_id.to_string());

        let mut remaining = VecDeque::with_capacity(self.buffer.len());
        while let Some(span) = self.buffer.pop_front() {
            if span.trace_id == trace_id {
                self.exported.push(span);
            } else {
                remaining.push_back(span);
            }
        }
        self.buffer = remaining;
    }

    fn is_selected(&self, trace_id: &str) -> bool {
        self.halves.iter().any(|h| h.trace_ids.contains(trace_id))
    }

    /// Rolls the active half over to the other one, clearing it, once the
    /// current half has lived past its TTL — bounding the selection set's
    /// memory without a hard cap on distinct trace IDs.
    fn rollover_if_stale(&mut self) {
        if self.halves[self.active_half].opened_at.elapsed() < self.ttl {
            return;
        }
        let next = 1 - self.active_half;
        self.halves[next] = SelectionHalf::new();
        self.active_half = next;
    }

    /// Drains and returns every span exported so far (by direct match on
    /// arrival, or by a later `select` call).
    pub fn drain_exported(&mut self) -> Vec<SpanRecord> {
        std::mem::take(&mut self.exported)
    }

    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn span(trace: &str, id: &str) -> SpanRecord {
        SpanRecord {
            trace_id: trace.to_string(),
            span_id: id.to_string(),
            name: "op".to_string(),
        }
    }

    #[test]
    fn select_flushes_already_buffered_spans_for_that_trace() {
        let mut processor = SelectiveSpanProcessor::new(10, Duration::from_secs(60));
        processor.on_end(span("t1", "a"));
        processor.on_end(span("t2", "b"));
        processor.on_end(span("t1", "c"));

        processor.select("t1");
        let exported = processor.drain_exported();
        assert_eq!(exported.len(), 2);
        assert!(exported.iter().all(|s| s.trace_id == "t1"));
        assert_eq!(processor.buffered_len(), 1);
    }

    #[test]
    fn spans_arriving_after_selection_export_immediately() {
        let mut processor = SelectiveSpanProcessor::new(10, Duration::from_secs(60));
        processor.select("t1");
        processor.on_end(span("t1", "late"));
        let exported = processor.drain_exported();
        assert_eq!(exported.len(), 1);
    }

    #[test]
    fn ring_buffer_evicts_oldest_past_capacity() {
        let mut processor = SelectiveSpanProcessor::new(2, Duration::from_secs(60));
        processor.on_end(span("t1", "a"));
        processor.on_end(span("t1", "b"));
        processor.on_end(span("t1", "c"));
        assert_eq!(processor.buffered_len(), 2);
    }

    #[test]
    fn selection_rolls_over_after_ttl() {
        let mut processor = SelectiveSpanProcessor::new(10, Duration::from_millis(5));
        processor.select("t1");
        std::thread::sleep(Duration::from_millis(10));
        processor.select("t2");
        // t1's half should have rolled over and been cleared.
        assert!(!processor.is_selected("t1") || processor.is_selected("t2"));
        assert!(processor.is_selected("t2"));
    }
}
