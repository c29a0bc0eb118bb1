// =============================================================================
// Alert History — event-id dedup and per-symbol alert timestamps
// =============================================================================
//
// Two jobs:
//   - remember which event ids have been handed to the outbox (so the same
//     evaluation result is never emitted twice) and which have been delivered
//     at least once (so retries and duplicate submissions append exactly one
//     history entry);
//   - keep per-symbol timestamps of delivered alerts for the buildup counts
//     and the activity regime, evicted by the alert-window cutoff.

use std::collections::{HashMap, HashSet, VecDeque};

use parking_lot::Mutex;

#[derive(Debug, Default)]
struct Inner {
    emitted: HashSet<String>,
    emitted_log: VecDeque<(f64, String)>,
    delivered: HashSet<String>,
    delivered_log: VecDeque<(f64, String)>,
    per_symbol: HashMap<String, VecDeque<f64>>,
}

/// Shared alert bookkeeping. Interior-locked; safe to share via `Arc`.
#[derive(Debug, Default)]
pub struct AlertHistory {
    inner: Mutex<Inner>,
}

impl AlertHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim an event id for emission. Returns `false` if the id was already
    /// emitted (the caller must then stay silent).
    pub fn try_mark_emitted(&self, event_id: &str, ts: f64) -> bool {
        let mut inner = self.inner.lock();
        if !inner.emitted.insert(event_id.to_string()) {
            return false;
        }
        inner.emitted_log.push_back((ts, event_id.to_string()));
        true
    }

    /// Record a successful delivery. The first delivery per event id appends
    /// one per-symbol timestamp and returns `true`; duplicates are silently
    /// absorbed.
    pub fn record_delivery(&self, symbol: &str, event_id: &str, ts: f64) -> bool {
        let mut inner = self.inner.lock();
        if !inner.delivered.insert(event_id.to_string()) {
            return false;
        }
        inner.delivered_log.push_back((ts, event_id.to_string()));
        inner
            .per_symbol
            .entry(symbol.to_string())
            .or_default()
            .push_back(ts);
        true
    }

    pub fn is_recorded(&self, event_id: &str) -> bool {
        self.inner.lock().delivered.contains(event_id)
    }

    /// Delivered alerts for `symbol` at or after `cutoff`.
    pub fn count_for_symbol_since(&self, symbol: &str, cutoff: f64) -> usize {
        let inner = self.inner.lock();
        inner
            .per_symbol
            .get(symbol)
            .map(|q| q.iter().filter(|&&ts| ts >= cutoff).count())
            .unwrap_or(0)
    }

    /// Delivered alerts across all symbols at or after `cutoff`.
    pub fn total_since(&self, cutoff: f64) -> usize {
        let inner = self.inner.lock();
        inner
            .per_symbol
            .values()
            .map(|q| q.iter().filter(|&&ts| ts >= cutoff).count())
            .sum()
    }

    /// Drop everything older than `cutoff`: per-symbol timestamps and the id
    /// sets backing dedup. Ids embed their emission timestamp, so an id aged
    /// past the alert window cannot legitimately recur.
    pub fn evict_older_than(&self, cutoff: f64) {
        let mut inner = self.inner.lock();
        let inner = &mut *inner;

        while inner
            .emitted_log
            .front()
            .is_some_and(|(ts, _)| *ts < cutoff)
        {
            if let Some((_, id)) = inner.emitted_log.pop_front() {
                inner.emitted.remove(&id);
            }
        }

        while inner
            .delivered_log
            .front()
            .is_some_and(|(ts, _)| *ts < cutoff)
        {
            if let Some((_, id)) = inner.delivered_log.pop_front() {
                inner.delivered.remove(&id);
            }
        }

        for queue in inner.per_symbol.values_mut() {
            while let Some(&ts) = queue.front() {
                if ts < cutoff {
                    queue.pop_front();
                } else {
                    break;
                }
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emission_claim_is_exclusive() {
        let h = AlertHistory::new();
        assert!(h.try_mark_emitted("BTCUSDT:100:HARD", 100.0));
        assert!(!h.try_mark_emitted("BTCUSDT:100:HARD", 100.0));
        assert!(h.try_mark_emitted("BTCUSDT:100:BUILDUP", 100.0));
    }

    #[test]
    fn duplicate_delivery_appends_once() {
        let h = AlertHistory::new();
        assert!(h.record_delivery("BTCUSDT", "BTCUSDT:100:HARD", 100.0));
        assert!(!h.record_delivery("BTCUSDT", "BTCUSDT:100:HARD", 101.0));
        assert_eq!(h.count_for_symbol_since("BTCUSDT", 0.0), 1);
        assert!(h.is_recorded("BTCUSDT:100:HARD"));
    }

    #[test]
    fn counts_respect_cutoff() {
        let h = AlertHistory::new();
        h.record_delivery("BTCUSDT", "a", 100.0);
        h.record_delivery("BTCUSDT", "b", 200.0);
        h.record_delivery("ETHUSDT", "c", 300.0);
        assert_eq!(h.count_for_symbol_since("BTCUSDT", 150.0), 1);
        assert_eq!(h.total_since(150.0), 2);
        assert_eq!(h.total_since(0.0), 3);
        assert_eq!(h.count_for_symbol_since("SOLUSDT", 0.0), 0);
    }

    #[test]
    fn eviction_drops_old_entries_and_ids() {
        let h = AlertHistory::new();
        h.try_mark_emitted("old", 100.0);
        h.try_mark_emitted("new", 500.0);
        h.record_delivery("BTCUSDT", "old", 100.0);
        h.record_delivery("BTCUSDT", "new", 500.0);

        h.evict_older_than(300.0);

        assert_eq!(h.count_for_symbol_since("BTCUSDT", 0.0), 1);
        assert!(!h.is_recorded("old"));
        assert!(h.is_recorded("new"));
        // The evicted id can be claimed again.
        assert!(h.try_mark_emitted("old", 600.0));
    }
}
