// =============================================================================
// Time-bounded windows with running totals
// =============================================================================
//
// Every rolling view in the monitor is a time window: entries older than the
// horizon are evicted on both insert and read, and side totals are maintained
// incrementally (add on insert, subtract on evict) so total queries stay O(1).

use std::collections::VecDeque;

use crate::types::Side;

// =============================================================================
// TimeWindow — scalar samples
// =============================================================================

/// A rolling window of `(ts, value)` samples bounded by age.
#[derive(Debug, Clone)]
pub struct TimeWindow {
    horizon_secs: f64,
    entries: VecDeque<(f64, f64)>,
}

impl TimeWindow {
    pub fn new(horizon_secs: f64) -> Self {
        Self {
            horizon_secs,
            entries: VecDeque::new(),
        }
    }

    /// Drop entries older than the horizon relative to `now`.
    pub fn evict(&mut self, now: f64) {
        while let Some(&(ts, _)) = self.entries.front() {
            if now - ts > self.horizon_secs {
                self.entries.pop_front();
            } else {
                break;
            }
        }
    }

    /// Append a sample and evict anything that aged out.
    pub fn push(&mut self, ts: f64, value: f64, now: f64) {
        self.entries.push_back((ts, value));
        self.evict(now);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn first(&self) -> Option<(f64, f64)> {
        self.entries.front().copied()
    }

    pub fn last(&self) -> Option<(f64, f64)> {
        self.entries.back().copied()
    }

    pub fn series(&self) -> Vec<(f64, f64)> {
        self.entries.iter().copied().collect()
    }
}

// =============================================================================
// SidedWindow — qty samples tagged long/short
// =============================================================================

/// A rolling window of `(ts, qty, side)` entries with per-side running totals.
///
/// The totals always equal the sum of in-window entries for that side: every
/// insert adds to the side total and every eviction subtracts, so a reader
/// sees either the pre-insert or post-insert state, never a torn one.
#[derive(Debug, Clone)]
pub struct SidedWindow {
    horizon_secs: f64,
    entries: VecDeque<(f64, f64, Side)>,
    long_total: f64,
    short_total: f64,
}

impl SidedWindow {
    pub fn new(horizon_secs: f64) -> Self {
        Self {
            horizon_secs,
            entries: VecDeque::new(),
            long_total: 0.0,
            short_total: 0.0,
        }
    }

    pub fn evict(&mut self, now: f64) {
        while let Some(&(ts, qty, side)) = self.entries.front() {
            if now - ts > self.horizon_secs {
                self.entries.pop_front();
                match side {
                    Side::Long => self.long_total -= qty,
                    Side::Short => self.short_total -= qty,
                }
            } else {
                break;
            }
        }
        // Counter the accumulation of float error once the window drains.
        if self.entries.is_empty() {
            self.long_total = 0.0;
            self.short_total = 0.0;
        }
    }

    pub fn push(&mut self, ts: f64, qty: f64, side: Side, now: f64) {
        self.entries.push_back((ts, qty, side));
        match side {
            Side::Long => self.long_total += qty,
            Side::Short => self.short_total += qty,
        }
        self.evict(now);
    }

    pub fn long_total(&self) -> f64 {
        self.long_total
    }

    pub fn short_total(&self) -> f64 {
        self.short_total
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[cfg(test)]
    pub fn recompute_totals(&self) -> (f64, f64) {
        let mut long = 0.0;
        let mut short = 0.0;
        for &(_, qty, side) in &self.entries {
            match side {
                Side::Long => long += qty,
                Side::Short => short += qty,
            }
        }
        (long, short)
    }
}

// =============================================================================
// OiWindow — open-interest samples with staleness reset and bootstrap memory
// =============================================================================

/// Rolling open-interest window.
///
/// Differences from [`TimeWindow`]:
///   - samples arrive from a poller, so a sample whose source timestamp does
///     not advance past the last accepted one is ignored;
///   - if the last accepted sample is older than the freshness TTL, the whole
///     window is cleared before the next append (stale polls must not seed a
///     bogus trend);
///   - the most recent sample displaced by age is remembered so that a
///     single-sample window can still report a two-point series.
#[derive(Debug, Clone)]
pub struct OiWindow {
    horizon_secs: f64,
    fresh_ttl_secs: f64,
    entries: VecDeque<(f64, f64)>,
    last_accepted_ts: Option<f64>,
    prev_committed: Option<(f64, f64)>,
}

impl OiWindow {
    pub fn new(horizon_secs: f64, fresh_ttl_secs: f64) -> Self {
        Self {
            horizon_secs,
            fresh_ttl_secs,
            entries: VecDeque::new(),
            last_accepted_ts: None,
            prev_committed: None,
        }
    }

    /// Drop entries older than the horizon, remembering the newest evicted
    /// sample as the previous committed point.
    pub fn evict(&mut self, now: f64) {
        while let Some(&(ts, value)) = self.entries.front() {
            if now - ts > self.horizon_secs {
                self.prev_committed = Some((ts, value));
                self.entries.pop_front();
            } else {
                break;
            }
        }
    }

    /// Offer a polled sample. Returns `true` if it was accepted.
    pub fn offer(&mut self, source_ts: f64, value: f64, now: f64) -> bool {
        if let Some(last) = self.last_accepted_ts {
            if now - last > self.fresh_ttl_secs {
                // The window went stale; anything in it describes a market
                // from too long ago to anchor a trend.
                self.entries.clear();
                self.prev_committed = None;
                self.last_accepted_ts = None;
            } else if source_ts <= last {
                return false;
            }
        }

        self.entries.push_back((source_ts, value));
        self.last_accepted_ts = Some(source_ts);
        self.evict(now);
        true
    }

    /// The series handed to the scorer.
    ///
    /// With two or more in-window samples this is the window itself. With
    /// exactly one sample and a remembered previous point, a synthetic
    /// two-point series is returned so trend computation is defined right
    /// after startup or a long eviction run.
    pub fn series(&self) -> Vec<(f64, f64)> {
        if self.entries.len() == 1 {
            if let Some(prev) = self.prev_committed {
                let only = self.entries[0];
                return vec![prev, only];
            }
        }
        self.entries.iter().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn time_window_evicts_by_age() {
        let mut w = TimeWindow::new(60.0);
        w.push(0.0, 1.0, 0.0);
        w.push(30.0, 2.0, 30.0);
        w.push(90.0, 3.0, 90.0);
        // The t=0 entry is 90s old — out.
        assert_eq!(w.len(), 2);
        assert_eq!(w.first(), Some((30.0, 2.0)));
        assert_eq!(w.last(), Some((90.0, 3.0)));
    }

    #[test]
    fn time_window_eviction_on_read() {
        let mut w = TimeWindow::new(60.0);
        w.push(0.0, 1.0, 0.0);
        w.push(10.0, 2.0, 10.0);
        w.evict(100.0);
        assert!(w.is_empty());
    }

    #[test]
    fn sided_window_totals_match_entries() {
        let mut w = SidedWindow::new(3600.0);
        w.push(0.0, 5.0, Side::Long, 0.0);
        w.push(1.0, 3.0, Side::Short, 1.0);
        w.push(2.0, 2.0, Side::Long, 2.0);

        assert!((w.long_total() - 7.0).abs() < 1e-9);
        assert!((w.short_total() - 3.0).abs() < 1e-9);

        let (long, short) = w.recompute_totals();
        assert!((w.long_total() - long).abs() < 1e-9);
        assert!((w.short_total() - short).abs() < 1e-9);
    }

    #[test]
    fn sided_window_subtracts_on_evict() {
        let mut w = SidedWindow::new(60.0);
        w.push(0.0, 5.0, Side::Long, 0.0);
        w.push(50.0, 3.0, Side::Short, 50.0);
        w.evict(70.0);
        // Long entry aged out, short entry still in.
        assert!((w.long_total() - 0.0).abs() < 1e-9);
        assert!((w.short_total() - 3.0).abs() < 1e-9);
        assert_eq!(w.len(), 1);
    }

    #[test]
    fn sided_window_resets_totals_when_empty() {
        let mut w = SidedWindow::new(10.0);
        for i in 0..100 {
            w.push(i as f64 * 0.1, 0.1, Side::Long, i as f64 * 0.1);
        }
        w.evict(1000.0);
        assert!(w.is_empty());
        assert_eq!(w.long_total(), 0.0);
        assert_eq!(w.short_total(), 0.0);
    }

    #[test]
    fn reingesting_same_sequence_is_identical() {
        let events = [
            (0.0, 5.0, Side::Long),
            (1.0, 2.0, Side::Short),
            (2.0, 1.0, Side::Long),
        ];
        let build = || {
            let mut w = SidedWindow::new(3600.0);
            for &(ts, qty, side) in &events {
                w.push(ts, qty, side, ts);
            }
            w
        };
        let a = build();
        let b = build();
        assert_eq!(a.len(), b.len());
        assert_eq!(a.long_total(), b.long_total());
        assert_eq!(a.short_total(), b.short_total());
    }

    #[test]
    fn oi_window_rejects_non_advancing_ts() {
        let mut w = OiWindow::new(3600.0, 900.0);
        assert!(w.offer(100.0, 1000.0, 100.0));
        assert!(!w.offer(100.0, 1001.0, 160.0));
        assert!(!w.offer(50.0, 1002.0, 160.0));
        assert!(w.offer(160.0, 1003.0, 160.0));
        assert_eq!(w.len(), 2);
    }

    #[test]
    fn oi_window_clears_when_stale() {
        let mut w = OiWindow::new(3600.0, 900.0);
        w.offer(0.0, 1000.0, 0.0);
        w.offer(60.0, 1010.0, 60.0);
        // Next sample arrives long after the TTL: old contents are dropped.
        assert!(w.offer(2000.0, 1200.0, 2000.0));
        assert_eq!(w.len(), 1);
        // Bootstrap memory was cleared too: the single sample stands alone.
        assert_eq!(w.series().len(), 1);
    }

    #[test]
    fn oi_window_bootstraps_from_evicted_sample() {
        let mut w = OiWindow::new(300.0, 900.0);
        w.offer(0.0, 100.0, 0.0);
        w.offer(400.0, 104.0, 400.0);
        // First sample aged out of the 300s horizon but is remembered.
        assert_eq!(w.len(), 1);
        let series = w.series();
        assert_eq!(series, vec![(0.0, 100.0), (400.0, 104.0)]);
    }

    #[test]
    fn oi_window_single_sample_without_memory_stands_alone() {
        let mut w = OiWindow::new(3600.0, 900.0);
        w.offer(0.0, 100.0, 0.0);
        assert_eq!(w.series().len(), 1);
    }
}
