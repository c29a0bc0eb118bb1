// =============================================================================
// Per-symbol aggregation state
// =============================================================================
//
// One aggregator per configured symbol, created at startup. The feed reader
// and the open-interest poller are the only writers; the evaluation loop
// reads through point-in-time snapshots. Each field group sits behind its own
// lock so a snapshot copies small scalars and clones window views without
// ever observing a half-applied update.

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use serde_json::json;

use crate::event_log::log_event;
use crate::market_data::window::{OiWindow, SidedWindow, TimeWindow};
use crate::types::Side;

/// Horizon of the short mark-price history used for trend labelling.
const PRICE_TREND_WINDOW_SECS: f64 = 300.0;

// =============================================================================
// Internal field groups
// =============================================================================

#[derive(Debug, Default)]
struct FundingTrack {
    /// Most recent funding observation from the feed.
    feed_value: Option<f64>,
    /// Count of feed observations, used to detect "new since last tick".
    feed_obs: u64,
    /// Funding pair committed by the evaluation loop.
    latest: Option<f64>,
    previous: Option<f64>,
    /// Observation count at the last commit.
    committed_obs: u64,
}

#[derive(Debug)]
struct PriceTrack {
    last: Option<f64>,
    history: TimeWindow,
}

#[derive(Debug, Default, Clone, Copy)]
struct Freshness {
    mark: Option<f64>,
    trade: Option<f64>,
    liq: Option<f64>,
    oi: Option<f64>,
}

impl Freshness {
    fn freshest(&self) -> Option<f64> {
        [self.mark, self.trade, self.liq, self.oi]
            .into_iter()
            .flatten()
            .fold(None, |acc, ts| Some(acc.map_or(ts, |a: f64| a.max(ts))))
    }

    /// Freshest socket-fed stream, ignoring the polled OI stream. The feed
    /// watchdog must not be pacified by a healthy poller while the socket
    /// is dead.
    fn socket_freshest(&self) -> Option<f64> {
        [self.mark, self.trade, self.liq]
            .into_iter()
            .flatten()
            .fold(None, |acc, ts| Some(acc.map_or(ts, |a: f64| a.max(ts))))
    }
}

// =============================================================================
// SymbolAggregator
// =============================================================================

/// Rolling state for a single symbol.
pub struct SymbolAggregator {
    symbol: String,
    funding: Mutex<FundingTrack>,
    price: Mutex<PriceTrack>,
    trades: Mutex<SidedWindow>,
    liqs: Mutex<SidedWindow>,
    oi: Mutex<OiWindow>,
    freshness: Mutex<Freshness>,
    /// Events dropped for non-finite or non-positive fields.
    malformed: AtomicU64,
}

impl SymbolAggregator {
    pub fn new(symbol: impl Into<String>, window_secs: f64, oi_fresh_ttl_secs: f64) -> Self {
        Self {
            symbol: symbol.into(),
            funding: Mutex::new(FundingTrack::default()),
            price: Mutex::new(PriceTrack {
                last: None,
                history: TimeWindow::new(PRICE_TREND_WINDOW_SECS),
            }),
            trades: Mutex::new(SidedWindow::new(window_secs)),
            liqs: Mutex::new(SidedWindow::new(window_secs)),
            oi: Mutex::new(OiWindow::new(window_secs, oi_fresh_ttl_secs)),
            freshness: Mutex::new(Freshness::default()),
            malformed: AtomicU64::new(0),
        }
    }

    // ── Feed-side writes ────────────────────────────────────────────────

    /// Record a mark-price update (funding rate + mark price).
    pub fn note_mark_price(&self, funding_rate: f64, mark_price: f64, now: f64) {
        if !funding_rate.is_finite() || !mark_price.is_finite() || mark_price <= 0.0 {
            self.count_malformed("mark_price");
            return;
        }

        {
            let mut f = self.funding.lock();
            f.feed_value = Some(funding_rate);
            f.feed_obs += 1;
        }
        {
            let mut p = self.price.lock();
            p.last = Some(mark_price);
            p.history.push(now, mark_price, now);
        }
        self.freshness.lock().mark = Some(now);
    }

    /// Record an aggregated trade.
    pub fn note_trade(&self, qty: f64, side: Side, now: f64) {
        if !qty.is_finite() || qty <= 0.0 {
            self.count_malformed("trade");
            return;
        }
        self.trades.lock().push(now, qty, side, now);
        self.freshness.lock().trade = Some(now);
    }

    /// Record a forced liquidation. The window stores notional (qty · price).
    pub fn note_liquidation(&self, qty: f64, price: f64, side: Side, now: f64) {
        if !qty.is_finite() || qty <= 0.0 || !price.is_finite() || price <= 0.0 {
            self.count_malformed("liquidation");
            return;
        }
        self.liqs.lock().push(now, qty * price, side, now);
        self.freshness.lock().liq = Some(now);
    }

    /// Offer a polled open-interest sample. Returns `true` if accepted.
    pub fn offer_oi(&self, source_ts: f64, value: f64, now: f64) -> bool {
        if !value.is_finite() || value <= 0.0 || !source_ts.is_finite() {
            self.count_malformed("oi_sample");
            return false;
        }
        let accepted = self.oi.lock().offer(source_ts, value, now);
        if accepted {
            self.freshness.lock().oi = Some(now);
        }
        accepted
    }

    // ── Evaluator-side operations ───────────────────────────────────────

    /// Advance the funding pair if a new observation arrived since the last
    /// commit: the prior latest value becomes the previous one.
    pub fn advance_funding(&self) {
        let mut f = self.funding.lock();
        if f.feed_obs > f.committed_obs {
            if let Some(value) = f.feed_value {
                f.previous = f.latest;
                f.latest = Some(value);
                f.committed_obs = f.feed_obs;
            }
        }
    }

    /// Evict aged entries from every window.
    pub fn evict(&self, now: f64) {
        self.trades.lock().evict(now);
        self.liqs.lock().evict(now);
        self.oi.lock().evict(now);
        self.price.lock().history.evict(now);
    }

    /// Build a point-in-time view for the scorer.
    pub fn snapshot(&self, now: f64) -> SymbolSnapshot {
        self.evict(now);

        let (funding, prev_funding) = {
            let f = self.funding.lock();
            (f.latest, f.previous)
        };

        let (mark_price, price_series) = {
            let p = self.price.lock();
            (p.last, p.history.series())
        };

        let (long_qty, short_qty) = {
            let t = self.trades.lock();
            (t.long_total(), t.short_total())
        };

        let (liq_long, liq_short) = {
            let l = self.liqs.lock();
            (l.long_total(), l.short_total())
        };

        let (oi_series, oi_points) = {
            let o = self.oi.lock();
            (o.series(), o.len())
        };

        let freshest_age = self
            .freshness
            .lock()
            .freshest()
            .map(|ts| (now - ts).max(0.0));

        SymbolSnapshot {
            symbol: self.symbol.clone(),
            funding,
            prev_funding,
            mark_price,
            price_series,
            long_qty,
            short_qty,
            liq_long,
            liq_short,
            oi_series,
            oi_points,
            freshest_age,
        }
    }

    /// Timestamp of the most recent socket-fed event (mark, trade, liq).
    pub fn socket_freshest_update(&self) -> Option<f64> {
        self.freshness.lock().socket_freshest()
    }

    pub fn malformed_count(&self) -> u64 {
        self.malformed.load(Ordering::Relaxed)
    }

    fn count_malformed(&self, stream: &str) {
        let total = self.malformed.fetch_add(1, Ordering::Relaxed) + 1;
        log_event(
            "malformed_event",
            json!({
                "symbol": self.symbol,
                "stream": stream,
                "total": total,
            }),
        );
    }
}

// =============================================================================
// SymbolSnapshot
// =============================================================================

/// Read-only view of one symbol's state at a point in time.
#[derive(Debug, Clone)]
pub struct SymbolSnapshot {
    pub symbol: String,
    pub funding: Option<f64>,
    pub prev_funding: Option<f64>,
    pub mark_price: Option<f64>,
    /// Short mark-price history, oldest first.
    pub price_series: Vec<(f64, f64)>,
    pub long_qty: f64,
    pub short_qty: f64,
    /// Liquidation notionals per wiped-out side.
    pub liq_long: f64,
    pub liq_short: f64,
    /// Open-interest series, possibly bootstrapped to two points.
    pub oi_series: Vec<(f64, f64)>,
    /// In-window OI sample count (before bootstrap synthesis).
    pub oi_points: usize,
    /// Age of the freshest event on any stream, if one ever arrived.
    pub freshest_age: Option<f64>,
}

impl SymbolSnapshot {
    /// Long share of taker volume in the window; 0.5 when the window is empty.
    pub fn pressure_ratio(&self) -> f64 {
        let total = self.long_qty + self.short_qty;
        if total > 0.0 {
            self.long_qty / total
        } else {
            0.5
        }
    }

    pub fn liq_total(&self) -> f64 {
        self.liq_long + self.liq_short
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn agg() -> SymbolAggregator {
        SymbolAggregator::new("BTCUSDT", 3600.0, 900.0)
    }

    #[test]
    fn empty_snapshot_defaults() {
        let a = agg();
        let snap = a.snapshot(0.0);
        assert_eq!(snap.funding, None);
        assert_eq!(snap.mark_price, None);
        assert!((snap.pressure_ratio() - 0.5).abs() < 1e-9);
        assert_eq!(snap.liq_total(), 0.0);
        assert!(snap.oi_series.is_empty());
        assert_eq!(snap.freshest_age, None);
    }

    #[test]
    fn trade_totals_flow_into_snapshot() {
        let a = agg();
        a.note_trade(8.0, Side::Long, 10.0);
        a.note_trade(2.0, Side::Short, 11.0);
        let snap = a.snapshot(12.0);
        assert!((snap.long_qty - 8.0).abs() < 1e-9);
        assert!((snap.short_qty - 2.0).abs() < 1e-9);
        assert!((snap.pressure_ratio() - 0.8).abs() < 1e-9);
    }

    #[test]
    fn liquidation_stores_notional() {
        let a = agg();
        a.note_liquidation(2.0, 30_000.0, Side::Long, 5.0);
        a.note_liquidation(1.0, 30_000.0, Side::Short, 6.0);
        let snap = a.snapshot(7.0);
        assert!((snap.liq_long - 60_000.0).abs() < 1e-6);
        assert!((snap.liq_short - 30_000.0).abs() < 1e-6);
        assert!((snap.liq_total() - 90_000.0).abs() < 1e-6);
    }

    #[test]
    fn funding_pair_advances_only_on_new_observation() {
        let a = agg();
        a.note_mark_price(0.001, 50_000.0, 1.0);
        a.advance_funding();
        let snap = a.snapshot(2.0);
        assert_eq!(snap.funding, Some(0.001));
        assert_eq!(snap.prev_funding, None);

        // No new observation: pair must not move.
        a.advance_funding();
        let snap = a.snapshot(3.0);
        assert_eq!(snap.funding, Some(0.001));
        assert_eq!(snap.prev_funding, None);

        a.note_mark_price(0.004, 50_100.0, 4.0);
        a.advance_funding();
        let snap = a.snapshot(5.0);
        assert_eq!(snap.funding, Some(0.004));
        assert_eq!(snap.prev_funding, Some(0.001));
    }

    #[test]
    fn malformed_events_are_dropped_and_counted() {
        let a = agg();
        a.note_trade(f64::NAN, Side::Long, 1.0);
        a.note_trade(-3.0, Side::Long, 1.0);
        a.note_trade(0.0, Side::Short, 1.0);
        a.note_liquidation(1.0, f64::INFINITY, Side::Long, 1.0);
        a.note_mark_price(f64::NAN, 100.0, 1.0);
        assert_eq!(a.malformed_count(), 5);

        let snap = a.snapshot(2.0);
        assert_eq!(snap.long_qty, 0.0);
        assert_eq!(snap.liq_total(), 0.0);
        assert_eq!(snap.funding, None);
    }

    #[test]
    fn window_entries_respect_horizon() {
        let a = agg();
        a.note_trade(5.0, Side::Long, 0.0);
        a.note_trade(5.0, Side::Long, 3000.0);
        // First trade is 3700s old at read time.
        let snap = a.snapshot(3700.0);
        assert!((snap.long_qty - 5.0).abs() < 1e-9);
    }

    #[test]
    fn oi_bootstrap_reaches_snapshot() {
        let a = SymbolAggregator::new("BTCUSDT", 300.0, 90_000.0);
        a.offer_oi(0.0, 100.0, 0.0);
        a.offer_oi(400.0, 104.0, 400.0);
        let snap = a.snapshot(400.0);
        assert_eq!(snap.oi_points, 1);
        assert_eq!(snap.oi_series, vec![(0.0, 100.0), (400.0, 104.0)]);
    }

    #[test]
    fn freshness_tracks_streams() {
        let a = agg();
        assert_eq!(a.socket_freshest_update(), None);
        a.note_trade(1.0, Side::Long, 10.0);
        a.note_mark_price(0.001, 100.0, 20.0);
        assert_eq!(a.socket_freshest_update(), Some(20.0));
        let snap = a.snapshot(25.0);
        assert_eq!(snap.freshest_age, Some(5.0));
    }

    #[test]
    fn polled_oi_does_not_refresh_the_socket_clock() {
        let a = agg();
        a.note_trade(1.0, Side::Long, 10.0);
        a.offer_oi(100.0, 1000.0, 100.0);
        assert_eq!(a.socket_freshest_update(), Some(10.0));
        // But the overall snapshot freshness does see the poll.
        let snap = a.snapshot(110.0);
        assert_eq!(snap.freshest_age, Some(10.0));
    }
}
