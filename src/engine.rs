// =============================================================================
// Evaluation Engine — per-symbol scoring loop and alert decisions
// =============================================================================
//
// `EngineState` is the single owning value constructed at startup: it holds
// the per-symbol aggregators, the alert bookkeeping, the regime classifiers
// and the outbox producer. Every task gets an `Arc` to it; nothing lives at
// module scope.
//
// The evaluation loop runs on a fixed cadence. Ticks are serialized (one
// synchronous pass over the symbols in configuration order), and each tick
// for each symbol:
//
//   1. advances the funding pair and takes a snapshot;
//   2. scores the snapshot;
//   3. gates on stream quality;
//   4. computes confidence and decides HARD / BUILDUP / nothing;
//   5. runs divergence detection;
//   6. enqueues alert events with deduplicated event ids (HARD/BUILDUP
//      before divergences).
//
// On a slower cadence the same loop recomputes the market and activity
// regimes. A failure for one symbol is logged and never stops the pass.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use parking_lot::{Mutex, RwLock};
use serde_json::json;
use tracing::{error, info};

use crate::alerts::outbox::{AlertEvent, Outbox, OutboundMessage};
use crate::alerts::AlertHistory;
use crate::divergence::{
    detect_divergences, params_for, price_trend, CooldownTracker, DivergenceInputs,
};
use crate::event_log::log_event;
use crate::market_data::SymbolAggregator;
use crate::monitor_config::MonitorConfig;
use crate::quality::{
    calculate_confidence, confidence_level, stream_quality, ConfidenceLevel, QualityLevel,
};
use crate::regime::{
    activity_regime, candidate_regime, ActivityTracker, HysteresisConfig, MarketRegime,
    MarketState, RegimeClassifier,
};
use crate::risk::{calculate_risk, RiskInputs, RiskResult, RiskThresholds};
use crate::types::{now_secs, AlertKind, Direction};

/// Give the feed a moment to populate windows before the first evaluation.
const STARTUP_GRACE: Duration = Duration::from_secs(10);

// =============================================================================
// EngineState
// =============================================================================

/// Root state of the monitor, shared across all tasks via `Arc`.
pub struct EngineState {
    config: RwLock<MonitorConfig>,
    /// Evaluation order, fixed at startup.
    symbols: Vec<String>,
    /// Fixed symbol → aggregator mapping; absence of a configured symbol is
    /// a programming error surfaced per tick.
    aggregators: HashMap<String, Arc<SymbolAggregator>>,

    pub history: Arc<AlertHistory>,
    pub recipients: Arc<RwLock<HashSet<i64>>>,

    /// Latest scoring result per symbol.
    results: RwLock<HashMap<String, RiskResult>>,
    /// Previous scores, for the rising/falling trend in snapshots.
    prev_scores: RwLock<HashMap<String, u32>>,

    regime: Mutex<RegimeClassifier>,
    activity: Mutex<ActivityTracker>,
    cooldowns: CooldownTracker,

    outbox: Outbox,

    last_risk_eval: AtomicU64,
    last_regime_ts: AtomicU64,
    last_activity_ts: AtomicU64,
    shutdown: AtomicBool,
}

impl EngineState {
    pub fn new(config: MonitorConfig, outbox: Outbox) -> Self {
        let symbols = config.symbols.clone();

        let mut aggregators = HashMap::new();
        for symbol in &symbols {
            aggregators.insert(
                symbol.clone(),
                Arc::new(SymbolAggregator::new(
                    symbol.clone(),
                    config.window_seconds as f64,
                    config.oi_fresh_ttl_secs as f64,
                )),
            );
        }

        let recipients: HashSet<i64> = config.recipients.iter().copied().collect();

        let regime = RegimeClassifier::new(HysteresisConfig {
            stress_confirm_ticks: config.stress_confirm_ticks,
            stress_exit_ticks: config.stress_exit_ticks,
            crowd_confirm_ticks: config.crowd_confirm_ticks,
        });

        Self {
            config: RwLock::new(config),
            symbols,
            aggregators,
            history: Arc::new(AlertHistory::new()),
            recipients: Arc::new(RwLock::new(recipients)),
            results: RwLock::new(HashMap::new()),
            prev_scores: RwLock::new(HashMap::new()),
            regime: Mutex::new(regime),
            activity: Mutex::new(ActivityTracker::new()),
            cooldowns: CooldownTracker::new(),
            outbox,
            last_risk_eval: AtomicU64::new(0),
            last_regime_ts: AtomicU64::new(0),
            last_activity_ts: AtomicU64::new(0),
            shutdown: AtomicBool::new(false),
        }
    }

    pub fn symbols(&self) -> &[String] {
        &self.symbols
    }

    pub fn aggregator(&self, symbol: &str) -> Option<&Arc<SymbolAggregator>> {
        self.aggregators.get(symbol)
    }

    /// A clone of the current configuration.
    pub fn config(&self) -> MonitorConfig {
        self.config.read().clone()
    }

    pub fn outbox(&self) -> &Outbox {
        &self.outbox
    }

    pub fn committed_regime(&self) -> MarketRegime {
        self.regime.lock().committed()
    }

    pub fn cached_result(&self, symbol: &str) -> Option<RiskResult> {
        self.results.read().get(symbol).cloned()
    }

    /// Epoch seconds of the last completed symbol evaluation, if any.
    pub fn last_risk_eval_ts(&self) -> Option<u64> {
        match self.last_risk_eval.load(Ordering::Relaxed) {
            0 => None,
            ts => Some(ts),
        }
    }

    /// Timestamp of the freshest socket event across all symbols.
    pub fn socket_freshest_update(&self) -> Option<f64> {
        self.aggregators
            .values()
            .filter_map(|a| a.socket_freshest_update())
            .fold(None, |acc, ts| Some(acc.map_or(ts, |a: f64| a.max(ts))))
    }

    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Score trend vs. the previous tick: rising / falling / flat.
    fn score_trend(&self, symbol: &str, score: u32) -> &'static str {
        let mut prev = self.prev_scores.write();
        let trend = match prev.get(symbol) {
            Some(&p) if score > p => "rising",
            Some(&p) if score < p => "falling",
            _ => "flat",
        };
        prev.insert(symbol.to_string(), score);
        trend
    }
}

// =============================================================================
// Evaluation loop
// =============================================================================

/// Run the fixed-cadence evaluation loop until shutdown.
pub async fn run_evaluation_loop(engine: Arc<EngineState>) {
    tokio::time::sleep(STARTUP_GRACE).await;
    info!("evaluation loop starting");

    let interval_secs = engine.config.read().interval_seconds.max(1);
    let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));

    loop {
        interval.tick().await;
        if engine.is_shutting_down() {
            info!("evaluation loop stopping");
            return;
        }
        run_tick(&engine, now_secs());
    }
}

/// One serialized evaluation tick. All work is synchronous: the tick is over
/// (including enqueueing) before the next one can start.
pub fn run_tick(engine: &EngineState, now: f64) {
    let config = engine.config();

    for symbol in &engine.symbols {
        if let Err(e) = evaluate_symbol(engine, &config, symbol, now) {
            error!(symbol = %symbol, error = %e, "risk evaluation failed");
        }
    }

    // Regime cadence runs on the tick's fresh results.
    maybe_regime_tick(engine, &config, now);
}

fn evaluate_symbol(
    engine: &EngineState,
    config: &MonitorConfig,
    symbol: &str,
    now: f64,
) -> Result<()> {
    let agg = engine
        .aggregator(symbol)
        .with_context(|| format!("no aggregator for configured symbol {symbol}"))?;

    agg.advance_funding();
    let snap = agg.snapshot(now);

    let thresholds = RiskThresholds {
        funding_extreme: config.funding_extreme_threshold,
        funding_spike: config.funding_spike_threshold,
        oi_spike: config.oi_spike_threshold,
    };

    let liq_sum = snap.liq_total();
    let inputs = RiskInputs {
        funding: snap.funding,
        prev_funding: snap.prev_funding,
        pressure_ratio: snap.pressure_ratio(),
        oi_series: &snap.oi_series,
        liquidation_sum: liq_sum,
        liquidation_threshold: config.liq_threshold(symbol),
        price: snap.mark_price,
        liq_sides: (liq_sum > 0.0).then_some((snap.liq_long, snap.liq_short)),
    };

    let result = calculate_risk(&inputs, &thresholds);
    let score_trend = engine.score_trend(symbol, result.score);
    let quality = stream_quality(&snap, config.feed_stale_secs as f64);

    log_event(
        "risk_eval",
        json!({
            "ts": now as i64,
            "symbol": symbol,
            "risk": result.score,
            "direction": result.direction.to_string(),
            "risk_driver": result.driver.to_string(),
            "funding": snap.funding,
            "oi_spike": result.oi_spike,
            "funding_spike": result.funding_spike,
            "liq": liq_sum,
            "score_trend": score_trend,
            "quality": quality.level.to_string(),
            "quality_score": quality.score,
            "malformed_events": agg.malformed_count(),
        }),
    );
    engine.last_risk_eval.store(now as u64, Ordering::Relaxed);
    engine
        .results
        .write()
        .insert(symbol.to_string(), result.clone());

    // Thin inputs produce scores not worth waking anyone for.
    if quality.level == QualityLevel::Low {
        return Ok(());
    }

    let confidence = calculate_confidence(
        result.score,
        config.early_alert_level,
        result.direction,
        result.oi_spike,
        result.funding_spike,
        liq_sum,
    );

    let now_ts = now as i64;

    // Everything below shares these fields; the chat id is filled in per
    // recipient at fan-out time.
    let template = |event_id: String, kind: AlertKind, text: String| AlertEvent {
        event_id,
        symbol: symbol.to_string(),
        kind,
        risk: result.score,
        direction: result.direction,
        confidence,
        driver: result.driver,
        price: snap.mark_price,
        text,
        chat_id: 0,
        ts: now_ts,
    };

    // ── HARD / BUILDUP ──────────────────────────────────────────────────
    if result.score >= config.hard_alert_level && !result.direction.is_neutral() && confidence >= 3
    {
        let text = format!(
            "🚨 HARD RISK ALERT {symbol}\n\nRisk: {}\nDirection: {}\nConfidence: {}",
            result.score,
            result.direction,
            confidence_level(confidence),
        );
        let event_id = format!("{symbol}:{now_ts}:{}", AlertKind::Hard);
        emit(engine, template(event_id, AlertKind::Hard, text), now);
    } else if result.score >= config.early_alert_level {
        let cutoff = now - config.alert_window_hours as f64 * 3600.0;
        // Including the alert going out right now.
        let recent = engine.history.count_for_symbol_since(symbol, cutoff) + 1;

        let mut text = format!(
            "⚠️ RISK BUILDUP {symbol}\n\nRisk: {}\nDirection: {}\nAlerts last {}h: {recent}",
            result.score, result.direction, config.alert_window_hours,
        );
        let level = confidence_level(confidence);
        if matches!(level, ConfidenceLevel::Medium | ConfidenceLevel::High) {
            if let Some(reason) = result.reasons.first() {
                text.push_str(&format!("\nConfidence: {level}\nReason: {reason}"));
            }
        }
        let event_id = format!("{symbol}:{now_ts}:{}", AlertKind::Buildup);
        emit(engine, template(event_id, AlertKind::Buildup, text), now);
    }

    // ── Divergences ─────────────────────────────────────────────────────
    let regime = engine.committed_regime();
    let trend = price_trend(&snap.price_series, params_for(symbol).price_trend_delta);
    let divergences = detect_divergences(
        symbol,
        &DivergenceInputs {
            regime,
            pressure: snap.pressure_ratio(),
            oi_series: &snap.oi_series,
            price_trend: trend,
            liquidations: liq_sum,
        },
        &engine.cooldowns,
        now,
    );

    for (seq, divergence) in divergences.iter().enumerate() {
        log_event(
            "divergence_detected",
            json!({
                "ts": now_ts,
                "symbol": symbol,
                "kind": divergence.kind.to_string(),
                "regime": regime.to_string(),
            }),
        );
        let event_id = format!("{symbol}:{now_ts}:{}:{seq}", AlertKind::Divergence);
        let text = format!("🧭 {symbol}\n\n{}", divergence.text);
        emit(engine, template(event_id, AlertKind::Divergence, text), now);
    }

    Ok(())
}

/// Claim the event id and fan the alert out to every active recipient. An id
/// seen before means this exact alert already went out; stay silent.
fn emit(engine: &EngineState, template: AlertEvent, now: f64) {
    if !engine.history.try_mark_emitted(&template.event_id, now) {
        return;
    }

    let recipients: Vec<i64> = engine.recipients.read().iter().copied().collect();
    for chat_id in recipients {
        engine.outbox.enqueue(OutboundMessage::Alert(AlertEvent {
            chat_id,
            ..template.clone()
        }));
    }
}

// =============================================================================
// Regime & activity cadence
// =============================================================================

fn maybe_regime_tick(engine: &EngineState, config: &MonitorConfig, now: f64) {
    let now_ts = now as i64;
    let interval = config.regime_interval_seconds;

    // ── Market regime ───────────────────────────────────────────────────
    let last = engine.last_regime_ts.load(Ordering::Relaxed);
    if now as u64 - last >= interval {
        // Age out bookkeeping beyond every window first.
        let retain_hours = config.alert_window_hours.max(config.activity_window_hours);
        engine
            .history
            .evict_older_than(now - retain_hours as f64 * 3600.0);

        let alert_cutoff = now - config.alert_window_hours as f64 * 3600.0;
        let alerts_in_window = engine.history.total_since(alert_cutoff);

        let pairs: Vec<(u32, Direction)> = {
            let results = engine.results.read();
            engine
                .symbols
                .iter()
                .filter_map(|s| results.get(s))
                .map(|r| (r.score, r.direction))
                .collect()
        };

        let state = MarketState::from_results(&pairs, config.early_alert_level, alerts_in_window);
        let candidate = candidate_regime(&state);
        let decision = engine.regime.lock().observe(candidate);

        log_event(
            "market_regime",
            json!({
                "ts": now_ts,
                "candidate": decision.candidate.to_string(),
                "committed": decision.committed.to_string(),
                "regime": decision.reported.to_string(),
                "avg_risk": state.avg_risk,
                "buildup_count": state.buildup_count,
                "alerts_in_window": state.alerts_in_window,
                "long_bias": state.long_bias,
                "short_bias": state.short_bias,
                "symbols": state.symbols_tracked,
            }),
        );

        if decision.changed {
            info!(
                committed = %decision.committed,
                candidate = %decision.candidate,
                "market regime transition"
            );
        }

        engine.last_regime_ts.store(now as u64, Ordering::Relaxed);
    }

    // ── Activity regime ─────────────────────────────────────────────────
    let last = engine.last_activity_ts.load(Ordering::Relaxed);
    if now as u64 - last >= interval {
        let cutoff = now - config.activity_window_hours as f64 * 3600.0;
        let alerts = engine.history.total_since(cutoff);
        let regime = activity_regime(alerts, config.activity_calm_max, config.activity_fragile_max);

        engine
            .activity
            .lock()
            .observe(regime, alerts, config.activity_window_hours, now_ts);

        log_event(
            "activity_regime",
            json!({
                "ts": now_ts,
                "regime": regime.to_string(),
                "alerts": alerts,
                "window_h": config.activity_window_hours,
            }),
        );

        engine.last_activity_ts.store(now as u64, Ordering::Relaxed);
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Side;
    use tokio::sync::mpsc;

    fn test_engine(capacity: usize) -> (Arc<EngineState>, mpsc::Receiver<OutboundMessage>) {
        let mut config = MonitorConfig::default();
        config.symbols = vec!["BTCUSDT".to_string()];
        config.recipients = vec![1];
        let (outbox, rx) = Outbox::new(capacity);
        (Arc::new(EngineState::new(config, outbox)), rx)
    }

    /// Crowded longs + rising OI + live feed: a HARD alert plus a LONG_TRAP
    /// divergence, in that order.
    #[test]
    fn hard_alert_fires_and_precedes_divergence() {
        let (engine, mut rx) = test_engine(100);
        let now = now_secs();
        let agg = engine.aggregator("BTCUSDT").unwrap();

        agg.note_mark_price(0.001, 50_000.0, now - 1.0);
        agg.note_trade(88.0, Side::Long, now - 1.0);
        agg.note_trade(12.0, Side::Short, now - 1.0);
        agg.offer_oi(now - 120.0, 100.0, now - 120.0);
        agg.offer_oi(now - 60.0, 104.0, now - 60.0);

        run_tick(&engine, now);

        let first = rx.try_recv().expect("expected a HARD alert");
        let OutboundMessage::Alert(alert) = first else {
            panic!("expected an alert");
        };
        assert_eq!(alert.kind, AlertKind::Hard);
        assert_eq!(alert.symbol, "BTCUSDT");
        assert_eq!(alert.risk, 6);
        assert_eq!(alert.direction, Direction::Long);
        assert!(alert.confidence >= 3);
        assert_eq!(alert.event_id, format!("BTCUSDT:{}:HARD", now as i64));

        let second = rx.try_recv().expect("expected a divergence after the alert");
        let OutboundMessage::Alert(div) = second else {
            panic!("expected an alert");
        };
        assert_eq!(div.kind, AlertKind::Divergence);
        assert!(div.text.contains("LONG TRAP"));
    }

    #[test]
    fn replaying_the_same_tick_emits_no_duplicates() {
        let (engine, mut rx) = test_engine(100);
        let now = now_secs();
        let agg = engine.aggregator("BTCUSDT").unwrap();

        agg.note_mark_price(0.001, 50_000.0, now - 1.0);
        agg.note_trade(88.0, Side::Long, now - 1.0);
        agg.note_trade(12.0, Side::Short, now - 1.0);
        agg.offer_oi(now - 120.0, 100.0, now - 120.0);
        agg.offer_oi(now - 60.0, 104.0, now - 60.0);

        run_tick(&engine, now);
        let mut first_pass = 0;
        while rx.try_recv().is_ok() {
            first_pass += 1;
        }
        assert!(first_pass > 0);

        // Same instant, same snapshot: identical event ids, all deduped.
        run_tick(&engine, now);
        assert!(rx.try_recv().is_err());
    }

    /// Score high enough for HARD but no direction: stays a BUILDUP.
    #[test]
    fn neutral_direction_never_hard_alerts() {
        let (engine, mut rx) = test_engine(100);
        let now = now_secs();
        let agg = engine.aggregator("BTCUSDT").unwrap();

        // Balanced flow, rising OI, large liquidations: score 6, no votes.
        agg.note_mark_price(0.001, 50_000.0, now - 1.0);
        agg.note_trade(50.0, Side::Long, now - 1.0);
        agg.note_trade(50.0, Side::Short, now - 1.0);
        agg.offer_oi(now - 120.0, 100.0, now - 120.0);
        agg.offer_oi(now - 60.0, 104.0, now - 60.0);
        agg.note_liquidation(2000.0, 30_000.0, Side::Long, now - 1.0);

        run_tick(&engine, now);

        let result = engine.cached_result("BTCUSDT").unwrap();
        assert!(result.score >= 6);
        assert_eq!(result.direction, Direction::Neutral);

        let msg = rx.try_recv().expect("expected a buildup alert");
        let OutboundMessage::Alert(alert) = msg else {
            panic!("expected an alert");
        };
        assert_eq!(alert.kind, AlertKind::Buildup);
    }

    #[test]
    fn quiet_market_emits_nothing() {
        let (engine, mut rx) = test_engine(100);
        let now = now_secs();
        let agg = engine.aggregator("BTCUSDT").unwrap();

        agg.note_mark_price(0.0001, 50_000.0, now - 1.0);
        agg.note_trade(10.0, Side::Long, now - 1.0);
        agg.note_trade(10.0, Side::Short, now - 1.0);

        run_tick(&engine, now);

        let result = engine.cached_result("BTCUSDT").unwrap();
        assert_eq!(result.score, 0);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn tick_updates_last_risk_eval_and_regime() {
        let (engine, _rx) = test_engine(100);
        assert_eq!(engine.last_risk_eval_ts(), None);

        let now = now_secs();
        run_tick(&engine, now);

        assert_eq!(engine.last_risk_eval_ts(), Some(now as u64));
        // A quiet single-symbol market commits CALM immediately.
        assert_eq!(engine.committed_regime(), MarketRegime::Calm);
    }

    #[test]
    fn outbox_overflow_drops_new_alerts_but_keeps_old() {
        let (engine, mut rx) = test_engine(1);
        let now = now_secs();
        let agg = engine.aggregator("BTCUSDT").unwrap();

        agg.note_mark_price(0.001, 50_000.0, now - 1.0);
        agg.note_trade(88.0, Side::Long, now - 1.0);
        agg.note_trade(12.0, Side::Short, now - 1.0);
        agg.offer_oi(now - 120.0, 100.0, now - 120.0);
        agg.offer_oi(now - 60.0, 104.0, now - 60.0);

        // HARD alert and LONG_TRAP divergence both try to enqueue; only the
        // first fits.
        run_tick(&engine, now);

        let first = rx.try_recv().expect("first enqueued message survives");
        let OutboundMessage::Alert(alert) = first else {
            panic!("expected an alert");
        };
        assert_eq!(alert.kind, AlertKind::Hard);
        assert!(rx.try_recv().is_err());
    }
}
