// =============================================================================
// Monitor Configuration — engine settings, loaded once at startup
// =============================================================================
//
// Central configuration hub for the Livermore risk monitor. Every numeric
// threshold the engine consults lives here so a deployment can be retuned
// without touching code. Read-only at runtime; there is no save path.
//
// All fields carry `#[serde(default)]` so that adding new fields never
// breaks loading an older config file.
// =============================================================================

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_symbols() -> Vec<String> {
    vec!["BTCUSDT".to_string(), "ETHUSDT".to_string()]
}

fn default_interval_seconds() -> u64 {
    60
}

fn default_window_seconds() -> u64 {
    3600
}

fn default_early_alert_level() -> u32 {
    4
}

fn default_hard_alert_level() -> u32 {
    6
}

fn default_funding_extreme_threshold() -> f64 {
    0.02
}

fn default_funding_spike_threshold() -> f64 {
    0.003
}

fn default_oi_spike_threshold() -> f64 {
    0.03
}

fn default_liq_threshold() -> f64 {
    50_000_000.0
}

fn default_liq_thresholds() -> HashMap<String, f64> {
    HashMap::from([
        ("BTCUSDT".to_string(), 50_000_000.0),
        ("ETHUSDT".to_string(), 20_000_000.0),
    ])
}

fn default_activity_window_hours() -> u64 {
    4
}

fn default_activity_calm_max() -> usize {
    2
}

fn default_activity_fragile_max() -> usize {
    5
}

fn default_alert_window_hours() -> u64 {
    4
}

fn default_regime_interval_seconds() -> u64 {
    900
}

fn default_stress_confirm_ticks() -> u32 {
    3
}

fn default_stress_exit_ticks() -> u32 {
    2
}

fn default_crowd_confirm_ticks() -> u32 {
    2
}

fn default_outbox_capacity() -> usize {
    2000
}

fn default_send_delay_ms() -> u64 {
    200
}

fn default_send_retry_limit() -> u32 {
    5
}

fn default_feed_stale_secs() -> u64 {
    180
}

fn default_loop_stale_secs() -> u64 {
    330
}

fn default_oi_poll_secs() -> u64 {
    60
}

fn default_oi_fresh_ttl_secs() -> u64 {
    900
}

fn default_oi_window_points() -> usize {
    12
}

// =============================================================================
// MonitorConfig
// =============================================================================

/// Top-level configuration for the Livermore engine.
///
/// Every field has a serde default so that older JSON files missing new fields
/// will still deserialise correctly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    // --- Universe ------------------------------------------------------------

    /// Symbols the monitor watches, in evaluation order.
    #[serde(default = "default_symbols")]
    pub symbols: Vec<String>,

    /// Chat ids that receive alerts. A blocked recipient is removed from the
    /// active set at runtime but stays here until the operator edits the file.
    #[serde(default)]
    pub recipients: Vec<i64>,

    // --- Evaluation cadence & windows ---------------------------------------

    /// Seconds between evaluation ticks.
    #[serde(default = "default_interval_seconds")]
    pub interval_seconds: u64,

    /// Horizon of the trade / liquidation / open-interest windows, seconds.
    #[serde(default = "default_window_seconds")]
    pub window_seconds: u64,

    // --- Scoring thresholds --------------------------------------------------

    /// Score at which a BUILDUP alert fires.
    #[serde(default = "default_early_alert_level")]
    pub early_alert_level: u32,

    /// Score at which a HARD alert fires (with direction and confidence).
    #[serde(default = "default_hard_alert_level")]
    pub hard_alert_level: u32,

    /// Absolute funding rate considered extreme.
    #[serde(default = "default_funding_extreme_threshold")]
    pub funding_extreme_threshold: f64,

    /// Absolute funding delta between observations considered a spike.
    #[serde(default = "default_funding_spike_threshold")]
    pub funding_spike_threshold: f64,

    /// Relative open-interest change over the window considered a spike.
    #[serde(default = "default_oi_spike_threshold")]
    pub oi_spike_threshold: f64,

    /// Per-symbol liquidation notional thresholds (USD). Symbols absent from
    /// the map fall back to [`MonitorConfig::default_liq_threshold`].
    #[serde(default = "default_liq_thresholds")]
    pub liq_thresholds: HashMap<String, f64>,

    /// Fallback liquidation threshold for symbols without an explicit entry.
    #[serde(default = "default_liq_threshold")]
    pub default_liq_threshold: f64,

    // --- Regime & activity ---------------------------------------------------

    /// Seconds between market-regime / activity-regime recomputations.
    #[serde(default = "default_regime_interval_seconds")]
    pub regime_interval_seconds: u64,

    /// Consecutive STRESS candidates required to commit STRESS.
    #[serde(default = "default_stress_confirm_ticks")]
    pub stress_confirm_ticks: u32,

    /// Consecutive non-STRESS candidates required to leave STRESS.
    #[serde(default = "default_stress_exit_ticks")]
    pub stress_exit_ticks: u32,

    /// Consecutive CROWD_IMBALANCE candidates required to commit it.
    #[serde(default = "default_crowd_confirm_ticks")]
    pub crowd_confirm_ticks: u32,

    /// Hours of alert history counted by the activity regime.
    #[serde(default = "default_activity_window_hours")]
    pub activity_window_hours: u64,

    /// Up to this many alerts in the activity window the market is CALM.
    #[serde(default = "default_activity_calm_max")]
    pub activity_calm_max: usize,

    /// Up to this many alerts the market is FRAGILE_CALM; beyond is STRESS.
    #[serde(default = "default_activity_fragile_max")]
    pub activity_fragile_max: usize,

    /// Hours of per-symbol alert history retained for buildup counts.
    #[serde(default = "default_alert_window_hours")]
    pub alert_window_hours: u64,

    // --- Alert delivery ------------------------------------------------------

    /// Maximum queued alerts; further enqueues are dropped.
    #[serde(default = "default_outbox_capacity")]
    pub outbox_capacity: usize,

    /// Pause between successful sends, milliseconds.
    #[serde(default = "default_send_delay_ms")]
    pub send_delay_ms: u64,

    /// Send attempts per alert before it is declared failed.
    #[serde(default = "default_send_retry_limit")]
    pub send_retry_limit: u32,

    // --- Watchdogs -----------------------------------------------------------

    /// Feed age beyond which the feed task is restarted.
    #[serde(default = "default_feed_stale_secs")]
    pub feed_stale_secs: u64,

    /// Evaluation-loop age beyond which a system warning is raised.
    #[serde(default = "default_loop_stale_secs")]
    pub loop_stale_secs: u64,

    // --- Open-interest polling ----------------------------------------------

    /// Seconds between open-interest REST polls.
    #[serde(default = "default_oi_poll_secs")]
    pub oi_poll_secs: u64,

    /// Maximum age of the last accepted OI sample before the window is
    /// considered stale and cleared.
    #[serde(default = "default_oi_fresh_ttl_secs")]
    pub oi_fresh_ttl_secs: u64,

    /// Number of history points requested from the OI endpoint.
    #[serde(default = "default_oi_window_points")]
    pub oi_window_points: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            symbols: default_symbols(),
            recipients: Vec::new(),
            interval_seconds: default_interval_seconds(),
            window_seconds: default_window_seconds(),
            early_alert_level: default_early_alert_level(),
            hard_alert_level: default_hard_alert_level(),
            funding_extreme_threshold: default_funding_extreme_threshold(),
            funding_spike_threshold: default_funding_spike_threshold(),
            oi_spike_threshold: default_oi_spike_threshold(),
            liq_thresholds: default_liq_thresholds(),
            default_liq_threshold: default_liq_threshold(),
            regime_interval_seconds: default_regime_interval_seconds(),
            stress_confirm_ticks: default_stress_confirm_ticks(),
            stress_exit_ticks: default_stress_exit_ticks(),
            crowd_confirm_ticks: default_crowd_confirm_ticks(),
            activity_window_hours: default_activity_window_hours(),
            activity_calm_max: default_activity_calm_max(),
            activity_fragile_max: default_activity_fragile_max(),
            alert_window_hours: default_alert_window_hours(),
            outbox_capacity: default_outbox_capacity(),
            send_delay_ms: default_send_delay_ms(),
            send_retry_limit: default_send_retry_limit(),
            feed_stale_secs: default_feed_stale_secs(),
            loop_stale_secs: default_loop_stale_secs(),
            oi_poll_secs: default_oi_poll_secs(),
            oi_fresh_ttl_secs: default_oi_fresh_ttl_secs(),
            oi_window_points: default_oi_window_points(),
        }
    }
}

impl MonitorConfig {
    /// Load configuration from a JSON file at `path`.
    ///
    /// If the file does not exist, returns an error so the caller can fall
    /// back to defaults with a warning.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read monitor config from {}", path.display()))?;

        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse monitor config from {}", path.display()))?;

        info!(
            path = %path.display(),
            symbols = ?config.symbols,
            interval_seconds = config.interval_seconds,
            "monitor config loaded"
        );

        Ok(config)
    }

    /// Liquidation notional threshold for `symbol`.
    pub fn liq_threshold(&self, symbol: &str) -> f64 {
        self.liq_thresholds
            .get(symbol)
            .copied()
            .unwrap_or(self.default_liq_threshold)
    }

    /// Apply the `LIVERMORE_SYMBOLS` environment override, if present.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(syms) = std::env::var("LIVERMORE_SYMBOLS") {
            let parsed: Vec<String> = syms
                .split(',')
                .map(|s| s.trim().to_uppercase())
                .filter(|s| !s.is_empty())
                .collect();
            if !parsed.is_empty() {
                self.symbols = parsed;
            }
        }
        if self.symbols.is_empty() {
            self.symbols = default_symbols();
        }
    }
}
