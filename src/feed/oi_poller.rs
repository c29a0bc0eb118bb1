// =============================================================================
// Open-Interest Poller — periodic REST snapshot of outstanding contracts
// =============================================================================
//
// Open interest has no push stream worth subscribing to at this cadence, so a
// poller fetches the recent history endpoint per symbol on a fixed interval
// and offers every returned point to the symbol's window (the window's
// monotonic-timestamp guard absorbs the overlap between polls, and the first
// poll warms the window with real history). A failed poll leaves the window
// untouched for that cycle; staleness then shows up through the window's
// freshness TTL, not through partial data.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde_json::{json, Value};
use tracing::debug;

use crate::engine::EngineState;
use crate::event_log::log_event;
use crate::feed::stream::{apply_event, FeedEvent};
use crate::types::now_secs;

const OI_HISTORY_URL: &str = "https://fapi.binance.com/futures/data/openInterestHist";
const OI_PERIOD: &str = "5m";

/// Fetches open-interest history from the venue REST API.
pub struct OiPoller {
    client: reqwest::Client,
}

impl OiPoller {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .context("failed to build HTTP client for OI poller")?;
        Ok(Self { client })
    }

    /// Fetch up to `limit` recent open-interest points for `symbol`, oldest
    /// first.
    pub async fn fetch_recent(&self, symbol: &str, limit: usize) -> Result<Vec<(f64, f64)>> {
        let limit = limit.clamp(1, 500).to_string();
        let resp = self
            .client
            .get(OI_HISTORY_URL)
            .query(&[
                ("symbol", symbol),
                ("period", OI_PERIOD),
                ("limit", limit.as_str()),
            ])
            .send()
            .await
            .with_context(|| format!("GET open interest history for {symbol}"))?;

        let status = resp.status();
        let body: Value = resp
            .json()
            .await
            .context("failed to parse open interest response")?;

        if !status.is_success() {
            anyhow::bail!("open interest API returned {status}: {body}");
        }

        Ok(parse_history_points(&body))
    }
}

/// Extract `(source_ts_secs, value)` points from the history response, in
/// response order (oldest first). The venue returns numbers as strings and
/// timestamps in milliseconds; rows missing either field are skipped.
pub fn parse_history_points(body: &Value) -> Vec<(f64, f64)> {
    let Some(rows) = body.as_array() else {
        return Vec::new();
    };
    rows.iter()
        .filter_map(|row| {
            let value: f64 = row["sumOpenInterest"].as_str()?.parse().ok()?;
            let ts = row["timestamp"].as_f64().map(|ms| ms / 1000.0)?;
            Some((ts, value))
        })
        .collect()
}

/// Poll open interest for every configured symbol until shutdown.
pub async fn run_oi_poller(engine: Arc<EngineState>, poller: OiPoller) {
    let config = engine.config();
    let mut interval = tokio::time::interval(Duration::from_secs(config.oi_poll_secs.max(1)));

    loop {
        interval.tick().await;
        if engine.is_shutting_down() {
            return;
        }

        for symbol in engine.symbols() {
            match poller.fetch_recent(symbol, config.oi_window_points).await {
                Ok(points) if points.is_empty() => {
                    debug!(symbol = %symbol, "open interest history empty");
                }
                Ok(points) => {
                    debug!(symbol = %symbol, count = points.len(), "open interest polled");
                    for (source_ts, value) in points {
                        apply_event(
                            &engine,
                            FeedEvent::OiSample {
                                symbol: symbol.clone(),
                                value,
                                source_ts,
                            },
                            now_secs(),
                        );
                    }
                }
                Err(e) => {
                    log_event(
                        "oi_poll_error",
                        json!({ "symbol": symbol, "error": e.to_string() }),
                    );
                }
            }
        }
    }
}
