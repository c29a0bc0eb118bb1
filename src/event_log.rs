// =============================================================================
// Structured event records
// =============================================================================
//
// Domain events (risk_eval, alert_sent, queue_drop, market_regime, ...) are
// emitted as structured tracing records through one helper so every call site
// produces the same shape and an external sink can be attached in one place.

use chrono::Utc;
use serde_json::Value;
use tracing::info;

/// Emit a domain event with a JSON payload.
pub fn log_event(kind: &str, payload: Value) {
    let symbol = payload
        .get("symbol")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string();

    info!(
        target: "livermore::event",
        event = kind,
        symbol = %symbol,
        at = %Utc::now().to_rfc3339(),
        payload = %payload,
        "event"
    );
}
