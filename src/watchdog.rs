// =============================================================================
// Watchdogs — feed staleness and evaluation-loop staleness
// =============================================================================
//
// Two independent supervision loops:
//
//   - the FEED watchdog checks the freshest socket event across all symbols
//     and restarts the feed task (through its capability handle) when the
//     feed has gone quiet for too long;
//   - the LOOP watchdog checks when the last risk evaluation completed and
//     raises a system warning — logged and sent to recipients once per stall
//     episode — when the loop has stopped making progress.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tracing::warn;

use crate::alerts::outbox::OutboundMessage;
use crate::engine::EngineState;
use crate::event_log::log_event;
use crate::feed::FeedHandle;
use crate::types::now_secs;

const FEED_CHECK_INTERVAL: Duration = Duration::from_secs(60);
const LOOP_CHECK_INTERVAL: Duration = Duration::from_secs(120);

/// Restart the feed when its freshest event is older than the configured TTL.
pub async fn run_feed_watchdog(engine: Arc<EngineState>, feed: Arc<FeedHandle>) {
    let mut interval = tokio::time::interval(FEED_CHECK_INTERVAL);

    loop {
        interval.tick().await;
        if engine.is_shutting_down() {
            return;
        }

        // Nothing ever arrived: the reader is still in its first connect
        // cycle, which has its own backoff.
        let Some(freshest) = engine.socket_freshest_update() else {
            continue;
        };

        let age = now_secs() - freshest;
        let stale_after = engine.config().feed_stale_secs as f64;

        if age > stale_after {
            warn!(
                age_secs = age as u64,
                stale_after_secs = stale_after as u64,
                "feed stale, restarting feed task"
            );
            log_event(
                "feed_restart",
                json!({ "age_secs": age as u64, "stale_after_secs": stale_after as u64 }),
            );
            feed.restart(engine.clone()).await;
        }
    }
}

/// Warn when the evaluation loop stops producing risk evaluations.
pub async fn run_loop_watchdog(engine: Arc<EngineState>) {
    let mut interval = tokio::time::interval(LOOP_CHECK_INTERVAL);
    let mut warned_this_stall = false;

    loop {
        interval.tick().await;
        if engine.is_shutting_down() {
            return;
        }

        // The loop has not produced anything yet — startup, not a stall.
        let Some(last_eval) = engine.last_risk_eval_ts() else {
            continue;
        };

        let age = now_secs() - last_eval as f64;
        let stale_after = engine.config().loop_stale_secs as f64;

        if age > stale_after {
            if !warned_this_stall {
                warned_this_stall = true;
                warn!(age_secs = age as u64, "risk evaluation loop stalled");
                log_event(
                    "system_warning",
                    json!({
                        "type": "RISK_LOOP_STALL",
                        "last_risk_eval_sec_ago": age as u64,
                    }),
                );

                let recipients: Vec<i64> =
                    engine.recipients.read().iter().copied().collect();
                for chat_id in recipients {
                    engine.outbox().enqueue(OutboundMessage::Notice {
                        chat_id,
                        text: "⚠️ System warning: risk loop stalled. Data may be outdated."
                            .to_string(),
                    });
                }
            }
        } else {
            // Loop recovered; arm the warning again.
            warned_this_stall = false;
        }
    }
}
