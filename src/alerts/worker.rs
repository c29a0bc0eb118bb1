// =============================================================================
// Alert Worker — drains the outbox and drives each item to Done or Failed
// =============================================================================
//
// One worker task owns the receiving half of the outbox and delivers items
// strictly in FIFO order. Each item moves through a small state machine:
//
//   Pending → Sending → Done
//                     ↘ RateLimited(until) → Sending
//                     ↘ Backoff(n)         → Sending
//                     ↘ Failed
//
// Policy per failure class:
//   - Blocked: remove the recipient from the active set, drop the item.
//   - RateLimited: honor the advisory delay, then try again. Advisory waits
//     do not consume the retry budget.
//   - Transient: exponential backoff capped at 30 s, up to the retry limit,
//     then emit `alert_fail`.
//
// The first successful delivery of an alert records its event id into the
// alert history; a short pause follows every successful send.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde_json::json;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::alerts::history::AlertHistory;
use crate::alerts::outbox::OutboundMessage;
use crate::alerts::transport::{AlertTransport, SendError};
use crate::event_log::log_event;

/// Ceiling for transient-failure backoff.
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Per-item delivery state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SendPhase {
    Pending,
    Sending,
    RateLimited(Duration),
    Backoff(u32),
    Done,
    Failed,
}

pub struct AlertWorker<T: AlertTransport> {
    transport: Arc<T>,
    recipients: Arc<RwLock<HashSet<i64>>>,
    history: Arc<AlertHistory>,
    send_delay: Duration,
    retry_limit: u32,
}

impl<T: AlertTransport> AlertWorker<T> {
    pub fn new(
        transport: Arc<T>,
        recipients: Arc<RwLock<HashSet<i64>>>,
        history: Arc<AlertHistory>,
        send_delay: Duration,
        retry_limit: u32,
    ) -> Self {
        Self {
            transport,
            recipients,
            history,
            send_delay,
            retry_limit: retry_limit.max(1),
        }
    }

    /// Drain the outbox until the sender side is dropped, then return. Items
    /// already in the queue at shutdown are still delivered, which is what
    /// makes the main task's bounded flush work.
    pub async fn run(self, mut rx: mpsc::Receiver<OutboundMessage>) {
        info!("alert worker started");
        while let Some(message) = rx.recv().await {
            self.deliver(message).await;
        }
        info!("alert worker drained and stopped");
    }

    async fn deliver(&self, message: OutboundMessage) {
        let chat_id = message.chat_id();
        let mut phase = SendPhase::Pending;
        // Only transient failures count against the retry limit; an advisory
        // rate-limit wait is the service pacing us, not the send failing.
        let mut attempts: u32 = 0;
        let mut blocked = false;

        loop {
            phase = match phase {
                SendPhase::Pending => SendPhase::Sending,

                SendPhase::Sending => {
                    match self.transport.send_message(chat_id, message.text()).await {
                        Ok(()) => {
                            self.note_delivered(&message);
                            SendPhase::Done
                        }
                        Err(SendError::Blocked) => {
                            blocked = true;
                            self.recipients.write().remove(&chat_id);
                            warn!(chat_id, "recipient blocked the bot, removed from active set");
                            SendPhase::Failed
                        }
                        Err(SendError::RateLimited { retry_after }) => {
                            debug!(
                                chat_id,
                                retry_after_secs = retry_after.as_secs_f64(),
                                "rate limited"
                            );
                            SendPhase::RateLimited(retry_after)
                        }
                        Err(SendError::Transient(reason)) => {
                            attempts += 1;
                            if attempts >= self.retry_limit {
                                SendPhase::Failed
                            } else {
                                debug!(chat_id, attempt = attempts, %reason, "send failed, backing off");
                                SendPhase::Backoff(attempts)
                            }
                        }
                    }
                }

                SendPhase::RateLimited(delay) => {
                    tokio::time::sleep(delay).await;
                    SendPhase::Sending
                }

                SendPhase::Backoff(n) => {
                    tokio::time::sleep(backoff_delay(n)).await;
                    SendPhase::Sending
                }

                SendPhase::Done => {
                    tokio::time::sleep(self.send_delay).await;
                    return;
                }

                SendPhase::Failed => {
                    if !blocked {
                        self.note_failed(&message, attempts);
                    }
                    return;
                }
            };
        }
    }

    fn note_delivered(&self, message: &OutboundMessage) {
        if let OutboundMessage::Alert(alert) = message {
            let first = self
                .history
                .record_delivery(&alert.symbol, &alert.event_id, alert.ts as f64);
            if first {
                log_event(
                    "alert_sent",
                    json!({
                        "ts": alert.ts,
                        "event_id": alert.event_id,
                        "symbol": alert.symbol,
                        "risk": alert.risk,
                        "direction": alert.direction.to_string(),
                        "confidence": alert.confidence,
                        "type": alert.kind.to_string(),
                        "risk_driver": alert.driver.to_string(),
                        "price": alert.price,
                        "chat_id": alert.chat_id,
                    }),
                );
            }
        }
    }

    fn note_failed(&self, message: &OutboundMessage, attempts: u32) {
        warn!(chat_id = message.chat_id(), attempts, "message delivery failed");
        if let OutboundMessage::Alert(alert) = message {
            log_event(
                "alert_fail",
                json!({
                    "ts": alert.ts,
                    "event_id": alert.event_id,
                    "symbol": alert.symbol,
                    "type": alert.kind.to_string(),
                    "chat_id": alert.chat_id,
                    "attempts": attempts,
                }),
            );
        }
    }
}

/// Exponential backoff for the n-th failed attempt, capped at [`MAX_BACKOFF`].
fn backoff_delay(attempt: u32) -> Duration {
    let secs = 2u64.saturating_pow(attempt.min(16)).min(MAX_BACKOFF.as_secs());
    Duration::from_secs(secs)
}
