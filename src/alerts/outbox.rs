// =============================================================================
// Alert Outbox — bounded FIFO between the evaluator and the send worker
// =============================================================================
//
// The evaluation loop must never block on delivery: enqueueing is a
// `try_send` and a full queue drops the new item with a logged `queue_drop`.
// Items already queued keep their FIFO order and are still delivered.

use serde::Serialize;
use serde_json::json;
use tokio::sync::mpsc;
use tracing::warn;

use crate::event_log::log_event;
use crate::types::{AlertKind, Direction, RiskDriver};

/// A risk alert addressed to one recipient.
#[derive(Debug, Clone, Serialize)]
pub struct AlertEvent {
    /// Deterministic identity: `{symbol}:{ts}:{kind}` (+ `:{seq}` for
    /// divergences). Used for dedup across retries and replays.
    pub event_id: String,
    pub symbol: String,
    pub kind: AlertKind,
    pub risk: u32,
    pub direction: Direction,
    pub confidence: u32,
    pub driver: RiskDriver,
    pub price: Option<f64>,
    pub text: String,
    pub chat_id: i64,
    pub ts: i64,
}

/// Anything the worker can deliver: a risk alert or a plain notice
/// (system warnings carry no event identity and no history record).
#[derive(Debug, Clone)]
pub enum OutboundMessage {
    Alert(AlertEvent),
    Notice { chat_id: i64, text: String },
}

impl OutboundMessage {
    pub fn chat_id(&self) -> i64 {
        match self {
            Self::Alert(a) => a.chat_id,
            Self::Notice { chat_id, .. } => *chat_id,
        }
    }

    pub fn text(&self) -> &str {
        match self {
            Self::Alert(a) => &a.text,
            Self::Notice { text, .. } => text,
        }
    }
}

/// Producer half of the bounded outbox.
#[derive(Clone)]
pub struct Outbox {
    tx: mpsc::Sender<OutboundMessage>,
}

impl Outbox {
    /// Create an outbox with the given capacity, returning the producer and
    /// the receiver the worker drains.
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<OutboundMessage>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    /// Enqueue without blocking. Returns `false` (after logging `queue_drop`)
    /// when the queue is full or the worker is gone.
    pub fn enqueue(&self, message: OutboundMessage) -> bool {
        match self.tx.try_send(message) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(dropped)) => {
                warn!(chat_id = dropped.chat_id(), "outbox full, message dropped");
                log_event(
                    "queue_drop",
                    json!({
                        "chat_id": dropped.chat_id(),
                        "reason": "full",
                    }),
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(dropped)) => {
                warn!(chat_id = dropped.chat_id(), "outbox closed, message dropped");
                log_event(
                    "queue_drop",
                    json!({
                        "chat_id": dropped.chat_id(),
                        "reason": "closed",
                    }),
                );
                false
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

    fn notice(n: usize) -> OutboundMessage {
        OutboundMessage::Notice {
            chat_id: 1,
            text: format!("message {n}"),
        }
    }

    #[tokio::test]
    async fn enqueue_over_capacity_drops_newest_and_keeps_fifo() {
        let (outbox, mut rx) = Outbox::new(2);
        assert!(outbox.enqueue(notice(1)));
        assert!(outbox.enqueue(notice(2)));
        // Queue full: the third message is dropped.
        assert!(!outbox.enqueue(notice(3)));

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!(first.text(), "message 1");
        assert_eq!(second.text(), "message 2");
    }

    #[tokio::test]
    async fn enqueue_after_receiver_dropped_reports_false() {
        let (outbox, rx) = Outbox::new(2);
        drop(rx);
        assert!(!outbox.enqueue(notice(1)));
    }
}
