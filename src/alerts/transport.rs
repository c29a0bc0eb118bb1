// =============================================================================
// Alert Transport — delivery seam for outgoing messages
// =============================================================================
//
// The worker drives any `AlertTransport`. Failures are classified into three
// explicit variants so the retry policy never inspects transport internals:
//
//   Blocked      — the recipient refuses messages; remove and move on.
//   RateLimited  — the service asked us to wait; honor the advisory delay.
//   Transient    — anything else worth retrying with backoff.

use std::future::Future;
use std::time::Duration;

use anyhow::{Context, Result};
use serde_json::{json, Value};
use tracing::debug;

/// Classified delivery failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendError {
    Blocked,
    RateLimited { retry_after: Duration },
    Transient(String),
}

impl std::fmt::Display for SendError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Blocked => write!(f, "recipient blocked the bot"),
            Self::RateLimited { retry_after } => {
                write!(f, "rate limited, retry after {:.1}s", retry_after.as_secs_f64())
            }
            Self::Transient(msg) => write!(f, "transient send failure: {msg}"),
        }
    }
}

impl std::error::Error for SendError {}

/// Anything that can deliver a text message to a chat.
pub trait AlertTransport: Send + Sync + 'static {
    fn send_message(
        &self,
        chat_id: i64,
        text: &str,
    ) -> impl Future<Output = Result<(), SendError>> + Send;
}

// =============================================================================
// Telegram Bot API transport
// =============================================================================

const TELEGRAM_API_BASE: &str = "https://api.telegram.org";

/// Delivery over the Telegram Bot API `sendMessage` method.
pub struct TelegramTransport {
    client: reqwest::Client,
    token: String,
}

impl TelegramTransport {
    pub fn new(token: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .context("failed to build HTTP client for Telegram transport")?;
        Ok(Self {
            client,
            token: token.into(),
        })
    }

    async fn post_send(&self, chat_id: i64, text: &str) -> Result<(), SendError> {
        let url = format!("{TELEGRAM_API_BASE}/bot{}/sendMessage", self.token);

        let resp = self
            .client
            .post(&url)
            .json(&json!({ "chat_id": chat_id, "text": text }))
            .send()
            .await
            .map_err(|e| SendError::Transient(e.to_string()))?;

        let status = resp.status().as_u16();
        let body: Value = resp
            .json()
            .await
            .map_err(|e| SendError::Transient(e.to_string()))?;

        if body.get("ok").and_then(Value::as_bool) == Some(true) {
            debug!(chat_id, "message delivered");
            return Ok(());
        }

        Err(classify_failure(status, &body))
    }
}

impl AlertTransport for TelegramTransport {
    fn send_message(
        &self,
        chat_id: i64,
        text: &str,
    ) -> impl Future<Output = Result<(), SendError>> + Send {
        self.post_send(chat_id, text)
    }
}

/// Map a Bot API error response onto a [`SendError`].
fn classify_failure(status: u16, body: &Value) -> SendError {
    let code = body
        .get("error_code")
        .and_then(Value::as_u64)
        .unwrap_or(status as u64);

    match code {
        403 => SendError::Blocked,
        429 => {
            let retry_after = body
                .get("parameters")
                .and_then(|p| p.get("retry_after"))
                .and_then(Value::as_u64)
                .unwrap_or(1);
            SendError::RateLimited {
                retry_after: Duration::from_secs(retry_after),
            }
        }
        _ => {
            let description = body
                .get("description")
                .and_then(Value::as_str)
                .unwrap_or("unknown error");
            SendError::Transient(format!("{code}: {description}"))
        }
    }
}
