// =============================================================================
// Market Feed — venue WebSocket reader
// =============================================================================
//
// Subscribes to the combined futures stream (mark price, aggregated trades,
// forced liquidations) for every configured symbol and routes parsed events
// into the per-symbol aggregators.
//
// The reader runs as an explicit state machine:
//
//   Connecting → Reading → Backoff(delay) → Connecting → ...
//                        ↘ ShuttingDown
//
// Reconnection uses capped exponential backoff with jitter. Parse failures
// are logged and skipped; they never tear the connection down.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use rand::Rng;
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::engine::EngineState;
use crate::event_log::log_event;
use crate::types::{now_secs, Side};

const STREAM_BASE: &str = "wss://fstream.binance.com/stream";

/// Client-side keepalive ping cadence.
const PING_INTERVAL: Duration = Duration::from_secs(20);

/// Ceiling for the reconnect backoff base.
const MAX_RECONNECT_DELAY: Duration = Duration::from_secs(30);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

// =============================================================================
// Events
// =============================================================================

/// A typed event from the venue, tagged by symbol.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedEvent {
    MarkPrice {
        symbol: String,
        funding_rate: f64,
        mark_price: f64,
    },
    Trade {
        symbol: String,
        qty: f64,
        side: Side,
    },
    Liquidation {
        symbol: String,
        qty: f64,
        price: f64,
        side: Side,
    },
    OiSample {
        symbol: String,
        value: f64,
        source_ts: f64,
    },
}

impl FeedEvent {
    pub fn symbol(&self) -> &str {
        match self {
            Self::MarkPrice { symbol, .. }
            | Self::Trade { symbol, .. }
            | Self::Liquidation { symbol, .. }
            | Self::OiSample { symbol, .. } => symbol,
        }
    }
}

/// Route one event into its symbol's aggregator. Events for symbols outside
/// the configured universe are ignored.
pub fn apply_event(engine: &EngineState, event: FeedEvent, now: f64) {
    let Some(agg) = engine.aggregator(event.symbol()) else {
        return;
    };
    match event {
        FeedEvent::MarkPrice {
            funding_rate,
            mark_price,
            ..
        } => agg.note_mark_price(funding_rate, mark_price, now),
        FeedEvent::Trade { qty, side, .. } => agg.note_trade(qty, side, now),
        FeedEvent::Liquidation {
            qty, price, side, ..
        } => agg.note_liquidation(qty, price, side, now),
        FeedEvent::OiSample {
            value, source_ts, ..
        } => {
            agg.offer_oi(source_ts, value, now);
        }
    }
}

// =============================================================================
// Parsing
// =============================================================================

/// Combined-stream URL for the configured symbols.
pub fn stream_url(symbols: &[String]) -> String {
    let streams: Vec<String> = symbols
        .iter()
        .map(|s| s.to_lowercase())
        .flat_map(|s| {
            [
                format!("{s}@markPrice@1s"),
                format!("{s}@aggTrade"),
                format!("{s}@forceOrder"),
            ]
        })
        .collect();
    format!("{STREAM_BASE}?streams={}", streams.join("/"))
}

fn field_f64(value: &Value, key: &str) -> Result<f64> {
    value[key]
        .as_str()
        .with_context(|| format!("missing field {key}"))?
        .parse()
        .with_context(|| format!("failed to parse field {key}"))
}

/// Parse one combined-stream frame into a [`FeedEvent`].
///
/// Returns `Ok(None)` for frames that carry no market payload (subscription
/// acks, unknown streams).
pub fn parse_stream_message(text: &str) -> Result<Option<FeedEvent>> {
    let root: Value = serde_json::from_str(text).context("failed to parse stream JSON")?;

    let Some(stream) = root["stream"].as_str() else {
        return Ok(None);
    };
    let data = &root["data"];

    if stream.contains("markPrice") {
        let symbol = data["s"]
            .as_str()
            .context("missing field s")?
            .to_uppercase();
        let funding_rate = field_f64(data, "r")?;
        let mark_price = field_f64(data, "p")?;
        return Ok(Some(FeedEvent::MarkPrice {
            symbol,
            funding_rate,
            mark_price,
        }));
    }

    if stream.contains("aggTrade") {
        let symbol = data["s"]
            .as_str()
            .context("missing field s")?
            .to_uppercase();
        let qty = field_f64(data, "q")?;
        let is_buyer_maker = data["m"].as_bool().context("missing field m")?;
        // Buyer is maker => the taker sold.
        let side = if is_buyer_maker { Side::Short } else { Side::Long };
        return Ok(Some(FeedEvent::Trade { symbol, qty, side }));
    }

    if stream.contains("forceOrder") {
        let order = &data["o"];
        let symbol = order["s"]
            .as_str()
            .context("missing field o.s")?
            .to_uppercase();
        let qty = field_f64(order, "q")?;
        let price = field_f64(order, "p")?;
        let order_side = order["S"].as_str().context("missing field o.S")?;
        // A forced SELL closes a long position; a forced BUY closes a short.
        let side = if order_side.eq_ignore_ascii_case("SELL") {
            Side::Long
        } else {
            Side::Short
        };
        return Ok(Some(FeedEvent::Liquidation {
            symbol,
            qty,
            price,
            side,
        }));
    }

    Ok(None)
}

// =============================================================================
// Reader state machine
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FeedPhase {
    Connecting,
    Reading,
    Backoff(Duration),
    ShuttingDown,
}

enum SessionEnd {
    Disconnected,
    Shutdown,
}

/// Backoff before the n-th reconnect attempt: capped exponential base plus up
/// to 50% uniform jitter.
fn reconnect_delay(failures: u32) -> Duration {
    let base = Duration::from_secs(2u64.saturating_pow(failures.saturating_sub(1).min(8)))
        .min(MAX_RECONNECT_DELAY);
    let jitter = base.mul_f64(rand::thread_rng().gen_range(0.0..0.5));
    base + jitter
}

/// Run the feed until shutdown. Intended to be spawned; the feed watchdog may
/// abort and respawn it through [`FeedHandle`].
pub async fn run_market_feed(engine: Arc<EngineState>) {
    let url = stream_url(engine.symbols());
    let mut socket: Option<WsStream> = None;
    let mut failures: u32 = 0;
    let mut phase = FeedPhase::Connecting;

    loop {
        if engine.is_shutting_down() {
            phase = FeedPhase::ShuttingDown;
        }

        phase = match phase {
            FeedPhase::Connecting => {
                debug!(url = %url, "connecting to market feed");
                match connect_async(url.as_str()).await {
                    Ok((ws, _response)) => {
                        info!(symbols = engine.symbols().len(), "market feed connected");
                        socket = Some(ws);
                        failures = 0;
                        FeedPhase::Reading
                    }
                    Err(e) => {
                        failures += 1;
                        warn!(error = %e, failures, "market feed connect failed");
                        log_event(
                            "feed_error",
                            json!({ "kind": "connect", "error": e.to_string() }),
                        );
                        FeedPhase::Backoff(reconnect_delay(failures))
                    }
                }
            }

            FeedPhase::Reading => match socket.take() {
                Some(ws) => match read_session(ws, &engine).await {
                    Ok(SessionEnd::Shutdown) => FeedPhase::ShuttingDown,
                    Ok(SessionEnd::Disconnected) => {
                        failures += 1;
                        warn!("market feed stream ended");
                        FeedPhase::Backoff(reconnect_delay(failures))
                    }
                    Err(e) => {
                        failures += 1;
                        warn!(error = %e, "market feed read error");
                        log_event(
                            "feed_error",
                            json!({ "kind": "read", "error": e.to_string() }),
                        );
                        FeedPhase::Backoff(reconnect_delay(failures))
                    }
                },
                None => FeedPhase::Connecting,
            },

            FeedPhase::Backoff(delay) => {
                debug!(delay_secs = delay.as_secs_f64(), "market feed backing off");
                tokio::time::sleep(delay).await;
                FeedPhase::Connecting
            }

            FeedPhase::ShuttingDown => {
                info!("market feed shutting down");
                return;
            }
        };
    }
}

/// Pump one connected socket until it disconnects or shutdown is requested.
async fn read_session(ws: WsStream, engine: &EngineState) -> Result<SessionEnd> {
    let (mut write, mut read) = ws.split();
    let mut ping = tokio::time::interval(PING_INTERVAL);
    ping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    ping.reset();

    loop {
        if engine.is_shutting_down() {
            return Ok(SessionEnd::Shutdown);
        }

        tokio::select! {
            _ = ping.tick() => {
                write
                    .send(Message::Ping(Vec::new()))
                    .await
                    .context("failed to send keepalive ping")?;
            }
            msg = read.next() => match msg {
                Some(Ok(Message::Text(text))) => match parse_stream_message(&text) {
                    Ok(Some(event)) => apply_event(engine, event, now_secs()),
                    Ok(None) => {}
                    Err(e) => {
                        warn!(error = %e, "failed to parse feed message");
                        log_event(
                            "feed_error",
                            json!({ "kind": "parse", "error": e.to_string() }),
                        );
                    }
                },
                Some(Ok(Message::Ping(payload))) => {
                    write
                        .send(Message::Pong(payload))
                        .await
                        .context("failed to answer ping")?;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(e).context("feed read failed"),
                None => return Ok(SessionEnd::Disconnected),
            },
        }
    }
}

// =============================================================================
// FeedHandle — restart capability
// =============================================================================

/// Owns the feed task's join handle so the watchdog can restart the feed
/// without reaching into the reader.
#[derive(Default)]
pub struct FeedHandle {
    task: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl FeedHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a freshly spawned feed task.
    pub fn set(&self, handle: JoinHandle<()>) {
        *self.task.lock() = Some(handle);
    }

    /// Abort the current feed task (if any) and spawn a replacement.
    /// Awaiting the aborted task is silent; abort is idempotent.
    pub async fn restart(&self, engine: Arc<EngineState>) {
        let old = self.task.lock().take();
        if let Some(handle) = old {
            handle.abort();
            let _ = handle.await;
        }
        self.set(tokio::spawn(run_market_feed(engine)));
    }

    /// Abort the feed task without replacement (process shutdown).
    pub async fn stop(&self) {
        let old = self.task.lock().take();
        if let Some(handle) = old {
            handle.abort();
            let _ = handle.await;
        }
    }
}
