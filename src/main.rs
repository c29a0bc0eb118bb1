// =============================================================================
// Livermore — Market Risk Monitor — Main Entry Point
// =============================================================================
//
// Watches perpetual-futures symbols for crowd imbalance, liquidation
// cascades, funding extremes and open-interest swings, and pushes throttled
// alerts to chat recipients. It observes risk; it never trades.
// =============================================================================

// ── Module declarations ──────────────────────────────────────────────────────
mod alerts;
mod divergence;
mod engine;
mod event_log;
mod feed;
mod health;
mod market_data;
mod monitor_config;
mod quality;
mod regime;
mod risk;
mod types;
mod watchdog;

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::alerts::{AlertWorker, Outbox, TelegramTransport};
use crate::engine::EngineState;
use crate::feed::stream::run_market_feed;
use crate::feed::{FeedHandle, OiPoller};
use crate::monitor_config::MonitorConfig;

const CONFIG_PATH: &str = "monitor_config.json";

/// Grace period for flushing already-enqueued alerts on shutdown.
const FLUSH_DEADLINE: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("╔══════════════════════════════════════════════════════════╗");
    info!("║        Livermore Risk Monitor — Starting Up              ║");
    info!("╚══════════════════════════════════════════════════════════╝");

    let mut config = MonitorConfig::load(CONFIG_PATH).unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load config, using defaults");
        MonitorConfig::default()
    });
    config.apply_env_overrides();

    info!(
        symbols = ?config.symbols,
        interval_seconds = config.interval_seconds,
        recipients = config.recipients.len(),
        "Configured universe"
    );

    // ── 2. Health endpoint (dedicated thread) ────────────────────────────
    let health_addr =
        std::env::var("LIVERMORE_HEALTH_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".into());
    let _health = health::spawn_health_server(health_addr);

    // ── 3. Engine state & outbox ─────────────────────────────────────────
    let (outbox, outbox_rx) = Outbox::new(config.outbox_capacity);
    let engine = Arc::new(EngineState::new(config.clone(), outbox));

    // ── 4. Alert worker ──────────────────────────────────────────────────
    let bot_token = std::env::var("BOT_TOKEN").unwrap_or_default();
    if bot_token.is_empty() {
        warn!("BOT_TOKEN is not set; alert delivery will fail until it is");
    }
    let transport = Arc::new(TelegramTransport::new(bot_token)?);
    let worker = AlertWorker::new(
        transport,
        engine.recipients.clone(),
        engine.history.clone(),
        Duration::from_millis(config.send_delay_ms),
        config.send_retry_limit,
    );
    let worker_handle = tokio::spawn(worker.run(outbox_rx));

    // ── 5. Market feed ───────────────────────────────────────────────────
    let feed = Arc::new(FeedHandle::new());
    feed.set(tokio::spawn(run_market_feed(engine.clone())));
    info!(count = engine.symbols().len(), "Market feed launched");

    // ── 6. Open-interest poller ──────────────────────────────────────────
    let poller = OiPoller::new()?;
    let poller_handle = tokio::spawn(feed::oi_poller::run_oi_poller(engine.clone(), poller));

    // ── 7. Evaluation loop ───────────────────────────────────────────────
    let eval_handle = tokio::spawn(engine::run_evaluation_loop(engine.clone()));

    // ── 8. Watchdogs ─────────────────────────────────────────────────────
    let feed_wd_handle = tokio::spawn(watchdog::run_feed_watchdog(
        engine.clone(),
        feed.clone(),
    ));
    let loop_wd_handle = tokio::spawn(watchdog::run_loop_watchdog(engine.clone()));

    info!("All subsystems running. Press Ctrl+C to stop.");

    // ── 9. Graceful shutdown ─────────────────────────────────────────────
    tokio::signal::ctrl_c().await?;
    warn!("Shutdown signal received — stopping gracefully");

    engine.request_shutdown();

    feed.stop().await;
    for handle in [eval_handle, poller_handle, feed_wd_handle, loop_wd_handle] {
        handle.abort();
        let _ = handle.await;
    }

    // Dropping the last outbox sender lets the worker drain what is already
    // queued and exit; give it a bounded moment to do so.
    drop(engine);
    if tokio::time::timeout(FLUSH_DEADLINE, worker_handle).await.is_err() {
        warn!("outbox flush deadline exceeded, exiting with undelivered alerts");
    }

    info!("Livermore risk monitor shut down complete.");
    Ok(())
}
