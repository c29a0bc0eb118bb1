// =============================================================================
// Health Endpoint — liveness probe on a dedicated thread
// =============================================================================
//
// Hosting platforms probe the process over plain HTTP. The endpoint runs on
// its own OS thread with a current-thread runtime so a saturated main runtime
// can never make the probe flap.

use axum::routing::get;
use axum::Router;
use tracing::info;

/// Spawn the health server thread. The thread runs for the life of the
/// process; the join handle is returned for completeness and normally
/// ignored.
pub fn spawn_health_server(addr: String) -> std::thread::JoinHandle<()> {
    std::thread::Builder::new()
        .name("health-http".to_string())
        .spawn(move || {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .expect("failed to build health server runtime");

            rt.block_on(async move {
                let app = Router::new().route("/healthz", get(|| async { "OK" }));
                let listener = tokio::net::TcpListener::bind(&addr)
                    .await
                    .expect("failed to bind health endpoint");
                info!(addr = %addr, "health endpoint listening");
                axum::serve(listener, app)
                    .await
                    .expect("health server failed");
            });
        })
        .expect("failed to spawn health server thread")
}
