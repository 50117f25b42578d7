//! Status page server
//!
//! Renders the observability registry's snapshot: plain text at `/` and JSON
//! at `/stats`. Read-only, outside the relay's data path.

use std::fmt::Write as _;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{info, instrument};

use crate::error::{CarouselError, Result};
use crate::stats::{ActiveRequests, StatsSnapshot};

/// Status page server
pub struct StatusServer {
    listener: TcpListener,
    stats: Arc<ActiveRequests>,
}

impl StatusServer {
    /// Bind the status listener
    pub async fn bind(addr: &str, stats: Arc<ActiveRequests>) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        info!("Status server listening on {}", listener.local_addr()?);
        Ok(Self { listener, stats })
    }

    /// The address actually bound, useful with an ephemeral port
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Run the status server
    #[instrument(skip(self, shutdown))]
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let router = Router::new()
            .route("/", get(render_text))
            .route("/stats", get(render_json))
            .with_state(self.stats);

        axum::serve(self.listener, router)
            .with_graceful_shutdown(async move {
                let _ = shutdown.changed().await;
            })
            .await
            .map_err(|e| CarouselError::Internal(e.to_string()))?;

        info!("Status server shut down");
        Ok(())
    }
}

async fn render_text(State(stats): State<Arc<ActiveRequests>>) -> String {
    render_snapshot(&stats.snapshot())
}

async fn render_json(State(stats): State<Arc<ActiveRequests>>) -> Json<StatsSnapshot> {
    Json(stats.snapshot())
}

fn render_snapshot(snap: &StatsSnapshot) -> String {
    let mut out = format!(
        "clientDirections: {}\nupstreamDirections: {}\nactiveChecks: {}\n",
        snap.client_directions, snap.upstream_directions, snap.active_checks
    );

    for req in &snap.requests {
        let _ = writeln!(
            out,
            "slot {}: {} {} -> {} [client:{} upstream:{}] {}ms",
            req.slot,
            req.client_addr,
            req.url,
            req.upstream_addr,
            req.client_active,
            req.upstream_active,
            req.elapsed_ms
        );
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_snapshot_lists_gauges_and_requests() {
        let stats = ActiveRequests::new();
        let slot = stats.allocate("127.0.0.1:55000".to_string());
        stats.set_url(slot, "http://example.com/");
        stats.set_upstream(slot, "10.0.0.1:3128");
        stats.start_upstream(slot);

        let text = render_snapshot(&stats.snapshot());
        assert!(text.contains("clientDirections: 1"));
        assert!(text.contains("upstreamDirections: 1"));
        assert!(text.contains("activeChecks: 0"));
        assert!(text.contains("http://example.com/ -> 10.0.0.1:3128"));
    }

    #[tokio::test]
    async fn test_json_snapshot_serializes() {
        let stats = Arc::new(ActiveRequests::new());
        let slot = stats.allocate("127.0.0.1:55001".to_string());
        stats.set_url(slot, "http://example.com/");

        let Json(snap) = render_json(State(stats)).await;
        let value = serde_json::to_value(&snap).unwrap();
        assert_eq!(value["client_directions"], 1);
        assert_eq!(value["requests"][0]["url"], "http://example.com/");
    }
}
