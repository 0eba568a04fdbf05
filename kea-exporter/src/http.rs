//! Scrape endpoint.
//!
//! Serves the registry in the Prometheus text format on the configured path,
//! plus `/health` (process is up) and `/ready` (an update cycle completed).

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::Router;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::IntoResponse;
use axum::routing::get;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::info;

use crate::exporter::Exporter;

/// Content type of the text exposition format.
pub const CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Build the scrape router for an exporter.
pub fn router(exporter: Arc<Exporter>, metrics_path: &str) -> Router {
    Router::new()
        .route(metrics_path, get(scrape))
        .route("/health", get(|| async { "healthy\n" }))
        .route("/ready", get(readiness))
        .with_state(exporter)
}

async fn scrape(State(exporter): State<Arc<Exporter>>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, CONTENT_TYPE)],
        exporter.registry().render(),
    )
}

async fn readiness(State(exporter): State<Arc<Exporter>>) -> (StatusCode, &'static str) {
    if exporter.is_ready() {
        (StatusCode::OK, "ready\n")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "no update cycle completed yet\n")
    }
}

/// Scrape endpoint holding its bound socket.
///
/// Binding and serving are separate steps so a busy port is reported before
/// anything else starts.
pub struct HttpServer {
    listener: TcpListener,
    router: Router,
    metrics_path: String,
}

impl HttpServer {
    /// Bind the listening socket.
    pub async fn bind(
        exporter: Arc<Exporter>,
        addr: SocketAddr,
        metrics_path: &str,
    ) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind to {}", addr))?;

        Ok(Self {
            listener,
            router: router(exporter, metrics_path),
            metrics_path: metrics_path.to_string(),
        })
    }

    /// Address actually bound, with the real port when 0 was requested.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Serve scrapes until the shutdown flag turns true or its sender is dropped.
    pub async fn serve(self, mut shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
        info!(
            addr = %self.local_addr()?,
            path = %self.metrics_path,
            "Serving metrics"
        );

        axum::serve(self.listener, self.router)
            .with_graceful_shutdown(async move {
                while shutdown.changed().await.is_ok() {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            })
            .await
            .context("HTTP server error")?;

        info!("HTTP server stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::KeaClient;
    use crate::exporter::CycleReport;
    use crate::mapping::{Family, MappingTables};
    use crate::registry::MetricRegistry;
    use crate::subnet::SubnetTable;
    use axum::body::Body;
    use axum::http::Request;
    use axum::response::Response;
    use std::time::Duration;
    use tower::ServiceExt;

    fn make_exporter() -> Arc<Exporter> {
        let tables = Arc::new(MappingTables::default());
        let registry = Arc::new(MetricRegistry::from_tables(&tables));
        let client = KeaClient::new("http://127.0.0.1:1", Duration::from_secs(1)).unwrap();

        Arc::new(Exporter::new(
            client,
            tables,
            registry,
            Vec::new(),
            SubnetTable::new(),
        ))
    }

    async fn request(router: Router, path: &str) -> Response {
        router
            .oneshot(Request::get(path).body(Body::empty()).unwrap())
            .await
            .unwrap()
    }

    async fn body_string(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_scrape_renders_registry() {
        let exporter = make_exporter();
        let statistics = match serde_json::json!({ "pkt4-received": [[3, "t"]] }) {
            serde_json::Value::Object(map) => map,
            _ => unreachable!(),
        };
        exporter.ingest(Family::Dhcp4, &statistics, &mut CycleReport::default());

        let response = request(router(exporter, "/metrics"), "/metrics").await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            CONTENT_TYPE
        );
        let body = body_string(response).await;
        assert!(body.contains("kea_dhcp4_packets_received{operation=\"all\"} 3"));
    }

    #[tokio::test]
    async fn test_health() {
        let response = request(router(make_exporter(), "/metrics"), "/health").await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_readiness_follows_first_cycle() {
        let exporter = make_exporter();

        let response = request(router(exporter.clone(), "/metrics"), "/ready").await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        exporter.update().await;

        let response = request(router(exporter, "/metrics"), "/ready").await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_custom_metrics_path() {
        let router = router(make_exporter(), "/kea/metrics");

        let response = request(router.clone(), "/kea/metrics").await;
        assert_eq!(response.status(), StatusCode::OK);

        let response = request(router, "/metrics").await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_bind_fails_on_busy_port() {
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = taken.local_addr().unwrap();

        let err = HttpServer::bind(make_exporter(), addr, "/metrics")
            .await
            .err()
            .unwrap();

        assert!(err.to_string().contains("Failed to bind"));
    }

    #[tokio::test]
    async fn test_serve_stops_on_shutdown() {
        let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let server = HttpServer::bind(make_exporter(), addr, "/metrics")
            .await
            .unwrap();
        assert_ne!(server.local_addr().unwrap().port(), 0);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(server.serve(shutdown_rx));

        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }
}
