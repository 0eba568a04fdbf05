//! Process lifecycle: startup order and shutdown.
//!
//! Startup is bootstrap, bind, one update cycle, then serve and poll. Any
//! failure before serving is returned to the caller, and the first scrape
//! already sees the initial cycle's values.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::client::KeaClient;
use crate::config::ExporterConfig;
use crate::exporter::{Exporter, ExporterStats};
use crate::http::HttpServer;
use crate::mapping::MappingTables;
use crate::poller::Poller;
use crate::registry::MetricRegistry;

/// Extra time granted after the request timeout when stopping.
const SHUTDOWN_SLACK: Duration = Duration::from_secs(1);

/// How long to wait for the tasks to stop: an in-flight update is bounded by
/// the request timeout.
fn shutdown_grace(request_timeout: Duration) -> Duration {
    request_timeout.saturating_add(SHUTDOWN_SLACK)
}

/// A running exporter: the poller and the scrape endpoint.
pub struct Service {
    exporter: Arc<Exporter>,
    local_addr: SocketAddr,
    shutdown_tx: watch::Sender<bool>,
    poller: JoinHandle<()>,
    http: JoinHandle<anyhow::Result<()>>,
    grace: Duration,
}

impl Service {
    /// Start the exporter described by a validated configuration.
    pub async fn start(config: &ExporterConfig) -> anyhow::Result<Self> {
        let tables = Arc::new(MappingTables::new(&config.prometheus.prefix));
        let registry = Arc::new(MetricRegistry::from_tables(&tables));
        let client = KeaClient::new(config.target()?, config.kea.timeout())?;

        let exporter = Arc::new(Exporter::bootstrap(client, tables, registry).await?);

        let server = HttpServer::bind(
            exporter.clone(),
            config.prometheus.listen_addr()?,
            &config.prometheus.path,
        )
        .await?;
        let local_addr = server.local_addr()?;

        let report = exporter.update().await;
        info!(
            keys_set = report.keys_set,
            modules_failed = report.modules_failed,
            "Initial update complete"
        );

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let poller = Poller::new(exporter.clone(), config.kea.interval());
        let poller = tokio::spawn(poller.run(shutdown_rx.clone()));
        let http = tokio::spawn(server.serve(shutdown_rx));

        Ok(Self {
            exporter,
            local_addr,
            shutdown_tx,
            poller,
            http,
            grace: shutdown_grace(config.kea.timeout()),
        })
    }

    /// The exporter shared by the poller and the scrape endpoint.
    pub fn exporter(&self) -> &Arc<Exporter> {
        &self.exporter
    }

    /// Address the scrape endpoint is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Signal shutdown and wait for both tasks, returning the final stats.
    pub async fn shutdown(self) -> ExporterStats {
        let Self {
            exporter,
            shutdown_tx,
            poller,
            http,
            grace,
            ..
        } = self;

        let _ = shutdown_tx.send(true);

        let stopped = tokio::time::timeout(grace, async move {
            let _ = poller.await;
            match http.await {
                Ok(Err(e)) => error!(error = %e, "HTTP server failed"),
                Err(e) => error!(error = %e, "HTTP server task panicked"),
                Ok(Ok(())) => {}
            }
        })
        .await;

        if stopped.is_err() {
            warn!(grace_secs = grace.as_secs(), "Tasks did not stop in time");
        }

        exporter.stats()
    }
}
