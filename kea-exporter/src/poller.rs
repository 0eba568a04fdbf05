//! Fixed-interval polling loop.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info};

use crate::exporter::Exporter;

/// Drives [`Exporter::update`] at a fixed interval.
pub struct Poller {
    exporter: Arc<Exporter>,
    interval: Duration,
}

impl Poller {
    /// Create a poller.
    pub fn new(exporter: Arc<Exporter>, interval: Duration) -> Self {
        Self { exporter, interval }
    }

    /// Run until the shutdown signal is received.
    ///
    /// The initial cycle belongs to the caller, so the first update here
    /// happens one interval after start. Cycles never overlap: the next sleep
    /// begins only after the previous update returned, and shutdown is only
    /// observed while sleeping.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_secs = self.interval.as_secs_f64(),
            modules = ?self.exporter.modules(),
            "Starting poller"
        );

        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            }

            let report = self.exporter.update().await;
            debug!(keys_set = report.keys_set, "Poll cycle finished");
        }

        info!("Poller stopped");
    }
}
