// Periodic housekeeping sweep

use super::engine::Engine;
use crate::config::HousekeepingConfig;
use crate::errors::EngineResult;
use crate::models::SweepReport;
use crate::storage::StoreProvider;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::interval;
use tracing::{debug, error, info, instrument};

/// Re-derives job statuses on a fixed interval until told to stop
pub struct Housekeeper<P: StoreProvider> {
    engine: Arc<Engine>,
    provider: Arc<P>,
    config: HousekeepingConfig,
    /// Latched stop flag; a stop sent before `start` is still seen
    shutdown_tx: watch::Sender<bool>,
}

impl<P: StoreProvider> Housekeeper<P> {
    pub fn new(engine: Arc<Engine>, provider: Arc<P>, config: HousekeepingConfig) -> Self {
        let (shutdown_tx, _shutdown_rx) = watch::channel(false);
        Self {
            engine,
            provider,
            config,
            shutdown_tx,
        }
    }

    /// Get a shutdown signal receiver
    pub fn shutdown_receiver(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    /// Run a single sweep now
    pub async fn run_once(&self) -> EngineResult<SweepReport> {
        self.engine
            .process_all_open_jobs(self.provider.as_ref())
            .await
    }

    /// Sweep on every tick; the first tick fires immediately
    #[instrument(skip(self))]
    pub async fn start(&self) {
        info!(
            interval_seconds = self.config.interval_seconds,
            "Starting housekeeping"
        );

        let mut ticker = interval(Duration::from_secs(self.config.interval_seconds));
        let mut shutdown_rx = self.shutdown_receiver();

        loop {
            if *shutdown_rx.borrow_and_update() {
                info!("Shutdown signal received, stopping housekeeping");
                break;
            }

            tokio::select! {
                _ = ticker.tick() => {
                    debug!("Running housekeeping sweep");
                    if let Err(e) = self.run_once().await {
                        error!(error = %e, "Housekeeping sweep failed");
                    }
                }
                _ = shutdown_rx.changed() => {}
            }
        }

        info!("Housekeeping stopped");
    }

    /// Ask a running loop to stop after its current sweep
    pub fn stop(&self) {
        self.shutdown_tx.send_replace(true);
    }
}
