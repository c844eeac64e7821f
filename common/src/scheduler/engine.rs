// Scrape cadence engine
//
// Sleeps until the next cron tick on the civil clock, runs one scrape tick,
// and repeats until shutdown.

use crate::clock::Clock;
use crate::schedule::CronCadence;
use crate::scraper::{ScrapeOrchestrator, ScrapeOutcome};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::sleep;
use tracing::{debug, error, info, instrument};

/// Delay before retrying when the cadence yields no further tick
const NO_TICK_RETRY: Duration = Duration::from_secs(3600);

/// Drives the scrape orchestrator on a cron cadence
pub struct ScrapeEngine {
    cadence: CronCadence,
    orchestrator: Arc<ScrapeOrchestrator>,
    clock: Arc<dyn Clock>,
    shutdown_tx: broadcast::Sender<()>,
}

impl ScrapeEngine {
    pub fn new(
        cadence: CronCadence,
        orchestrator: Arc<ScrapeOrchestrator>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let (shutdown_tx, _shutdown_rx) = broadcast::channel(1);

        Self {
            cadence,
            orchestrator,
            clock,
            shutdown_tx,
        }
    }

    /// Get a shutdown signal receiver
    pub fn shutdown_receiver(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    /// Run scrape ticks until `stop` is called
    #[instrument(skip(self))]
    pub async fn start(&self) {
        info!("Starting scrape engine");
        let mut shutdown_rx = self.shutdown_receiver();

        loop {
            let now = self.clock.now();
            let wait = match self.cadence.next_after(now) {
                Ok(next) => {
                    debug!(next_tick = %next, "Waiting for next scrape tick");
                    (next - now).to_std().unwrap_or_default()
                }
                Err(e) => {
                    error!(error = %e, "Scrape cadence has no next tick");
                    NO_TICK_RETRY
                }
            };

            tokio::select! {
                _ = sleep(wait) => {
                    self.tick().await;
                }
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received, stopping scrape engine");
                    break;
                }
            }
        }

        info!("Scrape engine stopped");
    }

    /// Run one scrape tick outside the cadence
    pub async fn tick(&self) -> ScrapeOutcome {
        let outcome = self.orchestrator.run_once().await;
        debug!(outcome = outcome.as_str(), "Scrape tick finished");
        outcome
    }

    /// Signal the engine and everything subscribed to its shutdown channel
    pub fn stop(&self) {
        info!("Stopping scrape engine");
        let _ = self.shutdown_tx.send(());
    }
}
