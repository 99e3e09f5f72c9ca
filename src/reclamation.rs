//! Periodic purge of expired renewal records.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::watch;
use tokio::time::{interval, sleep, MissedTickBehavior};
use tracing::{error, info};

use crate::db::store::RenewalRegistry;

pub struct ReclamationWorker {
    registry: Arc<dyn RenewalRegistry>,
    period: Duration,
    max_startup_jitter: Duration,
}

impl ReclamationWorker {
    pub fn new(registry: Arc<dyn RenewalRegistry>, period: Duration, max_startup_jitter: Duration) -> Self {
        Self {
            registry,
            period,
            max_startup_jitter,
        }
    }

    /// One purge pass. Failures are logged and reported, never propagated.
    pub async fn run_once(&self) -> bool {
        match self.registry.delete_expired().await {
            Ok(removed) => {
                info!("Purged {} expired renewal records", removed);
                true
            }
            Err(e) => {
                error!("Failed to purge expired renewal records: {}", e);
                false
            }
        }
    }

    /// Purge immediately (after the startup jitter) and then once per period
    /// until `shutdown` flips to `true` or its sender is dropped.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let jitter = self.startup_jitter();
        if !jitter.is_zero() {
            tokio::select! {
                _ = sleep(jitter) => {}
                _ = shutdown.changed() => {
                    info!("Reclamation worker stopped before first pass");
                    return;
                }
            }
        }

        let mut ticker = interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                _ = ticker.tick() => {
                    self.run_once().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("Reclamation worker stopped");
    }

    fn startup_jitter(&self) -> Duration {
        if self.max_startup_jitter.is_zero() {
            return Duration::ZERO;
        }
        let millis = self.max_startup_jitter.as_millis() as u64;
        Duration::from_millis(rand::thread_rng().gen_range(0..=millis))
    }
}
