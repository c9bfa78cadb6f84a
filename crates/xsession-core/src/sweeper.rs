//! Periodic expiry of idle leases

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::arbitrator::LeaseArbitrator;

pub struct Sweeper {
    arbitrator: Arc<LeaseArbitrator>,
    interval: Duration,
}

impl Sweeper {
    pub const fn new(arbitrator: Arc<LeaseArbitrator>, interval: Duration) -> Self {
        Self {
            arbitrator,
            interval,
        }
    }

    /// Sweep every interval until `shutdown` flips to `true`
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately
        ticker.tick().await;

        tracing::debug!(interval_secs = self.interval.as_secs(), "Sweeper started");
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let report = self.arbitrator.sweep().await;
                    if !report.expired.is_empty() || !report.reserved.is_empty() {
                        tracing::info!(
                            expired = report.expired.len(),
                            reserved = report.reserved.len(),
                            "Expired idle edit sessions"
                        );
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        tracing::debug!("Sweeper stopped");
    }

    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }
}
