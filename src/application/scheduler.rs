use crate::application::orchestrator::SettlementOrchestrator;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(15 * 60);

/// Periodically expires supplement and cancellation windows nobody answered.
pub struct SettlementScheduler {
    orchestrator: Arc<SettlementOrchestrator>,
    interval: Duration,
}

impl SettlementScheduler {
    pub fn new(orchestrator: Arc<SettlementOrchestrator>) -> Self {
        Self {
            orchestrator,
            interval: DEFAULT_SWEEP_INTERVAL,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// One sweep. Errors are logged; the next tick tries again.
    pub async fn sweep_once(&self) -> (usize, usize) {
        match self.orchestrator.sweep_expired().await {
            Ok((supplements, cancellations)) => {
                if supplements + cancellations > 0 {
                    info!(supplements, cancellations, "expired negotiations resolved");
                } else {
                    debug!("sweep found nothing to expire");
                }
                (supplements, cancellations)
            }
            Err(e) => {
                error!(error = %e, "expiry sweep failed");
                (0, 0)
            }
        }
    }

    /// Runs until `shutdown` resolves.
    pub async fn run<F>(self, shutdown: F)
    where
        F: Future<Output = ()> + Send,
    {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);
        info!(interval_secs = self.interval.as_secs(), "settlement scheduler started");
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.sweep_once().await;
                }
                _ = &mut shutdown => {
                    info!("settlement scheduler stopped");
                    break;
                }
            }
        }
    }
}
