use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::cache::RecordStore;
use crate::persistence::Persistence;
use crate::ProxyError;

const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 60;

/// Periodically drops expired records and writes a snapshot.
pub struct CacheJanitor {
    store: Arc<RecordStore>,
    persistence: Arc<Persistence>,
    period: Duration,
    shutdown: CancellationToken,
}

impl CacheJanitor {
    pub fn new(store: Arc<RecordStore>, persistence: Arc<Persistence>) -> Self {
        Self {
            store,
            persistence,
            period: Duration::from_secs(DEFAULT_SWEEP_INTERVAL_SECS),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn with_period(mut self, period: Duration) -> Self {
        self.period = period;
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }

    /// One sweep followed by one snapshot write. Returns the number of
    /// records removed; a failed write is returned but the sweep stands.
    pub async fn run_once(&self) -> Result<usize, ProxyError> {
        let removed = self.store.sweep();
        debug!(removed, names = self.store.len(), "cache swept");

        self.persistence.save_store(&self.store).await?;
        Ok(removed)
    }

    /// Runs until the cancellation token fires. A tick that has started always
    /// completes.
    pub fn start(self) -> JoinHandle<()> {
        info!(period = ?self.period, "starting cache janitor");

        tokio::spawn(async move {
            let mut interval = interval_at(Instant::now() + self.period, self.period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = self.shutdown.cancelled() => {
                        info!("cache janitor shutting down");
                        break;
                    }
                    _ = interval.tick() => {
                        match self.run_once().await {
                            Ok(removed) if removed > 0 => {
                                info!(removed, names = self.store.len(), "expired records purged");
                            }
                            Ok(_) => {}
                            Err(e) => {
                                error!(error = %e, "snapshot failed, retrying next period");
                            }
                        }
                    }
                }
            }
        })
    }
}
