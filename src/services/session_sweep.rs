//! Expired sticky-session sweep
//!
//! Expiry is already enforced lazily on access; this service only returns
//! memory held by sessions nobody asks for again.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, instrument};

use crate::proxy::ProxyRouter;

#[derive(Clone, Debug)]
pub struct SessionSweepConfig {
    /// How often to sweep (in seconds)
    pub interval_secs: u64,
}

impl Default for SessionSweepConfig {
    fn default() -> Self {
        Self { interval_secs: 60 }
    }
}

pub struct SessionSweepService {
    router: Arc<ProxyRouter>,
    config: SessionSweepConfig,
}

impl SessionSweepService {
    pub fn new(router: Arc<ProxyRouter>, config: SessionSweepConfig) -> Self {
        Self { router, config }
    }

    /// Run until `shutdown` turns true
    #[instrument(skip(self, shutdown))]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            "Starting session sweep service (interval: {}s)",
            self.config.interval_secs
        );

        let mut ticker = interval(Duration::from_secs(self.config.interval_secs.max(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await; // Skip immediate tick

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.sweep();
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Session sweep service shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// Drop expired sessions once, returning how many went away
    pub fn sweep(&self) -> usize {
        let removed = self.router.sessions().sweep_expired(Utc::now());
        if removed > 0 {
            info!("Swept {} expired sticky sessions", removed);
        } else {
            debug!("No expired sticky sessions");
        }
        removed
    }
}

/// Handle for stopping the sweep service
pub struct SessionSweepHandle {
    shutdown_tx: watch::Sender<bool>,
}

impl SessionSweepHandle {
    pub fn new() -> (Self, watch::Receiver<bool>) {
        let (tx, rx) = watch::channel(false);
        (Self { shutdown_tx: tx }, rx)
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}
