//! Heartbeat service — the sessions' regular polling cycle.
//!
//! Jobs with `wake_mode = next-heartbeat` do not wake their session when they
//! fire; the wake is queued and delivered here on the next tick.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::cron::{CronService, SessionWaker};

pub struct HeartbeatService {
    cron: Arc<CronService>,
    waker: Arc<dyn SessionWaker>,
    interval: Duration,
}

impl HeartbeatService {
    pub fn new(cron: Arc<CronService>, waker: Arc<dyn SessionWaker>, interval: Duration) -> Self {
        Self {
            cron,
            waker,
            interval,
        }
    }

    /// Run the heartbeat loop until cancelled, draining deferred wakes on
    /// every tick.
    pub async fn run(self, cancel: CancellationToken) {
        info!(interval_secs = self.interval.as_secs(), "Heartbeat service started");
        let mut ticker = tokio::time::interval(self.interval);
        ticker.tick().await; // first tick fires immediately, skip it
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            let wakes = self.cron.take_pending_wakes().await;
            if wakes.is_empty() {
                continue;
            }
            debug!(count = wakes.len(), "Heartbeat delivering deferred wakes");
            for wake in wakes {
                self.waker
                    .wake_now(wake.session_target, wake.agent_id.as_deref())
                    .await;
            }
        }
        info!("Heartbeat service stopped");
    }
}
