//! Poller: the liveness backstop.
//!
//! Republishes due identifiers every tick so tasks survive bus loss,
//! delayed retries, and expired claims, and sweeps terminal rows once the
//! retention window has passed. The poller never claims a task itself.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use torque_bus::NotifyBus;
use torque_core::TorqueConfig;

use crate::store::TaskStore;

#[derive(Debug, Clone)]
pub struct PollerConfig {
    pub poll_interval: Duration,
    pub poll_batch: usize,
    pub gc_interval: Duration,
    pub gc_retention: Duration,
}

impl PollerConfig {
    pub fn from_config(config: &TorqueConfig) -> Self {
        Self {
            poll_interval: config.poll_interval,
            poll_batch: config.poll_batch,
            gc_interval: config.gc_interval,
            gc_retention: config.gc_retention,
        }
    }
}

/// Handle to a running poller.
#[derive(Debug)]
pub struct PollerHandle {
    cancel: CancellationToken,
    join: JoinHandle<()>,
}

impl PollerHandle {
    pub async fn shutdown(self) {
        self.cancel.cancel();
        let _ = self.join.await;
    }
}

pub struct Poller;

impl Poller {
    pub fn spawn(
        store: Arc<dyn TaskStore>,
        bus: Arc<dyn NotifyBus>,
        config: PollerConfig,
    ) -> PollerHandle {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let join = tokio::spawn(poller_loop(store, bus, config, token));
        PollerHandle { cancel, join }
    }
}

async fn poller_loop(
    store: Arc<dyn TaskStore>,
    bus: Arc<dyn NotifyBus>,
    config: PollerConfig,
    cancel: CancellationToken,
) {
    info!(
        poll_interval_ms = config.poll_interval.as_millis() as u64,
        gc_interval_ms = config.gc_interval.as_millis() as u64,
        "poller started"
    );

    let mut ticker = tokio::time::interval(config.poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut last_gc = tokio::time::Instant::now();

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = cancel.cancelled() => break,
        }

        match store.select_due(Utc::now(), config.poll_batch).await {
            Ok(ids) => {
                if !ids.is_empty() {
                    debug!(count = ids.len(), "republishing due tasks");
                }
                for id in ids {
                    if bus.publish(id).is_err() {
                        // Lossy by contract; workers fall back to scanning.
                        break;
                    }
                }
            }
            Err(e) => warn!(error = %e, "due scan failed"),
        }

        if last_gc.elapsed() >= config.gc_interval {
            last_gc = tokio::time::Instant::now();
            let older_than =
                Utc::now() - chrono::Duration::from_std(config.gc_retention).unwrap_or_default();
            match store.sweep_terminal(older_than).await {
                Ok(0) => {}
                Ok(n) => info!(swept = n, "terminal tasks removed"),
                Err(e) => warn!(error = %e, "gc sweep failed"),
            }
        }
    }

    info!("poller stopped");
}
