//! Per-route aggregation workers.
//!
//! Each route gets one [`RouteWorker`] that owns the receiving half of the
//! route's queue and its pending batch. Nothing else touches either.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info};

use crate::deliver::Deliverer;
use crate::matcher::Route;
use crate::types::Alert;

/// Timing of a route worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerTiming {
    /// Minimum flush interval.
    pub flush_floor: Duration,
    /// Pause after a flush with a failed delivery.
    pub failure_backoff: Duration,
}

impl WorkerTiming {
    /// Flush interval for a route: `max(group_window, flush_floor)`.
    #[must_use]
    pub fn flush_interval(&self, route: &Route) -> Duration {
        route.group_window().max(self.flush_floor)
    }
}

/// The single consumer of one route's queue.
#[derive(Debug)]
pub struct RouteWorker {
    route: Arc<Route>,
    queue: mpsc::Receiver<Alert>,
    deliverer: Deliverer,
    timing: WorkerTiming,
    shutdown: watch::Receiver<bool>,
    batch: Vec<Alert>,
}

impl RouteWorker {
    /// Creates a worker. It does nothing until [`run`](Self::run) is awaited.
    #[must_use]
    pub fn new(
        route: Arc<Route>,
        queue: mpsc::Receiver<Alert>,
        deliverer: Deliverer,
        timing: WorkerTiming,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            route,
            queue,
            deliverer,
            timing,
            shutdown,
            batch: Vec::new(),
        }
    }

    /// Accumulates alerts and flushes on every tick until shutdown.
    ///
    /// On shutdown (or once every sender is gone) the worker closes its
    /// queue, takes whatever is already queued, flushes once more, and
    /// returns. Sends after the close fail instead of being lost.
    pub async fn run(mut self) {
        let period = self.timing.flush_interval(&self.route);
        let mut ticker = time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(route = %self.route.name(), flush_interval = ?period, "route worker started");

        loop {
            tokio::select! {
                biased;
                changed = self.shutdown.changed() => {
                    if changed.is_err() || *self.shutdown.borrow() {
                        self.queue.close();
                        while let Ok(alert) = self.queue.try_recv() {
                            self.batch.push(alert);
                        }
                        break;
                    }
                }
                received = self.queue.recv() => match received {
                    Some(alert) => self.batch.push(alert),
                    None => break,
                },
                _ = ticker.tick() => {
                    if self.flush().await {
                        debug!(
                            route = %self.route.name(),
                            backoff = ?self.timing.failure_backoff,
                            "backing off after failed delivery"
                        );
                        time::sleep(self.timing.failure_backoff).await;
                    }
                }
            }
        }

        self.flush().await;
        info!(route = %self.route.name(), "route worker stopped");
    }

    /// Hands the pending batch to the deliverer and clears it whatever the
    /// outcome. Returns `true` if any destination failed.
    async fn flush(&mut self) -> bool {
        if self.batch.is_empty() {
            return false;
        }
        let batch = std::mem::take(&mut self.batch);
        debug!(route = %self.route.name(), alerts = batch.len(), "flushing batch");
        self.deliverer.deliver(&self.route, &batch).await.is_err()
    }
}
