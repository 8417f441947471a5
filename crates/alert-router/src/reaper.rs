//! Background removal of expired silences.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{error, info};

use crate::silence::SilenceRegistry;

/// Spawns a task that reaps expired silences every `interval` until
/// `shutdown` turns `true` or its sender is dropped.
pub fn spawn_reaper(
    registry: Arc<SilenceRegistry>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = time::interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(interval = ?interval, "silence reaper started");

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    if let Err(e) = registry.reap(Utc::now()).await {
                        error!(error = %e, "silence reap failed");
                    }
                }
            }
        }

        info!("silence reaper stopped");
    })
}
