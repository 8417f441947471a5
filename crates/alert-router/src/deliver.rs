//! Batch formatting and delivery.

use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tracing::{debug, error, info};

use crate::dlq::DeadLetterRecorder;
use crate::error::Result;
use crate::matcher::Route;
use crate::notifier::{Notifier, OutboundMessage};
use crate::stats::{OP_DELIVER, RouterStats};
use crate::types::{Alert, INSTANCE_LABEL};

/// Summarises a batch: `N alert(s) severity=S` using the first alert's
/// severity, or `N alert(s)` when it has none.
#[must_use]
pub fn short_title(alerts: &[Alert]) -> String {
    match alerts.first().and_then(Alert::severity) {
        Some(severity) => format!("{} alert(s) severity={severity}", alerts.len()),
        None if alerts.is_empty() => "alerts".to_string(),
        None => format!("{} alert(s)", alerts.len()),
    }
}

/// Renders a batch as a bold title line followed by one line per alert:
///
/// ```text
/// *2 alert(s) severity=critical*
/// - disk full [sev:critical] (db1)
/// - 3f2a9c1e
/// ```
#[must_use]
pub fn format_batch(alerts: &[Alert]) -> String {
    let mut out = format!("*{}*\n", short_title(alerts));
    for alert in alerts {
        out.push_str("- ");
        out.push_str(alert.summary());
        if let Some(severity) = alert.severity() {
            let _ = write!(out, " [sev:{severity}]");
        }
        if let Some(instance) = alert.label(INSTANCE_LABEL) {
            let _ = write!(out, " ({instance})");
        }
        out.push('\n');
    }
    out
}

/// Sends a route's batch to each of its destinations and records failures.
#[derive(Debug, Clone)]
pub struct Deliverer {
    notifier: Arc<dyn Notifier>,
    dlq: DeadLetterRecorder,
    stats: Arc<RouterStats>,
}

impl Deliverer {
    /// Creates a deliverer.
    #[must_use]
    pub fn new(
        notifier: Arc<dyn Notifier>,
        dlq: DeadLetterRecorder,
        stats: Arc<RouterStats>,
    ) -> Self {
        Self {
            notifier,
            dlq,
            stats,
        }
    }

    /// Delivers `batch` through every destination of `route`, in order.
    ///
    /// Destinations are independent: a failed chat send does not stop the
    /// email send. Every failure is written to the DLQ.
    ///
    /// # Errors
    ///
    /// Returns the first `RouterError::Delivery` after all destinations
    /// were attempted.
    pub async fn deliver(&self, route: &Route, batch: &[Alert]) -> Result<()> {
        let started = Instant::now();
        self.stats.record_flush();
        let result = self.send_all(route, batch).await;
        self.stats.observe_operation(OP_DELIVER, started.elapsed());
        result
    }

    async fn send_all(&self, route: &Route, batch: &[Alert]) -> Result<()> {

        let message = OutboundMessage {
            title: short_title(batch),
            text: format_batch(batch),
        };

        if route.destinations().is_empty() {
            debug!(
                route = %route.name(),
                alerts = batch.len(),
                "route has no destinations"
            );
            return Ok(());
        }

        let mut first_failure = None;
        for destination in route.destinations() {
            match self.notifier.send(destination, &message).await {
                Ok(()) => {
                    self.stats.record_delivery(destination.kind(), true);
                    info!(
                        route = %route.name(),
                        destination = %destination,
                        alerts = batch.len(),
                        "delivered batch"
                    );
                }
                Err(e) => {
                    self.stats.record_delivery(destination.kind(), false);
                    error!(
                        route = %route.name(),
                        destination = %destination,
                        alerts = batch.len(),
                        error = %e,
                        "delivery failed"
                    );
                    let recorded = self
                        .dlq
                        .record(
                            route.name(),
                            &destination.to_string(),
                            &message.text,
                            batch,
                            &e.to_string(),
                            Utc::now(),
                        )
                        .await;
                    match recorded {
                        Ok(_) => self.stats.record_dlq(),
                        Err(store_err) => error!(
                            route = %route.name(),
                            error = %store_err,
                            "failed to record dead letter"
                        ),
                    }
                    first_failure.get_or_insert(e);
                }
            }
        }

        first_failure.map_or(Ok(()), Err)
    }
}
