//! Router metrics.
//!
//! Every counter lives in a prometheus-client [`Registry`] so the daemon can
//! serve it as-is from `/metrics`. [`RouterStats::snapshot`] reads the same
//! metrics back into a JSON-friendly [`StatsSnapshot`].

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::time::Duration;

use parking_lot::Mutex;
use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::encoding::text::encode;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::{Histogram, exponential_buckets};
use prometheus_client::registry::Registry;
use serde::{Deserialize, Serialize};

use crate::types::DropReason;

/// `op` label value for one ingest call.
pub const OP_INGEST: &str = "ingest";

/// `op` label value for one batch delivery.
pub const OP_DELIVER: &str = "deliver";

/// Content type of [`RouterStats::encode`] output.
pub const CONTENT_TYPE: &str = "application/openmetrics-text; version=1.0.0; charset=utf-8";

/// Labels for alerts counted by where they came from.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct SourceLabels {
    /// `api` or `alertmanager`.
    pub source: String,
}

/// Labels for dropped alerts.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ReasonLabels {
    /// A [`DropReason`] name.
    pub reason: String,
}

/// Labels for delivery outcomes.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct DestLabels {
    /// Destination kind, `chat` or `email`.
    pub dest: String,
}

/// Labels for per-route gauges.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct RouteLabels {
    /// Route name.
    pub route: String,
}

/// Labels for timed operations.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct OpLabels {
    /// [`OP_INGEST`] or [`OP_DELIVER`].
    pub op: String,
}

type DurationFamily = Family<OpLabels, Histogram, fn() -> Histogram>;

fn duration_histogram() -> Histogram {
    // 0.5ms to ~16s
    Histogram::new(exponential_buckets(0.0005, 2.0, 16))
}

/// Live metrics shared by the ingestion path and the route workers.
pub struct RouterStats {
    registry: Registry,
    ingested: Family<SourceLabels, Counter>,
    dropped: Family<ReasonLabels, Counter>,
    unrouted: Counter,
    enqueued: Counter,
    batches_flushed: Counter,
    deliveries: Family<DestLabels, Counter>,
    delivery_errors: Family<DestLabels, Counter>,
    dlq_records: Counter,
    queue_depth: Family<RouteLabels, Gauge>,
    operation_duration: DurationFamily,
    sources: Mutex<BTreeSet<String>>,
    destinations: Mutex<BTreeSet<String>>,
}

impl fmt::Debug for RouterStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouterStats")
            .field("unrouted", &self.unrouted.get())
            .field("enqueued", &self.enqueued.get())
            .field("batches_flushed", &self.batches_flushed.get())
            .field("dlq_records", &self.dlq_records.get())
            .finish_non_exhaustive()
    }
}

impl Default for RouterStats {
    fn default() -> Self {
        Self::new()
    }
}

impl RouterStats {
    /// Creates zeroed metrics registered under the `alert_router_` names.
    #[must_use]
    pub fn new() -> Self {
        let mut registry = Registry::default();

        let ingested = Family::<SourceLabels, Counter>::default();
        registry.register(
            "alert_router_ingested",
            "Alerts received, by source",
            ingested.clone(),
        );

        let dropped = Family::<ReasonLabels, Counter>::default();
        registry.register(
            "alert_router_dropped",
            "Alerts dropped, by reason",
            dropped.clone(),
        );
        for reason in DropReason::ALL {
            dropped.get_or_create(&reason_labels(reason));
        }

        let unrouted = Counter::default();
        registry.register(
            "alert_router_unrouted",
            "Alerts that matched no route",
            unrouted.clone(),
        );

        let enqueued = Counter::default();
        registry.register(
            "alert_router_enqueued",
            "Alerts enqueued, counted once per route",
            enqueued.clone(),
        );

        let batches_flushed = Counter::default();
        registry.register(
            "alert_router_batches_flushed",
            "Batches handed to the deliverer",
            batches_flushed.clone(),
        );

        let deliveries = Family::<DestLabels, Counter>::default();
        registry.register(
            "alert_router_deliveries",
            "Successful deliveries, by destination kind",
            deliveries.clone(),
        );

        let delivery_errors = Family::<DestLabels, Counter>::default();
        registry.register(
            "alert_router_delivery_errors",
            "Failed deliveries, by destination kind",
            delivery_errors.clone(),
        );

        let dlq_records = Counter::default();
        registry.register(
            "alert_router_dlq_records",
            "Dead-letter records written",
            dlq_records.clone(),
        );

        let queue_depth = Family::<RouteLabels, Gauge>::default();
        registry.register(
            "alert_router_queue_depth",
            "Alerts waiting in each route's queue",
            queue_depth.clone(),
        );

        let operation_duration: DurationFamily = Family::new_with_constructor(duration_histogram);
        registry.register(
            "alert_router_operation_duration_seconds",
            "Duration of ingest calls and batch deliveries",
            operation_duration.clone(),
        );

        Self {
            registry,
            ingested,
            dropped,
            unrouted,
            enqueued,
            batches_flushed,
            deliveries,
            delivery_errors,
            dlq_records,
            queue_depth,
            operation_duration,
            sources: Mutex::new(BTreeSet::new()),
            destinations: Mutex::new(BTreeSet::new()),
        }
    }

    /// Counts an alert received from `source`.
    pub fn record_received(&self, source: &str) {
        self.ingested.get_or_create(&source_labels(source)).inc();
        let mut sources = self.sources.lock();
        if !sources.contains(source) {
            sources.insert(source.to_string());
        }
    }

    /// Counts an alert that matched no route.
    pub fn record_unrouted(&self) {
        self.unrouted.inc();
    }

    /// Counts an alert enqueued for a route.
    pub fn record_enqueued(&self) {
        self.enqueued.inc();
    }

    /// Counts a drop.
    pub fn record_drop(&self, reason: DropReason) {
        self.dropped.get_or_create(&reason_labels(reason)).inc();
    }

    /// Counts a flushed batch.
    pub fn record_flush(&self) {
        self.batches_flushed.inc();
    }

    /// Counts a delivery attempt to a destination kind.
    pub fn record_delivery(&self, destination_kind: &str, success: bool) {
        let labels = DestLabels {
            dest: destination_kind.to_string(),
        };
        if success {
            self.deliveries.get_or_create(&labels).inc();
        } else {
            self.delivery_errors.get_or_create(&labels).inc();
        }
        self.destinations.lock().insert(labels.dest);
    }

    /// Counts a written DLQ record.
    pub fn record_dlq(&self) {
        self.dlq_records.inc();
    }

    /// Sets the queue depth gauge of a route.
    pub fn set_queue_depth(&self, route: &str, depth: usize) {
        let labels = RouteLabels {
            route: route.to_string(),
        };
        self.queue_depth
            .get_or_create(&labels)
            .set(i64::try_from(depth).unwrap_or(i64::MAX));
    }

    /// Records how long one `op` took.
    pub fn observe_operation(&self, op: &str, elapsed: Duration) {
        let labels = OpLabels { op: op.to_string() };
        self.operation_duration
            .get_or_create(&labels)
            .observe(elapsed.as_secs_f64());
    }

    /// Current number of drops for a reason.
    #[must_use]
    pub fn dropped(&self, reason: DropReason) -> u64 {
        self.dropped.get_or_create(&reason_labels(reason)).get()
    }

    /// Encodes every metric in the OpenMetrics text format.
    #[must_use]
    pub fn encode(&self) -> String {
        let mut buffer = String::new();
        if let Err(e) = encode(&mut buffer, &self.registry) {
            tracing::error!(error = %e, "failed to encode metrics");
            return String::new();
        }
        buffer
    }

    /// Reads the counters back. `queue_depth` is filled in by the router.
    #[must_use]
    pub fn snapshot(&self) -> StatsSnapshot {
        let received_by_source: BTreeMap<String, u64> = self
            .sources
            .lock()
            .iter()
            .map(|source| {
                let count = self.ingested.get_or_create(&source_labels(source)).get();
                (source.clone(), count)
            })
            .collect();
        let deliveries = self
            .destinations
            .lock()
            .iter()
            .map(|dest| {
                let labels = DestLabels { dest: dest.clone() };
                let counts = DeliveryCounts {
                    succeeded: self.deliveries.get_or_create(&labels).get(),
                    failed: self.delivery_errors.get_or_create(&labels).get(),
                };
                (dest.clone(), counts)
            })
            .collect();

        StatsSnapshot {
            received: received_by_source.values().sum(),
            received_by_source,
            unrouted: self.unrouted.get(),
            enqueued: self.enqueued.get(),
            dropped: DropReason::ALL
                .iter()
                .map(|reason| (reason.as_str().to_string(), self.dropped(*reason)))
                .collect(),
            batches_flushed: self.batches_flushed.get(),
            deliveries,
            dlq_records: self.dlq_records.get(),
            queue_depth: BTreeMap::new(),
        }
    }
}

fn source_labels(source: &str) -> SourceLabels {
    SourceLabels {
        source: source.to_string(),
    }
}

fn reason_labels(reason: DropReason) -> ReasonLabels {
    ReasonLabels {
        reason: reason.as_str().to_string(),
    }
}

/// Delivery outcomes for one destination kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryCounts {
    /// Sends that succeeded.
    pub succeeded: u64,
    /// Sends that failed.
    pub failed: u64,
}

/// A point-in-time copy of [`RouterStats`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    /// Alerts received.
    pub received: u64,
    /// Alerts received per source.
    pub received_by_source: BTreeMap<String, u64>,
    /// Alerts that matched no route.
    pub unrouted: u64,
    /// Alerts enqueued (counted once per route).
    pub enqueued: u64,
    /// Drops per reason.
    pub dropped: BTreeMap<String, u64>,
    /// Batches handed to the deliverer.
    pub batches_flushed: u64,
    /// Delivery outcomes per destination kind.
    pub deliveries: BTreeMap<String, DeliveryCounts>,
    /// DLQ records written.
    pub dlq_records: u64,
    /// Alerts waiting in each route's queue.
    pub queue_depth: BTreeMap<String, usize>,
}
