//! The router: owns every route's queue and worker and runs the ingestion
//! pipeline.
//!
//! Per alert: fingerprint, silence check, then for each matching route a
//! rate-limit check, a dedupe check and a non-blocking enqueue. Every
//! alert that is not enqueued for a route is attributed to exactly one
//! [`DropReason`].

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Instant;

use alert_store::StateStore;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::batcher::{RouteWorker, WorkerTiming};
use crate::config::RouterSettings;
use crate::dedup::DedupEngine;
use crate::deliver::Deliverer;
use crate::dlq::DeadLetterRecorder;
use crate::error::{Result, RouterError};
use crate::matcher::{Route, RouteMatcher};
use crate::notifier::Notifier;
use crate::rate_limit::RateLimiter;
use crate::reaper::spawn_reaper;
use crate::silence::SilenceRegistry;
use crate::stats::{OP_INGEST, RouterStats, StatsSnapshot};
use crate::types::{Alert, DropReason};

/// Drops of one ingest call, per reason.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DropCounts {
    /// Dropped by an active silence (counted once per alert).
    pub silenced: usize,
    /// Dropped by a route's rate limit.
    pub ratelimit: usize,
    /// Dropped as a repeat within a route's dedupe window.
    pub dedupe: usize,
    /// Dropped because a route's queue was full.
    pub queue_full: usize,
}

impl DropCounts {
    /// Drops for one reason.
    #[must_use]
    pub const fn get(&self, reason: DropReason) -> usize {
        match reason {
            DropReason::Silenced => self.silenced,
            DropReason::RateLimit => self.ratelimit,
            DropReason::Dedupe => self.dedupe,
            DropReason::QueueFull => self.queue_full,
        }
    }

    /// Drops over all reasons.
    #[must_use]
    pub const fn total(&self) -> usize {
        self.silenced + self.ratelimit + self.dedupe + self.queue_full
    }

    fn add(&mut self, reason: DropReason) {
        match reason {
            DropReason::Silenced => self.silenced += 1,
            DropReason::RateLimit => self.ratelimit += 1,
            DropReason::Dedupe => self.dedupe += 1,
            DropReason::QueueFull => self.queue_full += 1,
        }
    }
}

/// Outcome of one ingest call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestReport {
    /// Alerts in the call.
    pub received: usize,
    /// (alert, route) pairs enqueued.
    pub enqueued: usize,
    /// Alerts that matched no route.
    pub unrouted: usize,
    /// Drops per reason.
    pub dropped: DropCounts,
}

#[derive(Debug)]
struct RouteLane {
    queue: mpsc::Sender<Alert>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl RouteLane {
    fn depth(&self) -> usize {
        self.queue.max_capacity() - self.queue.capacity()
    }
}

/// Owns the compiled routes, one queue and worker per route, the silence
/// reaper and the shared suppression state.
///
/// Built once by [`Router::start`] and torn down as a unit by
/// [`Router::shutdown`].
#[derive(Debug)]
pub struct Router {
    matcher: RouteMatcher,
    lanes: HashMap<String, RouteLane>,
    silences: Arc<SilenceRegistry>,
    rate_limiter: RateLimiter,
    dedup: DedupEngine,
    dlq: DeadLetterRecorder,
    stats: Arc<RouterStats>,
    shutdown: watch::Sender<bool>,
    reaper: Mutex<Option<JoinHandle<()>>>,
}

impl Router {
    /// Starts a worker per route and the silence reaper.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns `RouterError::Config` if the queue capacity or an interval is
    /// zero, or two routes share a name.
    pub fn start(
        routes: Vec<Route>,
        store: Arc<dyn StateStore>,
        notifier: Arc<dyn Notifier>,
        settings: &RouterSettings,
    ) -> Result<Self> {
        if settings.queue_capacity == 0 {
            return Err(RouterError::Config {
                reason: "queue capacity must be at least 1".to_string(),
            });
        }
        if settings.flush_floor.is_zero() || settings.reaper_interval.is_zero() {
            return Err(RouterError::Config {
                reason: "flush floor and reaper interval must be non-zero".to_string(),
            });
        }

        let matcher = RouteMatcher::new(routes);
        let stats = Arc::new(RouterStats::new());
        let dlq = DeadLetterRecorder::new(store.clone());
        let deliverer = Deliverer::new(notifier, dlq.clone(), stats.clone());
        let silences = Arc::new(SilenceRegistry::new(store.clone()));
        let (shutdown, shutdown_rx) = watch::channel(false);
        let timing = WorkerTiming {
            flush_floor: settings.flush_floor,
            failure_backoff: settings.failure_backoff,
        };

        let mut lanes = HashMap::with_capacity(matcher.routes().len());
        for route in matcher.routes() {
            if lanes.contains_key(route.name()) {
                return Err(RouterError::Config {
                    reason: format!("duplicate route name '{}'", route.name()),
                });
            }
            let (tx, rx) = mpsc::channel(settings.queue_capacity);
            let worker = RouteWorker::new(
                route.clone(),
                rx,
                deliverer.clone(),
                timing,
                shutdown_rx.clone(),
            );
            lanes.insert(
                route.name().to_string(),
                RouteLane {
                    queue: tx,
                    worker: Mutex::new(Some(tokio::spawn(worker.run()))),
                },
            );
        }

        let reaper = spawn_reaper(silences.clone(), settings.reaper_interval, shutdown_rx);

        info!(
            routes = lanes.len(),
            queue_capacity = settings.queue_capacity,
            "router started"
        );

        Ok(Self {
            matcher,
            lanes,
            silences,
            rate_limiter: RateLimiter::new(store.clone()),
            dedup: DedupEngine::new(store),
            dlq,
            stats,
            shutdown,
            reaper: Mutex::new(Some(reaper)),
        })
    }

    /// Compiled routes in configuration order.
    #[must_use]
    pub fn routes(&self) -> &[Arc<Route>] {
        self.matcher.routes()
    }

    /// The silence registry, for administrative operations.
    #[must_use]
    pub fn silences(&self) -> &SilenceRegistry {
        &self.silences
    }

    /// The dead-letter recorder, for inspection.
    #[must_use]
    pub const fn dlq(&self) -> &DeadLetterRecorder {
        &self.dlq
    }

    /// Counters plus the current depth of every route queue.
    #[must_use]
    pub fn stats(&self) -> StatsSnapshot {
        let queue_depth = self.refresh_queue_depth();
        let mut snapshot = self.stats.snapshot();
        snapshot.queue_depth = queue_depth;
        snapshot
    }

    /// Every metric in the OpenMetrics text format, with queue depths read
    /// at call time.
    #[must_use]
    pub fn metrics_text(&self) -> String {
        self.refresh_queue_depth();
        self.stats.encode()
    }

    fn refresh_queue_depth(&self) -> BTreeMap<String, usize> {
        self.lanes
            .iter()
            .map(|(name, lane)| {
                let depth = lane.depth();
                self.stats.set_queue_depth(name, depth);
                (name.clone(), depth)
            })
            .collect()
    }

    /// Returns `true` once [`shutdown`](Self::shutdown) has been called.
    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Routes a set of alerts at the current time.
    ///
    /// Returns once every alert was enqueued or dropped; never waits for
    /// delivery and never blocks on a full queue.
    ///
    /// # Errors
    ///
    /// Returns `RouterError::ShutDown` after shutdown.
    pub async fn ingest(&self, alerts: Vec<Alert>, source: &str) -> Result<IngestReport> {
        self.ingest_at(alerts, source, Utc::now()).await
    }

    /// Routes a set of alerts as if at `now`.
    ///
    /// # Errors
    ///
    /// Returns `RouterError::ShutDown` after shutdown.
    pub async fn ingest_at(
        &self,
        alerts: Vec<Alert>,
        source: &str,
        now: DateTime<Utc>,
    ) -> Result<IngestReport> {
        if self.is_shut_down() {
            return Err(RouterError::ShutDown);
        }

        let started = Instant::now();
        let mut report = IngestReport {
            received: alerts.len(),
            ..IngestReport::default()
        };
        for alert in alerts {
            self.stats.record_received(source);
            self.route_alert(alert, now, &mut report).await;
        }
        self.stats.observe_operation(OP_INGEST, started.elapsed());

        debug!(
            source,
            received = report.received,
            enqueued = report.enqueued,
            dropped = report.dropped.total(),
            "ingested alerts"
        );
        Ok(report)
    }

    /// Stops the reaper and every route worker, waiting for each worker's
    /// final flush. Later calls return immediately.
    pub async fn shutdown(&self) {
        self.shutdown.send_replace(true);

        let reaper = self.reaper.lock().take();
        if let Some(handle) = reaper {
            if let Err(e) = handle.await {
                error!(error = %e, "silence reaper panicked");
            }
        }

        for (name, lane) in &self.lanes {
            let worker = lane.worker.lock().take();
            if let Some(handle) = worker {
                if let Err(e) = handle.await {
                    error!(route = %name, error = %e, "route worker panicked");
                }
            }
        }

        info!("router stopped");
    }

    async fn route_alert(&self, mut alert: Alert, now: DateTime<Utc>, report: &mut IngestReport) {
        alert.ensure_fingerprint();

        let silenced = self
            .silences
            .is_silenced(&alert, now)
            .await
            .unwrap_or_else(|e| {
                error!(
                    fingerprint = %alert.fingerprint,
                    error = %e,
                    "silence lookup failed"
                );
                true
            });
        if silenced {
            self.drop_alert(None, &alert, DropReason::Silenced, report);
            return;
        }

        let mut matched = false;
        for route in self.matcher.matching_routes(&alert) {
            matched = true;
            let name = route.name();

            let admitted = self
                .rate_limiter
                .admit(name, route.rate_limit_per_min(), now)
                .await
                .unwrap_or_else(|e| {
                    error!(
                        route = %name,
                        fingerprint = %alert.fingerprint,
                        error = %e,
                        "rate counter update failed"
                    );
                    false
                });
            if !admitted {
                self.drop_alert(Some(name), &alert, DropReason::RateLimit, report);
                continue;
            }

            let duplicate = self
                .dedup
                .observe(&alert.fingerprint, route.dedupe_window(), now)
                .await
                .unwrap_or_else(|e| {
                    error!(
                        route = %name,
                        fingerprint = %alert.fingerprint,
                        error = %e,
                        "dedupe update failed"
                    );
                    true
                });
            if duplicate {
                self.drop_alert(Some(name), &alert, DropReason::Dedupe, report);
                continue;
            }

            let Some(lane) = self.lanes.get(name) else {
                continue;
            };
            match lane.queue.try_send(alert.clone()) {
                Ok(()) => {
                    self.stats.record_enqueued();
                    self.stats.set_queue_depth(name, lane.depth());
                    report.enqueued += 1;
                    debug!(route = %name, fingerprint = %alert.fingerprint, "enqueued alert");
                }
                Err(mpsc::error::TrySendError::Full(_)) => {
                    self.drop_alert(Some(name), &alert, DropReason::QueueFull, report);
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    warn!(route = %name, "route worker is gone");
                    self.drop_alert(Some(name), &alert, DropReason::QueueFull, report);
                }
            }
        }

        if !matched {
            self.stats.record_unrouted();
            report.unrouted += 1;
            debug!(fingerprint = %alert.fingerprint, "alert matched no route");
        }
    }

    fn drop_alert(
        &self,
        route: Option<&str>,
        alert: &Alert,
        reason: DropReason,
        report: &mut IngestReport,
    ) {
        self.stats.record_drop(reason);
        report.dropped.add(reason);
        warn!(
            route = route.unwrap_or("-"),
            fingerprint = %alert.fingerprint,
            reason = %reason,
            "dropped alert"
        );
    }
}

#[cfg(test)]
mod tests {
    use std::future::Future;
    use std::pin::Pin;
    use std::time::Duration;

    use alert_store::{MemoryStateStore, Namespace, StoreFuture, UpdateFn};
    use chrono::TimeDelta;
    use serde_json::Value;

    use super::*;
    use crate::config::{RouteConfig, compile_routes};
    use crate::notifier::{Destination, LogNotifier, OutboundMessage};

    fn settings() -> RouterSettings {
        RouterSettings::default()
    }

    fn critical(instance: &str) -> Alert {
        Alert::new([("severity", "critical"), ("instance", instance)])
    }

    fn start(routes: &[RouteConfig], store: Arc<dyn StateStore>) -> Router {
        Router::start(compile_routes(routes), store, Arc::new(LogNotifier), &settings())
            .expect("start")
    }

    mod pipeline_tests {
        use super::*;

        #[tokio::test]
        async fn dedupe_is_shared_across_matching_routes() {
            let router = start(
                &[
                    RouteConfig::new("critical")
                        .matcher("severity", "^critical$")
                        .dedupe_window_secs(120),
                    RouteConfig::new("db")
                        .matcher("instance", "^db")
                        .dedupe_window_secs(120),
                    RouteConfig::new("web").matcher("instance", "^web"),
                ],
                Arc::new(MemoryStateStore::new()),
            );

            let report = router
                .ingest(vec![critical("db1")], "api")
                .await
                .expect("ingest");
            // The second route sees the fingerprint the first one just admitted.
            assert_eq!(report.enqueued, 1);
            assert_eq!(report.dropped.dedupe, 1);
            assert_eq!(router.stats().queue_depth["critical"], 1);
            router.shutdown().await;
        }

        #[tokio::test]
        async fn metrics_reflect_ingest() {
            let router = start(
                &[RouteConfig::new("critical")
                    .matcher("severity", "^critical$")
                    .group_window_secs(3600)],
                Arc::new(MemoryStateStore::new()),
            );
            router
                .ingest(vec![critical("db1"), critical("db2")], "api")
                .await
                .expect("ingest");

            let text = router.metrics_text();
            assert!(text.contains("alert_router_ingested_total{source=\"api\"} 2"));
            assert!(text.contains("alert_router_enqueued_total 2"));
            assert!(text.contains("alert_router_queue_depth{route=\"critical\"} 2"));
            let ingest_count = "alert_router_operation_duration_seconds_count{op=\"ingest\"} 1";
            assert!(text.contains(ingest_count));
            router.shutdown().await;
        }

        #[tokio::test]
        async fn independent_routes_with_dedupe_disabled() {
            let router = start(
                &[
                    RouteConfig::new("a").matcher("severity", "^critical$"),
                    RouteConfig::new("b").matcher("severity", "^critical$"),
                ],
                Arc::new(MemoryStateStore::new()),
            );
            let report = router
                .ingest(vec![critical("db1")], "api")
                .await
                .expect("ingest");
            assert_eq!(report.enqueued, 2);
            router.shutdown().await;
        }

        #[tokio::test]
        async fn unrouted_alerts_are_counted_not_dropped() {
            let router = start(
                &[RouteConfig::new("critical").matcher("severity", "^critical$")],
                Arc::new(MemoryStateStore::new()),
            );
            let report = router
                .ingest(vec![Alert::new([("severity", "info")])], "api")
                .await
                .expect("ingest");
            assert_eq!(report.unrouted, 1);
            assert_eq!(report.dropped.total(), 0);
            router.shutdown().await;
        }

        #[tokio::test]
        async fn silence_drops_once_regardless_of_routes() {
            let router = start(
                &[RouteConfig::new("a"), RouteConfig::new("b")],
                Arc::new(MemoryStateStore::new()),
            );
            let now = Utc::now();
            router
                .silences()
                .create("severity", "^critical$", now + TimeDelta::hours(1))
                .await
                .expect("silence");

            let report = router
                .ingest_at(vec![critical("db1"), critical("db2")], "api", now)
                .await
                .expect("ingest");
            assert_eq!(report.dropped.silenced, 2);
            assert_eq!(report.enqueued, 0);
            assert_eq!(router.stats().dropped["silenced"], 2);
            router.shutdown().await;
        }

        #[tokio::test]
        async fn fingerprint_is_filled_in() {
            let store = Arc::new(MemoryStateStore::new());
            let router = start(
                &[RouteConfig::new("all").dedupe_window_secs(60)],
                store.clone(),
            );
            let alert = critical("db1");
            let expected = crate::types::fingerprint(&alert.labels);

            router.ingest(vec![alert], "api").await.expect("ingest");
            let stored = store.get(Namespace::Dedupe, &expected).await.expect("get");
            assert!(stored.is_some());
            router.shutdown().await;
        }

        #[tokio::test]
        async fn queue_full_drops_newest_without_blocking() {
            let store: Arc<dyn StateStore> = Arc::new(MemoryStateStore::new());
            let router = Router::start(
                compile_routes(&[RouteConfig::new("tiny").group_window_secs(3600)]),
                store,
                Arc::new(LogNotifier),
                &RouterSettings {
                    queue_capacity: 1,
                    ..RouterSettings::default()
                },
            )
            .expect("start");

            // The worker only drains when it gets polled; ingest over the
            // in-memory store never yields.
            let alerts: Vec<Alert> = (0..5).map(|i| critical(&format!("db{i}"))).collect();
            let report = router.ingest(alerts, "api").await.expect("ingest");
            assert_eq!(report.enqueued + report.dropped.queue_full, 5);
            assert!(report.dropped.queue_full >= 4);
            router.shutdown().await;
        }

        #[tokio::test]
        async fn ingest_after_shutdown_is_rejected() {
            let router = start(&[RouteConfig::new("a")], Arc::new(MemoryStateStore::new()));
            router.shutdown().await;
            assert!(router.is_shut_down());
            assert!(matches!(
                router.ingest(vec![critical("db1")], "api").await,
                Err(RouterError::ShutDown)
            ));
            router.shutdown().await;
        }

        #[tokio::test]
        async fn zero_capacity_is_a_config_error() {
            let result = Router::start(
                Vec::new(),
                Arc::new(MemoryStateStore::new()),
                Arc::new(LogNotifier),
                &RouterSettings {
                    queue_capacity: 0,
                    ..RouterSettings::default()
                },
            );
            assert!(matches!(result, Err(RouterError::Config { .. })));
        }

        #[tokio::test]
        async fn zero_flush_floor_is_a_config_error() {
            let result = Router::start(
                Vec::new(),
                Arc::new(MemoryStateStore::new()),
                Arc::new(LogNotifier),
                &RouterSettings {
                    flush_floor: Duration::ZERO,
                    ..RouterSettings::default()
                },
            );
            assert!(matches!(result, Err(RouterError::Config { .. })));
        }

        #[tokio::test]
        async fn duplicate_route_names_are_a_config_error() {
            let routes = vec![
                Route::compile(&RouteConfig::new("x")).expect("compile"),
                Route::compile(&RouteConfig::new("x")).expect("compile"),
            ];
            let result = Router::start(
                routes,
                Arc::new(MemoryStateStore::new()),
                Arc::new(LogNotifier),
                &settings(),
            );
            assert!(matches!(result, Err(RouterError::Config { .. })));
        }
    }

    mod fault_tests {
        use super::*;

        /// A store whose writes to one namespace always fail.
        #[derive(Debug)]
        struct FailingStore {
            inner: MemoryStateStore,
            broken: Namespace,
        }

        impl FailingStore {
            fn new(broken: Namespace) -> Self {
                Self {
                    inner: MemoryStateStore::new(),
                    broken,
                }
            }

            fn fail<'a, T: Send + 'a>(&self, ns: Namespace) -> Option<StoreFuture<'a, T>> {
                (ns == self.broken).then(|| {
                    let err = alert_store::StoreError::Serialization("disk on fire".to_string());
                    Box::pin(std::future::ready(Err(err))) as StoreFuture<'a, T>
                })
            }
        }

        impl StateStore for FailingStore {
            fn get<'a>(&'a self, ns: Namespace, key: &'a str) -> StoreFuture<'a, Option<Value>> {
                self.fail(ns).unwrap_or_else(|| self.inner.get(ns, key))
            }

            fn set<'a>(&'a self, ns: Namespace, key: &'a str, value: Value) -> StoreFuture<'a, ()> {
                self.fail(ns).unwrap_or_else(|| self.inner.set(ns, key, value))
            }

            fn delete<'a>(&'a self, ns: Namespace, key: &'a str) -> StoreFuture<'a, bool> {
                self.fail(ns).unwrap_or_else(|| self.inner.delete(ns, key))
            }

            fn scan(&self, ns: Namespace) -> StoreFuture<'_, Vec<(String, Value)>> {
                self.fail(ns).unwrap_or_else(|| self.inner.scan(ns))
            }

            fn update<'a>(
                &'a self,
                ns: Namespace,
                key: &'a str,
                f: &'a mut UpdateFn<'_>,
            ) -> StoreFuture<'a, Option<Value>> {
                self.fail(ns).unwrap_or_else(|| self.inner.update(ns, key, f))
            }
        }

        async fn ingest_with_broken(broken: Namespace) -> IngestReport {
            let router = start(
                &[RouteConfig::new("all").rate_limit_per_min(10)],
                Arc::new(FailingStore::new(broken)),
            );
            let report = router
                .ingest(vec![critical("db1")], "api")
                .await
                .expect("ingest");
            router.shutdown().await;
            report
        }

        #[tokio::test]
        async fn silence_store_failure_drops_as_silenced() {
            let report = ingest_with_broken(Namespace::Silence).await;
            assert_eq!(report.dropped.silenced, 1);
            assert_eq!(report.enqueued, 0);
        }

        #[tokio::test]
        async fn rate_store_failure_drops_as_ratelimit() {
            let report = ingest_with_broken(Namespace::Rate).await;
            assert_eq!(report.dropped.ratelimit, 1);
            assert_eq!(report.enqueued, 0);
        }

        #[tokio::test]
        async fn dedupe_store_failure_drops_as_dedupe() {
            let report = ingest_with_broken(Namespace::Dedupe).await;
            assert_eq!(report.dropped.dedupe, 1);
            assert_eq!(report.enqueued, 0);
        }
    }

    mod shutdown_tests {
        use super::*;

        #[derive(Debug, Default)]
        struct CountingNotifier {
            sent: Mutex<Vec<String>>,
        }

        impl Notifier for CountingNotifier {
            fn send<'a>(
                &'a self,
                _destination: &'a Destination,
                message: &'a OutboundMessage,
            ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
                Box::pin(async move {
                    self.sent.lock().push(message.text.clone());
                    Ok(())
                })
            }
        }

        #[tokio::test(start_paused = true)]
        async fn shutdown_flushes_every_route() {
            let notifier = Arc::new(CountingNotifier::default());
            let router = Router::start(
                compile_routes(&[
                    RouteConfig::new("a")
                        .matcher("instance", "^a")
                        .group_window_secs(600)
                        .chat("https://hooks.example/a", None),
                    RouteConfig::new("b")
                        .matcher("instance", "^b")
                        .group_window_secs(600)
                        .chat("https://hooks.example/b", None),
                ]),
                Arc::new(MemoryStateStore::new()),
                notifier.clone(),
                &settings(),
            )
            .expect("start");

            router
                .ingest(vec![critical("a1"), critical("b1")], "api")
                .await
                .expect("ingest");
            tokio::time::sleep(Duration::from_secs(1)).await;
            assert!(notifier.sent.lock().is_empty());

            router.shutdown().await;
            assert_eq!(notifier.sent.lock().len(), 2);
        }
    }
}
