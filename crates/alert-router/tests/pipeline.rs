//! End-to-end tests of the routing pipeline.
//!
//! These tests verify:
//! 1. Dedupe within and after the window
//! 2. Per-minute rate limiting
//! 3. Silences overriding route matchers, and silence expiry
//! 4. One batch per aggregation window, in enqueue order
//! 5. Failed deliveries producing dead-letter records
//! 6. Persistence of suppression state across restarts in SQLite

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use alert_router::{
    Alert, Destination, Notifier, OutboundMessage, RouteConfig, Router, RouterError,
    RouterSettings, compile_routes,
};
use alert_store::{MemoryStateStore, SqliteStateStore, StateStore};
use chrono::{DateTime, TimeDelta, TimeZone, Utc};
use parking_lot::Mutex;

// ============================================================================
// Helpers
// ============================================================================

#[derive(Debug, Default)]
struct RecordingNotifier {
    fail: bool,
    sent: Mutex<Vec<(Destination, OutboundMessage)>>,
}

impl RecordingNotifier {
    fn failing() -> Self {
        Self {
            fail: true,
            sent: Mutex::new(Vec::new()),
        }
    }

    fn texts(&self) -> Vec<String> {
        self.sent.lock().iter().map(|(_, m)| m.text.clone()).collect()
    }
}

impl Notifier for RecordingNotifier {
    fn send<'a>(
        &'a self,
        destination: &'a Destination,
        message: &'a OutboundMessage,
    ) -> Pin<Box<dyn Future<Output = alert_router::Result<()>> + Send + 'a>> {
        Box::pin(async move {
            self.sent.lock().push((destination.clone(), message.clone()));
            if self.fail {
                return Err(RouterError::Delivery {
                    destination: destination.kind().to_string(),
                    reason: "503 Service Unavailable".to_string(),
                });
            }
            Ok(())
        })
    }
}

fn start(
    routes: &[RouteConfig],
    store: Arc<dyn StateStore>,
    notifier: Arc<RecordingNotifier>,
) -> Router {
    Router::start(compile_routes(routes), store, notifier, &RouterSettings::default())
        .expect("router starts")
}

fn critical_route() -> RouteConfig {
    RouteConfig::new("oncall")
        .matcher("severity", "^critical$")
        .group_window_secs(30)
        .dedupe_window_secs(120)
        .chat("https://hooks.example/oncall", Some("#oncall"))
}

fn minute_start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0)
        .single()
        .expect("valid time")
}

async fn wait(secs: u64) {
    tokio::time::sleep(Duration::from_secs(secs)).await;
}

// ============================================================================
// Dedupe
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_repeat_within_window_is_deduped_then_accepted_after() {
    let notifier = Arc::new(RecordingNotifier::default());
    let router = start(&[critical_route()], Arc::new(MemoryStateStore::new()), notifier.clone());
    let alert = || Alert::new([("severity", "critical"), ("instance", "db1")]);
    let t0 = minute_start();

    let first = router.ingest_at(vec![alert()], "api", t0).await.expect("first");
    assert_eq!(first.enqueued, 1);

    let second = router
        .ingest_at(vec![alert()], "api", t0 + TimeDelta::seconds(1))
        .await
        .expect("second");
    assert_eq!(second.enqueued, 0);
    assert_eq!(second.dropped.dedupe, 1);

    wait(31).await;
    let texts = notifier.texts();
    assert_eq!(texts.len(), 1);
    assert!(texts[0].contains("[sev:critical] (db1)"));

    let third = router
        .ingest_at(vec![alert()], "api", t0 + TimeDelta::seconds(120))
        .await
        .expect("third");
    assert_eq!(third.enqueued, 1);

    router.shutdown().await;
    assert_eq!(notifier.texts().len(), 2);
}

// ============================================================================
// Rate limiting
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_rate_limit_admits_exactly_limit_per_bucket() {
    let notifier = Arc::new(RecordingNotifier::default());
    let router = start(
        &[RouteConfig::new("limited").rate_limit_per_min(3)],
        Arc::new(MemoryStateStore::new()),
        notifier,
    );
    let t0 = minute_start();

    let alerts: Vec<Alert> = (0..5)
        .map(|i| Alert::new([("instance", format!("node-{i}"))]))
        .collect();
    let report = router
        .ingest_at(alerts, "api", t0 + TimeDelta::seconds(10))
        .await
        .expect("ingest");
    assert_eq!(report.enqueued, 3);
    assert_eq!(report.dropped.ratelimit, 2);

    let next_minute = router
        .ingest_at(
            vec![Alert::new([("instance", "node-9")])],
            "api",
            t0 + TimeDelta::seconds(60),
        )
        .await
        .expect("next bucket");
    assert_eq!(next_minute.enqueued, 1);

    assert_eq!(router.stats().dropped["ratelimit"], 2);
    router.shutdown().await;
}

// ============================================================================
// Silences
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_active_silence_drops_regardless_of_routes() {
    let notifier = Arc::new(RecordingNotifier::default());
    let router = start(
        &[critical_route(), RouteConfig::new("everything")],
        Arc::new(MemoryStateStore::new()),
        notifier.clone(),
    );
    let now = Utc::now();
    router
        .silences()
        .create("severity", "^critical$", now + TimeDelta::hours(1))
        .await
        .expect("silence");

    let report = router
        .ingest_at(
            vec![
                Alert::new([("severity", "critical"), ("instance", "db1")]),
                Alert::new([("severity", "critical"), ("instance", "web1")]),
                Alert::new([("severity", "warning"), ("instance", "db1")]),
            ],
            "alertmanager",
            now,
        )
        .await
        .expect("ingest");

    assert_eq!(report.dropped.silenced, 2);
    assert_eq!(report.enqueued, 1);

    router.shutdown().await;
    let texts = notifier.texts();
    assert!(texts.iter().all(|t| !t.contains("critical")));
}

#[tokio::test(start_paused = true)]
async fn test_expired_silence_does_not_suppress_and_is_reaped() {
    let notifier = Arc::new(RecordingNotifier::default());
    let router = start(&[critical_route()], Arc::new(MemoryStateStore::new()), notifier);
    let now = Utc::now();
    let silence = router
        .silences()
        .create("severity", ".*", now - TimeDelta::seconds(1))
        .await
        .expect("silence");

    let report = router
        .ingest_at(vec![Alert::new([("severity", "critical")])], "api", now)
        .await
        .expect("ingest");
    assert_eq!(report.dropped.silenced, 0);
    assert_eq!(report.enqueued, 1);
    assert!(router.silences().list(false, now).await.expect("list").is_empty());

    wait(61).await;
    assert!(router.silences().get(&silence.id).await.expect("get").is_none());
    assert!(router.silences().list(true, Utc::now()).await.expect("list").is_empty());

    router.shutdown().await;
}

// ============================================================================
// Batching
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_alerts_in_one_window_form_one_payload_in_order() {
    let notifier = Arc::new(RecordingNotifier::default());
    let router = start(&[critical_route()], Arc::new(MemoryStateStore::new()), notifier.clone());

    for instance in ["db1", "db2", "db3", "db4"] {
        router
            .ingest(
                vec![
                    Alert::new([("severity", "critical"), ("instance", instance)])
                        .with_annotation("summary", format!("{instance} down")),
                ],
                "api",
            )
            .await
            .expect("ingest");
        wait(2).await;
    }

    wait(30).await;
    let texts = notifier.texts();
    assert_eq!(texts.len(), 1);
    assert_eq!(
        texts[0],
        "*4 alert(s) severity=critical*\n\
         - db1 down [sev:critical] (db1)\n\
         - db2 down [sev:critical] (db2)\n\
         - db3 down [sev:critical] (db3)\n\
         - db4 down [sev:critical] (db4)\n"
    );

    router.shutdown().await;
    assert_eq!(notifier.texts().len(), 1);
}

// ============================================================================
// Dead letters
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_failed_send_creates_exactly_one_dlq_record() {
    let notifier = Arc::new(RecordingNotifier::failing());
    let router = start(&[critical_route()], Arc::new(MemoryStateStore::new()), notifier.clone());

    router
        .ingest(vec![Alert::new([("severity", "critical"), ("instance", "db1")])], "api")
        .await
        .expect("ingest");
    wait(31).await;

    let records = router.dlq().list(None).await.expect("dlq");
    assert_eq!(records.len(), 1);
    let record = &records[0];
    assert_eq!(record.route, "oncall");
    assert_eq!(record.destination, "chat:#oncall");
    assert_eq!(record.payload, notifier.texts()[0]);
    assert_eq!(record.alerts.len(), 1);
    assert!(record.error.contains("503"));

    wait(120).await;
    router.shutdown().await;
    assert_eq!(router.dlq().list(Some("oncall")).await.expect("dlq").len(), 1);

    let stats = router.stats();
    assert_eq!(stats.dlq_records, 1);
    assert_eq!(stats.deliveries["chat"].failed, 1);
}

// ============================================================================
// Persistence
// ============================================================================

#[tokio::test]
async fn test_suppression_state_survives_restart() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("state.db");
    let alert = || Alert::new([("severity", "critical"), ("instance", "db1")]);
    let t0 = minute_start();

    {
        let store = Arc::new(SqliteStateStore::open(&path).await.expect("open"));
        let router = start(
            &[critical_route()],
            store.clone(),
            Arc::new(RecordingNotifier::default()),
        );
        router.ingest_at(vec![alert()], "api", t0).await.expect("ingest");
        router
            .silences()
            .upsert("maint", "instance", "^web", Utc::now() + TimeDelta::hours(1))
            .await
            .expect("silence");
        router.shutdown().await;
        store.close().await;
    }

    let store = Arc::new(SqliteStateStore::open(&path).await.expect("reopen"));
    let router = start(
        &[critical_route()],
        store.clone(),
        Arc::new(RecordingNotifier::default()),
    );
    let report = router
        .ingest_at(vec![alert()], "api", t0 + TimeDelta::seconds(30))
        .await
        .expect("ingest");
    assert_eq!(report.dropped.dedupe, 1);
    assert!(router.silences().get("maint").await.expect("get").is_some());
    router.shutdown().await;
    store.close().await;
}
