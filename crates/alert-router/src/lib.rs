//! Alert routing core.
//!
//! `alert-router` takes incoming alerts, suppresses noise, fans them out to
//! configured routes, aggregates each route's alerts into time-windowed
//! batches and delivers every batch through a pluggable [`Notifier`].
//!
//! # Pipeline
//!
//! For every alert:
//!
//! 1. **Fingerprint**: computed from the labels unless already present
//! 2. **Silences**: any active silence whose label regex matches drops the alert
//! 3. **Routes**: every route whose matchers all hold receives the alert
//! 4. **Rate limit**: fixed one-minute buckets per route
//! 5. **Dedupe**: repeats of a fingerprint within the route's window are dropped
//! 6. **Enqueue**: non-blocking; a full queue drops the alert
//!
//! Each route's worker flushes its batch every `max(group_window, floor)`,
//! sending chat first and email second. Failed sends are written to the
//! dead-letter queue and never retried.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use alert_router::{Alert, LogNotifier, RouteConfig, Router, RouterSettings, compile_routes};
//! use alert_store::MemoryStateStore;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), alert_router::RouterError> {
//! let routes = compile_routes(&[RouteConfig::new("oncall")
//!     .matcher("severity", "^critical$")
//!     .group_window_secs(30)
//!     .dedupe_window_secs(120)
//!     .rate_limit_per_min(60)]);
//!
//! let router = Router::start(
//!     routes,
//!     Arc::new(MemoryStateStore::new()),
//!     Arc::new(LogNotifier),
//!     &RouterSettings::default(),
//! )?;
//!
//! let alert = Alert::new([("severity", "critical")]);
//! let report = router.ingest(vec![alert], "api").await?;
//! assert_eq!(report.enqueued, 1);
//!
//! router.shutdown().await;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod batcher;
pub mod config;
pub mod dedup;
pub mod deliver;
pub mod dlq;
pub mod error;
pub mod matcher;
pub mod notifier;
pub mod rate_limit;
pub mod reaper;
pub mod router;
pub mod silence;
pub mod stats;
pub mod types;

// Re-export main types at crate root
pub use config::{ChatRouteConfig, MatcherConfig, RouteConfig, RouterSettings, compile_routes};
pub use dedup::DedupEngine;
pub use deliver::{Deliverer, format_batch, short_title};
pub use dlq::{DeadLetterRecorder, DlqRecord};
pub use error::{Result, RouterError};
pub use matcher::{LabelMatcher, Route, RouteMatcher};
pub use notifier::{Destination, LogNotifier, Notifier, OutboundMessage};
pub use rate_limit::RateLimiter;
pub use router::{DropCounts, IngestReport, Router};
pub use silence::{Silence, SilenceRegistry};
pub use stats::{DeliveryCounts, RouterStats, StatsSnapshot};
pub use types::{Alert, AlertmanagerPayload, DropReason, fingerprint};
