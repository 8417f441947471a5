//! Fingerprint deduplication.
//!
//! Records map a fingerprint to the Unix-millisecond time it was last
//! admitted. Records are shared by every route.

use std::sync::Arc;
use std::time::Duration;

use alert_store::{Mutation, Namespace, StateStore, StateStoreExt};
use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::error::Result;

/// Suppresses repeats of a fingerprint within a window of its last
/// admitted sighting.
#[derive(Debug, Clone)]
pub struct DedupEngine {
    store: Arc<dyn StateStore>,
}

fn window_millis(window: Duration) -> i64 {
    i64::try_from(window.as_millis()).unwrap_or(i64::MAX)
}

fn within_window(last_seen: i64, window: Duration, now: DateTime<Utc>) -> bool {
    now.timestamp_millis().saturating_sub(last_seen) < window_millis(window)
}

impl DedupEngine {
    /// Creates an engine over the given store.
    #[must_use]
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self { store }
    }

    /// Returns `true` if `fingerprint` was admitted less than `window` ago.
    ///
    /// # Errors
    ///
    /// Returns `RouterError::Store` if the record cannot be read.
    pub async fn should_suppress(
        &self,
        fingerprint: &str,
        window: Duration,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let last_seen: Option<i64> = self
            .store
            .get_json(Namespace::Dedupe, fingerprint)
            .await?;
        Ok(last_seen.is_some_and(|last| within_window(last, window, now)))
    }

    /// Records `now` as the last admitted sighting. Never moves the record
    /// backwards.
    ///
    /// # Errors
    ///
    /// Returns `RouterError::Store` if the record cannot be written.
    pub async fn mark_seen(&self, fingerprint: &str, now: DateTime<Utc>) -> Result<()> {
        let now_ms = now.timestamp_millis();
        self.store
            .update(Namespace::Dedupe, fingerprint, &mut |current| {
                match current.and_then(Value::as_i64) {
                    Some(last) if last >= now_ms => Mutation::Keep,
                    _ => Mutation::Put(Value::from(now_ms)),
                }
            })
            .await?;
        Ok(())
    }

    /// Checks and marks in one atomic step. Returns `true` if the sighting
    /// is suppressed; otherwise the record is refreshed to `now` and the
    /// sighting admitted.
    ///
    /// A suppressed sighting leaves the record unchanged, so the window is
    /// measured from the last admitted sighting.
    ///
    /// # Errors
    ///
    /// Returns `RouterError::Store` if the record cannot be read or written.
    pub async fn observe(
        &self,
        fingerprint: &str,
        window: Duration,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let now_ms = now.timestamp_millis();
        let mut suppressed = false;
        self.store
            .update(Namespace::Dedupe, fingerprint, &mut |current| {
                let last = current.and_then(Value::as_i64);
                suppressed = last.is_some_and(|last| within_window(last, window, now));
                match last {
                    _ if suppressed => Mutation::Keep,
                    Some(last) if last >= now_ms => Mutation::Keep,
                    _ => Mutation::Put(Value::from(now_ms)),
                }
            })
            .await?;
        Ok(suppressed)
    }
}
