//! Fixed-window per-route rate limiting.
//!
//! Counters are keyed `route:bucket`, where `bucket` is the Unix minute.
//! A new minute starts a new counter. Old counters are left in place.

use std::sync::Arc;

use alert_store::{Namespace, StateStore};
use chrono::{DateTime, Utc};

use crate::error::Result;

/// Length of one rate-limit bucket in seconds.
pub const BUCKET_SECS: i64 = 60;

/// Caps admitted alerts per route per minute bucket.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    store: Arc<dyn StateStore>,
}

impl RateLimiter {
    /// Creates a limiter over the given store.
    #[must_use]
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self { store }
    }

    /// Store key of the bucket containing `now`.
    #[must_use]
    pub fn bucket_key(route: &str, now: DateTime<Utc>) -> String {
        format!("{route}:{}", now.timestamp().div_euclid(BUCKET_SECS))
    }

    /// Counts one attempt and decides whether it is admitted.
    ///
    /// A `limit` of zero or less admits everything without touching the
    /// store. Otherwise the bucket counter is incremented atomically and the
    /// attempt is admitted iff the count before it was below `limit`.
    ///
    /// # Errors
    ///
    /// Returns `RouterError::Store` if the counter cannot be incremented.
    pub async fn admit(&self, route: &str, limit: i64, now: DateTime<Utc>) -> Result<bool> {
        if limit <= 0 {
            return Ok(true);
        }
        let key = Self::bucket_key(route, now);
        let count = self.store.increment(Namespace::Rate, &key).await?;
        Ok(count - 1 < limit)
    }
}
