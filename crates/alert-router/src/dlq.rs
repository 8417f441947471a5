//! Dead-letter recording of failed deliveries.

use std::sync::Arc;

use alert_store::{Namespace, StateStore, StateStoreExt};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::error::Result;
use crate::types::Alert;

/// One failed delivery attempt. Never modified after it is written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DlqRecord {
    /// Store key; sorts by record time.
    pub id: String,
    /// When the failure was recorded.
    pub recorded_at: DateTime<Utc>,
    /// Route whose flush failed.
    pub route: String,
    /// Destination that failed, e.g. `chat:#oncall`.
    pub destination: String,
    /// The formatted payload that was sent.
    pub payload: String,
    /// The batch that was being delivered.
    pub alerts: Vec<Alert>,
    /// Transport error text.
    pub error: String,
}

/// Appends failed deliveries to the [`Namespace::Dlq`] namespace.
#[derive(Debug, Clone)]
pub struct DeadLetterRecorder {
    store: Arc<dyn StateStore>,
}

impl DeadLetterRecorder {
    /// Creates a recorder over the given store.
    #[must_use]
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self { store }
    }

    /// Writes one record.
    ///
    /// Keys are the zero-padded Unix nanosecond time followed by a random
    /// suffix, so they are unique and sort chronologically.
    ///
    /// # Errors
    ///
    /// Returns `RouterError::Store` if the record cannot be persisted.
    pub async fn record(
        &self,
        route: &str,
        destination: &str,
        payload: &str,
        alerts: &[Alert],
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<DlqRecord> {
        let nanos = now
            .timestamp_nanos_opt()
            .unwrap_or_else(|| now.timestamp_micros().saturating_mul(1_000));
        let record = DlqRecord {
            id: format!("{nanos:020}-{}", Uuid::new_v4().simple()),
            recorded_at: now,
            route: route.to_string(),
            destination: destination.to_string(),
            payload: payload.to_string(),
            alerts: alerts.to_vec(),
            error: error.to_string(),
        };
        self.store
            .set_json(Namespace::Dlq, &record.id, &record)
            .await?;

        info!(
            dlq_id = %record.id,
            route = %record.route,
            destination = %record.destination,
            alerts = record.alerts.len(),
            "recorded failed delivery"
        );
        Ok(record)
    }

    /// Lists records oldest first, optionally restricted to one route.
    ///
    /// # Errors
    ///
    /// Returns `RouterError::Store` if the store cannot be read.
    pub async fn list(&self, route: Option<&str>) -> Result<Vec<DlqRecord>> {
        Ok(self
            .store
            .scan_json::<DlqRecord>(Namespace::Dlq)
            .await?
            .into_iter()
            .map(|(_, record)| record)
            .filter(|record| route.is_none_or(|r| record.route == r))
            .collect())
    }
}
