//! Silences: time-bounded rules that suppress alerts by label regex.
//!
//! Silences live in the [`Namespace::Silence`] namespace of the state store,
//! so they survive restarts and are shared with the background reaper.

use std::collections::HashMap;
use std::sync::Arc;

use alert_store::{Mutation, Namespace, StateStore, StateStoreExt};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{Result, RouterError};
use crate::types::Alert;

/// A silence suppressing alerts whose `label` value matches `regex`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Silence {
    /// Unique identifier.
    pub id: String,
    /// Label the silence inspects.
    pub label: String,
    /// Regular expression the label value must match.
    pub regex: String,
    /// The silence stops applying at this instant.
    pub expires_at: DateTime<Utc>,
    /// When the silence was stored.
    pub created_at: DateTime<Utc>,
}

impl Silence {
    /// Returns `true` once `now` has reached the expiry.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Creates, evaluates and reaps silences.
#[derive(Debug)]
pub struct SilenceRegistry {
    store: Arc<dyn StateStore>,
    compiled: RwLock<HashMap<String, Regex>>,
}

impl SilenceRegistry {
    /// Creates a registry over the given store.
    #[must_use]
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self {
            store,
            compiled: RwLock::new(HashMap::new()),
        }
    }

    /// Creates a silence with a generated id.
    ///
    /// An expiry in the past is accepted; such a silence never matches.
    ///
    /// # Errors
    ///
    /// Returns `RouterError::Validation` if the label or regex is empty or
    /// the regex does not compile, or `RouterError::Store` if it cannot be
    /// persisted.
    pub async fn create(
        &self,
        label: &str,
        pattern: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<Silence> {
        self.upsert(&Uuid::new_v4().to_string(), label, pattern, expires_at)
            .await
    }

    /// Creates or replaces the silence with the given id.
    ///
    /// # Errors
    ///
    /// Same as [`create`](Self::create), plus `RouterError::Validation` for a
    /// blank id.
    pub async fn upsert(
        &self,
        id: &str,
        label: &str,
        pattern: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<Silence> {
        if id.trim().is_empty() {
            return Err(RouterError::Validation {
                reason: "silence id cannot be empty".to_string(),
            });
        }
        if label.is_empty() {
            return Err(RouterError::Validation {
                reason: "silence label cannot be empty".to_string(),
            });
        }
        if pattern.is_empty() {
            return Err(RouterError::Validation {
                reason: "silence regex cannot be empty".to_string(),
            });
        }
        self.compile(pattern)?;

        let silence = Silence {
            id: id.to_string(),
            label: label.to_string(),
            regex: pattern.to_string(),
            expires_at,
            created_at: Utc::now(),
        };
        self.store
            .set_json(Namespace::Silence, &silence.id, &silence)
            .await?;

        info!(
            silence_id = %silence.id,
            label = %silence.label,
            regex = %silence.regex,
            expires_at = %silence.expires_at,
            "stored silence"
        );
        Ok(silence)
    }

    /// Looks up a silence by id, expired or not.
    ///
    /// # Errors
    ///
    /// Returns `RouterError::Store` if the store cannot be read.
    pub async fn get(&self, id: &str) -> Result<Option<Silence>> {
        Ok(self.store.get_json(Namespace::Silence, id).await?)
    }

    /// Deletes a silence. Returns `true` if it existed.
    ///
    /// # Errors
    ///
    /// Returns `RouterError::Store` if the deletion cannot be persisted.
    pub async fn delete(&self, id: &str) -> Result<bool> {
        let removed = self.store.delete(Namespace::Silence, id).await?;
        if removed {
            info!(silence_id = %id, "deleted silence");
        }
        Ok(removed)
    }

    /// Lists silences ordered by creation time. Expired silences are only
    /// included when asked for.
    ///
    /// # Errors
    ///
    /// Returns `RouterError::Store` if the store cannot be read.
    pub async fn list(&self, include_expired: bool, now: DateTime<Utc>) -> Result<Vec<Silence>> {
        let mut silences: Vec<Silence> = self
            .store
            .scan_json::<Silence>(Namespace::Silence)
            .await?
            .into_iter()
            .map(|(_, s)| s)
            .filter(|s| include_expired || !s.is_expired(now))
            .collect();
        silences.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(silences)
    }

    /// Returns `true` if any unexpired silence matches the alert. Stops at
    /// the first match.
    ///
    /// # Errors
    ///
    /// Returns `RouterError::Store` if the silences cannot be read.
    pub async fn is_silenced(&self, alert: &Alert, now: DateTime<Utc>) -> Result<bool> {
        let silences = self.store.scan_json::<Silence>(Namespace::Silence).await?;
        for (_, silence) in silences {
            if silence.is_expired(now) {
                continue;
            }
            let Some(value) = alert.label(&silence.label) else {
                continue;
            };
            match self.compile(&silence.regex) {
                Ok(regex) if regex.is_match(value) => {
                    debug!(
                        silence_id = %silence.id,
                        fingerprint = %alert.fingerprint,
                        "silence matched"
                    );
                    return Ok(true);
                }
                Ok(_) => {}
                Err(e) => warn!(
                    silence_id = %silence.id,
                    error = %e,
                    "stored silence has invalid regex"
                ),
            }
        }
        Ok(false)
    }

    /// Removes every silence expired at `now`. Returns how many were removed.
    ///
    /// Each removal re-checks the stored record under the store's per-key
    /// atomicity, so a silence extended concurrently is kept.
    ///
    /// # Errors
    ///
    /// Returns `RouterError::Store` if the store fails.
    pub async fn reap(&self, now: DateTime<Utc>) -> Result<usize> {
        let mut removed = 0;
        for (id, _) in self.store.scan(Namespace::Silence).await? {
            let mut expired = false;
            self.store
                .update(Namespace::Silence, &id, &mut |current| {
                    expired = current
                        .and_then(|v| serde_json::from_value::<Silence>(v.clone()).ok())
                        .is_some_and(|s| s.is_expired(now));
                    if expired {
                        Mutation::Remove
                    } else {
                        Mutation::Keep
                    }
                })
                .await?;
            if expired {
                debug!(silence_id = %id, "reaped silence");
                removed += 1;
            }
        }

        if removed > 0 {
            info!(removed, "reaped expired silences");
        }
        Ok(removed)
    }

    fn compile(&self, pattern: &str) -> Result<Regex> {
        if let Some(regex) = self.compiled.read().get(pattern) {
            return Ok(regex.clone());
        }
        let regex = Regex::new(pattern).map_err(|e| RouterError::Validation {
            reason: format!("invalid silence regex: {e}"),
        })?;
        self.compiled
            .write()
            .insert(pattern.to_string(), regex.clone());
        Ok(regex)
    }
}
