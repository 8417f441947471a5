//! Core types for alert routing.
//!
//! This module provides the fundamental types used throughout the alert-router crate:
//! - [`Alert`]: An incoming alert event and its fingerprint
//! - [`AlertmanagerPayload`]: The Alertmanager webhook body alerts arrive in
//! - [`DropReason`]: Why an alert was not enqueued for a route

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Label carrying the alert severity.
pub const SEVERITY_LABEL: &str = "severity";
/// Label carrying the alerting instance.
pub const INSTANCE_LABEL: &str = "instance";
/// Label or annotation carrying a one-line summary.
pub const SUMMARY_KEY: &str = "summary";

/// Computes the fingerprint of a label set.
///
/// Labels are canonicalised as `key=value` pairs in key order, joined with
/// `,`, and hashed with BLAKE3. The result is 64 lowercase hex characters and
/// does not depend on how the labels were inserted.
#[must_use]
pub fn fingerprint(labels: &BTreeMap<String, String>) -> String {
    let canonical = labels
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(",");
    blake3::hash(canonical.as_bytes()).to_hex().to_string()
}

/// An alert event flowing through the router.
///
/// Alerts are never persisted on their own; they live for one pipeline pass
/// and, once admitted, inside a route's pending batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    /// Identifying labels.
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    /// Descriptive annotations.
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    /// When the alert started firing.
    #[serde(default = "Utc::now")]
    pub starts_at: DateTime<Utc>,
    /// When the alert resolved, if it has.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ends_at: Option<DateTime<Utc>>,
    /// Link back to the system that produced the alert.
    #[serde(default, rename = "generatorURL", skip_serializing_if = "String::is_empty")]
    pub generator_url: String,
    /// Identity of the alert; computed from the labels when empty.
    #[serde(default)]
    pub fingerprint: String,
}

impl Alert {
    /// Creates an alert with the given labels, starting now.
    #[must_use]
    pub fn new<K, V>(labels: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            labels: labels
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
            annotations: BTreeMap::new(),
            starts_at: Utc::now(),
            ends_at: None,
            generator_url: String::new(),
            fingerprint: String::new(),
        }
    }

    /// Adds a label.
    #[must_use]
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    /// Adds an annotation.
    #[must_use]
    pub fn with_annotation(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.annotations.insert(key.into(), value.into());
        self
    }

    /// Sets the start time.
    #[must_use]
    pub const fn with_starts_at(mut self, starts_at: DateTime<Utc>) -> Self {
        self.starts_at = starts_at;
        self
    }

    /// Sets the generator URL.
    #[must_use]
    pub fn with_generator_url(mut self, url: impl Into<String>) -> Self {
        self.generator_url = url.into();
        self
    }

    /// Computes the fingerprint if the alert does not carry one yet, and
    /// returns it.
    pub fn ensure_fingerprint(&mut self) -> &str {
        if self.fingerprint.is_empty() {
            self.fingerprint = fingerprint(&self.labels);
        }
        &self.fingerprint
    }

    /// Returns the value of a label.
    #[must_use]
    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels.get(key).map(String::as_str)
    }

    /// Returns the severity label, if present.
    #[must_use]
    pub fn severity(&self) -> Option<&str> {
        self.label(SEVERITY_LABEL)
    }

    /// One-line summary: the `summary` label, else the `summary` annotation,
    /// else the first eight characters of the fingerprint.
    #[must_use]
    pub fn summary(&self) -> &str {
        self.label(SUMMARY_KEY)
            .or_else(|| self.annotations.get(SUMMARY_KEY).map(String::as_str))
            .unwrap_or_else(|| self.short_fingerprint())
    }

    /// First eight characters of the fingerprint.
    #[must_use]
    pub fn short_fingerprint(&self) -> &str {
        self.fingerprint
            .get(..8)
            .unwrap_or(self.fingerprint.as_str())
    }
}

/// Body of an Alertmanager webhook notification.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertmanagerPayload {
    /// Receiver name configured in Alertmanager.
    #[serde(default)]
    pub receiver: String,
    /// `firing` or `resolved`.
    #[serde(default)]
    pub status: String,
    /// The alerts of this notification.
    #[serde(default)]
    pub alerts: Vec<Alert>,
    /// Alertmanager's external URL.
    #[serde(default, rename = "externalURL")]
    pub external_url: String,
}

/// The single reason an alert was dropped for a route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    /// An active silence matched the alert.
    Silenced,
    /// The route's per-minute limit was reached.
    #[serde(rename = "ratelimit")]
    RateLimit,
    /// The same fingerprint was admitted within the dedupe window.
    Dedupe,
    /// The route's queue had no room.
    QueueFull,
}

impl DropReason {
    /// Every reason, in pipeline order.
    pub const ALL: [Self; 4] = [Self::Silenced, Self::RateLimit, Self::Dedupe, Self::QueueFull];

    /// Returns the reason as a string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Silenced => "silenced",
            Self::RateLimit => "ratelimit",
            Self::Dedupe => "dedupe",
            Self::QueueFull => "queue_full",
        }
    }
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
