//! Route definitions and router settings.
//!
//! [`RouteConfig`] is the serializable shape routes take in configuration
//! files. [`compile_routes`] turns a list of them into immutable [`Route`]s,
//! rejecting invalid definitions as a whole.

use std::collections::HashSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::matcher::Route;

/// Default per-route queue capacity.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;
/// Default minimum interval between flushes of one route.
pub const DEFAULT_FLUSH_FLOOR: Duration = Duration::from_secs(5);
/// Default pause after a flush with a failed delivery.
pub const DEFAULT_FAILURE_BACKOFF: Duration = Duration::from_secs(2);
/// Default silence reaper period.
pub const DEFAULT_REAPER_INTERVAL: Duration = Duration::from_secs(60);

/// A label matcher as written in configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatcherConfig {
    /// Label name that must be present.
    pub label: String,
    /// Regular expression the label value must match.
    pub regex: String,
}

impl MatcherConfig {
    /// Creates a matcher definition.
    pub fn new(label: impl Into<String>, regex: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            regex: regex.into(),
        }
    }
}

/// Chat webhook destination of a route.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatRouteConfig {
    /// Incoming-webhook URL.
    pub webhook: String,
    /// Channel name, informational.
    #[serde(default)]
    pub channel: Option<String>,
}

/// A route as written in configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteConfig {
    /// Unique route name.
    pub name: String,
    /// Matchers that must all hold for an alert to take this route.
    #[serde(default)]
    pub matchers: Vec<MatcherConfig>,
    /// Aggregation window in seconds.
    #[serde(default)]
    pub group_window_secs: u64,
    /// Dedupe window in seconds; 0 disables suppression.
    #[serde(default)]
    pub dedupe_window_secs: u64,
    /// Admits per minute; 0 or negative disables limiting.
    #[serde(default)]
    pub rate_limit_per_min: i64,
    /// Chat destination, tried first.
    #[serde(default)]
    pub chat: Option<ChatRouteConfig>,
    /// Email recipients, tried after chat.
    #[serde(default)]
    pub email_to: Vec<String>,
}

impl RouteConfig {
    /// Creates a route definition with no matchers or destinations.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            matchers: Vec::new(),
            group_window_secs: 0,
            dedupe_window_secs: 0,
            rate_limit_per_min: 0,
            chat: None,
            email_to: Vec::new(),
        }
    }

    /// Adds a matcher.
    #[must_use]
    pub fn matcher(mut self, label: impl Into<String>, regex: impl Into<String>) -> Self {
        self.matchers.push(MatcherConfig::new(label, regex));
        self
    }

    /// Sets the aggregation window.
    #[must_use]
    pub const fn group_window_secs(mut self, secs: u64) -> Self {
        self.group_window_secs = secs;
        self
    }

    /// Sets the dedupe window.
    #[must_use]
    pub const fn dedupe_window_secs(mut self, secs: u64) -> Self {
        self.dedupe_window_secs = secs;
        self
    }

    /// Sets the per-minute rate limit.
    #[must_use]
    pub const fn rate_limit_per_min(mut self, limit: i64) -> Self {
        self.rate_limit_per_min = limit;
        self
    }

    /// Sets the chat destination.
    #[must_use]
    pub fn chat(mut self, webhook: impl Into<String>, channel: Option<&str>) -> Self {
        self.chat = Some(ChatRouteConfig {
            webhook: webhook.into(),
            channel: channel.map(str::to_string),
        });
        self
    }

    /// Adds an email recipient.
    #[must_use]
    pub fn email_to(mut self, to: impl Into<String>) -> Self {
        self.email_to.push(to.into());
        self
    }
}

/// Runtime knobs of the router.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouterSettings {
    /// Capacity of each route's queue.
    pub queue_capacity: usize,
    /// Minimum flush interval; a route flushes every
    /// `max(group_window, flush_floor)`.
    pub flush_floor: Duration,
    /// Pause a route worker takes after a flush with a failed delivery.
    pub failure_backoff: Duration,
    /// Silence reaper period.
    pub reaper_interval: Duration,
}

impl Default for RouterSettings {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            flush_floor: DEFAULT_FLUSH_FLOOR,
            failure_backoff: DEFAULT_FAILURE_BACKOFF,
            reaper_interval: DEFAULT_REAPER_INTERVAL,
        }
    }
}

/// Compiles route definitions, omitting every invalid or duplicate route.
///
/// Each rejection is logged with its reason; the returned list preserves
/// configuration order.
pub fn compile_routes(configs: &[RouteConfig]) -> Vec<Route> {
    let mut seen = HashSet::new();
    let mut routes = Vec::with_capacity(configs.len());

    for config in configs {
        if !seen.insert(config.name.as_str()) {
            warn!(route = %config.name, "duplicate route name, route omitted");
            continue;
        }
        match Route::compile(config) {
            Ok(route) => {
                info!(
                    route = %route.name(),
                    matchers = route.matchers().len(),
                    destinations = route.destinations().len(),
                    "compiled route"
                );
                routes.push(route);
            }
            Err(e) => warn!(route = %config.name, error = %e, "invalid route omitted"),
        }
    }

    routes
}
