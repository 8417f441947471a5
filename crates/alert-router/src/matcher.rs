//! Compiled routes and route matching.

use std::sync::Arc;
use std::time::Duration;

use regex::Regex;

use crate::config::RouteConfig;
use crate::error::{Result, RouterError};
use crate::notifier::Destination;
use crate::types::Alert;

/// A compiled label matcher: the label must exist and its value must match.
#[derive(Debug, Clone)]
pub struct LabelMatcher {
    label: String,
    regex: Regex,
}

impl LabelMatcher {
    /// Compiles a matcher.
    ///
    /// # Errors
    ///
    /// Returns `RouterError::Validation` if the label is empty or the regex
    /// does not compile.
    pub fn new(label: impl Into<String>, pattern: &str) -> Result<Self> {
        let label = label.into();
        if label.is_empty() {
            return Err(RouterError::Validation {
                reason: "matcher label cannot be empty".to_string(),
            });
        }
        let regex = Regex::new(pattern).map_err(|e| RouterError::Validation {
            reason: format!("invalid regex for label '{label}': {e}"),
        })?;
        Ok(Self { label, regex })
    }

    /// The label this matcher inspects.
    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    /// The source pattern.
    #[must_use]
    pub fn pattern(&self) -> &str {
        self.regex.as_str()
    }

    /// Returns `true` if the alert carries the label with a matching value.
    #[must_use]
    pub fn matches(&self, alert: &Alert) -> bool {
        alert
            .label(&self.label)
            .is_some_and(|value| self.regex.is_match(value))
    }
}

/// An immutable, validated route.
#[derive(Debug, Clone)]
pub struct Route {
    name: String,
    matchers: Vec<LabelMatcher>,
    group_window: Duration,
    dedupe_window: Duration,
    rate_limit_per_min: i64,
    destinations: Vec<Destination>,
}

impl Route {
    /// Compiles a route definition.
    ///
    /// Destinations are ordered chat first, then email.
    ///
    /// # Errors
    ///
    /// Returns `RouterError::Validation` if the name is blank or any matcher
    /// is invalid.
    pub fn compile(config: &RouteConfig) -> Result<Self> {
        if config.name.trim().is_empty() {
            return Err(RouterError::Validation {
                reason: "route name cannot be empty".to_string(),
            });
        }

        let matchers = config
            .matchers
            .iter()
            .map(|m| LabelMatcher::new(m.label.clone(), &m.regex))
            .collect::<Result<Vec<_>>>()?;

        let mut destinations = Vec::new();
        if let Some(chat) = &config.chat {
            destinations.push(Destination::Chat {
                webhook: chat.webhook.clone(),
                channel: chat.channel.clone(),
            });
        }
        if !config.email_to.is_empty() {
            destinations.push(Destination::Email {
                to: config.email_to.clone(),
            });
        }

        Ok(Self {
            name: config.name.clone(),
            matchers,
            group_window: Duration::from_secs(config.group_window_secs),
            dedupe_window: Duration::from_secs(config.dedupe_window_secs),
            rate_limit_per_min: config.rate_limit_per_min,
            destinations,
        })
    }

    /// Route name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Compiled matchers.
    #[must_use]
    pub fn matchers(&self) -> &[LabelMatcher] {
        &self.matchers
    }

    /// Aggregation window.
    #[must_use]
    pub const fn group_window(&self) -> Duration {
        self.group_window
    }

    /// Dedupe window.
    #[must_use]
    pub const fn dedupe_window(&self) -> Duration {
        self.dedupe_window
    }

    /// Admits per minute; `<= 0` means unlimited.
    #[must_use]
    pub const fn rate_limit_per_min(&self) -> i64 {
        self.rate_limit_per_min
    }

    /// Destinations in delivery order.
    #[must_use]
    pub fn destinations(&self) -> &[Destination] {
        &self.destinations
    }

    /// Returns `true` if every matcher holds. A route without matchers
    /// takes every alert.
    #[must_use]
    pub fn matches(&self, alert: &Alert) -> bool {
        self.matchers.iter().all(|m| m.matches(alert))
    }
}

/// Selects the routes an alert fans out to.
#[derive(Debug, Clone, Default)]
pub struct RouteMatcher {
    routes: Vec<Arc<Route>>,
}

impl RouteMatcher {
    /// Creates a matcher over compiled routes.
    #[must_use]
    pub fn new(routes: Vec<Route>) -> Self {
        Self {
            routes: routes.into_iter().map(Arc::new).collect(),
        }
    }

    /// All routes, in configuration order.
    #[must_use]
    pub fn routes(&self) -> &[Arc<Route>] {
        &self.routes
    }

    /// Routes whose matchers all hold for `alert`, in configuration order.
    pub fn matching_routes<'a>(
        &'a self,
        alert: &'a Alert,
    ) -> impl Iterator<Item = &'a Arc<Route>> + 'a {
        self.routes.iter().filter(move |r| r.matches(alert))
    }
}
