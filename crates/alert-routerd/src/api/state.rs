//! Shared state of the HTTP handlers.

use std::sync::Arc;

use alert_router::Router;

/// State shared by every handler.
#[derive(Debug, Clone)]
pub struct ApiState {
    router: Arc<Router>,
    auth_token: Option<String>,
}

impl ApiState {
    /// Creates state with open admin endpoints.
    #[must_use]
    pub const fn new(router: Arc<Router>) -> Self {
        Self {
            router,
            auth_token: None,
        }
    }

    /// Requires `Authorization: Bearer <token>` on admin endpoints.
    #[must_use]
    pub fn with_auth_token(mut self, token: Option<String>) -> Self {
        self.auth_token = token;
        self
    }

    /// The router.
    #[must_use]
    pub const fn router(&self) -> &Arc<Router> {
        &self.router
    }

    /// Returns `true` if `header` carries the configured bearer token, or
    /// if no token is configured.
    #[must_use]
    pub fn is_authorized(&self, header: Option<&str>) -> bool {
        let Some(expected) = self.auth_token.as_deref() else {
            return true;
        };
        header
            .and_then(|value| value.strip_prefix("Bearer "))
            .is_some_and(|token| token.trim() == expected)
    }
}
