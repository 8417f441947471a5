//! Route definitions for the HTTP API.

use std::sync::Arc;

use axum::Router;
use axum::middleware;
use axum::routing::{delete, get, post};
use tower_http::trace::TraceLayer;

use crate::api::handlers::{
    create_silence, delete_silence, get_stats, healthz, ingest_alertmanager, ingest_alerts,
    list_dlq, list_silences, metrics, require_admin_token,
};
use crate::api::state::ApiState;

/// Create the axum router with all API routes.
///
/// `/admin/*` routes pass through the bearer-token check; `/metrics` does not.
pub fn create_router(state: Arc<ApiState>) -> Router {
    let admin = Router::new()
        .route("/admin/silences", get(list_silences).post(create_silence))
        .route("/admin/silences/{id}", delete(delete_silence))
        .route("/admin/dlq", get(list_dlq))
        .route("/admin/stats", get(get_stats))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            require_admin_token,
        ));

    Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics))
        .route("/webhook/alertmanager", post(ingest_alertmanager))
        .route("/api/v1/alerts", post(ingest_alerts))
        .merge(admin)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}
