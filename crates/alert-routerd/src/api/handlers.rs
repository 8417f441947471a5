//! HTTP request handlers.

use std::sync::Arc;

use alert_router::stats;
use alert_router::{Alert, AlertmanagerPayload, DlqRecord, IngestReport, Silence, StatsSnapshot};
use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, Request, State};
use axum::http::{StatusCode, header};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{info, warn};

use crate::api::error::{ApiError, ApiResult};
use crate::api::state::ApiState;

/// Source recorded for Alertmanager webhook deliveries.
pub const SOURCE_ALERTMANAGER: &str = "alertmanager";
/// Source recorded for direct API submissions.
pub const SOURCE_API: &str = "api";

/// Body of `POST /admin/silences`.
#[derive(Debug, Deserialize)]
pub struct CreateSilenceRequest {
    /// Explicit id; the silence with this id is replaced.
    #[serde(default)]
    pub id: Option<String>,
    /// Label to inspect.
    pub label: String,
    /// Regular expression the label value must match.
    pub regex: String,
    /// Expiry instant (RFC 3339).
    pub until: DateTime<Utc>,
}

/// Query parameters of `GET /admin/silences`.
#[derive(Debug, Default, Deserialize)]
pub struct SilenceQuery {
    /// Include silences that have already expired.
    #[serde(default)]
    pub include_expired: bool,
}

/// Query parameters of `GET /admin/dlq`.
#[derive(Debug, Default, Deserialize)]
pub struct DlqQuery {
    /// Only records of this route.
    pub route: Option<String>,
}

/// Handle GET /healthz - liveness.
pub async fn healthz() -> &'static str {
    "ok"
}

/// Handle POST /webhook/alertmanager - ingest an Alertmanager webhook.
pub async fn ingest_alertmanager(
    State(state): State<Arc<ApiState>>,
    payload: Result<Json<AlertmanagerPayload>, JsonRejection>,
) -> ApiResult<Json<IngestReport>> {
    let Json(payload) = payload?;
    ingest(&state, payload.alerts, SOURCE_ALERTMANAGER).await
}

/// Handle POST /api/v1/alerts - ingest a bare array of alerts.
pub async fn ingest_alerts(
    State(state): State<Arc<ApiState>>,
    alerts: Result<Json<Vec<Alert>>, JsonRejection>,
) -> ApiResult<Json<IngestReport>> {
    let Json(alerts) = alerts?;
    ingest(&state, alerts, SOURCE_API).await
}

async fn ingest(
    state: &ApiState,
    alerts: Vec<Alert>,
    source: &'static str,
) -> ApiResult<Json<IngestReport>> {
    let report = state.router().ingest(alerts, source).await?;
    Ok(Json(report))
}

/// Handle POST /admin/silences - create or replace a silence.
pub async fn create_silence(
    State(state): State<Arc<ApiState>>,
    request: Result<Json<CreateSilenceRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<Silence>)> {
    let Json(request) = request?;
    let silences = state.router().silences();
    let silence = match request.id.as_deref() {
        Some(id) => {
            silences
                .upsert(id, &request.label, &request.regex, request.until)
                .await?
        }
        None => {
            silences
                .create(&request.label, &request.regex, request.until)
                .await?
        }
    };
    Ok((StatusCode::CREATED, Json(silence)))
}

/// Handle GET /admin/silences - list silences.
pub async fn list_silences(
    State(state): State<Arc<ApiState>>,
    Query(query): Query<SilenceQuery>,
) -> ApiResult<Json<Vec<Silence>>> {
    let silences = state
        .router()
        .silences()
        .list(query.include_expired, Utc::now())
        .await?;
    Ok(Json(silences))
}

/// Handle DELETE /admin/silences/{id} - delete a silence.
pub async fn delete_silence(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    if state.router().silences().delete(&id).await? {
        info!(id = %id, "silence deleted via API");
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound {
            kind: "silence",
            id,
        })
    }
}

/// Handle GET /admin/dlq - list dead-letter records.
pub async fn list_dlq(
    State(state): State<Arc<ApiState>>,
    Query(query): Query<DlqQuery>,
) -> ApiResult<Json<Vec<DlqRecord>>> {
    let records = state
        .router()
        .dlq()
        .list(query.route.as_deref())
        .await?;
    Ok(Json(records))
}

/// Handle GET /admin/stats - counters and queue depth.
pub async fn get_stats(State(state): State<Arc<ApiState>>) -> Json<StatsSnapshot> {
    Json(state.router().stats())
}

/// Handle GET /metrics - every router metric in the OpenMetrics text format.
pub async fn metrics(State(state): State<Arc<ApiState>>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, stats::CONTENT_TYPE)],
        state.router().metrics_text(),
    )
}

/// Rejects admin requests without the configured bearer token.
pub async fn require_admin_token(
    State(state): State<Arc<ApiState>>,
    request: Request,
    next: Next,
) -> ApiResult<Response> {
    let header = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok());

    if !state.is_authorized(header) {
        warn!(path = %request.uri().path(), "rejected unauthorized admin request");
        return Err(ApiError::Unauthorized);
    }
    Ok(next.run(request).await)
}
