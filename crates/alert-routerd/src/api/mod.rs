//! HTTP API: alert ingestion and administration.
//!
//! | Method | Path | Purpose |
//! |--------|------|---------|
//! | GET | `/healthz` | Liveness |
//! | GET | `/metrics` | OpenMetrics text, unauthenticated |
//! | POST | `/webhook/alertmanager` | Ingest an Alertmanager webhook |
//! | POST | `/api/v1/alerts` | Ingest a JSON array of alerts |
//! | POST | `/admin/silences` | Create or replace a silence |
//! | GET | `/admin/silences` | List silences (`?include_expired=true`) |
//! | DELETE | `/admin/silences/{id}` | Delete a silence |
//! | GET | `/admin/dlq` | List dead letters (`?route=`) |
//! | GET | `/admin/stats` | Counters and queue depth |

pub mod error;
pub mod handlers;
pub mod routes;
pub mod state;

pub use error::{ApiError, ApiResult};
pub use routes::create_router;
pub use state::ApiState;
