//! HTTP route handlers.
//!
//! Every `/api/admin/*` route requires the shared-secret header; a missing
//! or mismatched secret returns 401. `/healthz` is unauthenticated.

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use surveyor::{EvalQueue, LightweightBackfill, Scheduler, TickOptions};
use tracing::{info, warn};

/// Header carrying the shared admin secret.
pub const ADMIN_SECRET_HEADER: &str = "x-admin-secret";

/// Shared state for all handlers.
#[derive(Clone)]
pub struct AppState {
    /// The scheduler driving ticks.
    pub scheduler: Arc<Scheduler>,
    /// The evaluation queue.
    pub queue: EvalQueue,
    /// The lightweight backfill, for the explicit admin command.
    pub backfill: Arc<LightweightBackfill>,
    /// Shared secret; `None` rejects every admin request.
    pub admin_secret: Option<String>,
    /// Process start time.
    pub started_at: DateTime<Utc>,
}

/// Optional body of the schedule endpoint.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct ScheduleBody {
    /// Schedule every periodic blueprint regardless of freshness.
    #[serde(default)]
    pub force: bool,
    /// Override the configured per-tick batch limit.
    #[serde(default)]
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
struct StatusResponse {
    started_at: DateTime<Utc>,
    uptime_secs: i64,
    queue: surveyor::QueueStats,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

fn authorized(state: &AppState, headers: &HeaderMap) -> bool {
    let Some(expected) = &state.admin_secret else {
        return false;
    };
    headers
        .get(ADMIN_SECRET_HEADER)
        .and_then(|value| value.to_str().ok())
        .map_or(false, |provided| provided == expected)
}

async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

async fn status(State(state): State<AppState>, headers: HeaderMap) -> impl IntoResponse {
    if !authorized(&state, &headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    let response = StatusResponse {
        started_at: state.started_at,
        uptime_secs: Utc::now()
            .signed_duration_since(state.started_at)
            .num_seconds(),
        queue: state.queue.stats(),
    };
    Json(response).into_response()
}

async fn schedule(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Option<Json<ScheduleBody>>,
) -> impl IntoResponse {
    if !authorized(&state, &headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    let body = body.map(|Json(b)| b).unwrap_or_default();
    info!(force = body.force, limit = ?body.limit, "schedule requested via endpoint");

    match state
        .scheduler
        .tick(
            &state.queue,
            TickOptions {
                force: body.force,
                limit: body.limit,
            },
        )
        .await
    {
        Ok(report) => Json(report).into_response(),
        Err(e) => {
            warn!(error = %e, "scheduler tick failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse {
                    error: e.to_string(),
                }),
            )
                .into_response()
        }
    }
}

async fn backfill(State(state): State<AppState>, headers: HeaderMap) -> impl IntoResponse {
    if !authorized(&state, &headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    info!("backfill requested via endpoint");
    match state.backfill.run().await {
        Ok(report) => Json(report).into_response(),
        Err(e) => {
            warn!(error = %e, "explicit backfill failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse {
                    error: e.to_string(),
                }),
            )
                .into_response()
        }
    }
}

/// Assemble the router.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/api/admin/status", get(status))
        .route("/api/admin/schedule", post(schedule))
        .route("/api/admin/backfill", post(backfill))
        .with_state(state)
}
