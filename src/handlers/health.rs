use axum::{extract::State, Json};

use crate::errors::AppError;
use crate::models::api::{HealthResponse, PoolHealth};
use crate::state::AppState;

#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Health check with worker pool load", body = HealthResponse)
    )
)]
pub async fn health(State(state): State<AppState>) -> Result<Json<HealthResponse>, AppError> {
    let pool = state.engine.pool();
    let (tracked_signals, open_signals) = state.engine.signal_counts();
    Ok(Json(HealthResponse {
        status: "healthy".to_string(),
        pool: PoolHealth {
            workers: pool.worker_count(),
            idle_workers: pool.idle_count(),
            pending_requests: pool.pending_count(),
            queued_requests: pool.queued_count(),
        },
        tracked_signals,
        open_signals,
        cached_windows: state.engine.cached_windows(),
    }))
}
