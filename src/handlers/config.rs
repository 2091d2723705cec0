use axum::{extract::State, Json};

use crate::business_logic::config::SignalConfig;
use crate::errors::AppError;
use crate::state::AppState;

#[utoipa::path(
    get,
    path = "/config",
    responses(
        (status = 200, description = "Live signal config", body = SignalConfig)
    )
)]
pub async fn get_config(State(state): State<AppState>) -> Result<Json<SignalConfig>, AppError> {
    Ok(Json(state.engine.config().as_ref().clone()))
}

/// Invalid configs are rejected with 400 and the live config is kept.
#[utoipa::path(
    put,
    path = "/config",
    request_body = SignalConfig,
    responses(
        (status = 200, description = "Config replaced", body = SignalConfig),
        (status = 400, description = "Invalid config", body = crate::errors::ErrorResponse)
    )
)]
pub async fn put_config(
    State(state): State<AppState>,
    Json(config): Json<SignalConfig>,
) -> Result<Json<SignalConfig>, AppError> {
    let config = state.engine.update_config(config)?;
    Ok(Json(config.as_ref().clone()))
}
