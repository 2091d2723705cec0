use axum::{extract::State, Json};
use validator::Validate;

use crate::errors::AppError;
use crate::models::api::{CalculateRequest, StochRequest};
use crate::models::messages::CalculationResult;
use crate::models::stochastic::QuadBandData;
use crate::state::AppState;

#[utoipa::path(
    post,
    path = "/calculate",
    request_body = CalculateRequest,
    responses(
        (status = 200, description = "Quad bands, divergences, confluence and signals", body = CalculationResult),
        (status = 400, description = "Invalid request", body = crate::errors::ErrorResponse),
        (status = 504, description = "Worker timed out", body = crate::errors::ErrorResponse)
    )
)]
pub async fn calculate(
    State(state): State<AppState>,
    Json(request): Json<CalculateRequest>,
) -> Result<Json<CalculationResult>, AppError> {
    request
        .validate()
        .map_err(|err| AppError::Validation(err.to_string()))?;

    let now = chrono::Utc::now().timestamp();
    let CalculateRequest {
        symbol,
        candles,
        higher_timeframes,
        config,
    } = request;

    let result = match config {
        Some(config) => {
            state
                .engine
                .calculate_with_config(&symbol, candles, higher_timeframes, now, config)
                .await?
        }
        None => {
            state
                .engine
                .calculate(&symbol, candles, higher_timeframes, now)
                .await?
        }
    };
    Ok(Json(result))
}

#[utoipa::path(
    post,
    path = "/stochastics",
    request_body = StochRequest,
    responses(
        (status = 200, description = "Quad stochastic bands only", body = QuadBandData),
        (status = 400, description = "Invalid request", body = crate::errors::ErrorResponse)
    )
)]
pub async fn stochastics(
    State(state): State<AppState>,
    Json(request): Json<StochRequest>,
) -> Result<Json<QuadBandData>, AppError> {
    request
        .validate()
        .map_err(|err| AppError::Validation(err.to_string()))?;

    let quad = state.engine.stochastics(request.candles, None).await?;
    Ok(Json(quad))
}
