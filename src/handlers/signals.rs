use axum::{
    extract::{Path, Query, State},
    response::sse::{Event, KeepAlive, Sse},
    Json,
};
use std::convert::Infallible;
use std::time::Duration;
use tokio_stream::wrappers::{errors::BroadcastStreamRecvError, BroadcastStream};
use tokio_stream::StreamExt;
use validator::Validate;

use crate::errors::AppError;
use crate::models::api::{SignalSnapshot, SignalsQuery, SignalsResponse, ValidateRequest};
use crate::models::messages::ValidationOutcome;
use crate::models::signal::TradeSignal;
use crate::state::AppState;

#[utoipa::path(
    get,
    path = "/signals",
    params(SignalsQuery),
    responses(
        (status = 200, description = "Tracked trade signals", body = SignalsResponse),
        (status = 400, description = "Invalid request", body = crate::errors::ErrorResponse)
    )
)]
pub async fn get_signals(
    State(state): State<AppState>,
    Query(query): Query<SignalsQuery>,
) -> Result<Json<SignalsResponse>, AppError> {
    query
        .validate()
        .map_err(|err| AppError::Validation(err.to_string()))?;

    let signals = state
        .signal_state
        .signals
        .read()
        .await
        .iter()
        .filter(|signal| query.matches(signal))
        .cloned()
        .collect();
    Ok(Json(SignalsResponse::new(signals)))
}

#[utoipa::path(
    get,
    path = "/signals/{id}",
    params(
        ("id" = String, Path, description = "Signal id")
    ),
    responses(
        (status = 200, description = "Tracked trade signal", body = TradeSignal),
        (status = 404, description = "No tracked signal with this id", body = crate::errors::ErrorResponse)
    )
)]
pub async fn get_signal(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<TradeSignal>, AppError> {
    state
        .engine
        .signal(&id)
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("signal {} is not tracked", id)))
}

#[utoipa::path(
    get,
    path = "/signals/stream",
    responses(
        (status = 200, description = "SSE stream of signal snapshots", content_type = "text/event-stream")
    )
)]
pub async fn get_signal_stream(
    State(state): State<AppState>,
) -> Result<Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>>>, AppError> {
    let initial_events = match snapshot_event(state.signal_state.current().await) {
        Some(event) => vec![Ok(event)],
        None => Vec::new(),
    };
    let initial_stream = tokio_stream::iter(initial_events);

    let rx = state.signal_state.broadcaster.subscribe();
    let broadcast_stream = BroadcastStream::new(rx).filter_map(|message| match message {
        Ok(snapshot) => snapshot_event(snapshot).map(Ok),
        Err(BroadcastStreamRecvError::Lagged(skipped)) => {
            tracing::debug!("signal stream subscriber lagged by {}", skipped);
            None
        }
    });

    let stream = initial_stream.chain(broadcast_stream);

    Ok(Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(15))))
}

#[utoipa::path(
    post,
    path = "/signals/validate",
    request_body = ValidateRequest,
    responses(
        (status = 200, description = "Signal re-checked against the price", body = ValidationOutcome),
        (status = 400, description = "Invalid request", body = crate::errors::ErrorResponse),
        (status = 504, description = "Worker timed out", body = crate::errors::ErrorResponse)
    )
)]
pub async fn validate_signal(
    State(state): State<AppState>,
    Json(request): Json<ValidateRequest>,
) -> Result<Json<ValidationOutcome>, AppError> {
    request
        .validate()
        .map_err(|err| AppError::Validation(err.to_string()))?;

    let now = request
        .now
        .unwrap_or_else(|| chrono::Utc::now().timestamp());
    let outcome = state
        .engine
        .validate(request.signal, request.current_price, now)
        .await?;
    Ok(Json(outcome))
}

fn snapshot_event(snapshot: SignalSnapshot) -> Option<Event> {
    let data = serde_json::to_string(&snapshot).ok()?;
    Some(
        Event::default()
            .event("snapshot")
            .id(snapshot.as_of_ms.to_string())
            .data(data),
    )
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::business_logic::config::ServiceConfig;
    use crate::models::candle::fixtures::washout_bounce;
    use crate::services::engine::SignalEngine;
    use crate::services::signal_state::SignalStateInner;

    fn app_state() -> AppState {
        let service = ServiceConfig {
            worker_count: 1,
            ..ServiceConfig::default()
        };
        AppState {
            signal_state: SignalStateInner::new(4),
            engine: Arc::new(SignalEngine::from_service_config(&service)),
        }
    }

    #[tokio::test]
    async fn get_signal_returns_tracked_signal_by_id() {
        let state = app_state();
        let update = state
            .engine
            .process("BTC", washout_bounce(), Vec::new(), 1_000_000)
            .await
            .unwrap();
        let id = update.registered[0].clone();

        let Json(signal) = get_signal(State(state), Path(id.clone())).await.unwrap();
        assert_eq!(signal.id, id);
        assert_eq!(signal.symbol, "BTC");
    }

    #[tokio::test]
    async fn unknown_signal_id_is_not_found() {
        let err = get_signal(State(app_state()), Path("missing".to_string()))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }
}
