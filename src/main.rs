mod business_logic;
mod errors;
mod handlers;
mod models;
mod services;
mod state;

use std::sync::Arc;

use anyhow::Context;
use axum::{
    routing::{get, post},
    Router,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::business_logic::config::{ServiceConfig, SignalConfig};
use crate::handlers::{calculate, config, health, signals};
use crate::models::api::{
    CalculateRequest, HealthResponse, SignalSnapshot, SignalsResponse, StochRequest,
    ValidateRequest,
};
use crate::models::messages::{CalculationResult, ValidationOutcome};
use crate::models::signal::{SignalEvent, TradeSignal};
use crate::models::stochastic::QuadBandData;
use crate::services::engine::SignalEngine;
use crate::services::hyperliquid::HyperliquidClient;
use crate::services::monitor::MonitorService;
use crate::services::signal_state::SignalStateInner;
use crate::state::AppState;

#[derive(OpenApi)]
#[openapi(
    paths(
        health::health,
        signals::get_signals,
        signals::get_signal,
        signals::get_signal_stream,
        signals::validate_signal,
        calculate::calculate,
        calculate::stochastics,
        config::get_config,
        config::put_config
    ),
    components(schemas(
        HealthResponse,
        SignalsResponse,
        SignalSnapshot,
        SignalEvent,
        TradeSignal,
        CalculateRequest,
        CalculationResult,
        StochRequest,
        QuadBandData,
        ValidateRequest,
        ValidationOutcome,
        SignalConfig,
        errors::ErrorResponse
    ))
)]
struct ApiDoc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = ServiceConfig::from_env();

    // Optional daily-rolling file log next to stdout
    let (file_layer, _log_guard) = match &settings.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "quadscreener.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "quadscreener=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .with(file_layer)
        .init();

    let engine = Arc::new(SignalEngine::from_service_config(&settings));
    let signal_state = SignalStateInner::new(16);

    // Start signal monitoring in background
    let monitor = MonitorService::new(
        Arc::new(HyperliquidClient::new()),
        engine.clone(),
        signal_state.clone(),
        settings.clone(),
    );
    tracing::info!(
        "Signal monitor active for {:?} on {}, scanning every {}s",
        settings.symbols,
        settings.interval,
        settings.scan_interval.as_secs()
    );
    tokio::spawn(async move {
        monitor.run().await;
    });

    let state = AppState {
        signal_state,
        engine,
    };

    // Start web server
    let app = Router::new()
        .route("/health", get(health::health))
        .route("/signals", get(signals::get_signals))
        .route("/signals/stream", get(signals::get_signal_stream))
        .route("/signals/validate", post(signals::validate_signal))
        .route("/signals/{id}", get(signals::get_signal))
        .route("/calculate", post(calculate::calculate))
        .route("/stochastics", post(calculate::stochastics))
        .route("/config", get(config::get_config).put(config::put_config))
        .with_state(state)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()));

    let listener = tokio::net::TcpListener::bind(&settings.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", settings.bind_addr))?;
    tracing::info!("Server running on http://{}", settings.bind_addr);
    tracing::info!("Swagger UI: http://{}/swagger-ui", settings.bind_addr);
    axum::serve(listener, app).await.context("server error")?;

    Ok(())
}
