use std::sync::Arc;

use serde::Serialize;
use utoipa::ToSchema;

use crate::business_logic::config::SignalConfig;
use crate::models::candle::Candle;
use crate::models::confluence::ConfluenceReport;
use crate::models::divergence::DivergenceDetails;
use crate::models::indicator::IndicatorOutput;
use crate::models::signal::{SignalStatus, TradeSignal};
use crate::models::stochastic::QuadBandData;
use crate::models::timeframe::{MultiTimeframeAnalysis, TimeframeCandles};

/// Input of a full signal calculation.
#[derive(Debug, Clone)]
pub struct CalculatePayload {
    pub symbol: String,
    pub candles: Vec<Candle>,
    pub config: Arc<SignalConfig>,
    pub higher_timeframes: Vec<TimeframeCandles>,
    /// Quad data from the result cache; recomputed when absent
    pub cached_quad: Option<QuadBandData>,
    pub now: i64,
}

/// Work accepted by a compute worker.
#[derive(Debug, Clone)]
pub enum WorkerRequest {
    CalculateSignals(CalculatePayload),
    CalculateStochOnly {
        candles: Vec<Candle>,
        config: Arc<SignalConfig>,
    },
    ValidateSignal {
        signal: TradeSignal,
        current_price: f64,
        now: i64,
        config: Arc<SignalConfig>,
    },
}

impl WorkerRequest {
    pub fn kind(&self) -> RequestKind {
        match self {
            WorkerRequest::CalculateSignals(_) => RequestKind::CalculateSignals,
            WorkerRequest::CalculateStochOnly { .. } => RequestKind::CalculateStochOnly,
            WorkerRequest::ValidateSignal { .. } => RequestKind::ValidateSignal,
        }
    }
}

/// Request tag kept by the pool to check the shape of the reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    CalculateSignals,
    CalculateStochOnly,
    ValidateSignal,
}

impl RequestKind {
    pub fn as_str(self) -> &'static str {
        match self {
            RequestKind::CalculateSignals => "CALCULATE_SIGNALS",
            RequestKind::CalculateStochOnly => "CALCULATE_STOCH_ONLY",
            RequestKind::ValidateSignal => "VALIDATE_SIGNAL",
        }
    }
}

/// A worker's reply to one request.
#[derive(Debug, Clone)]
pub enum WorkerResponse {
    SignalsResult(Box<CalculationResult>),
    StochResult(QuadBandData),
    ValidationResult(ValidationOutcome),
    Error { message: String },
}

impl WorkerResponse {
    pub fn kind(&self) -> &'static str {
        match self {
            WorkerResponse::SignalsResult(_) => "SIGNALS_RESULT",
            WorkerResponse::StochResult(_) => "STOCH_RESULT",
            WorkerResponse::ValidationResult(_) => "VALIDATION_RESULT",
            WorkerResponse::Error { .. } => "ERROR",
        }
    }

    /// Whether this variant is a legal reply to a request of `kind`.
    /// `Error` answers anything.
    pub fn answers(&self, kind: RequestKind) -> bool {
        matches!(
            (kind, self),
            (_, WorkerResponse::Error { .. })
                | (RequestKind::CalculateSignals, WorkerResponse::SignalsResult(_))
                | (RequestKind::CalculateStochOnly, WorkerResponse::StochResult(_))
                | (RequestKind::ValidateSignal, WorkerResponse::ValidationResult(_))
        )
    }
}

/// A request tagged with the id its response is correlated by.
#[derive(Debug, Clone)]
pub struct RequestEnvelope {
    pub request_id: u64,
    pub request: WorkerRequest,
}

/// Everything one calculation produces for a symbol.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct CalculationResult {
    pub symbol: String,
    pub quad: QuadBandData,
    pub divergences: Vec<DivergenceDetails>,
    /// One report per direction that had a trigger
    pub confluence: Vec<ConfluenceReport>,
    pub htf: Option<MultiTimeframeAnalysis>,
    /// At most one: the strongest signal built from this window
    pub signals: Vec<TradeSignal>,
    pub indicators: Vec<IndicatorOutput>,
}

/// Outcome of re-checking a signal against a price.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ValidationOutcome {
    pub is_valid: bool,
    /// Status the signal would move to at this price
    pub status: SignalStatus,
    pub signal: TradeSignal,
    pub reasons: Vec<String>,
}
