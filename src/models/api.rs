use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use validator::{Validate, ValidationError};

use crate::business_logic::config::SignalConfig;
use crate::models::candle::{validate_ascending, Candle};
use crate::models::signal::{SignalEvent, TradeSignal};
use crate::models::timeframe::TimeframeCandles;

pub const SUPPORTED_INTERVALS: [&str; 14] = [
    "1m", "3m", "5m", "15m", "30m", "1h", "2h", "4h", "8h", "12h", "1d", "3d", "1w", "1M",
];

pub fn interval_ms(interval: &str) -> Option<u64> {
    match interval {
        "1m" => Some(60_000),
        "3m" => Some(180_000),
        "5m" => Some(300_000),
        "15m" => Some(900_000),
        "30m" => Some(1_800_000),
        "1h" => Some(3_600_000),
        "2h" => Some(7_200_000),
        "4h" => Some(14_400_000),
        "8h" => Some(28_800_000),
        "12h" => Some(43_200_000),
        "1d" => Some(86_400_000),
        "3d" => Some(259_200_000),
        "1w" => Some(604_800_000),
        "1M" => Some(2_592_000_000),
        _ => None,
    }
}

pub fn validate_interval(value: &str) -> Result<(), ValidationError> {
    if interval_ms(value).is_some() {
        return Ok(());
    }

    let mut error = ValidationError::new("unsupported_interval");
    error.message = Some(
        format!(
            "interval must be one of: {}",
            SUPPORTED_INTERVALS.join(", ")
        )
        .into(),
    );
    Err(error)
}

fn validate_timeframes(timeframes: &[TimeframeCandles]) -> Result<(), ValidationError> {
    for timeframe in timeframes {
        validate_interval(&timeframe.timeframe)?;
        validate_ascending(&timeframe.candles)?;
    }
    Ok(())
}

/// Full signal calculation over caller-supplied candles.
#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct CalculateRequest {
    #[validate(length(min = 1, max = 24))]
    #[schema(example = "BTC")]
    pub symbol: String,
    /// Primary window, strictly ascending by time
    #[validate(length(min = 1, max = 5000), custom(function = "validate_ascending"))]
    pub candles: Vec<Candle>,
    /// Higher-timeframe windows used for bias
    #[serde(default)]
    #[validate(custom(function = "validate_timeframes"))]
    pub higher_timeframes: Vec<TimeframeCandles>,
    /// Replaces the service config for this call only
    #[serde(default)]
    #[validate(nested)]
    pub config: Option<SignalConfig>,
}

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct StochRequest {
    #[validate(length(min = 1, max = 5000), custom(function = "validate_ascending"))]
    pub candles: Vec<Candle>,
}

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct ValidateRequest {
    pub signal: TradeSignal,
    #[validate(range(exclusive_min = 0.0))]
    pub current_price: f64,
    /// Evaluation time in epoch seconds; defaults to now
    #[serde(default)]
    pub now: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize, Validate, IntoParams)]
pub struct SignalsQuery {
    /// Only signals for this symbol
    #[validate(length(min = 1, max = 24))]
    #[param(example = "BTC")]
    pub symbol: Option<String>,
    /// Only signals still pending, active or partial
    #[serde(default)]
    pub open_only: bool,
}

impl SignalsQuery {
    pub fn matches(&self, signal: &TradeSignal) -> bool {
        let symbol_ok = self
            .symbol
            .as_deref()
            .map(|symbol| signal.symbol == symbol)
            .unwrap_or(true);
        symbol_ok && (!self.open_only || signal.status.is_open())
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct SignalsResponse {
    pub signals: Vec<TradeSignal>,
    pub open_count: usize,
}

impl SignalsResponse {
    pub fn new(signals: Vec<TradeSignal>) -> Self {
        let open_count = signals.iter().filter(|s| s.status.is_open()).count();
        Self {
            signals,
            open_count,
        }
    }
}

/// Tracked signals after one scan, plus the transitions it caused.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct SignalSnapshot {
    pub as_of_ms: u64,
    pub signals: Vec<TradeSignal>,
    pub events: Vec<SignalEvent>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct PoolHealth {
    pub workers: usize,
    pub idle_workers: usize,
    pub pending_requests: usize,
    pub queued_requests: usize,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub pool: PoolHealth,
    pub tracked_signals: usize,
    pub open_signals: usize,
    /// Quad windows currently held by the result cache
    pub cached_windows: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_candle(time: i64) -> Candle {
        Candle {
            time,
            open: 1.0,
            high: 2.0,
            low: 0.5,
            close: 1.5,
            volume: 10.0,
        }
    }

    fn request(candles: Vec<Candle>) -> CalculateRequest {
        CalculateRequest {
            symbol: "BTC".to_string(),
            candles,
            higher_timeframes: Vec::new(),
            config: None,
        }
    }

    #[test]
    fn interval_ms_supports_all_intervals() {
        for interval in SUPPORTED_INTERVALS {
            assert!(
                interval_ms(interval).is_some(),
                "missing interval: {}",
                interval
            );
        }
        assert!(interval_ms("10m").is_none());
    }

    #[test]
    fn validate_interval_rejects_unknown() {
        let error = validate_interval("10m").unwrap_err();
        assert_eq!(error.code, "unsupported_interval");
    }

    #[test]
    fn calculate_request_requires_ordered_candles() {
        let ok = request(vec![make_candle(60), make_candle(120)]);
        assert!(ok.validate().is_ok());

        let unordered = request(vec![make_candle(120), make_candle(60)]);
        assert!(unordered.validate().is_err());

        let empty = request(Vec::new());
        assert!(empty.validate().is_err());
    }

    #[test]
    fn calculate_request_checks_timeframes_and_config() {
        let mut req = request(vec![make_candle(60)]);
        req.higher_timeframes = vec![TimeframeCandles {
            timeframe: "7h".to_string(),
            candles: vec![make_candle(60)],
        }];
        assert!(req.validate().is_err());

        req.higher_timeframes[0].timeframe = "4h".to_string();
        assert!(req.validate().is_ok());

        let mut config = SignalConfig::default();
        config.oversold = 90.0;
        req.config = Some(config);
        assert!(req.validate().is_err());
    }

    #[test]
    fn signals_query_rejects_blank_symbol() {
        let query = SignalsQuery {
            symbol: Some("ETH".to_string()),
            open_only: false,
        };
        assert!(query.validate().is_ok());
        assert!(SignalsQuery::default().validate().is_ok());

        let blank = SignalsQuery {
            symbol: Some(String::new()),
            open_only: true,
        };
        assert!(blank.validate().is_err());
    }
}
