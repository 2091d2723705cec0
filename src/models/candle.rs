use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::ValidationError;

/// A single OHLCV bar. `time` is the bar open in epoch seconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Candle {
    /// Bar open time (epoch seconds)
    pub time: i64,
    /// Open price
    pub open: f64,
    /// High price
    pub high: f64,
    /// Low price
    pub low: f64,
    /// Close price
    pub close: f64,
    /// Volume
    pub volume: f64,
}

impl Candle {
    /// Typical price used for VWAP weighting.
    pub fn typical_price(&self) -> f64 {
        (self.high + self.low + self.close) / 3.0
    }
}

/// Candles must be unique per stream and strictly ascending by time.
pub fn validate_ascending(candles: &[Candle]) -> Result<(), ValidationError> {
    let ordered = candles.windows(2).all(|pair| pair[0].time < pair[1].time);
    if ordered {
        return Ok(());
    }

    let mut error = ValidationError::new("unordered_candles");
    error.message = Some("candle times must be strictly ascending".into());
    Err(error)
}
