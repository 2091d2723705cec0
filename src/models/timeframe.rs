use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::models::candle::Candle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TrendDirection {
    Bullish,
    Bearish,
    Neutral,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TrendStrength {
    Weak,
    Moderate,
    Strong,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TradeBias {
    LongOnly,
    ShortOnly,
    Both,
    /// Too choppy; signals are kept but flagged low-confidence.
    None,
}

/// Candle window for one higher timeframe, e.g. "1h".
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TimeframeCandles {
    pub timeframe: String,
    pub candles: Vec<Candle>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TimeframeTrend {
    pub timeframe: String,
    pub direction: TrendDirection,
    pub strength: TrendStrength,
    pub price: f64,
    pub ma20: f64,
    pub ma50: f64,
    pub ma200: Option<f64>,
    pub stoch_k: f64,
    pub stoch_d: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct MultiTimeframeAnalysis {
    pub timeframes: Vec<TimeframeTrend>,
    pub consensus: TrendDirection,
    /// max(bullish, bearish) / total * 100
    pub alignment_score: f64,
    pub trade_bias: TradeBias,
    pub bullish_count: usize,
    pub bearish_count: usize,
}
