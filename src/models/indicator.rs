use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Overlay indicator request, each variant carrying its own parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IndicatorSpec {
    Sma { period: usize },
    Ema { period: usize },
    Vwap { period: usize },
    Atr { period: usize },
    Stochastic {
        k_period: usize,
        d_period: usize,
        smoothing: usize,
    },
    VolumeSma { period: usize },
}

impl IndicatorSpec {
    /// Display label, e.g. "SMA(20)".
    pub fn label(&self) -> String {
        match self {
            IndicatorSpec::Sma { period } => format!("SMA({period})"),
            IndicatorSpec::Ema { period } => format!("EMA({period})"),
            IndicatorSpec::Vwap { period } => format!("VWAP({period})"),
            IndicatorSpec::Atr { period } => format!("ATR({period})"),
            IndicatorSpec::Stochastic {
                k_period,
                d_period,
                smoothing,
            } => format!("STOCH({k_period},{d_period},{smoothing})"),
            IndicatorSpec::VolumeSma { period } => format!("VOLUME_SMA({period})"),
        }
    }
}

/// One computed overlay. A failed indicator keeps its slot with `error` set.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct IndicatorOutput {
    pub label: String,
    pub spec: IndicatorSpec,
    /// Primary line, aligned 1:1 with the input candles.
    pub values: Vec<f64>,
    /// Secondary line (%D for stochastics).
    pub signal: Option<Vec<f64>>,
    pub error: Option<String>,
}
