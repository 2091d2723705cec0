use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// One oscillator sample aligned to a candle. NaN marks warm-up, never an error.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, ToSchema)]
pub struct StochasticValue {
    pub time: i64,
    pub k: f64,
    pub d: f64,
}

impl StochasticValue {
    pub fn empty(time: i64) -> Self {
        Self {
            time,
            k: f64::NAN,
            d: f64::NAN,
        }
    }

    /// Both lines are past warm-up.
    pub fn is_valid(&self) -> bool {
        self.k.is_finite() && self.d.is_finite()
    }
}

/// Fixed stochastic parameterizations overlaid by the quad view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Band {
    Fast,
    Standard,
    Medium,
    Slow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
pub struct BandParams {
    pub k_period: usize,
    pub d_period: usize,
    pub smoothing: usize,
}

impl Band {
    pub const ALL: [Band; 4] = [Band::Fast, Band::Standard, Band::Medium, Band::Slow];

    pub fn params(self) -> BandParams {
        let (k_period, d_period, smoothing) = match self {
            Band::Fast => (9, 3, 1),
            Band::Standard => (14, 3, 3),
            Band::Medium => (40, 4, 4),
            Band::Slow => (60, 10, 10),
        };
        BandParams {
            k_period,
            d_period,
            smoothing,
        }
    }

    /// Slower bands carry more weight when they diverge.
    pub fn is_slow(self) -> bool {
        matches!(self, Band::Medium | Band::Slow)
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct BandSeries {
    pub band: Band,
    pub values: Vec<StochasticValue>,
}

/// Derived state of one band at the shared reference timestamp.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct BandState {
    pub band: Band,
    pub time: i64,
    pub k: f64,
    pub d: f64,
    pub is_oversold: bool,
    pub is_overbought: bool,
    pub is_bullish: bool,
    pub is_bearish: bool,
    pub k_slope: f64,
    pub d_slope: f64,
}

/// Output of the quad aggregation for one candle window.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct QuadBandData {
    pub series: Vec<BandSeries>,
    /// Empty when no timestamp has all four bands warmed up.
    pub states: Vec<BandState>,
    pub reference_time: Option<i64>,
    pub is_quad_aligned: bool,
    /// 1 bullish, -1 bearish, 0 none
    pub alignment_direction: i8,
    pub is_quad_rotating: bool,
    /// 1 rising, -1 falling, 0 none
    pub rotation_direction: i8,
    pub bullish_count: usize,
    pub bearish_count: usize,
    pub oversold_count: usize,
    pub overbought_count: usize,
}

impl QuadBandData {
    pub fn series(&self, band: Band) -> Option<&[StochasticValue]> {
        self.series
            .iter()
            .find(|series| series.band == band)
            .map(|series| series.values.as_slice())
    }

    pub fn state(&self, band: Band) -> Option<&BandState> {
        self.states.iter().find(|state| state.band == band)
    }
}
