use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::models::signal::SignalType;
use crate::models::stochastic::Band;

/// A confirmed local extremum. `price` is the low for pivot lows and the high for pivot highs.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct PivotPoint {
    pub index: usize,
    pub price: f64,
    pub stoch_k: f64,
    pub time: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DivergenceType {
    Bullish,
    HiddenBullish,
    Bearish,
    HiddenBearish,
}

impl DivergenceType {
    pub fn direction(self) -> SignalType {
        match self {
            DivergenceType::Bullish | DivergenceType::HiddenBullish => SignalType::Long,
            DivergenceType::Bearish | DivergenceType::HiddenBearish => SignalType::Short,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct DivergenceDetails {
    #[serde(rename = "type")]
    pub divergence_type: DivergenceType,
    /// Steepness proxy in degrees, see `divergence::divergence_angle`.
    pub angle: f64,
    /// [recent, earlier]
    pub price_points: Vec<PivotPoint>,
    /// [recent, earlier]
    pub stoch_points: Vec<PivotPoint>,
    pub candle_span: usize,
    pub band: Band,
}

impl DivergenceDetails {
    /// Confluence bonus for this divergence, capped at 3.
    pub fn strength(&self) -> u8 {
        let mut bonus = 1;
        if self.angle >= 15.0 {
            bonus += 1;
        }
        if self.angle >= 25.0 {
            bonus += 1;
        }
        if self.band.is_slow() {
            bonus += 1;
        }
        if self.candle_span >= 10 {
            bonus += 1;
        }
        bonus.min(3)
    }

    /// Index of the most recent pivot in the analysed window.
    pub fn recent_index(&self) -> usize {
        self.price_points.first().map(|p| p.index).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_divergence(angle: f64, span: usize, band: Band) -> DivergenceDetails {
        let point = PivotPoint {
            index: 0,
            price: 1.0,
            stoch_k: 10.0,
            time: 0,
        };
        DivergenceDetails {
            divergence_type: DivergenceType::Bullish,
            angle,
            price_points: vec![point, point],
            stoch_points: vec![point, point],
            candle_span: span,
            band,
        }
    }

    #[test]
    fn strength_starts_at_one() {
        assert_eq!(make_divergence(5.0, 6, Band::Fast).strength(), 1);
    }

    #[test]
    fn strength_accumulates_and_caps_at_three() {
        assert_eq!(make_divergence(16.0, 6, Band::Fast).strength(), 2);
        assert_eq!(make_divergence(16.0, 12, Band::Fast).strength(), 3);
        assert_eq!(make_divergence(30.0, 12, Band::Slow).strength(), 3);
    }

    #[test]
    fn divergence_type_maps_to_direction() {
        assert_eq!(DivergenceType::HiddenBullish.direction(), SignalType::Long);
        assert_eq!(DivergenceType::Bearish.direction(), SignalType::Short);
    }
}
