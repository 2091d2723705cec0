use crate::business_logic::indicators::{last_finite, sma};
use crate::business_logic::stochastic;
use crate::models::signal::SignalType;
use crate::models::timeframe::{
    MultiTimeframeAnalysis, TimeframeCandles, TimeframeTrend, TradeBias, TrendDirection,
    TrendStrength,
};

/// Candles needed for MA50, below this a timeframe is left out.
const MIN_CANDLES: usize = 50;
/// Share of timeframes the majority direction needs for consensus.
const CONSENSUS_SHARE: f64 = 0.6;
const LOCKED_ALIGNMENT: f64 = 80.0;
const CHOPPY_ALIGNMENT: f64 = 50.0;

/// How a candidate direction relates to the higher-timeframe bias
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HtfVerdict {
    Aligned,
    /// Bias is too choppy to judge; keep the signal but flag it
    LowConfidence,
    /// Direction opposes a locked bias; reject
    Misaligned,
}

/// Scores trend per timeframe and the consensus across them.
#[derive(Debug, Clone, Copy, Default)]
pub struct MultiTimeframeAnalyzer;

impl MultiTimeframeAnalyzer {
    pub fn new() -> Self {
        Self
    }

    /// Trend for one timeframe, `None` when there is not enough history.
    pub fn analyze_timeframe(&self, timeframe: &TimeframeCandles) -> Option<TimeframeTrend> {
        let candles = &timeframe.candles;
        if candles.len() < MIN_CANDLES {
            tracing::debug!(
                "{}: {} candles, need {} for trend",
                timeframe.timeframe,
                candles.len(),
                MIN_CANDLES
            );
            return None;
        }

        let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
        let price = *closes.last()?;
        let ma20 = last_finite(&sma(&closes, 20))?;
        let ma50 = last_finite(&sma(&closes, 50))?;
        let ma200 = if closes.len() >= 200 {
            last_finite(&sma(&closes, 200))
        } else {
            None
        };

        let stoch = stochastic::calculate(candles, 14, 3, 3);
        let latest = stoch.iter().rev().find(|v| v.is_valid());

        let direction = if price > ma20 && ma20 > ma50 {
            TrendDirection::Bullish
        } else if price < ma20 && ma20 < ma50 {
            TrendDirection::Bearish
        } else {
            TrendDirection::Neutral
        };

        let separation = (ma20 - ma50).abs() / ma50 * 100.0;
        let strength = if separation > 2.0 {
            TrendStrength::Strong
        } else if separation > 1.0 {
            TrendStrength::Moderate
        } else {
            TrendStrength::Weak
        };

        Some(TimeframeTrend {
            timeframe: timeframe.timeframe.clone(),
            direction,
            strength,
            price,
            ma20,
            ma50,
            ma200,
            stoch_k: latest.map(|v| v.k).unwrap_or(f64::NAN),
            stoch_d: latest.map(|v| v.d).unwrap_or(f64::NAN),
        })
    }

    /// Consensus over every timeframe with enough data, `None` if none has.
    pub fn analyze(&self, timeframes: &[TimeframeCandles]) -> Option<MultiTimeframeAnalysis> {
        let trends: Vec<TimeframeTrend> = timeframes
            .iter()
            .filter_map(|tf| self.analyze_timeframe(tf))
            .collect();
        if trends.is_empty() {
            return None;
        }

        let total = trends.len() as f64;
        let bullish_count = trends
            .iter()
            .filter(|t| t.direction == TrendDirection::Bullish)
            .count();
        let bearish_count = trends
            .iter()
            .filter(|t| t.direction == TrendDirection::Bearish)
            .count();

        let consensus = if bullish_count as f64 / total >= CONSENSUS_SHARE {
            TrendDirection::Bullish
        } else if bearish_count as f64 / total >= CONSENSUS_SHARE {
            TrendDirection::Bearish
        } else {
            TrendDirection::Neutral
        };

        let alignment_score = bullish_count.max(bearish_count) as f64 / total * 100.0;
        let trade_bias = if alignment_score >= LOCKED_ALIGNMENT {
            if bullish_count > bearish_count {
                TradeBias::LongOnly
            } else {
                TradeBias::ShortOnly
            }
        } else if alignment_score < CHOPPY_ALIGNMENT {
            TradeBias::None
        } else {
            TradeBias::Both
        };

        tracing::debug!(
            "htf consensus {:?} alignment {:.0} bias {:?}",
            consensus,
            alignment_score,
            trade_bias
        );

        Some(MultiTimeframeAnalysis {
            timeframes: trends,
            consensus,
            alignment_score,
            trade_bias,
            bullish_count,
            bearish_count,
        })
    }
}

/// Reject directions that oppose a locked bias; flag choppy ones.
pub fn check_alignment(analysis: &MultiTimeframeAnalysis, direction: SignalType) -> HtfVerdict {
    match (analysis.trade_bias, direction) {
        (TradeBias::LongOnly, SignalType::Short) | (TradeBias::ShortOnly, SignalType::Long) => {
            HtfVerdict::Misaligned
        }
        (TradeBias::None, _) => HtfVerdict::LowConfidence,
        _ => HtfVerdict::Aligned,
    }
}

/// Whether the higher timeframes actively favour `direction`.
pub fn supports(analysis: &MultiTimeframeAnalysis, direction: SignalType) -> bool {
    match (analysis.trade_bias, direction) {
        (TradeBias::LongOnly, SignalType::Long) | (TradeBias::ShortOnly, SignalType::Short) => true,
        (TradeBias::Both, SignalType::Long) => analysis.consensus == TrendDirection::Bullish,
        (TradeBias::Both, SignalType::Short) => analysis.consensus == TrendDirection::Bearish,
        _ => false,
    }
}
