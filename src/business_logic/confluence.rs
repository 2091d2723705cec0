use crate::business_logic::config::SignalConfig;
use crate::business_logic::indicators::{channel, last_finite, rolling_vwap, sma};
use crate::business_logic::multi_timeframe;
use crate::models::candle::Candle;
use crate::models::confluence::{ConfluenceFlags, ConfluenceReport, MAX_RAW_CONFLUENCE};
use crate::models::signal::SignalType;
use crate::models::stochastic::{Band, QuadBandData};
use crate::models::timeframe::MultiTimeframeAnalysis;

/// Counts independent conditions agreeing with a candidate direction.
#[derive(Debug, Clone, Copy)]
pub struct ConfluenceScorer<'a> {
    config: &'a SignalConfig,
}

impl<'a> ConfluenceScorer<'a> {
    pub fn new(config: &'a SignalConfig) -> Self {
        Self { config }
    }

    pub fn score(
        &self,
        direction: SignalType,
        candles: &[Candle],
        quad: &QuadBandData,
        htf: Option<&MultiTimeframeAnalysis>,
    ) -> ConfluenceReport {
        let sign = direction_sign(direction);
        let is_quad_aligned = quad.alignment_direction == sign;
        let is_quad_rotating = quad.rotation_direction == sign;

        let flags = ConfluenceFlags {
            quad_rotation: is_quad_rotating,
            channel_extreme: self.channel_extreme(direction, candles),
            twenty_twenty_flag: self.twenty_twenty(direction, quad),
            vwap_confluence: self.vwap_confluence(candles),
            ma_confluence: self.ma_confluence(candles),
            volume_spike: self.volume_spike(candles),
            htf_alignment: htf
                .map(|analysis| multi_timeframe::supports(analysis, direction))
                .unwrap_or(false),
        };

        let bonus = u8::from(is_quad_aligned) + u8::from(is_quad_rotating);
        let score = (flags.count() + bonus).min(MAX_RAW_CONFLUENCE);

        ConfluenceReport {
            direction,
            flags,
            is_quad_aligned,
            is_quad_rotating,
            score,
        }
    }

    /// Close sits in the outer slice of the Donchian channel on the entry side.
    fn channel_extreme(&self, direction: SignalType, candles: &[Candle]) -> bool {
        let (Some((high, low)), Some(last)) =
            (channel(candles, self.config.channel_period), candles.last())
        else {
            return false;
        };
        let range = high - low;
        if range <= 0.0 {
            return false;
        }
        let band = range * self.config.channel_extreme_pct / 100.0;
        match direction {
            SignalType::Long => last.close <= low + band,
            SignalType::Short => last.close >= high - band,
        }
    }

    /// Fastest and slowest bands both stretched past the extreme level.
    fn twenty_twenty(&self, direction: SignalType, quad: &QuadBandData) -> bool {
        let (Some(fast), Some(slow)) = (quad.state(Band::Fast), quad.state(Band::Slow)) else {
            return false;
        };
        match direction {
            SignalType::Long => fast.k < self.config.oversold && slow.k < self.config.oversold,
            SignalType::Short => {
                fast.k > self.config.overbought && slow.k > self.config.overbought
            }
        }
    }

    fn vwap_confluence(&self, candles: &[Candle]) -> bool {
        let Some(last) = candles.last() else {
            return false;
        };
        last_finite(&rolling_vwap(candles, self.config.vwap_period))
            .map(|vwap| within_pct(last.close, vwap, self.config.vwap_proximity_pct))
            .unwrap_or(false)
    }

    fn ma_confluence(&self, candles: &[Candle]) -> bool {
        let Some(last) = candles.last() else {
            return false;
        };
        let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
        self.config.ma_periods.iter().any(|period| {
            last_finite(&sma(&closes, *period))
                .map(|ma| within_pct(last.close, ma, self.config.ma_proximity_pct))
                .unwrap_or(false)
        })
    }

    /// Latest volume against the average of the preceding window.
    fn volume_spike(&self, candles: &[Candle]) -> bool {
        let period = self.config.volume_period;
        if candles.len() < period + 1 {
            return false;
        }
        let (history, last) = candles.split_at(candles.len() - 1);
        let window = &history[history.len() - period..];
        let average = window.iter().map(|c| c.volume).sum::<f64>() / period as f64;
        average > 0.0 && last[0].volume > average * self.config.volume_spike_multiplier
    }
}

pub fn direction_sign(direction: SignalType) -> i8 {
    match direction {
        SignalType::Long => 1,
        SignalType::Short => -1,
    }
}

fn within_pct(price: f64, level: f64, pct: f64) -> bool {
    level > 0.0 && (price - level).abs() / level * 100.0 <= pct
}
