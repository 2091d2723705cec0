use crate::business_logic::stochastic;
use crate::errors::SignalError;
use crate::models::candle::Candle;
use crate::models::indicator::{IndicatorOutput, IndicatorSpec};

/// Average True Range (ATR) calculator with Wilder smoothing
#[derive(Debug, Clone)]
pub struct AtrCalculator {
    period: usize,
    seed: Vec<f64>,
    current: Option<f64>,
    prev_close: Option<f64>,
}

impl AtrCalculator {
    pub fn new(period: usize) -> Self {
        Self {
            period,
            seed: Vec::with_capacity(period),
            current: None,
            prev_close: None,
        }
    }

    /// Calculate True Range for a candle
    fn true_range(&self, candle: &Candle) -> f64 {
        let hl = candle.high - candle.low;
        match self.prev_close {
            Some(pc) => {
                let hpc = (candle.high - pc).abs();
                let lpc = (candle.low - pc).abs();
                hl.max(hpc).max(lpc)
            }
            None => hl,
        }
    }

    /// Update ATR with a new candle, returns current ATR if available
    pub fn update(&mut self, candle: &Candle) -> Option<f64> {
        let tr = self.true_range(candle);
        self.prev_close = Some(candle.close);

        if let Some(prev_atr) = self.current {
            // Smoothed ATR: ((prev_atr * (period - 1)) + tr) / period
            let atr = (prev_atr * (self.period - 1) as f64 + tr) / self.period as f64;
            self.current = Some(atr);
            return Some(atr);
        }

        self.seed.push(tr);
        if self.seed.len() == self.period {
            // Initial ATR is simple average
            let atr = self.seed.iter().sum::<f64>() / self.period as f64;
            self.current = Some(atr);
        }
        self.current
    }
}

/// ATR aligned to `candles`, NaN during warm-up.
pub fn atr_series(candles: &[Candle], period: usize) -> Vec<f64> {
    if period == 0 {
        return vec![f64::NAN; candles.len()];
    }
    let mut atr = AtrCalculator::new(period);
    candles
        .iter()
        .map(|candle| atr.update(candle).unwrap_or(f64::NAN))
        .collect()
}

/// Simple moving average aligned to `values`. A window containing NaN yields NaN.
pub fn sma(values: &[f64], period: usize) -> Vec<f64> {
    let mut out = vec![f64::NAN; values.len()];
    if period == 0 || values.len() < period {
        return out;
    }
    for end in (period - 1)..values.len() {
        let window = &values[end + 1 - period..=end];
        if window.iter().all(|v| v.is_finite()) {
            out[end] = window.iter().sum::<f64>() / period as f64;
        }
    }
    out
}

/// Exponential moving average seeded with the SMA of the first `period` values.
pub fn ema(values: &[f64], period: usize) -> Vec<f64> {
    let mut out = vec![f64::NAN; values.len()];
    if period == 0 || values.len() < period {
        return out;
    }
    let alpha = 2.0 / (period as f64 + 1.0);
    let mut prev = values[..period].iter().sum::<f64>() / period as f64;
    out[period - 1] = prev;
    for i in period..values.len() {
        prev = alpha * values[i] + (1.0 - alpha) * prev;
        out[i] = prev;
    }
    out
}

/// Rolling volume-weighted average of typical price.
pub fn rolling_vwap(candles: &[Candle], period: usize) -> Vec<f64> {
    let mut out = vec![f64::NAN; candles.len()];
    if period == 0 || candles.len() < period {
        return out;
    }
    for end in (period - 1)..candles.len() {
        let window = &candles[end + 1 - period..=end];
        let volume: f64 = window.iter().map(|c| c.volume).sum();
        if volume > 0.0 {
            let weighted: f64 = window.iter().map(|c| c.typical_price() * c.volume).sum();
            out[end] = weighted / volume;
        }
    }
    out
}

/// Least-squares slope of `values` against their index.
pub fn least_squares_slope(values: &[f64]) -> f64 {
    let n = values.len();
    if n < 2 {
        return 0.0;
    }
    let n_f = n as f64;
    let mean_x = (n_f - 1.0) / 2.0;
    let mean_y = values.iter().sum::<f64>() / n_f;
    let mut num = 0.0;
    let mut den = 0.0;
    for (i, y) in values.iter().enumerate() {
        let dx = i as f64 - mean_x;
        num += dx * (y - mean_y);
        den += dx * dx;
    }
    if den == 0.0 {
        0.0
    } else {
        num / den
    }
}

/// Highest high and lowest low of the last `period` candles.
pub fn channel(candles: &[Candle], period: usize) -> Option<(f64, f64)> {
    if period == 0 || candles.len() < period {
        return None;
    }
    let window = &candles[candles.len() - period..];
    let high = window.iter().map(|c| c.high).fold(f64::MIN, f64::max);
    let low = window.iter().map(|c| c.low).fold(f64::MAX, f64::min);
    Some((high, low))
}

/// Last finite value of a series.
pub fn last_finite(values: &[f64]) -> Option<f64> {
    values.iter().rev().copied().find(|v| v.is_finite())
}

/// Computes one overlay. Zero periods are a calculation error; short input is not.
pub fn calculate_overlay(
    candles: &[Candle],
    spec: &IndicatorSpec,
) -> Result<(Vec<f64>, Option<Vec<f64>>), SignalError> {
    let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
    let require = |period: usize| {
        if period == 0 {
            Err(SignalError::Calculation(format!(
                "{} requires a positive period",
                spec.label()
            )))
        } else {
            Ok(period)
        }
    };

    let output = match *spec {
        IndicatorSpec::Sma { period } => (sma(&closes, require(period)?), None),
        IndicatorSpec::Ema { period } => (ema(&closes, require(period)?), None),
        IndicatorSpec::Vwap { period } => (rolling_vwap(candles, require(period)?), None),
        IndicatorSpec::Atr { period } => (atr_series(candles, require(period)?), None),
        IndicatorSpec::VolumeSma { period } => {
            let volumes: Vec<f64> = candles.iter().map(|c| c.volume).collect();
            (sma(&volumes, require(period)?), None)
        }
        IndicatorSpec::Stochastic {
            k_period,
            d_period,
            smoothing,
        } => {
            require(k_period)?;
            require(d_period)?;
            let series = stochastic::calculate(candles, k_period, d_period, smoothing);
            let k = series.iter().map(|v| v.k).collect();
            let d = series.iter().map(|v| v.d).collect();
            (k, Some(d))
        }
    };
    Ok(output)
}

/// Computes every overlay independently; one failure never hides the others.
pub fn calculate_overlays(candles: &[Candle], specs: &[IndicatorSpec]) -> Vec<IndicatorOutput> {
    specs
        .iter()
        .map(|spec| match calculate_overlay(candles, spec) {
            Ok((values, signal)) => IndicatorOutput {
                label: spec.label(),
                spec: spec.clone(),
                values,
                signal,
                error: None,
            },
            Err(error) => {
                tracing::warn!("overlay {} failed: {}", spec.label(), error);
                IndicatorOutput {
                    label: spec.label(),
                    spec: spec.clone(),
                    values: Vec::new(),
                    signal: None,
                    error: Some(error.to_string()),
                }
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_candle(high: f64, low: f64, close: f64) -> Candle {
        Candle {
            time: 0,
            open: close,
            high,
            low,
            close,
            volume: 1.0,
        }
    }

    #[test]
    fn test_atr_calculation() {
        let mut atr = AtrCalculator::new(3);

        // First 3 candles to warm up
        assert!(atr.update(&make_candle(102.0, 98.0, 100.0)).is_none()); // TR = 4
        assert!(atr.update(&make_candle(104.0, 99.0, 102.0)).is_none()); // TR = 5
        let result = atr.update(&make_candle(103.0, 100.0, 101.0)); // TR = 3

        // Initial ATR = (4 + 5 + 3) / 3 = 4
        assert!(result.is_some());
        assert!((result.unwrap() - 4.0).abs() < 0.01);

        // TR = 7 -> (4 * 2 + 7) / 3 = 5
        let next = atr.update(&make_candle(106.0, 99.0, 105.0)).unwrap();
        assert!((next - 5.0).abs() < 0.01);
    }

    #[test]
    fn sma_warms_up_with_nan() {
        let values = [1.0, 2.0, 3.0, 4.0];
        let out = sma(&values, 3);
        assert!(out[0].is_nan() && out[1].is_nan());
        assert!((out[2] - 2.0).abs() < 1e-9);
        assert!((out[3] - 3.0).abs() < 1e-9);
        assert!(sma(&values, 10).iter().all(|v| v.is_nan()));
    }

    #[test]
    fn ema_seeds_from_sma() {
        let out = ema(&[2.0, 4.0, 6.0, 8.0], 2);
        assert!(out[0].is_nan());
        assert!((out[1] - 3.0).abs() < 1e-9);
        // alpha = 2/3: 2/3 * 6 + 1/3 * 3 = 5
        assert!((out[2] - 5.0).abs() < 1e-9);
    }

    #[test]
    fn vwap_weights_by_volume() {
        let mut heavy = make_candle(12.0, 12.0, 12.0);
        heavy.volume = 3.0;
        let light = make_candle(8.0, 8.0, 8.0);
        let out = rolling_vwap(&[light, heavy], 2);
        assert!((out[1] - 11.0).abs() < 1e-9);
    }

    #[test]
    fn least_squares_slope_ignores_single_tick_noise_better_than_endpoints() {
        assert!((least_squares_slope(&[1.0, 2.0, 3.0, 4.0]) - 1.0).abs() < 1e-9);
        // Last-minus-first is negative, the regression still rises
        let dipped = [1.0, 2.0, 3.0, 4.0, 0.5];
        assert!(least_squares_slope(&dipped) > 0.0);
        assert_eq!(least_squares_slope(&[3.0]), 0.0);
    }

    #[test]
    fn channel_uses_trailing_window() {
        let candles = vec![
            make_candle(50.0, 1.0, 10.0),
            make_candle(12.0, 8.0, 10.0),
            make_candle(14.0, 9.0, 11.0),
        ];
        assert_eq!(channel(&candles, 2), Some((14.0, 8.0)));
        assert_eq!(channel(&candles, 4), None);
    }

    #[test]
    fn overlay_batch_isolates_failures() {
        let candles: Vec<Candle> = (0..30)
            .map(|i| make_candle(101.0 + i as f64, 99.0 + i as f64, 100.0 + i as f64))
            .collect();
        let specs = vec![
            IndicatorSpec::Sma { period: 5 },
            IndicatorSpec::Ema { period: 0 },
            IndicatorSpec::Stochastic {
                k_period: 5,
                d_period: 3,
                smoothing: 1,
            },
        ];

        let outputs = calculate_overlays(&candles, &specs);

        assert_eq!(outputs.len(), 3);
        assert!(outputs[0].error.is_none());
        assert_eq!(outputs[0].values.len(), candles.len());
        assert!(outputs[1].error.is_some());
        assert!(outputs[1].values.is_empty());
        assert!(outputs[2].error.is_none());
        assert!(outputs[2].signal.is_some());
    }
}
