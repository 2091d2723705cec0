use crate::business_logic::indicators::sma;
use crate::models::candle::Candle;
use crate::models::stochastic::{Band, StochasticValue};

/// Smoothed stochastic %K/%D over `candles`.
///
/// Output is aligned 1:1 with the input. %K is NaN until `k_period` (plus
/// smoothing) candles are available, %D until `d_period` smoothed %K values
/// exist. Short input yields an all-NaN series, never an error.
pub fn calculate(
    candles: &[Candle],
    k_period: usize,
    d_period: usize,
    smoothing: usize,
) -> Vec<StochasticValue> {
    if k_period == 0 || candles.len() < k_period {
        return candles
            .iter()
            .map(|candle| StochasticValue::empty(candle.time))
            .collect();
    }

    let raw_k = raw_k(candles, k_period);
    let k = if smoothing <= 1 {
        raw_k
    } else {
        sma(&raw_k, smoothing)
    };
    let d = if d_period <= 1 {
        k.clone()
    } else {
        sma(&k, d_period)
    };

    candles
        .iter()
        .zip(k.iter().zip(d.iter()))
        .map(|(candle, (k, d))| StochasticValue {
            time: candle.time,
            k: clamp_percent(*k),
            d: clamp_percent(*d),
        })
        .collect()
}

/// Stochastic for one of the fixed quad bands.
pub fn calculate_band(candles: &[Candle], band: Band) -> Vec<StochasticValue> {
    let params = band.params();
    calculate(candles, params.k_period, params.d_period, params.smoothing)
}

fn raw_k(candles: &[Candle], k_period: usize) -> Vec<f64> {
    let mut out = vec![f64::NAN; candles.len()];
    for end in (k_period - 1)..candles.len() {
        let window = &candles[end + 1 - k_period..=end];
        let highest = window.iter().map(|c| c.high).fold(f64::MIN, f64::max);
        let lowest = window.iter().map(|c| c.low).fold(f64::MAX, f64::min);
        let range = highest - lowest;
        out[end] = if range > 0.0 {
            (candles[end].close - lowest) / range * 100.0
        } else {
            // Flat window: no directional information
            50.0
        };
    }
    out
}

fn clamp_percent(value: f64) -> f64 {
    if value.is_finite() {
        value.clamp(0.0, 100.0)
    } else {
        f64::NAN
    }
}
