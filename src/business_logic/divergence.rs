use crate::business_logic::config::SignalConfig;
use crate::models::candle::Candle;
use crate::models::divergence::{DivergenceDetails, DivergenceType, PivotPoint};
use crate::models::stochastic::{Band, QuadBandData, StochasticValue};

/// Which extreme a pivot marks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PivotKind {
    Low,
    High,
}

/// Finds price/oscillator pivots and classifies divergence between them.
#[derive(Debug, Clone, Copy)]
pub struct PivotDivergenceDetector<'a> {
    config: &'a SignalConfig,
}

impl<'a> PivotDivergenceDetector<'a> {
    pub fn new(config: &'a SignalConfig) -> Self {
        Self { config }
    }

    /// Scan every configured band of `quad`.
    pub fn detect_all(&self, candles: &[Candle], quad: &QuadBandData) -> Vec<DivergenceDetails> {
        let mut found = Vec::new();
        for band in &self.config.divergence_bands {
            let Some(series) = quad.series(*band) else {
                continue;
            };
            if series.len() != candles.len() {
                tracing::debug!(
                    "skipping {:?} divergence scan: {} stochastic samples for {} candles",
                    band,
                    series.len(),
                    candles.len()
                );
                continue;
            }
            found.extend(self.detect(candles, series, *band));
        }
        found
    }

    /// Most recent qualifying divergence among pivot lows and among pivot
    /// highs of one band. At most one of each.
    pub fn detect(
        &self,
        candles: &[Candle],
        stoch: &[StochasticValue],
        band: Band,
    ) -> Vec<DivergenceDetails> {
        let n = candles.len().min(stoch.len());
        let lookback = self.config.pivot_lookback;
        if n < lookback * 2 + 2 {
            return Vec::new();
        }

        let start = n.saturating_sub(self.config.divergence_lookback);
        let window = &candles[start..n];
        let price_high = window.iter().map(|c| c.high).fold(f64::MIN, f64::max);
        let price_low = window.iter().map(|c| c.low).fold(f64::MAX, f64::min);
        let price_range = price_high - price_low;

        let oscillator: Vec<f64> = stoch[..n].iter().map(|v| v.k).collect();

        [PivotKind::Low, PivotKind::High]
            .into_iter()
            .filter_map(|kind| {
                let prices: Vec<f64> = candles[..n]
                    .iter()
                    .map(|c| match kind {
                        PivotKind::Low => c.low,
                        PivotKind::High => c.high,
                    })
                    .collect();
                let pivots: Vec<PivotPoint> =
                    find_pivots(&prices, &oscillator, start, lookback, kind)
                        .into_iter()
                        .filter(|&index| oscillator[index].is_finite())
                        .map(|index| PivotPoint {
                            index,
                            price: prices[index],
                            stoch_k: oscillator[index],
                            time: candles[index].time,
                        })
                        .collect();
                self.scan_pairs(&pivots, kind, price_range, band)
            })
            .collect()
    }

    /// Walk pivot pairs from the most recent backwards until one qualifies.
    fn scan_pairs(
        &self,
        pivots: &[PivotPoint],
        kind: PivotKind,
        price_range: f64,
        band: Band,
    ) -> Option<DivergenceDetails> {
        for r in (1..pivots.len()).rev() {
            let recent = pivots[r];
            for earlier in pivots[..r].iter().rev().copied() {
                let span = recent.index - earlier.index;
                if span < self.config.min_divergence_span {
                    continue;
                }
                let Some(divergence_type) = classify(kind, &recent, &earlier) else {
                    continue;
                };
                let angle = divergence_angle(&recent, &earlier, price_range);
                if angle < self.config.min_divergence_angle {
                    continue;
                }

                tracing::debug!(
                    "{:?} divergence on {:?}: pivots {} -> {}, angle {:.1}",
                    divergence_type,
                    band,
                    earlier.index,
                    recent.index,
                    angle
                );
                return Some(DivergenceDetails {
                    divergence_type,
                    angle,
                    price_points: vec![recent, earlier],
                    stoch_points: vec![recent, earlier],
                    candle_span: span,
                    band,
                });
            }
        }
        None
    }
}

/// Indices in `[start, len)` that form a strict local extreme on price or on
/// the oscillator within `lookback` candles each side.
pub fn find_pivots(
    prices: &[f64],
    oscillator: &[f64],
    start: usize,
    lookback: usize,
    kind: PivotKind,
) -> Vec<usize> {
    let n = prices.len().min(oscillator.len());
    if n < lookback * 2 + 1 {
        return Vec::new();
    }
    let first = start.max(lookback);
    let last = n - lookback;

    (first..last)
        .filter(|&i| {
            strict_extreme(prices, i, lookback, kind) || strict_extreme(oscillator, i, lookback, kind)
        })
        .collect()
}

fn strict_extreme(values: &[f64], i: usize, lookback: usize, kind: PivotKind) -> bool {
    let center = values[i];
    if !center.is_finite() {
        return false;
    }
    ((i - lookback)..=(i + lookback))
        .filter(|&j| j != i)
        .all(|j| {
            let other = values[j];
            other.is_finite()
                && match kind {
                    PivotKind::Low => center < other,
                    PivotKind::High => center > other,
                }
        })
}

/// Divergence type for a (recent, earlier) pivot pair, if any.
pub fn classify(
    kind: PivotKind,
    recent: &PivotPoint,
    earlier: &PivotPoint,
) -> Option<DivergenceType> {
    let price_up = recent.price > earlier.price;
    let price_down = recent.price < earlier.price;
    let osc_up = recent.stoch_k > earlier.stoch_k;
    let osc_down = recent.stoch_k < earlier.stoch_k;

    match kind {
        PivotKind::Low if price_down && osc_up => Some(DivergenceType::Bullish),
        PivotKind::Low if price_up && osc_down => Some(DivergenceType::HiddenBullish),
        PivotKind::High if price_up && osc_down => Some(DivergenceType::Bearish),
        PivotKind::High if price_down && osc_up => Some(DivergenceType::HiddenBearish),
        _ => None,
    }
}

/// Steepness proxy: per-candle slopes of range-normalized price and of %K/100,
/// absolute difference scaled by 10 and mapped through atan into degrees.
pub fn divergence_angle(recent: &PivotPoint, earlier: &PivotPoint, price_range: f64) -> f64 {
    let span = recent.index.saturating_sub(earlier.index);
    if span == 0 || price_range <= 0.0 {
        return 0.0;
    }
    let span = span as f64;
    let price_slope = (recent.price - earlier.price) / price_range / span;
    let stoch_slope = (recent.stoch_k - earlier.stoch_k) / 100.0 / span;
    let slope_diff = (price_slope - stoch_slope).abs();
    (slope_diff * 10.0).atan().to_degrees()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::business_logic::quad_band::QuadBandAggregator;

    /// Piecewise-linear interpolation through `(index, value)` knots.
    fn path(len: usize, knots: &[(usize, f64)]) -> Vec<f64> {
        (0..len)
            .map(|i| {
                let pair = knots
                    .windows(2)
                    .find(|w| i >= w[0].0 && i <= w[1].0)
                    .expect("knots cover range");
                let (x0, y0) = pair[0];
                let (x1, y1) = pair[1];
                y0 + (y1 - y0) * (i - x0) as f64 / (x1 - x0) as f64
            })
            .collect()
    }

    fn make_series(prices: &[f64], ks: &[f64]) -> (Vec<Candle>, Vec<StochasticValue>) {
        let candles = prices
            .iter()
            .enumerate()
            .map(|(i, p)| Candle {
                time: i as i64 * 60,
                open: *p,
                high: p + 1.0,
                low: p - 1.0,
                close: *p,
                volume: 1.0,
            })
            .collect();
        let stoch = ks
            .iter()
            .enumerate()
            .map(|(i, k)| StochasticValue {
                time: i as i64 * 60,
                k: *k,
                d: *k,
            })
            .collect();
        (candles, stoch)
    }

    /// Lower price low at 52 vs 40, higher %K low.
    fn bullish_fixture() -> (Vec<Candle>, Vec<StochasticValue>) {
        let prices = path(60, &[(0, 130.0), (40, 100.0), (46, 110.0), (52, 95.0), (59, 105.0)]);
        let ks = path(60, &[(0, 60.0), (40, 10.0), (46, 60.0), (52, 25.0), (59, 50.0)]);
        make_series(&prices, &ks)
    }

    #[test]
    fn detects_regular_bullish_divergence_on_fast_band() {
        let config = SignalConfig::default();
        let (candles, stoch) = bullish_fixture();

        let found = PivotDivergenceDetector::new(&config).detect(&candles, &stoch, Band::Fast);

        assert_eq!(found.len(), 1);
        let divergence = &found[0];
        assert_eq!(divergence.divergence_type, DivergenceType::Bullish);
        assert_eq!(divergence.band, Band::Fast);
        assert_eq!(divergence.candle_span, 12);
        assert_eq!(divergence.price_points[0].index, 52);
        assert_eq!(divergence.price_points[1].index, 40);
        assert!(divergence.angle >= config.min_divergence_angle);
        assert_eq!(divergence.strength(), 2);
    }

    #[test]
    fn candles_through_fast_band_show_regular_bullish() {
        let config = SignalConfig {
            divergence_bands: vec![Band::Fast],
            ..Default::default()
        };
        // Lower low at 52 on a long wick, so the close sits well off the low
        let closes = path(60, &[(0, 130.0), (40, 100.0), (46, 112.0), (52, 97.0), (59, 108.0)]);
        let candles: Vec<Candle> = closes
            .iter()
            .enumerate()
            .map(|(i, p)| Candle {
                time: i as i64 * 60,
                open: *p,
                high: p + 1.0,
                low: if i == 52 { p - 5.0 } else { p - 1.0 },
                close: *p,
                volume: 1.0,
            })
            .collect();
        let quad = QuadBandAggregator::new(&config).calculate(&candles);

        let found = PivotDivergenceDetector::new(&config).detect_all(&candles, &quad);

        assert_eq!(found.len(), 1);
        let divergence = &found[0];
        assert_eq!(divergence.divergence_type, DivergenceType::Bullish);
        assert_eq!(divergence.band, Band::Fast);
        assert_eq!(divergence.candle_span, 12);
        assert!(divergence.price_points[0].price < divergence.price_points[1].price);
        assert!(divergence.stoch_points[0].stoch_k > divergence.stoch_points[1].stoch_k);
        assert!(divergence.angle >= config.min_divergence_angle);
        assert_eq!(divergence.strength(), 2);
    }

    #[test]
    fn mirrored_series_gives_regular_bearish() {
        let config = SignalConfig::default();
        let (candles, stoch) = bullish_fixture();
        let prices: Vec<f64> = candles.iter().map(|c| 250.0 - c.close).collect();
        let ks: Vec<f64> = stoch.iter().map(|v| 100.0 - v.k).collect();
        let (candles, stoch) = make_series(&prices, &ks);

        let found = PivotDivergenceDetector::new(&config).detect(&candles, &stoch, Band::Slow);

        assert_eq!(found.len(), 1);
        assert_eq!(found[0].divergence_type, DivergenceType::Bearish);
        assert_eq!(found[0].strength(), 3);
    }

    #[test]
    fn thresholds_disqualify_candidates() {
        let (candles, stoch) = bullish_fixture();

        let steep = SignalConfig {
            min_divergence_angle: 20.0,
            ..Default::default()
        };
        assert!(PivotDivergenceDetector::new(&steep)
            .detect(&candles, &stoch, Band::Fast)
            .is_empty());

        let wide = SignalConfig {
            min_divergence_span: 13,
            ..Default::default()
        };
        assert!(PivotDivergenceDetector::new(&wide)
            .detect(&candles, &stoch, Band::Fast)
            .is_empty());
    }

    #[test]
    fn reported_divergences_respect_thresholds() {
        let config = SignalConfig {
            min_divergence_angle: 5.0,
            min_divergence_span: 4,
            ..Default::default()
        };
        let prices: Vec<f64> = (0..120)
            .map(|i| 100.0 + (i as f64 * 0.45).sin() * 8.0 - i as f64 * 0.05)
            .collect();
        let ks: Vec<f64> = (0..120)
            .map(|i| 50.0 + (i as f64 * 0.3).cos() * 40.0)
            .collect();
        let (candles, stoch) = make_series(&prices, &ks);

        for divergence in PivotDivergenceDetector::new(&config).detect(&candles, &stoch, Band::Fast)
        {
            assert!(divergence.angle >= config.min_divergence_angle);
            assert!(divergence.candle_span >= config.min_divergence_span);
        }
    }

    #[test]
    fn classify_covers_hidden_variants() {
        let point = |index, price, stoch_k| PivotPoint {
            index,
            price,
            stoch_k,
            time: 0,
        };
        let earlier = point(0, 100.0, 30.0);
        assert_eq!(
            classify(PivotKind::Low, &point(10, 105.0, 20.0), &earlier),
            Some(DivergenceType::HiddenBullish)
        );
        assert_eq!(
            classify(PivotKind::High, &point(10, 95.0, 40.0), &earlier),
            Some(DivergenceType::HiddenBearish)
        );
        assert_eq!(classify(PivotKind::Low, &point(10, 95.0, 20.0), &earlier), None);
    }

    #[test]
    fn angle_follows_atan_of_scaled_slope_difference() {
        let earlier = PivotPoint {
            index: 0,
            price: 100.0,
            stoch_k: 10.0,
            time: 0,
        };
        let recent = PivotPoint {
            index: 10,
            price: 90.0,
            stoch_k: 30.0,
            time: 600,
        };
        // price slope -0.01, stoch slope 0.02 -> diff 0.03 -> atan(0.3)
        let angle = divergence_angle(&recent, &earlier, 100.0);
        assert!((angle - 0.3f64.atan().to_degrees()).abs() < 1e-9);
        assert_eq!(divergence_angle(&recent, &earlier, 0.0), 0.0);
    }

    #[test]
    fn pivots_accept_either_price_or_oscillator_extreme() {
        let prices = [5.0, 4.0, 3.0, 2.0, 1.0, 0.5, 0.2];
        let osc = [50.0, 40.0, 30.0, 10.0, 30.0, 40.0, 50.0];
        // price is monotone, oscillator bottoms at 3
        assert_eq!(find_pivots(&prices, &osc, 0, 2, PivotKind::Low), vec![3]);
        assert!(find_pivots(&prices, &osc, 0, 2, PivotKind::High).is_empty());
    }

    #[test]
    fn short_input_yields_nothing() {
        let config = SignalConfig::default();
        let (candles, stoch) = make_series(&[1.0, 2.0, 3.0], &[10.0, 20.0, 30.0]);
        assert!(PivotDivergenceDetector::new(&config)
            .detect(&candles, &stoch, Band::Fast)
            .is_empty());
    }
}
