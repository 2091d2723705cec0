use crate::business_logic::config::SignalConfig;
use crate::business_logic::indicators::least_squares_slope;
use crate::business_logic::stochastic;
use crate::models::candle::Candle;
use crate::models::stochastic::{Band, BandSeries, BandState, QuadBandData, StochasticValue};

/// Overlays the four fixed stochastic bands and derives their joint state.
#[derive(Debug, Clone, Copy)]
pub struct QuadBandAggregator<'a> {
    config: &'a SignalConfig,
}

impl<'a> QuadBandAggregator<'a> {
    pub fn new(config: &'a SignalConfig) -> Self {
        Self { config }
    }

    /// Compute all four bands over `candles` and aggregate them.
    pub fn calculate(&self, candles: &[Candle]) -> QuadBandData {
        let series = Band::ALL
            .iter()
            .map(|band| BandSeries {
                band: *band,
                values: stochastic::calculate_band(candles, *band),
            })
            .collect();
        self.aggregate(series)
    }

    /// Aggregate precomputed band series. State is read at the latest
    /// timestamp where every band has a valid %K and %D.
    pub fn aggregate(&self, series: Vec<BandSeries>) -> QuadBandData {
        let reference_time = common_reference_time(&series);

        let states: Vec<BandState> = match reference_time {
            Some(time) => series
                .iter()
                .filter_map(|band_series| self.band_state(band_series, time))
                .collect(),
            None => Vec::new(),
        };

        let complete = states.len() == Band::ALL.len();
        let bullish_count = states.iter().filter(|s| s.is_bullish).count();
        let bearish_count = states.iter().filter(|s| s.is_bearish).count();
        let oversold_count = states.iter().filter(|s| s.is_oversold).count();
        let overbought_count = states.iter().filter(|s| s.is_overbought).count();

        let alignment_direction = if !complete {
            0
        } else if bullish_count == Band::ALL.len() {
            1
        } else if bearish_count == Band::ALL.len() {
            -1
        } else {
            0
        };

        let rotation_direction = if !complete {
            0
        } else if states.iter().all(|s| s.k_slope > 0.0) {
            1
        } else if states.iter().all(|s| s.k_slope < 0.0) {
            -1
        } else {
            0
        };

        tracing::debug!(
            "quad state at {:?}: bullish={} bearish={} oversold={} overbought={} align={} rotate={}",
            reference_time,
            bullish_count,
            bearish_count,
            oversold_count,
            overbought_count,
            alignment_direction,
            rotation_direction
        );

        QuadBandData {
            series,
            states,
            reference_time,
            is_quad_aligned: alignment_direction != 0,
            alignment_direction,
            is_quad_rotating: rotation_direction != 0,
            rotation_direction,
            bullish_count,
            bearish_count,
            oversold_count,
            overbought_count,
        }
    }

    fn band_state(&self, band_series: &BandSeries, time: i64) -> Option<BandState> {
        let values = &band_series.values;
        let index = index_at(values, time)?;
        let current = values[index];

        let samples: Vec<&StochasticValue> = values[..=index]
            .iter()
            .rev()
            .take_while(|v| v.is_valid())
            .take(self.config.slope_samples)
            .collect();
        let k_samples: Vec<f64> = samples.iter().rev().map(|v| v.k).collect();
        let d_samples: Vec<f64> = samples.iter().rev().map(|v| v.d).collect();

        Some(BandState {
            band: band_series.band,
            time,
            k: current.k,
            d: current.d,
            is_oversold: current.k < self.config.oversold && current.d < self.config.oversold,
            is_overbought: current.k > self.config.overbought
                && current.d > self.config.overbought,
            is_bullish: current.k > current.d,
            is_bearish: current.k < current.d,
            k_slope: least_squares_slope(&k_samples),
            d_slope: least_squares_slope(&d_samples),
        })
    }
}

/// Latest timestamp at which every band holds a valid sample.
fn common_reference_time(series: &[BandSeries]) -> Option<i64> {
    let first = series.first()?;
    first
        .values
        .iter()
        .rev()
        .filter(|value| value.is_valid())
        .map(|value| value.time)
        .find(|time| {
            series
                .iter()
                .all(|other| index_at(&other.values, *time).is_some())
        })
}

fn index_at(values: &[StochasticValue], time: i64) -> Option<usize> {
    let index = values.binary_search_by_key(&time, |v| v.time).ok()?;
    values[index].is_valid().then_some(index)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Series whose last samples step %K by `k_step` and keep %D offset by `gap`.
    fn make_series(band: Band, len: usize, k_end: f64, k_step: f64, gap: f64) -> BandSeries {
        let values = (0..len)
            .map(|i| {
                let back = (len - 1 - i) as f64;
                let k = (k_end - back * k_step).clamp(0.0, 100.0);
                StochasticValue {
                    time: i as i64 * 60,
                    k,
                    d: (k - gap).clamp(0.0, 100.0),
                }
            })
            .collect();
        BandSeries { band, values }
    }

    fn rising_quad() -> Vec<BandSeries> {
        Band::ALL
            .iter()
            .map(|band| make_series(*band, 20, 60.0, 2.0, 5.0))
            .collect()
    }

    #[test]
    fn all_bands_bullish_and_rising_align_and_rotate() {
        let config = SignalConfig::default();
        let data = QuadBandAggregator::new(&config).aggregate(rising_quad());

        assert!(data.is_quad_aligned);
        assert_eq!(data.alignment_direction, 1);
        assert!(data.is_quad_rotating);
        assert_eq!(data.rotation_direction, 1);
        assert_eq!(data.bullish_count, 4);
        assert_eq!(data.states.len(), 4);
        let fast = data.state(Band::Fast).unwrap();
        assert!((fast.k_slope - 2.0).abs() < 1e-9);
    }

    #[test]
    fn slow_band_disagreeing_breaks_alignment() {
        let config = SignalConfig::default();
        let mut series = rising_quad();
        series[3] = make_series(Band::Slow, 20, 40.0, -2.0, -5.0);

        let data = QuadBandAggregator::new(&config).aggregate(series);

        assert!(!data.is_quad_aligned);
        assert_eq!(data.alignment_direction, 0);
        assert!(!data.is_quad_rotating);
        assert_eq!(data.bullish_count, 3);
        assert_eq!(data.bearish_count, 1);
    }

    #[test]
    fn state_is_read_at_shared_timestamp() {
        let config = SignalConfig::default();
        // Bearish and falling everywhere...
        let mut series: Vec<BandSeries> = Band::ALL
            .iter()
            .map(|band| make_series(*band, 20, 30.0, -1.0, -5.0))
            .collect();
        // ...except a bullish final sample on three bands while SLOW has not printed yet
        for band_series in series.iter_mut().take(3) {
            let last = band_series.values.last_mut().unwrap();
            last.k = 90.0;
            last.d = 10.0;
        }
        let slow_last = series[3].values.last_mut().unwrap();
        slow_last.k = f64::NAN;
        slow_last.d = f64::NAN;

        let data = QuadBandAggregator::new(&config).aggregate(series);

        assert_eq!(data.reference_time, Some(18 * 60));
        assert!(data.is_quad_aligned);
        assert_eq!(data.alignment_direction, -1);
        assert_eq!(data.rotation_direction, -1);
    }

    #[test]
    fn oversold_requires_both_lines_below_threshold() {
        let config = SignalConfig::default();
        let series: Vec<BandSeries> = Band::ALL
            .iter()
            .map(|band| make_series(*band, 20, 10.0, 0.5, -5.0))
            .collect();
        let data = QuadBandAggregator::new(&config).aggregate(series);
        // %K 10, %D 15: both below 20
        assert_eq!(data.oversold_count, 4);

        let series: Vec<BandSeries> = Band::ALL
            .iter()
            .map(|band| make_series(*band, 20, 10.0, 0.5, -15.0))
            .collect();
        let data = QuadBandAggregator::new(&config).aggregate(series);
        // %D at 25 keeps the band out of oversold
        assert_eq!(data.oversold_count, 0);
    }

    #[test]
    fn insufficient_candles_leave_flags_false() {
        let config = SignalConfig::default();
        let candles: Vec<Candle> = (0..30)
            .map(|i| Candle {
                time: i * 60,
                open: 100.0,
                high: 101.0 + i as f64,
                low: 99.0,
                close: 100.0 + i as f64,
                volume: 1.0,
            })
            .collect();

        let data = QuadBandAggregator::new(&config).calculate(&candles);

        assert_eq!(data.series.len(), 4);
        assert!(data.series.iter().all(|s| s.values.len() == 30));
        let slow = data.series(Band::Slow).unwrap();
        assert!(slow.iter().all(|v| v.k.is_nan()));
        assert!(data.states.is_empty());
        assert!(data.reference_time.is_none());
        assert!(!data.is_quad_aligned && !data.is_quad_rotating);
    }
}
