use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::{Validate, ValidationError};

use crate::errors::SignalError;
use crate::models::indicator::IndicatorSpec;
use crate::models::signal::SignalStrength;
use crate::models::stochastic::Band;

/// Hard cap on compute workers regardless of hardware parallelism.
pub const MAX_WORKERS: usize = 4;

/// How the initial stop is placed relative to entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "method", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StopLossMethod {
    /// Beyond the extreme of the last `lookback` candles, padded by `buffer_pct`
    Swing { lookback: usize, buffer_pct: f64 },
    /// `multiplier` ATRs away from entry
    Atr { period: usize, multiplier: f64 },
    /// Fixed percentage away from entry
    Percentage { pct: f64 },
    /// Fixed price distance from entry
    FixedAmount { amount: f64 },
}

/// What happens when an intermediate target is reached
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExitPolicy {
    /// Take the tier's exit percentage and keep the rest running as PARTIAL
    ScaleOut,
    /// Close the whole signal at the first target
    CloseAtFirstTarget,
}

/// Minimum signal-level confluence score for each strength tier
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct StrengthCutoffs {
    pub moderate: u8,
    pub strong: u8,
    #[serde(rename = "super")]
    pub super_: u8,
}

impl StrengthCutoffs {
    pub fn classify(&self, score: u8) -> SignalStrength {
        if score >= self.super_ {
            SignalStrength::Super
        } else if score >= self.strong {
            SignalStrength::Strong
        } else if score >= self.moderate {
            SignalStrength::Moderate
        } else {
            SignalStrength::Weak
        }
    }
}

/// Tunable thresholds for the signal pipeline. Each calculation works on an
/// immutable snapshot; updates go through `ConfigStore`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate, ToSchema)]
#[validate(schema(function = "validate_signal_config"))]
pub struct SignalConfig {
    /// %K and %D below this mark a band oversold
    #[validate(range(min = 0.0, max = 100.0))]
    pub oversold: f64,
    /// %K and %D above this mark a band overbought
    #[validate(range(min = 0.0, max = 100.0))]
    pub overbought: f64,
    /// Valid samples used for the least-squares slope
    #[validate(range(min = 2, max = 50))]
    pub slope_samples: usize,
    /// Trailing candles scanned for pivots
    #[validate(range(min = 10))]
    pub divergence_lookback: usize,
    /// Candles each side a pivot must dominate
    #[validate(range(min = 1, max = 10))]
    pub pivot_lookback: usize,
    /// Minimum divergence steepness in degrees
    #[validate(range(min = 0.0, max = 90.0))]
    pub min_divergence_angle: f64,
    /// Minimum candles between the two pivots
    #[validate(range(min = 1))]
    pub min_divergence_span: usize,
    /// Max candles since the recent pivot for a divergence to trigger a signal
    pub divergence_recency: usize,
    /// Bands scanned for divergence
    #[validate(length(min = 1))]
    pub divergence_bands: Vec<Band>,
    /// Moving averages checked for price proximity
    #[validate(length(min = 1))]
    pub ma_periods: Vec<usize>,
    /// % distance to an MA that counts as confluence
    #[validate(range(min = 0.0))]
    pub ma_proximity_pct: f64,
    /// Rolling VWAP window
    #[validate(range(min = 1))]
    pub vwap_period: usize,
    /// % distance to VWAP that counts as confluence
    #[validate(range(min = 0.0))]
    pub vwap_proximity_pct: f64,
    /// Donchian channel window
    #[validate(range(min = 2))]
    pub channel_period: usize,
    /// Share of the channel range (%) that counts as an extreme
    #[validate(range(min = 0.0, max = 50.0))]
    pub channel_extreme_pct: f64,
    /// Window for average volume
    #[validate(range(min = 1))]
    pub volume_period: usize,
    /// Volume above this multiple of average is a spike
    #[validate(range(min = 1.0))]
    pub volume_spike_multiplier: f64,
    /// Half-width of the entry zone around current price, in %
    #[validate(range(min = 0.0, max = 5.0))]
    pub entry_zone_pct: f64,
    pub stop_loss: StopLossMethod,
    /// Risk:reward multiple per target tier
    pub target_multiples: Vec<f64>,
    /// Position % closed at each tier
    pub target_exit_pcts: Vec<f64>,
    pub exit_policy: ExitPolicy,
    /// Trailing distance as a multiple of initial risk, once armed
    #[validate(range(min = 0.0))]
    pub trailing_stop_multiple: f64,
    pub strength_cutoffs: StrengthCutoffs,
    /// Raw confluence needed before a candidate is built
    pub min_confluence_score: u8,
    /// Signal-level confluence needed to emit
    pub min_confirmation_score: u8,
    pub min_strength: SignalStrength,
    /// Seconds a pending signal waits for entry
    #[validate(range(min = 1))]
    pub signal_expiry_secs: i64,
    /// Signals retained by the lifecycle manager
    #[validate(range(min = 1))]
    pub max_history: usize,
    /// Overlay series returned with every calculation
    pub overlay_indicators: Vec<IndicatorSpec>,
}

impl Default for SignalConfig {
    fn default() -> Self {
        Self {
            oversold: 20.0,
            overbought: 80.0,
            slope_samples: 5,
            divergence_lookback: 60,
            pivot_lookback: 3,
            min_divergence_angle: 10.0,
            min_divergence_span: 5,
            divergence_recency: 10,
            divergence_bands: Band::ALL.to_vec(),
            ma_periods: vec![20, 50, 200],
            ma_proximity_pct: 0.5,
            vwap_period: 50,
            vwap_proximity_pct: 0.5,
            channel_period: 20,
            channel_extreme_pct: 15.0,
            volume_period: 20,
            volume_spike_multiplier: 1.5,
            entry_zone_pct: 0.1,
            stop_loss: StopLossMethod::Swing {
                lookback: 10,
                buffer_pct: 0.1,
            },
            target_multiples: vec![1.5, 2.5, 4.0],
            target_exit_pcts: vec![50.0, 30.0, 20.0],
            exit_policy: ExitPolicy::ScaleOut,
            trailing_stop_multiple: 1.0,
            strength_cutoffs: StrengthCutoffs {
                moderate: 4,
                strong: 6,
                super_: 8,
            },
            min_confluence_score: 2,
            min_confirmation_score: 3,
            min_strength: SignalStrength::Weak,
            signal_expiry_secs: 4 * 60 * 60,
            max_history: 100,
            overlay_indicators: vec![
                IndicatorSpec::Sma { period: 20 },
                IndicatorSpec::Sma { period: 50 },
                IndicatorSpec::Vwap { period: 50 },
            ],
        }
    }
}

impl SignalConfig {
    /// Validate and map failures into the signal error taxonomy.
    pub fn check(&self) -> Result<(), SignalError> {
        self.validate()
            .map_err(|err| SignalError::InvalidConfig(err.to_string()))
    }
}

fn validate_signal_config(config: &SignalConfig) -> Result<(), ValidationError> {
    if config.oversold >= config.overbought {
        return Err(config_error(
            "oversold_not_below_overbought",
            "oversold must be below overbought",
        ));
    }

    let tiers = config.target_multiples.len();
    if !(2..=3).contains(&tiers) {
        return Err(config_error("target_count", "2 or 3 targets are required"));
    }
    if config.target_exit_pcts.len() != tiers {
        return Err(config_error(
            "target_exit_mismatch",
            "one exit percentage is required per target",
        ));
    }
    if config.target_multiples.windows(2).any(|w| w[1] <= w[0])
        || config.target_multiples.iter().any(|m| *m <= 0.0)
    {
        return Err(config_error(
            "target_multiples_order",
            "target multiples must be positive and increasing",
        ));
    }
    if config.target_exit_pcts.iter().any(|pct| *pct < 0.0) {
        return Err(config_error("negative_exit", "exit percentages must be >= 0"));
    }
    let exit_total: f64 = config.target_exit_pcts.iter().sum();
    if exit_total > 100.0 + f64::EPSILON {
        return Err(config_error(
            "exit_total",
            "target exit percentages must sum to at most 100",
        ));
    }

    let cutoffs = config.strength_cutoffs;
    if !(cutoffs.moderate < cutoffs.strong && cutoffs.strong < cutoffs.super_) {
        return Err(config_error(
            "strength_cutoffs_order",
            "strength cutoffs must be strictly increasing",
        ));
    }

    if config.ma_periods.contains(&0) {
        return Err(config_error("ma_period", "moving average periods must be positive"));
    }

    let stop_ok = match &config.stop_loss {
        StopLossMethod::Swing {
            lookback,
            buffer_pct,
        } => *lookback > 0 && *buffer_pct >= 0.0,
        StopLossMethod::Atr { period, multiplier } => *period > 0 && *multiplier > 0.0,
        StopLossMethod::Percentage { pct } => *pct > 0.0 && *pct < 100.0,
        StopLossMethod::FixedAmount { amount } => *amount > 0.0,
    };
    if !stop_ok {
        return Err(config_error(
            "stop_loss_params",
            "stop loss parameters must be positive",
        ));
    }

    Ok(())
}

fn config_error(code: &'static str, message: &'static str) -> ValidationError {
    let mut error = ValidationError::new(code);
    error.message = Some(message.into());
    error
}

/// Process-level settings, read once at startup
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// HTTP listen address
    pub bind_addr: String,
    /// Symbols scanned by the monitor loop
    pub symbols: Vec<String>,
    /// Primary candle interval
    pub interval: String,
    /// Higher timeframes used for bias
    pub htf_intervals: Vec<String>,
    /// Candles fetched for the primary window
    pub candle_limit: usize,
    /// Candles fetched per higher timeframe
    pub htf_candle_limit: usize,
    /// Time between full scans
    pub scan_interval: Duration,
    /// Pause between symbols inside one scan (upstream rate limits)
    pub scan_delay: Duration,
    /// Compute workers, capped by hardware parallelism and `MAX_WORKERS`
    pub worker_count: usize,
    /// Per-request worker deadline
    pub request_timeout: Duration,
    /// Minimum spacing between calculations for one symbol
    pub throttle_interval: Duration,
    /// Result cache time-to-live
    pub cache_ttl: Duration,
    /// Result cache capacity
    pub cache_capacity: usize,
    /// Directory for rolling file logs
    pub log_dir: Option<String>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:3000".to_string(),
            symbols: vec!["BTC".to_string(), "ETH".to_string(), "SOL".to_string()],
            interval: "15m".to_string(),
            htf_intervals: vec!["1h".to_string(), "4h".to_string()],
            candle_limit: 300,
            htf_candle_limit: 250,
            scan_interval: Duration::from_secs(60),
            scan_delay: Duration::from_millis(250),
            worker_count: default_worker_count(),
            request_timeout: Duration::from_secs(10),
            throttle_interval: Duration::from_millis(500),
            cache_ttl: Duration::from_secs(60),
            cache_capacity: 100,
            log_dir: None,
        }
    }
}

impl ServiceConfig {
    /// Defaults overridden by `QS_*` environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            bind_addr: env_or("QS_BIND_ADDR", defaults.bind_addr),
            symbols: env_list("QS_SYMBOLS").unwrap_or(defaults.symbols),
            interval: env_or("QS_INTERVAL", defaults.interval),
            htf_intervals: env_list("QS_HTF_INTERVALS").unwrap_or(defaults.htf_intervals),
            candle_limit: env_or("QS_CANDLE_LIMIT", defaults.candle_limit),
            htf_candle_limit: env_or("QS_HTF_CANDLE_LIMIT", defaults.htf_candle_limit),
            scan_interval: Duration::from_secs(env_or(
                "QS_SCAN_INTERVAL_SECS",
                defaults.scan_interval.as_secs(),
            )),
            scan_delay: Duration::from_millis(env_or(
                "QS_SCAN_DELAY_MS",
                defaults.scan_delay.as_millis() as u64,
            )),
            worker_count: env_or("QS_WORKERS", defaults.worker_count)
                .clamp(1, default_worker_count()),
            request_timeout: Duration::from_millis(env_or(
                "QS_REQUEST_TIMEOUT_MS",
                defaults.request_timeout.as_millis() as u64,
            )),
            throttle_interval: Duration::from_millis(env_or(
                "QS_THROTTLE_MS",
                defaults.throttle_interval.as_millis() as u64,
            )),
            cache_ttl: Duration::from_secs(env_or(
                "QS_CACHE_TTL_SECS",
                defaults.cache_ttl.as_secs(),
            )),
            cache_capacity: env_or("QS_CACHE_CAPACITY", defaults.cache_capacity),
            log_dir: std::env::var("LOG_DIR").ok().filter(|dir| !dir.is_empty()),
        }
    }
}

fn default_worker_count() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(2)
        .min(MAX_WORKERS)
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => match raw.parse() {
            Ok(value) => value,
            Err(_) => {
                tracing::warn!("ignoring unparsable {}={}", key, raw);
                default
            }
        },
        Err(_) => default,
    }
}

fn env_list(key: &str) -> Option<Vec<String>> {
    let raw = std::env::var(key).ok()?;
    let items: Vec<String> = raw
        .split(',')
        .map(|item| item.trim().to_string())
        .filter(|item| !item.is_empty())
        .collect();
    (!items.is_empty()).then_some(items)
}
