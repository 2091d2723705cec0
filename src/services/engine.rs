use std::sync::Arc;

use parking_lot::Mutex;

use crate::business_logic::config::{ServiceConfig, SignalConfig};
use crate::business_logic::lifecycle::SignalLifecycleManager;
use crate::errors::SignalError;
use crate::models::candle::Candle;
use crate::models::messages::{
    CalculatePayload, CalculationResult, ValidationOutcome, WorkerRequest, WorkerResponse,
};
use crate::models::signal::{SignalEvent, TradeSignal};
use crate::models::stochastic::QuadBandData;
use crate::models::timeframe::TimeframeCandles;
use crate::services::cache::ResultCache;
use crate::services::config_store::ConfigStore;
use crate::services::throttle::Throttle;
use crate::services::worker_pool::ComputeWorkerPool;

/// What one `process` call did for a symbol.
#[derive(Debug, Clone)]
pub struct EngineUpdate {
    pub result: CalculationResult,
    /// Ids of signals newly tracked by this pass
    pub registered: Vec<String>,
    pub events: Vec<SignalEvent>,
}

/// The signal pipeline as one object: worker pool, per-symbol throttle, quad
/// cache, lifecycle tracking and the live config.
pub struct SignalEngine {
    pool: ComputeWorkerPool,
    throttle: Throttle<CalculationResult>,
    cache: ResultCache<QuadBandData>,
    lifecycle: Mutex<SignalLifecycleManager>,
    config: ConfigStore,
}

impl SignalEngine {
    pub fn new(service: &ServiceConfig, pool: ComputeWorkerPool, config: ConfigStore) -> Self {
        let lifecycle = SignalLifecycleManager::new(&config.snapshot());
        Self {
            pool,
            throttle: Throttle::new(service.throttle_interval),
            cache: ResultCache::new(service.cache_ttl, service.cache_capacity),
            lifecycle: Mutex::new(lifecycle),
            config,
        }
    }

    /// Engine on OS-thread workers with the default signal config.
    pub fn from_service_config(service: &ServiceConfig) -> Self {
        let pool = ComputeWorkerPool::with_pipeline(service.worker_count, service.request_timeout);
        Self::new(service, pool, ConfigStore::default())
    }

    /// Throttled, cached calculation with the live config.
    pub async fn calculate(
        &self,
        symbol: &str,
        candles: Vec<Candle>,
        higher_timeframes: Vec<TimeframeCandles>,
        now: i64,
    ) -> Result<CalculationResult, SignalError> {
        let (version, config) = self.config.versioned();
        let purpose = quad_purpose(symbol, version);
        let cached_quad = self.cache.get(&purpose, &candles);
        if cached_quad.is_some() {
            tracing::debug!("{}: quad bands served from cache", symbol);
        }
        let payload = CalculatePayload {
            symbol: symbol.to_string(),
            candles,
            config,
            higher_timeframes,
            cached_quad,
            now,
        };

        self.throttle
            .run(symbol, || self.run_calculation(payload, purpose, version))
            .await
    }

    /// One-off calculation with a caller-supplied config. Skips the throttle
    /// and the cache.
    pub async fn calculate_with_config(
        &self,
        symbol: &str,
        candles: Vec<Candle>,
        higher_timeframes: Vec<TimeframeCandles>,
        now: i64,
        config: SignalConfig,
    ) -> Result<CalculationResult, SignalError> {
        config.check()?;
        let payload = CalculatePayload {
            symbol: symbol.to_string(),
            candles,
            config: Arc::new(config),
            higher_timeframes,
            cached_quad: None,
            now,
        };
        match self.pool.submit(WorkerRequest::CalculateSignals(payload)).await? {
            WorkerResponse::SignalsResult(result) => Ok(*result),
            other => Err(unexpected(other)),
        }
    }

    async fn run_calculation(
        &self,
        payload: CalculatePayload,
        purpose: String,
        version: u64,
    ) -> Result<CalculationResult, SignalError> {
        let window = payload.cached_quad.is_none().then(|| payload.candles.clone());

        let result = match self.pool.submit(WorkerRequest::CalculateSignals(payload)).await? {
            WorkerResponse::SignalsResult(result) => *result,
            other => return Err(unexpected(other)),
        };

        // A quad from a replaced config is keyed under its old version and
        // could never be read again
        if let Some(window) = window {
            if self.config.version() == version {
                self.cache.set(&purpose, &window, result.quad.clone());
            }
        }
        Ok(result)
    }

    pub async fn stochastics(
        &self,
        candles: Vec<Candle>,
        config: Option<SignalConfig>,
    ) -> Result<QuadBandData, SignalError> {
        let config = match config {
            Some(config) => {
                config.check()?;
                Arc::new(config)
            }
            None => self.config.snapshot(),
        };
        match self
            .pool
            .submit(WorkerRequest::CalculateStochOnly { candles, config })
            .await?
        {
            WorkerResponse::StochResult(quad) => Ok(quad),
            other => Err(unexpected(other)),
        }
    }

    pub async fn validate(
        &self,
        signal: TradeSignal,
        current_price: f64,
        now: i64,
    ) -> Result<ValidationOutcome, SignalError> {
        let request = WorkerRequest::ValidateSignal {
            signal,
            current_price,
            now,
            config: self.config.snapshot(),
        };
        match self.pool.submit(request).await? {
            WorkerResponse::ValidationResult(outcome) => Ok(outcome),
            other => Err(unexpected(other)),
        }
    }

    /// Calculate for the latest window, advance tracked signals with the last
    /// close, then track any new signal. A new signal is first advanced on the
    /// next pass.
    pub async fn process(
        &self,
        symbol: &str,
        candles: Vec<Candle>,
        higher_timeframes: Vec<TimeframeCandles>,
        now: i64,
    ) -> Result<EngineUpdate, SignalError> {
        let last_close = candles.last().map(|candle| candle.close);
        let result = self.calculate(symbol, candles, higher_timeframes, now).await?;

        let (events, registered) = {
            let mut lifecycle = self.lifecycle.lock();
            let events = match last_close {
                Some(price) => lifecycle.update(symbol, price, now),
                None => Vec::new(),
            };
            let registered: Vec<String> = result
                .signals
                .iter()
                .filter(|signal| lifecycle.register((*signal).clone()))
                .map(|signal| signal.id.clone())
                .collect();
            (events, registered)
        };

        Ok(EngineUpdate {
            result,
            registered,
            events,
        })
    }

    /// Advance tracked signals for `symbol` on a price alone.
    pub fn tick(&self, symbol: &str, price: f64, now: i64) -> Vec<SignalEvent> {
        self.lifecycle.lock().update(symbol, price, now)
    }

    pub fn signals(&self) -> Arc<Vec<TradeSignal>> {
        self.lifecycle.lock().snapshot()
    }

    pub fn signal(&self, id: &str) -> Option<TradeSignal> {
        self.lifecycle.lock().get(id).cloned()
    }

    /// Tracked signals and how many of them are still open.
    pub fn signal_counts(&self) -> (usize, usize) {
        let lifecycle = self.lifecycle.lock();
        (lifecycle.tracked_count(), lifecycle.open_signals().len())
    }

    pub fn config(&self) -> Arc<SignalConfig> {
        self.config.snapshot()
    }

    /// Swap the live config. Cached quad data was computed under the old
    /// thresholds and is dropped.
    pub fn update_config(&self, config: SignalConfig) -> Result<Arc<SignalConfig>, SignalError> {
        let config = self.config.update(config)?;
        self.lifecycle.lock().apply_config(&config);
        self.cache.invalidate(None);
        Ok(config)
    }

    pub fn pool(&self) -> &ComputeWorkerPool {
        &self.pool
    }

    pub fn cached_windows(&self) -> usize {
        self.cache.len()
    }
}

fn quad_purpose(symbol: &str, version: u64) -> String {
    format!("quad:{}@{}", symbol, version)
}

fn unexpected(response: WorkerResponse) -> SignalError {
    SignalError::Protocol(format!("unexpected {} reply", response.kind()))
}
