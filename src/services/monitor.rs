use std::sync::Arc;

use anyhow::Context;
use tokio::time::{interval, sleep, MissedTickBehavior};

use crate::business_logic::config::ServiceConfig;
use crate::models::candle::Candle;
use crate::models::signal::SignalEvent;
use crate::models::timeframe::TimeframeCandles;
use crate::services::engine::SignalEngine;
use crate::services::hyperliquid::CandleSource;
use crate::services::signal_state::SharedSignalState;

/// Polls candles for every configured symbol and feeds them to the engine
pub struct MonitorService {
    source: Arc<dyn CandleSource>,
    engine: Arc<SignalEngine>,
    shared_state: SharedSignalState,
    settings: ServiceConfig,
}

impl MonitorService {
    pub fn new(
        source: Arc<dyn CandleSource>,
        engine: Arc<SignalEngine>,
        shared_state: SharedSignalState,
        settings: ServiceConfig,
    ) -> Self {
        Self {
            source,
            engine,
            shared_state,
            settings,
        }
    }

    /// Start the monitoring loop
    pub async fn run(&self) {
        let mut ticker = interval(self.settings.scan_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            self.scan().await;
        }
    }

    /// One sequential pass over all symbols. Returns the transitions it caused.
    pub async fn scan(&self) -> Vec<SignalEvent> {
        let mut events = Vec::new();

        for (index, symbol) in self.settings.symbols.iter().enumerate() {
            if index > 0 && !self.settings.scan_delay.is_zero() {
                sleep(self.settings.scan_delay).await;
            }

            let (candles, higher_timeframes) = match self.fetch_windows(symbol).await {
                Ok(windows) => windows,
                Err(e) => {
                    tracing::error!("Error processing {}: {:#}", symbol, e);
                    continue;
                }
            };
            let last_close = candles.last().map(|candle| candle.close);
            let now = chrono::Utc::now().timestamp();

            match self
                .engine
                .process(symbol, candles, higher_timeframes, now)
                .await
                .with_context(|| format!("signal calculation failed for {}", symbol))
            {
                Ok(update) => {
                    tracing::debug!(
                        "{}: {} divergences, {} confluence reports",
                        symbol,
                        update.result.divergences.len(),
                        update.result.confluence.len()
                    );
                    if !update.registered.is_empty() {
                        tracing::info!("{}: tracking {:?}", symbol, update.registered);
                    }
                    events.extend(update.events);
                }
                Err(e) => {
                    tracing::error!("Error processing {}: {:#}", symbol, e);
                    // Tracked signals still follow the price
                    if let Some(price) = last_close {
                        events.extend(self.engine.tick(symbol, price, now));
                    }
                }
            }
        }

        self.shared_state
            .publish(self.engine.signals().to_vec(), events.clone())
            .await;
        events
    }

    async fn fetch_windows(
        &self,
        symbol: &str,
    ) -> anyhow::Result<(Vec<Candle>, Vec<TimeframeCandles>)> {
        let candles = self
            .source
            .recent_candles(symbol, &self.settings.interval, self.settings.candle_limit)
            .await?;

        let mut higher_timeframes = Vec::with_capacity(self.settings.htf_intervals.len());
        for timeframe in &self.settings.htf_intervals {
            match self
                .source
                .recent_candles(symbol, timeframe, self.settings.htf_candle_limit)
                .await
            {
                Ok(candles) => higher_timeframes.push(TimeframeCandles {
                    timeframe: timeframe.clone(),
                    candles,
                }),
                Err(e) => {
                    tracing::warn!("{}: no {} bias this scan: {:#}", symbol, timeframe, e);
                }
            }
        }

        tracing::debug!(
            "{}: {} candles, {} higher timeframes",
            symbol,
            candles.len(),
            higher_timeframes.len()
        );
        Ok((candles, higher_timeframes))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::business_logic::pipeline;
    use crate::models::candle::fixtures::washout_bounce;
    use crate::models::messages::{WorkerRequest, WorkerResponse};
    use crate::models::signal::SignalStatus;
    use crate::services::config_store::ConfigStore;
    use crate::services::signal_state::SignalStateInner;
    use crate::services::worker_pool::{ComputeHandler, ComputeWorkerPool, ThreadSpawner};

    struct FixtureSource;

    #[async_trait]
    impl CandleSource for FixtureSource {
        async fn recent_candles(
            &self,
            symbol: &str,
            interval: &str,
            _limit: usize,
        ) -> anyhow::Result<Vec<Candle>> {
            match (symbol, interval) {
                ("BTC", "15m") => Ok(washout_bounce()),
                ("BAD", _) => anyhow::bail!("upstream unavailable"),
                _ => anyhow::bail!("no {} data", interval),
            }
        }
    }

    fn settings(symbols: &[&str]) -> ServiceConfig {
        ServiceConfig {
            symbols: symbols.iter().map(|s| s.to_string()).collect(),
            interval: "15m".to_string(),
            htf_intervals: vec!["1h".to_string()],
            scan_delay: Duration::ZERO,
            throttle_interval: Duration::from_millis(10),
            worker_count: 1,
            ..ServiceConfig::default()
        }
    }

    fn monitor_with(
        settings: ServiceConfig,
        engine: SignalEngine,
    ) -> (MonitorService, SharedSignalState) {
        let state = SignalStateInner::new(8);
        let monitor = MonitorService::new(
            Arc::new(FixtureSource),
            Arc::new(engine),
            state.clone(),
            settings,
        );
        (monitor, state)
    }

    fn monitor(symbols: &[&str]) -> (MonitorService, SharedSignalState) {
        let settings = settings(symbols);
        let engine = SignalEngine::from_service_config(&settings);
        monitor_with(settings, engine)
    }

    /// Runs the real pipeline once, then fails every calculation.
    struct FailsAfterFirst {
        calls: AtomicUsize,
    }

    impl ComputeHandler for FailsAfterFirst {
        fn handle(&self, request: WorkerRequest) -> WorkerResponse {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                return pipeline::handle_request(request);
            }
            WorkerResponse::Error {
                message: "window rejected".to_string(),
            }
        }
    }

    #[tokio::test]
    async fn scan_publishes_tracked_signals() {
        let (monitor, state) = monitor(&["BTC"]);
        let mut rx = state.broadcaster.subscribe();

        let events = monitor.scan().await;

        assert!(events.is_empty());
        let snapshot = rx.recv().await.unwrap();
        assert_eq!(snapshot.signals.len(), 1);
        assert_eq!(state.signals.read().await.len(), 1);
    }

    #[tokio::test]
    async fn failing_symbol_does_not_stop_the_scan() {
        let (monitor, state) = monitor(&["BAD", "BTC"]);
        monitor.scan().await;
        let signals = state.signals.read().await;
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].symbol, "BTC");
    }

    #[tokio::test]
    async fn failed_calculation_still_advances_tracked_signals() {
        let settings = settings(&["BTC"]);
        let pool = ComputeWorkerPool::new(
            1,
            Duration::from_secs(5),
            ThreadSpawner::new(FailsAfterFirst {
                calls: AtomicUsize::new(0),
            }),
        );
        let engine = SignalEngine::new(&settings, pool, ConfigStore::default());
        let (monitor, state) = monitor_with(settings, engine);

        assert!(monitor.scan().await.is_empty());

        // Calculation now fails but the last close sits in the entry zone
        let events = monitor.scan().await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].to, SignalStatus::Active);
        assert_eq!(state.signals.read().await[0].status, SignalStatus::Active);
    }
}
