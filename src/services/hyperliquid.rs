use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::models::api::interval_ms;
use crate::models::candle::Candle;

const HYPERLIQUID_API_URL: &str = "https://api.hyperliquid.xyz/info";

/// Anything that can hand back the most recent `limit` candles of a stream.
#[async_trait]
pub trait CandleSource: Send + Sync {
    async fn recent_candles(
        &self,
        symbol: &str,
        interval: &str,
        limit: usize,
    ) -> anyhow::Result<Vec<Candle>>;
}

#[derive(Debug, Serialize)]
struct CandleRequest {
    #[serde(rename = "type")]
    request_type: String,
    req: CandleRequestInner,
}

#[derive(Debug, Serialize)]
struct CandleRequestInner {
    coin: String,
    interval: String,
    #[serde(rename = "startTime")]
    start_time: u64,
    #[serde(rename = "endTime")]
    end_time: u64,
}

/// Candle as returned by `candleSnapshot`: ms timestamps, prices as strings.
#[derive(Debug, Clone, Deserialize)]
struct WireCandle {
    #[serde(rename = "t")]
    open_time: u64,
    #[serde(rename = "o", deserialize_with = "deserialize_string_to_f64")]
    open: f64,
    #[serde(rename = "h", deserialize_with = "deserialize_string_to_f64")]
    high: f64,
    #[serde(rename = "l", deserialize_with = "deserialize_string_to_f64")]
    low: f64,
    #[serde(rename = "c", deserialize_with = "deserialize_string_to_f64")]
    close: f64,
    #[serde(rename = "v", deserialize_with = "deserialize_string_to_f64")]
    volume: f64,
}

impl From<WireCandle> for Candle {
    fn from(wire: WireCandle) -> Self {
        Candle {
            time: (wire.open_time / 1000) as i64,
            open: wire.open,
            high: wire.high,
            low: wire.low,
            close: wire.close,
            volume: wire.volume,
        }
    }
}

fn deserialize_string_to_f64<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s: String = Deserialize::deserialize(deserializer)?;
    s.parse::<f64>().map_err(serde::de::Error::custom)
}

#[derive(Clone)]
pub struct HyperliquidClient {
    client: reqwest::Client,
}

impl HyperliquidClient {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    /// Fetch candles for a coin within a time range (epoch ms)
    pub async fn fetch_candles(
        &self,
        coin: &str,
        interval: &str,
        start_time: u64,
        end_time: u64,
    ) -> anyhow::Result<Vec<Candle>> {
        let request = CandleRequest {
            request_type: "candleSnapshot".to_string(),
            req: CandleRequestInner {
                coin: coin.to_string(),
                interval: interval.to_string(),
                start_time,
                end_time,
            },
        };

        let candles = self
            .client
            .post(HYPERLIQUID_API_URL)
            .json(&request)
            .send()
            .await
            .context("candle snapshot request failed")?
            .error_for_status()
            .context("candle snapshot rejected")?
            .json::<Vec<WireCandle>>()
            .await
            .context("failed to decode candle snapshot")?;

        Ok(normalize_candles(candles))
    }
}

impl Default for HyperliquidClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CandleSource for HyperliquidClient {
    async fn recent_candles(
        &self,
        symbol: &str,
        interval: &str,
        limit: usize,
    ) -> anyhow::Result<Vec<Candle>> {
        let now_ms = chrono::Utc::now().timestamp_millis() as u64;
        let interval_ms = interval_ms(interval).context("unsupported interval")?;
        let (start_time, end_time) = build_time_range(now_ms, interval_ms, limit);

        let mut candles = self
            .fetch_candles(symbol, interval, start_time, end_time)
            .await
            .with_context(|| format!("failed to fetch {} {} candles", symbol, interval))?;
        if candles.len() > limit {
            candles.drain(..candles.len() - limit);
        }
        Ok(candles)
    }
}

fn build_time_range(now_ms: u64, interval_ms: u64, limit: usize) -> (u64, u64) {
    let span = interval_ms.saturating_mul(limit as u64);
    let start_time = now_ms.saturating_sub(span);
    (start_time, now_ms)
}

/// Sort ascending and keep the last copy of any repeated open time.
fn normalize_candles(wire: Vec<WireCandle>) -> Vec<Candle> {
    let mut candles: Vec<Candle> = wire.into_iter().map(Candle::from).collect();
    candles.sort_by_key(|candle| candle.time);
    let mut normalized: Vec<Candle> = Vec::with_capacity(candles.len());
    for candle in candles {
        match normalized.last_mut() {
            Some(last) if last.time == candle.time => *last = candle,
            _ => normalized.push(candle),
        }
    }
    normalized
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_time_range_uses_limit_and_interval() {
        let now_ms = 1_000_000;
        let interval_ms = 60_000;
        let (start_time, end_time) = build_time_range(now_ms, interval_ms, 5);

        assert_eq!(end_time, now_ms);
        assert_eq!(start_time, now_ms - (interval_ms * 5));
    }

    #[test]
    fn wire_candle_decodes_string_prices_and_ms_time() {
        let json = r#"[{"t":1700000000000,"T":1700000059999,"s":"BTC","i":"1m",
            "o":"50000.5","c":"50010","h":"50020","l":"49990","v":"12.5","n":42}]"#;
        let wire: Vec<WireCandle> = serde_json::from_str(json).unwrap();
        let candles = normalize_candles(wire);

        assert_eq!(candles.len(), 1);
        assert_eq!(candles[0].time, 1_700_000_000);
        assert_eq!(candles[0].open, 50_000.5);
        assert_eq!(candles[0].close, 50_010.0);
        assert_eq!(candles[0].volume, 12.5);
    }

    #[test]
    fn unparsable_price_is_rejected() {
        let json = r#"[{"t":1,"o":"abc","c":"1","h":"1","l":"1","v":"1"}]"#;
        assert!(serde_json::from_str::<Vec<WireCandle>>(json).is_err());
    }

    #[test]
    fn normalize_orders_and_dedupes() {
        let wire = |t: u64, close: f64| WireCandle {
            open_time: t,
            open: close,
            high: close,
            low: close,
            close,
            volume: 1.0,
        };
        let candles = normalize_candles(vec![
            wire(120_000, 2.0),
            wire(60_000, 1.0),
            wire(120_000, 3.0),
        ]);

        assert_eq!(candles.len(), 2);
        assert_eq!(candles[0].time, 60);
        assert_eq!(candles[1].close, 3.0);
    }
}
