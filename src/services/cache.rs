use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::models::candle::Candle;

#[derive(Debug, Clone)]
pub struct CacheEntry<T> {
    pub data: T,
    pub timestamp: Instant,
    pub hash: String,
}

/// Window hash that ignores the last (possibly still forming) candle:
/// length, first time and second-to-last time.
pub fn window_hash(candles: &[Candle]) -> String {
    let first = candles.first().map(|c| c.time.to_string());
    let second_to_last = candles
        .len()
        .checked_sub(2)
        .map(|index| candles[index].time.to_string());
    format!(
        "{}-{}-{}",
        candles.len(),
        first.as_deref().unwrap_or("none"),
        second_to_last.as_deref().unwrap_or("none")
    )
}

/// Memoizes expensive per-window results.
///
/// Entries expire after `ttl` whether or not the window still matches, and
/// the oldest entry is evicted once `capacity` is reached.
pub struct ResultCache<T> {
    ttl: Duration,
    capacity: usize,
    entries: Mutex<HashMap<String, CacheEntry<T>>>,
}

impl<T: Clone> ResultCache<T> {
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            ttl,
            capacity: capacity.max(1),
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn key(purpose: &str, candles: &[Candle]) -> String {
        format!("{}-{}", purpose, window_hash(candles))
    }

    pub fn get(&self, purpose: &str, candles: &[Candle]) -> Option<T> {
        let key = Self::key(purpose, candles);
        let mut entries = self.entries.lock();

        let entry = entries.get(&key)?;
        if entry.timestamp.elapsed() > self.ttl {
            entries.remove(&key);
            tracing::debug!("cache entry {} expired", key);
            return None;
        }
        Some(entry.data.clone())
    }

    pub fn set(&self, purpose: &str, candles: &[Candle], data: T) {
        let hash = window_hash(candles);
        let key = format!("{}-{}", purpose, hash);
        let mut entries = self.entries.lock();

        if !entries.contains_key(&key) && entries.len() >= self.capacity {
            let ttl = self.ttl;
            entries.retain(|_, entry| entry.timestamp.elapsed() <= ttl);
        }
        if !entries.contains_key(&key) && entries.len() >= self.capacity {
            let oldest = entries
                .iter()
                .min_by_key(|(_, entry)| entry.timestamp)
                .map(|(key, _)| key.clone());
            if let Some(oldest) = oldest {
                entries.remove(&oldest);
                tracing::debug!(
                    "cache capacity {} reached, evicted {}",
                    self.capacity,
                    oldest
                );
            }
        }

        entries.insert(
            key,
            CacheEntry {
                data,
                timestamp: Instant::now(),
                hash,
            },
        );
    }

    /// Remove keys starting with `prefix`, or everything when `None`.
    /// Returns the number of entries removed.
    pub fn invalidate(&self, prefix: Option<&str>) -> usize {
        let mut entries = self.entries.lock();
        let before = entries.len();
        match prefix {
            Some(prefix) => entries.retain(|key, _| !key.starts_with(prefix)),
            None => entries.clear(),
        }
        let removed = before - entries.len();
        tracing::info!("cache invalidated {:?}: {} entries removed", prefix, removed);
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_candles(len: usize, last_close: f64) -> Vec<Candle> {
        (0..len)
            .map(|i| {
                let close = if i == len - 1 { last_close } else { 50_000.0 };
                Candle {
                    time: 1_700_000_000 + i as i64 * 60,
                    open: 50_000.0,
                    high: close.max(50_000.0) + 10.0,
                    low: close.min(50_000.0) - 10.0,
                    close,
                    volume: 1.0,
                }
            })
            .collect()
    }

    fn cache() -> ResultCache<String> {
        ResultCache::new(Duration::from_secs(60), 10)
    }

    #[test]
    fn live_candle_ticks_hit_the_cache() {
        let cache = cache();
        let window = make_candles(500, 50_000.0);
        cache.set("quad", &window, "cached".to_string());

        let ticked = make_candles(500, 50_010.0);
        assert_eq!(window_hash(&window), window_hash(&ticked));
        assert_eq!(cache.get("quad", &ticked).as_deref(), Some("cached"));
    }

    #[test]
    fn appended_candle_misses() {
        let cache = cache();
        let window = make_candles(500, 50_000.0);
        cache.set("quad", &window, "cached".to_string());

        let longer = make_candles(501, 50_000.0);
        assert_ne!(window_hash(&window), window_hash(&longer));
        assert!(cache.get("quad", &longer).is_none());
    }

    #[test]
    fn purposes_are_separate() {
        let cache = cache();
        let window = make_candles(50, 1.0);
        cache.set("quad:BTC", &window, "btc".to_string());
        assert!(cache.get("quad:ETH", &window).is_none());
    }

    #[test]
    fn entries_expire_after_ttl() {
        let cache: ResultCache<u32> = ResultCache::new(Duration::from_millis(20), 10);
        let window = make_candles(10, 1.0);
        cache.set("quad", &window, 7);
        std::thread::sleep(Duration::from_millis(40));
        assert!(cache.get("quad", &window).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn oldest_entry_is_evicted_at_capacity() {
        let cache: ResultCache<u32> = ResultCache::new(Duration::from_secs(60), 2);
        let a = make_candles(10, 1.0);
        let b = make_candles(11, 1.0);
        let c = make_candles(12, 1.0);

        cache.set("quad", &a, 1);
        std::thread::sleep(Duration::from_millis(2));
        cache.set("quad", &b, 2);
        std::thread::sleep(Duration::from_millis(2));
        cache.set("quad", &c, 3);

        assert_eq!(cache.len(), 2);
        assert!(cache.get("quad", &a).is_none());
        assert_eq!(cache.get("quad", &b), Some(2));
        assert_eq!(cache.get("quad", &c), Some(3));
    }

    #[test]
    fn invalidate_by_prefix_or_everything() {
        let cache = cache();
        let window = make_candles(10, 1.0);
        cache.set("quad:BTC", &window, "btc".to_string());
        cache.set("quad:ETH", &window, "eth".to_string());
        cache.set("stoch:BTC", &window, "stoch".to_string());

        assert_eq!(cache.invalidate(Some("quad:")), 2);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.invalidate(None), 1);
        assert!(cache.is_empty());
    }

    #[test]
    fn tiny_windows_still_hash() {
        assert_eq!(window_hash(&[]), "0-none-none");
        let one = make_candles(1, 1.0);
        assert_eq!(window_hash(&one), "1-1700000000-none");
    }
}
