use std::sync::Arc;

use tokio::sync::{broadcast, RwLock};

use crate::models::api::SignalSnapshot;
use crate::models::signal::{SignalEvent, TradeSignal};

#[derive(Debug)]
pub struct SignalStateInner {
    pub signals: RwLock<Vec<TradeSignal>>,
    pub broadcaster: broadcast::Sender<SignalSnapshot>,
}

pub type SharedSignalState = Arc<SignalStateInner>;

impl SignalStateInner {
    pub fn new(capacity: usize) -> SharedSignalState {
        let (broadcaster, _receiver) = broadcast::channel(capacity.max(1));
        Arc::new(Self {
            signals: RwLock::new(Vec::new()),
            broadcaster,
        })
    }

    /// Store the tracked signals and push a snapshot to stream subscribers.
    pub async fn publish(&self, signals: Vec<TradeSignal>, events: Vec<SignalEvent>) {
        let snapshot = SignalSnapshot {
            as_of_ms: chrono::Utc::now().timestamp_millis() as u64,
            signals: signals.clone(),
            events,
        };

        let mut state = self.signals.write().await;
        *state = signals;
        drop(state);
        // No subscribers is fine
        let _ = self.broadcaster.send(snapshot);
    }

    pub async fn current(&self) -> SignalSnapshot {
        SignalSnapshot {
            as_of_ms: chrono::Utc::now().timestamp_millis() as u64,
            signals: self.signals.read().await.clone(),
            events: Vec::new(),
        }
    }
}
