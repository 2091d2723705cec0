use std::sync::Arc;

use crate::business_logic::config::{ExitPolicy, SignalConfig};
use crate::models::signal::{SignalEvent, SignalStatus, SignalType, TradeSignal};

/// Exit behaviour applied while advancing a signal.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExitRules {
    pub policy: ExitPolicy,
    /// Trailing distance in multiples of initial risk; 0 disables trailing
    pub trailing_stop_multiple: f64,
}

impl ExitRules {
    pub fn from_config(config: &SignalConfig) -> Self {
        Self {
            policy: config.exit_policy,
            trailing_stop_multiple: config.trailing_stop_multiple,
        }
    }

    /// Next state of `signal` given the latest price. Pure: the input is not
    /// touched and terminal signals come back unchanged.
    pub fn advance(
        &self,
        signal: &TradeSignal,
        price: f64,
        now: i64,
    ) -> (TradeSignal, Option<SignalEvent>) {
        let mut next = signal.clone();
        if signal.status.is_terminal() || !price.is_finite() {
            return (next, None);
        }

        match signal.status {
            SignalStatus::Pending => {
                if now > signal.valid_until {
                    next.status = SignalStatus::Expired;
                    next.closed_at = Some(now);
                } else if signal.entry_zone.contains(price) {
                    next.status = SignalStatus::Active;
                    next.entry_price = Some(price);
                    next.activated_at = Some(now);
                }
            }
            _ => self.manage_position(&mut next, price, now),
        }

        let event = (next.status != signal.status).then(|| SignalEvent {
            signal_id: next.id.clone(),
            symbol: next.symbol.clone(),
            from: signal.status,
            to: next.status,
            price,
            time: now,
        });
        (next, event)
    }

    fn manage_position(&self, signal: &mut TradeSignal, price: f64, now: i64) {
        let direction = signal.signal_type;

        if direction.crossed_against(price, signal.effective_stop()) {
            // Stopping out after a partial exit still books the tiers already taken
            let status = if signal.targets_hit == 0 {
                SignalStatus::Stopped
            } else {
                SignalStatus::target_hit(signal.targets_hit)
            };
            close(signal, status, price, now);
            return;
        }

        let mut reached = signal.targets_hit;
        while reached < signal.targets.len() && direction.reached(price, signal.targets[reached].price)
        {
            reached += 1;
        }

        if reached > signal.targets_hit {
            let final_tier = reached == signal.targets.len();
            if final_tier || self.policy == ExitPolicy::CloseAtFirstTarget {
                signal.targets_hit = reached;
                close(signal, SignalStatus::target_hit(reached), price, now);
                return;
            }

            let exited: f64 = signal.targets[signal.targets_hit..reached]
                .iter()
                .map(|target| target.exit_percentage)
                .sum();
            signal.remaining_position_pct = (signal.remaining_position_pct - exited).max(0.0);
            signal.targets_hit = reached;
            signal.status = SignalStatus::Partial;
        }

        if signal.targets_hit > 0 && self.trailing_stop_multiple > 0.0 {
            let distance = signal.risk() * self.trailing_stop_multiple;
            let candidate = price - direction.sign() * distance;
            signal.stop_loss.trailing = Some(match (signal.stop_loss.trailing, direction) {
                (Some(current), SignalType::Long) => current.max(candidate),
                (Some(current), SignalType::Short) => current.min(candidate),
                (None, _) => candidate,
            });
        }
    }
}

fn close(signal: &mut TradeSignal, status: SignalStatus, price: f64, now: i64) {
    signal.status = status;
    signal.exit_price = Some(price);
    signal.closed_at = Some(now);
    signal.remaining_position_pct = 0.0;
}

/// Owns every tracked signal and is the only writer of `status`.
///
/// The list sits behind an `Arc` and is replaced copy-on-write, so a
/// snapshot handed to a reader is never disturbed by later updates or
/// history eviction.
#[derive(Debug, Clone)]
pub struct SignalLifecycleManager {
    signals: Arc<Vec<TradeSignal>>,
    rules: ExitRules,
    max_history: usize,
}

impl SignalLifecycleManager {
    pub fn new(config: &SignalConfig) -> Self {
        Self {
            signals: Arc::new(Vec::new()),
            rules: ExitRules::from_config(config),
            max_history: config.max_history,
        }
    }

    /// Pick up exit rules and the history cap from a new config snapshot.
    pub fn apply_config(&mut self, config: &SignalConfig) {
        self.rules = ExitRules::from_config(config);
        self.max_history = config.max_history;
        self.evict();
    }

    /// Track a freshly built signal. A pending signal for the same symbol is
    /// replaced; a signal whose id is already tracked is ignored.
    /// Returns whether the signal was stored.
    pub fn register(&mut self, signal: TradeSignal) -> bool {
        if self.signals.iter().any(|s| s.id == signal.id) {
            tracing::debug!("{}: signal {} already tracked", signal.symbol, signal.id);
            return false;
        }

        let replaced = self.pending_for(&signal.symbol).map(|s| s.id.clone());
        let signals = Arc::make_mut(&mut self.signals);
        if let Some(replaced) = replaced {
            signals.retain(|s| s.id != replaced);
            tracing::info!(
                "{}: pending {} replaced by {}",
                signal.symbol,
                replaced,
                signal.id
            );
        } else {
            tracing::info!(
                "{}: new {:?} {:?} signal {}",
                signal.symbol,
                signal.strength,
                signal.signal_type,
                signal.id
            );
        }
        signals.push(signal);
        self.evict();
        true
    }

    /// Advance every open signal for `symbol` with the latest price.
    pub fn update(&mut self, symbol: &str, price: f64, now: i64) -> Vec<SignalEvent> {
        let touched = self
            .signals
            .iter()
            .any(|s| s.symbol == symbol && s.status.is_open());
        if !touched {
            return Vec::new();
        }

        let rules = self.rules;
        let mut events = Vec::new();
        for signal in Arc::make_mut(&mut self.signals)
            .iter_mut()
            .filter(|s| s.symbol == symbol && s.status.is_open())
        {
            let (next, event) = rules.advance(signal, price, now);
            *signal = next;
            if let Some(event) = event {
                tracing::info!(
                    "{}: {} {:?} -> {:?} at {}",
                    event.symbol,
                    event.signal_id,
                    event.from,
                    event.to,
                    event.price
                );
                events.push(event);
            }
        }
        self.evict();
        events
    }

    pub fn snapshot(&self) -> Arc<Vec<TradeSignal>> {
        Arc::clone(&self.signals)
    }

    pub fn get(&self, id: &str) -> Option<&TradeSignal> {
        self.signals.iter().find(|s| s.id == id)
    }

    pub fn pending_for(&self, symbol: &str) -> Option<&TradeSignal> {
        self.signals
            .iter()
            .find(|s| s.symbol == symbol && s.status == SignalStatus::Pending)
    }

    pub fn open_signals(&self) -> Vec<&TradeSignal> {
        self.signals.iter().filter(|s| s.status.is_open()).collect()
    }

    pub fn tracked_count(&self) -> usize {
        self.signals.len()
    }

    /// Drop the oldest closed signals beyond the cap. Open signals are never
    /// evicted, so the list can exceed the cap while they are all open.
    fn evict(&mut self) {
        while self.signals.len() > self.max_history {
            let Some(index) = self.signals.iter().position(|s| s.status.is_terminal()) else {
                break;
            };
            let evicted = Arc::make_mut(&mut self.signals).remove(index);
            tracing::debug!("{}: evicted {} from history", evicted.symbol, evicted.id);
        }
    }
}
