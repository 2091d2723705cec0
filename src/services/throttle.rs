use std::collections::HashMap;
use std::future::Future;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::errors::SignalError;

/// What a merged caller hears back from the run it was folded into.
enum Handoff<T> {
    Done(Result<T, SignalError>),
    /// The caller that was due to run went away. The receiver becomes the
    /// owner of the next run and gets a fresh channel in case it is merged
    /// again.
    TakeOver(oneshot::Receiver<Handoff<T>>),
}

struct Waiter<T> {
    generation: u64,
    tx: oneshot::Sender<Handoff<T>>,
}

struct Slot<T> {
    last_started: Option<Instant>,
    /// Last generation handed out
    issued: u64,
    /// Generation that owns the next run
    newest: u64,
    /// Ordered by generation
    waiters: Vec<Waiter<T>>,
}

impl<T> Default for Slot<T> {
    fn default() -> Self {
        Self {
            last_started: None,
            issued: 0,
            newest: 0,
            waiters: Vec::new(),
        }
    }
}

/// Per-key rate limiter that coalesces instead of dropping.
///
/// A call inside `interval` of the last run for the same key is deferred to
/// the end of the window. When the window closes only the most recent
/// deferred call runs, with its own (freshest) input, and every merged
/// caller receives that result. If that caller is dropped before it answers,
/// the newest caller still waiting runs its own input instead.
pub struct Throttle<T> {
    interval: Duration,
    slots: Mutex<HashMap<String, Slot<T>>>,
}

impl<T: Clone> Throttle<T> {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            slots: Mutex::new(HashMap::new()),
        }
    }

    pub async fn run<F, Fut>(&self, key: &str, job: F) -> Result<T, SignalError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, SignalError>>,
    {
        let (generation, mut rx) = {
            let mut slots = self.slots.lock();
            let slot = slots.entry(key.to_string()).or_default();
            slot.issued += 1;
            slot.newest = slot.issued;
            let generation = slot.issued;
            let rx = match slot.last_started {
                Some(started) if Instant::now() < started + self.interval => {
                    let (tx, rx) = oneshot::channel();
                    slot.waiters.push(Waiter { generation, tx });
                    Some(rx)
                }
                _ => None,
            };
            (generation, rx)
        };

        let mut claim = Claim {
            slots: &self.slots,
            key,
            generation,
            armed: true,
            taken: Vec::new(),
        };

        while let Some(deadline) = self.window_end(key) {
            tracing::debug!("{}: calculation deferred to end of throttle window", key);
            tokio::time::sleep_until(deadline.into()).await;
            if !self.superseded(key, generation) {
                break;
            }

            let Some(receiver) = rx.take() else {
                break;
            };
            claim.armed = false;
            match receiver.await {
                Ok(Handoff::Done(result)) => return result,
                Ok(Handoff::TakeOver(next)) => {
                    tracing::debug!("{}: merged caller takes over the deferred run", key);
                    claim.armed = true;
                    rx = Some(next);
                }
                Err(_) => {
                    return Err(SignalError::Throttle(format!(
                        "merged calculation for {} was abandoned",
                        key
                    )));
                }
            }
        }

        self.run_now(&mut claim, job).await
    }

    /// End of the current window for `key`, if it is still open.
    fn window_end(&self, key: &str) -> Option<Instant> {
        let slots = self.slots.lock();
        let end = slots.get(key)?.last_started? + self.interval;
        (Instant::now() < end).then_some(end)
    }

    fn superseded(&self, key: &str, generation: u64) -> bool {
        self.slots
            .lock()
            .get(key)
            .map(|slot| slot.newest != generation)
            .unwrap_or(false)
    }

    /// Start the job now and answer every caller merged into this run.
    async fn run_now<F, Fut>(&self, claim: &mut Claim<'_, T>, job: F) -> Result<T, SignalError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, SignalError>>,
    {
        {
            let mut slots = self.slots.lock();
            let slot = slots.entry(claim.key.to_string()).or_default();
            slot.last_started = Some(Instant::now());
            claim.taken = std::mem::take(&mut slot.waiters);
        }

        let result = job().await;
        claim.armed = false;
        let waiters: Vec<Waiter<T>> = std::mem::take(&mut claim.taken)
            .into_iter()
            .filter(|waiter| waiter.generation != claim.generation)
            .collect();
        if !waiters.is_empty() {
            tracing::debug!(
                "{}: fanning result out to {} merged calls",
                claim.key,
                waiters.len()
            );
        }
        for waiter in waiters {
            let _ = waiter.tx.send(Handoff::Done(result.clone()));
        }
        result
    }
}

/// Held for the whole of one `run` call while that call is responsible for
/// answering others. Dropping it early hands the merged callers to the newest
/// one still waiting.
struct Claim<'a, T> {
    slots: &'a Mutex<HashMap<String, Slot<T>>>,
    key: &'a str,
    generation: u64,
    armed: bool,
    /// Waiters collected by a run that has not answered yet
    taken: Vec<Waiter<T>>,
}

impl<T> Drop for Claim<'_, T> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut slots = self.slots.lock();
        let Some(slot) = slots.get_mut(self.key) else {
            return;
        };

        let mut waiters = std::mem::take(&mut self.taken);
        waiters.append(&mut slot.waiters);
        waiters.retain(|waiter| waiter.generation != self.generation && !waiter.tx.is_closed());
        slot.waiters = waiters;

        // A newer caller is already due to run for everyone
        if slot.newest != self.generation {
            return;
        }
        while let Some(heir) = slot.waiters.pop() {
            let (tx, rx) = oneshot::channel();
            if heir.tx.send(Handoff::TakeOver(rx)).is_ok() {
                tracing::debug!(
                    "{}: caller {} dropped, caller {} takes over",
                    self.key,
                    self.generation,
                    heir.generation
                );
                slot.newest = heir.generation;
                slot.waiters.push(Waiter {
                    generation: heir.generation,
                    tx,
                });
                return;
            }
        }
    }
}
