use std::collections::{HashMap, VecDeque};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::business_logic::config::MAX_WORKERS;
use crate::business_logic::pipeline;
use crate::errors::SignalError;
use crate::models::messages::{RequestEnvelope, RequestKind, WorkerRequest, WorkerResponse};

/// Stateless computation run inside a worker.
pub trait ComputeHandler: Send + Sync + 'static {
    fn handle(&self, request: WorkerRequest) -> WorkerResponse;
}

/// The signal pipeline as a worker body.
#[derive(Debug, Clone, Copy, Default)]
pub struct PipelineHandler;

impl ComputeHandler for PipelineHandler {
    fn handle(&self, request: WorkerRequest) -> WorkerResponse {
        pipeline::handle_request(request)
    }
}

/// Messages from workers back to the pool. `generation` tells a replaced
/// worker's late messages apart from its successor's.
#[derive(Debug)]
pub enum WorkerEvent {
    Ready {
        worker_id: usize,
        generation: u64,
    },
    Response {
        worker_id: usize,
        generation: u64,
        request_id: u64,
        response: WorkerResponse,
    },
    Crashed {
        worker_id: usize,
        generation: u64,
        request_id: Option<u64>,
        message: String,
    },
}

/// Starts one worker. The worker must announce `Ready` before it reads its inbox.
pub trait WorkerSpawner: Send + Sync + 'static {
    fn spawn(
        &self,
        worker_id: usize,
        generation: u64,
        inbox: mpsc::UnboundedReceiver<RequestEnvelope>,
        events: mpsc::UnboundedSender<WorkerEvent>,
    ) -> Result<(), SignalError>;
}

/// Runs each worker on its own OS thread.
pub struct ThreadSpawner<H> {
    handler: Arc<H>,
}

impl<H: ComputeHandler> ThreadSpawner<H> {
    pub fn new(handler: H) -> Self {
        Self {
            handler: Arc::new(handler),
        }
    }
}

impl<H: ComputeHandler> WorkerSpawner for ThreadSpawner<H> {
    fn spawn(
        &self,
        worker_id: usize,
        generation: u64,
        mut inbox: mpsc::UnboundedReceiver<RequestEnvelope>,
        events: mpsc::UnboundedSender<WorkerEvent>,
    ) -> Result<(), SignalError> {
        let handler = Arc::clone(&self.handler);
        std::thread::Builder::new()
            .name(format!("compute-worker-{}", worker_id))
            .spawn(move || {
                if events
                    .send(WorkerEvent::Ready {
                        worker_id,
                        generation,
                    })
                    .is_err()
                {
                    return;
                }

                while let Some(envelope) = inbox.blocking_recv() {
                    let request_id = envelope.request_id;
                    let outcome =
                        panic::catch_unwind(AssertUnwindSafe(|| handler.handle(envelope.request)));
                    let event = match outcome {
                        Ok(response) => WorkerEvent::Response {
                            worker_id,
                            generation,
                            request_id,
                            response,
                        },
                        Err(payload) => {
                            let _ = events.send(WorkerEvent::Crashed {
                                worker_id,
                                generation,
                                request_id: Some(request_id),
                                message: panic_message(payload.as_ref()),
                            });
                            // A crashed worker is retired; the pool starts a fresh one
                            return;
                        }
                    };
                    if events.send(event).is_err() {
                        return;
                    }
                }
            })
            .map(|_| ())
            .map_err(|err| {
                tracing::error!("failed to start compute worker {}: {}", worker_id, err);
                SignalError::WorkerUnavailable
            })
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "worker panicked".to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WorkerStatus {
    Starting,
    Idle,
    Busy(u64),
}

struct WorkerSlot {
    generation: u64,
    status: WorkerStatus,
    inbox: mpsc::UnboundedSender<RequestEnvelope>,
}

struct Pending {
    kind: RequestKind,
    reply: oneshot::Sender<Result<WorkerResponse, SignalError>>,
}

#[derive(Default)]
struct PoolState {
    workers: Vec<WorkerSlot>,
    pending: HashMap<u64, Pending>,
    queue: VecDeque<RequestEnvelope>,
}

struct Shared {
    state: Mutex<PoolState>,
    spawner: Box<dyn WorkerSpawner>,
    events: mpsc::UnboundedSender<WorkerEvent>,
}

impl Shared {
    /// Replace the worker in `slot` with a fresh generation.
    fn start_worker(&self, state: &mut PoolState, worker_id: usize) {
        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        let generation = state
            .workers
            .get(worker_id)
            .map(|slot| slot.generation + 1)
            .unwrap_or(0);
        let slot = WorkerSlot {
            generation,
            status: WorkerStatus::Starting,
            inbox: inbox_tx,
        };
        if worker_id < state.workers.len() {
            state.workers[worker_id] = slot;
        } else {
            state.workers.push(slot);
        }

        if let Err(err) = self
            .spawner
            .spawn(worker_id, generation, inbox_rx, self.events.clone())
        {
            tracing::error!("compute worker {} unavailable: {}", worker_id, err);
        }
    }

    /// Hand queued requests to idle workers, oldest first.
    fn dispatch(&self, state: &mut PoolState) {
        loop {
            let Some(worker_id) = state
                .workers
                .iter()
                .position(|slot| slot.status == WorkerStatus::Idle)
            else {
                return;
            };
            let Some(envelope) = state.queue.pop_front() else {
                return;
            };
            if !state.pending.contains_key(&envelope.request_id) {
                // Caller already gave up
                continue;
            }

            let request_id = envelope.request_id;
            match state.workers[worker_id].inbox.send(envelope) {
                Ok(()) => {
                    state.workers[worker_id].status = WorkerStatus::Busy(request_id);
                    tracing::debug!("request {} -> worker {}", request_id, worker_id);
                }
                Err(mpsc::error::SendError(envelope)) => {
                    tracing::warn!("compute worker {} went away, restarting", worker_id);
                    state.queue.push_front(envelope);
                    self.start_worker(state, worker_id);
                }
            }
        }
    }

    fn handle_event(&self, event: WorkerEvent) {
        let mut state = self.state.lock();
        match event {
            WorkerEvent::Ready {
                worker_id,
                generation,
            } => {
                if let Some(slot) = current_slot(&mut state, worker_id, generation) {
                    slot.status = WorkerStatus::Idle;
                    tracing::debug!("compute worker {} ready", worker_id);
                }
            }
            WorkerEvent::Response {
                worker_id,
                generation,
                request_id,
                response,
            } => {
                if let Some(slot) = current_slot(&mut state, worker_id, generation) {
                    if slot.status == WorkerStatus::Busy(request_id) {
                        slot.status = WorkerStatus::Idle;
                    }
                }
                match state.pending.remove(&request_id) {
                    Some(pending) => {
                        let _ = pending.reply.send(into_result(pending.kind, response));
                    }
                    None => {
                        tracing::debug!("dropping unmatched response for request {}", request_id);
                    }
                }
            }
            WorkerEvent::Crashed {
                worker_id,
                generation,
                request_id,
                message,
            } => {
                tracing::warn!(
                    "compute worker {} crashed on request {:?}: {}",
                    worker_id,
                    request_id,
                    message
                );
                if current_slot(&mut state, worker_id, generation).is_some() {
                    self.start_worker(&mut state, worker_id);
                }
                if let Some(request_id) = request_id {
                    if let Some(pending) = state.pending.remove(&request_id) {
                        let _ = pending
                            .reply
                            .send(Err(SignalError::WorkerCrash { request_id, message }));
                    }
                }
            }
        }
        self.dispatch(&mut state);
    }
}

fn current_slot(
    state: &mut PoolState,
    worker_id: usize,
    generation: u64,
) -> Option<&mut WorkerSlot> {
    state
        .workers
        .get_mut(worker_id)
        .filter(|slot| slot.generation == generation)
}

/// Check the reply shape at the pool boundary and unwrap `Error` replies.
fn into_result(kind: RequestKind, response: WorkerResponse) -> Result<WorkerResponse, SignalError> {
    match response {
        WorkerResponse::Error { message } => Err(SignalError::Calculation(message)),
        response if response.answers(kind) => Ok(response),
        response => Err(SignalError::Protocol(format!(
            "{} answered a {} request",
            response.kind(),
            kind.as_str()
        ))),
    }
}

/// Fixed-size pool of compute workers.
///
/// Requests are correlated to replies by id only. A request that gets no
/// reply within `timeout` fails with `WorkerTimeout` and its bookkeeping is
/// dropped; the worker keeps running and its late reply is discarded. A
/// crashed worker is replaced and its in-flight request fails with
/// `WorkerCrash`.
pub struct ComputeWorkerPool {
    shared: Arc<Shared>,
    dispatcher: JoinHandle<()>,
    next_id: AtomicU64,
    timeout: Duration,
}

impl ComputeWorkerPool {
    /// Must be called inside a tokio runtime.
    pub fn new(size: usize, timeout: Duration, spawner: impl WorkerSpawner) -> Self {
        let size = size.clamp(1, MAX_WORKERS);
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            state: Mutex::new(PoolState::default()),
            spawner: Box::new(spawner),
            events: events_tx,
        });

        {
            let mut state = shared.state.lock();
            for worker_id in 0..size {
                shared.start_worker(&mut state, worker_id);
            }
        }

        let dispatcher = tokio::spawn({
            let shared = Arc::clone(&shared);
            async move {
                while let Some(event) = events_rx.recv().await {
                    shared.handle_event(event);
                }
            }
        });

        tracing::info!(
            "compute pool started with {} workers, {}ms timeout",
            size,
            timeout.as_millis()
        );

        Self {
            shared,
            dispatcher,
            next_id: AtomicU64::new(1),
            timeout,
        }
    }

    /// Pool running the signal pipeline on OS threads.
    pub fn with_pipeline(size: usize, timeout: Duration) -> Self {
        Self::new(size, timeout, ThreadSpawner::new(PipelineHandler))
    }

    pub async fn submit(&self, request: WorkerRequest) -> Result<WorkerResponse, SignalError> {
        let request_id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let kind = request.kind();
        let (reply_tx, reply_rx) = oneshot::channel();

        {
            let mut state = self.shared.state.lock();
            state.pending.insert(
                request_id,
                Pending {
                    kind,
                    reply: reply_tx,
                },
            );
            state.queue.push_back(RequestEnvelope {
                request_id,
                request,
            });
            self.shared.dispatch(&mut state);
        }

        match tokio::time::timeout(self.timeout, reply_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(SignalError::WorkerUnavailable),
            Err(_) => {
                {
                    let mut state = self.shared.state.lock();
                    state.pending.remove(&request_id);
                    state.queue.retain(|queued| queued.request_id != request_id);
                }
                tracing::warn!(
                    "{} request {} timed out after {}ms",
                    kind.as_str(),
                    request_id,
                    self.timeout.as_millis()
                );
                Err(SignalError::WorkerTimeout {
                    request_id,
                    timeout_ms: self.timeout.as_millis() as u64,
                })
            }
        }
    }

    /// Requests awaiting a reply, queued or in flight.
    pub fn pending_count(&self) -> usize {
        self.shared.state.lock().pending.len()
    }

    pub fn queued_count(&self) -> usize {
        self.shared.state.lock().queue.len()
    }

    pub fn worker_count(&self) -> usize {
        self.shared.state.lock().workers.len()
    }

    pub fn idle_count(&self) -> usize {
        self.shared
            .state
            .lock()
            .workers
            .iter()
            .filter(|slot| slot.status == WorkerStatus::Idle)
            .count()
    }
}

impl Drop for ComputeWorkerPool {
    fn drop(&mut self) {
        self.dispatcher.abort();
    }
}
