//! Lifecycle of streamed optimisation runs.
//!
//! ```text
//! Idle -> Starting -> Streaming -> { Completed | Aborted | Failed }
//! ```
//!
//! At most one run is live. Starting a new run cancels the previous one and
//! waits for its finalisation first, so two runs never write into the same
//! generation sequence. Every run, however it ends, passes through exactly one
//! finalisation that clears the active flag.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use futures::StreamExt as _;
use glider::frame::Frame;
use glider::model::{EvolutionRequest, GenerationResult};
use glider::store::{RunPhase, Store};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::codec::decode_stream;
use crate::error::{ClientError, ClientResult};
use crate::service::RemoteService;

#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    Completed,
    /// Cancelled by the user. Not an error.
    Aborted,
    Failed(String),
}

impl RunOutcome {
    pub fn phase(&self) -> RunPhase {
        match self {
            RunOutcome::Completed => RunPhase::Completed,
            RunOutcome::Aborted => RunPhase::Aborted,
            RunOutcome::Failed(_) => RunPhase::Failed,
        }
    }
}

/// Handle to one run. Cloneable; cancelling a finished run is a no-op.
#[derive(Debug, Clone)]
pub struct RunHandle {
    run_id: u64,
    token: CancellationToken,
    done: watch::Receiver<Option<RunOutcome>>,
}

impl RunHandle {
    pub fn run_id(&self) -> u64 {
        self.run_id
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.done.borrow().is_some()
    }

    /// Wait for finalisation.
    pub async fn wait(&self) -> RunOutcome {
        let mut done = self.done.clone();
        let outcome = match done.wait_for(Option::is_some).await {
            Ok(outcome) => (*outcome).clone().unwrap_or(RunOutcome::Aborted),
            Err(_) => RunOutcome::Failed("run task ended without finalising".to_string()),
        };
        outcome
    }
}

pub struct RunController {
    service: Arc<dyn RemoteService>,
    store: Store,
    current: Mutex<Option<RunHandle>>,
    start_gate: tokio::sync::Mutex<()>,
    next_run_id: AtomicU64,
}

impl RunController {
    pub fn new(service: Arc<dyn RemoteService>, store: Store) -> Self {
        Self {
            service,
            store,
            current: Mutex::new(None),
            start_gate: tokio::sync::Mutex::new(()),
            next_run_id: AtomicU64::new(0),
        }
    }

    pub fn current(&self) -> Option<RunHandle> {
        self.current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Start a run from the store's parameters and seed vehicle.
    ///
    /// Invalid parameters fail here, before anything touches the network or
    /// the store.
    pub async fn start(&self) -> ClientResult<RunHandle> {
        let request = EvolutionRequest::new(&self.store.params(), &self.store.vehicle())?;
        self.start_with(request).await
    }

    pub async fn start_with(&self, request: EvolutionRequest) -> ClientResult<RunHandle> {
        request.validate()?;
        let _gate = self.start_gate.lock().await;

        if let Some(previous) = self.current() {
            if !previous.is_finished() {
                info!(run_id = previous.run_id, "Cancelling active run before starting a new one");
                previous.cancel();
            }
            previous.wait().await;
        }

        let run_id = self.next_run_id.fetch_add(1, Ordering::Relaxed) + 1;
        // Visible to observers before the request is even sent.
        self.store.begin_run(run_id, request.num_generations);
        info!(
            run_id,
            population_size = request.population_size,
            num_generations = request.num_generations,
            "Run starting"
        );

        let token = CancellationToken::new();
        let (tx, rx) = watch::channel(None);
        let handle = RunHandle {
            run_id,
            token: token.clone(),
            done: rx,
        };
        *self.current.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle.clone());

        let service = Arc::clone(&self.service);
        let store = self.store.clone();
        tokio::spawn(async move {
            let outcome = drive_run(service, store, run_id, request, token).await;
            let _ = tx.send(Some(outcome));
        });

        Ok(handle)
    }

    /// Request cancellation of the active run, if any.
    pub fn stop(&self) {
        if let Some(handle) = self.current() {
            if !handle.is_finished() {
                info!(run_id = handle.run_id, "Run stop requested");
            }
            handle.cancel();
        }
    }

    /// Cancel the active run and wait until it is finalised.
    pub async fn stop_and_wait(&self) -> Option<RunOutcome> {
        let handle = self.current()?;
        handle.cancel();
        Some(handle.wait().await)
    }
}

async fn drive_run(
    service: Arc<dyn RemoteService>,
    store: Store,
    run_id: u64,
    request: EvolutionRequest,
    token: CancellationToken,
) -> RunOutcome {
    let outcome = tokio::select! {
        biased;
        _ = token.cancelled() => RunOutcome::Aborted,
        result = stream_generations(service.as_ref(), &store, run_id, &request) => match result {
            Ok(()) => RunOutcome::Completed,
            Err(ClientError::Cancelled) => RunOutcome::Aborted,
            Err(e) => RunOutcome::Failed(e.to_string()),
        },
    };
    finalize(&store, run_id, &outcome);
    outcome
}

/// The single exit path of every run.
fn finalize(store: &Store, run_id: u64, outcome: &RunOutcome) {
    let received = store.run().generations.len();
    match outcome {
        RunOutcome::Completed => info!(run_id, generations = received, "Run completed"),
        RunOutcome::Aborted => info!(run_id, generations = received, "Run aborted"),
        RunOutcome::Failed(e) => error!(run_id, generations = received, "Run failed: {}", e),
    }
    let error = match outcome {
        RunOutcome::Failed(e) => Some(e.clone()),
        _ => None,
    };
    store.finish_run(outcome.phase(), error);
}

async fn stream_generations(
    service: &dyn RemoteService,
    store: &Store,
    run_id: u64,
    request: &EvolutionRequest,
) -> ClientResult<()> {
    let body = service.start_evolution(request).await?;
    store.set_run_phase(RunPhase::Streaming);
    debug!(run_id, "Response accepted, streaming generations");

    let mut frames = decode_stream::<GenerationResult>(body);
    let mut last: Option<u32> = None;
    while let Some(frame) = frames.next().await {
        match frame.map_err(|e| ClientError::Transport(e.to_string()))? {
            Frame::Record(result) => {
                let expected = last.map_or(0, |l| l + 1);
                if last.is_some_and(|l| result.generation <= l) {
                    warn!(
                        run_id,
                        generation = result.generation,
                        "Dropping out-of-order generation"
                    );
                    continue;
                }
                if result.generation != expected {
                    warn!(run_id, expected, got = result.generation, "Generation index gap");
                }
                debug!(
                    run_id,
                    generation = result.generation,
                    best_fitness = result.best_fitness,
                    "Generation received"
                );
                last = Some(result.generation);
                store.push_generation(result);
            }
            Frame::Malformed { payload, reason } => {
                warn!(run_id, bytes = payload.len(), "Dropping malformed frame: {}", reason);
            }
        }
    }
    Ok(())
}
