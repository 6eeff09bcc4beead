//! Debounced preview rendering.
//!
//! The fetcher watches the store's vehicle. Each edit restarts a quiet period;
//! only when it elapses is a render requested, for the vehicle as it was at
//! that moment. An edit also cancels any render still in flight, and every
//! request carries a [`Ticket`] so a response that lost the race is dropped
//! instead of overwriting a newer image.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use glider::model::Vehicle;
use glider::sequence::{RequestSequencer, Ticket};
use glider::store::{Field, PreviewState, Store, SubscriptionId};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::service::{cancellable, RemoteService};

pub const DEFAULT_QUIET_PERIOD: Duration = Duration::from_millis(500);

#[derive(Debug)]
enum Command {
    Edit(Vehicle),
    Retry,
}

pub struct PreviewFetcher {
    commands: mpsc::UnboundedSender<Command>,
    shutdown: CancellationToken,
    store: Store,
    subscription: Option<SubscriptionId>,
    worker: Option<JoinHandle<()>>,
}

impl PreviewFetcher {
    /// Start watching `store`. The current vehicle counts as the first edit.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(service: Arc<dyn RemoteService>, store: Store, quiet: Duration) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();

        let edits = tx.clone();
        let subscription = store.subscribe(move |store, change| {
            if change.field == Field::Vehicle {
                let _ = edits.send(Command::Edit(store.vehicle()));
            }
        });
        let _ = tx.send(Command::Edit(store.vehicle()));

        let worker = Worker {
            service,
            store: store.clone(),
            quiet,
            sequencer: Arc::new(RequestSequencer::new()),
            gate: Arc::new(Mutex::new(())),
            in_flight: None,
            last_issued: None,
            shutdown: shutdown.clone(),
        };
        let worker = tokio::spawn(worker.run(rx));

        Self {
            commands: tx,
            shutdown,
            store,
            subscription: Some(subscription),
            worker: Some(worker),
        }
    }

    /// Queue an edit without going through the store.
    pub fn edit(&self, vehicle: Vehicle) {
        let _ = self.commands.send(Command::Edit(vehicle));
    }

    /// Reissue the request that last failed, immediately.
    pub fn retry(&self) {
        let _ = self.commands.send(Command::Retry);
    }

    /// Stop watching, cancel any in-flight render and wait for the worker.
    pub async fn shutdown(mut self) {
        self.detach();
        if let Some(worker) = self.worker.take() {
            let _ = worker.await;
        }
    }

    fn detach(&mut self) {
        if let Some(id) = self.subscription.take() {
            self.store.unsubscribe(id);
        }
        self.shutdown.cancel();
    }
}

impl Drop for PreviewFetcher {
    fn drop(&mut self) {
        self.detach();
    }
}

struct Worker {
    service: Arc<dyn RemoteService>,
    store: Store,
    quiet: Duration,
    sequencer: Arc<RequestSequencer>,
    // Serialises "is my ticket current" with the write that follows it.
    gate: Arc<Mutex<()>>,
    in_flight: Option<CancellationToken>,
    last_issued: Option<Vehicle>,
    shutdown: CancellationToken,
}

impl Worker {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        let timer = time::sleep(self.quiet);
        tokio::pin!(timer);
        let mut pending: Option<Vehicle> = None;

        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                command = commands.recv() => match command {
                    None => break,
                    Some(Command::Edit(vehicle)) => {
                        if pending.is_none() && self.last_issued.as_ref() == Some(&vehicle) {
                            continue;
                        }
                        self.supersede();
                        self.forget_failure();
                        pending = Some(vehicle);
                        timer.as_mut().reset(Instant::now() + self.quiet);
                    }
                    Some(Command::Retry) => {
                        // A pending edit is newer than any failed input: render it now.
                        let target = match pending.take() {
                            Some(vehicle) => Some(vehicle),
                            None => self.store.preview().retry_input().cloned(),
                        };
                        let Some(vehicle) = target else {
                            debug!("Preview retry requested with nothing to retry");
                            continue;
                        };
                        info!("Retrying preview render");
                        self.supersede();
                        self.issue(vehicle);
                    }
                },
                _ = &mut timer, if pending.is_some() => {
                    if let Some(vehicle) = pending.take() {
                        self.issue(vehicle);
                    }
                }
            }
        }

        // In-flight renders are children of the shutdown token.
        self.shutdown.cancel();
        debug!("Preview fetcher stopped");
    }

    /// Invalidate and cancel whatever is in flight.
    fn supersede(&mut self) {
        if let Some(token) = self.in_flight.take() {
            let _gate = self.gate.lock().unwrap_or_else(PoisonError::into_inner);
            self.sequencer.issue();
            token.cancel();
        }
    }

    /// An edit makes the last failure moot; it must not be retried.
    fn forget_failure(&self) {
        let _gate = self.gate.lock().unwrap_or_else(PoisonError::into_inner);
        let previous = self.store.preview();
        if previous.error.is_some() {
            self.store.set_preview(PreviewState {
                error: None,
                input: None,
                ..previous
            });
        }
    }

    fn issue(&mut self, vehicle: Vehicle) {
        self.last_issued = Some(vehicle.clone());
        let _gate = self.gate.lock().unwrap_or_else(PoisonError::into_inner);
        let ticket = self.sequencer.issue();
        let previous = self.store.preview();

        if !vehicle.has_geometry() {
            debug!("Vehicle has no geometry, skipping preview render");
            self.store.set_preview(PreviewState {
                image: previous.image,
                loading: false,
                error: None,
                input: None,
            });
            return;
        }

        debug!(ticket = ticket.value(), "Requesting preview render");
        self.store.set_preview(PreviewState {
            image: previous.image,
            loading: true,
            error: None,
            input: Some(vehicle.clone()),
        });

        let token = self.shutdown.child_token();
        self.in_flight = Some(token.clone());
        tokio::spawn(render(
            Arc::clone(&self.service),
            self.store.clone(),
            Arc::clone(&self.sequencer),
            Arc::clone(&self.gate),
            ticket,
            token,
            vehicle,
        ));
    }
}

async fn render(
    service: Arc<dyn RemoteService>,
    store: Store,
    sequencer: Arc<RequestSequencer>,
    gate: Arc<Mutex<()>>,
    ticket: Ticket,
    token: CancellationToken,
    vehicle: Vehicle,
) {
    let result = cancellable(&token, service.render_preview(&vehicle)).await;

    let _gate = gate.lock().unwrap_or_else(PoisonError::into_inner);
    if !sequencer.is_current(ticket) {
        debug!(ticket = ticket.value(), "Discarding stale preview response");
        return;
    }
    let previous = store.preview();
    match result {
        Ok(image) => {
            debug!(ticket = ticket.value(), "Preview render applied");
            store.set_preview(PreviewState {
                image: Some(image),
                loading: false,
                error: None,
                input: Some(vehicle),
            });
        }
        Err(e) if e.is_cancelled() => {
            // Only reachable on shutdown: an edit would have superseded the ticket.
            store.set_preview(PreviewState {
                loading: false,
                ..previous
            });
        }
        Err(e) => {
            warn!("Preview render failed: {}", e);
            store.set_preview(PreviewState {
                image: previous.image,
                loading: false,
                error: Some(e.to_string()),
                input: Some(vehicle),
            });
        }
    }
}
