//! One-shot evaluation actions: random vehicles, fitness, drop tests.
//!
//! Actions of the same kind may overlap. Each single-valued result (the
//! vehicle, the scene, the video) is written only by the latest-issued request
//! of its kind. Fitness scores are history and always land in the ledger.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use glider::ledger::EvaluationRecord;
use glider::model::{DropTestVideo, Vehicle};
use glider::sequence::{RequestSequencer, Ticket};
use glider::store::{EvaluationStatus, Store};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::ClientResult;
use crate::service::{cancellable, RemoteService};

/// A fitness evaluation as appended to the ledger.
#[derive(Debug, Clone, PartialEq)]
pub struct FitnessOutcome {
    pub record: EvaluationRecord,
    /// Scored above every earlier record.
    pub improved: bool,
}

pub struct Evaluator {
    service: Arc<dyn RemoteService>,
    store: Store,
    random: RequestSequencer,
    scene: RequestSequencer,
    video: RequestSequencer,
    // Requests in flight; also the gate for ticket check plus write.
    active: Mutex<usize>,
    cancel: Mutex<CancellationToken>,
}

impl Evaluator {
    pub fn new(service: Arc<dyn RemoteService>, store: Store) -> Self {
        Self {
            service,
            store,
            random: RequestSequencer::new(),
            scene: RequestSequencer::new(),
            video: RequestSequencer::new(),
            active: Mutex::new(0),
            cancel: Mutex::new(CancellationToken::new()),
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Fetch a random vehicle and make it the current one.
    ///
    /// `Ok(None)` means a newer request superseded this one.
    pub async fn generate_random(&self) -> ClientResult<Option<Vehicle>> {
        self.tracked(
            Some(&self.random),
            "random vehicle",
            self.service.random_vehicle(),
            |store, _, vehicle, current| {
                if !current {
                    return None;
                }
                info!(has_geometry = vehicle.has_geometry(), "Random vehicle generated");
                store.set_vehicle(vehicle.clone());
                Some(vehicle)
            },
        )
        .await
    }

    /// Score the current vehicle and append the result to the ledger.
    pub async fn evaluate_fitness(&self) -> ClientResult<FitnessOutcome> {
        let vehicle = self.store.vehicle();
        self.tracked(None, "fitness", self.service.fitness(&vehicle), |store, _, score, _| {
            append_record(store, vehicle.clone(), score)
        })
        .await
    }

    /// Fetch the drop-test scene description for the current vehicle.
    pub async fn drop_test_scene(&self) -> ClientResult<Option<String>> {
        let vehicle = self.store.vehicle();
        self.tracked(
            Some(&self.scene),
            "drop test scene",
            self.service.drop_test_scene(&vehicle),
            |_, status, scene, current| {
                current.then(|| {
                    status.scene = Some(scene.clone());
                    scene
                })
            },
        )
        .await
    }

    /// Render drop-test videos; their fitness is appended to the ledger.
    pub async fn drop_test_video(&self) -> ClientResult<Option<(DropTestVideo, FitnessOutcome)>> {
        let vehicle = self.store.vehicle();
        self.tracked(
            Some(&self.video),
            "drop test video",
            self.service.drop_test_video(&vehicle),
            |store, status, video, current| {
                if !current {
                    return None;
                }
                let outcome = append_record(store, vehicle.clone(), video.fitness);
                status.video = Some(video.clone());
                Some((video, outcome))
            },
        )
        .await
    }

    pub fn clear_evaluations(&self) {
        info!("Clearing evaluation history");
        self.store.clear_evaluations();
    }

    /// Cancel every request in flight. Cancelled requests never record an error.
    pub fn cancel_all(&self) {
        let mut cancel = self.cancel.lock().unwrap_or_else(PoisonError::into_inner);
        cancel.cancel();
        *cancel = CancellationToken::new();
    }

    /// Run `request` under the cancel token. `apply` gets the value and
    /// whether its ticket is still current, under the gate.
    async fn tracked<T, R>(
        &self,
        sequencer: Option<&RequestSequencer>,
        label: &'static str,
        request: impl Future<Output = ClientResult<T>>,
        apply: impl FnOnce(&Store, &mut EvaluationStatus, T, bool) -> R,
    ) -> ClientResult<R> {
        let (ticket, token, in_flight) = self.begin(sequencer);
        debug!(label, "Evaluation request issued");
        let result = cancellable(&token, request).await;

        let active = in_flight.settle();
        let current = match (sequencer, ticket) {
            (Some(sequencer), Some(ticket)) => sequencer.is_current(ticket),
            _ => true,
        };
        let mut status = self.store.evaluation();
        status.busy = *active > 0;

        let out = match result {
            Ok(value) => {
                if !current {
                    debug!(label, "Discarding stale response");
                }
                Ok(apply(&self.store, &mut status, value, current))
            }
            Err(e) if e.is_cancelled() => {
                info!(label, "Evaluation cancelled");
                Err(e)
            }
            Err(e) => {
                if current {
                    warn!("{} failed: {}", label, e);
                    status.last_error = Some(format!("{}: {}", label, e));
                }
                Err(e)
            }
        };
        self.store.set_evaluation(status);
        out
    }

    fn begin(&self, sequencer: Option<&RequestSequencer>) -> (Option<Ticket>, CancellationToken, InFlight<'_>) {
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        *active += 1;
        let ticket = sequencer.map(RequestSequencer::issue);
        self.store.set_evaluation(EvaluationStatus {
            busy: true,
            last_error: None,
            ..self.store.evaluation()
        });
        let token = self
            .cancel
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .child_token();
        (
            ticket,
            token,
            InFlight {
                evaluator: self,
                settled: false,
            },
        )
    }
}

/// One request counted in `active`. Dropping it unsettled, because the
/// caller dropped the request future, still takes it out of the count.
struct InFlight<'a> {
    evaluator: &'a Evaluator,
    settled: bool,
}

impl<'a> InFlight<'a> {
    /// Leave the count and hold the gate for the write that follows.
    fn settle(mut self) -> MutexGuard<'a, usize> {
        self.settled = true;
        let evaluator = self.evaluator;
        let mut active = evaluator.active.lock().unwrap_or_else(PoisonError::into_inner);
        *active -= 1;
        active
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        let mut active = self
            .evaluator
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *active -= 1;
        debug!("Evaluation request dropped before completing");
        let store = &self.evaluator.store;
        store.set_evaluation(EvaluationStatus {
            busy: *active > 0,
            ..store.evaluation()
        });
    }
}

fn append_record(store: &Store, vehicle: Vehicle, score: f64) -> FitnessOutcome {
    let record = EvaluationRecord::new(vehicle, score);
    store.append_evaluation(record.clone());
    let improved = store.with_evaluations(|ledger| ledger.latest_is_improvement());
    info!(score, improved, "Evaluation recorded");
    FitnessOutcome { record, improved }
}
