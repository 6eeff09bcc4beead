//! Central shared state with a last-write-wins mutation contract.
//!
//! [`Store`] is a cheap cloneable handle. Every setter replaces one field
//! wholesale and then notifies subscribers synchronously, before returning.
//! The store performs no arbitration between writers: components that race on
//! a field decide whether to write at all (see [`crate::sequence`]).
//!
//! Listeners run after the state lock is released, so they may read the store
//! or call setters themselves.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::ledger::{EvaluationLedger, EvaluationRecord};
use crate::model::{DropTestVideo, EvolutionParams, GenerationResult, PreviewImage, Vehicle};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    Vehicle,
    Params,
    Run,
    Preview,
    Evaluations,
    Evaluation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Change {
    pub field: Field,
    pub revision: u64,
}

// ═══════════════════════════════════════════════════════════════════════════
// Field types
// ═══════════════════════════════════════════════════════════════════════════

/// Lifecycle of a streamed run.
///
/// `Completed`, `Aborted` and `Failed` are terminal and idle-equivalent: a new
/// run may start from any of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunPhase {
    #[default]
    Idle,
    Starting,
    Streaming,
    Completed,
    Aborted,
    Failed,
}

impl RunPhase {
    pub fn is_active(self) -> bool {
        matches!(self, RunPhase::Starting | RunPhase::Streaming)
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RunPhase::Completed | RunPhase::Aborted | RunPhase::Failed
        )
    }

    pub fn label(self) -> &'static str {
        match self {
            RunPhase::Idle => "idle",
            RunPhase::Starting => "starting",
            RunPhase::Streaming => "streaming",
            RunPhase::Completed => "completed",
            RunPhase::Aborted => "aborted",
            RunPhase::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RunProgress {
    pub completed: usize,
    pub total: usize,
}

impl RunProgress {
    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        (self.completed as f64 / self.total as f64).min(1.0)
    }
}

/// The currently or most recently active run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunState {
    pub run_id: u64,
    pub phase: RunPhase,
    pub active: bool,
    pub total_generations: usize,
    pub generations: Vec<GenerationResult>,
    pub error: Option<String>,
}

impl RunState {
    pub fn latest(&self) -> Option<&GenerationResult> {
        self.generations.last()
    }

    /// Generation with the highest best-fitness; earliest wins ties.
    pub fn best(&self) -> Option<&GenerationResult> {
        self.generations
            .iter()
            .filter(|g| !g.best_fitness.is_nan())
            .fold(None, |best: Option<&GenerationResult>, g| match best {
                Some(b) if g.best_fitness <= b.best_fitness => Some(b),
                _ => Some(g),
            })
    }

    pub fn progress(&self) -> RunProgress {
        RunProgress {
            completed: self.generations.len(),
            total: self.total_generations,
        }
    }
}

/// Preview render of the current vehicle.
///
/// The previous image stays visible while a new one loads. `input` is the
/// vehicle of the most recent request so a failed fetch can be retried as-is.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PreviewState {
    pub image: Option<PreviewImage>,
    pub loading: bool,
    pub error: Option<String>,
    pub input: Option<Vehicle>,
}

impl PreviewState {
    pub fn retry_input(&self) -> Option<&Vehicle> {
        match self.error {
            Some(_) => self.input.as_ref(),
            None => None,
        }
    }
}

/// Status of manual evaluation actions (fitness, drop test, video).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EvaluationStatus {
    pub busy: bool,
    pub last_error: Option<String>,
    pub scene: Option<String>,
    pub video: Option<DropTestVideo>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StoreSnapshot {
    pub vehicle: Vehicle,
    pub params: EvolutionParams,
    pub run: RunState,
    pub preview: PreviewState,
    pub evaluations: EvaluationLedger,
    pub evaluation: EvaluationStatus,
    pub revision: u64,
}

// ═══════════════════════════════════════════════════════════════════════════
// Store
// ═══════════════════════════════════════════════════════════════════════════

type Listener = Arc<dyn Fn(&Store, Change) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Inner {
    state: Mutex<StoreSnapshot>,
    listeners: Mutex<Vec<(SubscriptionId, Listener)>>,
    next_listener: AtomicU64,
}

#[derive(Clone)]
pub struct Store {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("revision", &self.revision())
            .finish_non_exhaustive()
    }
}

impl Default for Store {
    fn default() -> Self {
        Self::new(Vehicle::default(), EvolutionParams::default())
    }
}

impl Store {
    pub fn new(vehicle: Vehicle, params: EvolutionParams) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(StoreSnapshot {
                    vehicle,
                    params,
                    ..StoreSnapshot::default()
                }),
                listeners: Mutex::new(Vec::new()),
                next_listener: AtomicU64::new(1),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, StoreSnapshot> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Apply `mutate` under the lock, bump the revision, then notify.
    fn mutate<R>(&self, field: Field, mutate: impl FnOnce(&mut StoreSnapshot) -> R) -> R {
        let (out, change) = {
            let mut s = self.state();
            let out = mutate(&mut s);
            s.revision += 1;
            (
                out,
                Change {
                    field,
                    revision: s.revision,
                },
            )
        };
        self.notify(change);
        out
    }

    fn notify(&self, change: Change) {
        let listeners: Vec<Listener> = self
            .inner
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect();
        for listener in listeners {
            listener(self, change);
        }
    }

    pub fn subscribe(&self, listener: impl Fn(&Store, Change) + Send + Sync + 'static) -> SubscriptionId {
        let id = SubscriptionId(self.inner.next_listener.fetch_add(1, Ordering::Relaxed));
        self.inner
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, Arc::new(listener)));
        id
    }

    /// Returns false when `id` was not subscribed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut listeners = self
            .inner
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let before = listeners.len();
        listeners.retain(|(lid, _)| *lid != id);
        listeners.len() != before
    }

    // ── reads ───────────────────────────────────────────────────────────────

    pub fn revision(&self) -> u64 {
        self.state().revision
    }

    pub fn snapshot(&self) -> StoreSnapshot {
        self.state().clone()
    }

    pub fn vehicle(&self) -> Vehicle {
        self.state().vehicle.clone()
    }

    pub fn params(&self) -> EvolutionParams {
        self.state().params
    }

    pub fn run(&self) -> RunState {
        self.state().run.clone()
    }

    pub fn run_active(&self) -> bool {
        self.state().run.active
    }

    pub fn run_phase(&self) -> RunPhase {
        self.state().run.phase
    }

    pub fn preview(&self) -> PreviewState {
        self.state().preview.clone()
    }

    pub fn evaluation(&self) -> EvaluationStatus {
        self.state().evaluation.clone()
    }

    /// Derived ledger queries without cloning the whole ledger.
    pub fn with_evaluations<R>(&self, read: impl FnOnce(&EvaluationLedger) -> R) -> R {
        read(&self.state().evaluations)
    }

    // ── writes ──────────────────────────────────────────────────────────────

    pub fn set_vehicle(&self, vehicle: Vehicle) {
        self.mutate(Field::Vehicle, |s| s.vehicle = vehicle);
    }

    pub fn set_params(&self, params: EvolutionParams) {
        self.mutate(Field::Params, |s| s.params = params);
    }

    /// Discard the previous run and mark a new one active, as one mutation.
    pub fn begin_run(&self, run_id: u64, total_generations: usize) {
        self.mutate(Field::Run, |s| {
            s.run = RunState {
                run_id,
                phase: RunPhase::Starting,
                active: true,
                total_generations,
                generations: Vec::new(),
                error: None,
            }
        });
    }

    pub fn set_run_phase(&self, phase: RunPhase) {
        self.mutate(Field::Run, |s| s.run.phase = phase);
    }

    pub fn push_generation(&self, generation: GenerationResult) {
        self.mutate(Field::Run, |s| s.run.generations.push(generation));
    }

    /// Enter a terminal phase: clears the active flag, keeps the generations.
    pub fn finish_run(&self, phase: RunPhase, error: Option<String>) {
        debug_assert!(phase.is_terminal());
        self.mutate(Field::Run, |s| {
            s.run.phase = phase;
            s.run.active = false;
            s.run.error = error;
        });
    }

    pub fn set_preview(&self, preview: PreviewState) {
        self.mutate(Field::Preview, |s| s.preview = preview);
    }

    pub fn append_evaluation(&self, record: EvaluationRecord) {
        self.mutate(Field::Evaluations, |s| s.evaluations.append(record));
    }

    pub fn clear_evaluations(&self) {
        self.mutate(Field::Evaluations, |s| s.evaluations.clear());
    }

    pub fn set_evaluation(&self, status: EvaluationStatus) {
        self.mutate(Field::Evaluation, |s| s.evaluation = status);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn generation(n: u32, best: f64) -> GenerationResult {
        GenerationResult {
            generation: n,
            best_fitness: best,
            avg_fitness: best / 2.0,
            best_vehicle: Vehicle::default(),
            population_fitness: vec![best],
        }
    }

    #[test]
    fn setters_notify_synchronously_in_order() {
        let store = Store::default();
        let seen: Arc<Mutex<Vec<Change>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        store.subscribe(move |_, change| sink.lock().unwrap().push(change));

        store.set_params(EvolutionParams {
            population_size: 10,
            ..EvolutionParams::default()
        });
        assert_eq!(seen.lock().unwrap().len(), 1);
        store.set_vehicle(Vehicle {
            pilot: true,
            ..Vehicle::default()
        });

        let seen = seen.lock().unwrap();
        assert_eq!(
            seen.iter().map(|c| c.field).collect::<Vec<_>>(),
            vec![Field::Params, Field::Vehicle]
        );
        assert_eq!(seen[1].revision, 2);
        assert_eq!(store.params().population_size, 10);
        assert!(store.vehicle().pilot);
    }

    #[test]
    fn listener_sees_new_value_and_may_reenter() {
        let store = Store::default();
        let observed = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&observed);
        store.subscribe(move |s, change| {
            if change.field == Field::Run {
                *sink.lock().unwrap() = Some(s.run_active());
                if s.run_phase() == RunPhase::Starting {
                    s.set_run_phase(RunPhase::Streaming);
                }
            }
        });
        store.begin_run(1, 2);
        assert_eq!(*observed.lock().unwrap(), Some(true));
        assert_eq!(store.run_phase(), RunPhase::Streaming);
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let store = Store::default();
        let count = Arc::new(AtomicU64::new(0));
        let c = Arc::clone(&count);
        let id = store.subscribe(move |_, _| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        store.clear_evaluations();
        assert!(store.unsubscribe(id));
        assert!(!store.unsubscribe(id));
        store.clear_evaluations();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn begin_run_discards_previous_generations_atomically() {
        let store = Store::default();
        store.begin_run(1, 3);
        store.push_generation(generation(0, 1.0));
        store.push_generation(generation(1, 3.0));
        store.push_generation(generation(2, 2.0));
        store.finish_run(RunPhase::Completed, None);

        let run = store.run();
        assert!(!run.active);
        assert_eq!(run.best().unwrap().generation, 1);
        assert_eq!(run.progress().fraction(), 1.0);

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        store.subscribe(move |s, _| {
            let r = s.run();
            sink.lock().unwrap().push((r.active, r.generations.len()));
        });
        store.begin_run(2, 5);
        assert_eq!(*seen.lock().unwrap(), vec![(true, 0)]);
        assert_eq!(store.run().run_id, 2);
    }

    #[test]
    fn finish_run_keeps_partial_results_and_error() {
        let store = Store::default();
        store.begin_run(7, 10);
        store.push_generation(generation(0, 1.0));
        store.finish_run(RunPhase::Failed, Some("boom".to_string()));
        let run = store.run();
        assert_eq!(run.phase, RunPhase::Failed);
        assert!(!run.phase.is_active());
        assert_eq!(run.generations.len(), 1);
        assert_eq!(run.error.as_deref(), Some("boom"));
        assert_eq!(run.progress().completed, 1);
    }

    #[test]
    fn ledger_queries_through_store() {
        let store = Store::default();
        for s in [2.0, 9.0, 4.0] {
            store.append_evaluation(EvaluationRecord::new(Vehicle::default(), s));
        }
        assert_eq!(store.with_evaluations(|l| l.best().map(|r| r.score)), Some(9.0));
        store.clear_evaluations();
        assert!(store.with_evaluations(EvaluationLedger::is_empty));
    }

    #[test]
    fn preview_retry_input_only_after_failure() {
        let v = Vehicle {
            mass_kg: Some(3.0),
            ..Vehicle::default()
        };
        let mut p = PreviewState {
            loading: true,
            input: Some(v.clone()),
            ..PreviewState::default()
        };
        assert!(p.retry_input().is_none());
        p.loading = false;
        p.error = Some("HTTP 500".to_string());
        assert_eq!(p.retry_input(), Some(&v));
    }
}
