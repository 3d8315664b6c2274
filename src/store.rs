//! Observable patient store.
//!
//! `PatientStore` is the single source of truth for patient data in a UI
//! process. It is constructed with an injected [`PatientService`], shared via
//! `Arc`, and dropped with its owner; there is no global instance.
//!
//! Every mutation of [`StoreState`] is followed by a notification to all
//! subscribers. Callbacks run after the state lock has been released, so a
//! callback may read the store.
//!
//! Service failures never propagate to the caller: the operation records the
//! message in `error`, settles its share of `loading`, and returns.
//!
//! `loading` is true while the latest fetch or any add/update/delete is
//! outstanding. A superseded fetch no longer counts.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{
    Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak,
};

use serde::Serialize;
use uuid::Uuid;

use crate::config::StoreConfig;
use crate::models::{NewPatient, Patient, PatientUpdate};
use crate::remote::{PatientService, RestPatientService, ServiceError};

/// Shown when a failure carries no message of its own.
const FALLBACK_ERROR: &str = "Remote operation failed";

// ═══════════════════════════════════════════════════════════
// StoreState
// ═══════════════════════════════════════════════════════════

/// What UI consumers read. Only the store mutates it.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StoreState {
    pub patients: Vec<Patient>,
    pub selected_patient: Option<Patient>,
    pub loading: bool,
    pub error: Option<String>,
}

// ═══════════════════════════════════════════════════════════
// Subscriptions
// ═══════════════════════════════════════════════════════════

type Callback = Arc<dyn Fn() + Send + Sync>;

/// One registry per store, in registration order.
#[derive(Default)]
struct SubscriberRegistry {
    callbacks: Mutex<Vec<(Uuid, Callback)>>,
}

impl SubscriberRegistry {
    fn lock(&self) -> MutexGuard<'_, Vec<(Uuid, Callback)>> {
        self.callbacks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn add(&self, callback: Callback) -> Uuid {
        let id = Uuid::new_v4();
        self.lock().push((id, callback));
        id
    }

    fn remove(&self, id: Uuid) {
        self.lock().retain(|(existing, _)| *existing != id);
    }

    fn len(&self) -> usize {
        self.lock().len()
    }

    /// Clone the callbacks out so none runs while the registry is locked.
    fn snapshot(&self) -> Vec<Callback> {
        self.lock().iter().map(|(_, cb)| Arc::clone(cb)).collect()
    }
}

/// Handle returned by [`PatientStore::subscribe`].
///
/// Dropping the handle unregisters its callback; no other subscriber is
/// affected. Outliving the store is harmless.
#[must_use = "dropping a Subscription unregisters its callback"]
pub struct Subscription {
    id: Uuid,
    registry: Weak<SubscriberRegistry>,
}

impl Subscription {
    /// Identifier of the registered callback.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Unregister now. Equivalent to dropping the handle.
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.remove(self.id);
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

// ═══════════════════════════════════════════════════════════
// PatientStore
// ═══════════════════════════════════════════════════════════

/// Which in-flight request an outcome belongs to.
#[derive(Debug, Clone, Copy)]
enum Work {
    Fetch(u64),
    Mutation,
}

pub struct PatientStore {
    service: Arc<dyn PatientService>,
    state: RwLock<StoreState>,
    subscribers: Arc<SubscriberRegistry>,
    // The three counters below are only changed under the state write lock.
    /// Bumped by every fetch; only the latest fetch may publish its result.
    fetch_generation: AtomicU64,
    /// The latest fetch has not settled yet.
    fetch_pending: AtomicBool,
    /// Adds, updates and deletes awaiting the service.
    mutations_in_flight: AtomicUsize,
}

impl PatientStore {
    /// Create an empty store backed by `service`.
    pub fn new(service: Arc<dyn PatientService>) -> Self {
        Self {
            service,
            state: RwLock::new(StoreState::default()),
            subscribers: Arc::new(SubscriberRegistry::default()),
            fetch_generation: AtomicU64::new(0),
            fetch_pending: AtomicBool::new(false),
            mutations_in_flight: AtomicUsize::new(0),
        }
    }

    /// Create a store talking to the REST service described by `config`.
    pub fn connect(config: &StoreConfig) -> Result<Self, ServiceError> {
        let service = RestPatientService::from_config(config)?;
        tracing::info!(base_url = %service.base_url(), "Patient store connected");
        Ok(Self::new(Arc::new(service)))
    }

    // ── Reads ───────────────────────────────────────────────

    /// Copy of the whole state.
    pub fn snapshot(&self) -> StoreState {
        self.read().clone()
    }

    /// Patients in list order, newest first.
    pub fn patients(&self) -> Vec<Patient> {
        self.read().patients.clone()
    }

    /// Patient with `id`, if it is in the list.
    pub fn patient(&self, id: i64) -> Option<Patient> {
        self.read().patients.iter().find(|p| p.id == id).cloned()
    }

    /// Currently selected patient.
    pub fn selected_patient(&self) -> Option<Patient> {
        self.read().selected_patient.clone()
    }

    /// Whether a request is still outstanding.
    pub fn is_loading(&self) -> bool {
        self.read().loading
    }

    /// Message of the last failure, if not cleared since.
    pub fn error(&self) -> Option<String> {
        self.read().error.clone()
    }

    /// Number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    // ── Subscriptions ───────────────────────────────────────

    /// Register `callback` to run after every state change.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn() + Send + Sync + 'static,
    {
        let id = self.subscribers.add(Arc::new(callback));
        Subscription {
            id,
            registry: Arc::downgrade(&self.subscribers),
        }
    }

    // ── Local mutations ─────────────────────────────────────

    /// Select a patient (or clear the selection). No I/O.
    pub fn set_selected_patient(&self, patient: Option<Patient>) {
        self.mutate(|state| state.selected_patient = patient);
    }

    /// Forget the last failure message.
    pub fn clear_error(&self) {
        self.mutate(|state| state.error = None);
    }

    // ── Remote operations ───────────────────────────────────

    /// Reload every patient from the service.
    ///
    /// Admissions are re-sorted most recent first and derived fields are
    /// recomputed, whatever order the service used. If another fetch was
    /// started while this one was in flight, this one's result (success or
    /// failure) is dropped and the newer fetch decides the state.
    pub async fn fetch_patients(&self) {
        let work = self.begin_fetch();
        let result = self.service.list_patients().await;

        let published = match result {
            Ok(mut patients) => {
                patients.iter_mut().for_each(Patient::normalize);
                let count = patients.len();
                let published = self.settle(work, |state| {
                    state.selected_patient = state
                        .selected_patient
                        .as_ref()
                        .and_then(|sel| patients.iter().find(|p| p.id == sel.id).cloned());
                    state.patients = patients;
                });
                if published {
                    tracing::info!(count, "Fetched patients");
                }
                published
            }
            Err(e) => self.fail(work, "fetch patients", e),
        };

        if !published {
            tracing::debug!(?work, "Discarding stale patient fetch");
        }
    }

    /// Validate `input`, create the patient, and put it at the head of the list.
    pub async fn add_patient(&self, input: NewPatient) {
        let input = match input.validated() {
            Ok(input) => input,
            Err(e) => return self.reject("add patient", e),
        };
        let work = self.begin_mutation();

        match self.service.create_patient(&input).await {
            Ok(mut patient) => {
                patient.normalize();
                let id = patient.id;
                self.settle(work, |state| {
                    state.patients.retain(|p| p.id != id);
                    state.patients.insert(0, patient);
                });
                tracing::debug!(id, "Patient created");
            }
            Err(e) => {
                self.fail(work, "add patient", e);
            }
        }
    }

    /// Apply a partial update and merge the returned row into the local entry.
    pub async fn update_patient(&self, id: i64, update: PatientUpdate) {
        let update = match update.validated() {
            Ok(update) => update,
            Err(e) => return self.reject("update patient", e),
        };
        let work = self.begin_mutation();

        match self.service.update_patient(id, &update).await {
            Ok(updated) => {
                self.settle(work, |state| {
                    if let Some(local) = state.patients.iter_mut().find(|p| p.id == id) {
                        local.absorb(updated);
                        if state.selected_patient.as_ref().is_some_and(|s| s.id == id) {
                            state.selected_patient = Some(local.clone());
                        }
                    }
                });
                tracing::debug!(id, "Patient updated");
            }
            Err(e) => {
                self.fail(work, "update patient", e);
            }
        }
    }

    /// Delete a patient remotely, then drop it from the list and the selection.
    pub async fn delete_patient(&self, id: i64) {
        let work = self.begin_mutation();

        match self.service.delete_patient(id).await {
            Ok(()) => {
                self.settle(work, |state| {
                    if let Some(pos) = state.patients.iter().position(|p| p.id == id) {
                        state.patients.remove(pos);
                    }
                    if state.selected_patient.as_ref().is_some_and(|s| s.id == id) {
                        state.selected_patient = None;
                    }
                });
                tracing::debug!(id, "Patient deleted");
            }
            Err(e) => {
                self.fail(work, "delete patient", e);
            }
        }
    }

    // ── Internal ────────────────────────────────────────────

    fn read(&self) -> RwLockReadGuard<'_, StoreState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, StoreState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Apply `change` under the write lock, then notify with the lock released.
    fn mutate<F: FnOnce(&mut StoreState)>(&self, change: F) {
        change(&mut self.write());
        self.notify();
    }

    fn notify(&self) {
        for callback in self.subscribers.snapshot() {
            callback();
        }
    }

    /// Call with the write lock held.
    fn busy(&self) -> bool {
        self.fetch_pending.load(Ordering::SeqCst)
            || self.mutations_in_flight.load(Ordering::SeqCst) > 0
    }

    /// Supersede any fetch in flight and raise `loading`.
    fn begin_fetch(&self) -> Work {
        let mut generation = 0;
        self.mutate(|state| {
            generation = self.fetch_generation.fetch_add(1, Ordering::SeqCst) + 1;
            self.fetch_pending.store(true, Ordering::SeqCst);
            state.loading = true;
            state.error = None;
        });
        Work::Fetch(generation)
    }

    fn begin_mutation(&self) -> Work {
        self.mutate(|state| {
            self.mutations_in_flight.fetch_add(1, Ordering::SeqCst);
            state.loading = true;
        });
        Work::Mutation
    }

    /// Close out `work`, applying `change` unless it is a superseded fetch.
    ///
    /// `loading` is recomputed from what is still outstanding. Returns whether
    /// the change was applied; nothing is notified when it was not.
    fn settle<F: FnOnce(&mut StoreState)>(&self, work: Work, change: F) -> bool {
        {
            let mut state = self.write();
            match work {
                Work::Fetch(generation) => {
                    if generation != self.fetch_generation.load(Ordering::SeqCst) {
                        return false;
                    }
                    self.fetch_pending.store(false, Ordering::SeqCst);
                }
                Work::Mutation => {
                    self.mutations_in_flight.fetch_sub(1, Ordering::SeqCst);
                }
            }
            change(&mut state);
            state.loading = self.busy();
        }
        self.notify();
        true
    }

    /// Record a request failure for `work`. Returns whether it was recorded.
    fn fail(&self, work: Work, operation: &str, err: impl std::fmt::Display) -> bool {
        let message = failure_message(err);
        let recorded = self.settle(work, |state| state.error = Some(message.clone()));
        if recorded {
            tracing::warn!(operation, error = %message, "Patient store operation failed");
        }
        recorded
    }

    /// Record input rejected before any request; `loading` is left alone.
    fn reject(&self, operation: &str, err: impl std::fmt::Display) {
        let message = failure_message(err);
        tracing::warn!(operation, error = %message, "Patient store input rejected");
        self.mutate(|state| state.error = Some(message));
    }
}

fn failure_message(err: impl std::fmt::Display) -> String {
    let message = err.to_string();
    if message.trim().is_empty() {
        FALLBACK_ERROR.to_string()
    } else {
        message
    }
}

impl std::fmt::Debug for PatientStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.read();
        f.debug_struct("PatientStore")
            .field("patients", &state.patients.len())
            .field("loading", &state.loading)
            .field("error", &state.error)
            .field("subscribers", &self.subscribers.len())
            .finish()
    }
}

// ═══════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════
