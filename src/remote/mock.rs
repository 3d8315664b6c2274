use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;

use super::{PatientService, ServiceError};
use crate::models::{NewPatient, Patient, PatientUpdate};

/// In-memory patient service for tests and offline use.
///
/// Rows are returned in insertion order, newest first, with admissions exactly
/// as seeded (unsorted). A failure set with [`fail_with`](Self::fail_with)
/// makes every call return `ServiceError::Rejected` until cleared.
pub struct MockPatientService {
    rows: Mutex<Vec<Patient>>,
    next_id: AtomicI64,
    failure: Mutex<Option<String>>,
    calls: AtomicUsize,
}

impl MockPatientService {
    /// Empty service; ids start at 1.
    pub fn new() -> Self {
        Self {
            rows: Mutex::new(Vec::new()),
            next_id: AtomicI64::new(1),
            failure: Mutex::new(None),
            calls: AtomicUsize::new(0),
        }
    }

    /// Seed rows; ids handed out by `create_patient` continue past the largest.
    pub fn with_patients(patients: Vec<Patient>) -> Self {
        let next = patients.iter().map(|p| p.id).max().unwrap_or(0) + 1;
        let service = Self::new();
        service.next_id.store(next, Ordering::SeqCst);
        *service.rows() = patients;
        service
    }

    /// Make every following call fail with `message`.
    pub fn fail_with(&self, message: &str) {
        *self.failure.lock().unwrap_or_else(PoisonError::into_inner) = Some(message.to_string());
    }

    /// Let calls succeed again.
    pub fn clear_failure(&self) {
        *self.failure.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// Number of requests received, failed ones included.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Current rows as the service holds them.
    pub fn stored(&self) -> Vec<Patient> {
        self.rows().clone()
    }

    fn rows(&self) -> MutexGuard<'_, Vec<Patient>> {
        self.rows.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn begin_call(&self) -> Result<(), ServiceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self
            .failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
        {
            Some(message) => Err(ServiceError::Rejected(message)),
            None => Ok(()),
        }
    }
}

impl Default for MockPatientService {
    fn default() -> Self {
        Self::new()
    }
}

/// Copy the serialized fields of `source` onto `target.details`.
fn merge_fields<T: serde::Serialize>(target: &mut Patient, source: &T) -> Result<(), ServiceError> {
    let value = serde_json::to_value(source)
        .map_err(|e| ServiceError::ResponseParsing(e.to_string()))?;
    if let Value::Object(fields) = value {
        target.details.extend(fields);
    }
    Ok(())
}

#[async_trait]
impl PatientService for MockPatientService {
    async fn list_patients(&self) -> Result<Vec<Patient>, ServiceError> {
        self.begin_call()?;
        Ok(self.stored())
    }

    async fn create_patient(&self, input: &NewPatient) -> Result<Patient, ServiceError> {
        self.begin_call()?;
        let mut patient = Patient::new(self.next_id.fetch_add(1, Ordering::SeqCst));
        patient.created_at = Some(Utc::now());
        merge_fields(&mut patient, input)?;

        self.rows().insert(0, patient.clone());
        Ok(patient)
    }

    async fn update_patient(
        &self,
        id: i64,
        update: &PatientUpdate,
    ) -> Result<Patient, ServiceError> {
        self.begin_call()?;
        let mut rows = self.rows();
        let row = rows
            .iter_mut()
            .find(|p| p.id == id)
            .ok_or(ServiceError::NotFound(id))?;
        merge_fields(row, update)?;

        // Writes echo the bare row, without embedded admissions.
        let mut echoed = row.clone();
        echoed.admissions.clear();
        Ok(echoed)
    }

    async fn delete_patient(&self, id: i64) -> Result<(), ServiceError> {
        self.begin_call()?;
        let mut rows = self.rows();
        let before = rows.len();
        rows.retain(|p| p.id != id);
        if rows.len() == before {
            return Err(ServiceError::NotFound(id));
        }
        Ok(())
    }
}
