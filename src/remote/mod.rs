//! The remote patient service: the request/response contract the store
//! depends on, plus a REST implementation and an in-memory mock.

pub mod mock;
pub mod rest;

use async_trait::async_trait;

use crate::models::{NewPatient, Patient, PatientUpdate};

pub use mock::MockPatientService;
pub use rest::RestPatientService;

/// Errors from the patient service. The `Display` text is what the store
/// surfaces to the UI.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Cannot connect to patient service at {0}")]
    Connection(String),
    #[error("Request timed out after {0}s")]
    Timeout(u64),
    #[error("HTTP client error: {0}")]
    HttpClient(String),
    #[error("{message}")]
    Remote { status: u16, message: String },
    #[error("No patient found with id {0}")]
    NotFound(i64),
    #[error("Failed to parse service response: {0}")]
    ResponseParsing(String),
    #[error("{0}")]
    Rejected(String),
}

/// Request/response access to patient rows.
///
/// `list_patients` returns every patient with admissions and each admission's
/// attending user joined, newest patient first. Admission order within a
/// patient is whatever the service produced; callers normalize it.
#[async_trait]
pub trait PatientService: Send + Sync {
    async fn list_patients(&self) -> Result<Vec<Patient>, ServiceError>;

    async fn create_patient(&self, input: &NewPatient) -> Result<Patient, ServiceError>;

    /// Apply a partial update and return the updated row.
    async fn update_patient(
        &self,
        id: i64,
        update: &PatientUpdate,
    ) -> Result<Patient, ServiceError>;

    async fn delete_patient(&self, id: i64) -> Result<(), ServiceError>;
}
