//! Client-side state container for patient and admission records held by a
//! remote PostgREST service.
//!
//! ```ignore
//! let config = StoreConfig::from_env()?;
//! let store = Arc::new(PatientStore::connect(&config)?);
//! let _sub = store.subscribe(|| render());
//! store.fetch_patients().await;
//! ```

pub mod config;
pub mod models;
pub mod remote;
pub mod store;

pub use config::{ConfigError, StoreConfig};
pub use models::{Admission, NewPatient, Patient, PatientUpdate, ValidationError};
pub use remote::{MockPatientService, PatientService, RestPatientService, ServiceError};
pub use store::{PatientStore, StoreState, Subscription};

use tracing_subscriber::EnvFilter;

/// Install the global `tracing` subscriber.
///
/// Honors `RUST_LOG`, falling back to [`config::default_log_filter`]. Safe to
/// call more than once; later calls are no-ops.
pub fn init_tracing() {
    let installed = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config::default_log_filter())),
        )
        .try_init()
        .is_ok();

    if installed {
        tracing::info!("{} starting v{}", config::APP_NAME, config::APP_VERSION);
    }
}
