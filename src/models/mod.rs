pub mod admission;
pub mod dates;
pub mod input;
pub mod patient;

pub use admission::{Admission, AttendingUser};
pub use input::{NewPatient, PatientUpdate, ValidationError};
pub use patient::Patient;
