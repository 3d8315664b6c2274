//! Write-side inputs: the new-patient form and the partial update.
//!
//! Both are validated before anything is sent to the service. Validation also
//! trims text fields and turns blank optional fields into `None`, so the
//! service never receives whitespace-only values.

use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Keys an update may not carry in [`PatientUpdate::extra`]: the primary key,
/// server-managed columns, the embedded join, the derived fields, and the
/// columns that already have a typed field.
const NON_EXTRA_KEYS: &[&str] = &[
    "id",
    "created_at",
    "admissions",
    "doctor_name",
    "department",
    "diagnosis",
    "admission_date",
    "first_name",
    "last_name",
    "date_of_birth",
    "gender",
    "phone",
    "email",
    "address",
    "emergency_contact",
];

/// Input rejected before a request was issued.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("{0} is required")]
    MissingField(&'static str),
    #[error("Invalid email address: {0}")]
    InvalidEmail(String),
    #[error("Date of birth {0} is in the future")]
    FutureDateOfBirth(NaiveDate),
    #[error("Update contains no fields")]
    EmptyUpdate,
    #[error("{0} cannot be set through extra columns")]
    ReservedColumn(String),
}

/// Everything needed to create a patient.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewPatient {
    pub first_name: String,
    pub last_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_of_birth: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gender: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub emergency_contact: Option<String>,
}

impl NewPatient {
    /// Input with only the required names set.
    pub fn new(first_name: impl Into<String>, last_name: impl Into<String>) -> Self {
        Self {
            first_name: first_name.into(),
            last_name: last_name.into(),
            ..Self::default()
        }
    }

    /// Trimmed copy, or the first rule it breaks.
    pub fn validated(self) -> Result<Self, ValidationError> {
        self.validated_on(Utc::now().date_naive())
    }

    pub(crate) fn validated_on(self, today: NaiveDate) -> Result<Self, ValidationError> {
        let first_name = required(self.first_name, "first_name")?;
        let last_name = required(self.last_name, "last_name")?;
        check_date_of_birth(self.date_of_birth, today)?;
        let email = optional(self.email);
        check_email(email.as_deref())?;

        Ok(Self {
            first_name,
            last_name,
            date_of_birth: self.date_of_birth,
            gender: optional(self.gender),
            phone: optional(self.phone),
            email,
            address: optional(self.address),
            emergency_contact: optional(self.emergency_contact),
        })
    }
}

/// Partial update: only the fields that are `Some` are sent.
///
/// Columns without a typed field go in `extra` and are sent verbatim, so a
/// pass-through column read from [`Patient::details`](crate::Patient) can be
/// written back. A `null` value there clears the column.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatientUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_of_birth: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gender: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub emergency_contact: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl PatientUpdate {
    /// Whether no field at all is set.
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    /// Trimmed copy, or the first rule it breaks.
    ///
    /// Names may be changed but not blanked. Other text fields are left out
    /// of the request when blank.
    pub fn validated(self) -> Result<Self, ValidationError> {
        self.validated_on(Utc::now().date_naive())
    }

    pub(crate) fn validated_on(self, today: NaiveDate) -> Result<Self, ValidationError> {
        if self.is_empty() {
            return Err(ValidationError::EmptyUpdate);
        }

        let first_name = self
            .first_name
            .map(|v| required(v, "first_name"))
            .transpose()?;
        let last_name = self
            .last_name
            .map(|v| required(v, "last_name"))
            .transpose()?;
        check_date_of_birth(self.date_of_birth, today)?;
        let email = optional(self.email);
        check_email(email.as_deref())?;
        if let Some(key) = self.extra.keys().find(|k| NON_EXTRA_KEYS.contains(&k.as_str())) {
            return Err(ValidationError::ReservedColumn(key.clone()));
        }

        let cleaned = Self {
            first_name,
            last_name,
            date_of_birth: self.date_of_birth,
            gender: optional(self.gender),
            phone: optional(self.phone),
            email,
            address: optional(self.address),
            emergency_contact: optional(self.emergency_contact),
            extra: self.extra,
        };
        if cleaned.is_empty() {
            return Err(ValidationError::EmptyUpdate);
        }
        Ok(cleaned)
    }
}

// ── Field rules ─────────────────────────────────────────────

fn required(value: String, field: &'static str) -> Result<String, ValidationError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::MissingField(field));
    }
    Ok(trimmed.to_string())
}

fn optional(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn check_date_of_birth(dob: Option<NaiveDate>, today: NaiveDate) -> Result<(), ValidationError> {
    match dob {
        Some(d) if d > today => Err(ValidationError::FutureDateOfBirth(d)),
        _ => Ok(()),
    }
}

fn check_email(email: Option<&str>) -> Result<(), ValidationError> {
    let Some(email) = email else {
        return Ok(());
    };
    let valid = match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty() && !domain.is_empty() && !domain.contains('@') && !email.contains(' ')
        }
        None => false,
    };
    if valid {
        Ok(())
    } else {
        Err(ValidationError::InvalidEmail(email.to_string()))
    }
}
