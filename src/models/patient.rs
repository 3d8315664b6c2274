use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use super::admission::Admission;
use super::dates;

/// A patient row with its admissions embedded.
///
/// Demographic and contact columns are not interpreted here: whatever the
/// service returns beyond the known fields lands in `details` and is written
/// back verbatim. The four derived fields mirror the most recent admission
/// and are recomputed by [`Patient::normalize`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Patient {
    pub id: i64,
    #[serde(default, with = "dates::option_timestamp")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "nullable_admissions")]
    pub admissions: Vec<Admission>,

    #[serde(default)]
    pub doctor_name: Option<String>,
    #[serde(default)]
    pub department: Option<String>,
    #[serde(default)]
    pub diagnosis: Option<String>,
    #[serde(default, with = "dates::option_timestamp")]
    pub admission_date: Option<DateTime<Utc>>,

    #[serde(flatten)]
    pub details: Map<String, Value>,
}

fn nullable_admissions<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Vec<Admission>, D::Error> {
    Ok(Option::<Vec<Admission>>::deserialize(deserializer)?.unwrap_or_default())
}

impl Patient {
    /// Patient with no admissions and no extra columns.
    pub fn new(id: i64) -> Self {
        Self {
            id,
            created_at: None,
            admissions: Vec::new(),
            doctor_name: None,
            department: None,
            diagnosis: None,
            admission_date: None,
            details: Map::new(),
        }
    }

    /// Re-establish admission order (most recent first) and copy the derived
    /// fields from the head of that order.
    ///
    /// The sort is stable, so admissions sharing a date keep the order the
    /// service returned them in. Undated admissions go last.
    pub fn normalize(&mut self) {
        self.admissions
            .sort_by(|a, b| b.admission_date.cmp(&a.admission_date));

        let latest = self.admissions.first();
        self.doctor_name = latest.and_then(|a| a.doctor_name().map(str::to_owned));
        self.department = latest.and_then(|a| a.department.clone());
        self.diagnosis = latest.and_then(|a| a.diagnosis.clone());
        self.admission_date = latest.and_then(|a| a.admission_date);
    }

    /// Take the scalar columns of `updated` while keeping the admissions we
    /// already hold, since update responses carry no embedded rows.
    pub fn absorb(&mut self, updated: Patient) {
        let admissions = if updated.admissions.is_empty() {
            std::mem::take(&mut self.admissions)
        } else {
            updated.admissions
        };
        *self = Patient {
            admissions,
            ..updated
        };
        self.normalize();
    }

    /// Look up a pass-through column.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.details.get(name)
    }

    /// Most recent admission, valid once the patient has been normalized.
    pub fn latest_admission(&self) -> Option<&Admission> {
        self.admissions.first()
    }
}
