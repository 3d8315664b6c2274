use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::dates;

/// The user record joined onto an admission (`users(name)` in the select).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttendingUser {
    #[serde(default)]
    pub name: Option<String>,
}

/// A single hospital stay belonging to one patient.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Admission {
    pub id: i64,
    /// `None` when the row carries no date; such stays sort after dated ones.
    #[serde(default, with = "dates::option_timestamp")]
    pub admission_date: Option<DateTime<Utc>>,
    #[serde(default, with = "dates::option_timestamp")]
    pub discharge_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub department: Option<String>,
    #[serde(default)]
    pub diagnosis: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub visit_number: Option<i32>,
    #[serde(default)]
    pub safety_type: Option<String>,
    /// Wire name is the joined table, `users`.
    #[serde(default, rename = "users")]
    pub attending: Option<AttendingUser>,
}

impl Admission {
    /// Display name of the attending user, if the join returned one.
    pub fn doctor_name(&self) -> Option<&str> {
        self.attending.as_ref().and_then(|u| u.name.as_deref())
    }

    /// Whether the stay is still open.
    pub fn is_ongoing(&self) -> bool {
        self.discharge_date.is_none()
    }
}
