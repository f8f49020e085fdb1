//! History of scheduled enrollments.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum Termination {
    Success,
    Failed,
    Cancelled,
    ForcedEnd,
}

impl Termination {
    pub fn as_str(&self) -> &'static str {
        match self {
            Termination::Success => "Success",
            Termination::Failed => "Failed",
            Termination::Cancelled => "Cancelled",
            Termination::ForcedEnd => "ForcedEnd",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EnrollmentRun {
    pub id: String,
    pub term: String,
    /// Requested courses as `COURSE-SECTION`, comma separated.
    pub courses: String,
    /// Registration opening in the host's local wall-clock time.
    pub deadline: NaiveDateTime,
    pub armed_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub termination: Option<Termination>,
    pub detail: Option<String>,
}
