use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Visit reason values understood by the default reason policy.
pub const SCHEDULED: &str = "scheduled";
pub const UNSCHEDULED: &str = "unscheduled";
pub const MISSED_VISIT: &str = "missed";

/// One attendance of a subject on a schedule.
///
/// Owned by the caller's visit-tracking model; the ledger only reads it.
/// `reason` is kept as free text because an unrecognised value has to reach
/// the updater and be rejected there.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Visit {
    pub subject_identifier: String,
    pub visit_schedule_name: String,
    pub schedule_name: String,
    pub visit_code: String,
    #[serde(default)]
    pub visit_code_sequence: i64,
    pub reason: String,
    #[serde(default)]
    pub report_datetime: Option<DateTime<Utc>>,
}

impl Visit {
    pub fn new(
        subject_identifier: impl Into<String>,
        visit_schedule_name: impl Into<String>,
        schedule_name: impl Into<String>,
        visit_code: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            subject_identifier: subject_identifier.into(),
            visit_schedule_name: visit_schedule_name.into(),
            schedule_name: schedule_name.into(),
            visit_code: visit_code.into(),
            visit_code_sequence: 0,
            reason: reason.into(),
            report_datetime: None,
        }
    }

    pub fn with_sequence(mut self, visit_code_sequence: i64) -> Self {
        self.visit_code_sequence = visit_code_sequence;
        self
    }

    pub fn with_report_datetime(mut self, report_datetime: DateTime<Utc>) -> Self {
        self.report_datetime = Some(report_datetime);
        self
    }
}

impl std::fmt::Display for Visit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {}.{} ({})",
            self.subject_identifier, self.visit_code, self.visit_code_sequence, self.reason
        )
    }
}
