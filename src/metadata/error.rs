//! Metadata engine errors.
//!
//! Each failure a caller may need to branch on has its own variant. Storage
//! failures are wrapped from the repository layer unchanged.

use thiserror::Error;

use crate::db::DatabaseError;
use crate::models::enums::MetadataCategory;

#[derive(Error, Debug)]
pub enum MetadataError {
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    /// The model (or panel) is not declared anywhere in the subject's schedule.
    #[error("Invalid target {model}{}: not declared in the schedule", panel_suffix(.panel))]
    InvalidTarget { model: String, panel: Option<String> },

    /// The model (or panel) is declared by the schedule, but not for this visit.
    #[error("Target {model}{} is not scheduled for visit '{visit_code}'", panel_suffix(.panel))]
    TargetNotScheduledForVisit {
        model: String,
        panel: Option<String>,
        visit_code: String,
    },

    #[error("Schedule not found: {visit_schedule_name}.{schedule_name}")]
    ScheduleNotFound {
        visit_schedule_name: String,
        schedule_name: String,
    },

    #[error("Visit code '{visit_code}' is not defined in schedule {schedule_name}")]
    VisitNotInSchedule {
        visit_code: String,
        schedule_name: String,
    },

    /// A schedule references a model that is not registered for metadata tracking.
    #[error("Metadata manager error: {0}")]
    MetadataManager(String),

    #[error("Cannot create metadata. Unknown visit reason '{reason}' for {visit}")]
    CreatesMetadata { reason: String, visit: String },

    /// Refused to delete metadata that records collected data.
    #[error("Metadata cannot be deleted. {category} metadata for {model} is KEYED at visit {visit}")]
    DeleteMetadata {
        category: MetadataCategory,
        model: String,
        visit: String,
    },

    #[error("Metadata wrapper error: {0}")]
    MetadataWrapper(String),

    /// The row pointed at a model that no longer exists and has been deleted.
    #[error("Deleted invalid metadata: {row}")]
    DeletedInvalidMetadata { row: String },

    #[error("Improperly configured: {0}")]
    ImproperlyConfigured(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

fn panel_suffix(panel: &Option<String>) -> String {
    panel.as_ref().map(|p| format!(" (panel {p})")).unwrap_or_default()
}

impl MetadataError {
    /// Schedule or model wiring defects.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::InvalidTarget { .. }
                | Self::ScheduleNotFound { .. }
                | Self::VisitNotInSchedule { .. }
                | Self::MetadataManager(_)
                | Self::ImproperlyConfigured(_)
                | Self::Config(_)
        )
    }

    /// Refusals that protect collected data or reject unknown visit reasons.
    pub fn is_guard_violation(&self) -> bool {
        matches!(self, Self::DeleteMetadata { .. } | Self::CreatesMetadata { .. })
    }
}
