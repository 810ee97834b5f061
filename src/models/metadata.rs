use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::enums::{EntryStatus, MetadataCategory};
use super::visit::Visit;

/// Unique-together identity of a ledger row.
///
/// `panel_name` is `Some` for requisition rows and `None` for CRF rows.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MetadataKey {
    pub subject_identifier: String,
    pub visit_schedule_name: String,
    pub schedule_name: String,
    pub visit_code: String,
    pub visit_code_sequence: i64,
    pub model: String,
    pub panel_name: Option<String>,
}

impl MetadataKey {
    pub fn for_visit(visit: &Visit, model: &str, panel_name: Option<&str>) -> Self {
        Self {
            subject_identifier: visit.subject_identifier.clone(),
            visit_schedule_name: visit.visit_schedule_name.clone(),
            schedule_name: visit.schedule_name.clone(),
            visit_code: visit.visit_code.clone(),
            visit_code_sequence: visit.visit_code_sequence,
            model: model.to_string(),
            panel_name: panel_name.map(str::to_string),
        }
    }

    /// True when this key belongs to the given visit occurrence.
    pub fn matches_visit(&self, visit: &Visit) -> bool {
        self.subject_identifier == visit.subject_identifier
            && self.visit_schedule_name == visit.visit_schedule_name
            && self.schedule_name == visit.schedule_name
            && self.visit_code == visit.visit_code
            && self.visit_code_sequence == visit.visit_code_sequence
    }
}

/// One CRF or requisition-panel entry in the per-visit ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataRow {
    pub id: Uuid,
    pub category: MetadataCategory,
    pub key: MetadataKey,
    pub entry_status: EntryStatus,
    pub show_order: i64,
    pub current_entry_title: Option<String>,
    pub entry_comment: Option<String>,
    pub due_datetime: Option<DateTime<Utc>>,
    pub report_datetime: Option<DateTime<Utc>>,
    pub close_datetime: Option<DateTime<Utc>>,
    pub fill_datetime: Option<DateTime<Utc>>,
}

impl MetadataRow {
    pub fn new(
        category: MetadataCategory,
        key: MetadataKey,
        entry_status: EntryStatus,
        show_order: i64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            category,
            key,
            entry_status,
            show_order,
            current_entry_title: None,
            entry_comment: None,
            due_datetime: None,
            report_datetime: None,
            close_datetime: None,
            fill_datetime: None,
        }
    }

    pub fn model(&self) -> &str {
        &self.key.model
    }

    pub fn panel_name(&self) -> Option<&str> {
        self.key.panel_name.as_deref()
    }

    pub fn is_required(&self) -> bool {
        self.entry_status.is_required()
    }

    pub fn is_not_required(&self) -> bool {
        !self.is_required()
    }

    pub fn is_keyed(&self) -> bool {
        self.entry_status == EntryStatus::Keyed
    }

    /// (model, subject, schedule, visit_schedule, visit_code, sequence[, panel])
    pub fn natural_key(&self) -> Vec<String> {
        let mut key = vec![
            self.key.model.clone(),
            self.key.subject_identifier.clone(),
            self.key.schedule_name.clone(),
            self.key.visit_schedule_name.clone(),
            self.key.visit_code.clone(),
            self.key.visit_code_sequence.to_string(),
        ];
        if let Some(panel) = &self.key.panel_name {
            key.push(panel.clone());
        }
        key
    }
}

impl std::fmt::Display for MetadataRow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.category.label(), self.key.model)?;
        if let Some(panel) = &self.key.panel_name {
            write!(f, ".{panel}")?;
        }
        write!(
            f,
            " {}.{} {} {}",
            self.key.visit_code, self.key.visit_code_sequence, self.entry_status,
            self.key.subject_identifier
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::visit::SCHEDULED;

    fn visit() -> Visit {
        Visit::new("1111111", "visit_schedule", "schedule", "1000", SCHEDULED)
    }

    #[test]
    fn display_matches_ledger_format() {
        let row = MetadataRow::new(
            MetadataCategory::Crf,
            MetadataKey::for_visit(&visit(), "edc_metadata.crfone", None),
            EntryStatus::Required,
            1,
        );
        assert_eq!(row.to_string(), "CrfMeta edc_metadata.crfone 1000.0 REQUIRED 1111111");
    }

    #[test]
    fn requisition_natural_key_includes_panel() {
        let row = MetadataRow::new(
            MetadataCategory::Requisition,
            MetadataKey::for_visit(&visit(), "edc_metadata.subjectrequisition", Some("one")),
            EntryStatus::NotRequired,
            2,
        );
        assert_eq!(row.natural_key().last().map(String::as_str), Some("one"));
        assert!(row.is_not_required());
        assert!(row.to_string().contains("subjectrequisition.one"));
    }

    #[test]
    fn key_matches_only_its_visit() {
        let key = MetadataKey::for_visit(&visit(), "edc_metadata.crfone", None);
        assert!(key.matches_visit(&visit()));
        assert!(!key.matches_visit(&visit().with_sequence(1)));
    }
}
