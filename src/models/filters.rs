use super::enums::EntryStatus;
use super::visit::Visit;

/// Ledger query. Unset fields match everything.
///
/// `panel_name` only narrows the requisition ledger; CRF rows have no panel.
#[derive(Debug, Default, Clone)]
pub struct MetadataFilter {
    pub subject_identifier: Option<String>,
    pub visit_schedule_name: Option<String>,
    pub schedule_name: Option<String>,
    pub visit_code: Option<String>,
    pub visit_code_sequence: Option<i64>,
    pub model: Option<String>,
    pub panel_name: Option<String>,
    pub entry_status: Option<EntryStatus>,
}

impl MetadataFilter {
    /// Every row of one visit occurrence.
    pub fn for_visit(visit: &Visit) -> Self {
        Self {
            subject_identifier: Some(visit.subject_identifier.clone()),
            visit_schedule_name: Some(visit.visit_schedule_name.clone()),
            schedule_name: Some(visit.schedule_name.clone()),
            visit_code: Some(visit.visit_code.clone()),
            visit_code_sequence: Some(visit.visit_code_sequence),
            ..Self::default()
        }
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn panel(mut self, panel_name: impl Into<String>) -> Self {
        self.panel_name = Some(panel_name.into());
        self
    }

    pub fn status(mut self, entry_status: EntryStatus) -> Self {
        self.entry_status = Some(entry_status);
        self
    }
}
