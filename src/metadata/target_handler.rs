//! Target handler: resolves a (model, visit[, panel]) to the schedule entry and
//! the submitted instance, refusing targets the schedule does not attach to the visit.

use rusqlite::Connection;

use super::error::MetadataError;
use super::handler::{resolve_target, MetadataHandler};
use super::registry::ModelRegistry;
use super::traits::TargetLookup;
use crate::models::enums::MetadataCategory;
use crate::models::{FormInstance, Visit};
use crate::schedule::{Crf, Requisition, ScheduleRegistry};

#[derive(Debug, Clone)]
enum ScheduledEntry {
    Crf(Crf),
    Requisition(Requisition),
}

pub struct TargetHandler<'a> {
    pub model: String,
    pub visit: &'a Visit,
    pub metadata_category: MetadataCategory,
    pub target_panel: Option<String>,
    entry: ScheduledEntry,
    lookup: Option<&'a dyn TargetLookup>,
}

impl<'a> TargetHandler<'a> {
    /// Validates that the target is scheduled for the visit; read-only otherwise.
    pub fn new(
        schedules: &ScheduleRegistry,
        models: &'a ModelRegistry,
        model: &str,
        visit: &'a Visit,
        metadata_category: MetadataCategory,
        target_panel: Option<&str>,
    ) -> Result<Self, MetadataError> {
        let schedule = schedules.get_schedule(&visit.visit_schedule_name, &visit.schedule_name)?;
        let visit_definition =
            schedule
                .visit(&visit.visit_code)
                .ok_or_else(|| MetadataError::VisitNotInSchedule {
                    visit_code: visit.visit_code.clone(),
                    schedule_name: schedule.name.clone(),
                })?;

        let not_scheduled = || MetadataError::TargetNotScheduledForVisit {
            model: model.to_string(),
            panel: target_panel.map(str::to_string),
            visit_code: visit.visit_code.clone(),
        };
        let invalid = || MetadataError::InvalidTarget {
            model: model.to_string(),
            panel: target_panel.map(str::to_string),
        };

        let entry = match (metadata_category, target_panel) {
            (MetadataCategory::Crf, None) => {
                if !schedule.knows_crf(model) {
                    return Err(invalid());
                }
                let crf = visit_definition.get_crf(model).ok_or_else(not_scheduled)?;
                ScheduledEntry::Crf(crf.clone())
            }
            (MetadataCategory::Requisition, Some(panel)) => {
                if !schedule.knows_panel(model, panel) {
                    return Err(invalid());
                }
                let requisition = visit_definition
                    .get_requisition(model, panel)
                    .ok_or_else(not_scheduled)?;
                ScheduledEntry::Requisition(requisition.clone())
            }
            (MetadataCategory::Crf, Some(_)) | (MetadataCategory::Requisition, None) => {
                return Err(invalid());
            }
        };

        let lookup = models
            .tracked_form(model)
            .filter(|form| form.category == metadata_category)
            .and_then(|form| form.lookup.as_deref());

        Ok(Self {
            model: model.to_string(),
            visit,
            metadata_category,
            target_panel: target_panel.map(str::to_string),
            entry,
            lookup,
        })
    }

    /// The submitted instance for this target and visit. `Ok(None)` if nothing was submitted.
    pub fn object(&self, conn: &Connection) -> Result<Option<FormInstance>, MetadataError> {
        resolve_target(
            self.lookup,
            conn,
            &self.model,
            self.visit,
            self.target_panel.as_deref(),
        )
    }

    pub fn metadata_handler(&self) -> MetadataHandler<'a> {
        match &self.entry {
            ScheduledEntry::Crf(crf) => MetadataHandler::for_crf(self.visit, crf, self.lookup),
            ScheduledEntry::Requisition(requisition) => {
                MetadataHandler::for_requisition(self.visit, requisition, self.lookup)
            }
        }
    }
}

impl std::fmt::Debug for TargetHandler<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TargetHandler")
            .field("model", &self.model)
            .field("visit", &self.visit.to_string())
            .field("metadata_category", &self.metadata_category)
            .field("target_panel", &self.target_panel)
            .finish()
    }
}
