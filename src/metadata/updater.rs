//! Metadata updater: reconciles every ledger row of one visit occurrence against the schedule.
//!
//! Runs on the caller's connection. When that connection is inside a
//! transaction, an error from any step aborts the whole reconciliation.

use rusqlite::Connection;
use serde::Serialize;

use super::error::MetadataError;
use super::handler::MetadataHandler;
use super::registry::ModelRegistry;
use super::traits::TargetLookup;
use crate::config::{ReasonClass, ReasonPolicy};
use crate::db::{count_metadata, delete_metadata, delete_unkeyed_metadata, list_metadata};
use crate::models::enums::*;
use crate::models::*;
use crate::schedule::{ScheduleRegistry, VisitDefinition};

/// Row counts touched by one reconciliation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileSummary {
    pub created: usize,
    pub deleted: usize,
}

pub struct MetadataUpdater<'a> {
    schedules: &'a ScheduleRegistry,
    models: &'a ModelRegistry,
    reasons: &'a ReasonPolicy,
    visit: &'a Visit,
}

impl<'a> MetadataUpdater<'a> {
    pub fn new(
        schedules: &'a ScheduleRegistry,
        models: &'a ModelRegistry,
        reasons: &'a ReasonPolicy,
        visit: &'a Visit,
    ) -> Self {
        Self {
            schedules,
            models,
            reasons,
            visit,
        }
    }

    /// Post-save entry point: create or delete rows according to the visit reason.
    pub fn reconcile(&self, conn: &Connection) -> Result<ReconcileSummary, MetadataError> {
        match self.reason_class()? {
            ReasonClass::Active => {
                let visit_definition = self.visit_definition()?;
                let before = self.count_for_visit(conn)?;
                let deleted = self.delete_unscheduled(conn, visit_definition)?;
                self.create_for(conn, visit_definition)?;
                let after = self.count_for_visit(conn)?;
                let summary = ReconcileSummary {
                    created: (after + deleted).saturating_sub(before),
                    deleted,
                };
                tracing::info!(
                    visit = %self.visit,
                    created = summary.created,
                    deleted = summary.deleted,
                    "Reconciled visit metadata"
                );
                Ok(summary)
            }
            ReasonClass::Inactive => Ok(ReconcileSummary {
                created: 0,
                deleted: self.delete_for_visit(conn)?,
            }),
        }
    }

    /// Get-or-create one row per CRF and requisition panel the schedule declares for the visit.
    ///
    /// A visit whose reason says it did not happen gets no rows.
    pub fn create_all(&self, conn: &Connection) -> Result<Vec<MetadataRow>, MetadataError> {
        match self.reason_class()? {
            ReasonClass::Active => self.create_for(conn, self.visit_definition()?),
            ReasonClass::Inactive => Ok(Vec::new()),
        }
    }

    /// Delete every row of the visit in both ledgers, or none if any is KEYED.
    pub fn delete_for_visit(&self, conn: &Connection) -> Result<usize, MetadataError> {
        let filter = MetadataFilter::for_visit(self.visit);
        for category in MetadataCategory::ALL {
            let keyed = list_metadata(conn, category, &filter.clone().status(EntryStatus::Keyed))?;
            if let Some(row) = keyed.first() {
                return Err(MetadataError::DeleteMetadata {
                    category,
                    model: row.key.model.clone(),
                    visit: self.visit.to_string(),
                });
            }
        }

        let mut deleted = 0;
        for category in MetadataCategory::ALL {
            deleted += delete_unkeyed_metadata(conn, category, &filter)?;
        }
        tracing::info!(visit = %self.visit, deleted, "Deleted visit metadata");
        Ok(deleted)
    }

    fn create_for(
        &self,
        conn: &Connection,
        visit_definition: &VisitDefinition,
    ) -> Result<Vec<MetadataRow>, MetadataError> {
        let mut rows = Vec::new();
        for crf in visit_definition.ordered_crfs() {
            let lookup = self.lookup(&crf.model, MetadataCategory::Crf);
            rows.push(MetadataHandler::for_crf(self.visit, crf, lookup).get_or_create(conn)?);
        }
        for requisition in visit_definition.ordered_requisitions() {
            let lookup = self.lookup(&requisition.model, MetadataCategory::Requisition);
            rows.push(
                MetadataHandler::for_requisition(self.visit, requisition, lookup).get_or_create(conn)?,
            );
        }
        Ok(rows)
    }

    /// Remove rows whose target the schedule no longer attaches to this visit.
    fn delete_unscheduled(
        &self,
        conn: &Connection,
        visit_definition: &VisitDefinition,
    ) -> Result<usize, MetadataError> {
        let filter = MetadataFilter::for_visit(self.visit);
        let mut stale = Vec::new();
        for category in MetadataCategory::ALL {
            for row in list_metadata(conn, category, &filter)? {
                let scheduled = match (category, row.panel_name()) {
                    (MetadataCategory::Crf, _) => visit_definition.get_crf(row.model()).is_some(),
                    (MetadataCategory::Requisition, Some(panel)) => {
                        visit_definition.get_requisition(row.model(), panel).is_some()
                    }
                    (MetadataCategory::Requisition, None) => false,
                };
                if scheduled {
                    continue;
                }
                if row.is_keyed() {
                    return Err(MetadataError::DeleteMetadata {
                        category,
                        model: row.key.model.clone(),
                        visit: self.visit.to_string(),
                    });
                }
                stale.push(row);
            }
        }
        for row in &stale {
            delete_metadata(conn, row.category, &row.id)?;
            tracing::debug!(row = %row, "Deleted metadata no longer scheduled for visit");
        }
        Ok(stale.len())
    }

    fn reason_class(&self) -> Result<ReasonClass, MetadataError> {
        self.reasons
            .classify(&self.visit.reason)
            .ok_or_else(|| MetadataError::CreatesMetadata {
                reason: self.visit.reason.clone(),
                visit: self.visit.to_string(),
            })
    }

    fn visit_definition(&self) -> Result<&'a VisitDefinition, MetadataError> {
        let schedule = self
            .schedules
            .get_schedule(&self.visit.visit_schedule_name, &self.visit.schedule_name)?;
        schedule
            .visit(&self.visit.visit_code)
            .ok_or_else(|| MetadataError::VisitNotInSchedule {
                visit_code: self.visit.visit_code.clone(),
                schedule_name: schedule.name.clone(),
            })
    }

    fn lookup(&self, model: &str, category: MetadataCategory) -> Option<&'a dyn TargetLookup> {
        self.models
            .tracked_form(model)
            .filter(|form| form.category == category)
            .and_then(|form| form.lookup.as_deref())
    }

    fn count_for_visit(&self, conn: &Connection) -> Result<usize, MetadataError> {
        let filter = MetadataFilter::for_visit(self.visit);
        let mut total = 0;
        for category in MetadataCategory::ALL {
            total += count_metadata(conn, category, &filter)?;
        }
        Ok(total)
    }
}

impl std::fmt::Debug for MetadataUpdater<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetadataUpdater")
            .field("visit", &self.visit.to_string())
            .finish()
    }
}
