//! Metadata engine: owns the registries, rule engine and reason policy, and
//! wires them into the save/delete lifecycle of visits and forms.
//!
//! `post_save`/`pre_delete` run on whatever connection they are given, so a
//! caller already inside a transaction keeps control of commit and rollback.
//! The `save_*`/`delete_*` methods open their own transaction.

use std::collections::BTreeMap;

use rusqlite::Connection;

use super::error::MetadataError;
use super::registry::ModelRegistry;
use super::target_handler::TargetHandler;
use super::traits::{NoopRuleEngine, Participation, RuleEngine, Tracked};
use super::updater::{MetadataUpdater, ReconcileSummary};
use super::wrapper::{self, MetadataWrapper};
use crate::config::{ReasonClass, ReasonPolicy};
use crate::db::{delete_form_instance, upsert_form_instance, DatabaseError};
use crate::models::enums::{ChangeType, MetadataCategory};
use crate::models::{FormInstance, MetadataRow, Visit};
use crate::schedule::ScheduleRegistry;

pub struct MetadataEngine {
    schedules: ScheduleRegistry,
    models: ModelRegistry,
    rules: Box<dyn RuleEngine>,
    reasons: ReasonPolicy,
}

impl MetadataEngine {
    /// Every registered schedule must only name models registered as tracked forms.
    pub fn new(schedules: ScheduleRegistry, models: ModelRegistry) -> Result<Self, MetadataError> {
        for schedule in schedules.schedules() {
            models.validate_schedule(schedule)?;
        }
        Ok(Self {
            schedules,
            models,
            rules: Box::new(NoopRuleEngine),
            reasons: ReasonPolicy::default(),
        })
    }

    pub fn with_rule_engine(mut self, rules: impl RuleEngine + 'static) -> Self {
        self.rules = Box::new(rules);
        self
    }

    pub fn with_reason_policy(mut self, reasons: ReasonPolicy) -> Self {
        self.reasons = reasons;
        self
    }

    pub fn schedules(&self) -> &ScheduleRegistry {
        &self.schedules
    }

    pub fn models(&self) -> &ModelRegistry {
        &self.models
    }

    /// Registration changes after construction are not re-validated against the schedules.
    pub fn models_mut(&mut self) -> &mut ModelRegistry {
        &mut self.models
    }

    pub fn reasons(&self) -> &ReasonPolicy {
        &self.reasons
    }

    pub fn updater<'a>(&'a self, visit: &'a Visit) -> MetadataUpdater<'a> {
        MetadataUpdater::new(&self.schedules, &self.models, &self.reasons, visit)
    }

    pub fn target_handler<'a>(
        &'a self,
        model: &str,
        visit: &'a Visit,
        category: MetadataCategory,
        panel_name: Option<&str>,
    ) -> Result<TargetHandler<'a>, MetadataError> {
        TargetHandler::new(&self.schedules, &self.models, model, visit, category, panel_name)
    }

    pub fn wrapper(
        &self,
        conn: &Connection,
        visit: &Visit,
        metadata_obj: MetadataRow,
    ) -> Result<MetadataWrapper, MetadataError> {
        MetadataWrapper::new(conn, &self.models, visit, metadata_obj)
    }

    pub fn wrap_visit_metadata(
        &self,
        conn: &Connection,
        visit: &Visit,
        category: MetadataCategory,
    ) -> Result<Vec<MetadataWrapper>, MetadataError> {
        wrapper::wrap_visit_metadata(conn, &self.models, visit, category)
    }

    pub fn visit_metadata(
        &self,
        conn: &Connection,
        visit: &Visit,
    ) -> Result<BTreeMap<MetadataCategory, Vec<MetadataRow>>, MetadataError> {
        wrapper::visit_metadata(conn, visit)
    }

    // ─── Lifecycle hooks ─────────────────────────────────────────

    /// Call after `obj` has been written. Untracked values are ignored.
    pub fn post_save(&self, conn: &Connection, obj: &dyn Tracked, created: bool) -> Result<(), MetadataError> {
        match obj.participation() {
            Participation::Visit(visit) => {
                self.visit_saved(conn, visit)?;
            }
            Participation::Form(form) => {
                let change = if created { ChangeType::Created } else { ChangeType::Updated };
                self.form_changed(conn, form, change)?;
            }
            Participation::Untracked => {}
        }
        Ok(())
    }

    /// Call before `obj` is removed. An error here must abort the delete.
    pub fn pre_delete(&self, conn: &Connection, obj: &dyn Tracked) -> Result<(), MetadataError> {
        match obj.participation() {
            Participation::Visit(visit) => {
                self.updater(visit).delete_for_visit(conn)?;
            }
            Participation::Form(form) => {
                self.form_changed(conn, form, ChangeType::Deleted)?;
            }
            Participation::Untracked => {}
        }
        Ok(())
    }

    fn visit_saved(&self, conn: &Connection, visit: &Visit) -> Result<ReconcileSummary, MetadataError> {
        let summary = self.updater(visit).reconcile(conn)?;
        self.rules.update_rules_for_source(conn, visit)?;
        Ok(summary)
    }

    /// Forms collected at a visit that did not take place leave the ledger
    /// untouched; an unknown visit reason is refused.
    fn form_changed(
        &self,
        conn: &Connection,
        form: &FormInstance,
        change: ChangeType,
    ) -> Result<(), MetadataError> {
        let Some(tracked) = self.models.tracked_form(&form.model) else {
            tracing::debug!(model = %form.model, "Form is not tracked, skipping metadata update");
            return Ok(());
        };
        if change != ChangeType::Deleted {
            match self.reasons.classify(&form.visit.reason) {
                Some(ReasonClass::Active) => {}
                Some(ReasonClass::Inactive) => {
                    tracing::debug!(
                        model = %form.model,
                        visit = %form.visit,
                        "Visit has no metadata, skipping metadata update"
                    );
                    return Ok(());
                }
                None => {
                    return Err(MetadataError::CreatesMetadata {
                        reason: form.visit.reason.clone(),
                        visit: form.visit.to_string(),
                    });
                }
            }
        }
        let target = self.target_handler(
            &form.model,
            &form.visit,
            tracked.category,
            form.panel_name.as_deref(),
        )?;
        let row = target.metadata_handler().update(conn, change)?;
        if change != ChangeType::Deleted && row.is_some_and(|r| r.is_keyed()) {
            self.rules.update_rules_for_source(conn, &form.visit)?;
        }
        Ok(())
    }

    // ─── Transactional entry points ──────────────────────────────

    /// Reconcile the visit's metadata and run the rule engine, all or nothing.
    pub fn save_visit(&self, conn: &Connection, visit: &Visit) -> Result<ReconcileSummary, MetadataError> {
        let tx = conn.unchecked_transaction().map_err(DatabaseError::from)?;
        let summary = self.visit_saved(&tx, visit)?;
        tx.commit().map_err(DatabaseError::from)?;
        Ok(summary)
    }

    /// Delete every ledger row of the visit. Refused if any row is KEYED.
    pub fn delete_visit(&self, conn: &Connection, visit: &Visit) -> Result<usize, MetadataError> {
        let tx = conn.unchecked_transaction().map_err(DatabaseError::from)?;
        let deleted = self.updater(visit).delete_for_visit(&tx)?;
        tx.commit().map_err(DatabaseError::from)?;
        Ok(deleted)
    }

    /// Store the form in the bundled form store and key its ledger row.
    pub fn save_form(&self, conn: &Connection, form: &FormInstance) -> Result<(), MetadataError> {
        let tx = conn.unchecked_transaction().map_err(DatabaseError::from)?;
        let created = upsert_form_instance(&tx, form)?;
        self.post_save(&tx, form, created)?;
        tx.commit().map_err(DatabaseError::from)?;
        Ok(())
    }

    /// Remove the form from the bundled form store and revert its ledger row.
    pub fn delete_form(&self, conn: &Connection, form: &FormInstance) -> Result<(), MetadataError> {
        let tx = conn.unchecked_transaction().map_err(DatabaseError::from)?;
        self.pre_delete(&tx, form)?;
        delete_form_instance(&tx, &form.id)?;
        tx.commit().map_err(DatabaseError::from)?;
        Ok(())
    }
}

impl std::fmt::Debug for MetadataEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetadataEngine")
            .field("schedules", &self.schedules)
            .field("models", &self.models)
            .field("reasons", &self.reasons)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{get_metadata, list_metadata, set_entry_status};
    use crate::models::enums::EntryStatus;
    use crate::models::visit::{MISSED_VISIT, SCHEDULED};
    use crate::models::{MetadataFilter, MetadataKey};
    use crate::test_fixtures::*;

    fn crf_status(fx: &Fixture, visit: &Visit, model: &str) -> Option<EntryStatus> {
        get_metadata(&fx.conn, MetadataCategory::Crf, &MetadataKey::for_visit(visit, model, None))
            .unwrap()
            .map(|r| r.entry_status)
    }

    fn requisition_status(fx: &Fixture, visit: &Visit, panel: &str) -> Option<EntryStatus> {
        get_metadata(
            &fx.conn,
            MetadataCategory::Requisition,
            &MetadataKey::for_visit(visit, SUBJECT_REQUISITION, Some(panel)),
        )
        .unwrap()
        .map(|r| r.entry_status)
    }

    #[test]
    fn engine_rejects_schedule_with_unregistered_model() {
        let mut models = ModelRegistry::new();
        models.register_visit_model("edc_metadata.subjectvisit");
        let result = MetadataEngine::new(reference_schedules(), models);
        assert!(matches!(result, Err(MetadataError::MetadataManager(_))));
    }

    #[test]
    fn scheduled_visit_creates_required_rows() {
        let fx = Fixture::new();
        let visit = scheduled_visit();
        let summary = fx.engine.save_visit(&fx.conn, &visit).unwrap();
        assert_eq!(summary.created, 5);

        let rows = fx.engine.visit_metadata(&fx.conn, &visit).unwrap();
        assert_eq!(rows[&MetadataCategory::Crf].len(), 3);
        assert_eq!(rows[&MetadataCategory::Requisition].len(), 2);
        assert!(rows.values().flatten().all(|r| r.entry_status == EntryStatus::Required));
    }

    #[test]
    fn saving_and_deleting_crf_toggles_keyed() {
        let fx = Fixture::new();
        let visit = scheduled_visit();
        fx.engine.save_visit(&fx.conn, &visit).unwrap();

        let form = FormInstance::crf(CRF_ONE, &visit);
        fx.engine.save_form(&fx.conn, &form).unwrap();
        assert_eq!(crf_status(&fx, &visit, CRF_ONE), Some(EntryStatus::Keyed));
        assert_eq!(crf_status(&fx, &visit, CRF_TWO), Some(EntryStatus::Required));
        assert_eq!(crf_status(&fx, &visit, CRF_THREE), Some(EntryStatus::Required));

        fx.engine.delete_form(&fx.conn, &form).unwrap();
        assert_eq!(crf_status(&fx, &visit, CRF_ONE), Some(EntryStatus::Required));
    }

    #[test]
    fn resaving_form_keeps_keyed() {
        let fx = Fixture::new();
        let visit = scheduled_visit();
        fx.engine.save_visit(&fx.conn, &visit).unwrap();
        let form = FormInstance::crf(CRF_TWO, &visit);
        fx.engine.save_form(&fx.conn, &form).unwrap();
        fx.engine.save_form(&fx.conn, &form).unwrap();
        assert_eq!(crf_status(&fx, &visit, CRF_TWO), Some(EntryStatus::Keyed));
    }

    #[test]
    fn requisition_panel_is_keyed_and_reset() {
        let fx = Fixture::new();
        let visit = scheduled_visit();
        fx.engine.save_visit(&fx.conn, &visit).unwrap();

        let form = FormInstance::requisition(SUBJECT_REQUISITION, &visit, PANEL_ONE);
        fx.engine.save_form(&fx.conn, &form).unwrap();
        assert_eq!(requisition_status(&fx, &visit, PANEL_ONE), Some(EntryStatus::Keyed));
        assert_eq!(requisition_status(&fx, &visit, PANEL_TWO), Some(EntryStatus::Required));

        fx.engine.delete_form(&fx.conn, &form).unwrap();
        assert_eq!(requisition_status(&fx, &visit, PANEL_ONE), Some(EntryStatus::Required));
    }

    #[test]
    fn requisition_for_panel_not_on_visit_rolls_back() {
        let fx = Fixture::new();
        let visit = scheduled_visit();
        fx.engine.save_visit(&fx.conn, &visit).unwrap();

        let form = FormInstance::requisition(SUBJECT_REQUISITION, &visit, PANEL_SEVEN);
        let result = fx.engine.save_form(&fx.conn, &form);
        assert!(matches!(result, Err(MetadataError::TargetNotScheduledForVisit { .. })));
        assert!(crate::db::get_form_instance_for_visit(&fx.conn, SUBJECT_REQUISITION, &visit, Some(PANEL_SEVEN))
            .unwrap()
            .is_none());
    }

    #[test]
    fn missed_visit_creates_nothing() {
        let fx = Fixture::new();
        let mut visit = scheduled_visit();
        visit.reason = MISSED_VISIT.into();
        let summary = fx.engine.save_visit(&fx.conn, &visit).unwrap();
        assert_eq!(summary, ReconcileSummary::default());
        assert_eq!(fx.total_rows(), 0);
    }

    #[test]
    fn scheduled_then_missed_then_scheduled() {
        let fx = Fixture::new();
        let mut visit = scheduled_visit();
        fx.engine.save_visit(&fx.conn, &visit).unwrap();
        assert_eq!(fx.total_rows(), 5);

        visit.reason = MISSED_VISIT.into();
        let summary = fx.engine.save_visit(&fx.conn, &visit).unwrap();
        assert_eq!(summary.deleted, 5);
        assert_eq!(fx.total_rows(), 0);

        visit.reason = SCHEDULED.into();
        fx.engine.save_visit(&fx.conn, &visit).unwrap();
        assert_eq!(fx.total_rows(), 5);
    }

    #[test]
    fn form_on_missed_visit_leaves_ledger_empty() {
        let fx = Fixture::new();
        let mut visit = scheduled_visit();
        visit.reason = MISSED_VISIT.into();
        fx.engine.save_visit(&fx.conn, &visit).unwrap();

        let form = FormInstance::crf(CRF_ONE, &visit);
        fx.engine.save_form(&fx.conn, &form).unwrap();
        assert_eq!(fx.total_rows(), 0);
        fx.engine.delete_form(&fx.conn, &form).unwrap();
        assert_eq!(fx.total_rows(), 0);
    }

    #[test]
    fn form_on_unknown_reason_is_refused() {
        let fx = Fixture::new();
        let mut visit = scheduled_visit();
        visit.reason = "ERIK".into();
        let form = FormInstance::crf(CRF_ONE, &visit);
        let result = fx.engine.save_form(&fx.conn, &form);
        assert!(matches!(result, Err(MetadataError::CreatesMetadata { .. })));
        assert_eq!(fx.total_rows(), 0);
        assert!(crate::db::get_form_instance_for_visit(&fx.conn, CRF_ONE, &visit, None)
            .unwrap()
            .is_none());
    }

    #[test]
    fn deleting_form_of_deleted_visit_creates_no_row() {
        let fx = Fixture::new();
        let visit = scheduled_visit();
        fx.engine.save_visit(&fx.conn, &visit).unwrap();
        let form = FormInstance::crf(CRF_ONE, &visit);
        fx.engine.save_form(&fx.conn, &form).unwrap();

        // Undo the keyed row so the visit itself can be deleted first.
        crate::db::update_entry_status_where(
            &fx.conn,
            MetadataCategory::Crf,
            &MetadataFilter::for_visit(&visit),
            EntryStatus::Required,
        )
        .unwrap();
        fx.engine.delete_visit(&fx.conn, &visit).unwrap();
        assert_eq!(fx.total_rows(), 0);

        fx.engine.delete_form(&fx.conn, &form).unwrap();
        assert_eq!(fx.total_rows(), 0);
    }

    #[test]
    fn unknown_reason_rolls_back() {
        let fx = Fixture::new();
        let mut visit = scheduled_visit();
        visit.reason = "ERIK".into();
        let err = fx.engine.save_visit(&fx.conn, &visit).unwrap_err();
        assert!(matches!(err, MetadataError::CreatesMetadata { .. }));
        assert!(err.is_guard_violation());
        assert_eq!(fx.total_rows(), 0);
    }

    #[test]
    fn missed_with_keyed_row_is_refused() {
        let fx = Fixture::new();
        let mut visit = scheduled_visit();
        fx.engine.save_visit(&fx.conn, &visit).unwrap();
        fx.engine.save_form(&fx.conn, &FormInstance::crf(CRF_THREE, &visit)).unwrap();

        visit.reason = MISSED_VISIT.into();
        let result = fx.engine.save_visit(&fx.conn, &visit);
        assert!(matches!(result, Err(MetadataError::DeleteMetadata { .. })));
        assert_eq!(fx.total_rows(), 5);
    }

    #[test]
    fn delete_visit_with_all_crfs_keyed_is_refused() {
        let fx = Fixture::new();
        let visit = scheduled_visit();
        fx.engine.save_visit(&fx.conn, &visit).unwrap();
        for model in [CRF_ONE, CRF_TWO, CRF_THREE] {
            fx.engine.save_form(&fx.conn, &FormInstance::crf(model, &visit)).unwrap();
        }

        let result = fx.engine.delete_visit(&fx.conn, &visit);
        assert!(matches!(
            result,
            Err(MetadataError::DeleteMetadata { category: MetadataCategory::Crf, .. })
        ));
        assert_eq!(fx.total_rows(), 5);
    }

    #[test]
    fn delete_visit_without_keyed_rows() {
        let fx = Fixture::new();
        let visit = scheduled_visit();
        fx.engine.save_visit(&fx.conn, &visit).unwrap();
        assert_eq!(fx.engine.delete_visit(&fx.conn, &visit).unwrap(), 5);
        assert_eq!(fx.total_rows(), 0);
    }

    #[test]
    fn pre_delete_of_visit_runs_guard() {
        let fx = Fixture::new();
        let visit = scheduled_visit();
        fx.engine.save_visit(&fx.conn, &visit).unwrap();
        fx.engine.save_form(&fx.conn, &FormInstance::crf(CRF_ONE, &visit)).unwrap();
        assert!(fx.engine.pre_delete(&fx.conn, &visit).is_err());
    }

    #[test]
    fn rule_engine_runs_after_visit_save() {
        let fx = Fixture::with_rules(|conn: &Connection, visit: &Visit| -> Result<(), MetadataError> {
            set_entry_status(
                conn,
                MetadataCategory::Crf,
                &MetadataKey::for_visit(visit, CRF_THREE, None),
                EntryStatus::NotRequired,
            )?;
            Ok(())
        });
        let visit = scheduled_visit();
        fx.engine.save_visit(&fx.conn, &visit).unwrap();
        assert_eq!(crf_status(&fx, &visit, CRF_THREE), Some(EntryStatus::NotRequired));
        assert_eq!(crf_status(&fx, &visit, CRF_ONE), Some(EntryStatus::Required));
    }

    #[test]
    fn rule_engine_error_rolls_back_visit_save() {
        let fx = Fixture::with_rules(|_: &Connection, _: &Visit| -> Result<(), MetadataError> {
            Err(MetadataError::ImproperlyConfigured("rule group has no source model".into()))
        });
        let visit = scheduled_visit();
        assert!(fx.engine.save_visit(&fx.conn, &visit).is_err());
        assert_eq!(fx.total_rows(), 0);
    }

    #[test]
    fn untracked_form_is_a_no_op() {
        let fx = Fixture::new();
        let visit = scheduled_visit();
        fx.engine.save_visit(&fx.conn, &visit).unwrap();
        let form = FormInstance::crf("edc_metadata.subjectconsent", &visit);
        fx.engine.save_form(&fx.conn, &form).unwrap();
        fx.engine.post_save(&fx.conn, &form, false).unwrap();
        let keyed = list_metadata(
            &fx.conn,
            MetadataCategory::Crf,
            &MetadataFilter::for_visit(&visit).status(EntryStatus::Keyed),
        )
        .unwrap();
        assert!(keyed.is_empty());
    }

    #[test]
    fn untracked_participation_is_a_no_op() {
        struct AuditEntry;
        impl Tracked for AuditEntry {
            fn participation(&self) -> Participation<'_> {
                Participation::Untracked
            }
        }
        let fx = Fixture::new();
        fx.engine.post_save(&fx.conn, &AuditEntry, true).unwrap();
        fx.engine.pre_delete(&fx.conn, &AuditEntry).unwrap();
        assert_eq!(fx.total_rows(), 0);
    }

    #[test]
    fn hooks_join_caller_transaction() {
        let fx = Fixture::new();
        let visit = scheduled_visit();
        {
            let tx = fx.conn.unchecked_transaction().unwrap();
            fx.engine.post_save(&tx, &visit, true).unwrap();
            // dropped without commit
        }
        assert_eq!(fx.total_rows(), 0);
    }

    #[test]
    fn wrap_visit_metadata_reports_submitted_forms() {
        let fx = Fixture::new();
        let visit = scheduled_visit();
        fx.engine.save_visit(&fx.conn, &visit).unwrap();
        fx.engine.save_form(&fx.conn, &FormInstance::crf(CRF_TWO, &visit)).unwrap();

        let wrappers = fx.engine.wrap_visit_metadata(&fx.conn, &visit, MetadataCategory::Crf).unwrap();
        let submitted: Vec<_> = wrappers.iter().filter(|w| w.is_submitted()).map(|w| w.model()).collect();
        assert_eq!(submitted, vec![CRF_TWO]);
    }
}
