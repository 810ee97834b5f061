//! Model registry: explicit record of which model labels take part in metadata tracking.

use std::collections::BTreeMap;
use std::sync::Arc;

use super::error::MetadataError;
use super::traits::TargetLookup;
use crate::models::enums::MetadataCategory;
use crate::schedule::Schedule;

/// A CRF or requisition model whose instances drive ledger rows.
#[derive(Clone)]
pub struct TrackedForm {
    pub category: MetadataCategory,
    /// `None` when the model was registered without a visit accessor.
    pub lookup: Option<Arc<dyn TargetLookup>>,
}

impl std::fmt::Debug for TrackedForm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrackedForm")
            .field("category", &self.category)
            .field("lookup", &self.lookup.is_some())
            .finish()
    }
}

#[derive(Debug, Clone)]
pub enum Participant {
    Visit,
    TrackedForm(TrackedForm),
    Untracked,
}

static UNTRACKED: Participant = Participant::Untracked;

#[derive(Debug, Clone, Default)]
pub struct ModelRegistry {
    models: BTreeMap<String, Participant>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_visit_model(&mut self, label: impl Into<String>) -> &mut Self {
        self.models.insert(label.into(), Participant::Visit);
        self
    }

    pub fn register_crf(&mut self, label: impl Into<String>, lookup: Arc<dyn TargetLookup>) -> &mut Self {
        self.register_form(label, MetadataCategory::Crf, Some(lookup))
    }

    pub fn register_requisition(&mut self, label: impl Into<String>, lookup: Arc<dyn TargetLookup>) -> &mut Self {
        self.register_form(label, MetadataCategory::Requisition, Some(lookup))
    }

    pub fn register_form(
        &mut self,
        label: impl Into<String>,
        category: MetadataCategory,
        lookup: Option<Arc<dyn TargetLookup>>,
    ) -> &mut Self {
        self.models.insert(
            label.into(),
            Participant::TrackedForm(TrackedForm { category, lookup }),
        );
        self
    }

    pub fn unregister(&mut self, label: &str) -> Option<Participant> {
        self.models.remove(label)
    }

    /// True if the label names a live model.
    pub fn contains(&self, label: &str) -> bool {
        self.models.contains_key(label)
    }

    /// Unregistered labels are untracked.
    pub fn participant(&self, label: &str) -> &Participant {
        self.models.get(label).unwrap_or(&UNTRACKED)
    }

    pub fn tracked_form(&self, label: &str) -> Option<&TrackedForm> {
        match self.models.get(label) {
            Some(Participant::TrackedForm(form)) => Some(form),
            _ => None,
        }
    }

    /// Every model a schedule names must be registered as a tracked form of the right kind.
    pub fn validate_schedule(&self, schedule: &Schedule) -> Result<(), MetadataError> {
        let crfs = schedule
            .crf_models()
            .into_iter()
            .map(|m| (m, MetadataCategory::Crf));
        let requisitions = schedule
            .requisition_panels()
            .into_iter()
            .map(|(m, _)| (m, MetadataCategory::Requisition));

        for (model, category) in crfs.chain(requisitions) {
            match self.tracked_form(model) {
                Some(form) if form.category == category => {}
                Some(form) => {
                    return Err(MetadataError::MetadataManager(format!(
                        "{model} is scheduled as a {category} in {}.{} but registered as a {}",
                        schedule.visit_schedule_name, schedule.name, form.category
                    )));
                }
                None => {
                    return Err(MetadataError::MetadataManager(format!(
                        "{model} is scheduled in {}.{} but is not registered for metadata tracking",
                        schedule.visit_schedule_name, schedule.name
                    )));
                }
            }
        }
        Ok(())
    }
}
