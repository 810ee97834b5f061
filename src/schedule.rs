//! Visit schedule definitions: which CRFs and requisition panels belong to which visit.
//!
//! The registry is built once at bootstrap (in code or from JSON) and handed
//! to the engine; nothing here is process-global.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::metadata::MetadataError;
use crate::models::enums::EntryStatus;

/// A CRF declared for a visit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Crf {
    pub model: String,
    pub show_order: i64,
    #[serde(default)]
    pub default_entry_status: EntryStatus,
}

/// A requisition panel declared for a visit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Requisition {
    pub model: String,
    pub panel: String,
    pub show_order: i64,
    #[serde(default)]
    pub default_entry_status: EntryStatus,
}

impl Crf {
    pub fn new(model: impl Into<String>, show_order: i64) -> Self {
        Self {
            model: model.into(),
            show_order,
            default_entry_status: EntryStatus::Required,
        }
    }

    pub fn not_required(mut self) -> Self {
        self.default_entry_status = EntryStatus::NotRequired;
        self
    }
}

impl Requisition {
    pub fn new(model: impl Into<String>, panel: impl Into<String>, show_order: i64) -> Self {
        Self {
            model: model.into(),
            panel: panel.into(),
            show_order,
            default_entry_status: EntryStatus::Required,
        }
    }

    pub fn not_required(mut self) -> Self {
        self.default_entry_status = EntryStatus::NotRequired;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VisitDefinition {
    pub code: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub crfs: Vec<Crf>,
    #[serde(default)]
    pub requisitions: Vec<Requisition>,
}

impl VisitDefinition {
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            title: None,
            crfs: Vec::new(),
            requisitions: Vec::new(),
        }
    }

    pub fn crf(mut self, crf: Crf) -> Self {
        self.crfs.push(crf);
        self
    }

    pub fn requisition(mut self, requisition: Requisition) -> Self {
        self.requisitions.push(requisition);
        self
    }

    pub fn get_crf(&self, model: &str) -> Option<&Crf> {
        self.crfs.iter().find(|c| c.model == model)
    }

    pub fn get_requisition(&self, model: &str, panel: &str) -> Option<&Requisition> {
        self.requisitions
            .iter()
            .find(|r| r.model == model && r.panel == panel)
    }

    /// CRFs sorted by show order.
    pub fn ordered_crfs(&self) -> Vec<&Crf> {
        let mut crfs: Vec<&Crf> = self.crfs.iter().collect();
        crfs.sort_by_key(|c| c.show_order);
        crfs
    }

    /// Requisitions sorted by show order.
    pub fn ordered_requisitions(&self) -> Vec<&Requisition> {
        let mut requisitions: Vec<&Requisition> = self.requisitions.iter().collect();
        requisitions.sort_by_key(|r| r.show_order);
        requisitions
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schedule {
    pub visit_schedule_name: String,
    pub name: String,
    pub visits: Vec<VisitDefinition>,
}

impl Schedule {
    pub fn new(visit_schedule_name: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            visit_schedule_name: visit_schedule_name.into(),
            name: name.into(),
            visits: Vec::new(),
        }
    }

    pub fn visit_definition(mut self, visit: VisitDefinition) -> Self {
        self.visits.push(visit);
        self
    }

    pub fn visit(&self, code: &str) -> Option<&VisitDefinition> {
        self.visits.iter().find(|v| v.code == code)
    }

    /// True if any visit of this schedule declares the CRF.
    pub fn knows_crf(&self, model: &str) -> bool {
        self.visits.iter().any(|v| v.get_crf(model).is_some())
    }

    /// True if any visit of this schedule declares the panel for the requisition model.
    pub fn knows_panel(&self, model: &str, panel: &str) -> bool {
        self.visits
            .iter()
            .any(|v| v.get_requisition(model, panel).is_some())
    }

    /// Every (model, panel) referenced anywhere in the schedule.
    pub fn requisition_panels(&self) -> Vec<(&str, &str)> {
        let mut seen: Vec<(&str, &str)> = Vec::new();
        for r in self.visits.iter().flat_map(|v| v.requisitions.iter()) {
            let pair = (r.model.as_str(), r.panel.as_str());
            if !seen.contains(&pair) {
                seen.push(pair);
            }
        }
        seen
    }

    /// Every CRF model referenced anywhere in the schedule.
    pub fn crf_models(&self) -> Vec<&str> {
        let mut seen: Vec<&str> = Vec::new();
        for c in self.visits.iter().flat_map(|v| v.crfs.iter()) {
            if !seen.contains(&c.model.as_str()) {
                seen.push(c.model.as_str());
            }
        }
        seen
    }
}

/// All schedules known to the application, keyed by (visit_schedule_name, schedule_name).
#[derive(Debug, Clone, Default)]
pub struct ScheduleRegistry {
    schedules: BTreeMap<(String, String), Schedule>,
}

impl ScheduleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, schedule: Schedule) -> Result<(), MetadataError> {
        let key = (schedule.visit_schedule_name.clone(), schedule.name.clone());
        if self.schedules.contains_key(&key) {
            return Err(MetadataError::Config(format!(
                "schedule {}.{} is already registered",
                key.0, key.1
            )));
        }
        tracing::debug!(
            visit_schedule = %key.0,
            schedule = %key.1,
            visits = schedule.visits.len(),
            "Registered schedule"
        );
        self.schedules.insert(key, schedule);
        Ok(())
    }

    pub fn get_schedule(
        &self,
        visit_schedule_name: &str,
        schedule_name: &str,
    ) -> Result<&Schedule, MetadataError> {
        self.schedules
            .get(&(visit_schedule_name.to_string(), schedule_name.to_string()))
            .ok_or_else(|| MetadataError::ScheduleNotFound {
                visit_schedule_name: visit_schedule_name.into(),
                schedule_name: schedule_name.into(),
            })
    }

    pub fn schedules(&self) -> impl Iterator<Item = &Schedule> {
        self.schedules.values()
    }

    /// Parse a JSON array of schedules.
    pub fn from_json(json: &str) -> Result<Self, MetadataError> {
        let schedules: Vec<Schedule> = serde_json::from_str(json)
            .map_err(|e| MetadataError::Config(format!("invalid schedule JSON: {e}")))?;
        let mut registry = Self::new();
        for schedule in schedules {
            registry.register(schedule)?;
        }
        Ok(registry)
    }

    pub fn load(path: &Path) -> Result<Self, MetadataError> {
        let json = std::fs::read_to_string(path)
            .map_err(|e| MetadataError::Config(format!("cannot read {}: {e}", path.display())))?;
        Self::from_json(&json)
    }
}
