//! Shared test setup: the reference schedule and an engine wired to an in-memory ledger.

use std::sync::Arc;

use rusqlite::Connection;

use crate::db::open_memory_database;
use crate::metadata::{MetadataEngine, ModelRegistry, RuleEngine, SqliteFormStore};
use crate::models::enums::MetadataCategory;
use crate::models::{MetadataFilter, Visit, SCHEDULED};
use crate::schedule::{Crf, Requisition, Schedule, ScheduleRegistry, VisitDefinition};

pub const SUBJECT: &str = "1111111";
pub const VISIT_SCHEDULE: &str = "visit_schedule";
pub const SCHEDULE: &str = "schedule";
pub const VISIT_CODE: &str = "1000";
pub const SUBJECT_VISIT: &str = "edc_metadata.subjectvisit";

pub const CRF_ONE: &str = "edc_metadata.crfone";
pub const CRF_TWO: &str = "edc_metadata.crftwo";
pub const CRF_THREE: &str = "edc_metadata.crfthree";
pub const CRF_SEVEN: &str = "edc_metadata.crfseven";
pub const SUBJECT_REQUISITION: &str = "edc_metadata.subjectrequisition";

pub const PANEL_ONE: &str = "one";
pub const PANEL_TWO: &str = "two";
pub const PANEL_SEVEN: &str = "seven";

pub fn test_db() -> Connection {
    open_memory_database().unwrap()
}

/// Subject 1111111 attending visit 1000 as scheduled.
pub fn scheduled_visit() -> Visit {
    Visit::new(SUBJECT, VISIT_SCHEDULE, SCHEDULE, VISIT_CODE, SCHEDULED)
}

pub fn reference_schedule() -> Schedule {
    Schedule::new(VISIT_SCHEDULE, SCHEDULE)
        .visit_definition(
            VisitDefinition::new(VISIT_CODE)
                .crf(Crf::new(CRF_ONE, 1))
                .crf(Crf::new(CRF_TWO, 2))
                .crf(Crf::new(CRF_THREE, 3))
                .requisition(Requisition::new(SUBJECT_REQUISITION, PANEL_ONE, 1))
                .requisition(Requisition::new(SUBJECT_REQUISITION, PANEL_TWO, 2)),
        )
        .visit_definition(
            VisitDefinition::new("2000")
                .crf(Crf::new(CRF_SEVEN, 1))
                .requisition(Requisition::new(SUBJECT_REQUISITION, PANEL_SEVEN, 1)),
        )
}

pub fn reference_schedules() -> ScheduleRegistry {
    let mut schedules = ScheduleRegistry::new();
    schedules.register(reference_schedule()).unwrap();
    schedules
}

pub fn reference_models() -> ModelRegistry {
    let store = Arc::new(SqliteFormStore);
    let mut models = ModelRegistry::new();
    models
        .register_visit_model(SUBJECT_VISIT)
        .register_crf(CRF_ONE, store.clone())
        .register_crf(CRF_TWO, store.clone())
        .register_crf(CRF_THREE, store.clone())
        .register_crf(CRF_SEVEN, store.clone())
        .register_requisition(SUBJECT_REQUISITION, store);
    models
}

pub struct Fixture {
    pub conn: Connection,
    pub engine: MetadataEngine,
}

impl Fixture {
    pub fn new() -> Self {
        Self {
            conn: test_db(),
            engine: MetadataEngine::new(reference_schedules(), reference_models()).unwrap(),
        }
    }

    pub fn with_rules(rules: impl RuleEngine + 'static) -> Self {
        let fx = Self::new();
        Self {
            conn: fx.conn,
            engine: fx.engine.with_rule_engine(rules),
        }
    }

    /// Rows of every subject and visit, across both ledgers.
    pub fn total_rows(&self) -> usize {
        MetadataCategory::ALL
            .iter()
            .map(|c| crate::db::count_metadata(&self.conn, *c, &MetadataFilter::default()).unwrap())
            .sum()
    }
}
