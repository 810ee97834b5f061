use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::visit::Visit;

/// A submitted CRF or requisition, attached to the visit it was collected at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormInstance {
    pub id: Uuid,
    /// Model label, e.g. `edc_metadata.crfone`.
    pub model: String,
    pub visit: Visit,
    /// Requisitions only.
    pub panel_name: Option<String>,
    pub report_datetime: Option<DateTime<Utc>>,
}

impl FormInstance {
    pub fn crf(model: impl Into<String>, visit: &Visit) -> Self {
        Self {
            id: Uuid::new_v4(),
            model: model.into(),
            visit: visit.clone(),
            panel_name: None,
            report_datetime: visit.report_datetime,
        }
    }

    pub fn requisition(model: impl Into<String>, visit: &Visit, panel_name: impl Into<String>) -> Self {
        Self {
            panel_name: Some(panel_name.into()),
            ..Self::crf(model, visit)
        }
    }

    pub fn with_report_datetime(mut self, report_datetime: DateTime<Utc>) -> Self {
        self.report_datetime = Some(report_datetime);
        self
    }
}
