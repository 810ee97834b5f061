use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::metadata::MetadataError;
use crate::models::visit::{MISSED_VISIT, SCHEDULED, UNSCHEDULED};

/// Application-level constants
pub const APP_NAME: &str = "VisitMetadata";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Platform data dir (e.g. ~/.local/share/VisitMetadata), or ./VisitMetadata when there is none.
pub fn app_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_NAME)
}

/// Default location of the ledger database
pub fn default_database_path() -> PathBuf {
    app_data_dir().join("metadata.db")
}

/// Log filter used when `RUST_LOG` is not set
pub fn default_log_filter() -> String {
    "visit_metadata=info".to_string()
}

/// Whether a visit reason means metadata should exist for the visit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReasonClass {
    /// The subject attended; the schedule's forms are expected.
    Active,
    /// The visit did not take place; no forms are expected.
    Inactive,
}

/// Visit reasons that create metadata, and those that remove it.
///
/// Any reason in neither list is rejected by the updater.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReasonPolicy {
    #[serde(default = "default_active_reasons")]
    pub active: Vec<String>,
    #[serde(default = "default_inactive_reasons")]
    pub inactive: Vec<String>,
}

fn default_active_reasons() -> Vec<String> {
    vec![SCHEDULED.to_string(), UNSCHEDULED.to_string()]
}

fn default_inactive_reasons() -> Vec<String> {
    vec![MISSED_VISIT.to_string()]
}

impl Default for ReasonPolicy {
    fn default() -> Self {
        Self {
            active: default_active_reasons(),
            inactive: default_inactive_reasons(),
        }
    }
}

impl ReasonPolicy {
    /// `None` for a reason the policy does not know.
    pub fn classify(&self, reason: &str) -> Option<ReasonClass> {
        if self.active.iter().any(|r| r == reason) {
            Some(ReasonClass::Active)
        } else if self.inactive.iter().any(|r| r == reason) {
            Some(ReasonClass::Inactive)
        } else {
            None
        }
    }

    fn validate(&self) -> Result<(), MetadataError> {
        if let Some(both) = self.active.iter().find(|r| self.inactive.contains(r)) {
            return Err(MetadataError::Config(format!(
                "visit reason '{both}' is listed as both active and inactive"
            )));
        }
        Ok(())
    }
}

/// Runtime configuration, loadable from a JSON file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerConfig {
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
    #[serde(default)]
    pub reasons: ReasonPolicy,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            log_filter: default_log_filter(),
            reasons: ReasonPolicy::default(),
        }
    }
}

impl LedgerConfig {
    pub fn from_json(json: &str) -> Result<Self, MetadataError> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| MetadataError::Config(format!("invalid configuration: {e}")))?;
        config.reasons.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, MetadataError> {
        let json = std::fs::read_to_string(path)
            .map_err(|e| MetadataError::Config(format!("cannot read {}: {e}", path.display())))?;
        Self::from_json(&json)
    }
}
