pub mod config;
pub mod db;
pub mod metadata;
pub mod models;
pub mod schedule;

#[cfg(test)]
mod test_fixtures;

pub use metadata::{MetadataEngine, MetadataError};

use tracing_subscriber::EnvFilter;

/// Install the global fmt subscriber. `RUST_LOG` wins over `filter`.
///
/// Returns false if a subscriber was already installed.
pub fn init_tracing(filter: &str) -> bool {
    let installed = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .try_init()
        .is_ok();
    if installed {
        tracing::info!("Visit metadata ledger v{}", config::APP_VERSION);
    }
    installed
}

/// Open the configured ledger database and build the engine around it.
pub fn bootstrap(
    config: &config::LedgerConfig,
    schedules: schedule::ScheduleRegistry,
    models: metadata::ModelRegistry,
) -> Result<(rusqlite::Connection, MetadataEngine), MetadataError> {
    init_tracing(&config.log_filter);
    let conn = db::open_database(&config.database_path)?;
    let engine = MetadataEngine::new(schedules, models)?.with_reason_policy(config.reasons.clone());
    Ok((conn, engine))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_fixtures::*;

    #[test]
    fn init_tracing_is_idempotent() {
        init_tracing("visit_metadata=debug");
        assert!(!init_tracing("visit_metadata=debug"));
    }

    #[test]
    fn bootstrap_opens_file_database() {
        let dir = tempfile::tempdir().unwrap();
        let config = config::LedgerConfig {
            database_path: dir.path().join("ledger").join("metadata.db"),
            ..Default::default()
        };
        let (conn, engine) = bootstrap(&config, reference_schedules(), reference_models()).unwrap();
        engine.save_visit(&conn, &scheduled_visit()).unwrap();
        assert!(config.database_path.exists());
    }
}
