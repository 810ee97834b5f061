//! Seams to the collaborators the ledger consumes but does not own.
//!
//! - RuleEngine: re-evaluates conditional entry statuses after reconciliation
//! - TargetLookup: finds the submitted form for a (model, visit[, panel])
//! - Tracked: lets a saved/deleted value say what it is to the lifecycle hooks

use rusqlite::Connection;

use super::error::MetadataError;
use crate::db::{get_form_instance_for_visit, DatabaseError};
use crate::models::{FormInstance, Visit};

/// External condition → entry_status engine.
///
/// Implementations write their decisions back into the ledger, typically
/// through `db::set_entry_status` or `db::update_entry_status_where`.
pub trait RuleEngine: Send + Sync {
    fn update_rules_for_source(&self, conn: &Connection, visit: &Visit) -> Result<(), MetadataError>;
}

/// Rule engine for deployments without conditional rules.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopRuleEngine;

impl RuleEngine for NoopRuleEngine {
    fn update_rules_for_source(&self, _conn: &Connection, _visit: &Visit) -> Result<(), MetadataError> {
        Ok(())
    }
}

impl<F> RuleEngine for F
where
    F: Fn(&Connection, &Visit) -> Result<(), MetadataError> + Send + Sync,
{
    fn update_rules_for_source(&self, conn: &Connection, visit: &Visit) -> Result<(), MetadataError> {
        self(conn, visit)
    }
}

/// Visit-relation accessor of a target model.
pub trait TargetLookup: Send + Sync {
    /// `Ok(None)` means nothing has been submitted yet; that is not an error.
    fn get_instance_for_visit(
        &self,
        conn: &Connection,
        model: &str,
        visit: &Visit,
        panel_name: Option<&str>,
    ) -> Result<Option<FormInstance>, DatabaseError>;
}

/// Lookup over the bundled `form_instances` table.
#[derive(Debug, Default, Clone, Copy)]
pub struct SqliteFormStore;

impl TargetLookup for SqliteFormStore {
    fn get_instance_for_visit(
        &self,
        conn: &Connection,
        model: &str,
        visit: &Visit,
        panel_name: Option<&str>,
    ) -> Result<Option<FormInstance>, DatabaseError> {
        get_form_instance_for_visit(conn, model, visit, panel_name)
    }
}

/// What a persisted value is, from the ledger's point of view.
#[derive(Debug, Clone, Copy)]
pub enum Participation<'a> {
    Visit(&'a Visit),
    Form(&'a FormInstance),
    Untracked,
}

/// Declared once per type instead of discovered per call.
pub trait Tracked {
    fn participation(&self) -> Participation<'_>;
}

impl Tracked for Visit {
    fn participation(&self) -> Participation<'_> {
        Participation::Visit(self)
    }
}

impl Tracked for FormInstance {
    fn participation(&self) -> Participation<'_> {
        Participation::Form(self)
    }
}
