//! Metadata handler: get-or-create, status update and guarded delete for one ledger row.

use chrono::Utc;
use rusqlite::Connection;

use super::error::MetadataError;
use super::traits::TargetLookup;
use crate::db::{delete_metadata, get_metadata, insert_metadata, update_metadata};
use crate::models::enums::*;
use crate::models::*;
use crate::schedule::{Crf, Requisition};

/// Handler bound to one (category, model, visit[, panel]) ledger key.
pub struct MetadataHandler<'a> {
    pub category: MetadataCategory,
    pub key: MetadataKey,
    pub show_order: i64,
    pub default_entry_status: EntryStatus,
    visit: &'a Visit,
    lookup: Option<&'a dyn TargetLookup>,
}

impl<'a> MetadataHandler<'a> {
    pub fn for_crf(visit: &'a Visit, crf: &Crf, lookup: Option<&'a dyn TargetLookup>) -> Self {
        Self {
            category: MetadataCategory::Crf,
            key: MetadataKey::for_visit(visit, &crf.model, None),
            show_order: crf.show_order,
            default_entry_status: crf.default_entry_status,
            visit,
            lookup,
        }
    }

    pub fn for_requisition(
        visit: &'a Visit,
        requisition: &Requisition,
        lookup: Option<&'a dyn TargetLookup>,
    ) -> Self {
        Self {
            category: MetadataCategory::Requisition,
            key: MetadataKey::for_visit(visit, &requisition.model, Some(&requisition.panel)),
            show_order: requisition.show_order,
            default_entry_status: requisition.default_entry_status,
            visit,
            lookup,
        }
    }

    /// Existing row for the key, or a new one at the schedule default. Idempotent.
    pub fn get_or_create(&self, conn: &Connection) -> Result<MetadataRow, MetadataError> {
        if let Some(row) = get_metadata(conn, self.category, &self.key)? {
            return Ok(row);
        }
        let row = MetadataRow::new(
            self.category,
            self.key.clone(),
            self.default_entry_status,
            self.show_order,
        );
        insert_metadata(conn, &row)?;
        tracing::debug!(row = %row, "Created metadata");
        Ok(row)
    }

    /// Reflect a create/update/delete of the target instance in the row.
    ///
    /// A delete only reverts an existing row; with no row it returns `None`
    /// and writes nothing.
    pub fn update(
        &self,
        conn: &Connection,
        change_type: ChangeType,
    ) -> Result<Option<MetadataRow>, MetadataError> {
        let original = match change_type {
            ChangeType::Created | ChangeType::Updated => self.get_or_create(conn)?,
            ChangeType::Deleted => match get_metadata(conn, self.category, &self.key)? {
                Some(row) => row,
                None => return Ok(None),
            },
        };
        let mut row = original.clone();

        match change_type {
            ChangeType::Created | ChangeType::Updated => match self.object(conn)? {
                Some(target) => {
                    if !row.is_keyed() {
                        row.fill_datetime = Some(Utc::now());
                    }
                    row.entry_status = EntryStatus::Keyed;
                    if target.report_datetime.is_some() {
                        row.report_datetime = target.report_datetime;
                    }
                }
                None if row.is_keyed() => self.reset(&mut row),
                None => {}
            },
            ChangeType::Deleted => self.reset(&mut row),
        }

        if row != original {
            update_metadata(conn, &row)?;
            tracing::debug!(
                model = %row.key.model,
                panel = ?row.key.panel_name,
                change = %change_type,
                from = %original.entry_status,
                to = %row.entry_status,
                "Updated metadata entry status"
            );
        }
        Ok(Some(row))
    }

    /// Delete the row unless it is KEYED. Returns false when there was no row.
    pub fn delete(&self, conn: &Connection) -> Result<bool, MetadataError> {
        let Some(row) = get_metadata(conn, self.category, &self.key)? else {
            return Ok(false);
        };
        if row.is_keyed() {
            return Err(MetadataError::DeleteMetadata {
                category: self.category,
                model: self.key.model.clone(),
                visit: self.visit.to_string(),
            });
        }
        delete_metadata(conn, self.category, &row.id)?;
        tracing::debug!(row = %row, "Deleted metadata");
        Ok(true)
    }

    /// The submitted target instance for this key, if any.
    pub fn object(&self, conn: &Connection) -> Result<Option<FormInstance>, MetadataError> {
        resolve_target(
            self.lookup,
            conn,
            &self.key.model,
            self.visit,
            self.key.panel_name.as_deref(),
        )
    }

    fn reset(&self, row: &mut MetadataRow) {
        row.entry_status = self.default_entry_status;
        row.report_datetime = None;
        row.fill_datetime = None;
    }
}

pub(crate) fn resolve_target(
    lookup: Option<&dyn TargetLookup>,
    conn: &Connection,
    model: &str,
    visit: &Visit,
    panel_name: Option<&str>,
) -> Result<Option<FormInstance>, MetadataError> {
    let lookup = lookup.ok_or_else(|| {
        MetadataError::ImproperlyConfigured(format!(
            "{model} has no visit lookup registered"
        ))
    })?;
    Ok(lookup.get_instance_for_visit(conn, model, visit, panel_name)?)
}
