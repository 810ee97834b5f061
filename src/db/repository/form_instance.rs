use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use crate::db::DatabaseError;
use crate::models::*;

/// Insert a submitted form, or refresh it when the same id is saved again.
///
/// Returns true when the instance did not exist before.
pub fn upsert_form_instance(conn: &Connection, form: &FormInstance) -> Result<bool, DatabaseError> {
    let existed: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM form_instances WHERE id = ?1)",
        params![form.id.to_string()],
        |row| row.get(0),
    )?;

    conn.execute(
        "INSERT INTO form_instances (id, model, subject_identifier, visit_schedule_name,
         schedule_name, visit_code, visit_code_sequence, panel_name, report_datetime)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
         ON CONFLICT(id) DO UPDATE SET report_datetime = excluded.report_datetime",
        params![
            form.id.to_string(),
            form.model,
            form.visit.subject_identifier,
            form.visit.visit_schedule_name,
            form.visit.schedule_name,
            form.visit.visit_code,
            form.visit.visit_code_sequence,
            form.panel_name.as_deref().unwrap_or(""),
            form.report_datetime,
        ],
    )?;
    Ok(!existed)
}

pub fn delete_form_instance(conn: &Connection, id: &Uuid) -> Result<(), DatabaseError> {
    let deleted = conn.execute("DELETE FROM form_instances WHERE id = ?1", params![id.to_string()])?;
    if deleted == 0 {
        return Err(DatabaseError::NotFound {
            entity_type: "FormInstance".into(),
            id: id.to_string(),
        });
    }
    Ok(())
}

/// The instance of `model` submitted for this visit (and panel), if any.
pub fn get_form_instance_for_visit(
    conn: &Connection,
    model: &str,
    visit: &Visit,
    panel_name: Option<&str>,
) -> Result<Option<FormInstance>, DatabaseError> {
    let found = conn
        .query_row(
            "SELECT id, report_datetime FROM form_instances
             WHERE model = ?1 AND subject_identifier = ?2 AND visit_schedule_name = ?3
             AND schedule_name = ?4 AND visit_code = ?5 AND visit_code_sequence = ?6
             AND panel_name = ?7",
            params![
                model,
                visit.subject_identifier,
                visit.visit_schedule_name,
                visit.schedule_name,
                visit.visit_code,
                visit.visit_code_sequence,
                panel_name.unwrap_or(""),
            ],
            |row| Ok((row.get::<_, String>(0)?, row.get::<_, Option<DateTime<Utc>>>(1)?)),
        )
        .optional()?;

    let Some((id, report_datetime)) = found else {
        return Ok(None);
    };
    Ok(Some(FormInstance {
        id: Uuid::parse_str(&id).map_err(|e| DatabaseError::ConstraintViolation(e.to_string()))?,
        model: model.to_string(),
        visit: visit.clone(),
        panel_name: panel_name.map(str::to_string),
        report_datetime,
    }))
}
