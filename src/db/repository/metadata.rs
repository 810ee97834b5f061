use std::str::FromStr;

use chrono::{DateTime, Utc};
use rusqlite::types::ToSql;
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use crate::db::DatabaseError;
use crate::models::enums::*;
use crate::models::*;

type SqlParams = Vec<Box<dyn ToSql>>;

fn select_sql(category: MetadataCategory) -> String {
    let panel = match category {
        MetadataCategory::Crf => "NULL",
        MetadataCategory::Requisition => "panel_name",
    };
    format!(
        "SELECT id, subject_identifier, visit_schedule_name, schedule_name, visit_code,
         visit_code_sequence, model, {panel}, entry_status, show_order, current_entry_title,
         entry_comment, due_datetime, report_datetime, close_datetime, fill_datetime
         FROM {table}",
        table = category.table()
    )
}

/// WHERE clause for the unique-together key of a row.
fn key_clause(category: MetadataCategory, key: &MetadataKey) -> Result<(String, SqlParams), DatabaseError> {
    let mut sql = String::from(
        " WHERE subject_identifier = ?1 AND visit_schedule_name = ?2 AND schedule_name = ?3
          AND visit_code = ?4 AND visit_code_sequence = ?5 AND model = ?6",
    );
    let mut params_vec: SqlParams = vec![
        Box::new(key.subject_identifier.clone()),
        Box::new(key.visit_schedule_name.clone()),
        Box::new(key.schedule_name.clone()),
        Box::new(key.visit_code.clone()),
        Box::new(key.visit_code_sequence),
        Box::new(key.model.clone()),
    ];
    match (category, &key.panel_name) {
        (MetadataCategory::Requisition, Some(panel)) => {
            sql.push_str(" AND panel_name = ?7");
            params_vec.push(Box::new(panel.clone()));
        }
        (MetadataCategory::Crf, None) => {}
        (MetadataCategory::Requisition, None) => {
            return Err(DatabaseError::ConstraintViolation(format!(
                "requisition metadata key for {} has no panel_name",
                key.model
            )));
        }
        (MetadataCategory::Crf, Some(panel)) => {
            return Err(DatabaseError::ConstraintViolation(format!(
                "crf metadata key for {} carries panel_name {panel}",
                key.model
            )));
        }
    }
    Ok((sql, params_vec))
}

/// Append `AND ...` terms for every set field of the filter.
fn filter_clause(category: MetadataCategory, filter: &MetadataFilter) -> (String, SqlParams) {
    let mut sql = String::from(" WHERE 1=1");
    let mut params_vec: SqlParams = Vec::new();
    let mut push_term = |column: &str, value: Box<dyn ToSql>| {
        sql.push_str(&format!(" AND {column} = ?{}", params_vec.len() + 1));
        params_vec.push(value);
    };

    let text_terms = [
        ("subject_identifier", &filter.subject_identifier),
        ("visit_schedule_name", &filter.visit_schedule_name),
        ("schedule_name", &filter.schedule_name),
        ("visit_code", &filter.visit_code),
        ("model", &filter.model),
    ];
    for (column, value) in text_terms {
        if let Some(value) = value {
            push_term(column, Box::new(value.clone()));
        }
    }
    if let Some(seq) = filter.visit_code_sequence {
        push_term("visit_code_sequence", Box::new(seq));
    }
    if category == MetadataCategory::Requisition {
        if let Some(ref panel) = filter.panel_name {
            push_term("panel_name", Box::new(panel.clone()));
        }
    }
    if let Some(status) = filter.entry_status {
        push_term("entry_status", Box::new(status.as_str()));
    }

    (sql, params_vec)
}

fn as_refs(params_vec: &SqlParams) -> Vec<&dyn ToSql> {
    params_vec.iter().map(|p| p.as_ref()).collect()
}

/// Fetch the row for a key, if any.
pub fn get_metadata(
    conn: &Connection,
    category: MetadataCategory,
    key: &MetadataKey,
) -> Result<Option<MetadataRow>, DatabaseError> {
    let (clause, params_vec) = key_clause(category, key)?;
    let sql = format!("{}{clause}", select_sql(category));
    let raw = conn
        .query_row(&sql, as_refs(&params_vec).as_slice(), metadata_row_from_rusqlite)
        .optional()?;
    raw.map(|r| metadata_from_row(category, r)).transpose()
}

pub fn insert_metadata(conn: &Connection, row: &MetadataRow) -> Result<(), DatabaseError> {
    let category = row.category;
    match (category, &row.key.panel_name) {
        (MetadataCategory::Crf, None) => {
            conn.execute(
                "INSERT INTO crf_metadata (id, subject_identifier, visit_schedule_name,
                 schedule_name, visit_code, visit_code_sequence, model, entry_status, show_order,
                 current_entry_title, entry_comment, due_datetime, report_datetime,
                 close_datetime, fill_datetime)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
                params![
                    row.id.to_string(),
                    row.key.subject_identifier,
                    row.key.visit_schedule_name,
                    row.key.schedule_name,
                    row.key.visit_code,
                    row.key.visit_code_sequence,
                    row.key.model,
                    row.entry_status.as_str(),
                    row.show_order,
                    row.current_entry_title,
                    row.entry_comment,
                    row.due_datetime,
                    row.report_datetime,
                    row.close_datetime,
                    row.fill_datetime,
                ],
            )?;
        }
        (MetadataCategory::Requisition, Some(panel)) => {
            conn.execute(
                "INSERT INTO requisition_metadata (id, subject_identifier, visit_schedule_name,
                 schedule_name, visit_code, visit_code_sequence, model, panel_name, entry_status,
                 show_order, current_entry_title, entry_comment, due_datetime, report_datetime,
                 close_datetime, fill_datetime)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
                params![
                    row.id.to_string(),
                    row.key.subject_identifier,
                    row.key.visit_schedule_name,
                    row.key.schedule_name,
                    row.key.visit_code,
                    row.key.visit_code_sequence,
                    row.key.model,
                    panel,
                    row.entry_status.as_str(),
                    row.show_order,
                    row.current_entry_title,
                    row.entry_comment,
                    row.due_datetime,
                    row.report_datetime,
                    row.close_datetime,
                    row.fill_datetime,
                ],
            )?;
        }
        _ => {
            return Err(DatabaseError::ConstraintViolation(format!(
                "panel_name does not fit a {category} row for {}",
                row.key.model
            )));
        }
    }
    Ok(())
}

/// Persist the mutable fields of an existing row.
pub fn update_metadata(conn: &Connection, row: &MetadataRow) -> Result<(), DatabaseError> {
    let sql = format!(
        "UPDATE {} SET entry_status = ?1, show_order = ?2, current_entry_title = ?3,
         entry_comment = ?4, due_datetime = ?5, report_datetime = ?6, close_datetime = ?7,
         fill_datetime = ?8 WHERE id = ?9",
        row.category.table()
    );
    let updated = conn.execute(
        &sql,
        params![
            row.entry_status.as_str(),
            row.show_order,
            row.current_entry_title,
            row.entry_comment,
            row.due_datetime,
            row.report_datetime,
            row.close_datetime,
            row.fill_datetime,
            row.id.to_string(),
        ],
    )?;
    if updated == 0 {
        return Err(DatabaseError::NotFound {
            entity_type: row.category.table().into(),
            id: row.id.to_string(),
        });
    }
    Ok(())
}

/// Status-only write used by rule engines. Returns false when no row has the key.
pub fn set_entry_status(
    conn: &Connection,
    category: MetadataCategory,
    key: &MetadataKey,
    entry_status: EntryStatus,
) -> Result<bool, DatabaseError> {
    let (clause, mut params_vec) = key_clause(category, key)?;
    let idx = params_vec.len() + 1;
    let sql = format!(
        "UPDATE {} SET entry_status = ?{idx}{clause}",
        category.table()
    );
    params_vec.push(Box::new(entry_status.as_str()));
    let updated = conn.execute(&sql, as_refs(&params_vec).as_slice())?;
    Ok(updated > 0)
}

/// Bulk status write over every row matching the filter.
pub fn update_entry_status_where(
    conn: &Connection,
    category: MetadataCategory,
    filter: &MetadataFilter,
    entry_status: EntryStatus,
) -> Result<usize, DatabaseError> {
    let (clause, mut params_vec) = filter_clause(category, filter);
    let idx = params_vec.len() + 1;
    let sql = format!("UPDATE {} SET entry_status = ?{idx}{clause}", category.table());
    params_vec.push(Box::new(entry_status.as_str()));
    Ok(conn.execute(&sql, as_refs(&params_vec).as_slice())?)
}

pub fn delete_metadata(
    conn: &Connection,
    category: MetadataCategory,
    id: &Uuid,
) -> Result<(), DatabaseError> {
    let sql = format!("DELETE FROM {} WHERE id = ?1", category.table());
    let deleted = conn.execute(&sql, params![id.to_string()])?;
    if deleted == 0 {
        return Err(DatabaseError::NotFound {
            entity_type: category.table().into(),
            id: id.to_string(),
        });
    }
    Ok(())
}

/// Delete every matching row that is not KEYED. KEYED rows are never touched here.
pub fn delete_unkeyed_metadata(
    conn: &Connection,
    category: MetadataCategory,
    filter: &MetadataFilter,
) -> Result<usize, DatabaseError> {
    let (clause, params_vec) = filter_clause(category, filter);
    let sql = format!(
        "DELETE FROM {}{clause} AND entry_status != 'KEYED'",
        category.table()
    );
    Ok(conn.execute(&sql, as_refs(&params_vec).as_slice())?)
}

pub fn count_metadata(
    conn: &Connection,
    category: MetadataCategory,
    filter: &MetadataFilter,
) -> Result<usize, DatabaseError> {
    let (clause, params_vec) = filter_clause(category, filter);
    let sql = format!("SELECT COUNT(*) FROM {}{clause}", category.table());
    let count: i64 = conn.query_row(&sql, as_refs(&params_vec).as_slice(), |row| row.get(0))?;
    usize::try_from(count).map_err(|e| DatabaseError::ConstraintViolation(format!("row count {count}: {e}")))
}

/// Rows matching the filter, in show order.
pub fn list_metadata(
    conn: &Connection,
    category: MetadataCategory,
    filter: &MetadataFilter,
) -> Result<Vec<MetadataRow>, DatabaseError> {
    let (clause, params_vec) = filter_clause(category, filter);
    let order = match category {
        MetadataCategory::Crf => " ORDER BY show_order, model",
        MetadataCategory::Requisition => " ORDER BY show_order, model, panel_name",
    };
    let sql = format!("{}{clause}{order}", select_sql(category));

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(as_refs(&params_vec).as_slice(), metadata_row_from_rusqlite)?;

    let mut out = Vec::new();
    for row in rows {
        out.push(metadata_from_row(category, row?)?);
    }
    Ok(out)
}

// Internal row type for MetadataRow mapping
struct MetadataRowRaw {
    id: String,
    subject_identifier: String,
    visit_schedule_name: String,
    schedule_name: String,
    visit_code: String,
    visit_code_sequence: i64,
    model: String,
    panel_name: Option<String>,
    entry_status: String,
    show_order: i64,
    current_entry_title: Option<String>,
    entry_comment: Option<String>,
    due_datetime: Option<DateTime<Utc>>,
    report_datetime: Option<DateTime<Utc>>,
    close_datetime: Option<DateTime<Utc>>,
    fill_datetime: Option<DateTime<Utc>>,
}

fn metadata_row_from_rusqlite(row: &rusqlite::Row<'_>) -> Result<MetadataRowRaw, rusqlite::Error> {
    Ok(MetadataRowRaw {
        id: row.get(0)?,
        subject_identifier: row.get(1)?,
        visit_schedule_name: row.get(2)?,
        schedule_name: row.get(3)?,
        visit_code: row.get(4)?,
        visit_code_sequence: row.get(5)?,
        model: row.get(6)?,
        panel_name: row.get(7)?,
        entry_status: row.get(8)?,
        show_order: row.get(9)?,
        current_entry_title: row.get(10)?,
        entry_comment: row.get(11)?,
        due_datetime: row.get(12)?,
        report_datetime: row.get(13)?,
        close_datetime: row.get(14)?,
        fill_datetime: row.get(15)?,
    })
}

fn metadata_from_row(category: MetadataCategory, row: MetadataRowRaw) -> Result<MetadataRow, DatabaseError> {
    Ok(MetadataRow {
        id: Uuid::parse_str(&row.id).map_err(|e| DatabaseError::ConstraintViolation(e.to_string()))?,
        category,
        key: MetadataKey {
            subject_identifier: row.subject_identifier,
            visit_schedule_name: row.visit_schedule_name,
            schedule_name: row.schedule_name,
            visit_code: row.visit_code,
            visit_code_sequence: row.visit_code_sequence,
            model: row.model,
            panel_name: row.panel_name,
        },
        entry_status: EntryStatus::from_str(&row.entry_status)?,
        show_order: row.show_order,
        current_entry_title: row.current_entry_title,
        entry_comment: row.entry_comment,
        due_datetime: row.due_datetime,
        report_datetime: row.report_datetime,
        close_datetime: row.close_datetime,
        fill_datetime: row.fill_datetime,
    })
}
