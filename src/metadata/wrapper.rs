//! Read-side pairing of a ledger row with its submitted instance, if any.
//!
//! Wrapping is not side-effect free: a row naming a model that is no longer
//! registered is deleted on sight and reported as `DeletedInvalidMetadata`.

use std::collections::BTreeMap;

use rusqlite::Connection;

use super::error::MetadataError;
use super::handler::resolve_target;
use super::registry::{ModelRegistry, Participant};
use crate::db::{delete_metadata, list_metadata, DatabaseError};
use crate::models::enums::MetadataCategory;
use crate::models::*;

#[derive(Debug, Clone)]
pub struct MetadataWrapper {
    pub visit: Visit,
    pub metadata_obj: MetadataRow,
    pub model_obj: Option<FormInstance>,
}

impl MetadataWrapper {
    pub fn new(
        conn: &Connection,
        models: &ModelRegistry,
        visit: &Visit,
        metadata_obj: MetadataRow,
    ) -> Result<Self, MetadataError> {
        if !metadata_obj.key.matches_visit(visit) {
            return Err(MetadataError::MetadataWrapper(format!(
                "Visit mismatch. Visit is {} {}.{} but metadata object has {}.{}. Got {metadata_obj}.",
                visit.subject_identifier,
                visit.visit_code,
                visit.visit_code_sequence,
                metadata_obj.key.visit_code,
                metadata_obj.key.visit_code_sequence,
            )));
        }

        let model = metadata_obj.key.model.as_str();
        if !models.contains(model) {
            return Err(delete_invalid_metadata(conn, &metadata_obj)?);
        }
        let lookup = match models.participant(model) {
            Participant::TrackedForm(form) => form.lookup.as_deref(),
            Participant::Visit | Participant::Untracked => {
                return Err(MetadataError::ImproperlyConfigured(format!(
                    "{model} is registered but is not a tracked form. See {metadata_obj}"
                )));
            }
        };

        let model_obj = resolve_target(
            lookup,
            conn,
            model,
            visit,
            metadata_obj.key.panel_name.as_deref(),
        )?;

        Ok(Self {
            visit: visit.clone(),
            metadata_obj,
            model_obj,
        })
    }

    pub fn model(&self) -> &str {
        self.metadata_obj.model()
    }

    /// True when the form for this row has been submitted.
    pub fn is_submitted(&self) -> bool {
        self.model_obj.is_some()
    }
}

/// Delete a row that names an unknown model and return the error reporting it.
fn delete_invalid_metadata(conn: &Connection, row: &MetadataRow) -> Result<MetadataError, MetadataError> {
    match delete_metadata(conn, row.category, &row.id) {
        Ok(()) | Err(DatabaseError::NotFound { .. }) => {}
        Err(e) => return Err(e.into()),
    }
    tracing::warn!(row = %row, model = %row.key.model, "Deleted invalid metadata");
    Ok(MetadataError::DeletedInvalidMetadata { row: row.to_string() })
}

/// Wrap every row of the visit in one ledger, skipping rows removed as invalid.
pub fn wrap_visit_metadata(
    conn: &Connection,
    models: &ModelRegistry,
    visit: &Visit,
    category: MetadataCategory,
) -> Result<Vec<MetadataWrapper>, MetadataError> {
    let mut wrappers = Vec::new();
    for row in list_metadata(conn, category, &MetadataFilter::for_visit(visit))? {
        match MetadataWrapper::new(conn, models, visit, row) {
            Ok(wrapper) => wrappers.push(wrapper),
            Err(MetadataError::DeletedInvalidMetadata { row }) => {
                tracing::warn!(row = %row, "Skipped invalid metadata");
            }
            Err(e) => return Err(e),
        }
    }
    Ok(wrappers)
}

/// All ledger rows of a visit, per category, in show order.
pub fn visit_metadata(
    conn: &Connection,
    visit: &Visit,
) -> Result<BTreeMap<MetadataCategory, Vec<MetadataRow>>, MetadataError> {
    let filter = MetadataFilter::for_visit(visit);
    let mut out = BTreeMap::new();
    for category in MetadataCategory::ALL {
        out.insert(category, list_metadata(conn, category, &filter)?);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{count_metadata, upsert_form_instance};
    use crate::test_fixtures::*;

    fn crf_row(fx: &Fixture, visit: &Visit, model: &str) -> MetadataRow {
        list_metadata(
            &fx.conn,
            MetadataCategory::Crf,
            &MetadataFilter::for_visit(visit).model(model),
        )
        .unwrap()
        .remove(0)
    }

    #[test]
    fn wraps_row_with_submitted_instance() {
        let fx = Fixture::new();
        let visit = scheduled_visit();
        fx.engine.updater(&visit).create_all(&fx.conn).unwrap();
        let form = FormInstance::crf(CRF_ONE, &visit);
        upsert_form_instance(&fx.conn, &form).unwrap();

        let wrapper = fx.engine.wrapper(&fx.conn, &visit, crf_row(&fx, &visit, CRF_ONE)).unwrap();
        assert!(wrapper.is_submitted());
        assert_eq!(wrapper.model_obj.map(|f| f.id), Some(form.id));

        let wrapper = fx.engine.wrapper(&fx.conn, &visit, crf_row(&fx, &visit, CRF_TWO)).unwrap();
        assert!(!wrapper.is_submitted());
    }

    #[test]
    fn visit_code_mismatch_is_wrapper_error() {
        let fx = Fixture::new();
        let visit = scheduled_visit();
        fx.engine.updater(&visit).create_all(&fx.conn).unwrap();
        let row = crf_row(&fx, &visit, CRF_ONE);

        let other = visit.clone().with_sequence(1);
        let result = fx.engine.wrapper(&fx.conn, &other, row.clone());
        assert!(matches!(result, Err(MetadataError::MetadataWrapper(_))));

        let mut other_subject = visit.clone();
        other_subject.subject_identifier = "2222222".into();
        let result = fx.engine.wrapper(&fx.conn, &other_subject, row);
        assert!(matches!(result, Err(MetadataError::MetadataWrapper(_))));
    }

    #[test]
    fn unknown_model_row_is_deleted() {
        let mut fx = Fixture::new();
        let visit = scheduled_visit();
        fx.engine.updater(&visit).create_all(&fx.conn).unwrap();
        let row = crf_row(&fx, &visit, CRF_THREE);

        fx.engine.models_mut().unregister(CRF_THREE);
        let result = fx.engine.wrapper(&fx.conn, &visit, row);
        assert!(matches!(result, Err(MetadataError::DeletedInvalidMetadata { .. })));
        let remaining = count_metadata(
            &fx.conn,
            MetadataCategory::Crf,
            &MetadataFilter::for_visit(&visit).model(CRF_THREE),
        )
        .unwrap();
        assert_eq!(remaining, 0);
    }

    #[test]
    fn tracked_form_without_lookup_is_not_deleted() {
        let mut fx = Fixture::new();
        let visit = scheduled_visit();
        fx.engine.updater(&visit).create_all(&fx.conn).unwrap();
        let row = crf_row(&fx, &visit, CRF_TWO);

        fx.engine.models_mut().register_form(CRF_TWO, MetadataCategory::Crf, None);
        let result = fx.engine.wrapper(&fx.conn, &visit, row);
        assert!(matches!(result, Err(MetadataError::ImproperlyConfigured(_))));
        assert_eq!(
            count_metadata(&fx.conn, MetadataCategory::Crf, &MetadataFilter::for_visit(&visit)).unwrap(),
            3
        );
    }

    #[test]
    fn wrap_visit_metadata_skips_invalid_rows() {
        let mut fx = Fixture::new();
        let visit = scheduled_visit();
        fx.engine.updater(&visit).create_all(&fx.conn).unwrap();
        fx.engine.models_mut().unregister(CRF_TWO);

        let wrappers = wrap_visit_metadata(&fx.conn, fx.engine.models(), &visit, MetadataCategory::Crf).unwrap();
        let models: Vec<_> = wrappers.iter().map(|w| w.model()).collect();
        assert_eq!(models, vec![CRF_ONE, CRF_THREE]);
    }

    #[test]
    fn visit_metadata_matches_schedule() {
        let fx = Fixture::new();
        let visit = scheduled_visit();
        fx.engine.updater(&visit).create_all(&fx.conn).unwrap();

        let mut actual: Vec<String> = visit_metadata(&fx.conn, &visit)
            .unwrap()
            .into_values()
            .flatten()
            .map(|r| r.key.model)
            .collect();
        actual.sort();

        let schedule = fx.engine.schedules().get_schedule(VISIT_SCHEDULE, SCHEDULE).unwrap();
        let definition = schedule.visit(VISIT_CODE).unwrap();
        let mut expected: Vec<String> = definition.crfs.iter().map(|c| c.model.clone()).collect();
        expected.extend(definition.requisitions.iter().map(|r| r.model.clone()));
        expected.sort();

        assert_eq!(actual, expected);
    }
}
