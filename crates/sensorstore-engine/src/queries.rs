//! Query entry points: materialized lists, counts, extrema, envelopes, and
//! streaming cursors over translated filters.
//!
//! Rows come back as [`ObservationRecord`]s with every interned reference
//! resolved to its natural key, so upstream layers never see row ids.

use chrono::{DateTime, Utc};
use roaring::RoaringBitmap;

use sensorstore_model::{
    Envelope, Geometry, IndeterminateTime, NamedValue, ObservationFilter, ObservationValue,
    ParameterValue, PhenomenonTime, ReferenceKind, TimeExtrema, TimePeriod,
};

use crate::cursor::ObservationCursor;
use crate::error::{Result, StoreError};
use crate::extrema;
use crate::store::{
    ObservationRow, Session, StoreInner, TypedParameterValue, TypedValue,
};
use crate::translate::{self, matched_envelope, ObservationQuery, QueryOrdering};

/// A materialized observation with all identities resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct ObservationRecord {
    pub identifier: String,
    pub procedure: String,
    pub observable_property: String,
    pub feature_of_interest: String,
    pub offerings: Vec<String>,
    pub value: ObservationValue,
    pub phenomenon_time: PhenomenonTime,
    pub result_time: DateTime<Utc>,
    pub valid_time: Option<TimePeriod>,
    pub deleted: bool,
    pub sampling_geometry: Option<Geometry>,
    pub parameters: Vec<NamedValue>,
}

/// Materialize all observations matching the filter, in query order.
/// An indeterminate-time request narrows to the tied extremum set first.
pub fn fetch(session: &Session, filter: &ObservationFilter) -> Result<Vec<ObservationRecord>> {
    let query = translate::translate(session, filter)?;
    let matched = narrowed(session, &query, filter.indeterminate);
    let store = session.read();
    let ids = ordered_ids(&store, &matched, query.ordering);
    ids.iter()
        .map(|id| record_from_row(&store, &store.observations[*id as usize]))
        .collect()
}

/// Count matching observations without materializing them.
pub fn count(session: &Session, filter: &ObservationFilter) -> Result<u64> {
    let query = translate::translate(session, filter)?;
    Ok(narrowed(session, &query, filter.indeterminate).len())
}

/// The single extremum value for a filter (phase 1 of indeterminate-time
/// resolution, exposed for capability reporting). `None` on an empty set.
pub fn extremum_time(
    session: &Session,
    filter: &ObservationFilter,
    which: IndeterminateTime,
) -> Result<Option<DateTime<Utc>>> {
    let query = translate::translate(session, filter)?;
    Ok(extrema::extremum(session, &query, which))
}

/// Union envelope of matched observations' feature and sampling geometries.
pub fn envelope(session: &Session, filter: &ObservationFilter) -> Result<Option<Envelope>> {
    let query = translate::translate(session, filter)?;
    let matched = narrowed(session, &query, filter.indeterminate);
    let store = session.read();
    Ok(matched_envelope(&store, &matched))
}

/// Open a streaming cursor over the filter's result set. `chunk_size = None`
/// disables pagination (everything arrives in one scroll).
pub fn stream(
    session: &Session,
    filter: &ObservationFilter,
    chunk_size: Option<usize>,
) -> Result<ObservationCursor> {
    let query = translate::translate(session, filter)?;
    let matched = narrowed(session, &query, filter.indeterminate);
    let ordered = {
        let store = session.read();
        ordered_ids(&store, &matched, query.ordering)
    };
    Ok(ObservationCursor::new(session.clone(), ordered, chunk_size))
}

/// Min/max phenomenon and result times over one procedure's visible
/// observations, for capability reporting.
pub fn procedure_time_extrema(session: &Session, procedure: &str) -> Result<TimeExtrema> {
    let filter = ObservationFilter::new().with_procedures([procedure]);
    time_extrema(session, &filter)
}

/// Min/max phenomenon and result times over one offering.
pub fn offering_time_extrema(session: &Session, offering: &str) -> Result<TimeExtrema> {
    let filter = ObservationFilter::new().with_offerings([offering]);
    time_extrema(session, &filter)
}

fn time_extrema(session: &Session, filter: &ObservationFilter) -> Result<TimeExtrema> {
    let query = translate::translate(session, filter)?;
    let store = session.read();
    let mut out = TimeExtrema::default();
    for id in query.matched.iter() {
        if let Some(row) = store.observation(id) {
            out.extend(
                row.phenomenon_time_start,
                row.phenomenon_time_end,
                row.result_time,
            );
        }
    }
    Ok(out)
}

// ============================================================================
// Internals
// ============================================================================

fn narrowed(
    session: &Session,
    query: &ObservationQuery,
    indeterminate: Option<IndeterminateTime>,
) -> RoaringBitmap {
    match indeterminate {
        Some(which) => extrema::resolve(session, query, which),
        None => query.matched.clone(),
    }
}

pub(crate) fn ordered_ids(
    store: &StoreInner,
    matched: &RoaringBitmap,
    ordering: QueryOrdering,
) -> Vec<u32> {
    let mut ids: Vec<u32> = matched.iter().collect();
    ids.sort_by_key(|id| {
        let row = &store.observations[*id as usize];
        let key = match ordering {
            QueryOrdering::PhenomenonTimeStart => row.phenomenon_time_start,
            QueryOrdering::ResultTime => row.result_time,
        };
        (key, *id)
    });
    ids
}

pub(crate) fn record_from_row(store: &StoreInner, row: &ObservationRow) -> Result<ObservationRecord> {
    let (procedure, property, feature) = store.observation_identity(row);
    let reference = |kind: ReferenceKind, id: u32| -> Result<String> {
        store
            .reference_table(kind)
            .value(id)
            .map(str::to_string)
            .ok_or_else(|| StoreError::UnknownIdentifier {
                kind: kind.as_str(),
                identifier: id.to_string(),
            })
    };

    let unit = row
        .unit
        .map(|u| reference(ReferenceKind::Unit, u))
        .transpose()?;
    let value = match &row.value {
        TypedValue::Boolean(v) => ObservationValue::Boolean(*v),
        TypedValue::Count(v) => ObservationValue::Count(*v),
        TypedValue::Category { category, codespace } => ObservationValue::Category {
            value: reference(ReferenceKind::Category, *category)?,
            codespace: codespace
                .map(|c| reference(ReferenceKind::Codespace, c))
                .transpose()?,
        },
        TypedValue::Quantity { value } => ObservationValue::Quantity {
            value: *value,
            unit,
        },
        TypedValue::Text(v) => ObservationValue::Text(v.clone()),
        TypedValue::Geometry(g) => ObservationValue::Geometry(g.clone()),
    };

    let mut parameters = Vec::with_capacity(row.parameters.len());
    for parameter in &row.parameters {
        let value = match &parameter.value {
            TypedParameterValue::Boolean(v) => ParameterValue::Boolean(*v),
            TypedParameterValue::Count(v) => ParameterValue::Count(*v),
            TypedParameterValue::Category { category, codespace } => ParameterValue::Category {
                value: reference(ReferenceKind::Category, *category)?,
                codespace: codespace
                    .map(|c| reference(ReferenceKind::Codespace, c))
                    .transpose()?,
            },
            TypedParameterValue::Quantity { value, unit } => ParameterValue::Quantity {
                value: *value,
                unit: unit
                    .map(|u| reference(ReferenceKind::Unit, u))
                    .transpose()?,
            },
            TypedParameterValue::Text(v) => ParameterValue::Text(v.clone()),
        };
        parameters.push(NamedValue {
            name: parameter.name.clone(),
            value,
        });
    }

    let phenomenon_time = if row.phenomenon_time_start == row.phenomenon_time_end {
        PhenomenonTime::Instant(row.phenomenon_time_start)
    } else {
        PhenomenonTime::Period(TimePeriod::new(
            row.phenomenon_time_start,
            row.phenomenon_time_end,
        ))
    };

    Ok(ObservationRecord {
        identifier: row.identifier.clone(),
        procedure: store.procedures[procedure as usize].identifier.clone(),
        observable_property: store.properties[property as usize].identifier.clone(),
        feature_of_interest: store.features[feature as usize].identifier.clone(),
        offerings: row
            .offerings
            .iter()
            .map(|o| store.offerings[*o as usize].identifier.clone())
            .collect(),
        value,
        phenomenon_time,
        result_time: row.result_time,
        valid_time: row.valid_time,
        deleted: row.deleted,
        sampling_geometry: row.sampling_geometry.clone(),
        parameters,
    })
}
