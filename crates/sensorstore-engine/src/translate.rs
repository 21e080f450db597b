//! Filter translation: declarative [`ObservationFilter`] objects become an
//! executable query plan (a matched bitmap plus an ordering clause).
//!
//! All identifier filters AND together; identifiers within one filter OR
//! together (bitmap union, then intersection). Identity predicates dispatch
//! through the schema strategy, so the same filter reaches observations
//! through the observation's own columns under `LegacyFlat` and through the
//! series join under `NormalizedSeries` with identical results.
//!
//! Hidden-child properties are engine bookkeeping: their observations are
//! excluded from the default path and only reachable when the property is
//! requested by identifier.

use chrono::{DateTime, Utc};
use roaring::RoaringBitmap;

use sensorstore_model::{
    Envelope, ObservationFilter, SpatialFilter, TemporalFilter, TemporalOperator, TimeReference,
};

use crate::error::Result;
use crate::schema::{require_spatial_profile, select_strategy, QueryStrategy};
use crate::store::{ObservationRow, Session, StoreInner};

/// Ordering established by the translator and honored by cursors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryOrdering {
    /// Default: ascending by phenomenon-time start.
    PhenomenonTimeStart,
    /// Ascending by result time, when the temporal filter targets it.
    ResultTime,
}

/// An executable query: the matched observation set plus ordering, and the
/// identifier sets that produced it.
///
/// The identifier sets are exposed so ingestion-time capability checks use
/// exactly the sets the read path filtered on — there is no second code path.
#[derive(Debug, Clone)]
pub struct ObservationQuery {
    pub(crate) matched: RoaringBitmap,
    pub ordering: QueryOrdering,
    procedure_identifiers: Vec<String>,
    property_identifiers: Vec<String>,
}

impl ObservationQuery {
    pub fn matched_count(&self) -> u64 {
        self.matched.len()
    }

    pub fn procedure_identifiers(&self) -> &[String] {
        &self.procedure_identifiers
    }

    pub fn observable_property_identifiers(&self) -> &[String] {
        &self.property_identifiers
    }
}

/// Translate a filter into an executable query against the session's store.
pub fn translate(session: &Session, filter: &ObservationFilter) -> Result<ObservationQuery> {
    let strategy = select_strategy(session)?;
    let store = session.read();

    if filter.result_spatial.is_some() {
        require_spatial_profile(&store)?;
    }

    let mut matched = strategy.visible(&store, filter.include_deleted);

    apply_identifier_filters(&store, strategy, filter, &mut matched);
    if filter.observable_properties.is_empty() {
        exclude_hidden_children(&store, strategy, &mut matched);
    }

    if let Some(temporal) = &filter.temporal {
        matched = retain_rows(&store, &matched, |row| temporal_matches(row, temporal));
    }
    if let Some(spatial) = &filter.spatial {
        apply_feature_spatial(&store, strategy, spatial, &mut matched);
    }
    if let Some(result_spatial) = &filter.result_spatial {
        matched = retain_rows(&store, &matched, |row| {
            result_geometry_matches(&store, row, result_spatial)
        });
    }

    let ordering = match &filter.temporal {
        Some(t) if t.reference == TimeReference::ResultTime => QueryOrdering::ResultTime,
        _ => QueryOrdering::PhenomenonTimeStart,
    };

    tracing::debug!(
        matched = matched.len(),
        ?ordering,
        shape = ?store.shape,
        "translated observation filter"
    );

    Ok(ObservationQuery {
        matched,
        ordering,
        procedure_identifiers: filter.procedures.clone(),
        property_identifiers: filter.observable_properties.clone(),
    })
}

fn apply_identifier_filters(
    store: &StoreInner,
    strategy: &dyn QueryStrategy,
    filter: &ObservationFilter,
    matched: &mut RoaringBitmap,
) {
    if !filter.procedures.is_empty() {
        let mut union = RoaringBitmap::new();
        for identifier in &filter.procedures {
            if let Some(&id) = store.procedure_ids.get(identifier) {
                union |= strategy.observations_for_procedure(store, id);
            }
        }
        *matched &= union;
    }
    if !filter.observable_properties.is_empty() {
        let mut union = RoaringBitmap::new();
        for identifier in &filter.observable_properties {
            if let Some(&id) = store.property_ids.get(identifier) {
                union |= strategy.observations_for_property(store, id);
            }
        }
        *matched &= union;
    }
    if !filter.features.is_empty() {
        let mut union = RoaringBitmap::new();
        for identifier in &filter.features {
            if let Some(&id) = store.feature_ids.get(identifier) {
                union |= strategy.observations_for_feature(store, id);
            }
        }
        *matched &= union;
    }
    if !filter.offerings.is_empty() {
        let mut union = RoaringBitmap::new();
        for identifier in &filter.offerings {
            if let Some(&id) = store.offering_ids.get(identifier) {
                if let Some(bm) = store.obs_by_offering.get(&id) {
                    union |= bm;
                }
            }
        }
        *matched &= union;
    }
}

fn exclude_hidden_children(
    store: &StoreInner,
    strategy: &dyn QueryStrategy,
    matched: &mut RoaringBitmap,
) {
    for property in store.properties.iter().filter(|p| p.hidden_child) {
        *matched -= strategy.observations_for_property(store, property.id);
    }
}

fn retain_rows<F>(store: &StoreInner, matched: &RoaringBitmap, pred: F) -> RoaringBitmap
where
    F: Fn(&ObservationRow) -> bool,
{
    let mut out = RoaringBitmap::new();
    for id in matched.iter() {
        if let Some(row) = store.observation(id) {
            if pred(row) {
                out.insert(id);
            }
        }
    }
    out
}

fn temporal_matches(row: &ObservationRow, filter: &TemporalFilter) -> bool {
    let (filter_start, filter_end) = (filter.time.start(), filter.time.end());
    match filter.reference {
        TimeReference::PhenomenonTime => temporal_op_matches(
            filter.operator,
            row.phenomenon_time_start,
            row.phenomenon_time_end,
            filter_start,
            filter_end,
        ),
        TimeReference::ResultTime => temporal_op_matches(
            filter.operator,
            row.result_time,
            row.result_time,
            filter_start,
            filter_end,
        ),
    }
}

fn temporal_op_matches(
    operator: TemporalOperator,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    filter_start: DateTime<Utc>,
    filter_end: DateTime<Utc>,
) -> bool {
    match operator {
        TemporalOperator::Equals => start == filter_start && end == filter_end,
        TemporalOperator::Before => end < filter_start,
        TemporalOperator::After => start > filter_end,
        TemporalOperator::During => start >= filter_start && end <= filter_end,
    }
}

fn apply_feature_spatial(
    store: &StoreInner,
    strategy: &dyn QueryStrategy,
    filter: &SpatialFilter,
    matched: &mut RoaringBitmap,
) {
    let Some(filter_env) = filter.geometry.envelope() else {
        *matched = RoaringBitmap::new();
        return;
    };
    let mut union = RoaringBitmap::new();
    for feature in &store.features {
        let Some(env) = feature.geometry.as_ref().and_then(|g| g.envelope()) else {
            continue;
        };
        if env.intersects(&filter_env) {
            union |= strategy.observations_for_feature(store, feature.id);
        }
    }
    *matched &= union;
}

/// Spatial-filtering-profile predicate: applies to the observation's own
/// result geometry. Only rows that actually carry one can match — there is
/// no default empty-geometry comparison.
fn result_geometry_matches(
    store: &StoreInner,
    row: &ObservationRow,
    filter: &SpatialFilter,
) -> bool {
    let Some(filter_env) = filter.geometry.envelope() else {
        return false;
    };
    let geometry = store
        .profiles
        .get(&row.id)
        .map(|p| &p.geometry)
        .or(row.sampling_geometry.as_ref());
    match geometry.and_then(|g| g.envelope()) {
        Some(env) => env.intersects(&filter_env),
        None => false,
    }
}

/// Union envelope over matched observations: feature geometries plus any
/// sampling geometries. `None` when nothing matched carries a geometry.
pub(crate) fn matched_envelope(store: &StoreInner, matched: &RoaringBitmap) -> Option<Envelope> {
    let mut out: Option<Envelope> = None;
    let mut fold = |env: Envelope| {
        out = Some(match out {
            Some(acc) => acc.union(&env),
            None => env,
        });
    };
    for id in matched.iter() {
        let Some(row) = store.observation(id) else {
            continue;
        };
        let (_, _, feature) = store.observation_identity(row);
        if let Some(env) = store.features[feature as usize]
            .geometry
            .as_ref()
            .and_then(|g| g.envelope())
        {
            fold(env);
        }
        if let Some(env) = row.sampling_geometry.as_ref().and_then(|g| g.envelope()) {
            fold(env);
        }
    }
    out
}
