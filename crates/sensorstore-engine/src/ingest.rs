//! Observation ingestion pipeline.
//!
//! Persists a domain observation with correctly derived time fields and
//! deduplicated reference data. The step order below is load-bearing:
//! constellation identity is fixed before the row is built, and the profile
//! link needs the persisted row id.
//!
//! Multi-valued input unfolds first; every sub-observation then runs the
//! same steps, sharing the caller-supplied caches across the batch.

use ahash::AHashMap;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use sensorstore_model::{
    FeatureOfInterest, Observation, ObservationConstellation, ObservationValue, ParameterValue,
    PhenomenonTime, ReferenceKind, SpatialFilteringProfile,
};

use crate::error::{Result, StoreError};
use crate::reference::{resolve, resolve_opt, ReferenceCache};
use crate::registry::{ensure_constellation, ensure_series, register_feature};
use crate::schema::{require_spatial_profile, SchemaShape};
use crate::store::{
    ObservationLink, ObservationRow, Session, TypedParameter, TypedParameterValue, TypedValue,
};

/// OGC-OM parameter name carrying the per-observation sampling geometry.
pub const SAMPLING_GEOMETRY_PARAMETER: &str =
    "http://www.opengis.net/def/param-name/OGC-OM/2.0/samplingGeometry";

/// Handle to a persisted observation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservationHandle {
    pub id: u32,
    pub identifier: String,
}

/// Caches threaded through one ingestion batch. Confined to a single batch
/// and thread; never shared across concurrent batches.
#[derive(Debug, Default)]
pub struct IngestCaches {
    pub references: ReferenceCache,
    pub features: AHashMap<String, u32>,
}

impl IngestCaches {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Insert one domain observation.
///
/// All constellations passed together must share procedure and property
/// (the first one is canonical); they differ by offering, and every implied
/// offering is attached to the persisted row.
pub fn insert(
    session: &Session,
    observation: &Observation,
    constellations: &[ObservationConstellation],
    feature: &FeatureOfInterest,
    caches: &mut IngestCaches,
) -> Result<ObservationHandle> {
    // 1. Typed record for the value's concrete kind.
    let value = typed_value(session, &observation.value, &mut caches.references)?;

    // 2./3. Time derivation.
    let (phenomenon_start, phenomenon_end) = phenomenon_bounds(&observation.phenomenon_time);
    let result_time = derive_result_time(observation)?;

    // 4. Unit.
    let unit = resolve_opt(
        session,
        ReferenceKind::Unit,
        observation.value.unit(),
        Some(&mut caches.references),
    )?
    .map(|r| r.id);

    // 5./6. Constellations: canonical identity from the first, offerings
    // from all of them.
    let first = constellations.first().ok_or(StoreError::MissingConstellation)?;
    let (procedure_id, property_id) = identity_ids(session, first)?;
    let mut offering_ids = Vec::with_capacity(constellations.len());
    for constellation in constellations {
        let offering_id = lookup_offering(session, &constellation.offering)?;
        ensure_constellation(
            session,
            procedure_id,
            property_id,
            offering_id,
            constellation.observation_type.as_deref(),
            constellation.hidden_child,
            Some(&mut caches.references),
        )?;
        if !offering_ids.contains(&offering_id) {
            offering_ids.push(offering_id);
        }
    }

    // 7. Feature of interest (create-or-reuse, cache-aware).
    let feature_id = match caches.features.get(&feature.identifier) {
        Some(id) => *id,
        None => {
            let id = register_feature(session, feature, Some(&mut caches.references))?;
            caches.features.insert(feature.identifier.clone(), id);
            id
        }
    };

    // 8. Spatial filtering profile, from the explicit field or the OGC-OM
    // sampling-geometry parameter. Persisted only when present.
    let profile = extract_profile(session, observation)?;

    // 9. Persist the observation row.
    let link = match session.shape() {
        SchemaShape::LegacyFlat => ObservationLink::Flat {
            procedure: procedure_id,
            property: property_id,
            feature: feature_id,
        },
        SchemaShape::NormalizedSeries => ObservationLink::Series {
            series: ensure_series(session, procedure_id, property_id, feature_id),
        },
    };
    let identifier = observation
        .identifier
        .clone()
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    // 10. Named parameters, each through the typed-parameter path.
    let parameters = typed_parameters(session, observation, &mut caches.references)?;

    let row = ObservationRow {
        id: 0, // assigned by the store
        identifier: identifier.clone(),
        value,
        unit,
        phenomenon_time_start: phenomenon_start,
        phenomenon_time_end: phenomenon_end,
        result_time,
        valid_time: observation.valid_time,
        deleted: false,
        sampling_geometry: profile.as_ref().map(|p| p.geometry.clone()),
        parameters,
        offerings: offering_ids,
        link,
    };
    let id = session.write().push_observation(row)?;
    if let Some(profile) = profile {
        session.write().profiles.insert(id, profile);
    }

    tracing::debug!(id, identifier = %identifier, "persisted observation");
    Ok(ObservationHandle { id, identifier })
}

/// Unfold a multi-valued domain observation and insert each sub-observation
/// independently, sharing `caches` across the whole batch.
///
/// One failing sub-observation does not abort the rest; callers wanting
/// abort-on-first-error stop at the first `Err` in the returned vector.
pub fn insert_batch(
    session: &Session,
    template: &Observation,
    points: &[(PhenomenonTime, ObservationValue)],
    constellations: &[ObservationConstellation],
    feature: &FeatureOfInterest,
    caches: &mut IngestCaches,
) -> Vec<Result<ObservationHandle>> {
    points
        .iter()
        .map(|(time, value)| {
            let mut sub = template.clone();
            sub.identifier = None; // generated per sub-observation
            sub.phenomenon_time = *time;
            sub.value = value.clone();
            insert(session, &sub, constellations, feature, caches)
        })
        .collect()
}

// ============================================================================
// Step helpers
// ============================================================================

fn phenomenon_bounds(time: &PhenomenonTime) -> (DateTime<Utc>, DateTime<Utc>) {
    (time.start(), time.end())
}

/// Explicit result time wins; an instant phenomenon time is its own default;
/// a period without an explicit result time cannot be derived.
fn derive_result_time(observation: &Observation) -> Result<DateTime<Utc>> {
    match (observation.result_time, &observation.phenomenon_time) {
        (Some(explicit), _) => Ok(explicit),
        (None, PhenomenonTime::Instant(t)) => Ok(*t),
        (None, PhenomenonTime::Period(_)) => Err(StoreError::UnresolvableResultTime),
    }
}

fn typed_value(
    session: &Session,
    value: &ObservationValue,
    cache: &mut ReferenceCache,
) -> Result<TypedValue> {
    match value {
        ObservationValue::Boolean(v) => Ok(TypedValue::Boolean(*v)),
        ObservationValue::Count(v) => Ok(TypedValue::Count(*v)),
        ObservationValue::Category { value, codespace } => Ok(TypedValue::Category {
            category: resolve(session, ReferenceKind::Category, value, Some(cache))?.id,
            codespace: resolve_opt(
                session,
                ReferenceKind::Codespace,
                codespace.as_deref(),
                Some(cache),
            )?
            .map(|r| r.id),
        }),
        ObservationValue::Quantity { value, .. } => Ok(TypedValue::Quantity { value: *value }),
        ObservationValue::Text(v) => Ok(TypedValue::Text(v.clone())),
        ObservationValue::Geometry(g) => Ok(TypedValue::Geometry(g.clone())),
        ObservationValue::Complex(_) => Err(StoreError::UnsupportedValueKind {
            kind: value.kind_name(),
        }),
    }
}

fn typed_parameters(
    session: &Session,
    observation: &Observation,
    cache: &mut ReferenceCache,
) -> Result<Vec<TypedParameter>> {
    let mut out = Vec::new();
    for parameter in &observation.parameters {
        // The sampling-geometry parameter became the profile in step 8.
        if parameter.name == SAMPLING_GEOMETRY_PARAMETER {
            continue;
        }
        let value = match &parameter.value {
            ParameterValue::Boolean(v) => TypedParameterValue::Boolean(*v),
            ParameterValue::Count(v) => TypedParameterValue::Count(*v),
            ParameterValue::Category { value, codespace } => TypedParameterValue::Category {
                category: resolve(session, ReferenceKind::Category, value, Some(cache))?.id,
                codespace: resolve_opt(
                    session,
                    ReferenceKind::Codespace,
                    codespace.as_deref(),
                    Some(cache),
                )?
                .map(|r| r.id),
            },
            ParameterValue::Quantity { value, unit } => TypedParameterValue::Quantity {
                value: *value,
                unit: resolve_opt(session, ReferenceKind::Unit, unit.as_deref(), Some(cache))?
                    .map(|r| r.id),
            },
            ParameterValue::Text(v) => TypedParameterValue::Text(v.clone()),
            ParameterValue::Geometry(_) => {
                return Err(StoreError::UnsupportedParameterKind {
                    name: parameter.name.clone(),
                    kind: parameter.value.kind_name(),
                })
            }
        };
        out.push(TypedParameter {
            name: parameter.name.clone(),
            value,
        });
    }
    Ok(out)
}

fn extract_profile(
    session: &Session,
    observation: &Observation,
) -> Result<Option<SpatialFilteringProfile>> {
    let from_parameter = observation
        .parameters
        .iter()
        .find(|p| p.name == SAMPLING_GEOMETRY_PARAMETER)
        .map(|p| match &p.value {
            ParameterValue::Geometry(g) => Ok(SpatialFilteringProfile {
                geometry: g.clone(),
                definition: Some(SAMPLING_GEOMETRY_PARAMETER.to_string()),
                title: None,
            }),
            other => Err(StoreError::UnsupportedParameterKind {
                name: p.name.clone(),
                kind: other.kind_name(),
            }),
        })
        .transpose()?;

    let profile = from_parameter.or_else(|| {
        observation
            .sampling_geometry
            .clone()
            .map(|geometry| SpatialFilteringProfile {
                geometry,
                definition: None,
                title: None,
            })
    });

    if profile.is_some() {
        require_spatial_profile(&session.read())?;
    }
    Ok(profile)
}

fn identity_ids(
    session: &Session,
    constellation: &ObservationConstellation,
) -> Result<(u32, u32)> {
    let store = session.read();
    let procedure = *store
        .procedure_ids
        .get(&constellation.procedure)
        .ok_or_else(|| StoreError::UnknownIdentifier {
            kind: "procedure",
            identifier: constellation.procedure.clone(),
        })?;
    let property = *store
        .property_ids
        .get(&constellation.observable_property)
        .ok_or_else(|| StoreError::UnknownIdentifier {
            kind: "observable property",
            identifier: constellation.observable_property.clone(),
        })?;
    Ok((procedure, property))
}

fn lookup_offering(session: &Session, identifier: &str) -> Result<u32> {
    session
        .read()
        .offering_ids
        .get(identifier)
        .copied()
        .ok_or_else(|| StoreError::UnknownIdentifier {
            kind: "offering",
            identifier: identifier.to_string(),
        })
}
