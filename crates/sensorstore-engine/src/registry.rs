//! Registration of identity-bearing entities: procedures, observable
//! properties, features of interest, offerings, constellations, and series.
//!
//! All registration is create-or-reuse keyed by identifier (or by the
//! identity triple for constellations and series). Rediscovered
//! constellations and series are reactivated — the deleted flag is cleared —
//! never duplicated. Reference entities referenced from here (description
//! formats, codespaces, feature types, observation types) go through the
//! resolver in [`crate::reference`].

use sensorstore_model::{
    FeatureOfInterest, Geometry, ObservableProperty, Offering, Procedure, ReferenceKind,
};

use crate::error::{Result, StoreError};
use crate::reference::{resolve, resolve_opt, ReferenceCache};
use crate::schema::require_spatial_profile;
use crate::store::{
    ConstellationRow, FeatureRow, OfferingRow, ProcedureRow, PropertyRow, Session, SeriesRow,
};

/// Create-or-reuse a procedure row. Parents must already be registered.
pub fn register_procedure(
    session: &Session,
    procedure: &Procedure,
    cache: Option<&mut ReferenceCache>,
) -> Result<u32> {
    if let Some(row) = session.read().procedure_by_identifier(&procedure.identifier) {
        return Ok(row.id);
    }
    let format = resolve(
        session,
        ReferenceKind::ProcedureDescriptionFormat,
        &procedure.description_format,
        cache,
    )?;

    let mut store = session.write();
    // Retry the lookup under the write lock; another session may have won.
    if let Some(id) = store.procedure_ids.get(&procedure.identifier) {
        return Ok(*id);
    }
    let parent = match &procedure.parent {
        Some(p) => Some(*store.procedure_ids.get(p).ok_or_else(|| {
            StoreError::UnknownIdentifier {
                kind: "procedure",
                identifier: p.clone(),
            }
        })?),
        None => None,
    };
    let id = store.procedures.len() as u32;
    store.procedures.push(ProcedureRow {
        id,
        identifier: procedure.identifier.clone(),
        name: procedure.name.clone(),
        description: procedure.description.clone(),
        parent,
        description_format: format.id,
    });
    store.procedure_ids.insert(procedure.identifier.clone(), id);
    if let Some(parent) = parent {
        store.procedure_children.entry(parent).or_default().push(id);
    }
    tracing::debug!(identifier = %procedure.identifier, id, "registered procedure");
    Ok(id)
}

/// Create-or-reuse an observable property row.
pub fn register_observable_property(
    session: &Session,
    property: &ObservableProperty,
    cache: Option<&mut ReferenceCache>,
) -> Result<u32> {
    if let Some(row) = session.read().property_by_identifier(&property.identifier) {
        return Ok(row.id);
    }
    let codespace = resolve_opt(
        session,
        ReferenceKind::Codespace,
        property.codespace.as_deref(),
        cache,
    )?;

    let mut store = session.write();
    if let Some(id) = store.property_ids.get(&property.identifier) {
        return Ok(*id);
    }
    let id = store.properties.len() as u32;
    store.properties.push(PropertyRow {
        id,
        identifier: property.identifier.clone(),
        name: property.name.clone(),
        description: property.description.clone(),
        codespace: codespace.map(|c| c.id),
        hidden_child: property.hidden_child,
        parent: None,
        components: Vec::new(),
    });
    store.property_ids.insert(property.identifier.clone(), id);
    tracing::debug!(identifier = %property.identifier, id, "registered observable property");
    Ok(id)
}

/// Create-or-reuse a feature-of-interest row. Parents must already exist.
pub fn register_feature(
    session: &Session,
    feature: &FeatureOfInterest,
    mut cache: Option<&mut ReferenceCache>,
) -> Result<u32> {
    if let Some(row) = session.read().feature_by_identifier(&feature.identifier) {
        return Ok(row.id);
    }
    let feature_type = resolve(
        session,
        ReferenceKind::FeatureOfInterestType,
        &feature.feature_type,
        cache.as_deref_mut(),
    )?;
    let codespace = resolve_opt(
        session,
        ReferenceKind::Codespace,
        feature.codespace.as_deref(),
        cache,
    )?;

    let mut store = session.write();
    if let Some(id) = store.feature_ids.get(&feature.identifier) {
        return Ok(*id);
    }
    let parent = match &feature.parent {
        Some(p) => Some(*store.feature_ids.get(p).ok_or_else(|| {
            StoreError::UnknownIdentifier {
                kind: "feature",
                identifier: p.clone(),
            }
        })?),
        None => None,
    };
    let id = store.features.len() as u32;
    store.features.push(FeatureRow {
        id,
        identifier: feature.identifier.clone(),
        name: feature.name.clone(),
        codespace: codespace.map(|c| c.id),
        feature_type: feature_type.id,
        geometry: feature.geometry.clone(),
        parent,
    });
    store.feature_ids.insert(feature.identifier.clone(), id);
    if let Some(parent) = parent {
        store.feature_children.entry(parent).or_default().push(id);
    }
    tracing::debug!(identifier = %feature.identifier, id, "registered feature of interest");
    Ok(id)
}

/// Create-or-reuse an offering, resolving its allowed type sets through the
/// reference resolver. Related features must already be registered.
pub fn register_offering(
    session: &Session,
    offering: &Offering,
    mut cache: Option<&mut ReferenceCache>,
) -> Result<u32> {
    if let Some(row) = session.read().offering_by_identifier(&offering.identifier) {
        return Ok(row.id);
    }
    let mut observation_types = std::collections::BTreeSet::new();
    for t in &offering.allowed_observation_types {
        let r = resolve(session, ReferenceKind::ObservationType, t, cache.as_deref_mut())?;
        observation_types.insert(r.id);
    }
    let mut feature_types = std::collections::BTreeSet::new();
    for t in &offering.allowed_feature_types {
        let r = resolve(
            session,
            ReferenceKind::FeatureOfInterestType,
            t,
            cache.as_deref_mut(),
        )?;
        feature_types.insert(r.id);
    }

    let mut store = session.write();
    if let Some(id) = store.offering_ids.get(&offering.identifier) {
        return Ok(*id);
    }
    let mut related = std::collections::BTreeSet::new();
    for f in &offering.related_features {
        let fid = store
            .feature_ids
            .get(f)
            .ok_or_else(|| StoreError::UnknownIdentifier {
                kind: "feature",
                identifier: f.clone(),
            })?;
        related.insert(*fid);
    }
    let id = store.offerings.len() as u32;
    store.offerings.push(OfferingRow {
        id,
        identifier: offering.identifier.clone(),
        name: offering.name.clone(),
        allowed_observation_types: observation_types,
        allowed_feature_types: feature_types,
        related_features: related,
    });
    store.offering_ids.insert(offering.identifier.clone(), id);
    tracing::debug!(identifier = %offering.identifier, id, "registered offering");
    Ok(id)
}

/// Create-or-reuse the constellation row for one (procedure, property,
/// offering) triple.
///
/// Reuse semantics:
/// - a deleted row is reactivated, not duplicated;
/// - an explicitly requested row clears a previous `hidden_child` marking;
/// - a missing registered observation type is informed by the requested one;
/// - a *conflicting* type on a hidden-child row is informed (the row is
///   engine-derived bookkeeping), while a conflict on an explicit row is an
///   [`StoreError::ObservationTypeMismatch`].
pub fn ensure_constellation(
    session: &Session,
    procedure: u32,
    property: u32,
    offering: u32,
    observation_type: Option<&str>,
    hidden_child: bool,
    cache: Option<&mut ReferenceCache>,
) -> Result<u32> {
    let requested_type = match observation_type {
        Some(t) => Some(resolve(session, ReferenceKind::ObservationType, t, cache)?.id),
        None => None,
    };

    let mut store = session.write();
    let key = (procedure, property, offering);
    if let Some(&id) = store.constellation_ids.get(&key) {
        let was_hidden = store.constellations[id as usize].hidden_child;
        let registered = store.constellations[id as usize].observation_type;
        match (registered, requested_type) {
            (Some(reg), Some(req)) if reg != req => {
                if was_hidden {
                    // Engine-derived rows follow the newly computed type.
                    store.constellations[id as usize].observation_type = Some(req);
                } else {
                    let ot = |r: u32| {
                        store
                            .reference_table(ReferenceKind::ObservationType)
                            .value(r)
                            .unwrap_or("?")
                            .to_string()
                    };
                    return Err(StoreError::ObservationTypeMismatch {
                        procedure: store.procedures[procedure as usize].identifier.clone(),
                        observable_property: store.properties[property as usize]
                            .identifier
                            .clone(),
                        offering: store.offerings[offering as usize].identifier.clone(),
                        requested: ot(req),
                        registered: ot(reg),
                    });
                }
            }
            (None, Some(req)) => {
                store.constellations[id as usize].observation_type = Some(req);
            }
            _ => {}
        }
        let row = &mut store.constellations[id as usize];
        if row.deleted {
            row.deleted = false;
            tracing::debug!(id, "reactivated observation constellation");
        }
        // Once explicitly requested, a constellation stops being hidden.
        row.hidden_child = row.hidden_child && hidden_child;
        return Ok(id);
    }

    let id = store.constellations.len() as u32;
    store.constellations.push(ConstellationRow {
        id,
        procedure,
        property,
        offering,
        observation_type: requested_type,
        hidden_child,
        deleted: false,
    });
    store.constellation_ids.insert(key, id);
    tracing::debug!(id, procedure, property, offering, hidden_child, "registered constellation");
    Ok(id)
}

/// Create-or-reuse the series row for one (procedure, property, feature)
/// triple. A deleted series is reactivated.
pub fn ensure_series(session: &Session, procedure: u32, property: u32, feature: u32) -> u32 {
    let mut store = session.write();
    let key = (procedure, property, feature);
    if let Some(&id) = store.series_ids.get(&key) {
        let row = &mut store.series[id as usize];
        if row.deleted {
            row.deleted = false;
            row.published = true;
            tracing::debug!(id, "reactivated series");
        }
        return id;
    }
    let id = store.series.len() as u32;
    store.series.push(SeriesRow {
        id,
        procedure,
        property,
        feature,
        deleted: false,
        published: true,
    });
    store.series_ids.insert(key, id);
    id
}

// ============================================================================
// Maintenance
// ============================================================================

/// Bulk soft delete: flip `deleted` for all observations, series, and
/// constellations of one procedure. Rows stay retrievable through an
/// explicit include-deleted query.
pub fn set_procedure_deleted(session: &Session, procedure: &str, deleted: bool) -> Result<u64> {
    let mut store = session.write();
    let proc_id = *store
        .procedure_ids
        .get(procedure)
        .ok_or_else(|| StoreError::UnknownIdentifier {
            kind: "procedure",
            identifier: procedure.to_string(),
        })?;

    let affected: Vec<u32> = store
        .observations
        .iter()
        .filter(|o| store.observation_identity(o).0 == proc_id)
        .map(|o| o.id)
        .collect();
    for id in &affected {
        store.set_observation_deleted(*id, deleted);
    }
    for series in &mut store.series {
        if series.procedure == proc_id {
            series.deleted = deleted;
        }
    }
    for constellation in &mut store.constellations {
        if constellation.procedure == proc_id {
            constellation.deleted = deleted;
        }
    }
    tracing::debug!(procedure, deleted, count = affected.len(), "bulk-updated deleted flag");
    Ok(affected.len() as u64)
}

/// Backfill the sampling geometry of an existing observation — the one
/// permitted post-insert mutation besides the deleted flag. Gated on the
/// same schema capability as profile ingestion.
pub fn backfill_sampling_geometry(
    session: &Session,
    observation_identifier: &str,
    geometry: Geometry,
) -> Result<()> {
    let mut store = session.write();
    require_spatial_profile(&store)?;
    let id = *store
        .observation_ids
        .get(observation_identifier)
        .ok_or_else(|| StoreError::UnknownIdentifier {
            kind: "observation",
            identifier: observation_identifier.to_string(),
        })?;
    store.observations[id as usize].sampling_geometry = Some(geometry);
    Ok(())
}
