//! Constellation and composite-phenomenon behavior.

use chrono::{DateTime, TimeZone, Utc};

use sensorstore_engine::hierarchy::{expand, insert_composite_phenomenon};
use sensorstore_engine::ingest::{self, IngestCaches};
use sensorstore_engine::queries;
use sensorstore_engine::registry::{
    ensure_constellation, register_feature, register_observable_property, register_offering,
    register_procedure,
};
use sensorstore_engine::{ObservationStore, SchemaShape, StoreError};
use sensorstore_model::{
    FeatureOfInterest, HierarchyDirection, HierarchyKind, Observation, ObservationConstellation,
    ObservationFilter, ObservationValue, ObservableProperty, Offering, PhenomenonTime, Procedure,
};

fn ts(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).unwrap()
}

fn seeded() -> ObservationStore {
    let store = ObservationStore::new(SchemaShape::LegacyFlat);
    let session = store.session();
    register_procedure(&session, &Procedure::new("proc-1", "sml-2.0"), None).unwrap();
    register_observable_property(&session, &ObservableProperty::new("weather"), None).unwrap();
    register_offering(&session, &Offering::new("off-1"), None).unwrap();
    register_feature(
        &session,
        &FeatureOfInterest::new("station-1", "sampling-point"),
        None,
    )
    .unwrap();
    store
}

fn ids(session: &sensorstore_engine::Session) -> (u32, u32, u32) {
    (
        session.procedure_id("proc-1").unwrap(),
        session.property_id("weather").unwrap(),
        session.offering_id("off-1").unwrap(),
    )
}

#[test]
fn composite_insertion_creates_hidden_children_and_mirrors_constellations() {
    let store = seeded();
    let session = store.session();
    let (proc_id, prop_id, off_id) = ids(&session);

    // An explicit constellation for the composite parent exists first.
    ensure_constellation(
        &session,
        proc_id,
        prop_id,
        off_id,
        Some("om:ComplexObservation"),
        false,
        None,
    )
    .unwrap();

    insert_composite_phenomenon(
        &session,
        &ObservableProperty::new("weather"),
        &[
            ObservableProperty::new("weather-temp"),
            ObservableProperty::new("weather-humidity"),
        ],
        None,
    )
    .unwrap();

    // Components expand from the parent and are flagged hidden.
    let set = expand(
        &session,
        HierarchyKind::ObservableProperty,
        &["weather".to_string()],
        false,
        HierarchyDirection::Children,
    )
    .unwrap();
    assert_eq!(
        set,
        ["weather-temp", "weather-humidity"]
            .iter()
            .map(|s| s.to_string())
            .collect()
    );

    // Expansion is idempotent over the flattened set.
    let roots: Vec<String> = set.iter().cloned().collect();
    let again = expand(
        &session,
        HierarchyKind::ObservableProperty,
        &roots,
        true,
        HierarchyDirection::Children,
    )
    .unwrap();
    assert_eq!(again, set);

    // Each component got a mirrored hidden-child constellation carrying the
    // parent's observation type.
    for component in ["weather-temp", "weather-humidity"] {
        let component_id = session.property_id(component).unwrap();
        let info = session
            .constellation(proc_id, component_id, off_id)
            .unwrap();
        assert!(info.hidden_child, "{component} constellation not hidden");
        assert_eq!(info.observation_type.as_deref(), Some("om:ComplexObservation"));
        assert!(!info.deleted);
    }
    // The explicit parent constellation stayed explicit.
    assert!(!session.constellation(proc_id, prop_id, off_id).unwrap().hidden_child);
}

#[test]
fn mutual_composite_membership_is_detected_as_cycle() {
    let store = seeded();
    let session = store.session();
    insert_composite_phenomenon(
        &session,
        &ObservableProperty::new("wind"),
        &[ObservableProperty::new("gusts")],
        None,
    )
    .unwrap();
    insert_composite_phenomenon(
        &session,
        &ObservableProperty::new("gusts"),
        &[ObservableProperty::new("wind")],
        None,
    )
    .unwrap();

    let err = expand(
        &session,
        HierarchyKind::ObservableProperty,
        &["wind".to_string()],
        true,
        HierarchyDirection::Children,
    )
    .unwrap_err();
    assert!(matches!(err, StoreError::HierarchyCycle { .. }));

    // The parent walk hits the same loop.
    let err = expand(
        &session,
        HierarchyKind::ObservableProperty,
        &["wind".to_string()],
        false,
        HierarchyDirection::Parents,
    )
    .unwrap_err();
    assert!(matches!(err, StoreError::HierarchyCycle { .. }));
}

#[test]
fn hidden_children_are_excluded_until_requested_by_identifier() {
    let store = seeded();
    let session = store.session();
    insert_composite_phenomenon(
        &session,
        &ObservableProperty::new("weather"),
        &[ObservableProperty::new("weather-temp")],
        None,
    )
    .unwrap();

    // Observe against the hidden component.
    let mut caches = IngestCaches::new();
    let obs = Observation::new(
        PhenomenonTime::Instant(ts(1)),
        ObservationValue::Quantity {
            value: 20.0,
            unit: None,
        },
    )
    .with_identifier("hidden-obs");
    let mut hidden = ObservationConstellation::new("proc-1", "weather-temp", "off-1");
    hidden.hidden_child = true;
    ingest::insert(
        &session,
        &obs,
        &[hidden],
        &FeatureOfInterest::new("station-1", "sampling-point"),
        &mut caches,
    )
    .unwrap();

    // Default path: invisible.
    assert_eq!(queries::count(&session, &ObservationFilter::new()).unwrap(), 0);

    // Requested by identifier: visible.
    let explicit = ObservationFilter::new().with_observable_properties(["weather-temp"]);
    let records = queries::fetch(&session, &explicit).unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].identifier, "hidden-obs");
}

#[test]
fn observation_type_conflict_on_explicit_constellation_is_rejected() {
    let store = seeded();
    let session = store.session();
    let (proc_id, prop_id, off_id) = ids(&session);

    ensure_constellation(&session, proc_id, prop_id, off_id, Some("om:Measurement"), false, None)
        .unwrap();
    let err = ensure_constellation(
        &session,
        proc_id,
        prop_id,
        off_id,
        Some("om:CountObservation"),
        false,
        None,
    )
    .unwrap_err();
    match err {
        StoreError::ObservationTypeMismatch {
            requested,
            registered,
            ..
        } => {
            assert_eq!(requested, "om:CountObservation");
            assert_eq!(registered, "om:Measurement");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn hidden_child_constellation_is_informed_not_rejected() {
    let store = seeded();
    let session = store.session();
    let (proc_id, prop_id, off_id) = ids(&session);

    ensure_constellation(&session, proc_id, prop_id, off_id, Some("om:Measurement"), true, None)
        .unwrap();
    // A differing type on the engine-derived row updates it silently.
    let id = ensure_constellation(
        &session,
        proc_id,
        prop_id,
        off_id,
        Some("om:CountObservation"),
        true,
        None,
    )
    .unwrap();
    assert_eq!(id, 0);
}

#[test]
fn missing_type_is_informed_by_later_insert() {
    let store = seeded();
    let session = store.session();
    let (proc_id, prop_id, off_id) = ids(&session);

    let first = ensure_constellation(&session, proc_id, prop_id, off_id, None, false, None).unwrap();
    let second = ensure_constellation(
        &session,
        proc_id,
        prop_id,
        off_id,
        Some("om:Measurement"),
        false,
        None,
    )
    .unwrap();
    assert_eq!(first, second);
    // Informed type now conflicts with a different one.
    assert!(ensure_constellation(
        &session,
        proc_id,
        prop_id,
        off_id,
        Some("om:TextObservation"),
        false,
        None,
    )
    .is_err());
}

#[test]
fn empty_constellation_list_is_rejected() {
    let store = seeded();
    let session = store.session();
    let mut caches = IngestCaches::new();
    let obs = Observation::new(
        PhenomenonTime::Instant(ts(1)),
        ObservationValue::Count(4),
    );
    let err = ingest::insert(
        &session,
        &obs,
        &[],
        &FeatureOfInterest::new("station-1", "sampling-point"),
        &mut caches,
    )
    .unwrap_err();
    assert!(matches!(err, StoreError::MissingConstellation));
}
