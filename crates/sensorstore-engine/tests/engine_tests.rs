//! Engine E2E tests: ingestion, filter translation, extrema, cursors.

use chrono::{DateTime, TimeZone, Utc};

use sensorstore_engine::ingest::{self, IngestCaches};
use sensorstore_engine::queries;
use sensorstore_engine::registry::{
    backfill_sampling_geometry, register_feature, register_observable_property,
    register_offering, register_procedure, set_procedure_deleted,
};
use sensorstore_engine::{ObservationStore, SchemaShape, StoreCapabilities, StoreError};
use sensorstore_model::{
    FeatureOfInterest, Geometry, IndeterminateTime, NamedValue, Observation,
    ObservationConstellation, ObservationFilter, ObservationValue, ObservableProperty, Offering,
    ParameterValue, PhenomenonTime, Point, Procedure, SpatialFilter, TemporalFilter,
    TemporalOperator, TimePeriod, TimeReference,
};

fn ts(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).unwrap()
}

fn quantity(v: f64) -> ObservationValue {
    ObservationValue::Quantity {
        value: v,
        unit: Some("degC".to_string()),
    }
}

/// Store with one procedure/property/offering/feature registered.
fn seeded(shape: SchemaShape) -> ObservationStore {
    let store = ObservationStore::new(shape);
    let session = store.session();
    register_procedure(&session, &Procedure::new("proc-1", "sml-2.0"), None).unwrap();
    register_observable_property(&session, &ObservableProperty::new("air-temp"), None).unwrap();
    register_offering(&session, &Offering::new("off-1"), None).unwrap();
    let mut feature = FeatureOfInterest::new("station-1", "sampling-point");
    feature.geometry = Some(Geometry::Point(Point::new(7.5, 51.9)));
    register_feature(&session, &feature, None).unwrap();
    store
}

fn constellation() -> ObservationConstellation {
    ObservationConstellation::new("proc-1", "air-temp", "off-1")
        .with_observation_type("om:Measurement")
}

fn insert_at(
    store: &ObservationStore,
    identifier: &str,
    time: DateTime<Utc>,
    value: f64,
) -> sensorstore_engine::ObservationHandle {
    let session = store.session();
    let mut caches = IngestCaches::new();
    let obs = Observation::new(PhenomenonTime::Instant(time), quantity(value))
        .with_identifier(identifier);
    ingest::insert(
        &session,
        &obs,
        &[constellation()],
        &FeatureOfInterest::new("station-1", "sampling-point"),
        &mut caches,
    )
    .unwrap()
}

// ============================================================================
// Ingestion
// ============================================================================

#[test]
fn result_time_defaults_to_instant_phenomenon_time() {
    let store = seeded(SchemaShape::LegacyFlat);
    insert_at(&store, "obs-1", ts(100), 21.5);

    let session = store.session();
    let records = queries::fetch(&session, &ObservationFilter::new()).unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].result_time, ts(100));
    assert_eq!(records[0].phenomenon_time, PhenomenonTime::Instant(ts(100)));
}

#[test]
fn period_without_result_time_is_rejected() {
    let store = seeded(SchemaShape::LegacyFlat);
    let session = store.session();
    let mut caches = IngestCaches::new();
    let obs = Observation::new(
        PhenomenonTime::Period(TimePeriod::new(ts(100), ts(200))),
        quantity(1.0),
    );
    let err = ingest::insert(
        &session,
        &obs,
        &[constellation()],
        &FeatureOfInterest::new("station-1", "sampling-point"),
        &mut caches,
    )
    .unwrap_err();
    assert!(matches!(err, StoreError::UnresolvableResultTime));

    // With an explicit result time the same observation is accepted.
    let obs = Observation::new(
        PhenomenonTime::Period(TimePeriod::new(ts(100), ts(200))),
        quantity(1.0),
    )
    .with_result_time(ts(210));
    let handle = ingest::insert(
        &session,
        &obs,
        &[constellation()],
        &FeatureOfInterest::new("station-1", "sampling-point"),
        &mut caches,
    )
    .unwrap();
    let records = queries::fetch(&session, &ObservationFilter::new()).unwrap();
    assert_eq!(records[0].identifier, handle.identifier);
    assert_eq!(records[0].result_time, ts(210));
}

#[test]
fn complex_value_kind_is_unsupported() {
    let store = seeded(SchemaShape::LegacyFlat);
    let session = store.session();
    let mut caches = IngestCaches::new();
    let obs = Observation::new(
        PhenomenonTime::Instant(ts(1)),
        ObservationValue::Complex(vec![]),
    );
    let err = ingest::insert(
        &session,
        &obs,
        &[constellation()],
        &FeatureOfInterest::new("station-1", "sampling-point"),
        &mut caches,
    )
    .unwrap_err();
    assert!(matches!(
        err,
        StoreError::UnsupportedValueKind { kind: "complex" }
    ));
}

#[test]
fn geometry_parameter_is_unsupported_unless_sampling_geometry() {
    let store = seeded(SchemaShape::LegacyFlat);
    let session = store.session();
    let mut caches = IngestCaches::new();
    let mut obs = Observation::new(PhenomenonTime::Instant(ts(1)), quantity(3.0));
    obs.parameters.push(NamedValue {
        name: "depth-profile".to_string(),
        value: ParameterValue::Geometry(Geometry::Point(Point::new(0.0, 0.0))),
    });
    let err = ingest::insert(
        &session,
        &obs,
        &[constellation()],
        &FeatureOfInterest::new("station-1", "sampling-point"),
        &mut caches,
    )
    .unwrap_err();
    assert!(matches!(err, StoreError::UnsupportedParameterKind { .. }));
}

#[test]
fn sampling_geometry_parameter_becomes_profile() {
    let store = seeded(SchemaShape::LegacyFlat);
    let session = store.session();
    let mut caches = IngestCaches::new();
    let mut obs =
        Observation::new(PhenomenonTime::Instant(ts(1)), quantity(3.0)).with_identifier("obs-g");
    obs.parameters.push(NamedValue {
        name: ingest::SAMPLING_GEOMETRY_PARAMETER.to_string(),
        value: ParameterValue::Geometry(Geometry::Point(Point::new(7.51, 51.91))),
    });
    ingest::insert(
        &session,
        &obs,
        &[constellation()],
        &FeatureOfInterest::new("station-1", "sampling-point"),
        &mut caches,
    )
    .unwrap();

    // The profile geometry is filterable as a result geometry.
    let filter = ObservationFilter::new().with_result_spatial(SpatialFilter::bbox(
        Geometry::Polygon(vec![Point::new(7.0, 51.0), Point::new(8.0, 52.0)]),
    ));
    let records = queries::fetch(&session, &filter).unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].identifier, "obs-g");
    // The parameter itself is consumed by the profile, not persisted twice.
    assert!(records[0].parameters.is_empty());
}

#[test]
fn profile_requires_schema_capability() {
    let store = ObservationStore::with_capabilities(
        SchemaShape::LegacyFlat,
        StoreCapabilities {
            spatial_profile: false,
        },
    );
    let session = store.session();
    register_procedure(&session, &Procedure::new("proc-1", "sml-2.0"), None).unwrap();
    register_observable_property(&session, &ObservableProperty::new("air-temp"), None).unwrap();
    register_offering(&session, &Offering::new("off-1"), None).unwrap();
    register_feature(
        &session,
        &FeatureOfInterest::new("station-1", "sampling-point"),
        None,
    )
    .unwrap();

    let mut caches = IngestCaches::new();
    let mut obs = Observation::new(PhenomenonTime::Instant(ts(1)), quantity(3.0));
    obs.sampling_geometry = Some(Geometry::Point(Point::new(1.0, 1.0)));
    let err = ingest::insert(
        &session,
        &obs,
        &[constellation()],
        &FeatureOfInterest::new("station-1", "sampling-point"),
        &mut caches,
    )
    .unwrap_err();
    assert!(matches!(err, StoreError::UnsupportedSchema(_)));

    // The read path refuses the profile filter the same way.
    let filter = ObservationFilter::new().with_result_spatial(SpatialFilter::bbox(
        Geometry::Point(Point::new(1.0, 1.0)),
    ));
    assert!(matches!(
        queries::fetch(&session, &filter),
        Err(StoreError::UnsupportedSchema(_))
    ));

    // Backfill is gated on the same capability as ingestion.
    obs.sampling_geometry = None;
    let handle = ingest::insert(
        &session,
        &obs.with_identifier("obs-plain"),
        &[constellation()],
        &FeatureOfInterest::new("station-1", "sampling-point"),
        &mut caches,
    )
    .unwrap();
    assert!(matches!(
        backfill_sampling_geometry(
            &session,
            &handle.identifier,
            Geometry::Point(Point::new(1.0, 1.0)),
        ),
        Err(StoreError::UnsupportedSchema(_))
    ));
}

#[test]
fn batch_unfolds_and_shares_caches() {
    let store = seeded(SchemaShape::NormalizedSeries);
    let session = store.session();
    let mut caches = IngestCaches::new();
    let template = Observation::new(PhenomenonTime::Instant(ts(0)), quantity(0.0));
    let points = vec![
        (PhenomenonTime::Instant(ts(10)), quantity(1.0)),
        (PhenomenonTime::Instant(ts(20)), quantity(2.0)),
        (
            // A period point without a result time fails alone, not the batch.
            PhenomenonTime::Period(TimePeriod::new(ts(30), ts(40))),
            quantity(3.0),
        ),
        (PhenomenonTime::Instant(ts(50)), quantity(4.0)),
    ];
    let results = ingest::insert_batch(
        &session,
        &template,
        &points,
        &[constellation()],
        &FeatureOfInterest::new("station-1", "sampling-point"),
        &mut caches,
    );
    assert_eq!(results.len(), 4);
    assert!(results[0].is_ok() && results[1].is_ok() && results[3].is_ok());
    assert!(matches!(
        results[2],
        Err(StoreError::UnresolvableResultTime)
    ));
    assert_eq!(queries::count(&session, &ObservationFilter::new()).unwrap(), 3);
    // One unit row despite three resolutions.
    assert!(!caches.references.is_empty());
}

// ============================================================================
// Filters and extrema
// ============================================================================

#[test]
fn temporal_and_identifier_filters_conjoin() {
    let store = seeded(SchemaShape::LegacyFlat);
    insert_at(&store, "obs-1", ts(100), 1.0);
    insert_at(&store, "obs-2", ts(200), 2.0);
    insert_at(&store, "obs-3", ts(300), 3.0);

    let session = store.session();
    let filter = ObservationFilter::new()
        .with_procedures(["proc-1"])
        .with_temporal(TemporalFilter::new(
            TimeReference::PhenomenonTime,
            TemporalOperator::During,
            PhenomenonTime::Period(TimePeriod::new(ts(150), ts(250))),
        ));
    let records = queries::fetch(&session, &filter).unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].identifier, "obs-2");

    // An unknown procedure identifier matches nothing.
    let filter = ObservationFilter::new().with_procedures(["proc-unknown"]);
    assert_eq!(queries::count(&session, &filter).unwrap(), 0);
}

#[test]
fn latest_resolution_preserves_ties() {
    let store = seeded(SchemaShape::LegacyFlat);
    insert_at(&store, "early", ts(100), 1.0);
    insert_at(&store, "tied-a", ts(500), 2.0);
    insert_at(&store, "tied-b", ts(500), 3.0);
    insert_at(&store, "tied-c", ts(500), 4.0);

    let session = store.session();
    let filter = ObservationFilter::new().with_indeterminate(IndeterminateTime::Latest);
    let records = queries::fetch(&session, &filter).unwrap();
    let ids: Vec<&str> = records.iter().map(|r| r.identifier.as_str()).collect();
    assert_eq!(ids, ["tied-a", "tied-b", "tied-c"]);
}

#[test]
fn first_resolution_on_empty_set_is_empty() {
    let store = seeded(SchemaShape::LegacyFlat);
    let session = store.session();
    let filter = ObservationFilter::new().with_indeterminate(IndeterminateTime::First);
    assert!(queries::fetch(&session, &filter).unwrap().is_empty());
    assert_eq!(
        queries::extremum_time(&session, &ObservationFilter::new(), IndeterminateTime::First)
            .unwrap(),
        None
    );
}

#[test]
fn result_time_filter_switches_ordering() {
    let store = seeded(SchemaShape::LegacyFlat);
    let session = store.session();
    let mut caches = IngestCaches::new();
    // Result times in the reverse order of phenomenon times.
    for (id, phen, result) in [("a", 100, 900), ("b", 200, 800), ("c", 300, 700)] {
        let obs = Observation::new(PhenomenonTime::Instant(ts(phen)), quantity(0.0))
            .with_identifier(id)
            .with_result_time(ts(result));
        ingest::insert(
            &session,
            &obs,
            &[constellation()],
            &FeatureOfInterest::new("station-1", "sampling-point"),
            &mut caches,
        )
        .unwrap();
    }
    let filter = ObservationFilter::new().with_temporal(TemporalFilter::new(
        TimeReference::ResultTime,
        TemporalOperator::During,
        PhenomenonTime::Period(TimePeriod::new(ts(0), ts(1000))),
    ));
    let records = queries::fetch(&session, &filter).unwrap();
    let ids: Vec<&str> = records.iter().map(|r| r.identifier.as_str()).collect();
    assert_eq!(ids, ["c", "b", "a"]);
}

#[test]
fn spatial_filter_matches_feature_envelope() {
    let store = seeded(SchemaShape::LegacyFlat);
    insert_at(&store, "obs-1", ts(1), 1.0);

    let session = store.session();
    let near = ObservationFilter::new().with_spatial(SpatialFilter::bbox(Geometry::Polygon(
        vec![Point::new(7.0, 51.0), Point::new(8.0, 52.0)],
    )));
    assert_eq!(queries::count(&session, &near).unwrap(), 1);

    let far = ObservationFilter::new().with_spatial(SpatialFilter::bbox(Geometry::Polygon(
        vec![Point::new(0.0, 0.0), Point::new(1.0, 1.0)],
    )));
    assert_eq!(queries::count(&session, &far).unwrap(), 0);
}

#[test]
fn envelope_covers_feature_and_sampling_geometries() {
    let store = seeded(SchemaShape::LegacyFlat);
    let handle = insert_at(&store, "obs-1", ts(1), 1.0);
    let session = store.session();
    backfill_sampling_geometry(
        &session,
        &handle.identifier,
        Geometry::Point(Point::new(10.0, 60.0)),
    )
    .unwrap();

    let env = queries::envelope(&session, &ObservationFilter::new())
        .unwrap()
        .unwrap();
    assert_eq!(env.min_x, 7.5);
    assert_eq!(env.max_x, 10.0);
    assert_eq!(env.max_y, 60.0);
}

// ============================================================================
// Soft delete
// ============================================================================

#[test]
fn soft_deleted_observations_leave_default_paths() {
    let store = seeded(SchemaShape::LegacyFlat);
    insert_at(&store, "obs-1", ts(100), 1.0);
    insert_at(&store, "obs-2", ts(200), 2.0);

    let session = store.session();
    let affected = set_procedure_deleted(&session, "proc-1", true).unwrap();
    assert_eq!(affected, 2);

    assert_eq!(queries::count(&session, &ObservationFilter::new()).unwrap(), 0);
    let explicit = ObservationFilter::new().including_deleted();
    assert_eq!(queries::count(&session, &explicit).unwrap(), 2);

    // Un-deleting restores the default path.
    set_procedure_deleted(&session, "proc-1", false).unwrap();
    assert_eq!(queries::count(&session, &ObservationFilter::new()).unwrap(), 2);
}

#[test]
fn series_soft_delete_hides_series_observations() {
    let store = seeded(SchemaShape::NormalizedSeries);
    insert_at(&store, "obs-1", ts(100), 1.0);

    let session = store.session();
    set_procedure_deleted(&session, "proc-1", true).unwrap();
    assert_eq!(queries::count(&session, &ObservationFilter::new()).unwrap(), 0);
    assert_eq!(
        queries::count(&session, &ObservationFilter::new().including_deleted()).unwrap(),
        1
    );
}

// ============================================================================
// Cursors
// ============================================================================

#[test]
fn cursor_yields_all_rows_in_chunks() {
    let store = seeded(SchemaShape::LegacyFlat);
    for i in 0..7 {
        insert_at(&store, &format!("obs-{i}"), ts(i), i as f64);
    }
    let session = store.session();
    let mut cursor = queries::stream(&session, &ObservationFilter::new(), Some(3)).unwrap();
    assert_eq!(cursor.total(), 7);

    let mut fetches = 0;
    let mut seen = 0;
    while let Some(chunk) = cursor.next_chunk().unwrap() {
        fetches += 1;
        seen += chunk.len();
    }
    assert_eq!(seen, 7);
    assert_eq!(fetches, 3); // ceil(7 / 3)
    assert!(cursor.is_exhausted());
    cursor.close();
}

#[test]
fn cursor_without_chunk_size_scrolls_everything() {
    let store = seeded(SchemaShape::LegacyFlat);
    for i in 0..5 {
        insert_at(&store, &format!("obs-{i}"), ts(i), i as f64);
    }
    let session = store.session();
    let mut cursor = queries::stream(&session, &ObservationFilter::new(), None).unwrap();
    let chunk = cursor.next_chunk().unwrap().unwrap();
    assert_eq!(chunk.len(), 5);
    assert!(cursor.next_chunk().unwrap().is_none());
    cursor.close();
}

#[test]
fn closed_cursor_refuses_fetches() {
    let store = seeded(SchemaShape::LegacyFlat);
    insert_at(&store, "obs-1", ts(1), 1.0);
    let session = store.session();
    let mut cursor = queries::stream(&session, &ObservationFilter::new(), Some(1)).unwrap();
    cursor.close();
    assert!(matches!(cursor.next_chunk(), Err(StoreError::CursorClosed)));

    // A fresh cursor over the same session is unaffected.
    let mut cursor = queries::stream(&session, &ObservationFilter::new(), Some(1)).unwrap();
    assert!(cursor.next_chunk().unwrap().is_some());
    cursor.close();
}
