//! Property tests for expansion idempotence, extrema ties, and reference
//! resolution determinism.

use chrono::{DateTime, TimeZone, Utc};
use proptest::prelude::*;

use sensorstore_engine::hierarchy::expand;
use sensorstore_engine::ingest::{self, IngestCaches};
use sensorstore_engine::queries;
use sensorstore_engine::reference::{resolve, ReferenceCache};
use sensorstore_engine::registry::{
    register_feature, register_observable_property, register_offering, register_procedure,
};
use sensorstore_engine::{ObservationStore, SchemaShape};
use sensorstore_model::{
    FeatureOfInterest, HierarchyDirection, HierarchyKind, IndeterminateTime, Observation,
    ObservationConstellation, ObservationFilter, ObservationValue, ObservableProperty, Offering,
    PhenomenonTime, Procedure, ReferenceKind,
};

fn ts(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).unwrap()
}

/// Build a procedure forest: `parents[i]` links procedure `i` to an earlier
/// procedure, guaranteeing acyclicity by construction.
fn forest_store(parents: &[Option<usize>]) -> ObservationStore {
    let store = ObservationStore::new(SchemaShape::LegacyFlat);
    let session = store.session();
    for (i, parent) in parents.iter().enumerate() {
        let mut procedure = Procedure::new(format!("proc-{i}"), "fmt");
        procedure.parent = parent.map(|p| format!("proc-{p}"));
        register_procedure(&session, &procedure, None).unwrap();
    }
    store
}

proptest! {
    #[test]
    fn expansion_is_idempotent(
        links in prop::collection::vec(prop::option::of(0usize..8), 1..16),
        include_roots in any::<bool>(),
    ) {
        // Clamp each parent link to an earlier index.
        let parents: Vec<Option<usize>> = links
            .iter()
            .enumerate()
            .map(|(i, l)| l.filter(|p| *p < i))
            .collect();
        let store = forest_store(&parents);
        let session = store.session();

        let roots = vec!["proc-0".to_string()];
        let once = expand(
            &session,
            HierarchyKind::Procedure,
            &roots,
            include_roots,
            HierarchyDirection::Children,
        )
        .unwrap();
        let flat: Vec<String> = once.iter().cloned().collect();
        let twice = expand(
            &session,
            HierarchyKind::Procedure,
            &flat,
            true,
            HierarchyDirection::Children,
        )
        .unwrap();
        prop_assert_eq!(once, twice);
    }

    #[test]
    fn latest_returns_every_tied_observation(
        offsets in prop::collection::vec(0i64..50, 1..24),
    ) {
        let store = ObservationStore::new(SchemaShape::LegacyFlat);
        let session = store.session();
        register_procedure(&session, &Procedure::new("p", "fmt"), None).unwrap();
        register_observable_property(&session, &ObservableProperty::new("v"), None).unwrap();
        register_offering(&session, &Offering::new("o"), None).unwrap();
        register_feature(&session, &FeatureOfInterest::new("f", "t"), None).unwrap();

        let mut caches = IngestCaches::new();
        for (i, offset) in offsets.iter().enumerate() {
            let obs = Observation::new(
                PhenomenonTime::Instant(ts(*offset)),
                ObservationValue::Count(i as i64),
            )
            .with_identifier(format!("obs-{i}"));
            ingest::insert(
                &session,
                &obs,
                &[ObservationConstellation::new("p", "v", "o")],
                &FeatureOfInterest::new("f", "t"),
                &mut caches,
            )
            .unwrap();
        }

        let max = *offsets.iter().max().unwrap();
        let expected = offsets.iter().filter(|o| **o == max).count();
        let filter = ObservationFilter::new().with_indeterminate(IndeterminateTime::Latest);
        let records = queries::fetch(&session, &filter).unwrap();
        prop_assert_eq!(records.len(), expected);
        for record in &records {
            prop_assert_eq!(record.phenomenon_time, PhenomenonTime::Instant(ts(max)));
        }
    }

    #[test]
    fn reference_resolution_never_duplicates(
        keys in prop::collection::vec("[a-z]{1,6}", 1..32),
    ) {
        let store = ObservationStore::new(SchemaShape::LegacyFlat);
        let session = store.session();
        let mut cache = ReferenceCache::new();

        let mut first_ids = Vec::new();
        for key in &keys {
            first_ids.push(resolve(&session, ReferenceKind::Unit, key, None).unwrap());
        }
        // Second pass through a cache must observe identical handles.
        for (key, first) in keys.iter().zip(&first_ids) {
            let second = resolve(&session, ReferenceKind::Unit, key, Some(&mut cache)).unwrap();
            prop_assert_eq!(*first, second);
        }
        // Distinct keys map to distinct ids, duplicates collapse.
        let distinct_keys: std::collections::BTreeSet<&String> = keys.iter().collect();
        let distinct_ids: std::collections::BTreeSet<u32> =
            first_ids.iter().map(|r| r.id).collect();
        prop_assert_eq!(distinct_ids.len(), distinct_keys.len());
    }
}
