//! The backing store: row tables, natural-key maps, and bitmap indexes.
//!
//! All strings that identify shared entities are stored once and referenced
//! by `u32` row ids; secondary lookups go through `RoaringBitmap` sets so the
//! filter translator can combine predicates with cheap set intersections.
//!
//! The store supports two physical layouts for the same domain:
//!
//! - **LegacyFlat** — every observation row carries its own procedure,
//!   property, and feature foreign keys; per-identity bitmaps are maintained
//!   directly.
//! - **NormalizedSeries** — observation rows reference a `SeriesRow` that
//!   materializes the (procedure, property, feature) triple; only the
//!   per-series bitmap is maintained and identity filters join through it.
//!
//! One store instance is built for exactly one layout. Query code never
//! branches on the layout itself; it goes through the strategy selected in
//! [`crate::schema`].
//!
//! The [`Session`] handle is the unit-of-work the engine is handed: a clone
//! of the shared store behind a `parking_lot::RwLock`. The engine never
//! creates or commits sessions on its own.

use std::collections::BTreeSet;
use std::sync::Arc;

use ahash::AHashMap;
use chrono::{DateTime, Utc};
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use roaring::RoaringBitmap;
use serde::{Deserialize, Serialize};

use sensorstore_model::{
    Geometry, ReferenceKind, SpatialFilteringProfile, TimePeriod,
};

use crate::error::{Result, StoreError};
use crate::schema::{SchemaShape, StoreCapabilities};

// ============================================================================
// Row types
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcedureRow {
    pub id: u32,
    pub identifier: String,
    pub name: Option<String>,
    pub description: Option<String>,
    pub parent: Option<u32>,
    /// Reference id into the procedure-description-format table.
    pub description_format: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PropertyRow {
    pub id: u32,
    pub identifier: String,
    pub name: Option<String>,
    pub description: Option<String>,
    /// Reference id into the codespace table.
    pub codespace: Option<u32>,
    /// Auto-derived component of a composite phenomenon.
    pub hidden_child: bool,
    pub parent: Option<u32>,
    /// Ordered component properties when this row is a composite phenomenon.
    pub components: Vec<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureRow {
    pub id: u32,
    pub identifier: String,
    pub name: Option<String>,
    pub codespace: Option<u32>,
    /// Reference id into the feature-of-interest-type table.
    pub feature_type: u32,
    pub geometry: Option<Geometry>,
    pub parent: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OfferingRow {
    pub id: u32,
    pub identifier: String,
    pub name: Option<String>,
    /// Reference ids into the observation-type table.
    pub allowed_observation_types: BTreeSet<u32>,
    /// Reference ids into the feature-of-interest-type table.
    pub allowed_feature_types: BTreeSet<u32>,
    /// Feature row ids of related features.
    pub related_features: BTreeSet<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConstellationRow {
    pub id: u32,
    pub procedure: u32,
    pub property: u32,
    pub offering: u32,
    /// Reference id into the observation-type table, once registered.
    pub observation_type: Option<u32>,
    pub hidden_child: bool,
    pub deleted: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeriesRow {
    pub id: u32,
    pub procedure: u32,
    pub property: u32,
    pub feature: u32,
    pub deleted: bool,
    pub published: bool,
}

/// Persisted observation value with shared strings resolved to reference ids.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TypedValue {
    Boolean(bool),
    Count(i64),
    Category { category: u32, codespace: Option<u32> },
    Quantity { value: f64 },
    Text(String),
    Geometry(Geometry),
}

/// Persisted named parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypedParameter {
    pub name: String,
    pub value: TypedParameterValue,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TypedParameterValue {
    Boolean(bool),
    Count(i64),
    Category { category: u32, codespace: Option<u32> },
    Quantity { value: f64, unit: Option<u32> },
    Text(String),
}

/// How an observation row is linked to its identity triple; which variant
/// appears is fixed by the store's schema shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ObservationLink {
    Flat {
        procedure: u32,
        property: u32,
        feature: u32,
    },
    Series {
        series: u32,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservationRow {
    pub id: u32,
    pub identifier: String,
    pub value: TypedValue,
    /// Reference id into the unit table.
    pub unit: Option<u32>,
    pub phenomenon_time_start: DateTime<Utc>,
    pub phenomenon_time_end: DateTime<Utc>,
    pub result_time: DateTime<Utc>,
    pub valid_time: Option<TimePeriod>,
    pub deleted: bool,
    /// Result geometry; backfillable after insert.
    pub sampling_geometry: Option<Geometry>,
    pub parameters: Vec<TypedParameter>,
    /// Offering row ids this observation is advertised under.
    pub offerings: Vec<u32>,
    pub link: ObservationLink,
}

// ============================================================================
// Reference tables
// ============================================================================

/// Append-only value table for one reference kind.
///
/// `upsert` has insert-on-conflict-do-nothing-then-reselect semantics: the
/// natural-key map is the uniqueness constraint, and a concurrent winner's
/// row is returned instead of a duplicate.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct ReferenceTable {
    values: Vec<String>,
    ids: AHashMap<String, u32>,
}

impl ReferenceTable {
    pub fn lookup(&self, key: &str) -> Option<u32> {
        self.ids.get(key).copied()
    }

    pub fn value(&self, id: u32) -> Option<&str> {
        self.values.get(id as usize).map(String::as_str)
    }

    /// Get-or-insert by natural key. Returns `(id, created)`.
    pub fn upsert(&mut self, key: &str) -> (u32, bool) {
        if let Some(id) = self.ids.get(key) {
            return (*id, false);
        }
        let id = self.values.len() as u32;
        self.values.push(key.to_string());
        self.ids.insert(key.to_string(), id);
        (id, true)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

// ============================================================================
// Store
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct StoreInner {
    pub shape: SchemaShape,
    pub capabilities: StoreCapabilities,

    /// One table per [`ReferenceKind`], indexed by `ReferenceKind as usize`
    /// order of [`ReferenceKind::ALL`].
    pub references: Vec<ReferenceTable>,

    pub procedures: Vec<ProcedureRow>,
    pub procedure_ids: AHashMap<String, u32>,
    pub procedure_children: AHashMap<u32, Vec<u32>>,

    pub properties: Vec<PropertyRow>,
    pub property_ids: AHashMap<String, u32>,
    pub property_children: AHashMap<u32, Vec<u32>>,

    pub features: Vec<FeatureRow>,
    pub feature_ids: AHashMap<String, u32>,
    pub feature_children: AHashMap<u32, Vec<u32>>,

    pub offerings: Vec<OfferingRow>,
    pub offering_ids: AHashMap<String, u32>,

    pub constellations: Vec<ConstellationRow>,
    /// (procedure, property, offering) -> constellation row.
    pub constellation_ids: AHashMap<(u32, u32, u32), u32>,

    pub series: Vec<SeriesRow>,
    /// (procedure, property, feature) -> series row.
    pub series_ids: AHashMap<(u32, u32, u32), u32>,

    pub observations: Vec<ObservationRow>,
    pub observation_ids: AHashMap<String, u32>,
    /// One-to-one result-geometry profiles, keyed by observation row id.
    pub profiles: AHashMap<u32, SpatialFilteringProfile>,

    // ── Bitmap indexes ───────────────────────────────────────────
    pub all_observations: RoaringBitmap,
    pub deleted_observations: RoaringBitmap,
    /// Maintained under LegacyFlat only.
    pub obs_by_procedure: AHashMap<u32, RoaringBitmap>,
    /// Maintained under LegacyFlat only.
    pub obs_by_property: AHashMap<u32, RoaringBitmap>,
    /// Maintained under LegacyFlat only.
    pub obs_by_feature: AHashMap<u32, RoaringBitmap>,
    /// Maintained under NormalizedSeries only.
    pub obs_by_series: AHashMap<u32, RoaringBitmap>,
    pub obs_by_offering: AHashMap<u32, RoaringBitmap>,
}

impl StoreInner {
    pub fn new(shape: SchemaShape) -> Self {
        Self::with_capabilities(shape, StoreCapabilities::default())
    }

    pub fn with_capabilities(shape: SchemaShape, capabilities: StoreCapabilities) -> Self {
        Self {
            shape,
            capabilities,
            references: vec![ReferenceTable::default(); ReferenceKind::ALL.len()],
            procedures: Vec::new(),
            procedure_ids: AHashMap::new(),
            procedure_children: AHashMap::new(),
            properties: Vec::new(),
            property_ids: AHashMap::new(),
            property_children: AHashMap::new(),
            features: Vec::new(),
            feature_ids: AHashMap::new(),
            feature_children: AHashMap::new(),
            offerings: Vec::new(),
            offering_ids: AHashMap::new(),
            constellations: Vec::new(),
            constellation_ids: AHashMap::new(),
            series: Vec::new(),
            series_ids: AHashMap::new(),
            observations: Vec::new(),
            observation_ids: AHashMap::new(),
            profiles: AHashMap::new(),
            all_observations: RoaringBitmap::new(),
            deleted_observations: RoaringBitmap::new(),
            obs_by_procedure: AHashMap::new(),
            obs_by_property: AHashMap::new(),
            obs_by_feature: AHashMap::new(),
            obs_by_series: AHashMap::new(),
            obs_by_offering: AHashMap::new(),
        }
    }

    // ── Reference access ─────────────────────────────────────────

    pub fn reference_table(&self, kind: ReferenceKind) -> &ReferenceTable {
        &self.references[reference_index(kind)]
    }

    pub fn reference_table_mut(&mut self, kind: ReferenceKind) -> &mut ReferenceTable {
        &mut self.references[reference_index(kind)]
    }

    // ── Row lookups ──────────────────────────────────────────────

    pub fn procedure_by_identifier(&self, identifier: &str) -> Option<&ProcedureRow> {
        self.procedure_ids
            .get(identifier)
            .map(|id| &self.procedures[*id as usize])
    }

    pub fn property_by_identifier(&self, identifier: &str) -> Option<&PropertyRow> {
        self.property_ids
            .get(identifier)
            .map(|id| &self.properties[*id as usize])
    }

    pub fn feature_by_identifier(&self, identifier: &str) -> Option<&FeatureRow> {
        self.feature_ids
            .get(identifier)
            .map(|id| &self.features[*id as usize])
    }

    pub fn offering_by_identifier(&self, identifier: &str) -> Option<&OfferingRow> {
        self.offering_ids
            .get(identifier)
            .map(|id| &self.offerings[*id as usize])
    }

    pub fn observation(&self, id: u32) -> Option<&ObservationRow> {
        self.observations.get(id as usize)
    }

    /// Resolve the (procedure, property, feature) triple of an observation,
    /// joining through the series row under the normalized shape.
    pub fn observation_identity(&self, row: &ObservationRow) -> (u32, u32, u32) {
        match row.link {
            ObservationLink::Flat {
                procedure,
                property,
                feature,
            } => (procedure, property, feature),
            ObservationLink::Series { series } => {
                let s = &self.series[series as usize];
                (s.procedure, s.property, s.feature)
            }
        }
    }

    // ── Observation insertion (index maintenance) ────────────────

    /// Append a fully built observation row and maintain every index that is
    /// live for the active shape. The caller (ingestion pipeline) has already
    /// resolved all references and derived all time fields.
    pub fn push_observation(&mut self, mut row: ObservationRow) -> Result<u32> {
        if self.observation_ids.contains_key(&row.identifier) {
            return Err(StoreError::DuplicateIdentifier {
                kind: "observation",
                identifier: row.identifier,
            });
        }
        let id = self.observations.len() as u32;
        row.id = id;

        self.all_observations.insert(id);
        if row.deleted {
            self.deleted_observations.insert(id);
        }
        match row.link {
            ObservationLink::Flat {
                procedure,
                property,
                feature,
            } => {
                debug_assert_eq!(self.shape, SchemaShape::LegacyFlat);
                bitmap_insert(&mut self.obs_by_procedure, procedure, id);
                bitmap_insert(&mut self.obs_by_property, property, id);
                bitmap_insert(&mut self.obs_by_feature, feature, id);
            }
            ObservationLink::Series { series } => {
                debug_assert_eq!(self.shape, SchemaShape::NormalizedSeries);
                bitmap_insert(&mut self.obs_by_series, series, id);
            }
        }
        for offering in &row.offerings {
            bitmap_insert(&mut self.obs_by_offering, *offering, id);
        }
        self.observation_ids.insert(row.identifier.clone(), id);
        self.observations.push(row);
        Ok(id)
    }

    /// Flip the deleted flag of one observation, keeping the bitmap in sync.
    pub fn set_observation_deleted(&mut self, id: u32, deleted: bool) {
        if let Some(row) = self.observations.get_mut(id as usize) {
            row.deleted = deleted;
            if deleted {
                self.deleted_observations.insert(id);
            } else {
                self.deleted_observations.remove(id);
            }
        }
    }
}

fn reference_index(kind: ReferenceKind) -> usize {
    match kind {
        ReferenceKind::Unit => 0,
        ReferenceKind::Codespace => 1,
        ReferenceKind::Category => 2,
        ReferenceKind::ObservationType => 3,
        ReferenceKind::FeatureOfInterestType => 4,
        ReferenceKind::ProcedureDescriptionFormat => 5,
    }
}

pub(crate) fn bitmap_insert(map: &mut AHashMap<u32, RoaringBitmap>, key: u32, id: u32) {
    map.entry(key).or_default().insert(id);
}

// ============================================================================
// Store handle and session
// ============================================================================

/// The owning handle created once at startup.
#[derive(Debug)]
pub struct ObservationStore {
    inner: Arc<RwLock<StoreInner>>,
}

impl ObservationStore {
    pub fn new(shape: SchemaShape) -> Self {
        Self::with_capabilities(shape, StoreCapabilities::default())
    }

    pub fn with_capabilities(shape: SchemaShape, capabilities: StoreCapabilities) -> Self {
        tracing::debug!(?shape, ?capabilities, "creating observation store");
        Self {
            inner: Arc::new(RwLock::new(StoreInner::with_capabilities(
                shape,
                capabilities,
            ))),
        }
    }

    pub(crate) fn from_inner(inner: StoreInner) -> Self {
        Self {
            inner: Arc::new(RwLock::new(inner)),
        }
    }

    /// Open a request-scoped session. The engine is handed sessions; it
    /// never commits or spans them itself.
    pub fn session(&self) -> Session {
        Session {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// Constellation state for one (procedure, property, offering) triple, with
/// the observation type resolved back to its natural key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConstellationInfo {
    pub observation_type: Option<String>,
    pub hidden_child: bool,
    pub deleted: bool,
}

/// Request-scoped unit of work over the store.
///
/// Cloning is cheap (shared `Arc`), but a session and anything derived from
/// it (caches, cursors) is meant for a single request thread.
#[derive(Clone)]
pub struct Session {
    pub(crate) inner: Arc<RwLock<StoreInner>>,
}

impl Session {
    pub(crate) fn read(&self) -> RwLockReadGuard<'_, StoreInner> {
        self.inner.read()
    }

    pub(crate) fn write(&self) -> RwLockWriteGuard<'_, StoreInner> {
        self.inner.write()
    }

    pub fn shape(&self) -> SchemaShape {
        self.read().shape
    }

    pub fn observation_count(&self) -> u64 {
        self.read().all_observations.len()
    }

    // Row-id lookups for callers that drive the registry directly.

    pub fn procedure_id(&self, identifier: &str) -> Option<u32> {
        self.read().procedure_ids.get(identifier).copied()
    }

    pub fn property_id(&self, identifier: &str) -> Option<u32> {
        self.read().property_ids.get(identifier).copied()
    }

    pub fn feature_id(&self, identifier: &str) -> Option<u32> {
        self.read().feature_ids.get(identifier).copied()
    }

    pub fn offering_id(&self, identifier: &str) -> Option<u32> {
        self.read().offering_ids.get(identifier).copied()
    }

    /// The registered constellation for one identity triple, if any.
    pub fn constellation(
        &self,
        procedure: u32,
        property: u32,
        offering: u32,
    ) -> Option<ConstellationInfo> {
        let store = self.read();
        let id = *store.constellation_ids.get(&(procedure, property, offering))?;
        let row = &store.constellations[id as usize];
        Some(ConstellationInfo {
            observation_type: row.observation_type.and_then(|t| {
                store
                    .reference_table(ReferenceKind::ObservationType)
                    .value(t)
                    .map(str::to_string)
            }),
            hidden_child: row.hidden_child,
            deleted: row.deleted,
        })
    }
}
