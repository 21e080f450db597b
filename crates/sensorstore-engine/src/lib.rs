//! Sensorstore Engine
//!
//! Server-side data-access engine for a sensor-observation store: it
//! translates declarative filters into schema-aware query plans, resolves
//! domain identifiers with create-or-reuse semantics, and persists incoming
//! observations with derived time fields and deduplicated reference data.
//!
//! The same domain is persisted under one of two shapes — a legacy flat
//! observation layout and a normalized series layout — and every query path
//! dispatches through a per-request strategy so filter semantics are
//! identical under both.
//!
//! ## Module Organization
//!
//! - `store`: row tables, bitmap indexes, and the request-scoped `Session`
//! - `schema`: shape selection (`LegacyFlat` / `NormalizedSeries` strategy)
//! - `translate`: filter objects → executable query plans
//! - `extrema`: two-phase "first"/"latest" resolution (ties preserved)
//! - `hierarchy`: worklist expansion of parent/child and composite trees
//! - `reference`: get-or-insert resolution for shared reference entities
//! - `registry`: create-or-reuse registration of identity-bearing entities
//! - `ingest`: the observation ingestion pipeline
//! - `queries`: materialize / count / extremum / envelope entry points
//! - `cursor`: chunked streaming over query results
//! - `persistence`: versioned binary store snapshots

pub mod cursor;
pub mod error;
pub mod extrema;
pub mod hierarchy;
pub mod ingest;
pub mod persistence;
pub mod queries;
pub mod reference;
pub mod registry;
pub mod schema;
pub mod store;
pub mod translate;

pub use cursor::ObservationCursor;
pub use error::{Result, StoreError};
pub use ingest::{IngestCaches, ObservationHandle, SAMPLING_GEOMETRY_PARAMETER};
pub use queries::ObservationRecord;
pub use reference::{ReferenceCache, ReferenceId};
pub use schema::{QueryStrategy, SchemaShape, StoreCapabilities};
pub use store::{ConstellationInfo, ObservationStore, Session};
pub use translate::{ObservationQuery, QueryOrdering};
