//! Sensorstore Domain Model
//!
//! The shared vocabulary for the sensor-observation store: time types,
//! a minimal geometry model, the observation entities, and the declarative
//! filter objects that the engine translates into query plans.
//!
//! This crate is pure data. Storage layout, indexing, and query translation
//! live in `sensorstore-engine`; wire encodings (XML/JSON/OGC operations)
//! are out of scope entirely and belong to upstream layers.

pub mod entity;
pub mod filter;
pub mod geometry;
pub mod time;

pub use entity::{
    FeatureOfInterest, NamedValue, Observation, ObservationConstellation, ObservationValue,
    ObservableProperty, Offering, ParameterValue, Procedure, ReferenceKind,
    SpatialFilteringProfile,
};
pub use filter::{
    HierarchyDirection, HierarchyKind, ObservationFilter, SpatialFilter, SpatialOperator,
    TemporalFilter, TemporalOperator,
};
pub use geometry::{Envelope, Geometry, Point};
pub use time::{
    IndeterminateTime, PhenomenonTime, TimeExtrema, TimePeriod, TimeReference,
};
