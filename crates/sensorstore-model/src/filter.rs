//! Declarative filter objects.
//!
//! The upstream request-validation layer builds these; the engine's filter
//! translator turns them into an executable query plan. Identifier filters
//! are conjunctive across kinds and disjunctive within one kind.

use serde::{Deserialize, Serialize};

use crate::geometry::Geometry;
use crate::time::{IndeterminateTime, PhenomenonTime, TimeReference};

/// Comparison applied by a temporal filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TemporalOperator {
    /// Instant equality, or exact period equality for periods.
    Equals,
    /// Strictly before the filter time's start.
    Before,
    /// Strictly after the filter time's end.
    After,
    /// Contained within the filter period.
    During,
}

/// A temporal restriction over the phenomenon or result time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemporalFilter {
    pub reference: TimeReference,
    pub operator: TemporalOperator,
    pub time: PhenomenonTime,
}

impl TemporalFilter {
    pub fn new(reference: TimeReference, operator: TemporalOperator, time: PhenomenonTime) -> Self {
        Self {
            reference,
            operator,
            time,
        }
    }
}

/// Bounding predicate over a geometry field. Only bounding-box is supported
/// (and only bounding-box is legal for the spatial-filtering-profile filter).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SpatialOperator {
    BBox,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpatialFilter {
    pub operator: SpatialOperator,
    pub geometry: Geometry,
}

impl SpatialFilter {
    pub fn bbox(geometry: Geometry) -> Self {
        Self {
            operator: SpatialOperator::BBox,
            geometry,
        }
    }
}

/// Which parent/child tree a hierarchy expansion walks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HierarchyKind {
    Procedure,
    Feature,
    ObservableProperty,
}

/// Direction of a hierarchy expansion relative to the roots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HierarchyDirection {
    /// Transitive children ("instances of" for procedures).
    Children,
    /// Transitive parents.
    Parents,
}

/// The composite request filter the engine translates.
///
/// Empty identifier vectors mean "no restriction of that kind". All supplied
/// restrictions combine with AND; members within one vector with OR.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ObservationFilter {
    pub procedures: Vec<String>,
    pub observable_properties: Vec<String>,
    pub features: Vec<String>,
    pub offerings: Vec<String>,
    pub temporal: Option<TemporalFilter>,
    /// Bounding predicate over the feature-of-interest geometry.
    pub spatial: Option<SpatialFilter>,
    /// Bounding predicate over the observation's own sampling geometry
    /// (spatial filtering profile). Applied only when present.
    pub result_spatial: Option<SpatialFilter>,
    /// Resolve the temporal extremum instead of a range.
    pub indeterminate: Option<IndeterminateTime>,
    /// Include soft-deleted observations (explicit opt-in).
    pub include_deleted: bool,
}

impl ObservationFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_procedures<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.procedures = ids.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_observable_properties<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.observable_properties = ids.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_features<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.features = ids.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_offerings<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.offerings = ids.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_temporal(mut self, temporal: TemporalFilter) -> Self {
        self.temporal = Some(temporal);
        self
    }

    pub fn with_spatial(mut self, spatial: SpatialFilter) -> Self {
        self.spatial = Some(spatial);
        self
    }

    pub fn with_result_spatial(mut self, spatial: SpatialFilter) -> Self {
        self.result_spatial = Some(spatial);
        self
    }

    pub fn with_indeterminate(mut self, which: IndeterminateTime) -> Self {
        self.indeterminate = Some(which);
        self
    }

    pub fn including_deleted(mut self) -> Self {
        self.include_deleted = true;
        self
    }

    /// True when no restriction of any kind is present.
    pub fn is_unrestricted(&self) -> bool {
        self.procedures.is_empty()
            && self.observable_properties.is_empty()
            && self.features.is_empty()
            && self.offerings.is_empty()
            && self.temporal.is_none()
            && self.spatial.is_none()
            && self.result_spatial.is_none()
            && self.indeterminate.is_none()
    }
}
