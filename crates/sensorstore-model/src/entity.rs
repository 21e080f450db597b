//! Domain entities of the observation store.
//!
//! These are the *conceptual* entities callers hand to (and receive from)
//! the engine. The engine's physical layout — interned identifiers, row
//! tables, bitmap indexes, and the legacy-flat vs normalized-series shapes —
//! lives in `sensorstore-engine::store` and never leaks into this crate.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::geometry::Geometry;
use crate::time::{PhenomenonTime, TimePeriod};

// ============================================================================
// Reference entities
// ============================================================================

/// The closed set of low-cardinality shared reference kinds.
///
/// Resolution for every kind is get-or-insert by natural key; being a closed
/// enum, there is no "unknown kind" runtime branch to defend against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReferenceKind {
    Unit,
    Codespace,
    Category,
    ObservationType,
    FeatureOfInterestType,
    ProcedureDescriptionFormat,
}

impl ReferenceKind {
    pub const ALL: [ReferenceKind; 6] = [
        ReferenceKind::Unit,
        ReferenceKind::Codespace,
        ReferenceKind::Category,
        ReferenceKind::ObservationType,
        ReferenceKind::FeatureOfInterestType,
        ReferenceKind::ProcedureDescriptionFormat,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ReferenceKind::Unit => "unit",
            ReferenceKind::Codespace => "codespace",
            ReferenceKind::Category => "category",
            ReferenceKind::ObservationType => "observation_type",
            ReferenceKind::FeatureOfInterestType => "feature_of_interest_type",
            ReferenceKind::ProcedureDescriptionFormat => "procedure_description_format",
        }
    }
}

// ============================================================================
// Identity-bearing entities
// ============================================================================

/// The sensor or process producing observations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Procedure {
    pub identifier: String,
    pub name: Option<String>,
    pub description: Option<String>,
    /// Identifier of the parent procedure, if this is an instance/child.
    pub parent: Option<String>,
    /// Natural key of the procedure description format (reference entity).
    pub description_format: String,
}

impl Procedure {
    pub fn new(identifier: impl Into<String>, description_format: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            name: None,
            description: None,
            parent: None,
            description_format: description_format.into(),
        }
    }
}

/// The phenomenon being measured. A composite phenomenon is a parent whose
/// components are persisted as their own properties with `hidden_child`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservableProperty {
    pub identifier: String,
    pub name: Option<String>,
    pub description: Option<String>,
    pub codespace: Option<String>,
    pub hidden_child: bool,
}

impl ObservableProperty {
    pub fn new(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            name: None,
            description: None,
            codespace: None,
            hidden_child: false,
        }
    }
}

/// The real-world entity an observation is about.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureOfInterest {
    pub identifier: String,
    pub name: Option<String>,
    pub codespace: Option<String>,
    /// Natural key of the feature-of-interest type (reference entity).
    pub feature_type: String,
    pub geometry: Option<Geometry>,
    /// Identifier of the parent feature, if any.
    pub parent: Option<String>,
}

impl FeatureOfInterest {
    pub fn new(identifier: impl Into<String>, feature_type: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            name: None,
            codespace: None,
            feature_type: feature_type.into(),
            geometry: None,
            parent: None,
        }
    }
}

/// A named grouping of observations advertised as a queryable collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Offering {
    pub identifier: String,
    pub name: Option<String>,
    pub allowed_observation_types: BTreeSet<String>,
    pub allowed_feature_types: BTreeSet<String>,
    pub related_features: BTreeSet<String>,
}

impl Offering {
    pub fn new(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            name: None,
            allowed_observation_types: BTreeSet::new(),
            allowed_feature_types: BTreeSet::new(),
            related_features: BTreeSet::new(),
        }
    }
}

/// A declared legal combination of procedure, property, offering, and
/// (optionally) observation type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservationConstellation {
    pub procedure: String,
    pub observable_property: String,
    pub offering: String,
    /// Natural key of the registered observation type, when declared.
    pub observation_type: Option<String>,
    /// Auto-derived from composite-phenomenon expansion; not directly
    /// addressable by external filters.
    pub hidden_child: bool,
    pub deleted: bool,
}

impl ObservationConstellation {
    pub fn new(
        procedure: impl Into<String>,
        observable_property: impl Into<String>,
        offering: impl Into<String>,
    ) -> Self {
        Self {
            procedure: procedure.into(),
            observable_property: observable_property.into(),
            offering: offering.into(),
            observation_type: None,
            hidden_child: false,
            deleted: false,
        }
    }

    pub fn with_observation_type(mut self, observation_type: impl Into<String>) -> Self {
        self.observation_type = Some(observation_type.into());
        self
    }
}

// ============================================================================
// Observation values and parameters
// ============================================================================

/// The concrete kind of an observation result.
///
/// `Complex` exists in the domain but has no mapped persisted representation;
/// ingestion rejects it explicitly rather than dropping it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ObservationValue {
    Boolean(bool),
    Count(i64),
    Category {
        value: String,
        codespace: Option<String>,
    },
    Quantity {
        value: f64,
        unit: Option<String>,
    },
    Text(String),
    Geometry(Geometry),
    Complex(Vec<NamedValue>),
}

impl ObservationValue {
    pub fn kind_name(&self) -> &'static str {
        match self {
            ObservationValue::Boolean(_) => "boolean",
            ObservationValue::Count(_) => "count",
            ObservationValue::Category { .. } => "category",
            ObservationValue::Quantity { .. } => "quantity",
            ObservationValue::Text(_) => "text",
            ObservationValue::Geometry(_) => "geometry",
            ObservationValue::Complex(_) => "complex",
        }
    }

    /// Unit natural key carried by the value, if any.
    pub fn unit(&self) -> Option<&str> {
        match self {
            ObservationValue::Quantity { unit, .. } => unit.as_deref(),
            _ => None,
        }
    }
}

/// Value of a named observation parameter. Only scalar kinds have a mapped
/// typed-parameter representation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ParameterValue {
    Boolean(bool),
    Count(i64),
    Category {
        value: String,
        codespace: Option<String>,
    },
    Quantity {
        value: f64,
        unit: Option<String>,
    },
    Text(String),
    /// Present in the domain, not persistable as a parameter.
    Geometry(Geometry),
}

impl ParameterValue {
    pub fn kind_name(&self) -> &'static str {
        match self {
            ParameterValue::Boolean(_) => "boolean",
            ParameterValue::Count(_) => "count",
            ParameterValue::Category { .. } => "category",
            ParameterValue::Quantity { .. } => "quantity",
            ParameterValue::Text(_) => "text",
            ParameterValue::Geometry(_) => "geometry",
        }
    }
}

/// A named parameter attached to an observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedValue {
    pub name: String,
    pub value: ParameterValue,
}

// ============================================================================
// Observation
// ============================================================================

/// A domain observation as handed to the ingestion pipeline.
///
/// Immutable once persisted except for the `deleted` flag and sampling-
/// geometry backfill; both of those live on the persisted row, not here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    /// Caller-supplied identifier; generated when absent.
    pub identifier: Option<String>,
    pub phenomenon_time: PhenomenonTime,
    /// Explicit result time; derived from the phenomenon time when absent
    /// and the phenomenon time is an instant.
    pub result_time: Option<DateTime<Utc>>,
    pub valid_time: Option<TimePeriod>,
    pub value: ObservationValue,
    /// Per-observation result geometry for spatial-filtering-profile use.
    pub sampling_geometry: Option<Geometry>,
    pub parameters: Vec<NamedValue>,
}

impl Observation {
    pub fn new(phenomenon_time: PhenomenonTime, value: ObservationValue) -> Self {
        Self {
            identifier: None,
            phenomenon_time,
            result_time: None,
            valid_time: None,
            value,
            sampling_geometry: None,
            parameters: Vec::new(),
        }
    }

    pub fn with_identifier(mut self, identifier: impl Into<String>) -> Self {
        self.identifier = Some(identifier.into());
        self
    }

    pub fn with_result_time(mut self, result_time: DateTime<Utc>) -> Self {
        self.result_time = Some(result_time);
        self
    }
}

/// Optional per-observation result geometry with definition/title metadata,
/// one-to-one with an observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpatialFilteringProfile {
    pub geometry: Geometry,
    pub definition: Option<String>,
    pub title: Option<String>,
}
