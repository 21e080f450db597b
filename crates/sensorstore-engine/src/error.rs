//! Engine error taxonomy.
//!
//! Validation errors propagate unchanged to the caller; storage-layer errors
//! are wrapped with the operation name and the identifiers involved. The
//! engine never swallows an error condition into an empty result.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    /// A domain value has no mapped persisted representation.
    #[error("unsupported observation value kind '{kind}'")]
    UnsupportedValueKind { kind: &'static str },

    /// A named parameter's value has no mapped persisted representation.
    #[error("unsupported parameter value kind '{kind}' for parameter '{name}'")]
    UnsupportedParameterKind { name: String, kind: &'static str },

    /// A period observation without an explicit result time.
    #[error("cannot derive result time from a time period without an explicit result time")]
    UnresolvableResultTime,

    /// The active schema supports neither query shape, or lacks an entity
    /// type a requested operation needs.
    #[error("schema capability not supported: {0}")]
    UnsupportedSchema(String),

    /// Requested observation type conflicts with the registered type for a
    /// (procedure, property, offering) triple.
    #[error(
        "observation type '{requested}' conflicts with registered type '{registered}' for \
         constellation ({procedure}, {observable_property}, {offering})"
    )]
    ObservationTypeMismatch {
        procedure: String,
        observable_property: String,
        offering: String,
        requested: String,
        registered: String,
    },

    /// Ingestion was handed no constellation to derive identity from.
    #[error("at least one observation constellation is required")]
    MissingConstellation,

    /// A parent/child walk revisited an identifier already on the path.
    #[error("hierarchy cycle detected at identifier '{identifier}'")]
    HierarchyCycle { identifier: String },

    /// An operation referenced an identifier that does not exist.
    #[error("unknown {kind} identifier '{identifier}'")]
    UnknownIdentifier {
        kind: &'static str,
        identifier: String,
    },

    /// An insert would duplicate a unique identifier.
    #[error("duplicate {kind} identifier '{identifier}'")]
    DuplicateIdentifier {
        kind: &'static str,
        identifier: String,
    },

    /// A fetch was attempted on a cursor that was already closed.
    #[error("cursor is closed")]
    CursorClosed,

    /// Snapshot save/load failure, wrapped with the operation context.
    #[error("snapshot {operation} failed: {source}")]
    Snapshot {
        operation: &'static str,
        #[source]
        source: anyhow::Error,
    },
}
