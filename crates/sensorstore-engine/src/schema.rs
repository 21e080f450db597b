//! Schema capability selection.
//!
//! The same domain is persisted under one of two shapes, and every query
//! builder goes through a [`QueryStrategy`] selected once per request rather
//! than branching on capability flags inline. The two strategies must yield
//! extensionally identical observation sets for identical filters; the
//! integration tests hold them to that.

use roaring::RoaringBitmap;
use serde::{Deserialize, Serialize};

use crate::error::{Result, StoreError};
use crate::store::{Session, StoreInner};

/// The active physical layout of the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SchemaShape {
    /// Observations carry procedure/property/feature foreign keys directly.
    LegacyFlat,
    /// Observations reference a series row materializing the triple.
    NormalizedSeries,
}

/// Optional entity types the active schema may or may not map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreCapabilities {
    /// Whether per-observation result geometries (spatial filtering profile)
    /// are mapped. When absent, profile filters and profile ingestion fail
    /// with an "option not supported" error instead of being ignored.
    pub spatial_profile: bool,
}

impl Default for StoreCapabilities {
    fn default() -> Self {
        Self {
            spatial_profile: true,
        }
    }
}

/// Shape-specific query building: how identifier filters reach observation
/// rows, and which rows are visible by default.
pub trait QueryStrategy: Sync {
    fn shape(&self) -> SchemaShape;

    fn observations_for_procedure(&self, store: &StoreInner, procedure: u32) -> RoaringBitmap;
    fn observations_for_property(&self, store: &StoreInner, property: u32) -> RoaringBitmap;
    fn observations_for_feature(&self, store: &StoreInner, feature: u32) -> RoaringBitmap;

    /// The default visible set: all observations minus soft-deleted rows and,
    /// under the series shape, minus rows of deleted or unpublished series.
    fn visible(&self, store: &StoreInner, include_deleted: bool) -> RoaringBitmap;
}

struct LegacyFlatStrategy;

impl QueryStrategy for LegacyFlatStrategy {
    fn shape(&self) -> SchemaShape {
        SchemaShape::LegacyFlat
    }

    fn observations_for_procedure(&self, store: &StoreInner, procedure: u32) -> RoaringBitmap {
        store
            .obs_by_procedure
            .get(&procedure)
            .cloned()
            .unwrap_or_default()
    }

    fn observations_for_property(&self, store: &StoreInner, property: u32) -> RoaringBitmap {
        store
            .obs_by_property
            .get(&property)
            .cloned()
            .unwrap_or_default()
    }

    fn observations_for_feature(&self, store: &StoreInner, feature: u32) -> RoaringBitmap {
        store
            .obs_by_feature
            .get(&feature)
            .cloned()
            .unwrap_or_default()
    }

    fn visible(&self, store: &StoreInner, include_deleted: bool) -> RoaringBitmap {
        if include_deleted {
            store.all_observations.clone()
        } else {
            &store.all_observations - &store.deleted_observations
        }
    }
}

struct NormalizedSeriesStrategy;

impl NormalizedSeriesStrategy {
    fn series_union<F>(&self, store: &StoreInner, pred: F) -> RoaringBitmap
    where
        F: Fn(&crate::store::SeriesRow) -> bool,
    {
        let mut out = RoaringBitmap::new();
        for series in store.series.iter().filter(|s| pred(s)) {
            if let Some(bm) = store.obs_by_series.get(&series.id) {
                out |= bm;
            }
        }
        out
    }
}

impl QueryStrategy for NormalizedSeriesStrategy {
    fn shape(&self) -> SchemaShape {
        SchemaShape::NormalizedSeries
    }

    fn observations_for_procedure(&self, store: &StoreInner, procedure: u32) -> RoaringBitmap {
        self.series_union(store, |s| s.procedure == procedure)
    }

    fn observations_for_property(&self, store: &StoreInner, property: u32) -> RoaringBitmap {
        self.series_union(store, |s| s.property == property)
    }

    fn observations_for_feature(&self, store: &StoreInner, feature: u32) -> RoaringBitmap {
        self.series_union(store, |s| s.feature == feature)
    }

    fn visible(&self, store: &StoreInner, include_deleted: bool) -> RoaringBitmap {
        let mut out = if include_deleted {
            store.all_observations.clone()
        } else {
            &store.all_observations - &store.deleted_observations
        };
        if !include_deleted {
            // Series-level visibility: deleted or unpublished series hide
            // their observations from default paths.
            for series in store.series.iter().filter(|s| s.deleted || !s.published) {
                if let Some(bm) = store.obs_by_series.get(&series.id) {
                    out -= bm;
                }
            }
        }
        out
    }
}

static STRATEGIES: [&dyn QueryStrategy; 2] = [&LegacyFlatStrategy, &NormalizedSeriesStrategy];

/// Select the strategy matching the session's active shape.
///
/// There is no silent fallback: a shape with no registered strategy is a
/// configuration error.
pub fn select_strategy(session: &Session) -> Result<&'static dyn QueryStrategy> {
    let shape = session.shape();
    STRATEGIES
        .iter()
        .copied()
        .find(|s| s.shape() == shape)
        .ok_or_else(|| {
            StoreError::UnsupportedSchema(format!("no query strategy for schema shape {shape:?}"))
        })
}

/// Fail unless the active schema maps the spatial filtering profile.
pub fn require_spatial_profile(store: &StoreInner) -> Result<()> {
    if store.capabilities.spatial_profile {
        Ok(())
    } else {
        Err(StoreError::UnsupportedSchema(
            "spatial filtering profile is not mapped by the active schema".to_string(),
        ))
    }
}
