//! Indeterminate-time resolution: "first" and "latest" observation requests.
//!
//! Two phases, both against the same session:
//!
//! 1. project only the extremum aggregate over the already-filtered set
//!    (`min(phenomenon_time_start)` for first, `max(phenomenon_time_end)`
//!    for latest);
//! 2. drop the projection and restrict the filtered set by equality on the
//!    relevant time field against that extremum.
//!
//! This keeps *ties*: every observation sharing the extreme timestamp is
//! returned. A single `ORDER BY … LIMIT 1` would silently drop them, which
//! is exactly the shortcut this module exists to avoid.

use chrono::{DateTime, Utc};
use roaring::RoaringBitmap;

use sensorstore_model::IndeterminateTime;

use crate::store::{Session, StoreInner};
use crate::translate::ObservationQuery;

/// Phase 1: the extremum aggregate over the query's matched set.
/// `None` when the filtered set is empty.
pub fn extremum(session: &Session, query: &ObservationQuery, which: IndeterminateTime) -> Option<DateTime<Utc>> {
    let store = session.read();
    extremum_over(&store, &query.matched, which)
}

pub(crate) fn extremum_over(
    store: &StoreInner,
    matched: &RoaringBitmap,
    which: IndeterminateTime,
) -> Option<DateTime<Utc>> {
    let mut acc: Option<DateTime<Utc>> = None;
    for id in matched.iter() {
        let Some(row) = store.observation(id) else {
            continue;
        };
        let candidate = match which {
            IndeterminateTime::First => row.phenomenon_time_start,
            IndeterminateTime::Latest => row.phenomenon_time_end,
        };
        acc = Some(match (acc, which) {
            (None, _) => candidate,
            (Some(cur), IndeterminateTime::First) => cur.min(candidate),
            (Some(cur), IndeterminateTime::Latest) => cur.max(candidate),
        });
    }
    acc
}

/// Both phases: narrow the query's matched set to all observations sharing
/// the extremum. An empty filtered set resolves to an empty result, not an
/// error.
pub fn resolve(session: &Session, query: &ObservationQuery, which: IndeterminateTime) -> RoaringBitmap {
    let store = session.read();
    resolve_over(&store, &query.matched, which)
}

pub(crate) fn resolve_over(
    store: &StoreInner,
    matched: &RoaringBitmap,
    which: IndeterminateTime,
) -> RoaringBitmap {
    let Some(extremum) = extremum_over(store, matched, which) else {
        return RoaringBitmap::new();
    };
    let mut out = RoaringBitmap::new();
    for id in matched.iter() {
        let Some(row) = store.observation(id) else {
            continue;
        };
        let field = match which {
            IndeterminateTime::First => row.phenomenon_time_start,
            IndeterminateTime::Latest => row.phenomenon_time_end,
        };
        if field == extremum {
            out.insert(id);
        }
    }
    out
}
