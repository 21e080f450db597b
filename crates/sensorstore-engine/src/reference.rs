//! Reference identity resolution: get-or-insert for low-cardinality shared
//! entities (units, codespaces, categories, observation types, feature
//! types, procedure description formats).
//!
//! Every write path for these entities goes through [`resolve`]; nothing in
//! the engine inserts a reference row unconditionally. An optional
//! per-batch [`ReferenceCache`] short-circuits repeated lookups within one
//! ingestion batch. The cache is a plain map: it is confined to one batch
//! and one thread, never shared across concurrent batches.

use ahash::AHashMap;

use sensorstore_model::ReferenceKind;

use crate::error::Result;
use crate::store::Session;

/// Handle to a persisted reference row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ReferenceId {
    pub kind: ReferenceKind,
    pub id: u32,
}

/// Per-batch natural-key cache. Consulted before the store, updated after
/// creation. Not thread-safe by design.
#[derive(Debug, Default)]
pub struct ReferenceCache {
    entries: AHashMap<(ReferenceKind, String), u32>,
}

impl ReferenceCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, kind: ReferenceKind, key: &str) -> Option<u32> {
        self.entries.get(&(kind, key.to_string())).copied()
    }

    pub fn put(&mut self, kind: ReferenceKind, key: &str, id: u32) {
        self.entries.insert((kind, key.to_string()), id);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Get-or-insert resolution for one reference entity.
///
/// Lookup by natural key; create when absent. The storage boundary's
/// uniqueness constraint (here: the natural-key map under the store's write
/// lock) resolves concurrent creation races — a loser simply observes the
/// winner's row on the retry lookup inside `upsert`. With a cache supplied,
/// the cache is consulted first and updated after creation.
pub fn resolve(
    session: &Session,
    kind: ReferenceKind,
    natural_key: &str,
    cache: Option<&mut ReferenceCache>,
) -> Result<ReferenceId> {
    if let Some(cache) = &cache {
        if let Some(id) = cache.get(kind, natural_key) {
            return Ok(ReferenceId { kind, id });
        }
    }

    // Fast path: read lock only.
    if let Some(id) = session.read().reference_table(kind).lookup(natural_key) {
        if let Some(cache) = cache {
            cache.put(kind, natural_key, id);
        }
        return Ok(ReferenceId { kind, id });
    }

    let (id, created) = session
        .write()
        .reference_table_mut(kind)
        .upsert(natural_key);
    if created {
        tracing::debug!(kind = kind.as_str(), key = natural_key, id, "created reference entity");
    }
    if let Some(cache) = cache {
        cache.put(kind, natural_key, id);
    }
    Ok(ReferenceId { kind, id })
}

/// Resolve an optional natural key, threading the cache through.
pub fn resolve_opt(
    session: &Session,
    kind: ReferenceKind,
    natural_key: Option<&str>,
    cache: Option<&mut ReferenceCache>,
) -> Result<Option<ReferenceId>> {
    match natural_key {
        Some(key) => resolve(session, kind, key, cache).map(Some),
        None => Ok(None),
    }
}

/// Reverse lookup for callers that hold a handle and want the natural key.
pub fn natural_key(session: &Session, handle: ReferenceId) -> Option<String> {
    session
        .read()
        .reference_table(handle.kind)
        .value(handle.id)
        .map(str::to_string)
}
