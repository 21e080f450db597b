//! Streaming result cursor.
//!
//! Forward-only, chunked access to a translated query's result set in the
//! ordering the translator established. Rows are resolved lazily per chunk;
//! the full record set is never materialized at once.
//!
//! Callers own the cursor lifecycle: [`ObservationCursor::close`] must run
//! on every exit path. A cursor dropped while open is a resource leak and
//! logs a warning.

use crate::error::{Result, StoreError};
use crate::queries::{record_from_row, ObservationRecord};
use crate::store::Session;

pub struct ObservationCursor {
    session: Session,
    ordered: Vec<u32>,
    position: usize,
    chunk_size: Option<usize>,
    closed: bool,
}

impl ObservationCursor {
    pub(crate) fn new(session: Session, ordered: Vec<u32>, chunk_size: Option<usize>) -> Self {
        Self {
            session,
            ordered,
            position: 0,
            chunk_size,
            closed: false,
        }
    }

    /// Fetch the next chunk, or `Ok(None)` once exhausted. Without a chunk
    /// size, the first fetch scrolls the entire remainder.
    pub fn next_chunk(&mut self) -> Result<Option<Vec<ObservationRecord>>> {
        if self.closed {
            return Err(StoreError::CursorClosed);
        }
        if self.position >= self.ordered.len() {
            return Ok(None);
        }
        let end = match self.chunk_size {
            Some(size) => (self.position + size.max(1)).min(self.ordered.len()),
            None => self.ordered.len(),
        };
        let store = self.session.read();
        let mut chunk = Vec::with_capacity(end - self.position);
        for &id in &self.ordered[self.position..end] {
            chunk.push(record_from_row(&store, &store.observations[id as usize])?);
        }
        self.position = end;
        Ok(Some(chunk))
    }

    pub fn is_exhausted(&self) -> bool {
        self.position >= self.ordered.len()
    }

    /// Total rows the cursor will yield over its lifetime.
    pub fn total(&self) -> usize {
        self.ordered.len()
    }

    /// Release the cursor. Safe on every exit path, including before
    /// exhaustion; any later fetch is [`StoreError::CursorClosed`].
    pub fn close(&mut self) {
        self.closed = true;
    }
}

impl Drop for ObservationCursor {
    fn drop(&mut self) {
        if !self.closed {
            tracing::warn!(
                remaining = self.ordered.len().saturating_sub(self.position),
                "observation cursor dropped without close()"
            );
        }
    }
}
