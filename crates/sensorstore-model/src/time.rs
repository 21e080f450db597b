//! Temporal model for observations.
//!
//! An observation's phenomenon time is either an instant or a period; the
//! engine stores both as a `[start, end]` pair (instant ⇒ `start == end`).
//! Requests may ask for an explicit range, or for the temporal extremum
//! ("first"/"latest") via [`IndeterminateTime`], which the engine resolves
//! with a two-phase extrema-then-refilter pass so that ties are preserved.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A closed time period. `start <= end` is a caller invariant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimePeriod {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimePeriod {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, t: DateTime<Utc>) -> bool {
        self.start <= t && t <= self.end
    }
}

/// The time at which the observed phenomenon applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PhenomenonTime {
    Instant(DateTime<Utc>),
    Period(TimePeriod),
}

impl PhenomenonTime {
    /// Start of the phenomenon time (the instant itself for instants).
    pub fn start(&self) -> DateTime<Utc> {
        match self {
            PhenomenonTime::Instant(t) => *t,
            PhenomenonTime::Period(p) => p.start,
        }
    }

    /// End of the phenomenon time (the instant itself for instants).
    pub fn end(&self) -> DateTime<Utc> {
        match self {
            PhenomenonTime::Instant(t) => *t,
            PhenomenonTime::Period(p) => p.end,
        }
    }

    pub fn is_instant(&self) -> bool {
        matches!(self, PhenomenonTime::Instant(_))
    }
}

/// Which persisted time field a temporal filter or extremum request targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TimeReference {
    PhenomenonTime,
    ResultTime,
}

/// A request for the temporal extremum instead of an explicit range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndeterminateTime {
    /// All observations sharing the minimum phenomenon-time start.
    First,
    /// All observations sharing the maximum phenomenon-time end.
    Latest,
}

/// Derived min/max phenomenon and result times for a procedure or offering.
///
/// Produced for capability reporting; never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TimeExtrema {
    pub min_phenomenon_time: Option<DateTime<Utc>>,
    pub max_phenomenon_time: Option<DateTime<Utc>>,
    pub min_result_time: Option<DateTime<Utc>>,
    pub max_result_time: Option<DateTime<Utc>>,
}

impl TimeExtrema {
    pub fn is_empty(&self) -> bool {
        self.min_phenomenon_time.is_none()
    }

    /// Fold one observation's times into the running extrema.
    pub fn extend(
        &mut self,
        phenomenon_start: DateTime<Utc>,
        phenomenon_end: DateTime<Utc>,
        result_time: DateTime<Utc>,
    ) {
        fold_min(&mut self.min_phenomenon_time, phenomenon_start);
        fold_max(&mut self.max_phenomenon_time, phenomenon_end);
        fold_min(&mut self.min_result_time, result_time);
        fold_max(&mut self.max_result_time, result_time);
    }
}

fn fold_min(slot: &mut Option<DateTime<Utc>>, t: DateTime<Utc>) {
    match slot {
        Some(cur) if *cur <= t => {}
        _ => *slot = Some(t),
    }
}

fn fold_max(slot: &mut Option<DateTime<Utc>>, t: DateTime<Utc>) {
    match slot {
        Some(cur) if *cur >= t => {}
        _ => *slot = Some(t),
    }
}
