//! Minimal planar geometry model.
//!
//! The engine only needs enough geometry to (a) carry feature and sampling
//! geometries through ingestion and (b) evaluate bounding-box predicates
//! and compute result envelopes. Coordinates are plain `f64` pairs in
//! whatever CRS the upstream layer normalized to; CRS handling itself is
//! an upstream concern.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Axis-aligned bounding box.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl Envelope {
    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        Self {
            min_x,
            min_y,
            max_x,
            max_y,
        }
    }

    pub fn from_point(p: Point) -> Self {
        Self::new(p.x, p.y, p.x, p.y)
    }

    pub fn intersects(&self, other: &Envelope) -> bool {
        self.min_x <= other.max_x
            && self.max_x >= other.min_x
            && self.min_y <= other.max_y
            && self.max_y >= other.min_y
    }

    pub fn contains_point(&self, p: Point) -> bool {
        self.min_x <= p.x && p.x <= self.max_x && self.min_y <= p.y && p.y <= self.max_y
    }

    /// Smallest envelope covering both inputs.
    pub fn union(&self, other: &Envelope) -> Envelope {
        Envelope {
            min_x: self.min_x.min(other.min_x),
            min_y: self.min_y.min(other.min_y),
            max_x: self.max_x.max(other.max_x),
            max_y: self.max_y.max(other.max_y),
        }
    }
}

/// Geometry as the engine stores it: a point, a polyline, or a polygon
/// given by its outer ring. Bounding-box predicates only look at envelopes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Geometry {
    Point(Point),
    LineString(Vec<Point>),
    Polygon(Vec<Point>),
}

impl Geometry {
    /// Envelope of the geometry. Empty line strings and rings yield `None`.
    pub fn envelope(&self) -> Option<Envelope> {
        match self {
            Geometry::Point(p) => Some(Envelope::from_point(*p)),
            Geometry::LineString(pts) | Geometry::Polygon(pts) => {
                let mut iter = pts.iter();
                let first = iter.next()?;
                let mut env = Envelope::from_point(*first);
                for p in iter {
                    env = env.union(&Envelope::from_point(*p));
                }
                Some(env)
            }
        }
    }
}
