//! Core domain types shared by every fleet component.
//!
//! A [`Task`] asks for a [`Requirement`] (item quantities) to be delivered to a
//! room. Rooms resolve to 2-D coordinates through a per-unit [`RoomTable`];
//! coordinates are only ever compared by straight-line distance.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// Identifier of an agent on the message bus (unit or dispatcher).
pub type AgentId = String;

/// Identifier of a delivery task.
pub type TaskId = String;

/// Kind of deliverable item (e.g. `"Type1"`).
pub type ItemKind = String;

/// Identifier of a delivery room (e.g. `"Room A-101"`).
pub type RoomId = String;

/// Item quantities keyed by kind.
///
/// Ordered by kind so that greedy walks over a requirement are deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Requirement(BTreeMap<ItemKind, u32>);

impl Requirement {
    /// Create an empty requirement
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// Quantity required for `kind` (zero when absent)
    pub fn get(&self, kind: &str) -> u32 {
        self.0.get(kind).copied().unwrap_or(0)
    }

    /// Set the quantity for `kind`, dropping the entry when zero
    pub fn set(&mut self, kind: impl Into<ItemKind>, qty: u32) {
        let kind = kind.into();
        if qty == 0 {
            self.0.remove(&kind);
        } else {
            self.0.insert(kind, qty);
        }
    }

    /// Add `qty` to the quantity for `kind`
    pub fn add(&mut self, kind: impl Into<ItemKind>, qty: u32) {
        let kind = kind.into();
        let current = self.get(&kind);
        self.set(kind, current.saturating_add(qty));
    }

    /// Iterate over `(kind, quantity)` pairs; zero quantities are never stored
    pub fn iter(&self) -> impl Iterator<Item = (&ItemKind, u32)> {
        self.0.iter().map(|(k, v)| (k, *v))
    }

    /// Kinds mentioned by this requirement
    pub fn kinds(&self) -> impl Iterator<Item = &ItemKind> {
        self.0.keys()
    }

    /// Sum of all quantities
    pub fn total(&self) -> u64 {
        self.0.values().map(|v| u64::from(*v)).sum()
    }

    /// True when every quantity is zero
    pub fn is_empty(&self) -> bool {
        self.0.values().all(|v| *v == 0)
    }

    /// True when `self` covers `other` item by item
    pub fn covers(&self, other: &Requirement) -> bool {
        other.iter().all(|(kind, qty)| self.get(kind) >= qty)
    }

    /// Item-wise `self - other`, clamped at zero
    pub fn saturating_sub(&self, other: &Requirement) -> Requirement {
        let mut out = Requirement::new();
        for (kind, qty) in self.iter() {
            out.set(kind.clone(), qty.saturating_sub(other.get(kind)));
        }
        out
    }
}

impl<K: Into<ItemKind>> FromIterator<(K, u32)> for Requirement {
    fn from_iter<I: IntoIterator<Item = (K, u32)>>(iter: I) -> Self {
        let mut req = Requirement::new();
        for (kind, qty) in iter {
            req.add(kind, qty);
        }
        req
    }
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, (kind, qty)) in self.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}: {}", kind, qty)?;
        }
        write!(f, "}}")
    }
}

/// A delivery task.
///
/// Immutable once created: units and the dispatcher pass tasks around by value
/// and never rewrite the requirement or the target. Wire names follow the task
/// source (`ID`, `medications`, `location`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    /// Unique task identifier
    #[serde(rename = "ID")]
    pub id: TaskId,
    /// Item quantities to deliver
    pub medications: Requirement,
    /// Destination room
    #[serde(rename = "location", alias = "room")]
    pub target: RoomId,
}

impl Task {
    /// Create a new task
    pub fn new(id: impl Into<TaskId>, medications: Requirement, target: impl Into<RoomId>) -> Self {
        Self {
            id: id.into(),
            medications,
            target: target.into(),
        }
    }

    /// Copy of this task carrying only `part` of the requirement
    pub fn fragment(&self, part: Requirement) -> Task {
        Task {
            id: self.id.clone(),
            medications: part,
            target: self.target.clone(),
        }
    }
}

/// Planar coordinate used for distance comparisons.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    /// X coordinate
    pub x: f64,
    /// Y coordinate
    pub y: f64,
}

impl Point {
    /// Create a new point
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Euclidean distance to `other`
    pub fn distance_to(&self, other: &Point) -> f64 {
        ((other.x - self.x).powi(2) + (other.y - self.y).powi(2)).sqrt()
    }
}

/// Static per-unit mapping from room to coordinate.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomTable(HashMap<RoomId, Point>);

impl RoomTable {
    /// Create an empty room table
    pub fn new() -> Self {
        Self(HashMap::new())
    }

    /// Register the coordinate of a room
    pub fn insert(&mut self, room: impl Into<RoomId>, at: Point) {
        self.0.insert(room.into(), at);
    }

    /// Coordinate of `room`, if known to this unit
    pub fn coords(&self, room: &str) -> Option<Point> {
        self.0.get(room).copied()
    }

    /// Number of known rooms
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True when no room is known
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<R: Into<RoomId>> FromIterator<(R, Point)> for RoomTable {
    fn from_iter<I: IntoIterator<Item = (R, Point)>>(iter: I) -> Self {
        let mut table = RoomTable::new();
        for (room, at) in iter {
            table.insert(room, at);
        }
        table
    }
}
