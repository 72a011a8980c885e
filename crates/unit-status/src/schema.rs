//! Capability Query wire schema.
//!
//! `inform/availability_check` carries an [`AvailabilityCheck`]; the answer is
//! `inform/availability_response` carrying a [`CapabilityReport`]. The same
//! report answers the dispatcher's `inform/availability` re-confirmation.

use crate::types::UnitStatus;
use medfleet_core::{AgentId, Point, Requirement, RoomId};
use serde::{Deserialize, Serialize};

/// Capability query body.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct AvailabilityCheck {
    /// Room the requester wants distances to, if any.
    #[serde(default)]
    pub target: Option<RoomId>,
}

/// Capability snapshot of one unit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CapabilityReport {
    /// Reporting unit.
    pub unit: AgentId,
    /// Status at the time of the report.
    pub status: UnitStatus,
    /// Free stock (on hand minus reservations).
    pub stock: Requirement,
    /// Battery percentage.
    pub battery: u8,
    /// Reporter's position; absent when it could not be resolved in time.
    #[serde(default)]
    pub position: Option<Point>,
    /// Reporter's coordinates for the queried room.
    #[serde(default)]
    pub room_coords: Option<Point>,
    /// Reporter's own distance to the queried room.
    #[serde(default)]
    pub distance_to_target: Option<f64>,
}

impl CapabilityReport {
    /// Reported as `Available`.
    pub fn is_available(&self) -> bool {
        self.status == UnitStatus::Available
    }

    /// Reported free stock covers `required`.
    pub fn can_fulfill(&self, required: &Requirement) -> bool {
        self.stock.covers(required)
    }

    /// Distance from the reporter to the target, as judged by the requester.
    ///
    /// Uses the requester's coordinates for the room when it has them,
    /// otherwise the reporter's. Falls back to the reported distance and then
    /// to infinity, which is never selected.
    pub fn resolved_distance(&self, requester_room_coords: Option<Point>) -> f64 {
        let target = requester_room_coords.or(self.room_coords);
        let distance = match (self.position, target) {
            (Some(at), Some(room)) => Some(at.distance_to(&room)),
            _ => self.distance_to_target,
        };
        match distance {
            Some(d) if d.is_finite() => d,
            _ => f64::INFINITY,
        }
    }
}

/// Available report with the highest battery; ties go to the first seen.
pub fn select_by_battery(reports: &[CapabilityReport]) -> Option<&CapabilityReport> {
    let mut best: Option<&CapabilityReport> = None;
    for report in reports.iter().filter(|r| r.is_available()) {
        match best {
            Some(b) if b.battery >= report.battery => {}
            _ => best = Some(report),
        }
    }
    best
}
