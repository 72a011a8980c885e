//! Unit status types
//!
//! The externally visible status of a delivery unit and the events that move
//! it between states.

#![warn(missing_docs)]

use serde::{Deserialize, Serialize};
use std::fmt;

/// Operational status of a unit
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum UnitStatus {
    /// Idle and eligible for new work
    Available,
    /// Executing a delivery
    Delivering,
    /// Travelling to or sitting at its charging station
    Charging,
}

impl fmt::Display for UnitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            UnitStatus::Available => "Available",
            UnitStatus::Delivering => "Delivering",
            UnitStatus::Charging => "Charging",
        };
        f.write_str(name)
    }
}

/// Input to the status state machine
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum StatusEvent {
    /// The unit took on a delivery
    TaskAccepted,
    /// The delivery ended (confirmed or not)
    DeliveryFinished,
    /// A battery sample fell below the threshold
    BatteryLow,
    /// The charging goal resolved
    ChargeFinished {
        /// True when the bridge confirmed arrival at the station
        recharged: bool,
    },
}

/// Result of one battery sampling tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Battery drained to the contained level
    Drained(u8),
    /// Battery is below the threshold; the unit must go charging
    NeedsCharge,
    /// The unit is charging; nothing changes
    Charging,
}

/// Battery policy applied by the state machine
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct BatteryPolicy {
    /// Minimum battery for taking a task
    pub low_threshold: u8,
    /// Drain per sampling tick outside charging
    pub drain_per_tick: u8,
}

impl Default for BatteryPolicy {
    fn default() -> Self {
        Self {
            low_threshold: 20,
            drain_per_tick: 1,
        }
    }
}

impl From<&medfleet_core::BatteryConfig> for BatteryPolicy {
    fn from(config: &medfleet_core::BatteryConfig) -> Self {
        Self {
            low_threshold: config.low_threshold,
            drain_per_tick: config.drain_per_tick,
        }
    }
}
