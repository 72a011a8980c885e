//! Unit Status - status, battery and capability reporting for MedFleet units
//!
//! This crate provides:
//! - The `Available` / `Delivering` / `Charging` status enum
//! - A guarded state machine that owns status and battery level
//! - The Capability Query schema and the dispatcher's selection rule
//!
//! # Battery Policy
//!
//! - Battery drains a fixed step per sampling tick outside `Charging`
//! - Below the threshold (20% by default) a unit refuses new work and heads
//!   to its charging station
//! - Battery returns to 100% only on a confirmed charge
//!
//! # Examples
//!
//! ```
//! use medfleet_unit_status::{BatteryPolicy, StatusEvent, StatusMachine, UnitStatus};
//!
//! let mut unit = StatusMachine::new(80, BatteryPolicy::default());
//! assert_eq!(unit.apply(StatusEvent::TaskAccepted), Ok(UnitStatus::Delivering));
//! ```

#![warn(missing_docs)]

pub mod machine;
pub mod schema;
pub mod types;

pub use machine::{StatusError, StatusMachine, FULL_BATTERY};
pub use schema::{select_by_battery, AvailabilityCheck, CapabilityReport};
pub use types::{BatteryPolicy, StatusEvent, TickOutcome, UnitStatus};
