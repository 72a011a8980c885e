//! Status and battery state machine
//!
//! A single transition function guarded by preconditions. Every status change
//! of a unit goes through [`StatusMachine::apply`]; anything not listed below
//! is rejected with [`StatusError::IllegalTransition`].
//!
//! ```text
//! Available  --TaskAccepted-->      Delivering   (battery >= threshold)
//! Delivering --DeliveryFinished-->  Available
//! Available  --BatteryLow-->        Charging
//! Delivering --BatteryLow-->        Charging
//! Charging   --ChargeFinished-->    Available    (battery = 100 only if recharged)
//! ```

use crate::types::{BatteryPolicy, StatusEvent, TickOutcome, UnitStatus};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Full battery level
pub const FULL_BATTERY: u8 = 100;

/// Errors from the state machine
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StatusError {
    /// The event is not valid in the current state
    #[error("Illegal transition: {event:?} while {from}")]
    IllegalTransition {
        /// State the unit was in
        from: UnitStatus,
        /// Rejected event
        event: StatusEvent,
    },

    /// Battery too low to accept a task
    #[error("Battery {battery}% below threshold {threshold}%")]
    BatteryTooLow {
        /// Current level
        battery: u8,
        /// Required minimum
        threshold: u8,
    },
}

/// Per-unit status and battery
#[derive(Debug, Clone)]
pub struct StatusMachine {
    status: UnitStatus,
    battery: u8,
    policy: BatteryPolicy,
}

impl StatusMachine {
    /// Start `Available` with the given battery
    pub fn new(battery: u8, policy: BatteryPolicy) -> Self {
        Self {
            status: UnitStatus::Available,
            battery: battery.min(FULL_BATTERY),
            policy,
        }
    }

    /// Current status
    pub fn status(&self) -> UnitStatus {
        self.status
    }

    /// Current battery percentage
    pub fn battery(&self) -> u8 {
        self.battery
    }

    /// Battery policy in force
    pub fn policy(&self) -> BatteryPolicy {
        self.policy
    }

    /// Battery below the threshold
    pub fn is_low(&self) -> bool {
        self.battery < self.policy.low_threshold
    }

    /// Available and charged enough to take a task
    pub fn may_take_tasks(&self) -> bool {
        self.status == UnitStatus::Available && !self.is_low()
    }

    /// Apply an event, returning the new status
    pub fn apply(&mut self, event: StatusEvent) -> Result<UnitStatus, StatusError> {
        let from = self.status;
        let next = match (from, event) {
            (UnitStatus::Available, StatusEvent::TaskAccepted) => {
                if self.is_low() {
                    return Err(StatusError::BatteryTooLow {
                        battery: self.battery,
                        threshold: self.policy.low_threshold,
                    });
                }
                UnitStatus::Delivering
            }
            (UnitStatus::Delivering, StatusEvent::DeliveryFinished) => UnitStatus::Available,
            (UnitStatus::Available | UnitStatus::Delivering, StatusEvent::BatteryLow) => {
                UnitStatus::Charging
            }
            (UnitStatus::Charging, StatusEvent::ChargeFinished { recharged }) => {
                if recharged {
                    self.battery = FULL_BATTERY;
                } else {
                    warn!(battery = self.battery, "Charge not confirmed, battery left unchanged");
                }
                UnitStatus::Available
            }
            (from, event) => return Err(StatusError::IllegalTransition { from, event }),
        };
        self.status = next;
        info!(from = %from, to = %next, battery = self.battery, "Status transition");
        Ok(next)
    }

    /// Sample the battery once
    ///
    /// The threshold is checked before draining, so a unit at 19% reports
    /// `NeedsCharge` on the very next tick.
    pub fn tick(&mut self) -> TickOutcome {
        if self.status == UnitStatus::Charging {
            return TickOutcome::Charging;
        }
        if self.is_low() {
            return TickOutcome::NeedsCharge;
        }
        self.battery = self.battery.saturating_sub(self.policy.drain_per_tick);
        debug!(battery = self.battery, status = %self.status, "Battery drained");
        TickOutcome::Drained(self.battery)
    }
}
