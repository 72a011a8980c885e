//! Actuation bridge between a delivery unit and its motion controller.
//!
//! A unit submits a goal (target coordinates) and waits for one definitive
//! outcome. The controller reports outcomes on its own task through a
//! [`GoalNotifier`]; the bridge guarantees that exactly one waiter is released
//! per goal and that a signal for an older goal never satisfies a newer wait.
//!
//! The wait may be bounded. An expired bound yields [`GoalOutcome::TimedOut`]
//! and clears the slot so the late signal is dropped.

#![warn(missing_docs)]

pub mod bridge;
pub mod controller;
pub mod error;
pub mod slot;

use serde::{Deserialize, Serialize};

pub use bridge::NavBridge;
pub use controller::{MotionController, SimulatedController};
pub use error::{BridgeError, BridgeResult};
pub use slot::{GoalId, GoalNotifier};

/// Definitive result of a goal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GoalOutcome {
    /// The controller reached the target
    Succeeded,
    /// The controller gave up
    Aborted,
    /// No outcome arrived within the bound
    TimedOut,
}

impl GoalOutcome {
    /// Arrival was confirmed
    pub fn is_success(self) -> bool {
        self == GoalOutcome::Succeeded
    }
}
