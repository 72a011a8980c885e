//! End-to-end fleet scenarios
//!
//! This test suite validates:
//! - Dispatcher to unit handoff with the real message bus
//! - Delegation, split and contract-net allocation between live units
//! - Task requeue when the fleet cannot cover a task
//! - Battery-driven charging
//! - The HTTP task store as seen through the dispatcher's client

pub mod test_utils;

#[cfg(test)]
mod fleet_scenarios;

#[cfg(test)]
mod task_source_http;
