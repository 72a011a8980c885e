//! Core functionality for the MedFleet delivery fleet.
//!
//! This crate provides the fundamental types, the per-unit inventory ledger,
//! configuration and logging used across the MedFleet workspace.

pub mod config;
pub mod ledger;
pub mod logging;
pub mod types;

pub use config::{
    BatteryConfig, ConfigError, DispatcherConfig, FleetConfig, LogFormat, NodeConfig,
    ProtocolConfig, SimulationConfig, StrategyKind, UnitConfig,
};
pub use ledger::{InventoryLedger, LedgerError};
pub use types::{AgentId, ItemKind, Point, Requirement, RoomId, RoomTable, Task, TaskId};
