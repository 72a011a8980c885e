//! Configuration management for MedFleet.
//!
//! A single TOML document describes the whole fleet: the dispatcher, the
//! protocol windows shared by every unit, the battery policy and one
//! `[[units]]` table per delivery unit.

use crate::types::{AgentId, Point, Requirement, RoomTable};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file could not be read
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),

    /// Config file is not valid TOML for this schema
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// Config parsed but is inconsistent
    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Allocation strategy run by a unit that holds a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    /// Distance-driven delegation, then solo execution, then split
    #[default]
    DelegationSplit,
    /// Call-for-proposals with cost bids and reservations
    ContractNet,
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// Human-readable lines
    #[default]
    Pretty,
    /// One JSON object per line
    Json,
}

/// Full fleet configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FleetConfig {
    /// Process-level settings
    #[serde(default)]
    pub node: NodeConfig,
    /// Dispatcher settings
    #[serde(default)]
    pub dispatcher: DispatcherConfig,
    /// Peer protocol settings
    #[serde(default)]
    pub protocol: ProtocolConfig,
    /// Battery policy
    #[serde(default)]
    pub battery: BatteryConfig,
    /// Simulated physical layer
    #[serde(default)]
    pub simulation: SimulationConfig,
    /// Delivery units
    pub units: Vec<UnitConfig>,
}

/// Process-level settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Log output format
    #[serde(default)]
    pub log_format: LogFormat,
}

/// Dispatcher settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Bus identity of the dispatcher
    pub id: AgentId,
    /// Base URL of the task source service
    pub task_source_url: String,
    /// How often the task source is polled
    pub poll_interval_ms: u64,
    /// How often one pending task is allocated
    pub cycle_interval_ms: u64,
    /// Capability query collection window
    pub query_timeout_ms: u64,
    /// Age after which a silent assignment is requeued
    pub assignment_timeout_ms: u64,
    /// How many removed task ids are remembered for late reports
    pub completed_memory: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            id: "taskmanager".to_string(),
            task_source_url: "http://localhost:5001".to_string(),
            poll_interval_ms: 5_000,
            cycle_interval_ms: 1_000,
            query_timeout_ms: 3_000,
            assignment_timeout_ms: 300_000,
            completed_memory: 1_024,
        }
    }
}

impl DispatcherConfig {
    /// Poll interval as a `Duration`
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Cycle interval as a `Duration`
    pub fn cycle_interval(&self) -> Duration {
        Duration::from_millis(self.cycle_interval_ms)
    }

    /// Query window as a `Duration`
    pub fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.query_timeout_ms)
    }

    /// Assignment timeout as a `Duration`
    pub fn assignment_timeout(&self) -> Duration {
        Duration::from_millis(self.assignment_timeout_ms)
    }
}

/// Peer protocol settings shared by every unit
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolConfig {
    /// Allocation strategy
    pub strategy: StrategyKind,
    /// Capability query collection window
    pub query_timeout_ms: u64,
    /// Help request collection window
    pub help_timeout_ms: u64,
    /// Contract-net proposal collection window
    pub cfp_window_ms: u64,
    /// Bound on resolving a unit's own position
    pub locate_timeout_ms: u64,
    /// Bound on an actuation goal; absent means wait indefinitely
    pub goal_timeout_ms: Option<u64>,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            strategy: StrategyKind::DelegationSplit,
            query_timeout_ms: 3_000,
            help_timeout_ms: 3_000,
            cfp_window_ms: 3_000,
            locate_timeout_ms: 5_000,
            goal_timeout_ms: Some(120_000),
        }
    }
}

impl ProtocolConfig {
    /// Query window as a `Duration`
    pub fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.query_timeout_ms)
    }

    /// Help window as a `Duration`
    pub fn help_timeout(&self) -> Duration {
        Duration::from_millis(self.help_timeout_ms)
    }

    /// CFP window as a `Duration`
    pub fn cfp_window(&self) -> Duration {
        Duration::from_millis(self.cfp_window_ms)
    }

    /// Locate bound as a `Duration`
    pub fn locate_timeout(&self) -> Duration {
        Duration::from_millis(self.locate_timeout_ms)
    }

    /// Goal bound as a `Duration`
    pub fn goal_timeout(&self) -> Option<Duration> {
        self.goal_timeout_ms.map(Duration::from_millis)
    }
}

/// Battery policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatteryConfig {
    /// Below this level a unit stops taking tasks and goes charging
    pub low_threshold: u8,
    /// Percentage drained per sampling tick outside charging
    pub drain_per_tick: u8,
    /// Sampling period
    pub tick_interval_ms: u64,
}

impl Default for BatteryConfig {
    fn default() -> Self {
        Self {
            low_threshold: 20,
            drain_per_tick: 1,
            tick_interval_ms: 10_000,
        }
    }
}

impl BatteryConfig {
    /// Sampling period as a `Duration`
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}

/// Simulated physical layer
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Travel speed in coordinate units per second
    pub speed: f64,
    /// Probability that a goal aborts (0.0 to 1.0)
    pub abort_rate: f64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            speed: 2.0,
            abort_rate: 0.0,
        }
    }
}

/// One delivery unit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitConfig {
    /// Bus identity
    pub id: AgentId,
    /// Starting battery percentage
    #[serde(default = "full_battery")]
    pub battery: u8,
    /// Starting on-board stock
    pub stock: Requirement,
    /// Starting position
    pub position: Point,
    /// Where the unit recharges
    pub charging_station: Point,
    /// Room coordinates as seen by this unit
    #[serde(default)]
    pub rooms: RoomTable,
}

fn full_battery() -> u8 {
    100
}

impl FleetConfig {
    /// Load and validate a TOML config file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse and validate a TOML document
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: FleetConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the fleet cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.units.is_empty() {
            return Err(ConfigError::Invalid("fleet has no units".to_string()));
        }
        let mut seen = HashSet::new();
        for unit in &self.units {
            if !seen.insert(unit.id.as_str()) {
                return Err(ConfigError::Invalid(format!("duplicate unit id {}", unit.id)));
            }
            if unit.id == self.dispatcher.id {
                return Err(ConfigError::Invalid(format!(
                    "unit id {} collides with the dispatcher",
                    unit.id
                )));
            }
            if unit.battery > 100 {
                return Err(ConfigError::Invalid(format!(
                    "unit {} battery {} exceeds 100",
                    unit.id, unit.battery
                )));
            }
        }
        if self.battery.tick_interval_ms == 0 {
            return Err(ConfigError::Invalid("battery tick interval must be positive".to_string()));
        }
        if self.dispatcher.poll_interval_ms == 0 || self.dispatcher.cycle_interval_ms == 0 {
            return Err(ConfigError::Invalid("dispatcher intervals must be positive".to_string()));
        }
        if !(0.0..=1.0).contains(&self.simulation.abort_rate) {
            return Err(ConfigError::Invalid("abort_rate must be within 0..=1".to_string()));
        }
        Ok(())
    }

    /// Ids of every unit except `id`
    pub fn peers_of(&self, id: &str) -> Vec<AgentId> {
        self.units
            .iter()
            .filter(|u| u.id != id)
            .map(|u| u.id.clone())
            .collect()
    }

    /// Ids of every unit
    pub fn unit_ids(&self) -> Vec<AgentId> {
        self.units.iter().map(|u| u.id.clone()).collect()
    }

    /// Three-unit demo fleet with full stock
    pub fn default_config() -> Self {
        let stock: Requirement = [("Type1", 20), ("Type2", 20), ("Type3", 20), ("Type4", 20)]
            .into_iter()
            .collect();
        let unit = |id: &str, battery: u8, y: f64| UnitConfig {
            id: id.to_string(),
            battery,
            stock: stock.clone(),
            position: Point::new(0.0, y),
            charging_station: Point::new(0.0, y),
            rooms: [
                ("Room A-101", Point::new(-9.0, 0.5 + y)),
                ("Room B-202", Point::new(9.0, -5.0 + y)),
                ("Room C-303", Point::new(-9.0, -16.0 + y)),
            ]
            .into_iter()
            .collect(),
        };

        Self {
            node: NodeConfig::default(),
            dispatcher: DispatcherConfig::default(),
            protocol: ProtocolConfig::default(),
            battery: BatteryConfig::default(),
            simulation: SimulationConfig::default(),
            units: vec![
                unit("robot1", 100, 0.0),
                unit("robot2", 19, -2.5),
                unit("robot3", 100, -4.5),
            ],
        }
    }
}
