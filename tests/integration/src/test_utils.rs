//! Harness for running a whole fleet in one process

use medfleet_allocation::{Unit, UnitResult};
use medfleet_core::{AgentId, FleetConfig, Requirement, StrategyKind, Task};
use medfleet_dispatch::{Dispatcher, InMemoryTaskSource};
use medfleet_mesh::MessageBus;
use medfleet_nav_bridge::{NavBridge, SimulatedController};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Install a test-friendly subscriber once per process
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// Demo fleet with timings short enough for tests
pub fn fast_config(strategy: StrategyKind) -> FleetConfig {
    let mut config = FleetConfig::default_config();
    config.protocol.strategy = strategy;
    config.protocol.query_timeout_ms = 200;
    config.protocol.help_timeout_ms = 200;
    config.protocol.cfp_window_ms = 200;
    config.protocol.locate_timeout_ms = 100;
    config.protocol.goal_timeout_ms = Some(2_000);
    config.battery.tick_interval_ms = 60_000;
    config.simulation.speed = 1_000.0;
    config.dispatcher.poll_interval_ms = 100;
    config.dispatcher.cycle_interval_ms = 150;
    config.dispatcher.query_timeout_ms = 200;
    config.dispatcher.assignment_timeout_ms = 30_000;
    config
}

/// Requirement from `(kind, quantity)` pairs
pub fn req(items: &[(&str, u32)]) -> Requirement {
    items.iter().map(|(k, v)| (*k, *v)).collect()
}

/// A fleet running on its own bus
pub struct RunningFleet {
    /// Shared bus
    pub bus: MessageBus,
    /// Task store the dispatcher polls
    pub source: InMemoryTaskSource,
    /// Simulated controllers by unit, for scripting goal outcomes
    pub controllers: HashMap<AgentId, SimulatedController>,
    dispatcher_id: AgentId,
    units: Vec<(AgentId, JoinHandle<UnitResult<Unit>>)>,
    dispatcher: Option<JoinHandle<Dispatcher>>,
}

/// Agents handed back after shutdown
pub struct StoppedFleet {
    /// Units by id
    pub units: HashMap<AgentId, Unit>,
    /// The dispatcher, when one was running
    pub dispatcher: Option<Dispatcher>,
}

impl RunningFleet {
    /// Start every configured unit and a dispatcher over `tasks`
    pub async fn start(config: &FleetConfig, tasks: Vec<Task>) -> Self {
        let mut fleet = Self::start_units(config).await;
        fleet.source = InMemoryTaskSource::with_tasks(tasks).await;
        let dispatcher = Dispatcher::register(
            config.dispatcher.clone(),
            Arc::new(fleet.source.clone()),
            fleet.bus.clone(),
            config.unit_ids(),
        )
        .await;
        fleet.dispatcher = Some(tokio::spawn(dispatcher.run()));
        fleet
    }

    /// Start every configured unit without a dispatcher
    pub async fn start_units(config: &FleetConfig) -> Self {
        init_tracing();
        let bus = MessageBus::new();
        let mut controllers = HashMap::new();
        let mut units = Vec::new();
        for unit_config in &config.units {
            let controller = SimulatedController::new(unit_config.position, &config.simulation);
            let bridge = NavBridge::new(Arc::new(controller.clone()), config.protocol.locate_timeout());
            let unit = Unit::register(unit_config, config, bus.clone(), bridge).await;
            controllers.insert(unit_config.id.clone(), controller);
            units.push((unit_config.id.clone(), tokio::spawn(unit.run())));
        }
        Self {
            bus,
            source: InMemoryTaskSource::new(),
            controllers,
            dispatcher_id: config.dispatcher.id.clone(),
            units,
            dispatcher: None,
        }
    }

    /// Wait until the task store is empty; false on timeout
    pub async fn wait_until_drained(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if self.source.is_empty().await {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        self.source.is_empty().await
    }

    /// Unregister everyone and collect the agents
    pub async fn stop(self) -> StoppedFleet {
        self.bus.unregister(&self.dispatcher_id).await;
        let dispatcher = match self.dispatcher {
            Some(handle) => Some(handle.await.unwrap()),
            None => None,
        };

        for (id, _) in &self.units {
            self.bus.unregister(id).await;
        }
        let mut units = HashMap::new();
        for (id, handle) in self.units {
            let unit = handle.await.unwrap().unwrap();
            units.insert(id, unit);
        }
        StoppedFleet { units, dispatcher }
    }
}

impl StoppedFleet {
    /// On-hand quantity of `kind` at `unit`
    pub fn stock(&self, unit: &str, kind: &str) -> u32 {
        self.units[unit].ledger().stock().get(kind)
    }

    /// Fleet-wide on-hand quantity of `kind`
    pub fn fleet_stock(&self, kind: &str) -> u32 {
        self.units.values().map(|u| u.ledger().stock().get(kind)).sum()
    }

    /// True when no unit holds a reservation or an open bid
    pub fn nothing_reserved(&self) -> bool {
        self.units
            .values()
            .all(|u| u.ledger().reserved().is_empty() && u.open_bids().is_empty())
    }
}
