//! One allocation interface over the configured strategy.

use crate::error::UnitResult;
use crate::unit::Unit;
use medfleet_core::{AgentId, Requirement, StrategyKind, Task};
use serde::{Deserialize, Serialize};

/// How a held task was placed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Outcome {
    /// The whole task went to a closer peer
    Delegated {
        /// Peer now responsible
        to: AgentId,
    },
    /// The task was partitioned; the holder may be among the contributors
    Split {
        /// Contributor and its share, in plan order
        contributors: Vec<(AgentId, Requirement)>,
    },
    /// The holder delivered the task itself
    SelfExecuted {
        /// Whether arrival was confirmed by the actuation layer
        confirmed: bool,
    },
    /// A contract-net bid was accepted
    Awarded {
        /// Winning bidder
        winner: AgentId,
        /// Its bid
        cost: u64,
    },
    /// Nothing worked; the task went back to the dispatcher unchanged
    Failed,
}

impl Unit {
    /// Place `task` using the configured strategy
    pub async fn try_allocate(&mut self, task: Task) -> UnitResult<Outcome> {
        match self.protocol.strategy {
            StrategyKind::DelegationSplit => self.allocate_by_delegation(task).await,
            StrategyKind::ContractNet => self.allocate_by_contract_net(task).await,
        }
    }
}
