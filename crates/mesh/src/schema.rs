//! Message bodies shared by units and the dispatcher.

use medfleet_core::{AgentId, Task, TaskId};
use serde::{Deserialize, Serialize};

/// Body of `inform/delivery_complete` and `inform/delivery_failed`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryReport {
    /// The task as the reporting unit holds it; for a failure this is the
    /// original, full requirement
    pub task: Task,
    /// Reporting unit
    pub unit: AgentId,
    /// Whether the actuation layer confirmed arrival
    #[serde(default)]
    pub confirmed: bool,
}

/// Body of `inform/delegation_notice`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelegationNotice {
    /// Task whose responsibility moved
    pub task_id: TaskId,
    /// Unit that held the task
    pub from: AgentId,
    /// Units now working it (the holder included when it keeps a share)
    pub to: Vec<AgentId>,
}

/// Body of `propose`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proposal {
    /// Task being bid on
    pub task_id: TaskId,
    /// Bidding unit
    pub bidder: AgentId,
    /// Sum of requested quantities
    pub cost: u64,
}

/// Body of `refuse`, `accept-proposal` and `reject-proposal`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRef {
    /// Referenced task
    pub task_id: TaskId,
}

impl TaskRef {
    /// Reference `task_id`
    pub fn new(task_id: impl Into<TaskId>) -> Self {
        Self {
            task_id: task_id.into(),
        }
    }
}
