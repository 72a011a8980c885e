//! Single-slot completion signal.
//!
//! At most one goal is outstanding per unit. Arming the slot for a new goal
//! drops the previous waiter's sender, so an old wait resolves as aborted and
//! a late completion for the old goal finds no matching id and is discarded.

use crate::GoalOutcome;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::oneshot;
use tracing::debug;

/// Identifier of one submitted goal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GoalId(pub u64);

impl fmt::Display for GoalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "goal-{}", self.0)
    }
}

type Pending = Option<(GoalId, oneshot::Sender<GoalOutcome>)>;

/// Cloneable handle the controller uses to report a goal's outcome
#[derive(Debug, Clone, Default)]
pub struct GoalNotifier {
    slot: Arc<Mutex<Pending>>,
}

impl GoalNotifier {
    /// Create an empty slot
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Pending> {
        self.slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Arm the slot for `goal`, returning the waiter
    pub(crate) fn arm(&self, goal: GoalId) -> oneshot::Receiver<GoalOutcome> {
        let (tx, rx) = oneshot::channel();
        if let Some((old, _)) = self.lock().replace((goal, tx)) {
            debug!(superseded = %old, by = %goal, "Outstanding goal superseded");
        }
        rx
    }

    /// Clear the slot if it still belongs to `goal`
    pub(crate) fn clear(&self, goal: GoalId) {
        let mut pending = self.lock();
        if matches!(pending.as_ref(), Some((id, _)) if *id == goal) {
            pending.take();
        }
    }

    /// Resolve the waiter of `goal`
    ///
    /// Returns false when `goal` is not the outstanding goal; the signal is
    /// then stale and ignored.
    pub fn notify(&self, goal: GoalId, outcome: GoalOutcome) -> bool {
        let mut pending = self.lock();
        match pending.take() {
            Some((id, tx)) if id == goal => {
                let _ = tx.send(outcome);
                true
            }
            other => {
                *pending = other;
                debug!(goal = %goal, ?outcome, "Stale goal signal dropped");
                false
            }
        }
    }

    /// Goal currently awaiting an outcome
    pub fn outstanding(&self) -> Option<GoalId> {
        self.lock().as_ref().map(|(id, _)| *id)
    }
}
