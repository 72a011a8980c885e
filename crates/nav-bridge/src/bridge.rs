//! Goal submission and bounded completion wait.

use crate::controller::MotionController;
use crate::error::BridgeResult;
use crate::slot::{GoalId, GoalNotifier};
use crate::GoalOutcome;
use medfleet_core::Point;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, warn};

/// Per-unit actuation bridge
#[derive(Clone)]
pub struct NavBridge {
    controller: Arc<dyn MotionController>,
    notifier: GoalNotifier,
    next_goal: Arc<AtomicU64>,
    locate_timeout: Duration,
}

impl NavBridge {
    /// Bridge over `controller`; position lookups give up after `locate_timeout`
    pub fn new(controller: Arc<dyn MotionController>, locate_timeout: Duration) -> Self {
        Self {
            controller,
            notifier: GoalNotifier::new(),
            next_goal: Arc::new(AtomicU64::new(1)),
            locate_timeout,
        }
    }

    /// Goal currently awaiting an outcome
    pub fn outstanding(&self) -> Option<GoalId> {
        self.notifier.outstanding()
    }

    /// Hand a goal to the controller and return its waiter
    ///
    /// Any previous outstanding goal is superseded.
    pub async fn submit_goal(
        &self,
        target: Point,
    ) -> BridgeResult<(GoalId, oneshot::Receiver<GoalOutcome>)> {
        let goal = GoalId(self.next_goal.fetch_add(1, Ordering::Relaxed));
        let waiter = self.notifier.arm(goal);
        if let Err(e) = self
            .controller
            .dispatch_goal(goal, target, self.notifier.clone())
            .await
        {
            self.notifier.clear(goal);
            return Err(e);
        }
        debug!(goal = %goal, "Goal submitted");
        Ok((goal, waiter))
    }

    /// Wait for `goal`, giving up after `timeout` when one is set
    pub async fn wait(
        &self,
        goal: GoalId,
        waiter: oneshot::Receiver<GoalOutcome>,
        timeout: Option<Duration>,
    ) -> GoalOutcome {
        let outcome = match timeout {
            Some(limit) => match tokio::time::timeout(limit, waiter).await {
                Ok(resolved) => resolved.unwrap_or(GoalOutcome::Aborted),
                Err(_) => {
                    self.notifier.clear(goal);
                    warn!(goal = %goal, ?limit, "Goal timed out");
                    GoalOutcome::TimedOut
                }
            },
            None => waiter.await.unwrap_or(GoalOutcome::Aborted),
        };
        debug!(goal = %goal, ?outcome, "Goal finished");
        outcome
    }

    /// Current position, or `None` when it cannot be resolved in time
    pub async fn position(&self) -> Option<Point> {
        tokio::time::timeout(self.locate_timeout, self.controller.current_position())
            .await
            .ok()
            .flatten()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::SimulatedController;
    use crate::BridgeError;
    use medfleet_core::SimulationConfig;

    fn fast() -> SimulationConfig {
        SimulationConfig {
            speed: 1_000.0,
            abort_rate: 0.0,
        }
    }

    fn bridge(sim: &SimulatedController) -> NavBridge {
        NavBridge::new(Arc::new(sim.clone()), Duration::from_millis(100))
    }

    async fn drive(bridge: &NavBridge, target: Point, timeout: Option<Duration>) -> BridgeResult<GoalOutcome> {
        let (goal, waiter) = bridge.submit_goal(target).await?;
        Ok(bridge.wait(goal, waiter, timeout).await)
    }

    #[tokio::test]
    async fn test_goal_succeeds_and_moves() {
        let sim = SimulatedController::new(Point::new(0.0, 0.0), &fast());
        let bridge = bridge(&sim);

        let outcome = drive(&bridge, Point::new(3.0, 4.0), Some(Duration::from_secs(2)))
            .await
            .unwrap();
        assert_eq!(outcome, GoalOutcome::Succeeded);
        assert_eq!(bridge.position().await, Some(Point::new(3.0, 4.0)));
        assert_eq!(bridge.outstanding(), None);
    }

    #[tokio::test]
    async fn test_scripted_abort_leaves_position() {
        let sim = SimulatedController::new(Point::new(0.0, 0.0), &fast());
        sim.script(GoalOutcome::Aborted);
        let bridge = bridge(&sim);

        let outcome = drive(&bridge, Point::new(5.0, 5.0), None).await.unwrap();
        assert_eq!(outcome, GoalOutcome::Aborted);
        assert_eq!(sim.position_now(), Point::new(0.0, 0.0));
    }

    #[tokio::test]
    async fn test_unresponsive_controller_times_out() {
        let sim = SimulatedController::new(Point::new(0.0, 0.0), &fast());
        sim.set_responsive(false);
        let bridge = bridge(&sim);

        let outcome = drive(&bridge, Point::new(1.0, 1.0), Some(Duration::from_millis(30)))
            .await
            .unwrap();
        assert_eq!(outcome, GoalOutcome::TimedOut);
        assert_eq!(bridge.outstanding(), None);
    }

    #[tokio::test]
    async fn test_new_goal_supersedes_outstanding_one() {
        let sim = SimulatedController::new(Point::new(0.0, 0.0), &fast());
        sim.set_responsive(false);
        let bridge = bridge(&sim);

        let (first, first_waiter) = bridge.submit_goal(Point::new(1.0, 0.0)).await.unwrap();
        sim.set_responsive(true);
        let outcome = drive(&bridge, Point::new(2.0, 0.0), None).await.unwrap();

        assert_eq!(outcome, GoalOutcome::Succeeded);
        assert_eq!(
            bridge.wait(first, first_waiter, None).await,
            GoalOutcome::Aborted
        );
    }

    #[tokio::test]
    async fn test_offline_controller() {
        let sim = SimulatedController::new(Point::new(0.0, 0.0), &fast());
        sim.set_online(false);
        let bridge = bridge(&sim);

        assert!(matches!(
            drive(&bridge, Point::new(1.0, 1.0), None).await,
            Err(BridgeError::Unavailable)
        ));
        assert_eq!(bridge.outstanding(), None);
        assert_eq!(bridge.position().await, None);
    }
}
