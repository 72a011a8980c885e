//! Motion controller contract and a simulated implementation.

use crate::error::{BridgeError, BridgeResult};
use crate::slot::{GoalId, GoalNotifier};
use crate::GoalOutcome;
use async_trait::async_trait;
use medfleet_core::{Point, SimulationConfig};
use rand::Rng;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, info};

/// Boundary to the physical motion layer.
///
/// `dispatch_goal` only hands the goal over; the outcome arrives later on
/// `notifier`, from whatever task the controller runs its callbacks on.
#[async_trait]
pub trait MotionController: Send + Sync {
    /// Start moving towards `target`
    async fn dispatch_goal(
        &self,
        goal: GoalId,
        target: Point,
        notifier: GoalNotifier,
    ) -> BridgeResult<()>;

    /// Current position, if the controller can tell
    async fn current_position(&self) -> Option<Point>;
}

#[derive(Debug)]
struct SimState {
    position: Point,
    scripted: VecDeque<GoalOutcome>,
    responsive: bool,
    online: bool,
    history: Vec<Point>,
}

/// Controller that travels in a straight line at a fixed speed.
///
/// Outcomes come from the scripted queue first, then from `abort_rate`.
/// An unresponsive controller accepts goals and never reports back.
#[derive(Debug, Clone)]
pub struct SimulatedController {
    state: Arc<Mutex<SimState>>,
    speed: f64,
    abort_rate: f64,
}

impl SimulatedController {
    /// Controller parked at `start`
    pub fn new(start: Point, config: &SimulationConfig) -> Self {
        Self {
            state: Arc::new(Mutex::new(SimState {
                position: start,
                scripted: VecDeque::new(),
                responsive: true,
                online: true,
                history: Vec::new(),
            })),
            speed: config.speed,
            abort_rate: config.abort_rate.clamp(0.0, 1.0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Queue the outcome of a future goal
    pub fn script(&self, outcome: GoalOutcome) {
        self.lock().scripted.push_back(outcome);
    }

    /// Stop (or resume) reporting goal outcomes
    pub fn set_responsive(&self, responsive: bool) {
        self.lock().responsive = responsive;
    }

    /// Refuse new goals and position requests
    pub fn set_online(&self, online: bool) {
        self.lock().online = online;
    }

    /// Teleport to `at`
    pub fn set_position(&self, at: Point) {
        self.lock().position = at;
    }

    /// Position right now
    pub fn position_now(&self) -> Point {
        self.lock().position
    }

    /// Every goal target received so far
    pub fn goals(&self) -> Vec<Point> {
        self.lock().history.clone()
    }

    fn travel_time(&self, distance: f64) -> Duration {
        if self.speed.is_nan() || self.speed <= 0.0 {
            return Duration::ZERO;
        }
        let secs = distance / self.speed;
        if secs.is_finite() && secs >= 0.0 {
            Duration::from_secs_f64(secs.min(3_600.0))
        } else {
            Duration::ZERO
        }
    }
}

#[async_trait]
impl MotionController for SimulatedController {
    async fn dispatch_goal(
        &self,
        goal: GoalId,
        target: Point,
        notifier: GoalNotifier,
    ) -> BridgeResult<()> {
        let roll: f64 = rand::thread_rng().gen();
        let (travel, outcome, responsive) = {
            let mut state = self.lock();
            if !state.online {
                return Err(BridgeError::Unavailable);
            }
            state.history.push(target);
            let outcome = state.scripted.pop_front().unwrap_or(if roll < self.abort_rate {
                GoalOutcome::Aborted
            } else {
                GoalOutcome::Succeeded
            });
            (
                self.travel_time(state.position.distance_to(&target)),
                outcome,
                state.responsive,
            )
        };

        debug!(goal = %goal, x = target.x, y = target.y, ?travel, "Goal accepted");
        if !responsive {
            return Ok(());
        }

        let state = Arc::clone(&self.state);
        tokio::spawn(async move {
            tokio::time::sleep(travel).await;
            if outcome == GoalOutcome::Succeeded {
                let mut state = state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
                state.position = target;
            }
            info!(goal = %goal, ?outcome, "Goal resolved");
            notifier.notify(goal, outcome);
        });
        Ok(())
    }

    async fn current_position(&self) -> Option<Point> {
        let state = self.lock();
        state.online.then_some(state.position)
    }
}
