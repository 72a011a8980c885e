//! Central dispatch loop
//!
//! Sources tasks, hands each one to the best available unit and keeps track
//! of which units are still working it. The dispatcher is the only place
//! where long-lived retry happens: a task that cannot be placed, bounces back
//! as `delivery_failed`, or goes silent past the assignment timeout is queued
//! again. Nothing is ever dropped.
//!
//! # Cycle
//!
//! 1. Take the oldest returned task, else the oldest pending one
//! 2. Broadcast a capability query and pick the `Available` unit with the
//!    highest battery
//! 3. Re-confirm that unit with a point availability probe
//! 4. Send the delivery order, or push the task to the tail of the pending set

use crate::error::{DispatchResult, SourceError};
use crate::source::TaskSource;
use medfleet_core::{AgentId, DispatcherConfig, Task, TaskId};
use medfleet_mesh::{
    new_conversation_id, DelegationNotice, DeliveryReport, Envelope, Mailbox, MessageBus,
    Performative, Received, TaskType,
};
use medfleet_unit_status::{select_by_battery, AvailabilityCheck, CapabilityReport};
use serde::de::DeserializeOwned;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Units currently responsible for a task
#[derive(Debug, Clone)]
pub struct Assignment {
    /// The task as sourced, full requirement intact
    pub task: Task,
    /// Units that have not yet reported completion
    pub units: HashSet<AgentId>,
    /// When the delivery order went out
    pub since: Instant,
}

/// Result of one dispatch cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// The task was ordered from `unit`
    Assigned {
        /// Dispatched task
        task_id: TaskId,
        /// Receiving unit
        unit: AgentId,
    },
    /// Nobody could take the task; it went back to the pending tail
    Requeued {
        /// Requeued task
        task_id: TaskId,
    },
}

/// The dispatcher agent
pub struct Dispatcher {
    id: AgentId,
    config: DispatcherConfig,
    source: Arc<dyn TaskSource>,
    bus: MessageBus,
    mailbox: Mailbox,
    units: Vec<AgentId>,
    pending: VecDeque<Task>,
    failures: VecDeque<Task>,
    assigned: HashMap<TaskId, Assignment>,
    /// Done, removal from the source not yet confirmed
    finished: HashSet<TaskId>,
    /// Done and removed, oldest first, capped at `completed_memory`
    retired: VecDeque<TaskId>,
}

impl Dispatcher {
    /// Create a dispatcher that serves `units`
    pub fn new(
        config: DispatcherConfig,
        source: Arc<dyn TaskSource>,
        bus: MessageBus,
        mailbox: Mailbox,
        units: Vec<AgentId>,
    ) -> Self {
        Self {
            id: config.id.clone(),
            config,
            source,
            bus,
            mailbox,
            units,
            pending: VecDeque::new(),
            failures: VecDeque::new(),
            assigned: HashMap::new(),
            finished: HashSet::new(),
            retired: VecDeque::new(),
        }
    }

    /// Register the dispatcher's mailbox on `bus` and create it
    pub async fn register(
        config: DispatcherConfig,
        source: Arc<dyn TaskSource>,
        bus: MessageBus,
        units: Vec<AgentId>,
    ) -> Self {
        let mailbox = bus.register(config.id.clone()).await;
        Self::new(config, source, bus, mailbox, units)
    }

    /// Ids in the pending set, head first
    pub fn pending_ids(&self) -> Vec<TaskId> {
        self.pending.iter().map(|t| t.id.clone()).collect()
    }

    /// Ids of returned tasks awaiting priority retry, head first
    pub fn failure_ids(&self) -> Vec<TaskId> {
        self.failures.iter().map(|t| t.id.clone()).collect()
    }

    /// Assignment of `task_id`, if one is open
    pub fn assignment(&self, task_id: &str) -> Option<&Assignment> {
        self.assigned.get(task_id)
    }

    /// Whether every unit working `task_id` reported completion
    ///
    /// Only the most recent `completed_memory` removed tasks are remembered.
    pub fn is_finished(&self, task_id: &str) -> bool {
        self.finished.contains(task_id) || self.retired.iter().any(|id| id == task_id)
    }

    /// Pending task with id `task_id`, if queued
    pub fn pending_task(&self, task_id: &str) -> Option<&Task> {
        self.pending
            .iter()
            .chain(self.failures.iter())
            .find(|t| t.id == task_id)
    }

    fn is_tracked(&self, task_id: &str) -> bool {
        self.assigned.contains_key(task_id)
            || self.pending.iter().any(|t| t.id == task_id)
            || self.failures.iter().any(|t| t.id == task_id)
    }

    /// Run until the mailbox is unregistered, then hand the dispatcher back
    pub async fn run(mut self) -> Self {
        info!(dispatcher = %self.id, units = ?self.units, "Dispatcher started");

        let mut poll = tokio::time::interval(self.config.poll_interval());
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut cycle = tokio::time::interval(self.config.cycle_interval());
        cycle.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = poll.tick() => {
                    self.poll_source().await;
                }
                _ = cycle.tick() => {
                    if let Err(e) = self.run_cycle().await {
                        warn!(dispatcher = %self.id, error = %e, "Dispatch cycle failed");
                    }
                }
                msg = self.mailbox.recv() => match msg {
                    Some(envelope) => self.handle(envelope).await,
                    None => break,
                },
            }
        }

        info!(dispatcher = %self.id, "Dispatcher stopped");
        self
    }

    /// Pull the task source and queue ids not seen before
    ///
    /// Returns how many tasks were queued.
    pub async fn poll_source(&mut self) -> usize {
        let tasks = match self.source.pending_tasks().await {
            Ok(tasks) => tasks,
            Err(e) => {
                warn!(dispatcher = %self.id, error = %e, "Task source unavailable");
                return 0;
            }
        };

        let mut queued = 0;
        for task in tasks {
            if self.finished.contains(&task.id) {
                // Completed but still listed: the earlier removal did not land
                self.remove_from_source(&task.id).await;
                continue;
            }
            if self.is_tracked(&task.id) {
                continue;
            }
            info!(dispatcher = %self.id, task_id = %task.id, "New task queued");
            self.pending.push_back(task);
            queued += 1;
        }
        queued
    }

    /// Allocate one task: a returned one first, else the oldest pending
    pub async fn run_cycle(&mut self) -> DispatchResult<Option<CycleOutcome>> {
        self.requeue_overdue();
        let Some(task) = self.failures.pop_front().or_else(|| self.pending.pop_front()) else {
            return Ok(None);
        };
        self.allocate(task).await.map(Some)
    }

    async fn allocate(&mut self, task: Task) -> DispatchResult<CycleOutcome> {
        let reports = self.query_units(&task).await?;
        let Some(best) = select_by_battery(&reports) else {
            info!(dispatcher = %self.id, task_id = %task.id, responders = reports.len(), "No available unit");
            return Ok(self.requeue(task));
        };
        let unit = best.unit.clone();

        if !self.confirm_available(&unit).await? {
            info!(dispatcher = %self.id, task_id = %task.id, unit = %unit, "Unit no longer available");
            return Ok(self.requeue(task));
        }

        let order = Envelope::inform(self.id.clone(), unit.clone(), TaskType::Delivery).with_body(&task)?;
        self.assigned.insert(
            task.id.clone(),
            Assignment {
                task: task.clone(),
                units: HashSet::from([unit.clone()]),
                since: Instant::now(),
            },
        );
        if let Err(e) = self.bus.send(order).await {
            warn!(dispatcher = %self.id, task_id = %task.id, unit = %unit, error = %e, "Delivery order not sent");
            self.assigned.remove(&task.id);
            return Ok(self.requeue(task));
        }

        info!(dispatcher = %self.id, task_id = %task.id, unit = %unit, "Task assigned");
        Ok(CycleOutcome::Assigned {
            task_id: task.id,
            unit,
        })
    }

    fn requeue(&mut self, task: Task) -> CycleOutcome {
        let task_id = task.id.clone();
        self.pending.push_back(task);
        CycleOutcome::Requeued { task_id }
    }

    async fn query_units(&mut self, task: &Task) -> DispatchResult<Vec<CapabilityReport>> {
        let conversation = new_conversation_id();
        let check = AvailabilityCheck {
            target: Some(task.target.clone()),
        };
        let mut sent = 0;
        for unit in self.units.clone() {
            let query = Envelope::inform(self.id.clone(), unit, TaskType::AvailabilityCheck)
                .with_conversation(conversation.clone())
                .with_body(&check)?;
            if self.send(query).await {
                sent += 1;
            }
        }
        let window = self.config.query_timeout();
        let replies = self.collect(&conversation, sent, window).await;
        Ok(replies
            .iter()
            .filter_map(|r| self.decode_or_warn::<CapabilityReport>(r))
            .collect())
    }

    async fn confirm_available(&mut self, unit: &str) -> DispatchResult<bool> {
        let conversation = new_conversation_id();
        let probe = Envelope::inform(self.id.clone(), unit, TaskType::Availability)
            .with_conversation(conversation.clone())
            .with_body(&AvailabilityCheck::default())?;
        if !self.send(probe).await {
            return Ok(false);
        }
        let window = self.config.query_timeout();
        let replies = self.collect(&conversation, 1, window).await;
        Ok(replies
            .first()
            .and_then(|r| self.decode_or_warn::<CapabilityReport>(r))
            .map(|report| report.is_available())
            .unwrap_or(false))
    }

    /// Capability replies in `conversation`; reports are handled as they come
    async fn collect(&mut self, conversation: &str, expected: usize, window: Duration) -> Vec<Envelope> {
        let deadline = Instant::now() + window;
        let mut replies = Vec::new();
        while replies.len() < expected {
            match self.mailbox.recv_until(deadline).await {
                Received::Message(envelope)
                    if envelope.task_type == Some(TaskType::AvailabilityResponse)
                        && envelope.in_conversation(conversation) =>
                {
                    replies.push(envelope);
                }
                Received::Message(envelope) => self.handle(envelope).await,
                Received::TimedOut | Received::Closed => break,
            }
        }
        replies
    }

    /// Apply a unit report to the bookkeeping
    pub async fn handle(&mut self, envelope: Envelope) {
        match (envelope.performative, envelope.task_type) {
            (Performative::Inform, Some(TaskType::DelegationNotice)) => {
                if let Some(notice) = self.decode_or_warn::<DelegationNotice>(&envelope) {
                    self.on_delegation(notice).await;
                }
            }
            (Performative::Inform, Some(TaskType::DeliveryComplete)) => {
                if let Some(report) = self.decode_or_warn::<DeliveryReport>(&envelope) {
                    self.on_complete(&envelope.sender, report).await;
                }
            }
            (Performative::Inform, Some(TaskType::DeliveryFailed)) => {
                if let Some(report) = self.decode_or_warn::<DeliveryReport>(&envelope) {
                    self.on_failed(&envelope.sender, report);
                }
            }
            (Performative::Inform, Some(TaskType::AvailabilityResponse)) => {
                debug!(dispatcher = %self.id, from = %envelope.sender, "Late capability reply dropped");
            }
            _ => warn!(
                dispatcher = %self.id,
                from = %envelope.sender,
                kind = %envelope.kind(),
                "Unexpected message dropped"
            ),
        }
    }

    async fn on_delegation(&mut self, notice: DelegationNotice) {
        let Some(assignment) = self.assigned.get_mut(&notice.task_id) else {
            debug!(dispatcher = %self.id, task_id = %notice.task_id, "Notice for untracked task");
            return;
        };
        assignment.units.remove(&notice.from);
        assignment.units.extend(notice.to.iter().cloned());
        info!(
            dispatcher = %self.id,
            task_id = %notice.task_id,
            from = %notice.from,
            to = ?notice.to,
            "Responsibility moved"
        );
        if assignment.units.is_empty() {
            self.finish(&notice.task_id).await;
        }
    }

    async fn on_complete(&mut self, sender: &str, report: DeliveryReport) {
        let task_id = report.task.id.clone();
        let Some(assignment) = self.assigned.get_mut(&task_id) else {
            debug!(dispatcher = %self.id, task_id = %task_id, unit = %sender, "Completion for untracked task");
            return;
        };
        if !assignment.units.remove(sender) {
            debug!(dispatcher = %self.id, task_id = %task_id, unit = %sender, "Completion from unassigned unit");
            return;
        }
        if !report.confirmed {
            warn!(dispatcher = %self.id, task_id = %task_id, unit = %sender, "Completion without confirmed arrival");
        }
        info!(
            dispatcher = %self.id,
            task_id = %task_id,
            unit = %sender,
            outstanding = assignment.units.len(),
            "Delivery reported"
        );
        if assignment.units.is_empty() {
            self.finish(&task_id).await;
        }
    }

    fn on_failed(&mut self, sender: &str, report: DeliveryReport) {
        if let Some(assignment) = self.assigned.get(&report.task.id) {
            if !assignment.units.contains(sender) {
                debug!(dispatcher = %self.id, task_id = %report.task.id, unit = %sender, "Failure from unassigned unit");
                return;
            }
        }
        let task = match self.assigned.remove(&report.task.id) {
            Some(assignment) => assignment.task,
            None if self.is_tracked(&report.task.id) || self.is_finished(&report.task.id) => {
                debug!(dispatcher = %self.id, task_id = %report.task.id, "Failure for task already queued");
                return;
            }
            None => report.task,
        };
        info!(dispatcher = %self.id, task_id = %task.id, unit = %sender, "Task returned, requeued");
        self.failures.push_back(task);
    }

    /// Requeue assignments nobody has reported on in time
    fn requeue_overdue(&mut self) {
        let limit = self.config.assignment_timeout();
        let overdue: Vec<TaskId> = self
            .assigned
            .iter()
            .filter(|(_, a)| a.since.elapsed() > limit)
            .map(|(id, _)| id.clone())
            .collect();
        for task_id in overdue {
            if let Some(assignment) = self.assigned.remove(&task_id) {
                warn!(
                    dispatcher = %self.id,
                    task_id = %task_id,
                    units = ?assignment.units,
                    "Assignment timed out, requeued"
                );
                self.failures.push_back(assignment.task);
            }
        }
    }

    async fn finish(&mut self, task_id: &str) {
        self.assigned.remove(task_id);
        self.finished.insert(task_id.to_string());
        info!(dispatcher = %self.id, task_id = %task_id, "Task complete");
        self.remove_from_source(task_id).await;
    }

    async fn remove_from_source(&mut self, task_id: &str) {
        match self.source.remove(task_id).await {
            Ok(()) => debug!(dispatcher = %self.id, task_id = %task_id, "Task removed from source"),
            Err(SourceError::NotFound(_)) => {
                debug!(dispatcher = %self.id, task_id = %task_id, "Task already gone from source")
            }
            Err(e) => {
                // Kept in `finished` so the next poll retries
                warn!(dispatcher = %self.id, task_id = %task_id, error = %e, "Task removal failed");
                return;
            }
        }
        self.retire(task_id);
    }

    fn retire(&mut self, task_id: &str) {
        self.finished.remove(task_id);
        self.retired.retain(|id| id != task_id);
        self.retired.push_back(task_id.to_string());
        while self.retired.len() > self.config.completed_memory {
            self.retired.pop_front();
        }
    }

    async fn send(&self, envelope: Envelope) -> bool {
        let receiver = envelope.receiver.clone();
        match self.bus.send(envelope).await {
            Ok(()) => true,
            Err(e) => {
                debug!(dispatcher = %self.id, to = %receiver, error = %e, "Unit unreachable");
                false
            }
        }
    }

    fn decode_or_warn<T: DeserializeOwned>(&self, envelope: &Envelope) -> Option<T> {
        match envelope.decode() {
            Ok(body) => Some(body),
            Err(e) => {
                warn!(dispatcher = %self.id, error = %e, "Dropping malformed message");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::InMemoryTaskSource;
    use medfleet_core::Requirement;
    use medfleet_unit_status::UnitStatus;
    use proptest::prelude::*;

    fn task(id: &str) -> Task {
        let mut meds = Requirement::new();
        meds.set("Type1", 2);
        Task::new(id, meds, "Room A-101")
    }

    fn config() -> DispatcherConfig {
        DispatcherConfig {
            query_timeout_ms: 100,
            ..DispatcherConfig::default()
        }
    }

    fn report(unit: &str, status: UnitStatus, battery: u8) -> CapabilityReport {
        CapabilityReport {
            unit: unit.to_string(),
            status,
            stock: Requirement::new(),
            battery,
            position: None,
            room_coords: None,
            distance_to_target: None,
        }
    }

    /// Answer every capability probe with a fixed report, forwarding orders
    fn spawn_responder(
        bus: MessageBus,
        mut mailbox: Mailbox,
        answer: CapabilityReport,
    ) -> tokio::sync::mpsc::UnboundedReceiver<Envelope> {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        tokio::spawn(async move {
            while let Some(envelope) = mailbox.recv().await {
                match envelope.task_type {
                    Some(TaskType::AvailabilityCheck) | Some(TaskType::Availability) => {
                        let reply = envelope
                            .reply(Performative::Inform)
                            .with_task_type(TaskType::AvailabilityResponse)
                            .with_body(&answer)
                            .unwrap();
                        let _ = bus.send(reply).await;
                    }
                    _ => {
                        let _ = tx.send(envelope);
                    }
                }
            }
        });
        rx
    }

    async fn dispatcher_with(
        tasks: Vec<Task>,
        units: &[&str],
    ) -> (Dispatcher, InMemoryTaskSource, MessageBus) {
        let source = InMemoryTaskSource::with_tasks(tasks).await;
        let bus = MessageBus::new();
        let dispatcher = Dispatcher::register(
            config(),
            Arc::new(source.clone()),
            bus.clone(),
            units.iter().map(|u| u.to_string()).collect(),
        )
        .await;
        (dispatcher, source, bus)
    }

    fn report_from(unit: &str, kind: TaskType, task: &Task) -> Envelope {
        Envelope::inform(unit, "taskmanager", kind)
            .with_body(&DeliveryReport {
                task: task.clone(),
                unit: unit.to_string(),
                confirmed: true,
            })
            .unwrap()
    }

    #[tokio::test]
    async fn test_poll_queues_each_task_once() {
        let (mut dispatcher, _, _) = dispatcher_with(vec![task("t1"), task("t2")], &[]).await;

        assert_eq!(dispatcher.poll_source().await, 2);
        assert_eq!(dispatcher.poll_source().await, 0);
        assert_eq!(dispatcher.pending_ids(), vec!["t1", "t2"]);
    }

    #[tokio::test]
    async fn test_unplaceable_task_goes_to_tail() {
        let (mut dispatcher, _, _) = dispatcher_with(vec![task("t1"), task("t2")], &["robot1"]).await;
        dispatcher.poll_source().await;

        let outcome = dispatcher.run_cycle().await.unwrap();
        assert_eq!(
            outcome,
            Some(CycleOutcome::Requeued {
                task_id: "t1".to_string()
            })
        );
        assert_eq!(dispatcher.pending_ids(), vec!["t2", "t1"]);
    }

    #[tokio::test]
    async fn test_empty_cycle_is_a_no_op() {
        let (mut dispatcher, _, _) = dispatcher_with(vec![], &[]).await;
        assert_eq!(dispatcher.run_cycle().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_highest_battery_available_unit_gets_the_order() {
        let (mut dispatcher, _, bus) =
            dispatcher_with(vec![task("t1")], &["robot1", "robot2", "robot3"]).await;
        let mut orders = Vec::new();
        for (unit, status, battery) in [
            ("robot1", UnitStatus::Available, 60),
            ("robot2", UnitStatus::Available, 90),
            ("robot3", UnitStatus::Charging, 100),
        ] {
            let mailbox = bus.register(unit).await;
            orders.push(spawn_responder(bus.clone(), mailbox, report(unit, status, battery)));
        }
        dispatcher.poll_source().await;

        let outcome = dispatcher.run_cycle().await.unwrap();
        assert_eq!(
            outcome,
            Some(CycleOutcome::Assigned {
                task_id: "t1".to_string(),
                unit: "robot2".to_string()
            })
        );

        let order = orders[1].recv().await.unwrap();
        assert_eq!(order.task_type, Some(TaskType::Delivery));
        assert_eq!(order.decode::<Task>().unwrap(), task("t1"));
        assert!(orders[0].try_recv().is_err());
        assert!(dispatcher.assignment("t1").unwrap().units.contains("robot2"));
    }

    #[tokio::test]
    async fn test_failed_reconfirmation_requeues() {
        let (mut dispatcher, _, bus) = dispatcher_with(vec![task("t1")], &["robot1"]).await;
        let mut mailbox = bus.register("robot1").await;
        let responder_bus = bus.clone();
        tokio::spawn(async move {
            // Available for the broadcast, Delivering by the time of the probe
            let mut status = UnitStatus::Available;
            while let Some(envelope) = mailbox.recv().await {
                let reply = envelope
                    .reply(Performative::Inform)
                    .with_task_type(TaskType::AvailabilityResponse)
                    .with_body(&report("robot1", status, 80))
                    .unwrap();
                let _ = responder_bus.send(reply).await;
                status = UnitStatus::Delivering;
            }
        });
        dispatcher.poll_source().await;

        let outcome = dispatcher.run_cycle().await.unwrap();
        assert!(matches!(outcome, Some(CycleOutcome::Requeued { .. })));
        assert!(dispatcher.assignment("t1").is_none());
        assert_eq!(dispatcher.pending_ids(), vec!["t1"]);
    }

    #[tokio::test]
    async fn test_completion_removes_task_from_source() {
        let (mut dispatcher, source, bus) = dispatcher_with(vec![task("t1")], &["robot1"]).await;
        let mailbox = bus.register("robot1").await;
        let _orders = spawn_responder(bus.clone(), mailbox, report("robot1", UnitStatus::Available, 100));
        dispatcher.poll_source().await;
        dispatcher.run_cycle().await.unwrap();

        dispatcher
            .handle(report_from("robot1", TaskType::DeliveryComplete, &task("t1")))
            .await;

        assert!(dispatcher.is_finished("t1"));
        assert!(dispatcher.assignment("t1").is_none());
        assert!(!source.contains("t1").await);
        assert_eq!(dispatcher.poll_source().await, 0);
    }

    #[tokio::test]
    async fn test_split_completes_only_when_every_part_reports() {
        let (mut dispatcher, source, bus) = dispatcher_with(vec![task("t1")], &["robot1"]).await;
        let mailbox = bus.register("robot1").await;
        let _orders = spawn_responder(bus.clone(), mailbox, report("robot1", UnitStatus::Available, 100));
        dispatcher.poll_source().await;
        dispatcher.run_cycle().await.unwrap();

        let notice = Envelope::inform("robot1", "taskmanager", TaskType::DelegationNotice)
            .with_body(&DelegationNotice {
                task_id: "t1".to_string(),
                from: "robot1".to_string(),
                to: vec!["robot1".to_string(), "robot2".to_string()],
            })
            .unwrap();
        dispatcher.handle(notice).await;
        dispatcher
            .handle(report_from("robot2", TaskType::DeliveryComplete, &task("t1")))
            .await;
        assert!(!dispatcher.is_finished("t1"));
        assert!(source.contains("t1").await);

        dispatcher
            .handle(report_from("robot1", TaskType::DeliveryComplete, &task("t1")))
            .await;
        assert!(dispatcher.is_finished("t1"));
        assert!(!source.contains("t1").await);
    }

    #[tokio::test]
    async fn test_returned_fragment_requeues_the_whole_task() {
        let (mut dispatcher, _, bus) = dispatcher_with(vec![task("t1")], &["robot1"]).await;
        let mailbox = bus.register("robot1").await;
        let _orders = spawn_responder(bus.clone(), mailbox, report("robot1", UnitStatus::Available, 100));
        dispatcher.poll_source().await;
        dispatcher.run_cycle().await.unwrap();

        let fragment = task("t1").fragment(Requirement::new());
        dispatcher
            .handle(report_from("robot1", TaskType::DeliveryFailed, &fragment))
            .await;

        assert_eq!(dispatcher.failure_ids(), vec!["t1"]);
        assert_eq!(dispatcher.pending_task("t1"), Some(&task("t1")));

        // A second report for the same task does not queue it twice
        dispatcher
            .handle(report_from("robot2", TaskType::DeliveryFailed, &fragment))
            .await;
        assert_eq!(dispatcher.failure_ids(), vec!["t1"]);
    }

    #[tokio::test]
    async fn test_stale_failure_keeps_live_assignment() {
        let (mut dispatcher, _, bus) = dispatcher_with(vec![task("t1")], &["robot1"]).await;
        let mailbox = bus.register("robot1").await;
        let _orders = spawn_responder(bus.clone(), mailbox, report("robot1", UnitStatus::Available, 100));
        dispatcher.poll_source().await;
        dispatcher.run_cycle().await.unwrap();

        let notice = Envelope::inform("robot1", "taskmanager", TaskType::DelegationNotice)
            .with_body(&DelegationNotice {
                task_id: "t1".to_string(),
                from: "robot1".to_string(),
                to: vec!["robot2".to_string(), "robot3".to_string()],
            })
            .unwrap();
        dispatcher.handle(notice).await;
        dispatcher
            .handle(report_from("robot2", TaskType::DeliveryFailed, &task("t1")))
            .await;
        assert_eq!(dispatcher.failure_ids(), vec!["t1"]);

        let outcome = dispatcher.run_cycle().await.unwrap();
        assert!(matches!(outcome, Some(CycleOutcome::Assigned { ref unit, .. }) if unit == "robot1"));

        // robot3 was dropped with the first assignment
        dispatcher
            .handle(report_from("robot3", TaskType::DeliveryFailed, &task("t1")))
            .await;
        let assignment = dispatcher.assignment("t1").unwrap();
        assert_eq!(assignment.units, HashSet::from(["robot1".to_string()]));
        assert!(dispatcher.failure_ids().is_empty());
    }

    #[tokio::test]
    async fn test_completed_ids_are_bounded() {
        let tasks = vec![task("t1"), task("t2"), task("t3")];
        let (mut dispatcher, source, bus) = dispatcher_with(tasks, &["robot1"]).await;
        dispatcher.config.completed_memory = 2;
        let mailbox = bus.register("robot1").await;
        let _orders = spawn_responder(bus.clone(), mailbox, report("robot1", UnitStatus::Available, 100));
        dispatcher.poll_source().await;

        for id in ["t1", "t2", "t3"] {
            dispatcher.run_cycle().await.unwrap();
            dispatcher
                .handle(report_from("robot1", TaskType::DeliveryComplete, &task(id)))
                .await;
        }

        assert!(source.is_empty().await);
        assert!(dispatcher.finished.is_empty());
        assert_eq!(dispatcher.retired, VecDeque::from(["t2".to_string(), "t3".to_string()]));
        assert!(!dispatcher.is_finished("t1"));
        assert!(dispatcher.is_finished("t3"));

        // A late failure for a remembered task is not requeued
        dispatcher
            .handle(report_from("robot1", TaskType::DeliveryFailed, &task("t3")))
            .await;
        assert!(dispatcher.failure_ids().is_empty());
    }

    #[tokio::test]
    async fn test_silent_registered_unit_costs_one_window() {
        let (mut dispatcher, _, bus) = dispatcher_with(vec![task("t1")], &["robot1", "robot2"]).await;
        let mailbox = bus.register("robot1").await;
        let _orders = spawn_responder(bus.clone(), mailbox, report("robot1", UnitStatus::Available, 70));
        let _silent = bus.register("robot2").await;
        dispatcher.poll_source().await;

        let started = Instant::now();
        let outcome = dispatcher.run_cycle().await.unwrap();
        assert!(started.elapsed() >= dispatcher.config.query_timeout());
        assert_eq!(
            outcome,
            Some(CycleOutcome::Assigned {
                task_id: "t1".to_string(),
                unit: "robot1".to_string()
            })
        );
    }

    #[tokio::test]
    async fn test_returned_tasks_are_retried_first() {
        let (mut dispatcher, _, _) = dispatcher_with(vec![task("t1"), task("t2")], &[]).await;
        dispatcher.poll_source().await;
        dispatcher
            .handle(report_from("robot1", TaskType::DeliveryFailed, &task("t9")))
            .await;

        let outcome = dispatcher.run_cycle().await.unwrap();
        assert_eq!(
            outcome,
            Some(CycleOutcome::Requeued {
                task_id: "t9".to_string()
            })
        );
    }

    #[tokio::test]
    async fn test_overdue_assignment_is_requeued() {
        let (mut dispatcher, _, bus) = dispatcher_with(vec![task("t1")], &["robot1"]).await;
        dispatcher.config.assignment_timeout_ms = 0;
        let mailbox = bus.register("robot1").await;
        let _orders = spawn_responder(bus.clone(), mailbox, report("robot1", UnitStatus::Available, 100));
        dispatcher.poll_source().await;
        dispatcher.run_cycle().await.unwrap();
        assert!(dispatcher.assignment("t1").is_some());

        tokio::time::sleep(Duration::from_millis(5)).await;
        let outcome = dispatcher.run_cycle().await.unwrap();
        assert!(matches!(outcome, Some(CycleOutcome::Assigned { .. })));
        assert!(dispatcher.assignment("t1").is_some());
    }

    #[tokio::test]
    async fn test_run_stops_when_unregistered() {
        let (dispatcher, _, bus) = dispatcher_with(vec![task("t1")], &[]).await;
        let handle = tokio::spawn(dispatcher.run());
        tokio::time::sleep(Duration::from_millis(50)).await;
        bus.unregister("taskmanager").await;

        let dispatcher = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(dispatcher.pending_ids(), vec!["t1"]);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(16))]

        #[test]
        fn prop_no_task_is_lost_without_units(count in 1usize..6, cycles in 0usize..12) {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();
            runtime.block_on(async {
                let tasks: Vec<Task> = (0..count).map(|i| task(&format!("t{}", i))).collect();
                let (mut dispatcher, _, _) = dispatcher_with(tasks, &[]).await;
                dispatcher.poll_source().await;
                for _ in 0..cycles {
                    dispatcher.run_cycle().await.unwrap();
                }

                let mut ids = dispatcher.pending_ids();
                ids.sort();
                let mut expected: Vec<String> = (0..count).map(|i| format!("t{}", i)).collect();
                expected.sort();
                assert_eq!(ids, expected);
            });
        }
    }
}
