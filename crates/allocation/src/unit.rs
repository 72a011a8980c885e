//! The unit agent and its sequential message loop.
//!
//! A [`Unit`] owns its ledger, status machine and mailbox outright. Exactly one
//! inbound message is handled at a time; the battery ticker shares the same
//! loop, so no state of a unit is ever touched concurrently.
//!
//! The battery is sampled on every tick, also while an exchange is in
//! progress. A unit that runs low in the middle of an exchange heads for its
//! charging station as soon as the exchange ends.
//!
//! # Waiting inside an exchange
//!
//! While a unit collects replies or waits on its actuation bridge it keeps
//! answering read-only queries (`availability_check`, `availability`,
//! `help_request`) so that two units querying each other cannot deadlock.
//! Every other message is deferred until the exchange ends. Replies from a
//! closed exchange are dropped; a late `propose` is answered with
//! `reject-proposal` so the bidder frees its reservation.

use crate::error::UnitResult;
use medfleet_core::{
    AgentId, FleetConfig, InventoryLedger, Point, ProtocolConfig, RoomTable, StrategyKind, Task,
    TaskId, UnitConfig,
};
use medfleet_mesh::{
    DeliveryReport, Envelope, Mailbox, MessageBus, Performative, Proposal, TaskRef, TaskType,
};
use medfleet_nav_bridge::{GoalOutcome, NavBridge};
use medfleet_unit_status::{
    AvailabilityCheck, BatteryPolicy, CapabilityReport, StatusEvent, StatusMachine, TickOutcome,
    UnitStatus,
};
use serde::de::DeserializeOwned;
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// An autonomous delivery unit
pub struct Unit {
    pub(crate) id: AgentId,
    pub(crate) peers: Vec<AgentId>,
    pub(crate) dispatcher: AgentId,
    pub(crate) rooms: RoomTable,
    pub(crate) charging_station: Point,
    pub(crate) protocol: ProtocolConfig,
    pub(crate) tick_interval: Duration,
    /// Battery sampler; armed when the loop starts
    pub(crate) ticker: Option<Interval>,
    /// Battery ran low during an exchange
    pub(crate) charge_due: bool,
    pub(crate) ledger: InventoryLedger,
    pub(crate) status: StatusMachine,
    pub(crate) bus: MessageBus,
    pub(crate) mailbox: Mailbox,
    pub(crate) bridge: NavBridge,
    /// Open contract-net bids, keyed by task
    pub(crate) bids: HashMap<TaskId, Task>,
    /// Tasks this unit has delivered (its share of)
    pub(crate) completed: HashSet<TaskId>,
}

impl Unit {
    /// Build a unit from its config entry and the fleet config
    pub fn new(
        config: &UnitConfig,
        fleet: &FleetConfig,
        bus: MessageBus,
        mailbox: Mailbox,
        bridge: NavBridge,
    ) -> Self {
        Self {
            id: config.id.clone(),
            peers: fleet.peers_of(&config.id),
            dispatcher: fleet.dispatcher.id.clone(),
            rooms: config.rooms.clone(),
            charging_station: config.charging_station,
            protocol: fleet.protocol.clone(),
            tick_interval: fleet.battery.tick_interval(),
            ticker: None,
            charge_due: false,
            ledger: InventoryLedger::new(config.stock.clone()),
            status: StatusMachine::new(config.battery, BatteryPolicy::from(&fleet.battery)),
            bus,
            mailbox,
            bridge,
            bids: HashMap::new(),
            completed: HashSet::new(),
        }
    }

    /// Register a mailbox on `bus` and build the unit
    pub async fn register(
        config: &UnitConfig,
        fleet: &FleetConfig,
        bus: MessageBus,
        bridge: NavBridge,
    ) -> Self {
        let mailbox = bus.register(config.id.clone()).await;
        Self::new(config, fleet, bus, mailbox, bridge)
    }

    /// Bus identity
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Current status
    pub fn status(&self) -> UnitStatus {
        self.status.status()
    }

    /// Current battery percentage
    pub fn battery(&self) -> u8 {
        self.status.battery()
    }

    /// Inventory ledger
    pub fn ledger(&self) -> &InventoryLedger {
        &self.ledger
    }

    /// Strategy used for tasks this unit holds
    pub fn strategy(&self) -> StrategyKind {
        self.protocol.strategy
    }

    /// Tasks with an open contract-net bid
    pub fn open_bids(&self) -> Vec<TaskId> {
        let mut ids: Vec<TaskId> = self.bids.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Whether this unit has delivered its share of `task_id`
    pub fn has_completed(&self, task_id: &str) -> bool {
        self.completed.contains(task_id)
    }

    /// Run until the mailbox is unregistered, then hand the unit back
    ///
    /// Stops early with `Err` only on a ledger invariant violation.
    pub async fn run(mut self) -> UnitResult<Self> {
        info!(
            unit = %self.id,
            battery = self.battery(),
            stock = %self.ledger.stock(),
            strategy = ?self.protocol.strategy,
            "Unit started"
        );

        let mut ticker = tokio::time::interval_at(
            Instant::now() + self.tick_interval,
            self.tick_interval,
        );
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.ticker = Some(ticker);

        loop {
            tokio::select! {
                msg = self.mailbox.next() => match msg {
                    Some(envelope) => {
                        let result = self.handle(envelope).await;
                        self.absorb(result)?;
                    }
                    None => break,
                },
                _ = next_tick(&mut self.ticker) => {
                    let result = self.on_tick().await;
                    self.absorb(result)?;
                }
            }
            if std::mem::take(&mut self.charge_due) {
                let result = self.charge_if_low().await;
                self.absorb(result)?;
            }
        }

        info!(unit = %self.id, "Unit stopped");
        Ok(self)
    }

    fn absorb(&self, result: UnitResult<()>) -> UnitResult<()> {
        match result {
            Ok(()) => Ok(()),
            Err(e) if e.is_fatal() => {
                error!(unit = %self.id, error = %e, "Invariant violated, stopping unit");
                Err(e)
            }
            Err(e) => {
                warn!(unit = %self.id, error = %e, "Message dropped");
                Ok(())
            }
        }
    }

    async fn handle(&mut self, envelope: Envelope) -> UnitResult<()> {
        if self.answer_query(&envelope).await? {
            return Ok(());
        }
        if is_reply(&envelope) {
            self.drop_stale(envelope).await;
            return Ok(());
        }

        match (envelope.performative, envelope.task_type) {
            (Performative::Inform, Some(TaskType::Delivery)) => {
                let task: Task = envelope.decode()?;
                self.on_task(task).await
            }
            (Performative::HelpConfirm, _) => {
                let task: Task = envelope.decode()?;
                self.on_confirmed(task, &envelope.sender).await
            }
            (Performative::Cfp, _) => self.on_cfp(&envelope).await,
            (Performative::AcceptProposal, _) => {
                let award: TaskRef = envelope.decode()?;
                self.on_accept(&award.task_id).await
            }
            (Performative::RejectProposal, _) => {
                let rejection: TaskRef = envelope.decode()?;
                self.on_reject(&rejection.task_id);
                Ok(())
            }
            _ => {
                warn!(
                    unit = %self.id,
                    from = %envelope.sender,
                    kind = %envelope.kind(),
                    "Unexpected message dropped"
                );
                Ok(())
            }
        }
    }

    async fn on_task(&mut self, task: Task) -> UnitResult<()> {
        info!(
            unit = %self.id,
            task_id = %task.id,
            room = %task.target,
            medications = %task.medications,
            "Task received"
        );
        let outcome = self.try_allocate(task).await?;
        debug!(unit = %self.id, ?outcome, "Allocation finished");
        self.charge_if_low().await
    }

    /// Execute a task handed over by a peer, whole or as a split fragment
    async fn on_confirmed(&mut self, task: Task, from: &str) -> UnitResult<()> {
        info!(
            unit = %self.id,
            task_id = %task.id,
            from = %from,
            medications = %task.medications,
            "Confirmed task received"
        );
        if !self.status.may_take_tasks() || !self.ledger.can_fulfill(&task.medications) {
            warn!(
                unit = %self.id,
                task_id = %task.id,
                status = %self.status(),
                battery = self.battery(),
                "Cannot cover confirmed task any more"
            );
            self.report(TaskType::DeliveryFailed, &task, false).await;
            return self.charge_if_low().await;
        }
        self.execute(&task, false).await?;
        self.charge_if_low().await
    }

    async fn on_tick(&mut self) -> UnitResult<()> {
        match self.status.tick() {
            TickOutcome::NeedsCharge => self.charge().await,
            TickOutcome::Drained(_) | TickOutcome::Charging => Ok(()),
        }
    }

    /// Battery tick taken while an exchange is in progress
    fn sample_battery(&mut self) {
        if self.status.tick() == TickOutcome::NeedsCharge {
            debug!(unit = %self.id, battery = self.battery(), "Battery low mid-exchange, charging afterwards");
            self.charge_due = true;
        }
    }

    async fn charge_if_low(&mut self) -> UnitResult<()> {
        if self.status.status() != UnitStatus::Charging && self.status.is_low() {
            self.charge().await
        } else {
            Ok(())
        }
    }

    /// Drive to the charging station and recharge
    async fn charge(&mut self) -> UnitResult<()> {
        self.status.apply(StatusEvent::BatteryLow)?;
        info!(unit = %self.id, battery = self.battery(), "Battery low, heading to charging station");
        let station = self.charging_station;
        let outcome = self.actuate(station).await?;
        self.status.apply(StatusEvent::ChargeFinished {
            recharged: outcome.is_success(),
        })?;
        if outcome.is_success() {
            info!(unit = %self.id, "Charging complete");
        } else {
            warn!(unit = %self.id, ?outcome, battery = self.battery(), "Charging goal failed");
        }
        Ok(())
    }

    /// Deliver `task` and report completion upstream
    ///
    /// Stock is committed even when arrival is not confirmed, and the task is
    /// still reported complete so it does not stay stuck. `reserved` selects a
    /// commit against an open contract-net reservation.
    pub(crate) async fn execute(&mut self, task: &Task, reserved: bool) -> UnitResult<bool> {
        self.status.apply(StatusEvent::TaskAccepted)?;
        info!(unit = %self.id, task_id = %task.id, room = %task.target, "Delivering");

        let outcome = match self.rooms.coords(&task.target) {
            Some(at) => self.actuate(at).await?,
            None => {
                warn!(unit = %self.id, room = %task.target, "Unknown room, cannot drive there");
                GoalOutcome::Aborted
            }
        };
        let confirmed = outcome.is_success();
        if !confirmed {
            warn!(
                unit = %self.id,
                task_id = %task.id,
                ?outcome,
                "Delivery not confirmed, committing stock anyway"
            );
        }

        if reserved {
            self.ledger.commit_reserved(&task.medications)?;
        } else {
            self.ledger.commit(&task.medications)?;
        }
        self.status.apply(StatusEvent::DeliveryFinished)?;
        self.completed.insert(task.id.clone());

        info!(
            unit = %self.id,
            task_id = %task.id,
            confirmed,
            stock = %self.ledger.stock(),
            "Delivery complete"
        );
        self.report(TaskType::DeliveryComplete, task, confirmed).await;
        Ok(confirmed)
    }

    /// Submit a goal and wait for it, answering queries meanwhile
    pub(crate) async fn actuate(&mut self, target: Point) -> UnitResult<GoalOutcome> {
        let bridge = self.bridge.clone();
        let (goal, waiter) = match bridge.submit_goal(target).await {
            Ok(submitted) => submitted,
            Err(e) => {
                warn!(unit = %self.id, error = %e, "Goal submission failed");
                return Ok(GoalOutcome::Aborted);
            }
        };

        let wait = bridge.wait(goal, waiter, self.protocol.goal_timeout());
        tokio::pin!(wait);
        let mut open = true;
        loop {
            tokio::select! {
                outcome = &mut wait => return Ok(outcome),
                msg = self.mailbox.recv(), if open => match msg {
                    Some(envelope) => self.interleave(envelope).await?,
                    None => open = false,
                },
                _ = next_tick(&mut self.ticker) => self.sample_battery(),
            }
        }
    }

    /// Capability snapshot, with distance to `target` when resolvable
    pub(crate) async fn capability_report(&self, target: Option<&str>) -> CapabilityReport {
        let position = self.bridge.position().await;
        let room_coords = target.and_then(|room| self.rooms.coords(room));
        let distance_to_target = match (position, room_coords) {
            (Some(at), Some(room)) => Some(at.distance_to(&room)),
            _ => None,
        };
        CapabilityReport {
            unit: self.id.clone(),
            status: self.status.status(),
            stock: self.ledger.free_stock(),
            battery: self.status.battery(),
            position,
            room_coords,
            distance_to_target,
        }
    }

    /// Answer a read-only query; false when `envelope` is not one
    async fn answer_query(&mut self, envelope: &Envelope) -> UnitResult<bool> {
        match (envelope.performative, envelope.task_type) {
            (Performative::Inform, Some(TaskType::AvailabilityCheck))
            | (Performative::Inform, Some(TaskType::Availability)) => {
                let check: AvailabilityCheck = envelope.decode()?;
                let report = self.capability_report(check.target.as_deref()).await;
                debug!(
                    unit = %self.id,
                    to = %envelope.sender,
                    status = %report.status,
                    battery = report.battery,
                    "Answering capability query"
                );
                let reply = envelope
                    .reply(Performative::Inform)
                    .with_task_type(TaskType::AvailabilityResponse)
                    .with_body(&report)?;
                self.send(reply).await;
                Ok(true)
            }
            (Performative::HelpRequest, _) => {
                self.answer_help(envelope).await?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Handle a message that arrived in the middle of an exchange
    async fn interleave(&mut self, envelope: Envelope) -> UnitResult<()> {
        if self.answer_query(&envelope).await? {
            return Ok(());
        }
        if is_reply(&envelope) {
            self.drop_stale(envelope).await;
        } else {
            self.mailbox.defer(envelope);
        }
        Ok(())
    }

    async fn drop_stale(&mut self, envelope: Envelope) {
        debug!(
            unit = %self.id,
            from = %envelope.sender,
            kind = %envelope.kind(),
            "Stale reply dropped"
        );
        if envelope.performative == Performative::Propose {
            if let Some(proposal) = self.decode_or_warn::<Proposal>(&envelope) {
                if let Ok(reject) = envelope
                    .reply(Performative::RejectProposal)
                    .with_body(&TaskRef::new(proposal.task_id))
                {
                    self.send(reject).await;
                }
            }
        }
    }

    /// Gather replies in `conversation` until `expected` arrive or `window` ends
    ///
    /// Silent peers simply shorten the result.
    pub(crate) async fn collect_replies(
        &mut self,
        conversation: &str,
        expected: usize,
        window: Duration,
    ) -> UnitResult<Vec<Envelope>> {
        let deadline = tokio::time::sleep_until(Instant::now() + window);
        tokio::pin!(deadline);
        let mut replies = Vec::new();
        while replies.len() < expected {
            tokio::select! {
                _ = &mut deadline => break,
                _ = next_tick(&mut self.ticker) => self.sample_battery(),
                msg = self.mailbox.recv() => match msg {
                    Some(envelope)
                        if is_reply(&envelope) && envelope.in_conversation(conversation) =>
                    {
                        replies.push(envelope);
                    }
                    Some(envelope) => self.interleave(envelope).await?,
                    None => break,
                },
            }
        }
        if replies.len() < expected {
            debug!(
                unit = %self.id,
                received = replies.len(),
                expected,
                "Collection window closed early"
            );
        }
        Ok(replies)
    }

    /// Send one envelope built per peer; returns how many were delivered
    pub(crate) async fn broadcast<F>(&self, mut build: F) -> UnitResult<usize>
    where
        F: FnMut(&AgentId) -> UnitResult<Envelope>,
    {
        let mut sent = 0;
        for peer in &self.peers {
            let envelope = build(peer)?;
            if self.send(envelope).await {
                sent += 1;
            }
        }
        Ok(sent)
    }

    /// Send, logging an unreachable receiver instead of failing
    pub(crate) async fn send(&self, envelope: Envelope) -> bool {
        let receiver = envelope.receiver.clone();
        match self.bus.send(envelope).await {
            Ok(()) => true,
            Err(e) => {
                warn!(unit = %self.id, to = %receiver, error = %e, "Send failed, peer treated as unavailable");
                false
            }
        }
    }

    /// Report a task outcome to the dispatcher
    pub(crate) async fn report(&self, task_type: TaskType, task: &Task, confirmed: bool) {
        let report = DeliveryReport {
            task: task.clone(),
            unit: self.id.clone(),
            confirmed,
        };
        match Envelope::inform(self.id.clone(), self.dispatcher.clone(), task_type).with_body(&report)
        {
            Ok(envelope) => {
                self.send(envelope).await;
            }
            Err(e) => warn!(unit = %self.id, error = %e, "Could not encode report"),
        }
    }

    pub(crate) fn decode_or_warn<T: DeserializeOwned>(&self, envelope: &Envelope) -> Option<T> {
        match envelope.decode() {
            Ok(body) => Some(body),
            Err(e) => {
                warn!(unit = %self.id, error = %e, "Dropping malformed reply");
                None
            }
        }
    }
}

/// Next battery tick; never resolves before the loop arms the ticker
async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}

fn is_reply(envelope: &Envelope) -> bool {
    matches!(
        (envelope.performative, envelope.task_type),
        (Performative::Propose, _)
            | (Performative::Refuse, _)
            | (Performative::HelpResponse, _)
            | (Performative::Inform, Some(TaskType::AvailabilityResponse))
    )
}
