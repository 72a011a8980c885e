//! Delegation-and-Split strategy.
//!
//! The holder of a task tries, in order:
//! 1. delegating the whole task to a strictly closer, capable, idle peer
//! 2. executing it alone
//! 3. splitting it over its own free stock and peer offers
//! 4. reporting it failed with its original requirement

use crate::error::UnitResult;
use crate::split::{own_share, plan_split};
use crate::strategy::Outcome;
use crate::unit::Unit;
use medfleet_core::{AgentId, Requirement, Task};
use medfleet_mesh::{new_conversation_id, DelegationNotice, Envelope, Performative, TaskType};
use medfleet_unit_status::{AvailabilityCheck, CapabilityReport};
use tracing::{debug, info};

/// A peer as seen by the holder of a task
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    /// Peer id
    pub unit: AgentId,
    /// Reported `Available` with battery at or above the threshold
    pub available: bool,
    /// Reported free stock covers the whole task
    pub can_fulfill: bool,
    /// Distance to the target room; infinite when unresolved
    pub distance: f64,
}

/// Nearest capable idle peer strictly closer than `own_distance`
///
/// Ties keep the first candidate seen.
pub fn nearest_capable(candidates: &[Candidate], own_distance: f64) -> Option<&Candidate> {
    let mut best: Option<&Candidate> = None;
    for candidate in candidates {
        if !candidate.available || !candidate.can_fulfill || !candidate.distance.is_finite() {
            continue;
        }
        if candidate.distance >= own_distance {
            continue;
        }
        match best {
            Some(b) if b.distance <= candidate.distance => {}
            _ => best = Some(candidate),
        }
    }
    best
}

impl Unit {
    pub(crate) async fn allocate_by_delegation(&mut self, task: Task) -> UnitResult<Outcome> {
        let reports = self.query_peers(Some(&task.target)).await?;
        let room = self.rooms.coords(&task.target);
        let own_distance = match (self.bridge.position().await, room) {
            (Some(at), Some(room)) => at.distance_to(&room),
            _ => f64::INFINITY,
        };

        let threshold = self.status.policy().low_threshold;
        let candidates: Vec<Candidate> = reports
            .iter()
            .map(|report| Candidate {
                unit: report.unit.clone(),
                available: report.is_available() && report.battery >= threshold,
                can_fulfill: report.can_fulfill(&task.medications),
                distance: report.resolved_distance(room),
            })
            .collect();
        debug!(unit = %self.id, task_id = %task.id, own_distance, ?candidates, "Candidates gathered");

        if let Some(peer) = nearest_capable(&candidates, own_distance) {
            let peer = peer.unit.clone();
            self.delegate(&task, &peer).await?;
            return Ok(Outcome::Delegated { to: peer });
        }

        if self.status.may_take_tasks() && self.ledger.can_fulfill(&task.medications) {
            let confirmed = self.execute(&task, false).await?;
            return Ok(Outcome::SelfExecuted { confirmed });
        }

        if let Some(contributors) = self.split(&task).await? {
            return Ok(Outcome::Split { contributors });
        }

        info!(unit = %self.id, task_id = %task.id, "No allocation possible, returning task");
        self.report(TaskType::DeliveryFailed, &task, false).await;
        Ok(Outcome::Failed)
    }

    /// Capability reports from every peer that answers within the window
    pub(crate) async fn query_peers(&mut self, target: Option<&str>) -> UnitResult<Vec<CapabilityReport>> {
        let conversation = new_conversation_id();
        let check = AvailabilityCheck {
            target: target.map(str::to_string),
        };
        let me = self.id.clone();
        let sent = self
            .broadcast(|peer| {
                Ok(Envelope::inform(me.clone(), peer.clone(), TaskType::AvailabilityCheck)
                    .with_conversation(conversation.clone())
                    .with_body(&check)?)
            })
            .await?;

        let window = self.protocol.query_timeout();
        let replies = self.collect_replies(&conversation, sent, window).await?;
        Ok(replies
            .iter()
            .filter(|r| r.task_type == Some(TaskType::AvailabilityResponse))
            .filter_map(|r| self.decode_or_warn::<CapabilityReport>(r))
            .collect())
    }

    async fn delegate(&mut self, task: &Task, peer: &str) -> UnitResult<()> {
        info!(unit = %self.id, task_id = %task.id, to = %peer, "Delegating task to closer peer");
        self.notify_delegation(&task.id, vec![peer.to_string()]).await?;
        let confirm = Envelope::new(self.id.clone(), peer, Performative::HelpConfirm).with_body(task)?;
        self.send(confirm).await;
        Ok(())
    }

    pub(crate) async fn notify_delegation(&self, task_id: &str, to: Vec<AgentId>) -> UnitResult<()> {
        let notice = DelegationNotice {
            task_id: task_id.to_string(),
            from: self.id.clone(),
            to,
        };
        let envelope = Envelope::inform(self.id.clone(), self.dispatcher.clone(), TaskType::DelegationNotice)
            .with_body(&notice)?;
        self.send(envelope).await;
        Ok(())
    }

    /// Cover what the unit can itself and ask peers for the rest
    async fn split(&mut self, task: &Task) -> UnitResult<Option<Vec<(AgentId, Requirement)>>> {
        let mine = if self.status.may_take_tasks() {
            own_share(&task.medications, &self.ledger.free_stock())
        } else {
            Requirement::new()
        };
        let remaining = task.medications.saturating_sub(&mine);

        let conversation = new_conversation_id();
        let probe = task.fragment(remaining.clone());
        let me = self.id.clone();
        let sent = self
            .broadcast(|peer| {
                Ok(Envelope::new(me.clone(), peer.clone(), Performative::HelpRequest)
                    .with_conversation(conversation.clone())
                    .with_body(&probe)?)
            })
            .await?;

        let window = self.protocol.help_timeout();
        let replies = self.collect_replies(&conversation, sent, window).await?;
        let offers: Vec<(AgentId, Requirement)> = replies
            .iter()
            .filter(|r| r.performative == Performative::HelpResponse)
            .filter_map(|r| {
                self.decode_or_warn::<Requirement>(r)
                    .map(|offer| (r.sender.clone(), offer))
            })
            .collect();
        debug!(unit = %self.id, task_id = %task.id, remaining = %remaining, ?offers, "Help offers");

        let Some(plan) = plan_split(&remaining, &offers) else {
            info!(unit = %self.id, task_id = %task.id, remaining = %remaining, "Split failed");
            return Ok(None);
        };

        let mut contributors = Vec::with_capacity(plan.len() + 1);
        if !mine.is_empty() {
            contributors.push((self.id.clone(), mine.clone()));
        }
        contributors.extend(plan.iter().cloned());
        if contributors.is_empty() {
            return Ok(None);
        }

        info!(unit = %self.id, task_id = %task.id, parts = contributors.len(), "Task split");
        let units = contributors.iter().map(|(unit, _)| unit.clone()).collect();
        self.notify_delegation(&task.id, units).await?;

        for (peer, part) in &plan {
            let confirm = Envelope::new(self.id.clone(), peer.clone(), Performative::HelpConfirm)
                .with_body(&task.fragment(part.clone()))?;
            self.send(confirm).await;
        }
        if !mine.is_empty() {
            self.execute(&task.fragment(mine), false).await?;
        }
        Ok(Some(contributors))
    }

    /// Offer free stock towards a peer's remaining requirement
    pub(crate) async fn answer_help(&mut self, envelope: &Envelope) -> UnitResult<()> {
        let probe: Task = envelope.decode()?;
        let offer = if self.status.may_take_tasks() {
            own_share(&probe.medications, &self.ledger.free_stock())
        } else {
            Requirement::new()
        };
        debug!(unit = %self.id, to = %envelope.sender, task_id = %probe.id, offer = %offer, "Answering help request");
        let reply = envelope.reply(Performative::HelpResponse).with_body(&offer)?;
        self.send(reply).await;
        Ok(())
    }
}
