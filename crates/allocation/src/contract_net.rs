//! Contract-Net strategy.
//!
//! Originator side: `cfp` to every peer, collect `propose`/`refuse` for a
//! fixed window, award the cheapest bid (first seen on ties), reject the rest.
//! The originator does not bid on its own call.
//!
//! Participant side: bid only when the ledger can cover the call, holding a
//! reservation for the bid; release it on `reject-proposal`, fold it into a
//! stock decrement and deliver on `accept-proposal`.

use crate::error::UnitResult;
use crate::strategy::Outcome;
use crate::unit::Unit;
use medfleet_core::Task;
use medfleet_mesh::{new_conversation_id, Envelope, Performative, Proposal, TaskRef, TaskType};
use tracing::{debug, info, warn};

/// Cheapest proposal; the earliest one wins a tie
pub fn select_winner(proposals: &[Proposal]) -> Option<&Proposal> {
    let mut best: Option<&Proposal> = None;
    for proposal in proposals {
        match best {
            Some(b) if b.cost <= proposal.cost => {}
            _ => best = Some(proposal),
        }
    }
    best
}

impl Unit {
    pub(crate) async fn allocate_by_contract_net(&mut self, task: Task) -> UnitResult<Outcome> {
        let conversation = new_conversation_id();
        let me = self.id.clone();
        let sent = self
            .broadcast(|peer| {
                Ok(Envelope::new(me.clone(), peer.clone(), Performative::Cfp)
                    .with_conversation(conversation.clone())
                    .with_body(&task)?)
            })
            .await?;
        info!(unit = %self.id, task_id = %task.id, peers = sent, "Call for proposals sent");

        let window = self.protocol.cfp_window();
        let replies = self.collect_replies(&conversation, sent, window).await?;
        let proposals: Vec<Proposal> = replies
            .iter()
            .filter(|r| r.performative == Performative::Propose)
            .filter_map(|r| self.decode_or_warn::<Proposal>(r))
            .filter(|p| p.task_id == task.id)
            .collect();
        debug!(unit = %self.id, task_id = %task.id, ?proposals, "Proposals collected");

        let Some(winner) = select_winner(&proposals).cloned() else {
            info!(unit = %self.id, task_id = %task.id, "No proposals, returning task");
            self.report(TaskType::DeliveryFailed, &task, false).await;
            return Ok(Outcome::Failed);
        };

        info!(
            unit = %self.id,
            task_id = %task.id,
            winner = %winner.bidder,
            cost = winner.cost,
            "Proposal accepted"
        );
        self.notify_delegation(&task.id, vec![winner.bidder.clone()]).await?;

        let award = TaskRef::new(task.id.clone());
        for reply in replies.iter().filter(|r| r.performative == Performative::Propose) {
            let performative = if reply.sender == winner.bidder {
                Performative::AcceptProposal
            } else {
                Performative::RejectProposal
            };
            let decision = reply.reply(performative).with_body(&award)?;
            self.send(decision).await;
        }

        Ok(Outcome::Awarded {
            winner: winner.bidder,
            cost: winner.cost,
        })
    }

    /// Bid on a call for proposals, reserving the requirement
    pub(crate) async fn on_cfp(&mut self, envelope: &Envelope) -> UnitResult<()> {
        let task: Task = envelope.decode()?;

        if self.bids.contains_key(&task.id) {
            debug!(unit = %self.id, task_id = %task.id, "Repeated call, bid already held");
        } else if !self.status.may_take_tasks() || !self.ledger.can_fulfill(&task.medications) {
            info!(
                unit = %self.id,
                task_id = %task.id,
                status = %self.status(),
                battery = self.battery(),
                "Refusing call for proposals"
            );
            let refusal = envelope
                .reply(Performative::Refuse)
                .with_body(&TaskRef::new(task.id.clone()))?;
            self.send(refusal).await;
            return Ok(());
        } else {
            self.ledger.reserve(&task.medications)?;
            self.bids.insert(task.id.clone(), task.clone());
        }

        let proposal = Proposal {
            task_id: task.id.clone(),
            bidder: self.id.clone(),
            cost: task.medications.total(),
        };
        info!(unit = %self.id, task_id = %task.id, cost = proposal.cost, "Proposing");
        let reply = envelope.reply(Performative::Propose).with_body(&proposal)?;
        self.send(reply).await;
        Ok(())
    }

    /// Deliver an awarded task against its reservation
    pub(crate) async fn on_accept(&mut self, task_id: &str) -> UnitResult<()> {
        if self.completed.contains(task_id) {
            debug!(unit = %self.id, task_id = %task_id, "Duplicate award ignored");
            return Ok(());
        }
        let Some(task) = self.bids.remove(task_id) else {
            warn!(unit = %self.id, task_id = %task_id, "Award without an open bid ignored");
            return Ok(());
        };

        if !self.status.may_take_tasks() {
            warn!(
                unit = %self.id,
                task_id = %task_id,
                battery = self.battery(),
                "Awarded but can no longer take tasks, returning task"
            );
            self.ledger.release(&task.medications);
            self.report(TaskType::DeliveryFailed, &task, false).await;
            return Ok(());
        }

        self.execute(&task, true).await?;
        Ok(())
    }

    /// Drop a losing bid and free its reservation
    pub(crate) fn on_reject(&mut self, task_id: &str) {
        match self.bids.remove(task_id) {
            Some(task) => {
                self.ledger.release(&task.medications);
                info!(unit = %self.id, task_id = %task_id, "Bid rejected, reservation released");
            }
            None => debug!(unit = %self.id, task_id = %task_id, "Rejection for unknown bid"),
        }
    }
}
