//! Typed envelopes and the JSON wire codec.
//!
//! Every message exchanged between units and the dispatcher is an
//! [`Envelope`]: addressing, a performative, an optional `inform` sub-purpose,
//! an optional conversation id and a JSON body. Bodies stay encoded until the
//! handler that understands them calls [`Envelope::decode`], so a malformed
//! body surfaces as a [`MeshError::Protocol`] in exactly one place.

use crate::error::{MeshError, MeshResult};
use medfleet_core::AgentId;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Speech act carried by an envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Performative {
    /// Plain notification; see [`TaskType`] for the sub-purpose
    #[serde(rename = "inform")]
    Inform,
    /// Contract-net call for proposals
    #[serde(rename = "cfp")]
    Cfp,
    /// Contract-net bid
    #[serde(rename = "propose")]
    Propose,
    /// Contract-net decline
    #[serde(rename = "refuse")]
    Refuse,
    /// Contract-net award
    #[serde(rename = "accept-proposal")]
    AcceptProposal,
    /// Contract-net rejection
    #[serde(rename = "reject-proposal")]
    RejectProposal,
    /// Split: ask peers what they can offer
    #[serde(rename = "help_request")]
    HelpRequest,
    /// Split: a peer's offer
    #[serde(rename = "help_response")]
    HelpResponse,
    /// Split or delegation: a confirmed (partial) task
    #[serde(rename = "help_confirm")]
    HelpConfirm,
}

/// Sub-purpose of an `inform` envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    /// Delivery order from the dispatcher
    Delivery,
    /// Point availability probe before final dispatch
    Availability,
    /// Capability query
    AvailabilityCheck,
    /// Capability report
    AvailabilityResponse,
    /// A task bounced back for requeueing
    DeliveryFailed,
    /// A unit finished its part of a task
    DeliveryComplete,
    /// Responsibility for a task moved between units
    DelegationNotice,
}

impl fmt::Display for Performative {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Performative::Inform => "inform",
            Performative::Cfp => "cfp",
            Performative::Propose => "propose",
            Performative::Refuse => "refuse",
            Performative::AcceptProposal => "accept-proposal",
            Performative::RejectProposal => "reject-proposal",
            Performative::HelpRequest => "help_request",
            Performative::HelpResponse => "help_response",
            Performative::HelpConfirm => "help_confirm",
        };
        f.write_str(name)
    }
}

/// Addressed message with an encoded body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Sending agent
    pub sender: AgentId,
    /// Addressed agent
    pub receiver: AgentId,
    /// Speech act
    pub performative: Performative,
    /// Sub-purpose for `inform`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_type: Option<TaskType>,
    /// Exchange this message belongs to; replies echo it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    /// JSON-encoded payload
    pub body: String,
}

impl Envelope {
    /// Create an envelope with an empty (`null`) body
    pub fn new(
        sender: impl Into<AgentId>,
        receiver: impl Into<AgentId>,
        performative: Performative,
    ) -> Self {
        Self {
            sender: sender.into(),
            receiver: receiver.into(),
            performative,
            task_type: None,
            conversation_id: None,
            body: "null".to_string(),
        }
    }

    /// Create an `inform` envelope with the given sub-purpose
    pub fn inform(sender: impl Into<AgentId>, receiver: impl Into<AgentId>, task_type: TaskType) -> Self {
        Self::new(sender, receiver, Performative::Inform).with_task_type(task_type)
    }

    /// Set the `inform` sub-purpose
    pub fn with_task_type(mut self, task_type: TaskType) -> Self {
        self.task_type = Some(task_type);
        self
    }

    /// Tag the envelope with a conversation id
    pub fn with_conversation(mut self, conversation_id: impl Into<String>) -> Self {
        self.conversation_id = Some(conversation_id.into());
        self
    }

    /// Encode `body` as the payload
    pub fn with_body<T: Serialize>(mut self, body: &T) -> MeshResult<Self> {
        self.body = serde_json::to_string(body)?;
        Ok(self)
    }

    /// Decode the payload as `T`
    pub fn decode<T: DeserializeOwned>(&self) -> MeshResult<T> {
        serde_json::from_str(&self.body).map_err(|e| MeshError::Protocol {
            sender: self.sender.clone(),
            reason: format!("bad {} body: {}", self.kind(), e),
        })
    }

    /// Reply envelope: addresses swapped, conversation echoed
    pub fn reply(&self, performative: Performative) -> Envelope {
        Envelope {
            sender: self.receiver.clone(),
            receiver: self.sender.clone(),
            performative,
            task_type: None,
            conversation_id: self.conversation_id.clone(),
            body: "null".to_string(),
        }
    }

    /// True when this envelope belongs to `conversation_id`
    pub fn in_conversation(&self, conversation_id: &str) -> bool {
        self.conversation_id.as_deref() == Some(conversation_id)
    }

    /// Short human label, e.g. `inform/delivery` or `cfp`
    pub fn kind(&self) -> String {
        match self.task_type {
            Some(tt) => format!("{}/{}", self.performative, task_type_name(tt)),
            None => self.performative.to_string(),
        }
    }

    /// Encode the whole envelope into a wire frame
    pub fn to_wire(&self) -> MeshResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decode a wire frame
    pub fn from_wire(frame: &[u8]) -> MeshResult<Self> {
        Ok(serde_json::from_slice(frame)?)
    }
}

fn task_type_name(tt: TaskType) -> &'static str {
    match tt {
        TaskType::Delivery => "delivery",
        TaskType::Availability => "availability",
        TaskType::AvailabilityCheck => "availability_check",
        TaskType::AvailabilityResponse => "availability_response",
        TaskType::DeliveryFailed => "delivery_failed",
        TaskType::DeliveryComplete => "delivery_complete",
        TaskType::DelegationNotice => "delegation_notice",
    }
}

/// Fresh conversation id
pub fn new_conversation_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
