//! MedFleet Mesh - addressed messaging between fleet agents
//!
//! Units and the dispatcher never share memory; every interaction is an
//! [`Envelope`] sent over the [`MessageBus`] and read from the receiver's
//! [`Mailbox`].
//!
//! # Core Components
//!
//! - **Envelope**: performative, `inform` sub-purpose, conversation id, JSON body
//! - **MessageBus**: in-process address table carrying encoded frames
//! - **Mailbox**: per-agent receive side with bounded waits and deferral
//! - **Schema**: report and bid bodies shared across crates
//!
//! # Example Usage
//!
//! ```rust,no_run
//! use medfleet_mesh::{Envelope, MessageBus, TaskType};
//!
//! # async fn demo() -> medfleet_mesh::MeshResult<()> {
//! let bus = MessageBus::new();
//! let mut inbox = bus.register("robot1").await;
//! bus.send(Envelope::inform("taskmanager", "robot1", TaskType::AvailabilityCheck)).await?;
//! let msg = inbox.recv().await;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod bus;
pub mod envelope;
pub mod error;
pub mod schema;

// Re-export main types
pub use bus::{Mailbox, MessageBus, Received};
pub use envelope::{new_conversation_id, Envelope, Performative, TaskType};
pub use error::{MeshError, MeshResult};
pub use schema::{DelegationNotice, DeliveryReport, Proposal, TaskRef};
