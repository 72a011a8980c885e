//! MedFleet Allocation - the delivery unit agent
//!
//! A unit holds a task handed to it by the dispatcher and decides who
//! delivers it. Two strategies sit behind [`Unit::try_allocate`], selected by
//! configuration:
//!
//! - **Delegation-and-Split** (`delegation_split`): distance-driven delegation,
//!   solo execution, then a greedy split over peer offers
//! - **Contract-Net** (`contract_net`): call for proposals, cost bids backed by
//!   ledger reservations, cheapest bid wins
//!
//! Every unit answers both protocols as a participant regardless of the
//! strategy it uses for its own tasks.
//!
//! # Failure Semantics
//!
//! - Capacity shortfalls end in [`Outcome::Failed`] and a `delivery_failed`
//!   report carrying the original task; the dispatcher retries
//! - Silent peers shrink the candidate set; they are never an error
//! - Malformed messages are logged and dropped
//! - A ledger invariant violation stops the unit

pub mod contract_net;
pub mod delegation;
pub mod error;
pub mod split;
pub mod strategy;
pub mod unit;

pub use contract_net::select_winner;
pub use delegation::{nearest_capable, Candidate};
pub use error::{UnitError, UnitResult};
pub use split::{own_share, plan_split};
pub use strategy::Outcome;
pub use unit::Unit;
