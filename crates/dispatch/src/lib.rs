//! MedFleet Dispatch - task intake and fleet-level assignment
//!
//! Pulls delivery tasks from a [`TaskSource`], orders each one from the
//! available unit with the most battery and tracks the units responsible for
//! it until every one of them reports completion.
//!
//! # Guarantees
//!
//! - A sourced task is never dropped: unplaced, returned and overdue tasks are
//!   all queued again
//! - Returned tasks are retried before new ones
//! - A task is removed from the source only after all its units report done

#![warn(missing_docs)]

pub mod dispatcher;
pub mod error;
pub mod source;

pub use dispatcher::{Assignment, CycleOutcome, Dispatcher};
pub use error::{DispatchError, DispatchResult, SourceError};
pub use source::{HttpTaskSource, InMemoryTaskSource, PendingTasks, TaskSource};
