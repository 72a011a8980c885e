//! Error types for the unit agent.

use medfleet_core::LedgerError;
use medfleet_mesh::MeshError;
use medfleet_unit_status::StatusError;
use thiserror::Error;

/// Errors surfaced while a unit handles a message
#[derive(Debug, Error)]
pub enum UnitError {
    /// The ledger refused an operation the unit had already validated
    #[error("Ledger invariant violated: {0}")]
    Ledger(#[from] LedgerError),

    /// A status transition was rejected
    #[error("Status error: {0}")]
    Status(#[from] StatusError),

    /// Malformed message or codec failure
    #[error("Mesh error: {0}")]
    Mesh(#[from] MeshError),
}

impl UnitError {
    /// Whether the unit must stop rather than drop the message
    pub fn is_fatal(&self) -> bool {
        matches!(self, UnitError::Ledger(_))
    }
}

/// Result type for unit operations
pub type UnitResult<T> = Result<T, UnitError>;
