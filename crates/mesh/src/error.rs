//! Error types for MedFleet mesh operations.
//!
//! Covers addressing failures on the bus and malformed frames or bodies.
//! Per the fleet's error taxonomy, a protocol violation is logged and the
//! message dropped; it never stops an agent.

use thiserror::Error;

/// Errors that can occur in mesh operations.
#[derive(Debug, Error)]
pub enum MeshError {
    /// No mailbox is registered under this id
    #[error("Peer not found: {peer_id}")]
    PeerNotFound {
        /// Addressed agent
        peer_id: String,
    },

    /// The mailbox exists but its owner has gone away
    #[error("Peer unreachable: {peer_id}")]
    Unreachable {
        /// Addressed agent
        peer_id: String,
    },

    /// A frame could not be encoded or decoded
    #[error("Codec error: {0}")]
    Codec(#[from] serde_json::Error),

    /// A well-formed envelope carried a body that does not fit its message type
    #[error("Protocol violation from {sender}: {reason}")]
    Protocol {
        /// Sender of the offending message
        sender: String,
        /// What was wrong with it
        reason: String,
    },
}

/// Result type for mesh operations.
pub type MeshResult<T> = Result<T, MeshError>;
