//! Error types for the actuation bridge.

use thiserror::Error;

/// Errors raised while handing a goal to the motion controller
#[derive(Debug, Error)]
pub enum BridgeError {
    /// The controller is not running
    #[error("Motion controller unavailable")]
    Unavailable,
}

/// Result type for bridge operations
pub type BridgeResult<T> = Result<T, BridgeError>;
