//! Errors for swarm join/leave.

use thiserror::Error;

/// Errors produced while joining or leaving a discovery topic.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// The topic was already joined.
    #[error("already joined this topic")]
    AlreadyJoined,

    /// The topic was not joined, so it cannot be left.
    #[error("topic not joined")]
    NotJoined,
}
