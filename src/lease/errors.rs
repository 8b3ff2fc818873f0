//! Lease and leader-info errors

use thiserror::Error;

/// Result type for lease operations
pub type LeaseResult<T> = Result<T, LeaseError>;

#[derive(Debug, Clone, Error)]
pub enum LeaseError {
    /// Network or service fault talking to the lock object
    #[error("Lease transport fault: {0}")]
    Transport(String),

    /// `create` lost a race with another node
    #[error("Lease lock already exists")]
    AlreadyExists,

    #[error("Leader info record is invalid: {0}")]
    InvalidLeaderInfo(String),
}
