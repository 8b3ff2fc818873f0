//! # Store Errors

use std::io;

use thiserror::Error;

/// Result type for page and checkpoint store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Page and checkpoint store errors.
///
/// A version-token mismatch is not an error: it is reported as
/// [`WriteOutcome::Conflict`](super::WriteOutcome) so the caller must handle it.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// Network or timeout fault; retried by [`Retrying`](super::Retrying)
    #[error("Transient store fault: {0}")]
    Transient(String),

    /// Credentials missing, expired or rejected
    #[error("Access forbidden: {0}")]
    Forbidden(String),

    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Offset {offset} or length {len} is not aligned to the {page_size}-byte page size")]
    Misaligned {
        offset: u64,
        len: usize,
        page_size: usize,
    },

    #[error("Commit of {len} bytes exceeds the {max} byte commit ceiling")]
    CommitTooLarge { len: usize, max: usize },

    #[error("Range {offset}+{len} is outside the {size} byte region")]
    OutOfRange { offset: u64, len: usize, size: u64 },

    #[error("Corrupt store object: {0}")]
    Corrupt(String),

    #[error("I/O error: {0}")]
    Io(String),
}

impl StoreError {
    /// Whether the retry policy may repeat the failed call
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Transient(_))
    }
}

impl From<io::Error> for StoreError {
    fn from(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::NotFound => StoreError::NotFound(e.to_string()),
            io::ErrorKind::PermissionDenied => StoreError::Forbidden(e.to_string()),
            io::ErrorKind::TimedOut | io::ErrorKind::Interrupted => {
                StoreError::Transient(e.to_string())
            }
            _ => StoreError::Io(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_transient_is_retryable() {
        assert!(StoreError::Transient("timeout".into()).is_transient());
        assert!(!StoreError::Forbidden("expired".into()).is_transient());
        assert!(!StoreError::Io("disk".into()).is_transient());
    }

    #[test]
    fn test_io_error_mapping() {
        let err: StoreError = io::Error::new(io::ErrorKind::PermissionDenied, "denied").into();
        assert!(matches!(err, StoreError::Forbidden(_)));

        let err: StoreError = io::Error::new(io::ErrorKind::TimedOut, "slow").into();
        assert!(err.is_transient());
    }
}
