//! Log engine error types
//!
//! Error codes:
//! - PLOG_INVALID_ARGUMENT (ERROR severity)
//! - PLOG_VERSION_CONFLICT (FATAL severity)
//! - PLOG_CORRUPTION (FATAL severity)
//! - PLOG_STORE_FAILED (ERROR severity)
//! - PLOG_ACCESS_DENIED (ERROR severity)
//! - PLOG_READ_SIZING (ERROR severity)
//! - PLOG_NOT_LEADER (ERROR severity)
//! - PLOG_SCHEDULER_STOPPED (ERROR severity)
//! - PLOG_SESSION_ABORTED (FATAL severity)
//! - PLOG_CANCELLED (ERROR severity)
//! - PLOG_CONFIG_INVALID (ERROR severity)

use std::error::Error as StdError;
use std::fmt;

use crate::config::ConfigError;
use crate::store::{StoreError, VersionToken};

/// Severity levels for log engine errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// The call fails, the process continues
    Error,
    /// The owning writer or leader session must restart
    Fatal,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Error => write!(f, "ERROR"),
            Severity::Fatal => write!(f, "FATAL"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogErrorCode {
    /// Empty batch, oversized key or value, bad stream name
    InvalidArgument,
    /// The page region was mutated by another writer
    VersionConflict,
    /// Bad version byte, checksum mismatch or truncated record
    Corruption,
    /// Store fault left over after the adapter's retries
    StoreFailed,
    /// Credentials missing, expired or rejected
    AccessDenied,
    /// A read asked for more bytes than the window can hold
    ReadSizing,
    /// This process does not own writes
    NotLeader,
    /// The write scheduler no longer accepts work
    SchedulerStopped,
    /// A writer failed fatally and ended the leader session
    SessionAborted,
    Cancelled,
    ConfigInvalid,
}

impl LogErrorCode {
    pub fn code(&self) -> &'static str {
        match self {
            LogErrorCode::InvalidArgument => "PLOG_INVALID_ARGUMENT",
            LogErrorCode::VersionConflict => "PLOG_VERSION_CONFLICT",
            LogErrorCode::Corruption => "PLOG_CORRUPTION",
            LogErrorCode::StoreFailed => "PLOG_STORE_FAILED",
            LogErrorCode::AccessDenied => "PLOG_ACCESS_DENIED",
            LogErrorCode::ReadSizing => "PLOG_READ_SIZING",
            LogErrorCode::NotLeader => "PLOG_NOT_LEADER",
            LogErrorCode::SchedulerStopped => "PLOG_SCHEDULER_STOPPED",
            LogErrorCode::SessionAborted => "PLOG_SESSION_ABORTED",
            LogErrorCode::Cancelled => "PLOG_CANCELLED",
            LogErrorCode::ConfigInvalid => "PLOG_CONFIG_INVALID",
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            LogErrorCode::VersionConflict
            | LogErrorCode::Corruption
            | LogErrorCode::SessionAborted => Severity::Fatal,
            _ => Severity::Error,
        }
    }
}

impl fmt::Display for LogErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Log engine error with code, message and optional context
#[derive(Debug)]
pub struct LogError {
    code: LogErrorCode,
    message: String,
    details: Option<String>,
    /// Published leader address, set on `NotLeader`
    leader_address: Option<String>,
    source: Option<Box<dyn StdError + Send + Sync>>,
}

impl LogError {
    fn new(code: LogErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
            leader_address: None,
            source: None,
        }
    }

    fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(LogErrorCode::InvalidArgument, message)
    }

    pub fn version_conflict(offset: u64, expected: &VersionToken, actual: &VersionToken) -> Self {
        Self::new(
            LogErrorCode::VersionConflict,
            "Page region was modified by another writer",
        )
        .with_details(format!(
            "offset: {}, expected: {}, actual: {}",
            offset, expected, actual
        ))
    }

    pub fn corruption_at_offset(offset: u64, reason: impl Into<String>) -> Self {
        Self::new(LogErrorCode::Corruption, reason).with_details(format!("byte_offset: {}", offset))
    }

    pub fn read_sizing(requested: usize, available: usize) -> Self {
        Self::new(
            LogErrorCode::ReadSizing,
            "Read request exceeds the readable window",
        )
        .with_details(format!("requested: {}, available: {}", requested, available))
    }

    pub fn not_leader(leader_address: Option<String>) -> Self {
        let mut err = Self::new(LogErrorCode::NotLeader, "This node is not the leader");
        if let Some(ref address) = leader_address {
            err.details = Some(format!("leader: {}", address));
        }
        err.leader_address = leader_address;
        err
    }

    pub fn scheduler_stopped() -> Self {
        Self::new(
            LogErrorCode::SchedulerStopped,
            "Write scheduler is not accepting work",
        )
    }

    pub fn session_aborted(message: impl Into<String>) -> Self {
        Self::new(LogErrorCode::SessionAborted, message)
    }

    pub fn cancelled() -> Self {
        Self::new(LogErrorCode::Cancelled, "Operation was cancelled")
    }

    /// Adds stream context to the details.
    pub fn for_stream(mut self, stream: &str) -> Self {
        self.details = Some(match self.details.take() {
            Some(details) => format!("stream: {}, {}", stream, details),
            None => format!("stream: {}", stream),
        });
        self
    }

    pub fn code(&self) -> LogErrorCode {
        self.code
    }

    pub fn severity(&self) -> Severity {
        self.code.severity()
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn details(&self) -> Option<&str> {
        self.details.as_deref()
    }

    /// Address of the current leader, when known
    pub fn leader_address(&self) -> Option<&str> {
        self.leader_address.as_deref()
    }

    /// Returns whether the owning writer or session must restart
    pub fn is_fatal(&self) -> bool {
        self.severity() == Severity::Fatal
    }
}

impl fmt::Display for LogError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.severity(), self.code.code(), self.message)?;
        if let Some(ref details) = self.details {
            write!(f, " ({})", details)?;
        }
        Ok(())
    }
}

impl StdError for LogError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn StdError + 'static))
    }
}

impl From<StoreError> for LogError {
    fn from(e: StoreError) -> Self {
        let (code, message) = match &e {
            StoreError::Forbidden(_) => (LogErrorCode::AccessDenied, "Store access was denied"),
            StoreError::Corrupt(_) => (LogErrorCode::Corruption, "Store object is corrupt"),
            _ => (LogErrorCode::StoreFailed, "Store operation failed"),
        };
        let mut err = Self::new(code, message).with_details(e.to_string());
        err.source = Some(Box::new(e));
        err
    }
}

impl From<ConfigError> for LogError {
    fn from(e: ConfigError) -> Self {
        let mut err = Self::new(LogErrorCode::ConfigInvalid, "Invalid configuration")
            .with_details(e.to_string());
        err.source = Some(Box::new(e));
        err
    }
}

/// Result type for log engine operations
pub type LogResult<T> = Result<T, LogError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(LogErrorCode::InvalidArgument.code(), "PLOG_INVALID_ARGUMENT");
        assert_eq!(LogErrorCode::VersionConflict.code(), "PLOG_VERSION_CONFLICT");
        assert_eq!(LogErrorCode::NotLeader.code(), "PLOG_NOT_LEADER");
    }

    #[test]
    fn test_severity_levels() {
        assert_eq!(LogErrorCode::VersionConflict.severity(), Severity::Fatal);
        assert_eq!(LogErrorCode::Corruption.severity(), Severity::Fatal);
        assert_eq!(LogErrorCode::SessionAborted.severity(), Severity::Fatal);
        assert_eq!(LogErrorCode::StoreFailed.severity(), Severity::Error);
        assert_eq!(LogErrorCode::ReadSizing.severity(), Severity::Error);
    }

    #[test]
    fn test_version_conflict_display() {
        let err = LogError::version_conflict(
            512,
            &VersionToken::new("0x01"),
            &VersionToken::new("0x02"),
        );
        let display = format!("{}", err);
        assert!(display.contains("FATAL"));
        assert!(display.contains("PLOG_VERSION_CONFLICT"));
        assert!(display.contains("expected: 0x01"));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_forbidden_store_error_maps_to_access_denied() {
        let err: LogError = StoreError::Forbidden("token expired".into()).into();
        assert_eq!(err.code(), LogErrorCode::AccessDenied);
        assert!(err.source().is_some());

        let err: LogError = StoreError::Io("disk".into()).into();
        assert_eq!(err.code(), LogErrorCode::StoreFailed);
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_not_leader_carries_address() {
        let err = LogError::not_leader(Some("10.0.0.2:8080".into()));
        assert_eq!(err.leader_address(), Some("10.0.0.2:8080"));
        assert_eq!(LogError::not_leader(None).leader_address(), None);
    }

    #[test]
    fn test_stream_context_prefixes_details() {
        let err = LogError::corruption_at_offset(27, "bad version").for_stream("orders");
        assert_eq!(err.details(), Some("stream: orders, byte_offset: 27"));
    }
}
