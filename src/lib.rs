//! pagelog - An append-only, offset-addressed log over a paged blob store
//!
//! Streams are strictly ordered runs of binary records, addressed by byte
//! offset and laid out contiguously in a page region. A single elected
//! leader writes; every node reads.
//!
//! - [`log`]: record codec, message ids, per-stream writer and reader
//! - [`store`]: page store and checkpoint store capabilities with local adapters
//! - [`lease`]: lease-based leader election
//! - [`scheduler`]: per-stream affinity write scheduling
//! - [`service`]: the collaborator-facing [`PageLog`]

pub mod config;
pub mod lease;
pub mod log;
pub mod observability;
pub mod scheduler;
pub mod service;
pub mod store;

pub use config::{ConfigError, PageLogConfig};
pub use log::{
    AppendResult, AppendedMessage, LogError, LogErrorCode, LogReader, LogRecord, LogResult,
    Message, MessageId, StreamName,
};
pub use service::PageLog;
