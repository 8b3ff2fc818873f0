//! Paged append-only log for pagelog
//!
//! A stream is a strictly ordered run of binary records laid out contiguously
//! in a page region. One [`LogWriter`] per stream appends and commits;
//! any number of [`LogReader`]s decode committed records below the
//! checkpoint.
//!
//! # Guarantees
//!
//! - The checkpoint is updated only after the page write it covers succeeds
//! - Readers never observe bytes beyond the checkpoint
//! - Message ids increase with stream offset within one process
//! - A version-token conflict stops the writer; it is never retried

mod assembler;
pub mod codec;
mod errors;
mod message_id;
mod read_stream;
mod reader;
mod record;
mod stream_name;
mod writer;

pub use assembler::{AssembledMessage, MessageAssembler};
pub use errors::{LogError, LogErrorCode, LogResult, Severity};
pub use message_id::{MessageId, MessageIdGenerator, ID_EPOCH_MS};
pub use read_stream::PagedReadStream;
pub use reader::{LogReader, ReadBatch};
pub use record::{AppendResult, AppendedMessage, Attributes, LogRecord, Message};
pub use stream_name::StreamName;
pub use writer::{validate_batch, LogWriter};

/// Largest key of one record
pub const MAX_KEY_SIZE: usize = u8::MAX as usize;

/// Largest value of one physical record
pub const MAX_VALUE_SIZE: usize = u16::MAX as usize;

/// Largest encoded physical record
pub const MAX_RECORD_SIZE: usize = codec::RECORD_OVERHEAD + MAX_KEY_SIZE + MAX_VALUE_SIZE;
