//! Reassembly of continuation runs into logical messages

use bytes::{Bytes, BytesMut};

use super::errors::{LogError, LogResult};
use super::message_id::MessageId;
use super::record::LogRecord;

/// A complete logical message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssembledMessage {
    /// Id of the first physical record
    pub id: MessageId,
    /// Offset of the first physical record
    pub offset: u64,
    pub key: Bytes,
    pub value: Bytes,
    pub compressed: bool,
}

#[derive(Debug)]
struct PendingRun {
    id: MessageId,
    offset: u64,
    key: Bytes,
    compressed: bool,
    value: BytesMut,
}

/// Buffers continuation records until the record that closes the run.
///
/// Feed records in stream order. A record without the continuation flag
/// closes the current run, or is a complete message on its own.
#[derive(Debug, Default)]
pub struct MessageAssembler {
    pending: Option<PendingRun>,
}

impl MessageAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, record: LogRecord) -> LogResult<Option<AssembledMessage>> {
        let Some(mut run) = self.pending.take() else {
            if !record.is_continuation() {
                return Ok(Some(AssembledMessage {
                    id: record.id,
                    offset: record.offset,
                    key: record.key,
                    value: record.value,
                    compressed: record.attributes.is_compressed(),
                }));
            }
            self.pending = Some(PendingRun {
                id: record.id,
                offset: record.offset,
                key: record.key,
                compressed: record.attributes.is_compressed(),
                value: BytesMut::from(&record.value[..]),
            });
            return Ok(None);
        };

        if record.key != run.key {
            return Err(LogError::corruption_at_offset(
                record.offset,
                format!(
                    "Continuation key differs from the run started at {}",
                    run.offset
                ),
            ));
        }
        run.value.extend_from_slice(&record.value);
        if record.is_continuation() {
            self.pending = Some(run);
            return Ok(None);
        }
        Ok(Some(AssembledMessage {
            id: run.id,
            offset: run.offset,
            key: run.key,
            value: run.value.freeze(),
            compressed: run.compressed,
        }))
    }

    /// Offset where an unfinished run started; reading again from here
    /// replays the whole run.
    pub fn pending_offset(&self) -> Option<u64> {
        self.pending.as_ref().map(|run| run.offset)
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }
}
