//! # Log writer
//!
//! Buffers encoded records in a page-aligned window and commits them to the
//! page store, then publishes the new position through the checkpoint.
//!
//! Write discipline:
//! 1. Grow the page region to cover the new ceiling
//! 2. Write the page-rounded buffer prefix at the buffer floor, guarded by
//!    the last observed version token
//! 3. Update the checkpoint
//! 4. Advance the committed position
//! 5. Compact: keep a trailing partial page at the buffer start
//!
//! The checkpoint is only updated after the page write succeeds, so it never
//! claims bytes that are not durable. A flush forced in the middle of a
//! continuation run writes the run's head but publishes only up to the run's
//! first record; a run is visible once its final record is committed. A
//! version-token mismatch means another writer touched the region and is
//! fatal to this writer.
//!
//! A writer is owned by exactly one task; it is not `Sync`-shared.

use std::sync::Arc;

use bytes::Bytes;

use super::codec::{self, encoded_len};
use super::errors::{LogError, LogResult};
use super::message_id::MessageIdGenerator;
use super::record::{AppendResult, AppendedMessage, Attributes, Message};
use super::stream_name::StreamName;
use super::{MAX_KEY_SIZE, MAX_RECORD_SIZE, MAX_VALUE_SIZE};
use crate::observability::{LogMetrics, Logger};
use crate::store::{round_up_to_page, CheckpointStore, PageStore, VersionToken, WriteOutcome};

/// Appends message batches to one stream.
#[derive(Debug)]
pub struct LogWriter {
    stream: StreamName,
    pages: Arc<dyn PageStore>,
    checkpoint: Arc<dyn CheckpointStore>,
    ids: Arc<MessageIdGenerator>,
    metrics: Arc<LogMetrics>,
    max_message_size: usize,
    page_size: usize,
    /// Fixed-size window, zero beyond `cursor`
    buffer: Vec<u8>,
    /// Stream offset of `buffer[0]`; always page aligned
    floor: u64,
    /// Bytes of `buffer` holding records
    cursor: usize,
    /// Committed position (checkpoint value)
    position: u64,
    token: VersionToken,
    /// Set when a failed flush dropped bytes that were already compacted out
    /// of the buffer; the next append reloads from `position`.
    rewind: bool,
}

impl LogWriter {
    /// Opens a writer positioned at the stream's checkpoint.
    ///
    /// When the checkpoint falls inside a page, that page is downloaded and
    /// its committed prefix preloaded so the next append continues at the
    /// exact byte.
    pub async fn open(
        stream: StreamName,
        pages: Arc<dyn PageStore>,
        checkpoint: Arc<dyn CheckpointStore>,
        ids: Arc<MessageIdGenerator>,
        metrics: Arc<LogMetrics>,
        max_message_size: usize,
    ) -> LogResult<Self> {
        let page_size = pages.page_size();
        let capacity = pages.max_commit_size() / page_size * page_size;
        if capacity < MAX_RECORD_SIZE + page_size {
            return Err(LogError::invalid_argument(format!(
                "Store commit size {} cannot hold a maximal record",
                pages.max_commit_size()
            ))
            .for_stream(stream.as_str()));
        }

        let token = pages
            .init()
            .await
            .map_err(|e| LogError::from(e).for_stream(stream.as_str()))?;
        let position = checkpoint
            .get_or_init_position()
            .await
            .map_err(|e| LogError::from(e).for_stream(stream.as_str()))?;

        let mut writer = Self {
            stream,
            pages,
            checkpoint,
            ids,
            metrics,
            max_message_size,
            page_size,
            buffer: vec![0u8; capacity],
            floor: 0,
            cursor: 0,
            position,
            token,
            rewind: false,
        };
        writer
            .reload()
            .await
            .map_err(|e| e.for_stream(writer.stream.as_str()))?;

        Logger::info(
            "LOG_WRITER_OPENED",
            &[
                ("position", &position.to_string()),
                ("stream", writer.stream.as_str()),
            ],
        );
        Ok(writer)
    }

    /// Positions the buffer at the committed position, preloading the
    /// committed prefix of a partially filled page.
    async fn reload(&mut self) -> LogResult<()> {
        let floor = self.position - self.position % self.page_size as u64;
        let cursor = (self.position - floor) as usize;
        if cursor > 0 {
            let page = self.pages.read_page(floor).await?;
            self.buffer[..cursor].copy_from_slice(&page[..cursor]);
        }
        self.floor = floor;
        self.cursor = cursor;
        self.rewind = false;
        Ok(())
    }

    pub fn stream(&self) -> &StreamName {
        &self.stream
    }

    /// Committed position: the offset just past the last committed record.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Appends a batch and flushes it.
    ///
    /// The batch is validated before any bytes are encoded. Values longer
    /// than one record can hold are split into continuation records that
    /// share the message key.
    pub async fn append(&mut self, batch: &[Message]) -> LogResult<AppendResult> {
        validate_batch(batch, self.max_message_size)?;
        if self.rewind {
            self.reload()
                .await
                .map_err(|e| e.for_stream(self.stream.as_str()))?;
        }

        let mut appended = Vec::with_capacity(batch.len());
        let mut records = 0u64;
        for message in batch {
            let chunks = split_value(&message.value);
            let last = chunks.len() - 1;
            let mut first_offset = None;
            for (i, chunk) in chunks.into_iter().enumerate() {
                let size = encoded_len(message.key.len(), chunk.len());
                if self.cursor + size > self.buffer.len() {
                    let publish = match first_offset {
                        Some(run_start) => run_start,
                        None => self.floor + self.cursor as u64,
                    };
                    self.flush_publishing(publish).await?;
                }

                let offset = self.floor + self.cursor as u64;
                let id = self.ids.next(offset);
                let attributes = Attributes::default()
                    .with_compressed(message.compressed)
                    .with_continuation(i < last);
                let mut slot = &mut self.buffer[self.cursor..self.cursor + size];
                codec::encode(&mut slot, &id, attributes, &message.key, &chunk);
                self.cursor += size;
                records += 1;

                if first_offset.is_none() {
                    first_offset = Some(offset);
                    appended.push(AppendedMessage { id, offset });
                }
            }
        }

        self.flush().await?;
        self.metrics.add_messages_appended(batch.len() as u64);
        self.metrics.add_records_written(records);

        Ok(AppendResult {
            position: self.position,
            messages: appended,
        })
    }

    /// Commits buffered records. A no-op when nothing is pending.
    pub async fn flush(&mut self) -> LogResult<()> {
        let end = self.floor + self.cursor as u64;
        self.flush_publishing(end).await
    }

    /// Writes every buffered byte, then advances the checkpoint to `publish`.
    async fn flush_publishing(&mut self, publish: u64) -> LogResult<()> {
        if self.floor + self.cursor as u64 == self.position {
            return Ok(());
        }
        if let Err(e) = self.commit(publish).await {
            self.discard_pending();
            return Err(e.for_stream(self.stream.as_str()));
        }
        self.compact();
        Ok(())
    }

    async fn commit(&mut self, publish: u64) -> LogResult<()> {
        let commit_len = round_up_to_page(self.cursor as u64, self.page_size) as usize;

        let outcome = self
            .pages
            .ensure_size(self.floor + commit_len as u64, &self.token)
            .await?;
        self.token = self.accept(outcome)?;

        let outcome = self
            .pages
            .save(&self.buffer[..commit_len], self.floor, &self.token)
            .await?;
        self.token = self.accept(outcome)?;

        let committed = publish.saturating_sub(self.position);
        if committed > 0 {
            self.checkpoint.update(publish).await?;
            self.position = publish;
        }
        self.metrics.record_flush(committed);

        Logger::trace(
            "LOG_FLUSH",
            &[
                ("bytes", &committed.to_string()),
                ("position", &self.position.to_string()),
                ("stream", self.stream.as_str()),
                ("written", &(self.floor + self.cursor as u64).to_string()),
            ],
        );
        Ok(())
    }

    fn accept(&self, outcome: WriteOutcome) -> LogResult<VersionToken> {
        match outcome {
            WriteOutcome::Committed(token) => Ok(token),
            WriteOutcome::Conflict { expected, actual } => {
                self.metrics.increment_version_conflicts();
                Logger::fatal(
                    "LOG_VERSION_CONFLICT",
                    &[
                        ("actual", actual.as_str()),
                        ("expected", expected.as_str()),
                        ("floor", &self.floor.to_string()),
                        ("stream", self.stream.as_str()),
                    ],
                );
                Err(LogError::version_conflict(self.floor, &expected, &actual))
            }
        }
    }

    /// Moves the trailing partial page to the buffer start and zeroes the rest.
    fn compact(&mut self) {
        let page = self.page_size;
        let tail = self.cursor % page;
        let keep_from = self.cursor - tail;
        if tail > 0 {
            self.buffer.copy_within(keep_from..self.cursor, 0);
            self.buffer[tail..self.cursor].fill(0);
        } else {
            self.buffer[..self.cursor].fill(0);
        }
        self.floor += keep_from as u64;
        self.cursor = tail;
    }

    /// Drops records encoded past the committed position. When the committed
    /// position is no longer inside the buffer, the next append reloads it.
    fn discard_pending(&mut self) {
        if self.position < self.floor {
            self.buffer[..self.cursor].fill(0);
            self.cursor = 0;
            self.rewind = true;
            return;
        }
        let committed = (self.position - self.floor) as usize;
        self.buffer[committed..self.cursor].fill(0);
        self.cursor = committed;
    }
}

/// Rejects a batch before any bytes are written.
pub fn validate_batch(batch: &[Message], max_message_size: usize) -> LogResult<()> {
    if batch.is_empty() {
        return Err(LogError::invalid_argument("Batch must not be empty"));
    }
    for (i, message) in batch.iter().enumerate() {
        if message.key.len() > MAX_KEY_SIZE {
            return Err(LogError::invalid_argument(format!(
                "Message {} key is {} bytes, limit is {}",
                i,
                message.key.len(),
                MAX_KEY_SIZE
            )));
        }
        if message.value.len() > max_message_size {
            return Err(LogError::invalid_argument(format!(
                "Message {} value is {} bytes, limit is {}",
                i,
                message.value.len(),
                max_message_size
            )));
        }
    }
    Ok(())
}

/// Splits a value into record-sized chunks; an empty value is one empty chunk.
fn split_value(value: &Bytes) -> Vec<Bytes> {
    if value.is_empty() {
        return vec![Bytes::new()];
    }
    (0..value.len())
        .step_by(MAX_VALUE_SIZE)
        .map(|start| value.slice(start..(start + MAX_VALUE_SIZE).min(value.len())))
        .collect()
}
