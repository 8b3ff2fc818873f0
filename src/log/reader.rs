//! # Log reader
//!
//! Decodes contiguous runs of records below the checkpoint. Reads never
//! go past the checkpoint observed when they start, so a reader only sees
//! committed bytes. Continuation records are returned as they are stored;
//! see [`MessageAssembler`](super::MessageAssembler) for reassembly.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;

use super::codec::{self, Decoded, Frame};
use super::errors::{LogError, LogResult};
use super::read_stream::PagedReadStream;
use super::record::LogRecord;
use super::stream_name::StreamName;
use crate::config::ReaderConfig;
use crate::observability::LogMetrics;
use crate::store::{CheckpointStore, PageStore};

/// Records decoded by one read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadBatch {
    pub records: Vec<LogRecord>,
    /// Offset reached; pass it as `from` to continue
    pub next_offset: u64,
}

impl ReadBatch {
    fn empty(from: u64) -> Self {
        Self {
            records: Vec::new(),
            next_offset: from,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Cloneable read access to one stream.
#[derive(Debug, Clone)]
pub struct LogReader {
    stream: StreamName,
    pages: Arc<dyn PageStore>,
    checkpoint: Arc<dyn CheckpointStore>,
    window_capacity: usize,
    read_ahead: usize,
    poll_interval: Duration,
    metrics: Arc<LogMetrics>,
}

impl LogReader {
    pub fn new(
        stream: StreamName,
        pages: Arc<dyn PageStore>,
        checkpoint: Arc<dyn CheckpointStore>,
        config: &ReaderConfig,
        metrics: Arc<LogMetrics>,
    ) -> Self {
        Self {
            stream,
            pages,
            checkpoint,
            window_capacity: config.window_capacity,
            read_ahead: config.read_ahead,
            poll_interval: config.poll_interval(),
            metrics,
        }
    }

    pub fn stream(&self) -> &StreamName {
        &self.stream
    }

    /// Current committed position of the stream.
    pub async fn position(&self) -> LogResult<u64> {
        self.checkpoint
            .read()
            .await
            .map_err(|e| LogError::from(e).for_stream(self.stream.as_str()))
    }

    /// Decodes records from `from` until `till` or `max_count` records.
    ///
    /// `from` must be a record boundary. Stops early, without error, at a
    /// zero version byte.
    pub async fn read_messages(
        &self,
        from: u64,
        till: u64,
        max_count: usize,
    ) -> LogResult<ReadBatch> {
        self.read_range(from, till, max_count)
            .await
            .map_err(|e| e.for_stream(self.stream.as_str()))
    }

    async fn read_range(&self, from: u64, till: u64, max_count: usize) -> LogResult<ReadBatch> {
        if from >= till || max_count == 0 {
            return Ok(ReadBatch::empty(from));
        }

        let mut stream = PagedReadStream::new(
            Arc::clone(&self.pages),
            from,
            till,
            self.window_capacity,
            self.read_ahead,
        );
        let mut records = Vec::new();

        'records: while records.len() < max_count && stream.remaining() > 0 {
            let offset = stream.position();
            let remaining = stream.remaining();
            let mut need = 1usize;
            let len = loop {
                let prefix = stream.fill(need).await?;
                match codec::frame(prefix, offset)? {
                    Frame::NoData => break 'records,
                    Frame::Complete(len) => break len,
                    Frame::NeedMore(n) => need = n,
                }
                if need as u64 > remaining {
                    return Err(LogError::corruption_at_offset(
                        offset,
                        "Record header extends past the checkpoint",
                    ));
                }
            };
            if len as u64 > remaining {
                return Err(LogError::corruption_at_offset(
                    offset,
                    format!("Record of {} bytes extends past the checkpoint", len),
                ));
            }

            let mut bytes = Bytes::copy_from_slice(&stream.fill(len).await?[..len]);
            match codec::decode(&mut bytes, offset)? {
                Decoded::Record(record) => records.push(record),
                Decoded::NoData => break,
            }
            stream.consume(len);
        }

        self.metrics.add_records_read(records.len() as u64);
        Ok(ReadBatch {
            records,
            next_offset: stream.position(),
        })
    }

    /// Waits until the checkpoint passes `from`, then performs one bounded
    /// read.
    ///
    /// Returns an empty batch if `wait` elapses without progress and
    /// `PLOG_CANCELLED` as soon as `cancel` fires.
    pub async fn poll_messages(
        &self,
        from: u64,
        max_count: usize,
        wait: Duration,
        cancel: &CancellationToken,
    ) -> LogResult<ReadBatch> {
        let deadline = Instant::now() + wait;
        loop {
            if cancel.is_cancelled() {
                return Err(LogError::cancelled());
            }
            let position = self.position().await?;
            if position > from {
                return self.read_messages(from, position, max_count).await;
            }

            self.metrics.increment_polls();
            let now = Instant::now();
            if now >= deadline {
                return Ok(ReadBatch::empty(from));
            }
            let delay = self.poll_interval.min(deadline - now);
            tokio::select! {
                _ = cancel.cancelled() => return Err(LogError::cancelled()),
                _ = sleep(delay) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::{LogErrorCode, LogWriter, Message, MessageIdGenerator};
    use crate::store::{MemoryCheckpointStore, MemoryPageStore};

    struct Fixture {
        pages: MemoryPageStore,
        checkpoint: MemoryCheckpointStore,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                pages: MemoryPageStore::default(),
                checkpoint: MemoryCheckpointStore::new(),
            }
        }

        async fn writer(&self) -> LogWriter {
            LogWriter::open(
                StreamName::parse("events").unwrap(),
                Arc::new(self.pages.clone()),
                Arc::new(self.checkpoint.clone()),
                Arc::new(MessageIdGenerator::new()),
                Arc::new(LogMetrics::new()),
                1024 * 1024,
            )
            .await
            .unwrap()
        }

        fn reader(&self, config: &ReaderConfig) -> LogReader {
            LogReader::new(
                StreamName::parse("events").unwrap(),
                Arc::new(self.pages.clone()),
                Arc::new(self.checkpoint.clone()),
                config,
                Arc::new(LogMetrics::new()),
            )
        }
    }

    #[tokio::test]
    async fn test_read_single_message() {
        let fixture = Fixture::new();
        let position = fixture
            .writer()
            .await
            .append(&[Message::new("k", "v")])
            .await
            .unwrap()
            .position;

        let reader = fixture.reader(&ReaderConfig::default());
        assert_eq!(reader.position().await.unwrap(), position);
        let batch = reader.read_messages(0, position, 10).await.unwrap();
        assert_eq!(batch.records.len(), 1);
        assert_eq!(batch.records[0].offset, 0);
        assert_eq!(batch.next_offset, 27);
    }

    #[tokio::test]
    async fn test_max_count_and_resume() {
        let fixture = Fixture::new();
        let batch: Vec<Message> = (0..10)
            .map(|i| Message::new(format!("k{}", i), format!("value-{}", i)))
            .collect();
        let position = fixture.writer().await.append(&batch).await.unwrap().position;

        let reader = fixture.reader(&ReaderConfig::default());
        let first = reader.read_messages(0, position, 4).await.unwrap();
        assert_eq!(first.records.len(), 4);
        let rest = reader
            .read_messages(first.next_offset, position, 100)
            .await
            .unwrap();
        assert_eq!(rest.records.len(), 6);
        assert_eq!(rest.next_offset, position);
        assert_eq!(&rest.records[0].value[..], b"value-4");
    }

    #[tokio::test]
    async fn test_small_window_reads_large_records() {
        let fixture = Fixture::new();
        let batch: Vec<Message> = (0..5)
            .map(|i| Message::new("k", vec![i as u8; 60_000]))
            .collect();
        let position = fixture.writer().await.append(&batch).await.unwrap().position;

        let config = ReaderConfig {
            window_capacity: 70_000,
            ..ReaderConfig::default()
        };
        let read = fixture
            .reader(&config)
            .read_messages(0, position, 10)
            .await
            .unwrap();
        assert_eq!(read.records.len(), 5);
        assert_eq!(read.records[4].value[0], 4);
    }

    #[tokio::test]
    async fn test_corrupt_version_is_fatal() {
        let fixture = Fixture::new();
        fixture
            .writer()
            .await
            .append(&[Message::new("k", "v")])
            .await
            .unwrap();
        let mut page = fixture.pages.read_page(0).await.unwrap().to_vec();
        page[0] = 0x7F;
        fixture.pages.overwrite_unguarded(&page, 0).unwrap();

        let err = fixture
            .reader(&ReaderConfig::default())
            .read_messages(0, 27, 10)
            .await
            .unwrap_err();
        assert_eq!(err.code(), LogErrorCode::Corruption);
        assert_eq!(err.details(), Some("stream: events, byte_offset: 0"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_returns_after_append() {
        let fixture = Fixture::new();
        let mut writer = fixture.writer().await;
        let reader = fixture.reader(&ReaderConfig::default());
        let cancel = CancellationToken::new();

        let poll = tokio::spawn({
            let reader = reader.clone();
            let cancel = cancel.clone();
            async move {
                reader
                    .poll_messages(0, 10, Duration::from_secs(30), &cancel)
                    .await
            }
        });
        tokio::time::sleep(Duration::from_secs(1)).await;
        writer.append(&[Message::new("k", "v")]).await.unwrap();

        let batch = poll.await.unwrap().unwrap();
        assert_eq!(batch.records.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_times_out_empty() {
        let fixture = Fixture::new();
        let reader = fixture.reader(&ReaderConfig::default());
        let batch = reader
            .poll_messages(0, 10, Duration::from_secs(2), &CancellationToken::new())
            .await
            .unwrap();
        assert!(batch.is_empty());
        assert_eq!(batch.next_offset, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_honours_cancellation() {
        let fixture = Fixture::new();
        let reader = fixture.reader(&ReaderConfig::default());
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let err = reader
            .poll_messages(0, 10, Duration::from_secs(3600), &cancel)
            .await
            .unwrap_err();
        assert_eq!(err.code(), LogErrorCode::Cancelled);
    }
}
