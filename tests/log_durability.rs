//! Log Durability Tests
//!
//! - Committed records survive reopening the writer and the stores
//! - A reopened writer continues at the exact byte the checkpoint names
//! - Long values round-trip through continuation records
//! - Message ids grow with stream offset

use std::sync::Arc;

use pagelog::config::{ReaderConfig, StoreConfig};
use pagelog::log::codec::RECORD_OVERHEAD;
use pagelog::log::{
    LogReader, LogRecord, LogWriter, Message, MessageAssembler, MessageIdGenerator, StreamName,
    MAX_VALUE_SIZE,
};
use pagelog::observability::LogMetrics;
use pagelog::store::{FileStoreProvider, MemoryStoreProvider, StreamStoreProvider};
use tempfile::TempDir;

// =============================================================================
// Test Utilities
// =============================================================================

const MAX_MESSAGE_SIZE: usize = 1024 * 1024;

fn stream(name: &str) -> StreamName {
    StreamName::parse(name).expect("valid stream name")
}

async fn open_writer(provider: &dyn StreamStoreProvider, name: &str) -> LogWriter {
    let stores = provider.open(&stream(name)).expect("open stores");
    LogWriter::open(
        stream(name),
        stores.pages,
        stores.checkpoint,
        Arc::new(MessageIdGenerator::new()),
        Arc::new(LogMetrics::new()),
        MAX_MESSAGE_SIZE,
    )
    .await
    .expect("open writer")
}

fn open_reader(provider: &dyn StreamStoreProvider, name: &str) -> LogReader {
    let stores = provider.open(&stream(name)).expect("open stores");
    LogReader::new(
        stream(name),
        stores.pages,
        stores.checkpoint,
        &ReaderConfig::default(),
        Arc::new(LogMetrics::new()),
    )
}

async fn read_all(reader: &LogReader) -> Vec<LogRecord> {
    let position = reader.position().await.expect("checkpoint");
    let batch = reader
        .read_messages(0, position, usize::MAX)
        .await
        .expect("read");
    assert_eq!(batch.next_offset, position);
    batch.records
}

fn numbered(range: std::ops::Range<usize>) -> Vec<Message> {
    range
        .map(|i| Message::new(format!("key-{}", i), format!("value-{}", i)))
        .collect()
}

// =============================================================================
// Single Record Layout
// =============================================================================

#[tokio::test]
async fn test_single_small_message_commits_27_bytes() {
    let provider = MemoryStoreProvider::new(StoreConfig::default());
    let mut writer = open_writer(&provider, "orders").await;

    let result = writer.append(&[Message::new("k", "v")]).await.unwrap();
    assert_eq!(result.position, 27);
    assert_eq!(result.messages.len(), 1);
    assert_eq!(result.messages[0].offset, 0);
    assert_eq!(result.messages[0].id.offset(), 0);

    let records = read_all(&open_reader(&provider, "orders")).await;
    assert_eq!(records.len(), 1);
    assert_eq!(&records[0].key[..], b"k");
    assert_eq!(&records[0].value[..], b"v");
    assert_eq!(records[0].id, result.messages[0].id);
}

// =============================================================================
// Reopen
// =============================================================================

#[tokio::test]
async fn test_reopened_writer_matches_single_instance_layout() {
    let split = MemoryStoreProvider::new(StoreConfig::default());
    {
        let mut writer = open_writer(&split, "events").await;
        writer.append(&numbered(0..3)).await.unwrap();
    }
    {
        let mut writer = open_writer(&split, "events").await;
        writer.append(&numbered(3..5)).await.unwrap();
    }

    let single = MemoryStoreProvider::new(StoreConfig::default());
    let mut writer = open_writer(&single, "events").await;
    writer.append(&numbered(0..5)).await.unwrap();

    let reopened = read_all(&open_reader(&split, "events")).await;
    let straight = read_all(&open_reader(&single, "events")).await;
    assert_eq!(reopened.len(), 5);
    for (a, b) in reopened.iter().zip(&straight) {
        assert_eq!(a.offset, b.offset);
        assert_eq!(a.key, b.key);
        assert_eq!(a.value, b.value);
        assert_eq!(a.id.offset(), a.offset);
    }
}

#[tokio::test]
async fn test_file_stores_survive_restart() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let metrics = Arc::new(LogMetrics::new());

    let committed = {
        let provider =
            FileStoreProvider::new(temp_dir.path(), StoreConfig::default(), Arc::clone(&metrics));
        let mut writer = open_writer(&provider, "audit").await;
        writer.append(&numbered(0..10)).await.unwrap();
        writer.append(&numbered(10..12)).await.unwrap().position
    };

    // Fresh provider over the same directory
    let provider = FileStoreProvider::new(temp_dir.path(), StoreConfig::default(), metrics);
    let reader = open_reader(&provider, "audit");
    assert_eq!(reader.position().await.unwrap(), committed);
    let records = read_all(&reader).await;
    assert_eq!(records.len(), 12);
    assert_eq!(&records[11].value[..], b"value-11");

    let mut writer = open_writer(&provider, "audit").await;
    let result = writer.append(&numbered(12..13)).await.unwrap();
    assert_eq!(result.messages[0].offset, committed);
}

// =============================================================================
// Continuations
// =============================================================================

#[tokio::test]
async fn test_long_value_reassembles_from_continuations() {
    let provider = MemoryStoreProvider::new(StoreConfig::default());
    let mut writer = open_writer(&provider, "blobs").await;

    let value: Vec<u8> = (0..150_000u32).map(|i| (i % 251) as u8).collect();
    let result = writer
        .append(&[Message::new("big", value.clone()), Message::new("k", "after")])
        .await
        .unwrap();
    assert_eq!(result.messages.len(), 2);

    let records = read_all(&open_reader(&provider, "blobs")).await;
    assert_eq!(records.len(), 4);
    assert!(records[0].is_continuation());
    assert!(records[1].is_continuation());
    assert!(!records[2].is_continuation());
    assert_eq!(records[0].value.len(), MAX_VALUE_SIZE);
    assert_eq!(
        records[3].offset,
        (3 * (RECORD_OVERHEAD + 3) + value.len()) as u64
    );

    let mut assembler = MessageAssembler::new();
    let messages: Vec<_> = records
        .into_iter()
        .filter_map(|r| assembler.push(r).unwrap())
        .collect();
    assert!(!assembler.is_pending());
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].offset, result.messages[0].offset);
    assert_eq!(messages[0].id, result.messages[0].id);
    assert_eq!(&messages[0].value[..], &value[..]);
    assert_eq!(&messages[1].value[..], b"after");
}

// =============================================================================
// Ids
// =============================================================================

#[tokio::test]
async fn test_ids_increase_with_offset() {
    let provider = MemoryStoreProvider::new(StoreConfig::default());
    let mut writer = open_writer(&provider, "ticks").await;
    for chunk in 0..4 {
        writer
            .append(&numbered(chunk * 5..chunk * 5 + 5))
            .await
            .unwrap();
    }

    let records = read_all(&open_reader(&provider, "ticks")).await;
    assert_eq!(records.len(), 20);
    for pair in records.windows(2) {
        assert!(pair[0].id < pair[1].id);
        assert!(pair[0].offset < pair[1].offset);
    }
}
