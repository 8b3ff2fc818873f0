//! # Per-stream store resolution
//!
//! Every stream owns exactly one page region and one checkpoint. A provider
//! hands out that pair for a canonical stream name; the engine never builds
//! adapters itself.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use super::checkpoint::CheckpointStore;
use super::errors::{StoreError, StoreResult};
use super::file::{FileCheckpointStore, FilePageStore};
use super::memory::{MemoryCheckpointStore, MemoryPageStore};
use super::page::PageStore;
use super::retry::Retrying;
use crate::config::StoreConfig;
use crate::log::StreamName;
use crate::observability::LogMetrics;

/// The page region and checkpoint belonging to one stream.
#[derive(Debug, Clone)]
pub struct StreamStores {
    pub pages: Arc<dyn PageStore>,
    pub checkpoint: Arc<dyn CheckpointStore>,
}

/// Resolves a stream name to its stores.
pub trait StreamStoreProvider: Send + Sync + fmt::Debug {
    fn open(&self, stream: &StreamName) -> StoreResult<StreamStores>;
}

/// Streams held in process memory, memoized so every caller shares a region.
#[derive(Debug)]
pub struct MemoryStoreProvider {
    config: StoreConfig,
    streams: Mutex<HashMap<StreamName, (MemoryPageStore, MemoryCheckpointStore)>>,
}

impl MemoryStoreProvider {
    pub fn new(config: StoreConfig) -> Self {
        Self {
            config,
            streams: Mutex::new(HashMap::new()),
        }
    }

    /// Concrete handles for a stream, created on first use.
    pub fn memory_stores(
        &self,
        stream: &StreamName,
    ) -> StoreResult<(MemoryPageStore, MemoryCheckpointStore)> {
        let mut streams = self
            .streams
            .lock()
            .map_err(|_| StoreError::Io("stream registry lock poisoned".to_string()))?;
        let entry = streams.entry(stream.clone()).or_insert_with(|| {
            (
                MemoryPageStore::new(self.config.max_commit_size, self.config.grow_increment),
                MemoryCheckpointStore::new(),
            )
        });
        Ok(entry.clone())
    }
}

impl StreamStoreProvider for MemoryStoreProvider {
    fn open(&self, stream: &StreamName) -> StoreResult<StreamStores> {
        let (pages, checkpoint) = self.memory_stores(stream)?;
        Ok(StreamStores {
            pages: Arc::new(pages),
            checkpoint: Arc::new(checkpoint),
        })
    }
}

/// Streams stored as `<root>/<stream>.pages` and `<root>/<stream>.chk`,
/// each wrapped in the retry policy.
#[derive(Debug)]
pub struct FileStoreProvider {
    root: PathBuf,
    config: StoreConfig,
    metrics: Arc<LogMetrics>,
}

impl FileStoreProvider {
    pub fn new(root: impl Into<PathBuf>, config: StoreConfig, metrics: Arc<LogMetrics>) -> Self {
        Self {
            root: root.into(),
            config,
            metrics,
        }
    }
}

impl StreamStoreProvider for FileStoreProvider {
    fn open(&self, stream: &StreamName) -> StoreResult<StreamStores> {
        let pages = FilePageStore::new(
            self.root.join(format!("{}.pages", stream)),
            self.config.max_commit_size,
            self.config.grow_increment,
        );
        let checkpoint = FileCheckpointStore::new(self.root.join(format!("{}.chk", stream)));
        Ok(StreamStores {
            pages: Arc::new(Retrying::new(
                pages,
                self.config.retry.clone(),
                Arc::clone(&self.metrics),
            )),
            checkpoint: Arc::new(Retrying::new(
                checkpoint,
                self.config.retry.clone(),
                Arc::clone(&self.metrics),
            )),
        })
    }
}
