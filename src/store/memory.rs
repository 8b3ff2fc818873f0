//! # In-Memory Store Adapters
//!
//! Handles are cheap to clone and share one region, so a writer and any
//! number of readers in the same process observe the same bytes.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use bytes::Bytes;

use super::checkpoint::CheckpointStore;
use super::errors::{StoreError, StoreResult};
use super::page::{
    check_write_shape, round_up_to_page, PageStore, VersionToken, WriteOutcome, PAGE_SIZE,
};

#[derive(Debug, Default)]
struct Region {
    created: bool,
    /// Bytes written so far; anything between `data.len()` and `size` reads as zero
    data: Vec<u8>,
    size: u64,
    version: u64,
}

impl Region {
    fn token(&self) -> VersionToken {
        VersionToken::new(format!("0x{:016X}", self.version))
    }

    fn bump(&mut self) -> VersionToken {
        self.version += 1;
        self.token()
    }

    fn read(&self, offset: u64, len: usize) -> StoreResult<Bytes> {
        let end = offset + len as u64;
        if end > self.size {
            return Err(StoreError::OutOfRange {
                offset,
                len,
                size: self.size,
            });
        }
        let mut out = vec![0u8; len];
        let start = offset as usize;
        if start < self.data.len() {
            let available = (self.data.len() - start).min(len);
            out[..available].copy_from_slice(&self.data[start..start + available]);
        }
        Ok(Bytes::from(out))
    }
}

/// Page region held in process memory.
#[derive(Debug, Clone)]
pub struct MemoryPageStore {
    region: Arc<Mutex<Region>>,
    max_commit_size: usize,
    grow_increment: u64,
}

impl MemoryPageStore {
    pub fn new(max_commit_size: usize, grow_increment: u64) -> Self {
        Self {
            region: Arc::new(Mutex::new(Region::default())),
            max_commit_size,
            grow_increment,
        }
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, Region>> {
        self.region
            .lock()
            .map_err(|_| StoreError::Io("page region lock poisoned".to_string()))
    }

    /// Writes bytes without a version check and bumps the token, the way a
    /// second, uncoordinated writer would.
    #[cfg(test)]
    pub(crate) fn overwrite_unguarded(
        &self,
        data: &[u8],
        offset: u64,
    ) -> StoreResult<VersionToken> {
        let mut region = self.lock()?;
        let end = offset as usize + data.len();
        if region.data.len() < end {
            region.data.resize(end, 0);
        }
        region.data[offset as usize..end].copy_from_slice(data);
        region.size = region.size.max(round_up_to_page(end as u64, PAGE_SIZE));
        region.created = true;
        Ok(region.bump())
    }
}

impl Default for MemoryPageStore {
    fn default() -> Self {
        Self::new(4 * 1024 * 1024, 32 * 1024 * 1024)
    }
}

#[async_trait]
impl PageStore for MemoryPageStore {
    async fn init(&self) -> StoreResult<VersionToken> {
        let mut region = self.lock()?;
        if !region.created {
            region.created = true;
            return Ok(region.bump());
        }
        Ok(region.token())
    }

    async fn size(&self) -> StoreResult<u64> {
        Ok(self.lock()?.size)
    }

    async fn ensure_size(&self, size: u64, expected: &VersionToken) -> StoreResult<WriteOutcome> {
        let mut region = self.lock()?;
        let actual = region.token();
        if &actual != expected {
            return Ok(WriteOutcome::Conflict {
                expected: expected.clone(),
                actual,
            });
        }
        if region.size >= size {
            return Ok(WriteOutcome::Committed(actual));
        }
        region.size = round_up_to_page(size, self.grow_increment as usize);
        Ok(WriteOutcome::Committed(region.bump()))
    }

    async fn read_page(&self, offset: u64) -> StoreResult<Bytes> {
        if offset % PAGE_SIZE as u64 != 0 {
            return Err(StoreError::Misaligned {
                offset,
                len: PAGE_SIZE,
                page_size: PAGE_SIZE,
            });
        }
        self.lock()?.read(offset, PAGE_SIZE)
    }

    async fn read_range(&self, offset: u64, len: usize) -> StoreResult<Bytes> {
        self.lock()?.read(offset, len)
    }

    async fn save(
        &self,
        data: &[u8],
        offset: u64,
        expected: &VersionToken,
    ) -> StoreResult<WriteOutcome> {
        check_write_shape(offset, data.len(), PAGE_SIZE, self.max_commit_size)?;

        let mut region = self.lock()?;
        let actual = region.token();
        if &actual != expected {
            return Ok(WriteOutcome::Conflict {
                expected: expected.clone(),
                actual,
            });
        }
        let end = offset + data.len() as u64;
        if end > region.size {
            return Err(StoreError::OutOfRange {
                offset,
                len: data.len(),
                size: region.size,
            });
        }
        if region.data.len() < end as usize {
            region.data.resize(end as usize, 0);
        }
        region.data[offset as usize..end as usize].copy_from_slice(data);
        Ok(WriteOutcome::Committed(region.bump()))
    }

    fn max_commit_size(&self) -> usize {
        self.max_commit_size
    }
}

/// Checkpoint counter held in process memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryCheckpointStore {
    position: Arc<AtomicU64>,
    created: Arc<AtomicBool>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `get_or_init_position` or `update` has created the counter
    pub fn exists(&self) -> bool {
        self.created.load(Ordering::Acquire)
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn get_or_init_position(&self) -> StoreResult<u64> {
        self.created.store(true, Ordering::Release);
        Ok(self.position.load(Ordering::Acquire))
    }

    async fn read(&self) -> StoreResult<u64> {
        self.read_blocking()
    }

    fn read_blocking(&self) -> StoreResult<u64> {
        Ok(self.position.load(Ordering::Acquire))
    }

    async fn update(&self, position: u64) -> StoreResult<()> {
        self.created.store(true, Ordering::Release);
        self.position.store(position, Ordering::Release);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn committed(outcome: WriteOutcome) -> VersionToken {
        match outcome {
            WriteOutcome::Committed(token) => token,
            WriteOutcome::Conflict { .. } => panic!("unexpected conflict"),
        }
    }

    #[tokio::test]
    async fn test_ensure_size_grows_in_increments() {
        let store = MemoryPageStore::new(4096, 8192);
        let token = store.init().await.unwrap();

        let token = committed(store.ensure_size(600, &token).await.unwrap());
        assert_eq!(store.size().await.unwrap(), 8192);

        // Already large enough: token unchanged
        let same = committed(store.ensure_size(4096, &token).await.unwrap());
        assert_eq!(same, token);
    }

    #[tokio::test]
    async fn test_save_and_read_back() {
        let store = MemoryPageStore::new(4096, 4096);
        let token = store.init().await.unwrap();
        let token = committed(store.ensure_size(1024, &token).await.unwrap());

        let mut page = vec![0u8; 512];
        page[..5].copy_from_slice(b"hello");
        committed(store.save(&page, 512, &token).await.unwrap());

        let read = store.read_page(512).await.unwrap();
        assert_eq!(&read[..5], b"hello");
        assert_eq!(&store.read_range(514, 3).await.unwrap()[..], b"llo");
        // Allocated but never written reads as zeros
        assert!(store.read_page(0).await.unwrap().iter().all(|b| *b == 0));
    }

    #[tokio::test]
    async fn test_stale_token_conflicts() {
        let store = MemoryPageStore::new(4096, 4096);
        let token = store.init().await.unwrap();
        let token = committed(store.ensure_size(512, &token).await.unwrap());

        store.overwrite_unguarded(&[1u8; 512], 0).unwrap();

        let outcome = store.save(&[2u8; 512], 0, &token).await.unwrap();
        assert!(matches!(outcome, WriteOutcome::Conflict { .. }));
        assert_eq!(store.read_page(0).await.unwrap()[0], 1);
    }

    #[tokio::test]
    async fn test_save_rejects_misaligned_and_oversized() {
        let store = MemoryPageStore::new(1024, 4096);
        let token = store.init().await.unwrap();
        assert!(matches!(
            store.save(&[0u8; 512], 100, &token).await,
            Err(StoreError::Misaligned { .. })
        ));
        assert!(matches!(
            store.save(&[0u8; 2048], 0, &token).await,
            Err(StoreError::CommitTooLarge { .. })
        ));
    }

    #[tokio::test]
    async fn test_read_beyond_size_is_out_of_range() {
        let store = MemoryPageStore::new(1024, 1024);
        store.init().await.unwrap();
        assert!(matches!(
            store.read_page(0).await,
            Err(StoreError::OutOfRange { .. })
        ));
    }

    #[tokio::test]
    async fn test_checkpoint_init_and_update() {
        let checkpoint = MemoryCheckpointStore::new();
        assert!(!checkpoint.exists());
        assert_eq!(checkpoint.get_or_init_position().await.unwrap(), 0);
        assert!(checkpoint.exists());

        checkpoint.update(27).await.unwrap();
        assert_eq!(checkpoint.read().await.unwrap(), 27);
        assert_eq!(checkpoint.read_blocking().unwrap(), 27);

        // Clones share the counter
        let other = checkpoint.clone();
        other.update(54).await.unwrap();
        assert_eq!(checkpoint.read().await.unwrap(), 54);
    }
}
