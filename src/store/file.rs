//! # Local File Store Adapters
//!
//! `FilePageStore` keeps the page region in one sparse file and its version
//! token in a `.etag` sidecar. Every mutation is fsynced before the sidecar
//! is replaced, so a token never names bytes that are not on disk.
//!
//! Token check, write and token replacement form one critical section under
//! an exclusive advisory lock on a `.lock` sidecar. The lock is taken per
//! call, so it excludes other handles in this process as well as other
//! processes sharing the directory.
//!
//! `FileCheckpointStore` keeps the position as 8 big-endian bytes, replaced
//! atomically through a temp file, rename and directory fsync.

use std::io::{self, SeekFrom};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use fs2::FileExt;
use tokio::fs::{self, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use uuid::Uuid;

use super::checkpoint::CheckpointStore;
use super::errors::{StoreError, StoreResult};
use super::page::{
    check_write_shape, round_up_to_page, PageStore, VersionToken, WriteOutcome, PAGE_SIZE,
};

/// Page region backed by a local file.
#[derive(Debug)]
pub struct FilePageStore {
    path: PathBuf,
    etag_path: PathBuf,
    lock_path: PathBuf,
    max_commit_size: usize,
    grow_increment: u64,
}

impl FilePageStore {
    pub fn new(path: impl Into<PathBuf>, max_commit_size: usize, grow_increment: u64) -> Self {
        let path = path.into();
        let etag_path = path.with_extension("etag");
        let lock_path = path.with_extension("lock");
        Self {
            path,
            etag_path,
            lock_path,
            max_commit_size,
            grow_increment,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn current_token(&self) -> StoreResult<VersionToken> {
        let token = fs::read_to_string(&self.etag_path).await?;
        Ok(VersionToken::new(token.trim()))
    }

    async fn replace_token(&self) -> StoreResult<VersionToken> {
        let token = VersionToken::new(Uuid::new_v4().to_string());
        write_atomically(&self.etag_path, token.as_str().as_bytes()).await?;
        Ok(token)
    }

    async fn check_token(&self, expected: &VersionToken) -> StoreResult<Option<WriteOutcome>> {
        let actual = self.current_token().await?;
        if &actual != expected {
            return Ok(Some(WriteOutcome::Conflict {
                expected: expected.clone(),
                actual,
            }));
        }
        Ok(None)
    }

    async fn read_at(&self, offset: u64, len: usize) -> StoreResult<Bytes> {
        let mut file = fs::File::open(&self.path).await?;
        let size = file.metadata().await?.len();
        if offset + len as u64 > size {
            return Err(StoreError::OutOfRange { offset, len, size });
        }
        file.seek(SeekFrom::Start(offset)).await?;
        let mut buf = vec![0u8; len];
        file.read_exact(&mut buf).await?;
        Ok(Bytes::from(buf))
    }
}

#[async_trait]
impl PageStore for FilePageStore {
    async fn init(&self) -> StoreResult<VersionToken> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let _lock = RegionLock::acquire(&self.lock_path).await?;
        OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&self.path)
            .await?;
        match self.current_token().await {
            Ok(token) => Ok(token),
            Err(StoreError::NotFound(_)) => self.replace_token().await,
            Err(e) => Err(e),
        }
    }

    async fn size(&self) -> StoreResult<u64> {
        Ok(fs::metadata(&self.path).await?.len())
    }

    async fn ensure_size(&self, size: u64, expected: &VersionToken) -> StoreResult<WriteOutcome> {
        let _lock = RegionLock::acquire(&self.lock_path).await?;
        if let Some(conflict) = self.check_token(expected).await? {
            return Ok(conflict);
        }

        let file = OpenOptions::new().write(true).open(&self.path).await?;
        if file.metadata().await?.len() >= size {
            return Ok(WriteOutcome::Committed(expected.clone()));
        }
        file.set_len(round_up_to_page(size, self.grow_increment as usize)).await?;
        file.sync_all().await?;
        Ok(WriteOutcome::Committed(self.replace_token().await?))
    }

    async fn read_page(&self, offset: u64) -> StoreResult<Bytes> {
        if offset % PAGE_SIZE as u64 != 0 {
            return Err(StoreError::Misaligned {
                offset,
                len: PAGE_SIZE,
                page_size: PAGE_SIZE,
            });
        }
        self.read_at(offset, PAGE_SIZE).await
    }

    async fn read_range(&self, offset: u64, len: usize) -> StoreResult<Bytes> {
        self.read_at(offset, len).await
    }

    async fn save(
        &self,
        data: &[u8],
        offset: u64,
        expected: &VersionToken,
    ) -> StoreResult<WriteOutcome> {
        check_write_shape(offset, data.len(), PAGE_SIZE, self.max_commit_size)?;

        let _lock = RegionLock::acquire(&self.lock_path).await?;
        if let Some(conflict) = self.check_token(expected).await? {
            return Ok(conflict);
        }

        let mut file = OpenOptions::new().write(true).open(&self.path).await?;
        let size = file.metadata().await?.len();
        if offset + data.len() as u64 > size {
            return Err(StoreError::OutOfRange {
                offset,
                len: data.len(),
                size,
            });
        }
        file.seek(SeekFrom::Start(offset)).await?;
        file.write_all(data).await?;
        file.sync_data().await?;
        Ok(WriteOutcome::Committed(self.replace_token().await?))
    }

    fn max_commit_size(&self) -> usize {
        self.max_commit_size
    }
}

/// Exclusive advisory lock on a region's `.lock` sidecar. Released when
/// dropped, or by the OS when the process exits.
#[derive(Debug)]
struct RegionLock {
    file: std::fs::File,
}

impl RegionLock {
    async fn acquire(path: &Path) -> StoreResult<Self> {
        let path = path.to_path_buf();
        tokio::task::spawn_blocking(move || -> StoreResult<Self> {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .read(true)
                .write(true)
                .truncate(false)
                .open(&path)?;
            FileExt::lock_exclusive(&file)?;
            Ok(Self { file })
        })
        .await
        .map_err(|e| StoreError::Io(format!("region lock task failed: {}", e)))?
    }
}

impl Drop for RegionLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

/// Checkpoint counter backed by a local file.
#[derive(Debug, Clone)]
pub struct FileCheckpointStore {
    path: PathBuf,
}

impl FileCheckpointStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn decode(bytes: &[u8]) -> StoreResult<u64> {
        let raw: [u8; 8] = bytes.try_into().map_err(|_| {
            StoreError::Corrupt(format!("checkpoint has {} bytes, expected 8", bytes.len()))
        })?;
        Ok(u64::from_be_bytes(raw))
    }
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn get_or_init_position(&self) -> StoreResult<u64> {
        match fs::read(&self.path).await {
            Ok(bytes) => Self::decode(&bytes),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                self.update(0).await?;
                Ok(0)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn read(&self) -> StoreResult<u64> {
        match fs::read(&self.path).await {
            Ok(bytes) => Self::decode(&bytes),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    fn read_blocking(&self) -> StoreResult<u64> {
        match std::fs::read(&self.path) {
            Ok(bytes) => Self::decode(&bytes),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    async fn update(&self, position: u64) -> StoreResult<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }
        write_atomically(&self.path, &position.to_be_bytes()).await
    }
}

/// Writes `data` to a uniquely named sibling temp file, fsyncs it, renames it
/// over `path` and fsyncs the parent directory so the rename survives a crash.
async fn write_atomically(path: &Path, data: &[u8]) -> StoreResult<()> {
    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(format!(".{}.tmp", Uuid::new_v4().simple()));
    let tmp = path.with_file_name(tmp_name);

    let mut file = fs::File::create(&tmp).await?;
    file.write_all(data).await?;
    file.sync_all().await?;
    drop(file);

    if let Err(e) = fs::rename(&tmp, path).await {
        let _ = fs::remove_file(&tmp).await;
        return Err(e.into());
    }

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::File::open(parent).await?.sync_all().await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn committed(outcome: WriteOutcome) -> VersionToken {
        match outcome {
            WriteOutcome::Committed(token) => token,
            WriteOutcome::Conflict { .. } => panic!("unexpected conflict"),
        }
    }

    fn assert_no_temp_files(dir: &Path) {
        let leftovers: Vec<_> = std::fs::read_dir(dir)
            .unwrap()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty(), "temp files left: {:?}", leftovers);
    }

    #[tokio::test]
    async fn test_init_is_stable_across_handles() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("streams/orders.pages");

        let first = FilePageStore::new(&path, 4096, 4096).init().await.unwrap();
        let second = FilePageStore::new(&path, 4096, 4096).init().await.unwrap();
        assert_eq!(first, second);
        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_save_persists_and_rotates_token() {
        let temp = TempDir::new().unwrap();
        let store = FilePageStore::new(temp.path().join("s.pages"), 4096, 4096);
        let token = store.init().await.unwrap();
        let token = committed(store.ensure_size(1, &token).await.unwrap());
        assert_eq!(store.size().await.unwrap(), 4096);

        let mut page = vec![0u8; 512];
        page[0] = 7;
        let next = committed(store.save(&page, 512, &token).await.unwrap());
        assert_ne!(next, token);

        let reopened = FilePageStore::new(temp.path().join("s.pages"), 4096, 4096);
        assert_eq!(reopened.read_page(512).await.unwrap()[0], 7);
    }

    #[tokio::test]
    async fn test_second_handle_with_stale_token_conflicts() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("s.pages");
        let a = FilePageStore::new(&path, 4096, 4096);
        let b = FilePageStore::new(&path, 4096, 4096);

        let token = a.init().await.unwrap();
        let token = committed(a.ensure_size(512, &token).await.unwrap());
        let stale = token.clone();
        committed(a.save(&[1u8; 512], 0, &token).await.unwrap());

        let outcome = b.save(&[2u8; 512], 0, &stale).await.unwrap();
        assert!(matches!(outcome, WriteOutcome::Conflict { .. }));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_racing_handles_commit_exactly_once_per_token() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("race.pages");
        let a = Arc::new(FilePageStore::new(&path, 4096, 4096));
        let b = Arc::new(FilePageStore::new(&path, 4096, 4096));

        let token = a.init().await.unwrap();
        let mut token = committed(a.ensure_size(512, &token).await.unwrap());

        for round in 0..50u8 {
            let save = |store: Arc<FilePageStore>, fill: u8, token: VersionToken| {
                tokio::spawn(async move { store.save(&[fill; 512], 0, &token).await })
            };
            let left = save(Arc::clone(&a), round, token.clone());
            let right = save(Arc::clone(&b), round.wrapping_add(100), token.clone());
            let outcomes = [left.await.unwrap().unwrap(), right.await.unwrap().unwrap()];

            let winners: Vec<_> = outcomes
                .iter()
                .filter_map(|o| match o {
                    WriteOutcome::Committed(t) => Some(t.clone()),
                    WriteOutcome::Conflict { .. } => None,
                })
                .collect();
            assert_eq!(winners.len(), 1, "round {}: {:?}", round, outcomes);
            token = winners[0].clone();
            assert_eq!(a.current_token().await.unwrap(), token);
        }
        assert_no_temp_files(temp.path());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_checkpoint_updates_all_succeed() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("orders.chk");

        let updates: Vec<_> = (1..=16u64)
            .map(|position| {
                let checkpoint = FileCheckpointStore::new(&path);
                tokio::spawn(async move { checkpoint.update(position * 27).await })
            })
            .collect();
        for update in updates {
            update.await.unwrap().unwrap();
        }

        let position = FileCheckpointStore::new(&path).read().await.unwrap();
        assert!(position % 27 == 0 && (27..=16 * 27).contains(&position));
        assert_no_temp_files(temp.path());
    }

    #[tokio::test]
    async fn test_checkpoint_round_trip() {
        let temp = TempDir::new().unwrap();
        let checkpoint = FileCheckpointStore::new(temp.path().join("orders.chk"));

        assert_eq!(checkpoint.read().await.unwrap(), 0);
        assert_eq!(checkpoint.get_or_init_position().await.unwrap(), 0);
        checkpoint.update(4242).await.unwrap();
        assert_eq!(checkpoint.read().await.unwrap(), 4242);
        assert_eq!(checkpoint.read_blocking().unwrap(), 4242);
    }

    #[tokio::test]
    async fn test_corrupt_checkpoint_is_reported() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("bad.chk");
        std::fs::write(&path, b"abc").unwrap();

        let checkpoint = FileCheckpointStore::new(&path);
        assert!(matches!(
            checkpoint.read().await,
            Err(StoreError::Corrupt(_))
        ));
    }
}
