//! # Page Store capability
//!
//! A page region is an array of fixed-size pages that only grows. Writes
//! start and end on page boundaries and carry the version token the caller
//! last observed; every successful mutation produces a new token.

use std::fmt;

use async_trait::async_trait;
use bytes::Bytes;

use super::errors::{StoreError, StoreResult};

/// Addressable unit of every page store.
pub const PAGE_SIZE: usize = 512;

/// Opaque optimistic-concurrency token (an entity tag).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VersionToken(String);

impl VersionToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VersionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Result of a guarded mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use]
pub enum WriteOutcome {
    /// The mutation was applied; the region now carries this token.
    Committed(VersionToken),
    /// Another writer mutated the region since `expected` was observed.
    Conflict {
        expected: VersionToken,
        actual: VersionToken,
    },
}

/// Fixed-size page storage with guarded range writes.
#[async_trait]
pub trait PageStore: Send + Sync + fmt::Debug {
    /// Creates the region if it does not exist and returns its current token.
    async fn init(&self) -> StoreResult<VersionToken>;

    /// Current allocated size in bytes (always a page multiple).
    async fn size(&self) -> StoreResult<u64>;

    /// Grows the region to at least `size` bytes. A no-op (returning the
    /// unchanged token) when the region is already large enough.
    async fn ensure_size(&self, size: u64, expected: &VersionToken) -> StoreResult<WriteOutcome>;

    /// Downloads the single page starting at `offset`.
    async fn read_page(&self, offset: u64) -> StoreResult<Bytes>;

    /// Downloads `len` bytes starting at `offset`.
    async fn read_range(&self, offset: u64, len: usize) -> StoreResult<Bytes>;

    /// Writes `data` at `offset`, both page aligned, guarded by `expected`.
    async fn save(&self, data: &[u8], offset: u64, expected: &VersionToken)
        -> StoreResult<WriteOutcome>;

    /// Largest `data` length accepted by [`save`](Self::save).
    fn max_commit_size(&self) -> usize;

    fn page_size(&self) -> usize {
        PAGE_SIZE
    }
}

/// Rounds `len` up to the next multiple of `page_size`.
pub fn round_up_to_page(len: u64, page_size: usize) -> u64 {
    let page = page_size as u64;
    len.div_ceil(page) * page
}

/// Rejects writes that do not start and end on a page boundary or exceed
/// the commit ceiling.
pub(crate) fn check_write_shape(
    offset: u64,
    len: usize,
    page_size: usize,
    max_commit_size: usize,
) -> StoreResult<()> {
    if offset % page_size as u64 != 0 || len % page_size != 0 {
        return Err(StoreError::Misaligned {
            offset,
            len,
            page_size,
        });
    }
    if len > max_commit_size {
        return Err(StoreError::CommitTooLarge {
            len,
            max: max_commit_size,
        });
    }
    Ok(())
}
