//! # Paged read stream
//!
//! Forward-only byte source over a page store, bounded by the checkpoint
//! observed when the read started. Bytes are downloaded into a fixed local
//! window; when a request needs more than the window holds, the unread
//! remainder moves to the window start and the shortfall is downloaded,
//! topped up to the read-ahead size when the window has room.

use std::sync::Arc;

use super::errors::{LogError, LogResult};
use crate::store::PageStore;

pub struct PagedReadStream {
    pages: Arc<dyn PageStore>,
    window: Vec<u8>,
    /// Unread bytes are `window[start..end]`
    start: usize,
    end: usize,
    /// Stream offset of the next byte to download
    next_download: u64,
    /// Nothing at or beyond this offset is downloaded
    limit: u64,
    read_ahead: usize,
}

impl PagedReadStream {
    pub fn new(
        pages: Arc<dyn PageStore>,
        from: u64,
        limit: u64,
        capacity: usize,
        read_ahead: usize,
    ) -> Self {
        Self {
            pages,
            window: vec![0u8; capacity],
            start: 0,
            end: 0,
            next_download: from,
            limit: limit.max(from),
            read_ahead,
        }
    }

    /// Stream offset of the next unread byte.
    pub fn position(&self) -> u64 {
        self.next_download - self.available() as u64
    }

    /// Bytes left before the limit, buffered or not.
    pub fn remaining(&self) -> u64 {
        self.limit - self.position()
    }

    fn available(&self) -> usize {
        self.end - self.start
    }

    /// Returns at least `len` unread bytes, downloading as needed.
    ///
    /// Fails with a sizing error when `len` exceeds the window capacity or
    /// the bytes left before the limit.
    pub async fn fill(&mut self, len: usize) -> LogResult<&[u8]> {
        let available = self.available();
        if available < len {
            let downloadable = (self.limit - self.next_download) as usize;
            if len > self.window.len() || len > available + downloadable {
                return Err(LogError::read_sizing(
                    len,
                    (available + downloadable).min(self.window.len()),
                ));
            }

            self.window.copy_within(self.start..self.end, 0);
            self.start = 0;
            self.end = available;

            let fetch = (len - available)
                .max(self.read_ahead)
                .min(self.window.len() - available)
                .min(downloadable);
            let bytes = self.pages.read_range(self.next_download, fetch).await?;
            self.window[available..available + fetch].copy_from_slice(&bytes);
            self.end += fetch;
            self.next_download += fetch as u64;
        }
        Ok(&self.window[self.start..self.end])
    }

    /// Marks `len` buffered bytes as read.
    pub fn consume(&mut self, len: usize) {
        debug_assert!(len <= self.available());
        self.start += len.min(self.available());
    }
}
