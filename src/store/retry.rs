//! # Bounded retry for transient store faults
//!
//! `Retrying` wraps any page or checkpoint store and repeats calls that
//! fail with [`StoreError::Transient`], backing off exponentially up to
//! `max_retries` times. Every other error, and every
//! [`WriteOutcome::Conflict`], passes through on the first attempt.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::time::sleep;

use super::checkpoint::CheckpointStore;
use super::errors::StoreResult;
use super::page::{PageStore, VersionToken, WriteOutcome};
use crate::config::RetryConfig;
use crate::observability::{LogMetrics, Logger};

/// Retry decorator over a store adapter.
#[derive(Debug)]
pub struct Retrying<S> {
    inner: S,
    policy: RetryConfig,
    metrics: Arc<LogMetrics>,
}

impl<S> Retrying<S> {
    pub fn new(inner: S, policy: RetryConfig, metrics: Arc<LogMetrics>) -> Self {
        Self {
            inner,
            policy,
            metrics,
        }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    async fn run<T, F, Fut>(&self, operation: &str, mut call: F) -> StoreResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = StoreResult<T>>,
    {
        let mut attempt = 0u32;
        loop {
            match call().await {
                Err(e) if e.is_transient() && attempt < self.policy.max_retries => {
                    attempt += 1;
                    self.metrics.increment_store_retries();
                    let backoff = self.policy.backoff(attempt);
                    Logger::warn(
                        "STORE_RETRY",
                        &[
                            ("attempt", &attempt.to_string()),
                            ("backoff_ms", &backoff.as_millis().to_string()),
                            ("error", &e.to_string()),
                            ("operation", operation),
                        ],
                    );
                    sleep(backoff).await;
                }
                other => return other,
            }
        }
    }
}

#[async_trait]
impl<S: PageStore> PageStore for Retrying<S> {
    async fn init(&self) -> StoreResult<VersionToken> {
        let inner = &self.inner;
        self.run("init", || inner.init()).await
    }

    async fn size(&self) -> StoreResult<u64> {
        let inner = &self.inner;
        self.run("size", || inner.size()).await
    }

    async fn ensure_size(&self, size: u64, expected: &VersionToken) -> StoreResult<WriteOutcome> {
        let inner = &self.inner;
        self.run("ensure_size", || inner.ensure_size(size, expected)).await
    }

    async fn read_page(&self, offset: u64) -> StoreResult<Bytes> {
        let inner = &self.inner;
        self.run("read_page", || inner.read_page(offset)).await
    }

    async fn read_range(&self, offset: u64, len: usize) -> StoreResult<Bytes> {
        let inner = &self.inner;
        self.run("read_range", || inner.read_range(offset, len)).await
    }

    async fn save(
        &self,
        data: &[u8],
        offset: u64,
        expected: &VersionToken,
    ) -> StoreResult<WriteOutcome> {
        let inner = &self.inner;
        self.run("save", || inner.save(data, offset, expected)).await
    }

    fn max_commit_size(&self) -> usize {
        self.inner.max_commit_size()
    }

    fn page_size(&self) -> usize {
        self.inner.page_size()
    }
}

#[async_trait]
impl<S: CheckpointStore> CheckpointStore for Retrying<S> {
    async fn get_or_init_position(&self) -> StoreResult<u64> {
        let inner = &self.inner;
        self.run("checkpoint_init", || inner.get_or_init_position()).await
    }

    async fn read(&self) -> StoreResult<u64> {
        let inner = &self.inner;
        self.run("checkpoint_read", || inner.read()).await
    }

    fn read_blocking(&self) -> StoreResult<u64> {
        self.inner.read_blocking()
    }

    async fn update(&self, position: u64) -> StoreResult<()> {
        let inner = &self.inner;
        self.run("checkpoint_update", || inner.update(position)).await
    }
}
