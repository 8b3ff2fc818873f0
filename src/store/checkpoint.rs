//! # Checkpoint Store capability
//!
//! One durable 64-bit counter per stream: the byte offset just past the
//! last fully committed record.

use std::fmt;

use async_trait::async_trait;

use super::errors::StoreResult;

#[async_trait]
pub trait CheckpointStore: Send + Sync + fmt::Debug {
    /// Reads the checkpoint, creating a zero checkpoint if absent.
    async fn get_or_init_position(&self) -> StoreResult<u64>;

    /// Reads the checkpoint; an absent checkpoint reads as zero.
    async fn read(&self) -> StoreResult<u64>;

    /// Synchronous variant of [`read`](Self::read).
    fn read_blocking(&self) -> StoreResult<u64>;

    /// Stores a new position. Monotonic by convention, not enforced.
    async fn update(&self, position: u64) -> StoreResult<()>;
}
