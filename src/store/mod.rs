//! Page and checkpoint storage for pagelog
//!
//! The log engine sees storage only through two capabilities:
//!
//! - [`PageStore`]: fixed-size pages, a commit-size ceiling, page-aligned
//!   range writes guarded by a [`VersionToken`], and range downloads
//! - [`CheckpointStore`]: one durable 64-bit counter per stream
//!
//! Adapters are selected at construction and injected; a remote blob
//! adapter implements the same traits outside this crate.
//!
//! # Failure classes
//!
//! - Transient faults are retried by [`Retrying`] and are invisible above it
//! - A version-token mismatch is a [`WriteOutcome::Conflict`], never retried
//! - Forbidden access is surfaced as its own variant

mod checkpoint;
mod errors;
mod file;
mod memory;
mod page;
mod provider;
mod retry;

pub use checkpoint::CheckpointStore;
pub use errors::{StoreError, StoreResult};
pub use file::{FileCheckpointStore, FilePageStore};
pub use memory::{MemoryCheckpointStore, MemoryPageStore};
pub use page::{round_up_to_page, PageStore, VersionToken, WriteOutcome, PAGE_SIZE};
pub use provider::{FileStoreProvider, MemoryStoreProvider, StreamStoreProvider, StreamStores};
pub use retry::Retrying;
