//! Lease-based leader election
//!
//! One process per deployment holds the lease and owns all writes. The
//! [`LeaseManager`] acquires and renews the lease on a shared
//! [`LeaseLock`] and runs the caller's leader body for as long as renewal
//! succeeds. The elected leader advertises itself through a
//! [`LeaderInfoStore`] record so followers can forward writes.

mod errors;
mod leader_info;
mod lock;
mod manager;

pub use errors::{LeaseError, LeaseResult};
pub use leader_info::{LeaderInfo, LeaderInfoStore, MemoryLeaderInfoStore};
pub use lock::{AcquireOutcome, LeaseId, LeaseLock, MemoryLeaseLock};
pub use manager::{LeaseManager, LeaseState};
