//! # Lease lock capability
//!
//! A lease is a time-boxed exclusive claim on one shared lock object. The
//! store never notifies a holder that its lease lapsed; a failed renewal is
//! the only signal.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use uuid::Uuid;

use super::errors::{LeaseError, LeaseResult};

/// Opaque lease holder identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LeaseId(Uuid);

impl LeaseId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for LeaseId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for LeaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Result of an acquisition attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    Acquired(LeaseId),
    /// Another holder owns an unexpired lease
    Held,
    /// The lock object does not exist yet
    LockMissing,
}

#[async_trait]
pub trait LeaseLock: Send + Sync + fmt::Debug {
    /// Creates the lock object. Returns [`LeaseError::AlreadyExists`] when
    /// another node created it first.
    async fn create(&self) -> LeaseResult<()>;

    async fn acquire(&self, duration: Duration, proposed: LeaseId) -> LeaseResult<AcquireOutcome>;

    /// Extends the lease by its original duration. `false` means the lease
    /// is no longer held by `lease`.
    async fn renew(&self, lease: LeaseId) -> LeaseResult<bool>;

    async fn release(&self, lease: LeaseId) -> LeaseResult<()>;
}

#[derive(Debug, Default)]
struct LockState {
    exists: bool,
    holder: Option<Holder>,
    unavailable: bool,
}

#[derive(Debug, Clone, Copy)]
struct Holder {
    lease: LeaseId,
    expires_at: Instant,
    duration: Duration,
}

impl LockState {
    fn live_holder(&self, now: Instant) -> Option<Holder> {
        self.holder.filter(|h| h.expires_at > now)
    }
}

/// Lock object shared by every simulated node holding a clone.
///
/// Expiry follows tokio's clock, so paused-time tests control it.
#[derive(Debug, Clone, Default)]
pub struct MemoryLeaseLock {
    state: Arc<Mutex<LockState>>,
}

impl MemoryLeaseLock {
    /// A lock whose object already exists.
    pub fn new() -> Self {
        let lock = Self::default();
        if let Ok(mut state) = lock.state.lock() {
            state.exists = true;
        }
        lock
    }

    /// A lock whose object has not been created yet.
    pub fn missing() -> Self {
        Self::default()
    }

    fn lock(&self) -> LeaseResult<MutexGuard<'_, LockState>> {
        let state = self
            .state
            .lock()
            .map_err(|_| LeaseError::Transport("lock state poisoned".to_string()))?;
        if state.unavailable {
            return Err(LeaseError::Transport("lock service unavailable".to_string()));
        }
        Ok(state)
    }

    /// Breaks the current lease, as an operator or a clock skew would.
    pub fn revoke(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.holder = None;
        }
    }

    /// Makes every call fail with a transport fault until cleared.
    pub fn set_unavailable(&self, unavailable: bool) {
        if let Ok(mut state) = self.state.lock() {
            state.unavailable = unavailable;
        }
    }

    /// Current unexpired holder.
    pub fn holder(&self) -> Option<LeaseId> {
        self.state
            .lock()
            .ok()
            .and_then(|state| state.live_holder(Instant::now()))
            .map(|h| h.lease)
    }
}

#[async_trait]
impl LeaseLock for MemoryLeaseLock {
    async fn create(&self) -> LeaseResult<()> {
        let mut state = self.lock()?;
        if state.exists {
            return Err(LeaseError::AlreadyExists);
        }
        state.exists = true;
        Ok(())
    }

    async fn acquire(&self, duration: Duration, proposed: LeaseId) -> LeaseResult<AcquireOutcome> {
        let mut state = self.lock()?;
        if !state.exists {
            return Ok(AcquireOutcome::LockMissing);
        }
        let now = Instant::now();
        if let Some(holder) = state.live_holder(now) {
            if holder.lease != proposed {
                return Ok(AcquireOutcome::Held);
            }
        }
        state.holder = Some(Holder {
            lease: proposed,
            expires_at: now + duration,
            duration,
        });
        Ok(AcquireOutcome::Acquired(proposed))
    }

    async fn renew(&self, lease: LeaseId) -> LeaseResult<bool> {
        let mut state = self.lock()?;
        let now = Instant::now();
        match state.live_holder(now) {
            Some(holder) if holder.lease == lease => {
                state.holder = Some(Holder {
                    expires_at: now + holder.duration,
                    ..holder
                });
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn release(&self, lease: LeaseId) -> LeaseResult<()> {
        let mut state = self.lock()?;
        if state.holder.map(|h| h.lease) == Some(lease) {
            state.holder = None;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LEASE: Duration = Duration::from_secs(60);

    #[tokio::test]
    async fn test_missing_lock_is_created_once() {
        let lock = MemoryLeaseLock::missing();
        assert_eq!(
            lock.acquire(LEASE, LeaseId::new()).await.unwrap(),
            AcquireOutcome::LockMissing
        );
        lock.create().await.unwrap();
        assert!(matches!(lock.create().await, Err(LeaseError::AlreadyExists)));
    }

    #[tokio::test]
    async fn test_second_holder_is_refused() {
        let lock = MemoryLeaseLock::new();
        let a = LeaseId::new();
        assert_eq!(
            lock.acquire(LEASE, a).await.unwrap(),
            AcquireOutcome::Acquired(a)
        );
        assert_eq!(
            lock.acquire(LEASE, LeaseId::new()).await.unwrap(),
            AcquireOutcome::Held
        );
        assert_eq!(lock.holder(), Some(a));
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_lease_can_be_taken_over() {
        let lock = MemoryLeaseLock::new();
        let a = LeaseId::new();
        lock.acquire(LEASE, a).await.unwrap();

        tokio::time::advance(LEASE + Duration::from_millis(1)).await;
        assert!(!lock.renew(a).await.unwrap());

        let b = LeaseId::new();
        assert_eq!(
            lock.acquire(LEASE, b).await.unwrap(),
            AcquireOutcome::Acquired(b)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_renew_extends_from_now() {
        let lock = MemoryLeaseLock::new();
        let a = LeaseId::new();
        lock.acquire(LEASE, a).await.unwrap();

        tokio::time::advance(Duration::from_secs(40)).await;
        assert!(lock.renew(a).await.unwrap());
        tokio::time::advance(Duration::from_secs(40)).await;
        assert_eq!(lock.holder(), Some(a));
    }

    #[tokio::test]
    async fn test_release_only_by_holder() {
        let lock = MemoryLeaseLock::new();
        let a = LeaseId::new();
        lock.acquire(LEASE, a).await.unwrap();

        lock.release(LeaseId::new()).await.unwrap();
        assert_eq!(lock.holder(), Some(a));
        lock.release(a).await.unwrap();
        assert_eq!(lock.holder(), None);
    }

    #[tokio::test]
    async fn test_unavailable_lock_reports_transport_fault() {
        let lock = MemoryLeaseLock::new();
        lock.set_unavailable(true);
        assert!(matches!(
            lock.acquire(LEASE, LeaseId::new()).await,
            Err(LeaseError::Transport(_))
        ));
    }
}
