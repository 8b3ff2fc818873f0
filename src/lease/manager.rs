//! # Lease manager
//!
//! Drives leader election over a [`LeaseLock`]:
//!
//! ```text
//! Idle -> Acquiring -> Leading -> Idle
//! ```
//!
//! While leading, the caller's body and a renewal loop run concurrently
//! under one cancellation scope. A failed renewal cancels the scope; the
//! body finishing stops renewal. The manager waits for both, releases the
//! lease when it still holds it, and goes back to acquiring.
//!
//! Renewal keeps going while the body winds down after cancellation, so a
//! leader that drains its work before returning still owns the lease while
//! doing so.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use tokio::sync::watch;
use tokio::time::{sleep, sleep_until, Instant};
use tokio_util::sync::CancellationToken;

use super::errors::LeaseError;
use super::lock::{AcquireOutcome, LeaseId, LeaseLock};
use crate::config::LeaseConfig;
use crate::observability::{LogMetrics, Logger};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaseState {
    Idle,
    Acquiring,
    Leading,
}

/// What an acquisition attempt decided.
enum Attempt {
    Lead(LeaseId),
    RetryNow,
    Wait,
}

#[derive(Debug)]
pub struct LeaseManager {
    lock: Arc<dyn LeaseLock>,
    config: LeaseConfig,
    metrics: Arc<LogMetrics>,
    state: watch::Sender<LeaseState>,
}

impl LeaseManager {
    pub fn new(lock: Arc<dyn LeaseLock>, config: LeaseConfig, metrics: Arc<LogMetrics>) -> Self {
        let (state, _) = watch::channel(LeaseState::Idle);
        Self {
            lock,
            config,
            metrics,
            state,
        }
    }

    pub fn state(&self) -> LeaseState {
        *self.state.borrow()
    }

    /// Observes state transitions.
    pub fn subscribe(&self) -> watch::Receiver<LeaseState> {
        self.state.subscribe()
    }

    fn set_state(&self, state: LeaseState) {
        self.state.send_replace(state);
    }

    /// Runs elections until `cancel` fires.
    ///
    /// `body` is invoked once per won election with a token that is
    /// cancelled when the lease is lost or `cancel` fires. It should stop
    /// promptly once the token fires.
    pub async fn run<F, Fut, E>(&self, cancel: CancellationToken, mut body: F)
    where
        F: FnMut(CancellationToken) -> Fut,
        Fut: Future<Output = Result<(), E>>,
        E: fmt::Display,
    {
        while !cancel.is_cancelled() {
            self.set_state(LeaseState::Acquiring);
            let wait = match self.try_acquire().await {
                Attempt::Lead(lease) => {
                    self.lead(lease, &cancel, &mut body).await;
                    true
                }
                Attempt::RetryNow => false,
                Attempt::Wait => true,
            };
            self.set_state(LeaseState::Idle);

            if wait {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = sleep(self.config.acquire_interval()) => {}
                }
            }
        }
        self.set_state(LeaseState::Idle);
    }

    async fn try_acquire(&self) -> Attempt {
        let proposed = LeaseId::new();
        match self
            .lock
            .acquire(self.config.lease_duration(), proposed)
            .await
        {
            Ok(AcquireOutcome::Acquired(lease)) => Attempt::Lead(lease),
            Ok(AcquireOutcome::Held) => Attempt::Wait,
            Ok(AcquireOutcome::LockMissing) => match self.lock.create().await {
                Ok(()) | Err(LeaseError::AlreadyExists) => {
                    Logger::info("LEASE_LOCK_CREATED", &[]);
                    Attempt::RetryNow
                }
                Err(e) => {
                    Logger::warn("LEASE_LOCK_CREATE_FAILED", &[("error", &e.to_string())]);
                    Attempt::Wait
                }
            },
            Err(e) => {
                Logger::warn("LEASE_ACQUIRE_FAILED", &[("error", &e.to_string())]);
                Attempt::Wait
            }
        }
    }

    async fn lead<F, Fut, E>(&self, lease: LeaseId, cancel: &CancellationToken, body: &mut F)
    where
        F: FnMut(CancellationToken) -> Fut,
        Fut: Future<Output = Result<(), E>>,
        E: fmt::Display,
    {
        let lease_str = lease.to_string();
        self.metrics.increment_leases_acquired();
        self.set_state(LeaseState::Leading);
        Logger::info("LEASE_ACQUIRED", &[("lease_id", &lease_str)]);

        let scope = cancel.child_token();
        let body_done = CancellationToken::new();

        let leader = async {
            let result = body(scope.clone()).await;
            body_done.cancel();
            result
        };
        let (result, lost) = tokio::join!(leader, self.renew_loop(lease, &scope, &body_done));

        if let Err(e) = result {
            Logger::error(
                "LEADER_BODY_FAILED",
                &[("error", &e.to_string()), ("lease_id", &lease_str)],
            );
        }
        if lost {
            return;
        }
        match self.lock.release(lease).await {
            Ok(()) => Logger::info("LEASE_RELEASED", &[("lease_id", &lease_str)]),
            Err(e) => Logger::warn(
                "LEASE_RELEASE_FAILED",
                &[("error", &e.to_string()), ("lease_id", &lease_str)],
            ),
        }
    }

    /// Renews until the body finishes. Returns `true` when the lease was lost,
    /// after cancelling `scope`.
    async fn renew_loop(
        &self,
        lease: LeaseId,
        scope: &CancellationToken,
        body_done: &CancellationToken,
    ) -> bool {
        let interval = self.config.renew_interval();
        let duration = self.config.lease_duration();
        let mut last_renewed = Instant::now();
        let mut next = last_renewed + interval;

        loop {
            tokio::select! {
                _ = body_done.cancelled() => return false,
                _ = sleep_until(next) => {}
            }

            let started = Instant::now();
            next = started + interval;
            let reason = match self.lock.renew(lease).await {
                Ok(true) => {
                    last_renewed = started;
                    continue;
                }
                Ok(false) => "not_renewed".to_string(),
                Err(e) if started - last_renewed + interval < duration => {
                    Logger::warn(
                        "LEASE_RENEW_FAILED",
                        &[("error", &e.to_string()), ("lease_id", &lease.to_string())],
                    );
                    continue;
                }
                Err(e) => e.to_string(),
            };

            self.metrics.increment_leases_lost();
            Logger::warn(
                "LEASE_LOST",
                &[("lease_id", &lease.to_string()), ("reason", &reason)],
            );
            scope.cancel();
            return true;
        }
    }
}
