//! # Affinity write scheduler
//!
//! Routes every append for a stream to the same lane, chosen by
//! `crc32(canonical name) % lanes`. Appends to one stream therefore run in
//! submission order and never overlap; different streams may run in
//! parallel on different lanes.
//!
//! Shutdown stops intake and returns a future that resolves once every lane
//! has drained its queue. Leadership must not be given up before it
//! resolves, or queued appends could race a newly elected leader.

use std::future::Future;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use futures_util::future::join_all;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::lane::{run_lane, LaneCommand, LaneContext, LaneSender};
use crate::log::{AppendResult, LogError, LogResult, Message, MessageIdGenerator, StreamName};
use crate::observability::{LogMetrics, Logger};
use crate::store::StreamStoreProvider;

#[derive(Debug)]
pub struct AffinityScheduler {
    /// `None` once shutdown has started
    senders: RwLock<Option<Vec<LaneSender>>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    lane_count: usize,
    fatal: CancellationToken,
    abandon: CancellationToken,
}

impl AffinityScheduler {
    /// Spawns `lanes` lane tasks (at least one) on the current runtime.
    pub fn start(
        lanes: usize,
        provider: Arc<dyn StreamStoreProvider>,
        ids: Arc<MessageIdGenerator>,
        metrics: Arc<LogMetrics>,
        max_message_size: usize,
    ) -> Self {
        let lane_count = lanes.max(1);
        let fatal = CancellationToken::new();
        let abandon = CancellationToken::new();
        let ctx = Arc::new(LaneContext {
            provider,
            ids,
            metrics,
            max_message_size,
            fatal: fatal.clone(),
            abandon: abandon.clone(),
        });

        let mut senders = Vec::with_capacity(lane_count);
        let mut handles = Vec::with_capacity(lane_count);
        for index in 0..lane_count {
            let (tx, rx) = mpsc::unbounded_channel();
            senders.push(tx);
            handles.push(tokio::spawn(run_lane(index, rx, Arc::clone(&ctx))));
        }

        Logger::info(
            "SCHEDULER_STARTED",
            &[("lanes", &lane_count.to_string())],
        );

        Self {
            senders: RwLock::new(Some(senders)),
            handles: Mutex::new(handles),
            lane_count,
            fatal,
            abandon,
        }
    }

    pub fn lane_count(&self) -> usize {
        self.lane_count
    }

    /// Lane serving `stream`. Stable for the scheduler's lifetime.
    pub fn lane_for(&self, stream: &StreamName) -> usize {
        crc32fast::hash(stream.as_str().as_bytes()) as usize % self.lane_count
    }

    /// Fires when a writer fails fatally; the scheduler refuses work after it.
    pub fn fatal_signal(&self) -> CancellationToken {
        self.fatal.clone()
    }

    pub fn is_accepting(&self) -> bool {
        !self.fatal.is_cancelled()
            && self
                .senders
                .read()
                .map(|senders| senders.is_some())
                .unwrap_or(false)
    }

    /// Queues `batch` on the stream's lane and waits for its result.
    pub async fn append(
        &self,
        stream: &StreamName,
        batch: Vec<Message>,
    ) -> LogResult<AppendResult> {
        let (respond, response) = oneshot::channel();
        {
            let senders = self
                .senders
                .read()
                .map_err(|_| LogError::scheduler_stopped())?;
            let Some(senders) = senders.as_ref() else {
                return Err(LogError::scheduler_stopped());
            };
            senders[self.lane_for(stream)]
                .send(LaneCommand::Append {
                    stream: stream.clone(),
                    batch,
                    respond,
                })
                .map_err(|_| LogError::scheduler_stopped())?;
        }
        response
            .await
            .map_err(|_| LogError::scheduler_stopped())?
    }

    /// Stops intake. The returned future resolves once every lane has
    /// finished the work queued before this call.
    pub fn shutdown(&self) -> impl Future<Output = ()> + Send + 'static {
        if let Ok(mut senders) = self.senders.write() {
            senders.take();
        }
        let handles = match self.handles.lock() {
            Ok(mut handles) => std::mem::take(&mut *handles),
            Err(_) => Vec::new(),
        };
        async move {
            let lanes = handles.len();
            for result in join_all(handles).await {
                if let Err(e) = result {
                    Logger::error("SCHEDULER_LANE_PANICKED", &[("error", &e.to_string())]);
                }
            }
            if lanes > 0 {
                Logger::info("SCHEDULER_DRAINED", &[("lanes", &lanes.to_string())]);
            }
        }
    }

    /// Shuts down and waits at most `limit` for the drain. On timeout the
    /// remaining queued appends are refused and `false` is returned.
    pub async fn shutdown_within(&self, limit: Duration) -> bool {
        match tokio::time::timeout(limit, self.shutdown()).await {
            Ok(()) => true,
            Err(_) => {
                self.abandon.cancel();
                Logger::warn(
                    "SCHEDULER_DRAIN_TIMEOUT",
                    &[("limit_ms", &limit.as_millis().to_string())],
                );
                false
            }
        }
    }
}

impl Drop for AffinityScheduler {
    fn drop(&mut self) {
        self.abandon.cancel();
    }
}
