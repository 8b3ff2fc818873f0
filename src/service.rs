//! # Collaborator-facing log service
//!
//! `PageLog` is what a transport layer talks to. Any node serves reads;
//! only the elected leader accepts appends. Followers reject appends with
//! `PLOG_NOT_LEADER`, carrying the published leader address so the caller
//! can forward.
//!
//! A leader session owns one [`AffinityScheduler`]:
//!
//! 1. Start the scheduler and publish leader info
//! 2. Serve appends until the session is cancelled or a writer fails fatally
//! 3. Stop intake and drain, bounded by the drain timeout
//! 4. Withdraw the scheduler and the leader info
//!
//! The lease is still renewed during step 3, so no other node is elected
//! while queued appends finish.

use std::sync::{Arc, RwLock};

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::PageLogConfig;
use crate::lease::{LeaderInfo, LeaderInfoStore, LeaseManager};
use crate::log::{
    validate_batch, AppendResult, LogError, LogReader, LogResult, Message, MessageIdGenerator,
    StreamName,
};
use crate::observability::{LogMetrics, Logger};
use crate::scheduler::AffinityScheduler;
use crate::store::StreamStoreProvider;

#[derive(Debug)]
pub struct PageLog {
    node_id: String,
    config: PageLogConfig,
    provider: Arc<dyn StreamStoreProvider>,
    leader_info: Arc<dyn LeaderInfoStore>,
    ids: Arc<MessageIdGenerator>,
    metrics: Arc<LogMetrics>,
    /// Set only while this node leads
    scheduler: RwLock<Option<Arc<AffinityScheduler>>>,
}

impl PageLog {
    pub fn new(
        config: PageLogConfig,
        provider: Arc<dyn StreamStoreProvider>,
        leader_info: Arc<dyn LeaderInfoStore>,
        metrics: Arc<LogMetrics>,
    ) -> LogResult<Self> {
        config.validate()?;
        Ok(Self {
            node_id: Uuid::new_v4().to_string(),
            config,
            provider,
            leader_info,
            ids: Arc::new(MessageIdGenerator::new()),
            metrics,
            scheduler: RwLock::new(None),
        })
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn config(&self) -> &PageLogConfig {
        &self.config
    }

    pub fn metrics(&self) -> &Arc<LogMetrics> {
        &self.metrics
    }

    pub fn is_leader(&self) -> bool {
        self.current_scheduler().is_some()
    }

    fn current_scheduler(&self) -> Option<Arc<AffinityScheduler>> {
        self.scheduler.read().ok().and_then(|slot| slot.clone())
    }

    fn set_scheduler(&self, scheduler: Option<Arc<AffinityScheduler>>) {
        match self.scheduler.write() {
            Ok(mut slot) => *slot = scheduler,
            Err(poisoned) => *poisoned.into_inner() = scheduler,
        }
    }

    /// Appends a batch to `stream`.
    ///
    /// Validation happens first, so a malformed batch fails the same way on
    /// leaders and followers.
    pub async fn append(&self, stream: &str, batch: Vec<Message>) -> LogResult<AppendResult> {
        let stream = StreamName::parse(stream)?;
        validate_batch(&batch, self.config.max_message_size)
            .map_err(|e| e.for_stream(stream.as_str()))?;

        match self.current_scheduler() {
            Some(scheduler) => scheduler.append(&stream, batch).await,
            None => {
                let leader = match self.leader_info.current().await {
                    Ok(info) => info.map(|i| i.address),
                    Err(e) => {
                        Logger::warn("LEADER_INFO_READ_FAILED", &[("error", &e.to_string())]);
                        None
                    }
                };
                Err(LogError::not_leader(leader))
            }
        }
    }

    /// Read access to `stream`; available on every node.
    pub fn reader(&self, stream: &str) -> LogResult<LogReader> {
        let stream = StreamName::parse(stream)?;
        let stores = self
            .provider
            .open(&stream)
            .map_err(|e| LogError::from(e).for_stream(stream.as_str()))?;
        Ok(LogReader::new(
            stream,
            stores.pages,
            stores.checkpoint,
            &self.config.reader,
            Arc::clone(&self.metrics),
        ))
    }

    /// One leader session; returns when `session` is cancelled or a writer
    /// fails fatally, after the scheduler has drained.
    pub async fn lead(&self, session: CancellationToken) -> LogResult<()> {
        let scheduler = Arc::new(AffinityScheduler::start(
            self.config.scheduler.lane_count(),
            Arc::clone(&self.provider),
            Arc::clone(&self.ids),
            Arc::clone(&self.metrics),
            self.config.max_message_size,
        ));
        let fatal = scheduler.fatal_signal();
        self.set_scheduler(Some(Arc::clone(&scheduler)));

        let info = LeaderInfo::new(&self.node_id, &self.config.advertised_address);
        if let Err(e) = self.leader_info.publish(&info).await {
            Logger::warn("LEADER_INFO_PUBLISH_FAILED", &[("error", &e.to_string())]);
        }
        Logger::info(
            "LEADER_SESSION_STARTED",
            &[
                ("address", &self.config.advertised_address),
                ("node_id", &self.node_id),
            ],
        );

        let aborted = tokio::select! {
            _ = session.cancelled() => false,
            _ = fatal.cancelled() => true,
        };

        let drained = scheduler
            .shutdown_within(self.config.scheduler.drain_timeout())
            .await;
        self.set_scheduler(None);
        if let Err(e) = self.leader_info.clear(&self.node_id).await {
            Logger::warn("LEADER_INFO_CLEAR_FAILED", &[("error", &e.to_string())]);
        }
        Logger::info(
            "LEADER_SESSION_ENDED",
            &[
                ("aborted", &aborted.to_string()),
                ("drained", &drained.to_string()),
                ("node_id", &self.node_id),
            ],
        );

        if aborted {
            return Err(LogError::session_aborted(
                "A writer failed fatally; leader session ended",
            ));
        }
        Ok(())
    }

    /// Competes for leadership until `cancel` fires, running a leader
    /// session for every won election.
    pub async fn run(&self, lease: &LeaseManager, cancel: CancellationToken) {
        lease.run(cancel, |session| self.lead(session)).await;
    }
}
