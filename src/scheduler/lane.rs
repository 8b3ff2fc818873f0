//! # Affinity lanes
//!
//! A lane is one task draining one command queue strictly in order. It owns
//! the writers of every stream routed to it, so a writer's buffer and cursor
//! are only ever touched by that task.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::log::{
    AppendResult, LogError, LogErrorCode, LogResult, LogWriter, Message, MessageIdGenerator,
    StreamName,
};
use crate::observability::{LogMetrics, Logger};
use crate::store::StreamStoreProvider;

pub(crate) type LaneSender = mpsc::UnboundedSender<LaneCommand>;
pub(crate) type LaneReceiver = mpsc::UnboundedReceiver<LaneCommand>;

pub(crate) enum LaneCommand {
    Append {
        stream: StreamName,
        batch: Vec<Message>,
        respond: oneshot::Sender<LogResult<AppendResult>>,
    },
}

/// Shared by every lane of one scheduler.
#[derive(Debug)]
pub(crate) struct LaneContext {
    pub provider: Arc<dyn StreamStoreProvider>,
    pub ids: Arc<MessageIdGenerator>,
    pub metrics: Arc<LogMetrics>,
    pub max_message_size: usize,
    /// Tripped by the first fatal writer error
    pub fatal: CancellationToken,
    /// Tripped when a drain overruns its deadline; queued work is refused
    pub abandon: CancellationToken,
}

/// Runs until every sender is dropped and the queue is empty.
pub(crate) async fn run_lane(index: usize, mut rx: LaneReceiver, ctx: Arc<LaneContext>) {
    let lane = index.to_string();
    let mut writers: HashMap<StreamName, LogWriter> = HashMap::new();

    while let Some(command) = rx.recv().await {
        match command {
            LaneCommand::Append {
                stream,
                batch,
                respond,
            } => {
                if ctx.abandon.is_cancelled() || ctx.fatal.is_cancelled() {
                    let _ = respond.send(Err(LogError::scheduler_stopped()));
                    continue;
                }
                let result = append(&ctx, &mut writers, &stream, &batch).await;
                if let Err(ref e) = result {
                    on_append_error(&ctx, &mut writers, &stream, &lane, e);
                }
                let _ = respond.send(result);
            }
        }
    }

    Logger::info(
        "SCHEDULER_LANE_STOPPED",
        &[("lane", &lane), ("streams", &writers.len().to_string())],
    );
}

async fn append(
    ctx: &LaneContext,
    writers: &mut HashMap<StreamName, LogWriter>,
    stream: &StreamName,
    batch: &[Message],
) -> LogResult<AppendResult> {
    if !writers.contains_key(stream) {
        let stores = ctx
            .provider
            .open(stream)
            .map_err(|e| LogError::from(e).for_stream(stream.as_str()))?;
        let writer = LogWriter::open(
            stream.clone(),
            stores.pages,
            stores.checkpoint,
            Arc::clone(&ctx.ids),
            Arc::clone(&ctx.metrics),
            ctx.max_message_size,
        )
        .await?;
        writers.insert(stream.clone(), writer);
    }
    match writers.get_mut(stream) {
        Some(writer) => writer.append(batch).await,
        None => Err(LogError::scheduler_stopped()),
    }
}

/// Drops writers whose state can no longer be trusted; a fatal error also
/// stops the whole scheduler.
fn on_append_error(
    ctx: &LaneContext,
    writers: &mut HashMap<StreamName, LogWriter>,
    stream: &StreamName,
    lane: &str,
    error: &LogError,
) {
    if error.code() == LogErrorCode::InvalidArgument {
        return;
    }
    writers.remove(stream);
    if error.is_fatal() {
        Logger::fatal(
            "SCHEDULER_WRITER_FATAL",
            &[
                ("error", &error.to_string()),
                ("lane", lane),
                ("stream", stream.as_str()),
            ],
        );
        ctx.fatal.cancel();
    } else {
        Logger::error(
            "SCHEDULER_APPEND_FAILED",
            &[
                ("error", &error.to_string()),
                ("lane", lane),
                ("stream", stream.as_str()),
            ],
        );
    }
}
