//! Worker pools connecting two queues

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::{FutureExt, Stream, StreamExt};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::chunk::Tracked;
use crate::events::ErrorLog;
use crate::queue::{finish_worker, LiveWorkers, QueueReceiver, QueueSender};
use kgflow_core::{ErrorKind, KgError, Result, RunEvent, Stage};

/// What every worker of a run shares
#[derive(Clone)]
pub(crate) struct StageContext {
    pub run_id: Uuid,
    pub cancel: CancellationToken,
    pub errors: ErrorLog,
}

/// Spawn `workers` tasks that move items from `input` to `output` through
/// `process`.
///
/// `process` handles its own recoverable errors (recording them and deciding
/// what to forward); returning `None` drops the item. A panic inside
/// `process` is recorded as an [`ErrorKind::Panic`] event for that item and
/// the worker moves on. The last worker to finish forwards the sentinel.
pub(crate) fn spawn_stage<I, O, F, Fut>(
    tasks: &mut JoinSet<Result<()>>,
    ctx: &StageContext,
    stage: Stage,
    workers: usize,
    input: QueueReceiver<I>,
    output: QueueSender<O>,
    process: F,
) where
    I: Tracked + Send + 'static,
    O: Send + 'static,
    F: Fn(I) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Option<O>> + Send + 'static,
{
    let workers = workers.max(1);
    let live = Arc::new(LiveWorkers::new(workers));
    let process = Arc::new(process);

    for worker in 0..workers {
        let ctx = ctx.clone();
        let input = input.clone();
        let output = output.clone();
        let live = Arc::clone(&live);
        let process = Arc::clone(&process);

        tasks.spawn(async move {
            let processed = run_worker(&ctx, stage, &input, &output, process.as_ref()).await;
            if processed.is_err() {
                // stop the other stages; the error is reported by join_all
                ctx.cancel.cancel();
            }

            // finish even after an error so the counter stays exact
            let finished = if ctx.cancel.is_cancelled() {
                live.finish().map(|_| ())
            } else {
                tokio::select! {
                    biased;
                    _ = ctx.cancel.cancelled() => Ok(()),
                    closed = finish_worker(&live, &output) => closed,
                }
            };

            tracing::debug!(
                run_id = %ctx.run_id,
                stage = %stage,
                worker,
                processed = processed.as_ref().copied().unwrap_or_default(),
                "Stage worker finished"
            );

            if finished.is_err() {
                ctx.cancel.cancel();
            }
            processed.and(finished)
        });
    }
}

async fn run_worker<I, O, F, Fut>(
    ctx: &StageContext,
    stage: Stage,
    input: &QueueReceiver<I>,
    output: &QueueSender<O>,
    process: &F,
) -> Result<usize>
where
    I: Tracked,
    F: Fn(I) -> Fut,
    Fut: Future<Output = Option<O>>,
{
    let mut processed = 0;

    loop {
        let next = tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => break,
            item = input.recv() => item,
        };
        let Some(item) = next else { break };

        let item_id = item.item_id();
        let outcome = tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => break,
            outcome = AssertUnwindSafe(process(item)).catch_unwind() => outcome,
        };
        processed += 1;

        let produced = match outcome {
            Ok(produced) => produced,
            Err(panic) => {
                ctx.errors.record(RunEvent::new(
                    stage,
                    item_id,
                    ErrorKind::Panic,
                    panic_message(panic.as_ref()),
                ));
                None
            }
        };

        if let Some(produced) = produced {
            tokio::select! {
                biased;
                _ = ctx.cancel.cancelled() => break,
                sent = output.send(produced) => sent?,
            }
        }
    }

    Ok(processed)
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        format!("worker panicked: {message}")
    } else if let Some(message) = panic.downcast_ref::<String>() {
        format!("worker panicked: {message}")
    } else {
        "worker panicked".to_string()
    }
}

/// Feed items into a queue from a single producer, then forward the sentinel.
/// Returns the number of items sent, or `None` when cancelled first.
pub(crate) async fn feed<T, S>(
    cancel: &CancellationToken,
    output: &QueueSender<T>,
    mut items: S,
) -> Result<Option<usize>>
where
    S: Stream<Item = T> + Unpin,
{
    let mut sent = 0;
    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(None),
            item = items.next() => item,
        };
        let Some(item) = next else { break };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(None),
            result = output.send(item) => result?,
        }
        sent += 1;
    }

    tokio::select! {
        biased;
        _ = cancel.cancelled() => Ok(None),
        result = output.close() => result.map(|_| Some(sent)),
    }
}

/// Collect everything a queue delivers until its sentinel or cancellation
pub(crate) async fn collect<T>(cancel: &CancellationToken, input: &QueueReceiver<T>) -> Vec<T> {
    let mut collected = Vec::new();
    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            item = input.recv() => item,
        };
        match next {
            Some(item) => collected.push(item),
            None => break,
        }
    }
    collected
}

/// Wait for every task of a stage group, returning the first error
pub(crate) async fn join_all(tasks: &mut JoinSet<Result<()>>) -> Result<()> {
    let mut first_error = None;

    while let Some(joined) = tasks.join_next().await {
        let result = match joined {
            Ok(result) => result,
            Err(e) if e.is_cancelled() => Ok(()),
            Err(e) => Err(KgError::Other(anyhow::anyhow!("stage task failed: {e}"))),
        };
        if let Err(e) = result {
            first_error.get_or_insert(e);
        }
    }

    match first_error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}
