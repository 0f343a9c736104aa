//! Bounded ingestion queue between the webhook boundary and the workflow.
//!
//! The enqueue side is cheap, non-blocking, and may be called from any
//! number of request handlers; a full queue rejects immediately so the
//! boundary can answer "busy, retry later". Exactly one consumer task
//! dequeues and runs the orchestrator to completion before looking at the
//! next event. That single consumer is the invariant that makes the
//! shared working tree safe: no lock guards it, only this design does.
//!
//! Queued events are not durable. On shutdown the in-flight event is
//! finished and everything still queued is dropped.

use tokio::sync::{mpsc, watch};
use tracing::{error, info};

use crate::errors::EnqueueError;
use crate::workflow::{Orchestrator, TriggerEvent, WorkflowOutcome};

/// Fixed queue capacity; enqueue rejects once this many events are
/// pending and unconsumed.
pub const QUEUE_CAPACITY: usize = 100;

/// Cloneable enqueue handle held by the webhook boundary.
#[derive(Clone)]
pub struct IngestionQueue {
    tx: mpsc::Sender<TriggerEvent>,
}

/// Build a queue and its receiving end for the consumer loop.
pub fn channel(capacity: usize) -> (IngestionQueue, mpsc::Receiver<TriggerEvent>) {
    let (tx, rx) = mpsc::channel(capacity);
    (IngestionQueue { tx }, rx)
}

impl IngestionQueue {
    /// Hand an event to the consumer without blocking. `Ok` means the
    /// event is queued; there is no further feedback about its outcome.
    pub fn enqueue(&self, event: TriggerEvent) -> Result<(), EnqueueError> {
        self.tx.try_send(event).map_err(|err| match err {
            mpsc::error::TrySendError::Full(_) => EnqueueError::QueueSaturated,
            mpsc::error::TrySendError::Closed(_) => EnqueueError::ConsumerGone,
        })
    }
}

/// The single consumer loop. Runs until the shutdown signal flips or the
/// last enqueue handle is dropped; the event being processed when the
/// signal arrives is finished first, queued events are discarded.
///
/// Individual workflow failures are logged here and never end the loop.
pub async fn run_consumer(
    mut rx: mpsc::Receiver<TriggerEvent>,
    orchestrator: Orchestrator,
    mut shutdown: watch::Receiver<bool>,
) {
    info!("ingestion consumer started");
    loop {
        tokio::select! {
            // Check shutdown first so a saturated queue cannot starve it.
            biased;
            _ = shutdown.changed() => {
                info!("ingestion consumer shutting down");
                break;
            }
            maybe_event = rx.recv() => {
                let Some(event) = maybe_event else {
                    info!("all enqueue handles dropped; consumer exiting");
                    break;
                };
                match orchestrator.process(event).await {
                    Ok(WorkflowOutcome::Completed { pr_url, generated, .. }) => {
                        info!(pr_url = %pr_url, generated, "event processed");
                    }
                    Ok(WorkflowOutcome::Skipped(reason)) => {
                        info!(reason = ?reason, "event skipped");
                    }
                    Err(err) => {
                        // Reported once; the event is discarded, not retried.
                        error!(error = ?err, "workflow failed");
                    }
                }
            }
        }
    }
}
