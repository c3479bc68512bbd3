//! FIFO action queue and drain loop
//!
//! All submissions for a session funnel through one unbounded channel
//! drained by a single worker task: the only writer of the transaction
//! status. Items are processed strictly in arrival order with a small fixed
//! spacing between them; nothing is skipped or reordered. A caller can not
//! cancel an item once enqueued.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error};
use uuid::Uuid;

use crate::error::PipelineError;
use crate::observability::CorrelationId;
use crate::session::SessionState;
use crate::submitter::Submitter;
use crate::types::{ActionKind, ActionPayload, TransactionResult};

/// One queued submission request. Ephemeral: created when the request can
/// not be dispatched immediately, consumed exactly once by the drain loop,
/// never persisted.
pub struct QueueItem {
    pub id: Uuid,
    pub action: ActionKind,
    pub payload: ActionPayload,
    /// Attempt counter at enqueue time; the submitter numbers its own
    /// attempts from 1 when the item is dispatched.
    pub attempt: u32,
    reply: oneshot::Sender<TransactionResult>,
}

/// Handle for enqueueing submissions. The worker task lives as long as this
/// handle (and its clones) keep the channel open.
#[derive(Clone)]
pub struct ActionQueue {
    tx: mpsc::UnboundedSender<QueueItem>,
    state: Arc<SessionState>,
}

impl ActionQueue {
    /// Spawn the single-writer drain loop and return the queue handle.
    pub fn spawn(
        submitter: Arc<Submitter>,
        state: Arc<SessionState>,
        spacing: Duration,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(drain_loop(rx, submitter, state.clone(), spacing));
        Self { tx, state }
    }

    /// Enqueue a submission. The returned channel resolves with the terminal
    /// outcome once everything ahead of it has been processed.
    pub fn submit(
        &self,
        action: ActionKind,
        payload: ActionPayload,
    ) -> Result<oneshot::Receiver<TransactionResult>, PipelineError> {
        let (reply, receiver) = oneshot::channel();
        let item = QueueItem {
            id: Uuid::new_v4(),
            action,
            payload,
            attempt: 0,
            reply,
        };

        self.state.queued.fetch_add(1, Ordering::SeqCst);
        debug!(
            id = %item.id,
            action = %action,
            depth = self.state.queued_depth(),
            "action enqueued"
        );

        if self.tx.send(item).is_err() {
            self.state.queued.fetch_sub(1, Ordering::SeqCst);
            error!("queue worker is gone, rejecting submission");
            return Err(PipelineError::Busy("queue worker stopped".to_string()));
        }
        Ok(receiver)
    }

    /// Items waiting behind the in-flight submission.
    pub fn queued_depth(&self) -> usize {
        self.state.queued_depth()
    }
}

async fn drain_loop(
    mut rx: mpsc::UnboundedReceiver<QueueItem>,
    submitter: Arc<Submitter>,
    state: Arc<SessionState>,
    spacing: Duration,
) {
    while let Some(item) = rx.recv().await {
        let correlation = CorrelationId::new();
        state.begin_dispatch(item.action);
        debug!(
            correlation = %correlation,
            id = %item.id,
            action = %item.action,
            attempt = item.attempt,
            "dispatching action"
        );

        let result = match state.identity() {
            Some(identity) => {
                submitter
                    .send(&identity, item.action, &item.payload, &correlation)
                    .await
            }
            None => TransactionResult::failed(PipelineError::Identity(
                "no session identity".to_string(),
            )),
        };

        state.finish_dispatch(item.action, &result, submitter.base_fee(item.action));
        // Receiver may have been dropped; the terminal status is still
        // recorded in the session state.
        let _ = item.reply.send(result);

        // Anti-rate-limit spacing before draining the next item.
        tokio::time::sleep(spacing).await;
        if state.queued_depth() == 0 {
            state.set_idle();
        }
    }
    debug!("action queue channel closed, drain loop exiting");
}
