//! Completion primitive for one-way requests whose caller wants to observe
//! the outcome.
//!
//! The caller registers a token, attaches its id to the request and awaits
//! [`AsyncCorrelationToken::wait`]. The dispatcher completes the id once the
//! operation finishes. Completion is single-fire.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use dashmap::DashMap;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::operation::FaultResponse;

/// What the dispatcher reports for a correlated request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CorrelatedReply {
    /// The operation ran. `body` is present for reply operations.
    Completed {
        operation: String,
        body: Option<Bytes>,
    },
    Failed(FaultResponse),
}

/// Result of waiting on a token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CorrelationOutcome {
    Completed {
        operation: String,
        body: Option<Bytes>,
    },
    Failed(FaultResponse),
    TimedOut,
    Cancelled,
}

impl From<CorrelatedReply> for CorrelationOutcome {
    fn from(reply: CorrelatedReply) -> Self {
        match reply {
            CorrelatedReply::Completed { operation, body } => Self::Completed { operation, body },
            CorrelatedReply::Failed(fault) => Self::Failed(fault),
        }
    }
}

// ---------------------------------------------------------------------------
// ReplyCorrelator
// ---------------------------------------------------------------------------

/// Pending correlation ids and the senders that complete them.
#[derive(Debug, Default)]
pub struct ReplyCorrelator {
    pending: DashMap<Uuid, oneshot::Sender<CorrelatedReply>>,
}

impl ReplyCorrelator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a fresh correlation id.
    #[must_use]
    pub fn register(self: &Arc<Self>) -> AsyncCorrelationToken {
        let id = Uuid::new_v4();
        let (tx, rx) = oneshot::channel();
        self.pending.insert(id, tx);
        AsyncCorrelationToken {
            id,
            rx: Some(rx),
            cancel: CancellationToken::new(),
            correlator: Arc::clone(self),
        }
    }

    /// Completes `id`. Returns `false` if the id is unknown, was already
    /// completed, or its token is gone.
    pub fn complete(&self, id: Uuid, reply: CorrelatedReply) -> bool {
        match self.pending.remove(&id) {
            Some((_, tx)) => tx.send(reply).is_ok(),
            None => false,
        }
    }

    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    fn forget(&self, id: Uuid) {
        self.pending.remove(&id);
    }
}

// ---------------------------------------------------------------------------
// AsyncCorrelationToken
// ---------------------------------------------------------------------------

/// Caller-side handle for one correlated request. Dropping it unregisters
/// the id.
#[derive(Debug)]
pub struct AsyncCorrelationToken {
    id: Uuid,
    rx: Option<oneshot::Receiver<CorrelatedReply>>,
    cancel: CancellationToken,
    correlator: Arc<ReplyCorrelator>,
}

impl AsyncCorrelationToken {
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// A handle that cancels this token's wait from elsewhere.
    #[must_use]
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Waits for completion, cancellation or `timeout`, whichever is first.
    pub async fn wait(mut self, timeout: Duration) -> CorrelationOutcome {
        let Some(mut rx) = self.rx.take() else {
            return CorrelationOutcome::Cancelled;
        };

        tokio::select! {
            biased;
            () = self.cancel.cancelled() => CorrelationOutcome::Cancelled,
            reply = &mut rx => match reply {
                Ok(reply) => reply.into(),
                Err(_) => CorrelationOutcome::Cancelled,
            },
            () = tokio::time::sleep(timeout) => CorrelationOutcome::TimedOut,
        }
    }
}

impl Drop for AsyncCorrelationToken {
    fn drop(&mut self) {
        self.correlator.forget(self.id);
    }
}
