//! Suspend/resume token for a parked pipeline slot.
//!
//! The pipeline side awaits [`Released`]; the callback side fulfills it
//! through [`ContinuationContext::complete`]. The one-shot channel makes the
//! single-fulfillment invariant structural: once the sender is consumed
//! there is nothing left to fire twice.

use dashmap::DashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::oneshot;
use tracing::{debug, error, warn, Span};
use uuid::Uuid;

use crate::error::ContinuationError;

/// Messages with a scan currently in flight. At most one live continuation
/// per message id.
#[derive(Default)]
pub struct InFlightRegistry {
    inner: DashMap<Uuid, ()>,
}

impl InFlightRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn register(&self, message_id: Uuid) -> bool {
        self.inner.insert(message_id, ()).is_none()
    }

    fn unregister(&self, message_id: Uuid) {
        self.inner.remove(&message_id);
    }

    pub fn contains(&self, message_id: Uuid) -> bool {
        self.inner.contains_key(&message_id)
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContinuationState {
    Idle,
    Suspended,
    Released,
}

impl ContinuationState {
    fn name(self) -> &'static str {
        match self {
            ContinuationState::Idle => "Idle",
            ContinuationState::Suspended => "Suspended",
            ContinuationState::Released => "Released",
        }
    }
}

/// Token representing "this message's processing is parked".
///
/// Lifecycle: `Idle -> Suspended` via [`acquire`](Self::acquire), then
/// `Suspended -> Released` exactly once via [`complete`](Self::complete).
/// `Released` is terminal. A context dropped while suspended releases the
/// slot anyway so the pipeline can never be parked forever by a lost token.
pub struct ContinuationContext {
    message_id: Uuid,
    state: ContinuationState,
    release_tx: Option<oneshot::Sender<()>>,
    span: Span,
    registry: Arc<InFlightRegistry>,
}

/// Future the pipeline slot awaits; resolves when the matching
/// [`ContinuationContext::complete`] fires.
pub struct Released {
    rx: oneshot::Receiver<()>,
}

impl Future for Released {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        // The sender side always fires, on completion or on drop of a
        // suspended context, so a closed-channel error still means released.
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(_) => Poll::Ready(()),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl ContinuationContext {
    /// Create an idle context for one message. Captures the current span as
    /// the ambient state restored by [`resume`](Self::resume).
    pub fn new(message_id: Uuid, registry: Arc<InFlightRegistry>) -> Self {
        Self {
            message_id,
            state: ContinuationState::Idle,
            release_tx: None,
            span: Span::current(),
            registry,
        }
    }

    pub fn message_id(&self) -> Uuid {
        self.message_id
    }

    pub fn state(&self) -> ContinuationState {
        self.state
    }

    /// `Idle -> Suspended`. Parks the message's pipeline slot and returns
    /// the future the slot must await. Fails if this message already has a
    /// scan in flight.
    pub fn acquire(&mut self) -> Result<Released, ContinuationError> {
        match self.state {
            ContinuationState::Idle => {
                if !self.registry.register(self.message_id) {
                    return Err(ContinuationError::AlreadySuspended(self.message_id));
                }
                let (tx, rx) = oneshot::channel();
                self.release_tx = Some(tx);
                self.state = ContinuationState::Suspended;
                debug!(message_id = %self.message_id, "pipeline slot suspended");
                Ok(Released { rx })
            }
            other => Err(ContinuationError::InvalidTransition {
                from: other.name(),
                to: "Suspended",
            }),
        }
    }

    /// `Suspended -> Suspended`. Restores the ambient state captured at
    /// construction; callers run callback-side work inside the returned
    /// span since the callback may arrive on a different execution context
    /// than the one that suspended.
    pub fn resume(&self) -> Result<Span, ContinuationError> {
        match self.state {
            ContinuationState::Suspended => Ok(self.span.clone()),
            other => Err(ContinuationError::InvalidTransition {
                from: other.name(),
                to: "Suspended",
            }),
        }
    }

    /// `Suspended -> Released`. Signals the pipeline that this message may
    /// continue. Exactly one completion releases the slot; a repeated call
    /// is ignored.
    pub fn complete(&mut self) -> Result<(), ContinuationError> {
        match self.state {
            ContinuationState::Suspended => {
                if let Some(tx) = self.release_tx.take() {
                    let _ = tx.send(());
                }
                self.registry.unregister(self.message_id);
                self.state = ContinuationState::Released;
                debug!(message_id = %self.message_id, "pipeline slot released");
                Ok(())
            }
            ContinuationState::Released => {
                warn!(
                    message_id = %self.message_id,
                    "duplicate completion ignored, slot already released"
                );
                Ok(())
            }
            ContinuationState::Idle => Err(ContinuationError::InvalidTransition {
                from: "Idle",
                to: "Released",
            }),
        }
    }
}

impl Drop for ContinuationContext {
    fn drop(&mut self) {
        if self.state == ContinuationState::Suspended {
            error!(
                message_id = %self.message_id,
                "continuation dropped while suspended, releasing pipeline slot"
            );
            if let Some(tx) = self.release_tx.take() {
                let _ = tx.send(());
            }
            self.registry.unregister(self.message_id);
        }
    }
}
