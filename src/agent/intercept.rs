//! The interception agent: glue state machine driving one message through a
//! full suspend/dispatch/resume cycle.
//!
//! The factory creates a fresh agent per message-arrival event; all mutable
//! per-message state lives in the request-scoped [`ScanCycle`], never in
//! fields shared across messages.

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use std::time::Instant;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::Mutex;
use tracing::{error, info_span, warn};
use uuid::Uuid;

use super::continuation::{ContinuationContext, ContinuationState, InFlightRegistry, Released};
use crate::content::MessageBody;
use crate::error::GatewayError;
use crate::message::MailItem;
use crate::metrics::Metrics;
use crate::scanner::{ScannerProxy, ScannerTransport};

/// The callback surface the worker drives, exposed to it through a
/// [`CallbackToken`]. The worker pushes content operations first, then
/// signals completion; the gateway never pulls.
#[async_trait]
pub trait ScanCallback: Send + Sync + 'static {
    /// Current message body for the worker to pull. `None` when the cycle
    /// is no longer live.
    async fn export_content(&self) -> Option<Bytes>;

    /// Install a full replacement body supplied by the worker.
    async fn replace_content(&self, new_body: Box<dyn AsyncRead + Send + Unpin>);

    /// Completion signal. Exactly one is accepted per cycle.
    async fn scan_completed(&self);

    /// Capability token authenticating ops for this cycle.
    fn token(&self) -> Uuid;
}

/// Capability handed to the scanner so it can reach back into the agent.
/// Authenticates exactly one scan cycle.
pub struct CallbackToken {
    cycle: Arc<dyn ScanCallback>,
}

impl CallbackToken {
    pub(crate) fn new(cycle: Arc<dyn ScanCallback>) -> Self {
        Self { cycle }
    }

    pub fn id(&self) -> Uuid {
        self.cycle.token()
    }

    pub(crate) async fn export_content(&self) -> Option<Bytes> {
        self.cycle.export_content().await
    }

    pub(crate) async fn replace_content(&self, new_body: Box<dyn AsyncRead + Send + Unpin>) {
        self.cycle.replace_content(new_body).await
    }

    pub(crate) async fn scan_completed(&self) {
        self.cycle.scan_completed().await
    }
}

/// Per-request context for one message's scan cycle. Owns the continuation
/// and a clone of the body handle; nothing here outlives the cycle.
struct ScanCycle {
    message_id: Uuid,
    token: Uuid,
    body: MessageBody,
    continuation: Mutex<ContinuationContext>,
    copy_chunk: usize,
    metrics: Arc<Metrics>,
    started: Instant,
}

#[async_trait]
impl ScanCallback for ScanCycle {
    async fn export_content(&self) -> Option<Bytes> {
        {
            let continuation = self.continuation.lock().await;
            if continuation.state() != ContinuationState::Suspended {
                warn!(
                    message_id = %self.message_id,
                    "content export requested with no live scan cycle"
                );
                return None;
            }
        }

        let mut reader = self.body.reader();
        let mut content = Vec::with_capacity(self.body.len());
        match reader.read_to_end(&mut content).await {
            Ok(_) => Some(Bytes::from(content)),
            Err(e) => {
                error!(message_id = %self.message_id, "content export failed: {e}");
                None
            }
        }
    }

    async fn replace_content(&self, new_body: Box<dyn AsyncRead + Send + Unpin>) {
        {
            let continuation = self.continuation.lock().await;
            if continuation.state() != ContinuationState::Suspended {
                warn!(
                    message_id = %self.message_id,
                    "replacement arrived with no live scan cycle, ignored"
                );
                return;
            }
        }

        // A swap failure is logged and swallowed: the message proceeds with
        // whatever content the failure left in place.
        match self.body.replace(new_body, self.copy_chunk).await {
            Ok(bytes) => {
                self.metrics.content_swaps_total.inc();
                tracing::debug!(
                    message_id = %self.message_id,
                    bytes,
                    "message content replaced"
                );
            }
            Err(e) => {
                self.metrics.swap_failures_total.inc();
                error!(message_id = %self.message_id, "content swap failed: {e}");
            }
        }
    }

    async fn scan_completed(&self) {
        let mut continuation = self.continuation.lock().await;
        match continuation.state() {
            ContinuationState::Suspended => {
                // Restore ambient state before the final transition; the
                // callback may run on a different execution context than
                // the one that suspended.
                let span = continuation.resume().ok();
                let _guard = span.as_ref().map(|s| s.enter());

                self.metrics
                    .scan_duration
                    .observe(self.started.elapsed().as_secs_f64());

                if let Err(e) = continuation.complete() {
                    error!(
                        message_id = %self.message_id,
                        "failed to release pipeline slot: {e}"
                    );
                }
            }
            ContinuationState::Released => {
                self.metrics.duplicate_callbacks_total.inc();
                warn!(
                    message_id = %self.message_id,
                    "late completion callback ignored, slot already released"
                );
            }
            ContinuationState::Idle => {
                warn!(
                    message_id = %self.message_id,
                    "completion callback with no suspension ignored"
                );
            }
        }
    }

    fn token(&self) -> Uuid {
        self.token
    }
}

/// Creates one [`InterceptAgent`] per message-arrival event. The factory is
/// the only shared object and holds no mutable state.
pub struct InterceptAgentFactory {
    transport: Arc<dyn ScannerTransport>,
    registry: Arc<InFlightRegistry>,
    metrics: Arc<Metrics>,
    copy_chunk: usize,
}

impl InterceptAgentFactory {
    pub fn new(
        transport: Arc<dyn ScannerTransport>,
        metrics: Arc<Metrics>,
        copy_chunk: usize,
    ) -> Self {
        Self {
            transport,
            registry: InFlightRegistry::new(),
            metrics,
            copy_chunk,
        }
    }

    pub fn create_agent(&self) -> InterceptAgent {
        InterceptAgent {
            transport: self.transport.clone(),
            registry: self.registry.clone(),
            metrics: self.metrics.clone(),
            copy_chunk: self.copy_chunk,
        }
    }

    pub fn registry(&self) -> &Arc<InFlightRegistry> {
        &self.registry
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }
}

/// Drives a single message through interception, then is gone.
pub struct InterceptAgent {
    transport: Arc<dyn ScannerTransport>,
    registry: Arc<InFlightRegistry>,
    metrics: Arc<Metrics>,
    copy_chunk: usize,
}

impl InterceptAgent {
    /// Message-arrival event handler. Suspends the message's pipeline slot,
    /// dispatches the scan, and returns the future the slot must await.
    ///
    /// Dispatch failure is fail-open: the slot is released immediately and
    /// the message proceeds with its original, unmodified content.
    pub async fn on_message_arrived(self, mail: &MailItem) -> Result<Released, GatewayError> {
        self.metrics.messages_total.inc();

        let span = info_span!("scan_cycle", message_id = %mail.id());
        let mut continuation =
            span.in_scope(|| ContinuationContext::new(mail.id(), self.registry.clone()));

        // Suspend strictly before dispatch.
        let released = continuation.acquire()?;

        let cycle = Arc::new(ScanCycle {
            message_id: mail.id(),
            token: Uuid::new_v4(),
            body: mail.body().clone(),
            continuation: Mutex::new(continuation),
            copy_chunk: self.copy_chunk,
            metrics: self.metrics.clone(),
            started: Instant::now(),
        });

        let proxy = ScannerProxy::new(self.transport.clone(), mail.id());
        self.metrics.scans_dispatched_total.inc();

        match proxy.begin_scan(CallbackToken::new(cycle.clone())).await {
            Ok(()) => Ok(released),
            Err(e) => {
                // Fail-open: inspection failure must not block mail flow.
                self.metrics.fail_open_total.inc();
                span.in_scope(|| warn!("scan dispatch failed, message passes unscanned: {e}"));

                let mut continuation = cycle.continuation.lock().await;
                if let Err(release_err) = continuation.complete() {
                    span.in_scope(|| error!("failed to release pipeline slot: {release_err}"));
                }
                Ok(released)
            }
        }
    }
}
