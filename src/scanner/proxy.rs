//! Opaque handle on one scan session with the external worker.

use std::sync::Arc;
use tracing::{debug, error, warn};
use uuid::Uuid;

use super::protocol::{decode_body, encode_body, ExportReply, ScanRequest, WorkerOp};
use super::{ScannerSession, ScannerTransport};
use crate::agent::CallbackToken;
use crate::error::ScanError;

/// Session handle for exactly one message. `begin_scan` consumes the proxy,
/// so reuse after dispatch is impossible by construction; a fresh proxy is
/// built per message.
pub struct ScannerProxy {
    transport: Arc<dyn ScannerTransport>,
    message_id: Uuid,
}

impl ScannerProxy {
    pub fn new(transport: Arc<dyn ScannerTransport>, message_id: Uuid) -> Self {
        Self {
            transport,
            message_id,
        }
    }

    /// Dispatch a scan. Non-blocking: on success the scan runs out of
    /// process and reports back through `callback`; the only synchronous
    /// failure is the worker being unreachable, which is distinct from any
    /// scan verdict.
    pub async fn begin_scan(self, callback: CallbackToken) -> Result<(), ScanError> {
        let mut session = self.transport.connect().await?;

        let request = ScanRequest::new(self.message_id, callback.id());
        if let Err(e) = session.send_request(&request).await {
            session.close().await;
            return Err(e);
        }

        tokio::spawn(pump(session, callback, self.message_id));
        Ok(())
    }
}

/// Serves worker ops against the agent's callback surface until the worker
/// hangs up. Errors on this path are logged and swallowed; whatever
/// happens, the cycle ends with a completion signal so the pipeline slot is
/// released on every exit path.
async fn pump(mut session: Box<dyn ScannerSession>, callback: CallbackToken, message_id: Uuid) {
    let mut done_signalled = false;

    loop {
        match session.next_op().await {
            Ok(Some(op)) => {
                if op.token() != callback.id() {
                    warn!(%message_id, "worker op with mismatched token ignored");
                    continue;
                }
                match op {
                    WorkerOp::Export { .. } => {
                        let body = callback.export_content().await.unwrap_or_default();
                        let reply = ExportReply {
                            body: encode_body(&body),
                        };
                        if let Err(e) = session.send_export(&reply).await {
                            error!(%message_id, "failed to send content to worker: {e}");
                            break;
                        }
                    }
                    WorkerOp::Replace { body, .. } => match decode_body(&body) {
                        Ok(bytes) => {
                            callback
                                .replace_content(Box::new(std::io::Cursor::new(bytes)))
                                .await;
                        }
                        Err(e) => {
                            warn!(%message_id, "undecodable replacement body ignored: {e}");
                        }
                    },
                    WorkerOp::Done { .. } => {
                        done_signalled = true;
                        callback.scan_completed().await;
                    }
                }
            }
            Ok(None) => {
                debug!(%message_id, "worker hung up");
                break;
            }
            Err(e) => {
                warn!(%message_id, "worker protocol error: {e}");
                break;
            }
        }
    }

    session.close().await;

    if !done_signalled {
        warn!(%message_id, "worker ended without completing, releasing slot anyway");
        callback.scan_completed().await;
    }
}
