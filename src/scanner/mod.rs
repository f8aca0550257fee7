use async_trait::async_trait;
use std::sync::Arc;

use crate::error::ScanError;

pub mod process;
pub mod protocol;
pub mod proxy;

pub use proxy::ScannerProxy;

use protocol::{ExportReply, ScanRequest, WorkerOp};

/// Factory for sessions with the external scanner. One session is opened per
/// message and never reused across messages.
#[async_trait]
pub trait ScannerTransport: Send + Sync + 'static {
    async fn connect(&self) -> Result<Box<dyn ScannerSession>, ScanError>;
}

/// A session with exactly one worker instance.
#[async_trait]
pub trait ScannerSession: Send + 'static {
    /// Dispatch the scan request that opens the cycle.
    async fn send_request(&mut self, request: &ScanRequest) -> Result<(), ScanError>;

    /// Answer an `export` op with the current message body.
    async fn send_export(&mut self, reply: &ExportReply) -> Result<(), ScanError>;

    /// Next op pushed by the worker. `Ok(None)` when the worker hangs up.
    async fn next_op(&mut self) -> Result<Option<WorkerOp>, ScanError>;

    async fn close(&mut self);
}

pub fn create_transport(config: &crate::config::ScannerConfig) -> Arc<dyn ScannerTransport> {
    Arc::new(process::ProcessScannerTransport::new(config.clone()))
}
