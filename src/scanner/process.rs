//! Out-of-process scanner transport.
//!
//! Spawns the configured worker command with piped stdio and speaks the
//! newline-delimited JSON protocol over its stdin/stdout. Failure to spawn
//! or to deliver the dispatch line is reported as `ScanError::Unavailable`,
//! which callers treat as a synchronous dispatch failure.

use async_trait::async_trait;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::debug;

use super::protocol::{ExportReply, ScanRequest, WorkerOp};
use super::{ScannerSession, ScannerTransport};
use crate::config::ScannerConfig;
use crate::error::ScanError;

pub struct ProcessScannerTransport {
    config: ScannerConfig,
}

impl ProcessScannerTransport {
    pub fn new(config: ScannerConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl ScannerTransport for ProcessScannerTransport {
    async fn connect(&self) -> Result<Box<dyn ScannerSession>, ScanError> {
        let mut cmd = Command::new(&self.config.command);
        cmd.args(&self.config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true); // Prevent zombie workers

        for (key, value) in &self.config.env {
            cmd.env(key, value);
        }

        if let Some(ref dir) = self.config.working_directory {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn().map_err(|e| {
            ScanError::Unavailable(format!(
                "failed to spawn scanner '{}': {e}",
                self.config.command
            ))
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| ScanError::Unavailable("scanner stdin unavailable".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .map(BufReader::new)
            .ok_or_else(|| ScanError::Unavailable("scanner stdout unavailable".to_string()))?;

        Ok(Box::new(ProcessScannerSession {
            child,
            stdin: Some(stdin),
            stdout: Some(stdout),
        }))
    }
}

pub struct ProcessScannerSession {
    child: Child,
    stdin: Option<ChildStdin>,
    stdout: Option<BufReader<ChildStdout>>,
}

impl ProcessScannerSession {
    async fn write_line(&mut self, line: &str) -> Result<(), ScanError> {
        let stdin = self.stdin.as_mut().ok_or(ScanError::SessionClosed)?;

        stdin
            .write_all(line.as_bytes())
            .await
            .map_err(|e| ScanError::Unavailable(format!("failed to write to scanner: {e}")))?;
        stdin
            .write_all(b"\n")
            .await
            .map_err(|e| ScanError::Unavailable(format!("failed to write to scanner: {e}")))?;
        stdin
            .flush()
            .await
            .map_err(|e| ScanError::Unavailable(format!("failed to flush scanner stdin: {e}")))?;

        Ok(())
    }
}

#[async_trait]
impl ScannerSession for ProcessScannerSession {
    async fn send_request(&mut self, request: &ScanRequest) -> Result<(), ScanError> {
        let json = request.to_json()?;
        self.write_line(&json).await
    }

    async fn send_export(&mut self, reply: &ExportReply) -> Result<(), ScanError> {
        let json = reply.to_json()?;
        self.write_line(&json).await
    }

    async fn next_op(&mut self) -> Result<Option<WorkerOp>, ScanError> {
        let stdout = self.stdout.as_mut().ok_or(ScanError::SessionClosed)?;

        loop {
            let mut line = String::new();
            let n = stdout
                .read_line(&mut line)
                .await
                .map_err(|e| ScanError::Protocol(format!("failed to read from scanner: {e}")))?;

            if n == 0 {
                return Ok(None);
            }

            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            return WorkerOp::from_json(trimmed).map(Some);
        }
    }

    async fn close(&mut self) {
        self.stdin.take();
        self.stdout.take();
        if let Err(e) = self.child.kill().await {
            debug!("scanner process already gone: {e}");
        }
    }
}
