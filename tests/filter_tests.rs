//! Spool filtering through the interception stage, end to end.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tempfile::TempDir;
use uuid::Uuid;

use scangate::commands;
use scangate::config::{Config, GatewayConfig, LoggingConfig, ScannerConfig};
use scangate::error::ScanError;
use scangate::scanner::protocol::{encode_body, ExportReply, ScanRequest, WorkerOp};
use scangate::scanner::{ScannerSession, ScannerTransport};
use tokio_test::assert_ok;

/// Worker double that rewrites every message to a fixed body.
struct RewritingTransport {
    replacement: &'static str,
}

#[async_trait]
impl ScannerTransport for RewritingTransport {
    async fn connect(&self) -> Result<Box<dyn ScannerSession>, ScanError> {
        Ok(Box::new(RewritingSession {
            replacement: self.replacement,
            token: None,
            step: 0,
        }))
    }
}

struct RewritingSession {
    replacement: &'static str,
    token: Option<Uuid>,
    step: usize,
}

#[async_trait]
impl ScannerSession for RewritingSession {
    async fn send_request(&mut self, request: &ScanRequest) -> Result<(), ScanError> {
        self.token = Some(request.token);
        Ok(())
    }

    async fn send_export(&mut self, _reply: &ExportReply) -> Result<(), ScanError> {
        Ok(())
    }

    async fn next_op(&mut self) -> Result<Option<WorkerOp>, ScanError> {
        let token = self.token.ok_or(ScanError::SessionClosed)?;
        self.step += 1;
        Ok(match self.step {
            1 => Some(WorkerOp::Replace {
                token,
                body: encode_body(self.replacement.as_bytes()),
            }),
            2 => Some(WorkerOp::Done { token }),
            _ => None,
        })
    }

    async fn close(&mut self) {}
}

fn config_for(spool: &TempDir, output: Option<&TempDir>) -> Config {
    Config {
        scanner: ScannerConfig {
            command: "unused-by-mock".to_string(),
            args: Vec::new(),
            env: HashMap::new(),
            working_directory: None,
        },
        gateway: GatewayConfig {
            spool_dir: spool.path().to_path_buf(),
            output_dir: output.map(|dir| dir.path().to_path_buf()),
            ..GatewayConfig::default()
        },
        logging: LoggingConfig::default(),
    }
}

#[tokio::test]
async fn test_filter_rewrites_spooled_messages_in_place() {
    let spool = TempDir::new().unwrap();
    std::fs::write(spool.path().join("msg-1.eml"), "Hello").unwrap();
    std::fs::write(spool.path().join("msg-2.eml"), "World").unwrap();

    let config = config_for(&spool, None);
    let transport = Arc::new(RewritingTransport {
        replacement: "Hello-CLEAN",
    });

    tokio_test::assert_ok!(commands::run_filter(config, transport).await);

    for name in ["msg-1.eml", "msg-2.eml"] {
        let content = std::fs::read_to_string(spool.path().join(name)).unwrap();
        assert_eq!(content, "Hello-CLEAN");
    }
}

#[tokio::test]
async fn test_filter_writes_to_output_dir_when_configured() {
    let spool = TempDir::new().unwrap();
    let output = TempDir::new().unwrap();
    std::fs::write(spool.path().join("msg.eml"), "Hello").unwrap();

    let config = config_for(&spool, Some(&output));
    let transport = Arc::new(RewritingTransport {
        replacement: "scrubbed",
    });

    tokio_test::assert_ok!(commands::run_filter(config, transport).await);

    // Original spool file untouched, rewritten copy in the output dir.
    let original = std::fs::read_to_string(spool.path().join("msg.eml")).unwrap();
    assert_eq!(original, "Hello");
    let filtered = std::fs::read_to_string(output.path().join("msg.eml")).unwrap();
    assert_eq!(filtered, "scrubbed");
}

#[tokio::test]
async fn test_filter_fails_on_missing_spool_dir() {
    let spool = TempDir::new().unwrap();
    let config = {
        let mut config = config_for(&spool, None);
        config.gateway.spool_dir = spool.path().join("does-not-exist");
        config
    };
    let transport = Arc::new(RewritingTransport { replacement: "x" });

    let result = commands::run_filter(config, transport).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_check_reports_unreachable_scanner() {
    struct Unreachable;

    #[async_trait]
    impl ScannerTransport for Unreachable {
        async fn connect(&self) -> Result<Box<dyn ScannerSession>, ScanError> {
            Err(ScanError::Unavailable("gone".to_string()))
        }
    }

    let spool = TempDir::new().unwrap();
    let config = config_for(&spool, None);

    let result = commands::run_check(config, Arc::new(Unreachable)).await;
    assert!(result.is_err());
}
