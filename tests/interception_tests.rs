//! Full-cycle interception tests driven through scripted scanner sessions.

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::{sleep, timeout};
use uuid::Uuid;

use scangate::agent::InterceptAgentFactory;
use scangate::error::{ContinuationError, GatewayError, ScanError};
use scangate::message::MailItem;
use scangate::metrics::Metrics;
use scangate::pipeline::PipelineStage;
use scangate::scanner::protocol::{decode_body, encode_body, ExportReply, ScanRequest, WorkerOp};
use scangate::scanner::{ScannerSession, ScannerTransport};

/// One step of a scripted worker.
#[derive(Clone)]
enum ScriptStep {
    Export,
    Replace(&'static str),
    Done,
    DoneWithToken(Uuid),
}

/// Transport whose sessions replay a fixed op script, materializing the
/// token learned from the dispatch line.
struct ScriptedTransport {
    script: Vec<ScriptStep>,
    exports: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl ScriptedTransport {
    fn new(script: Vec<ScriptStep>) -> Self {
        Self {
            script,
            exports: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

#[async_trait]
impl ScannerTransport for ScriptedTransport {
    async fn connect(&self) -> Result<Box<dyn ScannerSession>, ScanError> {
        Ok(Box::new(ScriptedSession {
            token: None,
            steps: self.script.clone().into_iter(),
            exports: self.exports.clone(),
        }))
    }
}

struct ScriptedSession {
    token: Option<Uuid>,
    steps: std::vec::IntoIter<ScriptStep>,
    exports: Arc<Mutex<Vec<Vec<u8>>>>,
}

#[async_trait]
impl ScannerSession for ScriptedSession {
    async fn send_request(&mut self, request: &ScanRequest) -> Result<(), ScanError> {
        self.token = Some(request.token);
        Ok(())
    }

    async fn send_export(&mut self, reply: &ExportReply) -> Result<(), ScanError> {
        let body = decode_body(&reply.body)?;
        self.exports.lock().unwrap().push(body);
        Ok(())
    }

    async fn next_op(&mut self) -> Result<Option<WorkerOp>, ScanError> {
        let token = self.token.ok_or(ScanError::SessionClosed)?;
        Ok(self.steps.next().map(|step| match step {
            ScriptStep::Export => WorkerOp::Export { token },
            ScriptStep::Replace(body) => WorkerOp::Replace {
                token,
                body: encode_body(body.as_bytes()),
            },
            ScriptStep::Done => WorkerOp::Done { token },
            ScriptStep::DoneWithToken(token) => WorkerOp::Done { token },
        }))
    }

    async fn close(&mut self) {}
}

/// Transport that can never reach a worker.
struct UnreachableTransport;

#[async_trait]
impl ScannerTransport for UnreachableTransport {
    async fn connect(&self) -> Result<Box<dyn ScannerSession>, ScanError> {
        Err(ScanError::Unavailable("no scanner here".to_string()))
    }
}

/// Transport whose worker holds the scan open until released by the test.
struct HoldingTransport {
    release: Arc<Notify>,
}

#[async_trait]
impl ScannerTransport for HoldingTransport {
    async fn connect(&self) -> Result<Box<dyn ScannerSession>, ScanError> {
        Ok(Box::new(HoldingSession {
            release: self.release.clone(),
            token: None,
            released: false,
        }))
    }
}

struct HoldingSession {
    release: Arc<Notify>,
    token: Option<Uuid>,
    released: bool,
}

#[async_trait]
impl ScannerSession for HoldingSession {
    async fn send_request(&mut self, request: &ScanRequest) -> Result<(), ScanError> {
        self.token = Some(request.token);
        Ok(())
    }

    async fn send_export(&mut self, _reply: &ExportReply) -> Result<(), ScanError> {
        Ok(())
    }

    async fn next_op(&mut self) -> Result<Option<WorkerOp>, ScanError> {
        if self.released {
            return Ok(None);
        }
        self.release.notified().await;
        self.released = true;
        let token = self.token.ok_or(ScanError::SessionClosed)?;
        Ok(Some(WorkerOp::Done { token }))
    }

    async fn close(&mut self) {}
}

fn stage_with(transport: Arc<dyn ScannerTransport>) -> (Arc<PipelineStage>, Arc<Metrics>) {
    let metrics = Arc::new(Metrics::new());
    let factory = Arc::new(InterceptAgentFactory::new(transport, metrics.clone(), 4096));
    (Arc::new(PipelineStage::new(factory)), metrics)
}

async fn wait_for(condition: impl Fn() -> bool) {
    for _ in 0..100 {
        if condition() {
            return;
        }
        sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

#[tokio::test]
async fn test_fail_open_when_scanner_unreachable() {
    let (stage, metrics) = stage_with(Arc::new(UnreachableTransport));
    let mail = MailItem::new("Hello");

    // Completion is synchronous on dispatch failure: no suspension leak.
    timeout(Duration::from_secs(2), stage.process(&mail))
        .await
        .expect("pipeline stayed suspended")
        .unwrap();

    assert_eq!(mail.body().bytes(), Bytes::from_static(b"Hello"));
    assert_eq!(metrics.fail_open_total.get(), 1);
    assert!(stage.factory().registry().is_empty());
}

#[tokio::test]
async fn test_replace_round_trip() {
    let transport = Arc::new(ScriptedTransport::new(vec![
        ScriptStep::Replace("Hello-CLEAN"),
        ScriptStep::Done,
    ]));
    let (stage, metrics) = stage_with(transport);
    let mail = MailItem::new("Hello");

    timeout(Duration::from_secs(2), stage.process(&mail))
        .await
        .expect("pipeline stayed suspended")
        .unwrap();

    assert_eq!(mail.body().bytes(), Bytes::from_static(b"Hello-CLEAN"));
    assert_eq!(metrics.content_swaps_total.get(), 1);
    assert_eq!(metrics.fail_open_total.get(), 0);
    assert!(stage.factory().registry().is_empty());
    assert_eq!(mail.body().open_streams(), 0);
}

#[tokio::test]
async fn test_worker_pulls_content_before_replacing() {
    let transport = Arc::new(ScriptedTransport::new(vec![
        ScriptStep::Export,
        ScriptStep::Replace("Hello-CLEAN"),
        ScriptStep::Done,
    ]));
    let exports = transport.exports.clone();
    let (stage, _metrics) = stage_with(transport);
    let mail = MailItem::new("Hello");

    timeout(Duration::from_secs(2), stage.process(&mail))
        .await
        .expect("pipeline stayed suspended")
        .unwrap();

    assert_eq!(*exports.lock().unwrap(), vec![b"Hello".to_vec()]);
    assert_eq!(mail.body().bytes(), Bytes::from_static(b"Hello-CLEAN"));
}

#[tokio::test]
async fn test_duplicate_completion_is_ignored() {
    let transport = Arc::new(ScriptedTransport::new(vec![
        ScriptStep::Done,
        ScriptStep::Done,
    ]));
    let (stage, metrics) = stage_with(transport);
    let mail = MailItem::new("Hello");

    timeout(Duration::from_secs(2), stage.process(&mail))
        .await
        .expect("pipeline stayed suspended")
        .unwrap();

    // The second done is served by the pump after the slot is released.
    wait_for(|| metrics.duplicate_callbacks_total.get() == 1).await;
    assert_eq!(mail.body().bytes(), Bytes::from_static(b"Hello"));
    assert!(stage.factory().registry().is_empty());
}

#[tokio::test]
async fn test_worker_hangup_without_done_still_releases() {
    let transport = Arc::new(ScriptedTransport::new(Vec::new()));
    let (stage, metrics) = stage_with(transport);
    let mail = MailItem::new("Hello");

    timeout(Duration::from_secs(2), stage.process(&mail))
        .await
        .expect("pipeline stayed suspended")
        .unwrap();

    assert_eq!(mail.body().bytes(), Bytes::from_static(b"Hello"));
    assert_eq!(metrics.content_swaps_total.get(), 0);
    assert!(stage.factory().registry().is_empty());
}

#[tokio::test]
async fn test_mismatched_token_op_is_ignored() {
    let transport = Arc::new(ScriptedTransport::new(vec![
        ScriptStep::DoneWithToken(Uuid::new_v4()),
        ScriptStep::Done,
    ]));
    let (stage, metrics) = stage_with(transport);
    let mail = MailItem::new("Hello");

    timeout(Duration::from_secs(2), stage.process(&mail))
        .await
        .expect("pipeline stayed suspended")
        .unwrap();

    assert_eq!(metrics.duplicate_callbacks_total.get(), 0);
    assert!(stage.factory().registry().is_empty());
}

#[tokio::test]
async fn test_second_scan_for_in_flight_message_is_rejected() {
    let release = Arc::new(Notify::new());
    let transport = Arc::new(HoldingTransport {
        release: release.clone(),
    });
    let (stage, _metrics) = stage_with(transport);
    let mail = MailItem::new("Hello");

    let stage_clone = stage.clone();
    let mail_clone = mail.clone();
    let slot = tokio::spawn(async move { stage_clone.process(&mail_clone).await });

    let registry = stage.factory().registry().clone();
    let id = mail.id();
    wait_for(move || registry.contains(id)).await;

    // A second arrival event for the same message must not double-suspend.
    let agent = stage.factory().create_agent();
    let result = agent.on_message_arrived(&mail).await;
    assert!(matches!(
        result,
        Err(GatewayError::Continuation(
            ContinuationError::AlreadySuspended(id)
        )) if id == mail.id()
    ));

    release.notify_one();
    timeout(Duration::from_secs(2), slot)
        .await
        .expect("pipeline stayed suspended")
        .unwrap()
        .unwrap();
    assert!(stage.factory().registry().is_empty());
}

#[tokio::test]
async fn test_sequential_messages_each_get_their_own_cycle() {
    let transport = Arc::new(ScriptedTransport::new(vec![
        ScriptStep::Replace("clean"),
        ScriptStep::Done,
    ]));
    let (stage, metrics) = stage_with(transport);

    for original in ["first", "second", "third"] {
        let mail = MailItem::new(original);
        timeout(Duration::from_secs(2), stage.process(&mail))
            .await
            .expect("pipeline stayed suspended")
            .unwrap();
        assert_eq!(mail.body().bytes(), Bytes::from_static(b"clean"));
    }

    assert_eq!(metrics.messages_total.get(), 3);
    assert_eq!(metrics.content_swaps_total.get(), 3);
    assert!(stage.factory().registry().is_empty());
}
