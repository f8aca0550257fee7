use std::sync::Arc;
use tokio::time::{timeout, Duration};
use tracing::{error, info};

use crate::agent::InterceptAgentFactory;
use crate::config::Config;
use crate::content::MessageBody;
use crate::error::{ConfigError, Result, ScanError};
use crate::message::MailItem;
use crate::metrics::Metrics;
use crate::pipeline::PipelineStage;
use crate::scanner::ScannerTransport;

/// Feed every message in the spool directory through the interception
/// stage, then write the post-scan content to the output directory (or back
/// in place when none is configured).
pub async fn run_filter(config: Config, transport: Arc<dyn ScannerTransport>) -> Result<()> {
    let metrics = Arc::new(Metrics::new());
    let factory = Arc::new(InterceptAgentFactory::new(
        transport,
        metrics.clone(),
        config.gateway.copy_chunk_bytes,
    ));
    let stage = PipelineStage::new(factory);

    let spool = &config.gateway.spool_dir;
    if !spool.is_dir() {
        return Err(ConfigError::Validation(format!(
            "Spool directory does not exist: {}",
            spool.display()
        ))
        .into());
    }

    if let Some(output_dir) = &config.gateway.output_dir {
        tokio::fs::create_dir_all(output_dir).await?;
    }

    let mut entries = tokio::fs::read_dir(spool).await?;
    let mut processed = 0usize;

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let Some(file_name) = path.file_name() else {
            continue;
        };

        let content = tokio::fs::read(&path).await?;
        let body = MessageBody::with_limit(content.into(), config.gateway.max_body_bytes);
        let mail = MailItem::with_body(body);

        info!(message_id = %mail.id(), file = %path.display(), "message arrived");
        stage.process(&mail).await?;

        let target = match &config.gateway.output_dir {
            Some(output_dir) => output_dir.join(file_name),
            None => path.clone(),
        };
        tokio::fs::write(&target, mail.body().bytes()).await?;
        processed += 1;
    }

    info!("Processed {processed} message(s)");
    info!("{}", metrics.summary());
    Ok(())
}

/// Validate the configuration and verify the scanner can be reached.
pub async fn run_check(config: Config, transport: Arc<dyn ScannerTransport>) -> Result<()> {
    info!("Checking configuration...");
    crate::config::validate(&config)?;
    info!("✓ Configuration is valid");

    info!(
        "Checking scanner: {} {}",
        config.scanner.command,
        config.scanner.args.join(" ")
    );

    match timeout(Duration::from_secs(10), transport.connect()).await {
        Ok(Ok(mut session)) => {
            session.close().await;
            info!("✓ Scanner reachable");
            Ok(())
        }
        Ok(Err(e)) => {
            error!("✗ Scanner unreachable: {e}");
            Err(e.into())
        }
        Err(_) => {
            error!("✗ Scanner connect timed out");
            Err(ScanError::Unavailable("connect timed out".to_string()).into())
        }
    }
}
