//! Host-side driver for the interception stage.
//!
//! The real mail pipeline is an external collaborator; this is the thin
//! stage the binary and tests use to fire the arrival event and sit at the
//! suspension point until the slot is released.

use std::sync::Arc;
use tracing::error;

use crate::agent::InterceptAgentFactory;
use crate::error::Result;
use crate::message::MailItem;

pub struct PipelineStage {
    factory: Arc<InterceptAgentFactory>,
}

impl PipelineStage {
    pub fn new(factory: Arc<InterceptAgentFactory>) -> Self {
        Self { factory }
    }

    pub fn factory(&self) -> &Arc<InterceptAgentFactory> {
        &self.factory
    }

    /// Run one message through interception. Returns once the message's
    /// slot has been released; the body may have been rewritten in place.
    pub async fn process(&self, mail: &MailItem) -> Result<()> {
        let agent = self.factory.create_agent();
        match agent.on_message_arrived(mail).await {
            Ok(released) => {
                released.await;
                Ok(())
            }
            Err(e) => {
                // Interception never aborts message processing: log and let
                // the message continue with its original content.
                error!(
                    message_id = %mail.id(),
                    "interception failed, message passed through: {e}"
                );
                Ok(())
            }
        }
    }
}
