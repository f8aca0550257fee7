use bytes::Bytes;
use uuid::Uuid;

use crate::content::MessageBody;

/// The unit of work flowing through the pipeline.
///
/// Identity is stable for the duration of one pipeline pass. The body is a
/// shared handle; interception holds a clone of the handle for one scan
/// cycle and never takes ownership of the item itself.
#[derive(Clone)]
pub struct MailItem {
    id: Uuid,
    body: MessageBody,
}

impl MailItem {
    pub fn new(content: impl Into<Bytes>) -> Self {
        Self::with_body(MessageBody::new(content.into()))
    }

    pub fn with_body(body: MessageBody) -> Self {
        Self {
            id: Uuid::new_v4(),
            body,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn body(&self) -> &MessageBody {
        &self.body
    }
}
