use crate::record::{ChatId, MessageId, MessageRef};
use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("chat request failed: {0}")]
pub struct ChatError(pub String);

/// Outgoing side of the chat bot. Texts are HTML formatted.
#[async_trait]
pub trait ChatInterface: Send + Sync {
    async fn send_reply(
        &self,
        chat_id: ChatId,
        reply_to: Option<MessageId>,
        text: &str,
    ) -> Result<MessageRef, ChatError>;

    async fn edit_message(&self, message: &MessageRef, text: &str) -> Result<(), ChatError>;

    async fn delete_message(&self, message: &MessageRef) -> Result<(), ChatError>;
}
