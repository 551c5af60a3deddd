use serde::{Deserialize, Serialize};

use crate::error::{KitabError, Result};
use crate::llm::ChatMessage;
use crate::models::UiMessage;

/// `POST /api/chat` request body.
#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
pub struct ChatRequest {
    #[serde(default)]
    pub messages: Vec<UiMessage>,
}

impl ChatRequest {
    /// Model-facing conversation; fails when no user message is present.
    pub fn to_history(&self) -> Result<Vec<ChatMessage>> {
        if !self.messages.iter().any(UiMessage::is_user) {
            return Err(KitabError::Validation("No user message found".to_string()));
        }

        Ok(self
            .messages
            .iter()
            .filter_map(UiMessage::to_chat_message)
            .collect())
    }
}
