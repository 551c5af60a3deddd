use serde::{Deserialize, Serialize};

use crate::llm::ChatMessage;

/// One part of a chat message as exchanged with the web client.
///
/// Only `text` parts carry conversation content; other part types (tool
/// status, sources) are accepted and ignored by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, utoipa::ToSchema)]
pub struct MessagePart {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

impl MessagePart {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            kind: "text".to_string(),
            text: Some(text.into()),
        }
    }
}

/// A chat message in the web client's wire shape.
///
/// Content is read from `parts` when any text part is present, otherwise from
/// the flat `content` field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, utoipa::ToSchema)]
pub struct UiMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub role: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parts: Vec<MessagePart>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

impl UiMessage {
    pub fn user(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            role: "user".to_string(),
            parts: vec![MessagePart::text(text)],
            content: None,
        }
    }

    pub fn assistant(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            role: "assistant".to_string(),
            parts: Vec::new(),
            content: None,
        }
    }

    pub fn is_user(&self) -> bool {
        self.role == "user"
    }

    pub fn text(&self) -> String {
        let mut texts = self
            .parts
            .iter()
            .filter(|part| part.kind == "text")
            .filter_map(|part| part.text.as_deref())
            .peekable();

        if texts.peek().is_some() {
            texts.collect()
        } else {
            self.content.clone().unwrap_or_default()
        }
    }

    /// Append streamed text, extending the trailing text part when there is one.
    pub fn push_text(&mut self, delta: &str) {
        match self.parts.last_mut() {
            Some(MessagePart {
                kind,
                text: Some(text),
            }) if kind == "text" => text.push_str(delta),
            _ => self.parts.push(MessagePart::text(delta)),
        }
    }

    /// Model-facing form. Roles other than user/assistant are dropped.
    pub fn to_chat_message(&self) -> Option<ChatMessage> {
        match self.role.as_str() {
            "user" => Some(ChatMessage::user(self.text())),
            "assistant" => Some(ChatMessage::assistant(self.text())),
            _ => None,
        }
    }
}
