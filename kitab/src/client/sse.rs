use crate::api::DONE_MARKER;
use crate::models::StreamEvent;

#[derive(Debug, Clone, PartialEq)]
pub enum SsePayload {
    Event(StreamEvent),
    Done,
}

/// Interpret one data payload. Unknown or malformed payloads yield `None`.
pub fn parse_payload(data: &str) -> Option<SsePayload> {
    let data = data.trim();
    if data == DONE_MARKER {
        return Some(SsePayload::Done);
    }

    match serde_json::from_str::<StreamEvent>(data) {
        Ok(event) => Some(SsePayload::Event(event)),
        Err(error) => {
            tracing::debug!(error = %error, "Ignoring undecodable event payload");
            None
        }
    }
}
