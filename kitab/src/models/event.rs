use serde::{Deserialize, Serialize};

use super::Source;

/// Lifecycle of one search tool call as reported to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ToolPhase {
    Searching,
    Complete,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ToolStatusData {
    pub status: ToolPhase,
    pub tool_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
}

/// Client-visible event emitted while answering one message.
///
/// Serialized as JSON tagged by `type`. The same envelope is used for the
/// HTTP event stream and for the query subprocess (one event per line).
///
/// ```json
/// {"type":"data-tool-status","data":{"status":"searching","toolName":"search_books","query":"..."}}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum StreamEvent {
    #[serde(rename = "start", rename_all = "camelCase")]
    Start { message_id: String },

    #[serde(rename = "text-delta")]
    TextDelta { delta: String },

    #[serde(rename = "data-tool-status")]
    ToolStatus { data: ToolStatusData },

    #[serde(rename = "data-sources")]
    Sources { data: Vec<Source> },

    #[serde(rename = "error", rename_all = "camelCase")]
    Error { error_text: String },

    #[serde(rename = "finish")]
    Finish,
}

impl StreamEvent {
    pub fn searching(tool_name: &str, query: &str) -> Self {
        Self::ToolStatus {
            data: ToolStatusData {
                status: ToolPhase::Searching,
                tool_name: tool_name.to_string(),
                query: Some(query.to_string()),
            },
        }
    }

    pub fn complete(tool_name: &str) -> Self {
        Self::ToolStatus {
            data: ToolStatusData {
                status: ToolPhase::Complete,
                tool_name: tool_name.to_string(),
                query: None,
            },
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            error_text: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn tool_status_wire_format() {
        let event = StreamEvent::searching("search_books", "meaning of patience");
        let value = serde_json::to_value(&event).expect("serialize");
        assert_eq!(
            value,
            json!({
                "type": "data-tool-status",
                "data": {"status": "searching", "toolName": "search_books", "query": "meaning of patience"}
            })
        );

        let complete = serde_json::to_value(StreamEvent::complete("search_books")).expect("serialize");
        assert!(complete["data"].get("query").is_none());
    }

    #[test]
    fn start_and_error_use_camel_case_fields() {
        let start = serde_json::to_value(StreamEvent::Start {
            message_id: "m1".to_string(),
        })
        .expect("serialize");
        assert_eq!(start, json!({"type": "start", "messageId": "m1"}));

        let error = serde_json::to_value(StreamEvent::error("boom")).expect("serialize");
        assert_eq!(error, json!({"type": "error", "errorText": "boom"}));
    }

    #[test]
    fn finish_parses_from_bare_tag() {
        let event: StreamEvent = serde_json::from_str(r#"{"type":"finish"}"#).expect("deserialize");
        assert_eq!(event, StreamEvent::Finish);
    }
}
