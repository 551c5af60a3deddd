use std::collections::HashMap;

use nanoid::nanoid;

use crate::api::ChatRequest;
use crate::models::{Source, StreamEvent, ToolPhase, UiMessage};

/// Request lifecycle of the web client.
///
/// `Ready -> Submitted -> Streaming -> Ready`; `Error` is entered from any
/// busy state and accepts a new submission like `Ready`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatStatus {
    Ready,
    Submitted,
    Streaming,
    Error(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ToolStatus {
    #[default]
    None,
    Searching {
        query: Option<String>,
    },
    Complete,
}

/// Client-side chat state driven by the server's event stream.
#[derive(Debug)]
pub struct ChatSession {
    messages: Vec<UiMessage>,
    status: ChatStatus,
    tool_status: ToolStatus,
    /// Sources per assistant message id.
    sources: HashMap<String, Vec<Source>>,
    /// Assistant message currently receiving deltas.
    streaming_id: Option<String>,
}

impl Default for ChatSession {
    fn default() -> Self {
        Self::new()
    }
}

impl ChatSession {
    pub fn new() -> Self {
        Self {
            messages: Vec::new(),
            status: ChatStatus::Ready,
            tool_status: ToolStatus::None,
            sources: HashMap::new(),
            streaming_id: None,
        }
    }

    pub fn messages(&self) -> &[UiMessage] {
        &self.messages
    }

    pub fn status(&self) -> &ChatStatus {
        &self.status
    }

    pub fn tool_status(&self) -> &ToolStatus {
        &self.tool_status
    }

    pub fn is_busy(&self) -> bool {
        matches!(self.status, ChatStatus::Submitted | ChatStatus::Streaming)
    }

    pub fn sources_for(&self, message_id: &str) -> &[Source] {
        self.sources
            .get(message_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Record a user message and build the request body for it.
    ///
    /// Returns `None` (and changes nothing) while a response is in flight or
    /// when `text` is blank.
    pub fn submit(&mut self, text: &str) -> Option<ChatRequest> {
        let text = text.trim();
        if self.is_busy() || text.is_empty() {
            return None;
        }

        self.messages.push(UiMessage::user(nanoid!(), text));
        self.status = ChatStatus::Submitted;
        self.tool_status = ToolStatus::None;
        self.streaming_id = None;

        Some(ChatRequest {
            messages: self.messages.clone(),
        })
    }

    pub fn apply(&mut self, event: StreamEvent) {
        match event {
            StreamEvent::Start { message_id } => {
                self.messages.push(UiMessage::assistant(message_id.clone()));
                self.streaming_id = Some(message_id);
                self.status = ChatStatus::Streaming;
            }
            StreamEvent::TextDelta { delta } => {
                let index = self.streaming_index();
                self.messages[index].push_text(&delta);
                self.status = ChatStatus::Streaming;
            }
            StreamEvent::ToolStatus { data } => {
                self.tool_status = match data.status {
                    ToolPhase::Searching => ToolStatus::Searching { query: data.query },
                    ToolPhase::Complete => ToolStatus::Complete,
                };
            }
            StreamEvent::Sources { data } => {
                if data.is_empty() {
                    return;
                }
                let index = self.streaming_index();
                let Some(id) = self.messages[index].id.clone() else {
                    return;
                };
                let entry = self.sources.entry(id).or_default();
                if entry.is_empty() {
                    *entry = data;
                }
            }
            StreamEvent::Error { error_text } => self.fail(error_text),
            StreamEvent::Finish => self.close(ChatStatus::Ready),
        }
    }

    /// Enter the error state, keeping every message received so far.
    pub fn fail(&mut self, message: impl Into<String>) {
        self.close(ChatStatus::Error(message.into()));
    }

    /// The response body ended; settle on `Ready` if nothing else did.
    pub fn end_of_stream(&mut self) {
        if self.is_busy() {
            self.close(ChatStatus::Ready);
        }
    }

    /// Resolve a `source:<index>` citation inside `message_id`.
    pub fn resolve_citation(&self, message_id: &str, index: usize) -> Option<&Source> {
        self.sources_for(message_id).get(index)
    }

    fn close(&mut self, status: ChatStatus) {
        // drop an assistant placeholder that never received text
        if let Some(id) = self.streaming_id.take() {
            if let Some(pos) = self
                .messages
                .iter()
                .rposition(|message| message.id.as_deref() == Some(id.as_str()))
            {
                if self.messages[pos].text().is_empty() {
                    self.messages.remove(pos);
                }
            }
        }
        self.tool_status = ToolStatus::None;
        self.status = status;
    }

    fn streaming_index(&mut self) -> usize {
        if let Some(id) = self.streaming_id.as_deref() {
            if let Some(pos) = self
                .messages
                .iter()
                .rposition(|message| message.id.as_deref() == Some(id))
            {
                return pos;
            }
        }

        let id = nanoid!();
        self.messages.push(UiMessage::assistant(id.clone()));
        self.streaming_id = Some(id);
        self.messages.len() - 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ToolStatusData;

    fn source(book: &str) -> Source {
        Source {
            id: Some("source-0".to_string()),
            book: book.to_string(),
            page: 3,
            score: 0.8,
            text: "passage".to_string(),
        }
    }

    fn start(session: &mut ChatSession, id: &str) {
        session.apply(StreamEvent::Start {
            message_id: id.to_string(),
        });
    }

    #[test]
    fn happy_path_walks_status_machine() {
        let mut session = ChatSession::new();

        let request = session.submit("What is patience?").expect("accepted");
        assert_eq!(request.messages.len(), 1);
        assert_eq!(session.status(), &ChatStatus::Submitted);

        start(&mut session, "m1");
        assert_eq!(session.status(), &ChatStatus::Streaming);

        session.apply(StreamEvent::searching("search_books", "patience"));
        assert_eq!(
            session.tool_status(),
            &ToolStatus::Searching {
                query: Some("patience".to_string())
            }
        );

        session.apply(StreamEvent::complete("search_books"));
        session.apply(StreamEvent::Sources {
            data: vec![source("Letters")],
        });
        session.apply(StreamEvent::TextDelta {
            delta: "It is [p. 3](source:0).".to_string(),
        });
        session.apply(StreamEvent::Finish);

        assert_eq!(session.status(), &ChatStatus::Ready);
        assert_eq!(session.tool_status(), &ToolStatus::None);
        assert_eq!(session.messages().len(), 2);
        assert_eq!(session.resolve_citation("m1", 0).map(|s| s.book.as_str()), Some("Letters"));
        assert!(session.resolve_citation("m1", 1).is_none());
    }

    #[test]
    fn submit_while_busy_is_noop() {
        let mut session = ChatSession::new();
        session.submit("first").expect("accepted");

        assert!(session.submit("second").is_none());
        assert_eq!(session.messages().len(), 1);

        start(&mut session, "m1");
        assert!(session.submit("third").is_none());
    }

    #[test]
    fn error_keeps_history_and_allows_resubmit() {
        let mut session = ChatSession::new();
        session.submit("first").expect("accepted");
        start(&mut session, "m1");
        session.apply(StreamEvent::TextDelta {
            delta: "partial".to_string(),
        });
        session.apply(StreamEvent::error("quota exceeded"));

        assert_eq!(
            session.status(),
            &ChatStatus::Error("quota exceeded".to_string())
        );
        assert_eq!(session.messages().len(), 2);

        assert!(session.submit("again").is_some());
        assert_eq!(session.messages().len(), 3);
    }

    #[test]
    fn empty_placeholder_is_dropped_on_error() {
        let mut session = ChatSession::new();
        session.submit("first").expect("accepted");
        start(&mut session, "m1");
        session.apply(StreamEvent::error("boom"));

        assert_eq!(session.messages().len(), 1);
    }

    #[test]
    fn first_non_empty_sources_win() {
        let mut session = ChatSession::new();
        session.submit("q").expect("accepted");
        start(&mut session, "m1");

        session.apply(StreamEvent::Sources { data: Vec::new() });
        session.apply(StreamEvent::Sources {
            data: vec![source("First")],
        });
        session.apply(StreamEvent::Sources {
            data: vec![source("Second")],
        });

        assert_eq!(session.sources_for("m1")[0].book, "First");
    }

    #[test]
    fn tool_status_without_query_deserializes() {
        let mut session = ChatSession::new();
        session.submit("q").expect("accepted");
        session.apply(StreamEvent::ToolStatus {
            data: ToolStatusData {
                status: ToolPhase::Searching,
                tool_name: "search_books".to_string(),
                query: None,
            },
        });
        assert_eq!(
            session.tool_status(),
            &ToolStatus::Searching { query: None }
        );
    }

    #[test]
    fn stream_end_without_finish_returns_to_ready() {
        let mut session = ChatSession::new();
        session.submit("q").expect("accepted");
        start(&mut session, "m1");
        session.apply(StreamEvent::TextDelta {
            delta: "answer".to_string(),
        });

        session.end_of_stream();

        assert_eq!(session.status(), &ChatStatus::Ready);
        assert_eq!(session.messages().len(), 2);
    }
}
