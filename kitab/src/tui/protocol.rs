//! Decoding of query subprocess output.

use std::sync::OnceLock;

use regex::Regex;

use crate::models::{Source, StreamEvent};
use crate::query::{Protocol, SOURCES_SENTINEL};

pub const GENERIC_FAILURE: &str = "An error occurred. Check your API key and quota.";

/// Legacy stdout format: answer text, `---SOURCES---`, JSON source array.
#[derive(Debug, Default)]
pub struct SentinelParser {
    stdout: String,
    sources: Vec<Source>,
}

impl SentinelParser {
    pub fn push(&mut self, chunk: &str) {
        self.stdout.push_str(chunk);

        if let Some((_, tail)) = self.stdout.split_once(SOURCES_SENTINEL) {
            // partial JSON is expected while the array is still arriving
            if let Ok(sources) = serde_json::from_str::<Vec<Source>>(tail.trim()) {
                self.sources = sources;
            }
        }
    }

    pub fn answer(&self) -> &str {
        match self.stdout.split_once(SOURCES_SENTINEL) {
            Some((head, _)) => head.trim(),
            None => self.stdout.trim(),
        }
    }

    pub fn sources(&self) -> &[Source] {
        &self.sources
    }

    pub fn is_empty(&self) -> bool {
        self.stdout.trim().is_empty()
    }
}

/// NDJSON [`StreamEvent`] decoder. Lines that fail to decode are skipped.
#[derive(Debug, Default)]
pub struct EventDecoder {
    pending: String,
    answer: String,
    sources: Vec<Source>,
    error: Option<String>,
    saw_output: bool,
}

impl EventDecoder {
    pub fn push(&mut self, chunk: &str) -> Vec<StreamEvent> {
        self.pending.push_str(chunk);

        let mut events = Vec::new();
        while let Some(pos) = self.pending.find('\n') {
            let line: String = self.pending.drain(..=pos).collect();
            if let Some(event) = self.decode_line(&line) {
                events.push(event);
            }
        }
        events
    }

    /// Decode a final line that arrived without a newline.
    pub fn finish(&mut self) -> Vec<StreamEvent> {
        let line = std::mem::take(&mut self.pending);
        self.decode_line(&line).into_iter().collect()
    }

    pub fn answer(&self) -> &str {
        self.answer.trim()
    }

    pub fn sources(&self) -> &[Source] {
        &self.sources
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn is_empty(&self) -> bool {
        !self.saw_output
    }

    fn decode_line(&mut self, line: &str) -> Option<StreamEvent> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }
        self.saw_output = true;

        let event = match serde_json::from_str::<StreamEvent>(line) {
            Ok(event) => event,
            Err(error) => {
                tracing::debug!(error = %error, "Skipping undecodable output line");
                return None;
            }
        };

        match &event {
            StreamEvent::TextDelta { delta } => self.answer.push_str(delta),
            StreamEvent::Sources { data } if self.sources.is_empty() => self.sources = data.clone(),
            StreamEvent::Error { error_text } => self.error = Some(error_text.clone()),
            _ => {}
        }
        Some(event)
    }
}

#[derive(Debug)]
pub enum OutputParser {
    Sentinel(SentinelParser),
    Events(EventDecoder),
}

impl OutputParser {
    pub fn new(protocol: Protocol) -> Self {
        match protocol {
            Protocol::Events => Self::Events(EventDecoder::default()),
            Protocol::Sentinel => Self::Sentinel(SentinelParser::default()),
        }
    }

    pub fn protocol(&self) -> Protocol {
        match self {
            Self::Sentinel(_) => Protocol::Sentinel,
            Self::Events(_) => Protocol::Events,
        }
    }

    /// Feed stdout text; returns decoded events (always empty for sentinel).
    pub fn push(&mut self, chunk: &str) -> Vec<StreamEvent> {
        match self {
            Self::Sentinel(parser) => {
                parser.push(chunk);
                Vec::new()
            }
            Self::Events(decoder) => decoder.push(chunk),
        }
    }

    pub fn finish(&mut self) -> Vec<StreamEvent> {
        match self {
            Self::Sentinel(_) => Vec::new(),
            Self::Events(decoder) => decoder.finish(),
        }
    }

    pub fn answer(&self) -> &str {
        match self {
            Self::Sentinel(parser) => parser.answer(),
            Self::Events(decoder) => decoder.answer(),
        }
    }

    pub fn sources(&self) -> &[Source] {
        match self {
            Self::Sentinel(parser) => parser.sources(),
            Self::Events(decoder) => decoder.sources(),
        }
    }

    pub fn reported_error(&self) -> Option<&str> {
        match self {
            Self::Sentinel(_) => None,
            Self::Events(decoder) => decoder.error(),
        }
    }

    pub fn stdout_is_empty(&self) -> bool {
        match self {
            Self::Sentinel(parser) => parser.is_empty(),
            Self::Events(decoder) => decoder.is_empty(),
        }
    }
}

/// Decide whether a finished subprocess failed, and with what message.
///
/// An `error` event wins. Otherwise a non-zero (or missing) exit code fails,
/// and for the sentinel protocol so does empty stdout with `Error` on
/// stderr. The message is scraped from stderr, falling back to
/// [`GENERIC_FAILURE`].
pub fn classify_exit(parser: &OutputParser, code: Option<i32>, stderr: &str) -> Option<String> {
    if let Some(message) = parser.reported_error() {
        return Some(message.to_string());
    }

    let failed = code != Some(0)
        || (parser.protocol() == Protocol::Sentinel
            && parser.stdout_is_empty()
            && stderr.contains("Error"));

    failed.then(|| error_message(stderr))
}

fn error_message(stderr: &str) -> String {
    static ERROR_LINE: OnceLock<Regex> = OnceLock::new();
    static QUOTA: OnceLock<Regex> = OnceLock::new();

    let error_line =
        ERROR_LINE.get_or_init(|| Regex::new(r"(?i)Error.*?:.*").expect("error pattern is valid"));
    let quota = QUOTA.get_or_init(|| {
        Regex::new(r"(?i)(RateLimitError|insufficient_quota|exceeded.*quota)")
            .expect("quota pattern is valid")
    });

    error_line
        .find(stderr)
        .or_else(|| quota.find(stderr))
        .map(|m| m.as_str().trim().to_string())
        .unwrap_or_else(|| GENERIC_FAILURE.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const SOURCES_JSON: &str = r#"[{"book":"B","page":2,"score":0.9,"text":"y"}]"#;

    #[test]
    fn sentinel_splits_answer_and_sources() {
        let mut parser = SentinelParser::default();
        parser.push(&format!("Hello\n---SOURCES---\n{SOURCES_JSON}"));

        assert_eq!(parser.answer(), "Hello");
        assert_eq!(parser.sources().len(), 1);
        assert_eq!(parser.sources()[0].book, "B");
        assert_eq!(parser.sources()[0].id, None);
    }

    #[test]
    fn sentinel_answer_streams_before_marker() {
        let mut parser = SentinelParser::default();
        parser.push("Hel");
        parser.push("lo wor");

        assert_eq!(parser.answer(), "Hello wor");
        assert!(parser.sources().is_empty());
    }

    #[test]
    fn truncated_json_keeps_last_parsed_sources() {
        let mut parser = SentinelParser::default();
        parser.push(&format!("Hello\n---SOURCES---\n{SOURCES_JSON}"));
        parser.push("\n[{\"book\":");

        assert_eq!(parser.sources().len(), 1);

        let mut partial = SentinelParser::default();
        partial.push("Hi\n---SOURCES---\n[{\"book\":\"B\",\"pa");
        assert!(partial.sources().is_empty());
        assert_eq!(partial.answer(), "Hi");
    }

    #[test]
    fn event_decoder_handles_split_lines_and_garbage() {
        let mut decoder = EventDecoder::default();

        let first = decoder.push("{\"type\":\"text-delta\",\"delta\":\"Hel");
        assert!(first.is_empty());

        let events = decoder.push("lo\"}\nnot json\n{\"type\":\"finish\"}\n");
        assert_eq!(events.len(), 2);
        assert_eq!(decoder.answer(), "Hello");
        assert_eq!(events[1], StreamEvent::Finish);
    }

    #[test]
    fn error_event_takes_precedence_over_stderr() {
        let mut parser = OutputParser::new(Protocol::Events);
        parser.push("{\"type\":\"error\",\"errorText\":\"LLM rate limit exceeded\"}\n");

        assert_eq!(
            classify_exit(&parser, Some(1), "Error: something else"),
            Some("LLM rate limit exceeded".to_string())
        );
    }

    #[test]
    fn nonzero_exit_scrapes_error_line() {
        let parser = OutputParser::new(Protocol::Sentinel);
        let stderr = "Thinking...\nopenai.AuthenticationError: Incorrect API key provided\n";

        assert_eq!(
            classify_exit(&parser, Some(1), stderr),
            Some("Error: Incorrect API key provided".to_string())
        );
    }

    #[test]
    fn quota_marker_is_recognized() {
        let parser = OutputParser::new(Protocol::Sentinel);
        assert_eq!(
            classify_exit(&parser, Some(1), "insufficient_quota"),
            Some("insufficient_quota".to_string())
        );
    }

    #[test]
    fn unknown_failure_uses_generic_message() {
        let parser = OutputParser::new(Protocol::Sentinel);
        assert_eq!(
            classify_exit(&parser, None, "segfault"),
            Some(GENERIC_FAILURE.to_string())
        );
    }

    #[test]
    fn empty_stdout_with_error_marker_fails_for_sentinel_only() {
        let sentinel = OutputParser::new(Protocol::Sentinel);
        assert!(classify_exit(&sentinel, Some(0), "Error: boom").is_some());

        let events = OutputParser::new(Protocol::Events);
        assert!(classify_exit(&events, Some(0), "Error: boom").is_none());
    }

    #[test]
    fn clean_exit_is_success() {
        let mut parser = OutputParser::new(Protocol::Sentinel);
        parser.push("Answer\n---SOURCES---\n[]\n");
        assert_eq!(classify_exit(&parser, Some(0), "Thinking...\nGenerating..."), None);
    }
}
