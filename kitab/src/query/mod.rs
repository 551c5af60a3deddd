//! One-shot query mode: answer a single question on stdout.
//!
//! Used as the terminal client's subprocess. Progress markers go to stderr
//! (`Thinking...`, `Searching: <query>`, `Generating...`); the answer goes to
//! stdout in one of two protocols:
//!
//! - `events`: one JSON [`StreamEvent`] per line.
//! - `sentinel`: raw answer text, then a `---SOURCES---` line, then a JSON
//!   array of sources.

use futures::StreamExt;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::chat::{history_messages, ChatRelay};
use crate::error::{KitabError, Result};
use crate::llm::ChatMessage;
use crate::models::{HistoryTurn, Source, StreamEvent, ToolPhase};

pub const SOURCES_SENTINEL: &str = "---SOURCES---";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum Protocol {
    #[default]
    Events,
    Sentinel,
}

impl Protocol {
    pub fn as_arg(&self) -> &'static str {
        match self {
            Self::Events => "events",
            Self::Sentinel => "sentinel",
        }
    }
}

#[derive(Debug, Clone)]
pub struct QueryOptions {
    pub question: String,
    pub stream: bool,
    pub protocol: Protocol,
    pub history: Vec<HistoryTurn>,
    /// Prior turns forwarded to the model, newest kept.
    pub history_turns: usize,
}

/// Parse the `--history` argument (`[{question, answer}, ...]`).
pub fn parse_history(raw: &str) -> Result<Vec<HistoryTurn>> {
    serde_json::from_str(raw)
        .map_err(|e| KitabError::Validation(format!("Invalid history JSON: {e}")))
}

/// Answer `options.question`, returning the process exit code.
///
/// Upstream failures reported by the relay are printed as `Error: <message>`
/// on `err` and yield exit code 1.
pub async fn run<O, E>(relay: &ChatRelay, options: QueryOptions, out: &mut O, err: &mut E) -> Result<i32>
where
    O: AsyncWrite + Unpin,
    E: AsyncWrite + Unpin,
{
    let question = options.question.trim();
    if question.is_empty() {
        return Err(KitabError::Validation("A question is required".to_string()));
    }

    let start = options.history.len().saturating_sub(options.history_turns);
    let mut messages = history_messages(&options.history[start..]);
    messages.push(ChatMessage::user(question));

    marker(err, "Thinking...").await?;

    let mut events = relay.stream(messages);
    let mut answer = String::new();
    let mut sources: Vec<Source> = Vec::new();

    while let Some(event) = events.next().await {
        match &event {
            StreamEvent::ToolStatus { data } => match data.status {
                ToolPhase::Searching => {
                    let query = data.query.as_deref().unwrap_or_default();
                    marker(err, &format!("Searching: {query}")).await?;
                }
                ToolPhase::Complete => marker(err, "Generating...").await?,
            },
            StreamEvent::TextDelta { delta } => answer.push_str(delta),
            StreamEvent::Sources { data } if sources.is_empty() => sources = data.clone(),
            _ => {}
        }

        if options.stream {
            match options.protocol {
                Protocol::Events => write_event(out, &event).await?,
                Protocol::Sentinel => {
                    if let StreamEvent::TextDelta { delta } = &event {
                        out.write_all(delta.as_bytes()).await?;
                        out.flush().await?;
                    }
                }
            }
        }

        if let StreamEvent::Error { error_text } = &event {
            marker(err, &format!("Error: {error_text}")).await?;
            return Ok(1);
        }
    }

    if !options.stream {
        write_summary(out, &answer, &sources).await?;
    } else if options.protocol == Protocol::Sentinel {
        let json = serde_json::to_string(&sources)?;
        out.write_all(format!("\n{SOURCES_SENTINEL}\n{json}\n").as_bytes())
            .await?;
        out.flush().await?;
    }

    Ok(0)
}

async fn marker<E: AsyncWrite + Unpin>(err: &mut E, text: &str) -> Result<()> {
    err.write_all(text.as_bytes()).await?;
    err.write_all(b"\n").await?;
    err.flush().await?;
    Ok(())
}

async fn write_event<O: AsyncWrite + Unpin>(out: &mut O, event: &StreamEvent) -> Result<()> {
    let mut line = serde_json::to_vec(event)?;
    line.push(b'\n');
    out.write_all(&line).await?;
    out.flush().await?;
    Ok(())
}

async fn write_summary<O: AsyncWrite + Unpin>(out: &mut O, answer: &str, sources: &[Source]) -> Result<()> {
    let mut text = format!("\nAnswer:\n{}\n", answer.trim());
    if !sources.is_empty() {
        text.push_str("\nSources:\n");
        for (i, source) in sources.iter().enumerate() {
            text.push_str(&format!("  {}. {}, p.{}\n", i + 1, source.book, source.page));
        }
    }
    out.write_all(text.as_bytes()).await?;
    out.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn history_argument_parses_turns() {
        let turns = parse_history(r#"[{"question":"q","answer":"a"}]"#).unwrap();
        assert_eq!(turns.len(), 1);
        assert_eq!(turns[0].answer, "a");
    }

    #[test]
    fn malformed_history_is_validation_error() {
        assert!(matches!(
            parse_history("[{"),
            Err(KitabError::Validation(_))
        ));
    }

    #[test]
    fn protocol_args_match_value_names() {
        use clap::ValueEnum;
        for protocol in [Protocol::Events, Protocol::Sentinel] {
            let value = protocol.to_possible_value().unwrap();
            assert_eq!(value.get_name(), protocol.as_arg());
        }
    }
}
