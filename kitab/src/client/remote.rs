use std::time::Duration;

use eventsource_stream::Eventsource;
use futures::StreamExt;
use reqwest::Client;
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};

use crate::api::ApiResponse;
use crate::error::{KitabError, Result};
use crate::models::StreamEvent;

use super::citation::{segments, Segment};
use super::session::{ChatSession, ChatStatus};
use super::sse::{parse_payload, SsePayload};

/// Drives a [`ChatSession`] against a running `kitab serve`.
pub struct RemoteChat {
    client: Client,
    endpoint: String,
    session: ChatSession,
}

impl RemoteChat {
    pub fn new(base_url: &str, timeout_secs: u64) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| KitabError::Internal(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint: format!("{}/api/chat", base_url.trim_end_matches('/')),
            session: ChatSession::new(),
        })
    }

    pub fn session(&self) -> &ChatSession {
        &self.session
    }

    /// Submit `question` and apply every streamed event to the session.
    ///
    /// `on_event` sees each event after it has been applied. Transport and
    /// HTTP failures put the session into its error state rather than
    /// returning `Err`; `Err` means the session was busy.
    pub async fn ask<F>(&mut self, question: &str, mut on_event: F) -> Result<()>
    where
        F: FnMut(&ChatSession, &StreamEvent),
    {
        let Some(request) = self.session.submit(question) else {
            return Err(KitabError::Validation(
                "A response is already in progress".to_string(),
            ));
        };

        let response = match self.client.post(&self.endpoint).json(&request).send().await {
            Ok(response) => response,
            Err(error) => {
                self.session.fail(format!("Request failed: {error}"));
                return Ok(());
            }
        };

        let status = response.status();
        if !status.is_success() {
            let message = response
                .json::<ApiResponse<serde_json::Value>>()
                .await
                .ok()
                .and_then(|envelope| envelope.error)
                .map(|error| error.message)
                .unwrap_or_else(|| format!("Server returned {status}"));
            self.session.fail(message);
            return Ok(());
        }

        let mut events = std::pin::pin!(response.bytes_stream().eventsource());

        while let Some(frame) = events.next().await {
            let frame = match frame {
                Ok(frame) => frame,
                Err(error) => {
                    self.session.fail(format!("Stream interrupted: {error}"));
                    return Ok(());
                }
            };

            match parse_payload(&frame.data) {
                Some(SsePayload::Done) => break,
                Some(SsePayload::Event(event)) => {
                    self.session.apply(event.clone());
                    on_event(&self.session, &event);
                }
                None => {}
            }
        }

        self.session.end_of_stream();
        Ok(())
    }
}

/// Line-mode chat loop over stdin/stdout.
///
/// `/source N` prints passage N of the last answer; `quit` exits.
pub async fn run_repl(base_url: &str, timeout_secs: u64) -> Result<()> {
    let mut chat = RemoteChat::new(base_url, timeout_secs)?;
    let mut stdout = tokio::io::stdout();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    stdout.write_all(b"Ask a question (quit to exit)\n> ").await?;
    stdout.flush().await?;

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if matches!(line, "quit" | "exit" | "q") {
            break;
        }

        if let Some(n) = line
            .strip_prefix("/source ")
            .or_else(|| line.strip_prefix("/s "))
        {
            print_source(&chat, n.trim(), &mut stdout).await?;
        } else if !line.is_empty() {
            // progress goes to stderr; the answer is printed once, with citations resolved
            chat.ask(line, |_, event| {
                if let StreamEvent::ToolStatus { data } = event {
                    if let Some(query) = &data.query {
                        eprintln!("Searching: {query}");
                    }
                }
            })
            .await?;
            print_last_answer(&chat, &mut stdout).await?;
        }

        stdout.write_all(b"> ").await?;
        stdout.flush().await?;
    }

    Ok(())
}

async fn print_last_answer<W: AsyncWrite + Unpin>(chat: &RemoteChat, out: &mut W) -> Result<()> {
    let session = chat.session();

    if let ChatStatus::Error(message) = session.status() {
        out.write_all(format!("Error: {message}\n").as_bytes()).await?;
        return Ok(());
    }

    let Some(message) = session.messages().last().filter(|m| !m.is_user()) else {
        return Ok(());
    };
    let id = message.id.as_deref().unwrap_or_default();

    let mut rendered = String::new();
    for segment in segments(&message.text()) {
        match segment {
            Segment::Text(text) => rendered.push_str(text),
            Segment::Citation { label, index } => match session.resolve_citation(id, index) {
                Some(_) => rendered.push_str(&format!("{label}[{}]", index + 1)),
                None => rendered.push_str(label),
            },
        }
    }
    out.write_all(rendered.trim().as_bytes()).await?;
    out.write_all(b"\n").await?;

    let sources = session.sources_for(id);
    if !sources.is_empty() {
        out.write_all(b"\nSources:\n").await?;
        for (i, source) in sources.iter().enumerate() {
            out.write_all(
                format!("  {}. {} (score: {:.3})\n", i + 1, source.label(), source.score).as_bytes(),
            )
            .await?;
        }
    }
    Ok(())
}

async fn print_source<W: AsyncWrite + Unpin>(chat: &RemoteChat, n: &str, out: &mut W) -> Result<()> {
    let session = chat.session();
    let source = session
        .messages()
        .iter()
        .rev()
        .find(|m| !m.is_user())
        .and_then(|m| m.id.as_deref())
        .zip(n.parse::<usize>().ok().filter(|n| *n >= 1))
        .and_then(|(id, n)| session.resolve_citation(id, n - 1));

    let text = match source {
        Some(source) => format!("{}, Page {}:\n{}\n", source.book, source.page, source.text),
        None => format!("No source {n} for the last answer\n"),
    };
    out.write_all(text.as_bytes()).await?;
    Ok(())
}
