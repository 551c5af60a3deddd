use std::sync::Arc;

use async_stream::stream;
use futures::stream::BoxStream;
use futures::StreamExt;
use nanoid::nanoid;

use crate::error::KitabError;
use crate::llm::prompts::unavailable_tool_message;
use crate::llm::{ChatMessage, ChatModel, ModelChunk, ToolSpec};
use crate::models::StreamEvent;

use super::tool::SearchTool;

pub type EventStream = BoxStream<'static, StreamEvent>;

const INTERNAL_FAILURE: &str = "An internal error occurred";

/// Text of the `error` event for `error`. Upstream failures are shown as-is.
fn failure_text(error: &KitabError) -> String {
    if error.is_upstream() {
        error.to_string()
    } else {
        INTERNAL_FAILURE.to_string()
    }
}

/// Runs one assistant turn against the model and turns it into
/// client-visible [`StreamEvent`]s.
///
/// Event order for a turn: `start`, then per model step any text deltas and,
/// for each search call in order, `searching` -> `complete` -> `sources`
/// (sources only when non-empty). The stream ends with exactly one `finish`
/// or one `error`.
#[derive(Clone)]
pub struct ChatRelay {
    model: Arc<dyn ChatModel>,
    tool: SearchTool,
    system_prompt: String,
    max_steps: usize,
}

impl ChatRelay {
    pub fn new(
        model: Arc<dyn ChatModel>,
        tool: SearchTool,
        system_prompt: String,
        max_steps: usize,
    ) -> Self {
        Self {
            model,
            tool,
            system_prompt,
            max_steps: max_steps.max(1),
        }
    }

    pub fn max_steps(&self) -> usize {
        self.max_steps
    }

    /// Stream the answer to the conversation in `history`.
    ///
    /// `history` holds user/assistant messages only; the system prompt is
    /// prepended here.
    pub fn stream(&self, history: Vec<ChatMessage>) -> EventStream {
        let model = Arc::clone(&self.model);
        let tool = self.tool.clone();
        let system_prompt = self.system_prompt.clone();
        let max_steps = self.max_steps;
        let message_id = nanoid!();

        let events = stream! {
            yield StreamEvent::Start { message_id: message_id.clone() };

            let question = history
                .iter()
                .rev()
                .find_map(|message| match message {
                    ChatMessage::User(text) => Some(text.clone()),
                    _ => None,
                })
                .unwrap_or_default();

            let mut messages = Vec::with_capacity(history.len() + 1);
            messages.push(ChatMessage::system(system_prompt));
            messages.extend(history);

            let tools = vec![tool.spec()];

            for step in 0..max_steps {
                let last_step = step + 1 == max_steps;
                let offered: &[ToolSpec] = if last_step { &[] } else { &tools };

                let mut upstream = match model.stream_turn(&messages, offered).await {
                    Ok(upstream) => upstream,
                    Err(error) => {
                        tracing::error!(%message_id, step, error = %error, "Model request failed");
                        yield StreamEvent::error(failure_text(&error));
                        return;
                    }
                };

                let mut text = String::new();
                let mut calls = Vec::new();

                while let Some(chunk) = upstream.next().await {
                    match chunk {
                        Ok(ModelChunk::Text(delta)) => {
                            text.push_str(&delta);
                            yield StreamEvent::TextDelta { delta };
                        }
                        Ok(ModelChunk::ToolCall(call)) => calls.push(call),
                        Err(error) => {
                            tracing::error!(%message_id, step, error = %error, "Model stream failed");
                            yield StreamEvent::error(failure_text(&error));
                            return;
                        }
                    }
                }

                if calls.is_empty() {
                    break;
                }
                if last_step {
                    tracing::warn!(%message_id, calls = calls.len(), "Ignoring tool calls on final step");
                    break;
                }

                messages.push(ChatMessage::Assistant {
                    content: (!text.is_empty()).then_some(text),
                    tool_calls: calls.clone(),
                });

                // Sequential so status/sources pairs never interleave.
                for call in calls {
                    if call.name != tool.name() {
                        tracing::warn!(%message_id, tool = %call.name, "Model called an unknown tool");
                        messages.push(ChatMessage::tool_result(
                            call.id,
                            unavailable_tool_message(&call.name),
                        ));
                        continue;
                    }

                    let query = SearchTool::query_from_arguments(&call.arguments, &question);
                    tracing::info!(%message_id, %query, "Searching books");
                    yield StreamEvent::searching(tool.name(), &query);

                    match tool.invoke(&query).await {
                        Ok(output) => {
                            tracing::debug!(%message_id, sources = output.sources.len(), "Search complete");
                            yield StreamEvent::complete(tool.name());
                            if !output.sources.is_empty() {
                                yield StreamEvent::Sources { data: output.sources };
                            }
                            messages.push(ChatMessage::tool_result(call.id, output.context));
                        }
                        Err(error) => {
                            tracing::error!(%message_id, error = %error, "Search tool failed");
                            yield StreamEvent::error(failure_text(&error));
                            return;
                        }
                    }
                }
            }

            yield StreamEvent::Finish;
        };

        Box::pin(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upstream_failures_keep_their_message() {
        let error = KitabError::Llm("insufficient_quota".to_string());
        assert_eq!(failure_text(&error), "LLM error: insufficient_quota");

        let error = KitabError::VectorSearch("Collection 'books' not found".to_string());
        assert_eq!(
            failure_text(&error),
            "Vector search error: Collection 'books' not found"
        );
    }

    #[test]
    fn internal_failures_are_masked() {
        let error = KitabError::Internal("pool poisoned at 0x7f".to_string());
        assert_eq!(failure_text(&error), INTERNAL_FAILURE);

        let io = KitabError::Io(std::io::Error::other("disk"));
        assert_eq!(failure_text(&io), INTERNAL_FAILURE);
    }
}
