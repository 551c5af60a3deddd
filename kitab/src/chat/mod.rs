//! Tool-calling chat turn shared by the HTTP route and the query subcommand.

mod relay;
mod tool;

use std::sync::Arc;

use crate::config::Config;
use crate::embeddings::EmbeddingApiClient;
use crate::error::Result;
use crate::llm::prompts::system_prompt;
use crate::llm::{ChatMessage, LlmApiClient};
use crate::models::HistoryTurn;
use crate::search::{BookSearch, QdrantIndex};

pub use relay::{ChatRelay, EventStream};
pub use tool::{SearchTool, ToolOutput, NO_RESULTS_CONTEXT, SEARCH_TOOL_NAME};

/// Expand prior question/answer pairs into alternating chat messages.
pub fn history_messages(turns: &[HistoryTurn]) -> Vec<ChatMessage> {
    turns
        .iter()
        .flat_map(|turn| {
            [
                ChatMessage::user(turn.question.as_str()),
                ChatMessage::assistant(turn.answer.as_str()),
            ]
        })
        .collect()
}

/// Wire the embedding client, vector index and model client from `config`.
pub fn relay_from_config(config: &Config) -> Result<ChatRelay> {
    let embedder = EmbeddingApiClient::from_config(&config.embeddings)?;
    let index = QdrantIndex::new(&config.vector)?;
    let embedder_model = embedder.model().to_string();
    let collection = index.collection().to_string();
    let search = BookSearch::new(Arc::new(embedder), Arc::new(index), config.vector.top_k);
    let top_k = search.top_k();

    let tool = SearchTool::new(
        search,
        config.chat.max_sources,
        &config.chat.corpus_description,
    );
    let model = LlmApiClient::new(&config.llm)?;

    tracing::info!(
        model = model.model(),
        embedding_model = embedder_model,
        collection = collection.as_str(),
        top_k,
        max_steps = config.llm.max_steps,
        "Chat relay configured"
    );

    Ok(ChatRelay::new(
        Arc::new(model),
        tool,
        system_prompt(&config.chat.corpus_description),
        config.llm.max_steps,
    ))
}
