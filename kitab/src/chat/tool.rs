use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::config::MAX_SOURCES;
use crate::error::Result;
use crate::llm::prompts::search_tool_description;
use crate::llm::ToolSpec;
use crate::models::{sources_from_results, Source};
use crate::search::{format_context, BookSearch};

pub const SEARCH_TOOL_NAME: &str = "search_books";

/// Context handed to the model when the search finds nothing.
pub const NO_RESULTS_CONTEXT: &str = "No relevant information found in the knowledge base.";

/// Result of one search tool invocation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolOutput {
    /// Formatted passages for the model.
    pub context: String,
    /// Leading passages surfaced to the user, best match first.
    pub sources: Vec<Source>,
}

#[derive(Debug, Deserialize)]
struct SearchArgs {
    query: String,
}

/// Exposes [`BookSearch`] to the model as the `search_books` function.
#[derive(Clone)]
pub struct SearchTool {
    search: BookSearch,
    max_sources: usize,
    description: String,
}

impl SearchTool {
    pub fn new(search: BookSearch, max_sources: usize, corpus_description: &str) -> Self {
        Self {
            search,
            max_sources: max_sources.clamp(1, MAX_SOURCES),
            description: search_tool_description(corpus_description),
        }
    }

    pub fn name(&self) -> &'static str {
        SEARCH_TOOL_NAME
    }

    pub fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: SEARCH_TOOL_NAME.to_string(),
            description: self.description.clone(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "query": {
                        "type": "string",
                        "description": "The search query. Be specific about what information you need."
                    }
                },
                "required": ["query"]
            }),
        }
    }

    /// Extract `query` from the model's raw argument JSON.
    ///
    /// Unparseable or blank arguments fall back to `fallback`, normally the
    /// user's latest question.
    pub fn query_from_arguments(arguments: &str, fallback: &str) -> String {
        match serde_json::from_str::<SearchArgs>(arguments) {
            Ok(args) if !args.query.trim().is_empty() => args.query,
            Ok(_) => fallback.to_string(),
            Err(error) => {
                tracing::warn!(error = %error, "Malformed search tool arguments, using the question");
                fallback.to_string()
            }
        }
    }

    pub async fn invoke(&self, query: &str) -> Result<ToolOutput> {
        let results = self.search.search(query).await?;

        if results.is_empty() {
            return Ok(ToolOutput {
                context: NO_RESULTS_CONTEXT.to_string(),
                sources: Vec::new(),
            });
        }

        Ok(ToolOutput {
            context: format_context(&results),
            sources: sources_from_results(&results, self.max_sources),
        })
    }
}
