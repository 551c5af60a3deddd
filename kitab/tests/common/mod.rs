#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::{stream, StreamExt};

use kitab::chat::{ChatRelay, SearchTool};
use kitab::error::{KitabError, Result};
use kitab::llm::{ChatMessage, ChatModel, ModelChunk, ModelStream, ToolCall, ToolSpec};
use kitab::models::SearchResult;
use kitab::search::{BookSearch, Embedder, VectorIndex};

pub const SYSTEM_PROMPT: &str = "You answer questions about test books.";

/// Embedder that returns a fixed vector.
pub struct FixedEmbedder;

#[async_trait]
impl Embedder for FixedEmbedder {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        Ok(vec![0.1, 0.2, 0.3])
    }
}

/// Index that returns canned passages and records every limit it was asked for.
pub struct StaticIndex {
    results: Vec<SearchResult>,
    pub limits: Mutex<Vec<usize>>,
}

impl StaticIndex {
    pub fn new(results: Vec<SearchResult>) -> Self {
        Self {
            results,
            limits: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl VectorIndex for StaticIndex {
    async fn nearest(&self, _vector: Vec<f32>, limit: usize) -> Result<Vec<SearchResult>> {
        self.limits.lock().unwrap().push(limit);
        Ok(self.results.iter().take(limit).cloned().collect())
    }
}

pub struct FailingIndex;

#[async_trait]
impl VectorIndex for FailingIndex {
    async fn nearest(&self, _vector: Vec<f32>, _limit: usize) -> Result<Vec<SearchResult>> {
        Err(KitabError::VectorSearch("Collection 'books' not found".to_string()))
    }
}

pub fn passage(book: &str, page: u32, score: f32) -> SearchResult {
    SearchResult {
        text: format!("{book} page {page} text"),
        book: book.to_string(),
        page,
        score,
    }
}

/// One scripted model step.
#[derive(Clone)]
pub enum Step {
    Chunks(Vec<ModelChunk>),
    /// The request itself fails.
    Reject(String),
    /// The stream fails after yielding the given chunks.
    Break(Vec<ModelChunk>, String),
    /// The stream yields the given chunks and then never ends.
    Hang(Vec<ModelChunk>),
}

pub fn text(delta: &str) -> ModelChunk {
    ModelChunk::Text(delta.to_string())
}

pub fn search_call(id: &str, query: &str) -> ModelChunk {
    ModelChunk::ToolCall(ToolCall {
        id: id.to_string(),
        name: "search_books".to_string(),
        arguments: serde_json::json!({ "query": query }).to_string(),
    })
}

pub fn tool_call(id: &str, name: &str, arguments: &str) -> ModelChunk {
    ModelChunk::ToolCall(ToolCall {
        id: id.to_string(),
        name: name.to_string(),
        arguments: arguments.to_string(),
    })
}

/// What the model was asked on one step.
#[derive(Debug, Clone)]
pub struct Recorded {
    pub messages: Vec<ChatMessage>,
    pub tools: Vec<String>,
}

/// Chat model that replays a fixed script, one step per request.
pub struct ScriptedModel {
    steps: Mutex<VecDeque<Step>>,
    pub requests: Mutex<Vec<Recorded>>,
}

impl ScriptedModel {
    pub fn new(steps: Vec<Step>) -> Arc<Self> {
        Arc::new(Self {
            steps: Mutex::new(steps.into()),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatModel for ScriptedModel {
    async fn stream_turn(&self, messages: &[ChatMessage], tools: &[ToolSpec]) -> Result<ModelStream> {
        self.requests.lock().unwrap().push(Recorded {
            messages: messages.to_vec(),
            tools: tools.iter().map(|tool| tool.name.clone()).collect(),
        });

        let step = self
            .steps
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Step::Chunks(vec![text("(no more script)")]));

        match step {
            Step::Chunks(chunks) => Ok(Box::pin(stream::iter(chunks.into_iter().map(Ok)))),
            Step::Reject(message) => Err(KitabError::Llm(message)),
            Step::Break(chunks, message) => {
                let items = chunks
                    .into_iter()
                    .map(Ok)
                    .chain(std::iter::once(Err(KitabError::Llm(message))));
                Ok(Box::pin(stream::iter(items)))
            }
            Step::Hang(chunks) => Ok(Box::pin(
                stream::iter(chunks.into_iter().map(Ok)).chain(stream::pending()),
            )),
        }
    }
}

pub fn relay_with(model: Arc<ScriptedModel>, index: Arc<dyn VectorIndex>, max_steps: usize) -> ChatRelay {
    let search = BookSearch::new(Arc::new(FixedEmbedder), index, 10);
    let tool = SearchTool::new(search, 5, "test books");
    ChatRelay::new(model, tool, SYSTEM_PROMPT.to_string(), max_steps)
}

pub fn default_index() -> Arc<StaticIndex> {
    Arc::new(StaticIndex::new(vec![
        passage("Riyad as-Salihin", 12, 0.91),
        passage("Al-Adab al-Mufrad", 3, 0.84),
    ]))
}
