//! Query embedding and nearest-neighbor search over the book corpus.
//!
//! [`BookSearch`] holds injected [`Embedder`] and [`VectorIndex`] handles
//! constructed once at startup; tests substitute in-memory fakes.

mod context;
mod qdrant;

use std::cmp::Ordering;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;

use crate::config::MAX_TOP_K;
use crate::error::Result;
use crate::models::SearchResult;

pub use context::{format_context, CONTEXT_DELIMITER};
pub use qdrant::QdrantIndex;

/// Turns text into a single embedding vector.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

/// Nearest-neighbor lookup against a pre-built collection of passages.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    async fn nearest(&self, vector: Vec<f32>, limit: usize) -> Result<Vec<SearchResult>>;
}

#[derive(Clone)]
pub struct BookSearch {
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorIndex>,
    top_k: usize,
}

impl BookSearch {
    pub fn new(embedder: Arc<dyn Embedder>, index: Arc<dyn VectorIndex>, top_k: usize) -> Self {
        Self {
            embedder,
            index,
            top_k: top_k.clamp(1, MAX_TOP_K),
        }
    }

    pub fn top_k(&self) -> usize {
        self.top_k
    }

    /// Embed `query` and return at most `top_k` passages, best match first.
    ///
    /// Every call is a fresh round trip; failures of either upstream call are
    /// returned unchanged.
    pub async fn search(&self, query: &str) -> Result<Vec<SearchResult>> {
        let started = Instant::now();

        let vector = self.embedder.embed(query).await?;
        let mut results = self.index.nearest(vector, self.top_k).await?;

        results.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
        results.truncate(self.top_k);

        tracing::debug!(
            query_len = query.len(),
            results = results.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Book search completed"
        );

        Ok(results)
    }
}
