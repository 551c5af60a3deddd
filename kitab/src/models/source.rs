use serde::{Deserialize, Serialize};

/// A passage returned by the vector index, ranked by similarity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub text: String,
    pub book: String,
    pub page: u32,
    pub score: f32,
}

/// Client-facing view of a [`SearchResult`].
///
/// The position of a source within its list is what `source:<index>` citation
/// links resolve against; `id` is informational (`source-0`, `source-1`, ...)
/// and may be absent in output produced by external query scripts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, utoipa::ToSchema)]
pub struct Source {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub book: String,
    pub page: u32,
    pub score: f32,
    pub text: String,
}

impl Source {
    pub fn from_result(index: usize, result: &SearchResult) -> Self {
        Self {
            id: Some(format!("source-{index}")),
            book: result.book.clone(),
            page: result.page,
            score: result.score,
            text: result.text.clone(),
        }
    }

    /// Short `Book p.N` label used in source lists.
    pub fn label(&self) -> String {
        format!("{} p.{}", self.book, self.page)
    }
}

/// Map the first `limit` results to sources with positional ids.
pub fn sources_from_results(results: &[SearchResult], limit: usize) -> Vec<Source> {
    results
        .iter()
        .take(limit)
        .enumerate()
        .map(|(index, result)| Source::from_result(index, result))
        .collect()
}
