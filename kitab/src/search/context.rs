use crate::models::SearchResult;

/// Separator placed between formatted passages.
pub const CONTEXT_DELIMITER: &str = "\n\n---\n\n";

/// Render ranked passages as model-visible context.
///
/// Each passage is labeled `[Source i]` with its 0-based position, the same
/// index that `source:i` citation links refer to.
pub fn format_context(results: &[SearchResult]) -> String {
    results
        .iter()
        .enumerate()
        .map(|(i, r)| format!("[Source {i}] {}, Page {}:\n{}", r.book, r.page, r.text))
        .collect::<Vec<_>>()
        .join(CONTEXT_DELIMITER)
}
