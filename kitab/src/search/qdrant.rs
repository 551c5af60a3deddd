use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::VectorConfig;
use crate::error::{KitabError, Result};
use crate::models::SearchResult;

use super::VectorIndex;

const PAYLOAD_FIELDS: [&str; 3] = ["text", "book", "page"];

#[derive(Debug, Serialize)]
struct SearchRequest<'a> {
    vector: Vec<f32>,
    limit: usize,
    with_payload: &'a [&'a str],
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    result: Vec<ScoredPoint>,
}

#[derive(Debug, Deserialize)]
struct ScoredPoint {
    score: f32,
    payload: Option<PointPayload>,
}

// Every indexed passage carries all three fields; a hit without them is an
// upstream fault, not an empty passage.
#[derive(Debug, Deserialize)]
struct PointPayload {
    text: String,
    book: String,
    page: u32,
}

/// Qdrant REST client for a single pre-built collection of book passages.
#[derive(Clone)]
pub struct QdrantIndex {
    client: Client,
    url: String,
    collection: String,
    api_key: Option<String>,
}

impl QdrantIndex {
    pub fn new(config: &VectorConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| KitabError::VectorSearch(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            url: config.url.trim_end_matches('/').to_string(),
            collection: config.collection.clone(),
            api_key: config.api_key.clone(),
        })
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }
}

#[async_trait]
impl VectorIndex for QdrantIndex {
    async fn nearest(&self, vector: Vec<f32>, limit: usize) -> Result<Vec<SearchResult>> {
        let url = format!("{}/collections/{}/points/search", self.url, self.collection);
        let request = SearchRequest {
            vector,
            limit,
            with_payload: &PAYLOAD_FIELDS,
        };

        let mut builder = self.client.post(&url).json(&request);
        if let Some(ref key) = self.api_key {
            builder = builder.header("api-key", key);
        }

        let resp = builder
            .send()
            .await
            .map_err(|e| KitabError::VectorSearch(format!("Request failed: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(match status {
                StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => KitabError::ApiAuth(body),
                StatusCode::NOT_FOUND => KitabError::VectorSearch(format!(
                    "Collection '{}' not found: {body}",
                    self.collection
                )),
                _ => KitabError::VectorSearch(format!("Search failed {status}: {body}")),
            });
        }

        let body: SearchResponse = resp
            .json()
            .await
            .map_err(|e| KitabError::VectorSearch(format!("Failed to parse response: {e}")))?;

        body.result
            .into_iter()
            .map(|point| {
                let payload = point.payload.ok_or_else(|| {
                    KitabError::VectorSearch("Search hit returned without payload".to_string())
                })?;
                Ok(SearchResult {
                    text: payload.text,
                    book: payload.book,
                    page: payload.page,
                    score: point.score,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(url: &str, api_key: Option<&str>) -> VectorConfig {
        VectorConfig {
            url: url.to_string(),
            api_key: api_key.map(str::to_string),
            collection: "books".to_string(),
            top_k: 10,
            timeout_secs: 5,
        }
    }

    #[tokio::test]
    async fn nearest_maps_payload_fields() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/collections/books/points/search"))
            .and(body_json(json!({
                "vector": [0.5, 0.25],
                "limit": 3,
                "with_payload": ["text", "book", "page"]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "result": [
                    {"id": 1, "score": 0.91, "payload": {"text": "Be patient.", "book": "Letters", "page": 12}},
                    {"id": 2, "score": 0.42, "payload": {"text": "Wait.", "book": "Essays", "page": 3}}
                ],
                "status": "ok",
                "time": 0.001
            })))
            .expect(1)
            .mount(&server)
            .await;

        let index = QdrantIndex::new(&config(&server.uri(), None)).unwrap();
        let results = index.nearest(vec![0.5, 0.25], 3).await.unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].book, "Letters");
        assert_eq!(results[0].page, 12);
        assert_eq!(results[0].text, "Be patient.");
        assert!((results[0].score - 0.91).abs() < f32::EPSILON);
    }

    #[tokio::test]
    async fn nearest_sends_api_key_header() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/collections/books/points/search"))
            .and(header("api-key", "qd-secret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "result": [] })))
            .expect(1)
            .mount(&server)
            .await;

        let index = QdrantIndex::new(&config(&server.uri(), Some("qd-secret"))).unwrap();
        let results = index.nearest(vec![1.0], 10).await.unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn hit_without_book_field_is_error() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/collections/books/points/search"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "result": [{"id": 1, "score": 0.5, "payload": {"text": "orphan", "page": 1}}]
            })))
            .mount(&server)
            .await;

        let index = QdrantIndex::new(&config(&server.uri(), None)).unwrap();
        let err = index.nearest(vec![1.0], 10).await.unwrap_err();

        assert!(matches!(err, KitabError::VectorSearch(_)));
    }

    #[tokio::test]
    async fn missing_collection_is_vector_search_error() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/collections/books/points/search"))
            .respond_with(ResponseTemplate::new(404).set_body_string("Not found"))
            .mount(&server)
            .await;

        let index = QdrantIndex::new(&config(&server.uri(), None)).unwrap();
        let err = index.nearest(vec![1.0], 10).await.unwrap_err();

        assert!(matches!(err, KitabError::VectorSearch(_)));
        assert!(err.to_string().contains("books"));
    }
}
