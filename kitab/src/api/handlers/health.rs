use axum::extract::State;
use serde::Serialize;

use crate::api::response::ApiResponse;
use crate::api::state::AppState;

#[derive(Debug, Clone, Serialize, utoipa::ToSchema)]
pub struct HealthData {
    pub status: String,
    pub version: String,
    pub embeddings: EmbeddingsStatus,
    pub vector: VectorStatus,
    pub llm: LlmStatus,
}

#[derive(Debug, Clone, Serialize, utoipa::ToSchema)]
pub struct EmbeddingsStatus {
    pub model: String,
}

#[derive(Debug, Clone, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct VectorStatus {
    pub collection: String,
    pub top_k: usize,
}

#[derive(Debug, Clone, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct LlmStatus {
    pub model: String,
    pub max_steps: usize,
}

/// `GET /api/health`
///
/// Reports configuration only; upstream services are not probed.
#[utoipa::path(
    get,
    path = "/api/health",
    tag = "health",
    responses(
        (status = 200, description = "Service health status", body = HealthData),
    )
)]
pub async fn health_check(State(state): State<AppState>) -> ApiResponse<HealthData> {
    let config = &state.config;

    ApiResponse::success(HealthData {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        embeddings: EmbeddingsStatus {
            model: config.embeddings.model.clone(),
        },
        vector: VectorStatus {
            collection: config.vector.collection.clone(),
            top_k: config.vector.top_k,
        },
        llm: LlmStatus {
            model: config.llm.model.clone(),
            max_steps: state.relay.max_steps(),
        },
    })
}
