use axum::Json;
use utoipa::OpenApi;

use super::dto;
use super::handlers;
use super::response;
use crate::models;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Kitab API",
        version = "1.0.0",
        description = "Retrieval-augmented chat over a pre-indexed book corpus.",
    ),
    paths(
        handlers::health::health_check,
        handlers::chat::chat,
    ),
    components(schemas(
        // Response envelope
        response::ErrorCode,
        response::ApiError,
        // Chat
        dto::ChatRequest,
        models::UiMessage,
        models::MessagePart,
        models::Source,
        models::ToolPhase,
        models::ToolStatusData,
        // Health (handler-local types)
        handlers::health::HealthData,
        handlers::health::EmbeddingsStatus,
        handlers::health::VectorStatus,
        handlers::health::LlmStatus,
    )),
    tags(
        (name = "health", description = "Health check"),
        (name = "chat", description = "Streamed question answering with citations"),
    ),
)]
pub struct ApiDoc;

pub async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}
