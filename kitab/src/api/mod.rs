mod dto;
mod extractors;
mod frontend;
pub mod handlers;
pub mod openapi;
mod response;
mod routes;
mod state;

pub use dto::ChatRequest;
pub use handlers::chat::DONE_MARKER;
pub use response::{ApiError, ApiResponse, ErrorCode};
pub use routes::create_router;
pub use state::AppState;
