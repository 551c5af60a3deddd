mod api;
pub mod prompts;
mod types;

pub use api::LlmApiClient;
pub use types::{ChatMessage, ChatModel, ModelChunk, ModelStream, ToolCall, ToolSpec};
