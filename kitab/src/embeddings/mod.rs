mod api;


pub use api::{ApiConfig, EmbeddingApiClient};
