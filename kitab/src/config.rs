use serde::Deserialize;
use std::env;

fn parse_env_or<T: std::str::FromStr>(var: &str, default: T) -> T
where
    T::Err: std::fmt::Display,
{
    match env::var(var) {
        Ok(val) => match val.parse() {
            Ok(parsed) => parsed,
            Err(e) => {
                tracing::warn!("Invalid value '{}' for {}: {}. Using default.", val, var, e);
                default
            }
        },
        Err(_) => default,
    }
}

fn parse_env_opt<T: std::str::FromStr>(var: &str) -> Option<T>
where
    T::Err: std::fmt::Display,
{
    match env::var(var) {
        Ok(val) => match val.parse() {
            Ok(parsed) => Some(parsed),
            Err(e) => {
                tracing::warn!("Invalid value '{}' for {}: {}. Ignoring.", val, var, e);
                None
            }
        },
        Err(_) => None,
    }
}

/// Like [`parse_env_or`], but held to `1..=max`.
///
/// Zero falls back to `default`; larger values are capped at `max`.
fn parse_env_bounded(var: &str, default: usize, max: usize) -> usize {
    match parse_env_or(var, default) {
        0 => {
            tracing::warn!("{} must be at least 1. Using default {}.", var, default);
            default
        }
        value if value > max => {
            tracing::warn!("{}={} exceeds the limit of {}. Using {}.", var, value, max, max);
            max
        }
        value => value,
    }
}

/// First non-empty value among `vars`.
fn env_first(vars: &[&str]) -> Option<String> {
    vars.iter()
        .filter_map(|var| env::var(var).ok())
        .find(|value| !value.trim().is_empty())
}

/// Passages requested from the vector index per search.
pub const MAX_TOP_K: usize = 10;

/// Sources surfaced to clients per search.
pub const MAX_SOURCES: usize = 5;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub embeddings: EmbeddingsConfig,
    pub vector: VectorConfig,
    pub llm: LlmConfig,
    pub chat: ChatConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Upper bound for one streamed chat response.
    pub max_duration_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EmbeddingsConfig {
    pub model: String,
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VectorConfig {
    pub url: String,
    pub api_key: Option<String>,
    pub collection: String,
    pub top_k: usize,
    pub timeout_secs: u64,
}

/// LLM configuration for the chat model
#[derive(Debug, Clone, Deserialize)]
pub struct LlmConfig {
    pub model: String,
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub timeout_secs: u64,
    pub temperature: f32,
    pub max_tokens: u32,
    // Model round trips allowed per turn, including tool steps
    pub max_steps: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatConfig {
    /// Sources surfaced to clients per tool call.
    pub max_sources: usize,
    /// Prior turns forwarded by the query subprocess.
    pub history_turns: usize,
    pub corpus_description: String,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            max_sources: MAX_SOURCES,
            history_turns: 4,
            corpus_description: "a collection of books".to_string(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: env::var("KITAB_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: parse_env_or("KITAB_PORT", 3000),
                max_duration_secs: parse_env_or("KITAB_MAX_DURATION_SECS", 60),
            },
            embeddings: EmbeddingsConfig {
                model: env::var("EMBEDDING_MODEL")
                    .unwrap_or_else(|_| "openai/text-embedding-3-large".to_string()),
                api_key: env_first(&["EMBEDDING_API_KEY", "OPENAI_API_KEY"]),
                base_url: env::var("EMBEDDING_BASE_URL").ok(),
                timeout_secs: parse_env_or("EMBEDDING_TIMEOUT", 30),
            },
            vector: VectorConfig {
                url: env::var("QDRANT_URL").unwrap_or_else(|_| "http://localhost:6333".to_string()),
                api_key: env::var("QDRANT_API_KEY").ok(),
                collection: env::var("QDRANT_COLLECTION").unwrap_or_else(|_| "books".to_string()),
                top_k: parse_env_bounded("SEARCH_TOP_K", MAX_TOP_K, MAX_TOP_K),
                timeout_secs: parse_env_or("VECTOR_TIMEOUT", 30),
            },
            llm: LlmConfig {
                model: env::var("LLM_MODEL").unwrap_or_else(|_| "openai/gpt-4o".to_string()),
                api_key: env_first(&["LLM_API_KEY", "OPENAI_API_KEY"]),
                base_url: env::var("LLM_BASE_URL").ok(),
                timeout_secs: parse_env_or("LLM_TIMEOUT", 60),
                temperature: parse_env_or("LLM_TEMPERATURE", 0.3),
                max_tokens: parse_env_or("LLM_MAX_TOKENS", 1000),
                max_steps: parse_env_opt::<usize>("LLM_MAX_STEPS")
                    .filter(|steps| *steps > 0)
                    .unwrap_or(3),
            },
            chat: ChatConfig {
                max_sources: parse_env_bounded("MAX_SOURCES", MAX_SOURCES, MAX_SOURCES),
                history_turns: parse_env_or("HISTORY_TURNS", 4),
                corpus_description: env::var("CORPUS_DESCRIPTION")
                    .unwrap_or_else(|_| ChatConfig::default().corpus_description),
            },
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::default()
    }
}

/// Known providers that use OpenAI-compatible APIs
pub const KNOWN_PROVIDERS: &[&str] = &["openai", "openrouter", "ollama", "lmstudio"];

/// Parse a model name into (provider, model) tuple.
pub fn parse_provider_model(model: &str) -> (&str, &str) {
    if let Some((prefix, rest)) = model.split_once('/') {
        let prefix_lower = prefix.to_lowercase();
        if KNOWN_PROVIDERS.contains(&prefix_lower.as_str()) {
            return (prefix, rest);
        }
    }
    // Unknown prefix: the whole string names a model behind a custom base URL
    ("local", model)
}

/// Provider-specific default base URLs
pub fn default_base_url(provider: &str) -> &'static str {
    match provider.to_lowercase().as_str() {
        "openai" => "https://api.openai.com/v1",
        "openrouter" => "https://openrouter.ai/api/v1",
        "ollama" => "http://localhost:11434/v1",
        "lmstudio" => "http://localhost:1234/v1",
        _ => "https://api.openai.com/v1",
    }
}

/// Whether requests to `provider` must carry an API key.
pub fn provider_needs_api_key(provider: &str) -> bool {
    !matches!(
        provider.to_lowercase().as_str(),
        "ollama" | "local" | "lmstudio"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    static ENV_TEST_MUTEX: Mutex<()> = Mutex::new(());

    #[test]
    fn test_parse_provider_model_known() {
        assert_eq!(parse_provider_model("openai/gpt-4o"), ("openai", "gpt-4o"));
        assert_eq!(
            parse_provider_model("openrouter/anthropic/claude-3.5-sonnet"),
            ("openrouter", "anthropic/claude-3.5-sonnet")
        );
    }

    #[test]
    fn test_parse_provider_model_unknown_defaults_to_local() {
        assert_eq!(parse_provider_model("my-model"), ("local", "my-model"));
        assert_eq!(
            parse_provider_model("unknown/model-name"),
            ("local", "unknown/model-name")
        );
    }

    #[test]
    fn test_provider_needs_api_key() {
        assert!(provider_needs_api_key("openai"));
        assert!(provider_needs_api_key("OpenRouter"));
        assert!(!provider_needs_api_key("ollama"));
        assert!(!provider_needs_api_key("local"));
    }

    #[test]
    fn test_chat_config_defaults() {
        let defaults = ChatConfig::default();
        assert_eq!(defaults.max_sources, 5);
        assert_eq!(defaults.history_turns, 4);
    }

    #[test]
    fn test_vector_config_defaults() {
        let _guard = ENV_TEST_MUTEX.lock().unwrap();
        std::env::remove_var("QDRANT_URL");
        std::env::remove_var("QDRANT_COLLECTION");
        std::env::remove_var("SEARCH_TOP_K");

        let config = Config::default();
        assert_eq!(config.vector.url, "http://localhost:6333");
        assert_eq!(config.vector.collection, "books");
        assert_eq!(config.vector.top_k, 10);
    }

    #[test]
    fn test_llm_max_steps_rejects_zero() {
        let _guard = ENV_TEST_MUTEX.lock().unwrap();
        std::env::set_var("LLM_MAX_STEPS", "0");
        let config = Config::default();
        assert_eq!(config.llm.max_steps, 3);
        std::env::remove_var("LLM_MAX_STEPS");
    }

    #[test]
    fn test_api_key_falls_back_to_openai_key() {
        let _guard = ENV_TEST_MUTEX.lock().unwrap();
        std::env::remove_var("LLM_API_KEY");
        std::env::remove_var("EMBEDDING_API_KEY");
        std::env::set_var("OPENAI_API_KEY", "sk-shared");

        let config = Config::default();
        assert_eq!(config.llm.api_key.as_deref(), Some("sk-shared"));
        assert_eq!(config.embeddings.api_key.as_deref(), Some("sk-shared"));

        std::env::set_var("LLM_API_KEY", "sk-llm");
        let config = Config::default();
        assert_eq!(config.llm.api_key.as_deref(), Some("sk-llm"));

        std::env::remove_var("LLM_API_KEY");
        std::env::remove_var("OPENAI_API_KEY");
    }

    #[test]
    fn test_parse_env_or_invalid_value_uses_default() {
        let _guard = ENV_TEST_MUTEX.lock().unwrap();
        std::env::set_var("__TEST_PARSE_PORT", "not-a-port");
        let result: u16 = parse_env_or("__TEST_PARSE_PORT", 3000);
        assert_eq!(result, 3000);
        std::env::remove_var("__TEST_PARSE_PORT");
    }
}
