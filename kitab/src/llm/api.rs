use std::collections::BTreeMap;
use std::time::Duration;

use async_openai::{
    config::OpenAIConfig,
    error::{ApiError, OpenAIError},
    types::{
        ChatCompletionMessageToolCall, ChatCompletionRequestAssistantMessageArgs,
        ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
        ChatCompletionRequestToolMessageArgs, ChatCompletionRequestUserMessageArgs,
        ChatCompletionTool, ChatCompletionToolArgs, ChatCompletionToolChoiceOption,
        ChatCompletionToolType, CreateChatCompletionRequest, CreateChatCompletionRequestArgs,
        FunctionCall, FunctionObjectArgs,
    },
    Client,
};
use async_trait::async_trait;
use futures::StreamExt;

use crate::{
    config::{default_base_url, parse_provider_model, provider_needs_api_key, LlmConfig},
    error::{KitabError, Result},
    llm::types::{ChatMessage, ChatModel, ModelChunk, ModelStream, ToolCall, ToolSpec},
};

#[derive(Debug, Clone)]
struct ApiConfig {
    base_url: String,
    api_key: Option<String>,
    model: String,
    timeout_secs: u64,
    temperature: f32,
    max_tokens: u32,
}

/// Streaming chat client for OpenAI-compatible `/chat/completions` APIs.
#[derive(Clone)]
pub struct LlmApiClient {
    client: Client<OpenAIConfig>,
    config: ApiConfig,
}

impl LlmApiClient {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let api_config = ApiConfig::from_llm_config(config);

        let (provider, _) = parse_provider_model(&config.model);
        if provider_needs_api_key(provider) && api_config.api_key.is_none() {
            return Err(KitabError::ApiAuth(format!(
                "API key required for LLM provider '{provider}'. Set LLM_API_KEY or OPENAI_API_KEY."
            )));
        }

        let openai_config = OpenAIConfig::new()
            .with_api_base(api_config.base_url.clone())
            .with_api_key(api_config.api_key.clone().unwrap_or_default());

        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(api_config.timeout_secs))
            .build()
            .map_err(|error| KitabError::Llm(format!("Failed to create LLM HTTP client: {error}")))?;

        // async-openai retries 429/5xx internally unless the backoff budget is empty.
        let backoff = backoff::ExponentialBackoff {
            max_elapsed_time: Some(Duration::ZERO),
            ..Default::default()
        };

        let client = Client::with_config(openai_config)
            .with_http_client(http_client)
            .with_backoff(backoff);

        Ok(Self {
            client,
            config: api_config,
        })
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    fn build_request(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolSpec],
    ) -> Result<CreateChatCompletionRequest> {
        let messages = messages
            .iter()
            .map(to_request_message)
            .collect::<Result<Vec<_>>>()?;

        let mut request = CreateChatCompletionRequestArgs::default();
        request
            .model(self.config.model.clone())
            .messages(messages)
            .temperature(self.config.temperature)
            .max_completion_tokens(self.config.max_tokens)
            .stream(true);

        if !tools.is_empty() {
            let tools = tools
                .iter()
                .map(to_request_tool)
                .collect::<Result<Vec<_>>>()?;
            request
                .tools(tools)
                .tool_choice(ChatCompletionToolChoiceOption::Auto);
        }

        request.build().map_err(|error| {
            KitabError::Validation(format!("Invalid LLM completion request: {error}"))
        })
    }
}

#[async_trait]
impl ChatModel for LlmApiClient {
    async fn stream_turn(&self, messages: &[ChatMessage], tools: &[ToolSpec]) -> Result<ModelStream> {
        let request = self.build_request(messages, tools)?;

        tracing::debug!(
            model = %self.config.model,
            messages = messages.len(),
            tools = tools.len(),
            "Starting LLM stream"
        );

        let mut upstream = self
            .client
            .chat()
            .create_stream(request)
            .await
            .map_err(map_openai_error)?;

        let stream = async_stream::stream! {
            let mut pending = ToolCallBuffer::default();

            while let Some(item) = upstream.next().await {
                let response = match item {
                    Ok(response) => response,
                    Err(error) => {
                        yield Err(map_openai_error(error));
                        return;
                    }
                };

                for choice in response.choices {
                    if let Some(text) = choice.delta.content.filter(|text| !text.is_empty()) {
                        yield Ok(ModelChunk::Text(text));
                    }

                    for chunk in choice.delta.tool_calls.unwrap_or_default() {
                        let function = chunk.function.as_ref();
                        pending.push(
                            chunk.index,
                            chunk.id.as_deref(),
                            function.and_then(|f| f.name.as_deref()),
                            function.and_then(|f| f.arguments.as_deref()),
                        );
                    }
                }
            }

            for call in pending.finish() {
                yield Ok(ModelChunk::ToolCall(call));
            }
        };

        Ok(Box::pin(stream))
    }
}

impl ApiConfig {
    fn from_llm_config(config: &LlmConfig) -> Self {
        let (provider, model) = parse_provider_model(&config.model);

        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| default_base_url(provider).to_string());

        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            model: model.to_string(),
            timeout_secs: config.timeout_secs,
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        }
    }
}

/// Assembles streamed tool-call fragments keyed by their `index`.
#[derive(Debug, Default)]
struct ToolCallBuffer {
    calls: BTreeMap<u32, PartialToolCall>,
}

#[derive(Debug, Default)]
struct PartialToolCall {
    id: String,
    name: String,
    arguments: String,
}

impl ToolCallBuffer {
    fn push(&mut self, index: u32, id: Option<&str>, name: Option<&str>, arguments: Option<&str>) {
        let call = self.calls.entry(index).or_default();
        if let Some(id) = id.filter(|id| !id.is_empty()) {
            call.id = id.to_string();
        }
        if let Some(name) = name {
            call.name.push_str(name);
        }
        if let Some(arguments) = arguments {
            call.arguments.push_str(arguments);
        }
    }

    /// Completed calls in index order. Fragments that never received a
    /// function name are dropped.
    fn finish(self) -> Vec<ToolCall> {
        self.calls
            .into_iter()
            .filter(|(_, call)| !call.name.is_empty())
            .map(|(index, call)| ToolCall {
                id: if call.id.is_empty() {
                    format!("call_{index}")
                } else {
                    call.id
                },
                name: call.name,
                arguments: call.arguments,
            })
            .collect()
    }
}

fn to_request_message(message: &ChatMessage) -> Result<ChatCompletionRequestMessage> {
    let built: std::result::Result<ChatCompletionRequestMessage, OpenAIError> = match message {
        ChatMessage::System(content) => ChatCompletionRequestSystemMessageArgs::default()
            .content(content.as_str())
            .build()
            .map(Into::into),
        ChatMessage::User(content) => ChatCompletionRequestUserMessageArgs::default()
            .content(content.as_str())
            .build()
            .map(Into::into),
        ChatMessage::Assistant {
            content,
            tool_calls,
        } => {
            let mut args = ChatCompletionRequestAssistantMessageArgs::default();
            if let Some(content) = content {
                args.content(content.as_str());
            }
            if !tool_calls.is_empty() {
                args.tool_calls(
                    tool_calls
                        .iter()
                        .map(|call| ChatCompletionMessageToolCall {
                            id: call.id.clone(),
                            r#type: ChatCompletionToolType::Function,
                            function: FunctionCall {
                                name: call.name.clone(),
                                arguments: call.arguments.clone(),
                            },
                        })
                        .collect::<Vec<_>>(),
                );
            }
            args.build().map(Into::into)
        }
        ChatMessage::Tool { call_id, content } => ChatCompletionRequestToolMessageArgs::default()
            .tool_call_id(call_id.as_str())
            .content(content.as_str())
            .build()
            .map(Into::into),
    };

    built.map_err(|error| KitabError::Validation(format!("Invalid chat message: {error}")))
}

fn to_request_tool(spec: &ToolSpec) -> Result<ChatCompletionTool> {
    let function = FunctionObjectArgs::default()
        .name(spec.name.as_str())
        .description(spec.description.as_str())
        .parameters(spec.parameters.clone())
        .build()
        .map_err(|error| KitabError::Validation(format!("Invalid tool declaration: {error}")))?;

    ChatCompletionToolArgs::default()
        .r#type(ChatCompletionToolType::Function)
        .function(function)
        .build()
        .map_err(|error| KitabError::Validation(format!("Invalid tool declaration: {error}")))
}

fn is_rate_limit_api_error(api_error: &ApiError) -> bool {
    let message = api_error.message.to_lowercase();
    let error_type = api_error.r#type.clone().unwrap_or_default().to_lowercase();
    let code = api_error.code.clone().unwrap_or_default().to_lowercase();

    message.contains("rate limit")
        || message.contains("too many requests")
        || error_type.contains("rate_limit")
        || code.contains("rate_limit")
        || code == "insufficient_quota"
}

fn is_auth_api_error(api_error: &ApiError) -> bool {
    let message = api_error.message.to_lowercase();
    let error_type = api_error.r#type.clone().unwrap_or_default().to_lowercase();
    let code = api_error.code.clone().unwrap_or_default().to_lowercase();

    message.contains("unauthorized")
        || message.contains("authentication")
        || message.contains("invalid api key")
        || code.contains("invalid_api_key")
        || error_type.contains("authentication")
}

fn map_openai_error(error: OpenAIError) -> KitabError {
    match error {
        OpenAIError::Reqwest(reqwest_error) => match reqwest_error.status() {
            Some(reqwest::StatusCode::TOO_MANY_REQUESTS) => {
                KitabError::LlmRateLimit { retry_after: None }
            }
            Some(reqwest::StatusCode::UNAUTHORIZED) | Some(reqwest::StatusCode::FORBIDDEN) => {
                KitabError::ApiAuth(format!("LLM authentication failed: {reqwest_error}"))
            }
            _ => KitabError::Llm(format!("LLM request failed: {reqwest_error}")),
        },
        OpenAIError::ApiError(api_error) if is_rate_limit_api_error(&api_error) => {
            KitabError::LlmRateLimit { retry_after: None }
        }
        OpenAIError::ApiError(api_error) if is_auth_api_error(&api_error) => {
            KitabError::ApiAuth(format!("LLM authentication failed: {api_error}"))
        }
        OpenAIError::ApiError(api_error) => KitabError::Llm(format!("LLM API error: {api_error}")),
        OpenAIError::StreamError(message) => {
            let lowered = message.to_lowercase();
            if lowered.contains("429") || lowered.contains("rate limit") {
                KitabError::LlmRateLimit { retry_after: None }
            } else if lowered.contains("401") || lowered.contains("unauthorized") {
                KitabError::ApiAuth(format!("LLM authentication failed: {message}"))
            } else {
                KitabError::Llm(format!("LLM stream failed: {message}"))
            }
        }
        OpenAIError::JSONDeserialize(err) => {
            KitabError::Llm(format!("Failed to parse LLM response: {err}"))
        }
        OpenAIError::InvalidArgument(message) => KitabError::Validation(message),
        other => KitabError::Llm(other.to_string()),
    }
}
