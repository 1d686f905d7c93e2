//! OpenAI-compatible LLM provider implementation.
//!
//! One [`OpenAiCompatibleProvider`] per configured endpoint (OpenAI, Groq,
//! Mistral, local servers) speaking the chat completions protocol over
//! plain `reqwest`, with the SSE body parsed by `eventsource-stream`.

pub mod config;
pub mod streaming;
pub mod types;

use std::time::Duration;

use futures_util::StreamExt;
use secrecy::{ExposeSecret, SecretString};

use parley_core::llm::provider::{EventStream, LlmProvider};
use parley_types::llm::{
    CompletionRequest, CompletionResponse, LlmError, Message, MessageRole, ProviderCapabilities,
    StopReason,
};

use self::config::OpenAiCompatConfig;
use self::streaming::{map_finish_reason, map_sse_stream, map_usage};
use self::types::{
    ChatCompletion, ChatContent, ChatMessage, ChatRequest, ChatTool, ContentPart, ErrorEnvelope,
    FunctionDefinition, ImageUrl, StreamOptions, WireFunctionCall, WireToolCall,
};

/// Unified provider for any OpenAI-compatible API.
///
/// Does NOT derive Debug: the API key must never reach log output.
pub struct OpenAiCompatibleProvider {
    client: reqwest::Client,
    api_key: SecretString,
    provider_name: String,
    base_url: String,
    capabilities: ProviderCapabilities,
}

impl OpenAiCompatibleProvider {
    pub fn new(config: OpenAiCompatConfig) -> Result<Self, LlmError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(300))
            .build()
            .map_err(|e| LlmError::Provider {
                message: format!("failed to create HTTP client: {e}"),
            })?;

        Ok(Self {
            client,
            api_key: config.api_key,
            provider_name: config.provider_name,
            base_url: config.base_url,
            capabilities: config.capabilities,
        })
    }

    fn url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    fn request_builder(&self, body: &ChatRequest) -> reqwest::RequestBuilder {
        self.client
            .post(self.url())
            .bearer_auth(self.api_key.expose_secret())
            .json(body)
    }
}

/// Translate a provider-agnostic request into the chat completions shape.
pub(crate) fn build_request(request: &CompletionRequest, stream: bool) -> ChatRequest {
    let mut messages = Vec::with_capacity(request.messages.len() + 1);

    if let Some(system) = request.system.as_ref().filter(|s| !s.is_empty()) {
        messages.push(ChatMessage {
            role: "system",
            content: Some(ChatContent::Text(system.clone())),
            tool_calls: Vec::new(),
            tool_call_id: None,
        });
    }
    messages.extend(request.messages.iter().map(to_chat_message));

    let tools = request
        .tools
        .iter()
        .map(|spec| ChatTool {
            kind: "function",
            function: FunctionDefinition {
                name: spec.name.clone(),
                description: spec.description.clone(),
                parameters: spec.input_schema.clone(),
            },
        })
        .collect();

    ChatRequest {
        model: request.model.clone(),
        messages,
        max_completion_tokens: request.max_tokens,
        temperature: request.temperature,
        stream,
        stream_options: stream.then_some(StreamOptions {
            include_usage: true,
        }),
        tools,
    }
}

fn to_chat_message(msg: &Message) -> ChatMessage {
    match msg.role {
        MessageRole::System => ChatMessage {
            role: "system",
            content: Some(ChatContent::Text(msg.content.clone())),
            tool_calls: Vec::new(),
            tool_call_id: None,
        },
        MessageRole::User => {
            let content = if msg.images.is_empty() {
                ChatContent::Text(msg.content.clone())
            } else {
                let mut parts = Vec::with_capacity(msg.images.len() + 1);
                if !msg.content.is_empty() {
                    parts.push(ContentPart::Text {
                        text: msg.content.clone(),
                    });
                }
                parts.extend(msg.images.iter().map(|image| ContentPart::ImageUrl {
                    image_url: ImageUrl {
                        url: image.url.clone(),
                    },
                }));
                ChatContent::Parts(parts)
            };
            ChatMessage {
                role: "user",
                content: Some(content),
                tool_calls: Vec::new(),
                tool_call_id: None,
            }
        }
        MessageRole::Assistant => ChatMessage {
            role: "assistant",
            content: (!msg.content.is_empty()).then(|| ChatContent::Text(msg.content.clone())),
            tool_calls: msg
                .tool_calls
                .iter()
                .map(|call| WireToolCall {
                    id: call.id.clone(),
                    kind: "function",
                    function: WireFunctionCall {
                        name: call.name.clone(),
                        arguments: call.input.to_string(),
                    },
                })
                .collect(),
            tool_call_id: None,
        },
        MessageRole::Tool => ChatMessage {
            role: "tool",
            content: Some(ChatContent::Text(msg.content.clone())),
            tool_calls: Vec::new(),
            tool_call_id: msg.tool_call_id.clone(),
        },
    }
}

/// Map a non-success HTTP response to an [`LlmError`].
pub(crate) fn map_status_error(status: u16, retry_after: Option<&str>, body: &str) -> LlmError {
    let (message, code) = match serde_json::from_str::<ErrorEnvelope>(body) {
        Ok(envelope) => (
            envelope.error.message,
            envelope
                .error
                .code
                .map(|c| c.as_str().map(str::to_string).unwrap_or_else(|| c.to_string())),
        ),
        Err(_) => (body.to_string(), None),
    };

    match status {
        401 | 403 => LlmError::AuthenticationFailed,
        429 => LlmError::RateLimited {
            retry_after_ms: retry_after
                .and_then(|v| v.trim().parse::<f64>().ok())
                .map(|secs| (secs * 1000.0) as u64),
        },
        400 if code.as_deref() == Some("context_length_exceeded")
            || message.contains("maximum context length") =>
        {
            LlmError::ContextLengthExceeded
        }
        400 | 404 | 422 => LlmError::InvalidRequest(message),
        500..=599 => LlmError::Overloaded(format!("HTTP {status}: {message}")),
        _ => LlmError::Provider {
            message: format!("HTTP {status}: {message}"),
        },
    }
}

async fn send(builder: reqwest::RequestBuilder) -> Result<reqwest::Response, LlmError> {
    let response = builder.send().await.map_err(|e| LlmError::Provider {
        message: format!("HTTP request failed: {e}"),
    })?;

    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let retry_after = response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let body = response.text().await.unwrap_or_default();
    Err(map_status_error(status.as_u16(), retry_after.as_deref(), &body))
}

impl LlmProvider for OpenAiCompatibleProvider {
    fn name(&self) -> &str {
        &self.provider_name
    }

    fn capabilities(&self) -> &ProviderCapabilities {
        &self.capabilities
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let body = build_request(request, false);
        let response = send(self.request_builder(&body)).await?;

        let completion: ChatCompletion = response
            .json()
            .await
            .map_err(|e| LlmError::Deserialization(format!("failed to parse response: {e}")))?;

        let choice = completion.choices.into_iter().next();
        let stop_reason = choice
            .as_ref()
            .and_then(|c| c.finish_reason.as_deref())
            .map(map_finish_reason)
            .unwrap_or(StopReason::EndTurn);

        Ok(CompletionResponse {
            id: completion.id,
            content: choice.and_then(|c| c.message.content).unwrap_or_default(),
            model: completion.model,
            stop_reason,
            usage: completion.usage.as_ref().map(map_usage).unwrap_or_default(),
        })
    }

    fn stream(&self, request: CompletionRequest) -> EventStream {
        let body = build_request(&request, true);
        let builder = self.request_builder(&body);

        Box::pin(async_stream::try_stream! {
            let response = send(builder).await?;
            let mut events = map_sse_stream(response.bytes_stream());
            while let Some(event) = events.next().await {
                match event {
                    Ok(ev) => yield ev,
                    Err(e) => Err(e)?,
                }
            }
        })
    }
}
