//! SSE streaming chat endpoint.
//!
//! POST /api/v1/chat
//!
//! Starts an exchange on an existing conversation and relays its events as
//! Server-Sent Events. Validation, ownership, and routing failures are
//! reported as a regular JSON error before the stream opens; failures after
//! that arrive in-band as `error` events.
//!
//! SSE event types (the JSON payload repeats the name under `type`):
//! - `start` - `{ conversation_id, user_turn_id, provider, model }`
//! - `text_delta` / `reasoning_delta` - `{ text }`
//! - `tool_call` - `{ call_id, tool_name, input, execution }`
//! - `tool_result` - `{ call_id, tool_name, output, is_error }`
//! - `error` - `{ message }`
//! - `finish` - `{ assistant_turn_id, finish_reason, usage, cost_cents }`
//!
//! Closing the connection does not stop the exchange: the orchestrator task
//! still persists the assistant turn and settles the allowance.

use std::convert::Infallible;
use std::time::Duration;

use axum::Json;
use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use serde::Deserialize;
use tokio_stream::Stream;
use tracing::field::Empty;

use parley_core::agent::prompt::UserPreferences;
use parley_core::orchestrator::{ExchangeEvent, ExchangeHandle, ExchangeRequest, InboundMessage};
use parley_observe::genai_attrs::{
    GEN_AI_PROVIDER_NAME, GEN_AI_REQUEST_MODEL, GEN_AI_RESPONSE_FINISH_REASONS,
    GEN_AI_USAGE_INPUT_TOKENS, GEN_AI_USAGE_OUTPUT_TOKENS, OP_CHAT,
};

use crate::http::error::AppError;
use crate::http::extractors::auth::AuthenticatedUser;
use crate::http::handlers::parse_uuid;
use crate::state::AppState;

const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);

/// Request body for the streaming chat endpoint.
#[derive(Debug, Deserialize)]
pub struct ChatRequestBody {
    pub conversation_id: String,
    /// Falls back to the configured default persona when absent.
    #[serde(default)]
    pub persona_id: Option<String>,
    /// The client's view of the conversation; the last entry is the new input.
    pub messages: Vec<InboundMessage>,
    #[serde(default)]
    pub preferences: UserPreferences,
}

/// POST /api/v1/chat - SSE streaming chat.
pub async fn stream_chat(
    State(state): State<AppState>,
    auth: AuthenticatedUser,
    Json(body): Json<ChatRequestBody>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    let conversation_id = parse_uuid(&body.conversation_id)?;
    let persona_id = body
        .persona_id
        .filter(|p| !p.trim().is_empty())
        .unwrap_or_else(|| state.config.default_persona.clone());

    let span = tracing::info_span!(
        "http.chat",
        user_id = %auth.user_id,
        gen_ai.operation.name = OP_CHAT,
        gen_ai.conversation.id = %conversation_id,
        gen_ai.provider.name = Empty,
        gen_ai.request.model = Empty,
        gen_ai.usage.input_tokens = Empty,
        gen_ai.usage.output_tokens = Empty,
        gen_ai.response.finish_reasons = Empty,
    );

    let ExchangeHandle { mut events, task } = state
        .orchestrator
        .begin(ExchangeRequest {
            user_id: auth.user_id,
            conversation_id,
            persona_id,
            messages: body.messages,
            preferences: body.preferences,
        })
        .await?;

    // Detached; the exchange settles even if nobody reads the stream.
    let watcher_span = span.clone();
    tokio::spawn(async move {
        match task.await {
            Ok(outcome) => tracing::debug!(
                parent: &watcher_span,
                assistant_turn_id = ?outcome.assistant_turn_id,
                cost_cents = outcome.cost_cents,
                remaining = ?outcome.remaining_allowance,
                title = ?outcome.title,
                "Exchange settled"
            ),
            Err(e) => tracing::error!(parent: &watcher_span, "Exchange task failed: {e}"),
        }
    });

    let sse_stream = async_stream::stream! {
        while let Some(event) = events.recv().await {
            record_event(&span, &event);
            match Event::default().event(event.name()).json_data(&event) {
                Ok(sse) => yield Ok::<_, Infallible>(sse),
                Err(e) => tracing::warn!(parent: &span, event = event.name(), "Failed to encode SSE event: {e}"),
            }
        }
    };

    Ok(Sse::new(sse_stream).keep_alive(KeepAlive::new().interval(KEEP_ALIVE_INTERVAL)))
}

/// Copy GenAI attributes carried by `event` onto the request span.
fn record_event(span: &tracing::Span, event: &ExchangeEvent) {
    match event {
        ExchangeEvent::Start {
            provider, model, ..
        } => {
            span.record(GEN_AI_PROVIDER_NAME, provider.as_str());
            span.record(GEN_AI_REQUEST_MODEL, model.as_str());
        }
        ExchangeEvent::Finish {
            finish_reason,
            usage,
            ..
        } => {
            span.record(GEN_AI_USAGE_INPUT_TOKENS, usage.input_tokens);
            span.record(GEN_AI_USAGE_OUTPUT_TOKENS, usage.output_tokens);
            span.record(GEN_AI_RESPONSE_FINISH_REASONS, finish_reason.to_string().as_str());
        }
        _ => {}
    }
}
