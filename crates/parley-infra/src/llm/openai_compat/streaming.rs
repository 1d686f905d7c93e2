//! OpenAI SSE stream to [`StreamEvent`] adapter.
//!
//! Parses the `text/event-stream` body with `eventsource-stream` and maps
//! each `chat.completion.chunk` onto the provider-agnostic [`StreamEvent`]
//! enum defined in `parley-types`.
//!
//! Tool call arguments arrive as partial JSON fragments across multiple
//! chunks, keyed by tool call index. They are accumulated and emitted as
//! [`StreamEvent::ToolUseComplete`] when a finish_reason arrives (or the
//! stream ends with calls still pending).

use std::collections::BTreeMap;
use std::fmt::Display;

use eventsource_stream::Eventsource;
use futures_util::{Stream, StreamExt};

use parley_core::llm::provider::EventStream;
use parley_types::llm::{LlmError, StopReason, StreamEvent, Usage};

use super::types::{ChatChunk, WireUsage};

/// Accumulates partial JSON fragments for a tool call during streaming.
#[derive(Debug, Default)]
struct ToolCallAccumulator {
    id: String,
    name: String,
    json_buffer: String,
}

impl ToolCallAccumulator {
    /// Parse the buffered arguments. Malformed JSON is kept as a string so
    /// the executor can report it in-band instead of failing the stream.
    fn into_event(self) -> StreamEvent {
        let input = if self.json_buffer.trim().is_empty() {
            serde_json::Value::Object(Default::default())
        } else {
            match serde_json::from_str(&self.json_buffer) {
                Ok(value) => value,
                Err(e) => {
                    tracing::warn!(tool = %self.name, "tool call arguments are not valid JSON: {e}");
                    serde_json::Value::String(self.json_buffer)
                }
            }
        };
        StreamEvent::ToolUseComplete {
            id: self.id,
            name: self.name,
            input,
        }
    }
}

pub(crate) fn map_usage(usage: &WireUsage) -> Usage {
    Usage {
        input_tokens: usage.prompt_tokens,
        output_tokens: usage.completion_tokens,
        reasoning_tokens: usage
            .completion_tokens_details
            .as_ref()
            .and_then(|d| d.reasoning_tokens)
            .unwrap_or(0),
        cached_tokens: usage
            .prompt_tokens_details
            .as_ref()
            .and_then(|d| d.cached_tokens)
            .unwrap_or(0),
    }
}

pub(crate) fn map_finish_reason(reason: &str) -> StopReason {
    match reason {
        "stop" => StopReason::EndTurn,
        "length" => StopReason::MaxTokens,
        "tool_calls" | "function_call" => StopReason::ToolUse,
        "content_filter" => StopReason::ContentFilter,
        other => {
            tracing::debug!(finish_reason = other, "unrecognized finish reason");
            StopReason::EndTurn
        }
    }
}

/// Stateful chunk-to-event mapper. One per response.
#[derive(Debug, Default)]
pub(crate) struct ChunkMapper {
    tool_calls: BTreeMap<u32, ToolCallAccumulator>,
}

impl ChunkMapper {
    pub fn on_chunk(&mut self, chunk: ChatChunk) -> Vec<StreamEvent> {
        let mut events = Vec::new();

        // The usage chunk (stream_options.include_usage) has empty choices.
        if let Some(usage) = chunk.usage.as_ref() {
            events.push(StreamEvent::Usage(map_usage(usage)));
        }

        for choice in chunk.choices {
            let delta = choice.delta;

            if let Some(thinking) = delta.reasoning_content.filter(|t| !t.is_empty()) {
                events.push(StreamEvent::ThinkingDelta { thinking });
            }
            if let Some(text) = delta.content.filter(|t| !t.is_empty()) {
                events.push(StreamEvent::TextDelta { text });
            }

            for tc in delta.tool_calls.unwrap_or_default() {
                let acc = self.tool_calls.entry(tc.index).or_default();
                if let Some(id) = tc.id.filter(|id| !id.is_empty()) {
                    acc.id = id;
                }
                if let Some(function) = tc.function {
                    if let Some(name) = function.name.filter(|n| !n.is_empty()) {
                        acc.name = name;
                    }
                    if let Some(arguments) = function.arguments {
                        acc.json_buffer.push_str(&arguments);
                    }
                }
            }

            if let Some(reason) = choice.finish_reason {
                let mut stop_reason = map_finish_reason(&reason);
                if !self.tool_calls.is_empty() {
                    events.extend(self.drain_tool_calls());
                    if stop_reason == StopReason::EndTurn {
                        stop_reason = StopReason::ToolUse;
                    }
                }
                events.push(StreamEvent::MessageDelta { stop_reason });
            }
        }

        events
    }

    /// Tool calls still pending when the body ends without a finish_reason.
    pub fn finish(&mut self) -> Vec<StreamEvent> {
        if self.tool_calls.is_empty() {
            return Vec::new();
        }
        let mut events = self.drain_tool_calls();
        events.push(StreamEvent::MessageDelta {
            stop_reason: StopReason::ToolUse,
        });
        events
    }

    fn drain_tool_calls(&mut self) -> Vec<StreamEvent> {
        std::mem::take(&mut self.tool_calls)
            .into_values()
            .map(ToolCallAccumulator::into_event)
            .collect()
    }
}

/// Map a raw SSE byte stream to a stream of [`StreamEvent`]s.
///
/// Emits `Connected` first and `Done` last; `data: [DONE]` ends the stream.
pub fn map_sse_stream<S, B, E>(body: S) -> EventStream
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Display + Send + 'static,
{
    Box::pin(async_stream::try_stream! {
        yield StreamEvent::Connected;

        let mut mapper = ChunkMapper::default();
        let mut events = Box::pin(body.eventsource());

        while let Some(event) = events.next().await {
            let event = event.map_err(|e| LlmError::Stream(e.to_string()))?;
            let data = event.data.trim();
            if data.is_empty() {
                continue;
            }
            if data == "[DONE]" {
                break;
            }

            let chunk: ChatChunk = serde_json::from_str(data)
                .map_err(|e| LlmError::Deserialization(format!("stream chunk: {e}")))?;
            for mapped in mapper.on_chunk(chunk) {
                yield mapped;
            }
        }

        for mapped in mapper.finish() {
            yield mapped;
        }
        yield StreamEvent::Done;
    })
}
