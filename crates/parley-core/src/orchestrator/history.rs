//! Conversions between stored turn content and provider messages, plus the
//! content/metadata merge used by continuation updates.

use std::collections::HashSet;

use parley_types::llm::{ImageAttachment, Message, ToolCall};
use parley_types::turn::{SenderType, TurnMetadata, TurnPart};

use super::types::InboundMessage;

/// Flatten the client's message list into provider messages.
///
/// An assistant message is split at each tool result: the text and calls
/// before it become one assistant message, each result a tool message.
pub fn to_provider_messages(inbound: &[InboundMessage]) -> Vec<Message> {
    let mut out = Vec::with_capacity(inbound.len());
    for message in inbound {
        match message.role {
            SenderType::User => out.push(user_message(&message.content)),
            SenderType::Assistant => push_assistant(&mut out, &message.content),
        }
    }
    out
}

fn user_message(parts: &[TurnPart]) -> Message {
    let mut msg = Message::user(parley_types::turn::collect_text(parts));
    msg.images = parts
        .iter()
        .filter_map(|p| match p {
            TurnPart::File {
                url, media_type, ..
            } if p.is_image() => Some(ImageAttachment {
                url: url.clone(),
                media_type: media_type.clone(),
            }),
            _ => None,
        })
        .collect();
    msg
}

fn push_assistant(out: &mut Vec<Message>, parts: &[TurnPart]) {
    let mut current = Message::assistant("");
    for part in parts {
        match part {
            TurnPart::Text { text } => current.content.push_str(text),
            TurnPart::ToolCall {
                call_id,
                tool_name,
                input,
            } => current.tool_calls.push(ToolCall {
                id: call_id.clone(),
                name: tool_name.clone(),
                input: input.clone(),
            }),
            TurnPart::ToolResult {
                call_id, output, ..
            } => {
                flush(out, &mut current);
                out.push(Message::tool_result(call_id.clone(), render_output(output)));
            }
            TurnPart::Reasoning { .. } | TurnPart::File { .. } | TurnPart::Error { .. } => {}
        }
    }
    flush(out, &mut current);
}

fn flush(out: &mut Vec<Message>, current: &mut Message) {
    if !current.content.is_empty() || !current.tool_calls.is_empty() {
        out.push(std::mem::replace(current, Message::assistant("")));
    }
}

/// Tool output as the string a provider expects.
pub fn render_output(output: &serde_json::Value) -> String {
    match output {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Content of a continued assistant turn: the stored parts, then any tool
/// results the client supplied that are not stored yet, then the new parts.
pub fn merge_content(
    stored: &[TurnPart],
    client_view: &[TurnPart],
    new_parts: Vec<TurnPart>,
) -> Vec<TurnPart> {
    let known: HashSet<&str> = stored
        .iter()
        .filter_map(|p| match p {
            TurnPart::ToolResult { call_id, .. } => Some(call_id.as_str()),
            _ => None,
        })
        .collect();

    let mut merged = stored.to_vec();
    merged.extend(
        client_view
            .iter()
            .filter(|p| matches!(p, TurnPart::ToolResult { call_id, .. } if !known.contains(call_id.as_str())))
            .cloned(),
    );
    merged.extend(new_parts);
    merged
}

/// Metadata of a continued assistant turn: usage and tools accumulate,
/// steps are renumbered after the stored ones, identity and finish reason
/// take the latest values.
pub fn merge_metadata(stored: &TurnMetadata, fresh: TurnMetadata) -> TurnMetadata {
    let mut usage = stored.usage.unwrap_or_default();
    if let Some(new_usage) = &fresh.usage {
        usage.accumulate(new_usage);
    }

    let offset = stored.steps.len() as u32;
    let mut steps = stored.steps.clone();
    steps.extend(fresh.steps.into_iter().map(|mut s| {
        s.step += offset;
        s
    }));

    let mut tools_invoked = stored.tools_invoked.clone();
    tools_invoked.extend(fresh.tools_invoked);

    TurnMetadata {
        provider: fresh.provider.or_else(|| stored.provider.clone()),
        model: fresh.model.or_else(|| stored.model.clone()),
        finish_reason: fresh.finish_reason.or(stored.finish_reason),
        usage: Some(usage),
        tools_invoked,
        steps,
        client_hints: stored.client_hints.clone(),
    }
}
