//! Conversation title generation via LLM.
//!
//! `generate_title` asks the routed model for a short title based on the
//! first user/assistant exchange.

use parley_types::llm::{CompletionRequest, LlmError, Message};

use crate::llm::box_provider::BoxLlmProvider;

const TITLE_SYSTEM_PROMPT: &str = r#"Generate a short, descriptive title (3-7 words) for this conversation based on the first exchange. The title should capture the main topic or intent. Return ONLY the title text, nothing else.

Examples:
- "Debugging Rust lifetime errors"
- "Planning a weekend trip to Tokyo"
- "Weather in Lisbon this week""#;

/// Longest prefix of each message sent to the title call.
const EXCERPT_CHARS: usize = 2000;

#[tracing::instrument(
    name = "generate_title",
    skip(provider, first_user_message, first_assistant_message),
    fields(model = %model)
)]
pub async fn generate_title(
    provider: &BoxLlmProvider,
    first_user_message: &str,
    first_assistant_message: &str,
    model: &str,
) -> Result<String, LlmError> {
    let request = CompletionRequest {
        model: model.to_string(),
        messages: vec![
            Message::user(excerpt(first_user_message)),
            Message::assistant(excerpt(first_assistant_message)),
            Message::user("Based on our exchange above, generate a title."),
        ],
        system: Some(TITLE_SYSTEM_PROMPT.to_string()),
        max_tokens: 50,
        temperature: Some(0.3),
        stream: false,
        tools: Vec::new(),
    };

    let response = provider.complete(&request).await?;
    let title = clean_title(&response.content);
    if title.is_empty() {
        return Err(LlmError::Provider {
            message: "empty title".to_string(),
        });
    }
    Ok(title)
}

fn excerpt(text: &str) -> String {
    text.chars().take(EXCERPT_CHARS).collect()
}

/// First line, trimmed of whitespace, quotes, and a trailing period.
fn clean_title(raw: &str) -> String {
    raw.trim()
        .lines()
        .next()
        .unwrap_or_default()
        .trim()
        .trim_matches('"')
        .trim_matches('\'')
        .trim_end_matches('.')
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ScriptedProvider;

    #[test]
    fn test_clean_title_quotes_and_whitespace() {
        assert_eq!(clean_title("  \"Debugging Rust Lifetimes\"  "), "Debugging Rust Lifetimes");
        assert_eq!(clean_title("'Planning a Trip'"), "Planning a Trip");
        assert_eq!(clean_title("Weather in Oslo.\nExtra chatter"), "Weather in Oslo");
    }

    #[test]
    fn test_title_system_prompt_constraints() {
        assert!(TITLE_SYSTEM_PROMPT.contains("3-7 words"));
        assert!(TITLE_SYSTEM_PROMPT.contains("ONLY the title text"));
    }

    #[tokio::test]
    async fn test_generate_title_uses_completion() {
        let provider = BoxLlmProvider::new(ScriptedProvider::new("openai").with_completion("\"Tide Tables\""));
        let title = generate_title(&provider, "When is high tide?", "At 14:05.", "gpt-4o-mini")
            .await
            .unwrap();
        assert_eq!(title, "Tide Tables");
    }

    #[tokio::test]
    async fn test_generate_title_rejects_blank() {
        let provider = BoxLlmProvider::new(ScriptedProvider::new("openai").with_completion("  "));
        assert!(generate_title(&provider, "hi", "hello", "m").await.is_err());
    }
}
