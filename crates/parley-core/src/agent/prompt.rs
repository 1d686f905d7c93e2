//! System prompt builder.
//!
//! Substitutes the user's customization preferences into a template.
//! Placeholders: `{{name}}`, `{{occupation}}`, `{{traits}}`, `{{about}}`,
//! `{{date}}`. A template line whose only placeholders render empty is
//! dropped, so absent preferences leave no dangling labels.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const DEFAULT_TEMPLATE: &str = "You are Parley, a helpful and concise assistant.
Today's date is {{date}}.
The user's name is {{name}}.
The user works as {{occupation}}.
Respond with these traits: {{traits}}.
About the user: {{about}}

Use the available tools when they help answer the question. Cite sources for facts found with web search.";

/// Per-user customization supplied with a chat request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserPreferences {
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub occupation: Option<String>,
    #[serde(default)]
    pub traits: Vec<String>,
    #[serde(default)]
    pub about: Option<String>,
}

pub struct SystemPromptBuilder;

impl SystemPromptBuilder {
    /// Render `template` (or the built-in one) for the given preferences.
    pub fn build(template: Option<&str>, prefs: &UserPreferences, now: DateTime<Utc>) -> String {
        let template = template.unwrap_or(DEFAULT_TEMPLATE);
        let date = now.format("%A, %B %-d, %Y").to_string();
        let traits = prefs
            .traits
            .iter()
            .map(|t| t.trim())
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
            .join(", ");

        let values = [
            ("{{name}}", clean(prefs.display_name.as_deref())),
            ("{{occupation}}", clean(prefs.occupation.as_deref())),
            ("{{traits}}", traits),
            ("{{about}}", clean(prefs.about.as_deref())),
            ("{{date}}", date),
        ];

        let mut lines = Vec::new();
        for line in template.lines() {
            let placeholders: Vec<&(&str, String)> =
                values.iter().filter(|(key, _)| line.contains(key)).collect();
            if !placeholders.is_empty() && placeholders.iter().all(|(_, v)| v.is_empty()) {
                continue;
            }
            let mut rendered = line.to_string();
            for (key, value) in &placeholders {
                rendered = rendered.replace(key, value);
            }
            lines.push(rendered);
        }
        lines.join("\n").trim().to_string()
    }
}

fn clean(value: Option<&str>) -> String {
    value.map(str::trim).unwrap_or_default().to_string()
}
