//! User commands: create, keys.

use anyhow::Result;
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;

use parley_core::billing::pricing::format_cents;

use crate::state::AppState;

/// Mint an API key for `user_id` and make sure they have an allowance.
///
/// An explicit `--allowance` resets the balance; otherwise an existing row is
/// left alone and a new user gets `default_allowance_cents`.
///
/// # Examples
///
/// ```bash
/// parley user create alice
/// parley user create bob --allowance 1000 --name laptop
/// ```
pub async fn create_user(
    state: &AppState,
    user_id: &str,
    allowance: Option<i64>,
    name: &str,
    json: bool,
) -> Result<()> {
    if user_id.trim().is_empty() {
        anyhow::bail!("user id must not be empty");
    }

    let ledger = state.orchestrator.ledger();
    let entry = match (allowance, ledger.entry(user_id).await?) {
        (Some(cents), _) => ledger.grant(user_id, cents).await?,
        (None, Some(existing)) => existing,
        (None, None) => {
            ledger
                .grant(user_id, state.config.default_allowance_cents)
                .await?
        }
    };

    let (key, record) = state.api_keys.create_key(user_id, name).await?;
    tracing::info!(user_id, key_id = %record.id, "API key created");

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({
                "user_id": user_id,
                "api_key": key,
                "key": record,
                "allowance": entry,
            }))?
        );
        return Ok(());
    }

    println!();
    println!(
        "  {} User '{}' ready ({} remaining)",
        style("✓").green().bold(),
        style(user_id).bold(),
        format_cents(entry.remaining_allowance)
    );
    println!();
    println!(
        "  {} API key (save this -- it won't be shown again):",
        style("🔑").bold()
    );
    println!();
    println!("  {}", style(&key).yellow().bold());
    println!();

    Ok(())
}

/// List the keys minted for `user_id`. Only prefixes are stored.
pub async fn list_keys(state: &AppState, user_id: &str, json: bool) -> Result<()> {
    let keys = state.api_keys.list_keys(user_id).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&keys)?);
        return Ok(());
    }

    if keys.is_empty() {
        println!();
        println!(
            "  {} No API keys for '{}'. Create one with: {}",
            style("i").blue().bold(),
            style(user_id).bold(),
            style(format!("parley user create {user_id}")).yellow()
        );
        println!();
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(presets::UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);

    table.set_header(vec![
        Cell::new("Name").fg(Color::White),
        Cell::new("Prefix").fg(Color::White),
        Cell::new("Created").fg(Color::White),
        Cell::new("Last used").fg(Color::White),
    ]);

    for key in &keys {
        let last_used = key
            .last_used_at
            .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "never".to_string());
        table.add_row(vec![
            Cell::new(&key.name).fg(Color::Cyan),
            Cell::new(format!("{}…", key.key_prefix)),
            Cell::new(key.created_at.format("%Y-%m-%d %H:%M").to_string()).fg(Color::DarkGrey),
            Cell::new(last_used).fg(Color::DarkGrey),
        ]);
    }

    println!();
    println!("{table}");
    println!();

    Ok(())
}
