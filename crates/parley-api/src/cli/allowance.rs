//! Allowance commands: show, grant.

use anyhow::Result;
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;

use parley_core::billing::pricing::format_cents;
use parley_core::billing::usage_log::UsageLogRepository;
use parley_types::allowance::{AllowanceEntry, TokenUsageLog};
use serde::Serialize;

use crate::state::AppState;

/// Usage rows shown under the balance.
const RECENT_USAGE_LIMIT: u32 = 10;

#[derive(Debug, Serialize)]
struct AllowanceReport {
    allowance: Option<AllowanceEntry>,
    recent_usage: Vec<TokenUsageLog>,
}

async fn load_report(state: &AppState, user_id: &str) -> Result<AllowanceReport> {
    let (allowance, recent_usage) = tokio::try_join!(
        state.orchestrator.ledger().entry(user_id),
        state.usage_logs.list_usage_logs(user_id, RECENT_USAGE_LIMIT),
    )?;
    Ok(AllowanceReport {
        allowance,
        recent_usage,
    })
}

/// Show a user's allowance and their most recent charges.
pub async fn show_allowance(state: &AppState, user_id: &str, json: bool) -> Result<()> {
    let report = load_report(state, user_id).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    match report.allowance {
        Some(entry) => {
            print_entry(&entry);
            if !report.recent_usage.is_empty() {
                print_usage(&report.recent_usage);
            }
        }
        None => {
            println!();
            println!(
                "  {} No allowance for '{}'. Grant one with: {}",
                style("i").blue().bold(),
                style(user_id).bold(),
                style(format!("parley allowance grant {user_id} <cents>")).yellow()
            );
            println!();
        }
    }

    Ok(())
}

/// Reset a user's allowance so alloted and remaining both equal `cents`.
pub async fn grant_allowance(state: &AppState, user_id: &str, cents: i64, json: bool) -> Result<()> {
    if cents < 0 {
        anyhow::bail!("allowance must not be negative");
    }

    let entry = state.orchestrator.ledger().grant(user_id, cents).await?;
    tracing::info!(user_id, cents, "Allowance granted");

    if json {
        println!("{}", serde_json::to_string_pretty(&entry)?);
        return Ok(());
    }

    println!(
        "  {} Granted {} to '{}'",
        style("✓").green().bold(),
        format_cents(cents),
        style(user_id).bold()
    );
    print_entry(&entry);

    Ok(())
}

fn print_entry(entry: &AllowanceEntry) {
    let mut table = Table::new();
    table.load_preset(presets::UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);

    table.set_header(vec![
        Cell::new("User").fg(Color::White),
        Cell::new("Alloted").fg(Color::White),
        Cell::new("Remaining").fg(Color::White),
        Cell::new("Updated").fg(Color::White),
    ]);

    let remaining_color = if entry.remaining_allowance == 0 {
        Color::Red
    } else {
        Color::Green
    };

    table.add_row(vec![
        Cell::new(&entry.user_id).fg(Color::Cyan),
        Cell::new(format_cents(entry.alloted_allowance)),
        Cell::new(format_cents(entry.remaining_allowance)).fg(remaining_color),
        Cell::new(entry.updated_at.format("%Y-%m-%d %H:%M").to_string()).fg(Color::DarkGrey),
    ]);

    println!();
    println!("{table}");
    println!();
}

fn print_usage(logs: &[TokenUsageLog]) {
    let mut table = Table::new();
    table.load_preset(presets::UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);

    table.set_header(vec![
        Cell::new("When").fg(Color::White),
        Cell::new("Model").fg(Color::White),
        Cell::new("Input").fg(Color::White),
        Cell::new("Output").fg(Color::White),
        Cell::new("Cost").fg(Color::White),
    ]);

    for log in logs {
        table.add_row(vec![
            Cell::new(log.created_at.format("%Y-%m-%d %H:%M").to_string()).fg(Color::DarkGrey),
            Cell::new(format!("{}/{}", log.provider, log.model)).fg(Color::Cyan),
            Cell::new(log.input_tokens),
            Cell::new(log.output_tokens),
            Cell::new(format_cents(log.cost_cents)),
        ]);
    }

    println!("  {}", style("Recent usage").bold());
    println!("{table}");
    println!();
}
