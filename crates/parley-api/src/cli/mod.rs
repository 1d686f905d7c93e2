//! CLI command definitions for the `parley` binary.
//!
//! Uses clap derive macros for argument parsing. Resource commands follow a
//! noun-verb pattern (e.g., `parley user create`, `parley allowance show`).

pub mod allowance;
pub mod user;

use clap::{Parser, Subcommand};

/// Conversation persistence and streaming chat server.
#[derive(Parser)]
#[command(name = "parley", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output machine-readable JSON instead of styled text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress all output except errors.
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Detailed output (-v for verbose, -vv for debug/trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the REST API server.
    Serve {
        /// Port to listen on.
        #[arg(short, long, default_value = "3000", env = "PARLEY_PORT")]
        port: u16,

        /// Host to bind to.
        #[arg(long, default_value = "127.0.0.1", env = "PARLEY_HOST")]
        host: String,

        /// Also export spans through OpenTelemetry (stdout exporter).
        #[arg(long)]
        otel: bool,
    },

    /// Manage users and their API keys.
    User {
        #[command(subcommand)]
        action: UserCommand,
    },

    /// Inspect or reset allowances.
    Allowance {
        #[command(subcommand)]
        action: AllowanceCommand,
    },
}

#[derive(Subcommand)]
pub enum UserCommand {
    /// Mint an API key for a user, creating their allowance if needed.
    Create {
        /// Stable user identifier (conversations are scoped by it).
        user_id: String,

        /// Allowance in cents; defaults to `default_allowance_cents`.
        /// Resets an existing balance when given.
        #[arg(long)]
        allowance: Option<i64>,

        /// Label stored with the key.
        #[arg(long, default_value = "default")]
        name: String,
    },

    /// List a user's API keys (prefixes only).
    Keys {
        user_id: String,
    },
}

#[derive(Subcommand)]
pub enum AllowanceCommand {
    /// Show a user's allowance.
    Show {
        user_id: String,
    },

    /// Reset a user's allowance so alloted and remaining both equal `cents`.
    Grant {
        user_id: String,

        cents: i64,
    },
}

/// Default log filter for the given verbosity flags.
pub fn log_filter(verbose: u8, quiet: bool) -> &'static str {
    match verbose {
        0 if quiet => "error",
        0 => "warn",
        1 => "info,parley=debug",
        _ => "trace",
    }
}
