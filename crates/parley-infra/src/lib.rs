//! Infrastructure layer for Parley.
//!
//! Contains implementations of the ports defined in `parley-core`: SQLite
//! storage for conversations, turns, allowances, usage logs, and API keys;
//! the OpenAI-compatible streaming provider; server-side tool executors;
//! and the `config.toml` loader.

pub mod config;
pub mod llm;
pub mod sqlite;
pub mod tools;
