//! Shared domain types for Parley.
//!
//! This crate contains the core domain types used across the Parley server:
//! turns, conversations, allowance ledger rows, LLM request/stream shapes,
//! tool kinds, configuration, and their associated error types.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, thiserror, schemars.

pub mod allowance;
pub mod config;
pub mod conversation;
pub mod error;
pub mod llm;
pub mod tool;
pub mod turn;
