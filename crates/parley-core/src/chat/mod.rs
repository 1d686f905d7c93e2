//! Conversation persistence abstractions and the algorithms over them.
//!
//! - `repository`: `TurnRepository` and `ConversationRepository` ports
//! - `chain`: ordering turns by predecessor links
//! - `cursor`: opaque pagination cursor codec
//! - `directory`: owner-scoped conversation management and listing

pub mod chain;
pub mod cursor;
pub mod directory;
pub mod repository;
