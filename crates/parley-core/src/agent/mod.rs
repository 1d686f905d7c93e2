//! Prompt assembly and auxiliary model calls.

pub mod prompt;
pub mod title;
