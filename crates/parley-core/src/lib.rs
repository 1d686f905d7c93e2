//! Business logic and repository trait definitions for Parley.
//!
//! This crate defines the "ports" (repository traits) that the infrastructure
//! layer implements, the pure algorithms over them (chain reconstruction,
//! cursor pagination, pricing, routing), and the turn orchestrator. It
//! depends only on `parley-types` -- never on `parley-infra` or any
//! database/IO crate.

pub mod agent;
pub mod billing;
pub mod chat;
pub mod llm;
pub mod orchestrator;
pub mod routing;
pub mod tools;

#[cfg(test)]
pub(crate) mod test_support;
