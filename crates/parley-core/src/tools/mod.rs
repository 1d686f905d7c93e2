//! Tool dispatch.
//!
//! Known tools form a closed set (`ToolKind`); names the server does not
//! recognize pass through to the client untouched.

pub mod executor;
pub mod registry;
