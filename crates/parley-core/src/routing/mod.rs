//! Model routing.

pub mod router;
