//! HTTP request handlers for the REST API.

use uuid::Uuid;

use crate::http::error::AppError;

pub mod chat;
pub mod conversation;
pub mod message;

/// Parse a UUID from a path parameter or body field, returning a 400 on invalid format.
pub(crate) fn parse_uuid(s: &str) -> Result<Uuid, AppError> {
    s.parse::<Uuid>()
        .map_err(|_| AppError::Validation(format!("Invalid UUID: {s}")))
}
