//! Opaque directory cursor codec.
//!
//! A cursor is the URL-safe, unpadded base64 of the JSON `PageCursor`
//! of the last item on a page.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use parley_types::conversation::PageCursor;
use parley_types::error::CursorError;

pub fn encode_cursor(cursor: &PageCursor) -> String {
    // PageCursor has only a timestamp and a uuid; serialization cannot fail.
    let json = serde_json::to_vec(cursor).unwrap_or_default();
    URL_SAFE_NO_PAD.encode(json)
}

pub fn decode_cursor(raw: &str) -> Result<PageCursor, CursorError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(raw.trim())
        .map_err(|e| CursorError::Malformed(e.to_string()))?;
    serde_json::from_slice(&bytes).map_err(|e| CursorError::Malformed(e.to_string()))
}
