//! Conversation HTTP handlers.
//!
//! Endpoints:
//! - GET    /api/v1/conversations       - Page through the caller's conversations
//! - POST   /api/v1/conversations       - Create a conversation
//! - GET    /api/v1/conversations/{id}  - Get a single conversation
//! - PATCH  /api/v1/conversations/{id}  - Rename
//! - DELETE /api/v1/conversations/{id}  - Soft-delete
//!
//! Conversations owned by someone else, or already deleted, are reported as
//! not found.

use std::time::Instant;

use axum::Json;
use axum::extract::{Path, Query, State};
use serde::Deserialize;
use uuid::Uuid;

use parley_types::conversation::{Conversation, ConversationPage};

use crate::http::error::AppError;
use crate::http::extractors::auth::AuthenticatedUser;
use crate::http::extractors::query::ConversationListQuery;
use crate::http::handlers::parse_uuid;
use crate::http::response::ApiResponse;
use crate::state::AppState;

/// Request body for creating a conversation.
#[derive(Debug, Default, Deserialize)]
pub struct CreateConversationRequest {
    #[serde(default)]
    pub title: Option<String>,
}

/// Request body for renaming a conversation.
#[derive(Debug, Deserialize)]
pub struct RenameConversationRequest {
    pub title: String,
}

/// GET /api/v1/conversations - One page, most recently updated first.
pub async fn list_conversations(
    State(state): State<AppState>,
    auth: AuthenticatedUser,
    Query(query): Query<ConversationListQuery>,
) -> Result<ApiResponse<ConversationPage>, AppError> {
    let start = Instant::now();
    let request_id = Uuid::now_v7().to_string();

    let cursor = query.cursor.as_deref().filter(|c| !c.is_empty());
    let page = state
        .directory
        .list(&auth.user_id, query.limit, cursor)
        .await?;

    let next = page
        .next_cursor
        .as_ref()
        .map(|c| format!("/api/v1/conversations?limit={}&cursor={c}", query.limit));
    let elapsed = start.elapsed().as_millis() as u64;
    let mut response = ApiResponse::success(page, request_id, elapsed)
        .with_link("self", "/api/v1/conversations");
    if let Some(next) = next {
        response = response.with_link("next", &next);
    }
    Ok(response)
}

/// POST /api/v1/conversations - Create an (optionally titled) conversation.
pub async fn create_conversation(
    State(state): State<AppState>,
    auth: AuthenticatedUser,
    body: Option<Json<CreateConversationRequest>>,
) -> Result<ApiResponse<Conversation>, AppError> {
    let start = Instant::now();
    let request_id = Uuid::now_v7().to_string();

    let Json(body) = body.unwrap_or_default();
    let conversation = state
        .directory
        .create(&auth.user_id, body.title.as_deref())
        .await?;

    let href = format!("/api/v1/conversations/{}", conversation.id);
    let elapsed = start.elapsed().as_millis() as u64;
    Ok(ApiResponse::created(conversation, request_id, elapsed)
        .with_link("self", &href)
        .with_link("messages", &format!("{href}/messages")))
}

/// GET /api/v1/conversations/{id}
pub async fn get_conversation(
    State(state): State<AppState>,
    auth: AuthenticatedUser,
    Path(id): Path<String>,
) -> Result<ApiResponse<Conversation>, AppError> {
    let start = Instant::now();
    let request_id = Uuid::now_v7().to_string();

    let id = parse_uuid(&id)?;
    let conversation = state.directory.get(&auth.user_id, &id).await?;

    let elapsed = start.elapsed().as_millis() as u64;
    Ok(ApiResponse::success(conversation, request_id, elapsed)
        .with_link("messages", &format!("/api/v1/conversations/{id}/messages")))
}

/// PATCH /api/v1/conversations/{id} - Rename.
pub async fn rename_conversation(
    State(state): State<AppState>,
    auth: AuthenticatedUser,
    Path(id): Path<String>,
    Json(body): Json<RenameConversationRequest>,
) -> Result<ApiResponse<Conversation>, AppError> {
    let start = Instant::now();
    let request_id = Uuid::now_v7().to_string();

    let id = parse_uuid(&id)?;
    let conversation = state
        .directory
        .rename(&auth.user_id, &id, &body.title)
        .await?;

    let elapsed = start.elapsed().as_millis() as u64;
    Ok(ApiResponse::success(conversation, request_id, elapsed))
}

/// DELETE /api/v1/conversations/{id} - Soft-delete.
pub async fn delete_conversation(
    State(state): State<AppState>,
    auth: AuthenticatedUser,
    Path(id): Path<String>,
) -> Result<ApiResponse<serde_json::Value>, AppError> {
    let start = Instant::now();
    let request_id = Uuid::now_v7().to_string();

    let id = parse_uuid(&id)?;
    state.directory.soft_delete(&auth.user_id, &id).await?;

    let elapsed = start.elapsed().as_millis() as u64;
    Ok(ApiResponse::success(
        serde_json::json!({ "deleted": true, "id": id }),
        request_id,
        elapsed,
    ))
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use axum::body::Body;
    use axum::http::{Request, StatusCode, header};

    use crate::http::test_support::{TestApp, send_json};

    fn request(method: &str, uri: &str, key: &str, body: Option<serde_json::Value>) -> Request<Body> {
        let builder = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::AUTHORIZATION, format!("Bearer {key}"));
        match body {
            Some(json) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        }
    }

    #[tokio::test]
    async fn test_create_get_rename_delete() {
        let app = TestApp::new().await;
        let key = app.user("alice", 100).await;

        let (status, body) = send_json(
            app.router(),
            request("POST", "/api/v1/conversations", &key, Some(serde_json::json!({"title": "Trip"}))),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["data"]["title"], "Trip");
        let id = body["data"]["id"].as_str().unwrap().to_string();
        let uri = format!("/api/v1/conversations/{id}");

        let (status, body) = send_json(
            app.router(),
            request("PATCH", &uri, &key, Some(serde_json::json!({"title": "  Lisbon trip "}))),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["title"], "Lisbon trip");

        let (status, _) = send_json(
            app.router(),
            request("PATCH", &uri, &key, Some(serde_json::json!({"title": "   "}))),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send_json(app.router(), request("DELETE", &uri, &key, None)).await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = send_json(app.router(), request("GET", &uri, &key, None)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["errors"][0]["code"], "CONVERSATION_NOT_FOUND");

        let (status, _) = send_json(app.router(), request("DELETE", &uri, &key, None)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_create_without_body() {
        let app = TestApp::new().await;
        let key = app.user("alice", 100).await;

        let (status, body) =
            send_json(app.router(), request("POST", "/api/v1/conversations", &key, None)).await;
        assert_eq!(status, StatusCode::CREATED);
        assert!(body["data"]["title"].is_null());
    }

    #[tokio::test]
    async fn test_list_pages_through_everything() {
        let app = TestApp::new().await;
        let key = app.user("alice", 100).await;
        for _ in 0..5 {
            app.conversation("alice").await;
        }
        app.conversation("bob").await;

        let mut seen = HashSet::new();
        let mut uri = "/api/v1/conversations?limit=2".to_string();
        loop {
            let (status, body) = send_json(app.router(), request("GET", &uri, &key, None)).await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(body["data"]["totalCount"], 5);
            for item in body["data"]["items"].as_array().unwrap() {
                assert!(seen.insert(item["id"].as_str().unwrap().to_string()));
            }
            if !body["data"]["hasMore"].as_bool().unwrap() {
                assert!(body["data"]["nextCursor"].is_null());
                break;
            }
            uri = body["_links"]["next"].as_str().unwrap().to_string();
        }
        assert_eq!(seen.len(), 5);
    }

    #[tokio::test]
    async fn test_malformed_cursor() {
        let app = TestApp::new().await;
        let key = app.user("alice", 100).await;

        let (status, body) = send_json(
            app.router(),
            request("GET", "/api/v1/conversations?cursor=%25%25not-a-cursor", &key, None),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["errors"][0]["code"], "INVALID_CURSOR");
    }

    #[tokio::test]
    async fn test_invalid_id_is_validation_error() {
        let app = TestApp::new().await;
        let key = app.user("alice", 100).await;

        let (status, body) =
            send_json(app.router(), request("GET", "/api/v1/conversations/nope", &key, None)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["errors"][0]["code"], "VALIDATION_ERROR");
    }
}
