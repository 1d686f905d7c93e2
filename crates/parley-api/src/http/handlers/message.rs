//! Turn retrieval.
//!
//! GET /api/v1/conversations/{id}/messages returns the conversation's turns
//! in chain order (root first, following predecessor links).

use std::time::Instant;

use axum::extract::{Path, State};
use uuid::Uuid;

use parley_types::turn::Turn;

use crate::http::error::AppError;
use crate::http::extractors::auth::AuthenticatedUser;
use crate::http::handlers::parse_uuid;
use crate::http::response::ApiResponse;
use crate::state::AppState;

/// GET /api/v1/conversations/{id}/messages
pub async fn get_messages(
    State(state): State<AppState>,
    auth: AuthenticatedUser,
    Path(id): Path<String>,
) -> Result<ApiResponse<Vec<Turn>>, AppError> {
    let start = Instant::now();
    let request_id = Uuid::now_v7().to_string();

    let id = parse_uuid(&id)?;
    let turns = state.directory.get_messages(&auth.user_id, &id).await?;

    let elapsed = start.elapsed().as_millis() as u64;
    Ok(ApiResponse::success(turns, request_id, elapsed)
        .with_link("conversation", &format!("/api/v1/conversations/{id}")))
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::{Request, StatusCode, header};
    use chrono::Utc;
    use uuid::Uuid;

    use parley_core::chat::repository::TurnRepository;
    use parley_types::turn::{SenderType, Turn, TurnMetadata, TurnPart};

    use crate::http::test_support::{TestApp, send_json};

    fn get(uri: &str, key: &str) -> Request<Body> {
        Request::builder()
            .uri(uri)
            .header("x-api-key", key)
            .body(Body::empty())
            .unwrap()
    }

    fn turn(conversation_id: Uuid, sender: SenderType, text: &str, previous: Option<Uuid>) -> Turn {
        Turn {
            id: Uuid::now_v7(),
            conversation_id,
            sender_type: sender,
            content: vec![TurnPart::text(text)],
            previous_turn_id: previous,
            metadata: TurnMetadata::default(),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_messages_in_chain_order() {
        let app = TestApp::new().await;
        let key = app.user("alice", 100).await;
        let conversation = app.conversation("alice").await;

        let first = turn(conversation, SenderType::User, "Hi", None);
        let second = turn(conversation, SenderType::Assistant, "Hello", Some(first.id));
        let third = turn(conversation, SenderType::User, "Weather?", Some(second.id));
        let turns = app.state.directory.turns();
        turns.insert_turn(&first).await.unwrap();
        turns.insert_turn(&second).await.unwrap();
        turns.insert_turn(&third).await.unwrap();

        let (status, body) = send_json(
            app.router(),
            get(&format!("/api/v1/conversations/{conversation}/messages"), &key),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let ids: Vec<String> = body["data"]
            .as_array()
            .unwrap()
            .iter()
            .map(|t| t["id"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(
            ids,
            vec![first.id.to_string(), second.id.to_string(), third.id.to_string()]
        );
        assert_eq!(body["data"][1]["sender_type"], "assistant");
        assert_eq!(body["data"][1]["content"][0]["type"], "text");
    }

    #[tokio::test]
    async fn test_empty_conversation() {
        let app = TestApp::new().await;
        let key = app.user("alice", 100).await;
        let conversation = app.conversation("alice").await;

        let (status, body) = send_json(
            app.router(),
            get(&format!("/api/v1/conversations/{conversation}/messages"), &key),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"], serde_json::json!([]));
    }

    #[tokio::test]
    async fn test_foreign_conversation_hidden() {
        let app = TestApp::new().await;
        let key = app.user("mallory", 100).await;
        let conversation = app.conversation("alice").await;

        let request = Request::builder()
            .uri(format!("/api/v1/conversations/{conversation}/messages"))
            .header(header::AUTHORIZATION, format!("Bearer {key}"))
            .body(Body::empty())
            .unwrap();
        let (status, _) = send_json(app.router(), request).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
