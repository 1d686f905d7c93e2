//! Router test harness: a temp database, a scripted provider, and helpers.

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode};
use tower::ServiceExt;
use uuid::Uuid;

use parley_core::llm::box_provider::BoxLlmProvider;
use parley_core::llm::provider::{EventStream, LlmProvider};
use parley_core::llm::registry::ProviderRegistry;
use parley_core::tools::registry::ToolRegistry;
use parley_infra::sqlite::pool::{DatabasePool, database_url};
use parley_types::config::{GlobalConfig, ModelPricing};
use parley_types::llm::{
    CompletionRequest, CompletionResponse, LlmError, ProviderCapabilities, StopReason,
    StreamEvent, Usage,
};

use crate::http::router::build_router;
use crate::state::AppState;

/// Streams a fixed reply: "Hello there", 500k input / 200k output tokens.
struct ScriptedProvider {
    capabilities: ProviderCapabilities,
}

impl LlmProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "openai"
    }

    fn capabilities(&self) -> &ProviderCapabilities {
        &self.capabilities
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse, LlmError> {
        Ok(CompletionResponse {
            id: "cmpl-test".to_string(),
            content: "Scripted title".to_string(),
            model: request.model.clone(),
            stop_reason: StopReason::EndTurn,
            usage: Usage::default(),
        })
    }

    fn stream(&self, _request: CompletionRequest) -> EventStream {
        let events = vec![
            Ok(StreamEvent::Connected),
            Ok(StreamEvent::TextDelta {
                text: "Hello there".to_string(),
            }),
            Ok(StreamEvent::Usage(Usage {
                input_tokens: 500_000,
                output_tokens: 200_000,
                ..Usage::default()
            })),
            Ok(StreamEvent::MessageDelta {
                stop_reason: StopReason::EndTurn,
            }),
            Ok(StreamEvent::Done),
        ];
        Box::pin(futures_util::stream::iter(events))
    }
}

pub struct TestApp {
    pub state: AppState,
    _dir: tempfile::TempDir,
}

impl TestApp {
    /// Fresh database; `openai` served by the scripted provider and priced
    /// at $0.10 / $0.40 per million tokens.
    pub async fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let pool = DatabasePool::new(&database_url(dir.path())).await.unwrap();

        let config = GlobalConfig {
            auto_title: false,
            model_pricing: vec![ModelPricing {
                provider_name: "openai".to_string(),
                model_pattern: "gpt-4o-mini".to_string(),
                input_cost_per_million: 0.1,
                output_cost_per_million: 0.4,
            }],
            ..GlobalConfig::default()
        };

        let mut providers = ProviderRegistry::new();
        providers.register(
            "openai",
            BoxLlmProvider::new(ScriptedProvider {
                capabilities: ProviderCapabilities {
                    streaming: true,
                    tool_calling: true,
                    vision: true,
                    max_output_tokens: 4096,
                },
            }),
        );

        let state = AppState::assemble(
            dir.path().to_path_buf(),
            pool,
            config,
            providers,
            ToolRegistry::new(),
        );
        Self { state, _dir: dir }
    }

    pub fn router(&self) -> Router {
        build_router(self.state.clone())
    }

    /// Create a user with an allowance and return their API key.
    pub async fn user(&self, user_id: &str, cents: i64) -> String {
        let (key, _) = self.state.api_keys.create_key(user_id, "test").await.unwrap();
        self.state
            .orchestrator
            .ledger()
            .grant(user_id, cents)
            .await
            .unwrap();
        key
    }

    pub async fn conversation(&self, owner_id: &str) -> Uuid {
        self.state.directory.create(owner_id, None).await.unwrap().id
    }
}

/// Send a request and decode the JSON body.
pub async fn send_json(router: Router, request: Request<Body>) -> (StatusCode, serde_json::Value) {
    let response = router.oneshot(request).await.unwrap();
    let status = response.status();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json = if body.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&body).unwrap()
    };
    (status, json)
}
