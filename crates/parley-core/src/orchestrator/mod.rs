//! Turn orchestrator: the control flow of one chat exchange.
//!
//! `begin` runs the pre-stream phase inline (ownership check, validation,
//! routing, user-turn persistence) so its failures reach the caller as
//! hard errors. Streaming and settlement then run on a spawned task that
//! does not depend on anyone reading the event channel, so a client
//! disconnect never cancels persistence or billing.

pub mod history;
pub mod types;

use std::sync::Arc;

use chrono::Utc;
use futures_util::StreamExt;
use futures_util::future::join_all;
use parley_types::allowance::TokenUsageLog;
use parley_types::conversation::Conversation;
use parley_types::error::RepositoryError;
use parley_types::llm::{CompletionRequest, Message, StopReason, ToolCall, ToolSpec, Usage};
use parley_types::tool::ToolExecution;
use parley_types::turn::{
    SenderType, StepDetail, Turn, TurnMetadata, TurnPart, TurnUpdate, collect_text,
};
use tokio::sync::mpsc::{self, UnboundedSender};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::agent::prompt::SystemPromptBuilder;
use crate::agent::title::generate_title;
use crate::billing::ledger::{AllowanceLedger, AllowanceRepository};
use crate::billing::pricing::price_for;
use crate::billing::usage_log::UsageLogRepository;
use crate::chat::repository::{ConversationRepository, TurnRepository};
use crate::llm::box_provider::BoxLlmProvider;
use crate::llm::registry::ProviderRegistry;
use crate::routing::router::{ModelRouter, RouteContext};
use crate::tools::registry::ToolRegistry;

use self::history::{merge_content, merge_metadata, render_output, to_provider_messages};
pub use self::types::{
    ExchangeEvent, ExchangeHandle, ExchangeOutcome, ExchangeRequest, InboundMessage,
    OrchestratorError, OrchestratorSettings,
};

/// Attempts at linking a new turn to the current latest turn before giving
/// up on a contended conversation.
const MAX_LINK_ATTEMPTS: u32 = 3;

/// State carried from `begin` into the background task.
struct ExchangeContext {
    user_id: String,
    conversation: Conversation,
    user_turn: Option<Turn>,
    /// The inbound last message when it is an assistant message.
    continuation: Option<InboundMessage>,
    provider: String,
    model: String,
    system: String,
    history: Vec<Message>,
    tools: Vec<ToolSpec>,
}

/// What one provider stream produced.
#[derive(Default)]
struct StepResult {
    text: String,
    reasoning: String,
    tool_calls: Vec<ToolCall>,
    stop_reason: Option<StopReason>,
    usage: Usage,
    error: Option<String>,
}

/// Accumulated assistant output across steps.
#[derive(Default)]
struct Transcript {
    parts: Vec<TurnPart>,
    steps: Vec<StepDetail>,
    usage: Usage,
    tools_invoked: Vec<String>,
}

/// Drives chat exchanges end to end.
///
/// Generic over every repository port; all cross-request consistency is
/// left to the datastore.
pub struct TurnOrchestrator<T, C, A, U>
where
    T: TurnRepository + 'static,
    C: ConversationRepository + 'static,
    A: AllowanceRepository + 'static,
    U: UsageLogRepository + 'static,
{
    turns: T,
    conversations: C,
    ledger: AllowanceLedger<A>,
    usage_logs: U,
    router: ModelRouter,
    providers: ProviderRegistry,
    tools: ToolRegistry,
    settings: OrchestratorSettings,
}

impl<T, C, A, U> TurnOrchestrator<T, C, A, U>
where
    T: TurnRepository + 'static,
    C: ConversationRepository + 'static,
    A: AllowanceRepository + 'static,
    U: UsageLogRepository + 'static,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        turns: T,
        conversations: C,
        allowances: A,
        usage_logs: U,
        router: ModelRouter,
        providers: ProviderRegistry,
        tools: ToolRegistry,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            turns,
            conversations,
            ledger: AllowanceLedger::new(allowances),
            usage_logs,
            router,
            providers,
            tools,
            settings,
        }
    }

    pub fn ledger(&self) -> &AllowanceLedger<A> {
        &self.ledger
    }

    /// Start an exchange.
    ///
    /// Returns once the user turn is persisted and the stream task is
    /// spawned. Errors here mean nothing was sent to a model.
    #[tracing::instrument(
        name = "exchange.begin",
        skip_all,
        fields(conversation_id = %request.conversation_id, persona = %request.persona_id)
    )]
    pub async fn begin(
        self: &Arc<Self>,
        request: ExchangeRequest,
    ) -> Result<ExchangeHandle, OrchestratorError> {
        let ExchangeRequest {
            user_id,
            conversation_id,
            persona_id,
            messages,
            preferences,
        } = request;

        // RECEIVED
        let Some(last) = messages.last().cloned() else {
            return Err(OrchestratorError::Validation(
                "messages must not be empty".to_string(),
            ));
        };
        if last.content.is_empty() {
            return Err(OrchestratorError::Validation(
                "last message has no content".to_string(),
            ));
        }

        let conversation = match self.conversations.get_conversation(&conversation_id).await? {
            Some(c) if c.owner_id == user_id && !c.is_deleted() => c,
            _ => return Err(OrchestratorError::ConversationNotFound),
        };

        // ROUTED. Resolution is pure, so it runs before any write and a
        // missing provider leaves no orphaned user turn behind.
        let context = RouteContext {
            has_image_attachments: messages
                .iter()
                .any(|m| m.content.iter().any(TurnPart::is_image)),
        };
        let route = self.router.resolve(&persona_id, &context);
        let Some(provider) = self.providers.get(&route.provider) else {
            return Err(OrchestratorError::Routing(format!(
                "provider '{}' is not configured",
                route.provider
            )));
        };
        let capabilities = provider.capabilities().clone();
        if context.has_image_attachments && !capabilities.vision {
            return Err(OrchestratorError::Routing(format!(
                "provider '{}' does not accept image input",
                route.provider
            )));
        }

        // USER_TURN_PERSISTED
        let (user_turn, continuation) = match last.role {
            SenderType::User => {
                let turn = self
                    .insert_linked(
                        conversation.id,
                        SenderType::User,
                        last.content.clone(),
                        TurnMetadata {
                            client_hints: last.metadata.clone(),
                            ..Default::default()
                        },
                    )
                    .await?;
                info!(turn_id = %turn.id, "User turn persisted");
                self.touch(&conversation.id).await;
                (Some(turn), None)
            }
            SenderType::Assistant => {
                debug!("Last message is from the assistant; continuing its turn");
                (None, Some(last))
            }
        };

        let system = SystemPromptBuilder::build(
            self.settings.system_prompt_template.as_deref(),
            &preferences,
            Utc::now(),
        );

        let (tx, rx) = mpsc::unbounded_channel();
        let _ = tx.send(ExchangeEvent::Start {
            conversation_id: conversation.id,
            user_turn_id: user_turn.as_ref().map(|t| t.id),
            provider: route.provider.clone(),
            model: route.model_id.clone(),
        });

        let ctx = ExchangeContext {
            user_id,
            conversation,
            user_turn,
            continuation,
            provider: route.provider,
            model: route.model_id,
            system,
            history: to_provider_messages(&messages),
            tools: if capabilities.tool_calling {
                self.tools.specs()
            } else {
                Vec::new()
            },
        };

        let this = Arc::clone(self);
        let task = tokio::spawn(async move { this.run(ctx, tx).await });

        Ok(ExchangeHandle { events: rx, task })
    }

    /// STREAMING through SETTLED.
    async fn run(&self, ctx: ExchangeContext, tx: UnboundedSender<ExchangeEvent>) -> ExchangeOutcome {
        let (transcript, finish_reason) = match self.providers.get(&ctx.provider) {
            Some(provider) => self.stream_exchange(provider, &ctx, &tx).await,
            None => {
                let message = format!("provider '{}' disappeared", ctx.provider);
                let _ = tx.send(ExchangeEvent::Error {
                    message: message.clone(),
                });
                let transcript = Transcript {
                    parts: vec![TurnPart::Error { message }],
                    ..Default::default()
                };
                (transcript, StopReason::Error)
            }
        };

        self.settle(ctx, transcript, finish_reason, tx).await
    }

    /// Run model steps until the model stops, a call needs the client, an
    /// error occurs, or the step budget is spent.
    async fn stream_exchange(
        &self,
        provider: &BoxLlmProvider,
        ctx: &ExchangeContext,
        tx: &UnboundedSender<ExchangeEvent>,
    ) -> (Transcript, StopReason) {
        let mut messages = ctx.history.clone();
        let mut transcript = Transcript::default();
        let mut finish_reason = StopReason::EndTurn;

        for step in 1..=self.settings.max_tool_steps {
            let request = CompletionRequest {
                model: ctx.model.clone(),
                messages: messages.clone(),
                system: Some(ctx.system.clone()),
                max_tokens: self.settings.max_output_tokens,
                temperature: Some(self.settings.temperature),
                stream: true,
                tools: ctx.tools.clone(),
            };

            let result = stream_step(provider, request, tx).await;
            transcript.usage.accumulate(&result.usage);

            if !result.reasoning.is_empty() {
                transcript.parts.push(TurnPart::Reasoning {
                    text: result.reasoning.clone(),
                });
            }
            if !result.text.is_empty() {
                transcript.parts.push(TurnPart::text(result.text.clone()));
            }

            let stop_reason = match (&result.error, result.stop_reason) {
                (Some(_), _) => StopReason::Error,
                (None, Some(reason)) => reason,
                (None, None) if !result.tool_calls.is_empty() => StopReason::ToolUse,
                (None, None) => StopReason::EndTurn,
            };
            transcript.steps.push(StepDetail {
                step,
                finish_reason: Some(stop_reason),
                usage: result.usage,
                tool_names: result.tool_calls.iter().map(|c| c.name.clone()).collect(),
            });
            finish_reason = stop_reason;

            if let Some(message) = result.error {
                warn!(step, error = %message, "Provider stream failed mid-exchange");
                transcript.parts.push(TurnPart::Error {
                    message: message.clone(),
                });
                let _ = tx.send(ExchangeEvent::Error { message });
                break;
            }

            if result.tool_calls.is_empty() {
                break;
            }

            let mut server_calls = Vec::new();
            let mut deferred = 0usize;
            for call in &result.tool_calls {
                let execution = self.tools.execution_for(&call.name);
                transcript.parts.push(TurnPart::ToolCall {
                    call_id: call.id.clone(),
                    tool_name: call.name.clone(),
                    input: call.input.clone(),
                });
                transcript.tools_invoked.push(call.name.clone());
                let _ = tx.send(ExchangeEvent::ToolCall {
                    call_id: call.id.clone(),
                    tool_name: call.name.clone(),
                    input: call.input.clone(),
                    execution,
                });
                match execution {
                    ToolExecution::Server => server_calls.push(call),
                    ToolExecution::Client | ToolExecution::Passthrough => deferred += 1,
                }
            }

            let outputs = join_all(server_calls.iter().map(|call| self.tools.execute(call))).await;

            messages.push(Message {
                tool_calls: result.tool_calls.clone(),
                ..Message::assistant(result.text)
            });
            for (call, output) in server_calls.iter().zip(outputs) {
                let (output, is_error) = match output {
                    Ok(value) => (value, false),
                    Err(e) => {
                        warn!(tool = %call.name, error = %e, "Tool call failed");
                        (serde_json::json!({ "error": e.to_string() }), true)
                    }
                };
                messages.push(Message::tool_result(call.id.clone(), render_output(&output)));
                transcript.parts.push(TurnPart::ToolResult {
                    call_id: call.id.clone(),
                    tool_name: call.name.clone(),
                    output: output.clone(),
                    is_error,
                });
                let _ = tx.send(ExchangeEvent::ToolResult {
                    call_id: call.id.clone(),
                    tool_name: call.name.clone(),
                    output,
                    is_error,
                });
            }

            if deferred > 0 {
                debug!(step, deferred, "Waiting on client-side tool results");
                finish_reason = StopReason::ToolUse;
                break;
            }
            if step == self.settings.max_tool_steps {
                warn!(step, "Tool step budget exhausted");
                finish_reason = StopReason::ToolUse;
            }
        }

        (transcript, finish_reason)
    }

    /// Persist the assistant turn, charge the allowance, log usage, and
    /// title the conversation. Nothing here fails the exchange.
    async fn settle(
        &self,
        ctx: ExchangeContext,
        transcript: Transcript,
        finish_reason: StopReason,
        tx: UnboundedSender<ExchangeEvent>,
    ) -> ExchangeOutcome {
        let usage = transcript.usage;
        let assistant_text = collect_text(&transcript.parts);
        let metadata = TurnMetadata {
            provider: Some(ctx.provider.clone()),
            model: Some(ctx.model.clone()),
            finish_reason: Some(finish_reason),
            usage: Some(usage),
            tools_invoked: transcript.tools_invoked,
            steps: transcript.steps,
            client_hints: None,
        };

        let assistant_turn_id = match self
            .persist_assistant_turn(&ctx, transcript.parts, metadata)
            .await
        {
            Ok(id) => Some(id),
            Err(e) => {
                error!(
                    conversation_id = %ctx.conversation.id,
                    error = %e,
                    "Failed to persist assistant turn"
                );
                None
            }
        };
        self.touch(&ctx.conversation.id).await;

        let price = price_for(&ctx.provider, &ctx.model, &self.settings.model_pricing);
        let cost_cents = price.cost_cents(usage.input_tokens, usage.output_tokens);

        let remaining_allowance = match self.ledger.deduct(&ctx.user_id, cost_cents).await {
            Ok(remaining) => {
                info!(user_id = %ctx.user_id, cost_cents, remaining, "Allowance deducted");
                Some(remaining)
            }
            Err(e) => {
                warn!(user_id = %ctx.user_id, cost_cents, error = %e, "Allowance deduction failed");
                None
            }
        };

        let log = TokenUsageLog {
            id: Uuid::now_v7(),
            user_id: ctx.user_id.clone(),
            conversation_id: ctx.conversation.id,
            turn_id: assistant_turn_id,
            provider: ctx.provider.clone(),
            model: ctx.model.clone(),
            input_tokens: usage.input_tokens,
            output_tokens: usage.output_tokens,
            reasoning_tokens: usage.reasoning_tokens,
            cached_tokens: usage.cached_tokens,
            input_price_per_million: price.input_per_million,
            output_price_per_million: price.output_per_million,
            cost_cents,
            created_at: Utc::now(),
        };
        if let Err(e) = self.usage_logs.insert_usage_log(&log).await {
            warn!(user_id = %ctx.user_id, error = %e, "Failed to write token usage log");
        }

        let _ = tx.send(ExchangeEvent::Finish {
            assistant_turn_id,
            finish_reason,
            usage,
            cost_cents,
        });
        drop(tx);

        let title = self.auto_title(&ctx, &assistant_text).await;

        ExchangeOutcome {
            user_turn_id: ctx.user_turn.as_ref().map(|t| t.id),
            assistant_turn_id,
            finish_reason,
            usage,
            cost_cents,
            remaining_allowance,
            title,
        }
    }

    /// Insert a new assistant turn after the freshly read latest turn, or
    /// extend that turn in place when this exchange continues it.
    async fn persist_assistant_turn(
        &self,
        ctx: &ExchangeContext,
        parts: Vec<TurnPart>,
        metadata: TurnMetadata,
    ) -> Result<Uuid, RepositoryError> {
        if let Some(client_view) = &ctx.continuation {
            let latest = self.turns.get_latest_turn(&ctx.conversation.id).await?;
            if let Some(existing) = latest.filter(|t| t.sender_type == SenderType::Assistant) {
                let update = TurnUpdate {
                    content: merge_content(&existing.content, &client_view.content, parts),
                    metadata: merge_metadata(&existing.metadata, metadata),
                };
                self.turns.update_turn(&existing.id, &update).await?;
                info!(turn_id = %existing.id, "Assistant turn continued");
                return Ok(existing.id);
            }
            // Nothing to continue: store the client's view and the new
            // output together as a fresh turn.
            let mut content = client_view.content.clone();
            content.extend(parts);
            let turn = self
                .insert_linked(ctx.conversation.id, SenderType::Assistant, content, metadata)
                .await?;
            return Ok(turn.id);
        }

        let turn = self
            .insert_linked(ctx.conversation.id, SenderType::Assistant, parts, metadata)
            .await?;
        info!(turn_id = %turn.id, "Assistant turn persisted");
        Ok(turn.id)
    }

    /// Insert a turn whose predecessor is the conversation's current latest
    /// turn. A conflict means another turn claimed that predecessor first;
    /// re-read and retry so the chain stays linear.
    async fn insert_linked(
        &self,
        conversation_id: Uuid,
        sender_type: SenderType,
        content: Vec<TurnPart>,
        metadata: TurnMetadata,
    ) -> Result<Turn, RepositoryError> {
        let mut attempt = 1;
        loop {
            let latest = self.turns.get_latest_turn(&conversation_id).await?;
            let turn = Turn {
                id: Uuid::now_v7(),
                conversation_id,
                sender_type,
                content: content.clone(),
                previous_turn_id: latest.map(|t| t.id),
                metadata: metadata.clone(),
                created_at: Utc::now(),
            };
            match self.turns.insert_turn(&turn).await {
                Ok(_) => return Ok(turn),
                Err(RepositoryError::Conflict(reason)) if attempt < MAX_LINK_ATTEMPTS => {
                    debug!(attempt, %reason, "Predecessor claimed concurrently; retrying");
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn touch(&self, conversation_id: &Uuid) {
        if let Err(e) = self
            .conversations
            .touch_conversation(conversation_id, Utc::now())
            .await
        {
            warn!(conversation_id = %conversation_id, error = %e, "Failed to bump updated_at");
        }
    }

    /// Title an untitled conversation after its first exchange.
    async fn auto_title(&self, ctx: &ExchangeContext, assistant_text: &str) -> Option<String> {
        let first_exchange = ctx
            .user_turn
            .as_ref()
            .is_some_and(|t| t.previous_turn_id.is_none());
        if !self.settings.auto_title || ctx.conversation.title.is_some() || !first_exchange {
            return None;
        }
        let user_text = ctx.user_turn.as_ref().map(Turn::text).unwrap_or_default();
        if user_text.trim().is_empty() || assistant_text.trim().is_empty() {
            return None;
        }

        let provider = self.providers.get(&ctx.provider)?;
        match generate_title(provider, &user_text, assistant_text, &ctx.model).await {
            Ok(title) => match self
                .conversations
                .update_title(&ctx.conversation.id, &title)
                .await
            {
                Ok(()) => {
                    info!(conversation_id = %ctx.conversation.id, %title, "Conversation titled");
                    Some(title)
                }
                Err(e) => {
                    warn!(error = %e, "Failed to store generated title");
                    None
                }
            },
            Err(e) => {
                warn!(error = %e, "Title generation failed");
                None
            }
        }
    }
}

/// Consume one provider stream, forwarding deltas as they arrive.
#[tracing::instrument(
    name = "gen_ai.chat",
    skip_all,
    fields(
        gen_ai.provider.name = %provider.name(),
        gen_ai.request.model = %request.model,
        gen_ai.usage.input_tokens = tracing::field::Empty,
        gen_ai.usage.output_tokens = tracing::field::Empty,
    )
)]
async fn stream_step(
    provider: &BoxLlmProvider,
    request: CompletionRequest,
    tx: &UnboundedSender<ExchangeEvent>,
) -> StepResult {
    use parley_types::llm::StreamEvent;

    let mut result = StepResult::default();
    let mut stream = provider.stream(request);

    while let Some(event) = stream.next().await {
        match event {
            Ok(StreamEvent::Connected) => {}
            Ok(StreamEvent::TextDelta { text }) => {
                result.text.push_str(&text);
                let _ = tx.send(ExchangeEvent::TextDelta { text });
            }
            Ok(StreamEvent::ThinkingDelta { thinking }) => {
                result.reasoning.push_str(&thinking);
                let _ = tx.send(ExchangeEvent::ReasoningDelta { text: thinking });
            }
            Ok(StreamEvent::ToolUseComplete { id, name, input }) => {
                result.tool_calls.push(ToolCall { id, name, input });
            }
            Ok(StreamEvent::MessageDelta { stop_reason }) => {
                result.stop_reason = Some(stop_reason);
            }
            Ok(StreamEvent::Usage(usage)) => result.usage.accumulate(&usage),
            Ok(StreamEvent::Done) => break,
            Err(e) => {
                result.error = Some(e.to_string());
                break;
            }
        }
    }

    let span = tracing::Span::current();
    span.record("gen_ai.usage.input_tokens", result.usage.input_tokens);
    span.record("gen_ai.usage.output_tokens", result.usage.output_tokens);
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::prompt::UserPreferences;
    use crate::chat::directory::ConversationDirectory;
    use crate::test_support::{InMemoryStore, ScriptedProvider, text_script, tool_call_script};
    use crate::tools::executor::{BoxToolExecutor, ToolExecutor};
    use parley_types::config::{GlobalConfig, ModelPricing};
    use parley_types::llm::{LlmError, ProviderCapabilities, StreamEvent};
    use parley_types::tool::{ToolError, ToolKind};
    use std::sync::Mutex;

    type Orchestrator = TurnOrchestrator<InMemoryStore, InMemoryStore, InMemoryStore, InMemoryStore>;

    struct FakeWeather {
        fail: bool,
    }

    impl ToolExecutor for FakeWeather {
        fn kind(&self) -> ToolKind {
            ToolKind::Weather
        }

        async fn execute(&self, input: serde_json::Value) -> Result<serde_json::Value, ToolError> {
            if self.fail {
                return Err(ToolError::Upstream("geocoder timed out".to_string()));
            }
            Ok(serde_json::json!({"location": input["location"], "temperature_c": 18.5}))
        }
    }

    struct Harness {
        store: InMemoryStore,
        orchestrator: Arc<Orchestrator>,
        requests: Arc<Mutex<Vec<CompletionRequest>>>,
        conversation: Conversation,
    }

    fn settings() -> OrchestratorSettings {
        let mut config = GlobalConfig::default();
        config.auto_title = false;
        config.model_pricing = vec![ModelPricing {
            provider_name: "openai".to_string(),
            model_pattern: "gpt-4o-mini".to_string(),
            input_cost_per_million: 0.1,
            output_cost_per_million: 0.4,
        }];
        OrchestratorSettings::from_config(&config)
    }

    async fn harness_with(
        provider: ScriptedProvider,
        tools: ToolRegistry,
        settings: OrchestratorSettings,
    ) -> Harness {
        let store = InMemoryStore::default();
        let requests = provider.requests();
        let mut providers = ProviderRegistry::new();
        providers.register("openai", BoxLlmProvider::new(provider));

        let orchestrator = Arc::new(TurnOrchestrator::new(
            store.clone(),
            store.clone(),
            store.clone(),
            store.clone(),
            ModelRouter::from_config(&GlobalConfig::default()),
            providers,
            tools,
            settings,
        ));
        orchestrator.ledger().grant("alice", 100).await.unwrap();

        let directory = ConversationDirectory::new(store.clone(), store.clone());
        let conversation = directory.create("alice", None).await.unwrap();

        Harness {
            store,
            orchestrator,
            requests,
            conversation,
        }
    }

    async fn harness(provider: ScriptedProvider) -> Harness {
        harness_with(provider, ToolRegistry::new(), settings()).await
    }

    fn request(h: &Harness, messages: Vec<InboundMessage>) -> ExchangeRequest {
        ExchangeRequest {
            user_id: "alice".to_string(),
            conversation_id: h.conversation.id,
            persona_id: "balanced".to_string(),
            messages,
            preferences: UserPreferences::default(),
        }
    }

    async fn run_to_end(h: &Harness, messages: Vec<InboundMessage>) -> (Vec<ExchangeEvent>, ExchangeOutcome) {
        let mut handle = h.orchestrator.begin(request(h, messages)).await.unwrap();
        let mut events = Vec::new();
        while let Some(event) = handle.events.recv().await {
            events.push(event);
        }
        let outcome = handle.task.await.unwrap();
        (events, outcome)
    }

    fn directory(h: &Harness) -> ConversationDirectory<InMemoryStore, InMemoryStore> {
        ConversationDirectory::new(h.store.clone(), h.store.clone())
    }

    fn big_usage() -> Usage {
        Usage {
            input_tokens: 500_000,
            output_tokens: 200_000,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_exchange_charges_and_links_turns() {
        let provider =
            ScriptedProvider::new("openai").with_script(text_script("Hello there!", big_usage()));
        let h = harness(provider).await;

        let (events, outcome) = run_to_end(&h, vec![InboundMessage::user_text("Hi")]).await;

        assert_eq!(outcome.cost_cents, 13);
        assert_eq!(outcome.remaining_allowance, Some(87));
        assert_eq!(h.orchestrator.ledger().get_remaining("alice").await.unwrap(), 87);

        let turns = directory(&h)
            .get_messages("alice", &h.conversation.id)
            .await
            .unwrap();
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].sender_type, SenderType::User);
        assert_eq!(turns[0].previous_turn_id, None);
        assert_eq!(turns[1].sender_type, SenderType::Assistant);
        assert_eq!(turns[1].previous_turn_id, Some(turns[0].id));
        assert_eq!(turns[1].text(), "Hello there!");
        assert_eq!(turns[1].metadata.model.as_deref(), Some("gpt-4o-mini"));

        let logs = h.store.usage_logs();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].cost_cents, 13);
        assert_eq!(logs[0].turn_id, Some(turns[1].id));
        assert_eq!(logs[0].input_tokens, 500_000);

        assert!(matches!(events.first(), Some(ExchangeEvent::Start { .. })));
        assert!(events.contains(&ExchangeEvent::TextDelta {
            text: "Hello there!".to_string()
        }));
        assert!(matches!(
            events.last(),
            Some(ExchangeEvent::Finish {
                cost_cents: 13,
                finish_reason: StopReason::EndTurn,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_second_exchange_links_to_previous_assistant_turn() {
        let provider = ScriptedProvider::new("openai")
            .with_script(text_script("One", Usage::default()))
            .with_script(text_script("Two", Usage::default()));
        let h = harness(provider).await;

        run_to_end(&h, vec![InboundMessage::user_text("first")]).await;
        run_to_end(
            &h,
            vec![
                InboundMessage::user_text("first"),
                InboundMessage {
                    role: SenderType::Assistant,
                    content: vec![TurnPart::text("One")],
                    metadata: None,
                },
                InboundMessage::user_text("second"),
            ],
        )
        .await;

        let turns = directory(&h)
            .get_messages("alice", &h.conversation.id)
            .await
            .unwrap();
        let texts: Vec<String> = turns.iter().map(Turn::text).collect();
        assert_eq!(texts, vec!["first", "One", "second", "Two"]);

        // The second request carried the full history.
        let requests = h.requests.lock().unwrap();
        assert_eq!(requests[1].messages.len(), 3);
    }

    #[tokio::test]
    async fn test_server_tool_feeds_next_step() {
        let provider = ScriptedProvider::new("openai")
            .with_script(tool_call_script(
                "call_w",
                "weather",
                serde_json::json!({"location": "Bergen"}),
                Usage {
                    input_tokens: 100,
                    output_tokens: 10,
                    ..Default::default()
                },
            ))
            .with_script(text_script(
                "It is 18.5°C in Bergen.",
                Usage {
                    input_tokens: 150,
                    output_tokens: 20,
                    ..Default::default()
                },
            ));
        let mut tools = ToolRegistry::new();
        tools.register(BoxToolExecutor::new(FakeWeather { fail: false }));
        let h = harness_with(provider, tools, settings()).await;

        let (events, outcome) = run_to_end(&h, vec![InboundMessage::user_text("Weather in Bergen?")]).await;

        assert_eq!(outcome.finish_reason, StopReason::EndTurn);
        assert_eq!(outcome.usage.input_tokens, 250);
        assert_eq!(outcome.usage.output_tokens, 30);

        let assistant = h
            .store
            .turns()
            .into_iter()
            .find(|t| t.sender_type == SenderType::Assistant)
            .unwrap();
        assert!(matches!(assistant.content[0], TurnPart::ToolCall { .. }));
        assert!(matches!(
            &assistant.content[1],
            TurnPart::ToolResult { is_error: false, output, .. } if output["temperature_c"] == 18.5
        ));
        assert_eq!(assistant.text(), "It is 18.5°C in Bergen.");
        assert_eq!(assistant.metadata.steps.len(), 2);
        assert_eq!(assistant.metadata.tools_invoked, vec!["weather".to_string()]);

        let requests = h.requests.lock().unwrap();
        assert_eq!(requests.len(), 2);
        let second = &requests[1].messages;
        assert_eq!(second[second.len() - 1].tool_call_id.as_deref(), Some("call_w"));

        assert!(events.iter().any(|e| matches!(
            e,
            ExchangeEvent::ToolCall {
                execution: ToolExecution::Server,
                ..
            }
        )));
    }

    #[tokio::test]
    async fn test_tool_failure_is_in_band() {
        let provider = ScriptedProvider::new("openai")
            .with_script(tool_call_script(
                "call_w",
                "weather",
                serde_json::json!({"location": "Nowhere"}),
                Usage::default(),
            ))
            .with_script(text_script("I could not fetch the weather.", Usage::default()));
        let mut tools = ToolRegistry::new();
        tools.register(BoxToolExecutor::new(FakeWeather { fail: true }));
        let h = harness_with(provider, tools, settings()).await;

        let (events, outcome) = run_to_end(&h, vec![InboundMessage::user_text("Weather?")]).await;

        assert!(outcome.assistant_turn_id.is_some());
        assert!(events.iter().any(|e| matches!(e, ExchangeEvent::ToolResult { is_error: true, .. })));
        let assistant = h
            .store
            .turns()
            .into_iter()
            .find(|t| t.sender_type == SenderType::Assistant)
            .unwrap();
        assert!(
            assistant
                .content
                .iter()
                .any(|p| matches!(p, TurnPart::ToolResult { is_error: true, .. }))
        );
    }

    #[tokio::test]
    async fn test_client_tool_then_continuation_updates_in_place() {
        let provider = ScriptedProvider::new("openai")
            .with_script(tool_call_script(
                "call_t",
                "current_time",
                serde_json::json!({}),
                Usage {
                    input_tokens: 40,
                    output_tokens: 5,
                    ..Default::default()
                },
            ))
            .with_script(text_script(
                "It is 09:30.",
                Usage {
                    input_tokens: 60,
                    output_tokens: 8,
                    ..Default::default()
                },
            ));
        let h = harness(provider).await;

        let (_, first) = run_to_end(&h, vec![InboundMessage::user_text("What time is it?")]).await;
        assert_eq!(first.finish_reason, StopReason::ToolUse);
        let assistant_id = first.assistant_turn_id.unwrap();

        // Client ran the clock and resubmits the assistant message with the result.
        let (events, second) = run_to_end(
            &h,
            vec![
                InboundMessage::user_text("What time is it?"),
                InboundMessage {
                    role: SenderType::Assistant,
                    content: vec![
                        TurnPart::ToolCall {
                            call_id: "call_t".to_string(),
                            tool_name: "current_time".to_string(),
                            input: serde_json::json!({}),
                        },
                        TurnPart::ToolResult {
                            call_id: "call_t".to_string(),
                            tool_name: "current_time".to_string(),
                            output: serde_json::json!("09:30"),
                            is_error: false,
                        },
                    ],
                    metadata: None,
                },
            ],
        )
        .await;

        assert!(matches!(
            events.first(),
            Some(ExchangeEvent::Start {
                user_turn_id: None,
                ..
            })
        ));
        assert_eq!(second.user_turn_id, None);
        assert_eq!(second.assistant_turn_id, Some(assistant_id));

        let turns = h.store.turns();
        assert_eq!(turns.len(), 2);
        let assistant = turns.iter().find(|t| t.id == assistant_id).unwrap();
        assert_eq!(assistant.content.len(), 3);
        assert!(matches!(assistant.content[1], TurnPart::ToolResult { .. }));
        assert_eq!(assistant.text(), "It is 09:30.");
        assert_eq!(assistant.metadata.steps.len(), 2);
        assert_eq!(assistant.metadata.usage.unwrap().input_tokens, 100);
        assert_eq!(assistant.metadata.finish_reason, Some(StopReason::EndTurn));
    }

    #[tokio::test]
    async fn test_provider_error_keeps_partial_output() {
        let provider = ScriptedProvider::new("openai").with_script(vec![
            Ok(StreamEvent::TextDelta {
                text: "Partial answ".to_string(),
            }),
            Err(LlmError::Stream("connection reset".to_string())),
        ]);
        let h = harness(provider).await;

        let (events, outcome) = run_to_end(&h, vec![InboundMessage::user_text("Tell me")]).await;

        assert_eq!(outcome.finish_reason, StopReason::Error);
        assert!(events.iter().any(|e| matches!(e, ExchangeEvent::Error { .. })));
        let assistant = h
            .store
            .turns()
            .into_iter()
            .find(|t| t.sender_type == SenderType::Assistant)
            .unwrap();
        assert_eq!(assistant.text(), "Partial answ");
        assert!(matches!(assistant.content.last(), Some(TurnPart::Error { .. })));
    }

    #[tokio::test]
    async fn test_validation_errors_write_nothing() {
        let h = harness(ScriptedProvider::new("openai")).await;

        let err = h.orchestrator.begin(request(&h, Vec::new())).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::Validation(_)));

        let mut foreign = request(&h, vec![InboundMessage::user_text("hi")]);
        foreign.user_id = "mallory".to_string();
        let err = h.orchestrator.begin(foreign).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::ConversationNotFound));

        assert!(h.store.turns().is_empty());
        assert!(h.requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unconfigured_provider_is_routing_error() {
        let h = harness(ScriptedProvider::new("openai")).await;
        let mut req = request(&h, vec![InboundMessage::user_text("hi")]);
        // "fast" routes to groq, which is not registered here.
        req.persona_id = "fast".to_string();

        let err = h.orchestrator.begin(req).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::Routing(_)));
        assert!(h.store.turns().is_empty());
    }

    fn text_only() -> ProviderCapabilities {
        ProviderCapabilities {
            streaming: true,
            tool_calling: false,
            vision: false,
            max_output_tokens: 4096,
        }
    }

    #[tokio::test]
    async fn test_image_for_text_only_provider_is_routing_error() {
        let h = harness(ScriptedProvider::new("openai").with_capabilities(text_only())).await;
        let req = request(
            &h,
            vec![InboundMessage {
                role: SenderType::User,
                content: vec![TurnPart::File {
                    url: "https://cdn.example.com/cat.png".to_string(),
                    media_type: "image/png".to_string(),
                    name: None,
                }],
                metadata: None,
            }],
        );

        let err = h.orchestrator.begin(req).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::Routing(_)));
        assert!(h.store.turns().is_empty());
        assert!(h.requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_tools_withheld_from_provider_without_tool_calling() {
        let provider = ScriptedProvider::new("openai")
            .with_capabilities(text_only())
            .with_script(text_script("Plain answer", Usage::default()));
        let mut tools = ToolRegistry::new();
        tools.register(BoxToolExecutor::new(FakeWeather { fail: false }));
        let h = harness_with(provider, tools, settings()).await;

        run_to_end(&h, vec![InboundMessage::user_text("Weather?")]).await;

        let requests = h.requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        assert!(requests[0].tools.is_empty());
    }

    #[tokio::test]
    async fn test_image_attachment_reroutes_fast_persona() {
        let h = harness(ScriptedProvider::new("openai")).await;
        let mut req = request(
            &h,
            vec![InboundMessage {
                role: SenderType::User,
                content: vec![
                    TurnPart::text("What's in this picture?"),
                    TurnPart::File {
                        url: "https://cdn.example.com/cat.png".to_string(),
                        media_type: "image/png".to_string(),
                        name: None,
                    },
                ],
                metadata: None,
            }],
        );
        req.persona_id = "fast".to_string();

        let mut handle = h.orchestrator.begin(req).await.unwrap();
        match handle.events.recv().await {
            Some(ExchangeEvent::Start {
                provider, model, ..
            }) => {
                assert_eq!(provider, "openai");
                assert_eq!(model, "gpt-4o-mini");
            }
            other => panic!("expected start event, got {other:?}"),
        }
        handle.task.await.unwrap();
        assert_eq!(h.requests.lock().unwrap()[0].messages[0].images.len(), 1);
    }

    #[tokio::test]
    async fn test_client_disconnect_does_not_cancel_settlement() {
        let provider =
            ScriptedProvider::new("openai").with_script(text_script("Still here", big_usage()));
        let h = harness(provider).await;

        let handle = h
            .orchestrator
            .begin(request(&h, vec![InboundMessage::user_text("Hi")]))
            .await
            .unwrap();
        drop(handle.events);
        let outcome = handle.task.await.unwrap();

        assert!(outcome.assistant_turn_id.is_some());
        assert_eq!(h.orchestrator.ledger().get_remaining("alice").await.unwrap(), 87);
        assert_eq!(h.store.turns().len(), 2);
    }

    #[tokio::test]
    async fn test_settlement_failures_are_swallowed() {
        let provider =
            ScriptedProvider::new("openai").with_script(text_script("Answer", big_usage()));
        let h = harness(provider).await;
        h.store.fail_usage_logs();
        h.store.fail_deductions();

        let (events, outcome) = run_to_end(&h, vec![InboundMessage::user_text("Hi")]).await;

        assert!(outcome.assistant_turn_id.is_some());
        assert_eq!(outcome.remaining_allowance, None);
        assert!(matches!(events.last(), Some(ExchangeEvent::Finish { .. })));
        assert!(h.store.usage_logs().is_empty());
    }

    #[tokio::test]
    async fn test_user_turn_links_past_newer_orphan() {
        let provider = ScriptedProvider::new("openai")
            .with_script(text_script("One", Usage::default()))
            .with_script(text_script("Two", Usage::default()));
        let h = harness(provider).await;
        run_to_end(&h, vec![InboundMessage::user_text("first")]).await;

        let orphan = Turn {
            id: Uuid::now_v7(),
            conversation_id: h.conversation.id,
            sender_type: SenderType::User,
            content: vec![TurnPart::text("lost")],
            previous_turn_id: Some(Uuid::now_v7()),
            metadata: TurnMetadata::default(),
            created_at: Utc::now(),
        };
        h.store.insert_turn(&orphan).await.unwrap();

        run_to_end(&h, vec![InboundMessage::user_text("second")]).await;

        let turns = directory(&h)
            .get_messages("alice", &h.conversation.id)
            .await
            .unwrap();
        let texts: Vec<String> = turns.iter().map(Turn::text).collect();
        assert_eq!(texts, vec!["first", "One", "second", "Two"]);
    }

    #[tokio::test]
    async fn test_user_turn_retries_past_predecessor_conflicts() {
        let h = harness(ScriptedProvider::new("openai")).await;
        h.store.conflict_next_inserts(MAX_LINK_ATTEMPTS - 1);

        let (_, outcome) = run_to_end(&h, vec![InboundMessage::user_text("Hi")]).await;
        assert!(outcome.user_turn_id.is_some());
        assert_eq!(h.store.turns().len(), 2);
    }

    #[tokio::test]
    async fn test_user_turn_conflict_exhaustion_aborts_before_model_call() {
        let h = harness(ScriptedProvider::new("openai")).await;
        h.store.conflict_next_inserts(MAX_LINK_ATTEMPTS);

        let err = h
            .orchestrator
            .begin(request(&h, vec![InboundMessage::user_text("Hi")]))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            OrchestratorError::Persistence(RepositoryError::Conflict(_))
        ));
        assert!(h.requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_first_exchange_is_auto_titled() {
        let provider = ScriptedProvider::new("openai")
            .with_script(text_script("High tide is at 14:05.", Usage::default()))
            .with_completion("\"Tide Times\"");
        let mut settings = settings();
        settings.auto_title = true;
        let h = harness_with(provider, ToolRegistry::new(), settings).await;

        let (_, outcome) = run_to_end(&h, vec![InboundMessage::user_text("When is high tide?")]).await;

        assert_eq!(outcome.title.as_deref(), Some("Tide Times"));
        let stored = h.store.conversation(&h.conversation.id).unwrap();
        assert_eq!(stored.title.as_deref(), Some("Tide Times"));
    }

    #[tokio::test]
    async fn test_step_budget_bounds_tool_loop() {
        let mut provider = ScriptedProvider::new("openai");
        for i in 0..5 {
            provider = provider.with_script(tool_call_script(
                &format!("call_{i}"),
                "weather",
                serde_json::json!({"location": "Oslo"}),
                Usage::default(),
            ));
        }
        let mut tools = ToolRegistry::new();
        tools.register(BoxToolExecutor::new(FakeWeather { fail: false }));
        let mut settings = settings();
        settings.max_tool_steps = 2;
        let h = harness_with(provider, tools, settings).await;

        let (_, outcome) = run_to_end(&h, vec![InboundMessage::user_text("Loop")]).await;

        assert_eq!(h.requests.lock().unwrap().len(), 2);
        assert_eq!(outcome.finish_reason, StopReason::ToolUse);
    }
}
