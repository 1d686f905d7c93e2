//! In-memory repository fakes and a scripted LLM provider for core tests.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use parley_types::allowance::{AllowanceEntry, TokenUsageLog};
use parley_types::conversation::{Conversation, PageCursor};
use parley_types::error::RepositoryError;
use parley_types::llm::{
    CompletionRequest, CompletionResponse, LlmError, ProviderCapabilities, StopReason,
    StreamEvent, Usage,
};
use parley_types::turn::{Turn, TurnUpdate};
use uuid::Uuid;

use crate::billing::ledger::AllowanceRepository;
use crate::billing::usage_log::UsageLogRepository;
use crate::chat::chain::reconstruct;
use crate::chat::repository::{ConversationRepository, TurnRepository};
use crate::llm::provider::{EventStream, LlmProvider};

#[derive(Default)]
struct State {
    conversations: HashMap<Uuid, Conversation>,
    turns: Vec<Turn>,
    allowances: HashMap<String, AllowanceEntry>,
    usage_logs: Vec<TokenUsageLog>,
    pending_conflicts: u32,
    fail_usage_logs: bool,
    fail_deductions: bool,
}

/// One shared in-memory store implementing every repository trait.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    state: Arc<Mutex<State>>,
}

impl InMemoryStore {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    pub fn put_conversation(&self, conversation: Conversation) {
        self.lock()
            .conversations
            .insert(conversation.id, conversation);
    }

    pub fn conversation(&self, id: &Uuid) -> Option<Conversation> {
        self.lock().conversations.get(id).cloned()
    }

    pub fn turns(&self) -> Vec<Turn> {
        self.lock().turns.clone()
    }

    pub fn usage_logs(&self) -> Vec<TokenUsageLog> {
        self.lock().usage_logs.clone()
    }

    /// Make the next `n` turn inserts fail with a predecessor conflict.
    pub fn conflict_next_inserts(&self, n: u32) {
        self.lock().pending_conflicts = n;
    }

    pub fn fail_usage_logs(&self) {
        self.lock().fail_usage_logs = true;
    }

    pub fn fail_deductions(&self) {
        self.lock().fail_deductions = true;
    }
}

impl TurnRepository for InMemoryStore {
    async fn insert_turn(&self, turn: &Turn) -> Result<Uuid, RepositoryError> {
        let mut state = self.lock();
        if state.pending_conflicts > 0 {
            state.pending_conflicts -= 1;
            return Err(RepositoryError::Conflict("predecessor already claimed".to_string()));
        }
        let taken = state.turns.iter().any(|t| {
            t.conversation_id == turn.conversation_id && t.previous_turn_id == turn.previous_turn_id
        });
        if taken {
            return Err(RepositoryError::Conflict("predecessor already claimed".to_string()));
        }
        state.turns.push(turn.clone());
        Ok(turn.id)
    }

    async fn update_turn(&self, turn_id: &Uuid, update: &TurnUpdate) -> Result<(), RepositoryError> {
        let mut state = self.lock();
        let turn = state
            .turns
            .iter_mut()
            .find(|t| t.id == *turn_id)
            .ok_or(RepositoryError::NotFound)?;
        turn.content = update.content.clone();
        turn.metadata = update.metadata.clone();
        Ok(())
    }

    async fn get_turns_for_conversation(
        &self,
        conversation_id: &Uuid,
    ) -> Result<Vec<Turn>, RepositoryError> {
        Ok(self
            .lock()
            .turns
            .iter()
            .filter(|t| t.conversation_id == *conversation_id)
            .cloned()
            .collect())
    }

    async fn get_latest_turn(&self, conversation_id: &Uuid) -> Result<Option<Turn>, RepositoryError> {
        let turns = self.get_turns_for_conversation(conversation_id).await?;
        Ok(reconstruct(turns).pop())
    }
}

impl ConversationRepository for InMemoryStore {
    async fn create_conversation(&self, conversation: &Conversation) -> Result<(), RepositoryError> {
        self.put_conversation(conversation.clone());
        Ok(())
    }

    async fn get_conversation(
        &self,
        conversation_id: &Uuid,
    ) -> Result<Option<Conversation>, RepositoryError> {
        Ok(self.conversation(conversation_id))
    }

    async fn list_conversations(
        &self,
        owner_id: &str,
        limit: u32,
        after: Option<&PageCursor>,
    ) -> Result<Vec<Conversation>, RepositoryError> {
        let state = self.lock();
        let mut rows: Vec<Conversation> = state
            .conversations
            .values()
            .filter(|c| c.owner_id == owner_id && !c.is_deleted())
            .filter(|c| after.is_none_or(|cursor| cursor.precedes(c)))
            .cloned()
            .collect();
        rows.sort_by(|a, b| (b.updated_at, b.id).cmp(&(a.updated_at, a.id)));
        rows.truncate(limit as usize);
        Ok(rows)
    }

    async fn count_conversations(&self, owner_id: &str) -> Result<u64, RepositoryError> {
        Ok(self
            .lock()
            .conversations
            .values()
            .filter(|c| c.owner_id == owner_id && !c.is_deleted())
            .count() as u64)
    }

    async fn update_title(&self, conversation_id: &Uuid, title: &str) -> Result<(), RepositoryError> {
        let mut state = self.lock();
        let conv = state
            .conversations
            .get_mut(conversation_id)
            .ok_or(RepositoryError::NotFound)?;
        conv.title = Some(title.to_string());
        Ok(())
    }

    async fn soft_delete_conversation(
        &self,
        conversation_id: &Uuid,
        at: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        let mut state = self.lock();
        match state.conversations.get_mut(conversation_id) {
            Some(c) if c.deleted_at.is_none() => {
                c.deleted_at = Some(at);
                Ok(())
            }
            _ => Err(RepositoryError::NotFound),
        }
    }

    async fn touch_conversation(
        &self,
        conversation_id: &Uuid,
        at: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        let mut state = self.lock();
        let conv = state
            .conversations
            .get_mut(conversation_id)
            .ok_or(RepositoryError::NotFound)?;
        conv.updated_at = at;
        Ok(())
    }
}

impl AllowanceRepository for InMemoryStore {
    async fn get_allowance(&self, user_id: &str) -> Result<Option<AllowanceEntry>, RepositoryError> {
        Ok(self.lock().allowances.get(user_id).cloned())
    }

    async fn deduct_allowance(&self, user_id: &str, cost_cents: i64) -> Result<i64, RepositoryError> {
        let mut state = self.lock();
        if state.fail_deductions {
            return Err(RepositoryError::Connection);
        }
        match state.allowances.get_mut(user_id) {
            Some(entry) => {
                entry.remaining_allowance = (entry.remaining_allowance - cost_cents).max(0);
                entry.updated_at = Utc::now();
                Ok(entry.remaining_allowance)
            }
            None => Ok(0),
        }
    }

    async fn set_allowance(&self, user_id: &str, cents: i64) -> Result<AllowanceEntry, RepositoryError> {
        let entry = AllowanceEntry {
            user_id: user_id.to_string(),
            alloted_allowance: cents,
            remaining_allowance: cents,
            updated_at: Utc::now(),
        };
        self.lock()
            .allowances
            .insert(user_id.to_string(), entry.clone());
        Ok(entry)
    }
}

impl UsageLogRepository for InMemoryStore {
    async fn insert_usage_log(&self, log: &TokenUsageLog) -> Result<(), RepositoryError> {
        let mut state = self.lock();
        if state.fail_usage_logs {
            return Err(RepositoryError::Query("usage log table unavailable".to_string()));
        }
        state.usage_logs.push(log.clone());
        Ok(())
    }

    async fn list_usage_logs(
        &self,
        user_id: &str,
        limit: u32,
    ) -> Result<Vec<TokenUsageLog>, RepositoryError> {
        let mut logs: Vec<TokenUsageLog> = self
            .lock()
            .usage_logs
            .iter()
            .filter(|l| l.user_id == user_id)
            .cloned()
            .collect();
        logs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        logs.truncate(limit as usize);
        Ok(logs)
    }
}

type Script = Vec<Result<StreamEvent, LlmError>>;

/// LLM provider that replays scripted streams, one script per `stream` call.
///
/// When the scripts run out, each call streams a plain "ok" reply.
pub struct ScriptedProvider {
    name: String,
    capabilities: ProviderCapabilities,
    scripts: Mutex<VecDeque<Script>>,
    completion: Option<String>,
    requests: Arc<Mutex<Vec<CompletionRequest>>>,
}

impl ScriptedProvider {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            capabilities: ProviderCapabilities {
                streaming: true,
                tool_calling: true,
                vision: true,
                max_output_tokens: 4096,
            },
            scripts: Mutex::new(VecDeque::new()),
            completion: None,
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_capabilities(mut self, capabilities: ProviderCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn with_script(self, script: Script) -> Self {
        self.scripts.lock().unwrap().push_back(script);
        self
    }

    pub fn with_completion(mut self, text: &str) -> Self {
        self.completion = Some(text.to_string());
        self
    }

    /// Shared log of every request this provider received.
    pub fn requests(&self) -> Arc<Mutex<Vec<CompletionRequest>>> {
        Arc::clone(&self.requests)
    }
}

/// A text reply with usage and a clean stop.
pub fn text_script(text: &str, usage: Usage) -> Script {
    vec![
        Ok(StreamEvent::Connected),
        Ok(StreamEvent::TextDelta {
            text: text.to_string(),
        }),
        Ok(StreamEvent::Usage(usage)),
        Ok(StreamEvent::MessageDelta {
            stop_reason: StopReason::EndTurn,
        }),
        Ok(StreamEvent::Done),
    ]
}

/// A single tool call with usage.
pub fn tool_call_script(call_id: &str, name: &str, input: serde_json::Value, usage: Usage) -> Script {
    vec![
        Ok(StreamEvent::ToolUseComplete {
            id: call_id.to_string(),
            name: name.to_string(),
            input,
        }),
        Ok(StreamEvent::Usage(usage)),
        Ok(StreamEvent::MessageDelta {
            stop_reason: StopReason::ToolUse,
        }),
        Ok(StreamEvent::Done),
    ]
}

impl LlmProvider for ScriptedProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> &ProviderCapabilities {
        &self.capabilities
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse, LlmError> {
        self.requests.lock().unwrap().push(request.clone());
        let content = self.completion.clone().ok_or_else(|| LlmError::Provider {
            message: "no completion scripted".to_string(),
        })?;
        Ok(CompletionResponse {
            id: "cmpl-test".to_string(),
            content,
            model: request.model.clone(),
            stop_reason: StopReason::EndTurn,
            usage: Usage::default(),
        })
    }

    fn stream(&self, request: CompletionRequest) -> EventStream {
        self.requests.lock().unwrap().push(request);
        let script = self
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| text_script("ok", Usage::default()));
        Box::pin(async_stream::stream! {
            for event in script {
                yield event;
            }
        })
    }
}
