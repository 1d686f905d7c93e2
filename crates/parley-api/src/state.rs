//! Application state wiring all services together.
//!
//! AppState holds the concrete service instances used by both CLI and REST API.
//! The orchestrator and directory are generic over repository traits; AppState
//! pins them to the SQLite implementations.

use std::path::PathBuf;
use std::sync::Arc;

use parley_core::chat::directory::ConversationDirectory;
use parley_core::llm::registry::ProviderRegistry;
use parley_core::orchestrator::TurnOrchestrator;
use parley_core::orchestrator::types::OrchestratorSettings;
use parley_core::routing::router::ModelRouter;
use parley_core::tools::registry::ToolRegistry;
use parley_infra::config::{data_dir, load_global_config};
use parley_infra::llm::build_registry;
use parley_infra::sqlite::allowance::SqliteAllowanceRepository;
use parley_infra::sqlite::api_key::SqliteApiKeyStore;
use parley_infra::sqlite::conversation::SqliteConversationRepository;
use parley_infra::sqlite::pool::{DatabasePool, database_url};
use parley_infra::sqlite::turn::SqliteTurnRepository;
use parley_infra::sqlite::usage_log::SqliteUsageLogRepository;
use parley_infra::tools::build_tool_registry;
use parley_types::config::GlobalConfig;

/// Concrete type aliases for the service generics pinned to infra implementations.
pub type ConcreteOrchestrator = TurnOrchestrator<
    SqliteTurnRepository,
    SqliteConversationRepository,
    SqliteAllowanceRepository,
    SqliteUsageLogRepository,
>;

pub type ConcreteDirectory = ConversationDirectory<SqliteConversationRepository, SqliteTurnRepository>;

/// Shared application state holding all services.
///
/// Used by both CLI commands and REST API handlers.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<ConcreteOrchestrator>,
    pub directory: Arc<ConcreteDirectory>,
    pub api_keys: SqliteApiKeyStore,
    pub usage_logs: SqliteUsageLogRepository,
    pub config: Arc<GlobalConfig>,
    pub data_dir: PathBuf,
}

impl AppState {
    /// Initialize the application state: load config, connect to DB, wire services.
    pub async fn init() -> anyhow::Result<Self> {
        let data_dir = data_dir();

        // Ensure data directory exists
        tokio::fs::create_dir_all(&data_dir).await?;

        let config = load_global_config(&data_dir).await;
        let db_pool = DatabasePool::new(&database_url(&data_dir)).await?;

        let providers = build_registry(&config);
        let tools = build_tool_registry(&config);

        Ok(Self::assemble(data_dir, db_pool, config, providers, tools))
    }

    /// Wire services over an open pool with the given providers and tools.
    pub fn assemble(
        data_dir: PathBuf,
        db_pool: DatabasePool,
        config: GlobalConfig,
        providers: ProviderRegistry,
        tools: ToolRegistry,
    ) -> Self {
        let turns = SqliteTurnRepository::new(db_pool.clone());
        let conversations = SqliteConversationRepository::new(db_pool.clone());
        let usage_logs = SqliteUsageLogRepository::new(db_pool.clone());

        let orchestrator = TurnOrchestrator::new(
            turns.clone(),
            conversations.clone(),
            SqliteAllowanceRepository::new(db_pool.clone()),
            usage_logs.clone(),
            ModelRouter::from_config(&config),
            providers,
            tools,
            OrchestratorSettings::from_config(&config),
        );

        Self {
            orchestrator: Arc::new(orchestrator),
            directory: Arc::new(ConversationDirectory::new(conversations, turns)),
            api_keys: SqliteApiKeyStore::new(db_pool),
            usage_logs,
            config: Arc::new(config),
            data_dir,
        }
    }
}
