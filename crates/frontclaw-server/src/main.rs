//! frontclaw host binary.
//!
//! Loads the configuration, discovers plugins, spawns their sandboxes, and
//! serves the chat API until ctrl-c.

use frontclaw_memory::{EnvelopeKeys, InMemoryStore, MemoryStore, SecureStore};
use frontclaw_orchestrator::{load_plugins, LoaderOptions, Orchestrator, SkillRouter};
use frontclaw_sandbox::{
    BridgeConfig, DbBackend, DbQueryOptions, ReqwestFetcher, SyscallHandler,
};
use frontclaw_server::chat::ChatDriver;
use frontclaw_server::config::ServerConfig;
use frontclaw_server::http::{router, AppState};
use frontclaw_server::llm::{ChatModel, EchoModel};
use frontclaw_server::persistence::InMemoryConversationStore;
use frontclaw_contract::ErrorObject;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Placeholder row store used until a real database backend is wired in.
/// Every call is a typed failure so plugins see a stable code, not a panic.
struct UnconfiguredDb;

#[async_trait::async_trait]
impl DbBackend for UnconfiguredDb {
    async fn query(&self, _sql: &str, _params: Vec<Value>) -> Result<Value, ErrorObject> {
        Err(ErrorObject::new("DB_UNAVAILABLE", "no database configured"))
    }

    async fn get_items(&self, _table: &str, _options: DbQueryOptions) -> Result<Value, ErrorObject> {
        Err(ErrorObject::new("DB_UNAVAILABLE", "no database configured"))
    }

    async fn get_item(&self, _table: &str, _id: &Value) -> Result<Value, ErrorObject> {
        Err(ErrorObject::new("DB_UNAVAILABLE", "no database configured"))
    }
}

fn build_memory_store(config: &ServerConfig) -> Result<Arc<dyn MemoryStore>, String> {
    match &config.memory.encryption_key {
        Some(key) => {
            let keys = EnvelopeKeys::from_config(key, config.memory.signing_key.as_deref())
                .map_err(|e| e.to_string())?;
            info!("memory: in-process store with secure envelope");
            Ok(Arc::new(SecureStore::new(InMemoryStore::new(), keys)))
        }
        None => {
            info!("memory: plain in-process store");
            Ok(Arc::new(InMemoryStore::new()))
        }
    }
}

fn build_model(config: &ServerConfig) -> Result<Arc<dyn ChatModel>, String> {
    match config.llm.provider.as_str() {
        "echo" => Ok(Arc::new(EchoModel)),
        other => Err(format!(
            "unknown LLM provider '{other}' (configure a provider adapter, or use 'echo')"
        )),
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "frontclaw.toml".to_string());
    let config = match ServerConfig::load(&config_path) {
        Ok(config) => config,
        Err(e) => {
            warn!("{e}; using defaults");
            ServerConfig::default()
        }
    };

    let memory = match build_memory_store(&config) {
        Ok(memory) => memory,
        Err(e) => {
            error!("memory configuration: {e}");
            std::process::exit(1);
        }
    };
    let model = match build_model(&config) {
        Ok(model) => model,
        Err(e) => {
            error!("llm configuration: {e}");
            std::process::exit(1);
        }
    };
    info!(provider = %model.description(), "LLM provider ready");

    let skill_router = SkillRouter::new();
    let handler = Arc::new(SyscallHandler::new(
        Arc::new(UnconfiguredDb),
        Arc::new(ReqwestFetcher::default()),
        memory,
        skill_router.clone(),
    ));

    let report = load_plugins(
        &config.plugins.dir,
        &LoaderOptions {
            config_overrides: config.plugins.config.clone(),
            deny_list: config.plugins.deny.iter().cloned().collect(),
        },
    );
    info!(
        loaded = report.plugins.len(),
        failed = report.failures.len(),
        skipped = report.skipped.len(),
        "plugin scan complete"
    );

    let bridge_config = BridgeConfig {
        hook_timeout: Duration::from_millis(config.sandbox.hook_timeout_ms),
        syscall_timeout: Duration::from_millis(config.sandbox.syscall_timeout_ms),
        ready_timeout: Duration::from_millis(config.sandbox.ready_timeout_ms),
        sandbox_command: config.sandbox.command.clone(),
    };
    let orchestrator = Orchestrator::start(report, handler, bridge_config).await;
    skill_router.bind(&orchestrator);

    let store = Arc::new(InMemoryConversationStore::new());
    let driver = Arc::new(ChatDriver::new(
        orchestrator.clone(),
        model,
        store.clone(),
    ));
    let app = router(AppState { driver, store });

    let address = config.bind_address();
    let listener = match tokio::net::TcpListener::bind(&address).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("cannot bind {address}: {e}");
            std::process::exit(1);
        }
    };
    info!("listening on http://{address}");

    let serve = axum::serve(listener, app).with_graceful_shutdown(async {
        let _ = tokio::signal::ctrl_c().await;
        info!("shutdown signal received");
    });
    if let Err(e) = serve.await {
        error!("server error: {e}");
    }

    orchestrator.stop().await;
    info!("all plugin sandboxes stopped");
}
