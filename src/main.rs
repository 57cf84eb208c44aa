//! znvo - conversational journaling session engine
//!
//! Streams a model-driven journaling conversation to each client, extracts
//! activities and meals through tool calls, and keeps the transcript
//! envelope-encrypted between turns.

mod api;
mod auth;
mod config;
mod conversation;
mod history;
mod llm;
mod relay;
mod state_machine;
mod system_prompt;
mod tools;
mod transcript;

#[cfg(test)]
mod testing;

use api::{create_router, AppState};
use auth::TokenVerifier;
use config::{AppConfig, KekSource, IN_MEMORY_KV};
use conversation::{ConversationEngine, EngineSettings};
use history::{KeyValueStore, LocalKeyWrapper, MemoryKvStore, SecureHistoryStore, SqliteKvStore};
use llm::{LlmService, LoggingService, OpenAIService};
use relay::SessionRelay;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tools::ToolRegistry;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "znvo=info,tower_http=info".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(false)
                .with_span_list(false),
        )
        .init();

    let config = AppConfig::from_env()?;
    tracing::info!(env = %config.env, model = %config.default_model, "Configuration loaded");

    // History store
    let kv: Arc<dyn KeyValueStore> = if config.kv_db_path == IN_MEMORY_KV {
        if config.is_production() {
            tracing::warn!("Using in-memory history store in production");
        }
        Arc::new(MemoryKvStore::new())
    } else {
        tracing::info!(path = %config.kv_db_path, "Opening key-value store");
        Arc::new(SqliteKvStore::open(&config.kv_db_path)?)
    };
    let wrapper = match &config.history_kek {
        KekSource::Provided(encoded) => LocalKeyWrapper::from_base64(encoded)?,
        KekSource::DerivedFromSecret => {
            tracing::warn!("HISTORY_KEK not set; deriving history key from JWT_SECRET (development only)");
            LocalKeyWrapper::derive_from_secret(&config.jwt_secret)
        }
    };
    let history = Arc::new(SecureHistoryStore::new(kv, Arc::new(wrapper), config.history_ttl));

    // Model client
    let api_key = config.openai_api_key.clone().unwrap_or_else(|| {
        tracing::warn!("No LLM API key configured. Set OPENAI_API_KEY.");
        String::new()
    });
    let openai = OpenAIService::new(api_key, &config.default_model, &config.llm_base_url)?;
    let llm: Arc<dyn LlmService> = Arc::new(LoggingService::new(Arc::new(openai)));

    let relay = Arc::new(SessionRelay::new(config.relay_capacity));
    let engine = Arc::new(ConversationEngine::new(
        llm,
        relay,
        history,
        Arc::new(ToolRegistry::standard()),
        EngineSettings {
            max_continuations: config.max_continuations,
            idle_timeout: config.session_idle,
        },
    ));

    spawn_sweeper(Arc::clone(&engine), sweep_interval(config.session_idle));

    let state = AppState::new(
        engine,
        Arc::new(TokenVerifier::new(&config.jwt_secret)),
        config.relay_capacity,
    );

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = create_router(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("znvo listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

fn sweep_interval(idle: Duration) -> Duration {
    (idle / 4).clamp(Duration::from_secs(5), Duration::from_secs(60))
}

/// Periodically reap idle sessions and expired history rows
fn spawn_sweeper(engine: Arc<ConversationEngine>, every: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let closed = engine.sweep_idle().await;
            if closed > 0 {
                tracing::info!(closed, "Idle sweep closed sessions");
            }
        }
    });
}
