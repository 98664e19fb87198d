//! Tripdesk - Swiss Airlines customer support assistant
//!
//! A Rust backend implementing a conversation state machine for an
//! LLM travel agent with human-in-the-loop confirmation of booking
//! changes.

mod api;
mod booking;
mod checkpoint;
mod llm;
mod runtime;
mod state_machine;
mod system_prompt;
mod tools;

use api::{create_router, AppState};
use booking::{BookingEngine, ResourceStore, SystemClock};
use checkpoint::CheckpointStore;
use llm::{AnthropicClient, LlmClient};
use runtime::RuntimeManager;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tools::{PolicyService, ToolRegistry, SWISS_FAQ_URL};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tripdesk=info,tower_http=debug".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(false)
                .with_span_list(false),
        )
        .init();

    // Configuration
    let data_dir = std::env::var("TRIPDESK_DATA_DIR").unwrap_or_else(|_| {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
        format!("{home}/.tripdesk")
    });
    std::fs::create_dir_all(PathBuf::from(&data_dir))?;

    let port: u16 = std::env::var("TRIPDESK_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8000);

    // Open the inventory and checkpoint databases
    let inventory_path = format!("{data_dir}/inventory.db");
    let checkpoint_path = format!("{data_dir}/threads.db");
    tracing::info!(inventory = %inventory_path, threads = %checkpoint_path, "Opening databases");

    let store = ResourceStore::open(&inventory_path)?;
    let checkpoints = CheckpointStore::open(&checkpoint_path)?;
    let engine = Arc::new(BookingEngine::new(store, Arc::new(SystemClock)));

    // Policy lookups fetch the document lazily on first use
    let policy = Arc::new(PolicyService::new(SWISS_FAQ_URL));

    // LLM client
    let api_key = match std::env::var("ANTHROPIC_API_KEY") {
        Ok(key) if !key.is_empty() => key,
        _ => {
            tracing::error!("No LLM API key configured. Set ANTHROPIC_API_KEY.");
            return Err("ANTHROPIC_API_KEY is required".into());
        }
    };
    let model = std::env::var("TRIPDESK_MODEL").ok();
    let client = AnthropicClient::new(api_key, model)?;
    tracing::info!(model = %client.model_id(), "LLM client initialized");

    let tools = Arc::new(ToolRegistry::standard());
    let runtime = Arc::new(RuntimeManager::new(
        checkpoints,
        engine,
        policy,
        tools,
        Arc::new(client),
        Arc::new(SystemClock),
    ));

    // Create router
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = create_router(AppState::new(runtime))
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("Tripdesk server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
