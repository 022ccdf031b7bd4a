//! ideaforge-ws - Workshop coordinator service
//!
//! Guides SME consultation sessions through 6-3-5 brainwriting and
//! two-phase prioritization, brokering idea generation, semantic
//! grouping, and idea assessment to an LLM collaborator.

use anyhow::Result;
use clap::Parser;
use ideaforge_common::config::{prepare_root_folder, resolve_root_folder, DEFAULT_PORT};
use ideaforge_common::events::EventBus;
use ideaforge_ws::llm::chat::{ChatClient, ChatConfig};
use ideaforge_ws::llm::Collaborators;
use ideaforge_ws::{build_router, AppState, Coordinator};
use std::sync::Arc;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "ideaforge-ws", about = "Workshop coordinator service")]
struct Args {
    /// Root folder holding the database (overrides env and config file)
    #[arg(long)]
    root_folder: Option<String>,

    /// HTTP listen port
    #[arg(long, env = "IDEAFORGE_PORT")]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    // Build identification immediately after tracing init, before any
    // database delay
    info!(
        "Starting ideaforge workshop coordinator (ideaforge-ws) v{} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );

    let args = Args::parse();

    let root_folder = resolve_root_folder(args.root_folder.as_deref());
    let db_path = prepare_root_folder(&root_folder)?;
    info!("Database path: {}", db_path.display());

    let pool = ideaforge_ws::db::init_database_pool(&db_path).await?;
    info!("✓ Connected to database");

    let collaborators = match ChatConfig::from_env() {
        Some(config) => {
            info!(model = %config.model, "✓ LLM collaborator configured");
            let client = Arc::new(ChatClient::new(config));
            Collaborators {
                contributor: Some(client.clone()),
                grouper: Some(client.clone()),
                assessor: Some(client),
                ..Collaborators::disabled()
            }
        }
        None => {
            info!("No LLM endpoint configured; running with deterministic fallbacks only");
            Collaborators::disabled()
        }
    };

    let bus = EventBus::new(1000);
    let coordinator = Arc::new(Coordinator::new(pool, bus, collaborators));
    let restored = coordinator.restore().await?;
    if restored > 0 {
        info!(sessions = restored, "✓ Restored persisted sessions");
    }

    let state = AppState::new(coordinator);
    let app = build_router(state);

    let port = args.port.unwrap_or(DEFAULT_PORT);
    let listener = tokio::net::TcpListener::bind(("127.0.0.1", port)).await?;
    info!("ideaforge-ws listening on http://127.0.0.1:{}", port);
    info!("Health check: http://127.0.0.1:{}/health", port);

    axum::serve(listener, app).await?;

    Ok(())
}
