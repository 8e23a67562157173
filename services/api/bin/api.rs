//! Main Entrypoint for the Parley API Service
//!
//! This binary is responsible for:
//! 1. Loading configuration from the environment.
//! 2. Loading prompt templates and building the analysis dispatcher.
//! 3. Constructing the Axum router and applying middleware.
//! 4. Starting the web server and handling graceful shutdown.

use anyhow::Context;
use parley_api::{config::Config, router::create_router, state::AppState};
use parley_core::analysis::{AnalysisDispatcher, DEFAULT_RUBRIC, OpenAICompatibleClient};
use parley_core::prompts::PromptLibrary;
use secrecy::ExposeSecret;
use std::{net::SocketAddr, sync::Arc};
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

/// Listens for the `Ctrl+C` signal to gracefully shut down the server.
async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install Ctrl+C handler");
    info!("Received shutdown signal. Shutting down gracefully...");
}

/// Builds the dispatcher when an analysis key is configured. The rubric
/// comes from `analysis_rubric.md` when the prompts directory has one.
fn build_analysis(config: &Config, prompts: &PromptLibrary) -> Option<AnalysisDispatcher> {
    let Some(api_key) = &config.analysis_api_key else {
        warn!("ANALYSIS_API_KEY not set; /api/analysis will return the fallback analysis.");
        return None;
    };
    let client = OpenAICompatibleClient::with_key(
        api_key.expose_secret(),
        &config.analysis_base_url,
        config.analysis_model.clone(),
    );
    let rubric = prompts.get("analysis_rubric").unwrap_or(DEFAULT_RUBRIC);
    Some(AnalysisDispatcher::with_rubric(Arc::new(client), rubric))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // --- 1. Load Configuration ---
    let config = Config::from_env().context("Failed to load configuration")?;

    // --- 2. Initialize Logging ---
    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .init();
    info!("Configuration loaded. Initializing application state...");

    // --- 3. Initialize Shared Services ---
    let prompts = match PromptLibrary::load(&config.prompts_path) {
        Ok(prompts) => prompts,
        Err(e) => {
            warn!(error = ?e, "Prompt templates unavailable; using built-in rubric");
            PromptLibrary::default()
        }
    };
    let analysis = build_analysis(&config, &prompts);
    if config.ultravox_api_key.is_none() {
        warn!("ULTRAVOX_API_KEY not set; callers must send X-API-Key.");
    }

    let bind_address = config.bind_address;
    info!(
        provider = %config.ultravox_base_url,
        analysis_model = %config.analysis_model,
        analysis_enabled = analysis.is_some(),
        bind_address = %bind_address,
        "Service configured. Starting server..."
    );
    let app_state = Arc::new(AppState::new(config, analysis));

    // --- 4. Create Router and Apply Middleware ---
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = create_router(app_state).layer(cors);

    // --- 5. Start Server ---
    let listener = tokio::net::TcpListener::bind(bind_address).await?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("Server has shut down.");
    Ok(())
}
