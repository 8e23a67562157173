//! Axum Router Configuration
//!
//! This module defines the complete HTTP routing for the application,
//! including the proxy routes and OpenAPI documentation.

use crate::{
    handlers,
    models::{
        AnalysisRequest, AnalysisResponse, AnalysisTurn, ErrorResponse, HealthResponse,
        ValidateKeyRequest, ValidateKeyResponse,
    },
    state::AppState,
};

use axum::{
    Router,
    routing::{get, post},
};
use std::sync::Arc;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::create_call,
        handlers::get_messages,
        handlers::validate_key,
        handlers::analyze,
        handlers::health,
    ),
    components(
        schemas(ErrorResponse, ValidateKeyRequest, ValidateKeyResponse, AnalysisRequest, AnalysisTurn, AnalysisResponse, HealthResponse)
    ),
    tags(
        (name = "Parley API", description = "Voice-session proxy and transcript analysis")
    )
)]
pub struct ApiDoc;

/// Creates the main Axum router for the application.
pub fn create_router(app_state: Arc<AppState>) -> Router {
    let api_router = Router::new()
        .route("/api/calls", post(handlers::create_call))
        .route("/api/calls/{call_id}/messages", get(handlers::get_messages))
        .route("/api/validate-key", post(handlers::validate_key))
        .route("/api/analysis", post(handlers::analyze))
        .route("/health", get(handlers::health))
        .with_state(app_state);

    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .merge(api_router)
}
