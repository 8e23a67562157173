//! Axum Handlers for the REST API
//!
//! Thin proxy routes in front of the voice provider plus transcript analysis.
//! Browsers never see the server-side provider key; every provider failure is
//! reported as `{error, details}`.

use axum::{
    extract::{Path, State, rejection::JsonRejection},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
};
use parley_core::gateway::is_valid_call_id;
use parley_core::{Analysis, MessageSource, Role, SessionError, TranscriptEntry};
use secrecy::SecretString;
use serde_json::Value;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::{
    models::{
        AnalysisRequest, AnalysisResponse, ErrorResponse, HealthResponse, ValidateKeyRequest,
        ValidateKeyResponse, sanitize_call_body,
    },
    state::AppState,
};

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

pub enum ApiError {
    BadRequest(ErrorResponse),
    Unauthorized(ErrorResponse),
    /// A provider failure, forwarded with the given status.
    Provider(StatusCode, ErrorResponse),
    InternalServerError(anyhow::Error),
}

impl ApiError {
    fn invalid_request(details: impl Into<String>) -> Self {
        ApiError::BadRequest(ErrorResponse::new("Invalid request").with_details(details))
    }

    fn missing_key() -> Self {
        ApiError::Unauthorized(
            ErrorResponse::new("Configuration error")
                .with_details("API key is not configured. Please provide an API key."),
        )
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::BadRequest(body) => (StatusCode::BAD_REQUEST, Json(body)).into_response(),
            ApiError::Unauthorized(body) => (StatusCode::UNAUTHORIZED, Json(body)).into_response(),
            ApiError::Provider(status, body) => (status, Json(body)).into_response(),
            ApiError::InternalServerError(err) => {
                error!("Internal Server Error: {:?}", err);
                let body = ErrorResponse::new("An internal server error occurred.");
                (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
            }
        }
    }
}

impl From<SessionError> for ApiError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::Validation(details) => ApiError::invalid_request(details),
            SessionError::Remote { status, message } => ApiError::Provider(
                StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY),
                ErrorResponse::new("Ultravox API error").with_details(message),
            ),
            SessionError::Protocol(details) => ApiError::Provider(
                StatusCode::BAD_GATEWAY,
                ErrorResponse::new("Invalid provider response").with_details(details),
            ),
            SessionError::Http(e) => ApiError::Provider(
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorResponse::new("API request failed").with_details(e.to_string()),
            ),
            other => ApiError::InternalServerError(other.into()),
        }
    }
}

fn require_key(state: &AppState, headers: &HeaderMap) -> Result<SecretString, ApiError> {
    state.provider_key(headers).ok_or_else(|| {
        warn!("No provider API key configured or supplied");
        ApiError::missing_key()
    })
}

/// Create a voice call through the provider.
///
/// The body is reduced to the provider's allow-list before forwarding.
#[utoipa::path(
    post,
    path = "/api/calls",
    request_body(content = Object, description = "Call configuration (camelCase provider fields)"),
    responses(
        (status = 200, description = "Call created; the provider's reply including joinUrl and callId", body = Object),
        (status = 400, description = "Invalid request", body = ErrorResponse),
        (status = 401, description = "No API key available", body = ErrorResponse),
        (status = 500, description = "Provider unreachable", body = ErrorResponse)
    ),
    params(
        ("x-api-key" = Option<String>, Header, description = "Provider key, used when the server has none configured")
    )
)]
pub async fn create_call(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(raw) = body.map_err(|rejection| {
        warn!(reason = %rejection.body_text(), "Rejected call body");
        ApiError::invalid_request("Invalid request body format")
    })?;
    let sanitized = sanitize_call_body(&raw).map_err(ApiError::invalid_request)?;
    let api_key = require_key(&state, &headers)?;

    info!(
        model = ?sanitized.get("model"),
        max_duration = ?sanitized.get("maxDuration"),
        fields = sanitized.len(),
        "Forwarding call creation"
    );
    let created = state
        .gateway(api_key)
        .create_call(&Value::Object(sanitized))
        .await?;
    Ok(Json(created))
}

/// Fetch the transcript page of a call.
#[utoipa::path(
    get,
    path = "/api/calls/{call_id}/messages",
    responses(
        (status = 200, description = "Transcript page as returned by the provider", body = Object),
        (status = 400, description = "Missing or malformed call ID", body = ErrorResponse),
        (status = 401, description = "No API key available", body = ErrorResponse)
    ),
    params(
        ("call_id" = String, Path, description = "Provider call ID"),
        ("x-api-key" = Option<String>, Header, description = "Provider key, used when the server has none configured")
    )
)]
pub async fn get_messages(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(call_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let call_id = call_id.trim();
    if call_id.is_empty() {
        return Err(ApiError::BadRequest(ErrorResponse::new("Call ID is required")));
    }
    if !is_valid_call_id(call_id) {
        warn!(%call_id, "Rejected malformed call ID");
        return Err(ApiError::invalid_request("Invalid call ID"));
    }
    let api_key = require_key(&state, &headers)?;
    let page = state.gateway(api_key).fetch_messages(call_id).await?;
    Ok(Json(page))
}

/// Check a provider API key supplied by the user.
#[utoipa::path(
    post,
    path = "/api/validate-key",
    request_body = ValidateKeyRequest,
    responses(
        (status = 200, description = "Key is valid", body = ValidateKeyResponse),
        (status = 400, description = "No key supplied", body = ErrorResponse),
        (status = 401, description = "Key rejected by the provider", body = ErrorResponse),
        (status = 500, description = "Validation could not be performed", body = ErrorResponse)
    )
)]
pub async fn validate_key(
    State(state): State<Arc<AppState>>,
    body: Result<Json<ValidateKeyRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let api_key = body
        .ok()
        .and_then(|Json(request)| request.api_key)
        .map(|key| key.trim().to_string())
        .filter(|key| !key.is_empty())
        .ok_or_else(|| ApiError::BadRequest(ErrorResponse::new("Security key is required")))?;

    match state.gateway(SecretString::from(api_key)).validate_key().await {
        Ok(account_info) => {
            info!(account = ?account_info.name, "API key validated");
            Ok(Json(ValidateKeyResponse {
                valid: true,
                account_info,
            }))
        }
        Err(SessionError::Remote { status, message }) => {
            warn!(status, %message, "Provider rejected API key");
            Err(ApiError::Unauthorized(ErrorResponse::new(
                "Invalid security key",
            )))
        }
        Err(e) => {
            error!(error = %e, "API key validation failed");
            Err(ApiError::Provider(
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorResponse::new("Validation failed").with_details(e.to_string()),
            ))
        }
    }
}

/// Analyze a finished conversation.
///
/// Always answers 200; when the analysis backend is missing or fails the
/// fallback analysis with default ratings is returned.
#[utoipa::path(
    post,
    path = "/api/analysis",
    request_body = AnalysisRequest,
    responses(
        (status = 200, description = "Analysis text and extracted ratings", body = AnalysisResponse),
        (status = 400, description = "Invalid request", body = ErrorResponse)
    )
)]
pub async fn analyze(
    State(state): State<Arc<AppState>>,
    body: Result<Json<AnalysisRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(request) = body.map_err(|rejection| {
        ApiError::invalid_request(rejection.body_text())
    })?;
    let topic = request.topic.trim();
    if topic.is_empty() {
        return Err(ApiError::invalid_request("Topic is required"));
    }

    let entries: Vec<TranscriptEntry> = request
        .messages
        .iter()
        .filter_map(|turn| Role::from_wire(&turn.role).map(|role| (role, turn)))
        .enumerate()
        .map(|(position, (role, turn))| TranscriptEntry::new(role, turn.text.clone(), position as u64))
        .collect();

    let analysis = match &state.analysis {
        Some(dispatcher) => dispatcher.analyze(&entries, topic).await,
        None => {
            warn!("Analysis requested but no analysis API key is configured");
            Analysis::fallback()
        }
    };

    Ok(Json(AnalysisResponse {
        analysis: analysis.text,
        ratings: analysis.ratings,
    }))
}

/// Liveness probe.
#[utoipa::path(
    get,
    path = "/health",
    responses((status = 200, description = "Service is up", body = HealthResponse))
)]
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}
