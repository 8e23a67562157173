//! Shared Application State
//!
//! This module defines the `AppState` struct, which holds the configuration,
//! the outbound HTTP client and the optional analysis dispatcher.

use crate::config::Config;
use axum::http::HeaderMap;
use parley_core::{AnalysisDispatcher, HttpSessionGateway};
use secrecy::{ExposeSecret, SecretString};
use std::sync::Arc;

/// Header browsers use to pass their own provider key.
pub const API_KEY_HEADER: &str = "x-api-key";

/// The shared application state, created once at startup and passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub http: reqwest::Client,
    pub analysis: Option<AnalysisDispatcher>,
}

impl AppState {
    pub fn new(config: Config, analysis: Option<AnalysisDispatcher>) -> Self {
        Self {
            config: Arc::new(config),
            http: reqwest::Client::new(),
            analysis,
        }
    }

    /// The configured key wins; otherwise the caller's `X-API-Key` header.
    pub fn provider_key(&self, headers: &HeaderMap) -> Option<SecretString> {
        if let Some(key) = &self.config.ultravox_api_key {
            return Some(SecretString::from(key.expose_secret().to_owned()));
        }
        headers
            .get(API_KEY_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(|v| SecretString::from(v.to_owned()))
    }

    pub fn gateway(&self, api_key: SecretString) -> HttpSessionGateway {
        HttpSessionGateway::with_client(
            self.http.clone(),
            self.config.ultravox_base_url.clone(),
            api_key,
        )
    }
}
