use parley_core::analysis::{DEFAULT_ANALYSIS_BASE_URL, DEFAULT_ANALYSIS_MODEL};
use parley_core::gateway::DEFAULT_BASE_URL;
use secrecy::SecretString;
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    /// Server-side provider key. When unset, callers must send `X-API-Key`.
    pub ultravox_api_key: Option<SecretString>,
    pub ultravox_base_url: String,
    /// Without it `/api/analysis` answers with the fallback analysis.
    pub analysis_api_key: Option<SecretString>,
    pub analysis_base_url: String,
    pub analysis_model: String,
    pub log_level: Level,
    pub prompts_path: PathBuf,
}

/// Reads an optional secret, treating blank values as unset.
fn secret_var(name: &str) -> Option<SecretString> {
    std::env::var(name)
        .ok()
        .filter(|value| !value.trim().is_empty())
        .map(SecretString::from)
}

impl Config {
    /// Loads configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        let bind_address_str =
            std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:3000".to_string());
        let bind_address = bind_address_str
            .parse::<SocketAddr>()
            .map_err(|e| ConfigError::InvalidValue("BIND_ADDRESS".to_string(), e.to_string()))?;

        let ultravox_api_key = secret_var("ULTRAVOX_API_KEY");
        let ultravox_base_url =
            std::env::var("ULTRAVOX_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        if !ultravox_base_url.starts_with("http://") && !ultravox_base_url.starts_with("https://")
        {
            return Err(ConfigError::InvalidValue(
                "ULTRAVOX_BASE_URL".to_string(),
                format!("'{}' is not an http(s) URL", ultravox_base_url),
            ));
        }

        let analysis_api_key = secret_var("ANALYSIS_API_KEY");
        let analysis_base_url = std::env::var("ANALYSIS_BASE_URL")
            .unwrap_or_else(|_| DEFAULT_ANALYSIS_BASE_URL.to_string());
        let analysis_model =
            std::env::var("ANALYSIS_MODEL").unwrap_or_else(|_| DEFAULT_ANALYSIS_MODEL.to_string());

        let log_level_str = std::env::var("RUST_LOG").unwrap_or_else(|_| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        let prompts_path = std::env::var("PROMPTS_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./prompts"));

        Ok(Self {
            bind_address,
            ultravox_api_key,
            ultravox_base_url,
            analysis_api_key,
            analysis_base_url,
            analysis_model,
            log_level,
            prompts_path,
        })
    }

    /// Configuration for tests and embedding: provider at `base_url`, no
    /// keys, default analysis settings.
    pub fn for_provider(base_url: impl Into<String>) -> Self {
        Self {
            bind_address: SocketAddr::from(([127, 0, 0, 1], 0)),
            ultravox_api_key: None,
            ultravox_base_url: base_url.into(),
            analysis_api_key: None,
            analysis_base_url: DEFAULT_ANALYSIS_BASE_URL.to_string(),
            analysis_model: DEFAULT_ANALYSIS_MODEL.to_string(),
            log_level: Level::INFO,
            prompts_path: PathBuf::from("./prompts"),
        }
    }
}
