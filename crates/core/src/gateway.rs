//! HTTP client for the voice-session provider.
//!
//! Exchanges a [`CallConfiguration`] for a join handle, fetches transcript
//! pages, and validates API keys. Stateless per call and never retries;
//! retry policy belongs to the caller.

use crate::call_config::CallConfiguration;
use crate::error::SessionError;
use crate::transcript::MessagePage;
use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;
use tracing::{debug, info, warn};

pub const DEFAULT_BASE_URL: &str = "https://api.ultravox.ai/api";
const API_KEY_HEADER: &str = "X-API-Key";

/// Connection details for one created call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionHandle {
    pub join_url: String,
    pub call_id: String,
}

/// Account details returned when validating an API key.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AccountInfo {
    pub name: Option<String>,
    pub billing_url: Option<String>,
    pub free_time_used: Option<String>,
    pub free_time_remaining: Option<String>,
    pub has_active_subscription: Option<bool>,
    pub active_calls: Option<u32>,
    pub allowed_concurrent_calls: Option<u32>,
    pub allowed_voices: Option<u32>,
}

/// Creates remote voice sessions.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SessionGateway: Send + Sync {
    /// Issues exactly one outbound request and returns a fully populated
    /// handle, or one of the defined error kinds.
    async fn create_session(
        &self,
        config: &CallConfiguration,
    ) -> Result<SessionHandle, SessionError>;
}

/// Anything that can produce the current transcript page of a call.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MessageSource: Send + Sync {
    async fn fetch_messages(&self, call_id: &str) -> Result<MessagePage, SessionError>;
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateCallResponse {
    #[serde(default)]
    join_url: Option<String>,
    #[serde(default)]
    call_id: Option<String>,
}

/// [`SessionGateway`] and [`MessageSource`] over the provider's REST API.
pub struct HttpSessionGateway {
    client: reqwest::Client,
    base_url: String,
    api_key: SecretString,
}

impl std::fmt::Debug for HttpSessionGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpSessionGateway")
            .field("base_url", &self.base_url)
            .field("api_key", &"[REDACTED]")
            .finish()
    }
}

impl HttpSessionGateway {
    pub fn new(base_url: impl Into<String>, api_key: SecretString) -> Self {
        Self::with_client(reqwest::Client::new(), base_url, api_key)
    }

    pub fn with_client(
        client: reqwest::Client,
        base_url: impl Into<String>,
        api_key: SecretString,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Checks the key by fetching the account it belongs to.
    pub async fn validate_key(&self) -> Result<AccountInfo, SessionError> {
        let response = self
            .client
            .get(format!("{}/accounts/me", self.base_url))
            .header(API_KEY_HEADER, self.api_key.expose_secret())
            .send()
            .await?;
        read_json(response).await
    }

    /// Posts an already-built call body and returns the provider's reply
    /// untouched. [`SessionGateway::create_session`] builds on this; the
    /// proxy service uses it to forward sanitized client bodies.
    pub async fn create_call(&self, body: &Value) -> Result<Value, SessionError> {
        let response = self
            .client
            .post(format!("{}/calls", self.base_url))
            .header(API_KEY_HEADER, self.api_key.expose_secret())
            .header(reqwest::header::ACCEPT, "application/json")
            .json(body)
            .send()
            .await?;
        read_json(response).await
    }
}

#[async_trait]
impl SessionGateway for HttpSessionGateway {
    async fn create_session(
        &self,
        config: &CallConfiguration,
    ) -> Result<SessionHandle, SessionError> {
        let body = config.to_request_body()?;
        info!(
            model = %body["model"],
            max_duration = ?body.get("maxDuration"),
            has_tools = !config.selected_tools.is_empty(),
            "Creating call"
        );

        let created: CreateCallResponse = serde_json::from_value(self.create_call(&body).await?)
            .map_err(|e| SessionError::Protocol(format!("invalid call response: {e}")))?;
        let join_url = created
            .join_url
            .filter(|url| !url.trim().is_empty())
            .ok_or_else(|| SessionError::Protocol("missing join URL".to_string()))?;
        let call_id = created
            .call_id
            .filter(|id| !id.trim().is_empty())
            .ok_or_else(|| SessionError::Protocol("missing call ID".to_string()))?;

        info!(%call_id, "Call created successfully");
        Ok(SessionHandle { join_url, call_id })
    }
}

/// Provider call IDs are UUID-like; anything else could escape the
/// `/calls/{id}/messages` path once interpolated.
pub fn is_valid_call_id(call_id: &str) -> bool {
    !call_id.is_empty()
        && call_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

#[async_trait]
impl MessageSource for HttpSessionGateway {
    async fn fetch_messages(&self, call_id: &str) -> Result<MessagePage, SessionError> {
        if !is_valid_call_id(call_id) {
            warn!(%call_id, "Refusing to fetch messages for malformed call ID");
            return Err(SessionError::Validation("Invalid call ID".to_string()));
        }
        let response = self
            .client
            .get(format!("{}/calls/{}/messages", self.base_url, call_id))
            .header(API_KEY_HEADER, self.api_key.expose_secret())
            .send()
            .await?;
        let page: MessagePage = read_json(response).await?;
        debug!(%call_id, results = page.results.len(), "Fetched call messages");
        Ok(page)
    }
}

/// Decodes a success body, or maps a failure status to `Remote`.
async fn read_json<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, SessionError> {
    let status = response.status();
    let text = response.text().await?;

    if !status.is_success() {
        let message = remote_message(&text)
            .unwrap_or_else(|| status.canonical_reason().unwrap_or("Unknown error").to_string());
        warn!(status = status.as_u16(), %message, "Provider returned an error");
        return Err(SessionError::Remote {
            status: status.as_u16(),
            message,
        });
    }

    serde_json::from_str(&text).map_err(|e| SessionError::Protocol(e.to_string()))
}

/// Best-effort error message: a known JSON field when the body is JSON,
/// otherwise the raw text.
pub fn remote_message(body: &str) -> Option<String> {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(serde_json::Value::Object(map)) = serde_json::from_str::<serde_json::Value>(trimmed)
    {
        for key in ["details", "error", "message", "detail"] {
            if let Some(text) = map.get(key).and_then(|v| v.as_str()) {
                if !text.is_empty() {
                    return Some(text.to_string());
                }
            }
        }
    }
    Some(trimmed.to_string())
}
