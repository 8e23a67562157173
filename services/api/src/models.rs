//! API Models
//!
//! Request and response bodies of the proxy routes, documented with `utoipa`,
//! plus sanitization of client-supplied call bodies.

use parley_core::analysis::Ratings;
use parley_core::call_config::{DEFAULT_MODEL, normalize_max_duration};
use parley_core::gateway::AccountInfo;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;
use utoipa::ToSchema;

#[derive(Serialize, Deserialize, ToSchema, Debug, Clone, PartialEq)]
pub struct ErrorResponse {
    #[schema(example = "Invalid request")]
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schema(example = "Invalid request body format")]
    pub details: Option<String>,
}

#[derive(Deserialize, ToSchema, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ValidateKeyRequest {
    #[serde(default)]
    pub api_key: Option<String>,
}

#[derive(Serialize, ToSchema, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ValidateKeyResponse {
    pub valid: bool,
    #[schema(value_type = Object)]
    pub account_info: AccountInfo,
}

/// One conversation turn submitted for analysis.
#[derive(Deserialize, ToSchema, Debug, Clone)]
pub struct AnalysisTurn {
    /// `agent`/`user` or the provider's `MESSAGE_ROLE_*` names; other
    /// roles are ignored.
    #[schema(example = "user")]
    pub role: String,
    pub text: String,
}

#[derive(Deserialize, ToSchema, Debug)]
pub struct AnalysisRequest {
    #[schema(example = "Python")]
    pub topic: String,
    #[serde(default)]
    pub messages: Vec<AnalysisTurn>,
}

#[derive(Serialize, ToSchema, Debug)]
pub struct AnalysisResponse {
    pub analysis: String,
    #[schema(value_type = Object)]
    pub ratings: Ratings,
}

#[derive(Serialize, ToSchema, Debug)]
pub struct HealthResponse {
    #[schema(example = "ok")]
    pub status: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FieldKind {
    String,
    Number,
    Bool,
    Array,
    Object,
}

impl FieldKind {
    fn accepts(self, value: &Value) -> bool {
        match self {
            FieldKind::String => value.is_string(),
            FieldKind::Number => value.is_number(),
            FieldKind::Bool => value.is_boolean(),
            FieldKind::Array => value.is_array(),
            FieldKind::Object => value.is_object(),
        }
    }
}

/// Fields the provider accepts on call creation, with their JSON type.
const CALL_FIELDS: &[(&str, FieldKind)] = &[
    ("systemPrompt", FieldKind::String),
    ("temperature", FieldKind::Number),
    ("model", FieldKind::String),
    ("voice", FieldKind::String),
    ("languageHint", FieldKind::String),
    ("initialMessages", FieldKind::Array),
    ("joinTimeout", FieldKind::String),
    ("maxDuration", FieldKind::String),
    ("timeExceededMessage", FieldKind::String),
    ("inactivityMessages", FieldKind::Array),
    ("selectedTools", FieldKind::Array),
    ("medium", FieldKind::Object),
    ("recordingEnabled", FieldKind::Bool),
    ("firstSpeaker", FieldKind::String),
    ("transcriptOptional", FieldKind::Bool),
    ("initialOutputMedium", FieldKind::String),
    ("vadSettings", FieldKind::Object),
    ("firstSpeakerSettings", FieldKind::Object),
    ("experimentalSettings", FieldKind::Object),
];

/// Reduces a client call body to the provider's allow-list.
///
/// Unknown fields and fields of the wrong JSON type are dropped. The model
/// is defaulted and `maxDuration` normalized to seconds. Fails when the body
/// is not an object or carries no usable system prompt.
pub fn sanitize_call_body(raw: &Value) -> Result<Map<String, Value>, String> {
    let object = raw
        .as_object()
        .ok_or_else(|| "Invalid request body format".to_string())?;

    let mut sanitized = Map::new();
    for (key, value) in object {
        match CALL_FIELDS.iter().find(|(name, _)| *name == key.as_str()) {
            Some((_, kind)) if kind.accepts(value) => {
                sanitized.insert(key.clone(), value.clone());
            }
            Some((_, kind)) => debug!(field = %key, expected = ?kind, "Dropping mistyped field"),
            None => debug!(field = %key, "Dropping unknown field"),
        }
    }

    let has_prompt = sanitized
        .get("systemPrompt")
        .and_then(Value::as_str)
        .is_some_and(|p| !p.trim().is_empty());
    if !has_prompt {
        return Err("System prompt is required".to_string());
    }

    if sanitized
        .get("model")
        .and_then(Value::as_str)
        .is_none_or(|m| m.trim().is_empty())
    {
        sanitized.insert("model".to_string(), Value::from(DEFAULT_MODEL));
    }

    if let Some(duration) = sanitized.remove("maxDuration") {
        if let Some(normalized) = duration.as_str().and_then(normalize_max_duration) {
            sanitized.insert("maxDuration".to_string(), Value::from(normalized));
        }
    }

    Ok(sanitized)
}
