//! Call configuration sent to the voice-session provider.

use crate::error::SessionError;
use crate::transcript::{Medium, Role};
use serde::{Deserialize, Serialize};

/// Model used when the configuration leaves `model` unset.
pub const DEFAULT_MODEL: &str = "fixie-ai/ultravox-70B";

/// Who speaks first once the call is joined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FirstSpeaker {
    #[serde(rename = "FIRST_SPEAKER_AGENT")]
    Agent,
    #[serde(rename = "FIRST_SPEAKER_USER")]
    User,
}

/// How audio and data reach the call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum CallMedium {
    WebRtc {},
    ServerWebSocket {
        input_sample_rate: u32,
        output_sample_rate: u32,
    },
}

/// A message seeded into the conversation before anyone speaks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InitialMessage {
    pub role: Role,
    pub text: String,
}

/// Immutable input to session creation.
///
/// Unset optional fields are omitted from the request body entirely, so the
/// provider applies its own defaults for them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallConfiguration {
    pub system_prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voice: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language_hint: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub initial_messages: Vec<InitialMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_duration: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_exceeded_message: Option<String>,
    /// Provider tool definitions, passed through untouched.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub selected_tools: Vec<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub medium: Option<CallMedium>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recording_enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_speaker: Option<FirstSpeaker>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transcript_optional: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_output_medium: Option<Medium>,
}

impl CallConfiguration {
    pub fn new(system_prompt: impl Into<String>) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            ..Default::default()
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_voice(mut self, voice: impl Into<String>) -> Self {
        self.voice = Some(voice.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_duration(mut self, max_duration: impl Into<String>) -> Self {
        self.max_duration = Some(max_duration.into());
        self
    }

    pub fn with_medium(mut self, medium: CallMedium) -> Self {
        self.medium = Some(medium);
        self
    }

    pub fn with_first_speaker(mut self, first_speaker: FirstSpeaker) -> Self {
        self.first_speaker = Some(first_speaker);
        self
    }

    pub fn with_initial_message(mut self, role: Role, text: impl Into<String>) -> Self {
        self.initial_messages.push(InitialMessage {
            role,
            text: text.into(),
        });
        self
    }

    pub fn with_selected_tool(mut self, tool: serde_json::Value) -> Self {
        self.selected_tools.push(tool);
        self
    }

    /// Fails with `Validation` when the system prompt is empty or blank.
    pub fn validate(&self) -> Result<(), SessionError> {
        if self.system_prompt.trim().is_empty() {
            return Err(SessionError::Validation(
                "System prompt is required".to_string(),
            ));
        }
        Ok(())
    }

    /// Builds the JSON body for the session-creation request.
    ///
    /// Applies the default model and normalizes `maxDuration`.
    pub fn to_request_body(&self) -> Result<serde_json::Value, SessionError> {
        self.validate()?;
        let mut body = self.clone();
        if body.model.as_deref().is_none_or(|m| m.trim().is_empty()) {
            body.model = Some(DEFAULT_MODEL.to_string());
        }
        body.max_duration = body.max_duration.as_deref().and_then(normalize_max_duration);
        serde_json::to_value(&body)
            .map_err(|e| SessionError::Validation(format!("Unserializable configuration: {}", e)))
    }
}

/// Ensures a duration string carries a trailing seconds marker.
///
/// Idempotent: `"30"` and `"30s"` both become `"30s"`. Blank input yields
/// `None` so the field is omitted.
pub fn normalize_max_duration(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    if trimmed.ends_with('s') {
        Some(trimmed.to_string())
    } else {
        Some(format!("{}s", trimmed))
    }
}
